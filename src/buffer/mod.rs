//! Buffer management for process output

use bytes::{Bytes, BytesMut};

/// Initial capacity reserved for the accumulation buffer.
const INITIAL_CAPACITY: usize = 4096;

/// Output read from the child that no successful match has consumed yet.
///
/// Data is only ever appended at the end and removed from the front, so the
/// buffer always holds a contiguous suffix of the child's output.
#[derive(Debug)]
pub struct BufferManager {
    buffer: BytesMut,
}

impl Default for BufferManager {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferManager {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_CAPACITY),
        }
    }

    /// Append data to the buffer
    pub fn append(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Get the buffer as bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Get the current buffer length
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// `true` if nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Remove and return the first `n` bytes (or everything, if fewer are buffered).
    pub fn consume(&mut self, n: usize) -> Bytes {
        let n = n.min(self.buffer.len());
        self.buffer.split_to(n).freeze()
    }

    /// Remove and return everything.
    pub fn take_all(&mut self) -> Bytes {
        self.buffer.split().freeze()
    }

    /// End offset of the first line, terminator included, searching from `from`.
    pub fn line_end(&self, from: usize) -> Option<usize> {
        self.buffer
            .get(from..)?
            .iter()
            .position(|&b| b == b'\n')
            .map(|pos| from + pos + 1)
    }
}
