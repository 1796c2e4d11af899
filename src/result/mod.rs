//! Result types for expect operations

mod error;

pub use error::{ExpectError, PatternError, Trace};

use crate::config::Encoding;
use bytes::Bytes;

/// Which implicit condition produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentinel {
    /// The child's output stream ended.
    Eof,
    /// The time budget ran out.
    Timeout,
}

/// Result of a successful pattern match.
///
/// After a match the session buffer keeps only the bytes following `end`;
/// the bytes before the match and the matched bytes themselves are handed
/// out here.
///
/// # Examples
///
/// ```no_run
/// use expectpty::{Pattern, Session};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let mut session = Session::spawn("echo user@example.com")?;
/// let result = session.expect(Pattern::regex(r"(\w+)@(\w+)\.(\w+)")?)?;
///
/// // captures[0] is the full match, [1..] the groups
/// assert_eq!(result.capture(1).as_deref(), Some(&b"user"[..]));
/// println!("Before match: {:?}", result.before);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct MatchResult {
    /// Index of the pattern that matched in the pattern list.
    pub pattern_index: usize,

    /// The matched bytes. Empty for EOF and TIMEOUT matches.
    pub matched: Bytes,

    /// Start of the match in the searched buffer (byte offset).
    pub start: usize,

    /// End of the match in the searched buffer (byte offset).
    pub end: usize,

    /// Output that appeared before the match.
    ///
    /// For an EOF match this is everything that was still buffered.
    pub before: Bytes,

    /// Captured groups, for regex patterns only.
    ///
    /// Index 0 is the whole match; groups that did not participate are `None`.
    pub captures: Vec<Option<Bytes>>,

    /// Set when the match is the EOF or TIMEOUT sentinel.
    pub sentinel: Option<Sentinel>,
}

impl MatchResult {
    pub(crate) fn sentinel(pattern_index: usize, sentinel: Sentinel, before: Bytes, at: usize) -> Self {
        Self {
            pattern_index,
            matched: Bytes::new(),
            start: at,
            end: at,
            before,
            captures: Vec::new(),
            sentinel: Some(sentinel),
        }
    }

    /// `true` if this match is the EOF sentinel.
    pub fn is_eof(&self) -> bool {
        self.sentinel == Some(Sentinel::Eof)
    }

    /// `true` if this match is the TIMEOUT sentinel.
    pub fn is_timeout(&self) -> bool {
        self.sentinel == Some(Sentinel::Timeout)
    }

    /// A captured group by number.
    pub fn capture(&self, group: usize) -> Option<Bytes> {
        self.captures.get(group).cloned().flatten()
    }

    /// `before`, decoded.
    pub fn before_text(&self, encoding: Encoding) -> String {
        encoding.decode(&self.before)
    }

    /// `matched`, decoded.
    pub fn matched_text(&self, encoding: Encoding) -> String {
        encoding.decode(&self.matched)
    }
}
