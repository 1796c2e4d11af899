//! Reading from and writing to the child's terminal

use super::{Deadline, ExpectState, Fill, Session};
use crate::buffer::BufferManager;
use crate::result::{ExpectError, Trace};
use bytes::Bytes;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};
use nix::sys::termios::{tcgetattr, SpecialCharacterIndices};
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::time::Duration;

/// Character sent by `sendeof` when the terminal settings cannot be read.
const DEFAULT_VEOF: u8 = 4;

/// Character sent by `sendintr` when the terminal settings cannot be read.
const DEFAULT_VINTR: u8 = 3;

/// Milliseconds for `poll`, rounded up so the wait never ends early.
fn poll_timeout_ms(remaining: Option<Duration>) -> libc::c_int {
    match remaining {
        None => -1,
        Some(d) => d.as_nanos().div_ceil(1_000_000).min(libc::c_int::MAX as u128) as libc::c_int,
    }
}

/// Wait until `fd` is ready for `events`. Returns `false` on timeout.
fn wait_ready(fd: BorrowedFd<'_>, events: PollFlags, deadline: &Deadline) -> io::Result<bool> {
    loop {
        let mut fds = [PollFd::new(&fd, events)];
        match poll(&mut fds, poll_timeout_ms(deadline.remaining())) {
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e.into()),
            Ok(0) => return Ok(false),
            Ok(_) => {
                if fds[0].revents().is_some_and(|r| r.contains(PollFlags::POLLNVAL)) {
                    return Err(Errno::EBADF.into());
                }
                return Ok(true);
            }
        }
    }
}

fn control_code(c: char) -> Option<u8> {
    match c {
        'a'..='z' => Some(c as u8 - b'a' + 1),
        '@' | '`' => Some(0),
        '[' | '{' => Some(27),
        '\\' | '|' => Some(28),
        ']' | '}' => Some(29),
        '^' | '~' => Some(30),
        '_' => Some(31),
        '?' => Some(127),
        _ => None,
    }
}

impl Session {
    /// One bounded read attempt: wait for the terminal with whatever the
    /// deadline leaves, read up to `maxread` bytes and append them.
    ///
    /// Once end of stream has been seen the descriptor is never touched again.
    pub(crate) fn fill(&mut self, deadline: &Deadline) -> Result<Fill, ExpectError> {
        if self.eof_reached {
            return Ok(Fill::Eof);
        }
        loop {
            if !self.master_readable(deadline)? {
                // Nothing arrived in time. A dead child with nothing left to
                // read means the stream is over.
                if !self.child_alive_quiet() && !self.master_readable(&Deadline::after(Some(Duration::ZERO)))? {
                    self.eof_reached = true;
                    return Ok(Fill::Eof);
                }
                return Ok(Fill::TimedOut);
            }

            let mut chunk = vec![0u8; self.settings.maxread.max(1)];
            let master = self.master.as_mut().ok_or_else(ExpectError::closed)?;
            match master.read(&mut chunk) {
                Ok(0) => {
                    self.eof_reached = true;
                    return Ok(Fill::Eof);
                }
                Ok(n) => {
                    tracing::trace!(bytes = n, "read from child");
                    self.buffer.append(&chunk[..n]);
                    if let Some(sink) = self.log_read.as_mut() {
                        sink.write_all(&chunk[..n])?;
                    }
                    return Ok(Fill::Data(n));
                }
                // Linux reports a hung-up pty as EIO rather than a zero-length read.
                Err(e) if e.raw_os_error() == Some(libc::EIO) => {
                    self.eof_reached = true;
                    return Ok(Fill::Eof);
                }
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
                    if deadline.expired() {
                        return Ok(Fill::TimedOut);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn master_readable(&self, deadline: &Deadline) -> Result<bool, ExpectError> {
        let master = self.master.as_ref().ok_or_else(ExpectError::closed)?;
        Ok(wait_ready(master.as_fd(), PollFlags::POLLIN, deadline)?)
    }

    /// Read until `ready` says how much to take, or until end of stream.
    ///
    /// At end of stream whatever remains is returned, possibly nothing.
    fn read_until<F>(&mut self, what: &str, mut ready: F) -> Result<Bytes, ExpectError>
    where
        F: FnMut(&BufferManager) -> Option<usize>,
    {
        self.ensure_open()?;
        let timeout = self.settings.timeout;
        let deadline = Deadline::after(timeout);
        let mut attempted = false;

        loop {
            if let Some(n) = ready(&self.buffer) {
                self.state = ExpectState::Matched;
                return Ok(self.buffer.consume(n));
            }

            if attempted && deadline.expired() {
                self.state = ExpectState::Waiting;
                return Err(ExpectError::Timeout {
                    duration: timeout.unwrap_or_default(),
                    searcher: what.to_owned(),
                    trace: Trace::none(),
                });
            }
            attempted = true;

            match self.fill(&deadline)? {
                Fill::Data(_) => {}
                Fill::Eof => {
                    self.state = ExpectState::EofReached;
                    return Ok(self.buffer.take_all());
                }
                Fill::TimedOut => {
                    self.state = ExpectState::Waiting;
                    return Err(ExpectError::Timeout {
                        duration: timeout.unwrap_or_default(),
                        searcher: what.to_owned(),
                        trace: Trace::none(),
                    });
                }
            }
        }
    }

    /// Read exactly `size` bytes.
    ///
    /// Buffered output is used first. At end of stream fewer bytes (possibly
    /// none) are returned; `size == 0` returns immediately.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use expectpty::Session;
    ///
    /// # fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let mut session = Session::spawn("cat")?;
    /// session.sendline("abc")?;
    /// assert_eq!(&session.read(3)?[..], b"abc");
    /// # Ok(())
    /// # }
    /// ```
    #[track_caller]
    pub fn read(&mut self, size: usize) -> Result<Bytes, ExpectError> {
        let site = Trace::capture();
        if size == 0 {
            return self.ensure_open().map(|()| Bytes::new()).map_err(|e| e.located(site));
        }
        self.read_until(&format!("read({size})"), |buffer| (buffer.len() >= size).then_some(size))
            .map_err(|e| e.located(site))
    }

    /// Read everything until the child's output ends.
    #[track_caller]
    pub fn read_to_eof(&mut self) -> Result<Bytes, ExpectError> {
        let site = Trace::capture();
        self.read_until("read_to_eof()", |_| None)
            .map_err(|e| e.located(site))
    }

    /// Read one line, terminator included.
    ///
    /// Terminal output lines end in `\r\n`. At end of stream the remaining
    /// partial line (or an empty value) is returned.
    #[track_caller]
    pub fn readline(&mut self) -> Result<Bytes, ExpectError> {
        let site = Trace::capture();
        self.readline_inner(usize::MAX).map_err(|e| e.located(site))
    }

    /// Read one line, stopping after `size` bytes if no terminator came first.
    ///
    /// `size == 0` returns an empty value without consuming anything.
    #[track_caller]
    pub fn readline_limited(&mut self, size: usize) -> Result<Bytes, ExpectError> {
        let site = Trace::capture();
        if size == 0 {
            return self.ensure_open().map(|()| Bytes::new()).map_err(|e| e.located(site));
        }
        self.readline_inner(size).map_err(|e| e.located(site))
    }

    fn readline_inner(&mut self, size: usize) -> Result<Bytes, ExpectError> {
        let mut scanned = 0;
        self.read_until("readline()", |buffer| {
            if let Some(end) = buffer.line_end(scanned) {
                return Some(end.min(size));
            }
            scanned = buffer.len();
            (buffer.len() >= size).then_some(size)
        })
    }

    /// Iterate over lines until the child's output ends.
    ///
    /// Each line is read once; nothing is re-read on a second pass.
    #[track_caller]
    pub fn lines(&mut self) -> Lines<'_> {
        Lines {
            site: Trace::capture(),
            session: self,
            done: false,
        }
    }

    /// Read all remaining lines.
    #[track_caller]
    pub fn readlines(&mut self) -> Result<Vec<Bytes>, ExpectError> {
        self.lines().collect()
    }

    /// Return up to `size` bytes without waiting for more than one read.
    ///
    /// Buffered output is returned first. Otherwise a single read is
    /// attempted within `timeout` (`None` falls back to the session timeout).
    ///
    /// # Errors
    ///
    /// [`ExpectError::Eof`] once the stream has ended and nothing is buffered,
    /// [`ExpectError::Timeout`] if nothing arrived in time.
    #[track_caller]
    pub fn read_nonblocking(&mut self, size: usize, timeout: Option<Duration>) -> Result<Bytes, ExpectError> {
        let site = Trace::capture();
        self.read_nonblocking_inner(size, timeout.or(self.settings.timeout))
            .map_err(|e| e.located(site))
    }

    fn read_nonblocking_inner(&mut self, size: usize, timeout: Option<Duration>) -> Result<Bytes, ExpectError> {
        self.ensure_open()?;
        if size == 0 {
            return Ok(Bytes::new());
        }
        if !self.buffer.is_empty() {
            return Ok(self.buffer.consume(size));
        }

        match self.fill(&Deadline::after(timeout))? {
            Fill::Data(_) => Ok(self.buffer.consume(size)),
            Fill::Eof => {
                self.state = ExpectState::EofReached;
                Err(ExpectError::Eof {
                    searcher: "read_nonblocking()".to_owned(),
                    trace: Trace::none(),
                })
            }
            Fill::TimedOut => Err(ExpectError::Timeout {
                duration: timeout.unwrap_or_default(),
                searcher: "read_nonblocking()".to_owned(),
                trace: Trace::none(),
            }),
        }
    }

    /// Send bytes to the child, returning how many were written.
    ///
    /// Waits `delay_before_send` first, which gives programs that turn echo
    /// off (password prompts) time to do so.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use expectpty::Session;
    ///
    /// # fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// # let mut session = Session::spawn("bash")?;
    /// // Carriage return
    /// session.send(b"\r")?;
    ///
    /// // ANSI escape sequence (clear screen)
    /// session.send(b"\x1b[2J")?;
    ///
    /// // Up arrow
    /// session.send([0x1b, 0x5b, 0x41])?;
    /// # Ok(())
    /// # }
    /// ```
    #[track_caller]
    pub fn send(&mut self, data: impl AsRef<[u8]>) -> Result<usize, ExpectError> {
        let site = Trace::capture();
        self.send_inner(data.as_ref()).map_err(|e| e.located(site))
    }

    fn send_inner(&mut self, data: &[u8]) -> Result<usize, ExpectError> {
        self.ensure_open()?;
        if let Some(delay) = self.settings.delay_before_send {
            std::thread::sleep(delay);
        }

        if let Some(sink) = self.log_send.as_mut() {
            sink.write_all(data)?;
        }

        let master = self.master.as_mut().ok_or_else(ExpectError::closed)?;
        let mut written = 0;
        while written < data.len() {
            match master.write(&data[written..]) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    wait_ready(master.as_fd(), PollFlags::POLLOUT, &Deadline::after(None))?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::trace!(bytes = written, "sent to child");
        Ok(written)
    }

    /// Send `data` followed by a newline.
    #[track_caller]
    pub fn sendline(&mut self, data: impl AsRef<[u8]>) -> Result<usize, ExpectError> {
        let site = Trace::capture();
        let mut line = data.as_ref().to_vec();
        line.push(b'\n');
        self.send_inner(&line).map_err(|e| e.located(site))
    }

    /// Send a control character, e.g. `sendcontrol('c')` for Ctrl-C.
    ///
    /// Accepts `a`-`z` and `@`, `` ` ``, `[`, `{`, `\`, `|`, `]`, `}`, `^`,
    /// `~`, `_`, `?`.
    #[track_caller]
    pub fn sendcontrol(&mut self, c: char) -> Result<usize, ExpectError> {
        let site = Trace::capture();
        let code = control_code(c.to_ascii_lowercase())
            .ok_or_else(|| ExpectError::usage(format!("No control character for {c:?}")).located(site))?;
        self.send_inner(&[code]).map_err(|e| e.located(site))
    }

    /// Send the terminal's end-of-file character (usually Ctrl-D).
    ///
    /// In canonical mode this only ends input when sent at the start of a line.
    #[track_caller]
    pub fn sendeof(&mut self) -> Result<(), ExpectError> {
        let site = Trace::capture();
        let eof = self.special_char(SpecialCharacterIndices::VEOF, DEFAULT_VEOF);
        self.send_inner(&[eof]).map(|_| ()).map_err(|e| e.located(site))
    }

    /// Send the terminal's interrupt character (usually Ctrl-C).
    #[track_caller]
    pub fn sendintr(&mut self) -> Result<(), ExpectError> {
        let site = Trace::capture();
        let intr = self.special_char(SpecialCharacterIndices::VINTR, DEFAULT_VINTR);
        self.send_inner(&[intr]).map(|_| ()).map_err(|e| e.located(site))
    }

    fn special_char(&self, index: SpecialCharacterIndices, fallback: u8) -> u8 {
        self.master
            .as_ref()
            .and_then(|master| tcgetattr(master).ok())
            .map(|attrs| attrs.control_chars[index as usize])
            .unwrap_or(fallback)
    }

    /// Send `data`, discarding the byte count.
    #[track_caller]
    pub fn write(&mut self, data: impl AsRef<[u8]>) -> Result<(), ExpectError> {
        let site = Trace::capture();
        self.send_inner(data.as_ref()).map(|_| ()).map_err(|e| e.located(site))
    }

    /// Send each item in turn, without adding separators.
    #[track_caller]
    pub fn writelines<I>(&mut self, lines: I) -> Result<(), ExpectError>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        let site = Trace::capture();
        for line in lines {
            self.send_inner(line.as_ref()).map_err(|e| e.located(site))?;
        }
        Ok(())
    }
}

/// Iterator over the lines of a session's output.
///
/// Created by [`Session::lines`] or by iterating `&mut Session`. Ends at the
/// first empty read, which happens at end of stream.
#[derive(Debug)]
pub struct Lines<'a> {
    session: &'a mut Session,
    site: Trace,
    done: bool,
}

impl Iterator for Lines<'_> {
    type Item = Result<Bytes, ExpectError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.session.readline_inner(usize::MAX) {
            Ok(line) if line.is_empty() => {
                self.done = true;
                None
            }
            Ok(line) => Some(Ok(line)),
            Err(e) => {
                self.done = true;
                Some(Err(e.located(self.site)))
            }
        }
    }
}

impl<'a> IntoIterator for &'a mut Session {
    type Item = Result<Bytes, ExpectError>;
    type IntoIter = Lines<'a>;

    #[track_caller]
    fn into_iter(self) -> Self::IntoIter {
        self.lines()
    }
}
