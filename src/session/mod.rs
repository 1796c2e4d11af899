//! Session management for PTY-based process automation

mod builder;
mod io;
mod process;
mod spawn;

pub use builder::SessionBuilder;
pub use io::Lines;
pub use spawn::{PtyStrategy, SpawnTarget};

use crate::buffer::BufferManager;
use crate::config::Encoding;
use crate::pattern::{Pattern, SearchMatch, Searcher};
use crate::result::{ExpectError, MatchResult, Sentinel, Trace};
use bytes::Bytes;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::time::{Duration, Instant};

/// Where the expect engine currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectState {
    /// Ready for the next operation.
    Waiting,
    /// The last operation matched a pattern.
    Matched,
    /// The last operation ended with a listed `Pattern::Timeout`.
    TimedOut,
    /// End of stream has been observed; no further reads will happen.
    EofReached,
    /// The last operation failed.
    Error,
}

/// Per-session tunables, resolved by the builder.
#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub timeout: Option<Duration>,
    pub encoding: Encoding,
    pub maxread: usize,
    pub search_window_size: Option<usize>,
    pub delay_before_send: Option<Duration>,
    pub delay_after_close: Duration,
    pub delay_after_terminate: Duration,
}

/// Optional transcript sink.
pub(crate) type LogSink = Option<Box<dyn Write + Send>>;

/// Outcome of one bounded read attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fill {
    /// This many bytes were appended to the buffer.
    Data(usize),
    /// The stream has ended.
    Eof,
    /// The budget ran out with nothing to read.
    TimedOut,
}

/// A point in time after which blocking operations give up.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// A budget too large to represent as an instant is unbounded.
    pub(crate) fn after(timeout: Option<Duration>) -> Self {
        Self {
            at: timeout.and_then(|t| Instant::now().checked_add(t)),
        }
    }

    /// Time left, `None` when unbounded.
    pub(crate) fn remaining(&self) -> Option<Duration> {
        self.at.map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub(crate) fn expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Main session for interacting with a spawned process.
///
/// A `Session` owns a child process running on a pseudo-terminal, the
/// parent's end of that terminal and a buffer of output not yet consumed by
/// a match. Everything is synchronous: blocking operations wait on the
/// terminal with the remaining time budget and return when a pattern
/// matches, the budget runs out or the child's output ends.
///
/// Dropping a session closes it, terminating the child if needed.
///
/// # Examples
///
/// ```no_run
/// use expectpty::Session;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let mut session = Session::builder()
///     .timeout(Duration::from_secs(30))
///     .spawn("python3 -i")?;
///
/// session.expect(">>> ")?;
/// session.sendline("print('Hello')")?;
/// session.expect("Hello")?;
/// # Ok(())
/// # }
/// ```
pub struct Session {
    master: Option<File>,
    pid: Pid,
    buffer: BufferManager,
    settings: Settings,
    eof_reached: bool,
    terminated: bool,
    exit_status: Option<i32>,
    signal_status: Option<Signal>,
    state: ExpectState,
    last: Option<MatchResult>,
    log_read: LogSink,
    log_send: LogSink,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("pid", &self.pid)
            .field("open", &self.master.is_some())
            .field("buffered", &self.buffer.len())
            .field("state", &self.state)
            .field("eof_reached", &self.eof_reached)
            .field("terminated", &self.terminated)
            .field("exit_status", &self.exit_status)
            .field("signal_status", &self.signal_status)
            .finish()
    }
}

impl Session {
    pub(crate) fn from_parts(master: File, pid: Pid, settings: Settings, log_read: LogSink, log_send: LogSink) -> Self {
        Self {
            master: Some(master),
            pid,
            buffer: BufferManager::new(),
            settings,
            eof_reached: false,
            terminated: false,
            exit_status: None,
            signal_status: None,
            state: ExpectState::Waiting,
            last: None,
            log_read,
            log_send,
        }
    }

    /// Create a new session builder.
    ///
    /// This is the recommended way to create a session as it allows you to
    /// configure timeout, terminal size, environment and so on.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use expectpty::Session;
    /// use std::time::Duration;
    ///
    /// # fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let session = Session::builder()
    ///     .timeout(Duration::from_secs(60))
    ///     .dimensions(40, 120)
    ///     .spawn("ssh user@host")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Spawn a command with default settings.
    ///
    /// This is a shorthand for `Session::builder().spawn(target)`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use expectpty::Session;
    ///
    /// # fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let session = Session::spawn("echo Hello")?;
    /// # Ok(())
    /// # }
    /// ```
    #[track_caller]
    pub fn spawn(target: impl Into<SpawnTarget>) -> Result<Self, ExpectError> {
        SessionBuilder::new().spawn(target)
    }

    /// Wait for a single pattern.
    ///
    /// Plain strings are literal patterns; use [`Pattern::regex`] for regular
    /// expressions.
    ///
    /// # Errors
    ///
    /// - [`ExpectError::Timeout`] if the pattern does not appear in time
    /// - [`ExpectError::Eof`] if the child's output ends first
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use expectpty::{Pattern, Session};
    ///
    /// # fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// # let mut session = Session::spawn("echo test")?;
    /// let result = session.expect("test")?;
    /// println!("Before: {:?}", result.before);
    ///
    /// session.expect(Pattern::regex(r"\$ $")?)?;
    /// # Ok(())
    /// # }
    /// ```
    #[track_caller]
    pub fn expect(&mut self, pattern: impl Into<Pattern>) -> Result<MatchResult, ExpectError> {
        let site = Trace::capture();
        let patterns = [pattern.into()];
        self.expect_with(Searcher::regex(&patterns), self.settings.timeout)
            .map_err(|e| e.located(site))
    }

    /// Wait for any of the given patterns (earliest match wins).
    ///
    /// When two patterns match at the same offset the one listed first wins.
    /// `Pattern::Eof` and `Pattern::Timeout` turn the corresponding condition
    /// into a match instead of an error.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use expectpty::{Pattern, Session};
    ///
    /// # fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// # let mut session = Session::spawn("echo test")?;
    /// let patterns = [
    ///     Pattern::exact("success"),
    ///     Pattern::exact("error"),
    ///     Pattern::Eof,
    /// ];
    ///
    /// let result = session.expect_any(&patterns)?;
    /// match result.pattern_index {
    ///     0 => println!("Success!"),
    ///     1 => println!("Error occurred"),
    ///     2 => println!("Process ended"),
    ///     _ => unreachable!(),
    /// }
    /// # Ok(())
    /// # }
    /// ```
    #[track_caller]
    pub fn expect_any(&mut self, patterns: &[Pattern]) -> Result<MatchResult, ExpectError> {
        let site = Trace::capture();
        self.expect_with(Searcher::regex(patterns), self.settings.timeout)
            .map_err(|e| e.located(site))
    }

    /// [`expect_any`](Session::expect_any) with an explicit budget.
    ///
    /// `None` waits forever; `Some(Duration::ZERO)` makes exactly one
    /// non-blocking read attempt.
    #[track_caller]
    pub fn expect_any_timeout(
        &mut self,
        patterns: &[Pattern],
        timeout: Option<Duration>,
    ) -> Result<MatchResult, ExpectError> {
        let site = Trace::capture();
        self.expect_with(Searcher::regex(patterns), timeout)
            .map_err(|e| e.located(site))
    }

    /// Wait for any of the given literal patterns.
    ///
    /// # Errors
    ///
    /// A regex in the list is rejected with [`ExpectError::Pattern`] before
    /// anything is read.
    #[track_caller]
    pub fn expect_exact(&mut self, patterns: &[Pattern]) -> Result<MatchResult, ExpectError> {
        let site = Trace::capture();
        self.expect_with(Searcher::exact(patterns), self.settings.timeout)
            .map_err(|e| e.located(site))
    }

    /// [`expect_exact`](Session::expect_exact) with an explicit budget.
    #[track_caller]
    pub fn expect_exact_timeout(
        &mut self,
        patterns: &[Pattern],
        timeout: Option<Duration>,
    ) -> Result<MatchResult, ExpectError> {
        let site = Trace::capture();
        self.expect_with(Searcher::exact(patterns), timeout)
            .map_err(|e| e.located(site))
    }

    fn expect_with(
        &mut self,
        searcher: Result<Searcher, crate::result::PatternError>,
        timeout: Option<Duration>,
    ) -> Result<MatchResult, ExpectError> {
        let searcher = searcher?;
        self.ensure_open()?;
        self.expect_loop(&searcher, timeout)
    }

    /// The core loop: search what is buffered, then read and search the
    /// fresh data until a match, end of stream or an exhausted budget.
    fn expect_loop(&mut self, searcher: &Searcher, timeout: Option<Duration>) -> Result<MatchResult, ExpectError> {
        let deadline = Deadline::after(timeout);
        let window = self.settings.search_window_size;
        self.state = ExpectState::Waiting;

        let mut freshlen = self.buffer.len();
        let mut attempted = false;

        loop {
            if let Some(found) = searcher.search(self.buffer.as_bytes(), freshlen, window) {
                return Ok(self.record_match(found));
            }

            if attempted && deadline.expired() {
                return self.timed_out(searcher, timeout);
            }
            attempted = true;

            let fill = match self.fill(&deadline) {
                Ok(fill) => fill,
                Err(e) => {
                    self.state = ExpectState::Error;
                    return Err(e);
                }
            };
            match fill {
                Fill::Data(n) => freshlen = n,
                Fill::Eof => return self.reached_eof(searcher),
                Fill::TimedOut => return self.timed_out(searcher, timeout),
            }
        }
    }

    fn record_match(&mut self, found: SearchMatch) -> MatchResult {
        let before = self.buffer.consume(found.start);
        let matched = self.buffer.consume(found.end - found.start);
        tracing::debug!(index = found.index, start = found.start, end = found.end, "pattern matched");

        let result = MatchResult {
            pattern_index: found.index,
            matched,
            start: found.start,
            end: found.end,
            before,
            captures: found.captures,
            sentinel: None,
        };
        self.state = ExpectState::Matched;
        self.last = Some(result.clone());
        result
    }

    fn reached_eof(&mut self, searcher: &Searcher) -> Result<MatchResult, ExpectError> {
        let before = self.buffer.take_all();
        tracing::debug!(remaining = before.len(), "end of stream");

        let at = before.len();
        let index = searcher.eof_index();
        let result = MatchResult::sentinel(index.unwrap_or(0), Sentinel::Eof, before, at);
        self.last = Some(result.clone());

        match index {
            Some(_) => {
                self.state = ExpectState::EofReached;
                Ok(result)
            }
            None => {
                self.state = ExpectState::Error;
                Err(ExpectError::Eof {
                    searcher: searcher.to_string(),
                    trace: Trace::none(),
                })
            }
        }
    }

    fn timed_out(&mut self, searcher: &Searcher, timeout: Option<Duration>) -> Result<MatchResult, ExpectError> {
        let before = Bytes::copy_from_slice(self.buffer.as_bytes());
        let at = before.len();

        match searcher.timeout_index() {
            Some(index) => {
                let result = MatchResult::sentinel(index, Sentinel::Timeout, before, at);
                self.last = Some(result.clone());
                self.state = ExpectState::TimedOut;
                Ok(result)
            }
            None => {
                self.last = Some(MatchResult::sentinel(0, Sentinel::Timeout, before, at));
                self.state = ExpectState::Waiting;
                Err(ExpectError::Timeout {
                    duration: timeout.unwrap_or_default(),
                    searcher: searcher.to_string(),
                    trace: Trace::none(),
                })
            }
        }
    }

    fn ensure_open(&self) -> Result<(), ExpectError> {
        if self.master.is_none() {
            return Err(ExpectError::closed());
        }
        Ok(())
    }

    /// Current engine state.
    pub fn state(&self) -> ExpectState {
        self.state
    }

    /// Output preceding the last match (everything remaining, for EOF).
    pub fn before(&self) -> Option<&Bytes> {
        self.last.as_ref().map(|m| &m.before)
    }

    /// Bytes of the last match; empty for EOF and TIMEOUT.
    pub fn after(&self) -> Option<&Bytes> {
        self.last.as_ref().map(|m| &m.matched)
    }

    /// Pattern index of the last match.
    pub fn match_index(&self) -> Option<usize> {
        self.last.as_ref().map(|m| m.pattern_index)
    }

    /// The full result of the last match, sentinels included.
    pub fn last_match(&self) -> Option<&MatchResult> {
        self.last.as_ref()
    }

    /// Bytes read but not yet consumed by a match.
    pub fn buffer(&self) -> &[u8] {
        self.buffer.as_bytes()
    }

    /// Decode child output with the session's encoding.
    pub fn decode(&self, data: &[u8]) -> String {
        self.settings.encoding.decode(data)
    }

    /// The session's expect timeout.
    pub fn timeout(&self) -> Option<Duration> {
        self.settings.timeout
    }

    /// Change the expect timeout for later operations.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.settings.timeout = timeout;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(pid = %self.pid, error = %e, "failed to close session on drop");
        }
    }
}
