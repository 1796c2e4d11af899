//! Error types for expectpty

use std::fmt;
use std::panic::Location;
use std::time::Duration;
use thiserror::Error;

/// Where an error was raised, from the caller's point of view.
///
/// Public [`Session`](crate::Session) operations are `#[track_caller]`, so the
/// recorded location is the line in *your* code that invoked the operation.
/// Frames inside this crate are never recorded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Trace {
    call_site: Option<&'static Location<'static>>,
}

impl Trace {
    /// A trace with no recorded call site.
    pub const fn none() -> Self {
        Self { call_site: None }
    }

    /// Capture the location of the nearest non-`#[track_caller]` caller.
    #[track_caller]
    pub fn capture() -> Self {
        Self {
            call_site: Some(Location::caller()),
        }
    }

    /// The recorded call site, if any.
    pub fn call_site(&self) -> Option<&'static Location<'static>> {
        self.call_site
    }

    /// The provenance frames, outermost first.
    pub fn frames(&self) -> Vec<String> {
        self.call_site
            .iter()
            .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()))
            .collect()
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.call_site {
            Some(loc) => write!(f, "at {}:{}:{}", loc.file(), loc.line(), loc.column()),
            None => f.write_str("at <unknown>"),
        }
    }
}

/// Errors that can occur during expect operations.
///
/// The variants are precise enough to branch on without inspecting messages:
/// end-of-stream, timeouts, caller mistakes, use after close and internal
/// bookkeeping contradictions are all distinct.
///
/// # Examples
///
/// ```no_run
/// use expectpty::{ExpectError, Pattern, Session};
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let mut session = Session::builder()
///     .timeout(Duration::from_secs(5))
///     .spawn("some-command")?;
///
/// match session.expect("done") {
///     Ok(result) => println!("Matched at {}", result.start),
///     Err(ExpectError::Timeout { duration, .. }) => {
///         eprintln!("Timed out after {:?}", duration);
///     }
///     Err(ExpectError::Eof { .. }) => {
///         eprintln!("Process exited unexpectedly");
///     }
///     Err(e) => return Err(e.into()),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Error, Debug)]
pub enum ExpectError {
    /// Timeout waiting for pattern.
    ///
    /// The session stays usable. Put `Pattern::Timeout` in the pattern list to
    /// receive a match instead of this error.
    #[error("Timeout exceeded (after {duration:?})\n{searcher}")]
    Timeout {
        /// Budget that was exhausted
        duration: Duration,
        /// Rendering of the pattern list that was being searched
        searcher: String,
        /// Call site of the failed operation
        trace: Trace,
    },

    /// End of stream reached before a pattern matched.
    ///
    /// Once raised, every later expect on the same session raises it again.
    /// Put `Pattern::Eof` in the pattern list to receive a match instead.
    #[error("End Of File (EOF)\n{searcher}")]
    Eof {
        /// Rendering of the pattern list that was being searched
        searcher: String,
        /// Call site of the failed operation
        trace: Trace,
    },

    /// The caller passed arguments of the wrong shape.
    ///
    /// Raised before any process is created or any I/O is performed.
    #[error("{message}")]
    Usage {
        /// What was wrong
        message: String,
        /// Call site of the failed operation
        trace: Trace,
    },

    /// The session's descriptor has already been closed.
    #[error("I/O operation on closed session")]
    Closed {
        /// Call site of the failed operation
        trace: Trace,
    },

    /// Liveness bookkeeping contradicts what the operating system reports.
    #[error("{message}")]
    StateCorrupted {
        /// Description of the contradiction
        message: String,
        /// Call site of the failed operation
        trace: Trace,
    },

    /// Invalid pattern.
    #[error("Invalid pattern: {0}")]
    Pattern(#[from] PatternError),

    /// Process spawning error (command not found, exec failure, ...).
    #[error("Failed to spawn process: {0}")]
    Spawn(String),

    /// PTY allocation or manipulation failed.
    #[error("PTY error: {0}")]
    Pty(String),

    /// I/O error on the pty master.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExpectError {
    pub(crate) fn usage(message: impl Into<String>) -> Self {
        ExpectError::Usage {
            message: message.into(),
            trace: Trace::none(),
        }
    }

    pub(crate) fn closed() -> Self {
        ExpectError::Closed {
            trace: Trace::none(),
        }
    }

    pub(crate) fn state_corrupted(message: impl Into<String>) -> Self {
        ExpectError::StateCorrupted {
            message: message.into(),
            trace: Trace::none(),
        }
    }

    /// Attach a call site to conditions that carry a trace. Existing call
    /// sites are kept, so the outermost public operation wins.
    pub(crate) fn located(mut self, site: Trace) -> Self {
        if let Some(trace) = self.trace_mut() {
            if trace.call_site.is_none() {
                *trace = site;
            }
        }
        self
    }

    fn trace_mut(&mut self) -> Option<&mut Trace> {
        match self {
            ExpectError::Timeout { trace, .. }
            | ExpectError::Eof { trace, .. }
            | ExpectError::Usage { trace, .. }
            | ExpectError::Closed { trace }
            | ExpectError::StateCorrupted { trace, .. } => Some(trace),
            _ => None,
        }
    }

    /// Provenance of the condition, if it carries one.
    pub fn trace(&self) -> Option<&Trace> {
        match self {
            ExpectError::Timeout { trace, .. }
            | ExpectError::Eof { trace, .. }
            | ExpectError::Usage { trace, .. }
            | ExpectError::Closed { trace }
            | ExpectError::StateCorrupted { trace, .. } => Some(trace),
            _ => None,
        }
    }

    /// `true` for the end-of-stream condition.
    pub fn is_eof(&self) -> bool {
        matches!(self, ExpectError::Eof { .. })
    }

    /// `true` for the timeout condition.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExpectError::Timeout { .. })
    }

    /// `true` for caller mistakes: bad arguments or invalid patterns.
    pub fn is_usage(&self) -> bool {
        matches!(self, ExpectError::Usage { .. } | ExpectError::Pattern(_))
    }
}

/// Errors related to pattern creation.
#[derive(Error, Debug)]
pub enum PatternError {
    /// Invalid regex pattern.
    #[error("Invalid regex: {0}")]
    InvalidRegex(#[from] regex::Error),

    /// Empty literal pattern.
    #[error("Pattern cannot be empty")]
    EmptyPattern,

    /// A regex was given to a literal-only search.
    #[error("Regex pattern at index {index} is not allowed in an exact search")]
    RegexInExactSearch {
        /// Position of the offending pattern in the list
        index: usize,
    },
}
