//! Pattern matching for expect operations

mod matcher;
mod search;

use matcher::Matcher;
pub use search::{SearchMatch, Searcher, SearcherKind};

use crate::result::PatternError;
use bytes::Bytes;
use regex::bytes::Regex;

/// Pattern types for matching process output.
///
/// Patterns are matched against raw bytes, so output that is not valid UTF-8
/// can still be matched exactly.
///
/// # Pattern Types
///
/// - **Exact**: Fast literal matching using Boyer-Moore-Horspool algorithm
/// - **Regex**: Byte-oriented regular expression with capture groups
/// - **Eof**: Matches when the child's output stream ends
/// - **Timeout**: Matches when the time budget runs out
///
/// # Examples
///
/// ```
/// use expectpty::Pattern;
///
/// // Exact string (fastest)
/// let p1 = Pattern::exact("password: ");
///
/// // Regular expression
/// let p2 = Pattern::regex(r"\d+").unwrap();
///
/// // Sentinels
/// let p3 = Pattern::Eof;
/// let p4 = Pattern::Timeout;
///
/// // Plain strings are literals
/// let p5: Pattern = "$ ".into();
/// ```
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Exact byte-string match (most efficient).
    ///
    /// Only the newly read data plus the pattern length is rescanned on each
    /// iteration, so long sessions stay cheap.
    Exact(Bytes),

    /// Regular expression match.
    ///
    /// The whole buffer (or the search window) is rescanned on each
    /// iteration. Captured groups are returned in the `MatchResult`.
    Regex(Regex),

    /// Match end of file.
    ///
    /// When listed, end-of-stream becomes a match at this index instead of
    /// an [`ExpectError::Eof`](crate::ExpectError::Eof).
    Eof,

    /// Match timeout condition.
    ///
    /// When listed, an exhausted budget becomes a match at this index instead
    /// of an [`ExpectError::Timeout`](crate::ExpectError::Timeout).
    Timeout,
}

impl Pattern {
    /// Create an exact pattern.
    ///
    /// # Examples
    ///
    /// ```
    /// use expectpty::Pattern;
    ///
    /// let pattern = Pattern::exact("$ ");
    /// let binary = Pattern::exact(&b"\x1b[0m"[..]);
    /// ```
    pub fn exact(s: impl AsRef<[u8]>) -> Self {
        Pattern::Exact(Bytes::copy_from_slice(s.as_ref()))
    }

    /// Create a regex pattern.
    ///
    /// # Errors
    ///
    /// Returns [`PatternError::InvalidRegex`] if the pattern does not compile.
    ///
    /// # Examples
    ///
    /// ```
    /// use expectpty::Pattern;
    ///
    /// let digits = Pattern::regex(r"\d+").unwrap();
    /// let email = Pattern::regex(r"(\w+)@(\w+)\.(\w+)").unwrap();
    /// let caseless = Pattern::regex(r"(?i)hello").unwrap();
    /// ```
    pub fn regex(pattern: &str) -> Result<Self, PatternError> {
        Ok(Pattern::Regex(Regex::new(pattern)?))
    }

    /// Check if this is a sentinel (EOF or Timeout)
    pub fn is_special(&self) -> bool {
        matches!(self, Pattern::Eof | Pattern::Timeout)
    }
}

impl From<&str> for Pattern {
    fn from(s: &str) -> Self {
        Pattern::exact(s)
    }
}

impl From<String> for Pattern {
    fn from(s: String) -> Self {
        Pattern::Exact(Bytes::from(s))
    }
}

impl From<&[u8]> for Pattern {
    fn from(s: &[u8]) -> Self {
        Pattern::exact(s)
    }
}

impl From<Bytes> for Pattern {
    fn from(s: Bytes) -> Self {
        Pattern::Exact(s)
    }
}

impl From<Regex> for Pattern {
    fn from(r: Regex) -> Self {
        Pattern::Regex(r)
    }
}
