//! Pattern matcher implementations

use crate::result::PatternError;
use bytes::Bytes;
use regex::bytes::Regex;
use std::fmt;

/// Result of a pattern match
#[derive(Debug, Clone)]
pub struct Match {
    /// Start position of the match
    pub start: usize,
    /// End position of the match
    pub end: usize,
    /// Captured groups (for regex)
    pub captures: Vec<Option<Bytes>>,
}

/// Something that can locate its first occurrence in a byte buffer.
pub trait Matcher: Send + Sync + fmt::Display {
    /// Find the earliest match that starts at or after `start`.
    ///
    /// Offsets in the returned [`Match`] are absolute positions in `buffer`.
    fn find_at(&self, buffer: &[u8], start: usize) -> Option<Match>;

    /// How far before fresh data a match may begin.
    ///
    /// `Some(n)` means a match can never start more than `n` bytes before
    /// newly appended data, so older bytes need not be rescanned. `None`
    /// means the whole buffer must be searched every time.
    fn lookback(&self) -> Option<usize>;
}

/// Exact byte-string matcher using Boyer-Moore-Horspool algorithm
pub struct ExactMatcher {
    pattern: Bytes,
    bad_char_table: [usize; 256],
}

impl ExactMatcher {
    /// Create a new exact matcher
    pub fn new(pattern: impl Into<Bytes>) -> Result<Self, PatternError> {
        let pattern = pattern.into();

        if pattern.is_empty() {
            return Err(PatternError::EmptyPattern);
        }

        // Build bad character table for Boyer-Moore-Horspool
        let mut bad_char_table = [pattern.len(); 256];
        for (i, &byte) in pattern.iter().enumerate().take(pattern.len() - 1) {
            bad_char_table[byte as usize] = pattern.len() - 1 - i;
        }

        Ok(Self {
            pattern,
            bad_char_table,
        })
    }
}

impl Matcher for ExactMatcher {
    fn find_at(&self, buffer: &[u8], start: usize) -> Option<Match> {
        let len = self.pattern.len();
        let mut pos = start;

        while pos + len <= buffer.len() {
            if buffer[pos..pos + len] == self.pattern[..] {
                return Some(Match {
                    start: pos,
                    end: pos + len,
                    captures: vec![],
                });
            }

            // Shift using bad character table
            let shift_char = buffer[pos + len - 1];
            pos += self.bad_char_table[shift_char as usize];
        }

        None
    }

    fn lookback(&self) -> Option<usize> {
        Some(self.pattern.len())
    }
}

impl fmt::Display for ExactMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.pattern.escape_ascii())
    }
}

/// Regex matcher
pub struct RegexMatcher {
    regex: Regex,
}

impl RegexMatcher {
    /// Wrap an already compiled regex
    pub fn from_regex(regex: Regex) -> Self {
        Self { regex }
    }
}

impl Matcher for RegexMatcher {
    fn find_at(&self, buffer: &[u8], start: usize) -> Option<Match> {
        if start > buffer.len() {
            return None;
        }
        let captures = self.regex.captures_at(buffer, start)?;
        let full_match = captures.get(0)?;

        let capture_bytes = captures
            .iter()
            .map(|group| group.map(|m| Bytes::copy_from_slice(m.as_bytes())))
            .collect();

        Some(Match {
            start: full_match.start(),
            end: full_match.end(),
            captures: capture_bytes,
        })
    }

    fn lookback(&self) -> Option<usize> {
        None
    }
}

impl fmt::Display for RegexMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "re.compile(\"{}\")", self.regex.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regex_matcher(pattern: &str) -> RegexMatcher {
        RegexMatcher::from_regex(Regex::new(pattern).unwrap())
    }

    #[test]
    fn test_exact_matcher() {
        let matcher = ExactMatcher::new(&b"hello"[..]).unwrap();
        let result = matcher.find_at(b"world hello there", 0).unwrap();
        assert_eq!(result.start, 6);
        assert_eq!(result.end, 11);
    }

    #[test]
    fn test_exact_matcher_from_offset() {
        let matcher = ExactMatcher::new(&b"test"[..]).unwrap();
        let buffer = b"test and test again";

        assert_eq!(matcher.find_at(buffer, 0).unwrap().start, 0);
        assert_eq!(matcher.find_at(buffer, 1).unwrap().start, 9);
        assert!(matcher.find_at(buffer, 10).is_none());
        assert!(matcher.find_at(buffer, 100).is_none());
    }

    #[test]
    fn test_exact_matcher_not_found() {
        let matcher = ExactMatcher::new(&b"missing"[..]).unwrap();
        assert!(matcher.find_at(b"this text does not contain it", 0).is_none());
    }

    #[test]
    fn test_exact_matcher_at_end() {
        let matcher = ExactMatcher::new(&b"end"[..]).unwrap();
        let result = matcher.find_at(b"this is the end", 0).unwrap();
        assert_eq!(result.start, 12);
        assert_eq!(result.end, 15);
    }

    #[test]
    fn test_exact_matcher_empty_pattern() {
        assert!(matches!(
            ExactMatcher::new(Bytes::new()),
            Err(PatternError::EmptyPattern)
        ));
    }

    #[test]
    fn test_exact_matcher_binary_data() {
        let matcher = ExactMatcher::new(vec![0xFF, 0xFE, 0xFD]).unwrap();
        let result = matcher.find_at(b"prefix\xFF\xFE\xFDsuffix", 0).unwrap();
        assert_eq!(result.start, 6);
        assert_eq!(result.end, 9);
    }

    #[test]
    fn test_exact_matcher_repeated_prefix() {
        let matcher = ExactMatcher::new(&b"aab"[..]).unwrap();
        let result = matcher.find_at(b"aaaab", 0).unwrap();
        assert_eq!(result.start, 2);
    }

    #[test]
    fn test_regex_matcher_with_captures() {
        let matcher = regex_matcher(r"(\w+)@(\w+)\.(\w+)");
        let result = matcher.find_at(b"Email: user@example.com is valid", 0).unwrap();
        assert_eq!(result.captures[0].as_deref(), Some(&b"user@example.com"[..]));
        assert_eq!(result.captures[1].as_deref(), Some(&b"user"[..]));
        assert_eq!(result.captures[3].as_deref(), Some(&b"com"[..]));
    }

    #[test]
    fn test_regex_matcher_optional_group() {
        let matcher = regex_matcher(r"a(x)?b");
        let result = matcher.find_at(b"ab", 0).unwrap();
        assert_eq!(result.captures.len(), 2);
        assert!(result.captures[1].is_none());
    }

    #[test]
    fn test_regex_matcher_offsets_are_absolute() {
        let matcher = regex_matcher(r"\d+");
        let result = matcher.find_at(b"12 test 345", 3).unwrap();
        assert_eq!(result.start, 8);
        assert_eq!(result.end, 11);
    }

    #[test]
    fn test_regex_matcher_invalid_utf8_buffer() {
        let matcher = regex_matcher(r"ok");
        assert_eq!(matcher.find_at(b"\xFF\xFEok", 0).unwrap().start, 2);
    }

    #[test]
    fn test_display() {
        assert_eq!(ExactMatcher::new(&b"a\r\n"[..]).unwrap().to_string(), "\"a\\r\\n\"");
        assert_eq!(regex_matcher("al.ha").to_string(), "re.compile(\"al.ha\")");
    }
}
