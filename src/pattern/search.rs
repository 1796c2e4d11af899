//! Multi-pattern search over the accumulation buffer

use super::matcher::{ExactMatcher, RegexMatcher};
use super::{Matcher, Pattern};
use crate::result::PatternError;
use bytes::Bytes;
use std::fmt;

/// Which entries a [`Searcher`] accepts and how it is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearcherKind {
    /// Literal entries only.
    String,
    /// Literal and regex entries.
    Regex,
}

enum Entry {
    Matcher(Box<dyn Matcher>),
    Eof,
    Timeout,
}

/// The winning entry of one search.
#[derive(Debug, Clone)]
pub struct SearchMatch {
    /// Index of the entry in the pattern list
    pub index: usize,
    /// Start offset in the searched buffer
    pub start: usize,
    /// End offset in the searched buffer
    pub end: usize,
    /// Captured groups (regex entries only)
    pub captures: Vec<Option<Bytes>>,
}

/// A compiled, ordered pattern list.
///
/// The list order is the tie-break priority: when two entries match at the
/// same offset the one listed first wins.
///
/// # Examples
///
/// ```
/// use expectpty::{Pattern, Searcher};
///
/// let searcher = Searcher::exact(&["alpha".into(), "beta".into(), Pattern::Eof]).unwrap();
/// assert_eq!(
///     searcher.to_string(),
///     "StringSearcher:\n    0: \"alpha\"\n    1: \"beta\"\n    2: EOF"
/// );
///
/// let found = searcher.search(b"xx beta alpha", 13, None).unwrap();
/// assert_eq!(found.index, 1);
/// ```
pub struct Searcher {
    kind: SearcherKind,
    entries: Vec<Entry>,
    eof_index: Option<usize>,
    timeout_index: Option<usize>,
}

impl Searcher {
    /// Build a literal-only searcher.
    ///
    /// # Errors
    ///
    /// [`PatternError::RegexInExactSearch`] if any entry is a regex, and
    /// [`PatternError::EmptyPattern`] for an empty literal.
    pub fn exact(patterns: &[Pattern]) -> Result<Self, PatternError> {
        if let Some(index) = patterns.iter().position(|p| matches!(p, Pattern::Regex(_))) {
            return Err(PatternError::RegexInExactSearch { index });
        }
        Self::build(SearcherKind::String, patterns)
    }

    /// Build a searcher that accepts both literal and regex entries.
    pub fn regex(patterns: &[Pattern]) -> Result<Self, PatternError> {
        Self::build(SearcherKind::Regex, patterns)
    }

    fn build(kind: SearcherKind, patterns: &[Pattern]) -> Result<Self, PatternError> {
        let mut entries = Vec::with_capacity(patterns.len());
        let mut eof_index = None;
        let mut timeout_index = None;

        for (index, pattern) in patterns.iter().enumerate() {
            let entry = match pattern {
                Pattern::Eof => {
                    eof_index.get_or_insert(index);
                    Entry::Eof
                }
                Pattern::Timeout => {
                    timeout_index.get_or_insert(index);
                    Entry::Timeout
                }
                Pattern::Exact(literal) => Entry::Matcher(Box::new(ExactMatcher::new(literal.clone())?)),
                Pattern::Regex(regex) => Entry::Matcher(Box::new(RegexMatcher::from_regex(regex.clone()))),
            };
            entries.push(entry);
        }

        Ok(Self {
            kind,
            entries,
            eof_index,
            timeout_index,
        })
    }

    /// The searcher's kind.
    pub fn kind(&self) -> SearcherKind {
        self.kind
    }

    /// Index of the first `Pattern::Eof` entry.
    pub fn eof_index(&self) -> Option<usize> {
        self.eof_index
    }

    /// Index of the first `Pattern::Timeout` entry.
    pub fn timeout_index(&self) -> Option<usize> {
        self.timeout_index
    }

    /// Find the earliest match in `buffer`.
    ///
    /// `freshlen` is how many trailing bytes arrived since the previous
    /// search. Without a `window`, literal entries only rescan those bytes
    /// plus their own length; regex entries rescan everything. With a
    /// `window`, every entry scans just the last `window` bytes, so matches
    /// longer than the window are never found.
    pub fn search(&self, buffer: &[u8], freshlen: usize, window: Option<usize>) -> Option<SearchMatch> {
        let mut best: Option<SearchMatch> = None;

        for (index, entry) in self.entries.iter().enumerate() {
            let Entry::Matcher(matcher) = entry else {
                continue;
            };

            let from = match (window, matcher.lookback()) {
                (Some(window), _) => buffer.len().saturating_sub(window),
                (None, Some(lookback)) => buffer.len().saturating_sub(freshlen.saturating_add(lookback)),
                (None, None) => 0,
            };

            let Some(found) = matcher.find_at(buffer, from) else {
                continue;
            };

            // Strict comparison keeps the lower index on ties.
            if best.as_ref().is_none_or(|b| found.start < b.start) {
                best = Some(SearchMatch {
                    index,
                    start: found.start,
                    end: found.end,
                    captures: found.captures,
                });
            }
        }

        best
    }
}

impl fmt::Debug for Searcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Searcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            SearcherKind::String => f.write_str("StringSearcher:")?,
            SearcherKind::Regex => f.write_str("RegexSearcher:")?,
        }
        for (index, entry) in self.entries.iter().enumerate() {
            write!(f, "\n    {index}: ")?;
            match entry {
                Entry::Matcher(matcher) => write!(f, "{matcher}")?,
                Entry::Eof => f.write_str("EOF")?,
                Entry::Timeout => f.write_str("TIMEOUT")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn greek() -> Vec<Pattern> {
        vec!["alpha".into(), "beta".into(), "gamma".into(), "delta".into()]
    }

    #[test]
    fn test_string_searcher_rendering() {
        let mut patterns = greek();
        patterns.push(Pattern::Eof);
        patterns.push(Pattern::Timeout);
        let searcher = Searcher::exact(&patterns).unwrap();

        assert_eq!(
            searcher.to_string(),
            "StringSearcher:\n    0: \"alpha\"\n    1: \"beta\"\n    2: \"gamma\"\n    3: \"delta\"\n    4: EOF\n    5: TIMEOUT"
        );
    }

    #[test]
    fn test_regex_searcher_rendering() {
        let patterns = vec![
            Pattern::Timeout,
            Pattern::regex("alpha").unwrap(),
            Pattern::regex("beta").unwrap(),
            Pattern::Eof,
        ];
        let searcher = Searcher::regex(&patterns).unwrap();

        assert_eq!(
            searcher.to_string(),
            "RegexSearcher:\n    0: TIMEOUT\n    1: re.compile(\"alpha\")\n    2: re.compile(\"beta\")\n    3: EOF"
        );
        assert_eq!(searcher.eof_index(), Some(3));
        assert_eq!(searcher.timeout_index(), Some(0));
    }

    #[test]
    fn test_exact_rejects_regex() {
        let patterns = vec!["a".into(), Pattern::regex("b+").unwrap()];
        assert!(matches!(
            Searcher::exact(&patterns),
            Err(PatternError::RegexInExactSearch { index: 1 })
        ));
    }

    #[test]
    fn test_earliest_start_wins() {
        let searcher = Searcher::regex(&greek()).unwrap();
        let buffer = b"... delta ... alpha";
        let found = searcher.search(buffer, buffer.len(), None).unwrap();
        assert_eq!(found.index, 3);
        assert_eq!(found.start, 4);
    }

    #[test]
    fn test_tie_goes_to_lowest_index() {
        let patterns = vec!["abc".into(), "ab".into(), Pattern::regex("a.").unwrap()];
        let searcher = Searcher::regex(&patterns).unwrap();
        let found = searcher.search(b"xxabc", 5, None).unwrap();
        assert_eq!(found.index, 0);
        assert_eq!(found.end, 5);
    }

    #[test]
    fn test_literal_only_scans_fresh_tail() {
        let searcher = Searcher::exact(&[Pattern::exact("old")]).unwrap();
        let buffer = b"old stuff, new";
        // Only " new" is fresh; "old" lies well before the lookback.
        assert!(searcher.search(buffer, 4, None).is_none());
        assert!(searcher.search(buffer, buffer.len(), None).is_some());
    }

    #[test]
    fn test_literal_spanning_reads() {
        let searcher = Searcher::exact(&[Pattern::exact("prompt>")]).unwrap();
        let buffer = b"some output prompt>";
        // The pattern started in the previous chunk, only "pt>" is fresh.
        let found = searcher.search(buffer, 3, None).unwrap();
        assert_eq!(found.start, 12);
    }

    #[test]
    fn test_regex_scans_whole_buffer() {
        let searcher = Searcher::regex(&[Pattern::regex("old").unwrap()]).unwrap();
        assert!(searcher.search(b"old stuff, new", 1, None).is_some());
    }

    #[test]
    fn test_window_truncates() {
        let searcher = Searcher::regex(&[Pattern::regex("needle").unwrap(), "needle".into()]).unwrap();
        let buffer = b"needle then a long tail";
        assert!(searcher.search(buffer, buffer.len(), Some(10)).is_none());
        let found = searcher.search(buffer, buffer.len(), Some(buffer.len())).unwrap();
        assert_eq!(found.index, 0);
    }

    #[test]
    fn test_sentinels_never_match_data() {
        let searcher = Searcher::regex(&[Pattern::Eof, Pattern::Timeout]).unwrap();
        assert!(searcher.search(b"EOF TIMEOUT", 11, None).is_none());
    }

    fn naive_find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack.windows(needle.len()).position(|w| w == needle)
    }

    proptest! {
        #[test]
        fn prop_full_scan_finds_earliest(
            buffer in proptest::collection::vec(prop_oneof![Just(b'a'), Just(b'b'), Just(b'c')], 0..64),
            needles in proptest::collection::vec(proptest::collection::vec(prop_oneof![Just(b'a'), Just(b'b')], 1..4), 1..5),
        ) {
            let patterns: Vec<Pattern> = needles.iter().map(|n| Pattern::exact(n)).collect();
            let searcher = Searcher::exact(&patterns).unwrap();

            let expected = needles
                .iter()
                .enumerate()
                .filter_map(|(i, n)| naive_find(&buffer, n).map(|pos| (pos, i)))
                .min();

            let found = searcher.search(&buffer, buffer.len(), None).map(|m| (m.start, m.index));
            prop_assert_eq!(found, expected);
        }

        #[test]
        fn prop_incremental_matches_full_scan(
            chunks in proptest::collection::vec(proptest::collection::vec(prop_oneof![Just(b'x'), Just(b'y')], 1..8), 1..10),
        ) {
            let searcher = Searcher::exact(&[Pattern::exact("xyx")]).unwrap();
            let mut buffer = Vec::new();
            let mut incremental = None;
            for chunk in &chunks {
                buffer.extend_from_slice(chunk);
                if let Some(m) = searcher.search(&buffer, chunk.len(), None) {
                    incremental = Some(m.start);
                    break;
                }
            }
            prop_assert_eq!(incremental, naive_find(&buffer, b"xyx"));
        }
    }
}
