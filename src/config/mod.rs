//! Process-wide defaults and output decoding

use crate::session::PtyStrategy;
use std::borrow::Cow;
use std::sync::OnceLock;
use std::time::Duration;

/// Default timeout for expect operations (in seconds)
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default number of bytes requested per read from the pty
const DEFAULT_MAXREAD: usize = 2000;

/// Default pause before each write, giving the child time to disable echo
const DEFAULT_DELAY_BEFORE_SEND_MS: u64 = 50;

/// Default pause between closing the descriptor and checking the child
const DEFAULT_DELAY_AFTER_CLOSE_MS: u64 = 100;

/// Default pause after each signal sent by `terminate`
const DEFAULT_DELAY_AFTER_TERMINATE_MS: u64 = 100;

/// Default PTY rows
const DEFAULT_PTY_ROWS: u16 = 24;

/// Default PTY columns
const DEFAULT_PTY_COLS: u16 = 80;

/// Environment variable overriding the default timeout, in seconds.
pub const TIMEOUT_ENV: &str = "EXPECTPTY_TIMEOUT";

/// Environment variable selecting the default pty strategy (`native` or `manual`).
pub const PTY_STRATEGY_ENV: &str = "EXPECTPTY_PTY";

static DEFAULTS: OnceLock<Defaults> = OnceLock::new();

/// How child output is decoded by the text helpers.
///
/// The engine itself always works on bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Encoding {
    /// UTF-8, replacing invalid sequences.
    #[default]
    Utf8,
    /// ISO-8859-1: every byte maps to the code point of the same value.
    Latin1,
}

impl Encoding {
    /// Decode child output.
    pub fn decode(self, data: &[u8]) -> String {
        match self {
            Encoding::Utf8 => match String::from_utf8_lossy(data) {
                Cow::Borrowed(s) => s.to_owned(),
                Cow::Owned(s) => s,
            },
            Encoding::Latin1 => data.iter().map(|&b| char::from(b)).collect(),
        }
    }
}

/// Defaults applied to every new [`SessionBuilder`](crate::SessionBuilder).
///
/// Loaded once per process and read-only afterwards; per-session values are
/// set on the builder.
#[derive(Debug, Clone)]
pub struct Defaults {
    /// Expect timeout; `None` waits forever.
    pub timeout: Option<Duration>,
    /// Decoding used by the text helpers.
    pub encoding: Encoding,
    /// Bytes requested per read.
    pub maxread: usize,
    /// Trailing window rescanned per iteration; `None` scans everything new.
    pub search_window_size: Option<usize>,
    /// Pause before each send.
    pub delay_before_send: Option<Duration>,
    /// Pause after closing the descriptor.
    pub delay_after_close: Duration,
    /// Pause after each termination signal.
    pub delay_after_terminate: Duration,
    /// Initial window size as `(rows, cols)`.
    pub dimensions: (u16, u16),
    /// How the pseudo-terminal is acquired.
    pub pty_strategy: PtyStrategy,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
            encoding: Encoding::Utf8,
            maxread: DEFAULT_MAXREAD,
            search_window_size: None,
            delay_before_send: Some(Duration::from_millis(DEFAULT_DELAY_BEFORE_SEND_MS)),
            delay_after_close: Duration::from_millis(DEFAULT_DELAY_AFTER_CLOSE_MS),
            delay_after_terminate: Duration::from_millis(DEFAULT_DELAY_AFTER_TERMINATE_MS),
            dimensions: (DEFAULT_PTY_ROWS, DEFAULT_PTY_COLS),
            pty_strategy: PtyStrategy::Native,
        }
    }
}

/// Seconds as a duration; `None` for anything negative, non-finite or too large.
fn parse_timeout(raw: &str) -> Option<Duration> {
    let secs = raw.trim().parse::<f64>().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}

impl Defaults {
    /// The built-in defaults, adjusted by `EXPECTPTY_TIMEOUT` and `EXPECTPTY_PTY`.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut defaults = Self::default();

        if let Ok(raw) = std::env::var(TIMEOUT_ENV) {
            match parse_timeout(&raw) {
                Some(timeout) => defaults.timeout = Some(timeout),
                None => tracing::warn!(value = %raw, "ignoring invalid {TIMEOUT_ENV}"),
            }
        }

        if let Ok(raw) = std::env::var(PTY_STRATEGY_ENV) {
            match raw.trim().parse::<PtyStrategy>() {
                Ok(strategy) => defaults.pty_strategy = strategy,
                Err(()) => tracing::warn!(value = %raw, "ignoring invalid {PTY_STRATEGY_ENV}"),
            }
        }

        defaults
    }

    /// The process-wide defaults, loaded from the environment on first use.
    pub fn global() -> &'static Defaults {
        DEFAULTS.get_or_init(Self::from_env)
    }

    /// Install process-wide defaults.
    ///
    /// Only succeeds before the first call to [`Defaults::global`]; otherwise
    /// the rejected value is handed back.
    pub fn install(defaults: Defaults) -> Result<(), Defaults> {
        DEFAULTS.set(defaults)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_defaults() {
        let d = Defaults::default();
        assert_eq!(d.timeout, Some(Duration::from_secs(30)));
        assert_eq!(d.maxread, 2000);
        assert_eq!(d.dimensions, (24, 80));
        assert_eq!(d.pty_strategy, PtyStrategy::Native);
        assert!(d.search_window_size.is_none());
    }

    #[test]
    fn test_parse_timeout() {
        assert_eq!(parse_timeout("2.5"), Some(Duration::from_millis(2500)));
        assert_eq!(parse_timeout(" 0 "), Some(Duration::ZERO));
        assert_eq!(parse_timeout("-1"), None);
        assert_eq!(parse_timeout("inf"), None);
        assert_eq!(parse_timeout("NaN"), None);
        assert_eq!(parse_timeout("1e30"), None);
        assert_eq!(parse_timeout("soon"), None);
    }

    #[test]
    fn test_from_env_ignores_oversized_timeout() {
        std::env::set_var(TIMEOUT_ENV, "1e30");
        let defaults = Defaults::from_env();
        std::env::remove_var(TIMEOUT_ENV);
        assert_eq!(defaults.timeout, Defaults::default().timeout);
    }

    #[test]
    fn test_global_is_stable() {
        let a = Defaults::global() as *const Defaults;
        let b = Defaults::global() as *const Defaults;
        assert_eq!(a, b);
        assert!(Defaults::install(Defaults::default()).is_err());
    }

    #[test]
    fn test_decode_utf8_lossy() {
        assert_eq!(Encoding::Utf8.decode("héllo".as_bytes()), "héllo");
        assert_eq!(Encoding::Utf8.decode(&[b'a', 0xFF]), "a\u{FFFD}");
    }

    #[test]
    fn test_decode_latin1() {
        assert_eq!(Encoding::Latin1.decode(&[b'a', 0xE9]), "a\u{e9}");
    }
}
