//! expectpty: drive interactive programs through a pseudo-terminal
//!
//! expectpty launches a child process on a pseudo-terminal, feeds it input
//! and blocks until its output matches one of several expected patterns, a
//! timeout elapses, or the child exits. It is inspired by the Unix `expect`
//! utility.
//!
//! # Features
//!
//! - **Synchronous**: no runtime, no background threads; blocking calls wait
//!   on the terminal with the remaining time budget
//! - **Pattern matching**: literal byte strings and regular expressions,
//!   earliest match wins, ties go to the pattern listed first
//! - **Sentinels**: `Pattern::Eof` and `Pattern::Timeout` turn end of stream
//!   and timeouts into matches instead of errors
//! - **Process control**: liveness checks, signals, graceful-then-forceful
//!   termination, exit status
//! - **Two pty strategies**: platform `forkpty` or an explicit
//!   open/fork/`setsid`/`TIOCSCTTY` sequence
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use expectpty::{Pattern, Session};
//! use std::time::Duration;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Spawn a process
//!     let mut session = Session::builder()
//!         .timeout(Duration::from_secs(30))
//!         .spawn("python3 -i")?;
//!
//!     // Wait for the Python prompt
//!     session.expect(">>> ")?;
//!
//!     // Send a command
//!     session.sendline("print('Hello, World!')")?;
//!
//!     // Wait for output
//!     let result = session.expect(">>> ")?;
//!     println!("Output: {}", String::from_utf8_lossy(&result.before));
//!
//!     Ok(())
//! }
//! ```
//!
//! # Pattern Matching
//!
//! ```rust,no_run
//! use expectpty::{Pattern, Session};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! # let mut session = Session::spawn("echo test")?;
//! // Exact string
//! session.expect("password: ")?;
//!
//! // Regex
//! session.expect(Pattern::regex(r"\d+")?)?;
//!
//! // Multiple patterns (earliest match wins)
//! let patterns = [
//!     Pattern::exact("success"),
//!     Pattern::exact("error"),
//!     Pattern::Eof,
//! ];
//! let result = session.expect_any(&patterns)?;
//! match result.pattern_index {
//!     0 => println!("Success!"),
//!     1 => println!("Error occurred"),
//!     2 => println!("Process ended"),
//!     _ => unreachable!(),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Sending Control Characters
//!
//! ```rust,no_run
//! use expectpty::Session;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! # let mut session = Session::spawn("bash")?;
//! // Ctrl-C, using the terminal's own interrupt character
//! session.sendintr()?;
//!
//! // Ctrl-D at the start of a line ends input
//! session.sendeof()?;
//!
//! // Any other control character
//! session.sendcontrol('z')?;
//!
//! // Raw bytes
//! session.send(b"\x1b[A")?; // Up arrow
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! Every session starts from [`Defaults::global`], which honours
//! `EXPECTPTY_TIMEOUT` (seconds) and `EXPECTPTY_PTY` (`native` or `manual`).
//! Per-session values go on the builder:
//!
//! ```rust,no_run
//! use expectpty::Session;
//! use std::time::Duration;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let session = Session::builder()
//!     .timeout(Duration::from_secs(60))
//!     .dimensions(24, 80)
//!     .ignore_sighup(true)
//!     .spawn("ssh user@example.com")?;
//! # Ok(())
//! # }
//! ```
//!
//! # Logging
//!
//! The crate emits [`tracing`] events and never installs a subscriber.
//! Byte-level transcripts can be captured with
//! [`SessionBuilder::log_read`] and [`SessionBuilder::log_send`].

#![warn(missing_docs)]

mod buffer;
mod config;
mod pattern;
mod result;
mod run;
mod session;

// Public API exports
pub use config::{Defaults, Encoding, PTY_STRATEGY_ENV, TIMEOUT_ENV};
pub use pattern::{Pattern, Searcher, SearcherKind, SearchMatch};
pub use result::{ExpectError, MatchResult, PatternError, Sentinel, Trace};
pub use run::{run, run_with, RunOptions, RunOutput};
pub use session::{ExpectState, Lines, PtyStrategy, Session, SessionBuilder, SpawnTarget};

// Re-export commonly used types
pub use nix::sys::signal::Signal;
pub use nix::unistd::Pid;
