//! Run a command to completion and collect its output

use crate::pattern::Pattern;
use crate::result::{ExpectError, Trace};
use crate::session::{Deadline, SessionBuilder};
use bytes::{Bytes, BytesMut};
use nix::sys::signal::Signal;
use std::path::PathBuf;
use std::time::Duration;

/// Options for [`run_with`].
///
/// # Examples
///
/// ```no_run
/// use expectpty::{run_with, Pattern, RunOptions};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let options = RunOptions {
///     events: vec![(Pattern::exact("password: "), b"secret\n".to_vec())],
///     ..RunOptions::default()
/// };
/// let output = run_with("scp file host:", options)?;
/// println!("exit: {:?}", output.exit_status);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Working directory of the child.
    pub cwd: Option<PathBuf>,
    /// Complete environment of the child; inherited when `None`.
    pub env: Option<Vec<(String, String)>>,
    /// Budget for the whole run, answered prompts included; the
    /// process-wide default when `None`.
    pub timeout: Option<Duration>,
    /// Responses to send whenever a pattern shows up.
    pub events: Vec<(Pattern, Vec<u8>)>,
}

/// What a finished [`run_with`] produced.
#[derive(Debug, Clone)]
pub struct RunOutput {
    /// Everything the child wrote to its terminal.
    pub output: Bytes,
    /// Exit code after a normal exit.
    pub exit_status: Option<i32>,
    /// Terminating signal if the child was killed.
    pub signal_status: Option<Signal>,
}

/// Run `command` and return its output.
///
/// # Examples
///
/// ```no_run
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let listing = expectpty::run("ls -l")?;
/// # Ok(())
/// # }
/// ```
#[track_caller]
pub fn run(command: &str) -> Result<Bytes, ExpectError> {
    run_with(command, RunOptions::default()).map(|out| out.output)
}

/// Run `command`, answering prompts listed in `options.events`, until its
/// output ends or the timeout runs out.
///
/// The caller's own working directory and environment are left alone.
///
/// # Errors
///
/// [`ExpectError::Timeout`] if the child is still producing output when the
/// budget runs out; spawn errors as for [`SessionBuilder::spawn`].
#[track_caller]
pub fn run_with(command: &str, options: RunOptions) -> Result<RunOutput, ExpectError> {
    let site = Trace::capture();
    run_inner(command, options).map_err(|e| e.located(site))
}

fn run_inner(command: &str, options: RunOptions) -> Result<RunOutput, ExpectError> {
    let mut builder = SessionBuilder::new();
    if let Some(timeout) = options.timeout {
        builder = builder.timeout(timeout);
    }
    if let Some(cwd) = options.cwd {
        builder = builder.cwd(cwd);
    }
    if let Some(env) = options.env {
        builder = builder.env(env);
    }
    let mut session = builder.spawn(command)?;

    let (patterns, responses): (Vec<Pattern>, Vec<Vec<u8>>) = options.events.into_iter().unzip();
    let eof_index = patterns.len();
    let timeout_index = eof_index + 1;
    let mut patterns = patterns;
    patterns.push(Pattern::Eof);
    patterns.push(Pattern::Timeout);

    let budget = session.timeout();
    let deadline = Deadline::after(budget);
    let mut output = BytesMut::new();
    loop {
        let found = session.expect_any_timeout(&patterns, deadline.remaining())?;
        output.extend_from_slice(&found.before);

        if found.pattern_index == eof_index {
            break;
        }
        if found.pattern_index == timeout_index {
            return Err(ExpectError::Timeout {
                duration: budget.unwrap_or_default(),
                searcher: format!("run({command:?})"),
                trace: Trace::none(),
            });
        }

        output.extend_from_slice(&found.matched);
        let response = &responses[found.pattern_index];
        if !response.is_empty() {
            session.send(response)?;
        }
    }

    session.close()?;
    Ok(RunOutput {
        output: output.freeze(),
        exit_status: session.exit_status(),
        signal_status: session.signal_status(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_collects_output() {
        let output = run("echo hello").unwrap();
        assert_eq!(&output[..], b"hello\r\n");
    }

    #[test]
    fn test_run_reports_exit_status() {
        let output = run_with("sh -c 'echo out; exit 4'", RunOptions::default()).unwrap();
        assert_eq!(&output.output[..], b"out\r\n");
        assert_eq!(output.exit_status, Some(4));
        assert_eq!(output.signal_status, None);
    }

    #[test]
    fn test_run_answers_events() {
        let options = RunOptions {
            events: vec![(Pattern::exact("name? "), b"world\n".to_vec())],
            ..RunOptions::default()
        };
        let output = run_with("sh -c 'printf \"name? \"; read n; echo hi $n'", options).unwrap();
        let text = String::from_utf8_lossy(&output.output);
        assert!(text.starts_with("name? "));
        assert!(text.contains("hi world"));
    }

    #[test]
    fn test_run_timeout() {
        let options = RunOptions {
            timeout: Some(Duration::from_millis(200)),
            ..RunOptions::default()
        };
        let err = run_with("sleep 5", options).unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_run_budget_spans_answered_prompts() {
        let options = RunOptions {
            timeout: Some(Duration::from_secs(1)),
            events: vec![(Pattern::exact("ask"), Vec::new())],
            ..RunOptions::default()
        };
        let start = std::time::Instant::now();
        let err = run_with("sh -c 'while :; do echo ask; sleep 0.2; done'", options).unwrap_err();
        assert!(err.is_timeout());
        assert!(start.elapsed() < Duration::from_secs(4), "took {:?}", start.elapsed());
    }
}
