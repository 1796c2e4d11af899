//! Session builder for configuration

use super::spawn::{self, PtyStrategy, SpawnRequest, SpawnTarget};
use super::{LogSink, Session, Settings};
use crate::config::{Defaults, Encoding};
use crate::result::{ExpectError, Trace};
use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

/// Builder for configuring and spawning sessions.
///
/// Starts from the process-wide [`Defaults`]; every value can be overridden
/// per session.
///
/// # Defaults
///
/// - Timeout: 30 seconds
/// - Read size: 2000 bytes
/// - Delay before send: 50 ms
/// - PTY size: 24 rows x 80 columns
/// - Echo on, SIGHUP delivered normally
///
/// # Examples
///
/// ```no_run
/// use expectpty::{PtyStrategy, Session};
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let session = Session::builder()
///     .timeout(Duration::from_secs(60))
///     .dimensions(40, 120)
///     .pty_strategy(PtyStrategy::Manual)
///     .env([("LANG", "C"), ("PATH", "/usr/bin:/bin")])
///     .spawn("python3 -i")?;
/// # Ok(())
/// # }
/// ```
pub struct SessionBuilder {
    timeout: Option<Duration>,
    encoding: Encoding,
    maxread: usize,
    search_window_size: Option<usize>,
    delay_before_send: Option<Duration>,
    delay_after_close: Duration,
    delay_after_terminate: Duration,
    dimensions: (u16, u16),
    pty_strategy: PtyStrategy,
    ignore_sighup: bool,
    echo: bool,
    args: Option<Vec<String>>,
    cwd: Option<PathBuf>,
    env: Option<Vec<(String, String)>>,
    log_read: LogSink,
    log_send: LogSink,
}

impl fmt::Debug for SessionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionBuilder")
            .field("timeout", &self.timeout)
            .field("encoding", &self.encoding)
            .field("maxread", &self.maxread)
            .field("search_window_size", &self.search_window_size)
            .field("dimensions", &self.dimensions)
            .field("pty_strategy", &self.pty_strategy)
            .field("ignore_sighup", &self.ignore_sighup)
            .field("echo", &self.echo)
            .field("args", &self.args)
            .field("cwd", &self.cwd)
            .field("env", &self.env)
            .finish_non_exhaustive()
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBuilder {
    /// Create a new session builder from the process-wide defaults.
    pub fn new() -> Self {
        Self::with_defaults(Defaults::global())
    }

    /// Create a builder from explicit defaults.
    pub fn with_defaults(defaults: &Defaults) -> Self {
        Self {
            timeout: defaults.timeout,
            encoding: defaults.encoding,
            maxread: defaults.maxread,
            search_window_size: defaults.search_window_size,
            delay_before_send: defaults.delay_before_send,
            delay_after_close: defaults.delay_after_close,
            delay_after_terminate: defaults.delay_after_terminate,
            dimensions: defaults.dimensions,
            pty_strategy: defaults.pty_strategy,
            ignore_sighup: false,
            echo: true,
            args: None,
            cwd: None,
            env: None,
            log_read: None,
            log_send: None,
        }
    }

    /// Set the timeout for expect and blocking reads.
    ///
    /// If a pattern is not matched within this duration, `expect()` will return
    /// a timeout error unless `Pattern::Timeout` is in the pattern list.
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
    ///     .spawn("python3 -i")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Disable timeout (wait indefinitely).
    ///
    /// When timeout is disabled, `expect()` will wait forever unless the pattern
    /// matches or EOF is reached.
    pub fn no_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    /// Decoding used by the text helpers.
    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Leave SIGHUP ignored in the child, so it survives the terminal closing.
    pub fn ignore_sighup(mut self, ignore: bool) -> Self {
        self.ignore_sighup = ignore;
        self
    }

    /// Start with terminal echo on (the default) or off.
    pub fn echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Only search the last `size` bytes of the buffer on each iteration.
    ///
    /// Speeds up sessions with lots of output, at the price that matches
    /// longer than the window are never found.
    pub fn search_window_size(mut self, size: usize) -> Self {
        self.search_window_size = Some(size);
        self
    }

    /// How the pseudo-terminal is acquired.
    pub fn pty_strategy(mut self, strategy: PtyStrategy) -> Self {
        self.pty_strategy = strategy;
        self
    }

    /// Give the arguments explicitly instead of splitting the command line.
    ///
    /// The spawn target is then used as the program name verbatim.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use expectpty::Session;
    ///
    /// # fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let session = Session::builder()
    ///     .args(["-c", "echo 'one arg with spaces'"])
    ///     .spawn("sh")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = Some(args.into_iter().map(Into::into).collect());
        self
    }

    /// Working directory of the child.
    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Replace the child's entire environment.
    ///
    /// The program is looked up on this environment's `PATH`.
    pub fn env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env = Some(vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect());
        self
    }

    /// Set the initial terminal size.
    pub fn dimensions(mut self, rows: u16, cols: u16) -> Self {
        self.dimensions = (rows, cols);
        self
    }

    /// Bytes requested per read from the terminal.
    pub fn maxread(mut self, maxread: usize) -> Self {
        self.maxread = maxread;
        self
    }

    /// Pause before each send; `None` sends immediately.
    pub fn delay_before_send(mut self, delay: Option<Duration>) -> Self {
        self.delay_before_send = delay;
        self
    }

    /// Pause between closing the terminal and checking on the child.
    pub fn delay_after_close(mut self, delay: Duration) -> Self {
        self.delay_after_close = delay;
        self
    }

    /// Copy everything read from the child to `sink`.
    pub fn log_read(mut self, sink: impl Write + Send + 'static) -> Self {
        self.log_read = Some(Box::new(sink));
        self
    }

    /// Copy everything sent to the child to `sink`.
    pub fn log_send(mut self, sink: impl Write + Send + 'static) -> Self {
        self.log_send = Some(Box::new(sink));
        self
    }

    /// Spawn a command and return a configured session.
    ///
    /// # Errors
    ///
    /// - [`ExpectError::Usage`] for an empty command, an argument containing a
    ///   NUL byte or a descriptor target; nothing is started in that case
    /// - [`ExpectError::Spawn`] if the command cannot be found or executed
    /// - [`ExpectError::Pty`] if no terminal could be allocated
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use expectpty::Session;
    /// use std::time::Duration;
    ///
    /// # fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let session = Session::builder()
    ///     .timeout(Duration::from_secs(30))
    ///     .spawn("python3 -i")?;
    /// # Ok(())
    /// # }
    /// ```
    #[track_caller]
    pub fn spawn(self, target: impl Into<SpawnTarget>) -> Result<Session, ExpectError> {
        let site = Trace::capture();
        self.spawn_inner(target.into()).map_err(|e| e.located(site))
    }

    fn spawn_inner(self, target: SpawnTarget) -> Result<Session, ExpectError> {
        let command = match target {
            SpawnTarget::Command(command) => command,
            SpawnTarget::Fd(fd) => {
                return Err(ExpectError::usage(format!(
                    "Got a file descriptor ({fd}) as the command; this session spawns \
                     commands, use a descriptor-based session to drive an open descriptor"
                )));
            }
        };

        let (program, args) = match self.args {
            Some(args) => (command, args),
            None => {
                let mut words = spawn::split_command_line(&command)?.into_iter();
                let program = words.next().unwrap_or_default();
                (program, words.collect())
            }
        };
        if program.is_empty() {
            return Err(ExpectError::usage("The command was empty"));
        }
        if let Some(bad) = std::iter::once(&program).chain(&args).find(|a| a.contains('\0')) {
            return Err(ExpectError::usage(format!("Argument contains a NUL byte: {bad:?}")));
        }

        let request = SpawnRequest {
            program,
            args,
            cwd: self.cwd,
            env: self.env,
            dimensions: self.dimensions,
            ignore_sighup: self.ignore_sighup,
            echo: self.echo,
            strategy: self.pty_strategy,
        };
        let spawned = spawn::spawn_pty(&request)?;
        tracing::debug!(
            pid = %spawned.pid,
            program = %request.program,
            strategy = ?request.strategy,
            "spawned child"
        );

        let settings = Settings {
            timeout: self.timeout,
            encoding: self.encoding,
            maxread: self.maxread,
            search_window_size: self.search_window_size,
            delay_before_send: self.delay_before_send,
            delay_after_close: self.delay_after_close,
            delay_after_terminate: self.delay_after_terminate,
        };
        Ok(Session::from_parts(
            spawned.master,
            spawned.pid,
            settings,
            self.log_read,
            self.log_send,
        ))
    }
}
