//! Child process control: liveness, signals, reaping and shutdown

use super::Session;
use crate::result::{ExpectError, Trace};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::termios::{self, LocalFlags, SetArg};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::io::Write;
use std::os::fd::AsRawFd;
use std::time::{Duration, Instant};

/// How long `is_alive` keeps polling a child whose output has already ended.
const EOF_REAP_GRACE: Duration = Duration::from_millis(500);

/// Pause between polls during the grace period.
const EOF_REAP_POLL: Duration = Duration::from_millis(5);

impl Session {
    /// Process id of the child.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Exit code, once the child has been reaped after a normal exit.
    pub fn exit_status(&self) -> Option<i32> {
        self.exit_status
    }

    /// Terminating signal, once the child has been reaped after being killed.
    pub fn signal_status(&self) -> Option<Signal> {
        self.signal_status
    }

    /// `true` once the child has been reaped.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// `true` while the session's descriptor is open and is a terminal.
    pub fn isatty(&self) -> bool {
        self.master
            .as_ref()
            .is_some_and(|master| nix::unistd::isatty(master.as_raw_fd()).unwrap_or(false))
    }

    /// Record a status reported by `waitpid`. Returns `true` if the child is gone.
    fn record_status(&mut self, status: WaitStatus) -> Result<bool, ExpectError> {
        match status {
            WaitStatus::Exited(_, code) => {
                self.exit_status = Some(code);
                self.signal_status = None;
            }
            WaitStatus::Signaled(_, sig, _) => {
                self.exit_status = None;
                self.signal_status = Some(sig);
            }
            WaitStatus::Stopped(..) => {
                return Err(ExpectError::state_corrupted(
                    "isalive() encountered condition where child process is stopped. This is not \
                     supported. Is some other process attempting job control with our child pid?",
                ));
            }
            _ => return Ok(false),
        }
        self.terminated = true;
        tracing::debug!(pid = %self.pid, exit_status = ?self.exit_status, signal = ?self.signal_status, "child reaped");
        Ok(true)
    }

    fn poll_child(&mut self) -> Result<bool, ExpectError> {
        loop {
            match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => return Ok(false),
                Ok(status) => return self.record_status(status),
                Err(Errno::EINTR) => continue,
                Err(Errno::ECHILD) => {
                    return Err(ExpectError::state_corrupted(
                        "isalive() encountered condition where \"terminated\" is false, but there \
                         was no child process. Did someone else call waitpid() on our process?",
                    ));
                }
                Err(e) => return Err(std::io::Error::from(e).into()),
            }
        }
    }

    pub(crate) fn is_alive_inner(&mut self) -> Result<bool, ExpectError> {
        if self.terminated {
            return Ok(false);
        }
        if self.poll_child()? {
            return Ok(false);
        }

        // After end of stream the child is usually on its way out; give it a
        // moment to become reapable.
        if self.eof_reached {
            let until = Instant::now() + EOF_REAP_GRACE;
            while Instant::now() < until {
                std::thread::sleep(EOF_REAP_POLL);
                if self.poll_child()? {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Liveness check used while reading, where errors only mean "not alive".
    pub(crate) fn child_alive_quiet(&mut self) -> bool {
        self.is_alive_inner().unwrap_or(false)
    }

    /// Check whether the child is still running, without blocking.
    ///
    /// Reaps the child if it has exited, filling in
    /// [`exit_status`](Session::exit_status) or
    /// [`signal_status`](Session::signal_status).
    ///
    /// # Errors
    ///
    /// [`ExpectError::StateCorrupted`] if the child was reaped behind the
    /// session's back or has been stopped.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use expectpty::Session;
    ///
    /// # fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let mut session = Session::spawn("sleep 10")?;
    ///
    /// if session.is_alive()? {
    ///     println!("Process is still running");
    /// }
    /// # Ok(())
    /// # }
    /// ```
    #[track_caller]
    pub fn is_alive(&mut self) -> Result<bool, ExpectError> {
        let site = Trace::capture();
        self.is_alive_inner().map_err(|e| e.located(site))
    }

    fn signal_child(&self, sig: Signal) -> Result<(), ExpectError> {
        match signal::kill(self.pid, sig) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(std::io::Error::from(e).into()),
        }
    }

    /// Deliver `sig` to the child if it is still alive.
    #[track_caller]
    pub fn kill(&mut self, sig: Signal) -> Result<(), ExpectError> {
        let site = Trace::capture();
        let result = match self.is_alive_inner() {
            Ok(true) => self.signal_child(sig),
            Ok(false) => Ok(()),
            Err(e) => Err(e),
        };
        result.map_err(|e| e.located(site))
    }

    pub(crate) fn terminate_inner(&mut self, force: bool) -> Result<bool, ExpectError> {
        if !self.is_alive_inner()? {
            return Ok(true);
        }

        for sig in [Signal::SIGHUP, Signal::SIGCONT, Signal::SIGINT] {
            self.signal_child(sig)?;
            std::thread::sleep(self.settings.delay_after_terminate);
            if !self.is_alive_inner()? {
                return Ok(true);
            }
        }

        if !force {
            return Ok(false);
        }

        tracing::warn!(pid = %self.pid, "child ignored SIGHUP and SIGINT, sending SIGKILL");
        self.signal_child(Signal::SIGKILL)?;
        std::thread::sleep(self.settings.delay_after_terminate);
        self.wait_inner()?;
        Ok(true)
    }

    /// Ask the child to exit: SIGHUP, SIGCONT, then SIGINT, pausing after each.
    ///
    /// With `force`, SIGKILL follows and the child is reaped before
    /// returning. Returns whether the child is gone.
    #[track_caller]
    pub fn terminate(&mut self, force: bool) -> Result<bool, ExpectError> {
        let site = Trace::capture();
        self.terminate_inner(force).map_err(|e| e.located(site))
    }

    fn wait_inner(&mut self) -> Result<(), ExpectError> {
        while !self.terminated {
            match waitpid(self.pid, None) {
                Ok(status) => {
                    self.record_status(status)?;
                }
                Err(Errno::EINTR) => continue,
                Err(Errno::ECHILD) => {
                    return Err(ExpectError::state_corrupted(
                        "wait() found no child process. Did someone else call waitpid() on our process?",
                    ));
                }
                Err(e) => return Err(std::io::Error::from(e).into()),
            }
        }
        Ok(())
    }

    /// Block until the child exits and return its exit code.
    ///
    /// `None` means the child was killed by a signal; see
    /// [`signal_status`](Session::signal_status). A child that has already
    /// been reaped returns the recorded status immediately.
    ///
    /// A child blocked writing to a full terminal never exits on its own, so
    /// read its output (or close the session) first.
    #[track_caller]
    pub fn wait(&mut self) -> Result<Option<i32>, ExpectError> {
        let site = Trace::capture();
        self.wait_inner().map_err(|e| e.located(site))?;
        Ok(self.exit_status)
    }

    /// Close the terminal and make sure the child is gone.
    ///
    /// Flushes the transcript sinks, closes the descriptor, waits
    /// `delay_after_close` and then force-terminates a child that is still
    /// running. Calling it again does nothing.
    #[track_caller]
    pub fn close(&mut self) -> Result<(), ExpectError> {
        let site = Trace::capture();
        self.close_inner().map_err(|e| e.located(site))
    }

    fn close_inner(&mut self) -> Result<(), ExpectError> {
        let Some(master) = self.master.take() else {
            return Ok(());
        };

        // The child is reaped even if a sink fails; that error is reported last.
        let flushed = [self.log_read.as_mut(), self.log_send.as_mut()]
            .into_iter()
            .flatten()
            .try_for_each(|sink| sink.flush());

        drop(master);
        std::thread::sleep(self.settings.delay_after_close);

        if self.is_alive_inner()? && !self.terminate_inner(true)? {
            return Err(ExpectError::Pty("Could not terminate the child.".to_owned()));
        }
        tracing::debug!(pid = %self.pid, "session closed");
        Ok(flushed?)
    }

    /// Whether the terminal echoes input back.
    pub fn echo(&self) -> Result<bool, ExpectError> {
        let master = self.master.as_ref().ok_or_else(ExpectError::closed)?;
        let attrs = termios::tcgetattr(master).map_err(std::io::Error::from)?;
        Ok(attrs.local_flags.contains(LocalFlags::ECHO))
    }

    /// Turn terminal echo on or off.
    ///
    /// Only affects input sent afterwards.
    pub fn set_echo(&mut self, on: bool) -> Result<(), ExpectError> {
        let master = self.master.as_ref().ok_or_else(ExpectError::closed)?;
        let mut attrs = termios::tcgetattr(master).map_err(std::io::Error::from)?;
        attrs.local_flags.set(LocalFlags::ECHO, on);
        termios::tcsetattr(master, SetArg::TCSANOW, &attrs).map_err(std::io::Error::from)?;
        Ok(())
    }

    /// Terminal size as `(rows, cols)`.
    pub fn window_size(&self) -> Result<(u16, u16), ExpectError> {
        let master = self.master.as_ref().ok_or_else(ExpectError::closed)?;
        let mut size = libc::winsize {
            ws_row: 0,
            ws_col: 0,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        // SAFETY: TIOCGWINSZ writes a winsize through the pointer.
        if unsafe { libc::ioctl(master.as_raw_fd(), libc::TIOCGWINSZ as _, &mut size as *mut libc::winsize) } < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok((size.ws_row, size.ws_col))
    }

    /// Resize the terminal; the child receives SIGWINCH.
    pub fn set_window_size(&mut self, rows: u16, cols: u16) -> Result<(), ExpectError> {
        let master = self.master.as_ref().ok_or_else(ExpectError::closed)?;
        let size = libc::winsize {
            ws_row: rows,
            ws_col: cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        // SAFETY: TIOCSWINSZ reads a winsize through the pointer.
        if unsafe { libc::ioctl(master.as_raw_fd(), libc::TIOCSWINSZ as _, &size as *const libc::winsize) } < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(())
    }
}
