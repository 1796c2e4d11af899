//! Process spawning on a pseudo-terminal

use crate::result::ExpectError;
use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use nix::sys::wait::waitpid;
use nix::unistd::{access, AccessFlags, Pid};
use std::ffi::{c_char, c_int, CString};
use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::ptr;
use std::str::FromStr;

/// Upper bound on descriptors closed in the child before exec.
const MAX_INHERITED_FD: c_int = 65536;

/// Search path used when neither the caller nor the override environment has one.
const FALLBACK_PATH: &str = "/bin:/usr/bin";

/// How the pseudo-terminal pair is acquired.
///
/// Both strategies produce sessions that behave identically.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PtyStrategy {
    /// The platform's combined allocate-and-fork primitive (`forkpty`).
    #[default]
    Native,
    /// Open the pair explicitly, fork, detach from any inherited controlling
    /// terminal, start a new session and attach the slave with `TIOCSCTTY`.
    Manual,
}

impl FromStr for PtyStrategy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "native" => Ok(PtyStrategy::Native),
            "manual" => Ok(PtyStrategy::Manual),
            _ => Err(()),
        }
    }
}

/// What to run.
///
/// Built from a command line (`&str`/`String`). A bare descriptor converts
/// too, but is rejected by `spawn`: descriptor-driven sessions are a different
/// engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpawnTarget {
    /// A command line, split shell-style unless explicit args are given.
    Command(String),
    /// An already-open descriptor.
    Fd(RawFd),
}

impl From<&str> for SpawnTarget {
    fn from(s: &str) -> Self {
        SpawnTarget::Command(s.to_owned())
    }
}

impl From<String> for SpawnTarget {
    fn from(s: String) -> Self {
        SpawnTarget::Command(s)
    }
}

impl From<&String> for SpawnTarget {
    fn from(s: &String) -> Self {
        SpawnTarget::Command(s.clone())
    }
}

impl From<RawFd> for SpawnTarget {
    fn from(fd: RawFd) -> Self {
        SpawnTarget::Fd(fd)
    }
}

/// Everything the launcher needs, already validated.
#[derive(Debug, Clone)]
pub(crate) struct SpawnRequest {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Option<Vec<(String, String)>>,
    pub dimensions: (u16, u16),
    pub ignore_sighup: bool,
    pub echo: bool,
    pub strategy: PtyStrategy,
}

/// A freshly started child and the parent's side of its terminal.
#[derive(Debug)]
pub(crate) struct Spawned {
    pub master: File,
    pub pid: Pid,
}

/// Split a command line into words.
///
/// Whitespace separates words; single quotes preserve everything literally,
/// double quotes allow `\"` and `\\`, and a backslash outside quotes escapes
/// the next character.
pub(crate) fn split_command_line(line: &str) -> Result<Vec<String>, ExpectError> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => current.push(c),
                        None => return Err(ExpectError::usage("Unterminated single quote in command line")),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(c @ ('"' | '\\' | '$' | '`')) => current.push(c),
                            Some(c) => {
                                current.push('\\');
                                current.push(c);
                            }
                            None => return Err(ExpectError::usage("Unterminated double quote in command line")),
                        },
                        Some(c) => current.push(c),
                        None => return Err(ExpectError::usage("Unterminated double quote in command line")),
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some(c) => current.push(c),
                    None => current.push('\\'),
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }

    if in_word {
        words.push(current);
    }
    Ok(words)
}

fn is_executable_file(path: &Path) -> bool {
    path.is_file() && access(path, AccessFlags::X_OK).is_ok()
}

/// Resolve `program` the way a shell would.
///
/// Names containing `/` are used as-is; anything else is looked up on the
/// override environment's `PATH`, then the caller's.
pub(crate) fn which(program: &str, env: Option<&[(String, String)]>) -> Option<PathBuf> {
    if program.contains('/') {
        let path = PathBuf::from(program);
        return is_executable_file(&path).then_some(path);
    }

    let search_path = match env {
        Some(env) => env.iter().find(|(k, _)| k == "PATH").map(|(_, v)| v.clone()),
        None => std::env::var("PATH").ok(),
    }
    .unwrap_or_else(|| FALLBACK_PATH.to_owned());

    std::env::split_paths(&search_path)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable_file(candidate))
}

fn cstring(value: impl Into<Vec<u8>>, what: &str) -> Result<CString, ExpectError> {
    CString::new(value).map_err(|_| ExpectError::usage(format!("{what} contains an interior NUL byte")))
}

/// Where in the child's pre-exec setup a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
enum ChildStage {
    Setsid = 1,
    StillAttached = 2,
    ControllingTty = 3,
    Redirect = 4,
    Reattach = 5,
    Chdir = 6,
    Exec = 7,
}

impl ChildStage {
    fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            1 => ChildStage::Setsid,
            2 => ChildStage::StillAttached,
            3 => ChildStage::ControllingTty,
            4 => ChildStage::Redirect,
            5 => ChildStage::Reattach,
            6 => ChildStage::Chdir,
            7 => ChildStage::Exec,
            _ => return None,
        })
    }

    fn describe(self) -> &'static str {
        match self {
            ChildStage::Setsid => "could not start a new session",
            ChildStage::StillAttached => "could not disconnect from the controlling tty",
            ChildStage::ControllingTty => "could not make the pty the controlling tty",
            ChildStage::Redirect => "could not redirect standard streams to the pty",
            ChildStage::Reattach => "could not open the new controlling tty",
            ChildStage::Chdir => "could not change directory",
            ChildStage::Exec => "could not execute the command",
        }
    }
}

/// Everything the child touches, allocated before `fork`.
struct ChildPlan {
    path: CString,
    _argv: Vec<CString>,
    argv_ptrs: Vec<*const c_char>,
    _envp: Vec<CString>,
    envp_ptrs: Option<Vec<*const c_char>>,
    cwd: Option<CString>,
    dev_tty: CString,
    ignore_sighup: bool,
    echo: bool,
    max_fd: c_int,
}

impl ChildPlan {
    fn new(request: &SpawnRequest) -> Result<Self, ExpectError> {
        let resolved = which(&request.program, request.env.as_deref()).ok_or_else(|| {
            ExpectError::Spawn(format!(
                "The command was not found or was not executable: {}",
                request.program
            ))
        })?;
        tracing::trace!(path = %resolved.display(), "resolved command");

        let path = cstring(resolved.into_os_string().into_encoded_bytes(), "command path")?;

        let argv = std::iter::once(&request.program)
            .chain(request.args.iter())
            .map(|arg| cstring(arg.as_str(), "argument"))
            .collect::<Result<Vec<_>, _>>()?;
        let argv_ptrs = null_terminated(&argv);

        let (envp, envp_ptrs) = match &request.env {
            Some(env) => {
                let envp = env
                    .iter()
                    .map(|(k, v)| cstring(format!("{k}={v}"), "environment entry"))
                    .collect::<Result<Vec<_>, _>>()?;
                let ptrs = null_terminated(&envp);
                (envp, Some(ptrs))
            }
            None => (Vec::new(), None),
        };

        let cwd = request
            .cwd
            .as_ref()
            .map(|dir| cstring(dir.clone().into_os_string().into_encoded_bytes(), "working directory"))
            .transpose()?;

        // SAFETY: sysconf has no preconditions.
        let open_max = unsafe { libc::sysconf(libc::_SC_OPEN_MAX) };
        let max_fd = if open_max <= 0 {
            MAX_INHERITED_FD
        } else {
            open_max.min(MAX_INHERITED_FD as libc::c_long) as c_int
        };

        Ok(Self {
            path,
            _argv: argv,
            argv_ptrs,
            _envp: envp,
            envp_ptrs,
            cwd,
            dev_tty: cstring("/dev/tty", "tty path")?,
            ignore_sighup: request.ignore_sighup,
            echo: request.echo,
            max_fd,
        })
    }
}

fn null_terminated(strings: &[CString]) -> Vec<*const c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(ptr::null()))
        .collect()
}

/// Report a setup failure through the error pipe and exit. Child side only.
unsafe fn child_fail(err_fd: c_int, stage: ChildStage) -> ! {
    let errno = io::Error::last_os_error().raw_os_error().unwrap_or(0);
    let mut report = [0u8; 8];
    report[..4].copy_from_slice(&(stage as i32).to_ne_bytes());
    report[4..].copy_from_slice(&errno.to_ne_bytes());
    libc::write(err_fd, report.as_ptr().cast(), report.len());
    libc::_exit(127);
}

/// Attach the slave as controlling terminal in a fresh session. Child side only.
unsafe fn child_attach_manual(plan: &ChildPlan, slave: c_int, err_fd: c_int) {
    // Drop any controlling terminal inherited from the parent.
    let fd = libc::open(plan.dev_tty.as_ptr(), libc::O_RDWR | libc::O_NOCTTY);
    if fd >= 0 {
        libc::ioctl(fd, libc::TIOCNOTTY as _, 0);
        libc::close(fd);
    }

    if libc::setsid() < 0 {
        child_fail(err_fd, ChildStage::Setsid);
    }

    let fd = libc::open(plan.dev_tty.as_ptr(), libc::O_RDWR | libc::O_NOCTTY);
    if fd >= 0 {
        libc::close(fd);
        child_fail(err_fd, ChildStage::StillAttached);
    }

    if libc::ioctl(slave, libc::TIOCSCTTY as _, 0) < 0 {
        child_fail(err_fd, ChildStage::ControllingTty);
    }

    for target in 0..=2 {
        if libc::dup2(slave, target) < 0 {
            child_fail(err_fd, ChildStage::Redirect);
        }
    }
    if slave > 2 {
        libc::close(slave);
    }

    let fd = libc::open(plan.dev_tty.as_ptr(), libc::O_WRONLY);
    if fd < 0 {
        child_fail(err_fd, ChildStage::Reattach);
    }
    libc::close(fd);
}

/// Finish setting up the child and exec. Child side only; never returns.
unsafe fn child_exec(plan: &ChildPlan, err_fd: c_int) -> ! {
    let disposition = if plan.ignore_sighup {
        libc::SIG_IGN
    } else {
        libc::SIG_DFL
    };
    libc::signal(libc::SIGHUP, disposition);

    if !plan.echo {
        let mut attrs: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(0, &mut attrs) == 0 {
            attrs.c_lflag &= !libc::ECHO;
            libc::tcsetattr(0, libc::TCSANOW, &attrs);
        }
    }

    if let Some(cwd) = &plan.cwd {
        if libc::chdir(cwd.as_ptr()) < 0 {
            child_fail(err_fd, ChildStage::Chdir);
        }
    }

    for fd in 3..plan.max_fd {
        if fd != err_fd {
            libc::close(fd);
        }
    }

    match &plan.envp_ptrs {
        Some(envp) => {
            libc::execve(plan.path.as_ptr(), plan.argv_ptrs.as_ptr(), envp.as_ptr());
        }
        None => {
            libc::execv(plan.path.as_ptr(), plan.argv_ptrs.as_ptr());
        }
    }
    child_fail(err_fd, ChildStage::Exec);
}

fn error_pipe() -> Result<(OwnedFd, OwnedFd), ExpectError> {
    cloexec_pipe().map_err(|e| ExpectError::Pty(format!("could not create error pipe: {e}")))
}

/// A pipe whose ends are close-on-exec from the moment they exist, so a
/// concurrent fork elsewhere in the process cannot inherit the write end.
#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
fn cloexec_pipe() -> nix::Result<(OwnedFd, OwnedFd)> {
    let (read, write) = nix::unistd::pipe2(OFlag::O_CLOEXEC)?;
    // SAFETY: both descriptors were just created and are owned by nobody else.
    Ok(unsafe { (OwnedFd::from_raw_fd(read), OwnedFd::from_raw_fd(write)) })
}

/// Without `pipe2` the flag is set right after creation.
#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
)))]
fn cloexec_pipe() -> nix::Result<(OwnedFd, OwnedFd)> {
    let (read, write) = nix::unistd::pipe()?;
    // SAFETY: both descriptors were just created and are owned by nobody else.
    let (read, write) = unsafe { (OwnedFd::from_raw_fd(read), OwnedFd::from_raw_fd(write)) };
    for fd in [&read, &write] {
        fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    }
    Ok((read, write))
}

fn set_cloexec(fd: RawFd) -> Result<(), ExpectError> {
    fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
        .map_err(|e| ExpectError::Pty(format!("could not set close-on-exec: {e}")))?;
    Ok(())
}

fn set_nonblocking(fd: RawFd) -> Result<(), ExpectError> {
    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(|e| ExpectError::Pty(format!("F_GETFL failed: {e}")))?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(|e| ExpectError::Pty(format!("F_SETFL failed: {e}")))?;
    Ok(())
}

fn winsize(dimensions: (u16, u16)) -> libc::winsize {
    libc::winsize {
        ws_row: dimensions.0,
        ws_col: dimensions.1,
        ws_xpixel: 0,
        ws_ypixel: 0,
    }
}

/// Wait for the child to exec, or collect the reason it could not.
fn await_exec(read_end: OwnedFd, pid: Pid) -> Result<(), ExpectError> {
    let mut pipe = File::from(read_end);
    let mut report = [0u8; 8];
    let mut filled = 0;

    while filled < report.len() {
        match pipe.read(&mut report[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    if filled == 0 {
        return Ok(());
    }

    // The child has already exited (or is about to); reap it.
    let _ = waitpid(pid, None);

    if filled < report.len() {
        return Err(ExpectError::Spawn("child exited during setup".to_owned()));
    }

    let mut stage = [0u8; 4];
    let mut errno = [0u8; 4];
    stage.copy_from_slice(&report[..4]);
    errno.copy_from_slice(&report[4..]);
    let reason = ChildStage::from_code(i32::from_ne_bytes(stage))
        .map(ChildStage::describe)
        .unwrap_or("child setup failed");
    Err(ExpectError::Spawn(format!(
        "{reason}: {}",
        io::Error::from_raw_os_error(i32::from_ne_bytes(errno))
    )))
}

fn spawn_native(plan: &ChildPlan, dimensions: (u16, u16), err_write: c_int) -> Result<(OwnedFd, Pid), ExpectError> {
    let mut master: c_int = -1;
    let mut size = winsize(dimensions);

    // SAFETY: the child only calls async-signal-safe functions on memory
    // prepared before the fork.
    let pid = unsafe { libc::forkpty(&mut master, ptr::null_mut(), ptr::null_mut::<libc::termios>(), &mut size) };
    if pid < 0 {
        return Err(ExpectError::Pty(format!("forkpty failed: {}", io::Error::last_os_error())));
    }
    if pid == 0 {
        // SAFETY: we are the freshly forked child.
        unsafe { child_exec(plan, err_write) }
    }

    // SAFETY: forkpty handed us a new descriptor that nothing else owns.
    let master = unsafe { OwnedFd::from_raw_fd(master) };
    // forkpty cannot create the master close-on-exec; flag it before waiting on the child.
    set_cloexec(master.as_raw_fd())?;
    Ok((master, Pid::from_raw(pid)))
}

fn open_pair() -> Result<(OwnedFd, File), ExpectError> {
    use nix::pty::{grantpt, posix_openpt, unlockpt};

    let pty_err = |what: &str, e: nix::Error| ExpectError::Pty(format!("{what} failed: {e}"));

    #[cfg(any(target_os = "linux", target_os = "android"))]
    let flags = OFlag::O_RDWR | OFlag::O_NOCTTY | OFlag::O_CLOEXEC;
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    let flags = OFlag::O_RDWR | OFlag::O_NOCTTY;

    let master = posix_openpt(flags).map_err(|e| pty_err("posix_openpt", e))?;
    grantpt(&master).map_err(|e| pty_err("grantpt", e))?;
    unlockpt(&master).map_err(|e| pty_err("unlockpt", e))?;

    #[cfg(any(target_os = "linux", target_os = "android"))]
    let slave_name = nix::pty::ptsname_r(&master).map_err(|e| pty_err("ptsname", e))?;
    // SAFETY: no other thread in this crate calls ptsname concurrently.
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    let slave_name = unsafe { nix::pty::ptsname(&master) }.map_err(|e| pty_err("ptsname", e))?;

    let slave = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NOCTTY)
        .open(&slave_name)
        .map_err(|e| ExpectError::Pty(format!("could not open {slave_name}: {e}")))?;

    // SAFETY: into_raw_fd transfers sole ownership of the master.
    let master = unsafe { OwnedFd::from_raw_fd(master.into_raw_fd()) };
    set_cloexec(master.as_raw_fd())?;
    Ok((master, slave))
}

fn spawn_manual(plan: &ChildPlan, dimensions: (u16, u16), err_write: c_int) -> Result<(OwnedFd, Pid), ExpectError> {
    let (master, slave) = open_pair()?;

    let size = winsize(dimensions);
    // SAFETY: TIOCSWINSZ reads a winsize from the pointer.
    if unsafe { libc::ioctl(slave.as_raw_fd(), libc::TIOCSWINSZ as _, &size as *const libc::winsize) } < 0 {
        return Err(ExpectError::Pty(format!(
            "could not set window size: {}",
            io::Error::last_os_error()
        )));
    }

    let master_fd = master.as_raw_fd();
    let slave_fd = slave.as_raw_fd();

    // SAFETY: the child only calls async-signal-safe functions on memory
    // prepared before the fork.
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(ExpectError::Pty(format!("fork failed: {}", io::Error::last_os_error())));
    }
    if pid == 0 {
        // SAFETY: we are the freshly forked child.
        unsafe {
            libc::close(master_fd);
            child_attach_manual(plan, slave_fd, err_write);
            child_exec(plan, err_write)
        }
    }

    drop(slave);
    Ok((master, Pid::from_raw(pid)))
}

/// Start `request` on a new pseudo-terminal.
pub(crate) fn spawn_pty(request: &SpawnRequest) -> Result<Spawned, ExpectError> {
    let plan = ChildPlan::new(request)?;
    let (err_read, err_write) = error_pipe()?;

    let (master, pid) = match request.strategy {
        PtyStrategy::Native => spawn_native(&plan, request.dimensions, err_write.as_raw_fd())?,
        PtyStrategy::Manual => spawn_manual(&plan, request.dimensions, err_write.as_raw_fd())?,
    };

    drop(err_write);
    await_exec(err_read, pid)?;

    set_nonblocking(master.as_raw_fd())?;

    Ok(Spawned {
        master: File::from(master),
        pid,
    })
}
