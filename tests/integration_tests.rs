//! Integration tests for expectpty

use bytes::Bytes;
use expectpty::{
    run_with, ExpectError, ExpectState, Pattern, PtyStrategy, RunOptions, Session, Signal,
};
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const STRATEGIES: [PtyStrategy; 2] = [PtyStrategy::Native, PtyStrategy::Manual];

fn spawn_with(strategy: PtyStrategy, command: &str) -> Session {
    Session::builder()
        .timeout(Duration::from_secs(5))
        .pty_strategy(strategy)
        .spawn(command)
        .expect("Failed to spawn")
}

/// A transcript sink the test can inspect afterwards.
#[derive(Clone, Default)]
struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl SharedSink {
    fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_basic_command_execution() {
    for strategy in STRATEGIES {
        let mut session = spawn_with(strategy, "echo Hello World");
        let result = session.expect("Hello").expect("Failed to find 'Hello'");
        assert_eq!(&result.matched[..], b"Hello");
    }
}

#[test]
fn test_isatty() {
    for strategy in STRATEGIES {
        let mut session = spawn_with(strategy, "cat");
        assert!(session.isatty());
        session.close().expect("close failed");
        assert!(!session.isatty());
    }
}

#[test]
fn test_child_sees_a_terminal() {
    for strategy in STRATEGIES {
        let mut session = spawn_with(strategy, "sh -c 'test -t 0 && test -t 1 && echo IS-A-TTY; tty'");
        session.expect("IS-A-TTY").expect("child stdio is not a terminal");
        session.expect("/dev/").expect("child has no controlling tty name");
    }
}

#[test]
fn test_regex_with_captures() {
    let mut session = spawn_with(PtyStrategy::Native, "echo Email: user@example.com");
    let result = session
        .expect(Pattern::regex(r"(\w+)@(\w+)\.(\w+)").expect("Invalid regex"))
        .expect("Pattern not found");

    assert_eq!(&result.matched[..], b"user@example.com");
    assert_eq!(result.capture(1).as_deref(), Some(&b"user"[..]));
    assert_eq!(result.capture(2).as_deref(), Some(&b"example"[..]));
    assert_eq!(result.capture(3).as_deref(), Some(&b"com"[..]));
    assert_eq!(&result.before[..], b"Email: ");
}

#[test]
fn test_multiple_patterns() {
    let mut session = spawn_with(PtyStrategy::Native, "echo SUCCESS message");
    let patterns = [
        Pattern::exact("FAILURE"),
        Pattern::exact("SUCCESS"),
        Pattern::exact("ERROR"),
    ];
    let result = session.expect_any(&patterns).expect("No pattern matched");
    assert_eq!(result.pattern_index, 1);
}

#[test]
fn test_earliest_match_wins_over_list_order() {
    let mut session = spawn_with(PtyStrategy::Native, "echo first second");
    let patterns = [Pattern::exact("second"), Pattern::exact("first")];
    let result = session.expect_any(&patterns).expect("No pattern matched");
    assert_eq!(result.pattern_index, 1);
    assert_eq!(session.match_index(), Some(1));
}

#[test]
fn test_read_exact_sizes() {
    for strategy in STRATEGIES {
        let mut session = spawn_with(strategy, "cat");
        session.sendline("abc").expect("send failed");
        session.sendeof().expect("sendeof failed");

        // Echo, then cat's copy.
        assert_eq!(&session.read(0).unwrap()[..], b"");
        assert_eq!(&session.read(1).unwrap()[..], b"a");
        assert_eq!(&session.read(1).unwrap()[..], b"b");
        assert_eq!(&session.read(1).unwrap()[..], b"c");
        assert_eq!(&session.read(2).unwrap()[..], b"\r\n");
        assert_eq!(&session.read(5).unwrap()[..], b"abc\r\n");
    }
}

#[test]
fn test_read_one_byte_at_a_time_matches_bulk_read() {
    let mut bulk = spawn_with(PtyStrategy::Native, "echo 0123456789");
    let all = bulk.read(12).expect("read failed");

    let mut single = spawn_with(PtyStrategy::Native, "echo 0123456789");
    let mut joined = Vec::new();
    for _ in 0..12 {
        joined.extend_from_slice(&single.read(1).expect("read failed"));
    }
    assert_eq!(&all[..], &joined[..]);
    assert_eq!(&joined[..], b"0123456789\r\n");
}

#[test]
fn test_read_at_eof_returns_remainder() {
    let mut session = spawn_with(PtyStrategy::Native, "echo hi");
    assert_eq!(&session.read(100).unwrap()[..], b"hi\r\n");
    assert_eq!(&session.read(100).unwrap()[..], b"");
}

#[test]
fn test_read_nonblocking() {
    let mut session = spawn_with(PtyStrategy::Native, "cat");
    let err = session.read_nonblocking(10, Some(Duration::from_millis(100))).unwrap_err();
    assert!(err.is_timeout());

    session.sendline("hi").unwrap();
    let first = session.read_nonblocking(1, Some(Duration::from_secs(5))).unwrap();
    assert_eq!(&first[..], b"h");
    // Buffered bytes come back without another read.
    assert_eq!(&session.read_nonblocking(0, None).unwrap()[..], b"");

    let mut finished = spawn_with(PtyStrategy::Native, "echo x");
    assert_eq!(&finished.read(3).unwrap()[..], b"x\r\n");
    let err = finished.read_nonblocking(10, Some(Duration::from_secs(5))).unwrap_err();
    assert!(err.is_eof());
}

#[test]
fn test_readline_with_echo() {
    for strategy in STRATEGIES {
        let mut session = spawn_with(strategy, "cat");
        session.sendline("alpha").unwrap();
        session.sendline("beta").unwrap();

        // Echoed input and cat's output interleave line by line.
        let mut lines = Vec::new();
        for _ in 0..4 {
            lines.push(session.readline().expect("readline failed"));
        }
        assert_eq!(lines.iter().filter(|l| &l[..] == b"alpha\r\n").count(), 2);
        assert_eq!(lines.iter().filter(|l| &l[..] == b"beta\r\n").count(), 2);
        assert_eq!(&lines[0][..], b"alpha\r\n");
    }
}

#[test]
fn test_readline_without_echo() {
    let mut session = Session::builder()
        .timeout(Duration::from_secs(5))
        .echo(false)
        .spawn("cat")
        .expect("Failed to spawn");
    assert!(!session.echo().unwrap());

    session.sendline("alpha").unwrap();
    session.sendline("beta").unwrap();
    assert_eq!(&session.readline().unwrap()[..], b"alpha\r\n");
    assert_eq!(&session.readline().unwrap()[..], b"beta\r\n");
}

#[test]
fn test_readline_limited() {
    let mut session = spawn_with(PtyStrategy::Native, "echo abcdef");
    assert_eq!(&session.readline_limited(0).unwrap()[..], b"");
    assert_eq!(&session.readline_limited(3).unwrap()[..], b"abc");
    assert_eq!(&session.readline_limited(100).unwrap()[..], b"def\r\n");
    assert_eq!(&session.readline().unwrap()[..], b"");
}

#[test]
fn test_iteration_matches_readlines() {
    let script = "sh -c 'echo abc; echo 123; echo xyz'";

    let mut iterated = spawn_with(PtyStrategy::Native, script);
    let mut via_iter = Vec::new();
    for line in &mut iterated {
        via_iter.extend_from_slice(&line.expect("line failed"));
    }

    let mut collected = spawn_with(PtyStrategy::Native, script);
    let lines = collected.readlines().expect("readlines failed");
    assert_eq!(lines.len(), 3);
    assert_eq!(via_iter, lines.concat());
    assert_eq!(&via_iter[..], b"abc\r\n123\r\nxyz\r\n");

    // A second pass reads nothing.
    assert!(iterated.lines().next().is_none());
}

#[test]
fn test_write_and_writelines() {
    let mut session = Session::builder()
        .timeout(Duration::from_secs(5))
        .echo(false)
        .spawn("cat")
        .expect("Failed to spawn");

    session.write("a").unwrap();
    session.write(b"b\n").unwrap();
    session.writelines(["abc", "123", "\n"]).unwrap();
    session.sendeof().unwrap();

    let lines = session.readlines().unwrap();
    assert_eq!(lines, vec![Bytes::from_static(b"ab\r\n"), Bytes::from_static(b"abc123\r\n")]);
}

#[test]
fn test_send_returns_byte_count() {
    let mut session = spawn_with(PtyStrategy::Native, "cat");
    assert_eq!(session.send("hello").unwrap(), 5);
    assert_eq!(session.sendline("hello").unwrap(), 6);
    assert_eq!(session.sendcontrol('d').unwrap(), 1);
}

#[test]
fn test_sendeof_ends_cat() {
    for strategy in STRATEGIES {
        let mut session = spawn_with(strategy, "cat");
        assert!(session.is_alive().unwrap());
        session.sendeof().unwrap();
        session.expect_any(&[Pattern::Eof]).expect("no EOF");
        assert!(!session.is_alive().unwrap());
        assert_eq!(session.exit_status(), Some(0));
        assert_eq!(session.signal_status(), None);
    }
}

#[test]
fn test_sendintr_interrupts() {
    let mut session = spawn_with(PtyStrategy::Native, "cat");
    session.sendintr().unwrap();
    session.expect_any(&[Pattern::Eof]).expect("no EOF");
    assert!(!session.is_alive().unwrap());
    assert_eq!(session.signal_status(), Some(Signal::SIGINT));
}

#[test]
fn test_eof_is_sticky() {
    let mut session = spawn_with(PtyStrategy::Native, "echo bye");
    let result = session.expect_any(&[Pattern::exact("never"), Pattern::Eof]).unwrap();
    assert!(result.is_eof());
    assert_eq!(result.pattern_index, 1);
    assert_eq!(&result.before[..], b"bye\r\n");

    for _ in 0..3 {
        let err = session.expect("anything").unwrap_err();
        assert!(matches!(err, ExpectError::Eof { .. }));
        assert!(err.to_string().starts_with("End Of File (EOF)"));
        assert_eq!(session.state(), ExpectState::Error);
    }
}

#[test]
fn test_timeout_error() {
    let mut session = Session::builder()
        .timeout(Duration::from_millis(500))
        .spawn("sleep 10")
        .expect("Failed to spawn");

    let start = Instant::now();
    let err = session.expect("never appears").unwrap_err();
    let elapsed = start.elapsed();

    assert!(matches!(err, ExpectError::Timeout { .. }));
    assert!(elapsed >= Duration::from_millis(500), "fired early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "fired late: {elapsed:?}");
    assert_eq!(session.state(), ExpectState::Waiting);
}

#[test]
fn test_maximal_timeout_waits() {
    let mut session = spawn_with(PtyStrategy::Native, "echo hi");
    let result = session
        .expect_any_timeout(&[Pattern::exact("hi")], Some(Duration::MAX))
        .expect("maximal budget should wait, not fail");
    assert_eq!(&result.matched[..], b"hi");
}

#[test]
fn test_zero_timeout_single_attempt() {
    let mut session = spawn_with(PtyStrategy::Native, "sleep 10");
    let start = Instant::now();
    let result = session
        .expect_any_timeout(&[Pattern::exact("x"), Pattern::Timeout], Some(Duration::ZERO))
        .unwrap();
    assert!(result.is_timeout());
    assert!(start.elapsed() < Duration::from_millis(500));
}

#[test]
fn test_no_timeout() {
    let mut session = Session::builder()
        .no_timeout()
        .spawn("sh -c 'sleep 1; echo late'")
        .expect("Failed to spawn");
    session.expect("late").expect("late output not seen");
}

#[test]
fn test_timeout_message_renders_searcher() {
    let mut session = spawn_with(PtyStrategy::Native, "cat");
    let patterns = [
        Pattern::exact("alpha"),
        Pattern::exact("beta"),
        Pattern::exact("gamma"),
        Pattern::exact("delta"),
    ];
    let err = session
        .expect_exact_timeout(&patterns, Some(Duration::from_millis(100)))
        .unwrap_err();
    let message = err.to_string();
    assert!(message.ends_with(
        "StringSearcher:\n    0: \"alpha\"\n    1: \"beta\"\n    2: \"gamma\"\n    3: \"delta\""
    ));
}

#[test]
fn test_timeout_message_renders_regex_searcher() {
    let mut session = spawn_with(PtyStrategy::Native, "cat");
    let patterns = ["alpha", "beta", "gamma", "delta"].map(|word| Pattern::regex(word).unwrap());
    let err = session
        .expect_any_timeout(&patterns, Some(Duration::from_millis(100)))
        .unwrap_err();
    assert!(err.to_string().ends_with(
        "RegexSearcher:\n    0: re.compile(\"alpha\")\n    1: re.compile(\"beta\")\n    2: re.compile(\"gamma\")\n    3: re.compile(\"delta\")"
    ));
}

#[test]
fn test_error_trace_points_at_caller() {
    let mut session = spawn_with(PtyStrategy::Native, "cat");
    let line = line!() + 1;
    let err = session.expect_any_timeout(&[Pattern::exact("nope")], Some(Duration::from_millis(50))).unwrap_err();

    let site = err.trace().and_then(|t| t.call_site()).expect("no call site");
    assert!(site.file().ends_with("integration_tests.rs"), "{}", site.file());
    assert_eq!(site.line(), line);
}

#[test]
fn test_regex_in_exact_search_is_rejected() {
    let mut session = spawn_with(PtyStrategy::Native, "cat");
    let patterns = [Pattern::exact("a"), Pattern::regex("b+").unwrap()];
    let err = session.expect_exact(&patterns).unwrap_err();
    assert!(err.is_usage());
    // Nothing was consumed or read.
    assert_eq!(session.state(), ExpectState::Waiting);
    assert!(session.buffer().is_empty());
}

#[test]
fn test_descriptor_target_is_rejected() {
    let err = Session::spawn(0).unwrap_err();
    assert!(matches!(err, ExpectError::Usage { .. }));
}

#[test]
fn test_empty_pattern_error() {
    let mut session = spawn_with(PtyStrategy::Native, "echo test");
    let err = session.expect("").unwrap_err();
    assert!(matches!(err, ExpectError::Pattern(_)));
}

#[test]
fn test_invalid_regex_pattern() {
    assert!(Pattern::regex("(unclosed").is_err());
}

#[test]
fn test_spawn_invalid_command() {
    let err = Session::spawn("nonexistent_command_xyz_123").unwrap_err();
    assert!(matches!(err, ExpectError::Spawn(_)));
}

#[test]
fn test_operations_after_close() {
    let mut session = spawn_with(PtyStrategy::Native, "cat");
    session.close().unwrap();

    assert!(matches!(session.read(1), Err(ExpectError::Closed { .. })));
    assert!(matches!(session.read(0), Err(ExpectError::Closed { .. })));
    assert!(matches!(session.read_to_eof(), Err(ExpectError::Closed { .. })));
    assert!(matches!(session.readline(), Err(ExpectError::Closed { .. })));
    assert!(matches!(session.readline_limited(0), Err(ExpectError::Closed { .. })));
    assert!(matches!(session.readline_limited(4), Err(ExpectError::Closed { .. })));
    assert!(matches!(session.readlines(), Err(ExpectError::Closed { .. })));
    assert!(matches!(
        session.read_nonblocking(1, Some(Duration::ZERO)),
        Err(ExpectError::Closed { .. })
    ));

    let mut lines = session.lines();
    assert!(matches!(lines.next(), Some(Err(ExpectError::Closed { .. }))));
    assert!(lines.next().is_none());

    assert!(matches!(session.send("x"), Err(ExpectError::Closed { .. })));
    assert!(matches!(session.sendline("x"), Err(ExpectError::Closed { .. })));
    assert!(matches!(session.expect("x"), Err(ExpectError::Closed { .. })));
    assert!(session.is_terminated());
}

/// A sink that accepts writes and refuses to flush.
struct FailingFlush;

impl Write for FailingFlush {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Err(io::Error::other("disk full"))
    }
}

/// A sink that refuses every write.
struct FailingWrite;

impl Write for FailingWrite {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::other("disk full"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_close_reaps_child_when_sink_fails() {
    let mut session = Session::builder()
        .log_send(FailingFlush)
        .spawn("sleep 30")
        .expect("Failed to spawn");

    let err = session.close().unwrap_err();
    assert!(matches!(err, ExpectError::Io(_)));
    assert!(session.is_terminated());
    assert!(!session.is_alive().unwrap());
    assert!(session.close().is_ok());
}

#[test]
fn test_output_kept_when_read_sink_fails() {
    let mut session = Session::builder()
        .timeout(Duration::from_secs(5))
        .log_read(FailingWrite)
        .spawn("echo hello")
        .expect("Failed to spawn");

    let err = session.expect("hello").unwrap_err();
    assert!(matches!(err, ExpectError::Io(_)));
    assert!(session.buffer().starts_with(b"hello"));
}

#[test]
fn test_terminate_force() {
    for strategy in STRATEGIES {
        let mut session = Session::builder()
            .pty_strategy(strategy)
            .ignore_sighup(true)
            .spawn("sh -c 'trap \"\" INT; echo READY; while :; do sleep 1; done'")
            .expect("Failed to spawn");
        session.expect("READY").unwrap();

        assert!(session.terminate(true).unwrap());
        assert!(!session.is_alive().unwrap());
        assert!(session.is_terminated());
    }
}

#[test]
fn test_sighup_ignored() {
    for strategy in STRATEGIES {
        let mut session = Session::builder()
            .pty_strategy(strategy)
            .ignore_sighup(true)
            .spawn("sh -c 'echo READY; exec cat'")
            .expect("Failed to spawn");
        session.expect("READY").unwrap();

        session.kill(Signal::SIGHUP).unwrap();
        for _ in 0..10 {
            std::thread::sleep(Duration::from_millis(100));
            assert!(session.is_alive().unwrap(), "child died from SIGHUP");
        }
    }
}

#[test]
fn test_sighup_delivered() {
    for strategy in STRATEGIES {
        let mut session = Session::builder()
            .pty_strategy(strategy)
            .ignore_sighup(false)
            .spawn("sh -c 'echo READY; exec cat'")
            .expect("Failed to spawn");
        session.expect("READY").unwrap();

        session.kill(Signal::SIGHUP).unwrap();
        let mut alive = true;
        for _ in 0..10 {
            std::thread::sleep(Duration::from_millis(100));
            alive = session.is_alive().unwrap();
            if !alive {
                break;
            }
        }
        assert!(!alive, "child survived SIGHUP");
        assert_eq!(session.signal_status(), Some(Signal::SIGHUP));
    }
}

#[test]
fn test_wait_for_process() {
    let mut session = spawn_with(PtyStrategy::Native, "sh -c 'echo done; exit 7'");
    session.expect("done").unwrap();
    assert_eq!(session.wait().unwrap(), Some(7));
    assert!(!session.is_alive().unwrap());
}

#[test]
fn test_sequential_commands() {
    let mut session = Session::builder()
        .timeout(Duration::from_secs(5))
        .echo(false)
        .spawn("sh")
        .expect("Failed to spawn");

    session.sendline("echo one").unwrap();
    session.expect("one").unwrap();
    session.sendline("echo two").unwrap();
    session.expect("two").unwrap();
    session.sendline("exit 0").unwrap();
    session.expect_any(&[Pattern::Eof]).unwrap();
    assert_eq!(session.wait().unwrap(), Some(0));
}

#[test]
fn test_search_window() {
    let mut session = Session::builder()
        .timeout(Duration::from_millis(500))
        .search_window_size(4)
        .spawn("echo 0123456789")
        .expect("Failed to spawn");

    // Longer than the window: never found.
    let result = session
        .expect_any(&[Pattern::regex("012345").unwrap(), Pattern::Eof])
        .unwrap();
    assert!(result.is_eof());
}

#[test]
fn test_transcript_sinks() {
    let read_log = SharedSink::default();
    let send_log = SharedSink::default();
    let mut session = Session::builder()
        .timeout(Duration::from_secs(5))
        .echo(false)
        .log_read(read_log.clone())
        .log_send(send_log.clone())
        .spawn("cat")
        .expect("Failed to spawn");

    session.sendline("logged").unwrap();
    session.expect("logged\r\n").unwrap();
    session.close().unwrap();

    assert_eq!(send_log.contents(), b"logged\n");
    assert!(read_log.contents().starts_with(b"logged\r\n"));
}

#[test]
fn test_run_with_env() {
    let options = RunOptions {
        env: Some(vec![("FOO".to_owned(), "bar".to_owned()), ("PATH".to_owned(), "/usr/bin:/bin".to_owned())]),
        ..RunOptions::default()
    };
    let output = run_with("env", options).unwrap();
    let text = String::from_utf8_lossy(&output.output);
    assert!(text.contains("FOO=bar"));
    assert!(!text.contains("HOME="));
    assert_eq!(output.exit_status, Some(0));
}

#[test]
fn test_run_with_cwd() {
    let dir = tempfile::tempdir().unwrap();
    let before = std::env::current_dir().unwrap();

    let options = RunOptions {
        cwd: Some(dir.path().to_path_buf()),
        ..RunOptions::default()
    };
    let output = run_with("pwd", options).unwrap();
    let printed = String::from_utf8_lossy(&output.output).trim().to_owned();

    assert_eq!(
        std::fs::canonicalize(printed).unwrap(),
        std::fs::canonicalize(dir.path()).unwrap()
    );
    assert_eq!(std::env::current_dir().unwrap(), before);
}
