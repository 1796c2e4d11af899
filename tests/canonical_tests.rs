//! Canonical-mode line limits, observed through a real shell

#![cfg(target_os = "linux")]

use expectpty::{Pattern, Session};
use std::time::Duration;

/// Size of the Linux canonical line buffer.
const MAX_CANON: usize = 4096;

/// A bash running `cat` with the given `stty` settings applied.
fn cat_under_bash(stty: &str) -> Session {
    let mut session = Session::builder()
        .timeout(Duration::from_secs(10))
        .delay_before_send(None)
        .spawn("bash --norc --noprofile")
        .expect("Failed to spawn bash");

    session.sendline(format!("stty {stty}; echo RE''ADY")).unwrap();
    session.expect("READY").expect("bash never became ready");
    session.sendline("cat").unwrap();
    session.sendline("BEGIN").unwrap();
    // Echo, then cat's copy.
    session.expect("BEGIN").unwrap();
    session.expect("BEGIN").unwrap();
    session
}

#[test]
fn test_under_max_canon() {
    let mut session = cat_under_bash("icanon imaxbel erase ^H");
    let line = "A".repeat(MAX_CANON - 1);

    session.sendline(&line).unwrap();
    let echoed = session.expect(line.as_str()).unwrap();
    let copied = session.expect(line.as_str()).unwrap();

    assert!(!echoed.before.contains(&b'\x07'));
    assert!(!copied.before.contains(&b'\x07'));
}

#[test]
fn test_at_max_canon() {
    let mut session = cat_under_bash("icanon imaxbel erase ^H");
    let full = "A".repeat(MAX_CANON);
    let kept = "A".repeat(MAX_CANON - 1);

    session.send(&full).unwrap();
    // The line discipline refuses the last byte and rings the bell.
    let bell = session.expect("\x07").expect("no BEL at the canonical limit");
    assert!(bell.before.ends_with(kept.as_bytes()));
    assert!(!bell.before.ends_with(full.as_bytes()));

    // The full line swallows the newline as well; make room first.
    session.sendcontrol('h').unwrap();
    session.sendline("").unwrap();
    let delivered = format!("{}\r\n", "A".repeat(MAX_CANON - 2));
    session.expect(delivered.as_str()).expect("cat never got the line");
}

#[test]
fn test_noncanonical_exceeds_max_canon() {
    let mut session = cat_under_bash("-icanon -echo");
    let line = "A".repeat(MAX_CANON + 904);

    session.send(&line).unwrap();
    let result = session
        .expect_any(&[Pattern::exact(&line), Pattern::exact("\x07")])
        .unwrap();
    assert_eq!(result.pattern_index, 0);
}
