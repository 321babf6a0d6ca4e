//! Pipe I/O tests: deadline semantics, partial transfers, end-of-stream, and
//! stream-selector validation against real children.

use std::thread;
use std::time::{Duration, Instant};

use popen::{PopenError, PopenHandle, SpawnFlags, SpawnOptions, State, StdStream};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Accumulate stdout until `expected` bytes have arrived or the cap expires.
fn read_exactly(handle: &PopenHandle, expected: usize) -> Vec<u8> {
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut collected = Vec::new();
    let mut chunk = [0u8; 4096];
    while collected.len() < expected {
        assert!(Instant::now() < deadline, "child output did not arrive");
        let n = handle
            .read(StdStream::Stdout, &mut chunk, Some(Duration::from_secs(1)))
            .expect("read stdout");
        if n == 0 {
            break;
        }
        collected.extend_from_slice(&chunk[..n]);
    }
    collected
}

fn wait_terminal(handle: &PopenHandle) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let (state, _) = handle.state().expect("state poll");
        if state != State::Alive {
            return;
        }
        assert!(Instant::now() < deadline, "child did not terminate in time");
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn write_then_read_round_trips_through_cat() {
    init_tracing();
    let mut handle = PopenHandle::spawn(
        SpawnOptions::new(["cat"]).flags(SpawnFlags::STDIN | SpawnFlags::STDOUT),
    )
    .expect("spawn cat");

    let payload = b"hello through the pipe\n";
    let written = handle
        .write(StdStream::Stdin, payload, Some(Duration::from_secs(1)))
        .expect("write stdin");
    // Full transfer is detected by comparing counts.
    assert_eq!(written, payload.len());

    let echoed = read_exactly(&handle, payload.len());
    assert_eq!(echoed, payload);
    handle.delete().expect("delete");
}

#[test]
fn read_with_zero_timeout_reports_timeout_when_idle() {
    init_tracing();
    let mut handle = PopenHandle::spawn(
        SpawnOptions::new(["cat"]).flags(SpawnFlags::STDIN | SpawnFlags::STDOUT),
    )
    .expect("spawn cat");

    let mut buf = [0u8; 64];
    let err = handle
        .read(StdStream::Stdout, &mut buf, Some(Duration::ZERO))
        .expect_err("nothing written yet");
    assert!(matches!(err, PopenError::Timeout));
    handle.delete().expect("delete");
}

#[test]
fn end_of_stream_is_repeated_zero_byte_success() {
    init_tracing();
    let mut handle = PopenHandle::spawn(
        SpawnOptions::new(["/bin/sh", "-c", "printf hi"]).flags(SpawnFlags::STDOUT),
    )
    .expect("spawn");

    wait_terminal(&handle);
    assert_eq!(read_exactly(&handle, 2), b"hi");

    let mut buf = [0u8; 16];
    for _ in 0..3 {
        let n = handle
            .read(StdStream::Stdout, &mut buf, Some(Duration::from_millis(100)))
            .expect("eof is success, not timeout");
        assert_eq!(n, 0);
    }
    handle.delete().expect("delete");
}

#[test]
fn write_under_backpressure_returns_partial_count() {
    init_tracing();
    // The child never reads its stdin, so the pipe buffer fills up.
    let mut handle =
        PopenHandle::spawn(SpawnOptions::new(["sleep", "5"]).flags(SpawnFlags::STDIN))
            .expect("spawn");

    let payload = vec![b'x'; 4 * 1024 * 1024];
    let written = handle
        .write(StdStream::Stdin, &payload, Some(Duration::from_millis(200)))
        .expect("partial write is success");
    assert!(written > 0);
    assert!(written < payload.len());

    // Zero progress on the now-full pipe is a timeout, not a partial result.
    let err = handle
        .write(StdStream::Stdin, &payload, Some(Duration::ZERO))
        .expect_err("pipe is full");
    assert!(matches!(err, PopenError::Timeout));
    handle.delete().expect("delete");
}

#[test]
fn stream_selector_must_match_direction_and_ownership() {
    init_tracing();
    let mut handle = PopenHandle::spawn(
        SpawnOptions::new(["cat"]).flags(SpawnFlags::STDIN | SpawnFlags::STDOUT),
    )
    .expect("spawn cat");

    let mut buf = [0u8; 8];
    let err = handle
        .read(StdStream::Stdin, &mut buf, Some(Duration::ZERO))
        .expect_err("stdin is write-only");
    assert!(matches!(err, PopenError::InvalidArgument(_)));

    let err = handle
        .write(StdStream::Stdout, b"x", Some(Duration::ZERO))
        .expect_err("stdout is read-only");
    assert!(matches!(err, PopenError::InvalidArgument(_)));

    let err = handle
        .read(StdStream::Stderr, &mut buf, Some(Duration::ZERO))
        .expect_err("no stderr pipe exists");
    assert!(matches!(err, PopenError::InvalidArgument(_)));

    handle.delete().expect("delete");
}

#[test]
fn devnull_routing_leaves_no_parent_descriptor() {
    init_tracing();
    let mut handle = PopenHandle::spawn(
        SpawnOptions::new(["/bin/sh", "-c", "echo swallowed"])
            .flags(SpawnFlags::STDOUT_DEVNULL | SpawnFlags::STDERR_CLOSE),
    )
    .expect("spawn");

    let info = handle.info().expect("info");
    assert_eq!(info.stdout_fd, -1);
    assert_eq!(info.stderr_fd, -1);

    wait_terminal(&handle);
    handle.delete().expect("delete");
}

#[test]
fn explicit_environment_reaches_the_child() {
    init_tracing();
    let mut handle = PopenHandle::spawn(
        SpawnOptions::new(["/bin/sh", "-c", "printf %s \"$POPEN_TEST_VAR\""])
            .env(["POPEN_TEST_VAR=from-env"])
            .flags(SpawnFlags::STDOUT),
    )
    .expect("spawn");

    assert_eq!(read_exactly(&handle, 8), b"from-env");
    handle.delete().expect("delete");
}

#[test]
fn empty_environment_starts_the_child_with_nothing() {
    init_tracing();
    let mut handle = PopenHandle::spawn(
        SpawnOptions::new(["/bin/sh", "-c", "printf %s \"${HOME:-unset}\""])
            .env(Vec::<String>::new())
            .flags(SpawnFlags::STDOUT),
    )
    .expect("spawn");

    assert_eq!(read_exactly(&handle, 5), b"unset");
    handle.delete().expect("delete");
}

#[test]
fn shell_flag_runs_the_command_through_a_shell() {
    init_tracing();
    let mut handle = PopenHandle::spawn(
        SpawnOptions::new(["printf shell-ok"]).flags(SpawnFlags::SHELL | SpawnFlags::STDOUT),
    )
    .expect("spawn");

    assert_eq!(read_exactly(&handle, 8), b"shell-ok");
    handle.delete().expect("delete");
}

#[test]
fn stderr_pipe_carries_child_diagnostics() {
    init_tracing();
    let handle = PopenHandle::spawn(
        SpawnOptions::new(["/bin/sh", "-c", "printf oops >&2"]).flags(SpawnFlags::STDERR),
    )
    .expect("spawn");

    wait_terminal(&handle);
    let mut buf = [0u8; 16];
    let n = handle
        .read(StdStream::Stderr, &mut buf, Some(Duration::from_secs(1)))
        .expect("read stderr");
    assert_eq!(&buf[..n], b"oops");
    // Drop covers teardown here.
}
