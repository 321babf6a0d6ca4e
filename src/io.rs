//! Deadline-bounded reads and writes on the handle's non-blocking pipe ends.

use std::io::{self, ErrorKind};
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

use crate::error::{PopenError, Result};

fn deadline_from(timeout: Option<Duration>) -> Option<Instant> {
    timeout.map(|bound| Instant::now() + bound)
}

/// Wait until `fd` reports `events` or the deadline passes.
///
/// `Ok(true)` means ready (including hang-up/error conditions, which the
/// subsequent read or write surfaces), `Ok(false)` means the deadline
/// elapsed. `None` deadline waits indefinitely.
fn wait_for_fd(fd: RawFd, events: libc::c_short, deadline: Option<Instant>) -> Result<bool> {
    loop {
        let timeout_ms: libc::c_int = match deadline {
            None => -1,
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Ok(false);
                }
                let remaining = deadline.duration_since(now).as_millis();
                remaining.clamp(1, libc::c_int::MAX as u128) as libc::c_int
            }
        };
        let mut pfd = libc::pollfd {
            fd,
            events,
            revents: 0,
        };
        // SAFETY: poll reads and writes only the pollfd on our stack.
        let ret = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if ret > 0 {
            return Ok(true);
        }
        if ret == 0 {
            // Timed out at the poll level; re-check the deadline in case the
            // bound was rounded up to a whole millisecond.
            match deadline {
                Some(deadline) if Instant::now() >= deadline => return Ok(false),
                _ => continue,
            }
        }
        let err = io::Error::last_os_error();
        if err.kind() == ErrorKind::Interrupted {
            continue;
        }
        return Err(PopenError::system("poll failed", err));
    }
}

/// Read once from the pipe, suspending the calling thread until data arrives,
/// the child closes its end (`Ok(0)`), or the deadline elapses (`Timeout`).
///
/// Short reads are success: at most one readiness cycle transfers data.
pub(crate) fn read_deadline(fd: RawFd, buf: &mut [u8], timeout: Option<Duration>) -> Result<usize> {
    let deadline = deadline_from(timeout);
    loop {
        // SAFETY: fd is a pipe end owned by the handle; buf is a live
        // mutable slice.
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n >= 0 {
            return Ok(n as usize);
        }
        let err = io::Error::last_os_error();
        match err.kind() {
            ErrorKind::Interrupted => continue,
            ErrorKind::WouldBlock => {
                if !wait_for_fd(fd, libc::POLLIN, deadline)? {
                    return Err(PopenError::Timeout);
                }
            }
            _ => return Err(PopenError::system("read from child failed", err)),
        }
    }
}

/// Write as much of `buf` as the pipe accepts before the deadline.
///
/// Returns the transferred count; a partial transfer under backpressure is
/// success, only zero progress at the deadline is `Timeout`. OS-level
/// failures (broken pipe, bad descriptor) are errors regardless of progress.
pub(crate) fn write_deadline(fd: RawFd, buf: &[u8], timeout: Option<Duration>) -> Result<usize> {
    let deadline = deadline_from(timeout);
    let mut written = 0usize;
    while written < buf.len() {
        // SAFETY: fd is a pipe end owned by the handle; the offset stays
        // within buf.
        let n = unsafe {
            libc::write(
                fd,
                buf.as_ptr().add(written) as *const libc::c_void,
                buf.len() - written,
            )
        };
        if n > 0 {
            written += n as usize;
            continue;
        }
        if n == 0 {
            // Pipes never accept zero bytes of a non-empty buffer; treat it
            // as backpressure.
            if !wait_for_fd(fd, libc::POLLOUT, deadline)? {
                break;
            }
            continue;
        }
        let err = io::Error::last_os_error();
        match err.kind() {
            ErrorKind::Interrupted => continue,
            ErrorKind::WouldBlock => {
                if !wait_for_fd(fd, libc::POLLOUT, deadline)? {
                    break;
                }
            }
            _ => return Err(PopenError::system("write to child failed", err)),
        }
    }
    if written == 0 && !buf.is_empty() {
        return Err(PopenError::Timeout);
    }
    Ok(written)
}
