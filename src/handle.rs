//! Process handle lifecycle: state machine, signal delivery, and deterministic teardown.

use std::fmt;
use std::io::{self, ErrorKind};
use std::os::unix::io::RawFd;
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{PopenError, Result};
use crate::flags::{SpawnFlags, StdStream};
use crate::io::{read_deadline, write_deadline};
use crate::lock::lock_or_recover;
use crate::options::SpawnOptions;
use crate::signals::{deliver_signal, is_no_such_process};
use crate::spawn::{close_fd, spawn_child};

/// How long each stage of the SIGTERM/SIGKILL escalation waits for the child.
const TERMINATION_GRACE: Duration = Duration::from_millis(500);
const REAP_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Whether the child is running, exited on its own, or was killed by a signal.
///
/// Transitions only `Alive -> Exited` or `Alive -> Signaled`, exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Alive,
    Exited,
    Signaled,
}

impl State {
    pub fn as_str(self) -> &'static str {
        match self {
            State::Alive => "alive",
            State::Exited => "exited",
            State::Signaled => "signaled",
        }
    }
}

/// Cached child status; terminal results are recorded once and never
/// re-queried from the OS (a child can be reaped only once).
struct ChildStatus {
    state: State,
    /// Exit status for `Exited`, terminating signal number for `Signaled`,
    /// meaningless while `Alive`.
    exit_code: i32,
}

/// Point-in-time snapshot returned by [`PopenHandle::info`].
#[derive(Debug, Clone)]
pub struct HandleInfo {
    pub pid: i32,
    pub command: String,
    pub flags: SpawnFlags,
    pub state: &'static str,
    pub exit_code: i32,
    /// Parent-kept pipe descriptors; -1 where the stream is not piped.
    pub stdin_fd: RawFd,
    pub stdout_fd: RawFd,
    pub stderr_fd: RawFd,
}

/// Exclusive owner of one child process and its pipe descriptors.
///
/// Dropping the handle tears the child down the same way [`delete`] does;
/// calling [`delete`] first lets the caller observe teardown failures and
/// makes a second release attempt an explicit error.
///
/// [`delete`]: PopenHandle::delete
pub struct PopenHandle {
    pid: i32,
    command: String,
    flags: SpawnFlags,
    /// One slot per standard stream, fixed for the handle's lifetime.
    stream_fds: [RawFd; 3],
    status: Mutex<ChildStatus>,
    released: bool,
}

impl PopenHandle {
    /// Fork and exec a child per `options`.
    ///
    /// On success the handle is `Alive` with a positive pid; a handle is
    /// never returned in a terminal state. On failure no descriptor leaks.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty argv, conflicting stream flags, or NUL
    /// bytes in argv/env; `System` when pipe creation or fork fails. An exec
    /// failure inside the child is not observable here, only through a later
    /// [`state`](Self::state) poll reporting `Exited` with a nonzero code.
    pub fn spawn(options: SpawnOptions) -> Result<Self> {
        let command = options.command_line();
        let (pid, stream_fds) = spawn_child(&options)?;
        Ok(PopenHandle {
            pid,
            command,
            flags: options.flags,
            stream_fds,
            status: Mutex::new(ChildStatus {
                state: State::Alive,
                exit_code: 0,
            }),
            released: false,
        })
    }

    /// Child pid; only meaningful while the state is `Alive`.
    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// The effective command line used to spawn, retained for diagnostics.
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn flags(&self) -> SpawnFlags {
        self.flags
    }

    /// Non-blocking status query with an opportunistic reap.
    ///
    /// Returns the terminal state and exit code (or the signal number for
    /// `Signaled`) once the child is gone; `(Alive, 0)` until then. A
    /// terminal result is cached permanently.
    ///
    /// # Errors
    ///
    /// `System` if the OS wait primitive fails.
    pub fn state(&self) -> Result<(State, i32)> {
        self.poll_reap()
    }

    /// Send `signo` to the child (to its process group for SETSID spawns).
    ///
    /// # Errors
    ///
    /// `NotFound` once the child's terminal state has been cached, or when
    /// the OS reports the process is already gone; `System` for other
    /// delivery failures.
    pub fn send_signal(&self, signo: i32) -> Result<()> {
        // Hold the status lock across the kill so a concurrent reap cannot
        // free the pid for reuse underneath us.
        let status = lock_or_recover(&self.status, "popen::handle::send_signal");
        if status.state != State::Alive {
            return Err(PopenError::NotFound);
        }
        match deliver_signal(self.pid, signo, self.flags.contains(SpawnFlags::SETSID)) {
            Ok(()) => Ok(()),
            Err(err) if is_no_such_process(&err) => Err(PopenError::NotFound),
            Err(err) => Err(PopenError::system("kill failed", err)),
        }
    }

    /// Read from the child's stdout or stderr pipe, bounded by `timeout`
    /// (`None` waits indefinitely, zero returns immediately).
    ///
    /// A zero-byte result means the child closed its end; fewer bytes than
    /// `buf.len()` simply means less data was available.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `stream` is stdin or has no pipe; `Timeout` when
    /// the deadline elapses with nothing read; `System` for OS failures.
    pub fn read(
        &self,
        stream: StdStream,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<usize> {
        if stream == StdStream::Stdin {
            return Err(PopenError::InvalidArgument(
                "stdin is not readable".to_string(),
            ));
        }
        read_deadline(self.pipe_fd(stream)?, buf, timeout)
    }

    /// Write to the child's stdin pipe, bounded by `timeout`.
    ///
    /// Returns the number of bytes transferred; callers detect "fully sent"
    /// by comparing it to `buf.len()`. Backpressure at the deadline yields a
    /// partial count, zero progress yields `Timeout`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `stream` is not a piped stdin; `Timeout` on zero
    /// progress; `System` when the pipe breaks.
    pub fn write(&self, stream: StdStream, buf: &[u8], timeout: Option<Duration>) -> Result<usize> {
        if stream != StdStream::Stdin {
            return Err(PopenError::InvalidArgument(format!(
                "{} is not writable",
                stream.name()
            )));
        }
        write_deadline(self.pipe_fd(stream)?, buf, timeout)
    }

    /// Snapshot of the handle for introspection, including a fresh state poll.
    ///
    /// # Errors
    ///
    /// `System` if the state poll fails.
    pub fn info(&self) -> Result<HandleInfo> {
        let (state, exit_code) = self.state()?;
        Ok(HandleInfo {
            pid: self.pid,
            command: self.command.clone(),
            flags: self.flags,
            state: state.as_str(),
            exit_code,
            stdin_fd: self.stream_fds[StdStream::Stdin.index()],
            stdout_fd: self.stream_fds[StdStream::Stdout.index()],
            stderr_fd: self.stream_fds[StdStream::Stderr.index()],
        })
    }

    /// Tear the handle down: terminate a still-running child, reap it, and
    /// close every owned descriptor.
    ///
    /// Resources are released at most once; a second call is an error so the
    /// boundary layer can detect double-release misuse.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the handle was already released; `System` when
    /// termination or the reap fails (for instance when the child was reaped
    /// elsewhere). Descriptors are closed even on the error path, so only
    /// the double-release error can follow.
    pub fn delete(&mut self) -> Result<()> {
        if self.released {
            return Err(PopenError::InvalidArgument(
                "handle already released".to_string(),
            ));
        }
        self.released = true;
        self.teardown()
    }

    fn pipe_fd(&self, stream: StdStream) -> Result<RawFd> {
        let fd = self.stream_fds[stream.index()];
        if fd < 0 {
            return Err(PopenError::InvalidArgument(format!(
                "no pipe was created for {}",
                stream.name()
            )));
        }
        Ok(fd)
    }

    fn poll_reap(&self) -> Result<(State, i32)> {
        let mut status = lock_or_recover(&self.status, "popen::handle::poll_reap");
        if status.state != State::Alive {
            return Ok((status.state, status.exit_code));
        }
        let mut raw: libc::c_int = 0;
        // SAFETY: waitpid with WNOHANG only inspects the child owned by this
        // handle and writes the status into our stack slot.
        let ret = unsafe { libc::waitpid(self.pid, &mut raw, libc::WNOHANG) };
        if ret == 0 {
            return Ok((State::Alive, 0));
        }
        if ret < 0 {
            return Err(PopenError::last_os("waitpid failed"));
        }
        let (state, exit_code) = decode_wait_status(raw);
        status.state = state;
        status.exit_code = exit_code;
        tracing::debug!(pid = self.pid, state = state.as_str(), exit_code, "child reaped");
        Ok((state, exit_code))
    }

    /// Block until the child is reaped, retrying interrupted waits. Only
    /// called after SIGKILL, so the wait is short.
    fn reap_blocking(&self) -> Result<(State, i32)> {
        let mut status = lock_or_recover(&self.status, "popen::handle::reap_blocking");
        if status.state != State::Alive {
            return Ok((status.state, status.exit_code));
        }
        let mut raw: libc::c_int = 0;
        loop {
            // SAFETY: waitpid targets the child owned by this handle.
            let ret = unsafe { libc::waitpid(self.pid, &mut raw, 0) };
            if ret >= 0 {
                break;
            }
            let err = io::Error::last_os_error();
            if err.kind() == ErrorKind::Interrupted {
                continue;
            }
            return Err(PopenError::system("waitpid failed", err));
        }
        let (state, exit_code) = decode_wait_status(raw);
        status.state = state;
        status.exit_code = exit_code;
        Ok((state, exit_code))
    }

    /// Poll for the child's exit until `grace` runs out.
    fn wait_for_exit(&self, grace: Duration) -> Result<bool> {
        let start = Instant::now();
        loop {
            if self.poll_reap()?.0 != State::Alive {
                return Ok(true);
            }
            if start.elapsed() >= grace {
                return Ok(false);
            }
            thread::sleep(REAP_POLL_INTERVAL);
        }
    }

    fn terminate_and_reap(&self) -> Result<()> {
        if self.poll_reap()?.0 != State::Alive {
            return Ok(());
        }
        let to_group = self.flags.contains(SpawnFlags::SETSID);
        if let Err(err) = deliver_signal(self.pid, libc::SIGTERM, to_group) {
            if !is_no_such_process(&err) {
                tracing::debug!(pid = self.pid, %err, "SIGTERM during teardown failed");
            }
        }
        if self.wait_for_exit(TERMINATION_GRACE)? {
            return Ok(());
        }
        if let Err(err) = deliver_signal(self.pid, libc::SIGKILL, to_group) {
            if !is_no_such_process(&err) {
                tracing::debug!(pid = self.pid, %err, "SIGKILL during teardown failed");
            }
        }
        self.reap_blocking()?;
        Ok(())
    }

    /// Terminate and reap, then close every owned descriptor regardless of
    /// whether the reap succeeded. The reap error is returned so `delete`
    /// can surface it.
    fn teardown(&mut self) -> Result<()> {
        let reaped = self.terminate_and_reap();
        for fd in self.stream_fds.iter_mut() {
            // SAFETY: each slot is -1 or a pipe end owned by this handle,
            // closed exactly once because the slot is reset afterwards.
            unsafe { close_fd(*fd) };
            *fd = -1;
        }
        reaped
    }
}

impl fmt::Debug for PopenHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PopenHandle")
            .field("pid", &self.pid)
            .field("command", &self.command)
            .field("flags", &self.flags)
            .field("stream_fds", &self.stream_fds)
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for PopenHandle {
    fn drop(&mut self) {
        if !self.released {
            tracing::debug!(pid = self.pid, "handle dropped without delete; tearing down");
            self.released = true;
            if let Err(err) = self.teardown() {
                tracing::warn!(pid = self.pid, %err, "failed to reap child during drop");
            }
        }
    }
}

fn decode_wait_status(raw: libc::c_int) -> (State, i32) {
    if libc::WIFSIGNALED(raw) {
        (State::Signaled, libc::WTERMSIG(raw))
    } else {
        (State::Exited, libc::WEXITSTATUS(raw))
    }
}
