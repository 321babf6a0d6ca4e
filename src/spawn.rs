//! Fork/exec plumbing: pipe wiring, child-side setup, and leak-free failure paths.

use std::ffi::CString;
use std::io;
use std::os::unix::io::RawFd;
use std::ptr;

use crate::error::{PopenError, Result};
use crate::flags::{stream_actions, SpawnFlags, StdStream, StreamAction};
use crate::options::SpawnOptions;

/// Exit code the child uses when exec (or any pre-exec step) fails. The
/// parent only ever observes it through a later state poll.
const CHILD_SETUP_EXIT_CODE: i32 = 127;

const DEV_NULL: &[u8] = b"/dev/null\0";

/// Pipe descriptors created for one spawn, before and after fork.
///
/// Parent slots hold the end the handle keeps (stdin write end, stdout and
/// stderr read ends); child slots hold the end dup2'd over the child's
/// standard descriptors. `-1` means the stream is not piped.
struct StreamWiring {
    parent_fds: [RawFd; 3],
    child_fds: [RawFd; 3],
}

impl StreamWiring {
    fn create(actions: &[StreamAction; 3]) -> Result<Self> {
        let mut wiring = StreamWiring {
            parent_fds: [-1; 3],
            child_fds: [-1; 3],
        };
        for stream in StdStream::ALL {
            let slot = stream.index();
            if actions[slot] != StreamAction::Pipe {
                continue;
            }
            let mut fds: [RawFd; 2] = [-1; 2];
            // SAFETY: pipe writes two descriptors into the array we own.
            if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
                let err = PopenError::last_os("pipe failed");
                wiring.close_all();
                return Err(err);
            }
            // The child reads its stdin from fds[0]; for stdout/stderr the
            // parent reads fds[0] and the child writes fds[1].
            let (parent_fd, child_fd) = match stream {
                StdStream::Stdin => (fds[1], fds[0]),
                StdStream::Stdout | StdStream::Stderr => (fds[0], fds[1]),
            };
            wiring.parent_fds[slot] = parent_fd;
            wiring.child_fds[slot] = child_fd;
            if let Err(err) = set_cloexec(parent_fd)
                .and_then(|_| set_cloexec(child_fd))
                .and_then(|_| set_nonblocking(parent_fd))
            {
                wiring.close_all();
                return Err(err);
            }
        }
        Ok(wiring)
    }

    fn close_all(&mut self) {
        for fd in self.parent_fds.iter_mut().chain(self.child_fds.iter_mut()) {
            // SAFETY: each slot is either -1 or a descriptor this wiring owns.
            unsafe { close_fd(*fd) };
            *fd = -1;
        }
    }

    fn close_child_ends(&mut self) {
        for fd in self.child_fds.iter_mut() {
            // SAFETY: child-end descriptors belong to this wiring.
            unsafe { close_fd(*fd) };
            *fd = -1;
        }
    }
}

/// Fork and exec per the validated options; returns the child pid and the
/// parent-kept pipe descriptors (`-1` where no pipe was requested).
///
/// On any setup failure every descriptor created so far is closed before the
/// error is returned.
pub(crate) fn spawn_child(options: &SpawnOptions) -> Result<(i32, [RawFd; 3])> {
    options.validate()?;
    let actions = stream_actions(options.flags)?;

    // All allocations happen before fork; the child only touches
    // pre-built C strings and raw pointers.
    let argv_c = cstring_vec(&options.effective_argv(), "argv")?;
    let env_c = match &options.env {
        Some(env) => Some(cstring_vec(env, "env")?),
        None => None,
    };
    let mut argv_ptrs: Vec<*const libc::c_char> = argv_c.iter().map(|s| s.as_ptr()).collect();
    argv_ptrs.push(ptr::null());
    let env_ptrs: Option<Vec<*const libc::c_char>> = env_c.as_ref().map(|env| {
        let mut ptrs: Vec<*const libc::c_char> = env.iter().map(|s| s.as_ptr()).collect();
        ptrs.push(ptr::null());
        ptrs
    });

    let mut wiring = StreamWiring::create(&actions)?;

    // SAFETY: fork is called with all child-visible data prepared above;
    // the child branch never returns.
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        let err = PopenError::last_os("fork failed");
        wiring.close_all();
        return Err(err);
    }

    if pid == 0 {
        // SAFETY: child process; child_exec diverges via exec or _exit.
        unsafe {
            child_exec(
                &wiring,
                &actions,
                &argv_ptrs,
                env_ptrs.as_deref(),
                options.flags,
            )
        }
    }

    wiring.close_child_ends();
    tracing::debug!(pid, command = %options.command_line(), "spawned child");
    Ok((pid, wiring.parent_fds))
}

fn cstring_vec(strings: &[String], what: &str) -> Result<Vec<CString>> {
    strings
        .iter()
        .map(|s| {
            CString::new(s.as_str()).map_err(|_| {
                PopenError::InvalidArgument(format!("{what} entry contains a NUL byte: {s:?}"))
            })
        })
        .collect()
}

/// Child-side setup after fork: signal restore, session, stream wiring, exec.
///
/// # Safety
///
/// Must only be called in the child process after `fork()`. Never returns;
/// it either replaces the process image or calls `_exit`.
unsafe fn child_exec(
    wiring: &StreamWiring,
    actions: &[StreamAction; 3],
    argv_ptrs: &[*const libc::c_char],
    env_ptrs: Option<&[*const libc::c_char]>,
    flags: SpawnFlags,
) -> ! {
    let fail = |context: &str| -> ! {
        let err = io::Error::last_os_error();
        let msg = format!("popen child {context} failed: {err}\n");
        // SAFETY: write is async-signal-safe; stderr may already be rewired
        // or closed, in which case the diagnostic is simply lost.
        let _ = libc::write(
            libc::STDERR_FILENO,
            msg.as_ptr() as *const libc::c_void,
            msg.len(),
        );
        libc::_exit(CHILD_SETUP_EXIT_CODE);
    };

    if flags.contains(SpawnFlags::RESTORE_SIGNALS) {
        restore_default_signals();
    }

    if flags.contains(SpawnFlags::SETSID) && libc::setsid() == -1 {
        fail("setsid");
    }

    for stream in StdStream::ALL {
        let slot = stream.index();
        let target = slot as RawFd;
        match actions[slot] {
            StreamAction::Pipe => {
                if libc::dup2(wiring.child_fds[slot], target) < 0 {
                    fail("dup2(pipe)");
                }
            }
            StreamAction::DevNull => {
                let mode = if stream == StdStream::Stdin {
                    libc::O_RDONLY
                } else {
                    libc::O_WRONLY
                };
                let null_fd = libc::open(DEV_NULL.as_ptr() as *const libc::c_char, mode);
                if null_fd < 0 {
                    fail("open(/dev/null)");
                }
                // A stream closed earlier in the loop frees its fd number,
                // so open may hand back the target itself.
                if null_fd != target {
                    if libc::dup2(null_fd, target) < 0 {
                        fail("dup2(/dev/null)");
                    }
                    close_fd(null_fd);
                }
            }
            StreamAction::Close => {
                close_fd(target);
            }
            StreamAction::Inherit => {}
        }
    }
    for &fd in &wiring.child_fds {
        close_fd(fd);
    }

    if flags.contains(SpawnFlags::CLOSE_FDS) {
        close_inherited_fds();
    }

    match env_ptrs {
        Some(env) => {
            libc::execve(argv_ptrs[0], argv_ptrs.as_ptr(), env.as_ptr());
        }
        None => {
            libc::execvp(argv_ptrs[0], argv_ptrs.as_ptr());
        }
    }
    fail("exec");
}

/// Reset every catchable disposition to SIG_DFL and clear the signal mask.
///
/// # Safety
///
/// Child-only; relies on async-signal-safe calls.
unsafe fn restore_default_signals() {
    // Covers every signal number the platforms we target define.
    const MAX_SIGNO: libc::c_int = 64;
    for signo in 1..=MAX_SIGNO {
        // SIGKILL/SIGSTOP reject SIG_DFL; errors here are irrelevant.
        let _ = libc::signal(signo, libc::SIG_DFL);
    }
    let mut set: libc::sigset_t = std::mem::zeroed();
    libc::sigemptyset(&mut set);
    libc::sigprocmask(libc::SIG_SETMASK, &set, ptr::null_mut());
}

/// Close every descriptor above stderr the child inherited.
///
/// # Safety
///
/// Child-only; must run after the standard streams are wired.
unsafe fn close_inherited_fds() {
    let max_fd = libc::sysconf(libc::_SC_OPEN_MAX);
    let upper = if max_fd > 3 { max_fd as RawFd } else { 1024 };
    for fd in 3..upper {
        let _ = libc::close(fd);
    }
}

/// Mark a descriptor close-on-exec so it cannot leak across exec boundaries.
pub(crate) fn set_cloexec(fd: RawFd) -> Result<()> {
    // SAFETY: fcntl on a descriptor we created; no pointers involved.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(PopenError::last_os("fcntl(F_GETFD) failed"));
    }
    // SAFETY: as above.
    if unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) } < 0 {
        return Err(PopenError::last_os("fcntl(F_SETFD, FD_CLOEXEC) failed"));
    }
    Ok(())
}

/// Configure a parent-kept pipe end for non-blocking I/O.
pub(crate) fn set_nonblocking(fd: RawFd) -> Result<()> {
    // SAFETY: fcntl on a descriptor we created; no pointers involved.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
    if flags < 0 {
        return Err(PopenError::last_os("fcntl(F_GETFL) failed"));
    }
    // SAFETY: as above.
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(PopenError::last_os("fcntl(F_SETFL, O_NONBLOCK) failed"));
    }
    Ok(())
}

/// Close a descriptor while ignoring errors.
///
/// # Safety
///
/// `fd` must be a descriptor owned by the caller, or -1 to ignore.
pub(crate) unsafe fn close_fd(fd: RawFd) {
    if fd >= 0 {
        let _ = libc::close(fd);
    }
}
