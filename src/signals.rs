//! Static signal-name lookup table plus the delivery helper used at teardown.

use std::io;
use std::sync::OnceLock;

/// Immutable mapping from symbolic signal name to platform number, built once.
///
/// Aliases (`SIGIOT`, `SIGPOLL`) appear after their canonical entries so that
/// number-to-name lookups prefer the canonical spelling.
pub fn signal_table() -> &'static [(&'static str, i32)] {
    static TABLE: OnceLock<Vec<(&'static str, i32)>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = vec![
            ("SIGHUP", libc::SIGHUP),
            ("SIGINT", libc::SIGINT),
            ("SIGQUIT", libc::SIGQUIT),
            ("SIGILL", libc::SIGILL),
            ("SIGTRAP", libc::SIGTRAP),
            ("SIGABRT", libc::SIGABRT),
            ("SIGBUS", libc::SIGBUS),
            ("SIGFPE", libc::SIGFPE),
            ("SIGKILL", libc::SIGKILL),
            ("SIGUSR1", libc::SIGUSR1),
            ("SIGSEGV", libc::SIGSEGV),
            ("SIGUSR2", libc::SIGUSR2),
            ("SIGPIPE", libc::SIGPIPE),
            ("SIGALRM", libc::SIGALRM),
            ("SIGTERM", libc::SIGTERM),
            ("SIGCHLD", libc::SIGCHLD),
            ("SIGCONT", libc::SIGCONT),
            ("SIGSTOP", libc::SIGSTOP),
            ("SIGTSTP", libc::SIGTSTP),
            ("SIGTTIN", libc::SIGTTIN),
            ("SIGTTOU", libc::SIGTTOU),
            ("SIGURG", libc::SIGURG),
            ("SIGXCPU", libc::SIGXCPU),
            ("SIGXFSZ", libc::SIGXFSZ),
            ("SIGVTALRM", libc::SIGVTALRM),
            ("SIGPROF", libc::SIGPROF),
            ("SIGWINCH", libc::SIGWINCH),
            ("SIGIO", libc::SIGIO),
            ("SIGSYS", libc::SIGSYS),
        ];
        #[cfg(target_os = "linux")]
        table.extend([
            ("SIGSTKFLT", libc::SIGSTKFLT),
            ("SIGPWR", libc::SIGPWR),
            ("SIGPOLL", libc::SIGPOLL),
            ("SIGIOT", libc::SIGIOT),
        ]);
        table
    })
}

/// Translate a symbolic name such as `"SIGTERM"` into its platform number.
pub fn signal_by_name(name: &str) -> Option<i32> {
    signal_table()
        .iter()
        .find(|(signame, _)| *signame == name)
        .map(|(_, signo)| *signo)
}

/// Translate a platform signal number into its canonical symbolic name.
pub fn signal_name(signo: i32) -> Option<&'static str> {
    signal_table()
        .iter()
        .find(|(_, number)| *number == signo)
        .map(|(signame, _)| *signame)
}

/// Send a signal to the child, addressing the process group when the child
/// leads one (SETSID spawns) and falling back to the bare pid.
///
/// Returns the raw OS error so callers can map `ESRCH` to their own
/// missing-process error.
pub(crate) fn deliver_signal(pid: i32, signo: i32, to_group: bool) -> io::Result<()> {
    if pid <= 0 {
        return Err(io::Error::from_raw_os_error(libc::ESRCH));
    }

    // SAFETY: kill only takes plain integer arguments; errno is read
    // immediately after each call on this thread.
    unsafe {
        if to_group && libc::kill(-pid, signo) == 0 {
            return Ok(());
        }
        if libc::kill(pid, signo) == 0 {
            return Ok(());
        }
        Err(io::Error::last_os_error())
    }
}

pub(crate) fn is_no_such_process(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(code) if code == libc::ESRCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_nonempty_and_stable() {
        let first = signal_table();
        let second = signal_table();
        assert!(!first.is_empty());
        assert_eq!(first.as_ptr(), second.as_ptr());
    }

    #[test]
    fn lookup_by_name_matches_libc() {
        assert_eq!(signal_by_name("SIGKILL"), Some(libc::SIGKILL));
        assert_eq!(signal_by_name("SIGTERM"), Some(libc::SIGTERM));
        assert_eq!(signal_by_name("SIGRTMIN"), None);
    }

    #[test]
    fn lookup_by_number_prefers_canonical_name() {
        assert_eq!(signal_name(libc::SIGTERM), Some("SIGTERM"));
        assert_eq!(signal_name(0), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn alias_resolves_to_canonical_name_by_number() {
        // SIGIOT aliases SIGABRT; number lookup must prefer the canonical
        // entry, name lookup still resolves the alias.
        assert_eq!(signal_name(libc::SIGIOT), Some("SIGABRT"));
        assert_eq!(signal_by_name("SIGIOT"), Some(libc::SIGABRT));
    }

    #[test]
    fn deliver_signal_rejects_non_positive_pid() {
        let err = deliver_signal(0, libc::SIGTERM, false).expect_err("pid 0 refused");
        assert!(is_no_such_process(&err));
        let err = deliver_signal(-1, libc::SIGTERM, true).expect_err("pid -1 refused");
        assert!(is_no_such_process(&err));
    }

    #[test]
    fn deliver_signal_probe_to_self_succeeds() {
        // SAFETY: getpid has no preconditions.
        let pid = unsafe { libc::getpid() };
        // Signal 0 probes existence without delivering anything.
        deliver_signal(pid, 0, false).expect("self probe");
    }
}
