//! Spawn flag bitmask and the per-stream routing decisions derived from it.

use bitflags::bitflags;

use crate::error::{PopenError, Result};

bitflags! {
    /// Options accepted by [`crate::PopenHandle::spawn`].
    ///
    /// The three standard streams are routed independently: a pipe bit keeps
    /// one end in the parent, a devnull bit binds the child's descriptor to
    /// `/dev/null`, a close bit closes it in the child. A stream with no bit
    /// set inherits the parent's descriptor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SpawnFlags: u32 {
        /// Create a pipe for the child's stdin; the parent keeps the write end.
        const STDIN = 1 << 0;
        /// Create a pipe for the child's stdout; the parent keeps the read end.
        const STDOUT = 1 << 1;
        /// Create a pipe for the child's stderr; the parent keeps the read end.
        const STDERR = 1 << 2;

        /// Bind the child's stdin to `/dev/null`.
        const STDIN_DEVNULL = 1 << 3;
        /// Bind the child's stdout to `/dev/null`.
        const STDOUT_DEVNULL = 1 << 4;
        /// Bind the child's stderr to `/dev/null`.
        const STDERR_DEVNULL = 1 << 5;

        /// Close the child's stdin.
        const STDIN_CLOSE = 1 << 6;
        /// Close the child's stdout.
        const STDOUT_CLOSE = 1 << 7;
        /// Close the child's stderr.
        const STDERR_CLOSE = 1 << 8;

        /// Run the command through `/bin/sh -c`.
        const SHELL = 1 << 9;
        /// Call `setsid()` in the child before exec.
        const SETSID = 1 << 10;
        /// Close every inherited descriptor above stderr in the child.
        const CLOSE_FDS = 1 << 11;
        /// Reset signal dispositions and the signal mask in the child.
        const RESTORE_SIGNALS = 1 << 12;
    }
}

/// Identifies which standard stream an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdStream {
    Stdin,
    Stdout,
    Stderr,
}

impl StdStream {
    pub(crate) const ALL: [StdStream; 3] = [StdStream::Stdin, StdStream::Stdout, StdStream::Stderr];

    /// Slot in a `[_; 3]` stream table; equals the child-side fd number.
    pub(crate) fn index(self) -> usize {
        match self {
            StdStream::Stdin => 0,
            StdStream::Stdout => 1,
            StdStream::Stderr => 2,
        }
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            StdStream::Stdin => "stdin",
            StdStream::Stdout => "stdout",
            StdStream::Stderr => "stderr",
        }
    }

    fn pipe_bit(self) -> SpawnFlags {
        match self {
            StdStream::Stdin => SpawnFlags::STDIN,
            StdStream::Stdout => SpawnFlags::STDOUT,
            StdStream::Stderr => SpawnFlags::STDERR,
        }
    }

    fn devnull_bit(self) -> SpawnFlags {
        match self {
            StdStream::Stdin => SpawnFlags::STDIN_DEVNULL,
            StdStream::Stdout => SpawnFlags::STDOUT_DEVNULL,
            StdStream::Stderr => SpawnFlags::STDERR_DEVNULL,
        }
    }

    fn close_bit(self) -> SpawnFlags {
        match self {
            StdStream::Stdin => SpawnFlags::STDIN_CLOSE,
            StdStream::Stdout => SpawnFlags::STDOUT_CLOSE,
            StdStream::Stderr => SpawnFlags::STDERR_CLOSE,
        }
    }
}

/// What the spawner does with one standard stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamAction {
    Pipe,
    DevNull,
    Close,
    Inherit,
}

/// Derive the routing decision for every stream, rejecting conflicting bits.
pub(crate) fn stream_actions(flags: SpawnFlags) -> Result<[StreamAction; 3]> {
    let mut actions = [StreamAction::Inherit; 3];
    for stream in StdStream::ALL {
        let pipe = flags.contains(stream.pipe_bit());
        let devnull = flags.contains(stream.devnull_bit());
        let close = flags.contains(stream.close_bit());
        let set = usize::from(pipe) + usize::from(devnull) + usize::from(close);
        if set > 1 {
            return Err(PopenError::InvalidArgument(format!(
                "conflicting routing flags for {}",
                stream.name()
            )));
        }
        actions[stream.index()] = if pipe {
            StreamAction::Pipe
        } else if devnull {
            StreamAction::DevNull
        } else if close {
            StreamAction::Close
        } else {
            StreamAction::Inherit
        };
    }
    Ok(actions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_flags_inherit_every_stream() {
        let actions = stream_actions(SpawnFlags::empty()).expect("no conflicts");
        assert_eq!(actions, [StreamAction::Inherit; 3]);
    }

    #[test]
    fn each_stream_routes_independently() {
        let flags = SpawnFlags::STDIN | SpawnFlags::STDOUT_DEVNULL | SpawnFlags::STDERR_CLOSE;
        let actions = stream_actions(flags).expect("no conflicts");
        assert_eq!(actions[0], StreamAction::Pipe);
        assert_eq!(actions[1], StreamAction::DevNull);
        assert_eq!(actions[2], StreamAction::Close);
    }

    #[test]
    fn process_bits_do_not_affect_routing() {
        let flags = SpawnFlags::SHELL
            | SpawnFlags::SETSID
            | SpawnFlags::CLOSE_FDS
            | SpawnFlags::RESTORE_SIGNALS;
        let actions = stream_actions(flags).expect("no conflicts");
        assert_eq!(actions, [StreamAction::Inherit; 3]);
    }

    #[test]
    fn conflicting_bits_for_one_stream_are_rejected() {
        let flags = SpawnFlags::STDOUT | SpawnFlags::STDOUT_DEVNULL;
        let err = stream_actions(flags).expect_err("conflict");
        assert!(err.to_string().contains("stdout"));
    }

    proptest! {
        #[test]
        fn routing_accepts_exactly_zero_or_one_bit_per_stream(bits in 0u32..(1 << 13)) {
            let flags = SpawnFlags::from_bits_truncate(bits);
            let conflict = StdStream::ALL.iter().any(|stream| {
                let set = usize::from(flags.contains(stream.pipe_bit()))
                    + usize::from(flags.contains(stream.devnull_bit()))
                    + usize::from(flags.contains(stream.close_bit()));
                set > 1
            });
            prop_assert_eq!(stream_actions(flags).is_err(), conflict);
        }
    }
}
