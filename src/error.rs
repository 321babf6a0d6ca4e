//! Crate-wide error type so callers can tell misuse, OS failures, and deadlines apart.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PopenError {
    /// Malformed options or a stream selector the handle does not own.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An OS call failed; carries the originating errno.
    #[error("{context}: {source}")]
    System {
        context: String,
        #[source]
        source: io::Error,
    },

    /// The deadline elapsed before any data was transferred.
    #[error("operation timed out")]
    Timeout,

    /// The target process no longer exists.
    #[error("no such process")]
    NotFound,
}

impl PopenError {
    /// Capture `errno` from the syscall that just failed.
    pub(crate) fn last_os(context: impl Into<String>) -> Self {
        PopenError::System {
            context: context.into(),
            source: io::Error::last_os_error(),
        }
    }

    pub(crate) fn system(context: impl Into<String>, source: io::Error) -> Self {
        PopenError::System {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, PopenError>;
