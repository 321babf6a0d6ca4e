//! Typed spawn configuration handed to the spawner by the boundary layer.

use crate::error::{PopenError, Result};
use crate::flags::SpawnFlags;

const SHELL_PATH: &str = "/bin/sh";

/// Caller-supplied spawn configuration; immutable once passed to
/// [`crate::PopenHandle::spawn`].
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    /// Command and arguments. With [`SpawnFlags::SHELL`] the first element is
    /// the command string handed to `/bin/sh -c`; any further elements become
    /// the shell's positional parameters.
    pub argv: Vec<String>,
    /// `KEY=VALUE` entries. `None` inherits the parent environment;
    /// `Some(vec![])` starts the child with an empty environment.
    pub env: Option<Vec<String>>,
    /// Stream routing and child-setup behavior bits.
    pub flags: SpawnFlags,
}

impl SpawnOptions {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SpawnOptions {
            argv: argv.into_iter().map(Into::into).collect(),
            env: None,
            flags: SpawnFlags::empty(),
        }
    }

    #[must_use]
    pub fn flags(mut self, flags: SpawnFlags) -> Self {
        self.flags = flags;
        self
    }

    #[must_use]
    pub fn env<I, S>(mut self, env: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.env = Some(env.into_iter().map(Into::into).collect());
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.argv.is_empty() {
            return Err(PopenError::InvalidArgument("argv is empty".to_string()));
        }
        Ok(())
    }

    /// The argv actually executed: the caller's vector, or the shell
    /// indirection form wrapping it.
    pub(crate) fn effective_argv(&self) -> Vec<String> {
        if self.flags.contains(SpawnFlags::SHELL) {
            let mut argv = Vec::with_capacity(self.argv.len() + 2);
            argv.push(SHELL_PATH.to_string());
            argv.push("-c".to_string());
            argv.extend(self.argv.iter().cloned());
            argv
        } else {
            self.argv.clone()
        }
    }

    /// Diagnostic command line retained on the handle.
    pub(crate) fn command_line(&self) -> String {
        self.effective_argv().join(" ")
    }
}
