//! Child-process handles with configurable stream routing, deadline-bounded
//! pipe I/O, and deterministic teardown.
//!
//! [`PopenHandle::spawn`] forks and execs a child wired per [`SpawnFlags`],
//! returning an exclusively-owned handle. The handle exchanges data with the
//! child through non-blocking pipes under caller deadlines, tracks the
//! alive/exited/signaled state machine, and — via [`PopenHandle::delete`] or
//! `Drop` — guarantees the child is reaped and every owned descriptor is
//! closed exactly once.
//!
//! Unix only.

mod error;
mod flags;
mod handle;
mod io;
mod lock;
mod options;
mod signals;
mod spawn;

pub use error::{PopenError, Result};
pub use flags::{SpawnFlags, StdStream};
pub use handle::{HandleInfo, PopenHandle, State};
pub use options::SpawnOptions;
pub use signals::{signal_by_name, signal_name, signal_table};
