pub mod error;
pub mod pm;
pub mod proc;
pub mod relay;
pub mod request;
pub mod status;
mod trace;

pub use error::{Error, InvariantViolation, Result};
pub use pm::{ExitCause, Host, Pm, DEFAULT_NR_PROCS};
pub use proc::{Endpoint, Pid, ProcTable, Process, RunState, Slot, StopStatus, Uid};
pub use relay::{PtraceRelay, Relay};
pub use request::{Command, Message, Outgoing, Reply, TraceRequest};
pub use status::WaitStatus;

/// POSIX signal.
pub use nix::sys::signal::Signal;
