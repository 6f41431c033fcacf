use nix::errno::Errno;

use crate::proc::{Endpoint, Pid};
use crate::request::Command;


pub type Result<T> = std::result::Result<T, Error>;

/// Request-scoped failure, reported back to the process that made the request.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Permission denied for trace command = {command:?}")]
    PermissionDenied { command: Command },

    #[error("No such process = {pid}")]
    NoSuchProcess { pid: Pid },

    #[error("Signal number out of range = {data}")]
    InvalidSignal { data: i64 },

    #[error("Relay of {command:?} to endpoint = {endpoint} failed")]
    Relay {
        command: Command,
        endpoint: Endpoint,
        source: Errno,
    },

    #[error("No children to wait on for pid = {pid}")]
    NoChildren { pid: Pid },

    #[error("Process table full")]
    TableFull,

    #[error("Pid already in use = {pid}")]
    PidInUse { pid: Pid },
}

impl Error {
    /// Status code sent to the requesting process in place of a reply value.
    ///
    /// Relay failures carry the relay's own errno unchanged.
    pub fn errno(&self) -> Errno {
        match self {
            Error::PermissionDenied { .. } => Errno::EPERM,
            Error::NoSuchProcess { .. } => Errno::ESRCH,
            Error::InvalidSignal { .. } => Errno::EIO,
            Error::Relay { source, .. } => *source,
            Error::NoChildren { .. } => Errno::ECHILD,
            Error::TableFull | Error::PidInUse { .. } => Errno::EAGAIN,
        }
    }
}

/// The kernel refused to stop a process this server believes is traced and running.
///
/// Deliberately not convertible into [`Error`]: the server's view of process state no
/// longer matches the kernel's, so there is no caller to report it to.
#[derive(thiserror::Error, Debug)]
#[error("Kernel refused to stop traced pid = {pid} for signal {signal}")]
pub struct InvariantViolation {
    pub pid: Pid,
    pub signal: nix::sys::signal::Signal,
    pub source: Errno,
}
