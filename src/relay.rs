//! Kernel-side relay for low-level trace actions.

use nix::{
    errno::Errno,
    sys::{
        ptrace,
        signal::{kill, Signal},
    },
};
use tracing::trace;

use crate::proc::{Endpoint, Pid};
use crate::request::Command;

/// Performs the actual stop/resume and memory or register access on a process.
///
/// `data` is both input (value to write) and output (value read) for the command.
pub trait Relay {
    fn trace(&mut self, command: Command, endpoint: Endpoint, addr: u64, data: &mut i64) -> nix::Result<()>;
}

/// Relay backed by Linux `ptrace(2)`, for endpoints that are host pids.
///
/// The host process must already be a ptrace tracee of this process for anything but
/// [`Command::Stop`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PtraceRelay;

impl PtraceRelay {
    pub fn new() -> Self {
        Self
    }
}

impl Relay for PtraceRelay {
    fn trace(&mut self, command: Command, endpoint: Endpoint, addr: u64, data: &mut i64) -> nix::Result<()> {
        let pid = Pid::from_raw(endpoint.as_raw());
        trace!(pid = pid.as_raw(), ?command, addr, "ptrace relay");

        match command {
            Command::Stop => kill(pid, Signal::SIGSTOP),
            // Any resume signal was already delivered by the process manager.
            Command::Resume => ptrace::cont(pid, None::<Signal>),
            Command::Step => ptrace::step(pid, None::<Signal>),
            Command::GetIns | Command::ReadBIns => {
                *data = peek(libc::PTRACE_PEEKTEXT, pid, addr)?;
                Ok(())
            },
            Command::GetData => {
                *data = peek(libc::PTRACE_PEEKDATA, pid, addr)?;
                Ok(())
            },
            Command::GetUser => {
                *data = peek(libc::PTRACE_PEEKUSER, pid, addr)?;
                Ok(())
            },
            Command::SetIns | Command::WriteBIns => poke(libc::PTRACE_POKETEXT, pid, addr, *data),
            Command::SetData => poke(libc::PTRACE_POKEDATA, pid, addr, *data),
            Command::SetUser => poke(libc::PTRACE_POKEUSER, pid, addr, *data),
            Command::Ok | Command::Exit | Command::Other(_) => Err(Errno::EINVAL),
        }
    }
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
type Request = libc::c_uint;

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
type Request = libc::c_int;

fn peek(request: Request, pid: Pid, addr: u64) -> nix::Result<i64> {
    // SAFETY: PEEK requests read from the tracee, and never dereference `addr` in
    // this process.
    let word = unsafe {
        // A peeked word may legitimately be -1, so errno must be checked explicitly.
        Errno::clear();

        libc::ptrace(
            request,
            pid.as_raw(),
            addr as *mut libc::c_void,
            std::ptr::null_mut::<libc::c_void>(),
        )
    };

    if word == -1 {
        match Errno::last() {
            Errno::UnknownErrno => {},
            errno => return Err(errno),
        }
    }

    Ok(word as i64)
}

fn poke(request: Request, pid: Pid, addr: u64, data: i64) -> nix::Result<()> {
    // SAFETY: POKE requests write into the tracee; `data` is passed by value.
    let res = unsafe {
        libc::ptrace(
            request,
            pid.as_raw(),
            addr as *mut libc::c_void,
            data as *mut libc::c_void,
        )
    };

    Errno::result(res).map(drop)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Far above any `pid_max`.
    const NO_SUCH_PID: i32 = i32::MAX;

    #[test]
    fn test_stop_nonexistent_endpoint_is_esrch() {
        let mut relay = PtraceRelay::new();
        let mut data = 0;

        let err = relay.trace(Command::Stop, Endpoint::from_raw(NO_SUCH_PID), 0, &mut data).unwrap_err();

        assert_eq!(err, Errno::ESRCH);
    }

    #[test]
    fn test_peek_untraced_is_esrch() {
        let mut relay = PtraceRelay::new();
        let mut data = 7;

        let err = relay.trace(Command::GetData, Endpoint::from_raw(NO_SUCH_PID), 0, &mut data).unwrap_err();

        assert_eq!(err, Errno::ESRCH);
        assert_eq!(data, 7);
    }

    #[test]
    fn test_commands_handled_locally_are_rejected() {
        let mut relay = PtraceRelay::new();
        let mut data = 0;

        for command in [Command::Ok, Command::Exit, Command::Other(42)] {
            let err = relay.trace(command, Endpoint::from_raw(NO_SUCH_PID), 0, &mut data).unwrap_err();
            assert_eq!(err, Errno::EINVAL);
        }
    }
}
