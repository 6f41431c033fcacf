//! Trace requests from debuggers, and stopping traced processes on signals.
//!
//! The protocol between a tracer and its traced child runs:
//!
//! 1. The child enables tracing for itself with [`Command::Ok`].
//! 2. A signal to the child stops it (see [`Pm::stop_proc()`]), or the parent stops it
//!    directly with [`Command::Stop`].
//! 3. The parent picks up the stop with wait.
//! 4. Only then may the parent read or write the child, resume or step it, or kill it
//!    with [`Command::Exit`].

use std::convert::TryFrom;
use std::ops::{Deref, DerefMut};

use nix::sys::signal::Signal;
use tracing::{debug, info, trace};

use crate::error::{Error, InvariantViolation, Result};
use crate::pm::{ExitCause, Host, Pm};
use crate::proc::{Pid, Process, RunState, Slot, StopStatus};
use crate::relay::Relay;
use crate::request::{Command, Outgoing, Reply, TraceRequest};
use crate::status::WaitStatus;

impl<R: Relay, H: Host> Pm<R, H> {
    /// Handle a trace request from `caller`.
    ///
    /// Resolves the sender's entry, as the server loop does for any message, then
    /// hands off to [`Pm::trace_from()`].
    pub fn do_trace(&mut self, caller: Pid, request: TraceRequest) -> Result<Reply> {
        let caller_slot = self.table.find_proc(caller).ok_or(Error::NoSuchProcess { pid: caller })?;

        self.trace_from(caller_slot, request)
    }

    /// Handle a trace request from the process in `caller_slot`.
    ///
    /// The target pid is looked up at most once. A request fails at its first
    /// failing step; no state is changed after that point, but nothing done before
    /// it is rolled back.
    pub fn trace_from(&mut self, caller_slot: Slot, request: TraceRequest) -> Result<Reply> {
        let TraceRequest { command, pid, addr, mut data } = request;
        let caller = self.table[caller_slot].pid();
        debug!(caller = caller.as_raw(), pid = pid.as_raw(), ?command, addr, data, "trace request");

        // Made by the child of the debugger on its own behalf, before it execs.
        if command == Command::Ok {
            self.table[caller_slot].set_traced(true);
            info!(pid = caller.as_raw(), "tracing enabled");
            return Ok(Reply::Value(0));
        }

        if command.is_privileged() {
            if !self.table[caller_slot].is_superuser() {
                return Err(Error::PermissionDenied { command });
            }

            let child = self.find_tracee(pid)?;
            self.forward(command, child, addr, &mut data)?;

            return Ok(Reply::Value(data));
        }

        // Everything else is made by the debugger to control its child. Not being the
        // parent is indistinguishable from the child not existing.
        let child = self.find_tracee(pid)?;

        if self.table[child].parent() != caller {
            return Err(Error::NoSuchProcess { pid });
        }

        if command == Command::Stop {
            self.forward(Command::Stop, child, 0, &mut 0)?;
            self.table[child].set_state(RunState::Stopped(StopStatus::Acknowledged));
            debug!(pid = pid.as_raw(), "stopped by tracer");

            return Ok(Reply::Value(0));
        }

        // The child must be stopped, and the parent must have waited for it.
        if !self.table[child].is_stop_acknowledged() {
            return Err(Error::NoSuchProcess { pid });
        }

        match command {
            Command::Exit => {
                self.exit_proc(child, data as i32, ExitCause::Traced, Some(caller));

                // Replied to by `exit_complete()`.
                return Ok(Reply::Deferred);
            },
            Command::Resume | Command::Step => {
                if let Some(signo) = resume_signal(data)? {
                    debug!(pid = pid.as_raw(), signo, "delivering signal on resume");

                    let mut untraced = Untraced::new(&mut self.table[child]);
                    self.host.deliver_signal(&mut untraced, signo);
                }

                self.table[child].set_state(RunState::Running);
            },
            _ => {},
        }

        self.forward(command, child, addr, &mut data)?;

        Ok(Reply::Value(data))
    }

    /// Stop the traced process in `slot` instead of delivering `signal` to it.
    ///
    /// If the parent is blocked in wait it is woken with a stop status; otherwise the
    /// stop is left pending for the parent's next wait.
    pub fn stop_proc(&mut self, slot: Slot, signal: Signal) -> std::result::Result<(), InvariantViolation> {
        let proc = &self.table[slot];
        let pid = proc.pid();
        let endpoint = proc.endpoint();
        let parent = proc.parent();

        self.relay
            .trace(Command::Stop, endpoint, 0, &mut 0)
            .map_err(|source| InvariantViolation { pid, signal, source })?;

        let waiting = self.table.find_proc(parent).filter(|&p| self.table[p].is_waiting());

        if let Some(parent_slot) = waiting {
            debug!(pid = pid.as_raw(), parent = parent.as_raw(), %signal, "waking parent for stop");

            self.table[parent_slot].set_waiting(false);
            self.table[slot].set_state(RunState::Stopped(StopStatus::Acknowledged));

            let status = WaitStatus::Stopped(signal).encode();
            self.outbox.push_back(Outgoing { to: parent, result: Ok(Reply::Wait { pid, status }) });
        } else {
            debug!(pid = pid.as_raw(), %signal, "stop pending pickup");

            self.table[slot].set_state(RunState::Stopped(StopStatus::Pending(signal)));
        }

        Ok(())
    }

    // Resolve `pid` as the target of a trace request.
    fn find_tracee(&self, pid: Pid) -> Result<Slot> {
        match self.table.find_proc(pid) {
            // An exiting tracee already has its one reply outstanding.
            Some(slot) if !self.table[slot].is_exiting() => Ok(slot),
            _ => Err(Error::NoSuchProcess { pid }),
        }
    }

    fn forward(&mut self, command: Command, slot: Slot, addr: u64, data: &mut i64) -> Result<()> {
        let endpoint = self.table[slot].endpoint();
        trace!(?command, %endpoint, addr, "relaying");

        self.relay
            .trace(command, endpoint, addr, data)
            .map_err(|source| Error::Relay { command, endpoint, source })
    }
}

// Signal number to deliver on resume, real-time signals included. Zero means none.
fn resume_signal(data: i64) -> Result<Option<i32>> {
    match i32::try_from(data) {
        Ok(0) => Ok(None),
        Ok(signo) if (1..=libc::SIGRTMAX()).contains(&signo) => Ok(Some(signo)),
        _ => Err(Error::InvalidSignal { data }),
    }
}

// Clears the trace bit of a process while held, so a signal delivered through it is
// not turned back into a trace stop. The previous bit is restored on drop, including
// on unwind.
struct Untraced<'a> {
    proc: &'a mut Process,
    traced: bool,
}

impl<'a> Untraced<'a> {
    fn new(proc: &'a mut Process) -> Self {
        let traced = proc.is_traced();
        proc.set_traced(false);

        Self { proc, traced }
    }
}

impl Deref for Untraced<'_> {
    type Target = Process;

    fn deref(&self) -> &Process {
        &*self.proc
    }
}

impl DerefMut for Untraced<'_> {
    fn deref_mut(&mut self) -> &mut Process {
        &mut *self.proc
    }
}

impl Drop for Untraced<'_> {
    fn drop(&mut self) {
        self.proc.set_traced(self.traced);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resume_signal_range() {
        let max = libc::SIGRTMAX();

        assert!(matches!(resume_signal(0), Ok(None)));
        assert!(matches!(resume_signal(9), Ok(Some(9))));
        assert!(matches!(resume_signal(libc::SIGRTMIN() as i64), Ok(Some(signo)) if signo == libc::SIGRTMIN()));
        assert!(matches!(resume_signal(max as i64), Ok(Some(signo)) if signo == max));
        assert!(matches!(resume_signal(max as i64 + 1), Err(Error::InvalidSignal { .. })));
        assert!(matches!(resume_signal(-1), Err(Error::InvalidSignal { data: -1 })));
        assert!(matches!(resume_signal(1 << 40), Err(Error::InvalidSignal { .. })));
        assert!(matches!(resume_signal(1000), Err(Error::InvalidSignal { data: 1000 })));
    }

    #[test]
    fn test_untraced_restores_previous_bit() {
        use crate::proc::{Endpoint, Uid};

        let mut proc = Process::new(Pid::from_raw(10), Endpoint::from_raw(10), Pid::from_raw(5), Uid::from_raw(0));
        proc.set_traced(true);

        {
            let untraced = Untraced::new(&mut proc);
            assert!(!untraced.is_traced());
        }
        assert!(proc.is_traced());

        proc.set_traced(false);
        {
            let _untraced = Untraced::new(&mut proc);
        }
        assert!(!proc.is_traced());
    }
}
