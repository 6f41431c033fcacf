//! Process manager state, and the entry points outside of trace requests that
//! interact with trace state: signals, wait, fork and exit.

use std::collections::VecDeque;

use nix::sys::signal::Signal;
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, InvariantViolation, Result};
use crate::proc::{Endpoint, Pid, ProcTable, Process, RunState, Slot, StopStatus, Uid};
use crate::relay::Relay;
use crate::request::{Message, Outgoing, Reply};
use crate::status::WaitStatus;

/// Process table size used by [`Pm::new()`].
pub const DEFAULT_NR_PROCS: usize = 256;

/// Why a process is being terminated.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExitCause {
    Normal,

    /// Killed by its tracer with an exit-while-traced request.
    Traced,
}

/// The rest of the process manager and system, as seen from trace handling.
pub trait Host {
    /// Deliver signal number `signo` to `proc` through the ordinary (non-tracing)
    /// signal path.
    ///
    /// `signo` is a raw number so that real-time signals, which [`Signal`] cannot
    /// represent, can be passed on from a resume request.
    fn deliver_signal(&mut self, proc: &mut Process, signo: i32);

    /// Begin tearing down `proc`.
    ///
    /// Completion must later be reported through [`Pm::exit_complete()`] (or a
    /// [`Message::ExitComplete`]).
    fn terminate(&mut self, proc: &mut Process, exit_code: i32, cause: ExitCause);
}

/// Process manager core: the process table plus its two collaborators.
///
/// Handles one message at a time, to completion. Replies that are not returned
/// directly from a call (woken waits, deferred exit replies) are queued, and
/// collected with [`Pm::take_replies()`].
#[derive(Debug)]
pub struct Pm<R, H> {
    pub(crate) table: ProcTable,
    pub(crate) relay: R,
    pub(crate) host: H,
    pub(crate) outbox: VecDeque<Outgoing>,
}

impl<R: Relay, H: Host> Pm<R, H> {
    pub fn new(relay: R, host: H) -> Self {
        Self::with_capacity(DEFAULT_NR_PROCS, relay, host)
    }

    pub fn with_capacity(nr_procs: usize, relay: R, host: H) -> Self {
        let table = ProcTable::with_capacity(nr_procs);
        let outbox = VecDeque::new();

        Self { table, relay, host, outbox }
    }

    pub fn table(&self) -> &ProcTable {
        &self.table
    }

    pub fn relay(&self) -> &R {
        &self.relay
    }

    pub fn relay_mut(&mut self) -> &mut R {
        &mut self.relay
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Live entry for `pid`, if any.
    pub fn process(&self, pid: Pid) -> Option<&Process> {
        self.table.find_proc(pid).map(|slot| &self.table[slot])
    }

    /// Drain replies queued since the last call, oldest first.
    pub fn take_replies(&mut self) -> Vec<Outgoing> {
        self.outbox.drain(..).collect()
    }

    /// Handle one inbound message to completion.
    ///
    /// # Panics
    ///
    /// If the kernel refuses to stop a traced process on signal delivery. The
    /// server can no longer trust its process table, and must not continue.
    pub fn handle(&mut self, message: Message) {
        trace!(?message, "handling message");

        match message {
            Message::Trace { caller, request } => {
                let result = self.do_trace(caller, request);
                self.reply(caller, result);
            },
            Message::Wait { caller } => {
                let result = self.do_wait(caller);
                self.reply(caller, result);
            },
            Message::Signal { pid, signal } => {
                let slot = match self.table.find_proc(pid) {
                    Some(slot) => slot,
                    None => {
                        debug!(pid = pid.as_raw(), %signal, "dropping signal for dead process");
                        return;
                    },
                };

                if let Err(violation) = self.sig_proc(slot, signal) {
                    error!(%violation, "process table diverged from kernel");
                    panic!("{}", violation);
                }
            },
            Message::ExitComplete { pid } => {
                if let Err(err) = self.exit_complete(pid) {
                    warn!(%err, "unexpected exit completion");
                }
            },
        }
    }

    fn reply(&mut self, to: Pid, result: Result<Reply>) {
        match result {
            Ok(Reply::Deferred) => {
                debug!(pid = to.as_raw(), "reply deferred");
            },
            result => self.outbox.push_back(Outgoing { to, result }),
        }
    }

    /// Create the entry for a new process `pid`, child of `parent`.
    ///
    /// A process that is its own parent is a root (e.g. `init`) and needs no live
    /// parent entry. `pid` must not name any entry still in the table, zombies
    /// included.
    pub fn do_fork(&mut self, parent: Pid, pid: Pid, endpoint: Endpoint, euid: Uid) -> Result<Slot> {
        if self.table.find_any(pid).is_some() {
            return Err(Error::PidInUse { pid });
        }

        if parent != pid && self.table.find_proc(parent).is_none() {
            return Err(Error::NoSuchProcess { pid: parent });
        }

        let proc = Process::new(pid, endpoint, parent, euid);
        let slot = self.table.insert(proc).map_err(|_| Error::TableFull)?;

        debug!(pid = pid.as_raw(), parent = parent.as_raw(), %endpoint, "new process");

        Ok(slot)
    }

    /// Begin ordinary termination of `pid`.
    pub fn do_exit(&mut self, pid: Pid, exit_code: i32) -> Result<()> {
        let slot = self.table.find_proc(pid).ok_or(Error::NoSuchProcess { pid })?;

        if self.table[slot].is_exiting() {
            return Err(Error::NoSuchProcess { pid });
        }

        self.exit_proc(slot, exit_code, ExitCause::Normal, None);

        Ok(())
    }

    pub(crate) fn exit_proc(&mut self, slot: Slot, exit_code: i32, cause: ExitCause, tracer: Option<Pid>) {
        let proc = &mut self.table[slot];
        info!(pid = proc.pid().as_raw(), exit_code, ?cause, "exiting");

        proc.set_traced(false);
        proc.set_waiting(false);
        proc.set_state(RunState::Exiting { exit_code, tracer });

        self.host.terminate(proc, exit_code, cause);
    }

    /// Finish termination of `pid`: it becomes a zombie, any deferred
    /// exit-while-traced reply is sent, and a waiting parent is woken.
    pub fn exit_complete(&mut self, pid: Pid) -> Result<()> {
        let slot = self.table.find_proc(pid).ok_or(Error::NoSuchProcess { pid })?;

        let (exit_code, tracer) = match self.table[slot].state() {
            RunState::Exiting { exit_code, tracer } => (exit_code, tracer),
            _ => return Err(Error::NoSuchProcess { pid }),
        };

        let status = WaitStatus::Exited(exit_code).encode();
        self.table[slot].set_state(RunState::Zombie { status });

        if let Some(tracer) = tracer {
            debug!(pid = pid.as_raw(), tracer = tracer.as_raw(), "completing deferred exit reply");
            self.outbox.push_back(Outgoing { to: tracer, result: Ok(Reply::Value(0)) });
        }

        let parent = self.table[slot].parent();
        let waiting = self.table.find_proc(parent).filter(|&p| self.table[p].is_waiting());

        if let Some(parent_slot) = waiting {
            self.table[parent_slot].set_waiting(false);
            self.table.remove(slot);
            self.outbox.push_back(Outgoing { to: parent, result: Ok(Reply::Wait { pid, status }) });
        }

        Ok(())
    }

    /// Wait for a status change of any child of `caller`.
    ///
    /// Picks up a pending trace stop (acknowledging it) or reaps a zombie. If
    /// neither is available, `caller` is marked waiting and the reply is deferred.
    pub fn do_wait(&mut self, caller: Pid) -> Result<Reply> {
        let caller_slot = self.table.find_proc(caller).ok_or(Error::NoSuchProcess { pid: caller })?;
        let children = self.table.children(caller);

        if children.is_empty() {
            return Err(Error::NoChildren { pid: caller });
        }

        for slot in children {
            let child = &mut self.table[slot];
            let pid = child.pid();

            match child.state() {
                RunState::Zombie { status } => {
                    debug!(pid = pid.as_raw(), "reaping zombie");
                    self.table.remove(slot);
                    return Ok(Reply::Wait { pid, status });
                },
                RunState::Stopped(StopStatus::Pending(signal)) => {
                    debug!(pid = pid.as_raw(), %signal, "stop picked up by parent");
                    child.set_state(RunState::Stopped(StopStatus::Acknowledged));
                    let status = WaitStatus::Stopped(signal).encode();
                    return Ok(Reply::Wait { pid, status });
                },
                _ => {},
            }
        }

        self.table[caller_slot].set_waiting(true);

        Ok(Reply::Deferred)
    }

    /// Raise `signal` against the process in `slot`.
    ///
    /// Signals to a traced process, other than `SIGKILL`, stop it for its tracer
    /// instead of being delivered.
    pub fn sig_proc(&mut self, slot: Slot, signal: Signal) -> std::result::Result<(), InvariantViolation> {
        let proc = &mut self.table[slot];

        if proc.is_traced() && signal != Signal::SIGKILL {
            return self.stop_proc(slot, signal);
        }

        self.host.deliver_signal(proc, signal as i32);

        Ok(())
    }
}
