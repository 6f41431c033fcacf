//! Process table entries and pid lookup.

use std::fmt;
use std::ops::{Index, IndexMut};

use nix::sys::signal::Signal;

pub use nix::unistd::{Pid, Uid};

/// Opaque handle used to address a process through the [`Relay`](crate::Relay).
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Endpoint(i32);

impl Endpoint {
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of an occupied entry in a [`ProcTable`].
///
/// Only valid until the entry is freed.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Slot(usize);

impl Slot {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Whether a stop has been seen by the tracer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StopStatus {
    // Stopped by `signal`, parent has not yet picked it up.
    Pending(Signal),

    // Parent picked up the stop via wait, or stopped the process itself.
    Acknowledged,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunState {
    Running,

    Stopped(StopStatus),

    /// Termination begun, completion not yet reported.
    ///
    /// If `tracer` is set, the tracer issued exit-while-traced and is owed a reply.
    Exiting { exit_code: i32, tracer: Option<Pid> },

    /// Terminated, waiting to be reaped by the parent.
    Zombie { status: i32 },
}

/// Process control entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Process {
    pid: Pid,
    endpoint: Endpoint,
    parent: Pid,
    euid: Uid,
    traced: bool,
    waiting: bool,
    state: RunState,
}

impl Process {
    /// New entry with no trace state.
    pub fn new(pid: Pid, endpoint: Endpoint, parent: Pid, euid: Uid) -> Self {
        Self {
            pid,
            endpoint,
            parent,
            euid,
            traced: false,
            waiting: false,
            state: RunState::Running,
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    pub fn parent(&self) -> Pid {
        self.parent
    }

    pub fn euid(&self) -> Uid {
        self.euid
    }

    pub fn is_superuser(&self) -> bool {
        self.euid.is_root()
    }

    pub fn is_traced(&self) -> bool {
        self.traced
    }

    pub fn set_traced(&mut self, traced: bool) {
        self.traced = traced;
    }

    /// True while blocked in a wait for child status.
    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    pub fn set_waiting(&mut self, waiting: bool) {
        self.waiting = waiting;
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn set_state(&mut self, state: RunState) {
        self.state = state;
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self.state, RunState::Stopped(_))
    }

    pub fn is_zombie(&self) -> bool {
        matches!(self.state, RunState::Zombie { .. })
    }

    pub fn is_exiting(&self) -> bool {
        matches!(self.state, RunState::Exiting { .. })
    }

    /// Stop signal awaiting pickup by the parent, if any.
    pub fn pending_signal(&self) -> Option<Signal> {
        match self.state {
            RunState::Stopped(StopStatus::Pending(signal)) => Some(signal),
            _ => None,
        }
    }

    /// Stopped, and the parent has already seen the stop.
    pub fn is_stop_acknowledged(&self) -> bool {
        self.state == RunState::Stopped(StopStatus::Acknowledged)
    }
}

/// Fixed-capacity arena of process entries.
#[derive(Clone, Debug, Default)]
pub struct ProcTable {
    slots: Vec<Option<Process>>,
}

impl ProcTable {
    pub fn with_capacity(nr_procs: usize) -> Self {
        let mut slots = Vec::with_capacity(nr_procs);
        slots.resize_with(nr_procs, || None);

        Self { slots }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Store `proc` in the first free slot, or hand it back if the table is full.
    pub fn insert(&mut self, proc: Process) -> std::result::Result<Slot, Process> {
        match self.slots.iter().position(Option::is_none) {
            Some(index) => {
                self.slots[index] = Some(proc);
                Ok(Slot(index))
            },
            None => Err(proc),
        }
    }

    pub fn remove(&mut self, slot: Slot) -> Option<Process> {
        self.slots.get_mut(slot.0).and_then(Option::take)
    }

    pub fn get(&self, slot: Slot) -> Option<&Process> {
        self.slots.get(slot.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, slot: Slot) -> Option<&mut Process> {
        self.slots.get_mut(slot.0).and_then(Option::as_mut)
    }

    /// Find the live (in use, not zombie) entry for `pid`.
    pub fn find_proc(&self, pid: Pid) -> Option<Slot> {
        self.iter()
            .find(|(_, proc)| proc.pid == pid && !proc.is_zombie())
            .map(|(slot, _)| slot)
    }

    /// Find the entry for `pid` in any state, zombies included.
    pub fn find_any(&self, pid: Pid) -> Option<Slot> {
        self.iter()
            .find(|(_, proc)| proc.pid == pid)
            .map(|(slot, _)| slot)
    }

    /// Occupied slots in table order.
    pub fn iter(&self) -> impl Iterator<Item = (Slot, &Process)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, proc)| proc.as_ref().map(|p| (Slot(index), p)))
    }

    /// Slots of every entry whose parent is `parent`.
    pub fn children(&self, parent: Pid) -> Vec<Slot> {
        self.iter()
            .filter(|(_, proc)| proc.parent == parent && proc.pid != parent)
            .map(|(slot, _)| slot)
            .collect()
    }
}

impl Index<Slot> for ProcTable {
    type Output = Process;

    fn index(&self, slot: Slot) -> &Process {
        match self.get(slot) {
            Some(proc) => proc,
            None => panic!("stale process slot {}", slot.0),
        }
    }
}

impl IndexMut<Slot> for ProcTable {
    fn index_mut(&mut self, slot: Slot) -> &mut Process {
        match self.get_mut(slot) {
            Some(proc) => proc,
            None => panic!("stale process slot {}", slot.0),
        }
    }
}
