//! Inbound messages and outbound replies.

use nix::sys::signal::Signal;

use crate::error::Result;
use crate::proc::Pid;

/// Trace command codes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Command {
    /// Stop the process.
    Stop,

    /// Enable tracing by the parent for the calling process.
    Ok,

    /// Read a word of instruction space.
    GetIns,

    /// Read a word of data space.
    GetData,

    /// Read a word of the process's kernel-side user area.
    GetUser,

    /// Write a word of instruction space.
    SetIns,

    /// Write a word of data space.
    SetData,

    /// Write a word of the user area.
    SetUser,

    /// Resume execution, optionally delivering a signal first.
    Resume,

    /// Terminate the traced process.
    Exit,

    /// Resume for a single instruction.
    Step,

    /// Superuser only: read a byte of instruction space of any process.
    ReadBIns,

    /// Superuser only: write a byte of instruction space of any process.
    WriteBIns,

    /// Unrecognized code, passed through to the relay.
    Other(i32),
}

impl Command {
    pub fn from_raw(code: i32) -> Self {
        match code {
            -1 => Command::Stop,
            0 => Command::Ok,
            1 => Command::GetIns,
            2 => Command::GetData,
            3 => Command::GetUser,
            4 => Command::SetIns,
            5 => Command::SetData,
            6 => Command::SetUser,
            7 => Command::Resume,
            8 => Command::Exit,
            9 => Command::Step,
            10 => Command::ReadBIns,
            11 => Command::WriteBIns,
            code => Command::Other(code),
        }
    }

    pub fn as_raw(self) -> i32 {
        match self {
            Command::Stop => -1,
            Command::Ok => 0,
            Command::GetIns => 1,
            Command::GetData => 2,
            Command::GetUser => 3,
            Command::SetIns => 4,
            Command::SetData => 5,
            Command::SetUser => 6,
            Command::Resume => 7,
            Command::Exit => 8,
            Command::Step => 9,
            Command::ReadBIns => 10,
            Command::WriteBIns => 11,
            Command::Other(code) => code,
        }
    }

    /// Raw instruction-space access, open to the superuser regardless of parentage.
    pub fn is_privileged(self) -> bool {
        matches!(self, Command::ReadBIns | Command::WriteBIns)
    }
}

impl From<i32> for Command {
    fn from(code: i32) -> Self {
        Command::from_raw(code)
    }
}

/// A trace request as received from the calling process.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TraceRequest {
    pub command: Command,
    pub pid: Pid,
    pub addr: u64,
    pub data: i64,
}

impl TraceRequest {
    pub fn new(command: Command, pid: Pid) -> Self {
        Self { command, pid, addr: 0, data: 0 }
    }

    pub fn addr(mut self, addr: u64) -> Self {
        self.addr = addr;
        self
    }

    pub fn data(mut self, data: i64) -> Self {
        self.data = data;
        self
    }
}

/// Successful outcome of a request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Reply {
    /// Reply now with a value (the relay's data for read-style commands, else 0).
    Value(i64),

    /// Wait result: the child `pid` and its status word.
    Wait { pid: Pid, status: i32 },

    /// Reply withheld; it is produced later by a completion event.
    Deferred,
}

/// A reply ready to be sent.
#[derive(Debug)]
pub struct Outgoing {
    pub to: Pid,
    pub result: Result<Reply>,
}

/// One inbound event for the server loop.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Message {
    Trace { caller: Pid, request: TraceRequest },
    Wait { caller: Pid },

    /// Signal raised against `pid` by the rest of the process manager.
    Signal { pid: Pid, signal: Signal },

    /// The exit completion collaborator finished tearing down `pid`.
    ExitComplete { pid: Pid },
}
