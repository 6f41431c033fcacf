#![allow(dead_code)]

use nix::errno::Errno;
use pm_trace::{Command, Endpoint, ExitCause, Host, Pid, Pm, Process, Relay, Uid};

#[allow(unused)]
macro_rules! pid {
    ($raw: expr) => {
        pm_trace::Pid::from_raw($raw)
    };
}

/// Build a trace request with a readable, test-friendly syntax.
#[allow(unused)]
macro_rules! request {
    ($command: ident, $raw_pid: expr) => {
        pm_trace::TraceRequest::new(pm_trace::Command::$command, pm_trace::Pid::from_raw($raw_pid))
    };
    ($command: ident, $raw_pid: expr, addr = $addr: expr, data = $data: expr) => {
        request!($command, $raw_pid).addr($addr).data($data)
    };
    ($command: ident, $raw_pid: expr, data = $data: expr) => {
        request!($command, $raw_pid).data($data)
    };
}

pub const INIT: i32 = 1;
pub const ROOT_SHELL: i32 = 2;
pub const DEBUGGER: i32 = 5;
pub const STRANGER: i32 = 7;
pub const TRACEE: i32 = 10;

/// One call made to the relay.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RelayCall {
    pub command: Command,
    pub endpoint: Endpoint,
    pub addr: u64,
    pub data: i64,
}

/// Relay that records calls, and can be told to fail or to return a value.
#[derive(Debug, Default)]
pub struct RecordingRelay {
    pub calls: Vec<RelayCall>,
    pub fail: Option<Errno>,
    pub value: Option<i64>,
}

impl Relay for RecordingRelay {
    fn trace(&mut self, command: Command, endpoint: Endpoint, addr: u64, data: &mut i64) -> nix::Result<()> {
        self.calls.push(RelayCall { command, endpoint, addr, data: *data });

        if let Some(errno) = self.fail {
            return Err(errno);
        }

        if let Some(value) = self.value {
            *data = value;
        }

        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Delivered {
    pub pid: Pid,
    pub signo: i32,

    /// Trace bit as seen at delivery time.
    pub traced: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Terminated {
    pub pid: Pid,
    pub exit_code: i32,
    pub cause: ExitCause,
}

/// Host that records calls. With `panic_on_deliver` set, signal delivery panics
/// after recording.
#[derive(Debug, Default)]
pub struct RecordingHost {
    pub delivered: Vec<Delivered>,
    pub terminated: Vec<Terminated>,
    pub panic_on_deliver: bool,
}

impl Host for RecordingHost {
    fn deliver_signal(&mut self, proc: &mut Process, signo: i32) {
        self.delivered.push(Delivered { pid: proc.pid(), signo, traced: proc.is_traced() });

        if self.panic_on_deliver {
            panic!("signal delivery failed for pid = {}", proc.pid());
        }
    }

    fn terminate(&mut self, proc: &mut Process, exit_code: i32, cause: ExitCause) {
        self.terminated.push(Terminated { pid: proc.pid(), exit_code, cause });
    }
}

pub type TestPm = Pm<RecordingRelay, RecordingHost>;

#[allow(unused)]
pub fn endpoint(raw_pid: i32) -> Endpoint {
    Endpoint::from_raw(raw_pid + 1000)
}

/// Process table with `init`, a root shell, a debugger with an untraced child, and an
/// unrelated process.
#[allow(unused)]
pub fn pm() -> anyhow::Result<TestPm> {
    let mut pm = Pm::with_capacity(16, RecordingRelay::default(), RecordingHost::default());

    let user = Uid::from_raw(1000);
    let root = Uid::from_raw(0);

    pm.do_fork(pid!(INIT), pid!(INIT), endpoint(INIT), root)?;
    pm.do_fork(pid!(INIT), pid!(ROOT_SHELL), endpoint(ROOT_SHELL), root)?;
    pm.do_fork(pid!(INIT), pid!(DEBUGGER), endpoint(DEBUGGER), user)?;
    pm.do_fork(pid!(INIT), pid!(STRANGER), endpoint(STRANGER), user)?;
    pm.do_fork(pid!(DEBUGGER), pid!(TRACEE), endpoint(TRACEE), user)?;

    Ok(pm)
}

/// As [`pm()`], with the debugger's child traced and running.
#[allow(unused)]
pub fn traced_pm() -> anyhow::Result<TestPm> {
    let mut pm = pm()?;
    pm.do_trace(pid!(TRACEE), request!(Ok, 0))?;

    Ok(pm)
}

/// As [`traced_pm()`], with the tracee stopped by its parent. No relay calls recorded.
#[allow(unused)]
pub fn stopped_pm() -> anyhow::Result<TestPm> {
    let mut pm = traced_pm()?;
    pm.do_trace(pid!(DEBUGGER), request!(Stop, TRACEE))?;
    pm.relay_mut().calls.clear();

    Ok(pm)
}

#[allow(unused)]
pub fn tracee(pm: &TestPm) -> &Process {
    match pm.process(pid!(TRACEE)) {
        Some(proc) => proc,
        None => panic!("tracee not in process table"),
    }
}

#[allow(unused)]
pub fn errno<T: std::fmt::Debug>(result: pm_trace::Result<T>) -> Errno {
    result.unwrap_err().errno()
}
