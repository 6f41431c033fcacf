use std::convert::TryFrom;

use nix::sys::signal::Signal;

/// Low byte of a status word reporting a stopped child.
pub const STOPPED_MARKER: i32 = 0o177;

/// Child status returned to a parent by wait.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WaitStatus {
    Exited(i32),
    Stopped(Signal),
}

impl WaitStatus {
    // The bit layout of the status word is:
    //
    //   15                         8   7                     0
    //    +-------------------------+---+---------------------+
    //    |   exit_code / sig_no    |        0 / 0o177        |
    //    +-------------------------+---+---------------------+
    //
    // A low byte of `0o177` marks a stop by the signal in bits 15:8. A zero low byte
    // is a normal exit with the exit code in bits 15:8.
    pub fn encode(self) -> i32 {
        match self {
            WaitStatus::Exited(code) => (code & 0xff) << 8,
            WaitStatus::Stopped(signal) => STOPPED_MARKER | ((signal as i32) << 8),
        }
    }

    /// Decode a status word. Returns `None` for words this server never produces.
    pub fn parse(status: i32) -> Option<Self> {
        let low = status & 0xff;
        let high = (status >> 8) & 0xff;

        match low {
            0 => Some(WaitStatus::Exited(high)),
            STOPPED_MARKER => Signal::try_from(high).ok().map(WaitStatus::Stopped),
            _ => None,
        }
    }
}
