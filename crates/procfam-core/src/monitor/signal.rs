//! Signal delivery.

use std::sync::{Arc, Mutex};

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid as NixPid;

use crate::process::Pid;

/// Delivers a signal number to a process.
pub trait Signaller {
    fn send(&self, pid: Pid, signal: i32) -> nix::Result<()>;
}

/// Sends real signals with `kill(2)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct KillSignaller;

impl Signaller for KillSignaller {
    fn send(&self, pid: Pid, signal: i32) -> nix::Result<()> {
        kill(NixPid::from_raw(pid), Signal::try_from(signal)?)
    }
}

/// Records every delivery instead of sending it. Clones share the log.
#[derive(Debug, Clone, Default)]
pub struct RecordingSignaller {
    sent: Arc<Mutex<Vec<(Pid, i32)>>>,
}

impl RecordingSignaller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(Pid, i32)> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }
}

impl Signaller for RecordingSignaller {
    fn send(&self, pid: Pid, signal: i32) -> nix::Result<()> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((pid, signal));
        }
        Ok(())
    }
}
