//! Scripted snapshot provider for engine tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::collector::ProcessSource;
use crate::error::CollectError;
use crate::process::{Pid, ProcessRecord};

#[derive(Debug, Default)]
struct Script {
    processes: Vec<ProcessRecord>,
    logins: HashMap<String, u32>,
    fail: bool,
    calls: usize,
}

/// Serves whatever process list the test last installed.
///
/// Clones share state, so a test keeps one handle and mutates the "system"
/// while the Monitor owns another.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    script: Arc<Mutex<Script>>,
}

impl StaticSource {
    pub fn new(processes: Vec<ProcessRecord>) -> Self {
        let source = Self::default();
        source.set(processes);
        source
    }

    fn with_script<R>(&self, f: impl FnOnce(&mut Script) -> R) -> R {
        let mut guard = self
            .script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    /// Replaces the whole process list.
    pub fn set(&self, processes: Vec<ProcessRecord>) {
        self.with_script(|s| s.processes = processes);
    }

    /// Adds or replaces the record for `record.pid`.
    pub fn upsert(&self, record: ProcessRecord) {
        self.with_script(|s| {
            s.processes.retain(|p| p.pid != record.pid);
            s.processes.push(record);
        });
    }

    pub fn remove(&self, pid: Pid) {
        self.with_script(|s| s.processes.retain(|p| p.pid != pid));
    }

    /// Applies `f` to the record of `pid`, if present.
    pub fn update(&self, pid: Pid, f: impl FnOnce(&mut ProcessRecord)) {
        self.with_script(|s| {
            if let Some(record) = s.processes.iter_mut().find(|p| p.pid == pid) {
                f(record);
            }
        });
    }

    pub fn add_login(&self, login: &str, uid: u32) {
        self.with_script(|s| {
            s.logins.insert(login.to_string(), uid);
        });
    }

    /// Makes subsequent `list_processes` calls fail.
    pub fn set_failing(&self, fail: bool) {
        self.with_script(|s| s.fail = fail);
    }

    /// Number of snapshots served so far.
    pub fn calls(&self) -> usize {
        self.with_script(|s| s.calls)
    }
}

impl ProcessSource for StaticSource {
    fn list_processes(&mut self) -> Result<Vec<ProcessRecord>, CollectError> {
        self.with_script(|s| {
            s.calls += 1;
            if s.fail {
                return Err(CollectError::Io(std::io::Error::other("scripted failure")));
            }
            Ok(s.processes.clone())
        })
    }

    fn lookup_uid(&self, login: &str) -> Option<u32> {
        self.with_script(|s| s.logins.get(login).copied())
    }
}
