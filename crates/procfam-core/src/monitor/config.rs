use serde::{Deserialize, Serialize};

use crate::process::Pid;

/// Default allowed drift, in clock ticks of `/proc/[pid]/stat` starttime,
/// between two birthdays of one process.
pub const DEFAULT_BIRTHDAY_TOLERANCE: u64 = 2;

/// Engine settings fixed at construction time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Root process of the tree.
    pub root_pid: Pid,
    /// Looked up from the first snapshot when unset.
    pub root_birthday: Option<u64>,
    /// Seconds between proactive snapshots for the root family; `None` is infinite.
    pub max_snapshot_interval: Option<u64>,
    /// Treat the root process as the root family's watcher and fail when it exits.
    pub fatal_root_watcher: bool,
    /// Birthday drift accepted for one process, in the same clock ticks.
    pub birthday_tolerance: u64,
}

impl MonitorConfig {
    pub fn new(root_pid: Pid) -> Self {
        Self {
            root_pid,
            root_birthday: None,
            max_snapshot_interval: None,
            fatal_root_watcher: false,
            birthday_tolerance: DEFAULT_BIRTHDAY_TOLERANCE,
        }
    }

    pub fn with_root_birthday(mut self, birthday: u64) -> Self {
        self.root_birthday = Some(birthday);
        self
    }

    pub fn with_max_snapshot_interval(mut self, secs: Option<u64>) -> Self {
        self.max_snapshot_interval = secs;
        self
    }

    pub fn with_fatal_root_watcher(mut self, fatal: bool) -> Self {
        self.fatal_root_watcher = fatal;
        self
    }

    pub fn with_birthday_tolerance(mut self, tolerance: u64) -> Self {
        self.birthday_tolerance = tolerance;
        self
    }
}
