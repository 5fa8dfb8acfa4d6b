//! Snapshot record for a single OS process.

use serde::{Deserialize, Serialize};

use crate::marker::MarkerSet;

/// OS process id (`pid_t`).
pub type Pid = i32;

/// One process as seen by a single snapshot.
///
/// Memory sizes are in KiB, CPU times in seconds, rates per second.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub pid: Pid,
    pub ppid: Pid,
    /// Creation timestamp; on Linux the start time in clock ticks since boot.
    pub birthday: u64,
    pub uid: u32,
    /// Supplementary group ids.
    pub groups: Vec<u32>,
    /// cgroup v2 path, when known.
    pub cgroup: Option<String>,
    pub image_size: u64,
    pub rss: u64,
    pub user_time: u64,
    pub sys_time: u64,
    pub percent_cpu: f64,
    pub minor_fault_rate: f64,
    pub major_fault_rate: f64,
    pub markers: MarkerSet,
}

impl ProcessRecord {
    pub fn new(pid: Pid, ppid: Pid, birthday: u64) -> Self {
        Self {
            pid,
            ppid,
            birthday,
            ..Default::default()
        }
    }

    pub fn with_cpu(mut self, user_time: u64, sys_time: u64) -> Self {
        self.user_time = user_time;
        self.sys_time = sys_time;
        self
    }

    pub fn with_memory(mut self, image_size: u64, rss: u64) -> Self {
        self.image_size = image_size;
        self.rss = rss;
        self
    }

    pub fn with_uid(mut self, uid: u32) -> Self {
        self.uid = uid;
        self
    }

    pub fn with_groups(mut self, groups: Vec<u32>) -> Self {
        self.groups = groups;
        self
    }

    pub fn with_cgroup(mut self, cgroup: impl Into<String>) -> Self {
        self.cgroup = Some(cgroup.into());
        self
    }

    pub fn with_markers(mut self, markers: MarkerSet) -> Self {
        self.markers = markers;
        self
    }

    /// True if `(pid, birthday)` names this process, birthdays compared within `tolerance`.
    pub fn same_process(&self, pid: Pid, birthday: u64, tolerance: u64) -> bool {
        self.pid == pid && self.birthday.abs_diff(birthday) <= tolerance
    }
}
