//! Usage and dump types reported for families.

use serde::{Deserialize, Serialize};

use crate::process::Pid;

/// Aggregated resource usage of a family (and, when reported by the Monitor,
/// all of its descendants).
///
/// Block I/O fields are `None` when no source could account for them, which
/// is different from "no I/O happened".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FamilyUsage {
    /// Seconds.
    pub user_cpu_time: u64,
    /// Seconds.
    pub sys_cpu_time: u64,
    pub percent_cpu: f64,
    /// KiB.
    pub total_image_size: u64,
    /// KiB.
    pub total_resident_set_size: u64,
    /// KiB, high-water mark of the named family.
    pub max_image_size: u64,
    pub num_procs: u64,
    pub block_read_bytes: Option<u64>,
    pub block_write_bytes: Option<u64>,
    pub block_reads: Option<u64>,
    pub block_writes: Option<u64>,
    /// Seconds.
    pub io_wait: Option<f64>,
}

fn add_opt<T: std::ops::Add<Output = T> + Copy>(a: Option<T>, b: Option<T>) -> Option<T> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a + b),
        (a, None) => a,
        (None, b) => b,
    }
}

impl FamilyUsage {
    /// Adds `other` into `self`. `max_image_size` is left untouched.
    pub fn accumulate(&mut self, other: &FamilyUsage) {
        self.user_cpu_time += other.user_cpu_time;
        self.sys_cpu_time += other.sys_cpu_time;
        self.percent_cpu += other.percent_cpu;
        self.total_image_size += other.total_image_size;
        self.total_resident_set_size += other.total_resident_set_size;
        self.num_procs += other.num_procs;
        self.block_read_bytes = add_opt(self.block_read_bytes, other.block_read_bytes);
        self.block_write_bytes = add_opt(self.block_write_bytes, other.block_write_bytes);
        self.block_reads = add_opt(self.block_reads, other.block_reads);
        self.block_writes = add_opt(self.block_writes, other.block_writes);
        self.io_wait = add_opt(self.io_wait, other.io_wait);
    }
}

/// One live process in a [`FamilyDump`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessDump {
    pub pid: Pid,
    pub ppid: Pid,
    pub birthday: u64,
    pub user_time: u64,
    pub sys_time: u64,
}

/// Diagnostic view of one family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyDump {
    /// Root pid of the parent family, 0 for the top of the tree.
    pub parent_root: Pid,
    pub root_pid: Pid,
    pub watcher_pid: Pid,
    pub max_image_size: u64,
    pub processes: Vec<ProcessDump>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulate() {
        let mut total = FamilyUsage {
            user_cpu_time: 10,
            max_image_size: 99,
            ..Default::default()
        };
        total.accumulate(&FamilyUsage {
            user_cpu_time: 5,
            sys_cpu_time: 1,
            percent_cpu: 12.5,
            num_procs: 2,
            block_read_bytes: Some(100),
            max_image_size: 1000,
            ..Default::default()
        });
        total.accumulate(&FamilyUsage {
            block_read_bytes: Some(1),
            ..Default::default()
        });

        assert_eq!(total.user_cpu_time, 15);
        assert_eq!(total.sys_cpu_time, 1);
        assert_eq!(total.num_procs, 2);
        assert_eq!(total.max_image_size, 99);
        assert_eq!(total.block_read_bytes, Some(101));
        assert_eq!(total.block_write_bytes, None);
    }
}
