//! cgroup v2 controller used for cgroup-tracked families.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::collector::cgroup::parser::{
    parse_cgroup_procs, parse_cpu_stat, parse_io_stat, parse_memory_stat,
    parse_pressure_some_total, parse_single_value,
};
use crate::collector::traits::FileSystem;
use crate::process::Pid;

#[derive(Debug, thiserror::Error)]
pub enum CgroupError {
    #[error("cgroup {0} does not exist")]
    NotFound(String),
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Usage of a whole cgroup. Memory in KiB, CPU in seconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CgroupCounters {
    pub user_time: u64,
    pub sys_time: u64,
    pub image_size: u64,
    pub rss: u64,
    pub num_procs: u64,
    pub block_read_bytes: Option<u64>,
    pub block_write_bytes: Option<u64>,
    pub block_reads: Option<u64>,
    pub block_writes: Option<u64>,
    /// Seconds some task of the group stalled on I/O.
    pub io_wait: Option<f64>,
}

/// Operations the Monitor needs from a cgroup hierarchy.
///
/// `group` is a path relative to the hierarchy root, such as `/condor/job_1`.
pub trait CgroupControl {
    fn exists(&self, group: &str) -> bool;

    /// Creates `group` and any missing parent groups.
    fn create(&self, group: &str) -> Result<(), CgroupError>;

    /// Removes `group`; fails while it still holds processes or children.
    fn remove(&self, group: &str) -> Result<(), CgroupError>;

    /// Moves `pid` into `group`.
    fn migrate(&self, pid: Pid, group: &str) -> Result<(), CgroupError>;

    fn read_counters(&self, group: &str) -> Result<CgroupCounters, CgroupError>;

    fn freeze(&self, group: &str) -> Result<(), CgroupError>;

    fn thaw(&self, group: &str) -> Result<(), CgroupError>;

    fn list_pids(&self, group: &str) -> Result<Vec<Pid>, CgroupError>;
}

/// cgroup v2 unified hierarchy.
pub struct CgroupV2<F: FileSystem> {
    fs: F,
    root: PathBuf,
}

impl<F: FileSystem> CgroupV2<F> {
    /// # Arguments
    /// * `fs` - Filesystem implementation (real or mock)
    /// * `root` - Mount point of the hierarchy (usually "/sys/fs/cgroup")
    pub fn new(fs: F, root: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            root: root.into(),
        }
    }

    fn group_dir(&self, group: &str) -> PathBuf {
        self.root.join(group.trim_start_matches('/'))
    }

    fn read(&self, group: &str, file: &str) -> Result<String, CgroupError> {
        let path = self.group_dir(group).join(file);
        self.fs
            .read_to_string(&path)
            .map_err(|source| CgroupError::Io { path, source })
    }

    fn write(&self, group: &str, file: &str, content: &str) -> Result<(), CgroupError> {
        let dir = self.group_dir(group);
        if !self.fs.exists(&dir) {
            return Err(CgroupError::NotFound(group.to_string()));
        }
        let path = dir.join(file);
        self.fs
            .write(&path, content)
            .map_err(|source| CgroupError::Io { path, source })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl<F: FileSystem> CgroupControl for CgroupV2<F> {
    fn exists(&self, group: &str) -> bool {
        self.fs.exists(&self.group_dir(group))
    }

    fn create(&self, group: &str) -> Result<(), CgroupError> {
        let path = self.group_dir(group);
        self.fs
            .create_dir(&path)
            .map_err(|source| CgroupError::Io { path, source })
    }

    fn remove(&self, group: &str) -> Result<(), CgroupError> {
        let path = self.group_dir(group);
        if !self.fs.exists(&path) {
            return Err(CgroupError::NotFound(group.to_string()));
        }
        self.fs
            .remove_dir(&path)
            .map_err(|source| CgroupError::Io { path, source })
    }

    fn migrate(&self, pid: Pid, group: &str) -> Result<(), CgroupError> {
        self.write(group, "cgroup.procs", &pid.to_string())
    }

    fn read_counters(&self, group: &str) -> Result<CgroupCounters, CgroupError> {
        let cpu = parse_cpu_stat(&self.read(group, "cpu.stat")?);
        let memory = parse_memory_stat(&self.read(group, "memory.stat")?);
        let swap = self
            .read(group, "memory.swap.current")
            .ok()
            .and_then(|c| parse_single_value(&c))
            .unwrap_or(0);
        let num_procs = parse_cgroup_procs(&self.read(group, "cgroup.procs")?).len() as u64;

        let mut counters = CgroupCounters {
            user_time: cpu.user_usec / 1_000_000,
            sys_time: cpu.system_usec / 1_000_000,
            image_size: (memory.anon + memory.file_mapped + swap) / 1024,
            rss: memory.anon / 1024,
            num_procs,
            ..Default::default()
        };

        match self.read(group, "io.stat") {
            Ok(content) => {
                let io = parse_io_stat(&content);
                counters.block_read_bytes = Some(io.rbytes);
                counters.block_write_bytes = Some(io.wbytes);
                counters.block_reads = Some(io.rios);
                counters.block_writes = Some(io.wios);
            }
            Err(e) => debug!("no block I/O accounting for {}: {}", group, e),
        }
        counters.io_wait = self
            .read(group, "io.pressure")
            .ok()
            .and_then(|c| parse_pressure_some_total(&c))
            .map(|usec| usec as f64 / 1_000_000.0);

        Ok(counters)
    }

    fn freeze(&self, group: &str) -> Result<(), CgroupError> {
        self.write(group, "cgroup.freeze", "1")
    }

    fn thaw(&self, group: &str) -> Result<(), CgroupError> {
        self.write(group, "cgroup.freeze", "0")
    }

    fn list_pids(&self, group: &str) -> Result<Vec<Pid>, CgroupError> {
        Ok(parse_cgroup_procs(&self.read(group, "cgroup.procs")?))
    }
}
