//! Linux snapshot provider reading `/proc/[pid]/`.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::collector::ProcessSource;
use crate::collector::procfs::boot_time::BootTime;
use crate::collector::procfs::parser::{
    PF_FORKNOEXEC, ProcStat, UserResolver, parse_proc_cgroup, parse_proc_stat, parse_proc_status,
};
use crate::collector::procfs::sampler::{RawCounters, UsageSampler};
use crate::collector::traits::FileSystem;
use crate::error::CollectError;
use crate::marker::MarkerSet;
use crate::process::{Pid, ProcessRecord};

/// Clock ticks per second (USER_HZ). Standard value for Linux.
const CLK_TCK: u64 = 100;

/// How many times a garbled `/proc/[pid]/stat` is re-read before giving up.
const STAT_READ_ATTEMPTS: u32 = 5;

/// Wall-clock time in seconds since the epoch.
pub fn wall_clock() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Collects process records from `/proc`.
pub struct ProcfsSource<F: FileSystem> {
    fs: F,
    proc_path: PathBuf,
    page_size: u64,
    users: UserResolver,
    boot_time: BootTime,
    sampler: UsageSampler,
    clock: fn() -> f64,
}

impl<F: FileSystem> ProcfsSource<F> {
    /// Creates a provider.
    ///
    /// # Arguments
    /// * `fs` - Filesystem implementation (real or mock)
    /// * `proc_path` - Base path to proc filesystem (usually "/proc")
    pub fn new(fs: F, proc_path: impl Into<PathBuf>) -> Self {
        let proc_path = proc_path.into();
        let mut source = Self {
            boot_time: BootTime::new(&proc_path),
            fs,
            proc_path,
            page_size: 4096, // Default page size, could be detected
            users: UserResolver::new(),
            sampler: UsageSampler::new(2),
            clock: wall_clock,
        };
        source.load_users(Path::new("/etc/passwd"));
        source
    }

    /// Replaces the wall clock, for deterministic tests.
    pub fn with_clock(mut self, clock: fn() -> f64) -> Self {
        self.clock = clock;
        self
    }

    /// Birthday tolerance used to tell a reused pid apart in the rate sampler.
    pub fn with_birthday_tolerance(mut self, tolerance: u64) -> Self {
        self.sampler = UsageSampler::new(tolerance);
        self
    }

    pub fn with_passwd_path(mut self, path: impl AsRef<Path>) -> Self {
        self.load_users(path.as_ref());
        self
    }

    fn load_users(&mut self, path: &Path) {
        match self.fs.read_to_string(path) {
            Ok(content) => self.users.load_from_content(&content),
            Err(e) => debug!("cannot read {}: {}", path.display(), e),
        }
    }

    /// Reads `/proc/[pid]/stat`, retrying while the content looks garbled.
    fn read_stat(&self, pid: Pid) -> Result<ProcStat, CollectError> {
        let path = self.proc_path.join(pid.to_string()).join("stat");
        for attempt in 1..=STAT_READ_ATTEMPTS {
            let content = self
                .fs
                .read_to_string(&path)
                .map_err(|_| CollectError::ProcessGone(pid))?;
            match parse_proc_stat(&content) {
                Ok(stat) if stat.pid == pid => return Ok(stat),
                Ok(stat) => debug!(
                    "stat of pid {} reports pid {} (attempt {})",
                    pid, stat.pid, attempt
                ),
                Err(e) => debug!("garbled stat for pid {} (attempt {}): {}", pid, attempt, e),
            }
        }
        Err(CollectError::Garbled(pid, STAT_READ_ATTEMPTS))
    }

    /// Collects one process.
    pub fn collect_process(
        &mut self,
        pid: Pid,
        boot_time: f64,
        now: f64,
    ) -> Result<ProcessRecord, CollectError> {
        let stat = self.read_stat(pid)?;
        let proc_dir = self.proc_path.join(pid.to_string());

        let status_content = self
            .fs
            .read_to_string(&proc_dir.join("status"))
            .map_err(|_| CollectError::ProcessGone(pid))?;
        let status = parse_proc_status(&status_content)
            .map_err(|e| CollectError::Parse(e.message.clone()))?;

        let cgroup = self
            .fs
            .read_to_string(&proc_dir.join("cgroup"))
            .ok()
            .and_then(|content| parse_proc_cgroup(&content));

        // environ is only readable for our own processes unless running as root
        let markers = match self.fs.read_to_string(&proc_dir.join("environ")) {
            Ok(content) => {
                let (markers, dropped) = MarkerSet::from_environ(&content);
                if dropped > 0 {
                    warn!(
                        "pid {} carries {} environment markers, ignoring the last {}",
                        pid,
                        markers.len() + dropped,
                        dropped
                    );
                }
                markers
            }
            Err(_) => MarkerSet::new(),
        };

        // Forked-but-not-exec'd tasks share the parent's image; count them once.
        let (image_size, rss) = if stat.flags & PF_FORKNOEXEC != 0 && stat.ppid != 1 {
            (0, 0)
        } else {
            (
                stat.vsize / 1024,
                (stat.rss.max(0) as u64) * self.page_size / 1024,
            )
        };

        let started_at = boot_time + stat.starttime as f64 / CLK_TCK as f64;
        let rates = self.sampler.sample(
            pid,
            stat.starttime,
            RawCounters {
                cpu_secs: (stat.utime + stat.stime) as f64 / CLK_TCK as f64,
                minflt: stat.minflt,
                majflt: stat.majflt,
            },
            (now - started_at).max(0.0),
            now,
        );

        Ok(ProcessRecord {
            pid,
            ppid: stat.ppid,
            birthday: stat.starttime,
            uid: status.uid,
            groups: status.groups,
            cgroup,
            image_size,
            rss,
            user_time: stat.utime / CLK_TCK,
            sys_time: stat.stime / CLK_TCK,
            percent_cpu: rates.percent_cpu,
            minor_fault_rate: rates.minor_fault_rate,
            major_fault_rate: rates.major_fault_rate,
            markers,
        })
    }
}

impl<F: FileSystem> ProcessSource for ProcfsSource<F> {
    /// Processes that disappear or stay garbled during collection are skipped.
    fn list_processes(&mut self) -> Result<Vec<ProcessRecord>, CollectError> {
        let now = (self.clock)();
        let boot_time = self.boot_time.get(&self.fs, now)?;
        let entries = self.fs.read_dir(&self.proc_path)?;

        let mut processes = Vec::with_capacity(entries.len());
        for entry in entries {
            // Check if entry is a PID directory (numeric name)
            let Some(pid) = entry
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|name| name.parse::<Pid>().ok())
            else {
                continue;
            };

            match self.collect_process(pid, boot_time, now) {
                Ok(record) => processes.push(record),
                Err(CollectError::ProcessGone(_)) => continue,
                Err(e) => warn!("failed to collect process {}: {}", pid, e),
            }
        }

        Ok(processes)
    }

    fn lookup_uid(&self, login: &str) -> Option<u32> {
        self.users.lookup_uid(login)
    }
}
