//! Pre-built mock filesystem scenarios for testing.
//!
//! These scenarios provide realistic `/proc` and cgroup v2 states
//! for testing the snapshot provider and the cgroup controller.

use super::filesystem::MockFs;

impl MockFs {
    /// Formats a `/proc/[pid]/stat` line with the fields the provider reads.
    #[allow(clippy::too_many_arguments)]
    pub fn stat_line(
        pid: i32,
        comm: &str,
        ppid: i32,
        flags: u32,
        minflt: u64,
        majflt: u64,
        utime: u64,
        stime: u64,
        starttime: u64,
        vsize: u64,
        rss: u64,
    ) -> String {
        format!(
            "{pid} ({comm}) S {ppid} {pid} {pid} 0 -1 {flags} {minflt} 0 {majflt} 0 {utime} {stime} 0 0 20 0 1 0 {starttime} {vsize} {rss} 18446744073709551615 0 0 0 0 0 0 0 0 0 0 0 0 17 0 0 0 0 0 0 0 0 0 0 0 0 0 0"
        )
    }

    fn status_text(name: &str, pid: i32, ppid: i32, uid: u32, groups: &str) -> String {
        format!(
            "Name:\t{name}\nPid:\t{pid}\nPPid:\t{ppid}\nUid:\t{uid}\t{uid}\t{uid}\t{uid}\nGid:\t{uid}\t{uid}\t{uid}\t{uid}\nGroups:\t{groups}\n"
        )
    }

    /// A batch job running under init.
    ///
    /// Boot time is 1700000000 (btime and uptime agree at wall time
    /// 1700001000). Processes:
    /// - 1: init, root
    /// - 1000: `condor_starter`, uid 1000, started 100 s after boot
    /// - 1001: `job`, child of 1000, in cgroup `/condor/job_1`, tracking
    ///   group 700001 and one environment marker
    /// - 1002: forked child of 1001 that has not exec'd yet
    pub fn job_tree() -> Self {
        let mut fs = Self::new();

        fs.add_file(
            "/etc/passwd",
            "\
root:x:0:0:root:/root:/bin/bash
nobody:x:65534:65534:nobody:/nonexistent:/usr/sbin/nologin
condor:x:1000:1000:Batch:/home/condor:/bin/bash
",
        );
        fs.add_file("/proc/uptime", "1000.00 3000.00\n");
        fs.add_file(
            "/proc/stat",
            "\
cpu  10000 500 3000 80000 1000 200 100 0 0 0
ctxt 500000
btime 1700000000
processes 10000
",
        );

        fs.add_process(
            1,
            &Self::stat_line(1, "systemd", 0, 4194560, 50000, 100, 1000, 500, 1, 170_000_000, 3000),
            &Self::status_text("systemd", 1, 0, 0, ""),
            "0::/init.scope\n",
            "",
        );
        fs.add_process(
            1000,
            &Self::stat_line(1000, "condor_starter", 1, 4194304, 2000, 0, 500, 200, 10_000, 50_000_000, 2000),
            &Self::status_text("condor_starter", 1000, 1, 1000, "1000"),
            "0::/condor\n",
            "HOME=/home/condor\0",
        );
        fs.add_process(
            1001,
            &Self::stat_line(1001, "job", 1000, 4194304, 5000, 0, 30_000, 10_000, 50_000, 20_480_000, 1000),
            &Self::status_text("job", 1001, 1000, 1000, "1000 700001"),
            "0::/condor/job_1\n",
            "HOME=/home/condor\0PROCFAM_ANCESTOR_1000=1001:1700000500:7\0PATH=/bin\0",
        );
        fs.add_process(
            1002,
            &Self::stat_line(1002, "job", 1001, 4194368, 10, 0, 0, 0, 60_000, 20_480_000, 1000),
            &Self::status_text("job", 1002, 1001, 1000, "1000 700001"),
            "0::/condor/job_1\n",
            "PROCFAM_ANCESTOR_1000=1001:1700000500:7\0",
        );

        fs
    }

    /// A cgroup v2 hierarchy rooted at `/sys/fs/cgroup` with one job group
    /// `condor/job_1` holding pids 1001 and 1002.
    pub fn cgroup_v2_job() -> Self {
        let mut fs = Self::new();
        let base = "/sys/fs/cgroup/condor/job_1";

        fs.add_file("/sys/fs/cgroup/cgroup.controllers", "cpu io memory pids\n");
        fs.add_file(format!("{base}/cgroup.procs"), "1001\n1002\n");
        fs.add_file(format!("{base}/cgroup.freeze"), "0\n");
        fs.add_file(
            format!("{base}/cpu.stat"),
            "usage_usec 400000000\nuser_usec 300000000\nsystem_usec 100000000\nnr_periods 0\n",
        );
        fs.add_file(format!("{base}/memory.current"), "8388608\n");
        fs.add_file(
            format!("{base}/memory.stat"),
            "anon 4194304\nfile 2097152\nkernel 1048576\nfile_mapped 1048576\nshmem 0\n",
        );
        fs.add_file(format!("{base}/memory.swap.current"), "1048576\n");
        fs.add_file(
            format!("{base}/io.stat"),
            "8:0 rbytes=4096 wbytes=8192 rios=1 wios=2 dbytes=0 dios=0\n8:16 rbytes=1024 wbytes=0 rios=3 wios=0\n",
        );
        fs.add_file(
            format!("{base}/io.pressure"),
            "some avg10=0.00 avg60=0.00 avg300=0.00 total=2500000\nfull avg10=0.00 avg60=0.00 avg300=0.00 total=1000000\n",
        );

        fs
    }
}
