//! Parsers for cgroup v2 files.

/// CPU totals from `cpu.stat`, microseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CpuStat {
    pub usage_usec: u64,
    pub user_usec: u64,
    pub system_usec: u64,
}

/// Parses cpu.stat file.
/// Format: key value pairs, one per line
pub fn parse_cpu_stat(content: &str) -> CpuStat {
    let mut info = CpuStat::default();

    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 2 {
            continue;
        }

        let value: u64 = parts[1].parse().unwrap_or(0);

        match parts[0] {
            "usage_usec" => info.usage_usec = value,
            "user_usec" => info.user_usec = value,
            "system_usec" => info.system_usec = value,
            _ => {}
        }
    }

    info
}

/// Parses a single-number file such as memory.current or memory.swap.current.
/// Format: number (bytes)
pub fn parse_single_value(content: &str) -> Option<u64> {
    content.trim().parse().ok()
}

/// Memory breakdown from `memory.stat`, bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MemoryStat {
    pub anon: u64,
    pub file: u64,
    pub file_mapped: u64,
}

/// Parses memory.stat file (partial fields).
/// Format: key value pairs, one per line
pub fn parse_memory_stat(content: &str) -> MemoryStat {
    let mut info = MemoryStat::default();
    for line in content.lines() {
        let Some((key, value)) = line.split_once(' ') else {
            continue;
        };
        let value: u64 = value.trim().parse().unwrap_or(0);
        match key {
            "anon" => info.anon = value,
            "file" => info.file = value,
            "file_mapped" => info.file_mapped = value,
            _ => {}
        }
    }
    info
}

/// Block I/O totals over every device in `io.stat`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IoTotals {
    pub rbytes: u64,
    pub wbytes: u64,
    pub rios: u64,
    pub wios: u64,
}

/// Parses io.stat file and sums all devices.
///
/// Format: one device per line:
/// `MAJOR:MINOR rbytes=.. wbytes=.. rios=.. wios=.. [other fields...]`
pub fn parse_io_stat(content: &str) -> IoTotals {
    let mut totals = IoTotals::default();

    for line in content.lines() {
        let mut parts = line.split_whitespace();
        // skip the MAJOR:MINOR device column
        if parts.next().is_none_or(|dev| !dev.contains(':')) {
            continue;
        }

        for kv in parts {
            let Some((k, v)) = kv.split_once('=') else {
                continue;
            };
            let value: u64 = v.parse().unwrap_or(0);
            match k {
                "rbytes" => totals.rbytes += value,
                "wbytes" => totals.wbytes += value,
                "rios" => totals.rios += value,
                "wios" => totals.wios += value,
                _ => {}
            }
        }
    }

    totals
}

/// Returns the `some ... total=` value of a PSI file, in microseconds.
pub fn parse_pressure_some_total(content: &str) -> Option<u64> {
    content
        .lines()
        .find(|line| line.starts_with("some "))?
        .split_whitespace()
        .find_map(|kv| kv.strip_prefix("total="))?
        .parse()
        .ok()
}

/// Parses cgroup.procs: one pid per line.
pub fn parse_cgroup_procs(content: &str) -> Vec<i32> {
    content
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu_stat() {
        let content = "usage_usec 123456\nuser_usec 100000\nsystem_usec 23456\nthrottled_usec 500\nnr_throttled 2\n";
        let info = parse_cpu_stat(content);
        assert_eq!(info.usage_usec, 123456);
        assert_eq!(info.user_usec, 100000);
        assert_eq!(info.system_usec, 23456);
    }

    #[test]
    fn test_parse_single_value() {
        assert_eq!(parse_single_value("536870912\n"), Some(536870912));
        assert_eq!(parse_single_value("max\n"), None);
    }

    #[test]
    fn test_parse_memory_stat() {
        let content = "anon 100000\nfile 200000\nkernel 50000\nfile_mapped 25000\n";
        let info = parse_memory_stat(content);
        assert_eq!(info.anon, 100000);
        assert_eq!(info.file, 200000);
        assert_eq!(info.file_mapped, 25000);
    }

    #[test]
    fn test_parse_io_stat_sums_devices() {
        let content = "8:0 rbytes=123 wbytes=456 rios=7 wios=8 dbytes=0 dios=0\n8:16 rbytes=1 wbytes=1 rios=0 wios=2\n";
        let totals = parse_io_stat(content);
        assert_eq!(totals.rbytes, 124);
        assert_eq!(totals.wbytes, 457);
        assert_eq!(totals.rios, 7);
        assert_eq!(totals.wios, 10);
        assert_eq!(parse_io_stat(""), IoTotals::default());
    }

    #[test]
    fn test_parse_pressure_some_total() {
        let content = "some avg10=1.50 avg60=1.00 avg300=0.80 total=5000000\nfull avg10=0.50 avg60=0.30 avg300=0.20 total=1000000\n";
        assert_eq!(parse_pressure_some_total(content), Some(5000000));
        assert_eq!(parse_pressure_some_total("full total=1\n"), None);
    }

    #[test]
    fn test_parse_cgroup_procs() {
        assert_eq!(parse_cgroup_procs("1001\n1002\n\n"), vec![1001, 1002]);
    }
}
