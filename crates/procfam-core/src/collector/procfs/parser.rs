//! Parsers for `/proc` filesystem files.
//!
//! These are pure functions that parse the content of various `/proc` files
//! into structured data. They are designed to be easily testable with string inputs.

use std::collections::HashMap;

/// Error type for parsing failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Parse error: {}", self.message)
    }
}

impl std::error::Error for ParseError {}

/// Kernel flag set on a task that forked but has not exec'd yet.
pub const PF_FORKNOEXEC: u32 = 0x0000_0040;

/// Fields of `/proc/[pid]/stat` the provider needs.
#[derive(Debug, Clone, Default)]
pub struct ProcStat {
    pub pid: i32,
    pub comm: String,
    pub state: char,
    pub ppid: i32,
    pub flags: u32,
    pub minflt: u64,
    pub majflt: u64,
    pub utime: u64,
    pub stime: u64,
    pub starttime: u64,
    /// Virtual memory size in bytes.
    pub vsize: u64,
    /// Resident set size in pages.
    pub rss: i64,
}

/// Parses `/proc/[pid]/stat` content.
///
/// The format is tricky because the comm field can contain spaces and parentheses.
/// Format: pid (comm) state ppid pgrp session tty_nr ...
pub fn parse_proc_stat(content: &str) -> Result<ProcStat, ParseError> {
    let content = content.trim();

    // Find the comm field boundaries (enclosed in parentheses)
    let open_paren = content
        .find('(')
        .ok_or_else(|| ParseError::new("missing '(' in stat"))?;
    let close_paren = content
        .rfind(')')
        .ok_or_else(|| ParseError::new("missing ')' in stat"))?;

    if close_paren <= open_paren {
        return Err(ParseError::new("invalid parentheses in stat"));
    }

    let pid: i32 = content[..open_paren]
        .trim()
        .parse()
        .map_err(|_| ParseError::new("invalid pid"))?;
    let comm = content[open_paren + 1..close_paren].to_string();

    // Fields after the closing ')' start at field 3 (state).
    let fields: Vec<&str> = content[close_paren + 1..].split_whitespace().collect();
    if fields.len() < 22 {
        return Err(ParseError::new(format!(
            "not enough fields in stat: expected 22+, got {}",
            fields.len()
        )));
    }

    fn field<T: std::str::FromStr>(fields: &[&str], idx: usize, name: &str) -> Result<T, ParseError> {
        fields
            .get(idx)
            .ok_or_else(|| ParseError::new(format!("missing field {}", name)))?
            .parse()
            .map_err(|_| ParseError::new(format!("invalid {}", name)))
    }

    Ok(ProcStat {
        pid,
        comm,
        state: fields[0].chars().next().unwrap_or('?'),
        ppid: field(&fields, 1, "ppid")?,
        flags: field(&fields, 6, "flags")?,
        minflt: field(&fields, 7, "minflt")?,
        majflt: field(&fields, 9, "majflt")?,
        utime: field(&fields, 11, "utime")?,
        stime: field(&fields, 12, "stime")?,
        starttime: field(&fields, 19, "starttime")?,
        vsize: field(&fields, 20, "vsize")?,
        rss: field(&fields, 21, "rss")?,
    })
}

/// Parsed data from `/proc/[pid]/status`.
#[derive(Debug, Clone, Default)]
pub struct ProcStatus {
    pub name: String,
    pub pid: i32,
    pub uid: u32,
    pub euid: u32,
    pub gid: u32,
    /// Supplementary groups.
    pub groups: Vec<u32>,
}

/// Parses `/proc/[pid]/status` content.
///
/// Format is key:\tvalue pairs, one per line.
pub fn parse_proc_status(content: &str) -> Result<ProcStatus, ParseError> {
    let mut fields: HashMap<&str, &str> = HashMap::new();
    for line in content.lines() {
        if let Some((key, value)) = line.split_once(':') {
            fields.insert(key.trim(), value.trim());
        }
    }

    let ids = |key: &str| -> Vec<u32> {
        fields
            .get(key)
            .map(|line| {
                line.split_whitespace()
                    .filter_map(|s| s.parse().ok())
                    .collect()
            })
            .unwrap_or_default()
    };

    // Uid and Gid have format: real effective saved fs
    let uid = ids("Uid");
    if uid.is_empty() {
        return Err(ParseError::new("missing Uid in status"));
    }
    let gid = ids("Gid");

    Ok(ProcStatus {
        name: fields.get("Name").unwrap_or(&"").to_string(),
        pid: fields.get("Pid").and_then(|s| s.parse().ok()).unwrap_or(0),
        uid: uid[0],
        euid: uid.get(1).copied().unwrap_or(uid[0]),
        gid: gid.first().copied().unwrap_or(0),
        groups: ids("Groups"),
    })
}

/// Extracts the cgroup v2 path (`0::<path>`) from `/proc/[pid]/cgroup`.
pub fn parse_proc_cgroup(content: &str) -> Option<String> {
    content
        .lines()
        .find_map(|line| line.strip_prefix("0::"))
        .map(|path| path.trim().to_string())
        .filter(|path| !path.is_empty())
}

/// Parses `/proc/uptime` and returns seconds since boot.
pub fn parse_uptime(content: &str) -> Result<f64, ParseError> {
    content
        .split_whitespace()
        .next()
        .ok_or_else(|| ParseError::new("empty uptime"))?
        .parse()
        .map_err(|_| ParseError::new("invalid uptime"))
}

/// Returns the `btime` line of `/proc/stat` (boot time, seconds since epoch).
pub fn parse_btime(content: &str) -> Result<u64, ParseError> {
    content
        .lines()
        .find_map(|line| line.strip_prefix("btime"))
        .ok_or_else(|| ParseError::new("missing btime in stat"))?
        .trim()
        .parse()
        .map_err(|_| ParseError::new("invalid btime"))
}

/// Parses `/etc/passwd` content and returns a map of UID -> username.
///
/// Format: username:password:uid:gid:gecos:home:shell
pub fn parse_passwd(content: &str) -> HashMap<u32, String> {
    let mut map = HashMap::new();
    for line in content.lines() {
        // Skip comments and empty lines
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parts: Vec<&str> = line.split(':').collect();
        if parts.len() >= 3
            && let Ok(uid) = parts[2].parse::<u32>()
        {
            map.insert(uid, parts[0].to_string());
        }
    }
    map
}

/// Resolver for UID <-> username mapping.
///
/// Caches the passwd file contents for efficient lookups.
#[derive(Debug, Clone, Default)]
pub struct UserResolver {
    uid_to_name: HashMap<u32, String>,
    name_to_uid: HashMap<String, u32>,
}

impl UserResolver {
    /// Creates a new empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads user mappings from /etc/passwd content.
    pub fn load_from_content(&mut self, content: &str) {
        self.uid_to_name = parse_passwd(content);
        self.name_to_uid = self
            .uid_to_name
            .iter()
            .map(|(uid, name)| (name.clone(), *uid))
            .collect();
    }

    /// Resolves UID to username, returns UID as string if not found.
    pub fn resolve(&self, uid: u32) -> String {
        self.uid_to_name
            .get(&uid)
            .cloned()
            .unwrap_or_else(|| uid.to_string())
    }

    /// Resolves a login name to its UID. Numeric logins are accepted as-is.
    pub fn lookup_uid(&self, login: &str) -> Option<u32> {
        self.name_to_uid
            .get(login)
            .copied()
            .or_else(|| login.parse().ok())
    }

    /// Returns true if resolver has any mappings.
    pub fn is_loaded(&self) -> bool {
        !self.uid_to_name.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_passwd() {
        let content = "\
root:x:0:0:root:/root:/bin/bash
daemon:x:1:1:daemon:/usr/sbin:/usr/sbin/nologin
# comment
nobody:x:65534:65534:nobody:/nonexistent:/usr/sbin/nologin
condor:x:1000:1000:Batch:/home/condor:/bin/bash
";
        let map = parse_passwd(content);
        assert_eq!(map.get(&0), Some(&"root".to_string()));
        assert_eq!(map.get(&1), Some(&"daemon".to_string()));
        assert_eq!(map.get(&1000), Some(&"condor".to_string()));
        assert_eq!(map.get(&65534), Some(&"nobody".to_string()));
        assert_eq!(map.len(), 4);
    }

    #[test]
    fn test_user_resolver() {
        let mut resolver = UserResolver::new();
        resolver.load_from_content(
            "root:x:0:0::/root:/bin/bash\ncondor:x:1000:1000::/home/condor:/bin/bash",
        );

        assert_eq!(resolver.resolve(0), "root");
        assert_eq!(resolver.resolve(1000), "condor");
        assert_eq!(resolver.resolve(9999), "9999");
        assert_eq!(resolver.lookup_uid("condor"), Some(1000));
        assert_eq!(resolver.lookup_uid("4242"), Some(4242));
        assert_eq!(resolver.lookup_uid("nobody"), None);
        assert!(resolver.is_loaded());
    }

    #[test]
    fn test_parse_proc_stat_basic() {
        let content = "1234 (bash) S 1233 1234 1234 34816 1235 4194304 5000 50000 10 20 100 50 200 100 20 0 1 0 100000 25000000 2000 18446744073709551615 0 0 0 0 0 0 65536 3670020 1266777851 0 0 0 17 2 0 0 5 0 0 0 0 0 0 0 0 0 0";
        let stat = parse_proc_stat(content).unwrap();

        assert_eq!(stat.pid, 1234);
        assert_eq!(stat.comm, "bash");
        assert_eq!(stat.state, 'S');
        assert_eq!(stat.ppid, 1233);
        assert_eq!(stat.flags, 4194304);
        assert_eq!(stat.minflt, 5000);
        assert_eq!(stat.majflt, 10);
        assert_eq!(stat.utime, 100);
        assert_eq!(stat.stime, 50);
        assert_eq!(stat.starttime, 100000);
        assert_eq!(stat.vsize, 25000000);
        assert_eq!(stat.rss, 2000);
    }

    #[test]
    fn test_parse_proc_stat_with_parentheses_in_comm() {
        let content = "5001 (test (1)) S 1 5001 5001 0 -1 4194304 1000 0 0 0 10 5 0 0 20 0 1 0 500100 10000000 1000 18446744073709551615 0 0 0 0 0 0 0 0 0 0 0 0 17 0 0 0 0 0 0 0 0 0 0 0 0 0 0";
        let stat = parse_proc_stat(content).unwrap();

        assert_eq!(stat.pid, 5001);
        assert_eq!(stat.comm, "test (1)");
        assert_eq!(stat.ppid, 1);
        assert_eq!(stat.starttime, 500100);
    }

    #[test]
    fn test_parse_proc_stat_truncated() {
        let err = parse_proc_stat("1234 (bash) S 1233 1234").unwrap_err();
        assert!(err.message.contains("not enough fields"));
        assert!(parse_proc_stat("garbage").is_err());
    }

    #[test]
    fn test_parse_proc_status() {
        let content = "\
Name:\tstarter
Pid:\t1234
PPid:\t1233
Uid:\t1000\t1001\t1000\t1000
Gid:\t1000\t1000\t1000\t1000
Groups:\t27 1000 700001
VmSize:\t   25000 kB
";
        let status = parse_proc_status(content).unwrap();

        assert_eq!(status.name, "starter");
        assert_eq!(status.pid, 1234);
        assert_eq!(status.uid, 1000);
        assert_eq!(status.euid, 1001);
        assert_eq!(status.gid, 1000);
        assert_eq!(status.groups, vec![27, 1000, 700001]);
    }

    #[test]
    fn test_parse_proc_status_without_uid() {
        assert!(parse_proc_status("Name:\tx\n").is_err());
    }

    #[test]
    fn test_parse_proc_cgroup() {
        assert_eq!(
            parse_proc_cgroup("0::/system.slice/condor.service/job_1\n"),
            Some("/system.slice/condor.service/job_1".to_string())
        );
        assert_eq!(
            parse_proc_cgroup("12:cpu,cpuacct:/old\n0::/\n"),
            Some("/".to_string())
        );
        assert_eq!(parse_proc_cgroup("12:cpu,cpuacct:/old\n"), None);
    }

    #[test]
    fn test_parse_uptime_and_btime() {
        assert!((parse_uptime("12345.67 98765.43\n").unwrap() - 12345.67).abs() < 1e-9);
        assert!(parse_uptime("").is_err());

        let stat = "cpu  10000 500 3000 80000\nctxt 500000\nbtime 1700000000\nprocesses 10000\n";
        assert_eq!(parse_btime(stat).unwrap(), 1700000000);
        assert!(parse_btime("cpu 1 2 3\n").is_err());
    }
}
