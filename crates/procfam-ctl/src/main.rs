use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::time::Duration;

use clap::{Parser, Subcommand};
use nix::sys::signal::Signal;
use serde::Serialize;

use procfam_core::Pid;
use procfam_core::family::{FamilyDump, FamilyUsage};
use procfam_core::ipc::{ClientError, ProcdClient};
use procfam_core::marker::MarkerSet;

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "procfam-ctl", about = "Talk to a running procfamd", version)]
struct Cli {
    /// Path of the daemon's command socket.
    #[arg(long, env = "PROCFAMD_SOCKET", default_value = "/run/procfamd.sock")]
    socket: PathBuf,

    /// Seconds to wait for a reply (0 waits forever).
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Output as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Track the descendants of a process as a new family.
    Register {
        root_pid: Pid,
        /// Process whose exit dissolves the family (0 for none).
        #[arg(long, default_value_t = 0)]
        watcher: Pid,
        /// Longest time in seconds between snapshots; -1 for none.
        #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
        max_interval: i64,
    },
    /// Dissolve a family into its parent.
    Unregister { pid: Pid },
    /// Claim processes carrying all of the given ancestry markers.
    TrackEnv {
        pid: Pid,
        #[arg(required = true)]
        markers: Vec<String>,
    },
    /// Claim processes owned by a login.
    TrackLogin { pid: Pid, login: String },
    /// Claim processes carrying a dedicated supplementary group.
    TrackGroup {
        pid: Pid,
        /// Gid to use when the daemon does not allocate one.
        #[arg(long)]
        gid: Option<u32>,
    },
    /// Claim processes in a cgroup and move the family's processes there.
    TrackCgroup { pid: Pid, cgroup: String },
    /// Send a signal to a family's root process, or to every member.
    Signal {
        pid: Pid,
        /// Number or name, e.g. 15, TERM or SIGTERM.
        #[arg(value_parser = parse_signal)]
        signal: i32,
        #[arg(long)]
        family: bool,
    },
    /// Stop every process of a family.
    Suspend { pid: Pid },
    /// Continue every process of a family.
    Continue { pid: Pid },
    /// Kill every process of a family.
    Kill { pid: Pid },
    /// Resource usage of a family and its descendants.
    Usage {
        #[arg(default_value_t = 0)]
        pid: Pid,
    },
    /// Force a snapshot.
    Snapshot,
    /// Show a family tree with its processes.
    Dump {
        #[arg(default_value_t = 0)]
        pid: Pid,
    },
    /// Stop the daemon.
    Quit,
}

/// Accepts a number or a name with or without the `SIG` prefix.
fn parse_signal(s: &str) -> Result<i32, String> {
    let signal = match s.parse::<i32>() {
        Ok(n) => Signal::try_from(n).map_err(|_| format!("invalid signal number: {}", n))?,
        Err(_) => {
            let upper = s.to_ascii_uppercase();
            let name = if upper.starts_with("SIG") {
                upper
            } else {
                format!("SIG{}", upper)
            };
            Signal::from_str(&name).map_err(|_| format!("unknown signal: {}", s))?
        }
    };
    Ok(signal as i32)
}

// ── Formatting helpers ───────────────────────────────────────────────────────

fn human_kib(kib: u64) -> String {
    const MIB: f64 = 1024.0;
    const GIB: f64 = 1024.0 * 1024.0;
    let k = kib as f64;
    if k >= GIB {
        format!("{:.1} GiB", k / GIB)
    } else if k >= MIB {
        format!("{:.1} MiB", k / MIB)
    } else {
        format!("{kib} KiB")
    }
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| v.to_string())
}

fn format_usage(usage: &FamilyUsage) -> String {
    let mut out = String::new();
    out.push_str(&format!("Processes:      {}\n", usage.num_procs));
    out.push_str(&format!(
        "CPU:            user {}s, sys {}s, {:.1}%\n",
        usage.user_cpu_time, usage.sys_cpu_time, usage.percent_cpu
    ));
    out.push_str(&format!(
        "Memory:         image {}, rss {}, max image {}\n",
        human_kib(usage.total_image_size),
        human_kib(usage.total_resident_set_size),
        human_kib(usage.max_image_size)
    ));
    out.push_str(&format!(
        "Block I/O:      read {} B ({} ops), written {} B ({} ops)\n",
        opt(usage.block_read_bytes),
        opt(usage.block_reads),
        opt(usage.block_write_bytes),
        opt(usage.block_writes)
    ));
    out.push_str(&format!(
        "I/O wait:       {}\n",
        usage
            .io_wait
            .map_or_else(|| "n/a".to_string(), |w| format!("{:.2}s", w))
    ));
    out
}

fn format_dump(families: &[FamilyDump]) -> String {
    let mut out = String::new();
    for family in families {
        out.push_str(&format!(
            "Family {} (parent {}, watcher {}, max image {}): {} processes\n",
            family.root_pid,
            family.parent_root,
            family.watcher_pid,
            human_kib(family.max_image_size),
            family.processes.len()
        ));
        out.push_str(&format!(
            "  {:>8} {:>8} {:>12} {:>8} {:>8}\n",
            "PID", "PPID", "BIRTHDAY", "USER", "SYS"
        ));
        for p in &family.processes {
            out.push_str(&format!(
                "  {:>8} {:>8} {:>12} {:>8} {:>8}\n",
                p.pid, p.ppid, p.birthday, p.user_time, p.sys_time
            ));
        }
    }
    out
}

#[derive(Serialize)]
struct Ack {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    gid: Option<u32>,
}

// ── Commands ─────────────────────────────────────────────────────────────────

enum Output {
    Done,
    Gid(u32),
    Usage(FamilyUsage),
    Dump(Vec<FamilyDump>),
}

fn execute(client: &mut ProcdClient, command: Cmd) -> Result<Output, ClientError> {
    match command {
        Cmd::Register {
            root_pid,
            watcher,
            max_interval,
        } => client.register_subfamily(root_pid, watcher, max_interval)?,
        Cmd::Unregister { pid } => client.unregister_subfamily(pid)?,
        Cmd::TrackEnv { pid, markers } => {
            let set = MarkerSet::from_entries(markers)
                .map_err(|e| ClientError::InvalidRequest(e.to_string()))?;
            client.track_via_environment(pid, set)?
        }
        Cmd::TrackLogin { pid, login } => client.track_via_login(pid, &login)?,
        Cmd::TrackGroup { pid, gid } => {
            return Ok(Output::Gid(client.track_via_supplementary_group(pid, gid)?));
        }
        Cmd::TrackCgroup { pid, cgroup } => client.track_via_cgroup(pid, &cgroup)?,
        Cmd::Signal {
            pid,
            signal,
            family,
        } => {
            if family {
                client.signal_family(pid, signal)?
            } else {
                client.signal_process(pid, signal)?
            }
        }
        Cmd::Suspend { pid } => client.suspend_family(pid)?,
        Cmd::Continue { pid } => client.continue_family(pid)?,
        Cmd::Kill { pid } => client.kill_family(pid)?,
        Cmd::Usage { pid } => return Ok(Output::Usage(client.get_usage(pid)?)),
        Cmd::Snapshot => client.snapshot()?,
        Cmd::Dump { pid } => return Ok(Output::Dump(client.dump(pid)?)),
        Cmd::Quit => client.quit()?,
    }
    Ok(Output::Done)
}

fn render(output: &Output, json: bool) -> String {
    if json {
        let rendered = match output {
            Output::Done => serde_json::to_string_pretty(&Ack { ok: true, gid: None }),
            Output::Gid(gid) => serde_json::to_string_pretty(&Ack {
                ok: true,
                gid: Some(*gid),
            }),
            Output::Usage(usage) => serde_json::to_string_pretty(usage),
            Output::Dump(families) => serde_json::to_string_pretty(families),
        };
        return rendered.unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e));
    }
    match output {
        Output::Done => "OK".to_string(),
        Output::Gid(gid) => format!("OK, gid {}", gid),
        Output::Usage(usage) => format_usage(usage).trim_end().to_string(),
        Output::Dump(families) => format_dump(families).trim_end().to_string(),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut client = match ProcdClient::connect(&cli.socket) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Cannot connect to {}: {}", cli.socket.display(), e);
            return ExitCode::from(2);
        }
    };
    let timeout = (cli.timeout > 0).then(|| Duration::from_secs(cli.timeout));
    if let Err(e) = client.set_timeout(timeout) {
        eprintln!("Cannot set timeout: {}", e);
        return ExitCode::from(2);
    }

    match execute(&mut client, cli.command) {
        Ok(output) => {
            println!("{}", render(&output, cli.json));
            ExitCode::SUCCESS
        }
        Err(ClientError::Refused { code, message }) => {
            eprintln!("Refused ({:?}): {}", code, message);
            ExitCode::from(1)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(2)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use procfam_core::family::ProcessDump;

    #[test]
    fn test_parse_signal() {
        assert_eq!(parse_signal("9"), Ok(Signal::SIGKILL as i32));
        assert_eq!(parse_signal("TERM"), Ok(Signal::SIGTERM as i32));
        assert_eq!(parse_signal("sigstop"), Ok(Signal::SIGSTOP as i32));
        assert_eq!(parse_signal("SIGWINCH"), Ok(Signal::SIGWINCH as i32));
        assert!(parse_signal("0").is_err());
        assert!(parse_signal("-9").is_err());
        assert!(parse_signal("BOGUS").is_err());
    }

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from([
            "procfam-ctl",
            "--socket",
            "/tmp/p.sock",
            "register",
            "1001",
            "--watcher",
            "1000",
            "--max-interval",
            "-1",
        ])
        .unwrap();
        assert_eq!(cli.socket, PathBuf::from("/tmp/p.sock"));
        assert!(matches!(
            cli.command,
            Cmd::Register {
                root_pid: 1001,
                watcher: 1000,
                max_interval: -1
            }
        ));

        let cli = Cli::try_parse_from(["procfam-ctl", "signal", "1001", "KILL", "--family"]).unwrap();
        assert!(matches!(
            cli.command,
            Cmd::Signal {
                pid: 1001,
                signal: 9,
                family: true
            }
        ));

        let cli = Cli::try_parse_from(["procfam-ctl", "--json", "usage"]).unwrap();
        assert!(cli.json);
        assert!(matches!(cli.command, Cmd::Usage { pid: 0 }));

        assert!(Cli::try_parse_from(["procfam-ctl", "track-env", "1001"]).is_err());
    }

    #[test]
    fn test_human_kib() {
        assert_eq!(human_kib(512), "512 KiB");
        assert_eq!(human_kib(2048), "2.0 MiB");
        assert_eq!(human_kib(3 * 1024 * 1024), "3.0 GiB");
    }

    #[test]
    fn test_format_usage_marks_unknown_io() {
        let usage = FamilyUsage {
            user_cpu_time: 15,
            num_procs: 3,
            block_read_bytes: Some(4096),
            ..Default::default()
        };
        let text = format_usage(&usage);
        assert!(text.contains("Processes:      3"));
        assert!(text.contains("user 15s"));
        assert!(text.contains("read 4096 B"));
        assert!(text.contains("written n/a B"));
        assert!(text.contains("I/O wait:       n/a"));
    }

    #[test]
    fn test_format_dump() {
        let families = vec![FamilyDump {
            parent_root: 0,
            root_pid: 1000,
            watcher_pid: 0,
            max_image_size: 2048,
            processes: vec![ProcessDump {
                pid: 1000,
                ppid: 1,
                birthday: 5000,
                user_time: 3,
                sys_time: 1,
            }],
        }];
        let text = format_dump(&families);
        assert!(text.starts_with("Family 1000 (parent 0, watcher 0, max image 2.0 MiB): 1 processes"));
        assert!(text.contains("5000"));
    }

    #[test]
    fn test_render_json() {
        let json = render(&Output::Gid(700001), true);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["ok"], true);
        assert_eq!(value["gid"], 700001);

        let done: serde_json::Value = serde_json::from_str(&render(&Output::Done, true)).unwrap();
        assert!(done.get("gid").is_none());

        let usage = render(&Output::Usage(FamilyUsage::default()), true);
        let value: serde_json::Value = serde_json::from_str(&usage).unwrap();
        assert_eq!(value["num_procs"], 0);
        assert!(value["io_wait"].is_null());
        assert_eq!(render(&Output::Done, false), "OK");
    }
}
