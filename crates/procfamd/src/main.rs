//! procfamd - process family tracking daemon.
//!
//! Tracks the process tree rooted at one pid, answers requests on a Unix
//! socket and takes a snapshot whenever the tightest family interval
//! elapses without a request.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use procfam_core::collector::{CgroupV2, ProcessSource, ProcfsSource, RealFs};
use procfam_core::ipc::{self, Command, Request, Response};
use procfam_core::monitor::DEFAULT_BIRTHDAY_TOLERANCE;
use procfam_core::{Monitor, MonitorConfig, Pid, ProcdError};

/// How often a long wait wakes up to look at the shutdown flag.
const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

/// Process family tracking daemon.
#[derive(Parser, Debug)]
#[command(name = "procfamd", about = "Process family tracking daemon", version)]
struct Args {
    /// Root process of the tracked tree.
    #[arg(long, env = "PROCFAMD_ROOT_PID")]
    root_pid: Pid,

    /// Exit with an error when the root process exits.
    #[arg(long, alias = "watcher")]
    except_if_root_dies: bool,

    /// Longest time in seconds between snapshots of the root family; -1 for none.
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    max_snapshot_interval: i64,

    /// Path of the command socket.
    #[arg(long, env = "PROCFAMD_SOCKET", default_value = "/run/procfamd.sock")]
    socket: PathBuf,

    /// Path to /proc filesystem (for testing/mocking).
    #[arg(long, default_value = "/proc")]
    proc_path: String,

    /// Mount point of the cgroup v2 hierarchy.
    #[arg(long, default_value = "/sys/fs/cgroup", value_name = "PATH")]
    cgroup_path: String,

    /// Allow families to be tracked through cgroups.
    #[arg(long)]
    enable_cgroup: bool,

    /// Supplementary gids usable for group tracking (e.g. "700000-700099").
    #[arg(long, value_name = "MIN-MAX", value_parser = parse_group_range)]
    group_range: Option<(u32, u32)>,

    /// Hand out gids from --group-range instead of taking them from callers.
    #[arg(long, requires = "group_range")]
    allocate_groups: bool,

    /// Clock ticks (/proc/<pid>/stat starttime) two birthdays of one process may differ by.
    #[arg(long, default_value_t = DEFAULT_BIRTHDAY_TOLERANCE)]
    birthday_tolerance: u64,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

/// Parses "MIN-MAX" into an inclusive gid range.
fn parse_group_range(s: &str) -> Result<(u32, u32), String> {
    let (min, max) = s
        .trim()
        .split_once('-')
        .ok_or_else(|| format!("invalid group range '{}': expected MIN-MAX", s))?;
    let min = min
        .trim()
        .parse::<u32>()
        .map_err(|e| format!("invalid group range '{}': {}", s, e))?;
    let max = max
        .trim()
        .parse::<u32>()
        .map_err(|e| format!("invalid group range '{}': {}", s, e))?;
    if min == 0 || min > max {
        return Err(format!("invalid group range '{}'", s));
    }
    Ok((min, max))
}

/// Initializes the tracing subscriber with the appropriate log level.
/// Default level is INFO. Use -q for quiet mode (errors only).
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = ["procfamd", "procfam_core"]
        .iter()
        .filter_map(|target| format!("{}={}", target, level).parse().ok())
        .fold(EnvFilter::from_default_env(), |filter, directive| {
            filter.add_directive(directive)
        });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn monitor_config(args: &Args) -> Result<MonitorConfig, ProcdError> {
    if args.max_snapshot_interval < -1 {
        return Err(ProcdError::BadSnapshotInterval(args.max_snapshot_interval));
    }
    Ok(MonitorConfig::new(args.root_pid)
        .with_max_snapshot_interval(u64::try_from(args.max_snapshot_interval).ok())
        .with_fatal_root_watcher(args.except_if_root_dies)
        .with_birthday_tolerance(args.birthday_tolerance))
}

/// Counted from the last completed snapshot, so requests that never
/// snapshot do not push it back.
fn next_deadline<S: ProcessSource>(monitor: &Monitor<S>) -> Option<Instant> {
    monitor
        .snapshot_interval()
        .map(|interval| monitor.last_snapshot() + interval)
}

/// Runs the command loop until shutdown, a Quit request or a fatal error.
///
/// Requests are executed in arrival order. A due snapshot is taken before
/// the next request is read.
fn serve<S: ProcessSource>(
    monitor: &mut Monitor<S>,
    commands: &Receiver<Command>,
    running: &AtomicBool,
) -> Result<(), ProcdError> {
    while running.load(Ordering::SeqCst) {
        if next_deadline(monitor).is_some_and(|d| Instant::now() >= d) {
            debug!("Snapshot interval elapsed");
            monitor.snapshot()?;
        }
        let wait = next_deadline(monitor)
            .map(|d| d.saturating_duration_since(Instant::now()))
            .map_or(SHUTDOWN_POLL, |left| left.min(SHUTDOWN_POLL));

        match commands.recv_timeout(wait) {
            Ok(command) => {
                let quit = command.request == Request::Quit;
                let name = command.request.name();
                let started = Instant::now();
                let response =
                    Response::from_result(ipc::dispatch(monitor, command.request.clone()))?;
                debug!(
                    "{}: {:?} in {:?}",
                    name,
                    response.code,
                    started.elapsed()
                );
                command.respond(response);
                if quit {
                    info!("Quit requested");
                    return Ok(());
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                warn!("Command listener stopped");
                return Ok(());
            }
        }
    }
    Ok(())
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = monitor_config(&args)?;
    info!(
        "Config: root_pid={}, max_snapshot_interval={}, except_if_root_dies={}, proc={}",
        args.root_pid, args.max_snapshot_interval, args.except_if_root_dies, args.proc_path
    );

    let source = ProcfsSource::new(RealFs::new(), &args.proc_path)
        .with_birthday_tolerance(args.birthday_tolerance);
    let mut monitor = Monitor::new(source, config)?;

    if args.enable_cgroup {
        monitor = monitor.with_cgroup_control(CgroupV2::new(RealFs::new(), &args.cgroup_path));
        info!("Cgroup tracking: enabled ({})", args.cgroup_path);
    } else {
        debug!("Cgroup tracking: disabled");
    }
    if let Some((min, max)) = args.group_range {
        monitor.enable_group_tracking(min, max, args.allocate_groups);
    }

    let listener = ipc::bind(&args.socket)?;
    let (tx, rx) = mpsc::channel();
    ipc::spawn_listener(listener, tx)?;
    info!("Listening on {}", args.socket.display());

    // Setup graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    let result = serve(&mut monitor, &rx, &running);
    if let Err(e) = std::fs::remove_file(&args.socket) {
        debug!("Failed to remove socket {}: {}", args.socket.display(), e);
    }
    Ok(result?)
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);
    info!("procfamd {} starting", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(args) {
        error!("Fatal: {}", e);
        std::process::exit(1);
    }
    info!("Shutdown complete");
}

#[cfg(test)]
mod tests {
    use super::*;
    use procfam_core::collector::StaticSource;
    use procfam_core::error::FatalError;
    use procfam_core::ipc::{ErrorCode, ReplyBody};
    use procfam_core::process::ProcessRecord;
    use std::thread;

    fn source() -> StaticSource {
        StaticSource::new(vec![
            ProcessRecord::new(1, 0, 1),
            ProcessRecord::new(1000, 1, 5000),
            ProcessRecord::new(1001, 1000, 5001),
        ])
    }

    fn send(tx: &mpsc::Sender<Command>, request: Request) -> mpsc::Receiver<Response> {
        let (reply, response) = mpsc::channel();
        tx.send(Command::new(request, reply)).unwrap();
        response
    }

    #[test]
    fn test_parse_group_range() {
        assert_eq!(parse_group_range("700000-700099"), Ok((700000, 700099)));
        assert_eq!(parse_group_range(" 5 - 5 "), Ok((5, 5)));
        assert!(parse_group_range("700099-700000").is_err());
        assert!(parse_group_range("0-10").is_err());
        assert!(parse_group_range("700000").is_err());
        assert!(parse_group_range("a-b").is_err());
    }

    #[test]
    fn test_args_defaults() {
        let args = Args::try_parse_from(["procfamd", "--root-pid", "1000"]).unwrap();
        assert_eq!(args.max_snapshot_interval, -1);
        assert_eq!(args.birthday_tolerance, DEFAULT_BIRTHDAY_TOLERANCE);
        assert!(!args.except_if_root_dies);

        let config = monitor_config(&args).unwrap();
        assert_eq!(config.max_snapshot_interval, None);
        assert!(!config.fatal_root_watcher);
    }

    #[test]
    fn test_args_full() {
        let args = Args::try_parse_from([
            "procfamd",
            "--root-pid",
            "1000",
            "--watcher",
            "--max-snapshot-interval",
            "30",
            "--group-range",
            "700000-700010",
            "--allocate-groups",
            "-vv",
        ])
        .unwrap();
        assert_eq!(args.group_range, Some((700000, 700010)));
        assert!(args.allocate_groups);
        assert_eq!(args.verbose, 2);

        let config = monitor_config(&args).unwrap();
        assert_eq!(config.max_snapshot_interval, Some(30));
        assert!(config.fatal_root_watcher);
    }

    #[test]
    fn test_args_rejects_bad_interval() {
        let args = Args::try_parse_from([
            "procfamd",
            "--root-pid",
            "1000",
            "--max-snapshot-interval",
            "-5",
        ])
        .unwrap();
        assert!(matches!(
            monitor_config(&args),
            Err(ProcdError::BadSnapshotInterval(-5))
        ));
        assert!(Args::try_parse_from(["procfamd", "--root-pid", "1", "--allocate-groups"]).is_err());
    }

    #[test]
    fn test_serve_answers_until_quit() {
        let mut monitor = Monitor::new(source(), MonitorConfig::new(1000)).unwrap();
        let (tx, rx) = mpsc::channel();
        let running = AtomicBool::new(true);

        let register = send(
            &tx,
            Request::RegisterSubfamily {
                root_pid: 1001,
                watcher_pid: 0,
                max_snapshot_interval: -1,
            },
        );
        let refused = send(&tx, Request::UnregisterSubfamily { pid: 4242 });
        let quit = send(&tx, Request::Quit);
        let ignored = send(&tx, Request::Snapshot);

        serve(&mut monitor, &rx, &running).unwrap();

        assert!(register.recv().unwrap().code.is_success());
        let refused = refused.recv().unwrap();
        assert_eq!(refused.code, ErrorCode::FamilyNotFound);
        assert!(matches!(refused.body, ReplyBody::Message(_)));
        assert_eq!(quit.recv().unwrap(), Response::ok(ReplyBody::Empty));
        // requests after Quit are never answered
        drop(rx);
        assert!(ignored.recv().is_err());
        assert!(monitor.arena().lookup_family(1001).is_some());
    }

    #[test]
    fn test_serve_takes_proactive_snapshots() {
        let source = source();
        let config = MonitorConfig::new(1000).with_max_snapshot_interval(Some(0));
        let mut monitor = Monitor::new(source.clone(), config).unwrap();
        let calls = source.calls();
        let (tx, rx) = mpsc::channel();
        let running = AtomicBool::new(true);

        let sender = thread::spawn(move || {
            thread::sleep(Duration::from_millis(300));
            send(&tx, Request::Quit).recv().unwrap()
        });
        serve(&mut monitor, &rx, &running).unwrap();

        assert!(sender.join().unwrap().code.is_success());
        assert!(source.calls() > calls + 1);
    }

    #[test]
    fn test_busy_client_does_not_delay_snapshots() {
        let source = source();
        let config = MonitorConfig::new(1000).with_max_snapshot_interval(Some(1));
        let mut monitor = Monitor::new(source.clone(), config).unwrap();
        let calls = source.calls();
        let (tx, rx) = mpsc::channel();
        let running = AtomicBool::new(true);

        // Dump never snapshots; one arrives well inside every interval
        let sender = thread::spawn(move || {
            for _ in 0..25 {
                let reply = send(&tx, Request::Dump { pid: 0 }).recv().unwrap();
                assert!(reply.code.is_success());
                thread::sleep(Duration::from_millis(100));
            }
            send(&tx, Request::Quit).recv().unwrap()
        });
        serve(&mut monitor, &rx, &running).unwrap();

        assert!(sender.join().unwrap().code.is_success());
        assert!(source.calls() >= calls + 2);
    }

    #[test]
    fn test_serve_stops_on_fatal_error() {
        let source = source();
        let mut monitor = Monitor::new(source.clone(), MonitorConfig::new(1000)).unwrap();
        let (tx, rx) = mpsc::channel();
        let running = AtomicBool::new(true);

        source.set_failing(true);
        let reply = send(&tx, Request::Snapshot);
        let err = serve(&mut monitor, &rx, &running).unwrap_err();

        assert!(matches!(
            err,
            ProcdError::Fatal(FatalError::SourceUnavailable(_))
        ));
        // the caller sees the connection drop instead of a reply
        drop(rx);
        assert!(reply.recv().is_err());
    }

    #[test]
    fn test_serve_honors_shutdown_flag() {
        let mut monitor = Monitor::new(source(), MonitorConfig::new(1000)).unwrap();
        let (_tx, rx) = mpsc::channel();
        let running = AtomicBool::new(false);
        serve(&mut monitor, &rx, &running).unwrap();
    }
}
