use nix::sys::signal::Signal;

use crate::collector::ProcessSource;
use crate::error::ProcdError;
use crate::monitor::Monitor;

use super::protocol::{ReplyBody, Request};

/// Executes one request against the Monitor. `Quit` is a no-op here; the
/// caller decides when to stop.
pub fn dispatch<S: ProcessSource>(
    monitor: &mut Monitor<S>,
    request: Request,
) -> Result<ReplyBody, ProcdError> {
    match request {
        Request::RegisterSubfamily {
            root_pid,
            watcher_pid,
            max_snapshot_interval,
        } => monitor.register_subfamily(root_pid, watcher_pid, max_snapshot_interval)?,
        Request::TrackViaEnvironment { pid, markers } => {
            monitor.track_family_via_environment(pid, markers)?
        }
        Request::TrackViaLogin { pid, login } => monitor.track_family_via_login(pid, &login)?,
        Request::TrackViaSupplementaryGroup { pid, gid } => {
            let gid = monitor.track_family_via_supplementary_group(pid, gid)?;
            return Ok(ReplyBody::Gid(gid));
        }
        Request::TrackViaCgroup { pid, cgroup } => monitor.track_family_via_cgroup(pid, &cgroup)?,
        Request::SignalProcess { pid, signal } => monitor.signal_process(pid, signal)?,
        Request::SignalFamily { pid, signal } => monitor.signal_family(pid, signal)?,
        Request::SuspendFamily { pid } => monitor.signal_family(pid, Signal::SIGSTOP as i32)?,
        Request::ContinueFamily { pid } => monitor.signal_family(pid, Signal::SIGCONT as i32)?,
        Request::KillFamily { pid } => monitor.signal_family(pid, Signal::SIGKILL as i32)?,
        Request::GetUsage { pid } => return Ok(ReplyBody::Usage(monitor.get_family_usage(pid)?)),
        Request::UnregisterSubfamily { pid } => monitor.unregister_subfamily(pid)?,
        Request::Snapshot => monitor.snapshot()?,
        Request::Dump { pid } => return Ok(ReplyBody::Dump(monitor.dump(pid)?)),
        Request::Quit => {}
    }
    Ok(ReplyBody::Empty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::StaticSource;
    use crate::monitor::{MonitorConfig, RecordingSignaller};
    use crate::process::ProcessRecord;

    fn setup() -> (Monitor<StaticSource>, RecordingSignaller) {
        let source = StaticSource::new(vec![
            ProcessRecord::new(1, 0, 1),
            ProcessRecord::new(1000, 1, 5000),
            ProcessRecord::new(1001, 1000, 5001).with_cpu(4, 1),
        ]);
        let signaller = RecordingSignaller::new();
        let monitor = Monitor::new(source, MonitorConfig::new(1000))
            .unwrap()
            .with_signaller(signaller.clone());
        (monitor, signaller)
    }

    #[test]
    fn test_family_signals_map_to_numbers() {
        let (mut monitor, signaller) = setup();
        dispatch(&mut monitor, Request::SuspendFamily { pid: 0 }).unwrap();
        dispatch(&mut monitor, Request::ContinueFamily { pid: 0 }).unwrap();
        dispatch(&mut monitor, Request::KillFamily { pid: 0 }).unwrap();

        let mut signals: Vec<i32> = signaller.sent().into_iter().map(|(_, s)| s).collect();
        signals.dedup();
        assert_eq!(
            signals,
            vec![
                Signal::SIGSTOP as i32,
                Signal::SIGCONT as i32,
                Signal::SIGKILL as i32
            ]
        );
    }

    #[test]
    fn test_replies_carry_results() {
        let (mut monitor, _) = setup();
        match dispatch(&mut monitor, Request::GetUsage { pid: 0 }).unwrap() {
            ReplyBody::Usage(usage) => assert_eq!(usage.user_cpu_time, 4),
            other => panic!("unexpected reply {:?}", other),
        }

        dispatch(
            &mut monitor,
            Request::RegisterSubfamily {
                root_pid: 1001,
                watcher_pid: 0,
                max_snapshot_interval: -1,
            },
        )
        .unwrap();
        match dispatch(&mut monitor, Request::Dump { pid: 0 }).unwrap() {
            ReplyBody::Dump(families) => assert_eq!(families.len(), 2),
            other => panic!("unexpected reply {:?}", other),
        }
        assert_eq!(
            dispatch(&mut monitor, Request::Quit).unwrap(),
            ReplyBody::Empty
        );
    }

    #[test]
    fn test_errors_pass_through() {
        let (mut monitor, _) = setup();
        assert!(matches!(
            dispatch(&mut monitor, Request::UnregisterSubfamily { pid: 0 }),
            Err(ProcdError::FamilyNotFound(0))
        ));
        assert!(matches!(
            dispatch(
                &mut monitor,
                Request::TrackViaSupplementaryGroup { pid: 0, gid: None }
            ),
            Err(ProcdError::NoGroupIdAvailable)
        ));
    }
}
