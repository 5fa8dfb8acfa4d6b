//! Error types shared by the engine, the snapshot providers and the wire layer.

use crate::process::Pid;

/// Recoverable failure of a Monitor operation.
///
/// Every variant except [`ProcdError::Fatal`] maps one-to-one onto a wire
/// [`ErrorCode`](crate::ipc::protocol::ErrorCode).
#[derive(Debug, thiserror::Error)]
pub enum ProcdError {
    #[error("bad root pid: {0}")]
    BadRootPid(Pid),
    #[error("bad watcher pid: {0}")]
    BadWatcherPid(Pid),
    #[error("bad max snapshot interval: {0}")]
    BadSnapshotInterval(i64),
    #[error("pid {0} is not in a tracked family")]
    ProcessNotFamily(Pid),
    #[error("pid {0} is already a family root")]
    AlreadyRegistered(Pid),
    #[error("family with root {0} not found")]
    FamilyNotFound(Pid),
    #[error("the root family cannot be unregistered")]
    UnregisterRoot,
    #[error("no tracking group id available")]
    NoGroupIdAvailable,
    #[error("cgroup tracking is not available")]
    NoCgroupIdAvailable,
    #[error("bad cgroup: {0}")]
    BadCgroup(String),
    #[error(transparent)]
    Fatal(#[from] FatalError),
}

/// Failure that leaves the Monitor unusable. The daemon exits on any of these.
#[derive(Debug, thiserror::Error)]
pub enum FatalError {
    #[error("snapshot provider unavailable: {0}")]
    SourceUnavailable(#[from] CollectError),
    #[error("watcher pid {0} of the root family exited")]
    WatcherExited(Pid),
    #[error("internal invariant violated: {0}")]
    Invariant(String),
}

/// Error type for snapshot collection failures.
#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    /// Process disappeared during collection.
    #[error("process {0} disappeared")]
    ProcessGone(Pid),
    /// `/proc/[pid]/stat` kept changing under us.
    #[error("process {0} data stayed garbled after {1} reads")]
    Garbled(Pid, u32),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(String),
}

/// Framing or decoding failure on the command socket.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    Crc { expected: u32, actual: u32 },
    #[error("frame of {0} bytes exceeds the limit")]
    TooLarge(usize),
    #[error("decode error: {0}")]
    Decode(#[from] postcard::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_converts_into_procd_error() {
        let err: ProcdError = FatalError::WatcherExited(42).into();
        assert!(matches!(err, ProcdError::Fatal(FatalError::WatcherExited(42))));
        assert_eq!(err.to_string(), "watcher pid 42 of the root family exited");
    }

    #[test]
    fn test_collect_error_display() {
        assert_eq!(
            CollectError::ProcessGone(7).to_string(),
            "process 7 disappeared"
        );
        assert_eq!(
            CollectError::Garbled(7, 5).to_string(),
            "process 7 data stayed garbled after 5 reads"
        );
    }
}
