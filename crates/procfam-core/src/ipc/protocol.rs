//! Wire messages exchanged over the command socket.
//!
//! Postcard encodes an enum as its variant index followed by the fields, so
//! the first varint of every request is its operation code. Variants may be
//! appended but never reordered.

use serde::{Deserialize, Serialize};

use crate::error::ProcdError;
use crate::family::{FamilyDump, FamilyUsage};
use crate::marker::MarkerSet;
use crate::process::Pid;

/// In every request `pid` names a family by its root pid; `0` is the root
/// family except for [`Request::UnregisterSubfamily`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    RegisterSubfamily {
        root_pid: Pid,
        watcher_pid: Pid,
        /// Seconds, -1 for no limit.
        max_snapshot_interval: i64,
    },
    TrackViaEnvironment { pid: Pid, markers: MarkerSet },
    TrackViaLogin { pid: Pid, login: String },
    /// `gid` is ignored when the daemon allocates gids itself.
    TrackViaSupplementaryGroup { pid: Pid, gid: Option<u32> },
    TrackViaCgroup { pid: Pid, cgroup: String },
    SignalProcess { pid: Pid, signal: i32 },
    SignalFamily { pid: Pid, signal: i32 },
    SuspendFamily { pid: Pid },
    ContinueFamily { pid: Pid },
    KillFamily { pid: Pid },
    GetUsage { pid: Pid },
    UnregisterSubfamily { pid: Pid },
    Snapshot,
    Dump { pid: Pid },
    Quit,
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::RegisterSubfamily { .. } => "register_subfamily",
            Request::TrackViaEnvironment { .. } => "track_via_environment",
            Request::TrackViaLogin { .. } => "track_via_login",
            Request::TrackViaSupplementaryGroup { .. } => "track_via_supplementary_group",
            Request::TrackViaCgroup { .. } => "track_via_cgroup",
            Request::SignalProcess { .. } => "signal_process",
            Request::SignalFamily { .. } => "signal_family",
            Request::SuspendFamily { .. } => "suspend_family",
            Request::ContinueFamily { .. } => "continue_family",
            Request::KillFamily { .. } => "kill_family",
            Request::GetUsage { .. } => "get_usage",
            Request::UnregisterSubfamily { .. } => "unregister_subfamily",
            Request::Snapshot => "snapshot",
            Request::Dump { .. } => "dump",
            Request::Quit => "quit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    Success,
    BadRootPid,
    BadWatcherPid,
    BadSnapshotInterval,
    ProcessNotFamily,
    AlreadyRegistered,
    FamilyNotFound,
    UnregisterRoot,
    NoGroupIdAvailable,
    NoCgroupIdAvailable,
    BadCgroup,
}

impl ErrorCode {
    /// Wire code for a recoverable error. Fatal errors have none: the daemon
    /// stops instead of answering.
    pub fn from_error(err: &ProcdError) -> Option<Self> {
        Some(match err {
            ProcdError::BadRootPid(_) => ErrorCode::BadRootPid,
            ProcdError::BadWatcherPid(_) => ErrorCode::BadWatcherPid,
            ProcdError::BadSnapshotInterval(_) => ErrorCode::BadSnapshotInterval,
            ProcdError::ProcessNotFamily(_) => ErrorCode::ProcessNotFamily,
            ProcdError::AlreadyRegistered(_) => ErrorCode::AlreadyRegistered,
            ProcdError::FamilyNotFound(_) => ErrorCode::FamilyNotFound,
            ProcdError::UnregisterRoot => ErrorCode::UnregisterRoot,
            ProcdError::NoGroupIdAvailable => ErrorCode::NoGroupIdAvailable,
            ProcdError::NoCgroupIdAvailable => ErrorCode::NoCgroupIdAvailable,
            ProcdError::BadCgroup(_) => ErrorCode::BadCgroup,
            ProcdError::Fatal(_) => return None,
        })
    }

    pub fn is_success(self) -> bool {
        self == ErrorCode::Success
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReplyBody {
    Empty,
    Gid(u32),
    Usage(FamilyUsage),
    Dump(Vec<FamilyDump>),
    /// Human-readable detail accompanying an error code.
    Message(String),
}

/// `code` is encoded first so a client can branch before decoding the body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub code: ErrorCode,
    pub body: ReplyBody,
}

impl Response {
    pub fn ok(body: ReplyBody) -> Self {
        Self {
            code: ErrorCode::Success,
            body,
        }
    }

    pub fn from_result(result: Result<ReplyBody, ProcdError>) -> Result<Self, ProcdError> {
        match result {
            Ok(body) => Ok(Self::ok(body)),
            Err(err) => match ErrorCode::from_error(&err) {
                Some(code) => Ok(Self {
                    code,
                    body: ReplyBody::Message(err.to_string()),
                }),
                None => Err(err),
            },
        }
    }
}
