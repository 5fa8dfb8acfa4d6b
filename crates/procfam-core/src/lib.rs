//! procfam-core - process family tracking engine.
//!
//! Provides:
//! - `collector` - snapshot providers (`/proc`, scripted) and the cgroup v2 controller
//! - `family` - family tree and member bookkeeping
//! - `tracker` - classification strategies
//! - `monitor` - the engine: reconciliation passes and family operations
//! - `ipc` - wire protocol, Unix-socket listener and client
//! - `marker` - environment ancestry markers
//! - `error` - error types

pub mod collector;
pub mod error;
pub mod family;
pub mod ipc;
pub mod marker;
pub mod monitor;
pub mod process;
pub mod tracker;

pub use error::{CollectError, FatalError, ProcdError, ProtocolError};
pub use monitor::{Monitor, MonitorConfig};
pub use process::{Pid, ProcessRecord};
