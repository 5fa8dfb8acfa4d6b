//! Snapshot providers.
//!
//! A provider lists every live process with identity, parent, owner,
//! resource counters and inherited environment markers. The Monitor pulls a
//! fresh list at the start of every reconciliation pass.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     ProcessSource (trait)                   │
//! │  ┌─────────────────────────────┐   ┌─────────────────────┐  │
//! │  │       ProcfsSource          │   │    StaticSource     │  │
//! │  │  - /proc/[pid]/stat,status  │   │  (scripted tests)   │  │
//! │  │  - BootTime, UsageSampler   │   └─────────────────────┘  │
//! │  └──────────────┬──────────────┘                            │
//! │                 │        ┌─────────────────────┐            │
//! │                 │        │      CgroupV2       │            │
//! │                 │        │  - cgroup.procs     │            │
//! │                 │        │  - cpu/memory/io    │            │
//! │                 │        └──────────┬──────────┘            │
//! │                 └──────────┬────────┘                       │
//! │                     ┌──────▼──────┐                         │
//! │                     │  FileSystem │ (trait)                 │
//! │                     └──────┬──────┘                         │
//! └────────────────────────────┼────────────────────────────────┘
//!                              │
//!              ┌───────────────┼───────────────┐
//!              │               │               │
//!       ┌──────▼──────┐ ┌──────▼──────┐ ┌──────▼──────┐
//!       │   RealFs    │ │   MockFs    │ │  Scenarios  │
//!       │ (Linux)     │ │ (Testing)   │ │ (Fixtures)  │
//!       └─────────────┘ └─────────────┘ └─────────────┘
//! ```
//!
//! # Usage
//!
//! ## Production (Linux)
//!
//! ```ignore
//! use procfam_core::collector::{ProcessSource, ProcfsSource, RealFs};
//!
//! let mut source = ProcfsSource::new(RealFs::new(), "/proc");
//! let processes = source.list_processes().unwrap();
//! ```
//!
//! ## Testing (with MockFs)
//!
//! ```
//! use procfam_core::collector::{MockFs, ProcessSource, ProcfsSource};
//!
//! let mut source = ProcfsSource::new(MockFs::job_tree(), "/proc");
//! let processes = source.list_processes().unwrap();
//! assert_eq!(processes.len(), 4);
//! ```

pub mod cgroup;
pub mod mock;
pub mod procfs;
pub mod traits;

use crate::error::CollectError;
use crate::process::ProcessRecord;

pub use cgroup::{CgroupControl, CgroupCounters, CgroupV2};
pub use mock::{MockFs, StaticSource};
pub use procfs::{ProcfsSource, UserResolver};
pub use traits::{FileSystem, RealFs};

/// Produces the full list of live processes on demand.
pub trait ProcessSource {
    /// Lists every live process. An error means the provider itself is
    /// unusable; per-process failures are skipped.
    fn list_processes(&mut self) -> Result<Vec<ProcessRecord>, CollectError>;

    /// Maps a login name to a uid, if the provider knows the user database.
    fn lookup_uid(&self, _login: &str) -> Option<u32> {
        None
    }
}

impl<T: ProcessSource + ?Sized> ProcessSource for Box<T> {
    fn list_processes(&mut self) -> Result<Vec<ProcessRecord>, CollectError> {
        (**self).list_processes()
    }

    fn lookup_uid(&self, login: &str) -> Option<u32> {
        (**self).lookup_uid(login)
    }
}
