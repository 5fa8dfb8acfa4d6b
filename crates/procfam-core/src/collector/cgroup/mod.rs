//! cgroup v2 support: file parsers and the controller used by cgroup-tracked families.

pub mod control;
pub mod parser;

pub use control::{CgroupControl, CgroupCounters, CgroupError, CgroupV2};
