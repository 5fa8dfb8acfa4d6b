//! Snapshot provider for the Linux `/proc` filesystem.
//!
//! This module provides parsers, the boot time estimator, the rate sampler
//! and the provider that ties them together.

pub mod boot_time;
pub mod parser;
pub mod sampler;
pub mod source;

pub use boot_time::BootTime;
pub use parser::UserResolver;
pub use sampler::UsageSampler;
pub use source::ProcfsSource;
