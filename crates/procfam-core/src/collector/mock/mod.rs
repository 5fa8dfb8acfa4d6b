//! Test doubles: in-memory filesystem, fixtures and a scripted process source.

mod filesystem;
mod scenarios;
mod source;

pub use filesystem::MockFs;
pub use source::StaticSource;
