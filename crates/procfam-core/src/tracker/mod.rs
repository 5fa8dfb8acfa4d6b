//! Classification strategies.
//!
//! Each tracker holds associations between families and some process
//! attribute and proposes a family for a not yet classified process. The
//! Monitor runs them in a fixed precedence; see [`crate::monitor`].

mod cgroup;
mod environment;
mod group;
mod login;
mod parent;
mod pid;

pub use cgroup::CgroupTracker;
pub use environment::EnvironmentTracker;
pub use group::GroupTracker;
pub use login::LoginTracker;
pub use parent::ParentTracker;
pub use pid::PidTracker;

use crate::family::{FamilyArena, FamilyId};
use crate::process::ProcessRecord;

pub trait Tracker {
    fn name(&self) -> &'static str;

    /// Family this tracker would put `record` in, if any.
    fn find_family(&self, record: &ProcessRecord, arena: &FamilyArena) -> Option<FamilyId>;

    /// Forgets every association with `family`.
    fn remove_mapping(&mut self, family: FamilyId);
}

/// Picks the most specific (deepest) of several candidate families.
fn deepest(arena: &FamilyArena, candidates: impl Iterator<Item = FamilyId>) -> Option<FamilyId> {
    candidates.max_by_key(|id| arena.depth(*id))
}
