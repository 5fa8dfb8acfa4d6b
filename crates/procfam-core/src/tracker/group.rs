use std::ops::RangeInclusive;

use crate::family::{FamilyArena, FamilyId};
use crate::process::ProcessRecord;

use super::Tracker;

/// Claims processes carrying a supplementary gid dedicated to a family.
///
/// Disabled until a gid range is configured. In allocating mode the tracker
/// hands out unused gids from the range; otherwise callers name the gid.
#[derive(Debug, Default)]
pub struct GroupTracker {
    range: Option<RangeInclusive<u32>>,
    allocating: bool,
    gids: Vec<(FamilyId, u32)>,
}

impl GroupTracker {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn enable(&mut self, min: u32, max: u32, allocating: bool) {
        self.range = Some(min..=max);
        self.allocating = allocating;
    }

    pub fn is_enabled(&self) -> bool {
        self.range.is_some()
    }

    /// Associates a gid with `family` and returns it, or `None` when no gid
    /// can be used.
    pub fn add_mapping(&mut self, family: FamilyId, requested: Option<u32>) -> Option<u32> {
        let range = self.range.clone()?;
        let gid = if self.allocating {
            range.into_iter().find(|gid| !self.gids.iter().any(|(_, g)| g == gid))?
        } else {
            requested?
        };
        self.gids.push((family, gid));
        Some(gid)
    }
}

impl Tracker for GroupTracker {
    fn name(&self) -> &'static str {
        "group"
    }

    fn find_family(&self, record: &ProcessRecord, arena: &FamilyArena) -> Option<FamilyId> {
        super::deepest(
            arena,
            self.gids
                .iter()
                .filter(|(_, gid)| record.groups.contains(gid))
                .map(|(family, _)| *family),
        )
    }

    fn remove_mapping(&mut self, family: FamilyId) {
        self.gids.retain(|(f, _)| *f != family);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_tracker_refuses() {
        let arena = FamilyArena::new(100, 10, 0, None);
        let mut tracker = GroupTracker::disabled();
        assert!(!tracker.is_enabled());
        assert_eq!(tracker.add_mapping(arena.root(), Some(700001)), None);
    }

    #[test]
    fn test_allocating_hands_out_free_gids() {
        let mut arena = FamilyArena::new(100, 10, 0, None);
        let sub = arena.create_subfamily(arena.root(), 200, 20, 0, None);
        let mut tracker = GroupTracker::disabled();
        tracker.enable(700000, 700001, true);

        assert_eq!(tracker.add_mapping(arena.root(), None), Some(700000));
        assert_eq!(tracker.add_mapping(sub, Some(1)), Some(700001));
        assert_eq!(tracker.add_mapping(sub, None), None);

        let record = ProcessRecord::new(300, 1, 30).with_groups(vec![27, 700001]);
        assert_eq!(tracker.find_family(&record, &arena), Some(sub));

        tracker.remove_mapping(sub);
        assert_eq!(tracker.find_family(&record, &arena), None);
        assert_eq!(tracker.add_mapping(sub, None), Some(700001));
    }

    #[test]
    fn test_non_allocating_uses_caller_gid() {
        let arena = FamilyArena::new(100, 10, 0, None);
        let mut tracker = GroupTracker::disabled();
        tracker.enable(700000, 700010, false);
        assert_eq!(tracker.add_mapping(arena.root(), None), None);
        assert_eq!(tracker.add_mapping(arena.root(), Some(700005)), Some(700005));
    }
}
