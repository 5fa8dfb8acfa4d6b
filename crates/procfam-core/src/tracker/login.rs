use crate::family::{FamilyArena, FamilyId};
use crate::process::ProcessRecord;

use super::Tracker;

/// Claims processes owned by a uid associated with a family.
#[derive(Debug, Default)]
pub struct LoginTracker {
    uids: Vec<(FamilyId, u32)>,
}

impl LoginTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_mapping(&mut self, family: FamilyId, uid: u32) {
        self.uids.push((family, uid));
    }
}

impl Tracker for LoginTracker {
    fn name(&self) -> &'static str {
        "login"
    }

    fn find_family(&self, record: &ProcessRecord, arena: &FamilyArena) -> Option<FamilyId> {
        super::deepest(
            arena,
            self.uids
                .iter()
                .filter(|(_, uid)| *uid == record.uid)
                .map(|(family, _)| *family),
        )
    }

    fn remove_mapping(&mut self, family: FamilyId) {
        self.uids.retain(|(f, _)| *f != family);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefers_deepest_family() {
        let mut arena = FamilyArena::new(100, 10, 0, None);
        let sub = arena.create_subfamily(arena.root(), 200, 20, 0, None);
        let mut tracker = LoginTracker::new();
        tracker.add_mapping(arena.root(), 1000);
        tracker.add_mapping(sub, 1000);

        let record = ProcessRecord::new(300, 1, 30).with_uid(1000);
        assert_eq!(tracker.find_family(&record, &arena), Some(sub));
        assert_eq!(
            tracker.find_family(&ProcessRecord::new(300, 1, 30).with_uid(0), &arena),
            None
        );

        tracker.remove_mapping(sub);
        assert_eq!(tracker.find_family(&record, &arena), Some(arena.root()));
    }
}
