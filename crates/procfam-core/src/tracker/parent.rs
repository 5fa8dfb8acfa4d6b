use crate::family::{FamilyArena, FamilyId};
use crate::process::ProcessRecord;

use super::Tracker;

/// Claims a process whose parent is already a member.
///
/// The parent must not be younger than the child; otherwise the parent pid
/// was reused after the real parent exited.
#[derive(Debug, Default)]
pub struct ParentTracker;

impl Tracker for ParentTracker {
    fn name(&self) -> &'static str {
        "parent"
    }

    fn find_family(&self, record: &ProcessRecord, arena: &FamilyArena) -> Option<FamilyId> {
        let parent = arena.member_by_pid(record.ppid)?;
        (parent.record().birthday <= record.birthday).then(|| parent.family())
    }

    fn remove_mapping(&mut self, _family: FamilyId) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_must_be_older() {
        let mut arena = FamilyArena::new(100, 10, 0, None);
        let root = arena.root();
        arena.add_member(root, ProcessRecord::new(100, 1, 10)).unwrap();

        let tracker = ParentTracker;
        assert_eq!(
            tracker.find_family(&ProcessRecord::new(101, 100, 11), &arena),
            Some(root)
        );
        assert_eq!(
            tracker.find_family(&ProcessRecord::new(101, 100, 9), &arena),
            None
        );
        assert_eq!(
            tracker.find_family(&ProcessRecord::new(101, 55, 11), &arena),
            None
        );
    }
}
