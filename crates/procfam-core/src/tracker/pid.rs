use crate::family::{FamilyArena, FamilyId};
use crate::process::{Pid, ProcessRecord};

use super::Tracker;

/// Claims a process whose `(pid, birthday)` is a registered family root.
#[derive(Debug)]
pub struct PidTracker {
    roots: Vec<(FamilyId, Pid, u64)>,
    birthday_tolerance: u64,
}

impl PidTracker {
    pub fn new(birthday_tolerance: u64) -> Self {
        Self {
            roots: Vec::new(),
            birthday_tolerance,
        }
    }

    pub fn add_mapping(&mut self, family: FamilyId, pid: Pid, birthday: u64) {
        self.roots.push((family, pid, birthday));
    }
}

impl Tracker for PidTracker {
    fn name(&self) -> &'static str {
        "pid"
    }

    fn find_family(&self, record: &ProcessRecord, arena: &FamilyArena) -> Option<FamilyId> {
        super::deepest(
            arena,
            self.roots
                .iter()
                .filter(|(_, pid, birthday)| {
                    record.same_process(*pid, *birthday, self.birthday_tolerance)
                })
                .map(|(family, _, _)| *family),
        )
    }

    fn remove_mapping(&mut self, family: FamilyId) {
        self.roots.retain(|(f, _, _)| *f != family);
    }
}
