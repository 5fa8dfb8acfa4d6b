use crate::family::{FamilyArena, FamilyId};
use crate::process::ProcessRecord;

use super::Tracker;

/// Claims processes running in a cgroup associated with a family.
#[derive(Debug, Default)]
pub struct CgroupTracker {
    groups: Vec<(FamilyId, String)>,
}

impl CgroupTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_mapping(&mut self, family: FamilyId, group: String) {
        self.groups.retain(|(f, _)| *f != family);
        self.groups.push((family, group));
    }
}

/// Normalizes `job_1`, `/job_1` and `/job_1/` to `/job_1`.
fn normalize(group: &str) -> String {
    format!("/{}", group.trim_matches('/'))
}

impl Tracker for CgroupTracker {
    fn name(&self) -> &'static str {
        "cgroup"
    }

    fn find_family(&self, record: &ProcessRecord, arena: &FamilyArena) -> Option<FamilyId> {
        let path = normalize(record.cgroup.as_deref()?);
        super::deepest(
            arena,
            self.groups
                .iter()
                .filter(|(_, group)| normalize(group) == path)
                .map(|(family, _)| *family),
        )
    }

    fn remove_mapping(&mut self, family: FamilyId) {
        self.groups.retain(|(f, _)| *f != family);
    }
}
