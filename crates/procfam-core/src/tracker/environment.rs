use crate::family::{FamilyArena, FamilyId};
use crate::marker::MarkerSet;
use crate::process::ProcessRecord;

use super::Tracker;

/// Claims processes whose inherited markers contain a family's registered set.
#[derive(Debug, Default)]
pub struct EnvironmentTracker {
    sets: Vec<(FamilyId, MarkerSet)>,
}

impl EnvironmentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_mapping(&mut self, family: FamilyId, markers: MarkerSet) {
        self.sets.push((family, markers));
    }
}

impl Tracker for EnvironmentTracker {
    fn name(&self) -> &'static str {
        "environment"
    }

    fn find_family(&self, record: &ProcessRecord, arena: &FamilyArena) -> Option<FamilyId> {
        if record.markers.is_empty() {
            return None;
        }
        super::deepest(
            arena,
            self.sets
                .iter()
                .filter(|(_, registered)| registered.matches(&record.markers))
                .map(|(family, _)| *family),
        )
    }

    fn remove_mapping(&mut self, family: FamilyId) {
        self.sets.retain(|(f, _)| *f != family);
    }
}
