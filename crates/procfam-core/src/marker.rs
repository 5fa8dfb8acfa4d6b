//! Environment markers.
//!
//! A launcher places `PROCFAM_ANCESTOR_<forker>=<child>:<time>:<nonce>` into
//! the environment of every process it creates. Children inherit the whole
//! set, so a process whose parent link is broken (reparented to init) can
//! still be matched to the family that spawned its ancestor.

use serde::{Deserialize, Serialize};

/// Maximum number of markers a single process may carry.
pub const MARKER_CAPACITY: usize = 32;

/// Environment variable prefix identifying a marker.
pub const MARKER_PREFIX: &str = "PROCFAM_ANCESTOR_";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarkerError {
    #[error("marker set is full ({MARKER_CAPACITY} entries)")]
    Full,
}

/// Ordered, bounded collection of marker strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerSet {
    entries: Vec<String>,
}

impl MarkerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from already formatted markers.
    pub fn from_entries<I, S>(entries: I) -> Result<Self, MarkerError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self::new();
        for entry in entries {
            set.push(entry)?;
        }
        Ok(set)
    }

    /// Harvests markers from the NUL-separated content of `/proc/[pid]/environ`.
    ///
    /// Entries without the marker prefix are skipped. Only the first
    /// [`MARKER_CAPACITY`] markers are kept; the second value counts the
    /// dropped ones.
    pub fn from_environ(content: &str) -> (Self, usize) {
        let mut set = Self::new();
        let mut dropped = 0;
        for entry in content
            .split('\0')
            .filter(|entry| entry.starts_with(MARKER_PREFIX))
        {
            if set.push(entry).is_err() {
                dropped += 1;
            }
        }
        (set, dropped)
    }

    pub fn push(&mut self, marker: impl Into<String>) -> Result<(), MarkerError> {
        if self.entries.len() >= MARKER_CAPACITY {
            return Err(MarkerError::Full);
        }
        self.entries.push(marker.into());
        Ok(())
    }

    /// Formats a marker as the `KEY=VALUE` environment entry.
    pub fn format_marker(forker_pid: i32, child_pid: i32, fork_time: i64, nonce: u32) -> String {
        format!("{MARKER_PREFIX}{forker_pid}={child_pid}:{fork_time}:{nonce}")
    }

    /// True when the set has no non-empty entry.
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|e| e.is_empty())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    pub fn contains(&self, marker: &str) -> bool {
        self.entries.iter().any(|e| e == marker)
    }

    /// Returns true if every non-empty entry of `self` appears in `other`.
    ///
    /// An empty set never matches and never is matched.
    pub fn matches(&self, other: &MarkerSet) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        self.entries
            .iter()
            .filter(|e| !e.is_empty())
            .all(|e| other.contains(e))
    }
}
