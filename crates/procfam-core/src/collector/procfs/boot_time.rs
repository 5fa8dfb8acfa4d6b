//! System boot time estimation.
//!
//! `/proc/stat` btime and `now - /proc/uptime` drift apart by a second or so
//! on busy systems. The older of the two is used so that process ages never
//! come out negative, and the estimate is refreshed once a minute.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::collector::procfs::parser::{parse_btime, parse_uptime};
use crate::collector::traits::FileSystem;
use crate::error::CollectError;

/// Seconds between two reads of the boot time sources.
pub const BOOT_TIME_REFRESH_SECS: f64 = 60.0;

#[derive(Debug)]
pub struct BootTime {
    stat_path: PathBuf,
    uptime_path: PathBuf,
    value: Option<f64>,
    refreshed_at: f64,
}

impl BootTime {
    pub fn new(proc_path: &Path) -> Self {
        Self {
            stat_path: proc_path.join("stat"),
            uptime_path: proc_path.join("uptime"),
            value: None,
            refreshed_at: 0.0,
        }
    }

    /// Boot time in seconds since the epoch, as of wall time `now`.
    pub fn get<F: FileSystem>(&mut self, fs: &F, now: f64) -> Result<f64, CollectError> {
        if let Some(value) = self.value
            && now - self.refreshed_at < BOOT_TIME_REFRESH_SECS
        {
            return Ok(value);
        }

        let from_stat = fs
            .read_to_string(&self.stat_path)
            .ok()
            .and_then(|content| parse_btime(&content).ok())
            .map(|btime| btime as f64);
        let from_uptime = fs
            .read_to_string(&self.uptime_path)
            .ok()
            .and_then(|content| parse_uptime(&content).ok())
            .map(|uptime| now - uptime);

        let value = match (from_stat, from_uptime) {
            (Some(a), Some(b)) => a.min(b),
            (Some(v), None) | (None, Some(v)) => {
                warn!("only one boot time source readable, using {}", v);
                v
            }
            (None, None) => {
                return Err(CollectError::Parse(
                    "neither btime nor uptime is readable".to_string(),
                ));
            }
        };

        self.value = Some(value);
        self.refreshed_at = now;
        Ok(value)
    }
}
