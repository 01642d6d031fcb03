//! Persisted "highest applied sequence number".
//!
//! The coordination service replays the whole received-items list when a
//! session reconnects. The watermark survives restarts so replayed items are
//! recognised instead of applied a second time.

use crate::error::WatermarkError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub trait WatermarkStore: Send {
    /// Last persisted watermark; 0 when nothing was stored yet
    fn load(&self) -> Result<u64, WatermarkError>;

    fn store(&mut self, highest_applied: u64) -> Result<(), WatermarkError>;
}

/// On-disk record, one file per server and slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatermarkRecord {
    pub server: String,
    pub slot: String,
    pub highest_applied: u64,
}

/// Path of the watermark file for a server and slot inside `dir`
pub fn watermark_path(dir: &Path, server: &str, slot: &str) -> PathBuf {
    let sanitize = |s: &str| -> String {
        s.chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect()
    };
    dir.join(format!("{}_{}.json", sanitize(server), sanitize(slot)))
}

/// Read a record if the file exists
pub fn read_record(path: &Path) -> Result<Option<WatermarkRecord>, WatermarkError> {
    if !path.exists() {
        return Ok(None);
    }
    let data = fs::read_to_string(path)?;
    let record: WatermarkRecord = serde_json::from_str(&data)?;
    Ok(Some(record))
}

/// Write a record through a sibling temp file so a crash never leaves it truncated
pub fn write_record(path: &Path, record: &WatermarkRecord) -> Result<(), WatermarkError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(record)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// JSON file store keyed by server and slot
#[derive(Debug, Clone)]
pub struct FileWatermarkStore {
    path: PathBuf,
    server: String,
    slot: String,
}

impl FileWatermarkStore {
    pub fn new(dir: &Path, server: &str, slot: &str) -> Self {
        Self {
            path: watermark_path(dir, server, slot),
            server: server.to_string(),
            slot: slot.to_string(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl WatermarkStore for FileWatermarkStore {
    fn load(&self) -> Result<u64, WatermarkError> {
        match read_record(&self.path)? {
            Some(record) if record.server == self.server && record.slot == self.slot => {
                debug!(path = %self.path.display(), watermark = record.highest_applied, "watermark loaded");
                Ok(record.highest_applied)
            }
            Some(record) => {
                warn!(
                    path = %self.path.display(),
                    server = %record.server,
                    slot = %record.slot,
                    "watermark file belongs to another session, ignoring"
                );
                Ok(0)
            }
            None => Ok(0),
        }
    }

    fn store(&mut self, highest_applied: u64) -> Result<(), WatermarkError> {
        let record = WatermarkRecord {
            server: self.server.clone(),
            slot: self.slot.clone(),
            highest_applied,
        };
        write_record(&self.path, &record)
    }
}

/// Volatile store for tests and offline runs
#[derive(Debug, Clone, Default)]
pub struct MemoryWatermarkStore {
    value: u64,
}

impl MemoryWatermarkStore {
    pub fn new(value: u64) -> Self {
        Self { value }
    }
}

impl WatermarkStore for MemoryWatermarkStore {
    fn load(&self) -> Result<u64, WatermarkError> {
        Ok(self.value)
    }

    fn store(&mut self, highest_applied: u64) -> Result<(), WatermarkError> {
        self.value = highest_applied;
        Ok(())
    }
}
