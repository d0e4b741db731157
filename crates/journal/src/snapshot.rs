// SPDX-License-Identifier: MIT

//! zstd-compressed snapshot of the journal tables.
//!
//! A snapshot plus the WAL suffix after its sequence number reconstructs
//! the full state. Snapshots are written copy-on-write: temp file, fsync,
//! atomic rename.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::store::{JournalError, RecordKind};

/// One stored record: the opaque blob plus its last-write timestamp,
/// which drives age-based purging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stored {
    pub blob: serde_json::Value,
    pub updated_at_ms: u64,
}

/// The journal's logical tables. BTreeMaps keep `list` output ordered.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tables {
    #[serde(default)]
    pub tasks: BTreeMap<String, Stored>,
    #[serde(default)]
    pub sessions: BTreeMap<String, Stored>,
    #[serde(default)]
    pub diffs: BTreeMap<String, Stored>,
    #[serde(default)]
    pub containers: BTreeMap<String, Stored>,
    #[serde(default)]
    pub log_refs: BTreeMap<String, Stored>,
}

impl Tables {
    pub fn table(&self, kind: RecordKind) -> &BTreeMap<String, Stored> {
        match kind {
            RecordKind::Task => &self.tasks,
            RecordKind::Session => &self.sessions,
            RecordKind::Diff => &self.diffs,
            RecordKind::Container => &self.containers,
            RecordKind::LogRef => &self.log_refs,
        }
    }

    pub fn table_mut(&mut self, kind: RecordKind) -> &mut BTreeMap<String, Stored> {
        match kind {
            RecordKind::Task => &mut self.tasks,
            RecordKind::Session => &mut self.sessions,
            RecordKind::Diff => &mut self.diffs,
            RecordKind::Container => &mut self.containers,
            RecordKind::LogRef => &mut self.log_refs,
        }
    }
}

/// On-disk snapshot: tables as of WAL sequence `seq`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub seq: u64,
    pub tables: Tables,
}

impl Snapshot {
    /// Load a snapshot, or an empty one when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, JournalError> {
        if !path.exists() {
            return Ok(Snapshot::default());
        }
        let file = File::open(path)?;
        let decoder = zstd::Decoder::new(file)?;
        Ok(serde_json::from_reader(decoder)?)
    }

    /// Write atomically: temp sibling, fsync, rename over the target.
    pub fn store(&self, path: &Path) -> Result<(), JournalError> {
        let tmp = path.with_extension("db.tmp");
        {
            let file = File::create(&tmp)?;
            let mut encoder = zstd::Encoder::new(file, 0)?;
            serde_json::to_writer(&mut encoder, self)?;
            let file = encoder.finish()?;
            file.sync_data()?;
        }
        std::fs::rename(&tmp, path)?;
        if let Some(dir) = path.parent() {
            // Persist the rename itself.
            if let Ok(d) = File::open(dir) {
                let _ = d.sync_data();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
