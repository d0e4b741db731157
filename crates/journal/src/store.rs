// SPDX-License-Identifier: MIT

//! The journal proper: opaque records keyed by (kind, id), WAL-backed,
//! snapshot-compacted, single writer enforced by an fs2 file lock.

use std::path::{Path, PathBuf};
use std::time::Duration;

use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::snapshot::{Snapshot, Stored, Tables};
use crate::wal::{Wal, WalOp};

/// WAL size that triggers snapshot compaction on the next write.
const COMPACT_THRESHOLD_BYTES: u64 = 4 * 1024 * 1024;

/// Logical tables the journal maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordKind {
    Task,
    Session,
    Diff,
    Container,
    LogRef,
}

impl RecordKind {
    pub const ALL: [RecordKind; 5] = [
        RecordKind::Task,
        RecordKind::Session,
        RecordKind::Diff,
        RecordKind::Container,
        RecordKind::LogRef,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Task => "tasks",
            RecordKind::Session => "sessions",
            RecordKind::Diff => "diffs",
            RecordKind::Container => "containers",
            RecordKind::LogRef => "log-refs",
        }
    }
}

/// How hard a write must try before acknowledging.
///
/// `Boundary` fsyncs the WAL before returning — required for state
/// changes that cross a lifecycle boundary (session start, diff create,
/// transitions to done/failed/applied/rejected). `BestEffort` leaves the
/// flush to the OS or the next boundary write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    Boundary,
    BestEffort,
}

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("journal serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("journal is locked by another process: {0}")]
    Locked(PathBuf),
}

/// Durable key-indexed store. Concurrent readers, one writer per record,
/// single process (file lock).
#[derive(Debug)]
pub struct Journal {
    db_path: PathBuf,
    tables: RwLock<Tables>,
    wal: Mutex<Wal>,
    /// Serializes writers and compaction against each other so a snapshot
    /// never captures a WAL sequence whose table apply is still in
    /// flight. Readers go through the RwLock and stay concurrent.
    write_lock: Mutex<()>,
    // Held for the journal's lifetime; dropping releases the lock.
    _lock: std::fs::File,
}

impl Journal {
    /// Open the journal at `db_path` (e.g. `./data/orchestrator.db`),
    /// creating parent directories as needed. Loads the snapshot, replays
    /// the WAL suffix, and takes the single-writer lock.
    pub fn open(db_path: &Path) -> Result<Self, JournalError> {
        if let Some(dir) = db_path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let lock_path = db_path.with_extension("lock");
        let lock = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        lock.try_lock_exclusive()
            .map_err(|_| JournalError::Locked(db_path.to_path_buf()))?;

        let snapshot = Snapshot::load(db_path)?;
        let wal_path = db_path.with_extension("wal");
        let (wal, entries) = Wal::open(&wal_path, snapshot.seq)?;

        let mut tables = snapshot.tables;
        for entry in entries {
            apply_op(&mut tables, entry.op, entry.at_ms);
        }

        tracing::debug!(
            path = %db_path.display(),
            wal_seq = wal.write_seq(),
            "journal opened"
        );

        Ok(Self {
            db_path: db_path.to_path_buf(),
            tables: RwLock::new(tables),
            wal: Mutex::new(wal),
            write_lock: Mutex::new(()),
            _lock: lock,
        })
    }

    /// Insert or replace a record.
    pub fn upsert<T: Serialize>(
        &self,
        kind: RecordKind,
        id: &str,
        record: &T,
        durability: Durability,
        now_ms: u64,
    ) -> Result<(), JournalError> {
        let blob = serde_json::to_value(record)?;
        self.write(
            WalOp::Upsert { kind, id: id.to_string(), blob },
            durability,
            now_ms,
        )
    }

    /// Fetch and decode a record.
    pub fn get<T: DeserializeOwned>(
        &self,
        kind: RecordKind,
        id: &str,
    ) -> Result<Option<T>, JournalError> {
        let tables = self.tables.read();
        match tables.table(kind).get(id) {
            Some(stored) => Ok(Some(serde_json::from_value(stored.blob.clone())?)),
            None => Ok(None),
        }
    }

    /// Decode every record of a kind, in id order. Records that no longer
    /// decode as `T` are skipped — schema drift is not a read error.
    pub fn list<T: DeserializeOwned>(&self, kind: RecordKind) -> Vec<T> {
        let tables = self.tables.read();
        tables
            .table(kind)
            .values()
            .filter_map(|stored| serde_json::from_value(stored.blob.clone()).ok())
            .collect()
    }

    /// Decode records of a kind that satisfy `pred`.
    pub fn list_where<T, F>(&self, kind: RecordKind, pred: F) -> Vec<T>
    where
        T: DeserializeOwned,
        F: Fn(&T) -> bool,
    {
        self.list(kind).into_iter().filter(|t| pred(t)).collect()
    }

    /// Ids present for a kind.
    pub fn ids(&self, kind: RecordKind) -> Vec<String> {
        self.tables.read().table(kind).keys().cloned().collect()
    }

    /// Remove a record. Returns whether it existed.
    pub fn delete(
        &self,
        kind: RecordKind,
        id: &str,
        durability: Durability,
        now_ms: u64,
    ) -> Result<bool, JournalError> {
        let existed = self.tables.read().table(kind).contains_key(id);
        if existed {
            self.write(WalOp::Delete { kind, id: id.to_string() }, durability, now_ms)?;
        }
        Ok(existed)
    }

    /// Delete records of `kind` last written more than `age` ago.
    /// Returns the purged ids.
    pub fn purge_older_than(
        &self,
        kind: RecordKind,
        age: Duration,
        now_ms: u64,
    ) -> Result<Vec<String>, JournalError> {
        let cutoff = now_ms.saturating_sub(age.as_millis() as u64);
        let stale: Vec<String> = {
            let tables = self.tables.read();
            tables
                .table(kind)
                .iter()
                .filter(|(_, stored)| stored.updated_at_ms < cutoff)
                .map(|(id, _)| id.clone())
                .collect()
        };
        for id in &stale {
            self.write(
                WalOp::Delete { kind, id: id.clone() },
                Durability::BestEffort,
                now_ms,
            )?;
        }
        if !stale.is_empty() {
            self.flush()?;
        }
        Ok(stale)
    }

    /// Fsync pending WAL writes.
    pub fn flush(&self) -> Result<(), JournalError> {
        self.wal.lock().sync()
    }

    /// Write a snapshot and truncate the WAL.
    pub fn compact(&self) -> Result<(), JournalError> {
        let _writers = self.write_lock.lock();
        self.compact_locked()
    }

    fn compact_locked(&self) -> Result<(), JournalError> {
        let mut wal = self.wal.lock();
        wal.sync()?;
        let snapshot = Snapshot {
            seq: wal.write_seq(),
            tables: self.tables.read().clone(),
        };
        snapshot.store(&self.db_path)?;
        wal.reset()?;
        tracing::debug!(seq = snapshot.seq, "journal compacted");
        Ok(())
    }

    pub fn len(&self, kind: RecordKind) -> usize {
        self.tables.read().table(kind).len()
    }

    pub fn is_empty(&self, kind: RecordKind) -> bool {
        self.len(kind) == 0
    }

    fn write(
        &self,
        op: WalOp,
        durability: Durability,
        now_ms: u64,
    ) -> Result<(), JournalError> {
        let _writers = self.write_lock.lock();
        let needs_compact = {
            let mut wal = self.wal.lock();
            wal.append(op.clone(), now_ms)?;
            if durability == Durability::Boundary {
                wal.sync()?;
            }
            wal.size_bytes() > COMPACT_THRESHOLD_BYTES
        };

        apply_op(&mut self.tables.write(), op, now_ms);

        if needs_compact {
            self.compact_locked()?;
        }
        Ok(())
    }
}

fn apply_op(tables: &mut Tables, op: WalOp, at_ms: u64) {
    match op {
        WalOp::Upsert { kind, id, blob } => {
            tables
                .table_mut(kind)
                .insert(id, Stored { blob, updated_at_ms: at_ms });
        }
        WalOp::Delete { kind, id } => {
            tables.table_mut(kind).remove(&id);
        }
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
