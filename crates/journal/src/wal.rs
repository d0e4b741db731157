// SPDX-License-Identifier: MIT

//! Append-only write-ahead log, one JSON entry per line.
//!
//! The WAL is the source of truth between snapshots: every mutation is
//! appended here before the in-memory tables change. A torn final line
//! (crash mid-append) is treated as truncation and dropped on replay.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::store::{JournalError, RecordKind};

/// One logged mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum WalOp {
    Upsert {
        kind: RecordKind,
        id: String,
        blob: serde_json::Value,
    },
    Delete {
        kind: RecordKind,
        id: String,
    },
}

/// A sequenced WAL entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    pub seq: u64,
    pub at_ms: u64,
    #[serde(flatten)]
    pub op: WalOp,
}

/// Append-only WAL file handle. Single writer; the [`crate::Journal`]
/// serializes access.
#[derive(Debug)]
pub struct Wal {
    path: PathBuf,
    file: File,
    write_seq: u64,
    bytes: u64,
}

impl Wal {
    /// Open (creating if missing) and return the handle plus every entry
    /// with `seq > after_seq`, in order, for replay.
    pub fn open(path: &Path, after_seq: u64) -> Result<(Self, Vec<WalEntry>), JournalError> {
        let mut entries = Vec::new();
        let mut last_seq = after_seq;
        let mut bytes = 0u64;

        if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            for line in reader.lines() {
                let line = line?;
                bytes += line.len() as u64 + 1;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<WalEntry>(&line) {
                    Ok(entry) => {
                        last_seq = last_seq.max(entry.seq);
                        if entry.seq > after_seq {
                            entries.push(entry);
                        }
                    }
                    Err(e) => {
                        // Torn tail from a crash mid-append; everything
                        // before it already replayed.
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "dropping unparseable WAL tail"
                        );
                        break;
                    }
                }
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok((
            Self { path: path.to_path_buf(), file, write_seq: last_seq, bytes },
            entries,
        ))
    }

    /// Append one operation. The caller decides whether to [`Self::sync`].
    pub fn append(&mut self, op: WalOp, at_ms: u64) -> Result<u64, JournalError> {
        self.write_seq += 1;
        let entry = WalEntry { seq: self.write_seq, at_ms, op };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');
        self.file.write_all(line.as_bytes())?;
        self.bytes += line.len() as u64;
        Ok(entry.seq)
    }

    /// Flush buffers and fsync to disk.
    pub fn sync(&mut self) -> Result<(), JournalError> {
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Truncate after a snapshot has captured everything up to `write_seq`.
    pub fn reset(&mut self) -> Result<(), JournalError> {
        self.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.file.sync_data()?;
        self.bytes = 0;
        Ok(())
    }

    pub fn write_seq(&self) -> u64 {
        self.write_seq
    }

    pub fn size_bytes(&self) -> u64 {
        self.bytes
    }
}

#[cfg(test)]
#[path = "wal_tests.rs"]
mod tests;
