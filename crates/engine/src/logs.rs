// SPDX-License-Identifier: MIT

//! Per-session log: append-only file plus a bounded in-memory tail.
//!
//! One writer (the session actor), many readers (tailers). The file is the
//! durable record; the ring buffer serves `tailContainerLog` without
//! touching disk.

use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use fm_core::{ContainerId, SessionId};

/// Journal record pointing at a session's log file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub session_id: SessionId,
    pub container_id: ContainerId,
    pub path: PathBuf,
}

struct LogInner {
    file: std::fs::File,
    ring: VecDeque<(u64, String)>,
    next_seq: u64,
    capacity: usize,
}

/// Handle on one session's log. Cheap to clone; all clones share the
/// writer and the tail window.
#[derive(Clone)]
pub struct SessionLog {
    path: PathBuf,
    inner: Arc<Mutex<LogInner>>,
}

impl SessionLog {
    /// Create `logs/<session>-<container>.log`, truncating any stale file.
    pub fn create(
        dir: &Path,
        session_id: &SessionId,
        container_id: &ContainerId,
        capacity: usize,
    ) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}-{}.log", session_id, container_id));
        let file = std::fs::File::create(&path)?;
        Ok(Self {
            path,
            inner: Arc::new(Mutex::new(LogInner {
                file,
                ring: VecDeque::new(),
                next_seq: 0,
                capacity: capacity.max(1),
            })),
        })
    }

    /// Append one line. File write is best-effort; the tail window always
    /// advances.
    pub fn append(&self, line: &str) {
        let mut inner = self.inner.lock();
        if writeln!(inner.file, "{line}").is_err() {
            tracing::warn!(path = %self.path.display(), "session log write failed");
        }
        inner.next_seq += 1;
        let seq = inner.next_seq;
        inner.ring.push_back((seq, line.to_string()));
        if inner.ring.len() > inner.capacity {
            inner.ring.pop_front();
        }
    }

    /// Lines after `cursor`, oldest first, plus the cursor for the next
    /// call. Cursor 0 reads from the oldest retained line.
    pub fn tail(&self, cursor: u64) -> (Vec<String>, u64) {
        let inner = self.inner.lock();
        let lines: Vec<String> = inner
            .ring
            .iter()
            .filter(|(seq, _)| *seq > cursor)
            .map(|(_, line)| line.clone())
            .collect();
        (lines, inner.next_seq)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, session_id: &SessionId, container_id: &ContainerId) -> LogRecord {
        LogRecord {
            session_id: *session_id,
            container_id: container_id.clone(),
            path: self.path.clone(),
        }
    }
}

#[cfg(test)]
#[path = "logs_tests.rs"]
mod tests;
