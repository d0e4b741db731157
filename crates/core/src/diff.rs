// SPDX-License-Identifier: MIT

//! Diff record: a captured, reviewable patch of everything a worker
//! changed in its workspace.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::define_id;
use crate::risk::RiskFlags;
use crate::session::SessionId;

define_id! {
    /// Unique identifier for a captured diff.
    pub struct DiffId("dif-");
}

/// Review status of a diff. Transitions are one-way except
/// pending → superseded (revision flow).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiffStatus {
    Pending,
    ApprovedApplied,
    Rejected,
    Superseded,
}

impl DiffStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DiffStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DiffStatus::Pending => "pending",
            DiffStatus::ApprovedApplied => "approved-applied",
            DiffStatus::Rejected => "rejected",
            DiffStatus::Superseded => "superseded",
        }
    }
}

impl std::fmt::Display for DiffStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-file numeric statistics for a patch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffStats {
    pub files_changed: u32,
    pub additions: u32,
    pub deletions: u32,
}

impl DiffStats {
    /// Parse `git diff --numstat` output. Binary files report `-` counts,
    /// which count as a changed file with zero line deltas.
    pub fn from_numstat(numstat: &str) -> Self {
        let mut stats = DiffStats::default();
        for line in numstat.lines() {
            let mut parts = line.split('\t');
            let adds = parts.next().unwrap_or_default();
            let dels = parts.next().unwrap_or_default();
            let path = parts.next();
            if path.is_none() {
                continue;
            }
            stats.files_changed += 1;
            stats.additions += adds.parse::<u32>().unwrap_or(0);
            stats.deletions += dels.parse::<u32>().unwrap_or(0);
        }
        stats
    }
}

/// A captured workspace diff, immutable once created except for its status.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diff {
    pub id: DiffId,
    pub session_id: SessionId,
    pub workspace_path: PathBuf,
    /// Canonical unified patch text (LF, no color, replayable).
    pub patch: String,
    pub stats: DiffStats,
    pub status: DiffStatus,
    pub risks: RiskFlags,
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_workspace: Option<PathBuf>,
    /// Why the diff was rejected, when it was.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reject_reason: Option<String>,
    /// The diff that replaced this one, for superseded diffs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<DiffId>,
}

/// Receipt returned by a successful apply.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedReceipt {
    pub diff_id: DiffId,
    pub target_workspace: PathBuf,
    pub applied_at_ms: u64,
    pub stats: DiffStats,
    /// True when the generic patch applier had to finish the job.
    pub used_fallback: bool,
}

#[cfg(test)]
#[path = "diff_tests.rs"]
mod tests;
