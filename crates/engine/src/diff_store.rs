// SPDX-License-Identifier: MIT

//! Diff store: owns Diff records, validates and applies patches.
//!
//! Apply is serialized per target workspace through an advisory async lock
//! keyed on the workspace path; applies to different workspaces run in
//! parallel. The algorithm is dry-run validate, apply, best-effort generic
//! fallback, then an atomic status flip in the journal.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::process::Command;

use fm_adapters::subprocess::{run_with_timeout, GIT_TIMEOUT};
use fm_core::{
    AppliedReceipt, Clock, CoreError, Diff, DiffId, DiffStats, DiffStatus, RiskFlags, SessionId,
};
use fm_journal::{Durability, Journal, RecordKind};

/// Owns Diff records and the apply path.
pub struct DiffStore<C: Clock> {
    journal: Arc<Journal>,
    clock: C,
    /// Advisory per-workspace apply locks. Entries live for the store's
    /// lifetime; the set of distinct target workspaces is small.
    apply_locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl<C: Clock> DiffStore<C> {
    pub fn new(journal: Arc<Journal>, clock: C) -> Self {
        Self { journal, clock, apply_locks: Mutex::new(HashMap::new()) }
    }

    /// Persist a new pending diff. Fails if the session already has one
    /// pending — one pending diff per session.
    pub fn create(
        &self,
        session_id: SessionId,
        workspace: &Path,
        patch: String,
        stats: DiffStats,
    ) -> Result<Diff, CoreError> {
        let pending: Vec<Diff> = self.journal.list_where(RecordKind::Diff, |d: &Diff| {
            d.session_id == session_id && d.status == DiffStatus::Pending
        });
        if !pending.is_empty() {
            return Err(CoreError::invalid_input(format!(
                "session {session_id} already has a pending diff"
            )));
        }

        let risks = RiskFlags::evaluate(&patch, &stats);
        let diff = Diff {
            id: DiffId::new(),
            session_id,
            workspace_path: workspace.to_path_buf(),
            patch,
            stats,
            status: DiffStatus::Pending,
            risks,
            created_at_ms: self.clock.epoch_ms(),
            applied_at_ms: None,
            target_workspace: None,
            reject_reason: None,
            superseded_by: None,
        };
        self.persist(&diff, Durability::Boundary)?;
        tracing::info!(
            diff_id = %diff.id,
            session_id = %session_id,
            files = diff.stats.files_changed,
            "diff captured"
        );
        Ok(diff)
    }

    /// Fetch a diff for review.
    pub fn get(&self, id: &DiffId) -> Result<Diff, CoreError> {
        self.journal
            .get(RecordKind::Diff, id.as_str())
            .map_err(|e| CoreError::fatal(e.to_string()))?
            .ok_or_else(|| CoreError::invalid_input(format!("unknown diff id: {id}")))
    }

    /// Validate and apply a pending diff to `target`. Serialized per
    /// target workspace; a dirty target fails with `conflict` and is left
    /// untouched.
    pub async fn apply(
        &self,
        id: &DiffId,
        target: &Path,
    ) -> Result<AppliedReceipt, CoreError> {
        let diff = self.get(id)?;
        if diff.status != DiffStatus::Pending {
            return Err(CoreError::invalid_input(format!(
                "diff {id} is {}, not pending",
                diff.status
            )));
        }
        if !target.is_dir() {
            return Err(CoreError::invalid_input(format!(
                "target workspace does not exist: {}",
                target.display()
            )));
        }

        let lock = self.lock_for(target);
        let _guard = lock.lock().await;

        // The patch rides in a temp file next to nothing the diff touches.
        let patch_path = std::env::temp_dir().join(format!("{}.patch", diff.id));
        tokio::fs::write(&patch_path, &diff.patch)
            .await
            .map_err(|e| CoreError::fatal(format!("cannot stage patch file: {e}")))?;

        let result = self.apply_staged(&diff, target, &patch_path).await;
        let _ = tokio::fs::remove_file(&patch_path).await;
        let used_fallback = result?;

        let mut applied = diff;
        applied.status = DiffStatus::ApprovedApplied;
        applied.applied_at_ms = Some(self.clock.epoch_ms());
        applied.target_workspace = Some(target.to_path_buf());
        self.persist(&applied, Durability::Boundary)?;

        tracing::info!(diff_id = %applied.id, target = %target.display(), "diff applied");
        Ok(AppliedReceipt {
            diff_id: applied.id,
            target_workspace: target.to_path_buf(),
            applied_at_ms: applied.applied_at_ms.unwrap_or_default(),
            stats: applied.stats,
            used_fallback,
        })
    }

    /// Dry-run then apply; returns whether the generic fallback finished
    /// the job. The caller holds the workspace lock.
    async fn apply_staged(
        &self,
        diff: &Diff,
        target: &Path,
        patch_path: &Path,
    ) -> Result<bool, CoreError> {
        // (a) validate against the target's current state, (c) apply
        let check = git_apply(target, patch_path, true).await?;
        if check.status.success() {
            let applied = git_apply(target, patch_path, false).await?;
            if applied.status.success() {
                return Ok(false);
            }
            tracing::warn!(diff_id = %diff.id, "git apply failed after clean check");
        }

        // (d) best-effort generic fallback. Its own dry-run gates the real
        // run so a refusal leaves the target untouched.
        let dry = generic_apply(target, patch_path, true).await?;
        if !dry.status.success() {
            return Err(CoreError::conflict(format!(
                "patch does not apply to {}: {}",
                target.display(),
                String::from_utf8_lossy(&check.stderr).trim()
            )));
        }
        tracing::warn!(diff_id = %diff.id, "git apply refused the patch, using generic applier");
        let out = generic_apply(target, patch_path, false).await?;
        if out.status.success() {
            Ok(true)
        } else {
            Err(CoreError::conflict(format!(
                "patch could not be applied: {}",
                String::from_utf8_lossy(&out.stderr).trim()
            )))
        }
    }

    /// Mark a pending diff rejected. Terminal.
    pub fn reject(&self, id: &DiffId, reason: &str) -> Result<Diff, CoreError> {
        let mut diff = self.get(id)?;
        if diff.status != DiffStatus::Pending {
            return Err(CoreError::invalid_input(format!(
                "diff {id} is {}, not pending",
                diff.status
            )));
        }
        diff.status = DiffStatus::Rejected;
        diff.reject_reason = Some(reason.to_string());
        self.persist(&diff, Durability::Boundary)?;
        tracing::info!(diff_id = %id, %reason, "diff rejected");
        Ok(diff)
    }

    /// Revision flow: the old pending diff is replaced by a new one.
    pub fn supersede(&self, old: &DiffId, new: &DiffId) -> Result<(), CoreError> {
        let mut diff = self.get(old)?;
        if diff.status != DiffStatus::Pending {
            return Err(CoreError::invalid_input(format!(
                "diff {old} is {}, not pending",
                diff.status
            )));
        }
        diff.status = DiffStatus::Superseded;
        diff.superseded_by = Some(*new);
        self.persist(&diff, Durability::Boundary)?;
        Ok(())
    }

    /// Pending diff bound to a session, if any.
    pub fn pending_for_session(&self, session_id: SessionId) -> Option<Diff> {
        self.journal
            .list_where(RecordKind::Diff, |d: &Diff| {
                d.session_id == session_id && d.status == DiffStatus::Pending
            })
            .into_iter()
            .next()
    }

    fn lock_for(&self, target: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let key = target.canonicalize().unwrap_or_else(|_| target.to_path_buf());
        Arc::clone(
            self.apply_locks
                .lock()
                .entry(key)
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    fn persist(&self, diff: &Diff, durability: Durability) -> Result<(), CoreError> {
        self.journal
            .upsert(RecordKind::Diff, diff.id.as_str(), diff, durability, self.clock.epoch_ms())
            .map_err(|e| CoreError::fatal(format!("journal write failed: {e}")))
    }
}

/// Host-side `git apply`, optionally as a `--check` dry run. Works in and
/// outside git repositories.
async fn git_apply(
    target: &Path,
    patch_path: &Path,
    check: bool,
) -> Result<std::process::Output, CoreError> {
    let mut cmd = Command::new("git");
    cmd.arg("apply").arg("-p1").arg("--whitespace=nowarn");
    if check {
        cmd.arg("--check");
    }
    cmd.arg(patch_path).current_dir(target);
    run_with_timeout(cmd, GIT_TIMEOUT, "git apply")
        .await
        .map_err(|e| CoreError::transient(e.to_string()))
}

/// The generic applier: `patch(1)`, fuzz capped at one context line so a
/// hunk still needs matching context to land anywhere.
async fn generic_apply(
    target: &Path,
    patch_path: &Path,
    dry_run: bool,
) -> Result<std::process::Output, CoreError> {
    let mut cmd = Command::new("patch");
    cmd.arg("-p1")
        .arg("--forward")
        .arg("--batch")
        .arg("--fuzz=1")
        .arg("--no-backup-if-mismatch");
    if dry_run {
        cmd.arg("--dry-run");
    }
    cmd.arg("-i").arg(patch_path).current_dir(target);
    run_with_timeout(cmd, GIT_TIMEOUT, "patch")
        .await
        .map_err(|e| CoreError::transient(e.to_string()))
}

#[cfg(test)]
#[path = "diff_store_tests.rs"]
mod tests;
