// SPDX-License-Identifier: MIT

//! Startup reconciliation: resolve divergence between the journal and the
//! live container set after a restart.
//!
//! Order: stop orphan containers, fail sessions whose containers are gone
//! (rejecting their pending diffs), then purge aged records. Running it
//! twice yields the same state.

use std::collections::HashSet;
use std::time::Duration;

use fm_adapters::{CallOpts, ContainerRuntime};
use fm_core::container::ORCHESTRATOR_LABEL;
use fm_core::{Clock, ContainerRecord, ContainerState, CoreError, Diff, DiffStatus, Session};
use fm_journal::{Durability, Journal, RecordKind};

use crate::logs::LogRecord;

/// Grace window for stopping orphans.
const ORPHAN_STOP_GRACE: Duration = Duration::from_secs(5);

/// What one reconcile pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub orphans_stopped: usize,
    pub sessions_failed: usize,
    pub diffs_rejected: usize,
    pub records_purged: usize,
}

/// Reconcile journal state against live containers, then purge records
/// older than `retention`.
pub async fn reconcile<R: ContainerRuntime, C: Clock>(
    runtime: &R,
    journal: &Journal,
    clock: &C,
    retention: Duration,
) -> Result<ReconcileReport, CoreError> {
    let mut report = ReconcileReport::default();
    let now_ms = clock.epoch_ms();

    let live = runtime
        .list(ORCHESTRATOR_LABEL, CallOpts::default())
        .await
        .map_err(|e| e.to_core())?;
    let live_ids: HashSet<String> = live.iter().map(|c| c.id.to_string()).collect();

    let sessions: Vec<Session> = journal.list(RecordKind::Session);

    // Container ids claimed by a non-terminal session.
    let claimed: HashSet<String> = sessions
        .iter()
        .filter(|s| !s.state.is_terminal())
        .map(|s| s.container_id.to_string())
        .collect();

    // (2) Live containers nobody claims are orphans — stop them.
    for container in &live {
        if !claimed.contains(container.id.as_str()) {
            tracing::info!(container = %container.id, "stopping orphan container");
            if let Err(e) = runtime
                .stop(&container.id, ORPHAN_STOP_GRACE, CallOpts::default())
                .await
            {
                tracing::warn!(container = %container.id, error = %e, "orphan stop failed");
            }
            mark_container_gone(journal, container.id.as_str(), now_ms);
            report.orphans_stopped += 1;
        }
    }

    // (3) Non-terminal sessions whose container is gone lost their worker.
    for session in sessions {
        if session.state.is_terminal() {
            continue;
        }
        if live_ids.contains(session.container_id.as_str()) {
            tracing::info!(session = %session.id, "session container alive, keeping");
            continue;
        }

        tracing::warn!(
            session = %session.id,
            container = %session.container_id,
            "session container lost while daemon was down"
        );
        let mut failed = session.clone();
        failed.state = fm_core::SessionState::Failed;
        failed.failure_reason = Some("container-lost".to_string());
        failed.pending_question = None;
        journal
            .upsert(
                RecordKind::Session,
                failed.id.as_str(),
                &failed,
                Durability::Boundary,
                now_ms,
            )
            .map_err(|e| CoreError::fatal(e.to_string()))?;
        mark_container_gone(journal, session.container_id.as_str(), now_ms);
        report.sessions_failed += 1;

        // Any pending diff from that session is no longer reviewable
        // against a live worker.
        let pending: Vec<Diff> = journal.list_where(RecordKind::Diff, |d: &Diff| {
            d.session_id == session.id && d.status == DiffStatus::Pending
        });
        for mut diff in pending {
            diff.status = DiffStatus::Rejected;
            diff.reject_reason = Some("container-lost".to_string());
            journal
                .upsert(
                    RecordKind::Diff,
                    diff.id.as_str(),
                    &diff,
                    Durability::Boundary,
                    now_ms,
                )
                .map_err(|e| CoreError::fatal(e.to_string()))?;
            report.diffs_rejected += 1;
        }
    }

    // (4) Age out old records; session log files go with their LogRefs.
    let aged_refs: Vec<LogRecord> = journal.list(RecordKind::LogRef);
    for kind in RecordKind::ALL {
        let purged = journal
            .purge_older_than(kind, retention, now_ms)
            .map_err(|e| CoreError::fatal(e.to_string()))?;
        if kind == RecordKind::LogRef {
            for record in aged_refs
                .iter()
                .filter(|r| purged.iter().any(|id| r.session_id == id.as_str()))
            {
                let _ = std::fs::remove_file(&record.path);
            }
        }
        report.records_purged += purged.len();
    }

    tracing::info!(
        orphans = report.orphans_stopped,
        failed = report.sessions_failed,
        rejected = report.diffs_rejected,
        purged = report.records_purged,
        "reconcile complete"
    );
    Ok(report)
}

fn mark_container_gone(journal: &Journal, id: &str, now_ms: u64) {
    let record: Option<ContainerRecord> =
        journal.get(RecordKind::Container, id).ok().flatten();
    if let Some(mut record) = record {
        record.state = ContainerState::Gone;
        let _ = journal.upsert(
            RecordKind::Container,
            id,
            &record,
            Durability::BestEffort,
            now_ms,
        );
    }
}

#[cfg(test)]
#[path = "reconcile_tests.rs"]
mod tests;
