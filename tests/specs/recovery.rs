// SPDX-License-Identifier: MIT

//! Restart recovery scenarios: the reconciler against live state.

use std::time::Duration;

use super::support::*;
use fm_adapters::WorkerScript;
use fm_core::{DiffStatus, SessionState};
use fm_engine::{reconcile, DispatchRequest};

const RETENTION: Duration = Duration::from_secs(7 * 24 * 3600);

#[tokio::test]
async fn live_session_survives_reconcile_then_fails_when_container_dies() {
    let w = world();
    w.rt.push_worker(WorkerScript::new().emit("working").await_input().exit(0));

    let id = w
        .mgr
        .dispatch(DispatchRequest::new("long job", &w.workspace))
        .await
        .unwrap();
    let session = wait_until(&w.mgr, &id, |s| s.state == SessionState::Running).await;

    // First restart: the container is alive and matches the session.
    let report = reconcile(&w.rt, &w.journal, &w.clock, RETENTION).await.unwrap();
    assert_eq!(report.sessions_failed, 0);
    assert_eq!(report.orphans_stopped, 0);
    assert_eq!(w.mgr.status(&id).unwrap().state, SessionState::Running);

    // The container is killed out-of-band; the next restart notices.
    w.rt.kill(&session.container_id);
    let report = reconcile(&w.rt, &w.journal, &w.clock, RETENTION).await.unwrap();
    assert_eq!(report.sessions_failed, 1);

    let failed = w.mgr.status(&id).unwrap();
    assert_eq!(failed.state, SessionState::Failed);
    assert_eq!(failed.failure_reason.as_deref(), Some("container-lost"));
}

#[tokio::test]
async fn warm_container_of_completed_session_is_orphaned_but_diff_survives() {
    let w = world();
    with_changes(&w.rt, "diff --git a/x b/x\n+1\n");
    w.rt.push_worker(WorkerScript::new().emit("work").exit(0));

    let id = w.mgr.dispatch(DispatchRequest::new("job", &w.workspace)).await.unwrap();
    let done = wait_until(&w.mgr, &id, |s| s.state == SessionState::Completed).await;
    let diff_id = done.diff_id.unwrap();

    // Completed is terminal: its warm container reads as an orphan after a
    // restart and is stopped, but the pending diff survives untouched.
    let report = reconcile(&w.rt, &w.journal, &w.clock, RETENTION).await.unwrap();
    assert_eq!(report.orphans_stopped, 1);
    assert_eq!(report.diffs_rejected, 0);
    assert_eq!(w.diffs.get(&diff_id).unwrap().status, DiffStatus::Pending);
}

#[tokio::test]
async fn reconcile_is_idempotent_end_to_end() {
    let w = world();
    w.rt.push_worker(WorkerScript::new().emit("working").await_input().exit(0));
    let id = w.mgr.dispatch(DispatchRequest::new("job", &w.workspace)).await.unwrap();
    let session = wait_until(&w.mgr, &id, |s| s.state == SessionState::Running).await;
    w.rt.kill(&session.container_id);

    let first = reconcile(&w.rt, &w.journal, &w.clock, RETENTION).await.unwrap();
    assert_eq!(first.sessions_failed, 1);

    let second = reconcile(&w.rt, &w.journal, &w.clock, RETENTION).await.unwrap();
    assert_eq!(second.sessions_failed, 0);
    assert_eq!(second.orphans_stopped, 0);
    assert_eq!(second.diffs_rejected, 0);
}
