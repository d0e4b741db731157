// SPDX-License-Identifier: MIT

//! Worker lifecycle scenarios: happy path and interactive Q&A.

use super::support::*;
use fm_adapters::WorkerScript;
use fm_core::{DiffStatus, SessionState};
use fm_engine::DispatchRequest;

const PATCH: &str = "diff --git a/hello.txt b/hello.txt\n\
new file mode 100644\n\
--- /dev/null\n\
+++ b/hello.txt\n\
@@ -0,0 +1 @@\n\
+hi\n";

#[tokio::test]
async fn dispatched_worker_completes_with_reviewable_diff() {
    let w = world();
    with_changes(&w.rt, PATCH);
    w.rt.push_worker(
        WorkerScript::new()
            .emit("creating hello.txt")
            .emit("done")
            .exit(0),
    );

    let id = w
        .mgr
        .dispatch(DispatchRequest::new(
            "create file hello.txt containing 'hi'",
            &w.workspace,
        ))
        .await
        .unwrap();

    let session = wait_until(&w.mgr, &id, |s| s.state == SessionState::Completed).await;
    let diff = w.diffs.get(&session.diff_id.unwrap()).unwrap();

    assert_eq!(diff.status, DiffStatus::Pending);
    assert_eq!(diff.stats.files_changed, 1);
    assert_eq!(diff.patch, PATCH);
    assert_eq!(diff.session_id, id);

    // The session record is durable: re-reading yields the same state.
    let persisted: fm_core::Session = w
        .journal
        .get(fm_journal::RecordKind::Session, id.as_str())
        .unwrap()
        .unwrap();
    assert_eq!(persisted.state, SessionState::Completed);
    assert_eq!(persisted.diff_id, session.diff_id);
}

#[tokio::test]
async fn interactive_worker_pauses_for_answer_then_completes() {
    let w = world();
    with_changes(&w.rt, PATCH);
    w.rt.push_worker(
        WorkerScript::new()
            .emit("Which database?")
            .await_input()
            .emit("configured sqlite")
            .exit(0),
    );

    let id = w
        .mgr
        .dispatch(DispatchRequest::new("set up storage", &w.workspace))
        .await
        .unwrap();

    let paused = wait_until(&w.mgr, &id, |s| s.state == SessionState::AwaitingInput).await;
    assert_eq!(paused.pending_question.as_deref(), Some("Which database?"));
    // The container is kept alive while the question is pending.
    assert!(w.rt.is_running(&paused.container_id));

    w.mgr.answer(&id, "sqlite").await.unwrap();

    let done = wait_until(&w.mgr, &id, |s| s.state == SessionState::Completed).await;
    assert!(done.diff_id.is_some());
    assert_eq!(w.rt.worker_inputs(), vec!["sqlite".to_string()]);
}

#[tokio::test]
async fn answers_are_delivered_in_submission_order() {
    let w = world();
    with_changes(&w.rt, PATCH);
    w.rt.push_worker(
        WorkerScript::new()
            .emit("first?")
            .await_input()
            .emit("second?")
            .await_input()
            .exit(0),
    );

    let id = w.mgr.dispatch(DispatchRequest::new("ask twice", &w.workspace)).await.unwrap();
    wait_until(&w.mgr, &id, |s| s.state == SessionState::AwaitingInput).await;

    w.mgr.answer(&id, "first answer").await.unwrap();
    w.mgr.answer(&id, "second answer").await.unwrap();

    wait_until(&w.mgr, &id, |s| s.state.is_terminal()).await;
    assert_eq!(
        w.rt.worker_inputs(),
        vec!["first answer".to_string(), "second answer".to_string()]
    );
}

#[tokio::test]
async fn revision_births_new_session_and_supersedes_diff() {
    let w = world();
    with_changes(&w.rt, PATCH);
    w.rt.push_worker(WorkerScript::new().emit("attempt one").exit(0));
    w.rt.push_worker(WorkerScript::new().emit("attempt two").exit(0));

    let id = w
        .mgr
        .dispatch(DispatchRequest::new("build it", &w.workspace))
        .await
        .unwrap();
    let first = wait_until(&w.mgr, &id, |s| s.state == SessionState::Completed).await;
    let old_diff = first.diff_id.unwrap();

    let rev = w.mgr.request_revision(&old_diff, "use async instead").await.unwrap();
    let second = wait_until(&w.mgr, &rev, |s| s.state == SessionState::Completed).await;

    let old = w.diffs.get(&old_diff).unwrap();
    assert_eq!(old.status, DiffStatus::Superseded);
    assert_eq!(old.superseded_by, second.diff_id);
    assert_eq!(second.revision_count, 1);
}
