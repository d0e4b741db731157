// SPDX-License-Identifier: MIT

use super::*;
use crate::config::PoolConfig;
use fm_adapters::{ExecOutput, FakeRuntime, WorkerScript};
use fm_core::{DiffStatus, FakeClock};
use std::time::Duration;
use tempfile::tempdir;

const PATCH: &str =
    "diff --git a/hello.txt b/hello.txt\nnew file mode 100644\n--- /dev/null\n+++ b/hello.txt\n@@ -0,0 +1 @@\n+hi\n";

struct Fixture {
    rt: FakeRuntime,
    clock: FakeClock,
    mgr: Arc<SessionManager<FakeRuntime, FakeClock>>,
    diffs: Arc<DiffStore<FakeClock>>,
    workspace: PathBuf,
    _dir: tempfile::TempDir,
}

fn fixture() -> Fixture {
    fixture_with(|_| {})
}

fn fixture_with(tune: impl FnOnce(&mut SessionConfig)) -> Fixture {
    let dir = tempdir().unwrap();
    let workspace = dir.path().join("ws");
    std::fs::create_dir_all(&workspace).unwrap();

    let journal = Arc::new(Journal::open(&dir.path().join("data/orchestrator.db")).unwrap());
    let rt = FakeRuntime::new();
    let clock = FakeClock::new();
    let pool = Arc::new(ContainerPool::new(
        Arc::new(rt.clone()),
        Arc::clone(&journal),
        clock.clone(),
        PoolConfig::default(),
    ));
    let diffs = Arc::new(DiffStore::new(Arc::clone(&journal), clock.clone()));

    let mut cfg = SessionConfig {
        image: "worker:test".into(),
        worker_argv: vec!["agent".into()],
        tick: Duration::from_millis(5),
        quiet_window: Duration::ZERO,
        heartbeat_interval: Duration::from_secs(3600),
        acquire_deadline: Duration::from_secs(1),
        logs_dir: dir.path().join("logs"),
        tail_capacity: 100,
        ..SessionConfig::default()
    };
    tune(&mut cfg);

    let mgr = Arc::new(SessionManager::new(
        Arc::new(rt.clone()),
        pool,
        journal,
        Arc::clone(&diffs),
        clock.clone(),
        cfg,
    ));
    Fixture { rt, clock, mgr, diffs, workspace, _dir: dir }
}

/// Register the capture rules for a worker that changed the workspace.
fn script_changes(rt: &FakeRuntime) {
    rt.on_capture("rev-parse", ExecOutput::ok("abc123\n"));
    rt.on_capture("diff --cached --quiet", ExecOutput::exit(1));
    rt.on_capture("--numstat", ExecOutput::ok("1\t0\thello.txt\n"));
    rt.on_capture("diff --cached", ExecOutput::ok(PATCH));
}

async fn wait_for(
    mgr: &Arc<SessionManager<FakeRuntime, FakeClock>>,
    id: &SessionId,
    pred: impl Fn(&Session) -> bool,
) -> Session {
    for _ in 0..400 {
        if let Ok(s) = mgr.status(id) {
            if pred(&s) {
                return s;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("session {id} never reached the expected state");
}

#[tokio::test]
async fn happy_path_produces_diff_and_completes() {
    let f = fixture();
    script_changes(&f.rt);
    f.rt.push_worker(WorkerScript::new().emit("creating hello.txt").exit(0));

    let id = f
        .mgr
        .dispatch(DispatchRequest::new("create file hello.txt", &f.workspace))
        .await
        .unwrap();

    let session = wait_for(&f.mgr, &id, |s| s.state == SessionState::Completed).await;
    assert_eq!(session.initial_commit.as_deref(), Some("abc123"));
    let diff_id = session.diff_id.expect("diff bound to session");

    let diff = f.diffs.get(&diff_id).unwrap();
    assert_eq!(diff.status, DiffStatus::Pending);
    assert_eq!(diff.stats.files_changed, 1);
    assert_eq!(diff.stats.additions, 1);
    assert_eq!(diff.stats.deletions, 0);
    similar_asserts::assert_eq!(diff.patch, PATCH);

    // The container stays warm for a possible revision.
    assert_eq!(f.rt.containers().len(), 1);
    assert!(f.rt.is_running(&session.container_id));
}

#[tokio::test]
async fn worker_question_flows_through_awaiting_input() {
    let f = fixture();
    script_changes(&f.rt);
    f.rt.push_worker(
        WorkerScript::new()
            .emit("Which database?")
            .await_input()
            .emit("using it")
            .exit(0),
    );

    let id = f
        .mgr
        .dispatch(DispatchRequest::new("pick a database", &f.workspace))
        .await
        .unwrap();

    let session = wait_for(&f.mgr, &id, |s| s.state == SessionState::AwaitingInput).await;
    assert_eq!(session.pending_question.as_deref(), Some("Which database?"));

    f.mgr.answer(&id, "sqlite").await.unwrap();
    let session = wait_for(&f.mgr, &id, |s| s.state == SessionState::Completed).await;
    assert!(session.pending_question.is_none());
    assert_eq!(f.rt.worker_inputs(), vec!["sqlite".to_string()]);
}

#[tokio::test]
async fn bare_question_mark_is_awaiting_input() {
    let f = fixture();
    f.rt.push_worker(WorkerScript::new().emit("?").await_input().exit(0));

    let id = f.mgr.dispatch(DispatchRequest::new("p", &f.workspace)).await.unwrap();
    let session = wait_for(&f.mgr, &id, |s| s.state == SessionState::AwaitingInput).await;
    assert_eq!(session.pending_question.as_deref(), Some("?"));
    f.mgr.cancel(&id).await.unwrap();
}

#[tokio::test]
async fn fenced_question_stays_running() {
    let f = fixture();
    f.rt.push_worker(
        WorkerScript::new()
            .emit("```")
            .emit("does this work ?")
            .emit("```")
            .await_input()
            .exit(0),
    );

    let id = f.mgr.dispatch(DispatchRequest::new("p", &f.workspace)).await.unwrap();
    wait_for(&f.mgr, &id, |s| s.state == SessionState::Running).await;
    // Give the heuristic several ticks to (wrongly) fire.
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(f.mgr.status(&id).unwrap().state, SessionState::Running);
    f.mgr.cancel(&id).await.unwrap();
}

#[tokio::test]
async fn answers_reach_worker_in_order() {
    let f = fixture();
    script_changes(&f.rt);
    f.rt.push_worker(
        WorkerScript::new()
            .emit("first?")
            .await_input()
            .emit("second?")
            .await_input()
            .exit(0),
    );

    let id = f.mgr.dispatch(DispatchRequest::new("p", &f.workspace)).await.unwrap();
    wait_for(&f.mgr, &id, |s| s.state == SessionState::AwaitingInput).await;

    f.mgr.answer(&id, "a1").await.unwrap();
    f.mgr.answer(&id, "a2").await.unwrap();

    wait_for(&f.mgr, &id, |s| s.state.is_terminal()).await;
    assert_eq!(f.rt.worker_inputs(), vec!["a1".to_string(), "a2".to_string()]);
}

#[tokio::test]
async fn nonzero_exit_fails_session() {
    let f = fixture();
    f.rt.push_worker(WorkerScript::new().emit("boom").exit(3));

    let id = f.mgr.dispatch(DispatchRequest::new("p", &f.workspace)).await.unwrap();
    let session = wait_for(&f.mgr, &id, |s| s.state == SessionState::Failed).await;
    assert!(session.failure_reason.as_deref().unwrap_or_default().contains("code 3"));
    assert!(session.diff_id.is_none());
    // Failure destroys the container.
    assert!(!f.rt.is_running(&session.container_id));
}

#[tokio::test]
async fn clean_exit_without_changes_is_worker_failed() {
    let f = fixture();
    // No capture rules: the quiet probe reports a clean workspace.
    f.rt.push_worker(WorkerScript::new().emit("did nothing").exit(0));

    let id = f.mgr.dispatch(DispatchRequest::new("p", &f.workspace)).await.unwrap();
    let session = wait_for(&f.mgr, &id, |s| s.state == SessionState::Failed).await;
    assert!(session
        .failure_reason
        .as_deref()
        .unwrap_or_default()
        .contains("no changes"));
    assert!(session.diff_id.is_none());
}

#[tokio::test]
async fn hard_wall_timeout_fails_mid_output() {
    let f = fixture_with(|cfg| cfg.hard_deadline = Duration::from_secs(60));
    f.rt.push_worker(WorkerScript::new().emit("working...").await_input().exit(0));

    let id = f.mgr.dispatch(DispatchRequest::new("p", &f.workspace)).await.unwrap();
    wait_for(&f.mgr, &id, |s| s.state != SessionState::Initializing).await;

    f.clock.advance(Duration::from_secs(61));
    let session = wait_for(&f.mgr, &id, |s| s.state == SessionState::Failed).await;
    assert!(session
        .failure_reason
        .as_deref()
        .unwrap_or_default()
        .contains("hard wall"));
    // No diff is created on a hard timeout.
    assert!(session.diff_id.is_none());
    assert!(!f.rt.is_running(&session.container_id));
}

#[tokio::test]
async fn soft_inactivity_timeout_fails_unanswered_question() {
    let f = fixture_with(|cfg| cfg.soft_deadline = Duration::from_secs(600));
    f.rt.push_worker(WorkerScript::new().emit("Which database?").await_input().exit(0));

    let id = f.mgr.dispatch(DispatchRequest::new("p", &f.workspace)).await.unwrap();
    wait_for(&f.mgr, &id, |s| s.state == SessionState::AwaitingInput).await;

    f.clock.advance(Duration::from_secs(601));
    let session = wait_for(&f.mgr, &id, |s| s.state == SessionState::Failed).await;
    assert!(session
        .failure_reason
        .as_deref()
        .unwrap_or_default()
        .contains("soft inactivity"));
}

#[tokio::test]
async fn cancel_stops_worker_and_destroys_container() {
    let f = fixture();
    f.rt.push_worker(WorkerScript::new().emit("working").await_input().exit(0));

    let id = f.mgr.dispatch(DispatchRequest::new("p", &f.workspace)).await.unwrap();
    wait_for(&f.mgr, &id, |s| s.state == SessionState::Running).await;

    f.mgr.cancel(&id).await.unwrap();
    let session = f.mgr.status(&id).unwrap();
    assert_eq!(session.state, SessionState::Cancelled);
    assert!(!f.rt.is_running(&session.container_id));

    // Post-terminal answers are rejected.
    let err = f.mgr.answer(&id, "late").await.unwrap_err();
    assert_eq!(err.kind, fm_core::ErrorKind::InvalidInput);
}

#[tokio::test]
async fn dispatch_rejects_missing_workspace() {
    let f = fixture();
    let err = f
        .mgr
        .dispatch(DispatchRequest::new("p", "/definitely/not/here"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, fm_core::ErrorKind::InvalidInput);
}

#[tokio::test]
async fn status_of_unknown_session_is_invalid_input() {
    let f = fixture();
    let err = f.mgr.status(&SessionId::from_string("ses-nope")).unwrap_err();
    assert_eq!(err.kind, fm_core::ErrorKind::InvalidInput);
}

#[tokio::test]
async fn tail_log_returns_worker_output() {
    let f = fixture();
    script_changes(&f.rt);
    f.rt.push_worker(WorkerScript::new().emit("line one").emit("line two").exit(0));

    let id = f.mgr.dispatch(DispatchRequest::new("p", &f.workspace)).await.unwrap();
    wait_for(&f.mgr, &id, |s| s.state == SessionState::Completed).await;

    let (lines, cursor) = f.mgr.tail_log(&id, 0).unwrap();
    assert!(lines.iter().any(|l| l == "line one"));
    assert!(lines.iter().any(|l| l == "line two"));
    assert!(cursor >= 2);

    let (rest, _) = f.mgr.tail_log(&id, cursor).unwrap();
    assert!(rest.is_empty());
}

#[tokio::test]
async fn heartbeat_lines_land_in_log() {
    let f = fixture_with(|cfg| cfg.heartbeat_interval = Duration::ZERO);
    f.rt.push_worker(WorkerScript::new().emit("working").await_input().exit(0));

    let id = f.mgr.dispatch(DispatchRequest::new("p", &f.workspace)).await.unwrap();
    wait_for(&f.mgr, &id, |s| s.state != SessionState::Initializing).await;
    tokio::time::sleep(Duration::from_millis(40)).await;

    let (lines, _) = f.mgr.tail_log(&id, 0).unwrap();
    assert!(lines.iter().any(|l| l.contains("[heartbeat]")), "{lines:?}");
    f.mgr.cancel(&id).await.unwrap();
}

#[tokio::test]
async fn revision_supersedes_prior_diff_and_reuses_container() {
    let f = fixture();
    script_changes(&f.rt);
    f.rt.push_worker(WorkerScript::new().emit("v1").exit(0));
    f.rt.push_worker(WorkerScript::new().emit("v2").exit(0));

    let id = f
        .mgr
        .dispatch(DispatchRequest::new("build the thing", &f.workspace))
        .await
        .unwrap();
    let first = wait_for(&f.mgr, &id, |s| s.state == SessionState::Completed).await;
    let old_diff = first.diff_id.unwrap();

    let rev_id = f.mgr.request_revision(&old_diff, "use async instead").await.unwrap();
    let second = wait_for(&f.mgr, &rev_id, |s| s.state == SessionState::Completed).await;
    let new_diff = second.diff_id.unwrap();

    assert_eq!(second.revision_count, 1);
    assert_eq!(second.container_id, first.container_id, "workspace container is reused");
    assert!(second.prompt.contains("use async instead"));
    assert!(second.prompt.contains("build the thing"));

    let old = f.diffs.get(&old_diff).unwrap();
    assert_eq!(old.status, DiffStatus::Superseded);
    assert_eq!(old.superseded_by, Some(new_diff));
    assert_eq!(f.diffs.get(&new_diff).unwrap().status, DiffStatus::Pending);
}

#[tokio::test]
async fn revision_limit_is_enforced() {
    let f = fixture_with(|cfg| cfg.max_revisions = 0);
    script_changes(&f.rt);
    f.rt.push_worker(WorkerScript::new().emit("v1").exit(0));

    let id = f.mgr.dispatch(DispatchRequest::new("p", &f.workspace)).await.unwrap();
    let first = wait_for(&f.mgr, &id, |s| s.state == SessionState::Completed).await;

    let err = f
        .mgr
        .request_revision(&first.diff_id.unwrap(), "again")
        .await
        .unwrap_err();
    assert_eq!(err.kind, fm_core::ErrorKind::InvalidInput);
    assert!(err.message.contains("revision limit"));
}

#[tokio::test]
async fn revision_of_non_pending_diff_is_rejected() {
    let f = fixture();
    script_changes(&f.rt);
    f.rt.push_worker(WorkerScript::new().emit("v1").exit(0));

    let id = f.mgr.dispatch(DispatchRequest::new("p", &f.workspace)).await.unwrap();
    let first = wait_for(&f.mgr, &id, |s| s.state == SessionState::Completed).await;
    let diff_id = first.diff_id.unwrap();
    f.diffs.reject(&diff_id, "no thanks").unwrap();

    let err = f.mgr.request_revision(&diff_id, "again").await.unwrap_err();
    assert_eq!(err.kind, fm_core::ErrorKind::InvalidInput);
}

#[tokio::test]
async fn bound_task_follows_session_lifecycle() {
    let f = fixture();
    // Build a plan with one task and attach it.
    let plan_path = f._dir.path().join("tasks.json");
    std::fs::write(
        &plan_path,
        r#"{
          "meta": {"projectName":"p","createdAt":"2026-01-01T00:00:00Z","lastModified":"2026-01-01T00:00:00Z"},
          "tasks": [{"id": "1", "title": "Build", "status": "pending"}]
        }"#,
    )
    .unwrap();
    let plan = Arc::new(PlanStore::open(&plan_path).unwrap());

    // Rebuild the manager with the plan attached.
    let journal = Arc::new(Journal::open(&f._dir.path().join("data2/orchestrator.db")).unwrap());
    let pool = Arc::new(ContainerPool::new(
        Arc::new(f.rt.clone()),
        Arc::clone(&journal),
        f.clock.clone(),
        PoolConfig::default(),
    ));
    let diffs = Arc::new(DiffStore::new(Arc::clone(&journal), f.clock.clone()));
    let mgr = Arc::new(
        SessionManager::new(
            Arc::new(f.rt.clone()),
            pool,
            journal,
            diffs,
            f.clock.clone(),
            SessionConfig {
                tick: Duration::from_millis(5),
                quiet_window: Duration::ZERO,
                logs_dir: f._dir.path().join("logs2"),
                ..SessionConfig::default()
            },
        )
        .with_plan(Arc::clone(&plan)),
    );

    script_changes(&f.rt);
    f.rt.push_worker(WorkerScript::new().emit("working").exit(0));

    let mut req = DispatchRequest::new("do task 1", &f.workspace);
    req.task_id = Some(TaskId::new("1"));
    let id = mgr.dispatch(req).await.unwrap();
    wait_for(&mgr, &id, |s| s.state == SessionState::Completed).await;

    let task = plan.get(&TaskId::new("1")).unwrap();
    assert_eq!(task.status, TaskStatus::InProgress);
    assert_eq!(task.session_id, Some(id));
}
