// SPDX-License-Identifier: MIT

use super::*;
use fm_adapters::{ExecOutput, FakeRuntime, WorkerScript};
use fm_core::{FakeClock, SessionState};
use fm_engine::{ContainerPool, PoolConfig, SessionConfig};
use fm_journal::Journal;
use fm_wire::ToolName;
use std::time::Duration;
use tempfile::tempdir;

struct Fixture {
    rt: FakeRuntime,
    facade: Facade<FakeRuntime, FakeClock>,
    sessions: Arc<SessionManager<FakeRuntime, FakeClock>>,
    workspace: std::path::PathBuf,
    _dir: tempfile::TempDir,
}

fn fixture(with_plan: bool) -> Fixture {
    let dir = tempdir().unwrap();
    let workspace = dir.path().join("ws");
    std::fs::create_dir_all(&workspace).unwrap();

    let journal = Arc::new(Journal::open(&dir.path().join("orchestrator.db")).unwrap());
    let rt = FakeRuntime::new();
    let clock = FakeClock::new();
    let pool = Arc::new(ContainerPool::new(
        Arc::new(rt.clone()),
        Arc::clone(&journal),
        clock.clone(),
        PoolConfig::default(),
    ));
    let diffs = Arc::new(DiffStore::new(Arc::clone(&journal), clock.clone()));

    let plan = if with_plan {
        let path = dir.path().join("tasks.json");
        std::fs::write(
            &path,
            r#"{
              "meta": {"projectName":"p","createdAt":"2026-01-01T00:00:00Z","lastModified":"2026-01-01T00:00:00Z"},
              "tasks": [
                {"id": "1", "title": "Base", "status": "done"},
                {"id": "2", "title": "Feature", "status": "pending", "dependencies": ["1"], "priority": "high"}
              ]
            }"#,
        )
        .unwrap();
        Some(Arc::new(PlanStore::open(&path).unwrap()))
    } else {
        None
    };

    let mut sessions = SessionManager::new(
        Arc::new(rt.clone()),
        pool,
        journal,
        Arc::clone(&diffs),
        clock,
        SessionConfig {
            tick: Duration::from_millis(5),
            quiet_window: Duration::ZERO,
            logs_dir: dir.path().join("logs"),
            ..SessionConfig::default()
        },
    );
    if let Some(ref plan) = plan {
        sessions = sessions.with_plan(Arc::clone(plan));
    }
    let sessions = Arc::new(sessions);

    Fixture {
        rt,
        facade: Facade::new(Arc::clone(&sessions), diffs, plan),
        sessions,
        workspace,
        _dir: dir,
    }
}

fn req(id: u64, tool: ToolName, args: serde_json::Value) -> Request {
    Request::new(serde_json::json!(id), tool, args)
}

fn script_changes(rt: &FakeRuntime) {
    rt.on_capture("rev-parse", ExecOutput::ok("abc123\n"));
    rt.on_capture("diff --cached --quiet", ExecOutput::exit(1));
    rt.on_capture("--numstat", ExecOutput::ok("1\t0\thello.txt\n"));
    rt.on_capture("diff --cached", ExecOutput::ok("diff --git a/hello.txt b/hello.txt\n+hi\n"));
}

async fn wait_for_state(
    sessions: &Arc<SessionManager<FakeRuntime, FakeClock>>,
    id: &fm_core::SessionId,
    state: SessionState,
) {
    for _ in 0..400 {
        if sessions.status(id).map(|s| s.state == state).unwrap_or(false) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("session never reached {state}");
}

#[tokio::test]
async fn dispatch_status_and_tail_round_trip() {
    let f = fixture(false);
    script_changes(&f.rt);
    f.rt.push_worker(WorkerScript::new().emit("hello from worker").exit(0));

    let resp = f
        .facade
        .handle(req(
            1,
            ToolName::DispatchWorker,
            serde_json::json!({"prompt": "do it", "workspace": f.workspace}),
        ))
        .await;
    assert!(resp.ok, "{:?}", resp.error);
    let sid_str = resp.result.unwrap()["sessionId"].as_str().unwrap().to_string();
    let sid = fm_core::SessionId::from_string(&sid_str);

    wait_for_state(&f.sessions, &sid, SessionState::Completed).await;

    let status = f
        .facade
        .handle(req(2, ToolName::WorkerStatus, serde_json::json!({"sessionId": sid_str})))
        .await;
    assert!(status.ok);
    let body = status.result.unwrap();
    assert_eq!(body["state"], "completed");
    assert!(body["diffId"].is_string());

    let tail = f
        .facade
        .handle(req(
            3,
            ToolName::TailContainerLog,
            serde_json::json!({"sessionId": sid_str, "cursor": 0}),
        ))
        .await;
    assert!(tail.ok);
    let lines = tail.result.unwrap()["lines"].clone();
    assert!(lines.as_array().unwrap().iter().any(|l| l == "hello from worker"));
}

#[tokio::test]
async fn review_and_reject_flow() {
    let f = fixture(false);
    script_changes(&f.rt);
    f.rt.push_worker(WorkerScript::new().emit("work").exit(0));

    let resp = f
        .facade
        .handle(req(
            1,
            ToolName::DispatchWorker,
            serde_json::json!({"prompt": "p", "workspace": f.workspace}),
        ))
        .await;
    let sid = fm_core::SessionId::from_string(
        resp.result.unwrap()["sessionId"].as_str().unwrap(),
    );
    wait_for_state(&f.sessions, &sid, SessionState::Completed).await;
    let diff_id = f.sessions.status(&sid).unwrap().diff_id.unwrap();

    let review = f
        .facade
        .handle(req(2, ToolName::ReviewDiff, serde_json::json!({"diffId": diff_id})))
        .await;
    assert!(review.ok);
    let body = review.result.unwrap();
    assert_eq!(body["status"], "pending");
    assert_eq!(body["stats"]["filesChanged"], 1);
    assert!(body["risks"].is_object());

    let reject = f
        .facade
        .handle(req(
            3,
            ToolName::RejectDiff,
            serde_json::json!({"diffId": diff_id, "reason": "not needed"}),
        ))
        .await;
    assert!(reject.ok);
    assert_eq!(reject.result.unwrap()["status"], "rejected");

    // Rejecting released the warm container.
    let session = f.sessions.status(&sid).unwrap();
    assert!(!f.rt.is_running(&session.container_id));
}

#[tokio::test]
async fn task_tools_work_against_the_plan() {
    let f = fixture(true);

    let list = f.facade.handle(req(1, ToolName::ListTasks, serde_json::Value::Null)).await;
    assert!(list.ok);
    assert_eq!(list.result.unwrap().as_array().unwrap().len(), 2);

    let next = f.facade.handle(req(2, ToolName::NextTasks, serde_json::Value::Null)).await;
    let body = next.result.unwrap();
    assert_eq!(body["recommended"]["id"], "2");
    assert_eq!(body["ready"].as_array().unwrap().len(), 1);

    let set = f
        .facade
        .handle(req(
            3,
            ToolName::SetTaskStatus,
            serde_json::json!({"taskId": "2", "status": "in-progress"}),
        ))
        .await;
    assert!(set.ok);

    let validate =
        f.facade.handle(req(4, ToolName::ValidateTasks, serde_json::Value::Null)).await;
    assert_eq!(validate.result.unwrap()["valid"], true);
}

#[tokio::test]
async fn task_tools_without_plan_are_invalid_input() {
    let f = fixture(false);
    let resp = f.facade.handle(req(1, ToolName::ListTasks, serde_json::Value::Null)).await;
    assert!(!resp.ok);
    assert_eq!(resp.error.unwrap().kind, fm_core::ErrorKind::InvalidInput);
}

#[tokio::test]
async fn bad_arguments_are_invalid_input() {
    let f = fixture(false);
    let resp = f
        .facade
        .handle(req(1, ToolName::DispatchWorker, serde_json::json!({"nope": true})))
        .await;
    assert!(!resp.ok);
    let err = resp.error.unwrap();
    assert_eq!(err.kind, fm_core::ErrorKind::InvalidInput);
    assert!(!err.retriable);
}

#[tokio::test]
async fn cancel_through_facade() {
    let f = fixture(false);
    f.rt.push_worker(WorkerScript::new().emit("working").await_input().exit(0));

    let resp = f
        .facade
        .handle(req(
            1,
            ToolName::DispatchWorker,
            serde_json::json!({"prompt": "p", "workspace": f.workspace}),
        ))
        .await;
    let sid_str = resp.result.unwrap()["sessionId"].as_str().unwrap().to_string();
    let sid = fm_core::SessionId::from_string(&sid_str);
    wait_for_state(&f.sessions, &sid, SessionState::Running).await;

    let cancel = f
        .facade
        .handle(req(2, ToolName::CancelWorker, serde_json::json!({"sessionId": sid_str})))
        .await;
    assert!(cancel.ok);
    assert_eq!(f.sessions.status(&sid).unwrap().state, SessionState::Cancelled);
}
