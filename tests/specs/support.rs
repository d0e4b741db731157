// SPDX-License-Identifier: MIT

//! Shared fixture: journal + fake runtime + pool + diff store + session
//! manager wired the way the daemon wires them.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use fm_adapters::{ExecOutput, FakeRuntime};
use fm_core::{FakeClock, Session, SessionId};
use fm_engine::{ContainerPool, DiffStore, PoolConfig, SessionConfig, SessionManager};
use fm_journal::Journal;

pub struct World {
    pub rt: FakeRuntime,
    pub clock: FakeClock,
    pub journal: Arc<Journal>,
    pub mgr: Arc<SessionManager<FakeRuntime, FakeClock>>,
    pub diffs: Arc<DiffStore<FakeClock>>,
    pub workspace: PathBuf,
    pub dir: tempfile::TempDir,
}

pub fn world() -> World {
    let dir = tempfile::tempdir().unwrap();
    let workspace = dir.path().join("w");
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
    let mgr = Arc::new(SessionManager::new(
        Arc::new(rt.clone()),
        pool,
        Arc::clone(&journal),
        Arc::clone(&diffs),
        clock.clone(),
        SessionConfig {
            tick: Duration::from_millis(5),
            quiet_window: Duration::ZERO,
            heartbeat_interval: Duration::from_secs(3600),
            logs_dir: dir.path().join("logs"),
            ..SessionConfig::default()
        },
    ));

    World { rt, clock, journal, mgr, diffs, workspace, dir }
}

/// Teach the fake runtime the git answers for a worker that changed one
/// file, capturing `patch` as the canonical diff.
pub fn with_changes(rt: &FakeRuntime, patch: &str) {
    rt.on_capture("rev-parse", ExecOutput::ok("abc123\n"));
    rt.on_capture("diff --cached --quiet", ExecOutput::exit(1));
    rt.on_capture("--numstat", ExecOutput::ok("1\t1\thello.txt\n"));
    rt.on_capture("diff --cached", ExecOutput::ok(patch));
}

pub async fn wait_until(
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
    panic!("session {id} did not reach the expected state");
}
