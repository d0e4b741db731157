// SPDX-License-Identifier: MIT

//! Worker session manager: one actor per session.
//!
//! Each session runs as a spawned task owning its exec stream; `answer`
//! and `cancel` are state-machine inputs delivered over the actor's
//! command channel, which gives them a total order per session. The actor
//! ticks on a fixed cadence to emit heartbeats, run the interactive-input
//! heuristic over quiescent output, and enforce the soft and hard
//! deadlines.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use fm_adapters::{CallOpts, ContainerRuntime, ExecEvent, ExecSession};
use fm_core::{
    Clock, CoreError, DiffId, ErrorKind, Session, SessionId, SessionState, TaskId, TaskStatus,
};
use fm_journal::{Durability, Journal, RecordKind};
use fm_plan::{PlanStore, StatusMeta};

use crate::config::SessionConfig;
use crate::diff_store::DiffStore;
use crate::git::GitEngine;
use crate::heuristic;
use crate::logs::SessionLog;
use crate::pool::{ContainerHandle, ContainerPool, Disposition, PoolKey};

/// Output kept for the heuristic's tail window, characters.
const TAIL_BUFFER_CHARS: usize = 2_000;

/// A worker dispatch.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub prompt: String,
    pub workspace: PathBuf,
    pub image: Option<String>,
    pub task_id: Option<TaskId>,
    pub soft_deadline: Option<Duration>,
    pub hard_deadline: Option<Duration>,
}

impl DispatchRequest {
    pub fn new(prompt: impl Into<String>, workspace: impl Into<PathBuf>) -> Self {
        Self {
            prompt: prompt.into(),
            workspace: workspace.into(),
            image: None,
            task_id: None,
            soft_deadline: None,
            hard_deadline: None,
        }
    }
}

/// Revision lineage carried into a follow-up session.
#[derive(Debug, Clone)]
struct RevisionCtx {
    prior_diff: DiffId,
    revision_count: u32,
}

enum SessionCmd {
    Answer { text: String, reply: oneshot::Sender<Result<(), CoreError>> },
    Cancel { reply: oneshot::Sender<Result<(), CoreError>> },
}

/// Drives worker sessions from prompt to diff.
pub struct SessionManager<R: ContainerRuntime, C: Clock> {
    runtime: Arc<R>,
    pool: Arc<ContainerPool<R, C>>,
    journal: Arc<Journal>,
    diffs: Arc<DiffStore<C>>,
    git: GitEngine<R>,
    clock: C,
    cfg: SessionConfig,
    plan: Option<Arc<PlanStore>>,
    live: Mutex<HashMap<SessionId, mpsc::Sender<SessionCmd>>>,
    logs: Mutex<HashMap<SessionId, SessionLog>>,
}

impl<R: ContainerRuntime, C: Clock> SessionManager<R, C> {
    pub fn new(
        runtime: Arc<R>,
        pool: Arc<ContainerPool<R, C>>,
        journal: Arc<Journal>,
        diffs: Arc<DiffStore<C>>,
        clock: C,
        cfg: SessionConfig,
    ) -> Self {
        Self {
            git: GitEngine::new(Arc::clone(&runtime)),
            runtime,
            pool,
            journal,
            diffs,
            clock,
            cfg,
            plan: None,
            live: Mutex::new(HashMap::new()),
            logs: Mutex::new(HashMap::new()),
        }
    }

    /// Attach the task plan so session transitions update bound tasks.
    pub fn with_plan(mut self, plan: Arc<PlanStore>) -> Self {
        self.plan = Some(plan);
        self
    }

    /// Start a worker. Returns once the session record exists; the worker
    /// itself initializes in the background.
    pub async fn dispatch(
        self: &Arc<Self>,
        req: DispatchRequest,
    ) -> Result<SessionId, CoreError> {
        self.spawn_session(req, None).await
    }

    /// Session record, as persisted.
    pub fn status(&self, id: &SessionId) -> Result<Session, CoreError> {
        self.journal
            .get(RecordKind::Session, id.as_str())
            .map_err(|e| CoreError::fatal(e.to_string()))?
            .ok_or_else(|| CoreError::invalid_input(format!("unknown session id: {id}")))
    }

    /// Deliver follow-up input to the worker. Serialized with other
    /// answers and cancels against the same session.
    pub async fn answer(&self, id: &SessionId, text: &str) -> Result<(), CoreError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send_cmd(id, SessionCmd::Answer { text: text.to_string(), reply: reply_tx })
            .await?;
        reply_rx
            .await
            .unwrap_or_else(|_| Err(CoreError::invalid_input(format!("session {id} ended"))))
    }

    /// Cancel a session: stop the worker, destroy its container.
    pub async fn cancel(&self, id: &SessionId) -> Result<(), CoreError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send_cmd(id, SessionCmd::Cancel { reply: reply_tx }).await?;
        reply_rx
            .await
            .unwrap_or_else(|_| Err(CoreError::invalid_input(format!("session {id} ended"))))
    }

    /// Release the warm container a completed session left in the pool.
    /// Used when its diff is rejected and no revision will follow.
    pub async fn drop_warm_container(&self, id: &SessionId) -> Result<bool, CoreError> {
        let session = self.status(id)?;
        Ok(self.pool.drop_idle_for_workspace(&session.workspace_path).await)
    }

    /// Read the in-memory log tail from `cursor`.
    pub fn tail_log(&self, id: &SessionId, cursor: u64) -> Result<(Vec<String>, u64), CoreError> {
        let log = self
            .logs
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::invalid_input(format!("no log for session {id}")))?;
        Ok(log.tail(cursor))
    }

    /// Birth a follow-up session that revises a completed session's
    /// pending diff. On success the new diff supersedes the old.
    pub async fn request_revision(
        self: &Arc<Self>,
        diff_id: &DiffId,
        feedback: &str,
    ) -> Result<SessionId, CoreError> {
        let diff = self.diffs.get(diff_id)?;
        if diff.status != fm_core::DiffStatus::Pending {
            return Err(CoreError::invalid_input(format!(
                "diff {diff_id} is {}, not pending",
                diff.status
            )));
        }
        let prior = self.status(&diff.session_id)?;
        if prior.state != SessionState::Completed {
            return Err(CoreError::invalid_input(format!(
                "session {} is {}, not completed",
                prior.id, prior.state
            )));
        }
        let revision_count = prior.revision_count + 1;
        if revision_count > self.cfg.max_revisions {
            return Err(CoreError::invalid_input(format!(
                "revision limit reached ({})",
                self.cfg.max_revisions
            )));
        }

        let prompt = format!(
            "Original request:\n{}\n\nA reviewer requested changes:\n{}\n\n\
             Your previous change touched {} file(s) (+{} -{}). \
             Revise the work in the workspace accordingly.",
            prior.prompt,
            feedback,
            diff.stats.files_changed,
            diff.stats.additions,
            diff.stats.deletions,
        );
        let req = DispatchRequest {
            prompt,
            workspace: prior.workspace_path.clone(),
            image: None,
            task_id: prior.task_id.clone(),
            soft_deadline: None,
            hard_deadline: None,
        };
        self.spawn_session(req, Some(RevisionCtx { prior_diff: *diff_id, revision_count }))
            .await
    }

    async fn spawn_session(
        self: &Arc<Self>,
        req: DispatchRequest,
        revision: Option<RevisionCtx>,
    ) -> Result<SessionId, CoreError> {
        if !req.workspace.is_dir() {
            return Err(CoreError::invalid_input(format!(
                "workspace does not exist: {}",
                req.workspace.display()
            )));
        }

        let id = SessionId::new();
        let mut record = Session::new(
            id,
            fm_core::ContainerId::new(""),
            req.workspace.clone(),
            req.prompt.clone(),
            self.clock.epoch_ms(),
        );
        record.task_id = req.task_id.clone();
        if let Some(ref ctx) = revision {
            record.revision_count = ctx.revision_count;
        }
        // Session start is a lifecycle boundary.
        self.persist(&record, Durability::Boundary)?;

        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        self.live.lock().insert(id, cmd_tx);

        let mgr = Arc::clone(self);
        tokio::spawn(async move {
            mgr.run_session(record, req, revision, cmd_rx).await;
        });
        Ok(id)
    }

    async fn send_cmd(&self, id: &SessionId, cmd: SessionCmd) -> Result<(), CoreError> {
        let tx = self
            .live
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::invalid_input(format!("session {id} is not active")))?;
        tx.send(cmd)
            .await
            .map_err(|_| CoreError::invalid_input(format!("session {id} is not active")))
    }

    // --- actor -----------------------------------------------------------

    async fn run_session(
        self: Arc<Self>,
        mut record: Session,
        req: DispatchRequest,
        revision: Option<RevisionCtx>,
        mut cmd_rx: mpsc::Receiver<SessionCmd>,
    ) {
        let soft = req.soft_deadline.unwrap_or(self.cfg.soft_deadline);
        let hard = req.hard_deadline.unwrap_or(self.cfg.hard_deadline);
        let key = PoolKey {
            image: req.image.clone().unwrap_or_else(|| self.cfg.image.clone()),
            profile: self.cfg.profile.clone(),
        };

        // Acquisition races incoming commands so an early cancel can
        // abandon the dispatch without leaving a record.
        let acquire = self
            .pool
            .acquire(key, req.workspace.clone(), self.cfg.acquire_deadline);
        tokio::pin!(acquire);
        let handle: ContainerHandle = loop {
            tokio::select! {
                res = &mut acquire => match res {
                    Ok(handle) => break handle,
                    Err(e) => {
                        self.fail(&mut record, e.kind, &e.message).await;
                        return;
                    }
                },
                cmd = cmd_rx.recv() => match cmd {
                    Some(SessionCmd::Cancel { reply }) => {
                        // Never reached running: remove every trace.
                        let _ = self.journal.delete(
                            RecordKind::Session,
                            record.id.as_str(),
                            Durability::Boundary,
                            self.clock.epoch_ms(),
                        );
                        self.live.lock().remove(&record.id);
                        let _ = reply.send(Ok(()));
                        return;
                    }
                    Some(SessionCmd::Answer { reply, .. }) => {
                        let _ = reply.send(Err(CoreError::invalid_input(
                            "session is still initializing",
                        )));
                    }
                    None => return,
                },
            }
        };

        record.container_id = handle.id.clone();

        // Initial snapshot inside the container. A revision keeps the
        // original baseline so its diff replaces the prior one whole.
        let snapshot = if revision.is_some() {
            self.git.baseline(&handle.id).await
        } else {
            self.git.prepare(&handle.id).await
        };
        match snapshot {
            Ok(commit) => record.initial_commit = Some(commit),
            Err(e) => {
                self.pool.release(handle, Disposition::Destroy).await;
                let core = e.to_core();
                self.fail(&mut record, core.kind, &core.message).await;
                return;
            }
        }

        // Log file + journal pointer.
        let log = match SessionLog::create(
            &self.cfg.logs_dir,
            &record.id,
            &handle.id,
            self.cfg.tail_capacity,
        ) {
            Ok(log) => log,
            Err(e) => {
                self.pool.release(handle, Disposition::Destroy).await;
                self.fail(&mut record, ErrorKind::Fatal, &format!("log create failed: {e}"))
                    .await;
                return;
            }
        };
        self.logs.lock().insert(record.id, log.clone());
        let _ = self.journal.upsert(
            RecordKind::LogRef,
            record.id.as_str(),
            &log.record(&record.id, &handle.id),
            Durability::BestEffort,
            self.clock.epoch_ms(),
        );

        // Launch the worker with the prompt as its final argument.
        let mut argv = self.cfg.worker_argv.clone();
        argv.push(req.prompt.clone());
        let exec = match self
            .runtime
            .exec_stream(&handle.id, &argv, &[], CallOpts::default())
            .await
        {
            Ok(exec) => exec,
            Err(e) => {
                self.pool.release(handle, Disposition::Destroy).await;
                let core = e.to_core();
                self.fail(&mut record, core.kind, &core.message).await;
                return;
            }
        };

        record.state = SessionState::Running;
        record.touch(self.clock.epoch_ms());
        if self.persist(&record, Durability::Boundary).is_err() {
            self.pool.release(handle, Disposition::Destroy).await;
            self.live.lock().remove(&record.id);
            return;
        }
        self.update_task(&record, TaskStatus::InProgress, None);
        tracing::info!(session = %record.id, container = %handle.id, "worker running");

        self.drive(record, handle, exec, revision, cmd_rx, log, soft, hard).await;
    }

    /// Main loop: commands, worker output, and the deadline tick.
    #[allow(clippy::too_many_arguments)]
    async fn drive(
        self: &Arc<Self>,
        mut record: Session,
        handle: ContainerHandle,
        mut exec: ExecSession,
        revision: Option<RevisionCtx>,
        mut cmd_rx: mpsc::Receiver<SessionCmd>,
        log: SessionLog,
        soft: Duration,
        hard: Duration,
    ) {
        let started = self.clock.now();
        let mut last_output = self.clock.now();
        let mut awaiting_since: Option<Instant> = None;
        let mut last_heartbeat = self.clock.now();
        let mut tail = String::new();

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(SessionCmd::Answer { text, reply }) => {
                        if record.state == SessionState::AwaitingInput
                            || record.state == SessionState::Running
                        {
                            if exec.input.send(text).await.is_err() {
                                let _ = reply.send(Err(CoreError::transient(
                                    "worker input channel closed",
                                )));
                                continue;
                            }
                            if record.state == SessionState::AwaitingInput {
                                record.state = SessionState::Running;
                                record.pending_question = None;
                                self.update_task(&record, TaskStatus::InProgress, None);
                            }
                            awaiting_since = None;
                            tail.clear();
                            last_output = self.clock.now();
                            record.touch(self.clock.epoch_ms());
                            let _ = self.persist(&record, Durability::BestEffort);
                            let _ = reply.send(Ok(()));
                        } else {
                            let _ = reply.send(Err(CoreError::invalid_input(format!(
                                "session is {}",
                                record.state
                            ))));
                        }
                    }
                    Some(SessionCmd::Cancel { reply }) => {
                        exec.cancel.cancel();
                        self.pool.release(handle, Disposition::Destroy).await;
                        record.state = SessionState::Cancelled;
                        record.failure_reason = Some("cancelled by caller".to_string());
                        record.pending_question = None;
                        let _ = self.persist(&record, Durability::Boundary);
                        self.update_task(
                            &record,
                            TaskStatus::Failed,
                            Some("session cancelled".to_string()),
                        );
                        self.live.lock().remove(&record.id);
                        let _ = reply.send(Ok(()));
                        return;
                    }
                    None => {
                        // Manager dropped; treat as cancellation.
                        exec.cancel.cancel();
                        self.pool.release(handle, Disposition::Destroy).await;
                        return;
                    }
                },

                event = exec.events.recv() => match event {
                    Some(ExecEvent::Stdout(line)) | Some(ExecEvent::Stderr(line)) => {
                        log.append(&line);
                        tail.push_str(&line);
                        tail.push('\n');
                        if tail.len() > TAIL_BUFFER_CHARS {
                            let mut cut = tail.len() - TAIL_BUFFER_CHARS;
                            while !tail.is_char_boundary(cut) {
                                cut += 1;
                            }
                            tail.drain(..cut);
                        }
                        last_output = self.clock.now();
                        record.touch(self.clock.epoch_ms());
                    }
                    Some(ExecEvent::Exited(code)) => {
                        self.finish(&mut record, handle, revision, code, &log).await;
                        return;
                    }
                    None => {
                        self.pool.release(handle, Disposition::Destroy).await;
                        self.fail(&mut record, ErrorKind::WorkerFailed, "container-lost").await;
                        return;
                    }
                },

                _ = tokio::time::sleep(self.cfg.tick) => {
                    let now = self.clock.now();

                    if now.duration_since(last_heartbeat) >= self.cfg.heartbeat_interval {
                        log.append(&format!(
                            "[heartbeat] state={} elapsed_s={} last_output_s={}",
                            record.state,
                            now.duration_since(started).as_secs(),
                            now.duration_since(last_output).as_secs(),
                        ));
                        last_heartbeat = now;
                    }

                    match record.state {
                        SessionState::Running => {
                            if now.duration_since(started) >= hard {
                                exec.cancel.cancel();
                                self.pool.release(handle, Disposition::Destroy).await;
                                self.fail(
                                    &mut record,
                                    ErrorKind::Timeout,
                                    &format!("hard wall deadline reached after {}s", hard.as_secs()),
                                )
                                .await;
                                return;
                            }
                            if now.duration_since(last_output) >= self.cfg.quiet_window
                                && heuristic::is_awaiting_input(&tail)
                            {
                                record.state = SessionState::AwaitingInput;
                                record.pending_question =
                                    Some(heuristic::pending_question(&tail));
                                awaiting_since = Some(now);
                                let _ = self.persist(&record, Durability::BestEffort);
                                self.update_task(&record, TaskStatus::NeedsInput, None);
                                tracing::info!(
                                    session = %record.id,
                                    "worker is awaiting input"
                                );
                            }
                        }
                        SessionState::AwaitingInput => {
                            let waited = awaiting_since
                                .map(|t| now.duration_since(t))
                                .unwrap_or_default();
                            if waited >= soft {
                                exec.cancel.cancel();
                                self.pool.release(handle, Disposition::Destroy).await;
                                self.fail(
                                    &mut record,
                                    ErrorKind::Timeout,
                                    &format!(
                                        "soft inactivity deadline reached after {}s",
                                        soft.as_secs()
                                    ),
                                )
                                .await;
                                return;
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    /// Worker exited on its own: capture a diff on success, fail otherwise.
    async fn finish(
        self: &Arc<Self>,
        record: &mut Session,
        handle: ContainerHandle,
        revision: Option<RevisionCtx>,
        code: i32,
        log: &SessionLog,
    ) {
        if code != 0 {
            self.pool.release(handle, Disposition::Destroy).await;
            self.fail(
                record,
                ErrorKind::WorkerFailed,
                &format!("worker exited with code {code}"),
            )
            .await;
            return;
        }

        record.state = SessionState::Completing;
        let _ = self.persist(record, Durability::BestEffort);

        let changed = match self.git.has_changes(&handle.id).await {
            Ok(changed) => changed,
            Err(e) => {
                self.pool.release(handle, Disposition::Destroy).await;
                let core = e.to_core();
                self.fail(record, core.kind, &core.message).await;
                return;
            }
        };
        if !changed {
            // A worker that changed nothing did not do the job; this is
            // reported as failure, never silent success.
            self.pool.release(handle, Disposition::Destroy).await;
            self.fail(record, ErrorKind::WorkerFailed, "worker produced no changes").await;
            return;
        }

        let (patch, stats) = match self.git.extract(&handle.id).await {
            Ok(extracted) => extracted,
            Err(e) => {
                self.pool.release(handle, Disposition::Destroy).await;
                let core = e.to_core();
                self.fail(record, core.kind, &core.message).await;
                return;
            }
        };

        let diff = match self.diffs.create(record.id, &record.workspace_path, patch, stats) {
            Ok(diff) => diff,
            Err(e) => {
                self.pool.release(handle, Disposition::Destroy).await;
                self.fail(record, e.kind, &e.message).await;
                return;
            }
        };

        if let Some(ctx) = revision {
            if let Err(e) = self.diffs.supersede(&ctx.prior_diff, &diff.id) {
                tracing::warn!(
                    old = %ctx.prior_diff,
                    new = %diff.id,
                    error = %e,
                    "supersede failed"
                );
            }
        }

        record.diff_id = Some(diff.id);
        record.state = SessionState::Completed;
        record.touch(self.clock.epoch_ms());
        let _ = self.persist(record, Durability::Boundary);
        log.append(&format!("[done] diff {} captured", diff.id));

        // Keep the container warm, bound to its workspace, for revisions.
        self.pool.release(handle, Disposition::Reuse).await;
        self.live.lock().remove(&record.id);
        tracing::info!(session = %record.id, diff = %diff.id, "session completed");
    }

    async fn fail(&self, record: &mut Session, kind: ErrorKind, reason: &str) {
        record.state = SessionState::Failed;
        record.failure_reason = Some(format!("{kind}: {reason}"));
        record.pending_question = None;
        let _ = self.persist(record, Durability::Boundary);
        self.update_task(record, TaskStatus::Failed, Some(reason.to_string()));
        self.live.lock().remove(&record.id);
        tracing::warn!(session = %record.id, %kind, %reason, "session failed");
    }

    fn persist(&self, record: &Session, durability: Durability) -> Result<(), CoreError> {
        self.journal
            .upsert(
                RecordKind::Session,
                record.id.as_str(),
                record,
                durability,
                self.clock.epoch_ms(),
            )
            .map_err(|e| CoreError::fatal(format!("journal write failed: {e}")))
    }

    fn update_task(&self, record: &Session, status: TaskStatus, error: Option<String>) {
        let (Some(plan), Some(task_id)) = (&self.plan, &record.task_id) else {
            return;
        };
        let meta = StatusMeta {
            session_id: Some(record.id),
            diff_id: record.diff_id,
            last_error: error,
        };
        if let Err(e) = plan.set_status(task_id, status, meta) {
            tracing::warn!(task = %task_id, error = %e, "task status update failed");
        }
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
