// SPDX-License-Identifier: MIT

//! Tool facade: stateless mapping from wire requests to core operations.
//!
//! Every call is timed and logged as `{request_id, tool, duration_ms,
//! outcome}`. All state lives below this layer.

use std::sync::Arc;
use std::time::Instant;

use fm_adapters::ContainerRuntime;
use fm_core::{Clock, CoreError, DiffId, SessionId, TaskId};
use fm_engine::{DiffStore, DispatchRequest, SessionManager};
use fm_plan::{PlanStore, StatusMeta};
use fm_wire::{
    AnswerArgs, ApplyDiffArgs, CancelArgs, DiffArgs, DispatchArgs, RejectDiffArgs, Request,
    Response, RevisionArgs, SetTaskStatusArgs, StatusArgs, TailLogArgs, ToolName,
};

/// The facade. Cheap to clone per request via `Arc`.
pub struct Facade<R: ContainerRuntime, C: Clock> {
    sessions: Arc<SessionManager<R, C>>,
    diffs: Arc<DiffStore<C>>,
    plan: Option<Arc<PlanStore>>,
}

impl<R: ContainerRuntime, C: Clock> Facade<R, C> {
    pub fn new(
        sessions: Arc<SessionManager<R, C>>,
        diffs: Arc<DiffStore<C>>,
        plan: Option<Arc<PlanStore>>,
    ) -> Self {
        Self { sessions, diffs, plan }
    }

    /// Handle one request, always producing a response.
    pub async fn handle(&self, request: Request) -> Response {
        let started = Instant::now();
        let request_id = request.id.clone();
        let tool = request.tool.clone();

        let result = self.dispatch(request).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(value) => {
                tracing::info!(
                    request_id = %request_id,
                    %tool,
                    duration_ms,
                    outcome = "ok",
                    "tool call"
                );
                Response::success(request_id, value)
            }
            Err(err) => {
                tracing::warn!(
                    request_id = %request_id,
                    %tool,
                    duration_ms,
                    outcome = %err.kind,
                    "tool call failed"
                );
                Response::failure(request_id, err.into())
            }
        }
    }

    async fn dispatch(&self, request: Request) -> Result<serde_json::Value, CoreError> {
        let tool = request
            .tool_name()
            .map_err(|e| CoreError::invalid_input(e.to_string()))?;

        match tool {
            ToolName::DispatchWorker => {
                let args: DispatchArgs = parse(&request)?;
                let mut req = DispatchRequest::new(args.prompt, args.workspace);
                req.image = args.image;
                req.task_id = args.task_id.map(TaskId::new);
                req.soft_deadline = args.soft_deadline_s.map(std::time::Duration::from_secs);
                req.hard_deadline = args.hard_deadline_s.map(std::time::Duration::from_secs);
                let id = self.sessions.dispatch(req).await?;
                Ok(serde_json::json!({ "sessionId": id }))
            }
            ToolName::WorkerStatus => {
                let args: StatusArgs = parse(&request)?;
                let session = self.sessions.status(&SessionId::from_string(&args.session_id))?;
                to_value(&session)
            }
            ToolName::AnswerWorkerQuestion => {
                let args: AnswerArgs = parse(&request)?;
                self.sessions
                    .answer(&SessionId::from_string(&args.session_id), &args.text)
                    .await?;
                Ok(serde_json::json!({ "delivered": true }))
            }
            ToolName::CancelWorker => {
                let args: CancelArgs = parse(&request)?;
                self.sessions.cancel(&SessionId::from_string(&args.session_id)).await?;
                Ok(serde_json::json!({ "cancelled": true }))
            }
            ToolName::ReviewDiff => {
                let args: DiffArgs = parse(&request)?;
                let diff = self.diffs.get(&DiffId::from_string(&args.diff_id))?;
                to_value(&diff)
            }
            ToolName::ApplyDiff => {
                let args: ApplyDiffArgs = parse(&request)?;
                let receipt = self
                    .diffs
                    .apply(&DiffId::from_string(&args.diff_id), &args.target_workspace)
                    .await?;
                // A diff bound to a task marks the task done once applied.
                self.mark_task_done(&receipt.diff_id);
                to_value(&receipt)
            }
            ToolName::RejectDiff => {
                let args: RejectDiffArgs = parse(&request)?;
                let diff = self.diffs.reject(&DiffId::from_string(&args.diff_id), &args.reason)?;
                // Reject releases the session's warm container.
                let _ = self.sessions.drop_warm_container(&diff.session_id).await;
                to_value(&diff)
            }
            ToolName::RequestRevision => {
                let args: RevisionArgs = parse(&request)?;
                let id = self
                    .sessions
                    .request_revision(&DiffId::from_string(&args.diff_id), &args.feedback)
                    .await?;
                Ok(serde_json::json!({ "sessionId": id }))
            }
            ToolName::ListTasks => to_value(&self.plan()?.list()),
            ToolName::NextTasks => {
                let plan = self.plan()?;
                Ok(serde_json::json!({
                    "ready": plan.get_ready(),
                    "recommended": plan.next_recommended(),
                }))
            }
            ToolName::SetTaskStatus => {
                let args: SetTaskStatusArgs = parse(&request)?;
                let meta = StatusMeta {
                    session_id: args.session_id.map(SessionId::from_string),
                    diff_id: args.diff_id.map(DiffId::from_string),
                    last_error: args.last_error,
                };
                self.plan()?
                    .set_status(&TaskId::new(args.task_id), args.status, meta)
                    .map_err(|e| e.to_core())?;
                Ok(serde_json::json!({ "updated": true }))
            }
            ToolName::ValidateTasks => {
                let issues = self.plan()?.validate();
                Ok(serde_json::json!({ "valid": issues.is_empty(), "issues": issues }))
            }
            ToolName::TailContainerLog => {
                let args: TailLogArgs = parse(&request)?;
                let (lines, cursor) = self
                    .sessions
                    .tail_log(&SessionId::from_string(&args.session_id), args.cursor)?;
                Ok(serde_json::json!({ "lines": lines, "cursor": cursor }))
            }
        }
    }

    fn plan(&self) -> Result<&Arc<PlanStore>, CoreError> {
        self.plan
            .as_ref()
            .ok_or_else(|| CoreError::invalid_input("no task plan loaded (tasks.json missing)"))
    }

    /// Applied diff → bound task becomes done.
    fn mark_task_done(&self, diff_id: &DiffId) {
        let Some(plan) = self.plan.as_ref() else { return };
        let Ok(diff) = self.diffs.get(diff_id) else { return };
        let Ok(session) = self.sessions.status(&diff.session_id) else { return };
        let Some(task_id) = session.task_id else { return };
        let meta = StatusMeta {
            session_id: Some(session.id),
            diff_id: Some(*diff_id),
            last_error: None,
        };
        if let Err(e) = plan.set_status(&task_id, fm_core::TaskStatus::Done, meta) {
            tracing::warn!(task = %task_id, error = %e, "task done update failed");
        }
    }
}

fn parse<T: serde::de::DeserializeOwned>(request: &Request) -> Result<T, CoreError> {
    request
        .parse_args()
        .map_err(|e| CoreError::invalid_input(format!("bad arguments: {e}")))
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, CoreError> {
    serde_json::to_value(value).map_err(|e| CoreError::fatal(e.to_string()))
}

#[cfg(test)]
#[path = "facade_tests.rs"]
mod tests;
