// SPDX-License-Identifier: MIT

//! Session record: one live worker run inside one container.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::container::ContainerId;
use crate::define_id;
use crate::diff::DiffId;
use crate::task::TaskId;

define_id! {
    /// Unique identifier for a worker session.
    pub struct SessionId("ses-");
}

/// Lifecycle state of a worker session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionState {
    Initializing,
    Running,
    AwaitingInput,
    Completing,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Failed | SessionState::Cancelled
        )
    }

    /// Whether `next` is a legal transition from this state.
    ///
    /// Terminal states accept nothing. Any non-terminal state may move to
    /// `Failed` or `Cancelled`.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, SessionState::Failed) | (_, SessionState::Cancelled) => true,
            (SessionState::Initializing, SessionState::Running) => true,
            (SessionState::Running, SessionState::AwaitingInput) => true,
            (SessionState::AwaitingInput, SessionState::Running) => true,
            (SessionState::Running, SessionState::Completing) => true,
            (SessionState::Completing, SessionState::Completed) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Initializing => "initializing",
            SessionState::Running => "running",
            SessionState::AwaitingInput => "awaiting-input",
            SessionState::Completing => "completing",
            SessionState::Completed => "completed",
            SessionState::Failed => "failed",
            SessionState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted state of one worker run.
///
/// References to the task, container, and diff are by id — the journal
/// stores this record as an opaque blob and hydration never chases
/// pointers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    /// Bound task, absent for ad-hoc runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    pub container_id: ContainerId,
    /// Host-visible workspace directory mounted at `/workspace`.
    pub workspace_path: PathBuf,
    pub state: SessionState,
    /// The worker's question, present iff state is awaiting-input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_question: Option<String>,
    pub revision_count: u32,
    pub prompt: String,
    pub started_at_ms: u64,
    pub last_activity_ms: u64,
    /// Diff captured from this session, once produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_id: Option<DiffId>,
    /// Commit hash of the initial workspace snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_commit: Option<String>,
    /// Why the session failed or was cancelled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl Session {
    pub fn new(
        id: SessionId,
        container_id: ContainerId,
        workspace_path: PathBuf,
        prompt: String,
        now_ms: u64,
    ) -> Self {
        Self {
            id,
            task_id: None,
            container_id,
            workspace_path,
            state: SessionState::Initializing,
            pending_question: None,
            revision_count: 0,
            prompt,
            started_at_ms: now_ms,
            last_activity_ms: now_ms,
            diff_id: None,
            initial_commit: None,
            failure_reason: None,
        }
    }

    /// Record activity, keeping `last_activity_ms` monotone.
    pub fn touch(&mut self, now_ms: u64) {
        if now_ms > self.last_activity_ms {
            self.last_activity_ms = now_ms;
        }
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
