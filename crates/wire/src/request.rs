// SPDX-License-Identifier: MIT

//! Request shape and per-tool argument payloads.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

use crate::ProtocolError;
use fm_core::TaskStatus;

/// One incoming tool call. `id` is echoed verbatim in the response and may
/// be any JSON value the client chose.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub id: serde_json::Value,
    pub tool: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

impl Request {
    pub fn new(id: impl Into<serde_json::Value>, tool: ToolName, args: serde_json::Value) -> Self {
        Self { id: id.into(), tool: tool.as_str().to_string(), args }
    }

    pub fn tool_name(&self) -> Result<ToolName, ProtocolError> {
        self.tool.parse()
    }

    /// Decode the args payload for a specific tool.
    pub fn parse_args<T: serde::de::DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        Ok(serde_json::from_value(self.args.clone())?)
    }
}

/// The canonical tool set. Wire names are camelCase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolName {
    DispatchWorker,
    WorkerStatus,
    AnswerWorkerQuestion,
    CancelWorker,
    ReviewDiff,
    ApplyDiff,
    RejectDiff,
    RequestRevision,
    ListTasks,
    NextTasks,
    SetTaskStatus,
    ValidateTasks,
    TailContainerLog,
}

impl ToolName {
    pub const ALL: [ToolName; 13] = [
        ToolName::DispatchWorker,
        ToolName::WorkerStatus,
        ToolName::AnswerWorkerQuestion,
        ToolName::CancelWorker,
        ToolName::ReviewDiff,
        ToolName::ApplyDiff,
        ToolName::RejectDiff,
        ToolName::RequestRevision,
        ToolName::ListTasks,
        ToolName::NextTasks,
        ToolName::SetTaskStatus,
        ToolName::ValidateTasks,
        ToolName::TailContainerLog,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::DispatchWorker => "dispatchWorker",
            ToolName::WorkerStatus => "workerStatus",
            ToolName::AnswerWorkerQuestion => "answerWorkerQuestion",
            ToolName::CancelWorker => "cancelWorker",
            ToolName::ReviewDiff => "reviewDiff",
            ToolName::ApplyDiff => "applyDiff",
            ToolName::RejectDiff => "rejectDiff",
            ToolName::RequestRevision => "requestRevision",
            ToolName::ListTasks => "listTasks",
            ToolName::NextTasks => "nextTasks",
            ToolName::SetTaskStatus => "setTaskStatus",
            ToolName::ValidateTasks => "validateTasks",
            ToolName::TailContainerLog => "tailContainerLog",
        }
    }
}

impl FromStr for ToolName {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToolName::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownTool(s.to_string()))
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `dispatchWorker` args.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DispatchArgs {
    pub prompt: String,
    pub workspace: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Soft inactivity deadline override, seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soft_deadline_s: Option<u64>,
    /// Hard wall deadline override, seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hard_deadline_s: Option<u64>,
}

/// `workerStatus` args.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusArgs {
    pub session_id: String,
}

/// `answerWorkerQuestion` args.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnswerArgs {
    pub session_id: String,
    pub text: String,
}

/// `cancelWorker` args.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CancelArgs {
    pub session_id: String,
}

/// `reviewDiff` args.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DiffArgs {
    pub diff_id: String,
}

/// `applyDiff` args.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApplyDiffArgs {
    pub diff_id: String,
    pub target_workspace: PathBuf,
}

/// `rejectDiff` args.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RejectDiffArgs {
    pub diff_id: String,
    #[serde(default)]
    pub reason: String,
}

/// `requestRevision` args.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RevisionArgs {
    pub diff_id: String,
    pub feedback: String,
}

/// `setTaskStatus` args.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SetTaskStatusArgs {
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// `tailContainerLog` args.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TailLogArgs {
    pub session_id: String,
    /// Cursor from the previous tail call; 0 starts from the oldest
    /// retained line.
    #[serde(default)]
    pub cursor: u64,
}
