// SPDX-License-Identifier: MIT

//! The container runtime capability set.
//!
//! Every operation is cancellable and carries a per-call deadline via
//! [`CallOpts`]. Implementations must surface worker exit codes faithfully:
//! a nonzero exit from an exec'd probe is data for the caller, not an
//! adapter error.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use fm_core::{ContainerId, CoreError, ErrorKind, Mount, ResourceProfile};

/// Deadline and cancellation for one adapter call.
#[derive(Debug, Clone)]
pub struct CallOpts {
    pub deadline: Duration,
    pub cancel: CancellationToken,
}

impl CallOpts {
    pub fn deadline(deadline: Duration) -> Self {
        Self { deadline, cancel: CancellationToken::new() }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

impl Default for CallOpts {
    fn default() -> Self {
        Self::deadline(Duration::from_secs(60))
    }
}

/// Captured output of a finished exec.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self { stdout: stdout.into(), stderr: String::new(), exit_code: 0 }
    }

    pub fn exit(exit_code: i32) -> Self {
        Self { stdout: String::new(), stderr: String::new(), exit_code }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// One event from a streaming exec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecEvent {
    Stdout(String),
    Stderr(String),
    Exited(i32),
}

/// Handle on a long-running interactive exec.
///
/// Lines sent on `input` reach the process's stdin; `events` yields output
/// lines and finally `Exited`. Cancelling the token kills the exec.
pub struct ExecSession {
    pub input: mpsc::Sender<String>,
    pub events: mpsc::Receiver<ExecEvent>,
    pub cancel: CancellationToken,
}

/// Everything needed to create a container.
#[derive(Debug, Clone)]
pub struct CreateSpec {
    pub image: String,
    pub mounts: Vec<Mount>,
    pub profile: ResourceProfile,
    pub labels: Vec<(String, String)>,
    pub env: Vec<(String, String)>,
    pub workdir: Option<String>,
}

impl CreateSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            mounts: Vec::new(),
            profile: ResourceProfile::default(),
            labels: Vec::new(),
            env: Vec::new(),
            workdir: None,
        }
    }
}

/// One row from `list`.
#[derive(Debug, Clone)]
pub struct ContainerSummary {
    pub id: ContainerId,
    pub image: String,
    pub running: bool,
}

/// Result of `inspect`.
#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub id: ContainerId,
    pub image: String,
    pub running: bool,
    pub exit_code: Option<i32>,
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    /// No responsive runtime socket, CLI missing. Fatal at boot,
    /// transient afterwards.
    #[error("container runtime unavailable: {0}")]
    Unavailable(String),

    #[error("{op} failed: {detail}")]
    CommandFailed { op: String, detail: String },

    #[error("{op} exceeded its deadline")]
    DeadlineExceeded { op: String },

    #[error("{op} cancelled")]
    Cancelled { op: String },

    #[error("container not found: {0}")]
    NotFound(String),
}

impl RuntimeError {
    /// Map onto the orchestrator error taxonomy.
    pub fn to_core(&self) -> CoreError {
        let kind = match self {
            RuntimeError::Unavailable(_) => ErrorKind::Fatal,
            RuntimeError::NotFound(_) => ErrorKind::InvalidInput,
            RuntimeError::DeadlineExceeded { .. } => ErrorKind::Timeout,
            RuntimeError::Cancelled { .. } | RuntimeError::CommandFailed { .. } => {
                ErrorKind::TransientInfra
            }
        };
        CoreError::new(kind, self.to_string())
    }
}

/// Thin abstraction over the container runtime. All operations are
/// cancellable, deadline-bounded, and hold no shared lock across a call.
#[async_trait]
pub trait ContainerRuntime: Send + Sync + 'static {
    /// Pull the image if not present locally.
    async fn ensure_image(&self, tag: &str, opts: CallOpts) -> Result<(), RuntimeError>;

    async fn create(&self, spec: CreateSpec, opts: CallOpts)
        -> Result<ContainerId, RuntimeError>;

    async fn start(&self, id: &ContainerId, opts: CallOpts) -> Result<(), RuntimeError>;

    /// Run a command to completion and capture its output. The exit code is
    /// surfaced faithfully — nonzero is not an error at this layer.
    async fn exec_capture(
        &self,
        id: &ContainerId,
        argv: &[String],
        env: &[(String, String)],
        stdin: Option<&str>,
        opts: CallOpts,
    ) -> Result<ExecOutput, RuntimeError>;

    /// Start an interactive command, keeping stdin open for follow-up input.
    async fn exec_stream(
        &self,
        id: &ContainerId,
        argv: &[String],
        env: &[(String, String)],
        opts: CallOpts,
    ) -> Result<ExecSession, RuntimeError>;

    /// Stop with a grace window, then reap the container.
    async fn stop(
        &self,
        id: &ContainerId,
        grace: Duration,
        opts: CallOpts,
    ) -> Result<(), RuntimeError>;

    /// Live containers matching a `key=value` label selector.
    async fn list(
        &self,
        label_selector: &str,
        opts: CallOpts,
    ) -> Result<Vec<ContainerSummary>, RuntimeError>;

    async fn inspect(&self, id: &ContainerId, opts: CallOpts)
        -> Result<ContainerInfo, RuntimeError>;
}
