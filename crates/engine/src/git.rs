// SPDX-License-Identifier: MIT

//! In-container workspace git engine.
//!
//! Runs through the container adapter, always under `/workspace`. The
//! sequence is: prepare (init + initial snapshot commit), then on demand
//! extract a canonical patch of staged-vs-HEAD, or probe for changes with
//! the quiet comparison — nonzero exit ⇔ changes exist, which is contract,
//! not failure.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use fm_adapters::{CallOpts, ContainerRuntime, ExecOutput, RuntimeError};
use fm_core::container::WORKSPACE_MOUNT;
use fm_core::{ContainerId, CoreError, DiffStats};

/// Deterministic author so equivalent snapshots hash identically.
const AUTHOR_NAME: &str = "foreman-worker";
const AUTHOR_EMAIL: &str = "worker@foreman.invalid";

/// Deadline for one in-container git call.
const GIT_DEADLINE: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum GitError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("git {op} failed: {stderr}")]
    Command { op: String, stderr: String },
}

impl GitError {
    pub fn to_core(&self) -> CoreError {
        match self {
            GitError::Runtime(e) => e.to_core(),
            GitError::Command { .. } => CoreError::transient(self.to_string()),
        }
    }
}

/// Git driver for one container's workspace.
pub struct GitEngine<R: ContainerRuntime> {
    runtime: Arc<R>,
}

impl<R: ContainerRuntime> GitEngine<R> {
    pub fn new(runtime: Arc<R>) -> Self {
        Self { runtime }
    }

    /// Initialize the workspace repository and commit the initial snapshot.
    /// Returns the snapshot commit hash.
    ///
    /// Works regardless of workspace ownership: safe.directory is added for
    /// the container user, and `--allow-empty` keeps a bare workspace valid.
    pub async fn prepare(&self, id: &ContainerId) -> Result<String, GitError> {
        self.run_ok(
            id,
            &["config", "--global", "--add", "safe.directory", WORKSPACE_MOUNT],
            "config safe.directory",
        )
        .await?;
        self.run_ok(id, &["init", "-q", WORKSPACE_MOUNT], "init").await?;
        self.run_ok(id, &["-C", WORKSPACE_MOUNT, "add", "-A"], "add").await?;
        self.run_ok(
            id,
            &[
                "-C",
                WORKSPACE_MOUNT,
                "commit",
                "-q",
                "--allow-empty",
                "-m",
                "workspace snapshot",
            ],
            "commit",
        )
        .await?;
        let head = self
            .run_ok(id, &["-C", WORKSPACE_MOUNT, "rev-parse", "HEAD"], "rev-parse")
            .await?;
        Ok(head.stdout.trim().to_string())
    }

    /// Resolve the existing snapshot commit without re-committing.
    /// Revision sessions reuse the original baseline so their patch
    /// covers the whole change, not a delta on the prior attempt.
    pub async fn baseline(&self, id: &ContainerId) -> Result<String, GitError> {
        self.run_ok(
            id,
            &["config", "--global", "--add", "safe.directory", WORKSPACE_MOUNT],
            "config safe.directory",
        )
        .await?;
        let head = self
            .run_ok(id, &["-C", WORKSPACE_MOUNT, "rev-parse", "HEAD"], "rev-parse")
            .await?;
        Ok(head.stdout.trim().to_string())
    }

    /// Whether the workspace has staged changes relative to the snapshot.
    pub async fn has_changes(&self, id: &ContainerId) -> Result<bool, GitError> {
        self.run_ok(id, &["-C", WORKSPACE_MOUNT, "add", "-A"], "add").await?;
        let out = self
            .run(id, &["-C", WORKSPACE_MOUNT, "diff", "--cached", "--quiet"])
            .await?;
        // Exit 1 means differences; anything past 1 is a real failure.
        match out.exit_code {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(GitError::Command {
                op: "diff --quiet".to_string(),
                stderr: out.stderr.trim().to_string(),
            }),
        }
    }

    /// Produce the canonical unified patch and its numeric stats.
    ///
    /// The patch is staged-vs-HEAD with color, external drivers, and
    /// timestamps suppressed, so equivalent workspaces yield byte-equal
    /// patches suitable for replay.
    pub async fn extract(&self, id: &ContainerId) -> Result<(String, DiffStats), GitError> {
        self.run_ok(id, &["-C", WORKSPACE_MOUNT, "add", "-A"], "add").await?;
        let patch = self
            .run_ok(
                id,
                &[
                    "-c",
                    "core.quotepath=false",
                    "-C",
                    WORKSPACE_MOUNT,
                    "diff",
                    "--cached",
                    "--no-color",
                    "--no-ext-diff",
                    "--full-index",
                    "--binary",
                ],
                "diff --cached",
            )
            .await?;
        let numstat = self
            .run_ok(
                id,
                &["-C", WORKSPACE_MOUNT, "diff", "--cached", "--numstat"],
                "diff --numstat",
            )
            .await?;
        Ok((patch.stdout, DiffStats::from_numstat(&numstat.stdout)))
    }

    async fn run(&self, id: &ContainerId, args: &[&str]) -> Result<ExecOutput, GitError> {
        let mut argv: Vec<String> = vec!["git".to_string()];
        argv.extend(args.iter().map(|s| s.to_string()));
        let env = vec![
            ("GIT_AUTHOR_NAME".to_string(), AUTHOR_NAME.to_string()),
            ("GIT_AUTHOR_EMAIL".to_string(), AUTHOR_EMAIL.to_string()),
            ("GIT_COMMITTER_NAME".to_string(), AUTHOR_NAME.to_string()),
            ("GIT_COMMITTER_EMAIL".to_string(), AUTHOR_EMAIL.to_string()),
        ];
        Ok(self
            .runtime
            .exec_capture(id, &argv, &env, None, CallOpts::deadline(GIT_DEADLINE))
            .await?)
    }

    /// Run and require exit 0.
    async fn run_ok(
        &self,
        id: &ContainerId,
        args: &[&str],
        op: &str,
    ) -> Result<ExecOutput, GitError> {
        let out = self.run(id, args).await?;
        if out.success() {
            Ok(out)
        } else {
            Err(GitError::Command {
                op: op.to_string(),
                stderr: out.stderr.trim().to_string(),
            })
        }
    }
}

#[cfg(test)]
#[path = "git_tests.rs"]
mod tests;
