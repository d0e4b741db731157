// SPDX-License-Identifier: MIT

//! Docker CLI runtime adapter.
//!
//! The runtime socket is discovered by probing a short ordered path list;
//! the first connectable path wins and is pinned as `DOCKER_HOST` for every
//! CLI invocation. Containers are created with an idle entrypoint and all
//! worker I/O flows through `docker exec`.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use fm_core::ContainerId;

use crate::runtime::{
    CallOpts, ContainerInfo, ContainerRuntime, ContainerSummary, CreateSpec, ExecEvent,
    ExecOutput, ExecSession, RuntimeError,
};
use crate::subprocess::{run_with_timeout, SubprocessError};

/// How long one socket probe may take.
const PROBE_TIMEOUT: Duration = Duration::from_millis(250);

/// Buffered lines before an exec stream applies backpressure.
const STREAM_BUFFER: usize = 256;

/// Candidate socket paths, probed in order. `$DOCKER_HOST` wins outright.
fn probe_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("/var/run/docker.sock")];
    if let Ok(home) = std::env::var("HOME") {
        paths.push(PathBuf::from(&home).join(".docker/run/docker.sock"));
    }
    if let Ok(uid) = std::env::var("UID") {
        paths.push(PathBuf::from(format!("/run/user/{uid}/podman/podman.sock")));
    }
    paths.push(PathBuf::from("/run/podman/podman.sock"));
    paths
}

/// Container runtime driven through the `docker` CLI.
#[derive(Clone)]
pub struct DockerCli {
    /// Resolved `DOCKER_HOST` value, e.g. `unix:///var/run/docker.sock`.
    host: String,
}

impl DockerCli {
    /// Probe the ordered socket path list; the first responsive path wins.
    pub async fn discover() -> Result<Self, RuntimeError> {
        if let Ok(host) = std::env::var("DOCKER_HOST") {
            if !host.is_empty() {
                return Ok(Self { host });
            }
        }
        for path in probe_paths() {
            let connect = tokio::net::UnixStream::connect(&path);
            if let Ok(Ok(_)) = tokio::time::timeout(PROBE_TIMEOUT, connect).await {
                return Ok(Self { host: format!("unix://{}", path.display()) });
            }
        }
        Err(RuntimeError::Unavailable(
            "no responsive container runtime socket found".to_string(),
        ))
    }

    /// Use a known host without probing (tests, remote daemons).
    pub fn with_host(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("docker");
        cmd.env("DOCKER_HOST", &self.host);
        cmd
    }

    /// Run one CLI call under the caller's deadline and cancel token.
    async fn run(
        &self,
        args: &[&str],
        opts: &CallOpts,
        op: &str,
    ) -> Result<std::process::Output, RuntimeError> {
        let mut cmd = self.command();
        cmd.args(args);
        tokio::select! {
            out = run_with_timeout(cmd, opts.deadline, op) => {
                out.map_err(|e| match e {
                    SubprocessError::TimedOut { .. } => {
                        RuntimeError::DeadlineExceeded { op: op.to_string() }
                    }
                    SubprocessError::Spawn { source, .. } => {
                        RuntimeError::Unavailable(format!("docker CLI: {source}"))
                    }
                })
            }
            _ = opts.cancel.cancelled() => Err(RuntimeError::Cancelled { op: op.to_string() }),
        }
    }

    /// Like [`Self::run`] but requires exit 0.
    async fn run_ok(
        &self,
        args: &[&str],
        opts: &CallOpts,
        op: &str,
    ) -> Result<String, RuntimeError> {
        let out = self.run(args, opts, op).await?;
        if out.status.success() {
            Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
        } else {
            Err(RuntimeError::CommandFailed {
                op: op.to_string(),
                detail: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            })
        }
    }
}

/// Build the argv for `docker create`. Split out for testability.
pub(crate) fn create_args(spec: &CreateSpec) -> Vec<String> {
    let mut args: Vec<String> = vec!["create".into()];
    for (k, v) in &spec.labels {
        args.push("--label".into());
        args.push(format!("{k}={v}"));
    }
    for m in &spec.mounts {
        args.push("-v".into());
        let ro = if m.read_only { ":ro" } else { "" };
        args.push(format!(
            "{}:{}{}",
            m.host_path.display(),
            m.container_path.display(),
            ro
        ));
    }
    if let Some(ref mem) = spec.profile.memory {
        args.push("--memory".into());
        args.push(mem.clone());
    }
    if let Some(ref cpus) = spec.profile.cpus {
        args.push("--cpus".into());
        args.push(cpus.clone());
    }
    for (k, v) in &spec.env {
        args.push("-e".into());
        args.push(format!("{k}={v}"));
    }
    if let Some(ref wd) = spec.workdir {
        args.push("-w".into());
        args.push(wd.clone());
    }
    args.push(spec.image.clone());
    // Idle entrypoint; workers run through exec.
    args.push("sleep".into());
    args.push("infinity".into());
    args
}

/// Build the argv for `docker exec`.
pub(crate) fn exec_args(
    id: &ContainerId,
    argv: &[String],
    env: &[(String, String)],
    interactive: bool,
) -> Vec<String> {
    let mut args: Vec<String> = vec!["exec".into()];
    if interactive {
        args.push("-i".into());
    }
    for (k, v) in env {
        args.push("-e".into());
        args.push(format!("{k}={v}"));
    }
    args.push(id.to_string());
    args.extend(argv.iter().cloned());
    args
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn ensure_image(&self, tag: &str, opts: CallOpts) -> Result<(), RuntimeError> {
        let present = self
            .run(&["image", "inspect", tag], &opts, "docker image inspect")
            .await?;
        if present.status.success() {
            return Ok(());
        }
        tracing::info!(%tag, "pulling image");
        self.run_ok(&["pull", tag], &opts, "docker pull").await?;
        Ok(())
    }

    async fn create(
        &self,
        spec: CreateSpec,
        opts: CallOpts,
    ) -> Result<ContainerId, RuntimeError> {
        let args = create_args(&spec);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let id = self.run_ok(&arg_refs, &opts, "docker create").await?;
        Ok(ContainerId::new(id))
    }

    async fn start(&self, id: &ContainerId, opts: CallOpts) -> Result<(), RuntimeError> {
        self.run_ok(&["start", id.as_str()], &opts, "docker start").await?;
        Ok(())
    }

    async fn exec_capture(
        &self,
        id: &ContainerId,
        argv: &[String],
        env: &[(String, String)],
        stdin: Option<&str>,
        opts: CallOpts,
    ) -> Result<ExecOutput, RuntimeError> {
        let args = exec_args(id, argv, env, stdin.is_some());
        let mut cmd = self.command();
        cmd.args(&args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| RuntimeError::Unavailable(
            format!("docker CLI: {e}"),
        ))?;

        if let Some(text) = stdin {
            if let Some(mut pipe) = child.stdin.take() {
                let _ = pipe.write_all(text.as_bytes()).await;
                // Dropping closes the pipe so the exec sees EOF.
            }
        }

        let wait = child.wait_with_output();
        let out = tokio::select! {
            out = tokio::time::timeout(opts.deadline, wait) => match out {
                Ok(Ok(out)) => out,
                Ok(Err(e)) => {
                    return Err(RuntimeError::CommandFailed {
                        op: "docker exec".to_string(),
                        detail: e.to_string(),
                    })
                }
                Err(_) => {
                    return Err(RuntimeError::DeadlineExceeded { op: "docker exec".to_string() })
                }
            },
            _ = opts.cancel.cancelled() => {
                return Err(RuntimeError::Cancelled { op: "docker exec".to_string() })
            }
        };

        // Exit code is data, not an error. -1 means killed by signal.
        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&out.stdout).to_string(),
            stderr: String::from_utf8_lossy(&out.stderr).to_string(),
            exit_code: out.status.code().unwrap_or(-1),
        })
    }

    async fn exec_stream(
        &self,
        id: &ContainerId,
        argv: &[String],
        env: &[(String, String)],
        opts: CallOpts,
    ) -> Result<ExecSession, RuntimeError> {
        let args = exec_args(id, argv, env, true);
        let mut cmd = self.command();
        cmd.args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| RuntimeError::Unavailable(
            format!("docker CLI: {e}"),
        ))?;

        let (input_tx, mut input_rx) = mpsc::channel::<String>(16);
        let (event_tx, event_rx) = mpsc::channel::<ExecEvent>(STREAM_BUFFER);
        let cancel = opts.cancel.clone();

        // Stdin writer: one line per answer.
        if let Some(mut stdin) = child.stdin.take() {
            tokio::spawn(async move {
                while let Some(line) = input_rx.recv().await {
                    if stdin.write_all(line.as_bytes()).await.is_err() {
                        break;
                    }
                    if stdin.write_all(b"\n").await.is_err() {
                        break;
                    }
                    let _ = stdin.flush().await;
                }
            });
        }

        if let Some(stdout) = child.stdout.take() {
            let tx = event_tx.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tx.send(ExecEvent::Stdout(line)).await.is_err() {
                        break;
                    }
                }
            });
        }

        if let Some(stderr) = child.stderr.take() {
            let tx = event_tx.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tx.send(ExecEvent::Stderr(line)).await.is_err() {
                        break;
                    }
                }
            });
        }

        // Waiter: reap the child and report its exit code; a cancelled
        // token kills the exec first.
        {
            let tx = event_tx;
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let code = tokio::select! {
                    status = child.wait() => status.ok().and_then(|s| s.code()).unwrap_or(-1),
                    _ = cancel.cancelled() => {
                        let _ = child.start_kill();
                        let _ = child.wait().await;
                        -1
                    }
                };
                let _ = tx.send(ExecEvent::Exited(code)).await;
            });
        }

        Ok(ExecSession { input: input_tx, events: event_rx, cancel })
    }

    async fn stop(
        &self,
        id: &ContainerId,
        grace: Duration,
        opts: CallOpts,
    ) -> Result<(), RuntimeError> {
        let grace_s = grace.as_secs().max(1).to_string();
        // Best-effort stop within the grace window, then reap.
        let _ = self
            .run(&["stop", "-t", &grace_s, id.as_str()], &opts, "docker stop")
            .await;
        let _ = self.run(&["rm", "-f", id.as_str()], &opts, "docker rm").await;
        Ok(())
    }

    async fn list(
        &self,
        label_selector: &str,
        opts: CallOpts,
    ) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let filter = format!("label={label_selector}");
        let out = self
            .run_ok(
                &["ps", "--filter", &filter, "--format", "{{.ID}}\t{{.Image}}"],
                &opts,
                "docker ps",
            )
            .await?;
        let mut summaries = Vec::new();
        for line in out.lines() {
            let mut parts = line.split('\t');
            let (Some(id), Some(image)) = (parts.next(), parts.next()) else {
                continue;
            };
            summaries.push(ContainerSummary {
                id: ContainerId::new(id),
                image: image.to_string(),
                running: true,
            });
        }
        Ok(summaries)
    }

    async fn inspect(
        &self,
        id: &ContainerId,
        opts: CallOpts,
    ) -> Result<ContainerInfo, RuntimeError> {
        let out = self
            .run(
                &[
                    "inspect",
                    "--format",
                    "{{.State.Running}}\t{{.State.ExitCode}}\t{{.Config.Image}}",
                    id.as_str(),
                ],
                &opts,
                "docker inspect",
            )
            .await?;
        if !out.status.success() {
            return Err(RuntimeError::NotFound(id.to_string()));
        }
        let text = String::from_utf8_lossy(&out.stdout);
        let mut parts = text.trim().split('\t');
        let running = parts.next() == Some("true");
        let exit_code = parts.next().and_then(|s| s.parse::<i32>().ok());
        let image = parts.next().unwrap_or_default().to_string();
        Ok(ContainerInfo {
            id: id.clone(),
            image,
            running,
            exit_code: if running { None } else { exit_code },
        })
    }
}

#[cfg(test)]
#[path = "docker_tests.rs"]
mod tests;
