// SPDX-License-Identifier: MIT

//! Scripted in-memory runtime for engine tests.
//!
//! Capture calls answer from substring-matched rules; streaming execs play
//! a [`WorkerScript`] — emit lines, wait for input, exit — so session tests
//! can drive the full lifecycle without a container runtime.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use fm_core::ContainerId;

use crate::runtime::{
    CallOpts, ContainerInfo, ContainerRuntime, ContainerSummary, CreateSpec, ExecEvent,
    ExecOutput, ExecSession, RuntimeError,
};

/// One scripted worker behavior, consumed per `exec_stream` call.
#[derive(Debug, Clone, Default)]
pub struct WorkerScript {
    pub steps: Vec<WorkerStep>,
}

#[derive(Debug, Clone)]
pub enum WorkerStep {
    /// Emit one stdout line.
    Emit(String),
    /// Emit one stderr line.
    EmitStderr(String),
    /// Block until a line of input arrives.
    AwaitInput,
    /// Exit with the given code.
    Exit(i32),
}

impl WorkerScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(mut self, line: impl Into<String>) -> Self {
        self.steps.push(WorkerStep::Emit(line.into()));
        self
    }

    pub fn emit_stderr(mut self, line: impl Into<String>) -> Self {
        self.steps.push(WorkerStep::EmitStderr(line.into()));
        self
    }

    pub fn await_input(mut self) -> Self {
        self.steps.push(WorkerStep::AwaitInput);
        self
    }

    pub fn exit(mut self, code: i32) -> Self {
        self.steps.push(WorkerStep::Exit(code));
        self
    }
}

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: ContainerId,
    pub spec: CreateSpec,
    pub running: bool,
    pub stopped: bool,
}

#[derive(Default)]
struct FakeState {
    containers: HashMap<String, FakeContainer>,
    capture_rules: Vec<(String, ExecOutput)>,
    worker_scripts: VecDeque<WorkerScript>,
    capture_calls: Vec<Vec<String>>,
    worker_inputs: Vec<String>,
    pulled_images: Vec<String>,
    fail_next_create: Option<String>,
    next_id: u32,
}

/// In-memory [`ContainerRuntime`] with scripted behavior.
#[derive(Clone, Default)]
pub struct FakeRuntime {
    state: Arc<Mutex<FakeState>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer any capture whose argv (joined) contains `needle`.
    /// Rules match in registration order; register specific ones first.
    pub fn on_capture(&self, needle: impl Into<String>, output: ExecOutput) {
        self.state.lock().capture_rules.push((needle.into(), output));
    }

    /// Queue the behavior for the next streamed worker exec.
    pub fn push_worker(&self, script: WorkerScript) {
        self.state.lock().worker_scripts.push_back(script);
    }

    /// Make the next `create` fail once with the given detail.
    pub fn fail_next_create(&self, detail: impl Into<String>) {
        self.state.lock().fail_next_create = Some(detail.into());
    }

    /// Insert a running container that the orchestrator did not create
    /// (orphan scenarios).
    pub fn seed_container(&self, labels: &[(&str, &str)]) -> ContainerId {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = ContainerId::new(format!("fkc-{}", state.next_id));
        let mut spec = CreateSpec::new("seeded:latest");
        spec.labels = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        state.containers.insert(
            id.to_string(),
            FakeContainer { id: id.clone(), spec, running: true, stopped: false },
        );
        id
    }

    /// Simulate out-of-band container death.
    pub fn kill(&self, id: &ContainerId) {
        if let Some(c) = self.state.lock().containers.get_mut(id.as_str()) {
            c.running = false;
        }
    }

    pub fn is_running(&self, id: &ContainerId) -> bool {
        self.state
            .lock()
            .containers
            .get(id.as_str())
            .map(|c| c.running)
            .unwrap_or(false)
    }

    pub fn containers(&self) -> Vec<FakeContainer> {
        self.state.lock().containers.values().cloned().collect()
    }

    pub fn capture_calls(&self) -> Vec<Vec<String>> {
        self.state.lock().capture_calls.clone()
    }

    /// Input lines workers consumed, in arrival order.
    pub fn worker_inputs(&self) -> Vec<String> {
        self.state.lock().worker_inputs.clone()
    }

    pub fn pulled_images(&self) -> Vec<String> {
        self.state.lock().pulled_images.clone()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ensure_image(&self, tag: &str, _opts: CallOpts) -> Result<(), RuntimeError> {
        self.state.lock().pulled_images.push(tag.to_string());
        Ok(())
    }

    async fn create(
        &self,
        spec: CreateSpec,
        _opts: CallOpts,
    ) -> Result<ContainerId, RuntimeError> {
        let mut state = self.state.lock();
        if let Some(detail) = state.fail_next_create.take() {
            return Err(RuntimeError::CommandFailed { op: "create".into(), detail });
        }
        state.next_id += 1;
        let id = ContainerId::new(format!("fkc-{}", state.next_id));
        state.containers.insert(
            id.to_string(),
            FakeContainer { id: id.clone(), spec, running: false, stopped: false },
        );
        Ok(id)
    }

    async fn start(&self, id: &ContainerId, _opts: CallOpts) -> Result<(), RuntimeError> {
        let mut state = self.state.lock();
        match state.containers.get_mut(id.as_str()) {
            Some(c) => {
                c.running = true;
                Ok(())
            }
            None => Err(RuntimeError::NotFound(id.to_string())),
        }
    }

    async fn exec_capture(
        &self,
        id: &ContainerId,
        argv: &[String],
        _env: &[(String, String)],
        _stdin: Option<&str>,
        _opts: CallOpts,
    ) -> Result<ExecOutput, RuntimeError> {
        let mut state = self.state.lock();
        match state.containers.get(id.as_str()) {
            Some(c) if c.running => {}
            Some(_) => {
                return Err(RuntimeError::CommandFailed {
                    op: "exec".into(),
                    detail: "container not running".into(),
                })
            }
            None => return Err(RuntimeError::NotFound(id.to_string())),
        }
        state.capture_calls.push(argv.to_vec());
        let joined = argv.join(" ");
        for (needle, output) in &state.capture_rules {
            if joined.contains(needle.as_str()) {
                return Ok(output.clone());
            }
        }
        Ok(ExecOutput::ok(""))
    }

    async fn exec_stream(
        &self,
        id: &ContainerId,
        _argv: &[String],
        _env: &[(String, String)],
        opts: CallOpts,
    ) -> Result<ExecSession, RuntimeError> {
        let script = {
            let mut state = self.state.lock();
            if !state.containers.contains_key(id.as_str()) {
                return Err(RuntimeError::NotFound(id.to_string()));
            }
            state
                .worker_scripts
                .pop_front()
                .unwrap_or_else(|| WorkerScript::new().exit(0))
        };

        let (input_tx, mut input_rx) = mpsc::channel::<String>(16);
        let (event_tx, event_rx) = mpsc::channel::<ExecEvent>(256);
        let cancel = opts.cancel.clone();
        let shared = Arc::clone(&self.state);

        tokio::spawn(async move {
            for step in script.steps {
                match step {
                    WorkerStep::Emit(line) => {
                        if event_tx.send(ExecEvent::Stdout(line)).await.is_err() {
                            return;
                        }
                    }
                    WorkerStep::EmitStderr(line) => {
                        if event_tx.send(ExecEvent::Stderr(line)).await.is_err() {
                            return;
                        }
                    }
                    WorkerStep::AwaitInput => {
                        tokio::select! {
                            line = input_rx.recv() => match line {
                                Some(line) => shared.lock().worker_inputs.push(line),
                                None => {
                                    let _ = event_tx.send(ExecEvent::Exited(-1)).await;
                                    return;
                                }
                            },
                            _ = cancel.cancelled() => {
                                let _ = event_tx.send(ExecEvent::Exited(-1)).await;
                                return;
                            }
                        }
                    }
                    WorkerStep::Exit(code) => {
                        let _ = event_tx.send(ExecEvent::Exited(code)).await;
                        return;
                    }
                }
                tokio::task::yield_now().await;
            }
            // Script fell off the end without an explicit exit.
            let _ = event_tx.send(ExecEvent::Exited(0)).await;
        });

        Ok(ExecSession { input: input_tx, events: event_rx, cancel: opts.cancel })
    }

    async fn stop(
        &self,
        id: &ContainerId,
        _grace: Duration,
        _opts: CallOpts,
    ) -> Result<(), RuntimeError> {
        if let Some(c) = self.state.lock().containers.get_mut(id.as_str()) {
            c.running = false;
            c.stopped = true;
        }
        Ok(())
    }

    async fn list(
        &self,
        label_selector: &str,
        _opts: CallOpts,
    ) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let (key, value) = label_selector.split_once('=').unwrap_or((label_selector, ""));
        let state = self.state.lock();
        Ok(state
            .containers
            .values()
            .filter(|c| c.running)
            .filter(|c| {
                c.spec
                    .labels
                    .iter()
                    .any(|(k, v)| k == key && (value.is_empty() || v == value))
            })
            .map(|c| ContainerSummary {
                id: c.id.clone(),
                image: c.spec.image.clone(),
                running: true,
            })
            .collect())
    }

    async fn inspect(
        &self,
        id: &ContainerId,
        _opts: CallOpts,
    ) -> Result<ContainerInfo, RuntimeError> {
        let state = self.state.lock();
        match state.containers.get(id.as_str()) {
            Some(c) => Ok(ContainerInfo {
                id: c.id.clone(),
                image: c.spec.image.clone(),
                running: c.running,
                exit_code: if c.running { None } else { Some(0) },
            }),
            None => Err(RuntimeError::NotFound(id.to_string())),
        }
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
