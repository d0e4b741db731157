// SPDX-License-Identifier: MIT

//! Supervisor: parent process that restarts the core on crash.
//!
//! The child is this same binary re-executed with a marker env var, bound
//! to the same standard streams. Unexpected exits restart with bounded
//! exponential backoff under a sliding-window restart budget; termination
//! signals are forwarded, and the child gets a graceful window before
//! SIGKILL.

use std::collections::VecDeque;
use std::process::Stdio;
use std::time::{Duration, Instant};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::Command;
use tokio::signal::unix::{signal, SignalKind};

use crate::env::SUPERVISED_MARKER;

/// Backoff cap between restarts.
const BACKOFF_CAP: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub max_restarts: u32,
    pub window: Duration,
    pub shutdown_timeout: Duration,
}

impl SupervisorConfig {
    pub fn from_env() -> Self {
        Self {
            max_restarts: crate::env::supervisor_max_restarts(),
            window: crate::env::supervisor_restart_window(),
            shutdown_timeout: crate::env::supervisor_shutdown_timeout(),
        }
    }
}

/// Delay before restart attempt `attempt` (0-based): 1, 2, 4, 8 … seconds,
/// capped at 30.
pub fn backoff_delay(attempt: u32) -> Duration {
    let secs = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    Duration::from_secs(secs).min(BACKOFF_CAP)
}

/// Sliding-window restart budget: at most `max` restarts per `window`.
pub struct RestartBudget {
    max: u32,
    window: Duration,
    history: VecDeque<Instant>,
}

impl RestartBudget {
    pub fn new(max: u32, window: Duration) -> Self {
        Self { max, window, history: VecDeque::new() }
    }

    /// Record a restart at `now`. Returns false when the budget is spent.
    pub fn try_consume(&mut self, now: Instant) -> bool {
        while let Some(front) = self.history.front() {
            if now.duration_since(*front) >= self.window {
                self.history.pop_front();
            } else {
                break;
            }
        }
        if self.history.len() as u32 >= self.max {
            return false;
        }
        self.history.push_back(now);
        true
    }

    pub fn used(&self) -> u32 {
        self.history.len() as u32
    }
}

/// Run the supervisor loop. Returns the process exit code: 0 after a
/// graceful child stop, otherwise the child's last exit code once the
/// restart budget is exhausted.
pub async fn run(cfg: SupervisorConfig) -> i32 {
    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(e) => {
            tracing::error!(error = %e, "cannot resolve own binary path");
            return 1;
        }
    };

    let mut budget = RestartBudget::new(cfg.max_restarts, cfg.window);
    let mut attempt: u32 = 0;

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "cannot install SIGTERM handler");
            return 1;
        }
    };
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "cannot install SIGINT handler");
            return 1;
        }
    };

    loop {
        let mut child = match Command::new(&exe)
            .env(SUPERVISED_MARKER, "1")
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(error = %e, "failed to spawn core");
                return 1;
            }
        };
        tracing::info!(pid = child.id().unwrap_or_default(), "core started");

        let status = tokio::select! {
            status = child.wait() => status,
            _ = sigterm.recv() => {
                return shutdown_child(&mut child, cfg.shutdown_timeout).await;
            }
            _ = sigint.recv() => {
                return shutdown_child(&mut child, cfg.shutdown_timeout).await;
            }
        };

        let code = match status {
            Ok(status) => status.code().unwrap_or(1),
            Err(e) => {
                tracing::error!(error = %e, "wait on core failed");
                1
            }
        };

        if code == 0 {
            tracing::info!("core stopped gracefully");
            return 0;
        }

        // Any non-zero child exit triggers restart evaluation.
        if !budget.try_consume(Instant::now()) {
            tracing::error!(
                code,
                restarts = budget.used(),
                "restart budget exhausted, giving up"
            );
            return code;
        }

        let delay = backoff_delay(attempt);
        attempt += 1;
        tracing::warn!(code, attempt, delay_s = delay.as_secs(), "core crashed, restarting");
        tokio::time::sleep(delay).await;
    }
}

/// Forward termination: SIGTERM, grace window, then SIGKILL.
async fn shutdown_child(child: &mut tokio::process::Child, grace: Duration) -> i32 {
    if let Some(pid) = child.id() {
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
    }
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => status.code().unwrap_or(0),
        Ok(Err(_)) => 1,
        Err(_) => {
            tracing::warn!("core ignored SIGTERM, killing");
            let _ = child.start_kill();
            let _ = child.wait().await;
            1
        }
    }
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
