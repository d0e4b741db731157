// SPDX-License-Identifier: MIT

//! Timeout-wrapped subprocess execution.

use std::process::Output;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;

/// Default deadline for host git invocations (patch validate/apply).
pub const GIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default deadline for one container runtime CLI call.
pub const RUNTIME_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum SubprocessError {
    #[error("failed to spawn {what}: {source}")]
    Spawn {
        what: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{what} timed out after {after:?}")]
    TimedOut { what: String, after: Duration },
}

/// Run a command to completion, killing it if the deadline passes.
pub async fn run_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    what: &str,
) -> Result<Output, SubprocessError> {
    cmd.kill_on_drop(true);
    let fut = cmd.output();
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(|source| SubprocessError::Spawn {
            what: what.to_string(),
            source,
        }),
        Err(_) => Err(SubprocessError::TimedOut { what: what.to_string(), after: timeout }),
    }
}

#[cfg(test)]
#[path = "subprocess_tests.rs"]
mod tests;
