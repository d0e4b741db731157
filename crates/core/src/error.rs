// SPDX-License-Identifier: MIT

//! Error taxonomy shared across the orchestrator.
//!
//! Every error that crosses a public API boundary maps onto one of these
//! kinds; the wire layer serializes the kind name and the retriable bit.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of an orchestrator failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Container runtime hiccup; retried a bounded number of times locally.
    TransientInfra,
    /// Worker exited non-zero or produced no diff.
    WorkerFailed,
    /// Soft or hard deadline fired.
    Timeout,
    /// Patch could not apply cleanly; the diff stays pending.
    Conflict,
    /// Bad task id, bad diff id, malformed plan file. No state change.
    InvalidInput,
    /// Pool at capacity with no room to wait.
    ResourceExhausted,
    /// Journal unwritable, runtime unreachable at boot. Propagates to the
    /// supervisor.
    Fatal,
}

impl ErrorKind {
    /// Whether a caller may reasonably retry the same call.
    pub fn retriable(&self) -> bool {
        matches!(self, ErrorKind::TransientInfra | ErrorKind::ResourceExhausted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::TransientInfra => "transient-infra",
            ErrorKind::WorkerFailed => "worker-failed",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Conflict => "conflict",
            ErrorKind::InvalidInput => "invalid-input",
            ErrorKind::ResourceExhausted => "resource-exhausted",
            ErrorKind::Fatal => "fatal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured orchestrator error: a kind plus a human-readable message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct CoreError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CoreError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransientInfra, message)
    }

    pub fn worker_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::WorkerFailed, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceExhausted, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }

    pub fn retriable(&self) -> bool {
        self.kind.retriable()
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
