// SPDX-License-Identifier: MIT

//! Centralized environment variable access for the daemon crate.

use std::path::PathBuf;
use std::time::Duration;

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

fn flag(name: &str) -> bool {
    matches!(
        std::env::var(name).unwrap_or_default().to_ascii_lowercase().as_str(),
        "1" | "on" | "true" | "yes"
    )
}

/// Streaming listener port. Reserved for the dashboard's live-update
/// transport, which consumes the core's read API.
pub fn stream_port() -> u16 {
    parse_var("STREAM_PORT").unwrap_or(47_821)
}

/// Dashboard port, same consumer.
pub fn dashboard_port() -> u16 {
    parse_var("DASHBOARD_PORT").unwrap_or(5_173)
}

/// Whether the process should run the supervisor parent loop.
pub fn supervisor_mode() -> bool {
    flag("SUPERVISOR_MODE")
}

/// Restart budget: restarts allowed per window.
pub fn supervisor_max_restarts() -> u32 {
    parse_var("SUPERVISOR_MAX_RESTARTS").unwrap_or(10)
}

/// Restart budget window.
pub fn supervisor_restart_window() -> Duration {
    Duration::from_millis(parse_var("SUPERVISOR_RESTART_WINDOW_MS").unwrap_or(60_000))
}

/// Graceful shutdown window before the child is SIGKILLed.
pub fn supervisor_shutdown_timeout() -> Duration {
    Duration::from_millis(parse_var("SUPERVISOR_SHUTDOWN_TIMEOUT_MS").unwrap_or(30_000))
}

/// Log filter, `tracing` EnvFilter syntax.
pub fn log_level() -> String {
    std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string())
}

/// Journal location override.
pub fn db_path() -> PathBuf {
    std::env::var("DB_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./data/orchestrator.db"))
}

/// Retain containers after completion for forensic access.
pub fn debug_no_cleanup() -> bool {
    flag("DEBUG_NO_CLEANUP")
}

/// Marker the supervisor sets on its child so the child skips supervision.
pub const SUPERVISED_MARKER: &str = "FM_SUPERVISED";

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
