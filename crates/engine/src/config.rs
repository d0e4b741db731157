// SPDX-License-Identifier: MIT

//! Engine configuration with the documented defaults.

use std::path::PathBuf;
use std::time::Duration;

use fm_core::ResourceProfile;

/// Container pool knobs.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Live containers allowed per (image, profile) key.
    pub max_per_key: usize,
    /// Idle containers past this age are destroyed by the reaper.
    pub idle_ttl: Duration,
    /// Grace window given to a container on destroy.
    pub stop_grace: Duration,
    /// Retain containers instead of destroying them (forensics).
    pub debug_no_cleanup: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_per_key: 4,
            idle_ttl: Duration::from_secs(300),
            stop_grace: Duration::from_secs(10),
            debug_no_cleanup: false,
        }
    }
}

/// Session manager knobs. Deadlines are per-dispatch overridable.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Default worker image.
    pub image: String,
    /// Worker entrypoint argv; the prompt is appended as the final argument.
    pub worker_argv: Vec<String>,
    pub profile: ResourceProfile,
    /// Soft inactivity deadline while awaiting input.
    pub soft_deadline: Duration,
    /// Hard wall deadline while running.
    pub hard_deadline: Duration,
    /// Heartbeat line cadence.
    pub heartbeat_interval: Duration,
    /// Output quiescence before the interactive heuristic runs.
    pub quiet_window: Duration,
    /// Actor tick granularity; deadlines are checked on this cadence.
    pub tick: Duration,
    /// Lines retained in the in-memory log tail.
    pub tail_capacity: usize,
    /// Revision chain bound per diff.
    pub max_revisions: u32,
    /// How long dispatch may wait on container acquisition.
    pub acquire_deadline: Duration,
    /// Where per-session log files land.
    pub logs_dir: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            image: "foreman-worker:latest".to_string(),
            worker_argv: vec!["agent".to_string(), "run".to_string()],
            profile: ResourceProfile::default(),
            soft_deadline: Duration::from_secs(600),
            hard_deadline: Duration::from_secs(1800),
            heartbeat_interval: Duration::from_secs(30),
            quiet_window: Duration::from_secs(2),
            tick: Duration::from_secs(1),
            tail_capacity: 500,
            max_revisions: 3,
            acquire_deadline: Duration::from_secs(60),
            logs_dir: PathBuf::from("./logs"),
        }
    }
}
