// SPDX-License-Identifier: MIT

//! Warm container pool, keyed by (image, resource profile).
//!
//! Bounded per key with FIFO waiters. Health is checked lazily at acquire
//! time. A container released for reuse stays bound to its workspace —
//! bind mounts are fixed at create — so acquire only matches an idle
//! container carrying the requested workspace; mismatched idles are
//! destroyed to make room. The pool also enforces mount-path uniqueness
//! across assigned containers.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use fm_adapters::{CallOpts, ContainerRuntime, CreateSpec, RuntimeError};
use fm_core::{
    Clock, ContainerId, ContainerRecord, ContainerState, CoreError, Mount, ResourceProfile,
};
use fm_journal::{Durability, Journal, RecordKind};

use crate::config::PoolConfig;

/// Pool key: containers are interchangeable within one key, except for
/// their workspace binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub image: String,
    pub profile: ResourceProfile,
}

/// A checked-out container.
#[derive(Debug, Clone)]
pub struct ContainerHandle {
    pub id: ContainerId,
    pub key: PoolKey,
    pub workspace: PathBuf,
}

/// What to do with a released container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Keep it warm, still bound to its workspace (revision flow).
    Reuse,
    Destroy,
}

struct IdleEntry {
    id: ContainerId,
    workspace: PathBuf,
    idle_since: Instant,
}

struct PoolInner {
    idle: HashMap<PoolKey, VecDeque<IdleEntry>>,
    /// container id → workspace, for mount-uniqueness checks.
    assigned: HashMap<String, PathBuf>,
    /// FIFO wakeups per key.
    waiters: HashMap<PoolKey, VecDeque<oneshot::Sender<()>>>,
    /// Live containers per key (idle + assigned + being created).
    counts: HashMap<PoolKey, usize>,
    shutting_down: bool,
}

/// The pool. Shared by value via `Arc`.
pub struct ContainerPool<R: ContainerRuntime, C: Clock> {
    runtime: Arc<R>,
    journal: Arc<Journal>,
    clock: C,
    cfg: PoolConfig,
    inner: Mutex<PoolInner>,
}

impl<R: ContainerRuntime, C: Clock> ContainerPool<R, C> {
    pub fn new(runtime: Arc<R>, journal: Arc<Journal>, clock: C, cfg: PoolConfig) -> Self {
        Self {
            runtime,
            journal,
            clock,
            cfg,
            inner: Mutex::new(PoolInner {
                idle: HashMap::new(),
                assigned: HashMap::new(),
                waiters: HashMap::new(),
                counts: HashMap::new(),
                shutting_down: false,
            }),
        }
    }

    /// Check out a container for `workspace`. Blocks up to `deadline` when
    /// the key is at capacity; a zero deadline fails fast with
    /// `resource-exhausted`.
    pub async fn acquire(
        &self,
        key: PoolKey,
        workspace: PathBuf,
        deadline: Duration,
    ) -> Result<ContainerHandle, CoreError> {
        let start = Instant::now();
        loop {
            let decision = self.try_acquire(&key, &workspace)?;
            match decision {
                Attempt::Ready(id) => {
                    // Lazy health check: one ping; unhealthy is destroyed
                    // and the loop creates a replacement.
                    if self.ping(&id).await {
                        self.journal_record(&id, &key, &workspace, ContainerState::Assigned);
                        return Ok(ContainerHandle { id, key, workspace });
                    }
                    tracing::warn!(container = %id, "idle container unhealthy, destroying");
                    self.destroy(&id, &key).await;
                    continue;
                }
                Attempt::Create => {
                    let id = self.create_assigned(&key, &workspace).await?;
                    return Ok(ContainerHandle { id, key, workspace });
                }
                Attempt::Evict(id) => {
                    self.destroy(&id, &key).await;
                    continue;
                }
                Attempt::Wait(rx) => {
                    let elapsed = start.elapsed();
                    if elapsed >= deadline {
                        return Err(CoreError::resource_exhausted(format!(
                            "pool at capacity for image {}",
                            key.image
                        )));
                    }
                    let remaining = deadline - elapsed;
                    if tokio::time::timeout(remaining, rx).await.is_err() {
                        return Err(CoreError::resource_exhausted(format!(
                            "pool at capacity for image {} after {:?}",
                            key.image, deadline
                        )));
                    }
                    // Woken: retry the fast path.
                }
            }
        }
    }

    /// Return a container. `Reuse` keeps it warm bound to its workspace;
    /// `Destroy` stops and reaps it (unless cleanup is disabled for
    /// forensics).
    pub async fn release(&self, handle: ContainerHandle, disposition: Disposition) {
        {
            let mut inner = self.inner.lock();
            inner.assigned.remove(handle.id.as_str());
        }
        match disposition {
            Disposition::Reuse => {
                {
                    let mut inner = self.inner.lock();
                    inner.idle.entry(handle.key.clone()).or_default().push_back(IdleEntry {
                        id: handle.id.clone(),
                        workspace: handle.workspace.clone(),
                        idle_since: self.clock.now(),
                    });
                }
                self.journal_record(
                    &handle.id,
                    &handle.key,
                    &handle.workspace,
                    ContainerState::Idle,
                );
            }
            Disposition::Destroy => {
                self.destroy(&handle.id, &handle.key).await;
            }
        }
        self.wake_one(&handle.key);
    }

    /// Destroy the idle container bound to `workspace`, if any. Returns
    /// whether one was found (diff reject releases the warm container).
    pub async fn drop_idle_for_workspace(&self, workspace: &PathBuf) -> bool {
        let found: Option<(PoolKey, ContainerId)> = {
            let mut inner = self.inner.lock();
            let mut found = None;
            for (key, entries) in inner.idle.iter_mut() {
                if let Some(pos) = entries.iter().position(|e| &e.workspace == workspace) {
                    if let Some(entry) = entries.remove(pos) {
                        found = Some((key.clone(), entry.id));
                    }
                    break;
                }
            }
            found
        };
        match found {
            Some((key, id)) => {
                self.destroy(&id, &key).await;
                self.wake_one(&key);
                true
            }
            None => false,
        }
    }

    /// Destroy idle containers past the configured TTL. Called on a timer
    /// by the daemon.
    pub async fn reap_idle(&self) {
        let now = self.clock.now();
        let expired: Vec<(PoolKey, ContainerId)> = {
            let mut inner = self.inner.lock();
            let mut expired = Vec::new();
            for (key, entries) in inner.idle.iter_mut() {
                while let Some(front) = entries.front() {
                    if now.duration_since(front.idle_since) >= self.cfg.idle_ttl {
                        let entry = entries.pop_front();
                        if let Some(entry) = entry {
                            expired.push((key.clone(), entry.id));
                        }
                    } else {
                        break;
                    }
                }
            }
            expired
        };
        for (key, id) in expired {
            tracing::debug!(container = %id, "idle TTL expired");
            self.destroy(&id, &key).await;
            self.wake_one(&key);
        }
    }

    /// Drain everything idle and refuse further acquires.
    pub async fn shutdown(&self) {
        let drained: Vec<(PoolKey, ContainerId)> = {
            let mut inner = self.inner.lock();
            inner.shutting_down = true;
            let mut drained = Vec::new();
            for (key, entries) in inner.idle.drain() {
                for entry in entries {
                    drained.push((key.clone(), entry.id));
                }
            }
            drained
        };
        for (key, id) in drained {
            self.destroy(&id, &key).await;
        }
    }

    /// Live container count for one key (tests, status surface).
    pub fn count(&self, key: &PoolKey) -> usize {
        *self.inner.lock().counts.get(key).unwrap_or(&0)
    }

    /// One pass of the fast path under the pool lock.
    fn try_acquire(&self, key: &PoolKey, workspace: &PathBuf) -> Result<Attempt, CoreError> {
        let mut inner = self.inner.lock();
        if inner.shutting_down {
            return Err(CoreError::resource_exhausted("pool is shutting down"));
        }

        // No two sessions may mount the same workspace writable.
        if inner.assigned.values().any(|w| w == workspace) {
            return Err(CoreError::invalid_input(format!(
                "workspace already mounted by a live session: {}",
                workspace.display()
            )));
        }

        // Prefer an idle container already bound to this workspace.
        if let Some(entries) = inner.idle.get_mut(key) {
            if let Some(pos) = entries.iter().position(|e| &e.workspace == workspace) {
                let entry = entries.remove(pos);
                if let Some(entry) = entry {
                    inner.assigned.insert(entry.id.to_string(), workspace.clone());
                    return Ok(Attempt::Ready(entry.id));
                }
            }
        }

        let count = *inner.counts.get(key).unwrap_or(&0);
        if count < self.cfg.max_per_key {
            // Reserve capacity; creation happens outside the lock.
            *inner.counts.entry(key.clone()).or_insert(0) += 1;
            return Ok(Attempt::Create);
        }

        // At capacity. A mismatched idle container can be evicted to make
        // room — that is the destroy arm of the reuse policy.
        if let Some(entries) = inner.idle.get_mut(key) {
            if let Some(entry) = entries.pop_front() {
                return Ok(Attempt::Evict(entry.id));
            }
        }

        // Genuinely full: join the FIFO wait queue.
        let (tx, rx) = oneshot::channel();
        inner.waiters.entry(key.clone()).or_default().push_back(tx);
        Ok(Attempt::Wait(rx))
    }

    /// Create and start a container against a reservation made under the
    /// pool lock. The guard returns the reserved capacity if this future
    /// errors or is dropped mid-flight; a created-but-unregistered
    /// container is later swept as an orphan by the reconciler.
    async fn create_assigned(
        &self,
        key: &PoolKey,
        workspace: &PathBuf,
    ) -> Result<ContainerId, CoreError> {
        let mut reservation = ReservationGuard { pool: self, key, armed: true };

        let mut spec = CreateSpec::new(key.image.clone());
        spec.profile = key.profile.clone();
        spec.mounts.push(Mount::workspace(workspace.clone()));
        spec.labels.push(("orchestrator".to_string(), "true".to_string()));
        spec.workdir = Some(fm_core::container::WORKSPACE_MOUNT.to_string());

        let opts = CallOpts::default();
        self.runtime
            .ensure_image(&key.image, opts.clone())
            .await
            .map_err(map_runtime)?;
        let id = self.runtime.create(spec, opts.clone()).await.map_err(map_runtime)?;
        self.runtime.start(&id, opts).await.map_err(map_runtime)?;

        {
            let mut inner = self.inner.lock();
            inner.assigned.insert(id.to_string(), workspace.clone());
        }
        reservation.armed = false;
        self.journal_record(&id, key, workspace, ContainerState::Assigned);
        tracing::info!(container = %id, image = %key.image, "container created");
        Ok(id)
    }

    async fn ping(&self, id: &ContainerId) -> bool {
        self.runtime
            .exec_capture(
                id,
                &["true".to_string()],
                &[],
                None,
                CallOpts::deadline(Duration::from_secs(5)),
            )
            .await
            .map(|out| out.success())
            .unwrap_or(false)
    }

    async fn destroy(&self, id: &ContainerId, key: &PoolKey) {
        {
            let mut inner = self.inner.lock();
            if let Some(count) = inner.counts.get_mut(key) {
                *count = count.saturating_sub(1);
            }
            inner.assigned.remove(id.as_str());
        }
        if self.cfg.debug_no_cleanup {
            tracing::info!(container = %id, "cleanup disabled, retaining container");
            return;
        }
        self.mark_state(id, ContainerState::Stopping);
        if let Err(e) = self
            .runtime
            .stop(id, self.cfg.stop_grace, CallOpts::default())
            .await
        {
            tracing::warn!(container = %id, error = %e, "container stop failed");
        }
        self.mark_state(id, ContainerState::Gone);
    }

    /// Wake the first still-listening waiter. Timed-out waiters leave dead
    /// senders behind; skipping them keeps the wakeup from being lost.
    fn wake_one(&self, key: &PoolKey) {
        loop {
            let waiter = {
                let mut inner = self.inner.lock();
                inner.waiters.get_mut(key).and_then(|q| q.pop_front())
            };
            match waiter {
                Some(tx) => {
                    if tx.send(()).is_ok() {
                        return;
                    }
                }
                None => return,
            }
        }
    }

    fn journal_record(
        &self,
        id: &ContainerId,
        key: &PoolKey,
        workspace: &PathBuf,
        state: ContainerState,
    ) {
        let record = ContainerRecord {
            id: id.clone(),
            image: key.image.clone(),
            profile: key.profile.clone(),
            mounts: vec![Mount::workspace(workspace.clone())],
            state,
            created_at_ms: self.clock.epoch_ms(),
        };
        if let Err(e) = self.journal.upsert(
            RecordKind::Container,
            id.as_str(),
            &record,
            Durability::BestEffort,
            self.clock.epoch_ms(),
        ) {
            tracing::warn!(container = %id, error = %e, "container record write failed");
        }
    }

    fn mark_state(&self, id: &ContainerId, state: ContainerState) {
        let record: Option<ContainerRecord> = self
            .journal
            .get(RecordKind::Container, id.as_str())
            .ok()
            .flatten();
        if let Some(mut record) = record {
            record.state = state;
            let _ = self.journal.upsert(
                RecordKind::Container,
                id.as_str(),
                &record,
                Durability::BestEffort,
                self.clock.epoch_ms(),
            );
        }
    }
}

/// Returns reserved pool capacity unless defused, including when the
/// owning future is dropped mid-create.
struct ReservationGuard<'a, R: ContainerRuntime, C: Clock> {
    pool: &'a ContainerPool<R, C>,
    key: &'a PoolKey,
    armed: bool,
}

impl<R: ContainerRuntime, C: Clock> Drop for ReservationGuard<'_, R, C> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        {
            let mut inner = self.pool.inner.lock();
            if let Some(count) = inner.counts.get_mut(self.key) {
                *count = count.saturating_sub(1);
            }
        }
        self.pool.wake_one(self.key);
    }
}

enum Attempt {
    /// An idle container bound to the requested workspace.
    Ready(ContainerId),
    /// Capacity reserved; create a fresh container.
    Create,
    /// Evict this mismatched idle container, then retry.
    Evict(ContainerId),
    /// At capacity; wait for a wakeup.
    Wait(oneshot::Receiver<()>),
}

fn map_runtime(e: RuntimeError) -> CoreError {
    e.to_core()
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
