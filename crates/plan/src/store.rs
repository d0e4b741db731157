// SPDX-License-Identifier: MIT

//! The plan store proper: load, query, mutate, persist.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use fm_core::{CoreError, DiffId, SessionId, Task, TaskId, TaskStatus};

use crate::validate::validate_plan;

/// Plan file metadata block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanMeta {
    pub project_name: String,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

/// The whole plan file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanFile {
    pub meta: PlanMeta,
    pub tasks: Vec<Task>,
}

/// Metadata attached to a status change.
#[derive(Debug, Clone, Default)]
pub struct StatusMeta {
    pub session_id: Option<SessionId>,
    pub diff_id: Option<DiffId>,
    pub last_error: Option<String>,
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("plan file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed plan file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("plan validation failed: {}", issues.join("; "))]
    Invalid { issues: Vec<String> },

    #[error("unknown task id: {0}")]
    NotFound(String),
}

impl PlanError {
    pub fn to_core(&self) -> CoreError {
        CoreError::invalid_input(self.to_string())
    }
}

/// Reads and writes the canonical task list.
pub struct PlanStore {
    path: PathBuf,
    file: Mutex<PlanFile>,
}

impl PlanStore {
    /// Load and validate the plan at `path`.
    pub fn open(path: &Path) -> Result<Self, PlanError> {
        let text = std::fs::read_to_string(path)?;
        let file: PlanFile = serde_json::from_str(&text)?;
        let issues = validate_plan(&file.tasks);
        if !issues.is_empty() {
            return Err(PlanError::Invalid { issues });
        }
        Ok(Self { path: path.to_path_buf(), file: Mutex::new(file) })
    }

    /// Create an empty plan on disk and open it.
    pub fn create(path: &Path, project_name: &str) -> Result<Self, PlanError> {
        let now = Utc::now();
        let file = PlanFile {
            meta: PlanMeta {
                project_name: project_name.to_string(),
                created_at: now,
                last_modified: now,
            },
            tasks: Vec::new(),
        };
        let store = Self { path: path.to_path_buf(), file: Mutex::new(file) };
        store.persist(&store.file.lock())?;
        Ok(store)
    }

    /// Re-run validation against the current in-memory plan.
    pub fn validate(&self) -> Vec<String> {
        validate_plan(&self.file.lock().tasks)
    }

    /// Every task with its effective status (pending → ready when all
    /// dependencies are done). Subtasks stay nested under their parent.
    pub fn list(&self) -> Vec<Task> {
        let file = self.file.lock();
        let done = done_ids(&file.tasks);
        file.tasks
            .iter()
            .map(|t| with_effective_status(t, &done))
            .collect()
    }

    /// Look up a task or subtask by id (`"3"` or `"3.2"`).
    pub fn get(&self, id: &TaskId) -> Option<Task> {
        let file = self.file.lock();
        let done = done_ids(&file.tasks);
        find_task(&file.tasks, id).map(|t| with_effective_status(t, &done))
    }

    /// Tasks ready to run: stored status pending, every dependency done.
    pub fn get_ready(&self) -> Vec<Task> {
        let file = self.file.lock();
        let done = done_ids(&file.tasks);
        let mut ready: Vec<Task> = Vec::new();
        for_each_task(&file.tasks, &mut |task| {
            if task.status == TaskStatus::Pending
                && task.dependencies.iter().all(|d| done.contains(d.as_str()))
            {
                let mut t = task.clone();
                t.status = TaskStatus::Ready;
                ready.push(t);
            }
        });
        ready
    }

    /// The single task to work on next: ready set, ordered by priority,
    /// then id.
    pub fn next_recommended(&self) -> Option<Task> {
        let mut ready = self.get_ready();
        ready.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.0.cmp(&b.id.0)));
        ready.into_iter().next()
    }

    /// Record a status change (plus bindings) and persist atomically.
    pub fn set_status(
        &self,
        id: &TaskId,
        status: TaskStatus,
        meta: StatusMeta,
    ) -> Result<(), PlanError> {
        let mut file = self.file.lock();
        let now = Utc::now();
        {
            let task = find_task_mut(&mut file.tasks, id)
                .ok_or_else(|| PlanError::NotFound(id.to_string()))?;
            task.status = status;
            task.last_status_change_ms = Some(now.timestamp_millis() as u64);
            if let Some(sid) = meta.session_id {
                task.session_id = Some(sid);
            }
            if let Some(did) = meta.diff_id {
                task.diff_id = Some(did);
            }
            if let Some(err) = meta.last_error {
                task.last_error = Some(err);
            }
        }
        file.meta.last_modified = now;
        self.persist(&file)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy-on-write persistence: temp sibling, fsync, atomic rename.
    fn persist(&self, file: &PlanFile) -> Result<(), PlanError> {
        let tmp = self.path.with_extension("json.tmp");
        {
            let f = std::fs::File::create(&tmp)?;
            serde_json::to_writer_pretty(&f, file)?;
            f.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Ids of every done task and subtask.
fn done_ids(tasks: &[Task]) -> std::collections::HashSet<String> {
    let mut done = std::collections::HashSet::new();
    for_each_task(tasks, &mut |task| {
        if task.status == TaskStatus::Done {
            done.insert(task.id.to_string());
        }
    });
    done
}

/// Visit every task and subtask, depth-first.
fn for_each_task<'a>(tasks: &'a [Task], visit: &mut dyn FnMut(&'a Task)) {
    for task in tasks {
        visit(task);
        for_each_task(&task.subtasks, visit);
    }
}

fn with_effective_status(
    task: &Task,
    done: &std::collections::HashSet<String>,
) -> Task {
    let mut t = task.clone();
    if t.status == TaskStatus::Pending
        && t.dependencies.iter().all(|d| done.contains(d.as_str()))
    {
        t.status = TaskStatus::Ready;
    }
    t.subtasks = t.subtasks.iter().map(|s| with_effective_status(s, done)).collect();
    t
}

fn find_task<'a>(tasks: &'a [Task], id: &TaskId) -> Option<&'a Task> {
    match id.split_subtask() {
        None => tasks.iter().find(|t| t.id == *id),
        Some((parent, _)) => {
            let parent_task = tasks.iter().find(|t| t.id.as_str() == parent)?;
            parent_task.subtasks.iter().find(|s| s.id == *id)
        }
    }
}

fn find_task_mut<'a>(tasks: &'a mut [Task], id: &TaskId) -> Option<&'a mut Task> {
    match id.split_subtask() {
        None => tasks.iter_mut().find(|t| t.id == *id),
        Some((parent, _)) => {
            let parent_task = tasks.iter_mut().find(|t| t.id.as_str() == parent)?;
            parent_task.subtasks.iter_mut().find(|s| s.id == *id)
        }
    }
}

/// Build an id → task index across nesting (used by validation).
pub(crate) fn index_tasks(tasks: &[Task]) -> HashMap<String, &Task> {
    let mut index = HashMap::new();
    for_each_task(tasks, &mut |task| {
        index.insert(task.id.to_string(), task);
    });
    index
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
