// SPDX-License-Identifier: MIT

//! Plan validation: id uniqueness, dangling dependencies, cycles.

use std::collections::{HashMap, HashSet};

use fm_core::Task;

use crate::store::index_tasks;

/// Validate a task tree. Returns human-readable issues; empty means valid.
pub fn validate_plan(tasks: &[Task]) -> Vec<String> {
    let mut issues = Vec::new();

    // Id uniqueness across tasks and subtasks.
    let mut seen = HashSet::new();
    collect_ids(tasks, &mut |id| {
        if !seen.insert(id.to_string()) {
            issues.push(format!("duplicate task id: {id}"));
        }
    });

    // Subtask addressing: a subtask id must be "<parent>.<sub>".
    for task in tasks {
        for sub in &task.subtasks {
            match sub.id.split_subtask() {
                Some((parent, _)) if parent == task.id.as_str() => {}
                _ => issues.push(format!(
                    "subtask {} is not addressed under parent {}",
                    sub.id, task.id
                )),
            }
            if !sub.subtasks.is_empty() {
                issues.push(format!("subtask {} nests further subtasks", sub.id));
            }
        }
    }

    let index = index_tasks(tasks);

    // Dangling dependencies.
    for task in index.values() {
        for dep in &task.dependencies {
            if !index.contains_key(dep.as_str()) {
                issues.push(format!("task {} depends on unknown task {}", task.id, dep));
            }
        }
    }

    // Dependency cycles, reported once per cycle entry point.
    let mut visited: HashMap<&str, VisitState> = HashMap::new();
    let mut ids: Vec<&str> = index.keys().map(String::as_str).collect();
    ids.sort_unstable();
    for id in ids {
        if walk(id, &index, &mut visited) {
            issues.push(format!("dependency cycle through task {id}"));
        }
    }

    issues
}

#[derive(Clone, Copy, PartialEq)]
enum VisitState {
    InProgress,
    Done,
}

/// DFS cycle check. Returns true if a cycle is reachable from `id`.
fn walk<'a>(
    id: &'a str,
    index: &HashMap<String, &'a Task>,
    visited: &mut HashMap<&'a str, VisitState>,
) -> bool {
    match visited.get(id) {
        Some(VisitState::Done) => return false,
        Some(VisitState::InProgress) => return true,
        None => {}
    }
    visited.insert(id, VisitState::InProgress);
    let mut cyclic = false;
    if let Some(task) = index.get(id) {
        for dep in &task.dependencies {
            if index.contains_key(dep.as_str()) && walk(dep.as_str(), index, visited) {
                cyclic = true;
            }
        }
    }
    visited.insert(id, VisitState::Done);
    cyclic
}

fn collect_ids(tasks: &[Task], visit: &mut dyn FnMut(&fm_core::TaskId)) {
    for task in tasks {
        visit(&task.id);
        collect_ids(&task.subtasks, visit);
    }
}

#[cfg(test)]
#[path = "validate_tests.rs"]
mod tests;
