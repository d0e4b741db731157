// SPDX-License-Identifier: MIT

use super::*;

#[test]
fn subtask_addressing() {
    let parent = TaskId::new("3");
    let sub = parent.subtask("2");
    assert_eq!(sub.as_str(), "3.2");
    assert_eq!(sub.split_subtask(), Some(("3", "2")));
    assert_eq!(parent.split_subtask(), None);
}

#[test]
fn status_serde_names() {
    assert_eq!(
        serde_json::to_string(&TaskStatus::InProgress).unwrap(),
        "\"in-progress\""
    );
    assert_eq!(
        serde_json::to_string(&TaskStatus::NeedsInput).unwrap(),
        "\"needs-input\""
    );
}

#[test]
fn terminal_statuses() {
    assert!(TaskStatus::Done.is_terminal());
    assert!(TaskStatus::Failed.is_terminal());
    assert!(!TaskStatus::Ready.is_terminal());
}

#[test]
fn priority_orders_high_first() {
    assert!(TaskPriority::High < TaskPriority::Medium);
    assert!(TaskPriority::Medium < TaskPriority::Low);
}

#[test]
fn task_file_shape_is_camel_case() {
    let mut t = Task::new("1", "Set up repo");
    t.test_strategy = "unit".into();
    let json = serde_json::to_value(&t).unwrap();
    assert!(json.get("testStrategy").is_some());
    assert!(json.get("test_strategy").is_none());
    // Runtime bindings are omitted until set.
    assert!(json.get("sessionId").is_none());
}

#[test]
fn task_parses_minimal_plan_entry() {
    let json = r#"{
        "id": "1",
        "title": "Bootstrap",
        "status": "pending"
    }"#;
    let t: Task = serde_json::from_str(json).unwrap();
    assert_eq!(t.priority, TaskPriority::Medium);
    assert!(t.dependencies.is_empty());
    assert!(t.subtasks.is_empty());
}
