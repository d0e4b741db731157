// SPDX-License-Identifier: MIT

//! Interactive-input heuristic.
//!
//! A quiescent worker is judged to be waiting on the human when its tail
//! output satisfies all of: contains a question mark, carries no fenced
//! code block, is under 500 characters, and shows no tool or
//! file-operation side effects. A misfire is harmless — a later answer is
//! simply absorbed by the worker.

/// Character budget above which tail text is narration, not a question.
pub const MAX_QUESTION_LEN: usize = 500;

/// Markers a worker emits while acting on the workspace. Any of these in
/// the tail means it is working, not asking.
const SIDE_EFFECT_MARKERS: &[&str] = &[
    "Wrote ",
    "Created ",
    "Modified ",
    "Deleted ",
    "Editing ",
    "Applying ",
    "Running ",
    "tool_use",
    "$ ",
];

/// Decide whether the tail of a quiescent output stream is a question.
pub fn is_awaiting_input(tail: &str) -> bool {
    let trimmed = tail.trim();
    if trimmed.is_empty() || trimmed.len() >= MAX_QUESTION_LEN {
        return false;
    }
    if !trimmed.contains('?') {
        return false;
    }
    if trimmed.contains("```") {
        return false;
    }
    !SIDE_EFFECT_MARKERS.iter().any(|m| trimmed.contains(m))
}

/// The question to surface when the heuristic matches: the trimmed tail.
pub fn pending_question(tail: &str) -> String {
    tail.trim().to_string()
}

#[cfg(test)]
#[path = "heuristic_tests.rs"]
mod tests;
