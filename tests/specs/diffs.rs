// SPDX-License-Identifier: MIT

//! Diff apply scenarios against real workspaces on disk.

use std::path::{Path, PathBuf};
use std::process::Command;

use super::support::*;
use fm_core::{DiffStats, DiffStatus, SessionId};

const BASE: &str = "alpha\nbeta\ngamma\ndelta\nepsilon\n";
const CHANGED: &str = "alpha\nbeta\nGAMMA\ndelta\nepsilon\n";

fn git(dir: &Path, args: &[&str]) {
    let out = Command::new("git")
        .args(args)
        .env("GIT_AUTHOR_NAME", "t")
        .env("GIT_AUTHOR_EMAIL", "t@t")
        .env("GIT_COMMITTER_NAME", "t")
        .env("GIT_COMMITTER_EMAIL", "t@t")
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        out.status.success(),
        "git {args:?}: {}",
        String::from_utf8_lossy(&out.stderr)
    );
}

/// Capture the canonical patch for "rewrite the middle line".
fn captured_patch(root: &Path) -> String {
    let ws = root.join("capture");
    std::fs::create_dir_all(&ws).unwrap();
    std::fs::write(ws.join("notes.txt"), BASE).unwrap();
    git(&ws, &["init", "-q"]);
    git(&ws, &["add", "-A"]);
    git(&ws, &["commit", "-q", "-m", "snapshot"]);
    std::fs::write(ws.join("notes.txt"), CHANGED).unwrap();
    git(&ws, &["add", "-A"]);
    let out = Command::new("git")
        .args(["diff", "--cached", "--no-color", "--no-ext-diff", "--full-index"])
        .current_dir(&ws)
        .output()
        .unwrap();
    String::from_utf8(out.stdout).unwrap()
}

fn base_copy(root: &Path, name: &str) -> PathBuf {
    let target = root.join(name);
    std::fs::create_dir_all(&target).unwrap();
    std::fs::write(target.join("notes.txt"), BASE).unwrap();
    target
}

#[tokio::test]
async fn captured_patch_applies_to_fresh_base_byte_identically() {
    let w = world();
    let patch = captured_patch(w.dir.path());
    let target = base_copy(w.dir.path(), "target");

    let diff = w
        .diffs
        .create(
            SessionId::new(),
            &w.workspace,
            patch,
            DiffStats { files_changed: 1, additions: 1, deletions: 1 },
        )
        .unwrap();

    let receipt = w.diffs.apply(&diff.id, &target).await.unwrap();
    assert_eq!(receipt.stats.files_changed, 1);
    assert!(!receipt.used_fallback);
    assert_eq!(std::fs::read_to_string(target.join("notes.txt")).unwrap(), CHANGED);
    assert_eq!(w.diffs.get(&diff.id).unwrap().status, DiffStatus::ApprovedApplied);
}

#[tokio::test]
async fn drifted_base_conflicts_and_target_is_untouched() {
    let w = world();
    let patch = captured_patch(w.dir.path());
    let target = base_copy(w.dir.path(), "target");
    // Rewrite the very line the patch changes, which defeats both the
    // exact applier and the fuzz-tolerant fallback.
    let drifted = BASE.replace("gamma", "mutated");
    std::fs::write(target.join("notes.txt"), &drifted).unwrap();

    let diff = w
        .diffs
        .create(
            SessionId::new(),
            &w.workspace,
            patch,
            DiffStats { files_changed: 1, additions: 1, deletions: 1 },
        )
        .unwrap();

    let err = w.diffs.apply(&diff.id, &target).await.unwrap_err();
    assert_eq!(err.kind, fm_core::ErrorKind::Conflict);
    assert_eq!(std::fs::read_to_string(target.join("notes.txt")).unwrap(), drifted);
    // Still pending: the caller may reject or request a revision.
    assert_eq!(w.diffs.get(&diff.id).unwrap().status, DiffStatus::Pending);
}

#[tokio::test]
async fn applied_diff_is_applied_at_most_once() {
    let w = world();
    let patch = captured_patch(w.dir.path());
    let target = base_copy(w.dir.path(), "target");

    let diff = w
        .diffs
        .create(
            SessionId::new(),
            &w.workspace,
            patch,
            DiffStats { files_changed: 1, additions: 1, deletions: 1 },
        )
        .unwrap();

    w.diffs.apply(&diff.id, &target).await.unwrap();
    let err = w.diffs.apply(&diff.id, &target).await.unwrap_err();
    assert_eq!(err.kind, fm_core::ErrorKind::InvalidInput);
}
