// SPDX-License-Identifier: MIT

use super::*;
use tempfile::tempdir;

#[test]
fn missing_snapshot_loads_empty() {
    let dir = tempdir().unwrap();
    let snap = Snapshot::load(&dir.path().join("orchestrator.db")).unwrap();
    assert_eq!(snap.seq, 0);
    assert!(snap.tables.sessions.is_empty());
}

#[test]
fn store_and_load_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("orchestrator.db");

    let mut snap = Snapshot { seq: 42, ..Snapshot::default() };
    snap.tables.sessions.insert(
        "ses-1".into(),
        Stored { blob: serde_json::json!({"state": "running"}), updated_at_ms: 9 },
    );
    snap.store(&path).unwrap();

    let back = Snapshot::load(&path).unwrap();
    assert_eq!(back.seq, 42);
    assert_eq!(back.tables.sessions.len(), 1);
    assert_eq!(back.tables.sessions["ses-1"].updated_at_ms, 9);
}

#[test]
fn store_replaces_atomically() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("orchestrator.db");

    Snapshot { seq: 1, ..Snapshot::default() }.store(&path).unwrap();
    Snapshot { seq: 2, ..Snapshot::default() }.store(&path).unwrap();

    assert_eq!(Snapshot::load(&path).unwrap().seq, 2);
    // No temp file left behind.
    assert!(!path.with_extension("db.tmp").exists());
}

#[test]
fn tables_dispatch_by_kind() {
    let mut tables = Tables::default();
    tables.table_mut(RecordKind::Diff).insert(
        "dif-1".into(),
        Stored { blob: serde_json::Value::Null, updated_at_ms: 0 },
    );
    assert_eq!(tables.table(RecordKind::Diff).len(), 1);
    assert!(tables.table(RecordKind::Task).is_empty());
}
