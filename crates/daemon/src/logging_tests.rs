// SPDX-License-Identifier: MIT

use super::*;
use tempfile::tempdir;

#[test]
fn writes_append_and_persist() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("server-combined.log");
    let mut w = RotatingWriter::with_max_bytes(&path, 1024).unwrap();

    w.write_all(b"hello\n").unwrap();
    w.flush().unwrap();

    assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello\n");
}

#[test]
fn rotation_shifts_generations() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("x.log");
    let mut w = RotatingWriter::with_max_bytes(&path, 10).unwrap();

    w.write_all(b"aaaaaaaa\n").unwrap(); // 9 bytes
    w.write_all(b"bbbbbbbb\n").unwrap(); // would overflow: rotates first
    w.flush().unwrap();

    assert_eq!(std::fs::read_to_string(&path).unwrap(), "bbbbbbbb\n");
    assert_eq!(
        std::fs::read_to_string(format!("{}.1", path.display())).unwrap(),
        "aaaaaaaa\n"
    );
}

#[test]
fn generation_count_is_bounded() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("x.log");
    let mut w = RotatingWriter::with_max_bytes(&path, 4).unwrap();

    // Force many rotations.
    for i in 0..20 {
        w.write_all(format!("{i:04}\n").as_bytes()).unwrap();
    }
    w.flush().unwrap();

    let generations = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("x.log"))
        .count();
    assert!(generations <= 5, "found {generations} files");
}

#[test]
fn reopen_continues_counting_existing_bytes() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("x.log");
    std::fs::write(&path, "preexisting\n").unwrap();

    let mut w = RotatingWriter::with_max_bytes(&path, 16).unwrap();
    // 12 existing + 6 = 18 > 16: rotates before writing.
    w.write_all(b"fresh\n").unwrap();
    w.flush().unwrap();

    assert_eq!(std::fs::read_to_string(&path).unwrap(), "fresh\n");
    assert_eq!(
        std::fs::read_to_string(format!("{}.1", path.display())).unwrap(),
        "preexisting\n"
    );
}
