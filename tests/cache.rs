mod common;

use common::{counter_value, run_ok, treeop_cmd};
use filetime::{FileTime, set_file_mtime};
use std::fs;
use tempfile::TempDir;

fn cache_digest(cache: &str, name: &str) -> String {
    cache
        .lines()
        .find(|l| l.ends_with(name))
        .and_then(|l| l.splitn(4, ' ').nth(2))
        .unwrap_or_else(|| panic!("no cache entry for {name}"))
        .to_string()
}

/// Unchanged (size, mtime) means the cached digest equals a fresh hash:
/// rescanning must not alter the cache file at all.
#[test]
fn rescan_of_unchanged_tree_leaves_cache_identical() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    fs::write(root.join("file.txt"), "content").unwrap();

    run_ok(treeop_cmd().arg(root));
    let before = fs::read_to_string(root.join(".dirdb")).unwrap();

    run_ok(treeop_cmd().arg(root));
    let after = fs::read_to_string(root.join(".dirdb")).unwrap();

    assert_eq!(before, after);
}

#[test]
fn content_change_updates_the_cached_digest() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    let file = root.join("file.txt");
    fs::write(&file, "original").unwrap();
    set_file_mtime(&file, FileTime::from_unix_time(1_600_000_000, 0)).unwrap();

    run_ok(treeop_cmd().arg(root));
    let before = cache_digest(
        &fs::read_to_string(root.join(".dirdb")).unwrap(),
        "file.txt",
    );

    // Same byte count, different content; pin a different mtime so the
    // change is visible at the cache's one-second granularity.
    fs::write(&file, "modified").unwrap();
    set_file_mtime(&file, FileTime::from_unix_time(1_600_000_001, 0)).unwrap();
    run_ok(treeop_cmd().arg(root));
    let after = cache_digest(
        &fs::read_to_string(root.join(".dirdb")).unwrap(),
        "file.txt",
    );

    assert_ne!(before, after);
}

/// An edit that preserves size and mtime is invisible to the cache by
/// design; --new-dirdb is the escape hatch that rehashes everything.
#[test]
fn new_dirdb_rehashes_despite_matching_metadata() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    let file = root.join("file.txt");
    fs::write(&file, "aaaaaaaa").unwrap();
    let mtime = FileTime::from_unix_time(1_600_000_000, 0);
    set_file_mtime(&file, mtime).unwrap();

    run_ok(treeop_cmd().arg(root));
    let stale = cache_digest(&fs::read_to_string(root.join(".dirdb")).unwrap(), "file.txt");

    // Same size, mtime pinned back: the default scan keeps the stale digest.
    fs::write(&file, "bbbbbbbb").unwrap();
    set_file_mtime(&file, mtime).unwrap();
    run_ok(treeop_cmd().arg(root));
    let still_stale =
        cache_digest(&fs::read_to_string(root.join(".dirdb")).unwrap(), "file.txt");
    assert_eq!(stale, still_stale);

    run_ok(treeop_cmd().arg("--new-dirdb").arg(root));
    let rebuilt = cache_digest(&fs::read_to_string(root.join(".dirdb")).unwrap(), "file.txt");
    assert_ne!(stale, rebuilt);
}

#[test]
fn update_dirdb_rewrites_even_without_changes() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    fs::write(root.join("file.txt"), "content").unwrap();

    run_ok(treeop_cmd().arg(root));
    let before = fs::metadata(root.join(".dirdb")).unwrap().modified().unwrap();

    std::thread::sleep(std::time::Duration::from_millis(10));
    run_ok(treeop_cmd().arg("--update-dirdb").arg(root));
    let after = fs::metadata(root.join(".dirdb")).unwrap().modified().unwrap();

    assert_ne!(before, after);
}

/// A corrupt cache never aborts a scan; damaged lines are simply ignored
/// and rebuilt.
#[test]
fn malformed_cache_lines_are_recovered() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    fs::write(root.join("file.txt"), "content").unwrap();

    run_ok(treeop_cmd().arg(root));
    fs::write(root.join(".dirdb"), "complete garbage\nnot a record\n").unwrap();

    let stdout = run_ok(treeop_cmd().arg(root));
    assert_eq!(counter_value(&stdout, "files"), 1);

    let cache = fs::read_to_string(root.join(".dirdb")).unwrap();
    assert!(cache.lines().any(|l| l.ends_with("file.txt")));
    assert!(!cache.contains("garbage"));
}

/// Cache records put the filename last, so names with spaces round-trip.
#[test]
fn filenames_with_spaces_survive_the_cache() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    fs::write(root.join("a file with spaces.txt"), "content").unwrap();

    run_ok(treeop_cmd().arg(root));
    let before = fs::read_to_string(root.join(".dirdb")).unwrap();

    run_ok(treeop_cmd().arg(root));
    let after = fs::read_to_string(root.join(".dirdb")).unwrap();

    assert!(before.contains("a file with spaces.txt"));
    assert_eq!(before, after);
}
