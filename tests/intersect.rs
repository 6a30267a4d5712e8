mod common;

use common::{counter_value, counter_values, run_ok, treeop_cmd};
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn two_trees(temp: &TempDir) -> (std::path::PathBuf, std::path::PathBuf) {
    let a = temp.path().join("a");
    let b = temp.path().join("b");
    fs::create_dir(&a).unwrap();
    fs::create_dir(&b).unwrap();
    (a, b)
}

#[test]
fn intersect_classifies_unique_and_shared() {
    let temp = TempDir::new().unwrap();
    let (a, b) = two_trees(&temp);
    fs::write(a.join("same.txt"), "hello").unwrap();
    fs::write(a.join("onlyA.txt"), "only a").unwrap();
    fs::write(b.join("same.txt"), "hello").unwrap();
    fs::write(b.join("onlyB.txt"), "only b").unwrap();

    let stdout = run_ok(treeop_cmd().arg("--intersect").arg(&a).arg(&b));

    assert_eq!(counter_values(&stdout, "unique-files"), vec![1, 1]);
    assert_eq!(counter_values(&stdout, "shared-files"), vec![1, 1]);
    assert_eq!(counter_values(&stdout, "total-files"), vec![2, 2]);
    assert_eq!(counter_value(&stdout, "unique-total"), 2);
    assert_eq!(counter_value(&stdout, "shared-total"), 2);
    assert_eq!(counter_value(&stdout, "total"), 4);
}

/// Shared counts every physical occurrence: three copies of one content
/// across two trees all count as shared.
#[test]
fn intersect_counts_occurrences_not_keys() {
    let temp = TempDir::new().unwrap();
    let (a, b) = two_trees(&temp);
    fs::write(a.join("one.txt"), "hello").unwrap();
    fs::write(a.join("two.txt"), "hello").unwrap();
    fs::write(b.join("three.txt"), "hello").unwrap();

    let stdout = run_ok(treeop_cmd().arg("--intersect").arg(&a).arg(&b));

    assert_eq!(counter_values(&stdout, "shared-files"), vec![2, 1]);
    assert_eq!(counter_value(&stdout, "shared-total"), 3);
}

#[test]
fn same_filename_gates_matching() {
    let temp = TempDir::new().unwrap();
    let (a, b) = two_trees(&temp);
    fs::write(a.join("one.txt"), "same").unwrap();
    fs::write(b.join("two.txt"), "same").unwrap();

    let ungated = run_ok(treeop_cmd().arg("--intersect").arg(&a).arg(&b));
    assert_eq!(counter_value(&ungated, "shared-total"), 2);

    let gated = run_ok(
        treeop_cmd()
            .arg("--intersect")
            .arg("--same-filename")
            .arg(&a)
            .arg(&b),
    );
    assert_eq!(counter_value(&gated, "shared-total"), 0);
    assert_eq!(counter_value(&gated, "unique-total"), 2);
}

#[test]
fn min_size_excludes_small_files_from_matching() {
    let temp = TempDir::new().unwrap();
    let (a, b) = two_trees(&temp);
    fs::write(a.join("tiny.txt"), "hi").unwrap();
    fs::write(b.join("tiny.txt"), "hi").unwrap();

    let stdout = run_ok(
        treeop_cmd()
            .arg("--intersect")
            .arg("--min-size")
            .arg("3")
            .arg(&a)
            .arg(&b),
    );

    assert_eq!(counter_value(&stdout, "total"), 0);
}

#[test]
fn list_first_prints_unique_files_with_counter() {
    let temp = TempDir::new().unwrap();
    let (a, b) = two_trees(&temp);
    fs::write(a.join("same.txt"), "hello").unwrap();
    fs::write(a.join("onlyA.txt"), "only a").unwrap();
    fs::write(b.join("same.txt"), "hello").unwrap();

    let stdout = run_ok(
        treeop_cmd()
            .arg("--intersect")
            .arg("--list-first")
            .arg(&a)
            .arg(&b),
    );

    assert!(stdout.contains("onlyA.txt"));
    assert!(!stdout.lines().any(|l| l.contains("same.txt")));
    assert_eq!(counter_value(&stdout, "only-in-first"), 1);
}

#[test]
fn list_last_prints_unique_files_with_counter() {
    let temp = TempDir::new().unwrap();
    let (a, b) = two_trees(&temp);
    fs::write(a.join("same.txt"), "hello").unwrap();
    fs::write(b.join("same.txt"), "hello").unwrap();
    fs::write(b.join("onlyB.txt"), "only b").unwrap();

    let stdout = run_ok(
        treeop_cmd()
            .arg("--intersect")
            .arg("--list-last")
            .arg(&a)
            .arg(&b),
    );

    assert!(stdout.contains("onlyB.txt"));
    assert_eq!(counter_value(&stdout, "only-in-last"), 1);
}

/// Listing rows are `<size> <digest> <path>` with the digest column at one
/// offset for every line.
#[test]
fn listings_align_the_digest_column() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    fs::write(root.join("small.txt"), "x").unwrap();
    fs::write(root.join("large.txt"), "x".repeat(12345)).unwrap();

    let stdout = run_ok(treeop_cmd().arg("--list-files").arg(root));

    // The digest column starts right after the space-padded size column:
    // skip leading padding, then the digits, then one separator space.
    let offsets: Vec<usize> = stdout
        .lines()
        .filter(|line| line.contains(".txt"))
        .map(|line| {
            let padding = line.len() - line.trim_start().len();
            let digits = line.trim_start().find(' ').unwrap();
            padding + digits + 1
        })
        .collect();
    assert_eq!(offsets.len(), 2);
    assert_eq!(offsets[0], offsets[1], "digest columns must align");
}

#[test]
fn intersect_with_one_root_is_a_usage_error() {
    let temp = TempDir::new().unwrap();

    treeop_cmd()
        .arg("--intersect")
        .arg(temp.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("requires at least two"));
}

#[test]
fn list_first_requires_intersect() {
    let temp = TempDir::new().unwrap();
    let (a, b) = two_trees(&temp);

    treeop_cmd()
        .arg("--list-first")
        .arg(&a)
        .arg(&b)
        .assert()
        .failure()
        .stderr(predicate::str::contains("requires --intersect"));
}

#[test]
fn intersect_headers_name_each_root() {
    let temp = TempDir::new().unwrap();
    let (a, b) = two_trees(&temp);
    fs::write(a.join("f.txt"), "x").unwrap();
    fs::write(b.join("f.txt"), "x").unwrap();

    let stdout = run_ok(treeop_cmd().arg("--intersect").arg(&a).arg(&b));

    // Roots are canonicalized, so match on the directory names.
    let headers: Vec<&str> = stdout
        .lines()
        .filter(|l| l.ends_with(':') && Path::new(l.trim_end_matches(':')).is_absolute())
        .collect();
    assert_eq!(headers.len(), 2);
    assert!(headers[0].trim_end_matches(':').ends_with("a"));
    assert!(headers[1].trim_end_matches(':').ends_with("b"));
}
