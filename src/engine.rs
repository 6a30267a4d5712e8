//! Cross-tree set algebra.
//!
//! Consumes immutable `TreeIndex` snapshots and turns the selected
//! operation into an `OperationPlan`. Matching is by content digest, or by
//! `(digest, basename)` when `--same-filename` is active; files below
//! `--min-size` never take part in matching. All choices among matching
//! files are ordered by `(device, inode, path)` so plans are a pure
//! function of their inputs.

use crate::index::{FileRecord, TreeIndex};
use crate::plan::{Action, Plan};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Copy, Default)]
pub struct MatchOptions {
    pub same_filename: bool,
    pub min_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct MatchKey {
    digest: String,
    name: Option<String>,
}

fn key_of(record: &FileRecord, options: MatchOptions) -> MatchKey {
    MatchKey {
        digest: record.digest.clone(),
        name: options
            .same_filename
            .then(|| record.name().to_string()),
    }
}

fn matching_records<'a>(
    index: &'a TreeIndex,
    options: MatchOptions,
) -> impl Iterator<Item = &'a FileRecord> {
    index
        .records()
        .iter()
        .filter(move |r| r.size >= options.min_size)
}

fn key_sets(indexes: &[TreeIndex], options: MatchOptions) -> Vec<HashSet<MatchKey>> {
    indexes
        .iter()
        .map(|index| {
            matching_records(index, options)
                .map(|r| key_of(r, options))
                .collect()
        })
        .collect()
}

/// All matching records of all trees grouped by key, in tree order and
/// scan order within each group. `BTreeMap` keeps group iteration
/// deterministic.
fn key_groups<'a>(
    indexes: &'a [TreeIndex],
    options: MatchOptions,
) -> BTreeMap<MatchKey, Vec<&'a FileRecord>> {
    let mut groups: BTreeMap<MatchKey, Vec<&FileRecord>> = BTreeMap::new();
    for index in indexes {
        for record in matching_records(index, options) {
            groups.entry(key_of(record, options)).or_default().push(record);
        }
    }
    groups
}

#[derive(Debug, PartialEq, Eq)]
pub struct RootIntersection {
    pub root: PathBuf,
    pub unique_files: u64,
    pub shared_files: u64,
    pub total_files: u64,
}

#[derive(Debug, PartialEq, Eq)]
pub struct IntersectStats {
    pub roots: Vec<RootIntersection>,
    pub unique_total: u64,
    pub shared_total: u64,
    pub total: u64,
}

/// Classify every file in every tree as unique to its tree or shared with
/// at least one other tree. "Shared" counts physical occurrences, not
/// keys.
pub fn intersect_stats(indexes: &[TreeIndex], options: MatchOptions) -> IntersectStats {
    let sets = key_sets(indexes, options);
    let mut roots = Vec::with_capacity(indexes.len());
    let mut unique_total = 0u64;
    let mut shared_total = 0u64;

    for (i, index) in indexes.iter().enumerate() {
        let mut unique_files = 0u64;
        let mut shared_files = 0u64;
        for record in matching_records(index, options) {
            let key = key_of(record, options);
            let shared = sets
                .iter()
                .enumerate()
                .any(|(j, set)| j != i && set.contains(&key));
            if shared {
                shared_files += 1;
            } else {
                unique_files += 1;
            }
        }
        unique_total += unique_files;
        shared_total += shared_files;
        roots.push(RootIntersection {
            root: index.root().to_path_buf(),
            unique_files,
            shared_files,
            total_files: unique_files + shared_files,
        });
    }

    IntersectStats {
        roots,
        unique_total,
        shared_total,
        total: unique_total + shared_total,
    }
}

/// Files of tree `which` whose key occurs in no other tree, in scan order.
pub fn unique_to(
    indexes: &[TreeIndex],
    which: usize,
    options: MatchOptions,
) -> Vec<&FileRecord> {
    let sets = key_sets(indexes, options);
    matching_records(&indexes[which], options)
        .filter(|record| {
            let key = key_of(record, options);
            !sets
                .iter()
                .enumerate()
                .any(|(j, set)| j != which && set.contains(&key))
        })
        .collect()
}

/// Copy the selected files flat into `dst`, never overwriting: basename
/// collisions get a numeric suffix (`name.txt`, `name.txt.1`, ...).
pub fn extract_plan(selected: &[&FileRecord], dst: &Path) -> Plan {
    let mut taken: HashSet<String> = match std::fs::read_dir(dst) {
        Ok(entries) => entries
            .flatten()
            .filter_map(|e| e.file_name().into_string().ok())
            .collect(),
        Err(_) => HashSet::new(),
    };

    let mut actions = Vec::with_capacity(selected.len());
    for record in selected {
        let base = record.name().to_string();
        let mut candidate = base.clone();
        let mut suffix = 0u32;
        while taken.contains(&candidate) {
            suffix += 1;
            candidate = format!("{base}.{suffix}");
        }
        taken.insert(candidate.clone());
        actions.push(Action::CopyExtract {
            src: record.path.clone(),
            dst: dst.join(candidate),
            size: record.size,
        });
    }
    Plan { actions }
}

/// `--remove-copies` with `--intersect`: every occurrence outside the
/// first tree whose key also occurs in the first tree is removed.
pub fn remove_copies_intersect_plan(indexes: &[TreeIndex], options: MatchOptions) -> Plan {
    let first_keys: HashSet<MatchKey> = matching_records(&indexes[0], options)
        .map(|r| key_of(r, options))
        .collect();

    let mut actions = Vec::new();
    for index in &indexes[1..] {
        for record in matching_records(index, options) {
            if first_keys.contains(&key_of(record, options)) {
                actions.push(Action::Remove {
                    path: record.path.clone(),
                    size: record.size,
                });
            }
        }
    }
    Plan { actions }
}

/// `--remove-copies` without `--intersect`: across the union of all roots,
/// keep the newest copy of each key and remove the rest. Ties on mtime
/// fall back to the lowest `(device, inode, path)`.
pub fn remove_copies_newest_plan(indexes: &[TreeIndex], options: MatchOptions) -> Plan {
    let mut actions = Vec::new();
    for (_, group) in key_groups(indexes, options) {
        if group.len() < 2 {
            continue;
        }
        let keeper = group
            .iter()
            .min_by(|a, b| {
                b.mtime
                    .cmp(&a.mtime)
                    .then_with(|| a.identity().cmp(&b.identity()))
            })
            .map(|r| r.path.clone())
            .unwrap_or_default();
        for record in group {
            if record.path != keeper {
                actions.push(Action::Remove {
                    path: record.path.clone(),
                    size: record.size,
                });
            }
        }
    }
    Plan { actions }
}

/// `--remove-copies-from-last`: remove every occurrence in the last tree
/// whose key also occurs in any earlier tree.
pub fn remove_copies_from_last_plan(indexes: &[TreeIndex], options: MatchOptions) -> Plan {
    let last = indexes.len() - 1;
    let mut earlier_keys: HashSet<MatchKey> = HashSet::new();
    for index in &indexes[..last] {
        for record in matching_records(index, options) {
            earlier_keys.insert(key_of(record, options));
        }
    }

    let actions = matching_records(&indexes[last], options)
        .filter(|record| earlier_keys.contains(&key_of(record, options)))
        .map(|record| Action::Remove {
            path: record.path.clone(),
            size: record.size,
        })
        .collect();
    Plan { actions }
}

/// `--hardlink-copies`: for every key group, link all members on the
/// canonical member's device to the canonical member. The canonical member
/// is the one with the lowest `(device, inode, path)`. Cross-device
/// members cannot be linked and are left alone.
pub fn hardlink_copies_plan(indexes: &[TreeIndex], options: MatchOptions) -> Plan {
    let mut actions = Vec::new();
    for (_, mut group) in key_groups(indexes, options) {
        if group.len() < 2 {
            continue;
        }
        group.sort_by(|a, b| a.identity().cmp(&b.identity()));
        let canonical = group[0];
        if canonical.ino == 0 {
            // No inode information on this platform, nothing to link to.
            continue;
        }
        for record in &group[1..] {
            if (record.dev, record.ino) == (canonical.dev, canonical.ino) {
                continue;
            }
            if record.dev != canonical.dev {
                info!(
                    "Not hardlinking {} => {}: cross-device",
                    record.path.display(),
                    canonical.path.display()
                );
                continue;
            }
            actions.push(Action::Hardlink {
                target: canonical.path.clone(),
                source: record.path.clone(),
                size: record.size,
            });
        }
    }
    Plan { actions }
}

/// `--break-hardlinks`: rewrite every non-first member of every hardlink
/// group as an independent file.
pub fn break_hardlinks_plan(indexes: &[TreeIndex]) -> Plan {
    let mut actions = Vec::new();
    for index in indexes {
        for group in index.hardlink_groups() {
            for record in &group[1..] {
                actions.push(Action::BreakHardlink {
                    path: record.path.clone(),
                    size: record.size,
                });
            }
        }
    }
    Plan { actions }
}

/// `--remove-empty-dirs`: bottom-up removal plan for directories that hold
/// nothing but (at most) their `.dirdb`. `pending_removed` contains file
/// paths a preceding plan removes, so a dry-run combination sees the same
/// set of empty directories as a real run. The roots themselves are never
/// planned for removal.
pub fn empty_dirs_plan(roots: &[PathBuf], pending_removed: &HashSet<PathBuf>) -> Plan {
    fn collect(
        dir: &Path,
        is_root: bool,
        pending_removed: &HashSet<PathBuf>,
        actions: &mut Vec<Action>,
    ) -> bool {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => return false,
        };

        let mut empty = true;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.file_name() == Some(std::ffi::OsStr::new(crate::digest_cache::DIRDB_FILENAME))
            {
                continue;
            }
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if is_dir {
                if !collect(&path, false, pending_removed, actions) {
                    empty = false;
                }
            } else if !pending_removed.contains(&path) {
                empty = false;
            }
        }

        if empty && !is_root {
            actions.push(Action::RemoveDir {
                path: dir.to_path_buf(),
            });
        }
        empty
    }

    let mut actions = Vec::new();
    for root in roots {
        collect(root, true, pending_removed, &mut actions);
    }
    Plan { actions }
}

#[derive(Debug, PartialEq, Eq)]
pub struct HistogramRow {
    pub start: u64,
    pub end: u64,
    pub count: u64,
    pub bytes: u64,
}

/// Size histogram over all indexed files: one row per `batch`-sized bucket
/// from zero up to the largest occupied bucket, empty buckets included.
pub fn size_histogram(
    indexes: &[TreeIndex],
    batch: u64,
    max_size: Option<u64>,
) -> Vec<HistogramRow> {
    let mut buckets: BTreeMap<u64, (u64, u64)> = BTreeMap::new();
    for index in indexes {
        for record in index.records() {
            if max_size.is_some_and(|max| record.size > max) {
                continue;
            }
            let start = (record.size / batch) * batch;
            let bucket = buckets.entry(start).or_default();
            bucket.0 += 1;
            bucket.1 += record.size;
        }
    }

    let Some(&max_start) = buckets.keys().next_back() else {
        return Vec::new();
    };

    (0..=max_start / batch)
        .map(|i| {
            let start = i * batch;
            let (count, bytes) = buckets.get(&start).copied().unwrap_or((0, 0));
            HistogramRow {
                start,
                end: start + batch,
                count,
                bytes,
            }
        })
        .collect()
}
