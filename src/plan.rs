//! Operation plans and their execution.
//!
//! Every mutating operation first materializes a full `Plan` so that the
//! mutation order is a pure function of the plan, then either prints it
//! (dry-run) or executes it in one pass. Actions that cannot be carried
//! out are skipped with a reason and never abort the run; skipped actions
//! do not count into the success counters.

use crate::digest_cache::{CacheEntry, DigestCache};
use crate::scanner::{file_identity, file_mtime};
use std::collections::BTreeMap;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Delete one file. `size` is the byte size it frees.
    Remove { path: PathBuf, size: u64 },
    /// Replace `source` with a hardlink to `target` (the canonical copy).
    Hardlink {
        target: PathBuf,
        source: PathBuf,
        size: u64,
    },
    /// Copy `src` to the flat extraction destination `dst`.
    CopyExtract {
        src: PathBuf,
        dst: PathBuf,
        size: u64,
    },
    /// Rewrite one hardlink group member as an independent file.
    BreakHardlink { path: PathBuf, size: u64 },
    /// Remove an empty directory (its `.dirdb` goes with it).
    RemoveDir { path: PathBuf },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    CrossDevice,
    Permission,
    RacedAway,
    WouldBreakInvariant,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SkipReason::CrossDevice => "cross-device",
            SkipReason::Permission => "permission",
            SkipReason::RacedAway => "raced-away",
            SkipReason::WouldBreakInvariant => "would-break-invariant",
        };
        f.write_str(text)
    }
}

enum ActionFailure {
    Skip(SkipReason),
    Io(std::io::Error),
}

impl From<std::io::Error> for ActionFailure {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            ErrorKind::PermissionDenied => ActionFailure::Skip(SkipReason::Permission),
            ErrorKind::NotFound => ActionFailure::Skip(SkipReason::RacedAway),
            _ => ActionFailure::Io(e),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExecStats {
    pub removed_files: u64,
    pub removed_size: u64,
    pub hardlinks_created: u64,
    pub broken_hardlinks: u64,
    pub copied_files: u64,
    pub removed_dirs: u64,
    pub skipped: u64,
}

#[derive(Debug, Default)]
pub struct Plan {
    pub actions: Vec<Action>,
}

/// Pending `.dirdb` corrections for one directory, applied after the
/// filesystem mutations have run.
#[derive(Default)]
struct DirPatch {
    drop: Vec<String>,
    restat: Vec<String>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Print the plan as `Would ...` lines without touching anything.
    pub fn print(&self) {
        for action in &self.actions {
            match action {
                Action::Remove { path, .. } => {
                    println!("Would remove {}", path.display());
                }
                Action::Hardlink { target, source, .. } => {
                    println!("Would hardlink {} => {}", source.display(), target.display());
                }
                Action::CopyExtract { src, dst, .. } => {
                    println!("Would copy {} => {}", src.display(), dst.display());
                }
                Action::BreakHardlink { path, .. } => {
                    println!("Would copy {}", path.display());
                }
                Action::RemoveDir { path } => {
                    println!("Would rmdir {}", path.display());
                }
            }
        }
    }

    /// Counters a clean execution of this plan would produce. Dry-run
    /// reporting uses this so its numbers match a real run.
    pub fn planned_stats(&self) -> ExecStats {
        let mut stats = ExecStats::default();
        for action in &self.actions {
            match action {
                Action::Remove { size, .. } => {
                    stats.removed_files += 1;
                    stats.removed_size += size;
                }
                Action::Hardlink { .. } => stats.hardlinks_created += 1,
                Action::CopyExtract { .. } => stats.copied_files += 1,
                Action::BreakHardlink { .. } => stats.broken_hardlinks += 1,
                Action::RemoveDir { .. } => stats.removed_dirs += 1,
            }
        }
        stats
    }

    /// Execute the plan against the filesystem, then patch the digest
    /// caches of every directory the plan touched.
    pub fn execute(&self) -> ExecStats {
        let mut stats = ExecStats::default();
        let mut patches: BTreeMap<PathBuf, DirPatch> = BTreeMap::new();

        for action in &self.actions {
            match execute_action(action) {
                Ok(()) => {
                    record_success(action, &mut stats, &mut patches);
                }
                Err(ActionFailure::Skip(reason)) => {
                    info!("Skipping {}: {}", describe(action), reason);
                    stats.skipped += 1;
                }
                Err(ActionFailure::Io(e)) => {
                    warn!("Failed {}: {}", describe(action), e);
                    stats.skipped += 1;
                }
            }
        }

        apply_patches(patches);
        stats
    }
}

fn describe(action: &Action) -> String {
    match action {
        Action::Remove { path, .. } => format!("remove of {}", path.display()),
        Action::Hardlink { target, source, .. } => format!(
            "hardlink of {} => {}",
            source.display(),
            target.display()
        ),
        Action::CopyExtract { src, dst, .. } => {
            format!("copy of {} => {}", src.display(), dst.display())
        }
        Action::BreakHardlink { path, .. } => format!("hardlink break of {}", path.display()),
        Action::RemoveDir { path } => format!("rmdir of {}", path.display()),
    }
}

fn record_success(action: &Action, stats: &mut ExecStats, patches: &mut BTreeMap<PathBuf, DirPatch>) {
    let mut patch = |path: &Path, restat: bool| {
        let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
            return;
        };
        let Some(name) = name.to_str() else {
            return;
        };
        let entry = patches.entry(parent.to_path_buf()).or_default();
        if restat {
            entry.restat.push(name.to_string());
        } else {
            entry.drop.push(name.to_string());
        }
    };

    match action {
        Action::Remove { path, size } => {
            info!("Removed {}", path.display());
            stats.removed_files += 1;
            stats.removed_size += size;
            patch(path, false);
        }
        Action::Hardlink { target, source, .. } => {
            info!("Hardlinked {} => {}", source.display(), target.display());
            stats.hardlinks_created += 1;
            patch(source, true);
        }
        Action::CopyExtract { src, dst, .. } => {
            info!("Copied {} => {}", src.display(), dst.display());
            stats.copied_files += 1;
        }
        Action::BreakHardlink { path, .. } => {
            info!("Broke hardlink {}", path.display());
            stats.broken_hardlinks += 1;
            patch(path, true);
        }
        Action::RemoveDir { path } => {
            info!("Removed directory {}", path.display());
            stats.removed_dirs += 1;
        }
    }
}

fn execute_action(action: &Action) -> Result<(), ActionFailure> {
    match action {
        Action::Remove { path, .. } => {
            std::fs::remove_file(path)?;
            Ok(())
        }
        Action::Hardlink { target, source, .. } => execute_hardlink(target, source),
        Action::CopyExtract { src, dst, .. } => execute_copy(src, dst),
        Action::BreakHardlink { path, .. } => execute_break(path),
        Action::RemoveDir { path } => execute_rmdir(path),
    }
}

fn execute_hardlink(target: &Path, source: &Path) -> Result<(), ActionFailure> {
    let target_meta = std::fs::symlink_metadata(target)?;
    let source_meta = std::fs::symlink_metadata(source)?;
    let (target_dev, target_ino, _) = file_identity(&target_meta);
    let (source_dev, source_ino, _) = file_identity(&source_meta);

    if (target_dev, target_ino) == (source_dev, source_ino) {
        // Already one inode; linking would only churn the directory.
        return Err(ActionFailure::Skip(SkipReason::WouldBreakInvariant));
    }
    if target_dev != source_dev {
        return Err(ActionFailure::Skip(SkipReason::CrossDevice));
    }

    let parent = source.parent().unwrap_or(Path::new("."));
    let temp = parent.join(format!(".treeop-link-{}", std::process::id()));
    if temp.exists() {
        std::fs::remove_file(&temp)?;
    }
    std::fs::hard_link(target, &temp)?;
    // Rename over the source so there is never a moment without a file at
    // the source path.
    if let Err(e) = std::fs::rename(&temp, source) {
        let _ = std::fs::remove_file(&temp);
        return Err(e.into());
    }
    Ok(())
}

fn execute_copy(src: &Path, dst: &Path) -> Result<(), ActionFailure> {
    if dst.exists() {
        return Err(ActionFailure::Skip(SkipReason::RacedAway));
    }
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::copy(src, dst)?;
    Ok(())
}

fn execute_break(path: &Path) -> Result<(), ActionFailure> {
    let metadata = std::fs::symlink_metadata(path)?;
    let (_, _, nlink) = file_identity(&metadata);
    if nlink <= 1 {
        return Err(ActionFailure::Skip(SkipReason::WouldBreakInvariant));
    }

    let parent = path.parent().unwrap_or(Path::new("."));
    let mut source = std::fs::File::open(path)?;
    let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(ActionFailure::from)?;
    std::io::copy(&mut source, &mut temp)?;
    temp.persist(path).map_err(|e| ActionFailure::from(e.error))?;
    Ok(())
}

fn execute_rmdir(path: &Path) -> Result<(), ActionFailure> {
    // The cache is deleted together with its directory; its presence does
    // not make the directory non-empty.
    let _ = DigestCache::remove(path);

    let mut entries = std::fs::read_dir(path)?;
    if entries.next().is_some() {
        return Err(ActionFailure::Skip(SkipReason::WouldBreakInvariant));
    }
    std::fs::remove_dir(path)?;
    Ok(())
}

/// Bring the `.dirdb` files of mutated directories back in line with the
/// filesystem: removed files are dropped, replaced files (hardlink and
/// break-hardlink targets keep their digest) are re-statted in place.
fn apply_patches(patches: BTreeMap<PathBuf, DirPatch>) {
    for (dir, patch) in patches {
        let mut cache = DigestCache::load(&dir);
        if cache.entries.is_empty() {
            continue;
        }

        for name in &patch.drop {
            cache.entries.remove(name);
        }
        for name in &patch.restat {
            let Some(entry) = cache.entries.get(name) else {
                continue;
            };
            let digest = entry.digest.clone();
            match std::fs::symlink_metadata(dir.join(name)) {
                Ok(metadata) => {
                    cache.entries.insert(
                        name.clone(),
                        CacheEntry {
                            size: metadata.len(),
                            mtime: file_mtime(&metadata),
                            digest,
                        },
                    );
                }
                Err(_) => {
                    cache.entries.remove(name);
                }
            }
        }

        if let Err(e) = cache.save(&dir) {
            warn!("Failed to patch cache in {}: {}", dir.display(), e);
        }
    }
}
