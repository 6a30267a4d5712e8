//! Recursive tree scanner.
//!
//! Walks a root depth-first, refreshing the per-directory digest cache on
//! the way and assembling the in-memory `TreeIndex`. Per-file failures are
//! logged and the file is omitted from the index; the scan itself only
//! fails when the root cannot be read at all.

use crate::digest_cache::{CacheEntry, DIRDB_FILENAME, DigestCache};
use crate::hasher;
use crate::index::{FileRecord, TreeIndex};
use std::collections::HashMap;
use std::fs::Metadata;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("IO error: {0}")]
    Io(std::io::Error),
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),
}

/// How the scanner treats existing `.dirdb` files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Reuse valid cache entries, write back only when something changed.
    #[default]
    Reuse,
    /// Like `Reuse`, but rewrite the cache file even when nothing changed.
    Update,
    /// Ignore existing cache contents, rehash every file, overwrite.
    Rebuild,
}

#[derive(Debug, Clone, Copy)]
pub struct ScanOptions {
    pub mode: CacheMode,
    pub bufsize: usize,
    /// Cleared for dry runs: a dry run must leave the tree byte-identical,
    /// including its caches.
    pub write_cache: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            mode: CacheMode::Reuse,
            bufsize: hasher::DEFAULT_BUFSIZE,
            write_cache: true,
        }
    }
}

struct ScanContext {
    options: ScanOptions,
    /// Digests already computed for multiply-linked inodes during this
    /// scan. All paths of one inode carry the same bytes, so the digest
    /// can be reused instead of rehashed.
    inode_digests: HashMap<(u64, u64), String>,
}

/// Scan one root and build its `TreeIndex`.
pub fn scan_tree(root: &Path, options: ScanOptions) -> Result<TreeIndex, ScanError> {
    let root = root.canonicalize().map_err(|e| {
        if e.kind() == ErrorKind::PermissionDenied {
            ScanError::PermissionDenied(root.to_path_buf())
        } else {
            ScanError::Io(e)
        }
    })?;
    if !root.is_dir() {
        return Err(ScanError::NotADirectory(root));
    }

    let start = Instant::now();
    let mut index = TreeIndex::new(root.clone());
    let mut context = ScanContext {
        options,
        inode_digests: HashMap::new(),
    };

    walk_dir(&root, &mut index, &mut context)?;
    index.set_elapsed(start.elapsed().as_secs_f64());

    Ok(index)
}

fn walk_dir(dir: &Path, index: &mut TreeIndex, context: &mut ScanContext) -> Result<(), ScanError> {
    debug!("Scanning {}", dir.display());
    index.count_dir();

    let loaded = DigestCache::load(dir);
    let cache = match context.options.mode {
        CacheMode::Rebuild => DigestCache::default(),
        _ => loaded.clone(),
    };

    let (files, subdirs) = match list_entries(dir) {
        Ok(listing) => listing,
        Err(e) => {
            // Unreadable subtrees are skipped, not fatal.
            warn!("Skipping unreadable directory {}: {}", dir.display(), e);
            return Ok(());
        }
    };

    let mut fresh = DigestCache::default();
    for (name, metadata) in files {
        let path = dir.join(&name);
        let size = metadata.len();
        let mtime = file_mtime(&metadata);
        let (dev, ino, nlink) = file_identity(&metadata);

        let cached = cache.lookup(&name, size, mtime).map(str::to_string);
        let reused_inode = if cached.is_none() && nlink > 1 {
            context.inode_digests.get(&(dev, ino)).cloned()
        } else {
            None
        };

        let digest = match cached.or(reused_inode) {
            Some(digest) => digest,
            None => match hasher::hash_file(&path, context.options.bufsize) {
                Ok(digest) => digest,
                Err(e) => {
                    warn!("Skipping un-indexable file {}: {}", path.display(), e);
                    continue;
                }
            },
        };

        if nlink > 1 && ino != 0 {
            context.inode_digests.insert((dev, ino), digest.clone());
        }

        fresh.entries.insert(
            name,
            CacheEntry {
                size,
                mtime,
                digest: digest.clone(),
            },
        );
        index.push(FileRecord {
            path,
            size,
            mtime,
            dev,
            ino,
            nlink,
            digest,
        });
    }

    let must_write = context.options.write_cache
        && match context.options.mode {
            CacheMode::Reuse => fresh != loaded,
            CacheMode::Update | CacheMode::Rebuild => true,
        };
    if must_write
        && let Err(e) = fresh.save(dir)
    {
        // A cache that cannot be written only costs rehashing next time.
        warn!("Failed to write cache in {}: {}", dir.display(), e);
    }

    for name in subdirs {
        walk_dir(&dir.join(name), index, context)?;
    }

    Ok(())
}

/// List one directory, partitioned into regular files (with metadata) and
/// subdirectory names, both sorted by name. Symlinks and other non-regular
/// entries are skipped, as is the `.dirdb` itself.
fn list_entries(dir: &Path) -> std::io::Result<(Vec<(String, Metadata)>, Vec<String>)> {
    let mut files = Vec::new();
    let mut subdirs = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping entry in {}: {}", dir.display(), e);
                continue;
            }
        };
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(name) => {
                warn!("Skipping non-UTF-8 entry {:?} in {}", name, dir.display());
                continue;
            }
        };
        if name == DIRDB_FILENAME {
            continue;
        }

        // DirEntry::metadata does not traverse symlinks.
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("Skipping unstattable entry {}: {}", entry.path().display(), e);
                continue;
            }
        };
        let file_type = metadata.file_type();
        if file_type.is_dir() {
            subdirs.push(name);
        } else if file_type.is_file() {
            files.push((name, metadata));
        }
    }

    files.sort_by(|a, b| a.0.cmp(&b.0));
    subdirs.sort();
    Ok((files, subdirs))
}

/// Delete every `.dirdb` under `root` without hashing anything. Returns
/// the number of cache files removed.
pub fn remove_caches(root: &Path) -> Result<u64, ScanError> {
    let root = root.canonicalize().map_err(ScanError::Io)?;
    if !root.is_dir() {
        return Err(ScanError::NotADirectory(root));
    }

    let mut removed = 0u64;
    let mut pending = vec![root];
    while let Some(dir) = pending.pop() {
        match DigestCache::remove(&dir) {
            Ok(true) => {
                info!("Removed {}", DigestCache::path_for(&dir).display());
                removed += 1;
            }
            Ok(false) => {}
            Err(e) => warn!("Failed to remove cache in {}: {}", dir.display(), e),
        }

        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Skipping unreadable directory {}: {}", dir.display(), e);
                continue;
            }
        };
        for entry in entries.flatten() {
            if entry
                .metadata()
                .map(|m| m.file_type().is_dir())
                .unwrap_or(false)
            {
                pending.push(entry.path());
            }
        }
    }

    Ok(removed)
}

#[derive(Debug, Default)]
pub struct BenchStats {
    pub files: u64,
    pub bytes: u64,
    pub elapsed: f64,
}

/// Stream-read every regular file under the given roots, reporting raw
/// read throughput. Exercises the hasher's read path without digesting.
pub fn read_bench(roots: &[PathBuf], bufsize: usize) -> Result<BenchStats, ScanError> {
    let start = Instant::now();
    let mut stats = BenchStats::default();

    for root in roots {
        let root = root.canonicalize().map_err(ScanError::Io)?;
        let mut pending = vec![root];
        while let Some(dir) = pending.pop() {
            let (files, subdirs) = match list_entries(&dir) {
                Ok(listing) => listing,
                Err(e) => {
                    warn!("Skipping unreadable directory {}: {}", dir.display(), e);
                    continue;
                }
            };
            for (name, _) in files {
                let path = dir.join(name);
                match hasher::stream_file(&path, bufsize) {
                    Ok(bytes) => {
                        stats.files += 1;
                        stats.bytes += bytes;
                    }
                    Err(e) => warn!("Skipping unreadable file {}: {}", path.display(), e),
                }
            }
            for name in subdirs {
                pending.push(dir.join(name));
            }
        }
    }

    stats.elapsed = start.elapsed().as_secs_f64();
    Ok(stats)
}

#[cfg(unix)]
pub(crate) fn file_identity(metadata: &Metadata) -> (u64, u64, u64) {
    use std::os::unix::fs::MetadataExt;
    (metadata.dev(), metadata.ino(), metadata.nlink())
}

#[cfg(not(unix))]
pub(crate) fn file_identity(_metadata: &Metadata) -> (u64, u64, u64) {
    (0, 0, 1)
}

#[cfg(unix)]
pub(crate) fn file_mtime(metadata: &Metadata) -> i64 {
    use std::os::unix::fs::MetadataExt;
    metadata.mtime()
}

#[cfg(not(unix))]
pub(crate) fn file_mtime(metadata: &Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
