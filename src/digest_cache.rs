//! Per-directory digest cache (`.dirdb`).
//!
//! Every scanned directory carries a `.dirdb` file mapping each contained
//! regular file to its content digest, keyed by `(size, mtime)` so stale
//! entries can be detected without rehashing. The cache is non-recursive -
//! each directory describes only its immediate files, so a directory can be
//! moved together with its cache.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DIRDB_FILENAME: &str = ".dirdb";

/// Version header written as the first line of every cache file.
const DIRDB_HEADER: &str = "#dirdb 1";

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(std::io::Error),
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub size: u64,
    /// Modification time in seconds since the Unix epoch.
    pub mtime: i64,
    /// Lowercase hex content digest.
    pub digest: String,
}

/// In-memory form of one `.dirdb` file.
///
/// Entries are kept in a `BTreeMap` so the serialized form is sorted by
/// filename, which keeps cache diffs stable across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DigestCache {
    pub entries: BTreeMap<String, CacheEntry>,
}

impl DigestCache {
    pub fn path_for(dir: &Path) -> PathBuf {
        dir.join(DIRDB_FILENAME)
    }

    /// Load the cache of `dir`.
    ///
    /// A missing or unreadable cache file yields an empty cache, and
    /// malformed lines are skipped. Loading never fails hard: a corrupt
    /// cache only costs rehashing, it must not abort a scan.
    pub fn load(dir: &Path) -> Self {
        let path = Self::path_for(dir);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    debug!("Ignoring unreadable cache {}: {}", path.display(), e);
                }
                return Self::default();
            }
        };

        let mut entries = BTreeMap::new();
        for line in content.lines() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match parse_line(line) {
                Some((name, entry)) => {
                    entries.insert(name, entry);
                }
                None => {
                    debug!("Skipping malformed cache line in {}: {line}", path.display());
                }
            }
        }

        Self { entries }
    }

    /// Return the cached digest for `name` only if both size and mtime
    /// match the live file exactly.
    pub fn lookup(&self, name: &str, size: u64, mtime: i64) -> Option<&str> {
        let entry = self.entries.get(name)?;
        if entry.size == size && entry.mtime == mtime {
            Some(&entry.digest)
        } else {
            None
        }
    }

    /// Save the cache for `dir` atomically (temp file + rename).
    ///
    /// An empty cache is not written unless a cache file already exists, in
    /// which case the existing file is truncated to the empty form rather
    /// than left stale.
    pub fn save(&self, dir: &Path) -> Result<(), CacheError> {
        use std::io::Write;

        let path = Self::path_for(dir);
        if self.entries.is_empty() && !path.exists() {
            return Ok(());
        }

        let mut content = String::with_capacity(64 + self.entries.len() * 96);
        content.push_str(DIRDB_HEADER);
        content.push('\n');
        for (name, entry) in &self.entries {
            content.push_str(&format!(
                "{} {} {} {}\n",
                entry.size, entry.mtime, entry.digest, name
            ));
        }

        let mut temp_file = tempfile::NamedTempFile::new_in(dir).map_err(|e| {
            if e.kind() == ErrorKind::PermissionDenied {
                CacheError::PermissionDenied(dir.to_path_buf())
            } else {
                CacheError::Io(e)
            }
        })?;

        temp_file
            .write_all(content.as_bytes())
            .map_err(CacheError::Io)?;

        temp_file.persist(&path).map_err(|e| {
            if e.error.kind() == ErrorKind::PermissionDenied {
                CacheError::PermissionDenied(path.clone())
            } else {
                CacheError::Io(e.error)
            }
        })?;

        Ok(())
    }

    /// Delete the cache file of `dir` if present. Returns whether a file
    /// was removed.
    pub fn remove(dir: &Path) -> Result<bool, CacheError> {
        let path = Self::path_for(dir);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                Err(CacheError::PermissionDenied(path))
            }
            Err(e) => Err(CacheError::Io(e)),
        }
    }
}

/// Parse one record line: `<size> <mtime> <digest> <filename>`.
///
/// The filename comes last so that names containing spaces survive: it is
/// everything after the third space.
fn parse_line(line: &str) -> Option<(String, CacheEntry)> {
    let mut parts = line.splitn(4, ' ');
    let size = parts.next()?.parse::<u64>().ok()?;
    let mtime = parts.next()?.parse::<i64>().ok()?;
    let digest = parts.next()?;
    let name = parts.next()?;
    if digest.is_empty() || name.is_empty() || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Some((
        name.to_string(),
        CacheEntry {
            size,
            mtime,
            digest: digest.to_string(),
        },
    ))
}
