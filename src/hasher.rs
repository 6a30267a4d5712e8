use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default streaming buffer size, overridable with `--bufsize`.
pub const DEFAULT_BUFSIZE: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("IO error: {0}")]
    Io(std::io::Error),
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
}

/// Compute the content digest of a file as a lowercase hex string.
///
/// The file is read in `bufsize` chunks so arbitrarily large files stream
/// through a fixed amount of memory. All digests in the program come from
/// this function and share one fixed width.
pub fn hash_file(path: &Path, bufsize: usize) -> Result<String, HashError> {
    let mut file = open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; bufsize.max(1)];

    loop {
        let bytes_read = match file.read(&mut buffer) {
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(HashError::Io(e)),
        };
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    let digest = format!("{:x}", hasher.finalize());
    debug!("Hashed {} as {}", path.display(), digest);
    Ok(digest)
}

/// Stream-read a file without digesting, returning the number of bytes
/// read. Used by the read benchmark to measure raw read throughput.
pub fn stream_file(path: &Path, bufsize: usize) -> Result<u64, HashError> {
    let mut file = open(path)?;
    let mut buffer = vec![0u8; bufsize.max(1)];
    let mut total = 0u64;

    loop {
        let bytes_read = match file.read(&mut buffer) {
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(HashError::Io(e)),
        };
        if bytes_read == 0 {
            break;
        }
        total += bytes_read as u64;
    }

    Ok(total)
}

fn open(path: &Path) -> Result<File, HashError> {
    File::open(path).map_err(|e| {
        if e.kind() == ErrorKind::PermissionDenied {
            HashError::PermissionDenied(path.to_path_buf())
        } else {
            HashError::Io(e)
        }
    })
}
