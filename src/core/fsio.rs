//! Filesystem write discipline shared by every persisted file.
//!
//! All state files are replaced whole: content goes to a sibling temp file,
//! is flushed to disk, then renamed over the target. Ledgers additionally
//! serialize their read-modify-write cycles across processes with an
//! advisory lock.

use crate::core::error::DocHookError;
use fs2::FileExt;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "state".to_string());
    path.with_file_name(format!(".{}.{}.tmp", name, std::process::id()))
}

/// Replace `path` with `bytes` so readers see either the old or the new file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), DocHookError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp = temp_sibling(path);
    let result = (|| -> Result<(), DocHookError> {
        let mut f = File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
        drop(f);
        fs::rename(&tmp, path)?;
        Ok(())
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), DocHookError> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    write_atomic(path, &bytes)
}

/// Append one JSON line to an audit log, creating it if needed.
pub fn append_line<T: Serialize>(path: &Path, value: &T) -> Result<(), DocHookError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut f = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(f, "{}", serde_json::to_string(value)?)?;
    Ok(())
}

/// Run `f` while holding an exclusive advisory lock on `lock_path`.
///
/// The lock is released when the lock file handle drops, including on error.
pub fn with_lock<F, R>(lock_path: &Path, f: F) -> Result<R, DocHookError>
where
    F: FnOnce() -> Result<R, DocHookError>,
{
    if let Some(parent) = lock_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(lock_path)?;
    lock_file
        .lock_exclusive()
        .map_err(|source| DocHookError::LockError {
            path: lock_path.to_path_buf(),
            source,
        })?;
    let result = f();
    let _ = FileExt::unlock(&lock_file);
    result
}
