//! Process-level database locking.
//!
//! DuckDB only allows one writer process at a time. A file-backed
//! [`DbConnection`](crate::DbConnection) opened for writing holds an
//! exclusive lock on `<db>.lock` for as long as the connection lives.
//!
//! Uses the `fs2` crate for cross-platform file locking (MSRV 1.75 compatible).

use chrono::Utc;
use fs2::FileExt;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors from lock operations.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Database is locked by another process: {0}")]
    Locked(PathBuf),

    #[error("Failed to create lock file: {0}")]
    CreateFailed(#[source] io::Error),

    #[error("Failed to acquire lock: {0}")]
    AcquireFailed(#[source] io::Error),
}

/// Holds an exclusive lock on a database file until dropped.
pub struct DbLockGuard {
    _file: File,
    lock_path: PathBuf,
    holder_path: Option<PathBuf>,
}

impl DbLockGuard {
    /// Path of the `.lock` file.
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Path of the JSON file describing the current holder, if it was written.
    pub fn holder_path(&self) -> Option<&Path> {
        self.holder_path.as_deref()
    }
}

impl Drop for DbLockGuard {
    fn drop(&mut self) {
        debug!("Releasing database lock: {}", self.lock_path.display());
        if let Some(path) = &self.holder_path {
            if let Err(e) = fs::remove_file(path) {
                debug!("Failed to remove lock holder file {}: {}", path.display(), e);
            }
        }
        // flock/LockFileEx is released when the file handle closes
    }
}

impl std::fmt::Debug for DbLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbLockGuard")
            .field("lock_path", &self.lock_path)
            .finish()
    }
}

#[derive(Serialize)]
struct LockHolder<'a> {
    pid: u32,
    database: &'a str,
    acquired_at: String,
}

fn holder_path_for(lock_path: &Path) -> PathBuf {
    let ext = lock_path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("lock");
    lock_path.with_extension(format!("{ext}.json"))
}

fn write_lock_holder(lock_path: &Path, db_path: &Path) -> Option<PathBuf> {
    let database = db_path.display().to_string();
    let holder = LockHolder {
        pid: std::process::id(),
        database: &database,
        acquired_at: Utc::now().to_rfc3339(),
    };
    let holder_path = holder_path_for(lock_path);
    let written = serde_json::to_vec_pretty(&holder)
        .map_err(io::Error::other)
        .and_then(|payload| fs::write(&holder_path, payload));
    match written {
        Ok(()) => Some(holder_path),
        Err(e) => {
            warn!(
                "Failed to write lock holder file {}: {}",
                holder_path.display(),
                e
            );
            None
        }
    }
}

/// Get the lock file path for a database path.
///
/// - `/data/people.duckdb` → `/data/people.duckdb.lock`
/// - `/data/people` → `/data/people.lock`
pub fn lock_path_for(db_path: &Path) -> PathBuf {
    let mut lock_path = db_path.to_path_buf();
    match lock_path.extension() {
        Some(ext) => {
            let new_ext = format!("{}.lock", ext.to_string_lossy());
            lock_path.set_extension(new_ext);
        }
        None => {
            lock_path.set_extension("lock");
        }
    }
    lock_path
}

/// Try to acquire an exclusive lock on a database file without blocking.
///
/// Returns `LockError::Locked` immediately if another process holds it.
pub fn try_lock_exclusive(db_path: &Path) -> Result<DbLockGuard, LockError> {
    let lock_path = lock_path_for(db_path);

    debug!("Attempting to acquire exclusive lock: {}", lock_path.display());

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(LockError::CreateFailed)?;

    // Fully qualified: std::fs::File grew its own try_lock_exclusive in 1.89
    match FileExt::try_lock_exclusive(&file) {
        Ok(()) => {
            info!("Acquired exclusive database lock: {}", lock_path.display());
            let holder_path = write_lock_holder(&lock_path, db_path);
            Ok(DbLockGuard {
                _file: file,
                lock_path,
                holder_path,
            })
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
            Err(LockError::Locked(db_path.to_path_buf()))
        }
        Err(e) => Err(LockError::AcquireFailed(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_path_for() {
        assert_eq!(
            lock_path_for(Path::new("/data/people.duckdb")),
            PathBuf::from("/data/people.duckdb.lock")
        );
        assert_eq!(
            lock_path_for(Path::new("/data/people")),
            PathBuf::from("/data/people.lock")
        );
        assert_eq!(
            lock_path_for(Path::new("/data/my.people.db")),
            PathBuf::from("/data/my.people.db.lock")
        );
    }

    #[test]
    fn test_lock_writes_and_removes_holder_file() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("people.duckdb");

        let guard = try_lock_exclusive(&db_path).unwrap();
        assert!(guard.lock_path().exists());
        let holder = guard.holder_path().unwrap().to_path_buf();
        let payload = fs::read_to_string(&holder).unwrap();
        assert!(payload.contains("people.duckdb"));

        drop(guard);
        assert!(!holder.exists());

        // Released locks can be re-acquired
        let _again = try_lock_exclusive(&db_path).unwrap();
    }

    #[test]
    fn test_lock_contention() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("people.duckdb");

        let _guard = try_lock_exclusive(&db_path).unwrap();
        let result = try_lock_exclusive(&db_path);
        assert!(matches!(result, Err(LockError::Locked(_))));
    }
}
