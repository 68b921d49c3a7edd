//! Single-flight lock over a repository directory.
//!
//! The lock is a file created with `create_new`, so at most one holder can
//! exist per directory. It is removed when the guard drops, which covers
//! normal return, early `?` exits and cancelled futures alike. Replacing a
//! stale lock goes through a second `create_new` marker so that only one
//! process performs the takeover.

use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Name of the lock file inside the repository directory.
pub const LOCK_FILE_NAME: &str = ".histsync.lock";

/// Metadata written into the lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockMeta {
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
}

/// Guard for an acquired repository lock.
#[derive(Debug)]
pub struct SyncLock {
    path: PathBuf,
    meta: LockMeta,
    released: bool,
}

impl SyncLock {
    /// Acquires the lock for `repo_dir`, creating the directory if needed.
    ///
    /// A lock older than `stale_after` is assumed to belong to a crashed
    /// process and is taken over.
    pub fn acquire(repo_dir: &Path, stale_after: Duration) -> SyncResult<Self> {
        fs::create_dir_all(repo_dir).map_err(|e| SyncError::io(repo_dir, e))?;
        let path = repo_dir.join(LOCK_FILE_NAME);
        let meta = LockMeta {
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };

        let file = match open_new(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => match read_meta(&path) {
                Some(holder) if is_stale(&holder, stale_after) => {
                    take_over(&path, &holder, stale_after)?
                }
                holder => {
                    return Err(SyncError::Locked {
                        path,
                        holder: holder.map(|h| format!("pid {} since {}", h.pid, h.acquired_at)),
                    });
                }
            },
            Err(e) => return Err(SyncError::io(&path, e)),
        };

        write_meta(file, &path, &meta)?;
        debug!("Acquired sync lock {:?}", path);
        Ok(Self {
            path,
            meta,
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn meta(&self) -> &LockMeta {
        &self.meta
    }

    /// Releases the lock, reporting removal failures.
    pub fn release(mut self) -> SyncResult<()> {
        self.released = true;
        fs::remove_file(&self.path).map_err(|e| SyncError::io(&self.path, e))
    }
}

impl Drop for SyncLock {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = fs::remove_file(&self.path) {
                warn!("Failed to remove sync lock {:?}: {}", self.path, e);
            }
        }
    }
}

/// Marker serializing takeovers of a stale lock.
struct TakeoverGuard {
    path: PathBuf,
}

impl TakeoverGuard {
    fn create(path: PathBuf) -> io::Result<Self> {
        open_new(&path)?;
        Ok(Self { path })
    }
}

impl Drop for TakeoverGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to remove takeover marker {:?}: {}", self.path, e);
        }
    }
}

/// Replaces the stale lock at `path` held by `stale`.
///
/// Only the process holding the takeover marker may remove the lock, and
/// only while it still holds the metadata judged stale.
fn take_over(path: &Path, stale: &LockMeta, stale_after: Duration) -> SyncResult<fs::File> {
    let marker = path.with_file_name(format!("{LOCK_FILE_NAME}.takeover"));
    let _guard = match TakeoverGuard::create(marker.clone()) {
        Ok(guard) => guard,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            clear_abandoned_marker(&marker, stale_after);
            return Err(lock_error(path, e));
        }
        Err(e) => return Err(SyncError::io(&marker, e)),
    };

    if read_meta(path).as_ref() != Some(stale) {
        debug!("Sync lock {:?} changed hands during takeover", path);
        return Err(SyncError::Locked {
            path: path.to_path_buf(),
            holder: None,
        });
    }
    warn!("Taking over stale sync lock {:?} ({:?})", path, stale);
    fs::remove_file(path).map_err(|e| SyncError::io(path, e))?;
    open_new(path).map_err(|e| lock_error(path, e))
}

/// Removes a takeover marker left behind by a process that died mid-takeover.
fn clear_abandoned_marker(marker: &Path, stale_after: Duration) {
    let age = fs::metadata(marker)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok());
    if age.is_some_and(|age| age >= stale_after) {
        warn!("Removing abandoned takeover marker {:?}", marker);
        if let Err(e) = fs::remove_file(marker) {
            warn!("Failed to remove {:?}: {}", marker, e);
        }
    }
}

fn open_new(path: &Path) -> io::Result<fs::File> {
    fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
}

fn lock_error(path: &Path, e: io::Error) -> SyncError {
    if e.kind() == io::ErrorKind::AlreadyExists {
        SyncError::Locked {
            path: path.to_path_buf(),
            holder: None,
        }
    } else {
        SyncError::io(path, e)
    }
}

fn write_meta(mut file: fs::File, path: &Path, meta: &LockMeta) -> SyncResult<()> {
    let bytes = serde_json::to_vec(meta)?;
    file.write_all(&bytes)
        .and_then(|()| file.sync_all())
        .map_err(|e| SyncError::io(path, e))
}

fn read_meta(path: &Path) -> Option<LockMeta> {
    let bytes = fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn is_stale(meta: &LockMeta, stale_after: Duration) -> bool {
    let Ok(limit) = ChronoDuration::from_std(stale_after) else {
        return false;
    };
    Utc::now().signed_duration_since(meta.acquired_at) > limit
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn second_acquire_fails_until_release() {
        let dir = TempDir::new().unwrap();
        let first = SyncLock::acquire(dir.path(), HOUR).unwrap();

        let err = SyncLock::acquire(dir.path(), HOUR).unwrap_err();
        assert!(matches!(err, SyncError::Locked { holder: Some(_), .. }));

        first.release().unwrap();
        assert!(SyncLock::acquire(dir.path(), HOUR).is_ok());
    }

    #[test]
    fn drop_removes_lock_file() {
        let dir = TempDir::new().unwrap();
        let path = {
            let lock = SyncLock::acquire(dir.path(), HOUR).unwrap();
            lock.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn stale_lock_is_taken_over() {
        let dir = TempDir::new().unwrap();
        let stale = LockMeta {
            pid: 1,
            acquired_at: Utc::now() - ChronoDuration::hours(2),
        };
        fs::write(
            dir.path().join(LOCK_FILE_NAME),
            serde_json::to_vec(&stale).unwrap(),
        )
        .unwrap();

        let lock = SyncLock::acquire(dir.path(), HOUR).unwrap();
        assert_eq!(lock.meta().pid, std::process::id());
    }

    fn write_stale_lock(dir: &Path) -> LockMeta {
        let stale = LockMeta {
            pid: 1,
            acquired_at: Utc::now() - ChronoDuration::hours(2),
        };
        fs::write(dir.join(LOCK_FILE_NAME), serde_json::to_vec(&stale).unwrap()).unwrap();
        stale
    }

    #[test]
    fn concurrent_takeover_backs_off() {
        let dir = TempDir::new().unwrap();
        let stale = write_stale_lock(dir.path());
        let marker = dir.path().join(format!("{LOCK_FILE_NAME}.takeover"));
        fs::write(&marker, b"").unwrap();

        let err = SyncLock::acquire(dir.path(), HOUR).unwrap_err();
        assert!(matches!(err, SyncError::Locked { holder: None, .. }));
        assert_eq!(read_meta(&dir.path().join(LOCK_FILE_NAME)), Some(stale));
        assert!(marker.exists());
    }

    #[test]
    fn lock_replaced_since_judged_stale_is_kept() {
        let dir = TempDir::new().unwrap();
        let stale = write_stale_lock(dir.path());
        let path = dir.path().join(LOCK_FILE_NAME);
        let fresh = LockMeta {
            pid: 2,
            acquired_at: Utc::now(),
        };
        fs::write(&path, serde_json::to_vec(&fresh).unwrap()).unwrap();

        let err = take_over(&path, &stale, HOUR).unwrap_err();
        assert!(matches!(err, SyncError::Locked { .. }));
        assert_eq!(read_meta(&path), Some(fresh));
        assert!(!dir.path().join(format!("{LOCK_FILE_NAME}.takeover")).exists());
    }

    #[test]
    fn abandoned_takeover_marker_is_cleared() {
        let dir = TempDir::new().unwrap();
        write_stale_lock(dir.path());
        let marker = dir.path().join(format!("{LOCK_FILE_NAME}.takeover"));
        fs::write(&marker, b"").unwrap();

        assert!(SyncLock::acquire(dir.path(), Duration::ZERO).is_err());
        assert!(!marker.exists());
        let lock = SyncLock::acquire(dir.path(), Duration::ZERO).unwrap();
        assert_eq!(lock.meta().pid, std::process::id());
    }

    #[test]
    fn unreadable_lock_is_never_stale() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(LOCK_FILE_NAME), b"garbage").unwrap();

        let err = SyncLock::acquire(dir.path(), Duration::ZERO).unwrap_err();
        assert!(matches!(err, SyncError::Locked { holder: None, .. }));
    }
}
