//! Temp-file-then-rename writes for the local/tracked file pair.
//!
//! Both targets are fully written and fsynced to temp files in their own
//! directories before either is renamed into place. Dropping a
//! [`StagedWrite`] without committing removes the temp files and leaves the
//! targets untouched.

use crate::error::{SyncError, SyncResult};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

struct Staged {
    target: PathBuf,
    temp: NamedTempFile,
    previous: Option<Vec<u8>>,
}

/// Content staged for one or more targets, not yet visible.
pub struct StagedWrite {
    staged: Vec<Staged>,
}

impl StagedWrite {
    /// Writes `bytes` to a temp file next to every distinct target.
    pub fn stage(targets: &[&Path], bytes: &[u8]) -> SyncResult<Self> {
        let mut staged: Vec<Staged> = Vec::with_capacity(targets.len());
        for target in targets {
            if staged.iter().any(|s| s.target == *target) {
                continue;
            }
            let dir = parent_dir(target)?;
            fs::create_dir_all(dir).map_err(|e| SyncError::io(dir, e))?;

            let previous = match fs::read(target) {
                Ok(bytes) => Some(bytes),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => return Err(SyncError::io(*target, e)),
            };

            let mut temp = NamedTempFile::new_in(dir).map_err(|e| SyncError::io(dir, e))?;
            temp.write_all(bytes)
                .and_then(|()| temp.as_file().sync_all())
                .map_err(|e| SyncError::io(temp.path(), e))?;

            staged.push(Staged {
                target: target.to_path_buf(),
                temp,
                previous,
            });
        }
        Ok(Self { staged })
    }

    /// Number of distinct targets.
    pub fn len(&self) -> usize {
        self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Renames every temp file over its target.
    ///
    /// If a later rename fails, targets already replaced are restored to
    /// their previous content.
    pub fn commit(self) -> SyncResult<()> {
        let mut done: Vec<(PathBuf, Option<Vec<u8>>)> = Vec::new();
        for Staged {
            target,
            temp,
            previous,
        } in self.staged
        {
            if let Err(e) = temp.persist(&target) {
                let err = SyncError::io(&target, e.error);
                rollback(done);
                return Err(err);
            }
            debug!("Replaced {:?}", target);
            done.push((target, previous));
        }
        Ok(())
    }

    /// Like [`commit`](Self::commit), but only if `guard` still holds
    /// `expected` (a missing file reads as empty).
    ///
    /// Returns `Ok(false)` and discards the staged content when `guard`
    /// changed since it was read, e.g. the shell appended a command.
    pub fn commit_unless_changed(self, guard: &Path, expected: &[u8]) -> SyncResult<bool> {
        let current = match fs::read(guard) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(SyncError::io(guard, e)),
        };
        if current != expected {
            debug!("{:?} changed since it was read, not replacing", guard);
            return Ok(false);
        }
        self.commit()?;
        Ok(true)
    }
}

/// Stages and commits in one step.
pub fn write_pair(targets: &[&Path], bytes: &[u8]) -> SyncResult<()> {
    StagedWrite::stage(targets, bytes)?.commit()
}

fn rollback(done: Vec<(PathBuf, Option<Vec<u8>>)>) {
    for (target, previous) in done.into_iter().rev() {
        let restored = match previous {
            Some(bytes) => StagedWrite::stage(&[target.as_path()], &bytes).and_then(StagedWrite::commit),
            None => fs::remove_file(&target).map_err(|e| SyncError::io(&target, e)),
        };
        if let Err(e) = restored {
            warn!("Failed to restore {:?} after aborted write: {}", target, e);
        }
    }
}

fn parent_dir(target: &Path) -> SyncResult<&Path> {
    match target.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => Ok(dir),
        Some(_) => Ok(Path::new(".")),
        None => Err(SyncError::Config(format!(
            "{} has no parent directory",
            target.display()
        ))),
    }
}
