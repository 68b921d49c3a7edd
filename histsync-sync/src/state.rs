//! Persisted record of the last completed cycle.
//!
//! Stored as JSON inside the repository's git directory so it never shows
//! up in the working tree. It is informational: a missing or unreadable
//! state file never fails a cycle.

use crate::atomic::write_pair;
use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use histsync_merge::SnapshotDigest;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name of the state record inside `.git`.
pub const STATE_FILE_NAME: &str = "histsync-state.json";

/// Summary of the last cycle that wrote anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// Digest of the merged log both files now hold.
    pub digest: String,
    /// Number of entries in the merged log.
    pub entries: usize,
    /// Commit pushed by this machine, if the cycle published.
    pub commit: Option<String>,
    /// Whether the cycle pushed a commit.
    pub published: bool,
    pub synced_at: DateTime<Utc>,
}

impl SyncState {
    pub fn new(digest: &SnapshotDigest, entries: usize, commit: Option<String>) -> Self {
        Self {
            digest: digest.to_string(),
            entries,
            published: commit.is_some(),
            commit,
            synced_at: Utc::now(),
        }
    }

    /// `<repo_dir>/.git/histsync-state.json`.
    pub fn path_for(repo_dir: &Path) -> PathBuf {
        repo_dir.join(".git").join(STATE_FILE_NAME)
    }

    pub fn digest(&self) -> SnapshotDigest {
        SnapshotDigest::from_hex(self.digest.clone())
    }

    /// Loads the record, returning `None` if it does not exist.
    pub fn load(path: &Path) -> SyncResult<Option<Self>> {
        match std::fs::read(path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SyncError::io(path, e)),
        }
    }

    pub fn save(&self, path: &Path) -> SyncResult<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        write_pair(&[path], &bytes)
    }
}
