//! Error types for the sync layer.

use histsync_merge::LogError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in a sync cycle.
#[derive(Debug, Error)]
pub enum SyncError {
    /// No provider yielded a complete identity/secret/locator triple.
    #[error("credential error: {0}")]
    Credential(String),

    /// Transient transport failure (connection, DNS, HTTP 5xx).
    #[error("network error during {operation}: {message}")]
    Network {
        operation: &'static str,
        message: String,
    },

    /// A fetch or push exceeded its deadline.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// The remote rejected our credentials.
    #[error("authentication error: {0}")]
    Auth(String),

    /// The local repository is corrupt or cannot be initialized.
    #[error("repository error: {0}")]
    Repository(String),

    /// Another cycle holds the repository lock.
    #[error("repository is locked by another sync cycle ({})", path.display())]
    Locked { path: PathBuf, holder: Option<String> },

    /// The remote advanced between our fetch and push.
    #[error("push rejected: remote advanced concurrently")]
    PushConflict,

    /// Re-fetch and re-merge did not win the race within the attempt bound.
    #[error("push rejected {attempts} times by concurrent remote updates")]
    PushConflictExhausted { attempts: u32 },

    /// The shell kept appending to the history file while the cycle tried
    /// to replace it.
    #[error("history file changed {attempts} times during the sync cycle")]
    HistoryBusy { attempts: u32 },

    /// File system error.
    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A history snapshot could not be decoded.
    #[error(transparent)]
    Log(#[from] LogError),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Persisted sync state could not be (de)serialized.
    #[error("state serialization error: {0}")]
    State(#[from] serde_json::Error),
}

impl SyncError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Maps the error onto the reported taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Credential(_) => ErrorKind::Credential,
            SyncError::Network { .. } | SyncError::Timeout { .. } => ErrorKind::Network,
            SyncError::Auth(_) => ErrorKind::Auth,
            SyncError::PushConflict
            | SyncError::PushConflictExhausted { .. }
            | SyncError::HistoryBusy { .. } => {
                ErrorKind::PushConflict
            }
            SyncError::Repository(_)
            | SyncError::Locked { .. }
            | SyncError::Io { .. }
            | SyncError::Log(_)
            | SyncError::Config(_)
            | SyncError::State(_) => ErrorKind::Repository,
        }
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Network { .. } | SyncError::Timeout { .. })
    }
}

/// The error taxonomy carried by a [`crate::SyncReport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// No complete credential triple; the repository was never touched.
    Credential,
    /// Transient failure that outlived the retry budget.
    Network,
    /// Credentials rejected by the remote.
    Auth,
    /// Local store corrupt, locked, or unwritable.
    Repository,
    /// Concurrent updates outlasted the attempt bound.
    PushConflict,
}

impl ErrorKind {
    /// Fatal kinds cannot be fixed by running the next cycle.
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            ErrorKind::Credential | ErrorKind::Auth | ErrorKind::Repository
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Credential => "CredentialError",
            ErrorKind::Network => "NetworkError",
            ErrorKind::Auth => "AuthError",
            ErrorKind::Repository => "RepositoryError",
            ErrorKind::PushConflict => "PushConflictError",
        };
        f.write_str(name)
    }
}
