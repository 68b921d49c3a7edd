//! Git-backed sync engine for shell history.
//!
//! Keeps a shell's append-only history file consistent across machines by
//! using a git repository as transport. Every machine pulls the shared log,
//! merges it with its local file, and pushes the result back.
//!
//! ## Components
//!
//! - **Credentials**: resolves identity, secret and remote locator from an
//!   ordered chain of providers (environment, then a YAML config file)
//! - **Repository**: opens or initializes the local repository and performs
//!   fetch, commit and push through `git2`
//! - **Engine**: runs one reconciliation cycle under a single-flight lock and
//!   reports the outcome as a [`SyncReport`]
//!
//! ## Sync Cycle
//!
//! 1. **Resolving**: gather credentials; nothing is touched without them
//! 2. **Fetching**: download the remote sync branch, with retry and backoff
//! 3. **Merging**: combine remote and local logs without losing lines
//! 4. **Deciding**: skip all writes if nothing changed
//! 5. **Committing**: write a linear commit and both files atomically
//! 6. **Pushing**: fast-forward push; a rejection re-enters at step 2
//!
//! # Example
//!
//! ```no_run
//! use histsync_sync::{SyncConfig, SyncEngine};
//!
//! # async fn demo() -> Result<(), histsync_sync::SyncError> {
//! let config = SyncConfig::new("/home/me/.bash_history", "/home/me/.local/share/histsync/repo");
//! let engine = SyncEngine::new(config)?;
//!
//! let report = engine.run().await;
//! if let Some(kind) = report.error {
//!     eprintln!("sync failed: {kind}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod atomic;
pub mod credentials;
mod engine;
mod error;
pub mod lock;
pub mod repository;
pub mod retry;
pub mod state;

pub use credentials::{
    ConfigFileProvider, Credential, CredentialProvider, CredentialResolver, CredentialSource,
    EnvProvider,
};
pub use engine::{
    commit_message, Decision, PhaseObserver, SyncConfig, SyncEngine, SyncPhase, SyncReport,
};
pub use error::{ErrorKind, SyncError, SyncResult};
pub use lock::SyncLock;
pub use repository::{RepositoryHandle, RepositoryManager, RepositorySettings};
pub use retry::RetryPolicy;
pub use state::SyncState;
