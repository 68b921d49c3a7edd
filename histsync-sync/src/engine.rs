//! Sync engine: one pull/merge/push reconciliation cycle per `run()`.
//!
//! A cycle walks `Idle → Resolving → Fetching → Merging → Deciding →
//! Committing → Pushing → Idle`; any step may divert to `Error`. Git work
//! runs on the blocking pool, network operations under a deadline. The
//! engine holds no repository state between cycles.

use crate::atomic::StagedWrite;
use crate::credentials::{ConfigFileProvider, Credential, CredentialResolver};
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::lock::SyncLock;
use crate::repository::{
    host_name, Deadline, RemoteSnapshot, RepositoryHandle, RepositoryManager, RepositorySettings,
};
use crate::retry::RetryPolicy;
use crate::state::SyncState;
use histsync_merge::{merge, HistoryLog};
use serde::Serialize;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

/// Times the history file may change under a cycle before it gives up.
const MAX_HISTORY_RACES: u32 = 5;

/// Configuration for the sync engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// The shell's history file.
    pub history_path: PathBuf,
    /// Working directory of the sync repository.
    pub repo_dir: PathBuf,
    /// File name inside the repository; defaults to the history file's name.
    pub tracked_file: Option<String>,
    /// Branch carrying the history.
    pub branch: String,
    /// Remote to fetch from and push to.
    pub remote_name: String,
    /// Budget for a single fetch or push.
    pub network_timeout: Duration,
    /// Backoff for transient network failures.
    pub retry: RetryPolicy,
    /// Fetch/merge/push rounds before a push conflict is reported.
    pub max_push_attempts: u32,
    /// Age after which a leftover lock is considered abandoned.
    pub lock_stale_after: Duration,
    /// YAML credential file consulted after the environment.
    pub config_file: PathBuf,
}

impl SyncConfig {
    /// Creates a configuration with default tuning for the given paths.
    pub fn new(history_path: impl Into<PathBuf>, repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            history_path: history_path.into(),
            repo_dir: repo_dir.into(),
            tracked_file: None,
            branch: "main".to_string(),
            remote_name: "origin".to_string(),
            network_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            max_push_attempts: 3,
            lock_stale_after: Duration::from_secs(30 * 60),
            config_file: ConfigFileProvider::default_path()
                .unwrap_or_else(|| PathBuf::from(".config").join("config.yaml")),
        }
    }

    /// The history's file name inside the repository.
    pub fn tracked_file(&self) -> String {
        self.tracked_file.clone().unwrap_or_else(|| {
            self.history_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "history.txt".to_string())
        })
    }

    /// `<repo_dir>/<tracked_file>`.
    pub fn tracked_path(&self) -> PathBuf {
        self.repo_dir.join(self.tracked_file())
    }

    pub fn repository_settings(&self) -> RepositorySettings {
        RepositorySettings {
            branch: self.branch.clone(),
            remote_name: self.remote_name.clone(),
            tracked_file: self.tracked_file(),
        }
    }

    /// Rejects configurations the engine cannot run safely.
    pub fn validate(&self) -> SyncResult<()> {
        if self.history_path.file_name().is_none() {
            return Err(SyncError::Config(format!(
                "history path {} does not name a file",
                self.history_path.display()
            )));
        }
        if self.repo_dir.as_os_str().is_empty() {
            return Err(SyncError::Config("repository directory is empty".into()));
        }

        let tracked = self.tracked_file();
        let mut components = Path::new(&tracked).components();
        let single_normal = matches!(components.next(), Some(Component::Normal(_)))
            && components.next().is_none();
        if !single_normal || tracked == ".git" {
            return Err(SyncError::Config(format!(
                "tracked file {tracked:?} must be a plain file name"
            )));
        }

        if self.branch.trim().is_empty() || self.remote_name.trim().is_empty() {
            return Err(SyncError::Config("branch and remote name must be set".into()));
        }
        if self.max_push_attempts == 0 {
            return Err(SyncError::Config("max_push_attempts must be at least 1".into()));
        }
        if self.network_timeout.is_zero() {
            return Err(SyncError::Config("network timeout must be positive".into()));
        }
        Ok(())
    }
}

/// Steps of a sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SyncPhase {
    Idle,
    Resolving,
    Fetching,
    Merging,
    Deciding,
    Committing,
    Pushing,
    Error,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Notified on every phase transition.
pub trait PhaseObserver: Send + Sync {
    fn on_phase(&self, phase: SyncPhase);
}

/// What the `Deciding` step concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Both files and the remote already hold the merged log.
    Unchanged,
    /// The remote already holds the merged log; only local files lag.
    LocalOnly,
    /// The merged log differs from the last published snapshot.
    Publish,
}

impl Decision {
    /// Compares the merged log against the remote snapshot digest and the
    /// raw bytes of the two local files.
    pub fn decide(
        merged: &HistoryLog,
        remote: &HistoryLog,
        local_bytes: &[u8],
        tracked_bytes: &[u8],
    ) -> Self {
        if merged.digest() != remote.digest() {
            return Decision::Publish;
        }
        let merged_bytes = merged.to_bytes();
        if local_bytes != merged_bytes.as_slice() || tracked_bytes != merged_bytes.as_slice() {
            Decision::LocalOnly
        } else {
            Decision::Unchanged
        }
    }
}

/// Outcome of one cycle, produced for the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// The history file was rewritten or a commit was published.
    pub changed: bool,
    /// A commit was pushed.
    pub published: bool,
    /// Failure kind, if the cycle aborted.
    pub error: Option<ErrorKind>,
    /// Failure description.
    pub message: Option<String>,
    /// Phase in which the cycle aborted.
    pub failed_phase: Option<SyncPhase>,
    /// Network retries plus conflict re-merges.
    pub retries_used: u32,
    /// Local-only entries added to the shared history.
    pub appended: usize,
    /// Entries in the merged log.
    pub entries: usize,
    /// Pushed commit id.
    pub commit: Option<String>,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    fn failed(err: &SyncError, phase: SyncPhase, retries_used: u32) -> Self {
        Self {
            error: Some(err.kind()),
            message: Some(err.to_string()),
            failed_phase: Some(phase),
            retries_used,
            ..Self::default()
        }
    }
}

#[derive(Debug, Default)]
struct CycleOutcome {
    changed: bool,
    published: bool,
    appended: usize,
    entries: usize,
    commit: Option<String>,
}

struct Cycle {
    phase: SyncPhase,
    retries: u32,
}

/// The sync engine.
pub struct SyncEngine {
    config: SyncConfig,
    credentials: CredentialResolver,
    repos: RepositoryManager,
    observer: Option<Arc<dyn PhaseObserver>>,
}

impl SyncEngine {
    /// Creates an engine resolving credentials from the environment, then
    /// the configured credential file.
    pub fn new(config: SyncConfig) -> SyncResult<Self> {
        let credentials = CredentialResolver::standard(config.config_file.clone());
        Self::with_credentials(config, credentials)
    }

    /// Creates an engine with a custom credential chain.
    pub fn with_credentials(
        config: SyncConfig,
        credentials: CredentialResolver,
    ) -> SyncResult<Self> {
        config.validate()?;
        let repos = RepositoryManager::new(config.repository_settings());
        Ok(Self {
            config,
            credentials,
            repos,
            observer: None,
        })
    }

    /// Sets the observer notified on phase transitions.
    pub fn set_phase_observer(&mut self, observer: Arc<dyn PhaseObserver>) {
        self.observer = Some(observer);
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Runs one cycle. Never panics on failure; the report carries the error.
    pub async fn run(&self) -> SyncReport {
        let mut cycle = Cycle {
            phase: SyncPhase::Idle,
            retries: 0,
        };

        match self.run_cycle(&mut cycle).await {
            Ok(outcome) => {
                self.enter(&mut cycle, SyncPhase::Idle);
                info!(
                    "Sync complete: changed={}, published={}, +{} entries, {} total, {} retries",
                    outcome.changed, outcome.published, outcome.appended, outcome.entries, cycle.retries
                );
                SyncReport {
                    changed: outcome.changed,
                    published: outcome.published,
                    retries_used: cycle.retries,
                    appended: outcome.appended,
                    entries: outcome.entries,
                    commit: outcome.commit,
                    ..SyncReport::default()
                }
            }
            Err(e) => {
                let phase = cycle.phase;
                self.enter(&mut cycle, SyncPhase::Error);
                error!("Sync failed during {} ({}): {}", phase, e.kind(), e);
                SyncReport::failed(&e, phase, cycle.retries)
            }
        }
    }

    fn enter(&self, cycle: &mut Cycle, phase: SyncPhase) {
        debug!("{} -> {}", cycle.phase, phase);
        cycle.phase = phase;
        if let Some(observer) = &self.observer {
            observer.on_phase(phase);
        }
    }

    async fn run_cycle(&self, cycle: &mut Cycle) -> SyncResult<CycleOutcome> {
        self.enter(cycle, SyncPhase::Resolving);
        let credential = self.credentials.resolve()?;
        let _lock = SyncLock::acquire(&self.config.repo_dir, self.config.lock_stale_after)?;

        let setup_credential = credential.clone();
        self.on_repo(move |repos, handle| {
            repos.ensure_remote(handle, &setup_credential)?;
            Ok(())
        })
        .await?;

        let mut attempt = 0;
        loop {
            attempt += 1;

            self.enter(cycle, SyncPhase::Fetching);
            let remote = self.fetch(&credential, cycle).await?;

            let mut races = 0;
            let (merged, commit) = loop {
                self.enter(cycle, SyncPhase::Merging);
                let local_bytes = read_optional(&self.config.history_path)?;
                let local = HistoryLog::parse(&local_bytes)?;
                let merged = merge(&local, &remote.log);
                let entries = merged.log.len();
                debug!(
                    "Merged {} local + {} remote entries into {} (+{})",
                    local.len(),
                    remote.log.len(),
                    entries,
                    merged.appended
                );

                self.enter(cycle, SyncPhase::Deciding);
                let tracked_bytes = read_optional(&self.config.tracked_path())?;
                let merged_bytes = merged.log.to_bytes();
                match Decision::decide(&merged.log, &remote.log, &local_bytes, &tracked_bytes) {
                    Decision::Unchanged => {
                        info!("History unchanged ({} entries), nothing to do", entries);
                        return Ok(CycleOutcome {
                            entries,
                            ..CycleOutcome::default()
                        });
                    }
                    Decision::LocalOnly => {
                        if !self.replace_files(&local_bytes, &merged_bytes)? {
                            self.history_raced(cycle, &mut races)?;
                            continue;
                        }
                        if let Some(tip) = remote.tip {
                            self.on_repo(move |repos, handle| repos.advance(handle, tip))
                                .await?;
                        }
                        let history_changed = local_bytes != merged_bytes;
                        if history_changed {
                            info!("Local history updated from remote ({} entries)", entries);
                        } else {
                            debug!("Repository copy refreshed, history file already current");
                        }
                        self.record_state(&merged.log, None);
                        return Ok(CycleOutcome {
                            changed: history_changed,
                            entries,
                            ..CycleOutcome::default()
                        });
                    }
                    Decision::Publish => {}
                }

                self.enter(cycle, SyncPhase::Committing);
                let message = commit_message(merged.appended, &host_name());
                let commit = {
                    let log = merged.log.clone();
                    let credential = credential.clone();
                    let parent = remote.tip;
                    self.on_repo(move |repos, handle| {
                        repos.commit(handle, &log, parent, &message, &credential)
                    })
                    .await?
                };
                // Both files change only once the commit object exists. A
                // commit orphaned by a race is never referenced.
                if !self.replace_files(&local_bytes, &merged_bytes)? {
                    self.history_raced(cycle, &mut races)?;
                    continue;
                }
                self.on_repo(move |repos, handle| repos.advance(handle, commit))
                    .await?;
                break (merged, commit);
            };

            self.enter(cycle, SyncPhase::Pushing);
            match self.push(&credential, cycle).await {
                Ok(()) => {
                    self.record_state(&merged.log, Some(commit.to_string()));
                    return Ok(CycleOutcome {
                        changed: true,
                        published: true,
                        appended: merged.appended,
                        entries: merged.log.len(),
                        commit: Some(commit.to_string()),
                    });
                }
                Err(SyncError::PushConflict) if attempt < self.config.max_push_attempts => {
                    warn!(
                        "Push rejected by a concurrent update (attempt {}/{}); re-fetching",
                        attempt, self.config.max_push_attempts
                    );
                    cycle.retries += 1;
                }
                Err(SyncError::PushConflict) => {
                    return Err(SyncError::PushConflictExhausted { attempts: attempt });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Writes `merged` to the history file and the repository copy, unless
    /// the history file no longer holds `expected`.
    fn replace_files(&self, expected: &[u8], merged: &[u8]) -> SyncResult<bool> {
        let history_path = &self.config.history_path;
        let tracked_path = self.config.tracked_path();
        StagedWrite::stage(&[history_path.as_path(), tracked_path.as_path()], merged)?
            .commit_unless_changed(history_path, expected)
    }

    /// Accounts for a history file that changed between read and write.
    fn history_raced(&self, cycle: &mut Cycle, races: &mut u32) -> SyncResult<()> {
        *races += 1;
        if *races >= MAX_HISTORY_RACES {
            return Err(SyncError::HistoryBusy { attempts: *races });
        }
        info!("History file changed during the cycle; merging again");
        cycle.retries += 1;
        Ok(())
    }

    async fn fetch(&self, credential: &Credential, cycle: &mut Cycle) -> SyncResult<RemoteSnapshot> {
        let attempted = self
            .config
            .retry
            .run("fetch", || {
                let credential = credential.clone();
                self.network("fetch", move |repos, handle, deadline| {
                    repos.fetch(handle, &credential, deadline)?;
                    repos.remote_snapshot(handle)
                })
            })
            .await;
        cycle.retries += attempted.retries;
        attempted.result
    }

    async fn push(&self, credential: &Credential, cycle: &mut Cycle) -> SyncResult<()> {
        let attempted = self
            .config
            .retry
            .run("push", || {
                let credential = credential.clone();
                self.network("push", move |repos, handle, deadline| {
                    repos.push(handle, &credential, deadline).map(|_| ())
                })
            })
            .await;
        cycle.retries += attempted.retries;
        attempted.result
    }

    /// Runs a network operation on a fresh handle under the configured
    /// deadline.
    ///
    /// On timeout the deadline is cancelled and the blocking task is still
    /// awaited, so no git work outlives the call (or the cycle's lock).
    async fn network<T, F>(&self, operation: &'static str, op: F) -> SyncResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&RepositoryManager, &RepositoryHandle, &Deadline) -> SyncResult<T>
            + Send
            + 'static,
    {
        let timeout = self.config.network_timeout;
        let deadline = Deadline::after(timeout);
        let watchdog = deadline.clone();

        let mut task = self.spawn_on_repo(move |repos, handle| op(repos, handle, &deadline));
        match tokio::time::timeout(timeout, &mut task).await {
            Ok(joined) => flatten(joined),
            Err(_) => {
                watchdog.cancel();
                debug!("{} exceeded {:?}; waiting for the transfer to stop", operation, timeout);
                if let Err(e) = flatten(task.await) {
                    debug!("{} stopped: {}", operation, e);
                }
                Err(SyncError::Timeout {
                    operation,
                    after: timeout,
                })
            }
        }
    }

    /// Runs `op` on the blocking pool against a freshly opened repository.
    async fn on_repo<T, F>(&self, op: F) -> SyncResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&RepositoryManager, &RepositoryHandle) -> SyncResult<T> + Send + 'static,
    {
        flatten(self.spawn_on_repo(op).await)
    }

    fn spawn_on_repo<T, F>(&self, op: F) -> JoinHandle<SyncResult<T>>
    where
        T: Send + 'static,
        F: FnOnce(&RepositoryManager, &RepositoryHandle) -> SyncResult<T> + Send + 'static,
    {
        let repos = self.repos.clone();
        let repo_dir = self.config.repo_dir.clone();
        tokio::task::spawn_blocking(move || {
            let handle = repos.open_or_init(&repo_dir)?;
            op(&repos, &handle)
        })
    }

    fn record_state(&self, log: &HistoryLog, commit: Option<String>) {
        let path = SyncState::path_for(&self.config.repo_dir);
        if let Err(e) = SyncState::new(&log.digest(), log.len(), commit).save(&path) {
            warn!("Failed to record sync state at {:?}: {}", path, e);
        }
    }
}

/// Human-readable commit message for a publication.
pub fn commit_message(appended: usize, host: &str) -> String {
    let noun = if appended == 1 { "entry" } else { "entries" };
    format!("histsync: +{appended} {noun} from {host}")
}

fn flatten<T>(joined: Result<SyncResult<T>, JoinError>) -> SyncResult<T> {
    joined.map_err(|e| SyncError::Repository(format!("repository task failed: {e}")))?
}

fn read_optional(path: &Path) -> SyncResult<Vec<u8>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(SyncError::io(path, e)),
    }
}
