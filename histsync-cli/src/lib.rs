//! Argument parsing, default paths and exit codes for the `histsync` binary.

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use histsync_sync::{SyncConfig, SyncReport, SyncState};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "histsync")]
#[command(about = "Sync shell history across machines through a git repository")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one sync cycle
    Sync(SyncArgs),
    /// Run sync cycles periodically until interrupted
    Watch {
        #[command(flatten)]
        sync: SyncArgs,

        /// Seconds between cycles
        #[arg(long, default_value = "600")]
        interval_secs: u64,
    },
    /// Show the last recorded sync
    Status(PathArgs),
}

impl Command {
    /// Network timeout of the commands that talk to the remote.
    pub fn network_timeout(&self) -> Option<Duration> {
        match self {
            Command::Sync(sync) | Command::Watch { sync, .. } => {
                Some(Duration::from_secs(sync.timeout_secs))
            }
            Command::Status(_) => None,
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct PathArgs {
    /// Shell history file
    #[arg(long)]
    pub history: Option<PathBuf>,

    /// Sync repository directory
    #[arg(long)]
    pub repo: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
    #[command(flatten)]
    pub paths: PathArgs,

    /// Branch carrying the history
    #[arg(long, default_value = "main")]
    pub branch: String,

    /// Per-operation network timeout
    #[arg(long, default_value = "30")]
    pub timeout_secs: u64,

    /// Credential file (defaults to ~/.config/config.yaml)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Resolved locations of the history file and the sync repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryPaths {
    pub history: PathBuf,
    pub repo: PathBuf,
}

/// The parts of the environment that decide default paths.
#[derive(Debug, Clone, Default)]
pub struct PathEnv {
    pub windows: bool,
    pub appdata: Option<PathBuf>,
    pub histfile: Option<PathBuf>,
    pub home: Option<PathBuf>,
    pub data_local_dir: Option<PathBuf>,
}

impl PathEnv {
    /// Reads the current process environment.
    pub fn current() -> Self {
        let var = |key: &str| {
            std::env::var_os(key)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        };
        Self {
            windows: cfg!(windows),
            appdata: var("APPDATA"),
            histfile: var("HISTFILE"),
            home: dirs::home_dir(),
            data_local_dir: dirs::data_local_dir(),
        }
    }
}

/// Default history and repository locations.
///
/// On Windows the PSReadLine history directory doubles as the repository.
/// Elsewhere the history is `$HISTFILE` (or `~/.bash_history`) and the
/// repository lives under the local data directory.
pub fn default_paths(env: &PathEnv) -> Result<HistoryPaths> {
    if env.windows {
        let Some(appdata) = &env.appdata else {
            bail!("APPDATA is not set; pass --history and --repo");
        };
        let dir = appdata
            .join("Microsoft")
            .join("Windows")
            .join("PowerShell")
            .join("PSReadLine");
        return Ok(HistoryPaths {
            history: dir.join("ConsoleHost_history.txt"),
            repo: dir,
        });
    }

    let history = match (&env.histfile, &env.home) {
        (Some(histfile), _) => histfile.clone(),
        (None, Some(home)) => home.join(".bash_history"),
        (None, None) => bail!("cannot locate the history file; pass --history"),
    };
    let repo = match (&env.data_local_dir, &env.home) {
        (Some(data), _) => data.join("histsync").join("repo"),
        (None, Some(home)) => home.join(".local").join("share").join("histsync").join("repo"),
        (None, None) => bail!("cannot locate a data directory; pass --repo"),
    };
    Ok(HistoryPaths { history, repo })
}

impl PathArgs {
    /// Fills unset paths from the defaults.
    pub fn resolve(&self, env: &PathEnv) -> Result<HistoryPaths> {
        if let (Some(history), Some(repo)) = (&self.history, &self.repo) {
            return Ok(HistoryPaths {
                history: history.clone(),
                repo: repo.clone(),
            });
        }
        let defaults = default_paths(env)?;
        Ok(HistoryPaths {
            history: self.history.clone().unwrap_or(defaults.history),
            repo: self.repo.clone().unwrap_or(defaults.repo),
        })
    }
}

impl SyncArgs {
    /// Builds the engine configuration for these arguments.
    pub fn to_config(&self, env: &PathEnv) -> Result<SyncConfig> {
        let paths = self.paths.resolve(env)?;
        let mut config = SyncConfig::new(paths.history, paths.repo);
        config.branch = self.branch.clone();
        config.network_timeout = Duration::from_secs(self.timeout_secs);
        if let Some(file) = &self.config {
            config.config_file = file.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

/// Process exit code for a finished cycle: 0 on success (no-op included),
/// 1 for errors the next cycle may fix, 2 for fatal ones.
pub fn exit_code(report: &SyncReport) -> u8 {
    match report.error {
        None => 0,
        Some(kind) if kind.is_fatal() => 2,
        Some(_) => 1,
    }
}

/// One-line summary of a report.
pub fn summarize(report: &SyncReport) -> String {
    if let Some(kind) = report.error {
        let phase = report
            .failed_phase
            .map(|p| p.to_string())
            .unwrap_or_else(|| "?".to_string());
        let message = report.message.as_deref().unwrap_or("");
        return format!("{kind} during {phase}: {message}");
    }
    match (report.published, report.changed) {
        (true, _) => format!(
            "published +{} entries ({} total)",
            report.appended, report.entries
        ),
        (false, true) => format!("history updated from remote ({} entries)", report.entries),
        (false, false) => format!("up to date ({} entries)", report.entries),
    }
}

/// Human-readable rendering of the persisted state.
pub fn format_status(state: Option<&SyncState>) -> String {
    let Some(state) = state else {
        return "never synced".to_string();
    };
    let commit = state
        .commit
        .as_deref()
        .map(|c| c.get(..12).unwrap_or(c))
        .unwrap_or("-");
    format!(
        "last sync:  {}\nentries:    {}\npublished:  {}\ncommit:     {}\ndigest:     {}",
        state.synced_at.to_rfc3339(),
        state.entries,
        if state.published { "yes" } else { "no" },
        commit,
        state.digest
    )
}
