//! Credential resolution.
//!
//! Credentials come from an ordered chain of providers; the first provider
//! that yields a complete identity/secret/locator triple wins. The default
//! chain is the process environment followed by the YAML config file.
//! Nothing here writes credentials anywhere.

use crate::error::{SyncError, SyncResult};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Environment variable carrying the remote identity.
pub const ENV_USERNAME: &str = "GIT_USERNAME";
/// Environment variable carrying the access token.
pub const ENV_TOKEN: &str = "GIT_TOKEN";
/// Environment variable carrying the remote locator.
pub const ENV_REPO: &str = "GIT_REPO";

/// Where a credential was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Environment,
    ConfigFile,
}

/// An authenticated identity for remote operations.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// Username presented to the remote.
    pub identity: String,
    /// Token or password. Never logged.
    pub secret: String,
    /// Remote repository locator (`host/owner/repo.git`, URL, or path).
    pub locator: String,
    /// Provider that produced this credential.
    pub source: CredentialSource,
}

impl Credential {
    /// Builds a credential if all three parts are non-empty.
    pub fn complete(
        identity: impl Into<String>,
        secret: impl Into<String>,
        locator: impl Into<String>,
        source: CredentialSource,
    ) -> Option<Self> {
        let (identity, secret, locator) = (identity.into(), secret.into(), locator.into());
        if identity.trim().is_empty() || secret.trim().is_empty() || locator.trim().is_empty() {
            return None;
        }
        Some(Self {
            identity: identity.trim().to_string(),
            secret: secret.trim().to_string(),
            locator: locator.trim().to_string(),
            source,
        })
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("identity", &self.identity)
            .field("secret", &"<redacted>")
            .field("locator", &self.locator)
            .field("source", &self.source)
            .finish()
    }
}

/// A source capable of supplying a complete credential triple.
pub trait CredentialProvider: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Returns `Ok(None)` when this source has no complete triple.
    fn provide(&self) -> SyncResult<Option<Credential>>;
}

type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Reads `GIT_USERNAME`, `GIT_TOKEN` and `GIT_REPO`.
pub struct EnvProvider {
    lookup: EnvLookup,
}

impl EnvProvider {
    /// Reads the process environment.
    pub fn new() -> Self {
        Self::with_lookup(|key| std::env::var(key).ok())
    }

    /// Reads variables through `lookup` instead of the process environment.
    pub fn with_lookup(lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        Self {
            lookup: Box::new(lookup),
        }
    }
}

impl Default for EnvProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialProvider for EnvProvider {
    fn name(&self) -> &'static str {
        "environment"
    }

    fn provide(&self) -> SyncResult<Option<Credential>> {
        let get = |key: &str| (self.lookup)(key).unwrap_or_default();
        Ok(Credential::complete(
            get(ENV_USERNAME),
            get(ENV_TOKEN),
            get(ENV_REPO),
            CredentialSource::Environment,
        ))
    }
}

/// On-disk credential document.
///
/// ```yaml
/// git:
///   username: octocat
///   token: ghp_xxx
///   repo: github.com/octocat/history.git
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct CredentialFile {
    #[serde(default)]
    pub git: GitSection,
}

/// The `git` section of the credential document.
#[derive(Debug, Default, Deserialize)]
pub struct GitSection {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub repo: String,
}

impl CredentialFile {
    /// Parses a YAML credential document.
    pub fn parse(contents: &str) -> SyncResult<Self> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(contents).map_err(|e| SyncError::Config(format!("invalid YAML: {e}")))
    }
}

/// Reads the `git.username`/`git.token`/`git.repo` triple from a YAML file.
pub struct ConfigFileProvider {
    path: PathBuf,
}

impl ConfigFileProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<home>/.config/config.yaml`, if a home directory is known.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config").join("config.yaml"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialProvider for ConfigFileProvider {
    fn name(&self) -> &'static str {
        "config file"
    }

    fn provide(&self) -> SyncResult<Option<Credential>> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No credential file at {:?}", self.path);
                return Ok(None);
            }
            Err(e) => return Err(SyncError::io(&self.path, e)),
        };

        let file = CredentialFile::parse(&contents)?;
        Ok(Credential::complete(
            file.git.username,
            file.git.token,
            file.git.repo,
            CredentialSource::ConfigFile,
        ))
    }
}

/// Tries providers in priority order.
pub struct CredentialResolver {
    providers: Vec<Box<dyn CredentialProvider>>,
}

impl CredentialResolver {
    /// Creates a resolver with no providers.
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    /// The standard chain: environment, then the given config file.
    pub fn standard(config_file: impl Into<PathBuf>) -> Self {
        Self::new()
            .with_provider(EnvProvider::new())
            .with_provider(ConfigFileProvider::new(config_file))
    }

    /// Appends a provider with lower priority than all existing ones.
    pub fn with_provider(mut self, provider: impl CredentialProvider + 'static) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    /// Names of the providers, highest priority first.
    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Returns the first complete credential.
    pub fn resolve(&self) -> SyncResult<Credential> {
        let mut problems = Vec::new();
        for provider in &self.providers {
            match provider.provide() {
                Ok(Some(credential)) => {
                    info!("Credentials loaded from {}", provider.name());
                    return Ok(credential);
                }
                Ok(None) => debug!("{} has no complete credential", provider.name()),
                Err(e) => {
                    warn!("Credential provider {} failed: {}", provider.name(), e);
                    problems.push(format!("{}: {e}", provider.name()));
                }
            }
        }

        let tried = self.provider_names().join(", ");
        let mut message = format!("no complete username/token/repo triple (tried: {tried})");
        if !problems.is_empty() {
            message.push_str(&format!("; {}", problems.join("; ")));
        }
        Err(SyncError::Credential(message))
    }
}

impl Default for CredentialResolver {
    fn default() -> Self {
        Self::new()
    }
}
