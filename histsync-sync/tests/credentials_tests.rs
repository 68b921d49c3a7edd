use histsync_sync::credentials::{CredentialFile, ENV_REPO, ENV_TOKEN, ENV_USERNAME};
use histsync_sync::{
    ConfigFileProvider, Credential, CredentialProvider, CredentialResolver, CredentialSource,
    EnvProvider, SyncError, SyncResult,
};
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::path::Path;
use tempfile::TempDir;

fn env(vars: &[(&str, &str)]) -> EnvProvider {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    EnvProvider::with_lookup(move |key| vars.get(key).cloned())
}

fn write_config(dir: &Path, contents: &str) -> std::path::PathBuf {
    let path = dir.join("config.yaml");
    std::fs::write(&path, contents).unwrap();
    path
}

const FULL_CONFIG: &str = "\
git:
  username: file-user
  token: file-token
  repo: github.com/file-user/history.git
";

struct Failing;

impl CredentialProvider for Failing {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn provide(&self) -> SyncResult<Option<Credential>> {
        Err(SyncError::Config("vault unreachable".into()))
    }
}

// ── Credential ───────────────────────────────────────────────────

#[test]
fn complete_requires_all_three_parts() {
    assert!(Credential::complete("u", "t", "r", CredentialSource::Environment).is_some());
    assert!(Credential::complete("", "t", "r", CredentialSource::Environment).is_none());
    assert!(Credential::complete("u", "  ", "r", CredentialSource::Environment).is_none());
    assert!(Credential::complete("u", "t", "", CredentialSource::Environment).is_none());
}

#[test]
fn complete_trims_whitespace() {
    let cred = Credential::complete(" u ", "t\n", " r", CredentialSource::ConfigFile).unwrap();
    assert_eq!(cred.identity, "u");
    assert_eq!(cred.secret, "t");
    assert_eq!(cred.locator, "r");
}

#[test]
fn debug_never_shows_secret() {
    let cred = Credential::complete("u", "hunter2", "r", CredentialSource::Environment).unwrap();
    let shown = format!("{cred:?}");
    assert!(!shown.contains("hunter2"));
    assert!(shown.contains("redacted"));
}

// ── Providers ────────────────────────────────────────────────────

#[test]
fn env_provider_reads_all_three() {
    let provider = env(&[
        (ENV_USERNAME, "me"),
        (ENV_TOKEN, "tok"),
        (ENV_REPO, "github.com/me/h.git"),
    ]);
    let cred = provider.provide().unwrap().unwrap();
    assert_eq!(cred.identity, "me");
    assert_eq!(cred.source, CredentialSource::Environment);
}

#[test]
fn env_provider_partial_is_none() {
    let provider = env(&[(ENV_USERNAME, "me")]);
    assert!(provider.provide().unwrap().is_none());
}

#[test]
fn config_file_provider_reads_git_section() {
    let dir = TempDir::new().unwrap();
    let provider = ConfigFileProvider::new(write_config(dir.path(), FULL_CONFIG));

    let cred = provider.provide().unwrap().unwrap();
    assert_eq!(cred.identity, "file-user");
    assert_eq!(cred.secret, "file-token");
    assert_eq!(cred.locator, "github.com/file-user/history.git");
    assert_eq!(cred.source, CredentialSource::ConfigFile);
}

#[test]
fn missing_config_file_is_none() {
    let dir = TempDir::new().unwrap();
    let provider = ConfigFileProvider::new(dir.path().join("absent.yaml"));
    assert!(provider.provide().unwrap().is_none());
}

#[test]
fn config_file_without_git_section_is_none() {
    let dir = TempDir::new().unwrap();
    let provider = ConfigFileProvider::new(write_config(dir.path(), "editor: vim\n"));
    assert!(provider.provide().unwrap().is_none());
}

#[test]
fn malformed_config_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let provider = ConfigFileProvider::new(write_config(dir.path(), "git: [unclosed\n"));
    assert!(matches!(provider.provide(), Err(SyncError::Config(_))));
}

#[test]
fn empty_credential_file_parses_to_default() {
    let file = CredentialFile::parse("").unwrap();
    assert!(file.git.username.is_empty());
}

// ── Resolver ─────────────────────────────────────────────────────

#[test]
fn environment_overrides_config_file() {
    let dir = TempDir::new().unwrap();
    let resolver = CredentialResolver::new()
        .with_provider(env(&[
            (ENV_USERNAME, "env-user"),
            (ENV_TOKEN, "env-token"),
            (ENV_REPO, "github.com/env-user/h.git"),
        ]))
        .with_provider(ConfigFileProvider::new(write_config(dir.path(), FULL_CONFIG)));

    let cred = resolver.resolve().unwrap();
    assert_eq!(cred.identity, "env-user");
    assert_eq!(cred.source, CredentialSource::Environment);
}

#[test]
fn partial_environment_falls_back_to_config_file() {
    let dir = TempDir::new().unwrap();
    let resolver = CredentialResolver::new()
        .with_provider(env(&[(ENV_USERNAME, "env-user")]))
        .with_provider(ConfigFileProvider::new(write_config(dir.path(), FULL_CONFIG)));

    let cred = resolver.resolve().unwrap();
    assert_eq!(cred.identity, "file-user");
    assert_eq!(cred.source, CredentialSource::ConfigFile);
}

#[test]
fn incomplete_everywhere_is_a_credential_error() {
    let dir = TempDir::new().unwrap();
    let partial = "git:\n  username: file-user\n  repo: github.com/x/h.git\n";
    let resolver = CredentialResolver::new()
        .with_provider(env(&[(ENV_USERNAME, "env-user")]))
        .with_provider(ConfigFileProvider::new(write_config(dir.path(), partial)));

    let err = resolver.resolve().unwrap_err();
    assert!(matches!(err, SyncError::Credential(_)));
    assert!(err.to_string().contains("environment, config file"));
}

#[test]
fn failing_provider_does_not_block_later_ones() {
    let resolver = CredentialResolver::new().with_provider(Failing).with_provider(env(&[
        (ENV_USERNAME, "me"),
        (ENV_TOKEN, "tok"),
        (ENV_REPO, "r"),
    ]));
    assert_eq!(resolver.resolve().unwrap().identity, "me");
}

#[test]
fn provider_failures_are_reported() {
    let resolver = CredentialResolver::new().with_provider(Failing);
    let err = resolver.resolve().unwrap_err();
    assert!(err.to_string().contains("vault unreachable"));
}

#[test]
fn standard_chain_order() {
    let resolver = CredentialResolver::standard("/nonexistent/config.yaml");
    assert_eq!(resolver.provider_names(), vec!["environment", "config file"]);
}
