//! Shared fixtures for sync tests: bare remotes and simulated machines.

#![allow(dead_code)]

use git2::{Oid, Repository, Signature};
use histsync_sync::{CredentialResolver, EnvProvider, RetryPolicy, SyncConfig, SyncEngine};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

pub const TRACKED: &str = "history.txt";
pub const BRANCH_REF: &str = "refs/heads/main";

/// A bare repository standing in for the shared remote.
pub struct Remote {
    dir: TempDir,
}

impl Remote {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        Repository::init_bare(dir.path()).unwrap();
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn locator(&self) -> String {
        self.path().to_str().unwrap().to_string()
    }

    fn open(&self) -> Repository {
        Repository::open_bare(self.path()).unwrap()
    }

    pub fn tip(&self) -> Option<Oid> {
        self.open().refname_to_id(BRANCH_REF).ok()
    }

    pub fn commit_count(&self) -> usize {
        let repo = self.open();
        let Ok(tip) = repo.refname_to_id(BRANCH_REF) else {
            return 0;
        };
        let mut walk = repo.revwalk().unwrap();
        walk.push(tip).unwrap();
        walk.count()
    }

    pub fn tip_message(&self) -> String {
        let repo = self.open();
        let tip = repo.refname_to_id(BRANCH_REF).unwrap();
        repo.find_commit(tip).unwrap().message().unwrap().to_string()
    }

    pub fn file(&self, name: &str) -> Option<String> {
        let repo = self.open();
        let tip = repo.refname_to_id(BRANCH_REF).ok()?;
        let tree = repo.find_commit(tip).unwrap().tree().unwrap();
        let entry = tree.get_name(name)?;
        let blob = entry.to_object(&repo).unwrap().peel_to_blob().unwrap();
        Some(String::from_utf8(blob.content().to_vec()).unwrap())
    }

    pub fn history(&self) -> Option<String> {
        self.file(TRACKED)
    }

    /// Publishes `contents` as another machine would: a commit on top of
    /// the current tip, written straight into the bare repository.
    pub fn publish(&self, name: &str, contents: &str) -> Oid {
        let repo = self.open();
        let parent = repo
            .refname_to_id(BRANCH_REF)
            .ok()
            .map(|oid| repo.find_commit(oid).unwrap());
        let parent_tree = parent.as_ref().map(|c| c.tree().unwrap());

        let blob = repo.blob(contents.as_bytes()).unwrap();
        let mut builder = repo.treebuilder(parent_tree.as_ref()).unwrap();
        builder.insert(name, blob, 0o100644).unwrap();
        let tree = repo.find_tree(builder.write().unwrap()).unwrap();

        let sig = Signature::now("Other Machine", "other@test.com").unwrap();
        let parents: Vec<_> = parent.iter().collect();
        repo.commit(Some(BRANCH_REF), &sig, &sig, "other machine", &tree, &parents)
            .unwrap()
    }

    pub fn publish_history(&self, contents: &str) -> Oid {
        self.publish(TRACKED, contents)
    }
}

/// One machine: a history file and a sync repository directory.
pub struct Machine {
    dir: TempDir,
}

impl Machine {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn history_path(&self) -> PathBuf {
        self.root().join("shell").join(".bash_history")
    }

    pub fn repo_dir(&self) -> PathBuf {
        self.root().join("repo")
    }

    pub fn tracked_path(&self) -> PathBuf {
        self.repo_dir().join(TRACKED)
    }

    pub fn write_history(&self, contents: &[u8]) {
        let path = self.history_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    pub fn history(&self) -> Option<String> {
        std::fs::read_to_string(self.history_path()).ok()
    }

    pub fn tracked(&self) -> Option<String> {
        std::fs::read_to_string(self.tracked_path()).ok()
    }

    /// Fast, test-sized configuration syncing against `remote`.
    pub fn config(&self) -> SyncConfig {
        let mut config = SyncConfig::new(self.history_path(), self.repo_dir());
        config.tracked_file = Some(TRACKED.to_string());
        config.network_timeout = Duration::from_secs(30);
        config.retry = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        };
        config.config_file = self.root().join("no-such-config.yaml");
        config
    }

    pub fn engine(&self, remote: &Remote) -> SyncEngine {
        self.engine_with(self.config(), remote)
    }

    pub fn engine_with(&self, config: SyncConfig, remote: &Remote) -> SyncEngine {
        SyncEngine::with_credentials(config, env_resolver("tester", "s3cret", &remote.locator()))
            .unwrap()
    }
}

/// A resolver whose environment holds exactly the given triple.
pub fn env_resolver(user: &str, token: &str, repo: &str) -> CredentialResolver {
    let vars = vec![
        ("GIT_USERNAME".to_string(), user.to_string()),
        ("GIT_TOKEN".to_string(), token.to_string()),
        ("GIT_REPO".to_string(), repo.to_string()),
    ];
    CredentialResolver::new().with_provider(EnvProvider::with_lookup(move |key| {
        vars.iter()
            .find(|(k, v)| k == key && !v.is_empty())
            .map(|(_, v)| v.clone())
    }))
}
