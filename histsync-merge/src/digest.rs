//! Snapshot content hashes.

use sha2::{Digest, Sha256};
use std::fmt;

/// Hex-encoded SHA-256 of a log's canonical encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotDigest(String);

impl SnapshotDigest {
    /// Hashes raw snapshot bytes.
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hex::encode(hasher.finalize()))
    }

    /// Wraps a previously persisted hex digest.
    #[must_use]
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
