//! Merge reconciliation of a local and a remote snapshot.

use crate::log::HistoryLog;
use std::collections::HashSet;

/// Result of reconciling two snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// The merged log: remote order first, then local-only lines.
    pub log: HistoryLog,
    /// Number of local lines appended because the remote lacked them.
    pub appended: usize,
}

impl MergeOutcome {
    /// Returns true if the merged log is byte-identical to `other`.
    #[must_use]
    pub fn matches(&self, other: &HistoryLog) -> bool {
        self.log == *other
    }
}

/// Merges `local` into `remote`.
///
/// The remote sequence is emitted unchanged, then every local line that
/// appears nowhere in the remote is appended in its local relative order.
/// Lines are compared by exact text only.
#[must_use]
pub fn merge(local: &HistoryLog, remote: &HistoryLog) -> MergeOutcome {
    if remote.is_empty() {
        return MergeOutcome {
            log: local.clone(),
            appended: local.len(),
        };
    }

    let known: HashSet<&str> = remote.iter().collect();
    let mut lines = remote.lines().to_vec();
    let before = lines.len();
    lines.extend(
        local
            .iter()
            .filter(|line| !known.contains(line))
            .map(str::to_owned),
    );
    let appended = lines.len() - before;

    MergeOutcome {
        log: HistoryLog::from(lines),
        appended,
    }
}
