//! History log model and merge reconciliation for histsync.
//!
//! This crate is pure: no I/O, no clocks, no randomness.
//!
//! - [`HistoryLog`]: an ordered, append-only sequence of opaque history lines
//! - [`merge`]: combines a local and a remote snapshot into one log
//! - [`SnapshotDigest`]: content hash used to detect no-op cycles
//!
//! The merge satisfies the following properties for all logs `L` and `R`:
//! - **Loss-free**: every line of `L` and `R` is present in `merge(L, R)`
//! - **Deduplicating**: a line present in both inputs is emitted once
//! - **Idempotent**: merge(L, L) == L
//! - **Deterministic**: identical inputs produce byte-identical output
//!
//! Lines are compared by exact text. The remote's ordering wins for shared
//! history, local-only lines are appended in their local order. Two
//! machines that append different lines between syncs converge on the same
//! set, but the relative order of those lines depends on which machine
//! published first.

mod digest;
mod error;
mod log;
mod reconcile;

pub use digest::SnapshotDigest;
pub use error::{LogError, LogResult};
pub use log::HistoryLog;
pub use reconcile::{merge, MergeOutcome};
