//! Error types for log decoding.

use thiserror::Error;

/// Result type for log operations.
pub type LogResult<T> = Result<T, LogError>;

/// Errors that can occur while decoding a history snapshot.
#[derive(Debug, Error)]
pub enum LogError {
    /// The snapshot is not valid UTF-8.
    #[error("history is not valid UTF-8 (line {line})")]
    InvalidUtf8 { line: usize },
}
