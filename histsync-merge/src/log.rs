//! The history log: an ordered sequence of opaque lines.
//!
//! Entries are never mutated in place, only appended. The on-disk form is
//! newline-terminated UTF-8; CRLF line endings are accepted on input and
//! normalized to LF on output.

use crate::digest::SnapshotDigest;
use crate::error::{LogError, LogResult};

/// An ordered sequence of history entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct HistoryLog {
    lines: Vec<String>,
}

impl HistoryLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self { lines: Vec::new() }
    }

    /// Decodes a snapshot as read from disk or from a git blob.
    pub fn parse(bytes: &[u8]) -> LogResult<Self> {
        if bytes.is_empty() {
            return Ok(Self::new());
        }

        let body = bytes.strip_suffix(b"\n").unwrap_or(bytes);
        let mut lines = Vec::new();
        for (idx, raw) in body.split(|b| *b == b'\n').enumerate() {
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            let line = std::str::from_utf8(raw)
                .map_err(|_| LogError::InvalidUtf8 { line: idx + 1 })?;
            lines.push(line.to_owned());
        }
        Ok(Self { lines })
    }

    /// Encodes the log in its canonical on-disk form.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let capacity = self.lines.iter().map(|l| l.len() + 1).sum();
        let mut out = Vec::with_capacity(capacity);
        for line in &self.lines {
            out.extend_from_slice(line.as_bytes());
            out.push(b'\n');
        }
        out
    }

    /// SHA-256 of the canonical encoding.
    #[must_use]
    pub fn digest(&self) -> SnapshotDigest {
        SnapshotDigest::of(&self.to_bytes())
    }

    /// Appends an entry.
    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    /// Returns the entries in order.
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Returns an iterator over the entries.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    /// Returns true if any entry equals `line` exactly.
    #[must_use]
    pub fn contains(&self, line: &str) -> bool {
        self.lines.iter().any(|l| l == line)
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Returns true if the log has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }
}

impl<S: Into<String>> FromIterator<S> for HistoryLog {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            lines: iter.into_iter().map(Into::into).collect(),
        }
    }
}

impl From<Vec<String>> for HistoryLog {
    fn from(lines: Vec<String>) -> Self {
        Self { lines }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_bytes_parse_to_empty_log() {
        assert!(HistoryLog::parse(b"").unwrap().is_empty());
    }

    #[test]
    fn trailing_newline_is_optional() {
        let with = HistoryLog::parse(b"ls\ncd /tmp\n").unwrap();
        let without = HistoryLog::parse(b"ls\ncd /tmp").unwrap();
        assert_eq!(with, without);
        assert_eq!(with.lines(), ["ls", "cd /tmp"]);
    }

    #[test]
    fn crlf_is_normalized() {
        let log = HistoryLog::parse(b"Get-Item\r\nSet-Location C:\\\r\n").unwrap();
        assert_eq!(log.lines(), ["Get-Item", "Set-Location C:\\"]);
        assert_eq!(log.to_bytes(), b"Get-Item\nSet-Location C:\\\n");
    }

    #[test]
    fn blank_lines_are_entries() {
        let log = HistoryLog::parse(b"a\n\nb\n").unwrap();
        assert_eq!(log.len(), 3);
        assert_eq!(log.to_bytes(), b"a\n\nb\n");
    }

    #[test]
    fn invalid_utf8_reports_line() {
        let err = HistoryLog::parse(b"ok\n\xff\xfe\n").unwrap_err();
        assert!(matches!(err, LogError::InvalidUtf8 { line: 2 }));
    }
}
