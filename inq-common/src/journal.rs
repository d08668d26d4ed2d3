//! Append-only admission journal.
//!
//! One JSONL record per finalized upload, written next to the processed
//! queue. The journal is best-effort observability: a write failure is
//! logged and swallowed, never surfaced to the admission run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionRecord {
    pub finished_at: DateTime<Utc>,
    pub package: String,
    pub version: String,
    pub distribution: String,
    pub succeeded: bool,
    /// Outcome label, e.g. "success" or "file missing".
    pub outcome: String,
    /// Failure reason, when there is one worth keeping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Append one record. The file is created on first use.
    pub fn record(&self, record: &AdmissionRecord) -> std::io::Result<()> {
        let line = serde_json::to_string(record).map_err(std::io::Error::other)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(package: &str, succeeded: bool) -> AdmissionRecord {
        AdmissionRecord {
            finished_at: Utc::now(),
            package: package.to_string(),
            version: "1.0-1".to_string(),
            distribution: "chaos".to_string(),
            succeeded,
            outcome: if succeeded { "success" } else { "file missing" }.to_string(),
            detail: (!succeeded).then(|| "Cannot find file".to_string()),
        }
    }

    #[test]
    fn records_append_as_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::new(dir.path().join("admissions.jsonl"));
        journal.record(&record("foo", true)).unwrap();
        journal.record(&record("bar", false)).unwrap();

        let text = std::fs::read_to_string(journal.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: AdmissionRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.package, "foo");
        assert!(first.succeeded);
        let second: AdmissionRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.detail.as_deref(), Some("Cannot find file"));
    }

    #[test]
    fn unwritable_path_is_an_error_not_a_panic() {
        let journal = Journal::new(PathBuf::from("/nonexistent/dir/admissions.jsonl"));
        assert!(journal.record(&record("foo", true)).is_err());
    }
}
