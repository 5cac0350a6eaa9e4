//! Append-only JSONL log of token usage and savings.
//!
//! Every append holds an exclusive advisory lock on the log file, so
//! concurrent processes never interleave partial lines.

use std::{
    collections::BTreeMap,
    fs::{self, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// One logged operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEntry {
    pub ts: String,
    pub op: String,
    #[serde(default)]
    pub used: u64,
    #[serde(default)]
    pub saved: u64,
    #[serde(default)]
    pub details: Value,
}

/// Cumulative totals over the whole log.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageReport {
    pub total_operations: usize,
    pub operations_by_type: BTreeMap<String, usize>,
    pub total_tokens_used: u64,
    pub total_tokens_saved: u64,
    pub baseline_tokens: u64,
    pub reduction_pct: f64,
}

#[derive(Debug, Clone)]
pub struct UsageLog {
    path: PathBuf,
}

impl UsageLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry under an exclusive lock.
    pub fn record(&self, op: &str, used: u64, saved: u64, details: Value) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let entry = UsageEntry {
            ts: chrono::Utc::now().to_rfc3339(),
            op: op.to_string(),
            used,
            saved,
            details,
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.lock_exclusive()?;
        let written = file.write_all(line.as_bytes()).and_then(|()| file.flush());
        let unlocked = FileExt::unlock(&file);
        written?;
        unlocked?;
        Ok(())
    }

    /// Totals over every parseable line. Unparseable lines are skipped.
    pub fn report(&self) -> Result<UsageReport> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(UsageReport::default());
            }
            Err(e) => return Err(e.into()),
        };

        let mut report = UsageReport::default();
        for line in BufReader::new(file).lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let entry: UsageEntry = match serde_json::from_str(line) {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(
                        log = %self.path.display(),
                        error = %e,
                        "Skipping malformed usage entry"
                    );
                    continue;
                }
            };
            report.total_operations += 1;
            report.total_tokens_used += entry.used;
            report.total_tokens_saved += entry.saved;
            *report.operations_by_type.entry(entry.op).or_default() += 1;
        }

        report.baseline_tokens = report.total_tokens_used + report.total_tokens_saved;
        let pct = report.total_tokens_saved as f64 / report.baseline_tokens.max(1) as f64;
        report.reduction_pct = (pct * 1000.0).round() / 10.0;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;

    #[test]
    fn empty_report_without_log() {
        let tmp = tempfile::tempdir().unwrap();
        let log = UsageLog::new(tmp.path().join("token_log.jsonl"));
        assert_eq!(log.report().unwrap(), UsageReport::default());
    }

    #[test]
    fn report_totals() {
        let tmp = tempfile::tempdir().unwrap();
        let log = UsageLog::new(tmp.path().join("nested").join("token_log.jsonl"));
        log.record("extract", 100, 900, json!({ "id": "pat/hammer" })).unwrap();
        log.record("search", 50, 0, Value::Null).unwrap();
        log.record("extract", 10, 90, json!({})).unwrap();

        let report = log.report().unwrap();
        assert_eq!(report.total_operations, 3);
        assert_eq!(report.operations_by_type["extract"], 2);
        assert_eq!(report.operations_by_type["search"], 1);
        assert_eq!(report.total_tokens_used, 160);
        assert_eq!(report.total_tokens_saved, 990);
        assert_eq!(report.baseline_tokens, 1150);
        assert_eq!(report.reduction_pct, 86.1);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("token_log.jsonl");
        std::fs::write(&path, "garbage\n\n").unwrap();
        let log = UsageLog::new(&path);
        log.record("get", 1, 3, Value::Null).unwrap();
        assert_eq!(log.report().unwrap().total_operations, 1);
    }

    #[test]
    fn concurrent_appends_stay_line_oriented() {
        let tmp = tempfile::tempdir().unwrap();
        let log = Arc::new(UsageLog::new(tmp.path().join("token_log.jsonl")));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    for i in 0..25 {
                        let details = json!({ "thread": t, "i": i, "pad": "x".repeat(512) });
                        log.record("extract", 1, 2, details).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let text = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(text.lines().count(), 200);
        for line in text.lines() {
            serde_json::from_str::<UsageEntry>(line).unwrap();
        }
        assert_eq!(log.report().unwrap().total_operations, 200);
    }
}
