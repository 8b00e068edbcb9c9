//! Append-only result log
//!
//! Every finished, failed, or skipped action appends one entry. Workers
//! append concurrently; entries are written as JSON lines when a file sink
//! is attached. [`LogQuery`] selects entries by time window, node and role.

use crate::error::Result;
use crate::types::{ActionOutcome, ActionReport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// One record in the result log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub action_id: String,
    /// Node the action ran against
    #[serde(default)]
    pub node: String,
    /// Address of that node when the action ran
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub role: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: ActionOutcome,
}

impl From<&ActionReport> for LogEntry {
    fn from(report: &ActionReport) -> Self {
        Self {
            action_id: report.action_id.clone(),
            node: report.node.clone(),
            address: report.address.clone(),
            role: report.role.clone(),
            started_at: report.started_at,
            finished_at: report.finished_at,
            outcome: report.outcome.clone(),
        }
    }
}

/// Filter over result log entries
///
/// Bounds apply to `finished_at` and are inclusive. Empty `nodes`/`roles`
/// match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogQuery {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub nodes: Vec<String>,
    pub roles: Vec<String>,
}

impl LogQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn node(mut self, node: impl Into<String>) -> Self {
        self.nodes.push(node.into());
        self
    }

    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    pub fn matches(&self, entry: &LogEntry) -> bool {
        self.since.is_none_or(|since| entry.finished_at >= since)
            && self.until.is_none_or(|until| entry.finished_at <= until)
            && (self.nodes.is_empty() || self.nodes.contains(&entry.node))
            && (self.roles.is_empty() || self.roles.contains(&entry.role))
    }

    /// Matching entries, ordered by `finished_at`
    ///
    /// The sort is stable, so entries finishing at the same instant keep
    /// their log order.
    pub fn apply(&self, entries: impl IntoIterator<Item = LogEntry>) -> Vec<LogEntry> {
        let mut selected: Vec<LogEntry> = entries.into_iter().filter(|e| self.matches(e)).collect();
        selected.sort_by_key(|e| e.finished_at);
        selected
    }
}

struct Inner {
    entries: Vec<LogEntry>,
    sink: Option<File>,
}

/// Append-only, thread-safe action result log
pub struct ResultLog {
    inner: Mutex<Inner>,
    path: Option<PathBuf>,
}

impl ResultLog {
    /// A log that only keeps entries in memory
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: Vec::new(),
                sink: None,
            }),
            path: None,
        }
    }

    /// Open (or create) a JSON-lines log file in append mode
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        log::debug!("Appending action results to {}", path.display());

        Ok(Self {
            inner: Mutex::new(Inner {
                entries: Vec::new(),
                sink: Some(file),
            }),
            path: Some(path.to_path_buf()),
        })
    }

    /// File backing this log, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Append an entry
    ///
    /// The entry is kept in memory even when writing to the file fails.
    pub fn append(&self, entry: LogEntry) -> Result<()> {
        let mut inner = self.lock();
        let written = match inner.sink.as_mut() {
            Some(file) => {
                let mut line = serde_json::to_string(&entry).map_err(std::io::Error::other)?;
                line.push('\n');
                file.write_all(line.as_bytes()).and_then(|()| file.flush())
            }
            None => Ok(()),
        };
        inner.entries.push(entry);
        Ok(written?)
    }

    /// Entries appended through this handle, in append order
    pub fn entries(&self) -> Vec<LogEntry> {
        self.lock().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read every entry from a JSON-lines log file
    pub fn read(path: &Path) -> Result<Vec<LogEntry>> {
        let file = File::open(path)?;
        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry = serde_json::from_str(&line).map_err(std::io::Error::other)?;
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Read the entries of a log file that match `query`
    pub fn query(path: &Path, query: &LogQuery) -> Result<Vec<LogEntry>> {
        Ok(query.apply(Self::read(path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use chrono::TimeZone;
    use std::sync::Arc;
    use std::thread;

    fn entry(id: &str, outcome: ActionOutcome) -> LogEntry {
        let now = Utc::now();
        LogEntry {
            action_id: id.to_string(),
            node: "n1".to_string(),
            address: "10.0.0.1".to_string(),
            role: "db".to_string(),
            started_at: now,
            finished_at: now,
            outcome,
        }
    }

    #[test]
    fn test_concurrent_appends_are_all_kept() {
        let log = Arc::new(ResultLog::in_memory());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let log = Arc::clone(&log);
                thread::spawn(move || {
                    for i in 0..25 {
                        log.append(entry(&format!("a{t}-{i}"), ActionOutcome::Succeeded))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(log.len(), 200);
    }

    #[test]
    fn test_file_sink_appends_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("results.jsonl");

        {
            let log = ResultLog::open(&path).unwrap();
            log.append(entry("start:db@n1", ActionOutcome::Succeeded))
                .unwrap();
        }
        {
            let log = ResultLog::open(&path).unwrap();
            log.append(entry(
                "start:web@n1",
                ActionOutcome::Failed {
                    kind: ErrorKind::ExecutionTimeout,
                    error: "timed out".into(),
                },
            ))
            .unwrap();
            assert_eq!(log.len(), 1);
        }

        let entries = ResultLog::read(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action_id, "start:db@n1");
        assert!(entries[1].outcome.is_failure());

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"outcome\":\"failed\""));
    }

    fn finished(id: &str, node: &str, role: &str, hour: u32) -> LogEntry {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, hour, 0, 0).unwrap();
        LogEntry {
            action_id: id.to_string(),
            node: node.to_string(),
            address: format!("{node}.example.com"),
            role: role.to_string(),
            started_at: at,
            finished_at: at,
            outcome: ActionOutcome::Succeeded,
        }
    }

    #[test]
    fn test_query_time_window_is_inclusive() {
        let entries = vec![
            finished("late", "n1", "db", 12),
            finished("early", "n1", "db", 8),
            finished("middle", "n2", "web", 10),
        ];
        let at = |hour| Utc.with_ymd_and_hms(2026, 3, 1, hour, 0, 0).unwrap();

        let ids = |query: LogQuery| -> Vec<String> {
            query
                .apply(entries.clone())
                .into_iter()
                .map(|e| e.action_id)
                .collect()
        };

        assert_eq!(ids(LogQuery::new()), vec!["early", "middle", "late"]);
        assert_eq!(ids(LogQuery::new().since(at(10))), vec!["middle", "late"]);
        assert_eq!(ids(LogQuery::new().until(at(10))), vec!["early", "middle"]);
        assert_eq!(ids(LogQuery::new().since(at(9)).until(at(11))), vec!["middle"]);
        assert!(ids(LogQuery::new().since(at(13))).is_empty());
    }

    #[test]
    fn test_query_by_node_and_role() {
        let entries = vec![
            finished("a", "n1", "db", 8),
            finished("b", "n2", "db", 9),
            finished("c", "n2", "web", 10),
        ];

        let by_node = LogQuery::new().node("n2").apply(entries.clone());
        assert_eq!(by_node.len(), 2);

        let by_both = LogQuery::new().node("n2").role("db").apply(entries.clone());
        assert_eq!(by_both.len(), 1);
        assert_eq!(by_both[0].action_id, "b");
        assert_eq!(by_both[0].address, "n2.example.com");

        let either_role = LogQuery::new().role("db").role("web").apply(entries);
        assert_eq!(either_role.len(), 3);
    }

    #[test]
    fn test_reads_entries_without_origin_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.jsonl");
        fs::write(
            &path,
            concat!(
                r#"{"action_id":"start:db@n1","started_at":"2026-03-01T08:00:00Z","#,
                r#""finished_at":"2026-03-01T08:00:01Z","outcome":"succeeded"}"#,
                "\n"
            ),
        )
        .unwrap();

        let entries = ResultLog::query(&path, &LogQuery::new()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].node, "");
        assert_eq!(entries[0].address, "");
    }
}
