//! Session log record and the elapsed-time ticker.

use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

/// How many trailing server log lines are considered per status response.
const SERVER_LOG_WINDOW: usize = 20;

/// Who produced a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSource {
    Client,
    Server,
}

/// One line of the session log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub source: LogSource,
    pub line: String,
}

/// Append-only log of one session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionLog {
    entries: Vec<LogEntry>,
}

impl SessionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a client-side line. Never deduplicated.
    pub fn append(&mut self, line: impl Into<String>) -> &LogEntry {
        self.push(LogSource::Client, line.into())
    }

    /// Merge server-supplied lines.
    ///
    /// Only the last [`SERVER_LOG_WINDOW`] lines are looked at, and a line
    /// already present in the record is skipped. Returns the lines added.
    pub fn merge_server_lines(&mut self, lines: &[String]) -> Vec<String> {
        let start = lines.len().saturating_sub(SERVER_LOG_WINDOW);
        let mut added = Vec::new();
        for line in &lines[start..] {
            if self.entries.iter().any(|e| &e.line == line) {
                continue;
            }
            self.push(LogSource::Server, line.clone());
            added.push(line.clone());
        }
        added
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn lines(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.line.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn push(&mut self, source: LogSource, line: String) -> &LogEntry {
        self.entries.push(LogEntry {
            at: Utc::now(),
            source,
            line,
        });
        &self.entries[self.entries.len() - 1]
    }
}

/// Format a duration as `"{m}m {s}s"`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}m {}s", secs / 60, secs % 60)
}

/// Line written when the session enters polling.
pub fn started_line(started_at: DateTime<Utc>) -> String {
    format!(
        "started at {}",
        started_at.with_timezone(&Local).format("%H:%M:%S")
    )
}

/// Produces the periodic "time elapsed" entries.
#[derive(Debug, Clone, Default)]
pub struct LogTicker {
    ticks: u64,
}

impl LogTicker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries produced so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Produce the entry for one tick.
    pub fn tick(&mut self, elapsed: Duration) -> String {
        self.ticks += 1;
        format!("in progress: {}", format_elapsed(elapsed))
    }
}
