//! Append-only audit log of every envelope exchanged with providers.
//!
//! Records are newline-delimited JSON in `mcp-YYYYMMDD.jsonl`, one file per
//! calendar day, shared by all providers and told apart by the `server` field.
//! Recording never fails the caller: write errors are counted and reported
//! through `tracing` only. The current day's file stays open between records
//! and is reopened when the date rolls over or after a failed write.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Which way a message travelled, from the client's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Send,
    Recv,
}

/// Whether the payload decoded as JSON-RPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Jsonrpc,
    Garbled,
}

/// One line of the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub ts: String,
    pub server: String,
    pub direction: Direction,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

impl AuditRecord {
    fn now(server: &str, direction: Direction, kind: MessageKind) -> Self {
        Self {
            ts: Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            server: server.to_string(),
            direction,
            kind,
            http_url: None,
            msg: None,
            raw: None,
        }
    }
}

/// The file records are currently appended to.
struct OpenLog {
    path: PathBuf,
    file: File,
}

/// Shared, serialized writer for the audit log.
pub struct AuditSink {
    dir: Option<PathBuf>,
    /// Holding this lock is what serializes writers.
    current: Mutex<Option<OpenLog>>,
    failed_writes: AtomicU64,
}

impl AuditSink {
    /// Audit into `dir` (created on first write).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            current: Mutex::new(None),
            failed_writes: AtomicU64::new(0),
        }
    }

    /// A sink that records nothing.
    pub fn disabled() -> Self {
        Self {
            dir: None,
            current: Mutex::new(None),
            failed_writes: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.dir.is_some()
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// The log file for a given day.
    pub fn path_for(&self, date: NaiveDate) -> Option<PathBuf> {
        self.dir
            .as_ref()
            .map(|dir| dir.join(format!("mcp-{}.jsonl", date.format("%Y%m%d"))))
    }

    /// Today's log file.
    pub fn current_path(&self) -> Option<PathBuf> {
        self.path_for(Local::now().date_naive())
    }

    /// Number of records that could not be written.
    pub fn failed_writes(&self) -> u64 {
        self.failed_writes.load(Ordering::Relaxed)
    }

    /// Record a decoded JSON-RPC message.
    pub fn record_message(&self, server: &str, direction: Direction, message: &serde_json::Value) {
        if !self.is_enabled() {
            return;
        }
        let mut record = AuditRecord::now(server, direction, MessageKind::Jsonrpc);
        record.msg = Some(message.clone());
        self.append(&record);
    }

    /// Record a JSON-RPC message exchanged over HTTP.
    pub fn record_http(
        &self,
        server: &str,
        direction: Direction,
        url: &str,
        message: &serde_json::Value,
    ) {
        if !self.is_enabled() {
            return;
        }
        let mut record = AuditRecord::now(server, direction, MessageKind::Jsonrpc);
        record.http_url = Some(url.to_string());
        record.msg = Some(message.clone());
        self.append(&record);
    }

    /// Record an inbound line that did not decode.
    pub fn record_garbled(&self, server: &str, raw: &str) {
        if !self.is_enabled() {
            return;
        }
        let mut record = AuditRecord::now(server, Direction::Recv, MessageKind::Garbled);
        record.raw = Some(raw.to_string());
        self.append(&record);
    }

    fn append(&self, record: &AuditRecord) {
        if let Some(path) = self.current_path() {
            self.append_to(path, record);
        }
    }

    fn append_to(&self, path: PathBuf, record: &AuditRecord) {
        let mut line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                self.report_failure(&path, &e.to_string());
                return;
            }
        };
        line.push('\n');

        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if current.as_ref().is_some_and(|log| log.path != path) {
            *current = None;
        }
        if current.is_none() {
            match open_log(&path) {
                Ok(file) => *current = Some(OpenLog { path, file }),
                Err(e) => {
                    self.report_failure(&path, &e.to_string());
                    return;
                }
            }
        }

        let Some(log) = current.as_mut() else {
            return;
        };
        if let Err(e) = log.file.write_all(line.as_bytes()) {
            self.report_failure(&log.path, &e.to_string());
            *current = None;
        }
    }

    fn report_failure(&self, path: &Path, reason: &str) {
        self.failed_writes.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            path = %path.display(),
            error = %reason,
            "failed to write audit record"
        );
    }
}

fn open_log(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::OpenOptions::new().create(true).append(true).open(path)
}

/// Read back every record from one audit file.
///
/// Lines that do not parse are skipped.
pub fn read_records(path: &Path) -> std::io::Result<Vec<AuditRecord>> {
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect())
}

// ─── Tests ───────────────────────────────────────────────────────────────────
