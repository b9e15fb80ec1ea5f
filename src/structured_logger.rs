//! Structured JSONL logger for debugging and session reconstruction.
//!
//! This module provides machine-parseable logging with:
//! - Monotonic sequence numbers for ordering
//! - ISO 8601 timestamps with microsecond precision
//! - Session and run IDs for correlation
//! - Structured event data in JSON format

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::state_machine::{SessionCommand, SessionEvent};

/// Structured JSONL logger. Writes nothing when created disabled.
pub struct StructuredLogger {
    session_id: String,
    run_id: AtomicU64,
    seq: AtomicU64,
    log_file: Option<Mutex<File>>,
    log_path: Option<PathBuf>,
}

/// A single log entry in JSONL format.
#[derive(Serialize, serde::Deserialize)]
pub struct LogEntry {
    /// Monotonic sequence number (unique across entire session)
    pub seq: u64,
    /// ISO 8601 timestamp with microseconds
    pub ts: String,
    pub session_id: String,
    /// Run ID (increments each time the session is restored)
    pub run_id: u64,
    /// Component that emitted the log
    pub component: String,
    pub event: Value,
}

impl StructuredLogger {
    /// Creates a logger writing to `<logs_dir>/events.jsonl`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The logs directory cannot be created
    /// - The log file cannot be opened
    pub fn new(session_id: &str, logs_dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(logs_dir)?;
        let log_path = logs_dir.join("events.jsonl");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        Ok(Self {
            session_id: session_id.to_string(),
            run_id: AtomicU64::new(1),
            seq: AtomicU64::new(0),
            log_file: Some(Mutex::new(file)),
            log_path: Some(log_path),
        })
    }

    /// A logger that drops every entry.
    pub fn disabled(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            run_id: AtomicU64::new(1),
            seq: AtomicU64::new(0),
            log_file: None,
            log_path: None,
        }
    }

    /// Increments the run ID (called when a persisted session is restored).
    pub fn increment_run_id(&self) {
        self.run_id.fetch_add(1, Ordering::SeqCst);
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Logs a structured event as a single JSON line. Thread-safe.
    pub fn log(&self, component: &str, event: impl Serialize) {
        let Some(log_file) = &self.log_file else {
            return;
        };
        let entry = LogEntry {
            seq: self.next_seq(),
            ts: Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string(),
            session_id: self.session_id.clone(),
            run_id: self.run_id.load(Ordering::SeqCst),
            component: component.to_string(),
            event: serde_json::to_value(event).unwrap_or(Value::Null),
        };

        if let Ok(mut file) = log_file.lock() {
            if let Ok(line) = serde_json::to_string(&entry) {
                let _ = writeln!(file, "{}", line);
                let _ = file.flush();
            }
        }
    }

    /// Logs a state machine command with the machine's command counter.
    pub fn log_command(&self, command_seq: u64, command: &SessionCommand) {
        self.log(
            "Session",
            serde_json::json!({
                "type": "SessionCommand",
                "command_seq": command_seq,
                "command": command.name(),
            }),
        );
    }

    /// Logs an event emitted by the state machine.
    pub fn log_event(&self, command_seq: u64, event: &SessionEvent) {
        self.log(
            "Session",
            serde_json::json!({
                "type": "SessionEvent",
                "command_seq": command_seq,
                "event": event,
            }),
        );
    }

    /// Logs a rejected command.
    pub fn log_rejected(&self, command_seq: u64, error: &str) {
        self.log(
            "Session",
            serde_json::json!({
                "type": "CommandRejected",
                "command_seq": command_seq,
                "error": error,
            }),
        );
    }

    pub fn log_agent_invocation(&self, agent: &str, phase: &str) {
        self.log(
            "Agent",
            serde_json::json!({
                "type": "Invocation",
                "agent": agent,
                "phase": phase
            }),
        );
    }

    pub fn log_agent_complete(&self, agent: &str, success: bool) {
        self.log(
            "Agent",
            serde_json::json!({
                "type": "Complete",
                "agent": agent,
                "success": success
            }),
        );
    }

    /// Path of the log file, if enabled.
    pub fn path(&self) -> Option<&PathBuf> {
        self.log_path.as_ref()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

#[cfg(test)]
#[path = "tests/structured_logger_tests.rs"]
mod tests;
