//! Audit logging for privileged operations
//!
//! Every operation that changes the host's filter state or schedule leaves
//! a JSON-lines record (one object per line) in the state directory.
//! Logging is best-effort: an unwritable audit log never fails the
//! operation that triggered it.

use std::io::Write;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Types of auditable events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    AllowPort,
    DisallowPort,
    Reload,
    Stop,
    ScheduleInstalled,
    ScheduleRemoved,
    HookCallback,
}

/// A single audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the event occurred (UTC)
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Type of event
    pub event_type: EventType,

    /// Whether the operation succeeded
    pub success: bool,

    /// Additional structured data about the event
    pub details: serde_json::Value,

    /// Error message if operation failed
    pub error: Option<String>,
}

impl AuditEvent {
    pub fn new(
        event_type: EventType,
        success: bool,
        details: serde_json::Value,
        error: Option<String>,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            event_type,
            success,
            details,
            error,
        }
    }
}

/// Audit log writer
pub struct AuditLog {
    log_path: PathBuf,
}

impl AuditLog {
    pub fn new() -> std::io::Result<Self> {
        let mut log_path = crate::utils::state_dir();
        std::fs::create_dir_all(&log_path)?;
        log_path.push("audit.log");
        Ok(Self { log_path })
    }

    /// Appends an event to the audit log.
    pub fn log(&self, event: &AuditEvent) -> std::io::Result<()> {
        let json = serde_json::to_string(event)?;

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        file.write_all(json.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()?;
        Ok(())
    }

    /// Reads the most recent events from the log, newest first.
    pub fn read_recent(&self, count: usize) -> std::io::Result<Vec<AuditEvent>> {
        let content = std::fs::read_to_string(&self.log_path)?;
        let events = content
            .lines()
            .rev()
            .take(count)
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();
        Ok(events)
    }

    pub fn path(&self) -> &PathBuf {
        &self.log_path
    }
}

/// Records an event, swallowing audit I/O failures with a warning.
pub fn record(event_type: EventType, success: bool, details: serde_json::Value, error: Option<String>) {
    match AuditLog::new() {
        Ok(log) => {
            if let Err(e) = log.log(&AuditEvent::new(event_type, success, details, error)) {
                warn!("audit log write failed: {e}");
            }
        }
        Err(e) => warn!("audit log unavailable: {e}"),
    }
}
