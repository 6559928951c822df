//! Security decision log (`security.jsonl`).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::{LogLevel, SecurityMode, WardenConfig};
use crate::error::Result;
use crate::monitor::{append_line, rotate, SECURITY_LOG};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub event_type: String,
    pub tool: String,
    pub target: String,
    pub message: String,
    pub mode: SecurityMode,
    #[serde(default)]
    pub session_id: String,
}

pub struct AuditLog {
    path: PathBuf,
    verbosity: LogLevel,
    max_size: u64,
    retention: Duration,
}

impl AuditLog {
    pub fn new(config: &WardenConfig) -> Self {
        Self {
            path: config.logs_dir().join(format!("{SECURITY_LOG}.jsonl")),
            verbosity: config.general.log_level,
            max_size: config.monitor.max_size_bytes,
            retention: Duration::days(config.monitor.retention_days as i64),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Append `entry` if its level is within the configured verbosity.
    /// Returns whether the entry was written.
    pub fn record(&self, entry: &AuditEntry) -> Result<bool> {
        if entry.level > self.verbosity {
            return Ok(false);
        }
        let line = serde_json::to_string(entry)?;
        append_line(&self.path, &line)?;
        if rotate::rotate_if_needed(&self.path, self.max_size, entry.timestamp)?.is_some() {
            rotate::prune_backups(&self.path, self.retention, entry.timestamp)?;
        }
        Ok(true)
    }

    /// Entries currently in the active log, oldest first.
    pub fn entries(&self) -> Result<Vec<AuditEntry>> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(contents
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}
