//! Structured event logging for hook executions.
//!
//! Every hook run appends NDJSON records to `<logs>/<hook>.jsonl` and to the
//! combined `<logs>/all.jsonl`. Files are rotated into gzip backups once they
//! pass the size cap. Writes are best-effort: callers on the hook path use
//! [`Monitor::record`], which discards errors so that logging can never block
//! the guarded operation.

pub mod audit;
pub mod rotate;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::WardenConfig;
use crate::error::{Result, WardenError};
use crate::state::sanitize_key;

pub use audit::{AuditEntry, AuditLog};

/// File name of the unified log.
pub const COMBINED_LOG: &str = "all";
/// File name of the security decision log.
pub const SECURITY_LOG: &str = "security";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Start,
    Success,
    Failure,
    Bypass,
    Brake,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Bypass => write!(f, "bypass"),
            Self::Brake => write!(f, "brake"),
        }
    }
}

/// One line of a hook log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub hook: String,
    pub event: EventKind,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub pid: u32,
    #[serde(default)]
    pub session_id: String,
}

/// Aggregate counts for one hook (or all hooks) over a time window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HookStats {
    pub hook: Option<String>,
    pub days: u32,
    /// success + failure + bypass + brake; `start` records are not counted.
    pub total: usize,
    pub success: usize,
    pub failure: usize,
    pub bypass: usize,
    pub brake: usize,
    /// Percentage of runs that passed, `None` when nothing ran.
    pub success_rate: Option<f64>,
    pub avg_duration_ms: Option<f64>,
}

pub struct Monitor {
    logs_dir: PathBuf,
    max_size: u64,
    retention: Duration,
    combined: bool,
    session_id: String,
}

impl Monitor {
    pub fn new(config: &WardenConfig, session_id: impl Into<String>) -> Self {
        Self {
            logs_dir: config.logs_dir(),
            max_size: config.monitor.max_size_bytes,
            retention: i64::try_from(config.monitor.retention_days)
                .ok()
                .and_then(Duration::try_days)
                .unwrap_or(Duration::MAX),
            combined: config.monitor.combined_log,
            session_id: session_id.into(),
        }
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    /// Per-hook log, or the combined log for `None`.
    pub fn log_path(&self, hook: Option<&str>) -> PathBuf {
        let stem = match hook {
            Some(h) => sanitize_key(h),
            None => COMBINED_LOG.to_string(),
        };
        self.logs_dir.join(format!("{stem}.jsonl"))
    }

    pub fn log_event(
        &self,
        hook: &str,
        event: EventKind,
        file: Option<&str>,
        duration_ms: u64,
        details: &str,
    ) -> Result<()> {
        self.log_event_at(hook, event, file, duration_ms, details, Utc::now())
    }

    pub fn log_event_at(
        &self,
        hook: &str,
        event: EventKind,
        file: Option<&str>,
        duration_ms: u64,
        details: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let record = LogEvent {
            timestamp: now,
            hook: hook.to_string(),
            event,
            file: file.map(str::to_string),
            duration_ms,
            details: details.to_string(),
            pid: std::process::id(),
            session_id: self.session_id.clone(),
        };
        let line = serde_json::to_string(&record)?;

        let mut targets = vec![self.log_path(Some(hook))];
        if self.combined {
            targets.push(self.log_path(None));
        }
        for path in &targets {
            append_line(path, &line)?;
            self.rotate(path, now)?;
        }
        Ok(())
    }

    /// Log and swallow any error. Used on the hook path, where a broken log
    /// directory must not turn into a blocked tool call.
    pub fn record(
        &self,
        hook: &str,
        event: EventKind,
        file: Option<&str>,
        duration_ms: u64,
        details: &str,
    ) {
        if let Err(e) = self.log_event(hook, event, file, duration_ms, details) {
            tracing::debug!("monitor: failed to log {event} for {hook}: {e}");
        }
    }

    fn rotate(&self, path: &Path, now: DateTime<Utc>) -> Result<()> {
        if rotate::rotate_if_needed(path, self.max_size, now)?.is_some() {
            rotate::prune_backups(path, self.retention, now)?;
        }
        Ok(())
    }

    /// All readable events for a hook (or the combined log), oldest first.
    /// Malformed lines, such as a partial write from a killed hook, are skipped.
    pub fn events(&self, hook: Option<&str>) -> Result<Vec<LogEvent>> {
        read_events(&self.log_path(hook))
    }

    pub fn get_stats(&self, hook: Option<&str>, days: u32) -> Result<HookStats> {
        self.stats_at(hook, days, Utc::now())
    }

    pub fn stats_at(&self, hook: Option<&str>, days: u32, now: DateTime<Utc>) -> Result<HookStats> {
        let cutoff = Duration::try_days(i64::from(days))
            .and_then(|window| now.checked_sub_signed(window))
            .ok_or_else(|| {
                WardenError::InvalidInput(format!("stats window of {days} days is out of range"))
            })?;
        let events: Vec<LogEvent> = self
            .events(hook)?
            .into_iter()
            .filter(|e| e.timestamp >= cutoff)
            .collect();
        Ok(compute_stats(hook, days, &events))
    }

    /// Hook names that have a log file, sorted.
    pub fn hooks(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.logs_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut hooks: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                let stem = name.strip_suffix(".jsonl")?;
                // Backups carry a timestamp segment, e.g. `hook.20260101T000000.000.jsonl.gz`.
                if stem.contains('.') || stem == COMBINED_LOG || stem == SECURITY_LOG {
                    return None;
                }
                Some(stem.to_string())
            })
            .collect();
        hooks.sort();
        Ok(hooks)
    }

    /// Most recent event for a hook.
    pub fn last_event(&self, hook: &str) -> Result<Option<LogEvent>> {
        Ok(self.events(Some(hook))?.pop())
    }
}

pub fn compute_stats(hook: Option<&str>, days: u32, events: &[LogEvent]) -> HookStats {
    let count = |kind: EventKind| events.iter().filter(|e| e.event == kind).count();
    let success = count(EventKind::Success);
    let failure = count(EventKind::Failure);
    let bypass = count(EventKind::Bypass);
    let brake = count(EventKind::Brake);

    let runs = success + failure;
    let success_rate = (runs > 0).then(|| success as f64 / runs as f64 * 100.0);

    let durations: Vec<u64> = events
        .iter()
        .filter(|e| matches!(e.event, EventKind::Success | EventKind::Failure))
        .map(|e| e.duration_ms)
        .collect();
    let avg_duration_ms = (!durations.is_empty())
        .then(|| durations.iter().sum::<u64>() as f64 / durations.len() as f64);

    HookStats {
        hook: hook.map(str::to_string),
        days,
        total: success + failure + bypass + brake,
        success,
        failure,
        bypass,
        brake,
        success_rate,
        avg_duration_ms,
    }
}

pub(crate) fn append_line(path: &Path, line: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{line}")?;
    Ok(())
}

fn read_events(path: &Path) -> Result<Vec<LogEvent>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    Ok(contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str(line) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::debug!("skipping malformed log line: {e}");
                None
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(dir: &Path, max_size: u64) -> Monitor {
        let mut config = WardenConfig::default_config();
        config.paths.data_dir = Some(dir.to_string_lossy().to_string());
        config.monitor.max_size_bytes = max_size;
        Monitor::new(&config, "test-session")
    }

    #[test]
    fn test_log_event_writes_hook_and_combined() {
        let tmp = tempfile::tempdir().unwrap();
        let m = monitor(tmp.path(), 1 << 20);

        m.log_event("quality-check", EventKind::Start, Some("app.py"), 0, "")
            .unwrap();
        m.log_event("quality-check", EventKind::Success, Some("app.py"), 42, "clean")
            .unwrap();

        let events = m.events(Some("quality-check")).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].event, EventKind::Success);
        assert_eq!(events[1].duration_ms, 42);
        assert_eq!(events[1].session_id, "test-session");
        assert_eq!(events[1].pid, std::process::id());
        assert_eq!(m.events(None).unwrap().len(), 2);
    }

    #[test]
    fn test_rotation_leaves_one_backup_and_empty_log() {
        let tmp = tempfile::tempdir().unwrap();
        let m = monitor(tmp.path(), 1024);
        let path = m.log_path(Some("quality-check"));

        let mut rotated = false;
        for i in 0..100 {
            m.log_event("quality-check", EventKind::Success, None, i, "padding padding")
                .unwrap();
            if std::fs::metadata(&path).unwrap().len() == 0 {
                rotated = true;
                break;
            }
        }
        assert!(rotated, "log never rotated");
        assert_eq!(rotate::list_backups(&path).unwrap().len(), 1);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }

    #[test]
    fn test_stats_counts_and_rates() {
        let tmp = tempfile::tempdir().unwrap();
        let m = monitor(tmp.path(), 1 << 20);
        let now = Utc::now();

        m.log_event_at("h", EventKind::Start, None, 0, "", now).unwrap();
        m.log_event_at("h", EventKind::Success, None, 100, "", now).unwrap();
        m.log_event_at("h", EventKind::Success, None, 200, "", now).unwrap();
        m.log_event_at("h", EventKind::Success, None, 300, "", now).unwrap();
        m.log_event_at("h", EventKind::Failure, None, 400, "", now).unwrap();
        m.log_event_at("h", EventKind::Bypass, None, 0, "debounced", now).unwrap();
        m.log_event_at("h", EventKind::Brake, None, 0, "", now).unwrap();

        let stats = m.stats_at(Some("h"), 7, now).unwrap();
        assert_eq!(stats.total, 6);
        assert_eq!(stats.success, 3);
        assert_eq!(stats.failure, 1);
        assert_eq!(stats.bypass, 1);
        assert_eq!(stats.brake, 1);
        assert_eq!(stats.success_rate, Some(75.0));
        assert_eq!(stats.avg_duration_ms, Some(250.0));
    }

    #[test]
    fn test_stats_window_excludes_old_events() {
        let tmp = tempfile::tempdir().unwrap();
        let m = monitor(tmp.path(), 1 << 20);
        let now = Utc::now();

        m.log_event_at("h", EventKind::Failure, None, 10, "", now - Duration::days(3))
            .unwrap();
        m.log_event_at("h", EventKind::Success, None, 10, "", now).unwrap();

        let stats = m.stats_at(Some("h"), 1, now).unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.success_rate, Some(100.0));
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let m = monitor(tmp.path(), 1 << 20);
        m.log_event("h", EventKind::Success, None, 1, "").unwrap();
        append_line(&m.log_path(Some("h")), "{\"timestamp\":\"2026-").unwrap();
        m.log_event("h", EventKind::Failure, None, 1, "").unwrap();

        assert_eq!(m.events(Some("h")).unwrap().len(), 2);
    }

    #[test]
    fn test_empty_stats() {
        let tmp = tempfile::tempdir().unwrap();
        let m = monitor(tmp.path(), 1 << 20);
        let stats = m.get_stats(Some("nothing"), 7).unwrap();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.success_rate, None);
        assert_eq!(stats.avg_duration_ms, None);
    }

    #[test]
    fn test_hooks_lists_per_hook_logs_only() {
        let tmp = tempfile::tempdir().unwrap();
        let m = monitor(tmp.path(), 1 << 20);
        m.log_event("security-guard", EventKind::Success, None, 1, "").unwrap();
        m.log_event("quality-check", EventKind::Success, None, 1, "").unwrap();
        std::fs::write(m.logs_dir().join("security.jsonl"), "").unwrap();

        assert_eq!(m.hooks().unwrap(), vec!["quality-check", "security-guard"]);
    }

    #[test]
    fn test_record_swallows_errors() {
        let tmp = tempfile::tempdir().unwrap();
        // A file where the logs directory should be makes every write fail.
        let blocker = tmp.path().join("blocked");
        std::fs::write(&blocker, "").unwrap();
        let m = monitor(&blocker, 1 << 20);

        assert!(m.log_event("h", EventKind::Start, None, 0, "").is_err());
        m.record("h", EventKind::Start, None, 0, "");
    }
}
