//! Consecutive-failure tracking and the emergency brake.
//!
//! A hook that keeps failing is switched off for a cooldown period instead of
//! nagging on every tool call. The record lives in one JSON file per hook and
//! disappears on the next success or when the brake expires.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{BrakeConfig, WardenConfig};
use crate::error::{Result, WardenError};
use crate::state::{FileStore, StateStore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub consecutive_failures: u32,
    pub last_failure: DateTime<Utc>,
    #[serde(default)]
    pub brake_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brake_until: Option<DateTime<Utc>>,
}

impl FailureRecord {
    /// Brake set and not yet expired at `now`.
    pub fn is_braked_at(&self, now: DateTime<Utc>) -> bool {
        self.brake_active && self.brake_until.is_some_and(|until| until > now)
    }
}

/// `now + minutes`, or an error when the deadline falls outside chrono's range.
fn brake_deadline(now: DateTime<Utc>, minutes: u64) -> Result<DateTime<Utc>> {
    i64::try_from(minutes)
        .ok()
        .and_then(Duration::try_minutes)
        .and_then(|cooldown| now.checked_add_signed(cooldown))
        .ok_or_else(|| {
            WardenError::InvalidInput(format!("brake cooldown of {minutes} minutes is out of range"))
        })
}

pub struct EmergencyBrake<S: StateStore> {
    store: S,
    threshold: u32,
    cooldown_minutes: u64,
}

impl<S: StateStore> EmergencyBrake<S> {
    pub fn new(store: S, config: &BrakeConfig) -> Self {
        Self {
            store,
            threshold: config.failure_threshold.max(1),
            cooldown_minutes: config.cooldown_minutes,
        }
    }

    pub fn record_failure(&self, hook: &str) -> Result<FailureRecord> {
        self.record_failure_at(hook, Utc::now())
    }

    /// Count one more failure; trip the brake once the threshold is reached.
    pub fn record_failure_at(&self, hook: &str, now: DateTime<Utc>) -> Result<FailureRecord> {
        let mut record = self.record(hook)?.unwrap_or(FailureRecord {
            consecutive_failures: 0,
            last_failure: now,
            brake_active: false,
            brake_until: None,
        });
        record.consecutive_failures = record.consecutive_failures.saturating_add(1);
        record.last_failure = now;

        if record.consecutive_failures >= self.threshold && !record.is_braked_at(now) {
            let until = brake_deadline(now, self.cooldown_minutes)?;
            record.brake_active = true;
            record.brake_until = Some(until);
            tracing::warn!(
                hook,
                failures = record.consecutive_failures,
                until = %until,
                "emergency brake engaged"
            );
        }

        self.save(hook, &record)?;
        Ok(record)
    }

    /// A success wipes the record entirely.
    pub fn record_success(&self, hook: &str) -> Result<()> {
        self.store.delete(hook)
    }

    pub fn is_brake_active(&self, hook: &str) -> Result<bool> {
        self.is_brake_active_at(hook, Utc::now())
    }

    /// True only while `brake_until` is in the future. An expired brake
    /// deletes the record.
    pub fn is_brake_active_at(&self, hook: &str, now: DateTime<Utc>) -> Result<bool> {
        let Some(record) = self.record(hook)? else {
            return Ok(false);
        };
        if record.is_braked_at(now) {
            return Ok(true);
        }
        if record.brake_active {
            tracing::info!(hook, "emergency brake expired");
            self.store.delete(hook)?;
        }
        Ok(false)
    }

    /// Engage the brake by hand for `minutes`.
    pub fn activate_at(&self, hook: &str, minutes: u64, now: DateTime<Utc>) -> Result<FailureRecord> {
        let mut record = self.record(hook)?.unwrap_or(FailureRecord {
            consecutive_failures: 0,
            last_failure: now,
            brake_active: false,
            brake_until: None,
        });
        let until = brake_deadline(now, minutes)?;
        record.brake_active = true;
        record.brake_until = Some(until);
        self.save(hook, &record)?;
        Ok(record)
    }

    pub fn activate(&self, hook: &str, minutes: u64) -> Result<FailureRecord> {
        self.activate_at(hook, minutes, Utc::now())
    }

    /// Stored record, if any. Unparseable records are treated as absent.
    pub fn record(&self, hook: &str) -> Result<Option<FailureRecord>> {
        let Some(contents) = self.store.get(hook)? else {
            return Ok(None);
        };
        match serde_json::from_str(&contents) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                tracing::debug!(hook, "discarding unreadable failure record: {e}");
                Ok(None)
            }
        }
    }

    /// All stored records, sorted by hook name.
    pub fn records(&self) -> Result<Vec<(String, FailureRecord)>> {
        let mut out = Vec::new();
        for hook in self.store.keys()? {
            if let Some(record) = self.record(&hook)? {
                out.push((hook, record));
            }
        }
        Ok(out)
    }

    pub fn reset(&self, hook: &str) -> Result<()> {
        self.store.delete(hook)
    }

    fn save(&self, hook: &str, record: &FailureRecord) -> Result<()> {
        let json = serde_json::to_string_pretty(record)?;
        self.store.set(hook, &json)
    }
}

impl EmergencyBrake<FileStore> {
    /// Failure records under `<data_dir>/failures`.
    pub fn open(config: &WardenConfig) -> Self {
        Self::new(FileStore::new(config.failures_dir(), "json"), &config.brake)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brake(dir: &std::path::Path) -> EmergencyBrake<FileStore> {
        EmergencyBrake::new(FileStore::new(dir, "json"), &BrakeConfig::default())
    }

    #[test]
    fn test_threshold_failures_engage_brake() {
        let tmp = tempfile::tempdir().unwrap();
        let b = brake(tmp.path());
        let now = Utc::now();

        for _ in 0..4 {
            b.record_failure_at("quality-check", now).unwrap();
            assert!(!b.is_brake_active_at("quality-check", now).unwrap());
        }
        let record = b.record_failure_at("quality-check", now).unwrap();
        assert_eq!(record.consecutive_failures, 5);
        assert!(record.brake_active);
        assert_eq!(record.brake_until, Some(now + Duration::minutes(10)));
        assert!(b.is_brake_active_at("quality-check", now).unwrap());
    }

    #[test]
    fn test_success_resets_count_and_brake() {
        let tmp = tempfile::tempdir().unwrap();
        let b = brake(tmp.path());
        let now = Utc::now();

        for _ in 0..5 {
            b.record_failure_at("h", now).unwrap();
        }
        assert!(b.is_brake_active_at("h", now).unwrap());

        b.record_success("h").unwrap();
        assert!(!b.is_brake_active_at("h", now).unwrap());
        assert!(b.record("h").unwrap().is_none());

        let record = b.record_failure_at("h", now).unwrap();
        assert_eq!(record.consecutive_failures, 1);
    }

    #[test]
    fn test_expired_brake_deletes_record() {
        let tmp = tempfile::tempdir().unwrap();
        let b = brake(tmp.path());
        let now = Utc::now();

        for _ in 0..5 {
            b.record_failure_at("h", now).unwrap();
        }
        let later = now + Duration::minutes(11);
        assert!(!b.is_brake_active_at("h", later).unwrap());
        assert!(b.record("h").unwrap().is_none());
    }

    #[test]
    fn test_failures_below_threshold_persist() {
        let tmp = tempfile::tempdir().unwrap();
        let b = brake(tmp.path());
        let now = Utc::now();

        b.record_failure_at("h", now).unwrap();
        b.record_failure_at("h", now).unwrap();
        // Not braked, so checking must not clear the count.
        assert!(!b.is_brake_active_at("h", now).unwrap());
        assert_eq!(b.record("h").unwrap().unwrap().consecutive_failures, 2);
    }

    #[test]
    fn test_manual_activation() {
        let tmp = tempfile::tempdir().unwrap();
        let b = brake(tmp.path());
        let now = Utc::now();

        b.activate_at("h", 30, now).unwrap();
        assert!(b.is_brake_active_at("h", now + Duration::minutes(29)).unwrap());
        assert!(!b.is_brake_active_at("h", now + Duration::minutes(31)).unwrap());
    }

    #[test]
    fn test_out_of_range_cooldown_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let b = brake(tmp.path());
        let err = b.activate_at("h", 999_999_999_999_999, Utc::now()).unwrap_err();
        assert!(matches!(err, WardenError::InvalidInput(_)));
        assert!(b.record("h").unwrap().is_none());

        let config = BrakeConfig {
            failure_threshold: 1,
            cooldown_minutes: u64::MAX,
        };
        let b = EmergencyBrake::new(FileStore::new(tmp.path(), "json"), &config);
        assert!(b.record_failure_at("h", Utc::now()).is_err());
    }

    #[test]
    fn test_custom_threshold() {
        let tmp = tempfile::tempdir().unwrap();
        let config = BrakeConfig {
            failure_threshold: 2,
            cooldown_minutes: 1,
        };
        let b = EmergencyBrake::new(FileStore::new(tmp.path(), "json"), &config);
        let now = Utc::now();

        b.record_failure_at("h", now).unwrap();
        assert!(b.record_failure_at("h", now).unwrap().brake_active);
    }

    #[test]
    fn test_corrupt_record_treated_as_absent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::new(tmp.path(), "json");
        store.set("h", "not json").unwrap();
        let b = brake(tmp.path());

        assert!(b.record("h").unwrap().is_none());
        assert_eq!(b.record_failure_at("h", Utc::now()).unwrap().consecutive_failures, 1);
    }

    #[test]
    fn test_records_lists_hooks() {
        let tmp = tempfile::tempdir().unwrap();
        let b = brake(tmp.path());
        b.record_failure("b").unwrap();
        b.record_failure("a").unwrap();

        let names: Vec<String> = b.records().unwrap().into_iter().map(|(h, _)| h).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
