//! Per-hook debounce locks.
//!
//! A lock is a marker file holding the RFC 3339 time of the last permitted
//! run. When the content is empty or unreadable the file's mtime is used, so a
//! bare `touch` also counts.

use chrono::{DateTime, Duration, Utc};

use crate::config::{DebounceConfig, WardenConfig};
use crate::error::Result;
use crate::state::{FileStore, StateStore};

pub struct Debouncer<S: StateStore> {
    store: S,
    window: Duration,
    idle: Duration,
}

impl<S: StateStore> Debouncer<S> {
    pub fn new(store: S, config: &DebounceConfig) -> Self {
        Self {
            store,
            window: seconds(config.window_secs),
            idle: seconds(config.lock_idle_secs),
        }
    }

    pub fn should_run(&self, hook: &str) -> Result<bool> {
        self.should_run_at(hook, Utc::now())
    }

    /// Refuse if the last permitted run was less than one window ago (state
    /// untouched); otherwise record `now` and allow.
    pub fn should_run_at(&self, hook: &str, now: DateTime<Utc>) -> Result<bool> {
        if let Some(last) = self.last_touch(hook)? {
            let elapsed = now - last;
            // A touch from the future means the clock moved; treat it as stale.
            if elapsed >= Duration::zero() && elapsed < self.window {
                tracing::debug!(hook, elapsed_ms = elapsed.num_milliseconds(), "debounced");
                return Ok(false);
            }
        }
        self.store.set(hook, &now.to_rfc3339())?;
        Ok(true)
    }

    pub fn last_touch(&self, hook: &str) -> Result<Option<DateTime<Utc>>> {
        let Some(contents) = self.store.get(hook)? else {
            return Ok(None);
        };
        match DateTime::parse_from_rfc3339(contents.trim()) {
            Ok(t) => Ok(Some(t.with_timezone(&Utc))),
            Err(_) => self.store.modified(hook),
        }
    }

    /// Delete locks idle for longer than the configured period.
    /// Returns the hooks whose locks were removed.
    pub fn purge_stale(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let mut purged = Vec::new();
        for hook in self.store.keys()? {
            let stale = match self.last_touch(&hook)? {
                Some(last) => now - last > self.idle,
                None => false,
            };
            if stale {
                self.store.delete(&hook)?;
                purged.push(hook);
            }
        }
        Ok(purged)
    }

    pub fn clear(&self, hook: &str) -> Result<()> {
        self.store.delete(hook)
    }

    pub fn hooks(&self) -> Result<Vec<String>> {
        self.store.keys()
    }
}

/// Out-of-range lengths saturate; a window that long never reopens.
fn seconds(secs: u64) -> Duration {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

impl Debouncer<FileStore> {
    /// Lock markers under `paths.lock_dir`.
    pub fn open(config: &WardenConfig) -> Self {
        Self::new(FileStore::new(config.lock_dir(), "lock"), &config.debounce)
    }
}
