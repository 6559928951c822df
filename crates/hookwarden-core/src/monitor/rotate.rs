use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::Result;

const BACKUP_TIME_FORMAT: &str = "%Y%m%dT%H%M%S%.3f";

/// Compress `path` into a timestamped `.gz` sibling and truncate it, if it
/// has grown past `max_size`. Returns the backup path when a rotation happened.
pub fn rotate_if_needed(path: &Path, max_size: u64, now: DateTime<Utc>) -> Result<Option<PathBuf>> {
    let len = match std::fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len <= max_size {
        return Ok(None);
    }

    let backup = backup_path(path, now);
    let contents = std::fs::read(path)?;
    let file = std::fs::File::create(&backup)?;
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder.write_all(&contents)?;
    encoder.finish()?;

    // Truncate rather than remove so tailing readers keep their handle.
    std::fs::File::create(path)?;
    tracing::debug!("rotated {} ({len} bytes) to {}", path.display(), backup.display());
    Ok(Some(backup))
}

/// Delete backups of `path` whose embedded timestamp is older than `retention`.
pub fn prune_backups(path: &Path, retention: Duration, now: DateTime<Utc>) -> Result<usize> {
    let mut removed = 0;
    for (backup, stamp) in list_backups(path)? {
        if now - stamp > retention {
            std::fs::remove_file(&backup)?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Backups of `path` with their rotation time, oldest first.
pub fn list_backups(path: &Path) -> Result<Vec<(PathBuf, DateTime<Utc>)>> {
    let (Some(dir), Some(stem)) = (path.parent(), file_stem(path)) else {
        return Ok(Vec::new());
    };
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let prefix = format!("{stem}.");
    let mut backups: Vec<(PathBuf, DateTime<Utc>)> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            let stamp = name.strip_prefix(&prefix)?.strip_suffix(".jsonl.gz")?;
            let parsed = NaiveDateTime::parse_from_str(stamp, BACKUP_TIME_FORMAT).ok()?;
            Some((entry.path(), parsed.and_utc()))
        })
        .collect();
    backups.sort_by_key(|(_, stamp)| *stamp);
    Ok(backups)
}

fn backup_path(path: &Path, now: DateTime<Utc>) -> PathBuf {
    let stem = file_stem(path).unwrap_or("log");
    let name = format!("{stem}.{}.jsonl.gz", now.format(BACKUP_TIME_FORMAT));
    path.with_file_name(name)
}

fn file_stem(path: &Path) -> Option<&str> {
    path.file_name()?.to_str()?.strip_suffix(".jsonl")
}
