//! Core library for hookwarden.
//!
//! The hook binary and the status CLI share everything in here: the
//! file-backed state repository, debounce locks and the emergency brake,
//! the security guard and its rule table, the quality checker, and the
//! monitor that writes and reads the NDJSON event logs.

pub mod brake;
pub mod config;
pub mod debounce;
pub mod error;
pub mod event;
pub mod guard;
pub mod health;
pub mod monitor;
pub mod quality;
pub mod state;

pub use error::{Result, WardenError};

/// Hook name used for the PreToolUse security guard.
pub const SECURITY_GUARD: &str = "security-guard";
/// Hook name used for the PostToolUse quality check.
pub const QUALITY_CHECK: &str = "quality-check";
/// Hook name used for the pre-commit quality veto.
pub const COMMIT_GUARD: &str = "commit-guard";
