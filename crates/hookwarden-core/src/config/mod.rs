//! Layered configuration: global, project and local TOML files merged by
//! the `config` crate, then `HOOKWARDEN_*` environment overrides, then
//! `validate` clamping anything out of range.

use crate::error::{Result, WardenError};
use config::{Config, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WardenConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub debounce: DebounceConfig,
    #[serde(default)]
    pub brake: BrakeConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub quality: QualityConfig,
}

// -- Enums --

/// Verbosity of the security decision log. Ordered from quietest to loudest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warn => write!(f, "warn"),
            Self::Info => write!(f, "info"),
            Self::Debug => write!(f, "debug"),
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            other => Err(WardenError::Config(format!("unknown log level '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityMode {
    Off,
    Balanced,
    Paranoid,
}

impl std::fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::Balanced => write!(f, "balanced"),
            Self::Paranoid => write!(f, "paranoid"),
        }
    }
}

impl std::str::FromStr for SecurityMode {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "balanced" => Ok(Self::Balanced),
            "paranoid" | "strict" => Ok(Self::Paranoid),
            other => Err(WardenError::Config(format!(
                "unknown security mode '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityMode {
    File,
    Project,
    Off,
}

impl std::fmt::Display for QualityMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Project => write!(f, "project"),
            Self::Off => write!(f, "off"),
        }
    }
}

impl std::str::FromStr for QualityMode {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "file" => Ok(Self::File),
            "project" => Ok(Self::Project),
            "off" => Ok(Self::Off),
            other => Err(WardenError::Config(format!(
                "unknown quality mode '{other}'"
            ))),
        }
    }
}

// -- Sections --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,
    /// Skip every hook (each skip is still logged as a `bypass` event).
    #[serde(default)]
    pub bypass: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            bypass: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root for logs and failure records. Defaults to `~/.config/hookwarden`.
    #[serde(default)]
    pub data_dir: Option<String>,
    /// Directory for debounce lock markers. Defaults to `$TMPDIR/hookwarden-locks`.
    #[serde(default)]
    pub lock_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebounceConfig {
    #[serde(default = "default_debounce_window")]
    pub window_secs: u64,
    #[serde(default = "default_lock_idle")]
    pub lock_idle_secs: u64,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            window_secs: default_debounce_window(),
            lock_idle_secs: default_lock_idle(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrakeConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: u64,
}

impl Default for BrakeConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_minutes: default_cooldown_minutes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_max_size")]
    pub max_size_bytes: u64,
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
    /// Also append every event to the unified `all.jsonl` log.
    #[serde(default = "default_true")]
    pub combined_log: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: default_max_size(),
            retention_days: default_retention_days(),
            combined_log: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default = "default_security_mode")]
    pub mode: SecurityMode,
    /// Branch name regexes that make `block_if_strict` rules block.
    #[serde(default = "default_production_branches")]
    pub production_branches: Vec<String>,
    /// Replace the built-in rule table with this TOML file.
    #[serde(default)]
    pub rules_file: Option<String>,
    #[serde(default = "default_large_read")]
    pub large_read_bytes: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            mode: default_security_mode(),
            production_branches: default_production_branches(),
            rules_file: None,
            large_read_bytes: default_large_read(),
        }
    }
}

/// Minimum pylint score per project area.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AreaThresholds {
    #[serde(default = "default_backend_score")]
    pub backend: f32,
    #[serde(default = "default_frontend_score")]
    pub frontend: f32,
    #[serde(default = "default_other_score")]
    pub other: f32,
}

impl Default for AreaThresholds {
    fn default() -> Self {
        Self {
            backend: default_backend_score(),
            frontend: default_frontend_score(),
            other: default_other_score(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    #[serde(default = "default_quality_mode")]
    pub mode: QualityMode,
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
    /// Exit 1 instead of 0 when an edit-triggered check fails.
    #[serde(default)]
    pub hard_fail_on_edit: bool,
    #[serde(default = "default_fix_rounds")]
    pub fix_rounds: usize,
    /// External tools to run when installed.
    #[serde(default = "default_tools")]
    pub tools: Vec<String>,
    #[serde(default)]
    pub thresholds: AreaThresholds,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            mode: default_quality_mode(),
            max_line_length: default_max_line_length(),
            hard_fail_on_edit: false,
            fix_rounds: default_fix_rounds(),
            tools: default_tools(),
            thresholds: AreaThresholds::default(),
        }
    }
}

impl QualityConfig {
    pub fn tool_enabled(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t == name)
    }
}

/// External tools the quality checker knows how to drive.
pub const KNOWN_TOOLS: &[&str] = &["flake8", "pylint", "jshint", "html5lib", "shellcheck"];

/// Upper bounds applied by `validate`.
pub const MAX_COOLDOWN_MINUTES: u64 = 7 * 24 * 60;
pub const MAX_DEBOUNCE_SECS: u64 = 60 * 60;
pub const MAX_LOCK_IDLE_SECS: u64 = 7 * 24 * 60 * 60;
pub const MAX_RETENTION_DAYS: u64 = 3650;

// -- Defaults --

fn default_log_level() -> LogLevel {
    LogLevel::Warn
}
fn default_true() -> bool {
    true
}
fn default_debounce_window() -> u64 {
    2
}
fn default_lock_idle() -> u64 {
    3600
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_cooldown_minutes() -> u64 {
    10
}
fn default_max_size() -> u64 {
    10 * 1024 * 1024
}
fn default_retention_days() -> u64 {
    7
}
fn default_security_mode() -> SecurityMode {
    SecurityMode::Balanced
}
fn default_production_branches() -> Vec<String> {
    vec!["^(main|master|prod|production|release.*)$".to_string()]
}
fn default_large_read() -> u64 {
    10 * 1024 * 1024
}
fn default_quality_mode() -> QualityMode {
    QualityMode::File
}
fn default_max_line_length() -> usize {
    79
}
fn default_fix_rounds() -> usize {
    3
}
fn default_tools() -> Vec<String> {
    KNOWN_TOOLS.iter().map(|t| t.to_string()).collect()
}
fn default_backend_score() -> f32 {
    8.5
}
fn default_frontend_score() -> f32 {
    7.0
}
fn default_other_score() -> f32 {
    8.0
}

impl WardenConfig {
    /// Load configuration with three-layer TOML merge, then apply
    /// `HOOKWARDEN_*` environment overrides:
    /// 1. ~/.config/hookwarden/config.toml (global)
    /// 2. .hookwarden/config.toml (project)
    /// 3. .hookwarden/config.local.toml (local, gitignored)
    pub fn load(project_dir: Option<&Path>) -> Result<Self> {
        Self::load_with_env(project_dir, |key| std::env::var(key).ok())
    }

    /// Same as [`load`](Self::load) with an injectable environment lookup.
    pub fn load_with_env<F>(project_dir: Option<&Path>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = Config::builder();

        if let Some(global_path) = global_config_path() {
            if global_path.exists() {
                builder = builder.add_source(File::from(global_path).required(false));
            }
        }

        if let Some(dir) = project_dir {
            let project_config = dir.join(".hookwarden").join("config.toml");
            if project_config.exists() {
                builder = builder.add_source(File::from(project_config).required(false));
            }

            let local_config = dir.join(".hookwarden").join("config.local.toml");
            if local_config.exists() {
                builder = builder.add_source(File::from(local_config).required(false));
            }
        }

        let config = builder
            .build()
            .map_err(|e| WardenError::Config(e.to_string()))?;

        let mut cfg: Self = config
            .try_deserialize()
            .map_err(|e| WardenError::Config(e.to_string()))?;

        cfg.apply_env_overrides(lookup);
        cfg.validate();
        Ok(cfg)
    }

    /// Defaults only (no files, no environment).
    pub fn default_config() -> Self {
        Self {
            general: GeneralConfig::default(),
            paths: PathsConfig::default(),
            debounce: DebounceConfig::default(),
            brake: BrakeConfig::default(),
            monitor: MonitorConfig::default(),
            security: SecurityConfig::default(),
            quality: QualityConfig::default(),
        }
    }

    /// Apply `HOOKWARDEN_*` overrides. Values that fail to parse are ignored
    /// and reported in the returned warnings.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Vec<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut warnings = Vec::new();

        if let Some(v) = lookup("HOOKWARDEN_LOG_LEVEL") {
            match v.parse() {
                Ok(level) => self.general.log_level = level,
                Err(e) => warnings.push(format!("HOOKWARDEN_LOG_LEVEL ignored: {e}")),
            }
        }
        if let Some(v) = lookup("HOOKWARDEN_BYPASS") {
            match parse_bool(&v) {
                Some(b) => self.general.bypass = b,
                None => warnings.push(format!("HOOKWARDEN_BYPASS ignored: '{v}' is not a bool")),
            }
        }
        if let Some(v) = lookup("HOOKWARDEN_QUALITY_MODE") {
            match v.parse() {
                Ok(mode) => self.quality.mode = mode,
                Err(e) => warnings.push(format!("HOOKWARDEN_QUALITY_MODE ignored: {e}")),
            }
        }
        if let Some(v) = lookup("HOOKWARDEN_SECURITY_MODE") {
            match v.parse() {
                Ok(mode) => self.security.mode = mode,
                Err(e) => warnings.push(format!("HOOKWARDEN_SECURITY_MODE ignored: {e}")),
            }
        }

        let numeric: [(&str, &mut u64); 3] = [
            ("HOOKWARDEN_DEBOUNCE_SECONDS", &mut self.debounce.window_secs),
            ("HOOKWARDEN_COOLDOWN_MINUTES", &mut self.brake.cooldown_minutes),
            ("HOOKWARDEN_LOG_MAX_BYTES", &mut self.monitor.max_size_bytes),
        ];
        for (key, field) in numeric {
            if let Some(v) = lookup(key) {
                match v.trim().parse::<u64>() {
                    Ok(n) => *field = n,
                    Err(_) => warnings.push(format!("{key} ignored: '{v}' is not a number")),
                }
            }
        }
        if let Some(v) = lookup("HOOKWARDEN_FAILURE_THRESHOLD") {
            match v.trim().parse::<u32>() {
                Ok(n) => self.brake.failure_threshold = n,
                Err(_) => warnings.push(format!(
                    "HOOKWARDEN_FAILURE_THRESHOLD ignored: '{v}' is not a number"
                )),
            }
        }

        if let Some(v) = lookup("HOOKWARDEN_HOME").filter(|v| !v.is_empty()) {
            self.paths.data_dir = Some(v);
        }
        if let Some(v) = lookup("HOOKWARDEN_LOCK_DIR").filter(|v| !v.is_empty()) {
            self.paths.lock_dir = Some(v);
        }

        for w in &warnings {
            tracing::warn!("config: {}", w);
        }
        warnings
    }

    /// Validate config values, clamping out-of-range values and logging warnings.
    /// This is lenient: it fixes values rather than rejecting the config.
    pub fn validate(&mut self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.brake.failure_threshold == 0 {
            warnings.push("brake.failure_threshold = 0, setting to 1".to_string());
            self.brake.failure_threshold = 1;
        }
        if self.brake.cooldown_minutes == 0 {
            warnings.push("brake.cooldown_minutes = 0, setting to 1".to_string());
            self.brake.cooldown_minutes = 1;
        }
        if self.brake.cooldown_minutes > MAX_COOLDOWN_MINUTES {
            warnings.push(format!(
                "brake.cooldown_minutes = {} above {MAX_COOLDOWN_MINUTES}, clamping",
                self.brake.cooldown_minutes
            ));
            self.brake.cooldown_minutes = MAX_COOLDOWN_MINUTES;
        }
        if self.debounce.window_secs > MAX_DEBOUNCE_SECS {
            warnings.push(format!(
                "debounce.window_secs = {} above {MAX_DEBOUNCE_SECS}, clamping",
                self.debounce.window_secs
            ));
            self.debounce.window_secs = MAX_DEBOUNCE_SECS;
        }
        if self.debounce.lock_idle_secs > MAX_LOCK_IDLE_SECS {
            warnings.push(format!(
                "debounce.lock_idle_secs = {} above {MAX_LOCK_IDLE_SECS}, clamping",
                self.debounce.lock_idle_secs
            ));
            self.debounce.lock_idle_secs = MAX_LOCK_IDLE_SECS;
        }
        if self.monitor.max_size_bytes < 1024 {
            warnings.push(format!(
                "monitor.max_size_bytes = {} below 1024, clamping",
                self.monitor.max_size_bytes
            ));
            self.monitor.max_size_bytes = 1024;
        }
        if self.monitor.retention_days == 0 {
            warnings.push("monitor.retention_days = 0, setting to 1".to_string());
            self.monitor.retention_days = 1;
        }
        if self.monitor.retention_days > MAX_RETENTION_DAYS {
            warnings.push(format!(
                "monitor.retention_days = {} above {MAX_RETENTION_DAYS}, clamping",
                self.monitor.retention_days
            ));
            self.monitor.retention_days = MAX_RETENTION_DAYS;
        }
        if self.quality.max_line_length < 20 {
            warnings.push(format!(
                "quality.max_line_length = {} below 20, clamping",
                self.quality.max_line_length
            ));
            self.quality.max_line_length = 20;
        }
        if self.quality.fix_rounds == 0 {
            warnings.push("quality.fix_rounds = 0, setting to 1".to_string());
            self.quality.fix_rounds = 1;
        }

        let score_checks: [(&str, &mut f32); 3] = [
            ("quality.thresholds.backend", &mut self.quality.thresholds.backend),
            ("quality.thresholds.frontend", &mut self.quality.thresholds.frontend),
            ("quality.thresholds.other", &mut self.quality.thresholds.other),
        ];
        for (name, val) in score_checks {
            if *val < 0.0 || *val > 10.0 {
                warnings.push(format!("{name} = {val} out of range [0.0, 10.0], clamping"));
                *val = val.clamp(0.0, 10.0);
            }
        }

        for tool in &self.quality.tools {
            if !KNOWN_TOOLS.contains(&tool.as_str()) {
                warnings.push(format!(
                    "unknown quality tool '{tool}', valid: {}",
                    KNOWN_TOOLS.join(", ")
                ));
            }
        }

        self.security.production_branches.retain(|pattern| {
            if let Err(e) = regex::Regex::new(pattern) {
                warnings.push(format!("dropping invalid production branch pattern '{pattern}': {e}"));
                false
            } else {
                true
            }
        });

        for w in &warnings {
            tracing::warn!("config: {}", w);
        }

        warnings
    }

    /// Root for logs and failure records.
    pub fn data_dir(&self) -> PathBuf {
        match self.paths.data_dir {
            Some(ref dir) => PathBuf::from(dir),
            None => dirs::config_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("hookwarden"),
        }
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir().join("logs")
    }

    pub fn failures_dir(&self) -> PathBuf {
        self.data_dir().join("failures")
    }

    pub fn lock_dir(&self) -> PathBuf {
        match self.paths.lock_dir {
            Some(ref dir) => PathBuf::from(dir),
            None => std::env::temp_dir().join("hookwarden-locks"),
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("hookwarden").join("config.toml"))
}
