//! PreToolUse security guard.
//!
//! `Guard::evaluate` classifies one operation as allow, warn or block. Order:
//! the `off` mode switch, then path traversal, then the rule table, then the
//! large-read check. The verdict carries the audit level so the caller can
//! log it without re-deriving anything.

pub mod rules;

use chrono::{DateTime, Utc};
use regex::Regex;
use std::path::{Path, PathBuf};

use crate::config::{LogLevel, SecurityConfig, SecurityMode};
use crate::error::{Result, WardenError};
use crate::event::Operation;
use crate::monitor::audit::AuditEntry;

pub use rules::{Rule, RuleAction, RuleCategory, RuleSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Warn,
    Block,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Allow => write!(f, "allow"),
            Self::Warn => write!(f, "warn"),
            Self::Block => write!(f, "block"),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct Verdict {
    pub decision: Decision,
    pub event_type: String,
    pub level: LogLevel,
    pub message: String,
    /// Pattern of the rule that matched, if any.
    pub rule: Option<String>,
}

impl Verdict {
    fn new(decision: Decision, event_type: &str, message: String) -> Self {
        let level = match decision {
            Decision::Block => LogLevel::Error,
            Decision::Warn => LogLevel::Warn,
            Decision::Allow => LogLevel::Info,
        };
        Self {
            decision,
            event_type: event_type.to_string(),
            level,
            message,
            rule: None,
        }
    }

    fn allow() -> Self {
        Self::new(Decision::Allow, "allowed", "no rule matched".into())
    }

    fn disabled() -> Self {
        Self {
            level: LogLevel::Debug,
            ..Self::new(
                Decision::Allow,
                "guard_disabled",
                "security mode is off".into(),
            )
        }
    }

    fn with_rule(mut self, rule: &Rule) -> Self {
        self.rule = Some(rule.pattern.clone());
        self
    }

    pub fn is_blocked(&self) -> bool {
        self.decision == Decision::Block
    }

    /// 1 when blocked, 0 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.is_blocked() {
            1
        } else {
            0
        }
    }

    pub fn to_audit(
        &self,
        op: &Operation,
        mode: SecurityMode,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> AuditEntry {
        AuditEntry {
            timestamp: now,
            level: self.level,
            event_type: self.event_type.clone(),
            tool: op.tool().to_string(),
            target: op.target().to_string(),
            message: self.message.clone(),
            mode,
            session_id: session_id.to_string(),
        }
    }
}

/// Facts about the environment the operation runs in.
#[derive(Debug, Clone, Default)]
pub struct GuardContext {
    pub branch: Option<String>,
    /// Base for relative file paths.
    pub cwd: Option<PathBuf>,
}

impl GuardContext {
    pub fn detect(cwd: Option<&Path>) -> Self {
        Self {
            branch: current_branch(cwd),
            cwd: cwd.map(Path::to_path_buf),
        }
    }
}

/// Current git branch, or None outside a repository or on a detached HEAD.
pub fn current_branch(cwd: Option<&Path>) -> Option<String> {
    let mut cmd = std::process::Command::new("git");
    cmd.args(["rev-parse", "--abbrev-ref", "HEAD"]);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    let output = cmd.stderr(std::process::Stdio::null()).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let branch = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!branch.is_empty() && branch != "HEAD").then_some(branch)
}

/// True when any path component is `..`, literally or percent-encoded.
pub fn has_traversal(path: &str) -> bool {
    path.split(['/', '\\']).any(|segment| {
        segment == ".." || segment.eq_ignore_ascii_case("%2e%2e")
    }) || path.to_ascii_lowercase().contains("%2e%2e%2f")
}

/// Lexically normalise a file path before rule lookup: relative paths are
/// joined onto `cwd`, repeated separators collapse and `.` components drop.
/// `..` is kept; traversal is rejected before this runs.
pub fn normalize_path(path: &str, cwd: Option<&Path>) -> String {
    let joined = match cwd {
        Some(base) if !path.starts_with('/') => format!("{}/{path}", base.display()),
        _ => path.to_string(),
    };
    let parts: Vec<&str> = joined
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect();
    if joined.starts_with('/') {
        format!("/{}", parts.join("/"))
    } else if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

pub struct Guard {
    mode: SecurityMode,
    production_branches: Vec<Regex>,
    large_read_bytes: u64,
    rules: RuleSet,
}

impl Guard {
    pub fn new(config: &SecurityConfig, rules: RuleSet) -> Result<Self> {
        let production_branches = config
            .production_branches
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|source| WardenError::Rule {
                    pattern: p.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            mode: config.mode,
            production_branches,
            large_read_bytes: config.large_read_bytes,
            rules,
        })
    }

    /// Build from config, loading `security.rules_file` or the built-in table.
    pub fn from_config(config: &SecurityConfig) -> Result<Self> {
        Self::new(config, RuleSet::load(config)?)
    }

    pub fn mode(&self) -> SecurityMode {
        self.mode
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    fn is_production(&self, branch: Option<&str>) -> bool {
        branch.is_some_and(|b| self.production_branches.iter().any(|re| re.is_match(b)))
    }

    fn strict(&self, ctx: &GuardContext) -> bool {
        self.mode == SecurityMode::Paranoid || self.is_production(ctx.branch.as_deref())
    }

    pub fn evaluate(&self, op: &Operation, ctx: &GuardContext) -> Verdict {
        if self.mode == SecurityMode::Off {
            return Verdict::disabled();
        }
        match op {
            Operation::Command(cmd) => self.evaluate_command(cmd, ctx),
            Operation::Write(path) | Operation::Edit(path) | Operation::Read(path) => {
                self.evaluate_path(path, op.is_write(), ctx)
            }
            Operation::Other(_) => Verdict::allow(),
        }
    }

    fn evaluate_command(&self, cmd: &str, ctx: &GuardContext) -> Verdict {
        let Some(rule) = self.rules.first_command_match(cmd) else {
            return Verdict::allow();
        };
        let decision = match rule.action {
            RuleAction::Block | RuleAction::BlockOnWrite => Decision::Block,
            RuleAction::BlockIfStrict if self.strict(ctx) => Decision::Block,
            RuleAction::BlockIfStrict | RuleAction::Warn => Decision::Warn,
        };
        let message = match decision {
            Decision::Block => format!("blocked {}: {cmd}", rule.label()),
            _ => format!("caution, {}: {cmd}", rule.label()),
        };
        Verdict::new(decision, rule.category.as_str(), message).with_rule(rule)
    }

    fn evaluate_path(&self, path: &str, is_write: bool, ctx: &GuardContext) -> Verdict {
        if has_traversal(path) {
            return Verdict::new(
                Decision::Block,
                "path_traversal",
                format!("path traversal in {path}"),
            );
        }

        let normalized = normalize_path(path, ctx.cwd.as_deref());
        if let Some(rule) = self.rules.first_path_match(&normalized, is_write) {
            let decision = match rule.action {
                RuleAction::Block => Decision::Block,
                RuleAction::BlockOnWrite if is_write => Decision::Block,
                RuleAction::BlockOnWrite if self.mode == SecurityMode::Paranoid => {
                    Decision::Block
                }
                RuleAction::BlockOnWrite => Decision::Warn,
                RuleAction::BlockIfStrict if self.strict(ctx) => Decision::Block,
                RuleAction::BlockIfStrict | RuleAction::Warn => Decision::Warn,
            };
            let verb = if is_write { "write to" } else { "read of" };
            let message = match decision {
                Decision::Block => format!("blocked {verb} {}: {path}", rule.label()),
                _ => format!("caution, {verb} {}: {path}", rule.label()),
            };
            return Verdict::new(decision, rule.category.as_str(), message).with_rule(rule);
        }

        if !is_write {
            if let Some(size) = file_size(&normalized) {
                if size > self.large_read_bytes {
                    return Verdict::new(
                        Decision::Warn,
                        "large_file_read",
                        format!("reading {size} bytes from {path}"),
                    );
                }
            }
        }

        Verdict::allow()
    }
}

fn file_size(path: &str) -> Option<u64> {
    std::fs::metadata(path).ok().filter(|m| m.is_file()).map(|m| m.len())
}
