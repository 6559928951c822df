//! Quality checker.
//!
//! Dispatches each changed file to the checks for its kind, collects issues
//! and fix commands, and turns the outcome into an exit code for the calling
//! context: advisory on edit, a veto on commit, and an apply-and-recheck loop
//! in fix mode.

pub mod linters;
pub mod runner;

use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::config::{AreaThresholds, QualityConfig, QualityMode};
use crate::error::{Result, WardenError};
use linters::{FileCheck, Findings};
pub use runner::{FixCommand, SystemRunner, ToolOutput, ToolRunner};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Python,
    JavaScript,
    Html,
    Shell,
    NonCode,
}

impl FileKind {
    pub fn from_path(path: &str) -> Self {
        let ext = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("py") => Self::Python,
            Some("js" | "mjs" | "cjs" | "jsx") => Self::JavaScript,
            Some("html" | "htm") => Self::Html,
            Some("sh" | "bash") => Self::Shell,
            _ => Self::NonCode,
        }
    }

    pub fn is_code(&self) -> bool {
        *self != Self::NonCode
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectArea {
    Backend,
    Frontend,
    Other,
}

impl ProjectArea {
    pub fn from_path(path: &str) -> Self {
        for component in Path::new(path).components() {
            let name = component.as_os_str().to_string_lossy().to_ascii_lowercase();
            match name.as_str() {
                "backend" => return Self::Backend,
                "frontend" => return Self::Frontend,
                _ => {}
            }
        }
        Self::Other
    }

    /// Minimum pylint score for this area.
    pub fn threshold(&self, thresholds: &AreaThresholds) -> f32 {
        match self {
            Self::Backend => thresholds.backend,
            Self::Frontend => thresholds.frontend,
            Self::Other => thresholds.other,
        }
    }
}

impl std::fmt::Display for ProjectArea {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Backend => write!(f, "backend"),
            Self::Frontend => write!(f, "frontend"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Why the checker is being run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckContext {
    /// After a Write/Edit tool call.
    Edit,
    /// Before `git commit`.
    Commit,
    /// Apply fixes until clean.
    Fix,
}

impl std::fmt::Display for CheckContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Edit => write!(f, "edit"),
            Self::Commit => write!(f, "commit"),
            Self::Fix => write!(f, "fix"),
        }
    }
}

impl std::str::FromStr for CheckContext {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "edit" => Ok(Self::Edit),
            "commit" => Ok(Self::Commit),
            "fix" => Ok(Self::Fix),
            other => Err(WardenError::InvalidInput(format!(
                "unknown check context '{other}' (expected edit, commit or fix)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueType {
    Formatting,
    Lint,
    Syntax,
    Score,
}

impl IssueType {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Formatting => "formatting",
            Self::Lint => "lint",
            Self::Syntax => "syntax",
            Self::Score => "score",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityIssue {
    pub issue_type: IssueType,
    pub file: String,
    pub details: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityReport {
    pub context: CheckContext,
    pub files: Vec<String>,
    pub issues: Vec<QualityIssue>,
    pub fixes: Vec<FixCommand>,
    /// Reason the check was skipped, if it was.
    pub bypassed: Option<String>,
    /// Fix rounds applied (fix context only).
    pub rounds: usize,
}

impl QualityReport {
    fn bypass(context: CheckContext, files: Vec<String>, reason: &str) -> Self {
        Self {
            context,
            files,
            issues: Vec::new(),
            fixes: Vec::new(),
            bypassed: Some(reason.to_string()),
            rounds: 0,
        }
    }

    pub fn passed(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn exit_code(&self, hard_fail_on_edit: bool) -> i32 {
        if self.passed() {
            return 0;
        }
        match self.context {
            CheckContext::Edit if hard_fail_on_edit => 1,
            CheckContext::Edit => 0,
            CheckContext::Commit | CheckContext::Fix => 2,
        }
    }
}

pub struct QualityChecker<R: ToolRunner> {
    config: QualityConfig,
    runner: R,
    cwd: Option<PathBuf>,
}

impl<R: ToolRunner> QualityChecker<R> {
    pub fn new(config: &QualityConfig, runner: R) -> Self {
        Self {
            config: config.clone(),
            runner,
            cwd: None,
        }
    }

    /// Resolve relative paths and run tools from `dir`.
    pub fn with_cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    /// Check `files` for `context`. An empty list in commit or fix context
    /// means the staged files.
    pub fn run(&self, context: CheckContext, files: &[String]) -> Result<QualityReport> {
        if self.config.mode == QualityMode::Off {
            return Ok(QualityReport::bypass(context, files.to_vec(), "quality mode off"));
        }

        let mut targets: Vec<String> = files.to_vec();
        match context {
            CheckContext::Edit if self.config.mode == QualityMode::Project => {
                for file in self.modified_files()? {
                    if !targets.contains(&file) {
                        targets.push(file);
                    }
                }
            }
            CheckContext::Commit | CheckContext::Fix if targets.is_empty() => {
                targets = self.staged_files()?;
            }
            _ => {}
        }

        if targets.is_empty() {
            return Ok(QualityReport::bypass(context, targets, "no files"));
        }
        if !targets.iter().any(|f| FileKind::from_path(f).is_code()) {
            return Ok(QualityReport::bypass(context, targets, "non-code file"));
        }

        if context == CheckContext::Fix {
            return self.fix_until_clean(targets);
        }

        let findings = self.check_all(&targets)?;
        Ok(QualityReport {
            context,
            files: targets,
            issues: findings.issues,
            fixes: findings.fixes,
            bypassed: None,
            rounds: 0,
        })
    }

    /// Apply fixes and re-check until clean, up to `fix_rounds` times.
    pub fn fix_until_clean(&self, files: Vec<String>) -> Result<QualityReport> {
        let mut findings = self.check_all(&files)?;
        let mut rounds = 0;
        while !findings.issues.is_empty()
            && !findings.fixes.is_empty()
            && rounds < self.config.fix_rounds
        {
            self.apply_fixes(&findings.fixes)?;
            rounds += 1;
            findings = self.check_all(&files)?;
        }
        tracing::debug!(rounds, remaining = findings.issues.len(), "fix loop done");
        Ok(QualityReport {
            context: CheckContext::Fix,
            files,
            issues: findings.issues,
            fixes: findings.fixes,
            bypassed: None,
            rounds,
        })
    }

    fn apply_fixes(&self, fixes: &[FixCommand]) -> Result<()> {
        for fix in fixes {
            if !self.runner.available(&fix.program) {
                tracing::debug!(program = %fix.program, "fixer not installed, skipping");
                continue;
            }
            let output = self.runner.run(&fix.program, &fix.args, self.cwd.as_deref())?;
            if !output.success() {
                tracing::debug!(fix = %fix, output = %output.combined(), "fix command failed");
            }
        }
        Ok(())
    }

    fn check_all(&self, files: &[String]) -> Result<Findings> {
        let mut findings = Findings::default();
        for file in files {
            self.check_file(file, &mut findings)?;
        }
        Ok(findings)
    }

    fn check_file(&self, file: &str, out: &mut Findings) -> Result<()> {
        let kind = FileKind::from_path(file);
        if !kind.is_code() {
            return Ok(());
        }
        let check = FileCheck {
            config: &self.config,
            runner: &self.runner,
            cwd: self.cwd.as_deref(),
            file,
        };
        match kind {
            FileKind::Python => {
                let content = match std::fs::read(self.resolve(file)) {
                    Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        tracing::debug!(file, "file vanished before check");
                        return Ok(());
                    }
                    Err(e) => return Err(e.into()),
                };
                check.line_width(&content, out);
                check.flake8(out)?;
                check.pylint(ProjectArea::from_path(file), out)?;
            }
            FileKind::JavaScript => check.jshint(out)?,
            FileKind::Html => check.html5lib(out)?,
            FileKind::Shell => check.shellcheck(out)?,
            FileKind::NonCode => {}
        }
        Ok(())
    }

    fn resolve(&self, file: &str) -> PathBuf {
        match self.cwd {
            Some(ref dir) if Path::new(file).is_relative() => dir.join(file),
            _ => PathBuf::from(file),
        }
    }

    fn git_lines(&self, args: &[&str]) -> Result<Vec<String>> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        let output = self.runner.run("git", &args, self.cwd.as_deref())?;
        if !output.success() {
            return Err(WardenError::Tool(format!(
                "git {} failed: {}",
                args.join(" "),
                output.combined()
            )));
        }
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    /// Files added, copied or modified in the index. Git names them relative
    /// to the repository root; they come back relative to `cwd` when they sit
    /// under it and absolute otherwise.
    pub fn staged_files(&self) -> Result<Vec<String>> {
        let root = self
            .git_lines(&["rev-parse", "--show-toplevel"])?
            .into_iter()
            .next()
            .map(PathBuf::from)
            .ok_or_else(|| WardenError::Tool("git rev-parse printed no top-level".into()))?;
        let base = self
            .cwd
            .as_deref()
            .map(|dir| dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf()));
        let staged = self.git_lines(&["diff", "--cached", "--name-only", "--diff-filter=ACM"])?;
        Ok(staged
            .into_iter()
            .map(|name| {
                let full = root.join(name);
                let shown = base.as_deref().and_then(|b| full.strip_prefix(b).ok());
                shown.unwrap_or(full.as_path()).to_string_lossy().to_string()
            })
            .collect())
    }

    /// Tracked files modified in the working tree.
    pub fn modified_files(&self) -> Result<Vec<String>> {
        self.git_lines(&["ls-files", "--modified"])
    }
}
