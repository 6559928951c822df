//! Per-file-kind checks. Each function appends to a `Findings`; a tool that
//! is disabled in config or missing from `PATH` is skipped silently.

use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

use super::runner::{FixCommand, ToolRunner};
use super::{IssueType, ProjectArea, QualityIssue};
use crate::config::QualityConfig;
use crate::error::Result;

static PYLINT_SCORE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"rated at (-?\d+(?:\.\d+)?)/10").unwrap());

const HTML5LIB_CHECK: &str = "import sys, html5lib\n\
html5lib.HTMLParser(strict=True).parse(open(sys.argv[1], 'rb'))";

#[derive(Debug, Default)]
pub(crate) struct Findings {
    pub issues: Vec<QualityIssue>,
    pub fixes: Vec<FixCommand>,
}

impl Findings {
    fn issue(&mut self, issue_type: IssueType, file: &str, details: String) {
        self.issues.push(QualityIssue {
            issue_type,
            file: file.to_string(),
            details,
        });
    }

    fn fix(&mut self, fix: FixCommand) {
        if !self.fixes.contains(&fix) {
            self.fixes.push(fix);
        }
    }
}

/// Shared inputs for every check of one file.
pub(crate) struct FileCheck<'a, R: ToolRunner> {
    pub config: &'a QualityConfig,
    pub runner: &'a R,
    pub cwd: Option<&'a Path>,
    pub file: &'a str,
}

impl<R: ToolRunner> FileCheck<'_, R> {
    fn enabled(&self, tool: &str, program: &str) -> bool {
        if !self.config.tool_enabled(tool) {
            return false;
        }
        let found = self.runner.available(program);
        if !found {
            tracing::debug!(tool, "not installed, skipping");
        }
        found
    }

    fn run(&self, program: &str, args: Vec<String>) -> Result<super::runner::ToolOutput> {
        self.runner.run(program, &args, self.cwd)
    }

    /// Built-in line width check. At most one issue per file.
    pub fn line_width(&self, content: &str, out: &mut Findings) {
        let max = self.config.max_line_length;
        let long: Vec<usize> = content
            .lines()
            .enumerate()
            .filter(|(_, line)| line.chars().count() > max)
            .map(|(i, _)| i + 1)
            .collect();
        let Some(first) = long.first() else {
            return;
        };
        out.issue(
            IssueType::Formatting,
            self.file,
            format!(
                "{} line(s) longer than {max} characters (first at line {first})",
                long.len()
            ),
        );
        out.fix(FixCommand {
            program: "autopep8".into(),
            args: vec![
                "--in-place".into(),
                "--aggressive".into(),
                format!("--max-line-length={max}"),
                self.file.to_string(),
            ],
        });
    }

    pub fn flake8(&self, out: &mut Findings) -> Result<()> {
        if !self.enabled("flake8", "flake8") {
            return Ok(());
        }
        let output = self.run(
            "flake8",
            vec![
                format!("--max-line-length={}", self.config.max_line_length),
                "--extend-ignore=E501".into(),
                self.file.to_string(),
            ],
        )?;
        if !output.success() {
            out.issue(IssueType::Lint, self.file, output.combined());
            out.fix(FixCommand::new("autopep8", &["--in-place", self.file]));
        }
        Ok(())
    }

    pub fn pylint(&self, area: ProjectArea, out: &mut Findings) -> Result<()> {
        if !self.enabled("pylint", "pylint") {
            return Ok(());
        }
        let output = self.run(
            "pylint",
            vec![
                "--score=y".into(),
                "--disable=C0301".into(),
                self.file.to_string(),
            ],
        )?;
        let Some(score) = parse_pylint_score(&output.stdout) else {
            tracing::debug!(file = self.file, "no pylint score in output");
            return Ok(());
        };
        let minimum = area.threshold(&self.config.thresholds);
        if score < minimum {
            out.issue(
                IssueType::Score,
                self.file,
                format!("pylint score {score:.2} below {minimum:.1} for {area} code"),
            );
        }
        Ok(())
    }

    pub fn jshint(&self, out: &mut Findings) -> Result<()> {
        if !self.enabled("jshint", "jshint") {
            return Ok(());
        }
        let output = self.run("jshint", vec![self.file.to_string()])?;
        if !output.success() {
            out.issue(IssueType::Lint, self.file, output.combined());
        }
        Ok(())
    }

    pub fn html5lib(&self, out: &mut Findings) -> Result<()> {
        if !self.enabled("html5lib", "python3") {
            return Ok(());
        }
        let output = self.run(
            "python3",
            vec!["-c".into(), HTML5LIB_CHECK.into(), self.file.to_string()],
        )?;
        if output.success() {
            return Ok(());
        }
        if output.stderr.contains("ModuleNotFoundError") {
            tracing::debug!("html5lib module not installed, skipping");
            return Ok(());
        }
        out.issue(IssueType::Syntax, self.file, output.combined());
        Ok(())
    }

    pub fn shellcheck(&self, out: &mut Findings) -> Result<()> {
        if !self.enabled("shellcheck", "shellcheck") {
            return Ok(());
        }
        let output = self.run(
            "shellcheck",
            vec!["-f".into(), "gcc".into(), self.file.to_string()],
        )?;
        if !output.success() {
            out.issue(IssueType::Lint, self.file, output.combined());
        }
        Ok(())
    }
}

pub fn parse_pylint_score(output: &str) -> Option<f32> {
    PYLINT_SCORE
        .captures(output)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}
