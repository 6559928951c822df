use std::path::Path;
use std::process::Command;

use crate::error::{Result, WardenError};

/// Captured result of one external tool run.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    /// Exit code; None when the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// stdout and stderr, trimmed and joined.
    pub fn combined(&self) -> String {
        let out = self.stdout.trim();
        let err = self.stderr.trim();
        match (out.is_empty(), err.is_empty()) {
            (false, false) => format!("{out}\n{err}"),
            (false, true) => out.to_string(),
            _ => err.to_string(),
        }
    }
}

/// Seam between the checker and the processes it spawns.
pub trait ToolRunner {
    fn available(&self, program: &str) -> bool;
    fn run(&self, program: &str, args: &[String], cwd: Option<&Path>) -> Result<ToolOutput>;
}

/// Runs real binaries found on `PATH`. Arguments are passed as a vector,
/// never through a shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl ToolRunner for SystemRunner {
    fn available(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }

    fn run(&self, program: &str, args: &[String], cwd: Option<&Path>) -> Result<ToolOutput> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        tracing::debug!(program, ?args, "running tool");
        let output = cmd
            .output()
            .map_err(|e| WardenError::Tool(format!("failed to run {program}: {e}")))?;
        Ok(ToolOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// A fix suggestion, kept as an argument vector so it can be shown to the
/// user and executed without quoting issues.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FixCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl FixCommand {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

impl std::fmt::Display for FixCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.contains(char::is_whitespace) {
                write!(f, " '{arg}'")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fix_command_display() {
        let fix = FixCommand::new("autopep8", &["--in-place", "src/my file.py"]);
        assert_eq!(fix.to_string(), "autopep8 --in-place 'src/my file.py'");
    }

    #[test]
    fn test_combined_output() {
        let out = ToolOutput {
            status: Some(1),
            stdout: "a.sh:1:1: warning\n".into(),
            stderr: String::new(),
        };
        assert!(!out.success());
        assert_eq!(out.combined(), "a.sh:1:1: warning");
    }

    #[test]
    fn test_missing_program_is_tool_error() {
        let err = SystemRunner
            .run("hookwarden-no-such-tool", &[], None)
            .unwrap_err();
        assert!(matches!(err, WardenError::Tool(_)));
        assert!(err.is_infrastructure());
        assert!(!SystemRunner.available("hookwarden-no-such-tool"));
    }
}
