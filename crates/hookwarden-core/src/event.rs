use chrono::{DateTime, Utc};
use serde::Deserialize;

/// JSON payload received from the host runtime on stdin.
///
/// Only `tool_name` and `tool_input` are guaranteed; the remaining fields are
/// filled in by newer hosts and default to `None`.
#[derive(Debug, Clone, Deserialize)]
pub struct HookInvocation {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub hook_event_name: Option<String>,
    #[serde(default)]
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: ToolInput,
    #[serde(skip, default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolInput {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default, alias = "filePath", alias = "path")]
    pub file_path: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// What the tool call is about to do, as far as the guard is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Command(String),
    Write(String),
    Edit(String),
    Read(String),
    Other(String),
}

impl Operation {
    /// The path for file operations.
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Write(p) | Self::Edit(p) | Self::Read(p) => Some(p),
            _ => None,
        }
    }

    /// Write and Edit modify the file; Read does not.
    pub fn is_write(&self) -> bool {
        matches!(self, Self::Write(_) | Self::Edit(_))
    }

    /// Short label for log records.
    pub fn tool(&self) -> &'static str {
        match self {
            Self::Command(_) => "Bash",
            Self::Write(_) => "Write",
            Self::Edit(_) => "Edit",
            Self::Read(_) => "Read",
            Self::Other(_) => "Other",
        }
    }

    /// The command or path the operation targets.
    pub fn target(&self) -> &str {
        match self {
            Self::Command(c) => c,
            Self::Write(p) | Self::Edit(p) | Self::Read(p) => p,
            Self::Other(t) => t,
        }
    }
}

impl HookInvocation {
    /// Parse a single JSON object.
    pub fn from_json(input: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(input)?)
    }

    /// Classify the tool call. Missing command or path degrades to `Other`.
    pub fn operation(&self) -> Operation {
        let input = &self.tool_input;
        match (self.tool_name.as_str(), &input.command, &input.file_path) {
            ("Bash", Some(cmd), _) => Operation::Command(cmd.clone()),
            ("Write", _, Some(path)) => Operation::Write(path.clone()),
            ("Edit" | "MultiEdit", _, Some(path)) => Operation::Edit(path.clone()),
            ("Read", _, Some(path)) => Operation::Read(path.clone()),
            (tool, _, _) => Operation::Other(tool.to_string()),
        }
    }

    /// Session id from the payload, then `HOOKWARDEN_SESSION_ID`, then "unknown".
    pub fn session(&self) -> String {
        resolve_session_id(self.session_id.as_deref())
    }
}

pub fn resolve_session_id(explicit: Option<&str>) -> String {
    if let Some(id) = explicit.filter(|id| !id.is_empty()) {
        return id.to_string();
    }
    std::env::var("HOOKWARDEN_SESSION_ID")
        .ok()
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bash_invocation() {
        let inv = HookInvocation::from_json(
            r#"{"tool_name":"Bash","tool_input":{"command":"ls -la","description":"list"}}"#,
        )
        .unwrap();
        assert_eq!(inv.operation(), Operation::Command("ls -la".into()));
        assert_eq!(inv.tool_input.description.as_deref(), Some("list"));
        assert!(inv.hook_event_name.is_none());
    }

    #[test]
    fn test_file_path_aliases() {
        let inv = HookInvocation::from_json(
            r#"{"tool_name":"Edit","tool_input":{"filePath":"/src/app.py"}}"#,
        )
        .unwrap();
        assert_eq!(inv.operation(), Operation::Edit("/src/app.py".into()));

        let inv =
            HookInvocation::from_json(r#"{"tool_name":"Read","tool_input":{"path":"notes.md"}}"#)
                .unwrap();
        assert_eq!(inv.operation(), Operation::Read("notes.md".into()));
    }

    #[test]
    fn test_multiedit_is_edit() {
        let inv = HookInvocation::from_json(
            r#"{"tool_name":"MultiEdit","tool_input":{"file_path":"a.rs"}}"#,
        )
        .unwrap();
        assert!(inv.operation().is_write());
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let inv = HookInvocation::from_json(
            r#"{"session_id":"s1","cwd":"/p","hook_event_name":"PreToolUse","tool_name":"Glob",
                "tool_input":{"pattern":"**/*.rs"},"tool_use_id":"x"}"#,
        )
        .unwrap();
        assert_eq!(inv.operation(), Operation::Other("Glob".into()));
        assert_eq!(inv.session(), "s1");
    }

    #[test]
    fn test_bash_without_command_is_other() {
        let inv = HookInvocation::from_json(r#"{"tool_name":"Bash","tool_input":{}}"#).unwrap();
        assert_eq!(inv.operation(), Operation::Other("Bash".into()));
    }

    #[test]
    fn test_malformed_json_errors() {
        assert!(HookInvocation::from_json("{not json").is_err());
    }

    #[test]
    fn test_operation_accessors() {
        let op = Operation::Read("/etc/hosts".into());
        assert_eq!(op.path(), Some("/etc/hosts"));
        assert!(!op.is_write());
        assert_eq!(op.tool(), "Read");
        assert_eq!(Operation::Command("ls".into()).target(), "ls");
    }
}
