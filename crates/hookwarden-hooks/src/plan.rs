use std::sync::LazyLock;

use hookwarden_core::event::{HookInvocation, Operation};
use hookwarden_core::{COMMIT_GUARD, QUALITY_CHECK, SECURITY_GUARD};
use regex::Regex;

static GIT_COMMIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bgit\s+(-[a-zA-Z]\s+\S+\s+)*commit\b").unwrap());

/// One hook to run for an invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookRun {
    SecurityGuard,
    CommitGuard,
    QualityCheck { file: String },
}

impl HookRun {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SecurityGuard => SECURITY_GUARD,
            Self::CommitGuard => COMMIT_GUARD,
            Self::QualityCheck { .. } => QUALITY_CHECK,
        }
    }

    pub fn file(&self) -> Option<&str> {
        match self {
            Self::QualityCheck { file } => Some(file),
            _ => None,
        }
    }
}

/// Decide which hooks an invocation triggers. An empty plan means exit 0.
pub fn plan(inv: &HookInvocation) -> Vec<HookRun> {
    let op = inv.operation();
    match inv.hook_event_name.as_deref() {
        Some("PreToolUse") | None => plan_pre_tool_use(&op),
        Some("PostToolUse") => plan_post_tool_use(&op),
        Some(other) => {
            tracing::debug!("unhandled hook event: {other}");
            Vec::new()
        }
    }
}

fn plan_pre_tool_use(op: &Operation) -> Vec<HookRun> {
    let mut runs = vec![HookRun::SecurityGuard];
    if let Operation::Command(cmd) = op {
        if GIT_COMMIT.is_match(cmd) {
            runs.push(HookRun::CommitGuard);
        }
    }
    runs
}

fn plan_post_tool_use(op: &Operation) -> Vec<HookRun> {
    match op {
        Operation::Write(path) | Operation::Edit(path) => vec![HookRun::QualityCheck {
            file: path.clone(),
        }],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_invocation(event: Option<&str>, tool: &str, input: serde_json::Value) -> HookInvocation {
        let mut json = serde_json::json!({
            "session_id": "test-session",
            "cwd": "/home/user/project",
            "tool_name": tool,
            "tool_input": input,
        });
        if let Some(name) = event {
            json["hook_event_name"] = name.into();
        }
        HookInvocation::from_json(&json.to_string()).unwrap()
    }

    #[test]
    fn test_pre_tool_use_runs_guard() {
        let inv = make_invocation(
            Some("PreToolUse"),
            "Bash",
            serde_json::json!({"command": "ls"}),
        );
        assert_eq!(plan(&inv), vec![HookRun::SecurityGuard]);
    }

    #[test]
    fn test_missing_event_name_is_pre_tool_use() {
        let inv = make_invocation(None, "Write", serde_json::json!({"file_path": "a.py"}));
        assert_eq!(plan(&inv), vec![HookRun::SecurityGuard]);
    }

    #[test]
    fn test_git_commit_adds_commit_guard() {
        for cmd in [
            "git commit -m 'wip'",
            "git -C repo commit --amend",
            "cargo fmt && git commit -am x",
        ] {
            let inv = make_invocation(
                Some("PreToolUse"),
                "Bash",
                serde_json::json!({"command": cmd}),
            );
            assert_eq!(
                plan(&inv),
                vec![HookRun::SecurityGuard, HookRun::CommitGuard],
                "{cmd}"
            );
        }
    }

    #[test]
    fn test_commit_lookalikes_do_not_add_commit_guard() {
        for cmd in ["git log --grep commit-guard", "echo commit", "git commits"] {
            let inv = make_invocation(
                Some("PreToolUse"),
                "Bash",
                serde_json::json!({"command": cmd}),
            );
            assert_eq!(plan(&inv), vec![HookRun::SecurityGuard], "{cmd}");
        }
    }

    #[test]
    fn test_post_tool_use_edit_runs_quality() {
        let inv = make_invocation(
            Some("PostToolUse"),
            "Edit",
            serde_json::json!({"file_path": "src/app.py", "old_string": "a", "new_string": "b"}),
        );
        let runs = plan(&inv);
        assert_eq!(
            runs,
            vec![HookRun::QualityCheck {
                file: "src/app.py".into()
            }]
        );
        assert_eq!(runs[0].name(), QUALITY_CHECK);
        assert_eq!(runs[0].file(), Some("src/app.py"));
    }

    #[test]
    fn test_post_tool_use_bash_and_read_skip() {
        let bash = make_invocation(
            Some("PostToolUse"),
            "Bash",
            serde_json::json!({"command": "ls"}),
        );
        assert!(plan(&bash).is_empty());
        let read = make_invocation(
            Some("PostToolUse"),
            "Read",
            serde_json::json!({"file_path": "a.py"}),
        );
        assert!(plan(&read).is_empty());
    }

    #[test]
    fn test_other_events_skip() {
        let inv = make_invocation(Some("Stop"), "", serde_json::json!({}));
        assert!(plan(&inv).is_empty());
    }
}
