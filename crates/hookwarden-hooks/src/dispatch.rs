//! Drives planned hook runs through the monitor state machine
//! (`start -> success | failure | bypass`, `brake` preempting `start`).

use std::path::PathBuf;
use std::time::Instant;

use chrono::Utc;
use hookwarden_core::brake::EmergencyBrake;
use hookwarden_core::config::WardenConfig;
use hookwarden_core::debounce::Debouncer;
use hookwarden_core::event::HookInvocation;
use hookwarden_core::guard::{Decision, Guard, GuardContext};
use hookwarden_core::monitor::audit::AuditLog;
use hookwarden_core::monitor::{EventKind, Monitor};
use hookwarden_core::quality::{CheckContext, QualityChecker, QualityReport, SystemRunner};
use hookwarden_core::state::FileStore;

use crate::plan::HookRun;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Block,
    Warn,
    Info,
}

/// A line for the user on stderr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub hook: &'static str,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub hook: &'static str,
    pub exit_code: i32,
    pub event: EventKind,
    pub notices: Vec<Notice>,
}

impl Outcome {
    fn new(hook: &'static str, event: EventKind) -> Self {
        Self {
            hook,
            exit_code: 0,
            event,
            notices: Vec::new(),
        }
    }

    fn notice(mut self, level: NoticeLevel, text: impl Into<String>) -> Self {
        self.notices.push(Notice {
            level,
            hook: self.hook,
            text: text.into(),
        });
        self
    }
}

pub struct Dispatcher {
    config: WardenConfig,
    monitor: Monitor,
    audit: AuditLog,
    brake: EmergencyBrake<FileStore>,
    debouncer: Debouncer<FileStore>,
    session_id: String,
    cwd: Option<PathBuf>,
}

impl Dispatcher {
    pub fn new(config: WardenConfig, inv: &HookInvocation) -> Self {
        let session_id = inv.session();
        Self {
            monitor: Monitor::new(&config, session_id.clone()),
            audit: AuditLog::new(&config),
            brake: EmergencyBrake::open(&config),
            debouncer: Debouncer::open(&config),
            cwd: inv.cwd.as_ref().map(PathBuf::from),
            session_id,
            config,
        }
    }

    /// Run every planned hook; the exit code is the maximum over runs.
    pub fn dispatch(&self, inv: &HookInvocation, runs: &[HookRun]) -> (i32, Vec<Outcome>) {
        let outcomes: Vec<Outcome> = if self.config.general.bypass {
            runs.iter().map(|run| self.bypass(run)).collect()
        } else {
            runs.iter().map(|run| self.execute(inv, run)).collect()
        };
        let code = outcomes.iter().map(|o| o.exit_code).max().unwrap_or(0);
        (code, outcomes)
    }

    fn bypass(&self, run: &HookRun) -> Outcome {
        self.monitor
            .record(run.name(), EventKind::Bypass, run.file(), 0, "bypass enabled");
        Outcome::new(run.name(), EventKind::Bypass)
    }

    fn execute(&self, inv: &HookInvocation, run: &HookRun) -> Outcome {
        match run {
            HookRun::SecurityGuard => self.security_guard(inv),
            HookRun::CommitGuard => self.commit_guard(),
            HookRun::QualityCheck { file } => self.quality_check(file),
        }
    }

    fn finish(
        &self,
        hook: &'static str,
        event: EventKind,
        file: Option<&str>,
        started: Instant,
        details: &str,
    ) {
        let ms = started.elapsed().as_millis() as u64;
        self.monitor.record(hook, event, file, ms, details);
    }

    /// Infrastructure failure: count it, log it, never block.
    fn failed(
        &self,
        hook: &'static str,
        file: Option<&str>,
        started: Instant,
        err: &dyn std::fmt::Display,
    ) -> Outcome {
        tracing::warn!("{hook}: {err}");
        self.finish(hook, EventKind::Failure, file, started, &err.to_string());
        self.count_failure(hook);
        Outcome::new(hook, EventKind::Failure)
            .notice(NoticeLevel::Warn, format!("internal error: {err}"))
    }

    /// Only the quality check is braked, so only its runs feed the record.
    fn count_failure(&self, hook: &str) {
        if !honors_brake(hook) {
            return;
        }
        match self.brake.record_failure(hook) {
            Ok(record) if record.brake_active => {
                tracing::warn!(
                    "{hook}: emergency brake engaged after {} failures",
                    record.consecutive_failures
                );
            }
            Ok(_) => {}
            Err(e) => tracing::debug!("{hook}: failed to record failure: {e}"),
        }
    }

    fn count_success(&self, hook: &str) {
        if !honors_brake(hook) {
            return;
        }
        if let Err(e) = self.brake.record_success(hook) {
            tracing::debug!("{hook}: failed to clear failure record: {e}");
        }
    }

    fn security_guard(&self, inv: &HookInvocation) -> Outcome {
        let hook = hookwarden_core::SECURITY_GUARD;
        let started = Instant::now();
        self.monitor.record(hook, EventKind::Start, None, 0, "");

        let guard = match Guard::from_config(&self.config.security) {
            Ok(g) => g,
            Err(e) => return self.failed(hook, None, started, &e),
        };
        let op = inv.operation();
        let ctx = GuardContext::detect(self.cwd.as_deref());
        let verdict = guard.evaluate(&op, &ctx);

        let entry = verdict.to_audit(&op, guard.mode(), &self.session_id, Utc::now());
        if let Err(e) = self.audit.record(&entry) {
            tracing::debug!("{hook}: failed to write audit entry: {e}");
        }

        let details = format!("{} {}", verdict.decision, verdict.event_type);
        self.finish(hook, EventKind::Success, op.path(), started, &details);
        self.count_success(hook);

        let mut outcome = Outcome::new(hook, EventKind::Success);
        outcome.exit_code = verdict.exit_code();
        match verdict.decision {
            Decision::Block => outcome.notice(NoticeLevel::Block, verdict.message),
            Decision::Warn => outcome.notice(NoticeLevel::Warn, verdict.message),
            Decision::Allow => outcome,
        }
    }

    fn checker(&self) -> QualityChecker<SystemRunner> {
        let checker = QualityChecker::new(&self.config.quality, SystemRunner);
        match self.cwd {
            Some(ref dir) => checker.with_cwd(dir),
            None => checker,
        }
    }

    fn commit_guard(&self) -> Outcome {
        let hook = hookwarden_core::COMMIT_GUARD;
        let started = Instant::now();
        self.monitor.record(hook, EventKind::Start, None, 0, "");

        let report = match self.checker().run(CheckContext::Commit, &[]) {
            Ok(r) => r,
            Err(e) => return self.failed(hook, None, started, &e),
        };
        if let Some(ref reason) = report.bypassed {
            self.finish(hook, EventKind::Bypass, None, started, reason);
            return Outcome::new(hook, EventKind::Bypass);
        }

        let details = summarize(&report);
        self.finish(hook, EventKind::Success, None, started, &details);
        self.count_success(hook);

        let mut outcome = Outcome::new(hook, EventKind::Success);
        outcome.exit_code = report.exit_code(self.config.quality.hard_fail_on_edit);
        if outcome.exit_code != 0 {
            outcome = outcome.notice(NoticeLevel::Block, format!("commit vetoed: {details}"));
        }
        report_notices(outcome, &report, NoticeLevel::Info)
    }

    fn quality_check(&self, file: &str) -> Outcome {
        let hook = hookwarden_core::QUALITY_CHECK;
        let now = Utc::now();

        match self.brake.is_brake_active_at(hook, now) {
            Ok(true) => {
                self.monitor
                    .record(hook, EventKind::Brake, Some(file), 0, "emergency brake active");
                return Outcome::new(hook, EventKind::Brake);
            }
            Ok(false) => {}
            Err(e) => tracing::debug!("{hook}: brake check failed: {e}"),
        }

        match self.debouncer.should_run_at(hook, now) {
            Ok(false) => {
                self.monitor.record(hook, EventKind::Bypass, Some(file), 0, "debounced");
                return Outcome::new(hook, EventKind::Bypass);
            }
            Ok(true) => {}
            Err(e) => tracing::debug!("{hook}: debounce check failed: {e}"),
        }
        if let Ok(purged) = self.debouncer.purge_stale(now) {
            if !purged.is_empty() {
                tracing::debug!("purged stale locks: {}", purged.join(", "));
            }
        }

        let started = Instant::now();
        self.monitor.record(hook, EventKind::Start, Some(file), 0, "");
        let report = match self.checker().run(CheckContext::Edit, &[file.to_string()]) {
            Ok(r) => r,
            Err(e) => return self.failed(hook, Some(file), started, &e),
        };
        if let Some(ref reason) = report.bypassed {
            self.finish(hook, EventKind::Bypass, Some(file), started, reason);
            return Outcome::new(hook, EventKind::Bypass);
        }

        let details = summarize(&report);
        let mut outcome = if report.passed() {
            self.finish(hook, EventKind::Success, Some(file), started, &details);
            self.count_success(hook);
            Outcome::new(hook, EventKind::Success)
        } else {
            self.finish(hook, EventKind::Failure, Some(file), started, &details);
            self.count_failure(hook);
            Outcome::new(hook, EventKind::Failure)
                .notice(NoticeLevel::Warn, format!("{file}: {details}"))
        };
        outcome.exit_code = report.exit_code(self.config.quality.hard_fail_on_edit);
        report_notices(outcome, &report, NoticeLevel::Info)
    }
}

fn honors_brake(hook: &str) -> bool {
    hook == hookwarden_core::QUALITY_CHECK
}

fn summarize(report: &QualityReport) -> String {
    if report.passed() {
        return format!("{} file(s) clean", report.files.len());
    }
    let mut kinds: Vec<&str> = report.issues.iter().map(|i| i.issue_type.label()).collect();
    kinds.dedup();
    format!("{} issue(s): {}", report.issues.len(), kinds.join(", "))
}

fn report_notices(mut outcome: Outcome, report: &QualityReport, level: NoticeLevel) -> Outcome {
    for issue in &report.issues {
        outcome = outcome.notice(
            level,
            format!("[{}] {}: {}", issue.issue_type.label(), issue.file, issue.details),
        );
    }
    for fix in &report.fixes {
        outcome = outcome.notice(level, format!("fix: {fix}"));
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use hookwarden_core::config::SecurityMode;

    fn config_in(dir: &std::path::Path) -> WardenConfig {
        let mut config = WardenConfig::default_config();
        config.paths.data_dir = Some(dir.join("data").to_string_lossy().to_string());
        config.paths.lock_dir = Some(dir.join("locks").to_string_lossy().to_string());
        config.quality.tools = Vec::new();
        config
    }

    fn invocation(dir: &std::path::Path, json: serde_json::Value) -> HookInvocation {
        let mut json = json;
        json["session_id"] = "test-session".into();
        json["cwd"] = dir.to_string_lossy().to_string().into();
        HookInvocation::from_json(&json.to_string()).unwrap()
    }

    fn run(config: WardenConfig, inv: &HookInvocation) -> (i32, Vec<Outcome>) {
        let runs = crate::plan::plan(inv);
        Dispatcher::new(config, inv).dispatch(inv, &runs)
    }

    #[test]
    fn test_guard_block_exits_one() {
        let tmp = tempfile::tempdir().unwrap();
        let inv = invocation(
            tmp.path(),
            serde_json::json!({"hook_event_name": "PreToolUse", "tool_name": "Bash", "tool_input": {"command": "rm -rf /"}}),
        );
        let config = config_in(tmp.path());
        let monitor = Monitor::new(&config, "test-session");
        let audit = AuditLog::new(&config);

        let (code, outcomes) = run(config, &inv);
        assert_eq!(code, 1);
        assert_eq!(outcomes[0].notices[0].level, NoticeLevel::Block);

        let events = monitor.events(Some(hookwarden_core::SECURITY_GUARD)).unwrap();
        let kinds: Vec<EventKind> = events.iter().map(|e| e.event).collect();
        assert_eq!(kinds, vec![EventKind::Start, EventKind::Success]);
        assert_eq!(audit.entries().unwrap()[0].event_type, "ultra_dangerous_command");
    }

    #[test]
    fn test_guard_off_allows() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = config_in(tmp.path());
        config.security.mode = SecurityMode::Off;
        let inv = invocation(
            tmp.path(),
            serde_json::json!({"tool_name": "Write", "tool_input": {"file_path": "/etc/passwd"}}),
        );
        let (code, outcomes) = run(config, &inv);
        assert_eq!(code, 0);
        assert!(outcomes[0].notices.is_empty());
    }

    #[test]
    fn test_bypass_logs_and_allows() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = config_in(tmp.path());
        config.general.bypass = true;
        let monitor = Monitor::new(&config, "test-session");
        let inv = invocation(
            tmp.path(),
            serde_json::json!({"tool_name": "Bash", "tool_input": {"command": "rm -rf /"}}),
        );
        let (code, outcomes) = run(config, &inv);
        assert_eq!(code, 0);
        assert_eq!(outcomes[0].event, EventKind::Bypass);
        let events = monitor.events(Some(hookwarden_core::SECURITY_GUARD)).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, EventKind::Bypass);
    }

    #[test]
    fn test_quality_failure_is_advisory_and_debounced() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("app.py"), format!("x = '{}'\n", "a".repeat(90))).unwrap();
        let config = config_in(tmp.path());
        let monitor = Monitor::new(&config, "test-session");
        let brake = EmergencyBrake::open(&config);
        let inv = invocation(
            tmp.path(),
            serde_json::json!({"hook_event_name": "PostToolUse", "tool_name": "Write", "tool_input": {"file_path": "app.py"}}),
        );

        let (code, outcomes) = run(config.clone(), &inv);
        assert_eq!(code, 0);
        assert_eq!(outcomes[0].event, EventKind::Failure);
        assert!(outcomes[0].notices.iter().any(|n| n.text.starts_with("fix: autopep8")));
        assert_eq!(
            brake.record(hookwarden_core::QUALITY_CHECK).unwrap().unwrap().consecutive_failures,
            1
        );

        let (code, outcomes) = run(config, &inv);
        assert_eq!(code, 0);
        assert_eq!(outcomes[0].event, EventKind::Bypass);
        let last = monitor.last_event(hookwarden_core::QUALITY_CHECK).unwrap().unwrap();
        assert_eq!(last.details, "debounced");
    }

    #[test]
    fn test_quality_hard_fail_exits_one() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("app.py"), format!("x = '{}'\n", "a".repeat(90))).unwrap();
        let mut config = config_in(tmp.path());
        config.quality.hard_fail_on_edit = true;
        let inv = invocation(
            tmp.path(),
            serde_json::json!({"hook_event_name": "PostToolUse", "tool_name": "Edit", "tool_input": {"file_path": "app.py"}}),
        );
        let (code, _) = run(config, &inv);
        assert_eq!(code, 1);
    }

    #[test]
    fn test_braked_quality_check_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_in(tmp.path());
        EmergencyBrake::open(&config)
            .activate(hookwarden_core::QUALITY_CHECK, 10)
            .unwrap();
        let inv = invocation(
            tmp.path(),
            serde_json::json!({"hook_event_name": "PostToolUse", "tool_name": "Write", "tool_input": {"file_path": "app.py"}}),
        );
        let (code, outcomes) = run(config, &inv);
        assert_eq!(code, 0);
        assert_eq!(outcomes[0].event, EventKind::Brake);
    }

    #[test]
    fn test_non_code_edit_logs_bypass() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_in(tmp.path());
        let monitor = Monitor::new(&config, "test-session");
        let inv = invocation(
            tmp.path(),
            serde_json::json!({"hook_event_name": "PostToolUse", "tool_name": "Edit", "tool_input": {"file_path": "README.md"}}),
        );
        let (code, outcomes) = run(config, &inv);
        assert_eq!(code, 0);
        assert_eq!(outcomes[0].event, EventKind::Bypass);
        let last = monitor.last_event(hookwarden_core::QUALITY_CHECK).unwrap().unwrap();
        assert_eq!(last.details, "non-code file");
    }

    #[test]
    fn test_commit_guard_outside_repo_fails_open() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_in(tmp.path());
        let brake = EmergencyBrake::open(&config);
        let inv = invocation(
            tmp.path(),
            serde_json::json!({"hook_event_name": "PreToolUse", "tool_name": "Bash", "tool_input": {"command": "git commit -m x"}}),
        );
        let (code, outcomes) = run(config, &inv);
        assert_eq!(code, 0);
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[1].hook, hookwarden_core::COMMIT_GUARD);
        assert_eq!(outcomes[1].event, EventKind::Failure);
        assert!(brake.record(hookwarden_core::COMMIT_GUARD).unwrap().is_none());
    }

    #[test]
    fn test_guard_failures_never_brake() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = config_in(tmp.path());
        config.brake.failure_threshold = 1;
        config.security.production_branches = vec!["(".into()];
        let brake = EmergencyBrake::open(&config);
        let inv = invocation(
            tmp.path(),
            serde_json::json!({"hook_event_name": "PreToolUse", "tool_name": "Bash", "tool_input": {"command": "git commit -m x"}}),
        );
        for _ in 0..3 {
            let (code, outcomes) = run(config.clone(), &inv);
            assert_eq!(code, 0);
            assert!(outcomes.iter().all(|o| o.event == EventKind::Failure));
        }
        assert!(brake.records().unwrap().is_empty());
    }
}
