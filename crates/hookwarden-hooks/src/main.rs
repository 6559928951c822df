mod dispatch;
mod plan;

use std::io::Read;
use std::path::Path;
use std::process::ExitCode;

use hookwarden_core::config::WardenConfig;
use hookwarden_core::event::HookInvocation;
use owo_colors::OwoColorize;
use tracing::Level;

use crate::dispatch::{Dispatcher, Notice, NoticeLevel};

/// Entry point for the hookwarden-hooks binary.
///
/// Reads one hook invocation from stdin and answers through the exit code:
/// 0 allow, 1 blocked by the security guard (or a hard-failing edit check),
/// 2 commit or fix veto.
///
/// Internal errors always exit 0. A broken hook must never block the host.
fn main() -> ExitCode {
    let level = match std::env::var("HOOKWARDEN_LOG_LEVEL").as_deref() {
        Ok("debug") => Level::DEBUG,
        Ok("info") => Level::INFO,
        _ => Level::WARN,
    };
    // Hooks must not write to stdout
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .compact()
        .init();

    match run() {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::warn!("hookwarden-hooks: {e:#}");
            ExitCode::SUCCESS
        }
    }
}

fn run() -> anyhow::Result<u8> {
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;

    let inv = match HookInvocation::from_json(&input) {
        Ok(inv) => inv,
        Err(e) => {
            tracing::debug!("failed to parse hook invocation: {e}");
            return Ok(0);
        }
    };

    let runs = plan::plan(&inv);
    if runs.is_empty() {
        return Ok(0);
    }

    let cwd = inv.cwd.as_deref().map(Path::new);
    let config = WardenConfig::load(cwd).unwrap_or_else(|e| {
        tracing::warn!("config: {e}, using defaults");
        let mut config = WardenConfig::default_config();
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate();
        config
    });

    let (code, outcomes) = Dispatcher::new(config, &inv).dispatch(&inv, &runs);
    for notice in outcomes.iter().flat_map(|o| &o.notices) {
        print_notice(notice);
    }
    Ok(u8::try_from(code).unwrap_or(0))
}

fn print_notice(notice: &Notice) {
    let tag = format!("[{}]", notice.hook);
    match notice.level {
        NoticeLevel::Block => eprintln!("{} {} {}", tag.dimmed(), "BLOCKED".red().bold(), notice.text),
        NoticeLevel::Warn => eprintln!("{} {} {}", tag.dimmed(), "warning".yellow(), notice.text),
        NoticeLevel::Info => eprintln!("{}   {}", tag.dimmed(), notice.text.dimmed()),
    }
}
