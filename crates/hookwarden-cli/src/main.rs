mod export;

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration as StdDuration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use hookwarden_core::brake::{EmergencyBrake, FailureRecord};
use hookwarden_core::config::WardenConfig;
use hookwarden_core::debounce::Debouncer;
use hookwarden_core::event::Operation;
use hookwarden_core::guard::{Decision, Guard, GuardContext};
use hookwarden_core::health::{self, HealthReport, HealthStatus};
use hookwarden_core::monitor::{EventKind, HookStats, LogEvent, Monitor, COMBINED_LOG};
use hookwarden_core::quality::{CheckContext, QualityChecker, SystemRunner};
use hookwarden_core::state::FileStore;
use hookwarden_core::{COMMIT_GUARD, QUALITY_CHECK, SECURITY_GUARD};
use owo_colors::OwoColorize;
use serde::Serialize;

use crate::export::ExportFormat;

#[derive(Parser)]
#[command(
    name = "hookwarden",
    about = "hookwarden: inspect and control AI assistant tool hooks",
    version
)]
enum Cli {
    /// Brake state, failure count and last activity per hook
    Status {
        /// Hook name (omit for all known hooks)
        hook: Option<String>,
        /// Output raw JSON
        #[arg(long)]
        json: bool,
    },
    /// Event counts and success rate over a time window
    Stats {
        /// Hook name (omit or "all" for the combined log)
        hook: Option<String>,
        /// Window in days
        #[arg(default_value = "7")]
        days: u32,
        /// Output raw JSON
        #[arg(long)]
        json: bool,
    },
    /// Stats for every known hook plus combined totals
    Report {
        /// Window in days
        #[arg(default_value = "7")]
        days: u32,
        /// Output raw JSON
        #[arg(long)]
        json: bool,
    },
    /// Healthy / degraded / unhealthy / braked per hook
    Health {
        /// Hook name (omit for all known hooks)
        hook: Option<String>,
        /// Window in days used for the success rate
        #[arg(long, default_value = "7")]
        days: u32,
        /// Output raw JSON
        #[arg(long)]
        json: bool,
    },
    /// Engage the emergency brake for a hook, or list active brakes
    Brake {
        /// Hook to brake (omit to list active brakes)
        hook: Option<String>,
        /// Cooldown in minutes (default from config)
        minutes: Option<u64>,
        /// Output raw JSON
        #[arg(long)]
        json: bool,
    },
    /// Clear the failure record and debounce lock
    Reset {
        /// Hook name (omit to reset every hook)
        hook: Option<String>,
    },
    /// Export hook events
    Export {
        /// Hook name (omit for the combined log)
        hook: Option<String>,
        /// Output format: json, jsonl, csv
        #[arg(short, long, default_value = "json")]
        format: String,
        /// Write to file instead of stdout
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Follow a hook log and print new events as they arrive
    Monitor {
        /// Hook name (omit for the combined log)
        hook: Option<String>,
        /// Poll interval in milliseconds
        #[arg(long, default_value = "1000")]
        interval: u64,
        /// Print what is there and exit
        #[arg(long)]
        once: bool,
    },
    /// Known hook names and their state
    List {
        /// Output raw JSON
        #[arg(long)]
        json: bool,
    },
    /// Run the quality checker on files (staged files when none given)
    Check {
        /// Files to check
        files: Vec<String>,
        /// Context: edit, commit, fix
        #[arg(long, default_value = "commit")]
        context: String,
        /// Output raw JSON
        #[arg(long)]
        json: bool,
    },
    /// Ask the security guard about an operation without running it
    Guard {
        /// Shell command
        #[arg(long, group = "op")]
        command: Option<String>,
        /// File about to be read
        #[arg(long, group = "op")]
        read: Option<String>,
        /// File about to be written
        #[arg(long, group = "op")]
        write: Option<String>,
        /// File about to be edited
        #[arg(long, group = "op")]
        edit: Option<String>,
        /// Output raw JSON
        #[arg(long)]
        json: bool,
    },
}

/// Everything the subcommands read from.
struct Ctx {
    config: WardenConfig,
    monitor: Monitor,
    brake: EmergencyBrake<FileStore>,
    debouncer: Debouncer<FileStore>,
}

impl Ctx {
    fn new(config: WardenConfig) -> Self {
        Self {
            monitor: Monitor::new(&config, "cli"),
            brake: EmergencyBrake::open(&config),
            debouncer: Debouncer::open(&config),
            config,
        }
    }

    /// Built-in hook names plus any hook that has a log, lock or failure record.
    fn known_hooks(&self) -> Result<Vec<String>> {
        let mut hooks: BTreeSet<String> = [SECURITY_GUARD, QUALITY_CHECK, COMMIT_GUARD]
            .iter()
            .map(|h| h.to_string())
            .collect();
        hooks.extend(self.monitor.hooks()?);
        hooks.extend(self.debouncer.hooks()?);
        hooks.extend(self.brake.records()?.into_iter().map(|(h, _)| h));
        Ok(hooks.into_iter().collect())
    }

    fn status(&self, hook: &str, now: DateTime<Utc>) -> Result<HookStatus> {
        let brake_active = self.brake.is_brake_active_at(hook, now)?;
        let record = self.brake.record(hook)?;
        Ok(HookStatus {
            hook: hook.to_string(),
            brake_active,
            brake_until: record.as_ref().and_then(|r| r.brake_until),
            consecutive_failures: record.as_ref().map_or(0, |r| r.consecutive_failures),
            last_touch: self.debouncer.last_touch(hook)?,
            last_event: self.monitor.last_event(hook)?,
        })
    }

    fn health(&self, hook: &str, days: u32, now: DateTime<Utc>) -> Result<HealthReport> {
        let record = self.brake.record(hook)?;
        let stats = self.monitor.stats_at(Some(hook), days, now)?;
        Ok(health::assess(hook, record.as_ref(), &stats, now))
    }
}

#[derive(Serialize)]
struct HookStatus {
    hook: String,
    brake_active: bool,
    brake_until: Option<DateTime<Utc>>,
    consecutive_failures: u32,
    last_touch: Option<DateTime<Utc>>,
    last_event: Option<LogEvent>,
}

#[derive(Serialize)]
struct Report {
    days: u32,
    hooks: Vec<HookStats>,
    combined: HookStats,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(tracing::Level::WARN)
        .compact()
        .init();

    let cli = Cli::parse();
    let config = WardenConfig::load(Some(&std::env::current_dir()?)).unwrap_or_else(|e| {
        tracing::warn!("config: {e}, using defaults");
        let mut config = WardenConfig::default_config();
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate();
        config
    });
    run(cli, Ctx::new(config))
}

fn run(cli: Cli, ctx: Ctx) -> Result<()> {
    match cli {
        Cli::Status { hook, json } => cmd_status(&ctx, hook.as_deref(), json),
        Cli::Stats { hook, days, json } => cmd_stats(&ctx, hook.as_deref(), days, json),
        Cli::Report { days, json } => cmd_report(&ctx, days, json),
        Cli::Health { hook, days, json } => cmd_health(&ctx, hook.as_deref(), days, json),
        Cli::Brake {
            hook,
            minutes,
            json,
        } => cmd_brake(&ctx, hook.as_deref(), minutes, json),
        Cli::Reset { hook } => cmd_reset(&ctx, hook.as_deref()),
        Cli::Export {
            hook,
            format,
            output,
        } => cmd_export(&ctx, hook.as_deref(), &format, output.as_deref()),
        Cli::Monitor {
            hook,
            interval,
            once,
        } => cmd_monitor(&ctx, hook.as_deref(), interval, once),
        Cli::List { json } => cmd_list(&ctx, json),
        Cli::Check {
            files,
            context,
            json,
        } => cmd_check(&ctx, &files, &context, json),
        Cli::Guard {
            command,
            read,
            write,
            edit,
            json,
        } => {
            let op = match (command, read, write, edit) {
                (Some(c), _, _, _) => Operation::Command(c),
                (_, Some(p), _, _) => Operation::Read(p),
                (_, _, Some(p), _) => Operation::Write(p),
                (_, _, _, Some(p)) => Operation::Edit(p),
                _ => bail!("one of --command, --read, --write or --edit is required"),
            };
            cmd_guard(&ctx, &op, json)
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn fmt_time(t: Option<DateTime<Utc>>) -> String {
    t.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".into())
}

fn fmt_rate(rate: Option<f64>) -> String {
    rate.map(|r| format!("{r:.1}%")).unwrap_or_else(|| "-".into())
}

fn colored_event(kind: EventKind) -> String {
    let label = kind.to_string();
    match kind {
        EventKind::Success => label.green().to_string(),
        EventKind::Failure => label.red().to_string(),
        EventKind::Bypass => label.yellow().to_string(),
        EventKind::Brake => label.magenta().to_string(),
        EventKind::Start => label.dimmed().to_string(),
    }
}

fn colored_health(status: HealthStatus) -> String {
    let label = status.to_string();
    match status {
        HealthStatus::Healthy => label.green().to_string(),
        HealthStatus::Degraded => label.yellow().to_string(),
        HealthStatus::Unhealthy => label.red().to_string(),
        HealthStatus::Braked => label.magenta().bold().to_string(),
    }
}

/// "all" selects the combined log.
fn log_selector(hook: Option<&str>) -> Option<&str> {
    hook.filter(|h| *h != COMBINED_LOG)
}

// -- Commands --

fn cmd_status(ctx: &Ctx, hook: Option<&str>, json: bool) -> Result<()> {
    let now = Utc::now();
    let statuses = match hook {
        Some(h) => vec![ctx.status(h, now)?],
        None => ctx
            .known_hooks()?
            .iter()
            .map(|h| ctx.status(h, now))
            .collect::<Result<Vec<_>>>()?,
    };
    if json {
        return match hook {
            Some(_) => print_json(&statuses[0]),
            None => print_json(&statuses),
        };
    }

    if let Some(s) = statuses.first().filter(|_| hook.is_some()) {
        println!("{}", format!("Hook {}", s.hook).bold());
        let brake = if s.brake_active {
            format!("{} until {}", "active".red(), fmt_time(s.brake_until))
        } else {
            "inactive".green().to_string()
        };
        println!("  {}        {}", "Brake:".dimmed(), brake);
        println!("  {}     {}", "Failures:".dimmed(), s.consecutive_failures);
        println!("  {}   {}", "Last touch:".dimmed(), fmt_time(s.last_touch));
        match s.last_event {
            Some(ref e) => println!(
                "  {}   {} at {}{}",
                "Last event:".dimmed(),
                colored_event(e.event),
                fmt_time(Some(e.timestamp)),
                e.file
                    .as_deref()
                    .map(|f| format!(" ({f})"))
                    .unwrap_or_default()
            ),
            None => println!("  {}   -", "Last event:".dimmed()),
        }
        return Ok(());
    }

    println!(
        "{:<20} {:<10} {:>8}  {:<19}  {}",
        "HOOK".bold(),
        "BRAKE".bold(),
        "FAILURES".bold(),
        "LAST EVENT".bold(),
        "RESULT".bold()
    );
    for s in &statuses {
        let brake = if s.brake_active {
            format!("{:<10}", "active").red().to_string()
        } else {
            format!("{:<10}", "off").dimmed().to_string()
        };
        let (when, result) = match s.last_event {
            Some(ref e) => (fmt_time(Some(e.timestamp)), colored_event(e.event)),
            None => ("-".into(), "-".dimmed().to_string()),
        };
        println!(
            "{:<20} {} {:>8}  {:<19}  {}",
            s.hook.cyan(),
            brake,
            s.consecutive_failures,
            when,
            result
        );
    }
    Ok(())
}

fn print_stats(stats: &HookStats) {
    let name = stats.hook.as_deref().unwrap_or("all hooks");
    println!(
        "{} {}",
        name.bold(),
        format!("(last {} days)", stats.days).dimmed()
    );
    println!("  {}        {}", "Total:".dimmed(), stats.total);
    println!("  {}      {}", "Success:".dimmed(), stats.success.to_string().green());
    println!("  {}      {}", "Failure:".dimmed(), stats.failure.to_string().red());
    println!("  {}       {}", "Bypass:".dimmed(), stats.bypass.to_string().yellow());
    println!("  {}        {}", "Brake:".dimmed(), stats.brake.to_string().magenta());
    println!("  {} {}", "Success rate:".dimmed(), fmt_rate(stats.success_rate));
    println!(
        "  {}  {}",
        "Avg duration:".dimmed(),
        stats
            .avg_duration_ms
            .map(|d| format!("{d:.0} ms"))
            .unwrap_or_else(|| "-".into())
    );
}

fn cmd_stats(ctx: &Ctx, hook: Option<&str>, days: u32, json: bool) -> Result<()> {
    let stats = ctx.monitor.get_stats(log_selector(hook), days)?;
    if json {
        return print_json(&stats);
    }
    print_stats(&stats);
    Ok(())
}

fn cmd_report(ctx: &Ctx, days: u32, json: bool) -> Result<()> {
    let now = Utc::now();
    let hooks = ctx
        .monitor
        .hooks()?
        .iter()
        .map(|h| ctx.monitor.stats_at(Some(h.as_str()), days, now))
        .collect::<Result<Vec<_>, _>>()?;
    let combined = ctx.monitor.stats_at(None, days, now)?;
    let report = Report {
        days,
        hooks,
        combined,
    };
    if json {
        return print_json(&report);
    }

    println!("{}", format!("Hook report, last {days} days").bold());
    if report.hooks.is_empty() {
        println!("  {}", "no hook activity recorded".dimmed());
        return Ok(());
    }
    println!(
        "{:<20} {:>6} {:>8} {:>8} {:>7} {:>6} {:>8}",
        "HOOK".bold(),
        "TOTAL".bold(),
        "SUCCESS".bold(),
        "FAILURE".bold(),
        "BYPASS".bold(),
        "BRAKE".bold(),
        "RATE".bold()
    );
    for s in report.hooks.iter().chain(std::iter::once(&report.combined)) {
        let name = s.hook.clone().unwrap_or_else(|| "total".into());
        println!(
            "{:<20} {:>6} {:>8} {:>8} {:>7} {:>6} {:>8}",
            name.cyan(),
            s.total,
            s.success,
            s.failure,
            s.bypass,
            s.brake,
            fmt_rate(s.success_rate)
        );
    }
    Ok(())
}

fn cmd_health(ctx: &Ctx, hook: Option<&str>, days: u32, json: bool) -> Result<()> {
    let now = Utc::now();
    let hooks = match hook {
        Some(h) => vec![h.to_string()],
        None => ctx.known_hooks()?,
    };
    let reports = hooks
        .iter()
        .map(|h| ctx.health(h, days, now))
        .collect::<Result<Vec<_>>>()?;
    if json {
        return match hook {
            Some(_) => print_json(&reports[0]),
            None => print_json(&reports),
        };
    }
    for r in &reports {
        println!(
            "{:<20} {:<10} {}",
            r.hook.cyan(),
            colored_health(r.status),
            fmt_rate(r.success_rate).dimmed()
        );
        for reason in &r.reasons {
            println!("  {} {}", "-".dimmed(), reason);
        }
    }
    Ok(())
}

fn cmd_brake(ctx: &Ctx, hook: Option<&str>, minutes: Option<u64>, json: bool) -> Result<()> {
    let now = Utc::now();
    if let Some(h) = hook {
        let minutes = minutes.unwrap_or(ctx.config.brake.cooldown_minutes);
        let record = ctx
            .brake
            .activate_at(h, minutes, now)
            .with_context(|| format!("failed to engage brake for {h}"))?;
        if json {
            return print_json(&record);
        }
        println!(
            "{} emergency brake engaged for {} until {}",
            "!".red().bold(),
            h.cyan(),
            fmt_time(record.brake_until)
        );
        return Ok(());
    }

    let active: Vec<(String, FailureRecord)> = ctx
        .brake
        .records()?
        .into_iter()
        .filter(|(_, r)| r.is_braked_at(now))
        .collect();
    if json {
        let map: BTreeMap<String, FailureRecord> = active.into_iter().collect();
        return print_json(&map);
    }
    if active.is_empty() {
        println!("{}", "No active brakes.".green());
        return Ok(());
    }
    for (h, r) in &active {
        println!(
            "{:<20} until {}  {}",
            h.cyan(),
            fmt_time(r.brake_until),
            format!("{} consecutive failure(s)", r.consecutive_failures).dimmed()
        );
    }
    Ok(())
}

fn cmd_reset(ctx: &Ctx, hook: Option<&str>) -> Result<()> {
    let hooks = match hook {
        Some(h) => vec![h.to_string()],
        None => ctx.known_hooks()?,
    };
    for h in &hooks {
        ctx.brake.reset(h)?;
        ctx.debouncer.clear(h)?;
    }
    println!("{} reset {} hook(s)", "✓".green(), hooks.len());
    Ok(())
}

fn cmd_export(ctx: &Ctx, hook: Option<&str>, format: &str, output: Option<&str>) -> Result<()> {
    let format: ExportFormat = format.parse()?;
    let events = ctx.monitor.events(log_selector(hook))?;
    let rendered = export::render(&events, format)?;
    match output {
        Some(path) => {
            std::fs::write(path, rendered).with_context(|| format!("failed to write {path}"))?;
            eprintln!("{} exported {} event(s) to {path}", "✓".green(), events.len());
        }
        None => print!("{rendered}"),
    }
    Ok(())
}

fn print_event(e: &LogEvent) {
    println!(
        "{} {:<16} {:<8} {}{}",
        e.timestamp.format("%H:%M:%S%.3f").to_string().dimmed(),
        e.hook.cyan(),
        colored_event(e.event),
        e.file.as_deref().unwrap_or(""),
        if e.details.is_empty() {
            String::new()
        } else {
            format!(" {}", e.details.dimmed())
        }
    );
}

fn cmd_monitor(ctx: &Ctx, hook: Option<&str>, interval: u64, once: bool) -> Result<()> {
    let selector = log_selector(hook);
    let mut seen = 0usize;
    if !once {
        eprintln!(
            "{} {} (Ctrl-C to stop)",
            "Following".bold(),
            ctx.monitor.log_path(selector).display()
        );
    }
    loop {
        let events = ctx.monitor.events(selector)?;
        // The active file shrinks after a rotation.
        if events.len() < seen {
            seen = 0;
        }
        for e in &events[seen..] {
            print_event(e);
        }
        seen = events.len();
        if once {
            return Ok(());
        }
        std::thread::sleep(StdDuration::from_millis(interval.max(50)));
    }
}

fn cmd_list(ctx: &Ctx, json: bool) -> Result<()> {
    let now = Utc::now();
    let reports = ctx
        .known_hooks()?
        .iter()
        .map(|h| ctx.health(h, 7, now))
        .collect::<Result<Vec<_>>>()?;
    if json {
        let list: Vec<serde_json::Value> = reports
            .iter()
            .map(|r| serde_json::json!({"hook": r.hook, "status": r.status}))
            .collect();
        return print_json(&list);
    }
    for r in &reports {
        println!("{:<20} {}", r.hook.cyan(), colored_health(r.status));
    }
    Ok(())
}

fn cmd_check(ctx: &Ctx, files: &[String], context: &str, json: bool) -> Result<()> {
    let context: CheckContext = context.parse()?;
    let checker =
        QualityChecker::new(&ctx.config.quality, SystemRunner).with_cwd(std::env::current_dir()?);
    let report = checker.run(context, files)?;
    let code = report.exit_code(ctx.config.quality.hard_fail_on_edit);

    if json {
        print_json(&report)?;
    } else if let Some(ref reason) = report.bypassed {
        println!("{} skipped: {reason}", "-".dimmed());
    } else if report.passed() {
        let rounds = if report.rounds > 0 {
            format!(" after {} fix round(s)", report.rounds)
        } else {
            String::new()
        };
        println!(
            "{} {} file(s) clean{rounds}",
            "✓".green(),
            report.files.len()
        );
    } else {
        for issue in &report.issues {
            println!(
                "{} {} {}",
                format!("[{}]", issue.issue_type.label()).red(),
                issue.file.cyan(),
                issue.details
            );
        }
        if !report.fixes.is_empty() {
            println!("\n{}", "Suggested fixes:".bold());
            for fix in &report.fixes {
                println!("  {fix}");
            }
        }
    }
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn cmd_guard(ctx: &Ctx, op: &Operation, json: bool) -> Result<()> {
    let guard = Guard::from_config(&ctx.config.security)?;
    let cwd = std::env::current_dir()?;
    let verdict = guard.evaluate(op, &GuardContext::detect(Some(&cwd)));
    if json {
        print_json(&verdict)?;
    } else {
        let label = match verdict.decision {
            Decision::Allow => "ALLOW".green().bold().to_string(),
            Decision::Warn => "WARN".yellow().bold().to_string(),
            Decision::Block => "BLOCK".red().bold().to_string(),
        };
        println!("{label} {} {}", verdict.event_type.dimmed(), verdict.message);
    }
    if verdict.is_blocked() {
        std::process::exit(verdict.exit_code());
    }
    Ok(())
}
