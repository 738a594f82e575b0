//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use spacewarden::core::cancel::CancelToken;
use spacewarden::core::config::Config;
use spacewarden::core::errors::SpwError;
use spacewarden::core::paths;
use spacewarden::daemon::cycle::{CycleOutcome, Daemon};
use spacewarden::daemon::heartbeat::{HeartbeatWriter, read_heartbeat};
use spacewarden::daemon::metrics::MetricsCollector;
use spacewarden::daemon::signals::SignalHandler;
use spacewarden::events::EventBus;
use spacewarden::logger::jsonl::JsonlConfig;
use spacewarden::logger::sink::{FanoutSink, JsonlSink, LogLevel, LogRecord, LogSink, StderrSink};
use spacewarden::logger::subscriber;
use spacewarden::monitor::mounts::MountAggregator;
use spacewarden::monitor::threshold::SeverityLevel;
use spacewarden::platform::pal::{DiskSampler, current_platform, detect_sampler};
use spacewarden::plugin::registry::Registry;

/// spacewarden: threshold-driven disk-space cleanup daemon.
#[derive(Debug, Parser)]
#[command(
    name = "spacewarden",
    author,
    version,
    about = "Disk-space cleanup daemon",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Increase verbosity.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Quiet mode (errors only).
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run the cleanup daemon until SIGTERM/SIGINT.
    Daemon(DaemonArgs),
    /// Run a single cleanup cycle and exit.
    RunOnce(RunOnceArgs),
    /// Sample configured mounts and show their severity.
    Check,
    /// Show the daemon heartbeat.
    Status,
    /// List registered plugins.
    Plugins,
    /// Print the effective configuration.
    Config,
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Debug, Clone, Args, Default)]
struct DaemonArgs {
    /// Log what would run without running it.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Clone, Args, Default)]
struct RunOnceArgs {
    /// Skip sampling and run at this severity.
    #[arg(long, value_name = "LEVEL", value_parser = parse_severity)]
    severity: Option<SeverityLevel>,
    /// Log what would run without running it.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Target shell.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input or configuration.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Json(_) => 3,
        }
    }
}

impl From<SpwError> for CliError {
    fn from(err: SpwError) -> Self {
        let message = format!("{}: {err}", err.code());
        match err {
            SpwError::InvalidConfig { .. }
            | SpwError::MissingConfig { .. }
            | SpwError::ConfigParse { .. } => Self::User(message),
            _ => Self::Runtime(message),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Daemon(args) => run_daemon(cli, args),
        Command::RunOnce(args) => run_once(cli, args),
        Command::Check => run_check(cli),
        Command::Status => run_status(cli),
        Command::Plugins => run_plugins(cli),
        Command::Config => run_config(cli),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

// ──────────────────── shared setup ────────────────────

fn load_config(cli: &Cli) -> Result<Config, CliError> {
    let explicit = cli.config.as_deref().map(paths::resolve_absolute_path);
    Ok(Config::load(explicit.as_deref())?)
}

fn log_level(cli: &Cli) -> LogLevel {
    if cli.verbose {
        LogLevel::Debug
    } else if cli.quiet {
        LogLevel::Error
    } else {
        LogLevel::Info
    }
}

/// Stderr plus the JSONL activity log.
fn build_log(cli: &Cli, config: &Config) -> Arc<dyn LogSink> {
    let jsonl = JsonlSink::open(JsonlConfig {
        path: config.paths.jsonl_log.clone(),
        ..JsonlConfig::default()
    });
    Arc::new(FanoutSink::new(vec![
        Arc::new(StderrSink::new(log_level(cli))),
        Arc::new(jsonl),
    ]))
}

fn build_sampler() -> Result<Arc<dyn DiskSampler>, CliError> {
    Ok(detect_sampler()?)
}

/// Bus with the log, metrics and (optionally) heartbeat subscribers attached.
fn build_bus(
    config: &Config,
    log: &Arc<dyn LogSink>,
    with_heartbeat: bool,
) -> Result<(EventBus, Arc<MetricsCollector>), CliError> {
    let bus = EventBus::new(config.daemon.mailbox_capacity);
    subscriber::attach(&bus, Arc::clone(log))?;
    let metrics = Arc::new(MetricsCollector::new());
    metrics.attach(&bus)?;
    if with_heartbeat {
        Arc::new(HeartbeatWriter::new(&config.paths.heartbeat_file)).attach(&bus)?;
    }
    Ok((bus, metrics))
}

// ──────────────────── daemon / run-once ────────────────────

fn run_daemon(cli: &Cli, args: &DaemonArgs) -> Result<(), CliError> {
    let mut config = load_config(cli)?;
    config.daemon.dry_run |= args.dry_run;

    let log = build_log(cli, &config);
    let sampler = build_sampler()?;
    let registry = Registry::from_config(&config, current_platform(), Arc::clone(&sampler))?;
    let (bus, metrics) = build_bus(&config, &log, true)?;

    let daemon = Daemon::new(config, registry, sampler, bus.clone(), Arc::clone(&log));
    let cancel = CancelToken::new();
    let _signals = SignalHandler::install(&cancel, daemon.wake_flag());

    daemon.run(&cancel);
    bus.close();

    let snapshot = metrics.snapshot();
    log.log(
        LogRecord::info("daemon stopped")
            .field("total_cycles", snapshot.total_cycles)
            .field("total_bytes_freed", snapshot.total_bytes_freed)
            .field("total_errors", snapshot.total_errors),
    );
    Ok(())
}

fn run_once(cli: &Cli, args: &RunOnceArgs) -> Result<(), CliError> {
    let mut config = load_config(cli)?;
    config.daemon.dry_run |= args.dry_run;

    let log = build_log(cli, &config);
    let sampler = build_sampler()?;
    let registry = Registry::from_config(&config, current_platform(), Arc::clone(&sampler))?;
    let (bus, _metrics) = build_bus(&config, &log, false)?;

    let daemon = Daemon::new(config, registry, sampler, bus.clone(), log);
    let cancel = CancelToken::new();
    let _signals = SignalHandler::install(&cancel, daemon.wake_flag());

    let outcome = daemon.run_once(&cancel, args.severity);
    bus.close();
    let outcome = outcome?;

    match output_mode(cli) {
        OutputMode::Json => write_json_line(&outcome_json(&outcome))?,
        OutputMode::Human => print_outcome(&outcome),
    }
    Ok(())
}

fn outcome_json(outcome: &CycleOutcome) -> Value {
    match outcome {
        CycleOutcome::Idle => json!({ "command": "run-once", "status": "idle" }),
        CycleOutcome::DryRun {
            cycle_id,
            severity,
            plugins,
        } => json!({
            "command": "run-once",
            "status": "dry_run",
            "cycle_id": cycle_id,
            "severity": severity,
            "plugins": plugins,
        }),
        CycleOutcome::Completed(record) => json!({
            "command": "run-once",
            "status": "completed",
            "cycle_id": record.cycle_id,
            "severity": record.severity,
            "plugin_count": record.plugin_count,
            "plugins_run": record.plugins_run,
            "plugin_errors": record.plugin_errors,
            "total_freed": record.total_freed,
            "duration_ms": u64::try_from(record.duration.as_millis()).unwrap_or(u64::MAX),
            "results": record.results.iter().map(|r| json!({
                "plugin": r.plugin_name,
                "resource_group": r.resource_group,
                "skipped": r.is_skipped(),
                "skip_reason": r.skip_reason,
                "bytes_freed": r.bytes_freed(),
                "error": r.error(),
            })).collect::<Vec<_>>(),
        }),
    }
}

fn print_outcome(outcome: &CycleOutcome) {
    match outcome {
        CycleOutcome::Idle => println!("No disk pressure; nothing to do."),
        CycleOutcome::DryRun {
            cycle_id,
            severity,
            plugins,
        } => {
            println!(
                "Dry run (cycle {cycle_id}) at {}: {} plugin(s) would run",
                severity_colored(*severity),
                plugins.len()
            );
            for name in plugins {
                println!("  - {name}");
            }
        }
        CycleOutcome::Completed(record) => {
            println!(
                "Cycle {} at {}: freed {} across {} plugin(s), {} error(s), {}",
                record.cycle_id,
                severity_colored(record.severity),
                format_bytes(record.total_freed),
                record.plugins_run,
                record.plugin_errors,
                format_duration(record.duration),
            );
            for r in &record.results {
                let status = if let Some(reason) = &r.skip_reason {
                    format!("skipped ({reason})").yellow().to_string()
                } else if let Some(err) = r.error() {
                    format!("error: {err}").red().to_string()
                } else {
                    format!("freed {}", format_bytes(r.bytes_freed()))
                        .green()
                        .to_string()
                };
                println!("  {:<24} [{}] {status}", r.plugin_name, r.resource_group);
            }
        }
    }
}

// ──────────────────── check / status / plugins / config ────────────────────

fn run_check(cli: &Cli) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let log: Arc<dyn LogSink> = Arc::new(StderrSink::new(log_level(cli)));
    let aggregator = MountAggregator::new(
        build_sampler()?,
        config.mounts.clone(),
        config.thresholds,
        paths::default_sample_path(),
        log,
    );
    let report = aggregator.check()?;

    match output_mode(cli) {
        OutputMode::Json => {
            let mounts: Vec<Value> = report
                .readings
                .iter()
                .map(|r| {
                    json!({
                        "label": r.mount.display_name(),
                        "path": r.sample.path.to_string_lossy(),
                        "used_percent": r.sample.used_percent,
                        "free_bytes": r.sample.free_bytes,
                        "total_bytes": r.sample.total_bytes,
                        "severity": r.level,
                    })
                })
                .collect();
            write_json_line(&json!({
                "command": "check",
                "severity": report.level,
                "mounts": mounts,
                "failed": report.failed.iter().map(|p| p.to_string_lossy()).collect::<Vec<_>>(),
            }))?;
        }
        OutputMode::Human => {
            println!("Overall: {}", severity_colored(report.level));
            for r in &report.readings {
                println!(
                    "  {:<16} {:>5.1}% used, {} free  {}",
                    r.mount.display_name(),
                    r.sample.used_percent,
                    format_bytes(r.sample.free_bytes),
                    severity_colored(r.level),
                );
            }
            for path in &report.failed {
                println!("  {:<16} {}", path.display(), "unreachable".red());
            }
        }
    }
    Ok(())
}

fn run_status(cli: &Cli) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let path = &config.paths.heartbeat_file;
    let state = read_heartbeat(path).map_err(|e| {
        CliError::Runtime(format!(
            "no heartbeat at {} (is the daemon running?): {e}",
            path.display()
        ))
    })?;

    match output_mode(cli) {
        OutputMode::Json => {
            let mut payload = serde_json::to_value(&state)?;
            if let Value::Object(map) = &mut payload {
                map.insert("stale".to_string(), Value::Bool(state.is_stale()));
            }
            write_json_line(&payload)?;
        }
        OutputMode::Human => {
            println!("pid:           {}", state.pid);
            println!("last update:   {}", state.timestamp);
            println!(
                "uptime:        {}",
                format_duration(std::time::Duration::from_secs(state.uptime_seconds))
            );
            println!("cycles run:    {}", state.cycles_run);
            println!("total freed:   {}", format_bytes(state.total_freed));
            println!(
                "last cycle:    {}",
                state.last_cycle_at.as_deref().unwrap_or("never")
            );
            if state.is_stale() {
                eprintln!(
                    "{}",
                    "warning: heartbeat is stale; the daemon may be stalled".yellow()
                );
            }
        }
    }
    Ok(())
}

fn run_plugins(cli: &Cli) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let registry = Registry::from_config(&config, current_platform(), build_sampler()?)?;
    let enabled: Vec<String> = registry
        .get_enabled(&config)
        .iter()
        .map(|h| h.name().to_string())
        .collect();

    match output_mode(cli) {
        OutputMode::Json => {
            let plugins: Vec<Value> = registry
                .all()
                .iter()
                .map(|h| {
                    json!({
                        "name": h.name(),
                        "description": h.plugin().description(),
                        "resource_group": h.resource_group(),
                        "platforms": h.plugin().supported_platforms(),
                        "enabled": enabled.iter().any(|n| n == h.name()),
                        "estimated_secs": h.estimated_duration().map(|d| d.as_secs()),
                    })
                })
                .collect();
            write_json_line(&json!({
                "command": "plugins",
                "platform": registry.platform(),
                "plugins": plugins,
            }))?;
        }
        OutputMode::Human => {
            if registry.is_empty() {
                println!("No plugins configured. Add [[plugins.commands]] entries to the config.");
            }
            for h in registry.all() {
                let state = if enabled.iter().any(|n| n == h.name()) {
                    "enabled".green()
                } else {
                    "disabled".dimmed()
                };
                println!(
                    "{:<24} {:<14} {state}  {}",
                    h.name(),
                    h.resource_group(),
                    h.plugin().description()
                );
            }
        }
    }
    Ok(())
}

fn run_config(cli: &Cli) -> Result<(), CliError> {
    let config = load_config(cli)?;
    let hash = config.stable_hash()?;
    match output_mode(cli) {
        OutputMode::Json => write_json_line(&json!({
            "command": "config",
            "path": config.paths.config_file.to_string_lossy(),
            "hash": hash,
            "config": serde_json::to_value(&config)?,
        }))?,
        OutputMode::Human => {
            println!("# {} (hash {hash})", config.paths.config_file.display());
            print!("{}", config.to_toml_string()?);
        }
    }
    Ok(())
}

// ──────────────────── output helpers ────────────────────

fn parse_severity(raw: &str) -> Result<SeverityLevel, String> {
    raw.parse::<SeverityLevel>().map_err(|e| e.to_string())
}

fn severity_colored(level: SeverityLevel) -> String {
    let label = level.label();
    match level {
        SeverityLevel::None => label.green().to_string(),
        SeverityLevel::Warning => label.yellow().to_string(),
        SeverityLevel::Moderate => label.yellow().bold().to_string(),
        SeverityLevel::Aggressive => label.red().to_string(),
        SeverityLevel::Critical => label.red().bold().to_string(),
    }
}

#[allow(clippy::cast_precision_loss)]
fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    const GIB: u64 = 1024 * MIB;
    const TIB: u64 = 1024 * GIB;

    if bytes >= TIB {
        format!("{:.1} TB", bytes as f64 / TIB as f64)
    } else if bytes >= GIB {
        format!("{:.1} GB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

fn format_duration(duration: std::time::Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 3600 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs > 0 {
        format!("{secs}s")
    } else {
        format!("{}ms", duration.as_millis())
    }
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("SPW_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spacewarden::daemon::cycle::CycleRecord;
    use std::time::Duration;

    #[test]
    fn parses_global_flags_before_and_after_subcommand() {
        let before = Cli::try_parse_from([
            "spacewarden",
            "--config",
            "/tmp/spw.toml",
            "--json",
            "--no-color",
            "-v",
            "status",
        ]);
        assert!(before.is_ok());

        let after = Cli::try_parse_from(["spacewarden", "status", "--json", "-q"]);
        assert!(after.is_ok());
    }

    #[test]
    fn parses_every_subcommand() {
        let cases = [
            vec!["spacewarden", "daemon"],
            vec!["spacewarden", "daemon", "--dry-run"],
            vec!["spacewarden", "run-once"],
            vec!["spacewarden", "run-once", "--severity", "critical", "--dry-run"],
            vec!["spacewarden", "check"],
            vec!["spacewarden", "plugins"],
            vec!["spacewarden", "config"],
            vec!["spacewarden", "completions", "bash"],
        ];
        for argv in cases {
            assert!(Cli::try_parse_from(&argv).is_ok(), "failed to parse {argv:?}");
        }
    }

    #[test]
    fn rejects_unknown_severity_and_conflicting_verbosity() {
        assert!(Cli::try_parse_from(["spacewarden", "run-once", "--severity", "panic"]).is_err());
        assert!(Cli::try_parse_from(["spacewarden", "-v", "-q", "check"]).is_err());
    }

    #[test]
    fn severity_flag_is_typed() {
        let cli = Cli::try_parse_from(["spacewarden", "run-once", "--severity", "moderate"]).unwrap();
        match cli.command {
            Command::RunOnce(args) => assert_eq!(args.severity, Some(SeverityLevel::Moderate)),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn output_mode_resolution_honors_precedence() {
        assert_eq!(resolve_output_mode(true, Some("human"), true), OutputMode::Json);
        assert_eq!(resolve_output_mode(false, Some("json"), true), OutputMode::Json);
        assert_eq!(resolve_output_mode(false, Some("human"), false), OutputMode::Human);
        assert_eq!(resolve_output_mode(false, Some("auto"), true), OutputMode::Human);
        assert_eq!(resolve_output_mode(false, None, false), OutputMode::Json);
    }

    #[test]
    fn exit_codes_follow_contract() {
        let user: CliError = SpwError::InvalidConfig {
            details: "bad".to_string(),
        }
        .into();
        assert_eq!(user.exit_code(), 1);
        assert!(user.to_string().starts_with("SPW-1001"));

        let runtime: CliError = SpwError::Runtime {
            details: "x".to_string(),
        }
        .into();
        assert_eq!(runtime.exit_code(), 2);
    }

    #[test]
    fn completed_outcome_json_has_totals() {
        let outcome = CycleOutcome::Completed(CycleRecord {
            cycle_id: 4,
            severity: SeverityLevel::Critical,
            plugin_count: 0,
            total_freed: 2048,
            plugins_run: 0,
            plugin_errors: 0,
            duration: Duration::from_millis(15),
            results: Vec::new(),
        });
        let value = outcome_json(&outcome);
        assert_eq!(value["status"], "completed");
        assert_eq!(value["severity"], "critical");
        assert_eq!(value["total_freed"], 2048);
        assert_eq!(outcome_json(&CycleOutcome::Idle)["status"], "idle");
    }

    #[test]
    fn format_helpers() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_millis(40)), "40ms");
    }
}
