#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use spacewarden::core::cancel::CancelToken;
use spacewarden::core::config::Config;
use spacewarden::core::errors::{Result, SpwError};
use spacewarden::events::{Event, EventBus, EventType};
use spacewarden::logger::sink::LogSink;
use spacewarden::monitor::threshold::SeverityLevel;
use spacewarden::platform::pal::{DiskSampler, UsageSample};
use spacewarden::plugin::{CleanupOutcome, Extension, Plugin};

// ──────────────────── CLI harness ────────────────────

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_spacewarden") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) {
        "spacewarden.exe"
    } else {
        "spacewarden"
    };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve spacewarden binary path for integration test"),
    }
}

/// Run the binary with `HOME` pointed at `home` so no real user files are touched.
pub fn run_cli_case(case_name: &str, home: &Path, args: &[&str]) -> CmdResult {
    let root = std::env::temp_dir().join("spacewarden-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let output = Command::new(&bin_path)
        .args(args)
        .env("HOME", home)
        .env("SPW_OUTPUT_FORMAT", "json")
        .env("RUST_BACKTRACE", "1")
        .output()
        .expect("execute spacewarden command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

// ──────────────────── fake sampler ────────────────────

/// Sampler reporting a fixed used percentage per path; unknown paths fail.
#[derive(Default)]
pub struct FakeSampler {
    used_pct: Mutex<HashMap<PathBuf, f64>>,
}

impl FakeSampler {
    pub fn new(pairs: &[(&str, f64)]) -> Arc<Self> {
        let sampler = Self::default();
        for (path, pct) in pairs {
            sampler.set(path, *pct);
        }
        Arc::new(sampler)
    }

    pub fn set(&self, path: &str, pct: f64) {
        self.used_pct.lock().insert(PathBuf::from(path), pct);
    }
}

impl DiskSampler for FakeSampler {
    fn sample(&self, path: &Path) -> Result<UsageSample> {
        let pct = self
            .used_pct
            .lock()
            .get(path)
            .copied()
            .ok_or_else(|| SpwError::Sample {
                path: path.to_path_buf(),
                details: "not mounted".to_string(),
            })?;
        let total: u64 = 1_000_000;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let used = (pct * 10_000.0).round() as u64;
        Ok(UsageSample::from_totals(path, total, total - used))
    }
}

// ──────────────────── scripted plugins ────────────────────

/// Shared start/end timeline across scripted plugins.
pub type Timeline = Arc<Mutex<Vec<(String, &'static str, Instant)>>>;

pub fn timeline() -> Timeline {
    Arc::new(Mutex::new(Vec::new()))
}

pub struct ScriptedPlugin {
    pub name: String,
    pub group: String,
    pub delay: Duration,
    pub freed: u64,
    pub error: Option<String>,
    pub preflight: std::result::Result<(), String>,
    pub calls: AtomicUsize,
    pub timeline: Timeline,
    pub gauge: Option<Arc<Gauge>>,
}

/// Tracks how many cleanups are in flight and the highest count seen.
#[derive(Default)]
pub struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    pub fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    pub fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl ScriptedPlugin {
    pub fn new(name: &str, group: &str, timeline: &Timeline) -> Self {
        Self {
            name: name.to_string(),
            group: group.to_string(),
            delay: Duration::ZERO,
            freed: 0,
            error: None,
            preflight: Ok(()),
            calls: AtomicUsize::new(0),
            timeline: Arc::clone(timeline),
            gauge: None,
        }
    }

    pub fn gauged(mut self, gauge: &Arc<Gauge>) -> Self {
        self.gauge = Some(Arc::clone(gauge));
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn freeing(mut self, bytes: u64) -> Self {
        self.freed = bytes;
        self
    }

    pub fn failing(mut self, error: &str) -> Self {
        self.error = Some(error.to_string());
        self
    }

    pub fn preflight_error(mut self, reason: &str) -> Self {
        self.preflight = Err(reason.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Plugin for ScriptedPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "scripted test plugin"
    }

    fn cleanup(
        &self,
        cancel: &CancelToken,
        severity: SeverityLevel,
        _config: &Config,
        _log: &dyn LogSink,
    ) -> CleanupOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gauge) = &self.gauge {
            gauge.enter();
        }
        self.timeline
            .lock()
            .push((self.name.clone(), "start", Instant::now()));
        let finished = cancel.sleep(self.delay);
        self.timeline
            .lock()
            .push((self.name.clone(), "end", Instant::now()));
        if let Some(gauge) = &self.gauge {
            gauge.exit();
        }

        if !finished {
            return CleanupOutcome::failed(&self.name, severity, "cancelled");
        }
        let outcome = CleanupOutcome::new(&self.name, severity).with_freed(self.freed, 1);
        match &self.error {
            Some(e) => CleanupOutcome {
                error: Some(e.clone()),
                ..outcome
            },
            None => outcome,
        }
    }
}

impl Extension for ScriptedPlugin {
    fn resource_group(&self) -> String {
        self.group.clone()
    }

    fn estimated_duration(&self) -> Duration {
        self.delay
    }

    fn preflight_check(
        &self,
        _cancel: &CancelToken,
        _config: &Config,
    ) -> std::result::Result<(), String> {
        self.preflight.clone()
    }
}

// ──────────────────── event recorder ────────────────────

pub struct EventRecorder {
    events: Arc<Mutex<Vec<Event>>>,
}

impl EventRecorder {
    pub fn attach(bus: &EventBus) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        bus.subscribe("recorder", move |event| sink.lock().push(event))
            .expect("subscribe recorder");
        Self { events }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn types(&self) -> Vec<EventType> {
        self.events.lock().iter().map(Event::event_type).collect()
    }

    pub fn count(&self, event_type: EventType) -> usize {
        self.types().iter().filter(|t| **t == event_type).count()
    }
}
