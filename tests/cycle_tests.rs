//! End-to-end cycles: sampling, scheduling, event totals, subscribers.

mod common;

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;

use spacewarden::core::cancel::CancelToken;
use spacewarden::core::config::Config;
use spacewarden::daemon::cycle::{CycleOutcome, Daemon};
use spacewarden::daemon::heartbeat::{HeartbeatWriter, read_heartbeat};
use spacewarden::daemon::metrics::MetricsCollector;
use spacewarden::events::{EventBus, EventPayload, EventType};
use spacewarden::logger::sink::{LogSink, MemorySink};
use spacewarden::monitor::mounts::{MountAggregator, MountSpec};
use spacewarden::monitor::threshold::{SeverityLevel, Thresholds, classify};
use spacewarden::plugin::registry::Registry;

use common::{EventRecorder, FakeSampler, ScriptedPlugin, timeline};

fn two_mount_config() -> Config {
    let mut config = Config::default();
    config.mounts = vec![MountSpec::new("/a", "a"), MountSpec::new("/b", "b")];
    config
}

fn registry_with(plugins: Vec<Arc<ScriptedPlugin>>) -> Registry {
    let mut registry = Registry::new("linux");
    for plugin in plugins {
        registry.register_extended(plugin).unwrap();
    }
    registry
}

#[test]
fn multi_mount_worst_wins() {
    let sampler = FakeSampler::new(&[("/a", 96.0), ("/b", 60.0)]);
    let config = two_mount_config();
    let aggregator = MountAggregator::new(
        sampler,
        config.mounts,
        config.thresholds,
        "/".into(),
        Arc::new(MemorySink::default()),
    );
    assert_eq!(aggregator.severity().unwrap(), SeverityLevel::Critical);
}

#[test]
fn boundaries_are_exact() {
    let t = Thresholds::default();
    assert_eq!(classify(79.9, &t), SeverityLevel::None);
    assert_eq!(classify(80.0, &t), SeverityLevel::Warning);
    assert_eq!(classify(85.0, &t), SeverityLevel::Moderate);
    assert_eq!(classify(90.0, &t), SeverityLevel::Aggressive);
    assert_eq!(classify(95.0, &t), SeverityLevel::Critical);
}

proptest! {
    #[test]
    fn classify_is_monotonic_for_any_ordered_thresholds(
        mut cuts in proptest::collection::vec(0.0_f64..100.0, 4),
        a in 0.0_f64..=100.0,
        b in 0.0_f64..=100.0,
    ) {
        cuts.sort_by(f64::total_cmp);
        prop_assume!(cuts.windows(2).all(|w| w[0] < w[1]));
        let t = Thresholds {
            warning: cuts[0],
            moderate: cuts[1],
            aggressive: cuts[2],
            critical: cuts[3],
        };
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(classify(lo, &t) <= classify(hi, &t));
    }
}

#[test]
fn cycle_end_totals_match_non_skipped_outcomes() {
    let tl = timeline();
    let plugins = vec![
        Arc::new(ScriptedPlugin::new("a", "g1", &tl).freeing(1_000)),
        Arc::new(ScriptedPlugin::new("b", "g2", &tl).freeing(500).failing("partial")),
        Arc::new(ScriptedPlugin::new("c", "g1", &tl).freeing(250)),
        Arc::new(ScriptedPlugin::new("d", "g3", &tl).freeing(9_999).preflight_error("no tool")),
    ];
    let bus = EventBus::new(64);
    let recorder = EventRecorder::attach(&bus);
    let daemon = Daemon::new(
        two_mount_config(),
        registry_with(plugins),
        FakeSampler::new(&[("/a", 91.0), ("/b", 10.0)]),
        bus.clone(),
        Arc::new(MemorySink::default()),
    );

    let outcome = daemon.run_once(&CancelToken::new(), None).unwrap();
    bus.close();

    let CycleOutcome::Completed(record) = outcome else {
        panic!("expected a completed cycle, got {outcome:?}");
    };
    assert_eq!(record.severity, SeverityLevel::Aggressive);
    assert_eq!(record.plugin_count, 4);
    assert_eq!(record.plugins_run, 3);
    assert_eq!(record.plugin_errors, 1);
    assert_eq!(record.total_freed, 1_750);

    let end = recorder
        .events()
        .into_iter()
        .find_map(|e| match e.payload {
            EventPayload::CycleEnd(end) => Some(end),
            _ => None,
        })
        .expect("cycle end published");
    assert_eq!(end.cycle_id, record.cycle_id);
    assert_eq!(end.total_freed, 1_750);
    assert_eq!(end.plugins_run, 3);
    assert_eq!(end.plugin_errors, 1);

    let types = recorder.types();
    assert_eq!(types[0], EventType::LevelChanged);
    assert_eq!(types[1], EventType::CycleStart);
    assert_eq!(types.last(), Some(&EventType::CycleEnd));
    assert_eq!(recorder.count(EventType::PreflightFailed), 1);
}

#[test]
fn dry_run_publishes_no_cycle_end_and_runs_nothing() {
    let tl = timeline();
    let plugin = Arc::new(ScriptedPlugin::new("a", "g", &tl).freeing(10));
    let mut config = two_mount_config();
    config.daemon.dry_run = true;
    let bus = EventBus::new(16);
    let recorder = EventRecorder::attach(&bus);
    let log = Arc::new(MemorySink::default());
    let daemon = Daemon::new(
        config,
        registry_with(vec![Arc::clone(&plugin)]),
        FakeSampler::new(&[("/a", 99.0), ("/b", 99.0)]),
        bus.clone(),
        Arc::clone(&log) as Arc<dyn LogSink>,
    );

    let outcome = daemon.run_once(&CancelToken::new(), None).unwrap();
    bus.close();

    assert_eq!(
        outcome,
        CycleOutcome::DryRun {
            cycle_id: 1,
            severity: SeverityLevel::Critical,
            plugins: vec!["a".to_string()],
        }
    );
    assert_eq!(plugin.calls(), 0);
    assert_eq!(recorder.count(EventType::CycleStart), 1);
    assert_eq!(recorder.count(EventType::CycleEnd), 0);
    assert_eq!(recorder.count(EventType::BytesFreed), 0);
    assert!(
        log.messages()
            .iter()
            .any(|m| m == "dry run: would run plugin")
    );
}

#[test]
fn idle_tick_publishes_nothing() {
    let bus = EventBus::new(16);
    let recorder = EventRecorder::attach(&bus);
    let daemon = Daemon::new(
        two_mount_config(),
        Registry::new("linux"),
        FakeSampler::new(&[("/a", 20.0), ("/b", 30.0)]),
        bus.clone(),
        Arc::new(MemorySink::default()),
    );
    assert_eq!(
        daemon.run_once(&CancelToken::new(), None).unwrap(),
        CycleOutcome::Idle
    );
    bus.close();
    assert!(recorder.events().is_empty());
}

#[test]
fn level_changed_only_on_transitions() {
    let sampler = FakeSampler::new(&[("/a", 81.0), ("/b", 0.0)]);
    let bus = EventBus::new(64);
    let recorder = EventRecorder::attach(&bus);
    let daemon = Daemon::new(
        two_mount_config(),
        Registry::new("linux"),
        sampler.clone(),
        bus.clone(),
        Arc::new(MemorySink::default()),
    );
    let cancel = CancelToken::new();
    daemon.run_once(&cancel, None).unwrap();
    daemon.run_once(&cancel, None).unwrap();
    sampler.set("/a", 97.0);
    daemon.run_once(&cancel, None).unwrap();
    bus.close();

    let changes: Vec<(SeverityLevel, SeverityLevel)> = recorder
        .events()
        .into_iter()
        .filter_map(|e| match e.payload {
            EventPayload::LevelChanged(c) => Some((c.previous, c.current)),
            _ => None,
        })
        .collect();
    assert_eq!(
        changes,
        [
            (SeverityLevel::None, SeverityLevel::Warning),
            (SeverityLevel::Warning, SeverityLevel::Critical),
        ]
    );
    assert_eq!(daemon.cycles_started(), 3);
}

#[test]
fn subscribers_observe_a_running_daemon() {
    let dir = tempfile::tempdir().unwrap();
    let heartbeat_path = dir.path().join("heartbeat.json");
    let tl = timeline();

    let mut config = two_mount_config();
    config.daemon.interval_secs = 1;
    let bus = EventBus::new(64);
    let metrics = Arc::new(MetricsCollector::new());
    metrics.attach(&bus).unwrap();
    Arc::new(HeartbeatWriter::new(&heartbeat_path))
        .attach(&bus)
        .unwrap();

    let daemon = Daemon::new(
        config,
        registry_with(vec![Arc::new(
            ScriptedPlugin::new("npm", "package-cache", &tl).freeing(4_096),
        )]),
        FakeSampler::new(&[("/a", 88.0), ("/b", 88.0)]),
        bus.clone(),
        Arc::new(MemorySink::default()),
    );

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let stopper = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(300));
        trigger.cancel();
    });
    daemon.run(&cancel);
    stopper.join().unwrap();
    bus.close();

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.total_cycles, 1);
    assert_eq!(snapshot.total_bytes_freed, 4_096);
    assert_eq!(snapshot.plugins["npm"].runs, 1);

    let state = read_heartbeat(&heartbeat_path).unwrap();
    assert_eq!(state.cycles_run, 1);
    assert_eq!(state.total_freed, 4_096);
    assert_eq!(state.pid, std::process::id());
}

#[test]
fn forced_severity_bypasses_sampling() {
    let tl = timeline();
    let plugin = Arc::new(ScriptedPlugin::new("forced", "g", &tl));
    let daemon = Daemon::new(
        two_mount_config(),
        registry_with(vec![Arc::clone(&plugin)]),
        FakeSampler::new(&[]),
        EventBus::new(4),
        Arc::new(MemorySink::default()),
    );
    let outcome = daemon
        .run_once(&CancelToken::new(), Some(SeverityLevel::Moderate))
        .unwrap();
    assert_eq!(outcome.cycle_id(), Some(1));
    assert_eq!(plugin.calls(), 1);
}
