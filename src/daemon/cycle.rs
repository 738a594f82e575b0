//! Cycle orchestrator: sample → classify → schedule → report.
//!
//! A tick with no pressure is invisible on the bus. A real cycle gets a fresh
//! id from a per-daemon atomic counter, is announced with `CycleStart`, and in
//! normal mode ends with a `CycleEnd` summarizing the non-skipped results.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::core::cancel::CancelToken;
use crate::core::config::Config;
use crate::core::errors::Result;
use crate::core::paths;
use crate::daemon::scheduler::{ScheduledResult, Scheduler, duration_ms};
use crate::events::EventBus;
use crate::events::types::{CycleEnd, CycleStart, Heartbeat, LevelChanged};
use crate::logger::sink::{LogRecord, LogSink};
use crate::monitor::mounts::MountAggregator;
use crate::monitor::threshold::SeverityLevel;
use crate::platform::pal::DiskSampler;
use crate::plugin::registry::Registry;

/// Wake-flag poll granularity while waiting for the next tick.
const WAIT_SLICE: Duration = Duration::from_millis(100);

/// Summary of one executed cycle. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleRecord {
    pub cycle_id: u64,
    pub severity: SeverityLevel,
    pub plugin_count: usize,
    pub total_freed: u64,
    pub plugins_run: usize,
    pub plugin_errors: usize,
    pub duration: Duration,
    pub results: Vec<ScheduledResult>,
}

/// What `run_once` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Severity was `None`; nothing published.
    Idle,
    /// Preview only: plugins listed, none executed, no `CycleEnd`.
    DryRun {
        cycle_id: u64,
        severity: SeverityLevel,
        plugins: Vec<String>,
    },
    Completed(CycleRecord),
}

impl CycleOutcome {
    #[must_use]
    pub fn cycle_id(&self) -> Option<u64> {
        match self {
            Self::Idle => None,
            Self::DryRun { cycle_id, .. } => Some(*cycle_id),
            Self::Completed(record) => Some(record.cycle_id),
        }
    }
}

/// `(total_freed, plugins_run, plugin_errors)` over non-skipped results.
#[must_use]
pub fn summarize(results: &[ScheduledResult]) -> (u64, usize, usize) {
    results
        .iter()
        .filter_map(|r| r.outcome.as_ref())
        .fold((0_u64, 0_usize, 0_usize), |(freed, run, errors), outcome| {
            (
                freed.saturating_add(outcome.bytes_freed),
                run + 1,
                errors + usize::from(outcome.is_error()),
            )
        })
}

pub struct Daemon {
    config: Config,
    aggregator: MountAggregator,
    registry: Registry,
    scheduler: Scheduler,
    bus: EventBus,
    log: Arc<dyn LogSink>,
    cycle_counter: AtomicU64,
    /// Severity of the previous real cycle, for `LevelChanged`.
    last_level: Mutex<SeverityLevel>,
    /// Held for the whole of `run_once`; out-of-band runs queue behind the loop.
    cycle_lock: Mutex<()>,
    wake: Arc<AtomicBool>,
    last_dropped: AtomicU64,
    started: Instant,
}

impl Daemon {
    #[must_use]
    pub fn new(
        config: Config,
        registry: Registry,
        sampler: Arc<dyn DiskSampler>,
        bus: EventBus,
        log: Arc<dyn LogSink>,
    ) -> Self {
        let aggregator = MountAggregator::new(
            sampler,
            config.mounts.clone(),
            config.thresholds,
            paths::default_sample_path(),
            Arc::clone(&log),
        );
        let scheduler =
            Scheduler::from_config(&config.daemon, Arc::clone(&log)).with_bus(bus.clone());
        Self {
            config,
            aggregator,
            registry,
            scheduler,
            bus,
            log,
            cycle_counter: AtomicU64::new(0),
            last_level: Mutex::new(SeverityLevel::None),
            cycle_lock: Mutex::new(()),
            wake: Arc::new(AtomicBool::new(false)),
            last_dropped: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    #[must_use]
    pub fn aggregator(&self) -> &MountAggregator {
        &self.aggregator
    }

    /// Number of cycles started so far (dry runs included).
    #[must_use]
    pub fn cycles_started(&self) -> u64 {
        self.cycle_counter.load(Ordering::Acquire)
    }

    /// Setting this flag ends the current wait and runs a cycle at once.
    #[must_use]
    pub fn wake_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.wake)
    }

    /// Run a single cycle. With `forced`, mount sampling is skipped.
    ///
    /// Errors come only from sampling in single-path mode; plugin failures are
    /// part of the returned record.
    pub fn run_once(
        &self,
        cancel: &CancelToken,
        forced: Option<SeverityLevel>,
    ) -> Result<CycleOutcome> {
        let _cycle = self.cycle_lock.lock();

        let severity = match forced {
            Some(level) => level,
            None => self.aggregator.severity()?,
        };
        if !severity.requires_action() {
            return Ok(CycleOutcome::Idle);
        }

        let started = Instant::now();
        let cycle_id = self.cycle_counter.fetch_add(1, Ordering::AcqRel) + 1;
        let plugins = self.registry.get_enabled(&self.config);

        let previous = std::mem::replace(&mut *self.last_level.lock(), severity);
        if previous != severity {
            self.bus.publish_typed(LevelChanged {
                previous,
                current: severity,
            });
        }
        self.bus.publish_typed(CycleStart {
            cycle_id,
            severity,
            plugin_count: plugins.len(),
        });

        if self.config.daemon.dry_run {
            for handle in &plugins {
                let mut record = LogRecord::info("dry run: would run plugin")
                    .field("cycle_id", cycle_id)
                    .field("plugin", handle.name())
                    .field("resource_group", handle.resource_group())
                    .field("severity", severity.label());
                if let Some(estimate) = handle.estimated_duration() {
                    record = record.field("estimated_secs", estimate.as_secs());
                }
                self.log.log(record);
            }
            return Ok(CycleOutcome::DryRun {
                cycle_id,
                severity,
                plugins: plugins.iter().map(|h| h.name().to_string()).collect(),
            });
        }

        let results = self
            .scheduler
            .execute(cancel, cycle_id, &plugins, severity, &self.config);
        let (total_freed, plugins_run, plugin_errors) = summarize(&results);
        let duration = started.elapsed();

        self.bus.publish_typed(CycleEnd {
            cycle_id,
            severity,
            duration,
            total_freed,
            plugins_run,
            plugin_errors,
        });

        Ok(CycleOutcome::Completed(CycleRecord {
            cycle_id,
            severity,
            plugin_count: plugins.len(),
            total_freed,
            plugins_run,
            plugin_errors,
            duration,
            results,
        }))
    }

    /// Tick until `cancel` fires: one cycle immediately, then one per interval.
    /// A failed cycle is logged and the loop carries on.
    pub fn run(&self, cancel: &CancelToken) {
        self.log.log(
            LogRecord::info("daemon started")
                .field("version", env!("CARGO_PKG_VERSION"))
                .field("interval_secs", self.config.daemon.interval_secs)
                .field("dry_run", self.config.daemon.dry_run)
                .field("max_parallelism", self.scheduler.max_parallelism())
                .field(
                    "config_hash",
                    self.config.stable_hash().unwrap_or_else(|_| "unknown".to_string()),
                ),
        );

        while !cancel.is_cancelled() {
            self.bus.publish_typed(Heartbeat {
                uptime: self.started.elapsed(),
            });

            if let Err(err) = self.run_once(cancel, None) {
                self.log.log(
                    LogRecord::error("cycle failed")
                        .field("error_code", err.code())
                        .field("error", err.to_string())
                        .field("retryable", err.is_retryable()),
                );
            }
            self.report_dropped_events();

            if !self.wait_for_next_tick(cancel) {
                break;
            }
        }

        self.log.log(
            LogRecord::info("daemon stopping")
                .field("cycles", self.cycles_started())
                .field("uptime_ms", duration_ms(self.started.elapsed())),
        );
    }

    /// `false` once cancelled; `true` on interval expiry or wake-up.
    fn wait_for_next_tick(&self, cancel: &CancelToken) -> bool {
        let deadline = Instant::now() + self.config.daemon.interval();
        loop {
            if self.wake.swap(false, Ordering::AcqRel) {
                self.log.log(LogRecord::info("wake requested, running cycle now"));
                return !cancel.is_cancelled();
            }
            let now = Instant::now();
            if now >= deadline {
                return !cancel.is_cancelled();
            }
            if !cancel.sleep(WAIT_SLICE.min(deadline - now)) {
                return false;
            }
        }
    }

    fn report_dropped_events(&self) {
        let total = self.bus.total_dropped();
        let previous = self.last_dropped.swap(total, Ordering::AcqRel);
        if total > previous {
            let mut record = LogRecord::warn("event bus dropped events")
                .field("new_drops", total - previous)
                .field("total_drops", total);
            for (name, count) in self.bus.dropped_events() {
                record = record.field(&format!("dropped.{name}"), count);
            }
            self.log.log(record);
        }
    }
}
