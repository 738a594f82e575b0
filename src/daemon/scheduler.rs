//! Resource-group aware plugin scheduler.
//!
//! Plugins are partitioned by resource group and each group runs on its own
//! scoped thread, strictly sequentially in registration order. A permit pool
//! caps how many groups execute at once. Plugin failures, panics, preflight
//! rejections and cancellation are all reported through [`ScheduledResult`];
//! nothing here returns an error.

#![allow(missing_docs)]

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, bounded};

use crate::core::cancel::CancelToken;
use crate::core::config::{Config, DEFAULT_MAX_PARALLELISM, DEFAULT_PLUGIN_TIMEOUT, DaemonConfig};
use crate::events::EventBus;
use crate::events::types::{
    BytesFreed, PluginEnd, PluginError, PluginSkipped, PluginStart, PreflightFailed,
};
use crate::logger::sink::{LogRecord, LogSink};
use crate::monitor::threshold::SeverityLevel;
use crate::plugin::{CleanupOutcome, PluginHandle};

/// Skip reason recorded for plugins not started because of cancellation.
pub const SKIP_CANCELLED: &str = "context cancelled";

/// Per-plugin scheduling result. Skipped results carry no outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledResult {
    pub plugin_name: String,
    pub resource_group: String,
    pub outcome: Option<CleanupOutcome>,
    pub duration: Duration,
    pub skip_reason: Option<String>,
}

impl ScheduledResult {
    fn skipped(handle: &PluginHandle, group: &str, reason: impl Into<String>) -> Self {
        Self {
            plugin_name: handle.name().to_string(),
            resource_group: group.to_string(),
            outcome: None,
            duration: Duration::ZERO,
            skip_reason: Some(reason.into()),
        }
    }

    #[must_use]
    pub fn is_skipped(&self) -> bool {
        self.outcome.is_none()
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.outcome.as_ref().and_then(|o| o.error.as_deref())
    }

    #[must_use]
    pub fn bytes_freed(&self) -> u64 {
        self.outcome.as_ref().map_or(0, |o| o.bytes_freed)
    }
}

// ──────────────────── permit pool ────────────────────

/// Counting semaphore over a bounded channel: a send takes a slot, a recv frees one.
struct Permits {
    tx: Sender<()>,
    rx: Receiver<()>,
}

struct Permit<'a> {
    rx: &'a Receiver<()>,
}

impl Permits {
    fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self { tx, rx }
    }

    fn acquire(&self) -> Permit<'_> {
        // Both ends live in `self`, so the send cannot see a disconnected channel.
        let _ = self.tx.send(());
        Permit { rx: &self.rx }
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        let _ = self.rx.try_recv();
    }
}

// ──────────────────── scheduler ────────────────────

pub struct Scheduler {
    max_parallelism: usize,
    plugin_timeout: Duration,
    bus: Option<EventBus>,
    log: Arc<dyn LogSink>,
}

impl Scheduler {
    /// `max_parallelism == 0` and a zero timeout select the defaults.
    #[must_use]
    pub fn new(max_parallelism: usize, plugin_timeout: Duration, log: Arc<dyn LogSink>) -> Self {
        Self {
            max_parallelism: if max_parallelism == 0 {
                DEFAULT_MAX_PARALLELISM
            } else {
                max_parallelism
            },
            plugin_timeout: if plugin_timeout.is_zero() {
                DEFAULT_PLUGIN_TIMEOUT
            } else {
                plugin_timeout
            },
            bus: None,
            log,
        }
    }

    #[must_use]
    pub fn from_config(daemon: &DaemonConfig, log: Arc<dyn LogSink>) -> Self {
        Self::new(daemon.max_parallelism, daemon.plugin_timeout(), log)
    }

    /// Publish lifecycle events on `bus`. Without one, nothing is published.
    #[must_use]
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    #[must_use]
    pub fn max_parallelism(&self) -> usize {
        self.max_parallelism
    }

    #[must_use]
    pub fn plugin_timeout(&self) -> Duration {
        self.plugin_timeout
    }

    /// Concurrent path, or the serial one when parallelism is 1.
    pub fn execute(
        &self,
        cancel: &CancelToken,
        cycle_id: u64,
        plugins: &[PluginHandle],
        severity: SeverityLevel,
        config: &Config,
    ) -> Vec<ScheduledResult> {
        if self.max_parallelism <= 1 {
            self.execute_serial(cancel, cycle_id, plugins, severity, config)
        } else {
            self.execute_concurrent(cancel, cycle_id, plugins, severity, config)
        }
    }

    /// One task per resource group, at most `max_parallelism` at a time.
    /// Results come back in registration order.
    pub fn execute_concurrent(
        &self,
        cancel: &CancelToken,
        cycle_id: u64,
        plugins: &[PluginHandle],
        severity: SeverityLevel,
        config: &Config,
    ) -> Vec<ScheduledResult> {
        let groups = partition(plugins);
        let permits = Permits::new(self.max_parallelism);
        let mut slots: Vec<Option<ScheduledResult>> = vec![None; plugins.len()];

        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(groups.len());
            for (group, members) in &groups {
                let permits = &permits;
                let task = move || {
                    let _permit = permits.acquire();
                    self.run_group(cancel, cycle_id, group, members, severity, config)
                };
                match thread::Builder::new()
                    .name(format!("spw-group-{group}"))
                    .spawn_scoped(scope, task.clone())
                {
                    Ok(handle) => handles.push(handle),
                    Err(e) => {
                        self.log.log(
                            LogRecord::warn("group thread spawn failed, running inline")
                                .field("resource_group", group.as_str())
                                .field("error", e.to_string()),
                        );
                        for (idx, result) in task() {
                            slots[idx] = Some(result);
                        }
                    }
                }
            }
            for handle in handles {
                if let Ok(results) = handle.join() {
                    for (idx, result) in results {
                        slots[idx] = Some(result);
                    }
                }
            }
        });

        slots
            .into_iter()
            .zip(plugins)
            .map(|(slot, handle)| {
                slot.unwrap_or_else(|| {
                    ScheduledResult::skipped(handle, &handle.resource_group(), "scheduler task failed")
                })
            })
            .collect()
    }

    /// Every plugin in registration order on the calling thread.
    pub fn execute_serial(
        &self,
        cancel: &CancelToken,
        cycle_id: u64,
        plugins: &[PluginHandle],
        severity: SeverityLevel,
        config: &Config,
    ) -> Vec<ScheduledResult> {
        let mut results = Vec::with_capacity(plugins.len());
        let mut cancelled = false;
        for handle in plugins {
            let group = handle.resource_group();
            if cancelled || cancel.is_cancelled() {
                cancelled = true;
                results.push(self.skip_cancelled(cycle_id, handle, &group));
                continue;
            }
            results.push(self.run_one(cancel, cycle_id, handle, &group, severity, config));
        }
        results
    }

    fn run_group(
        &self,
        cancel: &CancelToken,
        cycle_id: u64,
        group: &str,
        members: &[(usize, PluginHandle)],
        severity: SeverityLevel,
        config: &Config,
    ) -> Vec<(usize, ScheduledResult)> {
        let mut out = Vec::with_capacity(members.len());
        for (pos, (idx, handle)) in members.iter().enumerate() {
            if cancel.is_cancelled() {
                for (idx, rest) in &members[pos..] {
                    out.push((*idx, self.skip_cancelled(cycle_id, rest, group)));
                }
                break;
            }
            out.push((
                *idx,
                self.run_one(cancel, cycle_id, handle, group, severity, config),
            ));
        }
        out
    }

    fn skip_cancelled(&self, cycle_id: u64, handle: &PluginHandle, group: &str) -> ScheduledResult {
        self.publish(PluginSkipped {
            cycle_id,
            plugin: handle.name().to_string(),
            reason: SKIP_CANCELLED.to_string(),
        });
        ScheduledResult::skipped(handle, group, SKIP_CANCELLED)
    }

    fn run_one(
        &self,
        cancel: &CancelToken,
        cycle_id: u64,
        handle: &PluginHandle,
        group: &str,
        severity: SeverityLevel,
        config: &Config,
    ) -> ScheduledResult {
        let name = handle.name();

        if let Some(ext) = handle.extension() {
            let preflight = catch_unwind(AssertUnwindSafe(|| ext.preflight_check(cancel, config)))
                .unwrap_or_else(|panic| Err(format!("preflight panicked: {}", panic_message(&*panic))));
            if let Err(reason) = preflight {
                self.log.log(
                    LogRecord::warn("preflight failed, skipping plugin")
                        .field("cycle_id", cycle_id)
                        .field("plugin", name)
                        .field("reason", reason.as_str()),
                );
                self.publish(PreflightFailed {
                    cycle_id,
                    plugin: name.to_string(),
                    reason: reason.clone(),
                });
                return ScheduledResult::skipped(handle, group, reason);
            }
        }

        self.publish(PluginStart {
            cycle_id,
            plugin: name.to_string(),
            resource_group: group.to_string(),
            severity,
        });

        let scope = cancel.child_with_timeout(self.plugin_timeout);
        let started = Instant::now();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            handle
                .plugin()
                .cleanup(&scope, severity, config, self.log.as_ref())
        }))
        .unwrap_or_else(|panic| {
            CleanupOutcome::failed(
                name,
                severity,
                format!("plugin panicked: {}", panic_message(&*panic)),
            )
        });
        let duration = started.elapsed();

        if scope.deadline_exceeded() {
            self.log.log(
                LogRecord::warn("plugin overran its timeout")
                    .field("plugin", name)
                    .field("timeout_secs", self.plugin_timeout.as_secs())
                    .field("elapsed_ms", duration_ms(duration)),
            );
        }

        self.publish(PluginEnd {
            cycle_id,
            plugin: name.to_string(),
            resource_group: group.to_string(),
            duration,
            bytes_freed: outcome.bytes_freed,
            items_cleaned: outcome.items_cleaned,
            error: outcome.error.clone(),
        });
        if let Some(error) = &outcome.error {
            self.publish(PluginError {
                cycle_id,
                plugin: name.to_string(),
                error: error.clone(),
            });
        }
        if outcome.bytes_freed > 0 {
            self.publish(BytesFreed {
                cycle_id,
                plugin: name.to_string(),
                bytes: outcome.bytes_freed,
            });
        }

        ScheduledResult {
            plugin_name: name.to_string(),
            resource_group: group.to_string(),
            outcome: Some(outcome),
            duration,
            skip_reason: None,
        }
    }

    fn publish(&self, payload: impl Into<crate::events::EventPayload>) {
        if let Some(bus) = &self.bus {
            bus.publish_typed(payload);
        }
    }
}

/// Groups in first-appearance order; members keep registration order and index.
fn partition(plugins: &[PluginHandle]) -> Vec<(String, Vec<(usize, PluginHandle)>)> {
    let mut groups: Vec<(String, Vec<(usize, PluginHandle)>)> = Vec::new();
    for (idx, handle) in plugins.iter().enumerate() {
        let group = handle.resource_group();
        match groups.iter_mut().find(|(name, _)| *name == group) {
            Some((_, members)) => members.push((idx, handle.clone())),
            None => groups.push((group, vec![(idx, handle.clone())])),
        }
    }
    groups
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
