//! In-memory metrics aggregated from bus events. Only the latest totals are kept.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;

use crate::core::errors::Result;
use crate::events::{Event, EventBus, EventPayload};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PluginStats {
    pub last_duration: Duration,
    pub bytes_freed: u64,
    pub runs: u64,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub total_bytes_freed: u64,
    pub total_cycles: u64,
    pub total_errors: u64,
    pub plugins: BTreeMap<String, PluginStats>,
}

/// Totals and per-plugin stats are one unit, so readers never see a cycle's
/// bytes without its count.
#[derive(Default)]
pub struct MetricsCollector {
    state: RwLock<MetricsSnapshot>,
}

impl MetricsCollector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe as `metrics`.
    pub fn attach(self: &Arc<Self>, bus: &EventBus) -> Result<()> {
        let collector = Arc::clone(self);
        bus.subscribe("metrics", move |event| collector.handle(&event))
    }

    pub fn handle(&self, event: &Event) {
        match &event.payload {
            EventPayload::CycleEnd(end) => {
                let mut state = self.state.write();
                state.total_bytes_freed = state.total_bytes_freed.saturating_add(end.total_freed);
                state.total_cycles += 1;
            }
            EventPayload::PluginError(_) => {
                self.state.write().total_errors += 1;
            }
            EventPayload::PluginEnd(end) => {
                let mut state = self.state.write();
                let stats = state.plugins.entry(end.plugin.clone()).or_default();
                stats.last_duration = end.duration;
                stats.bytes_freed = stats.bytes_freed.saturating_add(end.bytes_freed);
                stats.runs += 1;
            }
            _ => {}
        }
    }

    #[must_use]
    pub fn total_bytes_freed(&self) -> u64 {
        self.state.read().total_bytes_freed
    }

    #[must_use]
    pub fn total_cycles(&self) -> u64 {
        self.state.read().total_cycles
    }

    #[must_use]
    pub fn total_errors(&self) -> u64 {
        self.state.read().total_errors
    }

    #[must_use]
    pub fn plugin(&self, name: &str) -> Option<PluginStats> {
        self.state.read().plugins.get(name).copied()
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.state.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::types::{CycleEnd, PluginEnd, PluginError};
    use crate::monitor::threshold::SeverityLevel;

    fn plugin_end(name: &str, freed: u64, ms: u64) -> Event {
        Event::new(PluginEnd {
            cycle_id: 1,
            plugin: name.to_string(),
            resource_group: "default".to_string(),
            duration: Duration::from_millis(ms),
            bytes_freed: freed,
            items_cleaned: 0,
            error: None,
        })
    }

    #[test]
    fn aggregates_cycles_errors_and_plugins() {
        let metrics = MetricsCollector::new();
        metrics.handle(&plugin_end("npm", 10, 5));
        metrics.handle(&plugin_end("npm", 20, 7));
        metrics.handle(&plugin_end("brew", 0, 3));
        metrics.handle(&Event::new(PluginError {
            cycle_id: 1,
            plugin: "brew".to_string(),
            error: "x".to_string(),
        }));
        metrics.handle(&Event::new(CycleEnd {
            cycle_id: 1,
            severity: SeverityLevel::Moderate,
            duration: Duration::from_millis(12),
            total_freed: 30,
            plugins_run: 3,
            plugin_errors: 1,
        }));

        let snap = metrics.snapshot();
        assert_eq!(snap.total_bytes_freed, 30);
        assert_eq!(snap.total_cycles, 1);
        assert_eq!(snap.total_errors, 1);
        let npm = snap.plugins["npm"];
        assert_eq!(npm.runs, 2);
        assert_eq!(npm.bytes_freed, 30);
        assert_eq!(npm.last_duration, Duration::from_millis(7));
        assert_eq!(metrics.plugin("brew").map(|s| s.runs), Some(1));
        assert_eq!(metrics.plugin("missing"), None);
    }

    #[test]
    fn snapshot_serializes() {
        let metrics = MetricsCollector::new();
        metrics.handle(&plugin_end("npm", 1, 1));
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["plugins"]["npm"]["runs"], 1);
    }

    #[test]
    fn snapshot_never_splits_a_cycle_end() {
        let metrics = Arc::new(MetricsCollector::new());
        let writer = {
            let metrics = Arc::clone(&metrics);
            std::thread::spawn(move || {
                for id in 0..2_000 {
                    metrics.handle(&Event::new(CycleEnd {
                        cycle_id: id,
                        severity: SeverityLevel::Warning,
                        duration: Duration::ZERO,
                        total_freed: 10,
                        plugins_run: 1,
                        plugin_errors: 0,
                    }));
                }
            })
        };
        while !writer.is_finished() {
            let snap = metrics.snapshot();
            assert_eq!(snap.total_bytes_freed, snap.total_cycles * 10);
        }
        writer.join().unwrap();
        assert_eq!(metrics.total_cycles(), 2_000);
        assert_eq!(metrics.total_bytes_freed(), 20_000);
    }
}
