//! Bus subscriber that turns every event into one structured log record.

#![allow(missing_docs)]

use std::sync::Arc;

use crate::core::errors::Result;
use crate::daemon::scheduler::duration_ms;
use crate::events::{Event, EventBus, EventPayload};
use crate::logger::sink::{LogRecord, LogSink};

/// Subscribe `sink` to `bus` as `log`.
pub fn attach(bus: &EventBus, sink: Arc<dyn LogSink>) -> Result<()> {
    bus.subscribe("log", move |event| sink.log(event_record(&event)))
}

/// The log line for `event`. Pure.
#[must_use]
pub fn event_record(event: &Event) -> LogRecord {
    let record = match &event.payload {
        EventPayload::CycleStart(e) => LogRecord::info("cycle start")
            .field("cycle_id", e.cycle_id)
            .field("severity", e.severity.label())
            .field("plugin_count", e.plugin_count),
        EventPayload::CycleEnd(e) => LogRecord::info("cycle end")
            .field("cycle_id", e.cycle_id)
            .field("severity", e.severity.label())
            .field("duration_ms", duration_ms(e.duration))
            .field("total_freed", e.total_freed)
            .field("plugins_run", e.plugins_run)
            .field("plugin_errors", e.plugin_errors),
        EventPayload::PluginStart(e) => LogRecord::info("plugin start")
            .field("cycle_id", e.cycle_id)
            .field("plugin", e.plugin.as_str())
            .field("resource_group", e.resource_group.as_str())
            .field("severity", e.severity.label()),
        EventPayload::PluginEnd(e) => {
            let record = LogRecord::info("plugin end")
                .field("cycle_id", e.cycle_id)
                .field("plugin", e.plugin.as_str())
                .field("resource_group", e.resource_group.as_str())
                .field("duration_ms", duration_ms(e.duration))
                .field("bytes_freed", e.bytes_freed)
                .field("items_cleaned", e.items_cleaned);
            match &e.error {
                Some(error) => record.field("error", error.as_str()),
                None => record,
            }
        }
        EventPayload::PluginError(e) => LogRecord::error("plugin error")
            .field("cycle_id", e.cycle_id)
            .field("plugin", e.plugin.as_str())
            .field("error", e.error.as_str()),
        EventPayload::PluginSkipped(e) => LogRecord::info("plugin skipped")
            .field("cycle_id", e.cycle_id)
            .field("plugin", e.plugin.as_str())
            .field("reason", e.reason.as_str()),
        EventPayload::PreflightFailed(e) => LogRecord::warn("preflight failed")
            .field("cycle_id", e.cycle_id)
            .field("plugin", e.plugin.as_str())
            .field("reason", e.reason.as_str()),
        EventPayload::LevelChanged(e) => LogRecord::info("severity changed")
            .field("from", e.previous.label())
            .field("to", e.current.label()),
        EventPayload::Heartbeat(e) => {
            LogRecord::debug("heartbeat").field("uptime_secs", e.uptime.as_secs())
        }
        EventPayload::BytesFreed(e) => LogRecord::info("bytes freed")
            .field("cycle_id", e.cycle_id)
            .field("plugin", e.plugin.as_str())
            .field("bytes", e.bytes),
    };
    record
        .field("event", event.event_type().as_str())
        .field("event_ts", event.timestamp().to_rfc3339())
}
