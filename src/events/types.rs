//! Event value types. Payloads form a closed set; the event type is derived from
//! the payload so the two can never disagree.

#![allow(missing_docs)]

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::monitor::threshold::SeverityLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    CycleStart,
    CycleEnd,
    PluginStart,
    PluginEnd,
    PluginError,
    PluginSkipped,
    PreflightFailed,
    LevelChanged,
    Heartbeat,
    BytesFreed,
}

impl EventType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CycleStart => "cycle_start",
            Self::CycleEnd => "cycle_end",
            Self::PluginStart => "plugin_start",
            Self::PluginEnd => "plugin_end",
            Self::PluginError => "plugin_error",
            Self::PluginSkipped => "plugin_skipped",
            Self::PreflightFailed => "preflight_failed",
            Self::LevelChanged => "level_changed",
            Self::Heartbeat => "heartbeat",
            Self::BytesFreed => "bytes_freed",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ──────────────────── payloads ────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleStart {
    pub cycle_id: u64,
    pub severity: SeverityLevel,
    pub plugin_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleEnd {
    pub cycle_id: u64,
    pub severity: SeverityLevel,
    pub duration: Duration,
    pub total_freed: u64,
    pub plugins_run: usize,
    pub plugin_errors: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginStart {
    pub cycle_id: u64,
    pub plugin: String,
    pub resource_group: String,
    pub severity: SeverityLevel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginEnd {
    pub cycle_id: u64,
    pub plugin: String,
    pub resource_group: String,
    pub duration: Duration,
    pub bytes_freed: u64,
    pub items_cleaned: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginError {
    pub cycle_id: u64,
    pub plugin: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginSkipped {
    pub cycle_id: u64,
    pub plugin: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreflightFailed {
    pub cycle_id: u64,
    pub plugin: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelChanged {
    pub previous: SeverityLevel,
    pub current: SeverityLevel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heartbeat {
    pub uptime: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BytesFreed {
    pub cycle_id: u64,
    pub plugin: String,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    CycleStart(CycleStart),
    CycleEnd(CycleEnd),
    PluginStart(PluginStart),
    PluginEnd(PluginEnd),
    PluginError(PluginError),
    PluginSkipped(PluginSkipped),
    PreflightFailed(PreflightFailed),
    LevelChanged(LevelChanged),
    Heartbeat(Heartbeat),
    BytesFreed(BytesFreed),
}

impl EventPayload {
    #[must_use]
    pub const fn event_type(&self) -> EventType {
        match self {
            Self::CycleStart(_) => EventType::CycleStart,
            Self::CycleEnd(_) => EventType::CycleEnd,
            Self::PluginStart(_) => EventType::PluginStart,
            Self::PluginEnd(_) => EventType::PluginEnd,
            Self::PluginError(_) => EventType::PluginError,
            Self::PluginSkipped(_) => EventType::PluginSkipped,
            Self::PreflightFailed(_) => EventType::PreflightFailed,
            Self::LevelChanged(_) => EventType::LevelChanged,
            Self::Heartbeat(_) => EventType::Heartbeat,
            Self::BytesFreed(_) => EventType::BytesFreed,
        }
    }
}

macro_rules! payload_from {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for EventPayload {
                fn from(payload: $variant) -> Self {
                    Self::$variant(payload)
                }
            }
        )*
    };
}

payload_from!(
    CycleStart,
    CycleEnd,
    PluginStart,
    PluginEnd,
    PluginError,
    PluginSkipped,
    PreflightFailed,
    LevelChanged,
    Heartbeat,
    BytesFreed,
);

// ──────────────────── event ────────────────────

/// One published event. The bus fills `timestamp` when it is `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub timestamp: Option<DateTime<Utc>>,
    pub payload: EventPayload,
}

impl Event {
    #[must_use]
    pub fn new(payload: impl Into<EventPayload>) -> Self {
        Self {
            timestamp: None,
            payload: payload.into(),
        }
    }

    #[must_use]
    pub fn at(timestamp: DateTime<Utc>, payload: impl Into<EventPayload>) -> Self {
        Self {
            timestamp: Some(timestamp),
            payload: payload.into(),
        }
    }

    #[must_use]
    pub const fn event_type(&self) -> EventType {
        self.payload.event_type()
    }

    /// Timestamp, or now for events that never went through a bus.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp.unwrap_or_else(Utc::now)
    }
}
