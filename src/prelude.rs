//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use spacewarden::prelude::*;
//! ```

// Core
pub use crate::core::cancel::CancelToken;
pub use crate::core::config::Config;
pub use crate::core::errors::{Result, SpwError};

// Platform
pub use crate::platform::pal::{DiskSampler, StatvfsSampler, UsageSample, detect_sampler};

// Monitor
pub use crate::monitor::mounts::{MountAggregator, MountSpec};
pub use crate::monitor::threshold::{SeverityLevel, Thresholds, classify};

// Plugins
pub use crate::plugin::registry::Registry;
pub use crate::plugin::{CleanupOutcome, Extension, Plugin, PluginHandle};

// Events
pub use crate::events::{Event, EventBus, EventPayload, EventType};

// Daemon
pub use crate::daemon::cycle::{CycleOutcome, CycleRecord, Daemon};
pub use crate::daemon::heartbeat::HeartbeatWriter;
pub use crate::daemon::metrics::MetricsCollector;
pub use crate::daemon::scheduler::{ScheduledResult, Scheduler};

// Logging
pub use crate::logger::sink::{LogLevel, LogRecord, LogSink, StderrSink};
