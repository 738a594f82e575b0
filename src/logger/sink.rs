//! Structured key/value log sinks.
//!
//! Every sink is fire-and-forget: `log()` never fails and never panics. Plugins,
//! the scheduler and the log subscriber all write through `&dyn LogSink`.

#![allow(missing_docs)]

use std::fmt::Write as _;
use std::io::{self, Write as _};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::logger::jsonl::{JsonlConfig, JsonlWriter, LogEntry};

/// Record severity. Distinct from [`crate::monitor::threshold::SeverityLevel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// One structured log line: a message plus ordered key/value fields.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    pub fields: Vec<(String, Value)>,
}

impl LogRecord {
    #[must_use]
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            fields: Vec::new(),
        }
    }

    #[must_use]
    pub fn debug(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Debug, message)
    }

    #[must_use]
    pub fn info(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, message)
    }

    #[must_use]
    pub fn warn(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Warn, message)
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, message)
    }

    /// Append a field.
    #[must_use]
    pub fn field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.push((key.to_string(), value.into()));
        self
    }

    /// Look up the first field named `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    /// `msg key=value ...` rendering used by the stderr sink.
    #[must_use]
    pub fn render_kv(&self) -> String {
        let mut line = self.message.clone();
        for (key, value) in &self.fields {
            match value {
                Value::String(s) if !s.contains(char::is_whitespace) && !s.is_empty() => {
                    let _ = write!(line, " {key}={s}");
                }
                other => {
                    let _ = write!(line, " {key}={other}");
                }
            }
        }
        line
    }
}

/// Structured, fire-and-forget logging surface.
pub trait LogSink: Send + Sync {
    fn log(&self, record: LogRecord);
}

/// Writes `[SPW] level msg key=value` lines to stderr.
#[derive(Debug, Clone, Copy)]
pub struct StderrSink {
    min_level: LogLevel,
}

impl StderrSink {
    #[must_use]
    pub const fn new(min_level: LogLevel) -> Self {
        Self { min_level }
    }
}

impl Default for StderrSink {
    fn default() -> Self {
        Self::new(LogLevel::Info)
    }
}

impl LogSink for StderrSink {
    fn log(&self, record: LogRecord) {
        if record.level < self.min_level {
            return;
        }
        let _ = writeln!(
            io::stderr(),
            "[SPW] {:<5} {}",
            record.level.label(),
            record.render_kv()
        );
    }
}

/// Appends one JSON object per record through a [`JsonlWriter`].
pub struct JsonlSink {
    writer: Mutex<JsonlWriter>,
}

impl JsonlSink {
    #[must_use]
    pub fn open(config: JsonlConfig) -> Self {
        Self {
            writer: Mutex::new(JsonlWriter::open(config)),
        }
    }

    /// Flush and fsync the underlying file.
    pub fn sync(&self) {
        self.writer.lock().fsync();
    }

    /// Current degradation state of the writer (`normal`, `fallback`, ...).
    #[must_use]
    pub fn state(&self) -> &'static str {
        self.writer.lock().state()
    }
}

impl LogSink for JsonlSink {
    fn log(&self, record: LogRecord) {
        let entry = LogEntry::from_record(&record);
        self.writer.lock().write_entry(&entry);
    }
}

/// Sends every record to each inner sink in order.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn LogSink>>,
}

impl FanoutSink {
    #[must_use]
    pub fn new(sinks: Vec<Arc<dyn LogSink>>) -> Self {
        Self { sinks }
    }
}

impl LogSink for FanoutSink {
    fn log(&self, record: LogRecord) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.log(record.clone());
            }
            last.log(record);
        }
    }
}

/// Keeps records in memory. Used by tests and by embedders that forward logs.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<LogRecord>>,
}

impl MemorySink {
    #[must_use]
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.records
            .lock()
            .iter()
            .map(|record| record.message.clone())
            .collect()
    }
}

impl LogSink for MemorySink {
    fn log(&self, record: LogRecord) {
        self.records.lock().push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_keeps_field_order() {
        let record = LogRecord::info("plugin finished")
            .field("plugin", "docker")
            .field("bytes_freed", 1024_u64)
            .field("ok", true);
        let keys: Vec<&str> = record.fields.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["plugin", "bytes_freed", "ok"]);
        assert_eq!(record.get("bytes_freed"), Some(&Value::from(1024_u64)));
    }

    #[test]
    fn render_kv_quotes_values_with_spaces() {
        let line = LogRecord::warn("preflight failed")
            .field("plugin", "brew")
            .field("reason", "not installed")
            .render_kv();
        assert_eq!(line, "preflight failed plugin=brew reason=\"not installed\"");
    }

    #[test]
    fn fanout_reaches_every_sink() {
        let a = Arc::new(MemorySink::default());
        let b = Arc::new(MemorySink::default());
        let fanout = FanoutSink::new(vec![a.clone(), b.clone()]);
        fanout.log(LogRecord::info("hello"));
        assert_eq!(a.messages(), ["hello"]);
        assert_eq!(b.messages(), ["hello"]);
    }

    #[test]
    fn empty_fanout_is_noop() {
        FanoutSink::default().log(LogRecord::error("dropped"));
    }

    #[test]
    fn jsonl_sink_writes_flattened_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("activity.jsonl");
        let sink = JsonlSink::open(JsonlConfig {
            path: path.clone(),
            fallback_path: None,
            ..JsonlConfig::default()
        });
        sink.log(LogRecord::info("cycle end").field("cycle_id", 7_u64));
        sink.sync();

        let raw = std::fs::read_to_string(&path).unwrap();
        let line: Value = serde_json::from_str(raw.lines().next().unwrap()).unwrap();
        assert_eq!(line["msg"], "cycle end");
        assert_eq!(line["level"], "info");
        assert_eq!(line["cycle_id"], 7);
        assert!(line["ts"].is_string());
        assert_eq!(sink.state(), "normal");
    }
}
