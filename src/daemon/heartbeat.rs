//! Heartbeat subscriber: keeps a small JSON liveness file up to date.
//!
//! The file is rewritten on every `CycleEnd` and every `Heartbeat` event via
//! write-to-temp-then-rename, so readers (the `status` command, external
//! monitors) never observe a partial file.

#![allow(missing_docs)]

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, SpwError};
use crate::events::{Event, EventBus, EventPayload};

/// Age after which `status` warns that the daemon may be stalled.
pub const HEARTBEAT_STALE_SECS: i64 = 900;

/// On-disk heartbeat document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatState {
    /// RFC 3339 time of this write.
    pub timestamp: String,
    pub uptime_seconds: u64,
    pub cycles_run: u64,
    pub total_freed: u64,
    pub last_cycle_at: Option<String>,
    pub pid: u32,
}

impl HeartbeatState {
    /// Seconds since `timestamp`, if it parses.
    #[must_use]
    pub fn age_seconds(&self) -> Option<i64> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .ok()
            .map(|ts| Utc::now().signed_duration_since(ts).num_seconds())
    }

    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.age_seconds()
            .is_some_and(|age| age > HEARTBEAT_STALE_SECS)
    }
}

#[derive(Debug, Default)]
struct Counters {
    cycles_run: u64,
    total_freed: u64,
    last_cycle_at: Option<DateTime<Utc>>,
}

pub struct HeartbeatWriter {
    path: PathBuf,
    started_at: DateTime<Utc>,
    counters: Mutex<Counters>,
}

impl HeartbeatWriter {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            started_at: Utc::now(),
            counters: Mutex::new(Counters::default()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Subscribe as `heartbeat`.
    pub fn attach(self: &Arc<Self>, bus: &EventBus) -> Result<()> {
        let writer = Arc::clone(self);
        bus.subscribe("heartbeat", move |event| writer.handle(&event))
    }

    pub fn handle(&self, event: &Event) {
        let state = {
            let mut counters = self.counters.lock();
            match &event.payload {
                EventPayload::CycleEnd(end) => {
                    counters.cycles_run += 1;
                    counters.total_freed = counters.total_freed.saturating_add(end.total_freed);
                    counters.last_cycle_at = Some(event.timestamp());
                }
                EventPayload::Heartbeat(_) => {}
                _ => return,
            }
            self.snapshot(&counters)
        };

        if let Err(e) = write_heartbeat(&self.path, &state) {
            eprintln!(
                "[SPW-HEARTBEAT] failed to write {}: {e}",
                self.path.display()
            );
        }
    }

    #[must_use]
    pub fn current(&self) -> HeartbeatState {
        self.snapshot(&self.counters.lock())
    }

    fn snapshot(&self, counters: &Counters) -> HeartbeatState {
        let now = Utc::now();
        HeartbeatState {
            timestamp: now.to_rfc3339(),
            uptime_seconds: u64::try_from(now.signed_duration_since(self.started_at).num_seconds())
                .unwrap_or(0),
            cycles_run: counters.cycles_run,
            total_freed: counters.total_freed,
            last_cycle_at: counters.last_cycle_at.map(|ts| ts.to_rfc3339()),
            pid: std::process::id(),
        }
    }
}

/// Write the heartbeat atomically: temp file (0644 on unix), then rename.
pub fn write_heartbeat(path: &Path, state: &HeartbeatState) -> std::io::Result<()> {
    let tmp_path = path.with_extension("json.tmp");

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(state).map_err(std::io::Error::other)?;

    let result = (|| {
        {
            use std::io::Write;
            let mut opts = OpenOptions::new();
            opts.write(true).create(true).truncate(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt as _;
                opts.mode(0o644);
            }
            let mut file = opts.open(&tmp_path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

pub fn read_heartbeat(path: &Path) -> Result<HeartbeatState> {
    let raw = fs::read_to_string(path).map_err(|source| SpwError::io(path, source))?;
    Ok(serde_json::from_str(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::types::{CycleEnd, Heartbeat, PluginError};
    use crate::monitor::threshold::SeverityLevel;
    use std::time::Duration;

    fn cycle_end(freed: u64) -> Event {
        let mut event = Event::new(CycleEnd {
            cycle_id: 1,
            severity: SeverityLevel::Warning,
            duration: Duration::from_millis(5),
            total_freed: freed,
            plugins_run: 1,
            plugin_errors: 0,
        });
        event.timestamp = Some(Utc::now());
        event
    }

    #[test]
    fn cycle_end_updates_and_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hb").join("heartbeat.json");
        let writer = HeartbeatWriter::new(&path);

        writer.handle(&cycle_end(100));
        writer.handle(&cycle_end(50));

        let state = read_heartbeat(&path).unwrap();
        assert_eq!(state.cycles_run, 2);
        assert_eq!(state.total_freed, 150);
        assert!(state.last_cycle_at.is_some());
        assert_eq!(state.pid, std::process::id());
        assert!(!path.with_extension("json.tmp").exists());
        assert!(!state.is_stale());
    }

    #[test]
    fn heartbeat_event_writes_without_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heartbeat.json");
        let writer = HeartbeatWriter::new(&path);
        writer.handle(&Event::new(Heartbeat {
            uptime: Duration::from_secs(1),
        }));
        let state = read_heartbeat(&path).unwrap();
        assert_eq!(state.cycles_run, 0);
        assert!(state.last_cycle_at.is_none());
    }

    #[test]
    fn unrelated_events_do_not_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heartbeat.json");
        let writer = HeartbeatWriter::new(&path);
        writer.handle(&Event::new(PluginError {
            cycle_id: 1,
            plugin: "x".to_string(),
            error: "e".to_string(),
        }));
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn heartbeat_file_is_world_readable() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heartbeat.json");
        write_heartbeat(&path, &HeartbeatWriter::new(&path).current()).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode & 0o044, 0o044);
    }

    #[test]
    fn stale_detection() {
        let mut state = HeartbeatWriter::new("/unused").current();
        state.timestamp = (Utc::now() - chrono::Duration::seconds(3600)).to_rfc3339();
        assert!(state.is_stale());
    }

    #[test]
    fn read_missing_heartbeat_is_io_error() {
        let err = read_heartbeat(Path::new("/definitely/missing/heartbeat.json")).unwrap_err();
        assert_eq!(err.code(), "SPW-3002");
    }
}
