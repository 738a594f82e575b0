//! External-command plugin: one `[[plugins.commands]]` entry.
//!
//! The child is polled rather than waited on so that cancellation and the
//! per-plugin timeout can kill it. Bytes freed are only known when a
//! `measure_path` is configured, as the growth in free space on that filesystem.

#![allow(missing_docs)]

use std::io::Read;
use std::process::{Child, ChildStderr, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, bounded};

use crate::core::cancel::{CancelReason, CancelToken};
use crate::core::config::{CommandPluginConfig, Config};
use crate::logger::sink::{LogRecord, LogSink};
use crate::monitor::threshold::SeverityLevel;
use crate::platform::pal::DiskSampler;
use crate::plugin::{CleanupOutcome, Extension, Plugin, default_resource_group};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const MAX_STDERR_CHARS: usize = 512;
/// Bytes of stderr kept in memory; the rest is drained and discarded.
const MAX_STDERR_BYTES: usize = 4096;
/// How long to wait for the stderr tail once the child is gone. Grandchildren
/// that escaped the kill may hold the pipe open indefinitely.
const STDERR_GRACE: Duration = Duration::from_millis(250);

/// Env var carrying the cycle severity into the child.
pub const SEVERITY_ENV: &str = "SPACEWARDEN_SEVERITY";

pub struct CommandPlugin {
    spec: CommandPluginConfig,
    sampler: Arc<dyn DiskSampler>,
}

impl CommandPlugin {
    #[must_use]
    pub fn new(spec: CommandPluginConfig, sampler: Arc<dyn DiskSampler>) -> Self {
        Self { spec, sampler }
    }

    #[must_use]
    pub fn spec(&self) -> &CommandPluginConfig {
        &self.spec
    }

    fn free_bytes(&self) -> Option<u64> {
        let path = self.spec.measure_path.as_ref()?;
        self.sampler.sample(path).ok().map(|s| s.free_bytes)
    }
}

impl Plugin for CommandPlugin {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn description(&self) -> &str {
        &self.spec.description
    }

    fn supported_platforms(&self) -> Vec<String> {
        self.spec.platforms.clone()
    }

    fn enabled(&self, _config: &Config) -> bool {
        self.spec.enabled
    }

    fn cleanup(
        &self,
        cancel: &CancelToken,
        severity: SeverityLevel,
        _config: &Config,
        log: &dyn LogSink,
    ) -> CleanupOutcome {
        if severity < self.spec.min_severity {
            log.log(
                LogRecord::debug("below plugin minimum severity")
                    .field("plugin", self.name())
                    .field("severity", severity.label())
                    .field("min_severity", self.spec.min_severity.label()),
            );
            return CleanupOutcome::new(self.name(), severity);
        }

        let before = self.free_bytes();
        let started = Instant::now();
        let exit = match run_polled(&self.spec.command, severity, cancel) {
            Ok(exit) => exit,
            Err(RunError::Spawn(msg)) => return CleanupOutcome::failed(self.name(), severity, msg),
            Err(RunError::Interrupted(reason)) => {
                let msg = match reason {
                    CancelReason::DeadlineExceeded => {
                        format!("timed out after {:.1}s", started.elapsed().as_secs_f64())
                    }
                    CancelReason::Cancelled => "cancelled".to_string(),
                };
                return CleanupOutcome::failed(self.name(), severity, msg);
            }
        };

        if !exit.status.success() {
            let program = self.spec.command.first().map_or("command", String::as_str);
            let mut msg = format!("{program} exited with {}", exit.status);
            if !exit.stderr.is_empty() {
                msg.push_str(": ");
                msg.push_str(&exit.stderr);
            }
            return CleanupOutcome::failed(self.name(), severity, msg);
        }

        let freed = match (before, self.free_bytes()) {
            (Some(before), Some(after)) => after.saturating_sub(before),
            _ => 0,
        };
        CleanupOutcome::new(self.name(), severity).with_freed(freed, u64::from(freed > 0))
    }
}

impl Extension for CommandPlugin {
    fn resource_group(&self) -> String {
        self.spec
            .resource_group
            .clone()
            .unwrap_or_else(|| default_resource_group(&self.spec.name).to_string())
    }

    fn estimated_duration(&self) -> Duration {
        Duration::from_secs(self.spec.estimated_duration_secs)
    }

    fn preflight_check(&self, cancel: &CancelToken, _config: &Config) -> Result<(), String> {
        if self.spec.preflight.is_empty() {
            return Ok(());
        }
        match run_polled(&self.spec.preflight, SeverityLevel::None, cancel) {
            Ok(exit) if exit.status.success() => Ok(()),
            Ok(exit) => Err(format!(
                "preflight `{}` exited with {}",
                self.spec.preflight.join(" "),
                exit.status
            )),
            Err(RunError::Spawn(msg)) => Err(msg),
            Err(RunError::Interrupted(_)) => Err("preflight cancelled".to_string()),
        }
    }
}

// ──────────────────── child process ────────────────────

struct ChildExit {
    status: ExitStatus,
    stderr: String,
}

enum RunError {
    Spawn(String),
    Interrupted(CancelReason),
}

fn run_polled(
    argv: &[String],
    severity: SeverityLevel,
    cancel: &CancelToken,
) -> Result<ChildExit, RunError> {
    let Some((program, args)) = argv.split_first() else {
        return Err(RunError::Spawn("empty command".to_string()));
    };
    if let Some(reason) = cancel.reason() {
        return Err(RunError::Interrupted(reason));
    }

    let mut command = Command::new(program);
    command
        .args(args)
        .env(SEVERITY_ENV, severity.label())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    // Own process group, so a kill reaches everything the command forked.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    let mut child = command
        .spawn()
        .map_err(|e| RunError::Spawn(format!("cannot run {program}: {e}")))?;

    // Drained on a thread so a chatty child never blocks on a full pipe.
    let stderr_rx = child.stderr.take().and_then(spawn_stderr_reader);

    let status = wait_or_kill(&mut child, cancel);
    let stderr = stderr_rx
        .and_then(|rx| rx.recv_timeout(STDERR_GRACE).ok())
        .map(|raw| truncate(raw.trim()))
        .unwrap_or_default();

    status.map(|status| ChildExit { status, stderr })
}

/// Reads at most [`MAX_STDERR_BYTES`], keeps draining until EOF, then sends
/// the lossily decoded tail. A read error is reported in the text.
fn spawn_stderr_reader(mut pipe: ChildStderr) -> Option<Receiver<String>> {
    let (tx, rx) = bounded(1);
    thread::Builder::new()
        .name("spw-cmd-stderr".to_string())
        .spawn(move || {
            let mut kept = Vec::new();
            let mut chunk = [0_u8; 8192];
            let failure = loop {
                match pipe.read(&mut chunk) {
                    Ok(0) => break None,
                    Ok(n) => {
                        let room = MAX_STDERR_BYTES.saturating_sub(kept.len());
                        kept.extend_from_slice(&chunk[..n.min(room)]);
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                    Err(e) => break Some(e),
                }
            };
            let mut text = String::from_utf8_lossy(&kept).into_owned();
            if let Some(e) = failure {
                text.push_str(&format!(" [stderr read failed: {e}]"));
            }
            let _ = tx.send(text);
        })
        .ok()?;
    Some(rx)
}

fn wait_or_kill(child: &mut Child, cancel: &CancelToken) -> Result<ExitStatus, RunError> {
    let started = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {}
            Err(e) => {
                kill_tree(child);
                return Err(RunError::Spawn(format!(
                    "lost child after {:?}: {e}",
                    started.elapsed()
                )));
            }
        }
        if let Some(reason) = cancel.reason() {
            kill_tree(child);
            return Err(RunError::Interrupted(reason));
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// SIGKILL the child's process group, then reap the child.
fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        if let Ok(pid) = i32::try_from(child.id()) {
            let _ = killpg(Pid::from_raw(pid), Signal::SIGKILL);
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

fn truncate(s: &str) -> String {
    if s.chars().count() <= MAX_STDERR_CHARS {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(MAX_STDERR_CHARS).collect();
        out.push('…');
        out
    }
}
