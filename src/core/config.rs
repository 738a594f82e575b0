//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, SpwError};
use crate::core::paths;
use crate::monitor::mounts::MountSpec;
use crate::monitor::threshold::{SeverityLevel, Thresholds};

/// Parallelism used when the configured value is 0.
pub const DEFAULT_MAX_PARALLELISM: usize = 4;
/// Per-plugin timeout used when the configured value is 0.
pub const DEFAULT_PLUGIN_TIMEOUT: Duration = Duration::from_secs(30 * 60);

const PLUGIN_NAME_PATTERN: &str = r"^[a-z0-9][a-z0-9_.-]*$";

/// Full spacewarden configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub thresholds: Thresholds,
    pub daemon: DaemonConfig,
    pub mounts: Vec<MountSpec>,
    pub plugins: PluginsConfig,
    pub paths: PathsConfig,
}

/// Tick loop and scheduler knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DaemonConfig {
    pub interval_secs: u64,
    /// Preview mode: log what would run, run nothing.
    pub dry_run: bool,
    /// 0 selects the default; 1 selects the serial execution path.
    pub max_parallelism: usize,
    /// 0 selects the default of 30 minutes.
    pub plugin_timeout_secs: u64,
    /// Bounded mailbox size for every event bus subscriber.
    pub mailbox_capacity: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            dry_run: false,
            max_parallelism: DEFAULT_MAX_PARALLELISM,
            plugin_timeout_secs: DEFAULT_PLUGIN_TIMEOUT.as_secs(),
            mailbox_capacity: 64,
        }
    }
}

impl DaemonConfig {
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    #[must_use]
    pub fn effective_parallelism(&self) -> usize {
        if self.max_parallelism == 0 {
            DEFAULT_MAX_PARALLELISM
        } else {
            self.max_parallelism
        }
    }

    #[must_use]
    pub fn plugin_timeout(&self) -> Duration {
        if self.plugin_timeout_secs == 0 {
            DEFAULT_PLUGIN_TIMEOUT
        } else {
            Duration::from_secs(self.plugin_timeout_secs)
        }
    }
}

/// Plugin selection and config-driven command plugins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct PluginsConfig {
    /// Plugin names never returned by the registry.
    pub disabled: Vec<String>,
    pub commands: Vec<CommandPluginConfig>,
}

impl PluginsConfig {
    #[must_use]
    pub fn is_disabled(&self, name: &str) -> bool {
        self.disabled.iter().any(|d| d == name)
    }
}

/// An external cleanup command wrapped as a plugin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CommandPluginConfig {
    pub name: String,
    pub description: String,
    /// Program followed by its arguments.
    pub command: Vec<String>,
    /// Below this level the plugin reports a zero outcome without running.
    pub min_severity: SeverityLevel,
    pub resource_group: Option<String>,
    /// Empty means every platform.
    pub platforms: Vec<String>,
    /// Optional feasibility command that must exit 0.
    pub preflight: Vec<String>,
    pub estimated_duration_secs: u64,
    /// When set, bytes freed is the growth in free space on this path's filesystem.
    pub measure_path: Option<PathBuf>,
    pub enabled: bool,
}

impl Default for CommandPluginConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            command: Vec::new(),
            min_severity: SeverityLevel::Warning,
            resource_group: None,
            platforms: Vec::new(),
            preflight: Vec::new(),
            estimated_duration_secs: 60,
            measure_path: None,
            enabled: true,
        }
    }
}

/// Files the daemon reads and writes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub heartbeat_file: PathBuf,
    pub jsonl_log: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let config_file = paths::home_dir().map_or_else(
            || PathBuf::from("/etc/spacewarden/config.toml"),
            |home| home.join(".config").join("spacewarden").join("config.toml"),
        );
        let data = paths::data_dir();
        Self {
            config_file,
            heartbeat_file: data.join("heartbeat.json"),
            jsonl_log: data.join("activity.jsonl"),
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// A missing file at the default path is not an error; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| SpwError::io(&path_buf, source))?;
            Self::from_toml_str(&raw)?
        } else if path.is_some() {
            return Err(SpwError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.normalize_paths();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse TOML without env overrides or validation.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Render the effective config as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| SpwError::Serialization {
            context: "toml",
            details: e.to_string(),
        })
    }

    /// Deterministic FNV-1a hash of the canonical JSON form, for startup logs.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        for (name, slot) in [
            ("SPW_THRESHOLD_WARNING", &mut self.thresholds.warning),
            ("SPW_THRESHOLD_MODERATE", &mut self.thresholds.moderate),
            ("SPW_THRESHOLD_AGGRESSIVE", &mut self.thresholds.aggressive),
            ("SPW_THRESHOLD_CRITICAL", &mut self.thresholds.critical),
        ] {
            if let Some(raw) = lookup(name) {
                *slot = parse_env(name, &raw)?;
            }
        }

        if let Some(raw) = lookup("SPW_DAEMON_INTERVAL_SECS") {
            self.daemon.interval_secs = parse_env("SPW_DAEMON_INTERVAL_SECS", &raw)?;
        }
        if let Some(raw) = lookup("SPW_DAEMON_DRY_RUN") {
            self.daemon.dry_run = parse_env("SPW_DAEMON_DRY_RUN", &raw)?;
        }
        if let Some(raw) = lookup("SPW_DAEMON_MAX_PARALLELISM") {
            self.daemon.max_parallelism = parse_env("SPW_DAEMON_MAX_PARALLELISM", &raw)?;
        }
        if let Some(raw) = lookup("SPW_DAEMON_PLUGIN_TIMEOUT_SECS") {
            self.daemon.plugin_timeout_secs = parse_env("SPW_DAEMON_PLUGIN_TIMEOUT_SECS", &raw)?;
        }
        if let Some(raw) = lookup("SPW_DAEMON_MAILBOX_CAPACITY") {
            self.daemon.mailbox_capacity = parse_env("SPW_DAEMON_MAILBOX_CAPACITY", &raw)?;
        }

        if let Some(raw) = lookup("SPW_HEARTBEAT_FILE") {
            self.paths.heartbeat_file = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("SPW_JSONL_LOG") {
            self.paths.jsonl_log = PathBuf::from(raw);
        }
        Ok(())
    }

    /// Strip trailing slashes from mount paths so labels and logs are stable.
    fn normalize_paths(&mut self) {
        for mount in &mut self.mounts {
            let s = mount.path.to_string_lossy();
            if s.len() > 1
                && let Some(stripped) = s.strip_suffix('/')
            {
                mount.path = PathBuf::from(stripped);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.thresholds;
        for (name, val) in [
            ("warning", t.warning),
            ("moderate", t.moderate),
            ("aggressive", t.aggressive),
            ("critical", t.critical),
        ] {
            check_percent(&format!("thresholds.{name}"), val)?;
        }
        if !(t.warning < t.moderate && t.moderate < t.aggressive && t.aggressive < t.critical) {
            return Err(SpwError::InvalidConfig {
                details: "thresholds must strictly ascend: warning < moderate < aggressive < critical"
                    .to_string(),
            });
        }

        for mount in &self.mounts {
            if mount.path.as_os_str().is_empty() {
                return Err(SpwError::InvalidConfig {
                    details: "mounts[].path must not be empty".to_string(),
                });
            }
            if let Some(w) = mount.warning_override {
                check_percent(&format!("mounts[{}].warning", mount.display_name()), w)?;
            }
            if let Some(c) = mount.critical_override {
                check_percent(&format!("mounts[{}].critical", mount.display_name()), c)?;
            }
        }

        if self.daemon.interval_secs == 0 {
            return Err(SpwError::InvalidConfig {
                details: "daemon.interval_secs must be >= 1".to_string(),
            });
        }
        if self.daemon.mailbox_capacity == 0 {
            return Err(SpwError::InvalidConfig {
                details: "daemon.mailbox_capacity must be >= 1".to_string(),
            });
        }

        let name_re = Regex::new(PLUGIN_NAME_PATTERN).map_err(|e| SpwError::Runtime {
            details: format!("plugin name pattern: {e}"),
        })?;
        let mut seen = std::collections::HashSet::new();
        for cmd in &self.plugins.commands {
            if !name_re.is_match(&cmd.name) {
                return Err(SpwError::InvalidConfig {
                    details: format!(
                        "plugins.commands name {:?} must match {PLUGIN_NAME_PATTERN}",
                        cmd.name
                    ),
                });
            }
            if !seen.insert(cmd.name.as_str()) {
                return Err(SpwError::InvalidConfig {
                    details: format!("duplicate plugin name {:?}", cmd.name),
                });
            }
            if cmd.command.first().is_none_or(|program| program.trim().is_empty()) {
                return Err(SpwError::InvalidConfig {
                    details: format!("plugins.commands[{}].command must not be empty", cmd.name),
                });
            }
        }

        Ok(())
    }
}

fn check_percent(name: &str, value: f64) -> Result<()> {
    if !(0.0..=100.0).contains(&value) {
        return Err(SpwError::InvalidConfig {
            details: format!("{name} must be in [0, 100], got {value}"),
        });
    }
    Ok(())
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|error| SpwError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}
