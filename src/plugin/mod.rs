//! Cleanup plugin capabilities.
//!
//! A [`Plugin`] is one independent cleanup action. Plugins that know which
//! physical resource they contend on, how long they usually take, or whether
//! they can run at all also implement [`Extension`]. Which of the two a plugin
//! offers is decided once, when it is wrapped in a [`PluginHandle`].

#![allow(missing_docs)]

pub mod command;
pub mod registry;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::cancel::CancelToken;
use crate::core::config::Config;
use crate::logger::sink::LogSink;
use crate::monitor::threshold::SeverityLevel;

/// Catch-all group for plugins with no known contention domain.
pub const DEFAULT_RESOURCE_GROUP: &str = "default";

// ──────────────────── outcome ────────────────────

/// Result of one plugin invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupOutcome {
    pub plugin_name: String,
    pub severity: SeverityLevel,
    pub bytes_freed: u64,
    pub items_cleaned: u64,
    pub error: Option<String>,
}

impl CleanupOutcome {
    /// Zero outcome: nothing freed, no error.
    #[must_use]
    pub fn new(plugin_name: impl Into<String>, severity: SeverityLevel) -> Self {
        Self {
            plugin_name: plugin_name.into(),
            severity,
            bytes_freed: 0,
            items_cleaned: 0,
            error: None,
        }
    }

    #[must_use]
    pub fn failed(
        plugin_name: impl Into<String>,
        severity: SeverityLevel,
        error: impl Into<String>,
    ) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(plugin_name, severity)
        }
    }

    #[must_use]
    pub fn with_freed(mut self, bytes_freed: u64, items_cleaned: u64) -> Self {
        self.bytes_freed = bytes_freed;
        self.items_cleaned = items_cleaned;
        self
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

// ──────────────────── capabilities ────────────────────

/// Basic cleanup capability.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Platform tags this plugin runs on. Empty means every platform.
    fn supported_platforms(&self) -> Vec<String> {
        Vec::new()
    }

    fn enabled(&self, _config: &Config) -> bool {
        true
    }

    /// Free space at `severity`. Failures are reported in the outcome, never raised.
    /// Long-running work must poll `cancel`.
    fn cleanup(
        &self,
        cancel: &CancelToken,
        severity: SeverityLevel,
        config: &Config,
        log: &dyn LogSink,
    ) -> CleanupOutcome;
}

/// Optional scheduling capability.
pub trait Extension: Send + Sync {
    /// Plugins sharing a group never run concurrently.
    fn resource_group(&self) -> String;

    fn estimated_duration(&self) -> Duration;

    /// Cheap feasibility test. `Err` skips the plugin with the given reason.
    fn preflight_check(&self, cancel: &CancelToken, config: &Config) -> Result<(), String>;
}

/// Capability resolved at registration time.
#[derive(Clone)]
pub enum Capability {
    Basic,
    Extended(Arc<dyn Extension>),
}

/// A registered plugin plus its resolved capability.
#[derive(Clone)]
pub struct PluginHandle {
    plugin: Arc<dyn Plugin>,
    capability: Capability,
}

impl PluginHandle {
    #[must_use]
    pub fn basic(plugin: Arc<dyn Plugin>) -> Self {
        Self {
            plugin,
            capability: Capability::Basic,
        }
    }

    #[must_use]
    pub fn extended<P>(plugin: Arc<P>) -> Self
    where
        P: Plugin + Extension + 'static,
    {
        Self {
            plugin: plugin.clone(),
            capability: Capability::Extended(plugin),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.plugin.name()
    }

    #[must_use]
    pub fn plugin(&self) -> &dyn Plugin {
        self.plugin.as_ref()
    }

    #[must_use]
    pub fn capability(&self) -> &Capability {
        &self.capability
    }

    #[must_use]
    pub fn extension(&self) -> Option<&dyn Extension> {
        match &self.capability {
            Capability::Basic => None,
            Capability::Extended(ext) => Some(ext.as_ref()),
        }
    }

    /// Group from the extension, else the static table.
    #[must_use]
    pub fn resource_group(&self) -> String {
        self.extension().map_or_else(
            || default_resource_group(self.name()).to_string(),
            Extension::resource_group,
        )
    }

    #[must_use]
    pub fn estimated_duration(&self) -> Option<Duration> {
        self.extension().map(Extension::estimated_duration)
    }
}

impl std::fmt::Debug for PluginHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginHandle")
            .field("name", &self.name())
            .field(
                "capability",
                &match self.capability {
                    Capability::Basic => "basic",
                    Capability::Extended(_) => "extended",
                },
            )
            .finish()
    }
}

/// Contention domain for well-known plugin names.
#[must_use]
pub fn default_resource_group(plugin_name: &str) -> &'static str {
    match plugin_name {
        "docker" | "docker-prune" | "docker-images" | "docker-volumes" | "docker-buildcache"
        | "podman" | "colima" | "orbstack" | "containerd" | "nerdctl" => "docker",
        "lima" | "multipass" | "utm" | "vagrant" | "parallels" | "virtualbox" | "vm-compact" => "vm",
        "brew" | "homebrew" | "npm" | "yarn" | "pnpm" | "pip" | "cargo" | "go" | "gradle"
        | "maven" | "apt" | "dnf" | "pacman" | "nix" => "package-cache",
        "tmutil" | "timemachine" | "apfs-snapshots" | "btrfs-snapshots" | "zfs-snapshots"
        | "snapper" => "snapshots",
        _ => DEFAULT_RESOURCE_GROUP,
    }
}
