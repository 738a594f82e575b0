//! Plugin registry: registration order is execution order.

#![allow(missing_docs)]

use std::sync::Arc;

use crate::core::config::Config;
use crate::core::errors::{Result, SpwError};
use crate::platform::pal::{DiskSampler, current_platform};
use crate::plugin::command::CommandPlugin;
use crate::plugin::{Extension, Plugin, PluginHandle};

/// Ordered set of plugins for one platform.
pub struct Registry {
    platform: String,
    entries: Vec<PluginHandle>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(current_platform())
    }
}

impl Registry {
    /// Empty registry filtering for `platform`.
    #[must_use]
    pub fn new(platform: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            entries: Vec::new(),
        }
    }

    /// Registry pre-loaded with every `[[plugins.commands]]` entry.
    pub fn from_config(
        config: &Config,
        platform: impl Into<String>,
        sampler: Arc<dyn DiskSampler>,
    ) -> Result<Self> {
        let mut registry = Self::new(platform);
        for spec in &config.plugins.commands {
            let plugin = CommandPlugin::new(spec.clone(), Arc::clone(&sampler));
            registry.register_extended(Arc::new(plugin))?;
        }
        Ok(registry)
    }

    #[must_use]
    pub fn platform(&self) -> &str {
        &self.platform
    }

    /// Register a plugin without scheduling metadata.
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) -> Result<()> {
        self.register_handle(PluginHandle::basic(plugin))
    }

    /// Register a plugin together with its [`Extension`].
    pub fn register_extended<P>(&mut self, plugin: Arc<P>) -> Result<()>
    where
        P: Plugin + Extension + 'static,
    {
        self.register_handle(PluginHandle::extended(plugin))
    }

    pub fn register_handle(&mut self, handle: PluginHandle) -> Result<()> {
        if self.entries.iter().any(|h| h.name() == handle.name()) {
            return Err(SpwError::InvalidConfig {
                details: format!("plugin {:?} registered twice", handle.name()),
            });
        }
        self.entries.push(handle);
        Ok(())
    }

    /// Every registered plugin, enabled or not.
    #[must_use]
    pub fn all(&self) -> &[PluginHandle] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Plugins runnable here, in registration order.
    #[must_use]
    pub fn get_enabled(&self, config: &Config) -> Vec<PluginHandle> {
        self.entries
            .iter()
            .filter(|h| self.supports_platform(h))
            .filter(|h| !config.plugins.is_disabled(h.name()))
            .filter(|h| h.plugin().enabled(config))
            .cloned()
            .collect()
    }

    fn supports_platform(&self, handle: &PluginHandle) -> bool {
        let platforms = handle.plugin().supported_platforms();
        platforms.is_empty() || platforms.iter().any(|p| p == &self.platform)
    }
}
