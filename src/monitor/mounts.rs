//! Multi-mount severity aggregation.
//!
//! Each configured mount is sampled and classified against the global thresholds
//! (with its own warning/critical overrides); the result is the worst level seen.
//! A mount that fails to sample is logged and skipped. With no mounts configured a
//! single fallback path is sampled instead, and a failure there fails the check.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::errors::Result;
use crate::logger::sink::{LogRecord, LogSink};
use crate::monitor::threshold::{SeverityLevel, Thresholds, classify};
use crate::platform::pal::{DiskSampler, UsageSample};

/// A monitored mount point. Only warning/critical may be overridden per mount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MountSpec {
    pub path: PathBuf,
    #[serde(default)]
    pub label: String,
    #[serde(default, rename = "warning", skip_serializing_if = "Option::is_none")]
    pub warning_override: Option<f64>,
    #[serde(default, rename = "critical", skip_serializing_if = "Option::is_none")]
    pub critical_override: Option<f64>,
}

impl MountSpec {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, label: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            label: label.into(),
            warning_override: None,
            critical_override: None,
        }
    }

    /// Display name: the label, or the path when no label is set.
    #[must_use]
    pub fn display_name(&self) -> String {
        if self.label.is_empty() {
            self.path.display().to_string()
        } else {
            self.label.clone()
        }
    }

    /// Global thresholds with this mount's overrides applied.
    #[must_use]
    pub fn effective_thresholds(&self, global: &Thresholds) -> Thresholds {
        global.with_overrides(self.warning_override, self.critical_override)
    }
}

/// Classification of one sampled mount.
#[derive(Debug, Clone, PartialEq)]
pub struct MountReading {
    pub mount: MountSpec,
    pub sample: UsageSample,
    pub level: SeverityLevel,
}

/// Outcome of one aggregation pass.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MountReport {
    /// Maximum level across every reachable mount.
    pub level: SeverityLevel,
    pub readings: Vec<MountReading>,
    /// Mounts that could not be sampled this pass.
    pub failed: Vec<PathBuf>,
}

/// Applies the threshold classifier across the configured mounts.
pub struct MountAggregator {
    sampler: Arc<dyn DiskSampler>,
    mounts: Vec<MountSpec>,
    thresholds: Thresholds,
    fallback_path: PathBuf,
    log: Arc<dyn LogSink>,
}

impl MountAggregator {
    #[must_use]
    pub fn new(
        sampler: Arc<dyn DiskSampler>,
        mounts: Vec<MountSpec>,
        thresholds: Thresholds,
        fallback_path: PathBuf,
        log: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            sampler,
            mounts,
            thresholds,
            fallback_path,
            log,
        }
    }

    #[must_use]
    pub fn mounts(&self) -> &[MountSpec] {
        &self.mounts
    }

    /// Sample every mount and reduce to the maximum severity.
    pub fn check(&self) -> Result<MountReport> {
        if self.mounts.is_empty() {
            return self.check_fallback();
        }

        let mut report = MountReport::default();
        for mount in &self.mounts {
            match self.sampler.sample(&mount.path) {
                Ok(sample) => {
                    let level =
                        classify(sample.used_percent, &mount.effective_thresholds(&self.thresholds));
                    report.level = report.level.max(level);
                    report.readings.push(MountReading {
                        mount: mount.clone(),
                        sample,
                        level,
                    });
                }
                Err(err) => {
                    self.log.log(
                        LogRecord::warn("mount sample failed, skipping")
                            .field("mount", mount.display_name())
                            .field("path", mount.path.display().to_string())
                            .field("error_code", err.code())
                            .field("error", err.to_string()),
                    );
                    report.failed.push(mount.path.clone());
                }
            }
        }
        Ok(report)
    }

    /// Convenience: only the aggregated level.
    pub fn severity(&self) -> Result<SeverityLevel> {
        self.check().map(|report| report.level)
    }

    fn check_fallback(&self) -> Result<MountReport> {
        let sample = self.sampler.sample(&self.fallback_path)?;
        let level = classify(sample.used_percent, &self.thresholds);
        Ok(MountReport {
            level,
            readings: vec![MountReading {
                mount: MountSpec::new(self.fallback_path.clone(), "default"),
                sample,
                level,
            }],
            failed: Vec::new(),
        })
    }
}
