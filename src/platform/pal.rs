//! Platform abstraction: disk usage sampling and the platform tag used for
//! plugin filtering.

#![allow(missing_docs)]
#![allow(clippy::cast_precision_loss)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, SpwError};

const BYTES_PER_GB: f64 = 1_073_741_824.0;

/// Point-in-time usage of the filesystem containing `path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSample {
    pub path: PathBuf,
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
    pub used_percent: f64,
    pub free_gb: f64,
}

impl UsageSample {
    /// Derive a sample from raw totals. `free_bytes` is space available to
    /// unprivileged writers; anything else counts as used.
    #[must_use]
    pub fn from_totals(path: impl Into<PathBuf>, total_bytes: u64, free_bytes: u64) -> Self {
        let free_bytes = free_bytes.min(total_bytes);
        let used_bytes = total_bytes - free_bytes;
        let used_percent = if total_bytes == 0 {
            0.0
        } else {
            (used_bytes as f64 * 100.0) / total_bytes as f64
        };
        Self {
            path: path.into(),
            total_bytes,
            used_bytes,
            free_bytes,
            used_percent,
            free_gb: free_bytes as f64 / BYTES_PER_GB,
        }
    }
}

/// Reads raw usage for a filesystem path.
pub trait DiskSampler: Send + Sync {
    fn sample(&self, path: &Path) -> Result<UsageSample>;
}

/// Platform tag in `std::env::consts::OS` form (`linux`, `macos`, `windows`, ...).
///
/// Registries receive this as a value so tests can simulate other platforms.
#[must_use]
pub fn current_platform() -> &'static str {
    std::env::consts::OS
}

/// `statvfs`-backed sampler.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatvfsSampler;

#[cfg(unix)]
impl DiskSampler for StatvfsSampler {
    fn sample(&self, path: &Path) -> Result<UsageSample> {
        let stat = nix::sys::statvfs::statvfs(path).map_err(|error| SpwError::Sample {
            path: path.to_path_buf(),
            details: error.to_string(),
        })?;
        #[allow(clippy::useless_conversion)]
        let fragment = u64::from(stat.fragment_size());
        #[allow(clippy::useless_conversion)]
        let total = u64::from(stat.blocks()).saturating_mul(fragment);
        #[allow(clippy::useless_conversion)]
        let available = u64::from(stat.blocks_available()).saturating_mul(fragment);
        Ok(UsageSample::from_totals(path, total, available))
    }
}

#[cfg(not(unix))]
impl DiskSampler for StatvfsSampler {
    fn sample(&self, path: &Path) -> Result<UsageSample> {
        Err(SpwError::UnsupportedPlatform {
            details: format!(
                "no disk sampler for {} (path {})",
                current_platform(),
                path.display()
            ),
        })
    }
}

/// Sampler for the running platform.
pub fn detect_sampler() -> Result<Arc<dyn DiskSampler>> {
    if cfg!(unix) {
        Ok(Arc::new(StatvfsSampler))
    } else {
        Err(SpwError::UnsupportedPlatform {
            details: current_platform().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_totals_derives_percentages() {
        let sample = UsageSample::from_totals("/data", 1_000, 250);
        assert_eq!(sample.used_bytes, 750);
        assert!((sample.used_percent - 75.0).abs() < 1e-9);
    }

    #[test]
    fn zero_total_is_zero_percent() {
        let sample = UsageSample::from_totals("/empty", 0, 0);
        assert!(sample.used_percent.abs() < f64::EPSILON);
        assert_eq!(sample.used_bytes, 0);
    }

    #[test]
    fn free_is_clamped_to_total() {
        let sample = UsageSample::from_totals("/weird", 100, 500);
        assert_eq!(sample.free_bytes, 100);
        assert_eq!(sample.used_bytes, 0);
    }

    #[test]
    fn free_gb_uses_binary_gigabytes() {
        let sample = UsageSample::from_totals("/", 4 * 1_073_741_824, 1_073_741_824);
        assert!((sample.free_gb - 1.0).abs() < 1e-9);
    }

    #[cfg(unix)]
    #[test]
    fn statvfs_samples_temp_dir() {
        let dir = tempfile::tempdir().unwrap();
        let sample = StatvfsSampler.sample(dir.path()).unwrap();
        assert!(sample.total_bytes > 0);
        assert!((0.0..=100.0).contains(&sample.used_percent));
    }

    #[cfg(unix)]
    #[test]
    fn statvfs_missing_path_is_sample_error() {
        let err = StatvfsSampler
            .sample(Path::new("/definitely/not/here/spw"))
            .unwrap_err();
        assert_eq!(err.code(), "SPW-2001");
    }

    #[test]
    fn platform_tag_is_nonempty() {
        assert!(!current_platform().is_empty());
    }
}
