//! Severity levels and the threshold classifier.

#![allow(missing_docs)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::errors::SpwError;

/// Graduated cleanup urgency. Ordering is total: `None < Warning < … < Critical`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SeverityLevel {
    #[default]
    None,
    Warning,
    Moderate,
    Aggressive,
    Critical,
}

impl SeverityLevel {
    /// All levels in ascending order.
    pub const ALL: [Self; 5] = [
        Self::None,
        Self::Warning,
        Self::Moderate,
        Self::Aggressive,
        Self::Critical,
    ];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Warning => "warning",
            Self::Moderate => "moderate",
            Self::Aggressive => "aggressive",
            Self::Critical => "critical",
        }
    }

    /// Whether this level warrants running a cleanup cycle.
    #[must_use]
    pub fn requires_action(self) -> bool {
        self > Self::None
    }
}

impl fmt::Display for SeverityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for SeverityLevel {
    type Err = SpwError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let wanted = raw.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|level| level.label() == wanted)
            .ok_or_else(|| SpwError::ConfigParse {
                context: "severity",
                details: format!("unknown severity level {raw:?}"),
            })
    }
}

/// Used-percent thresholds. Expected to satisfy
/// `warning < moderate < aggressive < critical`; config validation enforces it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub warning: f64,
    pub moderate: f64,
    pub aggressive: f64,
    pub critical: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            warning: 80.0,
            moderate: 85.0,
            aggressive: 90.0,
            critical: 95.0,
        }
    }
}

impl Thresholds {
    /// Copy with the warning/critical thresholds replaced where an override is set.
    #[must_use]
    pub fn with_overrides(self, warning: Option<f64>, critical: Option<f64>) -> Self {
        Self {
            warning: warning.unwrap_or(self.warning),
            critical: critical.unwrap_or(self.critical),
            ..self
        }
    }
}

/// Highest level whose threshold is `<= used_percent`.
///
/// A value exactly on a threshold belongs to the level it triggers.
#[must_use]
pub fn classify(used_percent: f64, thresholds: &Thresholds) -> SeverityLevel {
    if used_percent >= thresholds.critical {
        SeverityLevel::Critical
    } else if used_percent >= thresholds.aggressive {
        SeverityLevel::Aggressive
    } else if used_percent >= thresholds.moderate {
        SeverityLevel::Moderate
    } else if used_percent >= thresholds.warning {
        SeverityLevel::Warning
    } else {
        SeverityLevel::None
    }
}
