//! SPW-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, SpwError>;

/// Top-level error type for spacewarden.
#[derive(Debug, Error)]
pub enum SpwError {
    #[error("[SPW-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[SPW-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[SPW-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[SPW-1101] unsupported platform: {details}")]
    UnsupportedPlatform { details: String },

    #[error("[SPW-2001] disk sampling failure for {path}: {details}")]
    Sample { path: PathBuf, details: String },

    #[error("[SPW-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[SPW-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[SPW-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[SPW-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl SpwError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "SPW-1001",
            Self::MissingConfig { .. } => "SPW-1002",
            Self::ConfigParse { .. } => "SPW-1003",
            Self::UnsupportedPlatform { .. } => "SPW-1101",
            Self::Sample { .. } => "SPW-2001",
            Self::Serialization { .. } => "SPW-2101",
            Self::Io { .. } => "SPW-3002",
            Self::ChannelClosed { .. } => "SPW-3003",
            Self::Runtime { .. } => "SPW-3900",
        }
    }

    /// Whether retrying on a later tick might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::ChannelClosed { .. } | Self::Sample { .. } | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for SpwError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for SpwError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
