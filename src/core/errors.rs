//! DCH-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, ChurnError>;

/// Top-level error type for disk_churn.
#[derive(Debug, Error)]
pub enum ChurnError {
    #[error("[DCH-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[DCH-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[DCH-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[DCH-1101] unsupported platform: {details}")]
    UnsupportedPlatform { details: String },

    #[error("[DCH-2001] capacity probe failure for {path}: {details}")]
    CapacityProbe { path: PathBuf, details: String },

    #[error("[DCH-2002] mount table parse failure: {details}")]
    MountParse { details: String },

    #[error("[DCH-2003] slot {index} out of range for pool of {capacity}")]
    SlotOutOfRange { index: usize, capacity: usize },

    #[error("[DCH-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[DCH-2201] protocol error: {details}")]
    Protocol { details: String },

    #[error("[DCH-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[DCH-3101] failed to bind {address}: {details}")]
    Bind { address: String, details: String },

    #[error("[DCH-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl ChurnError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "DCH-1001",
            Self::MissingConfig { .. } => "DCH-1002",
            Self::ConfigParse { .. } => "DCH-1003",
            Self::UnsupportedPlatform { .. } => "DCH-1101",
            Self::CapacityProbe { .. } => "DCH-2001",
            Self::MountParse { .. } => "DCH-2002",
            Self::SlotOutOfRange { .. } => "DCH-2003",
            Self::Serialization { .. } => "DCH-2101",
            Self::Protocol { .. } => "DCH-2201",
            Self::Io { .. } => "DCH-3002",
            Self::Bind { .. } => "DCH-3101",
            Self::Runtime { .. } => "DCH-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::CapacityProbe { .. } | Self::Runtime { .. }
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

impl From<serde_json::Error> for ChurnError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for ChurnError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
