//! Error types for plan loading and execution

use std::path::PathBuf;

use sensorcheck_core::ConfigError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlanError {
    #[error("Failed to read plan {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid verification: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid plan: {0}")]
    Invalid(String),
}

/// Result type for plan operations
pub type Result<T> = std::result::Result<T, PlanError>;
