//! Error types for config loading and validation.

use std::path::PathBuf;
use thiserror::Error;

/// Errors returned while loading or validating config.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading a config file failed.
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Parsing JSON5 contents failed.
    #[error("failed to parse {label}: {source}")]
    Parse {
        label: String,
        #[source]
        source: json5::Error,
    },
    /// Converting the merged JSON value into the typed config failed.
    #[error("failed to decode config: {0}")]
    Decode(#[from] serde_json::Error),
    /// A specific field failed schema validation.
    #[error("invalid config at {path}: {message}")]
    InvalidField { path: String, message: String },
    /// A semantic rule was violated after decoding.
    #[error("invalid config: {0}")]
    Invalid(String),
}
