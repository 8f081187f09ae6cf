//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

/// Why settings could not be loaded.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },
    /// The settings file is not valid JSON, or does not fit the schema.
    #[error("invalid settings JSON in {}: {source}", .path.display())]
    Json {
        /// File the JSON came from.
        path: PathBuf,
        /// Parser error, with line and column when available.
        source: serde_json::Error,
    },
    /// Values parsed but violate a cross-field constraint.
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
