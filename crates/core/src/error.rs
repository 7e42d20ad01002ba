//! Error types shared across the engine.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for engine-level failures.
#[derive(Error, Debug)]
pub enum Error {
    /// Window creation or management errors
    #[error("Window error: {0}")]
    Window(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration file could not be parsed
    #[error("Failed to parse config '{path}': {source}")]
    ConfigParse {
        /// Path of the offending file.
        path: PathBuf,
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },

    /// A configuration value is out of range
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using the engine's Error type.
pub type Result<T> = std::result::Result<T, Error>;
