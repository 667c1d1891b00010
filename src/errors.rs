// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Malformed bus event: {0}")]
    Decode(String),

    #[error("Execution backend error: {0}")]
    Backend(String),

    #[error("Host '{0}' does not exist in configuration")]
    HostNotInConfiguration(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, FleetError>;

/// A pre-flight check refused to start the run.
///
/// `code` becomes the process exit code.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("pre-flight check '{check}' failed (code {code}): {message}")]
pub struct PreflightFailure {
    pub check: String,
    pub code: i32,
    pub message: String,
}

impl PreflightFailure {
    pub fn new(check: impl Into<String>, code: i32, message: impl Into<String>) -> Self {
        Self {
            check: check.into(),
            code,
            message: message.into(),
        }
    }
}
