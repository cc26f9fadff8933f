use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while building, validating, or persisting a [`crate::Plan`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The plan failed cross-field validation.
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// An environment variable failed to parse as the target field's type.
    #[error("failed to parse env {key}={value:?}: {reason}")]
    EnvParse {
        key: String,
        value: String,
        reason: String,
    },

    /// A directory that must be writable is not.
    #[error("directory {0:?} is not writable")]
    DirNotWritable(PathBuf),

    /// File read/write failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML decode failure.
    #[error("YAML decode error: {0}")]
    Decode(#[from] serde_yaml::Error),
}

impl ConfigError {
    /// Shorthand for a validation failure.
    pub fn invalid(msg: impl Into<String>) -> Self {
        ConfigError::Invalid(msg.into())
    }
}
