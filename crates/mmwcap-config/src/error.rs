use std::path::PathBuf;

use mmwcap_frame::FrameError;

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A configuration file could not be read.
    #[error("failed to load {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// The system config is not valid JSON for the expected structure.
    #[error("invalid system config: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// A sensor profile line could not be parsed.
    #[error("profile line {line}: {message}")]
    Parse { line: usize, message: String },

    /// The sensor profile lacks a command the session depends on.
    #[error("profile has no `{0}` command")]
    MissingCommand(&'static str),

    /// Values parse but cannot be used together.
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// The derived frame geometry is unusable.
    #[error(transparent)]
    Shape(#[from] FrameError),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
