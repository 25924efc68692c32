use std::time::Duration;

use crate::runner::RunnerState;

/// Errors that can occur while running a capture session.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] mmwcap_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] mmwcap_frame::FrameError),

    /// Configuration could not be loaded or validated.
    #[error("config error: {0}")]
    Config(#[from] mmwcap_config::ConfigError),

    /// The capture board answered with a non-zero status.
    #[error("capture board rejected {command} (status {status:#06x})")]
    CommandRejected { command: &'static str, status: u16 },

    /// A command payload does not fit the length field.
    #[error("{command} payload of {len} bytes is too large")]
    CommandTooLarge { command: &'static str, len: usize },

    /// The capture board did not answer in time.
    #[error("{command} timed out after {timeout:?}")]
    CommandTimeout {
        command: &'static str,
        timeout: Duration,
    },

    /// The sensor CLI reported an error for a command.
    #[error("sensor rejected `{command}`: {response}")]
    SensorRejected { command: String, response: String },

    /// Sensor CLI I/O failed.
    #[error("sensor cli I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The operation is not allowed in the runner's current state.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: RunnerState,
    },

    /// The lane set handed to the runner is unusable.
    #[error("invalid lanes: {0}")]
    InvalidLanes(String),

    /// A worker thread could not be started.
    #[error("failed to spawn worker for {lane}: {source}")]
    Spawn {
        lane: &'static str,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, RunnerError>;
