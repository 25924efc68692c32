//! Acquisition runner for radar capture.
//!
//! Owns the capture session lifecycle: configures the capture board and the
//! sensor, runs one worker thread per enabled transport, and hands the
//! latest completed frames to consumers through a timeout-bounded pull API.

pub mod capture_board;
pub mod controller;
pub mod error;
pub mod hardware;
pub mod runner;
pub mod sensor_cli;
pub mod worker;

pub use capture_board::{CaptureBoard, CommandCode, FpgaVersion, PacketConfig};
pub use controller::Controller;
pub use error::{Result, RunnerError};
pub use hardware::{open_capture_board, open_session, Session};
pub use runner::{Lane, LaneStats, LaneStatus, Runner, RunnerState, RunnerStatus};
pub use sensor_cli::{CliOutcome, CliReply, SensorCli};
pub use worker::{Reassembler, Unit, WorkerExit};
