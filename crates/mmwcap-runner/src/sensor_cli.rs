//! Line-oriented command port of the radar sensor.

use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::controller::Controller;
use crate::error::{Result, RunnerError};

pub const SENSOR_START: &str = "sensorStart";
pub const SENSOR_STOP: &str = "sensorStop";

const DONE_MARKER: &str = "Done";
const ERROR_MARKER: &str = "Error";

/// How the sensor answered a command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliOutcome {
    Done,
    Error,
    /// Neither marker arrived before the response timeout.
    Timeout,
}

/// Text received in answer to one command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliReply {
    pub text: String,
    pub outcome: CliOutcome,
}

/// Sends configuration and start/stop lines to the sensor.
///
/// The sensor echoes each line and ends its answer with `Done` or an
/// `Error` message. Slow answers are tolerated: a reply that times out is
/// logged and the session carries on.
#[derive(Debug)]
pub struct SensorCli<P> {
    port: P,
    response_timeout: Duration,
}

impl<P: Read + Write + Send> SensorCli<P> {
    pub fn new(port: P, response_timeout: Duration) -> Self {
        Self {
            port,
            response_timeout,
        }
    }

    /// Send one command line and collect the reply.
    pub fn send_command(&mut self, line: &str) -> Result<CliReply> {
        let line = line.trim_end();
        self.port.write_all(line.as_bytes())?;
        self.port.write_all(b"\n")?;
        self.port.flush()?;
        debug!(command = line, "sent sensor command");

        let deadline = Instant::now() + self.response_timeout;
        let mut received = Vec::new();
        let mut chunk = [0u8; 256];
        let outcome = loop {
            let text = String::from_utf8_lossy(&received);
            if text.contains(DONE_MARKER) {
                break CliOutcome::Done;
            }
            if text.contains(ERROR_MARKER) {
                break CliOutcome::Error;
            }
            if Instant::now() >= deadline {
                break CliOutcome::Timeout;
            }
            match self.port.read(&mut chunk) {
                Ok(0) => continue,
                Ok(n) => received.extend_from_slice(&chunk[..n]),
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) =>
                {
                    continue
                }
                Err(e) => return Err(e.into()),
            }
        };

        let text = String::from_utf8_lossy(&received).trim().to_string();
        match outcome {
            CliOutcome::Done => debug!(command = line, response = %text, "sensor acknowledged"),
            CliOutcome::Error => warn!(command = line, response = %text, "sensor reported error"),
            CliOutcome::Timeout => warn!(
                command = line,
                response = %text,
                timeout = ?self.response_timeout,
                "no complete sensor response; continuing"
            ),
        }
        Ok(CliReply { text, outcome })
    }

    /// Send a command and fail if the sensor reports an error.
    pub fn send_checked(&mut self, line: &str) -> Result<CliReply> {
        let reply = self.send_command(line)?;
        if reply.outcome == CliOutcome::Error {
            return Err(RunnerError::SensorRejected {
                command: line.trim_end().to_string(),
                response: reply.text,
            });
        }
        Ok(reply)
    }

    /// Send every profile line in order.
    ///
    /// `sensorStart` is expected to be absent; the sensor is started by
    /// [`SensorCli::start_sensor`] once the capture path is ready.
    pub fn send_profile<S: AsRef<str>>(&mut self, lines: &[S]) -> Result<()> {
        for line in lines {
            self.send_checked(line.as_ref())?;
        }
        info!(commands = lines.len(), "sensor profile sent");
        Ok(())
    }

    pub fn start_sensor(&mut self) -> Result<()> {
        self.send_checked(SENSOR_START).map(|_| ())
    }

    pub fn stop_sensor(&mut self) -> Result<()> {
        self.send_checked(SENSOR_STOP).map(|_| ())
    }

    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }

    pub fn get_ref(&self) -> &P {
        &self.port
    }

    pub fn into_inner(self) -> P {
        self.port
    }
}

impl<P: Read + Write + Send> Controller for SensorCli<P> {
    fn name(&self) -> &str {
        "sensor-cli"
    }

    fn arm(&mut self) -> Result<()> {
        self.start_sensor()?;
        info!("sensor started");
        Ok(())
    }

    fn disarm(&mut self) -> Result<()> {
        self.stop_sensor()?;
        info!("sensor stopped");
        Ok(())
    }
}
