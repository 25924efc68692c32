use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::{ByteSource, Recv};

/// An open serial port (8N1, no flow control) with a bounded read timeout.
pub struct SerialLink {
    port: Box<dyn SerialPort>,
    path: String,
}

impl SerialLink {
    /// Open `path` at `baud_rate`; reads wait at most `timeout`.
    pub fn open(path: &str, baud_rate: u32, timeout: Duration) -> Result<Self> {
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(timeout)
            .open()
            .map_err(|e| TransportError::Open {
                path: path.to_string(),
                source: e,
            })?;

        info!(path, baud_rate, ?timeout, "opened serial port");

        Ok(Self {
            port,
            path: path.to_string(),
        })
    }

    /// Drop bytes the driver has received but nobody has read yet.
    pub fn clear_input(&self) -> Result<()> {
        self.port.clear(ClearBuffer::Input)?;
        debug!(path = %self.path, "cleared serial input buffer");
        Ok(())
    }

    pub fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.port.set_timeout(timeout)?;
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        self.port.timeout()
    }

    /// Open a second handle to the same port (e.g. one for writing commands).
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            port: self.port.try_clone()?,
            path: self.path.clone(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        "serial"
    }
}

impl Read for SerialLink {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialLink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.port.flush()
    }
}

impl ByteSource for SerialLink {
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<Recv<usize>> {
        match self.port.read(buf) {
            Ok(0) => Ok(Recv::Timeout),
            Ok(n) => Ok(Recv::Data(n)),
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                Ok(Recv::Timeout)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn discard_pending(&mut self) -> Result<()> {
        self.clear_input()
    }
}

impl std::fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLink")
            .field("path", &self.path)
            .finish()
    }
}
