//! Scripted in-memory transports.
//!
//! These stand in for the capture board and the sensor when exercising the
//! pipeline without hardware, and for replaying recorded streams.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;

use crate::error::{Result, TransportError};
use crate::traits::{ByteSource, DatagramSource, Recv};

/// One scripted receive outcome.
#[derive(Debug, Clone)]
pub enum Step {
    Data(Bytes),
    Timeout,
    Closed,
}

/// What a scripted source does once its script is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhenDrained {
    /// Sleep for the given duration and report a timeout, like an idle link.
    Idle(Duration),
    /// Report the link as closed.
    Close,
}

#[derive(Debug)]
struct Script {
    steps: VecDeque<Step>,
    drained: WhenDrained,
}

impl Script {
    fn new(drained: WhenDrained) -> Self {
        Self {
            steps: VecDeque::new(),
            drained,
        }
    }

    fn next_step(&mut self) -> Step {
        match self.steps.pop_front() {
            Some(step) => step,
            None => match self.drained {
                WhenDrained::Idle(delay) => {
                    std::thread::sleep(delay);
                    Step::Timeout
                }
                WhenDrained::Close => Step::Closed,
            },
        }
    }
}

/// A [`DatagramSource`] replaying a fixed list of datagrams.
#[derive(Debug)]
pub struct ScriptedDatagrams {
    script: Script,
}

impl ScriptedDatagrams {
    pub fn new(drained: WhenDrained) -> Self {
        Self {
            script: Script::new(drained),
        }
    }

    pub fn push(&mut self, datagram: impl Into<Bytes>) -> &mut Self {
        self.script.steps.push_back(Step::Data(datagram.into()));
        self
    }

    pub fn push_step(&mut self, step: Step) -> &mut Self {
        self.script.steps.push_back(step);
        self
    }

    /// Number of scripted steps not yet consumed.
    pub fn remaining(&self) -> usize {
        self.script.steps.len()
    }
}

impl DatagramSource for ScriptedDatagrams {
    fn recv_datagram(&mut self, buf: &mut [u8]) -> Result<Recv<usize>> {
        match self.script.next_step() {
            Step::Data(data) => {
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                Ok(Recv::Data(len))
            }
            Step::Timeout => Ok(Recv::Timeout),
            Step::Closed => Err(TransportError::Closed),
        }
    }
}

/// A [`ByteSource`] replaying a byte stream in scripted chunks.
///
/// Chunks larger than the caller's buffer are delivered across several reads.
#[derive(Debug)]
pub struct ScriptedBytes {
    script: Script,
    pending: Bytes,
    discards: usize,
}

impl ScriptedBytes {
    pub fn new(drained: WhenDrained) -> Self {
        Self {
            script: Script::new(drained),
            pending: Bytes::new(),
            discards: 0,
        }
    }

    pub fn push(&mut self, chunk: impl Into<Bytes>) -> &mut Self {
        self.script.steps.push_back(Step::Data(chunk.into()));
        self
    }

    pub fn push_step(&mut self, step: Step) -> &mut Self {
        self.script.steps.push_back(step);
        self
    }

    /// Number of scripted steps not yet consumed.
    pub fn remaining(&self) -> usize {
        self.script.steps.len()
    }

    /// How many times [`ByteSource::discard_pending`] was called.
    pub fn discards(&self) -> usize {
        self.discards
    }
}

impl ByteSource for ScriptedBytes {
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<Recv<usize>> {
        if self.pending.is_empty() {
            match self.script.next_step() {
                Step::Data(data) => self.pending = data,
                Step::Timeout => return Ok(Recv::Timeout),
                Step::Closed => return Err(TransportError::Closed),
            }
        }
        let len = self.pending.len().min(buf.len());
        let chunk = self.pending.split_to(len);
        buf[..len].copy_from_slice(&chunk);
        Ok(Recv::Data(len))
    }

    fn discard_pending(&mut self) -> Result<()> {
        self.pending.clear();
        self.discards += 1;
        Ok(())
    }
}

/// A request/response port: records everything written and answers each
/// written line with the next scripted reply.
///
/// Reads with no reply available fail with [`ErrorKind::TimedOut`], the way
/// a serial port with a read timeout does.
#[derive(Debug, Clone, Default)]
pub struct ScriptedPort {
    inner: Arc<Mutex<PortState>>,
}

#[derive(Debug, Default)]
struct PortState {
    written: Vec<u8>,
    replies: VecDeque<Bytes>,
    readable: VecDeque<u8>,
}

impl ScriptedPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the reply released when the next newline is written.
    pub fn reply(&self, reply: impl Into<Bytes>) -> &Self {
        self.lock().replies.push_back(reply.into());
        self
    }

    /// Everything written so far, lossily decoded as text.
    pub fn written(&self) -> String {
        String::from_utf8_lossy(&self.lock().written).into_owned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PortState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Read for ScriptedPort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut state = self.lock();
        if state.readable.is_empty() {
            return Err(std::io::Error::new(ErrorKind::TimedOut, "no scripted reply"));
        }
        let len = state.readable.len().min(buf.len());
        for (slot, byte) in buf.iter_mut().zip(state.readable.drain(..len)) {
            *slot = byte;
        }
        Ok(len)
    }
}

impl Write for ScriptedPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut state = self.lock();
        state.written.extend_from_slice(buf);
        let newlines = buf.iter().filter(|&&b| b == b'\n').count();
        for _ in 0..newlines {
            if let Some(reply) = state.replies.pop_front() {
                state.readable.extend(reply.iter().copied());
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_datagrams_replay_in_order_then_close() {
        let mut source = ScriptedDatagrams::new(WhenDrained::Close);
        source.push(&b"one"[..]).push_step(Step::Timeout).push(&b"two"[..]);

        let mut buf = [0u8; 8];
        assert_eq!(source.recv_datagram(&mut buf).unwrap(), Recv::Data(3));
        assert_eq!(&buf[..3], b"one");
        assert!(source.recv_datagram(&mut buf).unwrap().is_timeout());
        assert_eq!(source.recv_datagram(&mut buf).unwrap(), Recv::Data(3));
        assert!(matches!(
            source.recv_datagram(&mut buf),
            Err(TransportError::Closed)
        ));
    }

    #[test]
    fn test_scripted_bytes_split_large_chunks() {
        let mut source = ScriptedBytes::new(WhenDrained::Idle(Duration::ZERO));
        source.push(&b"abcdef"[..]);

        let mut buf = [0u8; 4];
        assert_eq!(source.read_bytes(&mut buf).unwrap(), Recv::Data(4));
        assert_eq!(&buf, b"abcd");
        assert_eq!(source.read_bytes(&mut buf).unwrap(), Recv::Data(2));
        assert_eq!(&buf[..2], b"ef");
        assert!(source.read_bytes(&mut buf).unwrap().is_timeout());
    }

    #[test]
    fn test_scripted_port_answers_each_line() {
        let mut port = ScriptedPort::new();
        port.reply(&b"ok\nDone\n"[..]);

        let mut buf = [0u8; 32];
        assert!(port.read(&mut buf).is_err());

        port.write_all(b"sensorStop\n").unwrap();
        let len = port.read(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"ok\nDone\n");
        assert_eq!(port.written(), "sensorStop\n");
    }
}
