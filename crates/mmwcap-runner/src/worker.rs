//! Worker loop shared by every capture lane.

use std::sync::atomic::{AtomicBool, Ordering};

use mmwcap_frame::{
    FrameAssembler, FrameError, MessageStatus, PacketStatus, TlvSynchronizer,
};
use mmwcap_transport::{ByteSource, DatagramSource};
use serde::Serialize;
use tracing::{error, info, warn};

/// Result of one bounded unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    /// Nothing arrived before the transport timeout.
    Idle,
    /// Input was consumed; `published` is true if a slot was updated.
    Progress { published: bool },
}

/// A reassembler that can be driven one bounded unit at a time.
///
/// Each call to [`Reassembler::process_next_unit`] must return within the
/// transport's receive timeout so that a stop request is noticed promptly.
pub trait Reassembler: Send {
    /// Lane name for diagnostics and thread names.
    fn lane(&self) -> &'static str;

    /// Called once before the worker thread starts.
    fn prepare(&mut self) -> Result<(), FrameError> {
        Ok(())
    }

    fn process_next_unit(&mut self) -> Result<Unit, FrameError>;
}

impl<S: DatagramSource + 'static> Reassembler for FrameAssembler<S> {
    fn lane(&self) -> &'static str {
        "adc"
    }

    fn process_next_unit(&mut self) -> Result<Unit, FrameError> {
        Ok(match self.process_next_packet()? {
            PacketStatus::Timeout => Unit::Idle,
            status => Unit::Progress {
                published: status.frame_completed(),
            },
        })
    }
}

impl<S: ByteSource + 'static> Reassembler for TlvSynchronizer<S> {
    fn lane(&self) -> &'static str {
        "serial"
    }

    /// Drop anything the sensor sent before capture started.
    fn prepare(&mut self) -> Result<(), FrameError> {
        self.clear()
    }

    fn process_next_unit(&mut self) -> Result<Unit, FrameError> {
        Ok(match self.poll_next_message()? {
            MessageStatus::Timeout => Unit::Idle,
            MessageStatus::Published { .. } => Unit::Progress { published: true },
            MessageStatus::Rejected(_) => Unit::Progress { published: false },
        })
    }
}

/// Why a worker loop returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerExit {
    /// The stop flag was observed.
    Stopped,
    /// A fatal transport error ended the loop.
    Failed(String),
}

/// Drive `reassembler` until `stop` is set or a fatal error occurs.
///
/// Transient errors are logged and the loop carries on.
pub fn run_worker(reassembler: &mut dyn Reassembler, stop: &AtomicBool) -> WorkerExit {
    let lane = reassembler.lane();
    info!(lane, "worker started");
    let mut published: u64 = 0;

    let exit = loop {
        if stop.load(Ordering::Acquire) {
            break WorkerExit::Stopped;
        }
        match reassembler.process_next_unit() {
            Ok(Unit::Progress { published: true }) => published += 1,
            Ok(_) => {}
            Err(err) if err.is_fatal() => {
                error!(lane, error = %err, "worker stopping on fatal error");
                break WorkerExit::Failed(err.to_string());
            }
            Err(err) => {
                warn!(lane, error = %err, "transient error");
            }
        }
    };

    info!(lane, published, ?exit, "worker exited");
    exit
}
