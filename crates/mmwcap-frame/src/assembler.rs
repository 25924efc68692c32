use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use mmwcap_transport::{DatagramSource, Recv};
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::codec::decode_datagram;
use crate::cube::{decode_cube, CubeShape, SampleCube, SampleLayout};
use crate::error::{FrameError, Result};
use crate::slot::LatestSlot;

/// Largest possible UDP payload.
const MAX_DATAGRAM_SIZE: usize = 65_536;

/// A fixed-capacity buffer collecting one raw frame.
///
/// The write cursor never passes `capacity`; writes stop at the boundary and
/// report how much they consumed, so callers complete the frame and continue.
#[derive(Debug)]
pub struct FrameAccumulator {
    buf: Vec<u8>,
    capacity: usize,
    padded: usize,
}

impl FrameAccumulator {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
            padded: 0,
        }
    }

    /// Bytes written so far into the current frame.
    pub fn cursor(&self) -> usize {
        self.buf.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes left before the frame is full.
    pub fn remaining(&self) -> usize {
        self.capacity - self.buf.len()
    }

    pub fn is_full(&self) -> bool {
        self.buf.len() == self.capacity
    }

    /// Zero bytes written into the current frame.
    pub fn padded(&self) -> usize {
        self.padded
    }

    /// Copy as much of `data` as fits, returning the count consumed.
    pub fn extend(&mut self, data: &[u8]) -> usize {
        let take = data.len().min(self.remaining());
        self.buf.extend_from_slice(&data[..take]);
        take
    }

    /// Write up to `len` zero bytes, returning the count written.
    pub fn fill_zeros(&mut self, len: u64) -> usize {
        let take = usize::try_from(len).map_or(self.remaining(), |len| len.min(self.remaining()));
        self.buf.resize(self.buf.len() + take, 0);
        self.padded += take;
        take
    }

    /// Hand out the full frame and its padded byte count, resetting the cursor.
    fn take_frame(&mut self) -> (Vec<u8>, usize) {
        let frame = std::mem::replace(&mut self.buf, Vec::with_capacity(self.capacity));
        let padded = std::mem::take(&mut self.padded);
        (frame, padded)
    }
}

/// Why a datagram was not applied to the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Shorter than the datagram header.
    TooShort,
    /// Its byte count is behind data already assembled (duplicate or reordered).
    Stale,
}

/// Outcome of processing one datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketStatus {
    /// The link's receive timeout elapsed; no state changed.
    Timeout,
    /// The datagram was applied, completing this many frames.
    Accepted { frames_completed: usize },
    /// The datagram was ignored.
    Discarded(DiscardReason),
}

impl PacketStatus {
    pub fn frame_completed(&self) -> bool {
        matches!(self, Self::Accepted { frames_completed } if *frames_completed > 0)
    }
}

/// Live assembler counters, shared with status readers.
///
/// Each counter only increases; readers may see them mid-update relative to
/// one another, which is fine for status display.
#[derive(Debug, Default)]
pub struct AssemblerCounters {
    packets_received: AtomicU64,
    frames_completed: AtomicU64,
    frames_skipped: AtomicU64,
    dropped_packets: AtomicU64,
    drop_events: AtomicU64,
    padded_bytes: AtomicU64,
    stale_packets: AtomicU64,
    malformed_packets: AtomicU64,
}

impl AssemblerCounters {
    pub fn snapshot(&self) -> AssemblerStats {
        AssemblerStats {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            frames_completed: self.frames_completed.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            dropped_packets: self.dropped_packets.load(Ordering::Relaxed),
            drop_events: self.drop_events.load(Ordering::Relaxed),
            padded_bytes: self.padded_bytes.load(Ordering::Relaxed),
            stale_packets: self.stale_packets.load(Ordering::Relaxed),
            malformed_packets: self.malformed_packets.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

/// Point-in-time copy of [`AssemblerCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AssemblerStats {
    /// Datagrams received, including discarded ones.
    pub packets_received: u64,
    /// Frames decoded and published.
    pub frames_completed: u64,
    /// Frames lost entirely inside a gap and never published.
    pub frames_skipped: u64,
    /// Datagrams missing according to the sequence numbers.
    pub dropped_packets: u64,
    /// Distinct gaps detected.
    pub drop_events: u64,
    /// Zero bytes substituted for missing data.
    pub padded_bytes: u64,
    /// Datagrams behind the assembled stream.
    pub stale_packets: u64,
    /// Datagrams too short to carry a header.
    pub malformed_packets: u64,
}

/// Reassembles capture-board datagrams into sample cubes.
///
/// Stream byte `N` always lands at offset `N % bytes_per_frame` of frame
/// `N / bytes_per_frame`: gaps are zero-padded by exactly the missing byte
/// count, rolling across frame boundaries. Frames that would be all padding
/// are counted as skipped and not published.
pub struct FrameAssembler<S> {
    source: S,
    recv_buf: Vec<u8>,
    shape: CubeShape,
    layout: SampleLayout,
    accumulator: FrameAccumulator,
    last_sequence: u32,
    byte_count: u64,
    frame_index: u64,
    slot: Arc<LatestSlot<SampleCube>>,
    counters: Arc<AssemblerCounters>,
}

impl<S: DatagramSource> FrameAssembler<S> {
    /// Create an assembler publishing into `slot`.
    ///
    /// Fails if whole lane groups of `layout` do not tile a frame of `shape`.
    pub fn new(
        source: S,
        shape: CubeShape,
        layout: SampleLayout,
        slot: Arc<LatestSlot<SampleCube>>,
    ) -> Result<Self> {
        layout.check_shape(shape)?;
        Ok(Self {
            source,
            recv_buf: vec![0u8; MAX_DATAGRAM_SIZE],
            shape,
            layout,
            accumulator: FrameAccumulator::new(shape.bytes_per_frame()),
            last_sequence: 0,
            byte_count: 0,
            frame_index: 0,
            slot,
            counters: Arc::new(AssemblerCounters::default()),
        })
    }

    /// Receive and apply one datagram.
    ///
    /// A timeout or transport error leaves the assembler untouched.
    pub fn process_next_packet(&mut self) -> Result<PacketStatus> {
        let len = match self.source.recv_datagram(&mut self.recv_buf)? {
            Recv::Data(len) => len,
            Recv::Timeout => return Ok(PacketStatus::Timeout),
        };
        let datagram = std::mem::take(&mut self.recv_buf);
        let status = self.process_datagram(&datagram[..len]);
        self.recv_buf = datagram;
        status
    }

    /// Apply one datagram that was received elsewhere.
    pub fn process_datagram(&mut self, datagram: &[u8]) -> Result<PacketStatus> {
        AssemblerCounters::bump(&self.counters.packets_received, 1);

        let (header, payload) = match decode_datagram(datagram) {
            Ok(decoded) => decoded,
            Err(FrameError::DatagramTooShort { len, .. }) => {
                AssemblerCounters::bump(&self.counters.malformed_packets, 1);
                warn!(len, "discarding truncated datagram");
                return Ok(PacketStatus::Discarded(DiscardReason::TooShort));
            }
            Err(err) => return Err(err),
        };

        if header.byte_count < self.byte_count {
            AssemblerCounters::bump(&self.counters.stale_packets, 1);
            debug!(
                sequence = header.sequence,
                byte_count = header.byte_count,
                assembled = self.byte_count,
                "discarding stale datagram"
            );
            return Ok(PacketStatus::Discarded(DiscardReason::Stale));
        }

        let expected = self.last_sequence.wrapping_add(1);
        let missing_packets = header.sequence.wrapping_sub(expected);
        // A sequence far "behind" is a counter reset, not a loss.
        let sequence_gap = header.sequence != expected && missing_packets < u32::MAX / 2;
        self.last_sequence = header.sequence;

        let gap_bytes = header.byte_count - self.byte_count;
        let mut frames_completed = 0;

        if sequence_gap || gap_bytes > 0 {
            AssemblerCounters::bump(&self.counters.drop_events, 1);
            let missing_packets = if sequence_gap { missing_packets } else { 0 };
            AssemblerCounters::bump(&self.counters.dropped_packets, u64::from(missing_packets));
            warn!(
                sequence = header.sequence,
                expected,
                missing_packets,
                gap_bytes,
                "datagram loss detected"
            );
            frames_completed += self.pad(gap_bytes)?;
        }

        frames_completed += self.append(payload)?;
        trace!(
            sequence = header.sequence,
            len = payload.len(),
            cursor = self.accumulator.cursor(),
            "applied datagram"
        );

        Ok(PacketStatus::Accepted { frames_completed })
    }

    /// Zero-fill `len` missing stream bytes.
    fn pad(&mut self, len: u64) -> Result<usize> {
        let frame_bytes = self.shape.bytes_per_frame() as u64;
        let mut remaining = len;
        let mut completed = 0;
        self.byte_count += len;
        AssemblerCounters::bump(&self.counters.padded_bytes, len);

        while remaining > 0 {
            if self.accumulator.cursor() == 0 && remaining >= frame_bytes {
                let whole = remaining / frame_bytes;
                self.frame_index += whole;
                remaining -= whole * frame_bytes;
                AssemblerCounters::bump(&self.counters.frames_skipped, whole);
                warn!(frames = whole, "skipping frames lost entirely in gap");
                continue;
            }
            let written = self.accumulator.fill_zeros(remaining);
            remaining -= written as u64;
            if self.accumulator.is_full() {
                self.complete_frame()?;
                completed += 1;
            }
        }

        Ok(completed)
    }

    /// Copy real payload bytes into the stream.
    fn append(&mut self, mut payload: &[u8]) -> Result<usize> {
        self.byte_count += payload.len() as u64;
        let mut completed = 0;
        while !payload.is_empty() {
            let written = self.accumulator.extend(payload);
            payload = &payload[written..];
            if self.accumulator.is_full() {
                self.complete_frame()?;
                completed += 1;
            }
        }
        Ok(completed)
    }

    fn complete_frame(&mut self) -> Result<()> {
        let (raw, padded) = self.accumulator.take_frame();
        let cube = decode_cube(&raw, self.shape, self.layout)?.with_metadata(self.frame_index, padded);
        if padded > 0 {
            debug!(frame = self.frame_index, padded, "completed frame with padding");
        } else {
            trace!(frame = self.frame_index, "completed frame");
        }
        self.frame_index += 1;
        // Counted before publishing so a woken consumer never sees stale stats.
        AssemblerCounters::bump(&self.counters.frames_completed, 1);
        self.slot.publish(cube);
        Ok(())
    }

    /// Stream bytes accounted for so far, real or padded.
    pub fn byte_count(&self) -> u64 {
        self.byte_count
    }

    /// Write position inside the current frame.
    pub fn cursor(&self) -> usize {
        self.accumulator.cursor()
    }

    pub fn shape(&self) -> CubeShape {
        self.shape
    }

    pub fn layout(&self) -> SampleLayout {
        self.layout
    }

    pub fn slot(&self) -> Arc<LatestSlot<SampleCube>> {
        Arc::clone(&self.slot)
    }

    pub fn counters(&self) -> Arc<AssemblerCounters> {
        Arc::clone(&self.counters)
    }

    pub fn stats(&self) -> AssemblerStats {
        self.counters.snapshot()
    }

    /// Borrow the underlying datagram source.
    pub fn get_ref(&self) -> &S {
        &self.source
    }

    /// Mutably borrow the underlying datagram source.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.source
    }
}

impl<S> std::fmt::Debug for FrameAssembler<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameAssembler")
            .field("shape", &self.shape)
            .field("layout", &self.layout)
            .field("byte_count", &self.byte_count)
            .field("cursor", &self.accumulator.cursor())
            .field("frame_index", &self.frame_index)
            .finish()
    }
}
