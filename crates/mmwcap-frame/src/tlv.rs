use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Buf;
use mmwcap_transport::ByteSource;
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::error::{FrameError, Result};
use crate::reader::{MessageReader, MAGIC_WORD};
use crate::slot::LatestSlot;
use crate::tlv_types::{self, DETECTED_POINTS};

/// Header: 8 little-endian `u32` fields following the delimiter.
pub const MESSAGE_HEADER_SIZE: usize = 32;

/// TLV prefix: type (4) + length (4).
const TLV_PREFIX_SIZE: usize = 8;

/// Bytes per detected point: x, y, z, velocity as `f32`.
const POINT_SIZE: usize = 16;

/// Fixed header at the start of every telemetry message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MessageHeader {
    pub version: u32,
    /// Message length including the delimiter.
    pub total_packet_length: u32,
    pub platform: u32,
    pub frame_number: u32,
    pub time_cpu_cycles: u32,
    pub num_detected_objects: u32,
    pub num_tlvs: u32,
    pub sub_frame_number: u32,
}

impl MessageHeader {
    /// Parse the header of a message blob.
    ///
    /// The blob must be strictly longer than the header.
    pub fn parse(message: &[u8]) -> Result<Self> {
        if message.len() <= MESSAGE_HEADER_SIZE {
            return Err(FrameError::MessageTooShort {
                len: message.len(),
                min: MESSAGE_HEADER_SIZE,
            });
        }
        let mut fields = &message[..MESSAGE_HEADER_SIZE];
        Ok(Self {
            version: fields.get_u32_le(),
            total_packet_length: fields.get_u32_le(),
            platform: fields.get_u32_le(),
            frame_number: fields.get_u32_le(),
            time_cpu_cycles: fields.get_u32_le(),
            num_detected_objects: fields.get_u32_le(),
            num_tlvs: fields.get_u32_le(),
            sub_frame_number: fields.get_u32_le(),
        })
    }

    /// Check the declared length against the bytes actually captured.
    pub fn validate(&self, message: &[u8]) -> Result<()> {
        let declared = self.total_packet_length as usize;
        if declared != message.len() {
            return Err(FrameError::LengthMismatch {
                declared,
                actual: message.len(),
            });
        }
        Ok(())
    }
}

/// One type-length-value record borrowed from its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlvRecord<'a> {
    pub tlv_type: u32,
    pub payload: &'a [u8],
}

impl TlvRecord<'_> {
    pub fn type_name(&self) -> &'static str {
        tlv_types::tlv_type_name(self.tlv_type)
    }
}

/// Split the body of a message into its TLV records.
///
/// Records start right after the header. The body ends before the trailing
/// delimiter, if present; a record reaching past that end rejects the whole
/// message before anything is read out of bounds.
pub fn demux_tlvs<'a>(message: &'a [u8], header: &MessageHeader) -> Result<Vec<TlvRecord<'a>>> {
    let body_end = if message.ends_with(&MAGIC_WORD) {
        message.len() - MAGIC_WORD.len()
    } else {
        message.len()
    };
    let mut offset = MESSAGE_HEADER_SIZE;
    let mut records = Vec::with_capacity(header.num_tlvs.min(32) as usize);

    for index in 0..header.num_tlvs {
        let available = body_end.saturating_sub(offset);
        if available < TLV_PREFIX_SIZE {
            return Err(FrameError::TlvOverrun {
                index,
                offset,
                length: TLV_PREFIX_SIZE,
                available,
            });
        }
        let mut prefix = &message[offset..offset + TLV_PREFIX_SIZE];
        let tlv_type = prefix.get_u32_le();
        let length = prefix.get_u32_le() as usize;

        let payload_start = offset + TLV_PREFIX_SIZE;
        if length > available - TLV_PREFIX_SIZE {
            return Err(FrameError::TlvOverrun {
                index,
                offset,
                length,
                available: available - TLV_PREFIX_SIZE,
            });
        }
        records.push(TlvRecord {
            tlv_type,
            payload: &message[payload_start..payload_start + length],
        });
        offset = payload_start + length;
    }

    Ok(records)
}

/// One detected object.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DetectedPoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub velocity: f32,
}

/// Detected objects reported for one sensor frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DetectedPointTable {
    pub frame_number: u32,
    pub points: Vec<DetectedPoint>,
}

impl DetectedPointTable {
    /// Decode a DETECTED_POINTS payload: rows of four little-endian `f32`.
    ///
    /// A trailing partial row is ignored.
    pub fn decode(payload: &[u8], frame_number: u32) -> Self {
        let points = payload
            .chunks_exact(POINT_SIZE)
            .map(|mut row| DetectedPoint {
                x: row.get_f32_le(),
                y: row.get_f32_le(),
                z: row.get_f32_le(),
                velocity: row.get_f32_le(),
            })
            .collect();
        Self {
            frame_number,
            points,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Points as `[x, y, z, velocity]` rows.
    pub fn rows(&self) -> impl Iterator<Item = [f32; 4]> + '_ {
        self.points.iter().map(|p| [p.x, p.y, p.z, p.velocity])
    }
}

/// Validate a message blob and extract its detected points.
///
/// A valid message without a DETECTED_POINTS record yields an empty table.
pub fn parse_message(message: &[u8]) -> Result<(MessageHeader, DetectedPointTable)> {
    let header = MessageHeader::parse(message)?;
    header.validate(message)?;
    let records = demux_tlvs(message, &header)?;

    let mut table = DetectedPointTable {
        frame_number: header.frame_number,
        points: Vec::new(),
    };
    for record in &records {
        if record.tlv_type == DETECTED_POINTS {
            table = DetectedPointTable::decode(record.payload, header.frame_number);
        } else {
            trace!(
                tlv_type = record.tlv_type,
                name = record.type_name(),
                len = record.payload.len(),
                "skipping tlv"
            );
        }
    }
    Ok((header, table))
}

/// Outcome of processing one serial message.
#[derive(Debug)]
pub enum MessageStatus {
    /// No complete message arrived in time; nothing changed.
    Timeout,
    /// A table was published.
    Published { frame_number: u32, points: usize },
    /// The message was malformed and dropped; the slot was not touched.
    Rejected(FrameError),
}

/// Live synchronizer counters, shared with status readers.
#[derive(Debug, Default)]
pub struct SerialCounters {
    messages_received: AtomicU64,
    messages_published: AtomicU64,
    messages_rejected: AtomicU64,
    points_published: AtomicU64,
    discarded_bytes: AtomicU64,
}

impl SerialCounters {
    pub fn snapshot(&self) -> SerialStats {
        SerialStats {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_published: self.messages_published.load(Ordering::Relaxed),
            messages_rejected: self.messages_rejected.load(Ordering::Relaxed),
            points_published: self.points_published.load(Ordering::Relaxed),
            discarded_bytes: self.discarded_bytes.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`SerialCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SerialStats {
    pub messages_received: u64,
    pub messages_published: u64,
    pub messages_rejected: u64,
    pub points_published: u64,
    /// Bytes dropped while hunting for a delimiter.
    pub discarded_bytes: u64,
}

/// Turns the sensor's telemetry stream into detected-point tables.
pub struct TlvSynchronizer<S> {
    reader: MessageReader<S>,
    message_timeout: Duration,
    last_message: Instant,
    stall_reported: bool,
    slot: Arc<LatestSlot<DetectedPointTable>>,
    counters: Arc<SerialCounters>,
}

impl<S: ByteSource> TlvSynchronizer<S> {
    /// Create a synchronizer publishing into `slot`.
    ///
    /// `message_timeout` bounds each [`TlvSynchronizer::process_next_message`]
    /// and is how long [`TlvSynchronizer::poll_next_message`] waits without a
    /// complete message before reporting the stream as stalled.
    pub fn new(
        reader: MessageReader<S>,
        message_timeout: Duration,
        slot: Arc<LatestSlot<DetectedPointTable>>,
    ) -> Self {
        Self {
            reader,
            message_timeout,
            last_message: Instant::now(),
            stall_reported: false,
            slot,
            counters: Arc::new(SerialCounters::default()),
        }
    }

    /// Read, validate and publish one message.
    ///
    /// Malformed messages are reported as [`MessageStatus::Rejected`]; only
    /// link failures are returned as errors.
    pub fn process_next_message(&mut self) -> Result<MessageStatus> {
        let message = self.reader.read_message(self.message_timeout)?;
        self.sync_discarded();
        match message {
            Some(message) => Ok(self.process_message(&message)),
            None => Ok(MessageStatus::Timeout),
        }
    }

    /// Like [`TlvSynchronizer::process_next_message`], but performs at most
    /// one read of the underlying source.
    ///
    /// Returns within the source's read timeout, so a caller looping on it can
    /// check for cancellation between reads. Partial messages stay buffered.
    pub fn poll_next_message(&mut self) -> Result<MessageStatus> {
        let message = self.reader.poll_message()?;
        self.sync_discarded();
        match message {
            Some(message) => Ok(self.process_message(&message)),
            None => {
                let silent = self.last_message.elapsed();
                if !self.stall_reported && silent >= self.message_timeout {
                    warn!(
                        silent_ms = silent.as_millis() as u64,
                        buffered = self.reader.buffered(),
                        "no complete serial message within message timeout"
                    );
                    self.stall_reported = true;
                }
                Ok(MessageStatus::Timeout)
            }
        }
    }

    fn sync_discarded(&self) {
        self.counters
            .discarded_bytes
            .store(self.reader.discarded_bytes(), Ordering::Relaxed);
    }

    /// Validate and publish one message blob received elsewhere.
    pub fn process_message(&mut self, message: &[u8]) -> MessageStatus {
        self.last_message = Instant::now();
        self.stall_reported = false;
        self.counters
            .messages_received
            .fetch_add(1, Ordering::Relaxed);

        match parse_message(message) {
            Ok((header, table)) => {
                let points = table.len();
                self.counters
                    .messages_published
                    .fetch_add(1, Ordering::Relaxed);
                self.counters
                    .points_published
                    .fetch_add(points as u64, Ordering::Relaxed);
                self.slot.publish(table);
                trace!(frame = header.frame_number, points, "published detected points");
                MessageStatus::Published {
                    frame_number: header.frame_number,
                    points,
                }
            }
            Err(err) => {
                let rejected = self
                    .counters
                    .messages_rejected
                    .fetch_add(1, Ordering::Relaxed);
                let published = self.counters.messages_published.load(Ordering::Relaxed);
                // The first blob of a session is whatever preceded the first delimiter.
                if published == 0 && rejected == 0 {
                    debug!(len = message.len(), error = %err, "dropping bytes before first delimiter");
                } else {
                    warn!(len = message.len(), error = %err, "rejecting serial message");
                }
                MessageStatus::Rejected(err)
            }
        }
    }

    /// Drop buffered bytes so the next message is one sent after this call.
    pub fn clear(&mut self) -> Result<()> {
        self.last_message = Instant::now();
        self.stall_reported = false;
        self.reader.clear()
    }

    pub fn slot(&self) -> Arc<LatestSlot<DetectedPointTable>> {
        Arc::clone(&self.slot)
    }

    pub fn counters(&self) -> Arc<SerialCounters> {
        Arc::clone(&self.counters)
    }

    pub fn stats(&self) -> SerialStats {
        self.counters.snapshot()
    }

    pub fn message_timeout(&self) -> Duration {
        self.message_timeout
    }

    /// Borrow the message reader.
    pub fn reader(&self) -> &MessageReader<S> {
        &self.reader
    }

    /// Mutably borrow the message reader.
    pub fn reader_mut(&mut self) -> &mut MessageReader<S> {
        &mut self.reader
    }
}

impl<S> std::fmt::Debug for TlvSynchronizer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlvSynchronizer")
            .field("message_timeout", &self.message_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;
    use mmwcap_transport::mock::{ScriptedBytes, WhenDrained};

    use crate::tlv_types::{RANGE_PROFILE, STATS};

    fn point_payload(points: &[[f32; 4]]) -> Vec<u8> {
        let mut out = Vec::new();
        for row in points {
            for v in row {
                out.put_f32_le(*v);
            }
        }
        out
    }

    /// Body + next delimiter, as the reader hands it out.
    fn message(frame_number: u32, tlvs: &[(u32, Vec<u8>)]) -> Vec<u8> {
        let mut body = Vec::new();
        for (tlv_type, payload) in tlvs {
            body.put_u32_le(*tlv_type);
            body.put_u32_le(payload.len() as u32);
            body.put_slice(payload);
        }
        let total = MESSAGE_HEADER_SIZE + body.len() + MAGIC_WORD.len();

        let mut out = Vec::new();
        out.put_u32_le(0x0306_0000); // version
        out.put_u32_le(total as u32);
        out.put_u32_le(0x000A_6843); // platform
        out.put_u32_le(frame_number);
        out.put_u32_le(123_456); // cpu cycles
        out.put_u32_le(0); // detected objects
        out.put_u32_le(tlvs.len() as u32);
        out.put_u32_le(0); // sub-frame
        out.extend_from_slice(&body);
        out.extend_from_slice(&MAGIC_WORD);
        out
    }

    fn synchronizer(source: ScriptedBytes) -> TlvSynchronizer<ScriptedBytes> {
        TlvSynchronizer::new(
            MessageReader::new(source),
            Duration::from_millis(200),
            Arc::new(LatestSlot::new()),
        )
    }

    #[test]
    fn test_parse_header_fields() {
        let msg = message(42, &[]);
        let header = MessageHeader::parse(&msg).unwrap();
        assert_eq!(header.frame_number, 42);
        assert_eq!(header.total_packet_length as usize, msg.len());
        assert_eq!(header.num_tlvs, 0);
        assert_eq!(header.time_cpu_cycles, 123_456);
    }

    #[test]
    fn test_header_requires_more_than_32_bytes() {
        let result = MessageHeader::parse(&[0u8; MESSAGE_HEADER_SIZE]);
        assert!(matches!(
            result,
            Err(FrameError::MessageTooShort { len: 32, .. })
        ));
    }

    #[test]
    fn test_detected_points_decoded() {
        let points = [[1.0, 2.0, 3.0, -0.5], [4.5, -1.25, 0.0, 2.0]];
        let msg = message(
            7,
            &[
                (RANGE_PROFILE, vec![0xAB; 12]),
                (DETECTED_POINTS, point_payload(&points)),
                (STATS, vec![0u8; 24]),
            ],
        );

        let (header, table) = parse_message(&msg).unwrap();
        assert_eq!(header.num_tlvs, 3);
        assert_eq!(table.frame_number, 7);
        assert_eq!(table.rows().collect::<Vec<_>>(), points.to_vec());
    }

    #[test]
    fn test_unknown_types_are_skipped() {
        let msg = message(1, &[(0xDEAD, vec![1, 2, 3]), (DETECTED_POINTS, point_payload(&[[9.0; 4]]))]);
        let (_, table) = parse_message(&msg).unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_message_without_points_yields_empty_table() {
        let msg = message(3, &[(STATS, vec![0u8; 24])]);
        let (_, table) = parse_message(&msg).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.frame_number, 3);
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let mut msg = message(1, &[(DETECTED_POINTS, point_payload(&[[1.0; 4]]))]);
        let declared = ((msg.len() + 4) as u32).to_le_bytes();
        msg[4..8].copy_from_slice(&declared);
        assert!(matches!(
            parse_message(&msg),
            Err(FrameError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_second_tlv_overrun_rejected() {
        let mut msg = message(
            1,
            &[
                (DETECTED_POINTS, point_payload(&[[1.0; 4]])),
                (STATS, vec![0u8; 8]),
            ],
        );
        // Second record claims far more than the message holds.
        let second_len_at = MESSAGE_HEADER_SIZE + TLV_PREFIX_SIZE + POINT_SIZE + 4;
        msg[second_len_at..second_len_at + 4].copy_from_slice(&4096u32.to_le_bytes());

        let header = MessageHeader::parse(&msg).unwrap();
        match demux_tlvs(&msg, &header) {
            Err(FrameError::TlvOverrun { index, length, .. }) => {
                assert_eq!(index, 1);
                assert_eq!(length, 4096);
            }
            other => panic!("expected overrun, got {other:?}"),
        }
    }

    #[test]
    fn test_tlv_may_not_consume_trailing_delimiter() {
        let mut msg = message(1, &[(STATS, vec![0u8; 8])]);
        let len_at = MESSAGE_HEADER_SIZE + 4;
        msg[len_at..len_at + 4].copy_from_slice(&16u32.to_le_bytes());
        assert!(matches!(
            parse_message(&msg),
            Err(FrameError::TlvOverrun { .. })
        ));
    }

    #[test]
    fn test_tlv_count_beyond_body_rejected() {
        let mut msg = message(1, &[(STATS, vec![0u8; 8])]);
        msg[24..28].copy_from_slice(&5u32.to_le_bytes());
        assert!(matches!(
            parse_message(&msg),
            Err(FrameError::TlvOverrun { index: 1, .. })
        ));
    }

    #[test]
    fn test_synchronizer_publishes_and_rejects() {
        let good = message(10, &[(DETECTED_POINTS, point_payload(&[[1.0, 0.0, 0.0, 0.0]]))]);
        let mut bad = message(11, &[(DETECTED_POINTS, point_payload(&[[2.0; 4]]))]);
        bad[4..8].copy_from_slice(&1u32.to_le_bytes());

        let mut source = ScriptedBytes::new(WhenDrained::Idle(Duration::from_millis(5)));
        source.push(b"boot log\r\n".to_vec());
        source.push(MAGIC_WORD.to_vec());
        source.push(good);
        source.push(bad);

        let mut sync = synchronizer(source);
        let slot = sync.slot();

        assert!(matches!(
            sync.process_next_message().unwrap(),
            MessageStatus::Rejected(_)
        ));
        assert!(matches!(
            sync.process_next_message().unwrap(),
            MessageStatus::Published {
                frame_number: 10,
                points: 1
            }
        ));
        assert!(matches!(
            sync.process_next_message().unwrap(),
            MessageStatus::Rejected(FrameError::LengthMismatch { .. })
        ));

        // The bad message must not refresh the slot.
        let table = slot.take_fresh().unwrap();
        assert_eq!(table.frame_number, 10);
        assert!(!slot.is_fresh());

        assert!(matches!(
            sync.process_next_message().unwrap(),
            MessageStatus::Timeout
        ));

        let stats = sync.stats();
        assert_eq!(stats.messages_received, 3);
        assert_eq!(stats.messages_published, 1);
        assert_eq!(stats.messages_rejected, 2);
        assert_eq!(stats.points_published, 1);
    }

    #[test]
    fn test_poll_publishes_across_partial_reads() {
        let msg = message(5, &[(DETECTED_POINTS, point_payload(&[[3.0, 0.0, 1.0, 0.5]]))]);
        let (head, tail) = msg.split_at(20);

        let mut source = ScriptedBytes::new(WhenDrained::Idle(Duration::from_millis(5)));
        source.push(MAGIC_WORD.to_vec());
        source.push(head.to_vec());
        source.push(tail.to_vec());

        let mut sync = synchronizer(source);
        // Bytes before the first delimiter.
        assert!(matches!(
            sync.poll_next_message().unwrap(),
            MessageStatus::Rejected(_)
        ));
        assert!(matches!(
            sync.poll_next_message().unwrap(),
            MessageStatus::Timeout
        ));
        assert!(matches!(
            sync.poll_next_message().unwrap(),
            MessageStatus::Published {
                frame_number: 5,
                points: 1
            }
        ));

        let started = Instant::now();
        assert!(matches!(
            sync.poll_next_message().unwrap(),
            MessageStatus::Timeout
        ));
        assert!(started.elapsed() < sync.message_timeout());
    }

    #[test]
    fn test_rejected_message_leaves_unread_value_fresh() {
        let mut sync = synchronizer(ScriptedBytes::new(WhenDrained::Close));
        let slot = sync.slot();

        let good = message(1, &[]);
        assert!(matches!(
            sync.process_message(&good),
            MessageStatus::Published { .. }
        ));
        let mut bad = message(2, &[]);
        bad[4] ^= 0xFF;
        assert!(matches!(
            sync.process_message(&bad),
            MessageStatus::Rejected(_)
        ));

        assert!(slot.is_fresh());
        assert_eq!(slot.take_fresh().unwrap().frame_number, 1);
    }
}
