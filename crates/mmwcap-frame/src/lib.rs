//! Frame reassembly for radar capture.
//!
//! Two continuous streams are turned into discrete, fixed-shape frames:
//! - ADC datagrams from the capture board, each tagged with a sequence
//!   number and a cumulative byte count, are reassembled into raw frames
//!   (zero-padding across losses) and decoded into [`SampleCube`]s
//! - Serial telemetry from the sensor is split on an 8-byte magic word,
//!   validated against its header and demultiplexed into TLV records, the
//!   detected-point record becoming a [`DetectedPointTable`]
//!
//! Completed frames are handed to consumers through a [`LatestSlot`]:
//! the newest frame always wins, unread frames are overwritten.

pub mod assembler;
pub mod codec;
pub mod cube;
pub mod error;
pub mod reader;
pub mod slot;
pub mod tlv;
pub mod tlv_types;

pub use assembler::{
    AssemblerCounters, AssemblerStats, DiscardReason, FrameAccumulator, FrameAssembler,
    PacketStatus,
};
pub use codec::{decode_datagram, encode_datagram, DatagramHeader, DATAGRAM_HEADER_SIZE};
pub use cube::{decode_cube, encode_cube, CubeShape, Sample, SampleCube, SampleLayout};
pub use error::{FrameError, Result};
pub use reader::{MessageReader, MAGIC_WORD};
pub use slot::{LatestSlot, SlotStats};
pub use tlv::{
    demux_tlvs, parse_message, DetectedPoint, DetectedPointTable, MessageHeader, MessageStatus,
    SerialCounters, SerialStats, TlvRecord, TlvSynchronizer, MESSAGE_HEADER_SIZE,
};
