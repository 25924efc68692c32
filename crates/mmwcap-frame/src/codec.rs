use bytes::{Buf, BufMut, BytesMut};

use crate::error::{FrameError, Result};

/// Datagram header: sequence (4) + cumulative byte count (6) = 10 bytes.
pub const DATAGRAM_HEADER_SIZE: usize = 10;

/// Largest value the 48-bit byte counter can carry.
pub const MAX_BYTE_COUNT: u64 = (1 << 48) - 1;

/// The fixed header of one capture-board data datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatagramHeader {
    /// Per-datagram sequence number, starting at 1 and wrapping at `u32::MAX`.
    pub sequence: u32,
    /// Stream bytes sent before this datagram's payload.
    pub byte_count: u64,
}

/// Decode the header of a data datagram, returning it with the payload.
///
/// Wire format:
/// ```text
/// ┌───────────────┬──────────────────┬────────────────────┐
/// │ Sequence (4B) │ Byte count (6B)  │ Payload            │
/// │ u32 LE        │ u48 LE           │ raw ADC bytes      │
/// └───────────────┴──────────────────┴────────────────────┘
/// ```
pub fn decode_datagram(datagram: &[u8]) -> Result<(DatagramHeader, &[u8])> {
    if datagram.len() < DATAGRAM_HEADER_SIZE {
        return Err(FrameError::DatagramTooShort {
            len: datagram.len(),
            min: DATAGRAM_HEADER_SIZE,
        });
    }

    let mut fields = &datagram[..DATAGRAM_HEADER_SIZE];
    let sequence = fields.get_u32_le();
    let byte_count = fields.get_uint_le(6);

    Ok((
        DatagramHeader {
            sequence,
            byte_count,
        },
        &datagram[DATAGRAM_HEADER_SIZE..],
    ))
}

/// Encode a data datagram the way the capture board sends it.
///
/// Byte counts beyond 48 bits are truncated, as on the wire.
pub fn encode_datagram(header: DatagramHeader, payload: &[u8], dst: &mut BytesMut) {
    dst.reserve(DATAGRAM_HEADER_SIZE + payload.len());
    dst.put_u32_le(header.sequence);
    dst.put_uint_le(header.byte_count & MAX_BYTE_COUNT, 6);
    dst.put_slice(payload);
}
