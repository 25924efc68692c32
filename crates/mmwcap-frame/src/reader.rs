use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use mmwcap_transport::{ByteSource, Recv};
use tracing::{debug, warn};

use crate::error::Result;

/// Delimiter that precedes every sensor telemetry message.
pub const MAGIC_WORD: [u8; 8] = [0x02, 0x01, 0x04, 0x03, 0x06, 0x05, 0x08, 0x07];

/// Default cap on bytes buffered while searching for a delimiter.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 4 * 1024;

/// Splits a serial byte stream into delimiter-terminated blobs.
///
/// Each blob holds everything read up to and including the next
/// [`MAGIC_WORD`]. Since the magic word opens a message, a blob is the body
/// of one message followed by the delimiter of the next; the first blob of a
/// session is whatever preceded the first delimiter.
pub struct MessageReader<S> {
    source: S,
    buf: BytesMut,
    // Bytes before this offset are known not to start a delimiter.
    scanned: usize,
    max_message_size: usize,
    discarded_bytes: u64,
}

impl<S: ByteSource> MessageReader<S> {
    pub fn new(source: S) -> Self {
        Self::with_max_message_size(source, DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// Bound the buffer; a blob longer than this is dropped without a
    /// delimiter ever being found.
    pub fn with_max_message_size(source: S, max_message_size: usize) -> Self {
        Self {
            source,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            scanned: 0,
            max_message_size: max_message_size.max(MAGIC_WORD.len()),
            discarded_bytes: 0,
        }
    }

    /// Read the next blob, waiting at most `timeout`.
    ///
    /// Returns `Ok(None)` on timeout; bytes received so far stay buffered
    /// for the next call.
    pub fn read_message(&mut self, timeout: Duration) -> Result<Option<Bytes>> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(blob) = self.next_buffered() {
                return Ok(Some(blob));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            self.fill_once()?;
        }
    }

    /// Return a buffered blob, or perform at most one source read and try
    /// again.
    ///
    /// Blocks no longer than the source's own read timeout.
    pub fn poll_message(&mut self) -> Result<Option<Bytes>> {
        if let Some(blob) = self.next_buffered() {
            return Ok(Some(blob));
        }
        self.fill_once()?;
        Ok(self.next_buffered())
    }

    fn fill_once(&mut self) -> Result<()> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        if let Recv::Data(n) = self.source.read_bytes(&mut chunk)? {
            self.buf.extend_from_slice(&chunk[..n]);
        }
        Ok(())
    }

    fn next_buffered(&mut self) -> Option<Bytes> {
        let blob = self.split_message();
        if blob.is_none() && self.buf.len() > self.max_message_size {
            self.resync();
        }
        blob
    }

    fn split_message(&mut self) -> Option<Bytes> {
        let found = self.buf[self.scanned..]
            .windows(MAGIC_WORD.len())
            .position(|window| window == MAGIC_WORD);

        match found {
            Some(pos) => {
                let end = self.scanned + pos + MAGIC_WORD.len();
                self.scanned = 0;
                Some(self.buf.split_to(end).freeze())
            }
            None => {
                // A delimiter may straddle the next read.
                self.scanned = self.buf.len().saturating_sub(MAGIC_WORD.len() - 1);
                None
            }
        }
    }

    /// Drop everything except a possible delimiter prefix at the tail.
    fn resync(&mut self) {
        let keep = MAGIC_WORD.len() - 1;
        let drop_len = self.buf.len().saturating_sub(keep);
        let _ = self.buf.split_to(drop_len);
        self.scanned = 0;
        self.discarded_bytes += drop_len as u64;
        warn!(
            dropped = drop_len,
            max = self.max_message_size,
            "no delimiter within message size limit; resynchronizing"
        );
    }

    /// Discard buffered bytes here and in the underlying driver.
    pub fn clear(&mut self) -> Result<()> {
        let dropped = self.buf.len();
        self.buf.clear();
        self.scanned = 0;
        self.source.discard_pending()?;
        debug!(dropped, "cleared serial buffer");
        Ok(())
    }

    /// Bytes currently buffered without a delimiter.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Bytes thrown away while resynchronizing.
    pub fn discarded_bytes(&self) -> u64 {
        self.discarded_bytes
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Borrow the underlying byte source.
    pub fn get_ref(&self) -> &S {
        &self.source
    }

    /// Mutably borrow the underlying byte source.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Consume the reader and return the byte source.
    pub fn into_inner(self) -> S {
        self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mmwcap_transport::mock::{ScriptedBytes, Step, WhenDrained};
    use mmwcap_transport::TransportError;

    use crate::error::FrameError;

    fn idle() -> ScriptedBytes {
        ScriptedBytes::new(WhenDrained::Idle(Duration::from_millis(5)))
    }

    #[test]
    fn test_blob_ends_with_delimiter() {
        let mut source = idle();
        source.push([&b"noise"[..], &MAGIC_WORD[..], &b"body"[..]].concat());
        source.push(MAGIC_WORD.to_vec());

        let mut reader = MessageReader::new(source);
        let first = reader.read_message(Duration::from_secs(1)).unwrap().unwrap();
        assert_eq!(&first[..], [&b"noise"[..], &MAGIC_WORD[..]].concat().as_slice());

        let second = reader.read_message(Duration::from_secs(1)).unwrap().unwrap();
        assert_eq!(&second[..], [&b"body"[..], &MAGIC_WORD[..]].concat().as_slice());
    }

    #[test]
    fn test_delimiter_split_across_reads() {
        let mut source = idle();
        source.push([&b"abc"[..], &MAGIC_WORD[..3]].concat());
        source.push_step(Step::Timeout);
        source.push(MAGIC_WORD[3..].to_vec());

        let mut reader = MessageReader::new(source);
        let blob = reader.read_message(Duration::from_secs(1)).unwrap().unwrap();
        assert_eq!(&blob[..], [&b"abc"[..], &MAGIC_WORD[..]].concat().as_slice());
        assert_eq!(reader.buffered(), 0);
    }

    #[test]
    fn test_timeout_keeps_partial_bytes() {
        let mut source = idle();
        source.push(&b"partial"[..]);

        let mut reader = MessageReader::new(source);
        let started = Instant::now();
        assert!(reader
            .read_message(Duration::from_millis(30))
            .unwrap()
            .is_none());
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(reader.buffered(), 7);

        reader.get_mut().push(MAGIC_WORD.to_vec());
        let blob = reader.read_message(Duration::from_secs(1)).unwrap().unwrap();
        assert!(blob.starts_with(b"partial"));
    }

    #[test]
    fn test_oversized_garbage_is_dropped() {
        let mut source = idle();
        source.push(vec![0xEEu8; 100]);
        source.push([&MAGIC_WORD[..], &b"x"[..]].concat());

        let mut reader = MessageReader::with_max_message_size(source, 32);
        let blob = reader.read_message(Duration::from_secs(1)).unwrap().unwrap();
        assert!(blob.ends_with(&MAGIC_WORD));
        assert!(blob.len() <= 32);
        assert!(reader.discarded_bytes() > 0);
        assert_eq!(reader.buffered(), 1);
    }

    #[test]
    fn test_poll_reads_at_most_once() {
        let mut source = idle();
        source.push(&b"head"[..]);
        source.push([&b"tail"[..], &MAGIC_WORD[..]].concat());

        let mut reader = MessageReader::new(source);
        assert!(reader.poll_message().unwrap().is_none());
        assert_eq!(reader.buffered(), 4);
        assert_eq!(reader.get_ref().remaining(), 1);

        let blob = reader.poll_message().unwrap().unwrap();
        assert_eq!(&blob[..], [&b"headtail"[..], &MAGIC_WORD[..]].concat().as_slice());

        let started = Instant::now();
        assert!(reader.poll_message().unwrap().is_none());
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_closed_source_is_an_error() {
        let mut reader = MessageReader::new(ScriptedBytes::new(WhenDrained::Close));
        let err = reader.read_message(Duration::from_millis(50)).unwrap_err();
        assert!(matches!(
            err,
            FrameError::Transport(TransportError::Closed)
        ));
    }

    #[test]
    fn test_clear_discards_buffer_and_driver() {
        let mut source = idle();
        source.push(&b"stale"[..]);
        let mut reader = MessageReader::new(source);
        assert!(reader
            .read_message(Duration::from_millis(10))
            .unwrap()
            .is_none());

        reader.clear().unwrap();
        assert_eq!(reader.buffered(), 0);
        assert_eq!(reader.get_ref().discards(), 1);
    }
}
