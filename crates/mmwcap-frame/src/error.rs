use mmwcap_transport::TransportError;

/// Errors that can occur while reassembling or decoding frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The underlying link failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A data datagram is shorter than its fixed header.
    #[error("datagram too short ({len} bytes, header needs {min})")]
    DatagramTooShort { len: usize, min: usize },

    /// A raw frame buffer does not match the configured cube shape.
    #[error("raw frame is {actual} bytes, expected {expected}")]
    FrameSize { expected: usize, actual: usize },

    /// The cube geometry cannot be used with the selected layout.
    #[error("invalid cube shape: {0}")]
    InvalidShape(&'static str),

    /// A serial message is too short to hold its header.
    #[error("message too short ({len} bytes, header needs more than {min})")]
    MessageTooShort { len: usize, min: usize },

    /// The header's declared packet length disagrees with the bytes captured.
    #[error("message length mismatch (header declares {declared}, captured {actual})")]
    LengthMismatch { declared: usize, actual: usize },

    /// A TLV record would extend past the end of its message.
    #[error("tlv {index} at offset {offset} declares {length} bytes but only {available} remain")]
    TlvOverrun {
        index: u32,
        offset: usize,
        length: usize,
        available: usize,
    },
}

impl FrameError {
    /// Whether this error ends the reassembly loop that produced it.
    ///
    /// Malformed input is rejected per unit; only a dead link is fatal.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_fatal(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
