use std::io::ErrorKind;
use std::net::SocketAddr;

/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind a UDP socket to the specified address.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// Failed to open a serial port.
    #[error("failed to open serial port {path}: {source}")]
    Open {
        path: String,
        source: serialport::Error,
    },

    /// An I/O error occurred on the link.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The serial driver reported an error.
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// A send was attempted on a socket with no configured peer.
    #[error("no peer address configured for send")]
    NoPeer,

    /// The link has been closed and will produce no more data.
    #[error("transport closed")]
    Closed,
}

impl TransportError {
    /// Whether retrying the same operation cannot succeed.
    ///
    /// Receive loops keep polling on non-fatal errors and exit on fatal ones.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Io(err) => !matches!(
                err.kind(),
                ErrorKind::Interrupted
                    | ErrorKind::WouldBlock
                    | ErrorKind::TimedOut
                    | ErrorKind::ConnectionRefused
                    | ErrorKind::ConnectionReset
            ),
            Self::Serial(err) => matches!(err.kind(), serialport::ErrorKind::NoDevice),
            Self::NoPeer => false,
            Self::Bind { .. } | Self::Open { .. } | Self::Closed => true,
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_io_errors_are_not_fatal() {
        for kind in [
            ErrorKind::Interrupted,
            ErrorKind::WouldBlock,
            ErrorKind::ConnectionRefused,
        ] {
            let err = TransportError::Io(std::io::Error::from(kind));
            assert!(!err.is_fatal(), "{kind:?} should be transient");
        }
    }

    #[test]
    fn test_closed_and_broken_links_are_fatal() {
        assert!(TransportError::Closed.is_fatal());
        let err = TransportError::Io(std::io::Error::from(ErrorKind::BrokenPipe));
        assert!(err.is_fatal());
        let err = TransportError::Serial(serialport::Error::new(
            serialport::ErrorKind::NoDevice,
            "unplugged",
        ));
        assert!(err.is_fatal());
    }
}
