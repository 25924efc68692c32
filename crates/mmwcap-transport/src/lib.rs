//! Transport primitives for radar capture.
//!
//! Two kinds of links feed the capture pipeline:
//! - UDP sockets to the capture board (command request/response and the
//!   raw ADC data stream)
//! - Serial ports to the sensor (line-oriented control and TLV telemetry)
//!
//! Every receive is bounded by a timeout configured on the link, so that a
//! worker thread blocked in a receive always returns within that bound and
//! can observe a stop request. This is the lowest layer of mmwcap.

pub mod error;
pub mod mock;
pub mod serial;
pub mod traits;
pub mod udp;

pub use error::{Result, TransportError};
pub use serial::SerialLink;
pub use traits::{ByteSource, DatagramSource, Recv};
pub use udp::UdpLink;
