//! Raw ADC and detected-point capture from mmWave radar sensors.
//!
//! mmwcap drives a radar sensor and its DCA1000 capture board, reassembles
//! the board's UDP sample stream into per-frame sample cubes and the
//! sensor's serial telemetry into detected-point tables, and hands the
//! latest of each to the caller.
//!
//! # Crate Structure
//!
//! - [`transport`]: UDP and serial links with bounded-time receives
//! - [`frame`]: frame reassembly, cube decoding, TLV parsing, latest-value slots
//! - [`config`]: system config and sensor profile loading
//! - [`runner`]: capture session lifecycle and hardware control

/// Re-export transport types.
pub mod transport {
    pub use mmwcap_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use mmwcap_frame::*;
}

/// Re-export configuration types.
pub mod config {
    pub use mmwcap_config::*;
}

/// Re-export runner types.
pub mod runner {
    pub use mmwcap_runner::*;
}
