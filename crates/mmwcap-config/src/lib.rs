//! Configuration for radar capture sessions.
//!
//! A session is described by two files:
//! - a JSON system config naming the links to open and their timeouts
//! - the sensor's mmWave `.cfg` profile, which fixes the frame geometry
//!   and is replayed line by line to the sensor at startup
//!
//! [`SessionConfig::load`] reads both, validates them together and derives
//! the cube shape and sample layout used for the whole session.

pub mod error;
pub mod loader;
pub mod radar;
pub mod session;
pub mod system;

pub use error::{ConfigError, Result};
pub use loader::LoadLimits;
pub use radar::{ChirpCfg, FrameCfg, ProfileCfg, RadarProfile};
pub use session::SessionConfig;
pub use system::{Dca1000Config, SensorCliConfig, SerialStreamingConfig, SystemConfig};
