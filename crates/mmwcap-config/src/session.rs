use std::path::{Path, PathBuf};

use mmwcap_frame::{CubeShape, SampleLayout, DATAGRAM_HEADER_SIZE};
use tracing::info;

use crate::error::{ConfigError, Result};
use crate::loader::LoadLimits;
use crate::radar::RadarProfile;
use crate::system::SystemConfig;

/// Everything a capture session needs, loaded and cross-checked.
///
/// The cube shape and sample layout are fixed here, once, for the lifetime
/// of the session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub system: SystemConfig,
    pub profile: RadarProfile,
    pub shape: CubeShape,
    pub layout: SampleLayout,
    pub source_path: Option<PathBuf>,
}

impl SessionConfig {
    /// Load the system config at `path` and the profile it names.
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_with_limits(path, LoadLimits::default())
    }

    pub fn load_with_limits(path: &Path, limits: LoadLimits) -> Result<Self> {
        let system = SystemConfig::load(path, limits)?;
        let profile = RadarProfile::load(&system.radar_config_path, limits)?;
        let mut session = Self::from_parts(system, profile)?;
        session.source_path = Some(path.to_path_buf());

        info!(
            config = %path.display(),
            rx = session.shape.num_rx,
            samples = session.shape.samples_per_chirp,
            chirps = session.shape.chirps_per_frame,
            layout = %session.layout,
            "loaded session configuration"
        );
        Ok(session)
    }

    /// Validate an already-parsed pair and derive the session geometry.
    pub fn from_parts(system: SystemConfig, profile: RadarProfile) -> Result<Self> {
        let layout = SampleLayout::from_sdk_major(system.sdk_major_version).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "unsupported sdk_major_version {} (expected 2 or 3)",
                system.sdk_major_version
            ))
        })?;
        if system.rx_channels == Some(0) {
            return Err(ConfigError::Invalid("rx_channels must be non-zero".to_string()));
        }
        let shape = profile.cube_shape(system.rx_channels)?;
        layout.check_shape(shape)?;
        validate_links(&system)?;

        Ok(Self {
            system,
            profile,
            shape,
            layout,
            source_path: None,
        })
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.shape.bytes_per_frame()
    }

    pub fn serial_enabled(&self) -> bool {
        self.system.serial_streaming.enabled
    }

    pub fn dca1000_enabled(&self) -> bool {
        self.system.dca1000_streaming.enabled
    }
}

fn validate_links(system: &SystemConfig) -> Result<()> {
    let serial = &system.serial_streaming;
    let dca = &system.dca1000_streaming;
    let cli = &system.sensor_cli;

    if !serial.enabled && !dca.enabled {
        return Err(ConfigError::Invalid(
            "no streaming transport enabled (serial_streaming or dca1000_streaming)".to_string(),
        ));
    }
    if serial.enabled {
        require_nonzero("serial_streaming.read_timeout_ms", serial.read_timeout_ms)?;
        require_nonzero("serial_streaming.message_timeout_ms", serial.message_timeout_ms)?;
        if serial.port.is_empty() {
            return Err(ConfigError::Invalid("serial_streaming.port is empty".to_string()));
        }
    }
    if dca.enabled {
        require_nonzero("dca1000_streaming.recv_timeout_ms", dca.recv_timeout_ms)?;
        require_nonzero("dca1000_streaming.command_timeout_ms", dca.command_timeout_ms)?;
        if usize::from(dca.packet_size) <= DATAGRAM_HEADER_SIZE {
            return Err(ConfigError::Invalid(format!(
                "dca1000_streaming.packet_size {} leaves no room after the {DATAGRAM_HEADER_SIZE}-byte header",
                dca.packet_size
            )));
        }
    }
    if cli.enabled {
        require_nonzero("sensor_cli.response_timeout_ms", cli.response_timeout_ms)?;
        if cli.port.is_empty() {
            return Err(ConfigError::Invalid("sensor_cli.port is empty".to_string()));
        }
    }
    Ok(())
}

fn require_nonzero(name: &str, value: u64) -> Result<()> {
    if value == 0 {
        return Err(ConfigError::Invalid(format!("{name} must be non-zero")));
    }
    Ok(())
}
