use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::loader::{read_config_file, LoadLimits};

/// Top-level system configuration (JSON).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystemConfig {
    /// Sensor profile (`.cfg`); relative paths resolve against the JSON file.
    pub radar_config_path: PathBuf,
    /// Sensor SDK generation; selects the raw sample layout.
    #[serde(default = "default_sdk_major_version")]
    pub sdk_major_version: u32,
    /// Overrides the receive channel count derived from the profile.
    #[serde(default)]
    pub rx_channels: Option<usize>,
    #[serde(default)]
    pub sensor_cli: SensorCliConfig,
    #[serde(default)]
    pub serial_streaming: SerialStreamingConfig,
    #[serde(default)]
    pub dca1000_streaming: Dca1000Config,
}

/// The sensor's line-oriented control port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SensorCliConfig {
    /// When false the sensor is assumed to be configured and started elsewhere.
    pub enabled: bool,
    pub port: String,
    pub baud_rate: u32,
    pub response_timeout_ms: u64,
    /// Replay the profile's commands at initialization.
    pub send_profile: bool,
}

impl Default for SensorCliConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: "/dev/ttyACM0".to_string(),
            baud_rate: 115_200,
            response_timeout_ms: 100,
            send_profile: true,
        }
    }
}

impl SensorCliConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

/// The sensor's TLV telemetry port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SerialStreamingConfig {
    pub enabled: bool,
    pub port: String,
    pub baud_rate: u32,
    /// Bound on a single driver read; also bounds shutdown latency.
    pub read_timeout_ms: u64,
    /// Silence after which the lane reports the telemetry stream as stalled.
    pub message_timeout_ms: u64,
    /// Buffer cap while searching for a delimiter.
    pub max_message_bytes: usize,
}

impl Default for SerialStreamingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: "/dev/ttyACM1".to_string(),
            baud_rate: 921_600,
            read_timeout_ms: 100,
            message_timeout_ms: 1000,
            max_message_bytes: 64 * 1024,
        }
    }
}

impl SerialStreamingConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms)
    }
}

/// The DCA1000 capture board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Dca1000Config {
    pub enabled: bool,
    pub fpga_ip: Ipv4Addr,
    pub system_ip: Ipv4Addr,
    pub cmd_port: u16,
    pub data_port: u16,
    /// Bound on a single data receive; also bounds shutdown latency.
    pub recv_timeout_ms: u64,
    /// Bound on waiting for a command reply.
    pub command_timeout_ms: u64,
    /// Datagram size the board is configured to send.
    pub packet_size: u16,
    pub packet_delay_us: u16,
    /// Kernel receive buffer requested for the data socket.
    pub recv_buffer_bytes: Option<usize>,
}

impl Default for Dca1000Config {
    fn default() -> Self {
        Self {
            enabled: false,
            fpga_ip: Ipv4Addr::new(192, 168, 33, 180),
            system_ip: Ipv4Addr::new(192, 168, 33, 30),
            cmd_port: 4096,
            data_port: 4098,
            recv_timeout_ms: 100,
            command_timeout_ms: 1000,
            packet_size: 1470,
            packet_delay_us: 25,
            recv_buffer_bytes: Some(8 * 1024 * 1024),
        }
    }
}

impl Dca1000Config {
    /// Where commands are sent.
    pub fn fpga_cmd_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.fpga_ip, self.cmd_port))
    }

    /// Where command replies are received.
    pub fn system_cmd_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.system_ip, self.cmd_port))
    }

    /// Where ADC datagrams are received.
    pub fn system_data_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.system_ip, self.data_port))
    }

    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

fn default_sdk_major_version() -> u32 {
    3
}

impl SystemConfig {
    /// Parse a system config from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Read a system config file, resolving the profile path against it.
    pub fn load(path: &Path, limits: LoadLimits) -> Result<Self> {
        let text = read_config_file(path, limits)?;
        let mut config = Self::from_json(&text)?;
        if config.radar_config_path.is_relative() {
            if let Some(dir) = path.parent() {
                config.radar_config_path = dir.join(&config.radar_config_path);
            }
        }
        Ok(config)
    }
}
