//! Opens the hardware a [`SessionConfig`] describes.

use std::sync::Arc;
use std::time::Duration;

use mmwcap_config::{Dca1000Config, SessionConfig};
use mmwcap_frame::{FrameAssembler, LatestSlot, MessageReader, TlvSynchronizer};
use mmwcap_transport::{SerialLink, UdpLink};
use tracing::{info, warn};

use crate::capture_board::{CaptureBoard, PacketConfig};
use crate::controller::Controller;
use crate::error::Result;
use crate::runner::Lane;
use crate::sensor_cli::SensorCli;

/// Longest single blocking read on the sensor's command port.
const CLI_POLL: Duration = Duration::from_millis(20);

/// Lanes and sensor controller ready for [`crate::Runner::initialize_with`].
pub struct Session {
    pub lanes: Vec<Lane>,
    pub sensor: Option<Box<dyn Controller>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("lanes", &self.lanes)
            .field("sensor", &self.sensor.as_ref().map(|s| s.name().to_string()))
            .finish()
    }
}

/// Connect to the capture board's command port.
pub fn open_capture_board(config: &Dca1000Config) -> Result<CaptureBoard> {
    CaptureBoard::connect(
        config.system_cmd_addr(),
        config.fpga_cmd_addr(),
        config.command_timeout(),
    )
}

/// Bring up every enabled transport.
///
/// The capture board is initialized first, then the sensor is configured,
/// then the serial data port is opened. Anything opened before a failure is
/// closed again when the partial session is dropped.
pub fn open_session(config: &SessionConfig) -> Result<Session> {
    let system = &config.system;
    let mut lanes = Vec::new();

    if system.dca1000_streaming.enabled {
        let dca = &system.dca1000_streaming;
        let mut board = open_capture_board(dca)?;
        let version = board.initialize(PacketConfig {
            packet_size: dca.packet_size,
            delay_us: dca.packet_delay_us,
        })?;

        let data = UdpLink::bind(dca.system_data_addr(), dca.recv_timeout())?;
        if let Some(bytes) = dca.recv_buffer_bytes {
            let granted = data.set_recv_buffer_size(bytes)?;
            if granted < bytes {
                warn!(requested = bytes, granted, "receive buffer smaller than requested");
            }
        }

        let assembler =
            FrameAssembler::new(data, config.shape, config.layout, Arc::new(LatestSlot::new()))?;
        info!(
            %version,
            bytes_per_frame = config.bytes_per_frame(),
            layout = %config.layout,
            "adc lane ready"
        );
        lanes.push(Lane::adc(assembler).with_controller(board));
    }

    let sensor = if system.sensor_cli.enabled {
        let cli_config = &system.sensor_cli;
        let port = SerialLink::open(
            &cli_config.port,
            cli_config.baud_rate,
            cli_config.response_timeout().min(CLI_POLL),
        )?;
        let mut cli = SensorCli::new(port, cli_config.response_timeout());
        if cli_config.send_profile {
            cli.send_profile(config.profile.command_lines())?;
        }
        Some(Box::new(cli) as Box<dyn Controller>)
    } else {
        None
    };

    if system.serial_streaming.enabled {
        let serial = &system.serial_streaming;
        let port = SerialLink::open(&serial.port, serial.baud_rate, serial.read_timeout())?;
        let reader = MessageReader::with_max_message_size(port, serial.max_message_bytes);
        let synchronizer =
            TlvSynchronizer::new(reader, serial.message_timeout(), Arc::new(LatestSlot::new()));
        info!(port = %serial.port, baud = serial.baud_rate, "serial lane ready");
        lanes.push(Lane::serial(synchronizer));
    }

    Ok(Session { lanes, sensor })
}
