//! Command channel of the DCA1000 capture board.
//!
//! Every command is a small UDP datagram answered by an 8-byte reply:
//!
//! ```text
//! request: 0xA55A | code u16 | len u16 | data[len] | 0xEEAA
//! reply:   0xA55A | code u16 | status u16          | 0xEEAA
//! ```
//!
//! All fields are little-endian. A status of zero means success, except for
//! `READ_FPGA_VERSION`, whose status carries the version itself.

use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::{Buf, BufMut, BytesMut};
use mmwcap_transport::{Recv, UdpLink};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::controller::Controller;
use crate::error::{Result, RunnerError};

pub const COMMAND_HEADER: u16 = 0xA55A;
pub const COMMAND_FOOTER: u16 = 0xEEAA;
pub const REPLY_SIZE: usize = 8;

/// Maximum payload a command may carry.
pub const MAX_COMMAND_DATA: usize = 504;

/// Capture board command codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CommandCode {
    ResetFpga = 0x01,
    ResetArDevice = 0x02,
    ConfigFpgaGen = 0x03,
    ConfigEeprom = 0x04,
    RecordStart = 0x05,
    RecordStop = 0x06,
    PlaybackStart = 0x07,
    PlaybackStop = 0x08,
    SystemConnect = 0x09,
    SystemError = 0x0A,
    ConfigPacketData = 0x0B,
    ConfigDataModeArDevice = 0x0C,
    InitFpgaPlayback = 0x0D,
    ReadFpgaVersion = 0x0E,
}

impl CommandCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn name(self) -> &'static str {
        match self {
            CommandCode::ResetFpga => "RESET_FPGA",
            CommandCode::ResetArDevice => "RESET_AR_DEV",
            CommandCode::ConfigFpgaGen => "CONFIG_FPGA_GEN",
            CommandCode::ConfigEeprom => "CONFIG_EEPROM",
            CommandCode::RecordStart => "RECORD_START",
            CommandCode::RecordStop => "RECORD_STOP",
            CommandCode::PlaybackStart => "PLAYBACK_START",
            CommandCode::PlaybackStop => "PLAYBACK_STOP",
            CommandCode::SystemConnect => "SYSTEM_CONNECT",
            CommandCode::SystemError => "SYSTEM_ERROR",
            CommandCode::ConfigPacketData => "CONFIG_PACKET_DATA",
            CommandCode::ConfigDataModeArDevice => "CONFIG_DATA_MODE_AR_DEV",
            CommandCode::InitFpgaPlayback => "INIT_FPGA_PLAYBACK",
            CommandCode::ReadFpgaVersion => "READ_FPGA_VERSION",
        }
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// FPGA configuration sent with `CONFIG_FPGA_GEN`: raw LVDS capture,
/// Ethernet streaming, AR1243 device, 16-bit samples, LVDS 4-lane, and a
/// 30 s record timer.
pub const FPGA_GEN_CONFIG: [u8; 6] = [0x01, 0x01, 0x01, 0x02, 0x03, 0x1E];

/// Encode one command datagram into `dst`.
///
/// Payloads longer than [`MAX_COMMAND_DATA`] are truncated.
pub fn encode_command(code: CommandCode, data: &[u8], dst: &mut BytesMut) {
    let data = &data[..data.len().min(MAX_COMMAND_DATA)];
    dst.reserve(8 + data.len());
    dst.put_u16_le(COMMAND_HEADER);
    dst.put_u16_le(code.as_u16());
    dst.put_u16_le(data.len() as u16);
    dst.put_slice(data);
    dst.put_u16_le(COMMAND_FOOTER);
}

/// Why a reply datagram was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyMismatch {
    Length(usize),
    Framing,
    Code(u16),
}

/// Decode a reply to `expected`, returning its status word.
pub fn decode_reply(reply: &[u8], expected: CommandCode) -> std::result::Result<u16, ReplyMismatch> {
    if reply.len() != REPLY_SIZE {
        return Err(ReplyMismatch::Length(reply.len()));
    }
    let mut buf = reply;
    let header = buf.get_u16_le();
    let code = buf.get_u16_le();
    let status = buf.get_u16_le();
    let footer = buf.get_u16_le();
    if header != COMMAND_HEADER || footer != COMMAND_FOOTER {
        return Err(ReplyMismatch::Framing);
    }
    if code != expected.as_u16() {
        return Err(ReplyMismatch::Code(code));
    }
    Ok(status)
}

/// FPGA firmware version reported by `READ_FPGA_VERSION`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FpgaVersion {
    pub major: u8,
    pub minor: u8,
}

impl FpgaVersion {
    pub fn from_status(status: u16) -> Self {
        Self {
            major: (status & 0x7F) as u8,
            minor: ((status >> 7) & 0x7F) as u8,
        }
    }
}

impl fmt::Display for FpgaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Ethernet packetisation settings sent with `CONFIG_PACKET_DATA`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketConfig {
    pub packet_size: u16,
    pub delay_us: u16,
}

impl Default for PacketConfig {
    fn default() -> Self {
        Self {
            packet_size: 1470,
            delay_us: 25,
        }
    }
}

impl PacketConfig {
    fn encode(&self) -> [u8; 6] {
        let mut data = [0u8; 6];
        data[0..2].copy_from_slice(&self.packet_size.to_le_bytes());
        data[2..4].copy_from_slice(&self.delay_us.to_le_bytes());
        data
    }
}

/// Client for the capture board's command port.
pub struct CaptureBoard {
    link: UdpLink,
    timeout: Duration,
    buf: BytesMut,
}

impl CaptureBoard {
    /// Bind the local command socket and target the board at `fpga`.
    pub fn connect(local: SocketAddr, fpga: SocketAddr, timeout: Duration) -> Result<Self> {
        let recv_timeout = timeout.min(Duration::from_millis(100));
        let link = UdpLink::bind(local, recv_timeout)?.with_peer(fpga);
        info!(local = %link.local_addr(), %fpga, "capture board command channel open");
        Ok(Self {
            link,
            timeout,
            buf: BytesMut::with_capacity(64),
        })
    }

    /// Send a command and wait for its reply, returning the raw status word.
    ///
    /// Replies to other commands, stray datagrams and datagrams from other
    /// hosts are ignored until the deadline.
    pub fn send_command(&mut self, code: CommandCode, data: &[u8]) -> Result<u16> {
        if data.len() > MAX_COMMAND_DATA {
            return Err(RunnerError::CommandTooLarge {
                command: code.name(),
                len: data.len(),
            });
        }
        self.buf.clear();
        encode_command(code, data, &mut self.buf);
        self.link.send(&self.buf)?;
        debug!(command = code.name(), len = data.len(), "sent board command");

        let board = self.link.peer_addr();
        let deadline = Instant::now() + self.timeout;
        let mut reply = [0u8; 64];
        loop {
            if Instant::now() >= deadline {
                return Err(RunnerError::CommandTimeout {
                    command: code.name(),
                    timeout: self.timeout,
                });
            }
            let (len, from) = match self.link.recv(&mut reply)? {
                Recv::Data(received) => received,
                Recv::Timeout => continue,
            };
            if board.is_some_and(|board| board.ip() != from.ip()) {
                debug!(%from, "ignoring datagram from unexpected host");
                continue;
            }
            match decode_reply(&reply[..len], code) {
                Ok(status) => {
                    debug!(command = code.name(), status, "board replied");
                    return Ok(status);
                }
                Err(mismatch) => {
                    warn!(command = code.name(), ?mismatch, "ignoring unexpected reply");
                }
            }
        }
    }

    fn expect_ok(&mut self, code: CommandCode, data: &[u8]) -> Result<()> {
        match self.send_command(code, data)? {
            0 => Ok(()),
            status => Err(RunnerError::CommandRejected {
                command: code.name(),
                status,
            }),
        }
    }

    pub fn system_connect(&mut self) -> Result<()> {
        self.expect_ok(CommandCode::SystemConnect, &[])
    }

    pub fn reset_fpga(&mut self) -> Result<()> {
        self.expect_ok(CommandCode::ResetFpga, &[])
    }

    pub fn reset_ar_device(&mut self) -> Result<()> {
        self.expect_ok(CommandCode::ResetArDevice, &[])
    }

    pub fn configure_packets(&mut self, packets: PacketConfig) -> Result<()> {
        self.expect_ok(CommandCode::ConfigPacketData, &packets.encode())
    }

    pub fn configure_fpga(&mut self) -> Result<()> {
        self.expect_ok(CommandCode::ConfigFpgaGen, &FPGA_GEN_CONFIG)
    }

    pub fn read_fpga_version(&mut self) -> Result<FpgaVersion> {
        let status = self.send_command(CommandCode::ReadFpgaVersion, &[])?;
        Ok(FpgaVersion::from_status(status))
    }

    pub fn start_record(&mut self) -> Result<()> {
        self.expect_ok(CommandCode::RecordStart, &[])
    }

    pub fn stop_record(&mut self) -> Result<()> {
        self.expect_ok(CommandCode::RecordStop, &[])
    }

    /// Run the bring-up sequence and report the firmware version.
    pub fn initialize(&mut self, packets: PacketConfig) -> Result<FpgaVersion> {
        self.system_connect()?;
        self.reset_fpga()?;
        self.configure_packets(packets)?;
        self.configure_fpga()?;
        let version = self.read_fpga_version()?;
        info!(%version, packet_size = packets.packet_size, "capture board initialized");
        Ok(version)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.link.local_addr()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Controller for CaptureBoard {
    fn name(&self) -> &str {
        "dca1000"
    }

    fn arm(&mut self) -> Result<()> {
        self.start_record()?;
        info!("capture board recording");
        Ok(())
    }

    fn disarm(&mut self) -> Result<()> {
        self.stop_record()?;
        info!("capture board stopped");
        Ok(())
    }
}

impl fmt::Debug for CaptureBoard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureBoard")
            .field("local_addr", &self.link.local_addr())
            .field("fpga_addr", &self.link.peer_addr())
            .field("timeout", &self.timeout)
            .finish()
    }
}
