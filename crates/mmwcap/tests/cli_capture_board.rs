//! CLI runs against a simulated capture board on a second loopback address.
#![cfg(all(target_os = "linux", feature = "cli"))]

use std::net::{SocketAddr, UdpSocket};
use std::path::PathBuf;
use std::process::Command;
use std::thread;
use std::time::Duration;

const FPGA_IP: &str = "127.0.0.2";
const SYSTEM_IP: &str = "127.0.0.1";

/// One rx, eight samples, one chirp: 32-byte frames.
const PROFILE: &str = "\
channelCfg 1 1 0
profileCfg 0 77 267 7 57.14 0 0 70 1 8 5209 0 0 30
chirpCfg 0 0 0 0 0 0 0 1
frameCfg 0 0 1 0 100 1 0
";

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/mmwcap-board-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn free_udp_port(ip: &str) -> u16 {
    UdpSocket::bind((ip, 0))
        .and_then(|s| s.local_addr())
        .map(|addr| addr.port())
        .expect("ephemeral port should be available")
}

/// Answers every command; streams `frames` complete frames after RECORD_START
/// and exits after RECORD_STOP or `max_commands` commands.
fn simulated_board(
    cmd_port: u16,
    data_addr: Option<SocketAddr>,
    frames: usize,
    max_commands: usize,
) -> thread::JoinHandle<Vec<u16>> {
    let socket = UdpSocket::bind((FPGA_IP, cmd_port)).expect("board should bind");
    socket
        .set_read_timeout(Some(Duration::from_secs(10)))
        .expect("board timeout should set");

    thread::spawn(move || {
        let data = UdpSocket::bind((FPGA_IP, 0)).expect("board data socket should bind");
        let mut codes = Vec::new();
        let mut buf = [0u8; 600];
        while codes.len() < max_commands {
            let Ok((len, from)) = socket.recv_from(&mut buf) else {
                break;
            };
            assert!(len >= 8);
            let code = u16::from_le_bytes([buf[2], buf[3]]);
            codes.push(code);
            let status: u16 = if code == 0x0E { 3 | (5 << 7) } else { 0 };

            let mut reply = Vec::with_capacity(8);
            reply.extend_from_slice(&0xA55Au16.to_le_bytes());
            reply.extend_from_slice(&code.to_le_bytes());
            reply.extend_from_slice(&status.to_le_bytes());
            reply.extend_from_slice(&0xEEAAu16.to_le_bytes());
            socket.send_to(&reply, from).expect("reply should send");

            if code == 0x05 {
                if let Some(data_addr) = data_addr {
                    for frame in 0..frames {
                        let mut datagram = Vec::new();
                        datagram.extend_from_slice(&(frame as u32 + 1).to_le_bytes());
                        datagram.extend_from_slice(&((frame * 32) as u64).to_le_bytes()[..6]);
                        datagram.extend((0..32u8).map(|b| b.wrapping_add(frame as u8)));
                        data.send_to(&datagram, data_addr)
                            .expect("datagram should send");
                        thread::sleep(Duration::from_millis(20));
                    }
                }
            }
            if code == 0x06 {
                break;
            }
        }
        codes
    })
}

fn write_config(dir: &std::path::Path, cmd_port: u16, data_port: u16) -> PathBuf {
    std::fs::write(dir.join("profile.cfg"), PROFILE).expect("profile should be writable");
    let path = dir.join("system.json");
    let json = format!(
        r#"{{
            "radar_config_path": "profile.cfg",
            "sdk_major_version": 3,
            "sensor_cli": {{ "enabled": false }},
            "dca1000_streaming": {{
                "enabled": true,
                "fpga_ip": "{FPGA_IP}",
                "system_ip": "{SYSTEM_IP}",
                "cmd_port": {cmd_port},
                "data_port": {data_port},
                "command_timeout_ms": 2000,
                "recv_timeout_ms": 50
            }}
        }}"#
    );
    std::fs::write(&path, json).expect("config should be writable");
    path
}

#[test]
fn fpga_version_reports_board_firmware() {
    let dir = unique_temp_dir("fpga-version");
    let cmd_port = free_udp_port(FPGA_IP);
    let board = simulated_board(cmd_port, None, 0, 5);
    let config = write_config(&dir, cmd_port, free_udp_port(SYSTEM_IP));

    let out = Command::new(env!("CARGO_BIN_EXE_mmwcap"))
        .args(["--log-level", "error", "--format", "json", "fpga-version"])
        .arg(&config)
        .output()
        .expect("mmwcap should run");
    assert!(
        out.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&out.stderr)
    );

    let json: serde_json::Value =
        serde_json::from_slice(&out.stdout).expect("fpga-version should print JSON");
    assert_eq!(json["version"], "3.5");
    assert_eq!(json["major"], 3);
    assert_eq!(json["minor"], 5);

    let codes = board.join().expect("board thread should finish");
    assert_eq!(codes, vec![0x09, 0x01, 0x0B, 0x03, 0x0E]);
}

#[test]
fn capture_prints_frames_and_stops_board() {
    let dir = unique_temp_dir("capture");
    let cmd_port = free_udp_port(FPGA_IP);
    let data_port = free_udp_port(SYSTEM_IP);
    let data_addr: SocketAddr = format!("{SYSTEM_IP}:{data_port}")
        .parse()
        .expect("data address should parse");
    let board = simulated_board(cmd_port, Some(data_addr), 3, 7);
    let config = write_config(&dir, cmd_port, data_port);

    let out = Command::new(env!("CARGO_BIN_EXE_mmwcap"))
        .args(["--log-level", "error", "--format", "json", "capture"])
        .arg(&config)
        .args(["--frames", "2", "--timeout", "5s"])
        .output()
        .expect("mmwcap should run");
    assert!(
        out.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&out.stderr)
    );

    let stdout = String::from_utf8_lossy(&out.stdout);
    let lines: Vec<serde_json::Value> = stdout
        .lines()
        .map(|line| serde_json::from_str(line).expect("each line should be JSON"))
        .collect();
    let frames: Vec<&serde_json::Value> = lines.iter().filter(|v| v["lane"] == "adc").collect();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0]["samples_per_chirp"], 8);
    assert_eq!(frames[0]["padded_bytes"], 0);

    let status = lines.last().expect("final status line");
    assert_eq!(status["state"], "stopped");
    assert_eq!(status["lanes"][0]["stats"]["kind"], "adc");

    let codes = board.join().expect("board thread should finish");
    assert_eq!(codes.last(), Some(&0x06));
}
