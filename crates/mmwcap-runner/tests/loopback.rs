//! End-to-end capture over loopback UDP with a simulated capture board.

use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::{Buf, BufMut, BytesMut};
use mmwcap_frame::{
    encode_cube, encode_datagram, CubeShape, DatagramHeader, FrameAssembler, LatestSlot, Sample,
    SampleCube, SampleLayout,
};
use mmwcap_runner::capture_board::{COMMAND_FOOTER, COMMAND_HEADER};
use mmwcap_runner::{CaptureBoard, CommandCode, Lane, LaneStats, PacketConfig, Runner};
use mmwcap_transport::UdpLink;

const PAYLOAD: usize = 64;

fn loopback() -> SocketAddr {
    "127.0.0.1:0"
        .parse::<SocketAddr>()
        .expect("loopback address should parse")
}

fn reply(socket: &UdpSocket, to: SocketAddr, code: u16, status: u16) {
    let mut out = BytesMut::new();
    out.put_u16_le(COMMAND_HEADER);
    out.put_u16_le(code);
    out.put_u16_le(status);
    out.put_u16_le(COMMAND_FOOTER);
    socket.send_to(&out, to).expect("reply should send");
}

/// Answers every command with success. On RECORD_START it streams `stream`
/// to `data_addr` in `PAYLOAD`-byte datagrams, skipping sequence `lost`.
/// Returns the command codes seen, ending with RECORD_STOP.
fn simulated_board(
    data_addr: SocketAddr,
    stream: Vec<u8>,
    lost: u32,
) -> (SocketAddr, thread::JoinHandle<Vec<u16>>) {
    let socket = UdpSocket::bind(loopback()).expect("board socket should bind");
    socket
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("board timeout should set");
    let addr = socket.local_addr().expect("board address");

    let handle = thread::spawn(move || {
        let data = UdpSocket::bind(loopback()).expect("board data socket should bind");
        let mut codes = Vec::new();
        let mut buf = [0u8; 600];
        loop {
            let Ok((len, from)) = socket.recv_from(&mut buf) else {
                break;
            };
            let mut req = &buf[..len];
            req.advance(2);
            let code = req.get_u16_le();
            codes.push(code);
            let status = if code == CommandCode::ReadFpgaVersion.as_u16() {
                2 | (9 << 7)
            } else {
                0
            };
            reply(&socket, from, code, status);

            if code == CommandCode::RecordStart.as_u16() {
                for (i, chunk) in stream.chunks(PAYLOAD).enumerate() {
                    let sequence = i as u32 + 1;
                    if sequence == lost {
                        continue;
                    }
                    let mut datagram = BytesMut::new();
                    encode_datagram(
                        DatagramHeader {
                            sequence,
                            byte_count: (i * PAYLOAD) as u64,
                        },
                        chunk,
                        &mut datagram,
                    );
                    data.send_to(&datagram, data_addr)
                        .expect("datagram should send");
                }
            }
            if code == CommandCode::RecordStop.as_u16() {
                break;
            }
        }
        codes
    });
    (addr, handle)
}

#[test]
fn capture_reassembles_frames_across_a_lost_datagram() {
    let shape = CubeShape::new(4, 8, 2).expect("shape should be valid");
    let layout = SampleLayout::NonInterleaved;
    let source = SampleCube::from_fn(shape, |rx, sample, chirp| {
        Sample::new((rx * 100 + sample * 10 + chirp) as i16, -((rx + sample) as i16))
    });
    let frame = encode_cube(&source, layout).expect("cube should encode");
    assert_eq!(frame.len(), 256);

    // Two frames; the second datagram of frame 1 is lost.
    let stream = [frame.clone(), frame].concat();
    let data = UdpLink::bind(loopback(), Duration::from_millis(20)).expect("data link should bind");
    let (board_addr, board) = simulated_board(data.local_addr(), stream, 6);

    let mut controller = CaptureBoard::connect(loopback(), board_addr, Duration::from_secs(2))
        .expect("command link should bind");
    let version = controller
        .initialize(PacketConfig::default())
        .expect("board should initialize");
    assert_eq!(version.to_string(), "2.9");

    let assembler = FrameAssembler::new(data, shape, layout, Arc::new(LatestSlot::new()))
        .expect("assembler should accept shape");
    let runner = Runner::new();
    runner
        .initialize_with(vec![Lane::adc(assembler).with_controller(controller)], None)
        .expect("runner should initialize");
    runner.start().expect("runner should start");

    let deadline = Instant::now() + Duration::from_secs(3);
    let mut last = None;
    while Instant::now() < deadline {
        if let Some(cube) = runner.get_next_adc_cube(Duration::from_millis(100)) {
            let done = cube.frame_index() == 1;
            last = Some(cube);
            if done {
                break;
            }
        }
    }
    let cube = last.expect("a frame should arrive");
    assert_eq!(cube.frame_index(), 1);
    assert_eq!(cube.padded_bytes(), PAYLOAD);
    // The first datagram of the frame survived.
    assert_eq!(cube.get(0, 0, 0), source.get(0, 0, 0));
    assert_eq!(cube.get(0, 1, 0), source.get(0, 1, 0));

    let status = runner.status();
    match status.lanes[0].stats {
        LaneStats::Adc { assembler, .. } => {
            assert_eq!(assembler.frames_completed, 2);
            assert_eq!(assembler.drop_events, 1);
            assert_eq!(assembler.dropped_packets, 1);
            assert_eq!(assembler.padded_bytes, PAYLOAD as u64);
        }
        other => panic!("unexpected lane stats: {other:?}"),
    }

    runner.stop().expect("runner should stop");
    let codes = board.join().expect("board thread should finish");
    assert_eq!(codes, vec![0x09, 0x01, 0x0B, 0x03, 0x0E, 0x05, 0x06]);
}
