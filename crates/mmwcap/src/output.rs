use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use mmwcap_frame::{DetectedPoint, DetectedPointTable, SampleCube};
use mmwcap_runner::{LaneStats, RunnerStatus};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// Print any serializable value as one JSON line.
pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

#[derive(Serialize)]
struct CubeOutput {
    lane: &'static str,
    frame: u64,
    num_rx: usize,
    samples_per_chirp: usize,
    chirps_per_frame: usize,
    padded_bytes: usize,
    mean_magnitude: f64,
}

impl CubeOutput {
    fn new(cube: &SampleCube) -> Self {
        let shape = cube.shape();
        let samples = cube.as_slice();
        let total: f64 = samples
            .iter()
            .map(|s| f64::from(s.re).hypot(f64::from(s.im)))
            .sum();
        let mean_magnitude = if samples.is_empty() {
            0.0
        } else {
            total / samples.len() as f64
        };
        Self {
            lane: "adc",
            frame: cube.frame_index(),
            num_rx: shape.num_rx,
            samples_per_chirp: shape.samples_per_chirp,
            chirps_per_frame: shape.chirps_per_frame,
            padded_bytes: cube.padded_bytes(),
            mean_magnitude: (mean_magnitude * 100.0).round() / 100.0,
        }
    }
}

pub fn print_cube(cube: &SampleCube, format: OutputFormat) {
    let out = CubeOutput::new(cube);
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FRAME", "SHAPE", "PADDED", "MEAN |IQ|"])
                .add_row(vec![
                    out.frame.to_string(),
                    format!(
                        "{}x{}x{}",
                        out.num_rx, out.samples_per_chirp, out.chirps_per_frame
                    ),
                    out.padded_bytes.to_string(),
                    format!("{:.2}", out.mean_magnitude),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "adc frame={} shape={}x{}x{} padded={} mean_magnitude={:.2}",
                out.frame,
                out.num_rx,
                out.samples_per_chirp,
                out.chirps_per_frame,
                out.padded_bytes,
                out.mean_magnitude
            );
        }
    }
}

#[derive(Serialize)]
struct PointsOutput<'a> {
    lane: &'static str,
    frame: u32,
    count: usize,
    points: &'a [DetectedPoint],
}

pub fn print_points(table: &DetectedPointTable, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&PointsOutput {
            lane: "serial",
            frame: table.frame_number,
            count: table.len(),
            points: &table.points,
        }),
        OutputFormat::Table => {
            let mut out = Table::new();
            out.load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FRAME", "X", "Y", "Z", "VELOCITY"]);
            for [x, y, z, v] in table.rows() {
                out.add_row(vec![
                    table.frame_number.to_string(),
                    format!("{x:.3}"),
                    format!("{y:.3}"),
                    format!("{z:.3}"),
                    format!("{v:.3}"),
                ]);
            }
            if table.is_empty() {
                out.add_row(vec![
                    table.frame_number.to_string(),
                    "-".to_string(),
                    "-".to_string(),
                    "-".to_string(),
                    "-".to_string(),
                ]);
            }
            println!("{out}");
        }
        OutputFormat::Pretty => {
            println!("serial frame={} points={}", table.frame_number, table.len());
        }
    }
}

pub fn print_status(status: &RunnerStatus, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(status),
        OutputFormat::Table | OutputFormat::Pretty => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![
                    "LANE", "RECEIVED", "FRAMES", "LOST", "REJECTED", "PADDED", "UNREAD",
                ]);
            for lane in &status.lanes {
                let row = match lane.stats {
                    LaneStats::Adc { assembler, slot } => vec![
                        lane.name.to_string(),
                        assembler.packets_received.to_string(),
                        assembler.frames_completed.to_string(),
                        format!(
                            "{} pkts / {} events",
                            assembler.dropped_packets, assembler.drop_events
                        ),
                        (assembler.stale_packets + assembler.malformed_packets).to_string(),
                        assembler.padded_bytes.to_string(),
                        slot.overwritten.to_string(),
                    ],
                    LaneStats::Serial { synchronizer, slot } => vec![
                        lane.name.to_string(),
                        synchronizer.messages_received.to_string(),
                        synchronizer.messages_published.to_string(),
                        format!("{} bytes", synchronizer.discarded_bytes),
                        synchronizer.messages_rejected.to_string(),
                        "-".to_string(),
                        slot.overwritten.to_string(),
                    ],
                };
                table.add_row(row);
            }
            println!("Session {}:", status.state);
            println!("{table}");
        }
    }
}
