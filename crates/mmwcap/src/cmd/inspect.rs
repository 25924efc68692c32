use serde::Serialize;

use mmwcap_config::SessionConfig;

use crate::cmd::InspectArgs;
use crate::exit::{config_error, CliResult, SUCCESS};
use crate::output::{print_json, OutputFormat};

#[derive(Serialize)]
struct Transports {
    dca1000: bool,
    serial: bool,
    sensor_cli: bool,
}

#[derive(Serialize)]
struct InspectOutput {
    config: String,
    profile: String,
    sdk_major_version: u32,
    layout: String,
    num_rx: usize,
    samples_per_chirp: usize,
    chirps_per_frame: usize,
    bytes_per_frame: usize,
    frame_rate_hz: Option<f32>,
    profile_commands: usize,
    transports: Transports,
}

pub fn run(args: InspectArgs, format: OutputFormat) -> CliResult<i32> {
    let session =
        SessionConfig::load(&args.config).map_err(|err| config_error("config load failed", err))?;

    let out = InspectOutput {
        config: args.config.display().to_string(),
        profile: session.system.radar_config_path.display().to_string(),
        sdk_major_version: session.system.sdk_major_version,
        layout: session.layout.to_string(),
        num_rx: session.shape.num_rx,
        samples_per_chirp: session.shape.samples_per_chirp,
        chirps_per_frame: session.shape.chirps_per_frame,
        bytes_per_frame: session.bytes_per_frame(),
        frame_rate_hz: session.profile.frame_rate_hz(),
        profile_commands: session.profile.command_lines().len(),
        transports: Transports {
            dca1000: session.dca1000_enabled(),
            serial: session.serial_enabled(),
            sensor_cli: session.system.sensor_cli.enabled,
        },
    };

    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("Session:");
            println!("  Config:           {}", out.config);
            println!("  Profile:          {}", out.profile);
            println!(
                "  Layout:           {} (SDK {})",
                out.layout, out.sdk_major_version
            );
            println!(
                "  Frame:            {} rx x {} samples x {} chirps",
                out.num_rx, out.samples_per_chirp, out.chirps_per_frame
            );
            println!("  Bytes per frame:  {}", out.bytes_per_frame);
            match out.frame_rate_hz {
                Some(hz) => println!("  Frame rate:       {hz:.2} Hz"),
                None => println!("  Frame rate:       unknown"),
            }
            println!("  Profile commands: {}", out.profile_commands);
            println!(
                "  Transports:       dca1000={} serial={} sensor_cli={}",
                out.transports.dca1000, out.transports.serial, out.transports.sensor_cli
            );
        }
    }
    Ok(SUCCESS)
}
