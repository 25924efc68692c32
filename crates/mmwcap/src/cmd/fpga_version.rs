use serde::Serialize;

use mmwcap_config::{LoadLimits, SystemConfig};
use mmwcap_runner::{open_capture_board, PacketConfig};

use crate::cmd::FpgaVersionArgs;
use crate::exit::{config_error, runner_error, CliResult, SUCCESS};
use crate::output::{print_json, OutputFormat};

#[derive(Serialize)]
struct FpgaVersionOutput {
    fpga_addr: String,
    version: String,
    major: u8,
    minor: u8,
}

pub fn run(args: FpgaVersionArgs, format: OutputFormat) -> CliResult<i32> {
    let system = SystemConfig::load(&args.config, LoadLimits::default())
        .map_err(|err| config_error("config load failed", err))?;
    let dca = &system.dca1000_streaming;

    let mut board =
        open_capture_board(dca).map_err(|err| runner_error("command port bind failed", err))?;
    let version = board
        .initialize(PacketConfig {
            packet_size: dca.packet_size,
            delay_us: dca.packet_delay_us,
        })
        .map_err(|err| runner_error("capture board initialization failed", err))?;

    let out = FpgaVersionOutput {
        fpga_addr: dca.fpga_cmd_addr().to_string(),
        version: version.to_string(),
        major: version.major,
        minor: version.minor,
    };
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("FPGA {}: version {}", out.fpga_addr, out.version);
        }
    }
    Ok(SUCCESS)
}
