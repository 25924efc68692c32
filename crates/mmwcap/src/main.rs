mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "mmwcap", version, about = "mmWave radar capture CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr). Overridden by MMWCAP_LOG.
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_capture_subcommand() {
        let cli = Cli::try_parse_from([
            "mmwcap",
            "capture",
            "/etc/mmwcap/system.json",
            "--frames",
            "10",
            "--timeout",
            "2s",
        ])
        .expect("capture args should parse");

        match cli.command {
            Command::Capture(args) => {
                assert_eq!(args.frames, Some(10));
                assert_eq!(args.timeout.as_deref(), Some("2s"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "mmwcap",
            "inspect",
            "system.json",
            "--format",
            "json",
            "--log-level",
            "debug",
        ])
        .expect("inspect args should parse");
        assert!(matches!(cli.command, Command::Inspect(_)));
        assert!(matches!(cli.format, Some(OutputFormat::Json)));
        assert!(matches!(cli.log_level, LogLevel::Debug));
    }

    #[test]
    fn rejects_missing_config_path() {
        let err = Cli::try_parse_from(["mmwcap", "fpga-version"])
            .expect_err("config path is required");
        assert_eq!(
            err.kind(),
            clap::error::ErrorKind::MissingRequiredArgument
        );
    }
}
