use std::sync::Arc;
use std::time::{Duration, Instant};

use mmwcap_config::SessionConfig;
use mmwcap_runner::{Runner, RunnerState};
use tracing::{info, warn};

use crate::cmd::{parse_duration, CaptureArgs};
use crate::exit::{config_error, runner_error, CliError, CliResult, INTERNAL, SUCCESS, TIMEOUT};
use crate::output::{print_cube, print_points, print_status, OutputFormat};

/// Longest wait on one lane before checking the others and the exit conditions.
const POLL: Duration = Duration::from_millis(50);

pub fn run(args: CaptureArgs, format: OutputFormat) -> CliResult<i32> {
    let duration = args.duration.as_deref().map(parse_duration).transpose()?;
    let idle_timeout = args.timeout.as_deref().map(parse_duration).transpose()?;

    let config =
        SessionConfig::load(&args.config).map_err(|err| config_error("config load failed", err))?;

    let runner = Arc::new(Runner::new());
    runner
        .initialize(&config)
        .map_err(|err| runner_error("initialize failed", err))?;
    install_ctrlc_handler(Arc::clone(&runner))?;
    runner
        .start()
        .map_err(|err| runner_error("start failed", err))?;

    let has_adc = runner.adc_slot().is_some();
    let has_serial = runner.point_slot().is_some();
    let started = Instant::now();
    let mut last_frame = Instant::now();
    let mut printed = 0usize;

    let outcome = loop {
        if runner.state() != RunnerState::Running {
            info!("capture interrupted");
            break Ok(SUCCESS);
        }
        if duration.is_some_and(|limit| started.elapsed() >= limit) {
            break Ok(SUCCESS);
        }

        let mut received = false;
        if has_adc {
            if let Some(cube) = runner.get_next_adc_cube(POLL) {
                print_cube(&cube, format);
                printed += 1;
                received = true;
            }
        }
        if has_serial {
            if let Some(points) = runner.get_next_detected_points(POLL) {
                print_points(&points, format);
                printed += 1;
                received = true;
            }
        }

        if received {
            last_frame = Instant::now();
        } else if let Some(limit) = idle_timeout {
            if last_frame.elapsed() >= limit {
                break Err(CliError::new(
                    TIMEOUT,
                    format!("no frame received for {limit:?}"),
                ));
            }
        }
        if args.frames.is_some_and(|limit| printed >= limit) {
            break Ok(SUCCESS);
        }
    };

    let stopped = runner.stop();
    print_status(&runner.status(), format);
    if let Err(err) = stopped {
        warn!(error = %err, "capture did not stop cleanly");
        if outcome.is_ok() {
            return Err(runner_error("stop failed", err));
        }
    }
    outcome
}

fn install_ctrlc_handler(runner: Arc<Runner>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        if let Err(err) = runner.stop() {
            warn!(error = %err, "stop on interrupt failed");
        }
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
