//! Diagnostics for the `mmwcap` binary.
//!
//! Everything goes to stderr so that capture output on stdout stays
//! machine-readable. Worker threads are named after their lane
//! (`mmwcap-adc`, `mmwcap-serial`), and that name is printed with every
//! event, so loss warnings can be told apart from serial rejections.

use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Environment variable holding a filter directive that overrides `--log-level`,
/// e.g. `MMWCAP_LOG=mmwcap_frame=trace,info`.
pub const LOG_ENV: &str = "MMWCAP_LOG";

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    /// One line per event: level, thread name, message, fields.
    Text,
    /// One JSON object per event, for log shippers.
    Json,
}

/// Verbosity for `--log-level`.
///
/// `warn` shows datagram loss and rejected serial messages; `debug` adds
/// per-frame padding; `trace` logs every datagram.
#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

/// Build the event filter from an optional override directive.
///
/// An override that fails to parse is ignored in favour of `level`.
fn build_filter(level: LogLevel, directive: Option<&str>) -> EnvFilter {
    directive
        .and_then(|directive| EnvFilter::try_new(directive).ok())
        .unwrap_or_else(|| EnvFilter::default().add_directive(LevelFilter::from(level).into()))
}

pub fn init_logging(format: LogFormat, level: LogLevel) {
    let directive = std::env::var(LOG_ENV).ok();
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(build_filter(level, directive.as_deref()))
        .with_ansi(false)
        .with_target(false)
        .with_thread_names(true);

    match format {
        LogFormat::Text => {
            let _ = builder.try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().try_init();
        }
    }
}
