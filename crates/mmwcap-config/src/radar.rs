use std::path::Path;
use std::str::FromStr;

use mmwcap_frame::CubeShape;
use serde::Serialize;
use tracing::debug;

use crate::error::{ConfigError, Result};
use crate::loader::{read_config_file, LoadLimits};

/// Receive channels assumed when the profile has no `channelCfg`.
pub const DEFAULT_RX_CHANNELS: usize = 4;

/// Command that starts the sensor; withheld from the startup sequence.
pub const SENSOR_START: &str = "sensorStart";

/// Fields of `profileCfg` that shape the capture.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProfileCfg {
    pub start_freq_ghz: f32,
    pub idle_time_us: f32,
    pub ramp_end_time_us: f32,
    pub adc_samples: usize,
    pub sample_rate_ksps: u32,
}

/// One `chirpCfg` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChirpCfg {
    pub start_idx: u32,
    pub end_idx: u32,
}

/// Fields of `frameCfg` that shape the capture.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FrameCfg {
    pub chirp_start_idx: u32,
    pub chirp_end_idx: u32,
    pub loops: u32,
    pub frame_period_ms: f32,
}

/// A parsed sensor profile (`.cfg`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RadarProfile {
    pub profile: ProfileCfg,
    pub chirps: Vec<ChirpCfg>,
    pub frame: FrameCfg,
    /// `channelCfg` receive antenna bitmask, if present.
    pub rx_mask: Option<u32>,
    /// Lines to send to the sensor CLI, in file order.
    #[serde(skip)]
    commands: Vec<String>,
}

impl RadarProfile {
    /// Read and parse a profile file.
    pub fn load(path: &Path, limits: LoadLimits) -> Result<Self> {
        let text = read_config_file(path, limits)?;
        let profile = Self::parse(&text)?;
        debug!(path = %path.display(), commands = profile.commands.len(), "loaded sensor profile");
        Ok(profile)
    }

    /// Parse profile text.
    ///
    /// Blank lines and lines starting with `%` or `#` are comments. Every
    /// other line becomes a sensor command, except `sensorStart`.
    pub fn parse(text: &str) -> Result<Self> {
        let mut profile = None;
        let mut chirps = Vec::new();
        let mut frame = None;
        let mut rx_mask = None;
        let mut commands = Vec::new();

        for (index, raw) in text.lines().enumerate() {
            let line_no = index + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('%') || line.starts_with('#') {
                continue;
            }

            let values: Vec<&str> = line.split_whitespace().collect();
            match values[0] {
                "profileCfg" => profile = Some(parse_profile(&values, line_no)?),
                "chirpCfg" => chirps.push(ChirpCfg {
                    start_idx: field(&values, 1, line_no)?,
                    end_idx: field(&values, 2, line_no)?,
                }),
                "frameCfg" => frame = Some(parse_frame(&values, line_no)?),
                "channelCfg" => rx_mask = Some(field(&values, 1, line_no)?),
                _ => {}
            }

            if values[0] != SENSOR_START {
                commands.push(values.join(" "));
            }
        }

        let profile = profile.ok_or(ConfigError::MissingCommand("profileCfg"))?;
        let frame = frame.ok_or(ConfigError::MissingCommand("frameCfg"))?;
        if frame.chirp_end_idx < frame.chirp_start_idx {
            return Err(ConfigError::Invalid(format!(
                "frameCfg chirp end index {} precedes start index {}",
                frame.chirp_end_idx, frame.chirp_start_idx
            )));
        }

        Ok(Self {
            profile,
            chirps,
            frame,
            rx_mask,
            commands,
        })
    }

    pub fn samples_per_chirp(&self) -> usize {
        self.profile.adc_samples
    }

    /// Chirps in one frame: the chirp index span times the loop count.
    pub fn chirps_per_frame(&self) -> usize {
        let span = (self.frame.chirp_end_idx - self.frame.chirp_start_idx + 1) as usize;
        span * self.frame.loops as usize
    }

    /// Enabled receive antennas, from the `channelCfg` mask.
    pub fn num_rx_channels(&self) -> usize {
        match self.rx_mask {
            Some(mask) if mask != 0 => mask.count_ones() as usize,
            _ => DEFAULT_RX_CHANNELS,
        }
    }

    /// Frame geometry, with an optional receive channel override.
    pub fn cube_shape(&self, rx_override: Option<usize>) -> Result<CubeShape> {
        let rx = rx_override.unwrap_or_else(|| self.num_rx_channels());
        Ok(CubeShape::new(
            rx,
            self.samples_per_chirp(),
            self.chirps_per_frame(),
        )?)
    }

    /// Frames per second implied by the frame period.
    pub fn frame_rate_hz(&self) -> Option<f32> {
        (self.frame.frame_period_ms > 0.0).then(|| 1000.0 / self.frame.frame_period_ms)
    }

    /// Lines to replay to the sensor CLI, without `sensorStart`.
    pub fn command_lines(&self) -> &[String] {
        &self.commands
    }
}

fn parse_profile(values: &[&str], line: usize) -> Result<ProfileCfg> {
    Ok(ProfileCfg {
        start_freq_ghz: field(values, 2, line)?,
        idle_time_us: field(values, 3, line)?,
        ramp_end_time_us: field(values, 5, line)?,
        adc_samples: field(values, 10, line)?,
        sample_rate_ksps: field(values, 11, line)?,
    })
}

fn parse_frame(values: &[&str], line: usize) -> Result<FrameCfg> {
    Ok(FrameCfg {
        chirp_start_idx: field(values, 1, line)?,
        chirp_end_idx: field(values, 2, line)?,
        loops: field(values, 3, line)?,
        frame_period_ms: field(values, 5, line)?,
    })
}

fn field<T: FromStr>(values: &[&str], index: usize, line: usize) -> Result<T> {
    let raw = values.get(index).ok_or_else(|| ConfigError::Parse {
        line,
        message: format!("`{}` needs at least {} arguments", values[0], index),
    })?;
    raw.parse().map_err(|_| ConfigError::Parse {
        line,
        message: format!("`{}` argument {index} is not valid: {raw:?}", values[0]),
    })
}
