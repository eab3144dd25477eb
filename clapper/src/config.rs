/// Clapper configuration
///
/// All tunables are fixed once before `setup()`. Validation happens here, in the
/// configuration layer, so the per-sample path never has to re-check them.

use crate::envelope::EnvelopeConfig;
use crate::sequencer::TimingWindow;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Environment variable pointing at a JSON config file
pub const CONFIG_PATH_ENV: &str = "CLAPPER_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {var}: {value:?}")]
    Env { var: String, value: String },
}

/// Tunables for envelope detection and clap sequencing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClapperConfig {
    /// Sample rate of the incoming stream in Hz
    pub sample_rate: u32,

    /// DC offset smoothing factor; `None` rectifies the raw signal
    pub dc_offset_factor: Option<f32>,

    /// Per-sample envelope decay (0.0 - 1.0, exclusive)
    pub envelope_decay_factor: f32,

    /// Minimum envelope level for an onset
    pub onset_threshold: i16,

    /// Minimum sample-to-sample envelope growth for an onset (> 1.0)
    pub onset_ratio_threshold: f32,

    /// Time allowed for a transient to decay after its onset
    pub transient_timeout_ms: u64,

    /// Fraction of the transient peak the envelope must fall below (0.0 - 1.0, exclusive)
    pub transient_decay_threshold_factor: f32,

    /// Minimum gap between first and second clap; `None` uses a single window
    pub time_window_min_ms: Option<u64>,

    /// Silence after the last clap that ends a sequence
    pub time_window_max_ms: u64,

    /// Samples pulled from the microphone per processed block
    pub block_size: usize,
}

impl Default for ClapperConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            dc_offset_factor: Some(0.9999),
            envelope_decay_factor: 0.999,
            onset_threshold: 1000,
            onset_ratio_threshold: 1.58,
            transient_timeout_ms: 100,
            transient_decay_threshold_factor: 0.25,
            time_window_min_ms: Some(250),
            time_window_max_ms: 800,
            block_size: 512, // 32ms at 16kHz
        }
    }
}

fn open_unit(value: f32) -> bool {
    value > 0.0 && value < 1.0
}

impl ClapperConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::Invalid(
                "sample_rate must be greater than 0".to_string()
            ));
        }

        if let Some(factor) = self.dc_offset_factor {
            if !open_unit(factor) {
                return Err(ConfigError::Invalid(
                    "dc_offset_factor must be between 0.0 and 1.0".to_string()
                ));
            }
        }

        if !open_unit(self.envelope_decay_factor) {
            return Err(ConfigError::Invalid(
                "envelope_decay_factor must be between 0.0 and 1.0".to_string()
            ));
        }

        if self.onset_threshold <= 0 {
            return Err(ConfigError::Invalid(
                "onset_threshold must be greater than 0".to_string()
            ));
        }

        if !(self.onset_ratio_threshold > 1.0) {
            return Err(ConfigError::Invalid(
                "onset_ratio_threshold must be greater than 1.0".to_string()
            ));
        }

        if !open_unit(self.transient_decay_threshold_factor) {
            return Err(ConfigError::Invalid(
                "transient_decay_threshold_factor must be between 0.0 and 1.0".to_string()
            ));
        }

        if let Some(min) = self.time_window_min_ms {
            if min > self.time_window_max_ms {
                return Err(ConfigError::Invalid(format!(
                    "time_window_min_ms ({}) must not exceed time_window_max_ms ({})",
                    min, self.time_window_max_ms
                )));
            }
        }

        if self.block_size == 0 {
            return Err(ConfigError::Invalid(
                "block_size must be greater than 0".to_string()
            ));
        }

        Ok(())
    }

    /// Parse a JSON document; missing fields fall back to defaults
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a JSON config file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!("Loading config from {}", path.display());
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Load configuration from `CLAPPER_CONFIG` (if set) and per-field overrides
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable lookup
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup(CONFIG_PATH_ENV) {
            Some(path) => {
                info!("Using config file {}", path);
                Self::from_file(path)?
            }
            None => Self::default(),
        };

        if let Some(v) = parse_var(&lookup, "CLAPPER_SAMPLE_RATE")? {
            config.sample_rate = v;
        }
        if let Some(v) = parse_var(&lookup, "CLAPPER_ONSET_THRESHOLD")? {
            config.onset_threshold = v;
        }
        if let Some(v) = parse_var(&lookup, "CLAPPER_ONSET_RATIO_THRESHOLD")? {
            config.onset_ratio_threshold = v;
        }
        if let Some(v) = parse_var(&lookup, "CLAPPER_ENVELOPE_DECAY_FACTOR")? {
            config.envelope_decay_factor = v;
        }
        if let Some(v) = parse_var(&lookup, "CLAPPER_TIME_WINDOW_MIN_MS")? {
            config.time_window_min_ms = Some(v);
        }
        if let Some(v) = parse_var(&lookup, "CLAPPER_TIME_WINDOW_MAX_MS")? {
            config.time_window_max_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "CLAPPER_TRANSIENT_TIMEOUT_MS")? {
            config.transient_timeout_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "CLAPPER_TRANSIENT_DECAY_THRESHOLD_FACTOR")? {
            config.transient_decay_threshold_factor = v;
        }
        if let Some(v) = parse_var(&lookup, "CLAPPER_BLOCK_SIZE")? {
            config.block_size = v;
        }

        // "off" disables DC removal
        match lookup("CLAPPER_DC_OFFSET_FACTOR") {
            Some(value) if value.trim().eq_ignore_ascii_case("off") => config.dc_offset_factor = None,
            Some(_) => config.dc_offset_factor = parse_var(&lookup, "CLAPPER_DC_OFFSET_FACTOR")?,
            None => {}
        }

        Ok(config)
    }

    /// Detector tunables derived from this config
    pub fn envelope_config(&self) -> EnvelopeConfig {
        EnvelopeConfig {
            sample_rate: self.sample_rate,
            dc_offset_factor: self.dc_offset_factor,
            envelope_decay_factor: self.envelope_decay_factor,
            onset_threshold: self.onset_threshold,
            onset_ratio_threshold: self.onset_ratio_threshold,
            transient_timeout: Duration::from_millis(self.transient_timeout_ms),
            transient_decay_threshold_factor: self.transient_decay_threshold_factor,
        }
    }

    /// Sequencer timing derived from this config
    pub fn timing_window(&self) -> TimingWindow {
        let max = Duration::from_millis(self.time_window_max_ms);
        match self.time_window_min_ms {
            Some(min) => TimingWindow::Range {
                min: Duration::from_millis(min),
                max,
            },
            None => TimingWindow::Single(max),
        }
    }
}

fn parse_var<F, T>(lookup: &F, var: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(var) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Env {
                var: var.to_string(),
                value,
            }),
        None => Ok(None),
    }
}
