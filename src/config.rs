//! Scheduler configuration.
//!
//! This module provides:
//! - [`SchedulerConfig`] with builder-style setters and sensible defaults
//! - Validation for the guardrail invariants
//! - Environment variable overrides (`FRAMEDAG_*`)
//!
//! Note: parsing is intentionally minimal and deterministic; there is no
//! config-file layer because a frame scheduler is always embedded in a host
//! program that owns its own configuration story.

use core::fmt;
use std::path::PathBuf;

use crate::platform;

/// Microseconds in one second; a frame rate of `R` yields frames of
/// `MICROS_PER_SECOND / R`.
pub const MICROS_PER_SECOND: u64 = 1_000_000;

/// Default target frame length: 60 frames per second.
pub const DEFAULT_FRAME_LENGTH_MICROS: u64 = MICROS_PER_SECOND / 60;

/// Initial timing-cost allowance seeded into the frame pacer, in
/// microseconds. Covers the fixed cost of the bookkeeping between the end of
/// the parallel phase and the pacing sleep.
pub const DEFAULT_TIMING_ALLOWANCE_MICROS: i64 = 125;

/// Configuration for a [`FrameScheduler`](crate::FrameScheduler).
///
/// # Example
///
/// ```
/// use framedag::SchedulerConfig;
///
/// let config = SchedulerConfig::default().thread_count(4).frame_rate(30);
/// assert!(config.validate().is_ok());
/// assert_eq!(config.frame_length_micros, 1_000_000 / 30);
/// ```
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of threads used in the parallel phase, including the caller's
    /// thread. Defaults to the logical CPU count.
    pub thread_count: usize,
    /// Target frame length in microseconds. Zero disables pacing entirely.
    pub frame_length_micros: u64,
    /// Whether units write `<WorkunitStart/>` / `<WorkunitEnd/>` entries into
    /// their thread's log buffer.
    pub log_work_units: bool,
    /// File the log aggregator writes to when the scheduler is built without
    /// an explicit sink. `None` sends aggregated logs to standard output.
    pub log_path: Option<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            thread_count: platform::cpu_count(),
            frame_length_micros: DEFAULT_FRAME_LENGTH_MICROS,
            log_work_units: true,
            log_path: None,
        }
    }
}

impl SchedulerConfig {
    /// Set the number of threads for the parallel phase.
    #[must_use]
    pub fn thread_count(mut self, count: usize) -> Self {
        self.thread_count = count;
        self
    }

    /// Set the target frame rate in frames per second. Zero disables pacing.
    #[must_use]
    pub fn frame_rate(mut self, rate: u64) -> Self {
        self.frame_length_micros = if rate == 0 { 0 } else { MICROS_PER_SECOND / rate };
        self
    }

    /// Set the target frame length directly, in microseconds. Zero disables
    /// pacing.
    #[must_use]
    pub fn frame_length_micros(mut self, micros: u64) -> Self {
        self.frame_length_micros = micros;
        self
    }

    /// Enable or disable per-unit log entries.
    #[must_use]
    pub fn log_work_units(mut self, enabled: bool) -> Self {
        self.log_work_units = enabled;
        self
    }

    /// Send aggregated logs to the given file instead of standard output.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Builds a configuration from defaults plus `FRAMEDAG_*` environment
    /// overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Applies `FRAMEDAG_*` environment overrides to this configuration.
    ///
    /// Recognized keys: `FRAMEDAG_THREAD_COUNT`, `FRAMEDAG_FRAME_RATE`,
    /// `FRAMEDAG_FRAME_LENGTH_US`, `FRAMEDAG_LOG_WORKUNITS`,
    /// `FRAMEDAG_LOG_PATH`. Frame rate and frame length are applied in that
    /// order when both are set, so an explicit length wins.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(value) = std::env::var("FRAMEDAG_THREAD_COUNT") {
            self.thread_count = parse_usize(&value, "FRAMEDAG_THREAD_COUNT")?;
        }
        if let Ok(value) = std::env::var("FRAMEDAG_FRAME_RATE") {
            let rate = parse_u64(&value, "FRAMEDAG_FRAME_RATE")?;
            self.frame_length_micros = if rate == 0 { 0 } else { MICROS_PER_SECOND / rate };
        }
        if let Ok(value) = std::env::var("FRAMEDAG_FRAME_LENGTH_US") {
            self.frame_length_micros = parse_u64(&value, "FRAMEDAG_FRAME_LENGTH_US")?;
        }
        if let Ok(value) = std::env::var("FRAMEDAG_LOG_WORKUNITS") {
            self.log_work_units = parse_bool(&value, "FRAMEDAG_LOG_WORKUNITS")?;
        }
        if let Ok(value) = std::env::var("FRAMEDAG_LOG_PATH") {
            self.log_path = Some(PathBuf::from(value));
        }
        Ok(())
    }

    /// Validates the configuration for basic sanity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.thread_count == 0 {
            return Err(ConfigError::ZeroThreadCount);
        }
        if self.frame_length_micros > MICROS_PER_SECOND {
            return Err(ConfigError::FrameLengthTooLong(self.frame_length_micros));
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The parallel phase needs at least the caller's thread.
    ZeroThreadCount,
    /// Frames longer than one second defeat the pacing clamp.
    FrameLengthTooLong(u64),
    /// An environment override did not parse.
    Parse(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroThreadCount => write!(f, "thread_count must be > 0"),
            Self::FrameLengthTooLong(micros) => {
                write!(f, "frame_length_micros out of range: {micros}")
            }
            Self::Parse(detail) => write!(f, "config parse error: {detail}"),
        }
    }
}

impl std::error::Error for ConfigError {}

fn parse_u64(value: &str, key: &str) -> Result<u64, ConfigError> {
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::Parse(format!("invalid u64 for {key}: {value}")))
}

fn parse_usize(value: &str, key: &str) -> Result<usize, ConfigError> {
    value
        .parse::<usize>()
        .map_err(|_| ConfigError::Parse(format!("invalid usize for {key}: {value}")))
}

fn parse_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::Parse(format!("invalid bool for {key}: {value}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_valid() {
        let config = SchedulerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.frame_length_micros, DEFAULT_FRAME_LENGTH_MICROS);
        assert!(config.log_work_units);
    }

    #[test]
    fn frame_rate_derives_length() {
        let config = SchedulerConfig::default().frame_rate(100);
        assert_eq!(config.frame_length_micros, 10_000);

        let config = SchedulerConfig::default().frame_rate(0);
        assert_eq!(config.frame_length_micros, 0);
    }

    #[test]
    fn builder_chain() {
        let config = SchedulerConfig::default()
            .thread_count(2)
            .frame_length_micros(5_000)
            .log_work_units(false)
            .log_path("frame.log");
        assert_eq!(config.thread_count, 2);
        assert_eq!(config.frame_length_micros, 5_000);
        assert!(!config.log_work_units);
        assert_eq!(config.log_path.as_deref(), Some(std::path::Path::new("frame.log")));
    }

    /// Invariant: validation rejects a zero thread count.
    #[test]
    fn zero_threads_rejected() {
        let config = SchedulerConfig::default().thread_count(0);
        assert_eq!(config.validate(), Err(ConfigError::ZeroThreadCount));
    }

    /// Invariant: validation rejects frames longer than the pacing clamp.
    #[test]
    fn overlong_frame_rejected() {
        let config = SchedulerConfig::default().frame_length_micros(2_000_000);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::FrameLengthTooLong(2_000_000))
        ));
    }

    #[test]
    fn parse_helpers_report_key() {
        let err = parse_u64("sixty", "FRAMEDAG_FRAME_RATE").unwrap_err();
        assert!(err.to_string().contains("FRAMEDAG_FRAME_RATE"));

        assert_eq!(parse_bool("YES", "K").unwrap(), true);
        assert_eq!(parse_bool("0", "K").unwrap(), false);
        assert!(parse_bool("maybe", "K").is_err());
    }

    #[test]
    fn config_error_display() {
        assert!(ConfigError::ZeroThreadCount.to_string().contains("thread_count"));
        assert!(ConfigError::FrameLengthTooLong(9).to_string().contains('9'));
        assert!(ConfigError::Parse("bad".into()).to_string().contains("parse"));
    }
}
