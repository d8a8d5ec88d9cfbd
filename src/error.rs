//! Error types for the scheduler.
//!
//! Errors are explicit and typed. The scheduler distinguishes:
//!
//! - **Configuration errors**: rejected before any thread is started.
//! - **Registration errors**: stale or foreign unit handles.
//! - **Thread spawn failure**: fatal resource exhaustion, surfaced from
//!   [`do_one_frame`](crate::FrameScheduler::do_one_frame).
//!
//! Failures inside user work bodies are not errors to the scheduler: a
//! panicking unit unwinds out of the frame.

use core::fmt;

use crate::config::ConfigError;
use crate::unit::UnitId;

/// Errors surfaced by [`FrameScheduler`](crate::FrameScheduler) operations.
#[derive(Debug)]
pub enum SchedulerError {
    /// The configuration failed validation.
    Config(ConfigError),
    /// A worker thread could not be created.
    ThreadSpawn(std::io::Error),
    /// The configured log file could not be opened.
    LogSink(std::io::Error),
    /// The unit handle does not name a registered work unit.
    UnknownUnit(UnitId),
    /// The dependency handle does not name a registered work unit.
    UnknownDependency(UnitId),
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(err) => write!(f, "invalid configuration: {err}"),
            Self::ThreadSpawn(err) => write!(f, "worker thread spawn failed: {err}"),
            Self::LogSink(err) => write!(f, "log file open failed: {err}"),
            Self::UnknownUnit(id) => write!(f, "unknown work unit: {id:?}"),
            Self::UnknownDependency(id) => write!(f, "unknown dependency unit: {id:?}"),
        }
    }
}

impl std::error::Error for SchedulerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::ThreadSpawn(err) | Self::LogSink(err) => Some(err),
            Self::UnknownUnit(_) | Self::UnknownDependency(_) => None,
        }
    }
}

impl From<ConfigError> for SchedulerError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}
