//! Test logging helpers.
//!
//! Tests announce their phases through [`test_phase!`](crate::test_phase) /
//! [`test_complete!`](crate::test_complete) so a hanging multi-thread test
//! leaves a trail of which step it reached. Output is gated by the
//! `TEST_LOG_LEVEL` environment variable and goes to standard error.

use std::sync::OnceLock;

/// Verbosity for test output, from the `TEST_LOG_LEVEL` environment
/// variable. Anything at `Info` or above prints phase markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum TestLogLevel {
    /// Print nothing.
    Quiet,
    /// Print phase markers.
    #[default]
    Info,
    /// Print phase markers and extra detail.
    Debug,
}

impl TestLogLevel {
    /// Reads the level from the environment, defaulting to `Info`.
    #[must_use]
    pub fn from_env() -> Self {
        match std::env::var("TEST_LOG_LEVEL").ok().as_deref() {
            Some("quiet" | "off") => Self::Quiet,
            Some("debug" | "trace") => Self::Debug,
            _ => Self::Info,
        }
    }
}

/// The process-wide test log level, resolved once.
#[must_use]
pub fn level() -> TestLogLevel {
    static LEVEL: OnceLock<TestLogLevel> = OnceLock::new();
    *LEVEL.get_or_init(TestLogLevel::from_env)
}

/// Marks the start of a test or a named step within one.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        if $crate::test_logging::level() >= $crate::test_logging::TestLogLevel::Info {
            eprintln!("[phase] {}", $name);
        }
    };
}

/// Marks a test as finished; pairs with [`test_phase!`](crate::test_phase).
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        if $crate::test_logging::level() >= $crate::test_logging::TestLogLevel::Info {
            eprintln!("[done]  {}", $name);
        }
    };
}
