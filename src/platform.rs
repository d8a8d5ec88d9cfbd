//! Thin platform layer: timestamps, CPU count, and sleeping.
//!
//! The scheduler core consumes exactly these primitives; everything else it
//! does is built from atomics and threads. Timestamps are microseconds on a
//! monotonic process-local clock so frame arithmetic never runs backwards.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

fn epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

/// Returns the current timestamp in microseconds.
///
/// The clock is monotonic and starts near zero the first time any timestamp
/// is taken in the process.
#[must_use]
pub fn timestamp() -> u64 {
    u64::try_from(epoch().elapsed().as_micros()).unwrap_or(u64::MAX)
}

/// Returns the number of logical CPU cores, and at least 1.
#[must_use]
pub fn cpu_count() -> usize {
    std::thread::available_parallelism()
        .map_or(1, std::num::NonZeroUsize::get)
        .max(1)
}

/// Sleeps the calling thread for the given number of microseconds.
pub fn sleep_micros(micros: u64) {
    if micros > 0 {
        std::thread::sleep(Duration::from_micros(micros));
    }
}
