//! Rolling averages of per-unit execution time.
//!
//! Every work unit keeps an average of its last few execution durations in
//! microseconds; the sort key uses it to run long units early among equals.
//! Two estimators are provided: a ring buffer over the last N samples and a
//! cheaper weighted exponential estimator. The buffered variant is the
//! default because the schedule reacts faster when a unit's cost changes.

/// A fixed-window average of `u64` samples.
pub trait RollingAverage {
    /// Records one sample.
    fn insert(&mut self, sample: u64);

    /// Returns the current average.
    fn average(&self) -> u64;

    /// Returns the configured window length.
    fn window_len(&self) -> usize;
}

/// The estimator work units use unless configured otherwise.
pub type DefaultRollingAverage = BufferedRollingAverage;

/// Ring buffer over the last N samples.
///
/// Until the window fills, the average divides by the number of samples
/// actually recorded rather than the window length, so early frames are not
/// dragged toward zero.
#[derive(Debug, Clone)]
pub struct BufferedRollingAverage {
    samples: Vec<u64>,
    next: usize,
    filled: usize,
}

impl BufferedRollingAverage {
    /// Creates an average over the last `window` samples.
    ///
    /// # Panics
    /// Panics if `window` is zero.
    #[must_use]
    pub fn new(window: usize) -> Self {
        assert!(window > 0, "rolling average requires a nonzero window");
        Self {
            samples: vec![0; window],
            next: 0,
            filled: 0,
        }
    }
}

impl RollingAverage for BufferedRollingAverage {
    fn insert(&mut self, sample: u64) {
        self.samples[self.next] = sample;
        self.next = (self.next + 1) % self.samples.len();
        self.filled = (self.filled + 1).min(self.samples.len());
    }

    fn average(&self) -> u64 {
        if self.filled == 0 {
            return 0;
        }
        let sum: u64 = self.samples[..self.filled].iter().sum();
        sum / self.filled as u64
    }

    fn window_len(&self) -> usize {
        self.samples.len()
    }
}

/// Weighted exponential estimator: `avg += (sample - avg) / window`.
///
/// Cheaper than the ring buffer (no per-sample storage) and smoother, at the
/// cost of lagging roughly one window behind a trend. Integer truncation is
/// accepted; durations are microseconds, so the error is noise.
#[derive(Debug, Clone)]
pub struct WeightedRollingAverage {
    current: i64,
    window: usize,
}

impl WeightedRollingAverage {
    /// Creates an estimator weighting each new sample at `1 / window`.
    ///
    /// # Panics
    /// Panics if `window` is zero.
    #[must_use]
    pub fn new(window: usize) -> Self {
        assert!(window > 0, "rolling average requires a nonzero window");
        Self { current: 0, window }
    }
}

impl RollingAverage for WeightedRollingAverage {
    fn insert(&mut self, sample: u64) {
        let sample = i64::try_from(sample).unwrap_or(i64::MAX);
        self.current += (sample - self.current) / self.window as i64;
    }

    fn average(&self) -> u64 {
        u64::try_from(self.current).unwrap_or(0)
    }

    fn window_len(&self) -> usize {
        self.window
    }
}
