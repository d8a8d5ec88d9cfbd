//! Work units and the running-state machine.
//!
//! A work unit is one piece of recurring work: a user body behind the
//! [`Work`] trait plus the bookkeeping the scheduler keeps per unit: its
//! dependency list, a rolling average of execution time, and the atomic
//! running-state word that makes lock-free ownership possible.
//!
//! The running-state word stores exactly three values and transitions
//! `NotStarted → Running → Complete` within a frame. The original design's
//! fourth value ("starting") is a one-shot ownership transfer to the caller;
//! here it is simply the `true` return of [`UnitRecord::take_ownership`] and
//! is never stored.

use core::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::average::{DefaultRollingAverage, RollingAverage};
use crate::logging;
use crate::platform;
use crate::registry::Registry;
use crate::scheduler::WorkContext;

/// Samples of execution history kept per unit.
const PERF_WINDOW: usize = 10;

/// The readiness of a work unit within the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RunningState {
    /// Not yet claimed by any thread this frame.
    NotStarted = 0,
    /// Claimed and executing.
    Running = 1,
    /// Finished for this frame.
    Complete = 2,
}

impl RunningState {
    fn from_word(word: u32) -> Self {
        match word {
            0 => Self::NotStarted,
            1 => Self::Running,
            _ => Self::Complete,
        }
    }
}

/// The atomic running-state word.
///
/// The compare-and-swap in [`try_start`](Self::try_start) is the only
/// synchronization on the work-pulling hot path: release on success pairs
/// with the acquire loads of scanning threads, so a unit's writes are visible
/// to everything that observes it `Complete`.
#[derive(Debug)]
pub(crate) struct AtomicRunningState {
    word: AtomicU32,
}

impl AtomicRunningState {
    pub(crate) fn new() -> Self {
        Self {
            word: AtomicU32::new(RunningState::NotStarted as u32),
        }
    }

    pub(crate) fn load(&self) -> RunningState {
        RunningState::from_word(self.word.load(Ordering::Acquire))
    }

    /// Attempts the `NotStarted → Running` transition; true means the caller
    /// now owns the unit for this frame.
    pub(crate) fn try_start(&self) -> bool {
        self.word
            .compare_exchange(
                RunningState::NotStarted as u32,
                RunningState::Running as u32,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub(crate) fn store_complete(&self) {
        self.word.store(RunningState::Complete as u32, Ordering::Release);
    }

    pub(crate) fn reset(&self) {
        self.word
            .store(RunningState::NotStarted as u32, Ordering::Release);
    }
}

/// Stable handle to a registered work unit.
///
/// Handles order by registration slot, which gives the sort key its final,
/// total tie-break.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitId {
    index: u32,
    generation: u32,
}

impl UnitId {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub(crate) const fn index(self) -> u32 {
        self.index
    }

    pub(crate) const fn generation(self) -> u32 {
        self.generation
    }

    /// Builds a handle from raw parts, for tests that need one without a
    /// scheduler.
    #[doc(hidden)]
    #[must_use]
    pub const fn new_for_test(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}

impl fmt::Debug for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UnitId({}:{})", self.index, self.generation)
    }
}

/// A user work body, invoked at most once per frame on one thread.
///
/// Bodies communicate through their own state and the per-thread resources in
/// [`WorkContext`]; there is no return value. A panicking body unwinds out of
/// the frame; the scheduler publishes the unit's completion on the way out
/// but does not catch the panic.
pub trait Work: Send {
    /// Performs one frame's worth of this unit's work.
    fn run(&mut self, cx: &WorkContext<'_>);
}

/// Scheduler-side bookkeeping for one registered unit.
pub(crate) struct UnitRecord {
    dependencies: SmallVec<[UnitId; 4]>,
    state: AtomicRunningState,
    perf: Mutex<DefaultRollingAverage>,
    body: Mutex<Box<dyn Work>>,
}

impl fmt::Debug for UnitRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitRecord")
            .field("dependencies", &self.dependencies)
            .field("state", &self.state.load())
            .finish_non_exhaustive()
    }
}

impl UnitRecord {
    pub(crate) fn new(body: Box<dyn Work>) -> Self {
        Self {
            dependencies: SmallVec::new(),
            state: AtomicRunningState::new(),
            perf: Mutex::new(DefaultRollingAverage::new(PERF_WINDOW)),
            body: Mutex::new(body),
        }
    }

    pub(crate) fn dependencies(&self) -> &[UnitId] {
        &self.dependencies
    }

    pub(crate) fn add_dependency(&mut self, dependency: UnitId) {
        self.dependencies.push(dependency);
    }

    pub(crate) fn remove_dependency(&mut self, dependency: UnitId) {
        self.dependencies.retain(|candidate| *candidate != dependency);
    }

    pub(crate) fn clear_dependencies(&mut self) {
        self.dependencies.clear();
    }

    pub(crate) fn running_state(&self) -> RunningState {
        self.state.load()
    }

    /// True iff every dependency has completed this frame.
    ///
    /// A stale handle (its unit was removed without cleaning up edges) counts
    /// as satisfied so a caller mistake degrades scheduling instead of
    /// wedging the frame; debug builds flag it.
    pub(crate) fn is_every_dependency_complete(&self, units: &Registry) -> bool {
        self.dependencies.iter().all(|dependency| {
            units.get(*dependency).map_or_else(
                || {
                    debug_assert!(false, "dependency edge to removed unit {dependency:?}");
                    true
                },
                |record| record.running_state() == RunningState::Complete,
            )
        })
    }

    /// Attempts to claim this unit for the current thread.
    ///
    /// Returns false when a dependency is unfinished or another thread won
    /// the claim; the caller simply re-scans. True transfers ownership for
    /// exactly one invocation.
    pub(crate) fn take_ownership(&self, units: &Registry) -> bool {
        if !self.is_every_dependency_complete(units) {
            return false;
        }
        self.state.try_start()
    }

    /// Unconditionally rearms the unit for the next frame.
    pub(crate) fn prepare_for_next_frame(&self) {
        self.state.reset();
    }

    pub(crate) fn average_micros(&self) -> u64 {
        self.perf.lock().average()
    }

    /// Runs the claimed unit: timestamps around the body, execution-time
    /// bookkeeping, optional log entries, and the `Complete` publication.
    ///
    /// The completion store sits in a drop guard so it happens on every exit
    /// path: a unit whose body unwinds is still observed `Complete` by its
    /// dependents while the panic propagates out of the frame.
    pub(crate) fn invoke(&self, cx: &WorkContext<'_>) {
        struct CompleteOnExit<'a> {
            state: &'a AtomicRunningState,
        }

        impl Drop for CompleteOnExit<'_> {
            fn drop(&mut self) {
                self.state.store_complete();
            }
        }

        let log_entries = cx.log_work_units();
        let begin = platform::timestamp();
        if log_entries {
            cx.storage()
                .logger()
                .append(&logging::workunit_start_entry(begin, cx.thread_index()));
        }

        let mut body = self
            .body
            .try_lock()
            .expect("work unit body claimed twice in one frame");
        let _complete = CompleteOnExit { state: &self.state };
        body.run(cx);

        let end = platform::timestamp();
        let duration = end.saturating_sub(begin);
        self.perf.lock().insert(duration);
        if log_entries {
            cx.storage()
                .logger()
                .append(&logging::workunit_end_entry(end, duration, cx.thread_index()));
        }
    }

    /// Extracts the body, consuming the record.
    pub(crate) fn into_body(self) -> Box<dyn Work> {
        self.body.into_inner()
    }

    /// Drives the unit straight to `Complete`, bypassing invocation. Tests
    /// use this to shape frame states without running bodies.
    #[cfg(test)]
    pub(crate) fn force_complete(&self) {
        self.state.store_complete();
    }
}
