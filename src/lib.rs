//! Deterministic per-frame DAG scheduler for soft-realtime loops.
//!
//! `framedag` repeatedly executes a fixed body of work, a directed acyclic
//! graph of [`Work`] units, inside a target wall-clock frame budget, the way
//! game and simulation loops do. The work graph is immutable while a frame
//! executes, so threads pull ready units without locking: ownership of a unit
//! is a single compare-and-swap on its running-state word, and priority comes
//! from a sort key built from dependent counts and measured execution time so
//! the critical path drains first.
//!
//! # Frame anatomy
//!
//! Each call to [`FrameScheduler::do_one_frame`] runs, in order:
//!
//! 1. Every [`Monopoly`] serially on the calling thread.
//! 2. The parallel phase: worker threads and the calling thread pull from the
//!    shared pool, the calling thread preferring the affinity list.
//! 3. Reset of every unit's running state for the next frame.
//! 4. A pause that stretches the frame to the configured length, with a
//!    feedback allowance that absorbs scheduler overhead.
//!
//! # Example
//!
//! ```no_run
//! use framedag::{FrameScheduler, SchedulerConfig, Work, WorkContext};
//!
//! struct Physics;
//! impl Work for Physics {
//!     fn run(&mut self, _cx: &WorkContext<'_>) { /* step the simulation */ }
//! }
//!
//! struct Render;
//! impl Work for Render {
//!     fn run(&mut self, _cx: &WorkContext<'_>) { /* draw the frame */ }
//! }
//!
//! let config = SchedulerConfig::default().thread_count(4).frame_rate(60);
//! let mut scheduler = FrameScheduler::new(config).unwrap();
//! let physics = scheduler.add_work(Box::new(Physics));
//! let render = scheduler.add_work_affinity(Box::new(Render));
//! scheduler.add_dependency(render, physics).unwrap();
//! scheduler.sort_all(true);
//! loop {
//!     scheduler.do_one_frame().unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod average;
pub mod config;
pub mod error;
mod graph;
pub mod key;
pub mod logging;
pub mod monopoly;
pub mod platform;
mod registry;
pub mod scheduler;
pub mod storage;
pub mod sync;
pub mod test_logging;
pub mod tracing_compat;
pub mod unit;
pub mod units;

pub use average::{BufferedRollingAverage, DefaultRollingAverage, RollingAverage, WeightedRollingAverage};
pub use config::SchedulerConfig;
pub use error::SchedulerError;
pub use key::WorkUnitKey;
pub use monopoly::Monopoly;
pub use scheduler::{FrameScheduler, WorkContext};
pub use sync::Barrier;
pub use unit::{RunningState, UnitId, Work};
pub use units::{FileLoader, LogAggregator, LogBufferSwapper, WorkSorter};
