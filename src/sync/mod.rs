//! Synchronization primitives used between frames.
//!
//! The pull hot path synchronizes through per-unit atomics only; the
//! primitives here exist for frame boundaries (thread reuse) and for user
//! code that needs an explicit rendezvous.

pub mod barrier;

pub use barrier::{Barrier, BarrierWaitResult};
