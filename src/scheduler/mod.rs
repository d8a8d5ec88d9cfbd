//! The frame scheduler.
//!
//! [`FrameScheduler`] owns every registered work unit, the three work lists
//! (main pool, affinity, monopoly), the per-thread storages, the log sink,
//! and the frame timing state. Registration, dependency edits, and sorting
//! all take `&mut self`, so the borrow checker enforces the core rule of the
//! design: the graph cannot change while a frame is executing.
//!
//! # Thread topology
//!
//! By default worker threads are created at the start of every frame and
//! joined at its end. With the `persistent-threads` feature the workers are
//! spawned once and parked between frames on a pair of barriers
//! (start-of-frame, end-of-frame).

mod worker;

use std::io::Write;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockReadGuard};

use crate::config::{SchedulerConfig, MICROS_PER_SECOND};
use crate::error::SchedulerError;
use crate::graph::{SortedLists, WorkGraph};
use crate::monopoly::Monopoly;
use crate::platform;
use crate::storage::ThreadStorage;
use crate::tracing_compat::{debug, trace};
use crate::unit::{UnitId, Work};

#[cfg(feature = "persistent-threads")]
use crate::sync::Barrier;

/// Shared state reachable from every worker thread and from helper work
/// units through [`WorkContext`].
pub(crate) struct SchedulerCore {
    graph: RwLock<WorkGraph>,
    storages: RwLock<Vec<Arc<ThreadStorage>>>,
    sink: Mutex<Box<dyn Write + Send>>,
    pending_sorted: Mutex<Option<SortedLists>>,
    frame_count: AtomicU64,
    pub(crate) decache_main: AtomicUsize,
    pub(crate) decache_affinity: AtomicUsize,
    log_work_units: bool,
    #[cfg(feature = "persistent-threads")]
    start_barrier: Barrier,
    #[cfg(feature = "persistent-threads")]
    end_barrier: Barrier,
    #[cfg(feature = "persistent-threads")]
    shutdown: std::sync::atomic::AtomicBool,
}

impl SchedulerCore {
    fn new(thread_count: usize, log_work_units: bool, sink: Box<dyn Write + Send>) -> Self {
        let storages = (0..thread_count).map(|index| Arc::new(ThreadStorage::new(index))).collect();
        Self {
            graph: RwLock::new(WorkGraph::new()),
            storages: RwLock::new(storages),
            sink: Mutex::new(sink),
            pending_sorted: Mutex::new(None),
            frame_count: AtomicU64::new(0),
            decache_main: AtomicUsize::new(0),
            decache_affinity: AtomicUsize::new(0),
            log_work_units,
            #[cfg(feature = "persistent-threads")]
            start_barrier: Barrier::new(u32::try_from(thread_count).unwrap_or(u32::MAX)),
            #[cfg(feature = "persistent-threads")]
            end_barrier: Barrier::new(u32::try_from(thread_count).unwrap_or(u32::MAX)),
            #[cfg(feature = "persistent-threads")]
            shutdown: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub(crate) fn graph(&self) -> &RwLock<WorkGraph> {
        &self.graph
    }

    /// Read access for code running inside a frame, where the calling thread
    /// may already hold the frame's read guard.
    pub(crate) fn graph_read_recursive(&self) -> RwLockReadGuard<'_, WorkGraph> {
        self.graph.read_recursive()
    }

    pub(crate) fn storage(&self, index: usize) -> Arc<ThreadStorage> {
        Arc::clone(&self.storages.read()[index])
    }

    /// Snapshot of every worker slot's storage, for the buffer swapper and
    /// the aggregator.
    pub(crate) fn storages(&self) -> Vec<Arc<ThreadStorage>> {
        self.storages.read().clone()
    }

    fn ensure_storages(&self, thread_count: usize) {
        let mut storages = self.storages.write();
        while storages.len() < thread_count {
            let next_index = storages.len();
            storages.push(Arc::new(ThreadStorage::new(next_index)));
        }
    }

    pub(crate) fn frame_number(&self) -> u64 {
        self.frame_count.load(Ordering::Relaxed)
    }

    pub(crate) fn sink(&self) -> parking_lot::MutexGuard<'_, Box<dyn Write + Send>> {
        self.sink.lock()
    }

    pub(crate) fn publish_sorted(&self, lists: SortedLists) {
        *self.pending_sorted.lock() = Some(lists);
    }

    #[cfg(feature = "persistent-threads")]
    pub(crate) fn start_barrier(&self) -> &Barrier {
        &self.start_barrier
    }

    #[cfg(feature = "persistent-threads")]
    pub(crate) fn end_barrier(&self) -> &Barrier {
        &self.end_barrier
    }

    #[cfg(feature = "persistent-threads")]
    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(std::sync::atomic::Ordering::Acquire)
    }
}

impl core::fmt::Debug for SchedulerCore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SchedulerCore")
            .field("frame_count", &self.frame_number())
            .finish_non_exhaustive()
    }
}

/// Everything a running work body can reach: its thread's storage and the
/// owning scheduler's shared state.
///
/// The context is how "the scheduler" is threaded into worker loops and unit
/// bodies; there are no process-wide globals.
#[derive(Debug, Clone, Copy)]
pub struct WorkContext<'a> {
    storage: &'a ThreadStorage,
    core: &'a SchedulerCore,
}

impl<'a> WorkContext<'a> {
    pub(crate) fn new(storage: &'a ThreadStorage, core: &'a SchedulerCore) -> Self {
        Self { storage, core }
    }

    /// The executing worker slot; 0 is the thread that built the scheduler.
    #[must_use]
    pub fn thread_index(&self) -> usize {
        self.storage.index()
    }

    /// The calling thread's storage.
    #[must_use]
    pub fn storage(&self) -> &ThreadStorage {
        self.storage
    }

    /// Appends a user fragment to this thread's usable log buffer. It is
    /// committed to the sink by the swapper/aggregator pair on a later frame.
    pub fn log(&self, fragment: &str) {
        self.storage.logger().append(fragment);
    }

    /// The frame counter at the time of the call.
    #[must_use]
    pub fn frame_number(&self) -> u64 {
        self.core.frame_number()
    }

    pub(crate) fn core(&self) -> &SchedulerCore {
        self.core
    }

    pub(crate) fn log_work_units(&self) -> bool {
        self.core.log_work_units
    }
}

/// The frame scheduler. See the [module docs](self) for the execution model.
#[derive(Debug)]
pub struct FrameScheduler {
    core: Arc<SchedulerCore>,
    thread_count: usize,
    target_frame_length: u64,
    frame_start: u64,
    timing_allowance: i64,
    #[cfg(feature = "persistent-threads")]
    workers: Vec<std::thread::JoinHandle<()>>,
    #[cfg(feature = "persistent-threads")]
    mid_frame: bool,
}

impl FrameScheduler {
    /// Builds a scheduler from the configuration, logging to the configured
    /// file or to standard output.
    ///
    /// Must be constructed on the thread that will call
    /// [`do_one_frame`](Self::do_one_frame); that thread is worker slot 0 and
    /// owns the affinity list.
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        let sink: Box<dyn Write + Send> = match &config.log_path {
            Some(path) => Box::new(std::fs::File::create(path).map_err(SchedulerError::LogSink)?),
            None => Box::new(std::io::stdout()),
        };
        Self::with_sink(config, sink)
    }

    /// Builds a scheduler that aggregates logs into the given sink.
    pub fn with_sink(
        config: SchedulerConfig,
        sink: Box<dyn Write + Send>,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;
        let core = Arc::new(SchedulerCore::new(
            config.thread_count,
            config.log_work_units,
            sink,
        ));
        Ok(Self {
            core,
            thread_count: config.thread_count,
            target_frame_length: config.frame_length_micros,
            frame_start: platform::timestamp(),
            timing_allowance: -crate::config::DEFAULT_TIMING_ALLOWANCE_MICROS,
            #[cfg(feature = "persistent-threads")]
            workers: Vec::new(),
            #[cfg(feature = "persistent-threads")]
            mid_frame: false,
        })
    }

    // ── Registration ────────────────────────────────────────────────────

    /// Registers a unit into the shared pool and returns its handle.
    pub fn add_work(&mut self, body: Box<dyn Work>) -> UnitId {
        self.core.graph.write().add_work(body)
    }

    /// Registers a unit that only the scheduler's own thread may execute.
    pub fn add_work_affinity(&mut self, body: Box<dyn Work>) -> UnitId {
        self.core.graph.write().add_work_affinity(body)
    }

    /// Registers a monopoly, run serially before the parallel phase in
    /// registration order.
    pub fn add_monopoly(&mut self, monopoly: Box<dyn Monopoly>) {
        self.core.graph.write().add_monopoly(monopoly);
    }

    /// Removes a unit from whichever list holds it and returns its body.
    ///
    /// Dependency edges on surviving units are not touched; remove them with
    /// [`remove_dependency`](Self::remove_dependency) first if dependents
    /// outlive this unit.
    pub fn remove_work(&mut self, unit: UnitId) -> Option<Box<dyn Work>> {
        self.core.graph.write().remove_work(unit)
    }

    /// Declares that `unit` must not start until `dependency` has completed.
    pub fn add_dependency(
        &mut self,
        unit: UnitId,
        dependency: UnitId,
    ) -> Result<(), SchedulerError> {
        let mut graph = self.core.graph.write();
        if graph.unit(dependency).is_none() {
            return Err(SchedulerError::UnknownDependency(dependency));
        }
        graph
            .unit_mut(unit)
            .ok_or(SchedulerError::UnknownUnit(unit))?
            .add_dependency(dependency);
        Ok(())
    }

    /// Removes one dependency edge from `unit`.
    pub fn remove_dependency(
        &mut self,
        unit: UnitId,
        dependency: UnitId,
    ) -> Result<(), SchedulerError> {
        self.core
            .graph
            .write()
            .unit_mut(unit)
            .ok_or(SchedulerError::UnknownUnit(unit))?
            .remove_dependency(dependency);
        Ok(())
    }

    /// Drops every dependency edge of `unit`.
    pub fn clear_dependencies(&mut self, unit: UnitId) -> Result<(), SchedulerError> {
        self.core
            .graph
            .write()
            .unit_mut(unit)
            .ok_or(SchedulerError::UnknownUnit(unit))?
            .clear_dependencies();
        Ok(())
    }

    /// Transitive count of units that must wait for `unit`, refreshing the
    /// reverse-dependency cache first.
    #[must_use]
    pub fn dependent_count_of(&mut self, unit: UnitId) -> usize {
        let mut graph = self.core.graph.write();
        graph.update_dependent_graph();
        graph.dependent_count_of(unit)
    }

    /// Transitive count of units `unit` waits for.
    #[must_use]
    pub fn dependency_count_of(&self, unit: UnitId) -> usize {
        self.core.graph.read().dependency_count_of(unit)
    }

    /// The number of registered pool and affinity units.
    #[must_use]
    pub fn unit_count(&self) -> usize {
        self.core.graph.read().unit_count()
    }

    /// The sort key a unit would get right now, refreshing the
    /// reverse-dependency cache first. `None` for a stale handle.
    #[must_use]
    pub fn sorting_key_of(&mut self, unit: UnitId) -> Option<crate::key::WorkUnitKey> {
        let mut graph = self.core.graph.write();
        graph.unit(unit)?;
        graph.update_dependent_graph();
        Some(graph.sorting_key(unit))
    }

    /// True iff every pool and affinity unit currently reports complete.
    ///
    /// Between frames this is false: the end-of-frame reset has already
    /// rearmed every unit for the next frame.
    #[must_use]
    pub fn all_work_complete(&self) -> bool {
        self.core.graph.read().all_work_complete()
    }

    // ── Sorting ─────────────────────────────────────────────────────────

    /// Sorts the shared pool by refreshed keys.
    pub fn sort_main(&mut self, update_dependent_graph: bool) {
        self.core.graph.write().sort_main(update_dependent_graph);
    }

    /// Sorts the affinity list by refreshed keys.
    pub fn sort_affinity(&mut self, update_dependent_graph: bool) {
        self.core.graph.write().sort_affinity(update_dependent_graph);
    }

    /// Sorts both lists, refreshing the dependent graph at most once.
    ///
    /// Call after registering units or editing dependencies; the sort does
    /// not need to repeat every frame unless runtimes drift (register a
    /// [`WorkSorter`](crate::units::WorkSorter) for that).
    pub fn sort_all(&mut self, update_dependent_graph: bool) {
        self.core.graph.write().sort_all(update_dependent_graph);
    }

    // ── Configuration ───────────────────────────────────────────────────

    /// The number of threads the next frame will use, including the caller.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    /// Sets the thread count used from the next frame on.
    ///
    /// Under `persistent-threads` the count is fixed once workers have been
    /// spawned by the first frame; later calls are ignored.
    pub fn set_thread_count(&mut self, thread_count: usize) {
        let thread_count = thread_count.max(1);
        #[cfg(feature = "persistent-threads")]
        {
            if !self.workers.is_empty() {
                crate::tracing_compat::warn!(
                    thread_count,
                    "persistent workers already spawned; thread count unchanged"
                );
                return;
            }
            let parties = u32::try_from(thread_count).unwrap_or(u32::MAX);
            self.core.start_barrier.set_party_count(parties);
            self.core.end_barrier.set_party_count(parties);
        }
        self.thread_count = thread_count;
        self.core.ensure_storages(thread_count);
    }

    /// Frames completed since the scheduler was built.
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.core.frame_number()
    }

    /// The target frame length in microseconds; zero means unpaced.
    #[must_use]
    pub fn frame_length_micros(&self) -> u64 {
        self.target_frame_length
    }

    /// Sets the target frame rate; zero disables pacing.
    pub fn set_frame_rate(&mut self, rate: u64) {
        self.target_frame_length = if rate == 0 { 0 } else { MICROS_PER_SECOND / rate };
    }

    /// Sets the target frame length directly; zero disables pacing.
    pub fn set_frame_length_micros(&mut self, micros: u64) {
        self.target_frame_length = micros;
    }

    // ── Frame execution ─────────────────────────────────────────────────

    /// Executes one frame: monopolies, the parallel phase, reset, and the
    /// pause to the frame boundary.
    ///
    /// Call only after the lists have been sorted at least once
    /// ([`sort_all`](Self::sort_all)). Worker-thread exhaustion returns
    /// [`SchedulerError::ThreadSpawn`]; a panicking unit body unwinds out of
    /// this call after the frame's bookkeeping is abandoned.
    pub fn do_one_frame(&mut self) -> Result<(), SchedulerError> {
        trace!(frame = self.frame_count(), "frame start");
        self.run_monopolies();
        self.run_parallel_phase()?;
        self.finish_frame();
        Ok(())
    }

    fn run_monopolies(&mut self) {
        // Taken out of the graph so bodies run without holding its lock.
        let mut monopolies = self.core.graph.write().take_monopolies();
        if !monopolies.is_empty() {
            let storage = self.core.storage(0);
            let cx = WorkContext::new(&storage, &self.core);
            for monopoly in &mut monopolies {
                monopoly.run(&cx);
            }
        }
        self.core.graph.write().put_monopolies(monopolies);
    }

    #[cfg(not(feature = "persistent-threads"))]
    fn run_parallel_phase(&mut self) -> Result<(), SchedulerError> {
        let spawned = worker::spawn_frame_workers(&self.core, self.thread_count);
        let storage = self.core.storage(0);
        worker::affinity_loop(&self.core, &storage);
        match spawned {
            Ok(workers) => {
                worker::join_frame_workers(workers);
                Ok(())
            }
            Err((workers, err)) => {
                // The successfully spawned workers have finished the frame's
                // work alongside us; reap them before surfacing the failure.
                worker::join_frame_workers(workers);
                Err(SchedulerError::ThreadSpawn(err))
            }
        }
    }

    #[cfg(feature = "persistent-threads")]
    fn run_parallel_phase(&mut self) -> Result<(), SchedulerError> {
        if self.workers.is_empty() && self.thread_count > 1 {
            self.workers = worker::spawn_persistent_workers(&self.core, self.thread_count)
                .map_err(SchedulerError::ThreadSpawn)?;
        }
        self.mid_frame = true;
        self.core.start_barrier.wait();
        let storage = self.core.storage(0);
        worker::affinity_loop(&self.core, &storage);
        self.core.end_barrier.wait();
        self.mid_frame = false;
        Ok(())
    }

    fn finish_frame(&mut self) {
        if let Some(lists) = self.core.pending_sorted.lock().take() {
            debug!("installing sorter output");
            self.core.graph.write().install(lists);
        }
        self.core.graph.read().reset_all_units();
        self.core.decache_main.store(0, Ordering::Release);
        self.core.decache_affinity.store(0, Ordering::Release);
        self.wait_until_next_frame();
    }

    /// Sleeps out the remainder of the frame and updates the drift
    /// integrator.
    ///
    /// The allowance accumulates the negated overshoot: waking late shrinks
    /// the next sleep by the same amount, so persistent bias cancels while
    /// jitter stays bounded by the OS timer.
    fn wait_until_next_frame(&mut self) {
        self.core.frame_count.fetch_add(1, Ordering::Relaxed);
        if self.target_frame_length == 0 {
            self.frame_start = platform::timestamp();
            return;
        }

        let target_end = self.frame_start.wrapping_add(self.target_frame_length);
        let now = platform::timestamp();
        let sleep = (target_end as i64 - now as i64 + self.timing_allowance)
            .clamp(0, MICROS_PER_SECOND as i64);
        platform::sleep_micros(sleep.unsigned_abs());

        self.frame_start = platform::timestamp();
        self.timing_allowance -= self.frame_start as i64 - target_end as i64;
    }

    #[cfg(test)]
    pub(crate) fn core_for_test(&self) -> &Arc<SchedulerCore> {
        &self.core
    }
}

#[cfg(feature = "persistent-threads")]
impl Drop for FrameScheduler {
    fn drop(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        if self.mid_frame {
            // A unit body unwound out of the parallel phase; the workers are
            // finishing the frame and heading for the end-of-frame barrier.
            self.core.end_barrier.wait();
        }
        self.core
            .shutdown
            .store(true, std::sync::atomic::Ordering::Release);
        self.core.start_barrier.wait();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}
