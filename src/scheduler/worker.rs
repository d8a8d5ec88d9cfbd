//! Worker loops and thread topologies.
//!
//! Two closely related pull loops drive the parallel phase. Pool workers
//! scan the shared list; the registrar thread scans the affinity list first
//! and falls through to the pool. Both loops spin when the scan comes up
//! empty while work remains: the only reason for an empty scan is an
//! unfinished dependency, and that wait is bounded by the longest in-flight
//! unit.

use std::sync::Arc;
use std::thread::JoinHandle;

use crate::scheduler::{SchedulerCore, WorkContext};
use crate::storage::ThreadStorage;

/// The pull loop run by every thread except the registrar.
pub(crate) fn pool_loop(core: &SchedulerCore, storage: &ThreadStorage) {
    let graph = core.graph().read();
    let cx = WorkContext::new(storage, core);
    loop {
        if let Some(unit) = graph.next_work_unit(&core.decache_main) {
            if let Some(record) = graph.unit(unit) {
                if record.take_ownership(graph.units()) {
                    record.invoke(&cx);
                }
            }
        } else if graph.all_work_complete() {
            break;
        } else {
            // A dependency is still in flight on another thread.
            std::hint::spin_loop();
        }
    }
}

/// The registrar thread's pull loop: affinity list first, then the pool.
pub(crate) fn affinity_loop(core: &SchedulerCore, storage: &ThreadStorage) {
    let graph = core.graph().read();
    let cx = WorkContext::new(storage, core);
    loop {
        if let Some(unit) = graph.next_work_unit_affinity(&core.decache_affinity, &core.decache_main)
        {
            if let Some(record) = graph.unit(unit) {
                if record.take_ownership(graph.units()) {
                    record.invoke(&cx);
                }
            }
        } else if graph.all_work_complete() {
            break;
        } else {
            std::hint::spin_loop();
        }
    }
}

/// Spawns `thread_count - 1` workers that each run one frame's pool loop.
///
/// On spawn failure the already-running workers are returned with the error
/// so the caller can finish the frame and reap them before reporting it.
#[cfg(not(feature = "persistent-threads"))]
#[allow(clippy::type_complexity)]
pub(crate) fn spawn_frame_workers(
    core: &Arc<SchedulerCore>,
    thread_count: usize,
) -> Result<Vec<JoinHandle<()>>, (Vec<JoinHandle<()>>, std::io::Error)> {
    let mut workers = Vec::with_capacity(thread_count.saturating_sub(1));
    for index in 1..thread_count {
        let core = Arc::clone(core);
        let storage = core.storage(index);
        let spawned = std::thread::Builder::new()
            .name(format!("framedag-worker-{index}"))
            .spawn(move || pool_loop(&core, &storage));
        match spawned {
            Ok(handle) => workers.push(handle),
            Err(err) => return Err((workers, err)),
        }
    }
    Ok(workers)
}

/// Joins the frame's workers, re-raising the first unit panic observed.
#[cfg(not(feature = "persistent-threads"))]
pub(crate) fn join_frame_workers(workers: Vec<JoinHandle<()>>) {
    let mut first_panic = None;
    for handle in workers {
        if let Err(payload) = handle.join() {
            first_panic.get_or_insert(payload);
        }
    }
    if let Some(payload) = first_panic {
        std::panic::resume_unwind(payload);
    }
}

/// Spawns workers that persist across frames, parked on the start-of-frame
/// barrier between them.
#[cfg(feature = "persistent-threads")]
pub(crate) fn spawn_persistent_workers(
    core: &Arc<SchedulerCore>,
    thread_count: usize,
) -> Result<Vec<JoinHandle<()>>, std::io::Error> {
    let mut workers = Vec::with_capacity(thread_count.saturating_sub(1));
    for index in 1..thread_count {
        let core = Arc::clone(core);
        let storage = core.storage(index);
        let handle = std::thread::Builder::new()
            .name(format!("framedag-worker-{index}"))
            .spawn(move || persistent_loop(&core, &storage))?;
        workers.push(handle);
    }
    Ok(workers)
}

#[cfg(feature = "persistent-threads")]
fn persistent_loop(core: &SchedulerCore, storage: &ThreadStorage) {
    loop {
        core.start_barrier().wait();
        if core.is_shutdown() {
            crate::tracing_compat::trace!(
                thread = storage.index(),
                "persistent worker shutting down"
            );
            break;
        }
        pool_loop(core, storage);
        core.end_barrier().wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::scheduler::FrameScheduler;
    use crate::unit::Work;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Count(Arc<AtomicUsize>);

    impl Work for Count {
        fn run(&mut self, _cx: &WorkContext<'_>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn scheduler(threads: usize) -> FrameScheduler {
        let config = SchedulerConfig::default()
            .thread_count(threads)
            .frame_rate(0)
            .log_work_units(false);
        FrameScheduler::with_sink(config, Box::new(std::io::sink())).expect("config is valid")
    }

    #[test]
    fn pool_loop_drains_an_unsorted_list() {
        let mut sched = scheduler(1);
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..16 {
            sched.add_work(Box::new(Count(Arc::clone(&ran))));
        }
        let core = Arc::clone(sched.core_for_test());
        let storage = core.storage(0);
        pool_loop(&core, &storage);
        assert_eq!(ran.load(Ordering::SeqCst), 16);
    }

    #[test]
    fn affinity_loop_covers_both_lists() {
        let mut sched = scheduler(1);
        let ran = Arc::new(AtomicUsize::new(0));
        sched.add_work(Box::new(Count(Arc::clone(&ran))));
        sched.add_work_affinity(Box::new(Count(Arc::clone(&ran))));

        let core = Arc::clone(sched.core_for_test());
        let storage = core.storage(0);
        affinity_loop(&core, &storage);
        assert_eq!(ran.load(Ordering::SeqCst), 2);
    }
}
