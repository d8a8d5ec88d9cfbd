//! Monopolies: work granted the whole process.
//!
//! A monopoly integrates a cooperative subsystem (a physics engine with its
//! own thread pool, say) that cannot share the frame with pulled work. The
//! scheduler runs every monopoly serially on the registrar thread, in
//! registration order, before any pool or affinity unit starts; the body may
//! spawn and join its own threads while it runs.

use crate::scheduler::WorkContext;

/// A work body given exclusive use of the process for its invocation.
pub trait Monopoly: Send + Sync {
    /// Hints how many threads the monopoly should consume internally.
    fn set_thread_hint(&mut self, threads: usize);

    /// The number of threads the monopoly will actually use.
    fn thread_hint(&self) -> usize;

    /// Performs one frame's worth of the monopoly's work. Called with the
    /// registrar thread's context; any parallelism is the body's own.
    fn run(&mut self, cx: &WorkContext<'_>);
}

impl core::fmt::Debug for dyn Monopoly {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Monopoly")
            .field("thread_hint", &self.thread_hint())
            .finish_non_exhaustive()
    }
}
