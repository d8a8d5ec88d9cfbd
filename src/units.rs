//! Helper work units the scheduler's own chores run as.
//!
//! Log handling, background sorting, and asynchronous file loading are all
//! ordinary work units: they are registered, ordered by dependencies, and
//! pulled like user work. The swapper/aggregator pair must be ordered (the
//! swapper depends on every unit that logs, the aggregator depends on the
//! swapper) so each runs alone with respect to the buffers it touches.

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::scheduler::WorkContext;
use crate::tracing_compat::{debug, error};
use crate::unit::{AtomicRunningState, RunningState, Work};

// ── Log buffer swapper ──────────────────────────────────────────────────

/// Swaps every thread storage's usable and committable log buffers.
///
/// Register with a dependency on every unit that logs; the aggregator then
/// depends on this, so last frame's entries are committed exactly once.
#[derive(Debug, Default)]
pub struct LogBufferSwapper;

impl LogBufferSwapper {
    /// Creates a swapper.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Work for LogBufferSwapper {
    fn run(&mut self, cx: &WorkContext<'_>) {
        for storage in cx.core().storages() {
            storage.logger().swap();
        }
    }
}

// ── Log aggregator ──────────────────────────────────────────────────────

/// Concatenates every committable buffer into the scheduler's log sink,
/// framed as `<Frame Number=".."><Thread ID="..">…</Thread></Frame>`.
///
/// Must depend on the [`LogBufferSwapper`]. Threads that logged nothing this
/// frame produce no `<Thread>` element.
#[derive(Debug, Default)]
pub struct LogAggregator;

impl LogAggregator {
    /// Creates an aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Work for LogAggregator {
    fn run(&mut self, cx: &WorkContext<'_>) {
        let core = cx.core();
        let mut sink = core.sink();
        let mut wrote = writeln!(sink, "<Frame Number=\"{}\">", core.frame_number());
        for storage in core.storages() {
            let entries = storage.logger().take_committable();
            if entries.is_empty() {
                continue;
            }
            wrote = wrote.and_then(|()| {
                write!(sink, "<Thread ID=\"{}\">\n{entries}</Thread>\n", storage.index())
            });
        }
        wrote = wrote.and_then(|()| writeln!(sink, "</Frame>"));
        wrote = wrote.and_then(|()| sink.flush());
        if let Err(_err) = wrote {
            error!(error = %_err, "log aggregation failed");
        }
    }
}

// ── Background work sorter ──────────────────────────────────────────────

/// Prepares freshly sorted copies of both work lists in parallel with the
/// frame and publishes them to the scheduler, which installs them at the
/// next frame boundary.
///
/// Optional: a static graph with stable runtimes only needs the explicit
/// sorts at registration time.
#[derive(Debug, Default)]
pub struct WorkSorter;

impl WorkSorter {
    /// Creates a sorter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Work for WorkSorter {
    fn run(&mut self, cx: &WorkContext<'_>) {
        let core = cx.core();
        let lists = core.graph_read_recursive().prepare_sorted();
        core.publish_sorted(lists);
        debug!("sorter published fresh work lists");
    }
}

// ── Asynchronous file loader ────────────────────────────────────────────

/// One loaded file: the requested path and the read outcome.
#[derive(Debug)]
pub struct LoadedFile {
    /// The path that was read.
    pub path: PathBuf,
    /// The file contents, or the I/O error that prevented the read.
    pub contents: std::io::Result<Vec<u8>>,
}

/// Cloneable view of a [`FileLoader`]'s progress, queryable from any thread.
#[derive(Debug, Clone)]
pub struct FileLoaderStatus {
    state: Arc<AtomicRunningState>,
}

impl FileLoaderStatus {
    /// The loader's progress: `NotStarted` until its first scheduled run,
    /// `Running` while the loader thread reads, `Complete` afterwards.
    #[must_use]
    pub fn state(&self) -> RunningState {
        self.state.load()
    }

    /// True once every requested file has been read.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state() == RunningState::Complete
    }
}

/// Cloneable handle to the loader's results.
#[derive(Debug, Clone)]
pub struct FileLoaderOutput {
    results: Arc<Mutex<Vec<LoadedFile>>>,
}

impl FileLoaderOutput {
    /// Takes everything loaded so far.
    #[must_use]
    pub fn take(&self) -> Vec<LoadedFile> {
        std::mem::take(&mut self.results.lock())
    }
}

/// A work unit that loads files on its own background thread.
///
/// The unit's scheduled body only starts and polls the loader; the reads
/// happen off-frame, so a slow disk costs the frame nothing. Progress is
/// reported through [`FileLoaderStatus`], which any thread may query.
#[derive(Debug)]
pub struct FileLoader {
    paths: Vec<PathBuf>,
    status: FileLoaderStatus,
    output: FileLoaderOutput,
    loader: Option<JoinHandle<()>>,
}

impl FileLoader {
    /// Creates a loader for the given paths. Reading begins the first time
    /// the unit is scheduled.
    #[must_use]
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self {
            paths,
            status: FileLoaderStatus {
                state: Arc::new(AtomicRunningState::new()),
            },
            output: FileLoaderOutput {
                results: Arc::new(Mutex::new(Vec::new())),
            },
            loader: None,
        }
    }

    /// A progress handle to keep before registering the loader.
    #[must_use]
    pub fn status(&self) -> FileLoaderStatus {
        self.status.clone()
    }

    /// A results handle to keep before registering the loader.
    #[must_use]
    pub fn output(&self) -> FileLoaderOutput {
        self.output.clone()
    }
}

impl Work for FileLoader {
    fn run(&mut self, _cx: &WorkContext<'_>) {
        if self.loader.is_some() || self.status.is_done() {
            // Subsequent frames just poll; completion is visible through the
            // status handle as soon as the loader thread stores it.
            if self.status.is_done() {
                if let Some(handle) = self.loader.take() {
                    let _ = handle.join();
                }
            }
            return;
        }

        let paths = std::mem::take(&mut self.paths);
        let status = self.status.clone();
        let output = self.output.clone();
        status.state.try_start();
        let spawned = std::thread::Builder::new()
            .name("framedag-file-loader".to_owned())
            .spawn(move || {
                for path in paths {
                    let contents = std::fs::read(&path);
                    output.results.lock().push(LoadedFile { path, contents });
                }
                status.state.store_complete();
            });
        match spawned {
            Ok(handle) => self.loader = Some(handle),
            Err(_err) => {
                // Loading is best-effort; leave the unit idle and report.
                self.status.state.reset();
                error!(error = %_err, "file loader thread spawn failed");
            }
        }
    }
}

impl Drop for FileLoader {
    fn drop(&mut self) {
        if let Some(handle) = self.loader.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loader_reports_not_started_before_scheduling() {
        let loader = FileLoader::new(vec![PathBuf::from("does-not-matter")]);
        assert_eq!(loader.status().state(), RunningState::NotStarted);
        assert!(loader.output().take().is_empty());
    }

    #[test]
    fn loader_reads_files_in_the_background() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("blob.bin");
        std::fs::File::create(&path)
            .and_then(|mut file| file.write_all(b"payload"))
            .expect("write fixture");

        let mut loader = FileLoader::new(vec![path.clone()]);
        let status = loader.status();
        let output = loader.output();

        // Drive the body directly; the scheduler would do the same.
        let config = crate::config::SchedulerConfig::default()
            .thread_count(1)
            .frame_rate(0);
        let sched =
            crate::scheduler::FrameScheduler::with_sink(config, Box::new(std::io::sink()))
                .expect("config is valid");
        let core = Arc::clone(sched.core_for_test());
        let storage = core.storage(0);
        let cx = WorkContext::new(&storage, &core);

        loader.run(&cx);
        while !status.is_done() {
            std::thread::yield_now();
        }
        loader.run(&cx);

        let results = output.take();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].path, path);
        assert_eq!(results[0].contents.as_deref().expect("read ok"), b"payload");
    }

    #[test]
    fn loader_surfaces_read_errors_per_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("missing.bin");

        let mut loader = FileLoader::new(vec![missing]);
        let status = loader.status();
        let output = loader.output();

        let config = crate::config::SchedulerConfig::default()
            .thread_count(1)
            .frame_rate(0);
        let sched =
            crate::scheduler::FrameScheduler::with_sink(config, Box::new(std::io::sink()))
                .expect("config is valid");
        let core = Arc::clone(sched.core_for_test());
        let storage = core.storage(0);
        let cx = WorkContext::new(&storage, &core);

        loader.run(&cx);
        while !status.is_done() {
            std::thread::yield_now();
        }
        let results = output.take();
        assert_eq!(results.len(), 1);
        assert!(results[0].contents.is_err());
    }
}
