//! End-to-end scheduling scenarios: dependency chains, diamonds, affinity,
//! and panic propagation.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use framedag::{platform, FrameScheduler, SchedulerConfig, Work, WorkContext};

#[derive(Debug, Clone)]
struct Span {
    name: &'static str,
    begin: u64,
    end: u64,
    thread: usize,
}

/// Records an execution span per run, with an optional busy period so
/// concurrency is observable.
struct Recorder {
    name: &'static str,
    hold: Duration,
    spans: Arc<Mutex<Vec<Span>>>,
}

impl Recorder {
    fn new(name: &'static str, hold: Duration, spans: &Arc<Mutex<Vec<Span>>>) -> Box<Self> {
        Box::new(Self {
            name,
            hold,
            spans: Arc::clone(spans),
        })
    }
}

impl Work for Recorder {
    fn run(&mut self, cx: &WorkContext<'_>) {
        let begin = platform::timestamp();
        if !self.hold.is_zero() {
            std::thread::sleep(self.hold);
        }
        let end = platform::timestamp();
        self.spans.lock().unwrap().push(Span {
            name: self.name,
            begin,
            end,
            thread: cx.thread_index(),
        });
    }
}

fn scheduler(threads: usize) -> FrameScheduler {
    let config = SchedulerConfig::default()
        .thread_count(threads)
        .frame_rate(0)
        .log_work_units(false);
    FrameScheduler::with_sink(config, Box::new(std::io::sink())).expect("config is valid")
}

fn span_of<'a>(spans: &'a [Span], name: &str) -> &'a Span {
    spans
        .iter()
        .find(|span| span.name == name)
        .unwrap_or_else(|| panic!("unit {name} did not run"))
}

// ── Chain ───────────────────────────────────────────────────────────────

#[test]
fn chain_runs_in_dependency_order() {
    framedag::test_phase!("chain_runs_in_dependency_order");
    let spans = Arc::new(Mutex::new(Vec::new()));
    let mut sched = scheduler(1);
    let a = sched.add_work(Recorder::new("A", Duration::ZERO, &spans));
    let b = sched.add_work(Recorder::new("B", Duration::ZERO, &spans));
    let c = sched.add_work(Recorder::new("C", Duration::ZERO, &spans));
    sched.add_dependency(b, a).unwrap();
    sched.add_dependency(c, b).unwrap();
    sched.sort_all(true);

    sched.do_one_frame().expect("frame should run");

    let spans = spans.lock().unwrap();
    let order: Vec<&str> = spans.iter().map(|span| span.name).collect();
    assert_eq!(order, vec!["A", "B", "C"]);
    for pair in spans.windows(2) {
        assert!(
            pair[0].end <= pair[1].begin + 1,
            "{} (end {}) must finish before {} (begin {})",
            pair[0].name,
            pair[0].end,
            pair[1].name,
            pair[1].begin
        );
    }
    framedag::test_complete!("chain_runs_in_dependency_order");
}

// ── Diamond ─────────────────────────────────────────────────────────────

#[test]
fn diamond_runs_the_middle_in_parallel() {
    framedag::test_phase!("diamond_runs_the_middle_in_parallel");
    let spans = Arc::new(Mutex::new(Vec::new()));
    let mut sched = scheduler(2);
    let hold = Duration::from_millis(40);
    let a = sched.add_work(Recorder::new("A", Duration::ZERO, &spans));
    let b = sched.add_work(Recorder::new("B", hold, &spans));
    let c = sched.add_work(Recorder::new("C", hold, &spans));
    let d = sched.add_work(Recorder::new("D", Duration::ZERO, &spans));
    sched.add_dependency(b, a).unwrap();
    sched.add_dependency(c, a).unwrap();
    sched.add_dependency(d, b).unwrap();
    sched.add_dependency(d, c).unwrap();
    sched.sort_all(true);

    sched.do_one_frame().expect("frame should run");

    let spans = spans.lock().unwrap();
    assert_eq!(spans.len(), 4);
    let (a, b, c, d) = (
        span_of(&spans, "A"),
        span_of(&spans, "B"),
        span_of(&spans, "C"),
        span_of(&spans, "D"),
    );

    assert!(a.end <= b.begin + 1, "A must finish before B starts");
    assert!(a.end <= c.begin + 1, "A must finish before C starts");
    assert!(b.end <= d.begin + 1, "B must finish before D starts");
    assert!(c.end <= d.begin + 1, "C must finish before D starts");

    assert_ne!(b.thread, c.thread, "B and C should use distinct threads");
    assert!(
        b.begin < c.end && c.begin < b.end,
        "B [{}, {}] and C [{}, {}] should overlap",
        b.begin,
        b.end,
        c.begin,
        c.end
    );
    framedag::test_complete!("diamond_runs_the_middle_in_parallel");
}

// ── Affinity ────────────────────────────────────────────────────────────

#[test]
fn affinity_units_stay_on_the_registrar_thread() {
    framedag::test_phase!("affinity_units_stay_on_the_registrar_thread");
    let spans = Arc::new(Mutex::new(Vec::new()));
    let mut sched = scheduler(2);
    let a = sched.add_work(Recorder::new("A", Duration::ZERO, &spans));
    let x = sched.add_work_affinity(Recorder::new("X", Duration::from_millis(5), &spans));
    let c = sched.add_work(Recorder::new("C", Duration::ZERO, &spans));
    sched.add_dependency(x, a).unwrap();
    sched.add_dependency(c, x).unwrap();
    sched.sort_all(true);

    for _ in 0..4 {
        sched.do_one_frame().expect("frame should run");
    }

    let spans = spans.lock().unwrap();
    assert_eq!(spans.len(), 12, "three units over four frames");
    for span in spans.iter().filter(|span| span.name == "X") {
        assert_eq!(span.thread, 0, "affinity work must run on the registrar");
    }
    framedag::test_complete!("affinity_units_stay_on_the_registrar_thread");
}

// ── Exactly-once and reset ──────────────────────────────────────────────

#[test]
fn every_unit_runs_exactly_once_per_frame() {
    struct Count(Arc<AtomicUsize>);
    impl Work for Count {
        fn run(&mut self, _cx: &WorkContext<'_>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let mut sched = scheduler(4);
    let mut counters = Vec::new();
    for _ in 0..12 {
        let counter = Arc::new(AtomicUsize::new(0));
        sched.add_work(Box::new(Count(Arc::clone(&counter))));
        counters.push(counter);
    }
    sched.sort_all(true);

    for frame in 1..=5 {
        sched.do_one_frame().expect("frame should run");
        for counter in &counters {
            assert_eq!(counter.load(Ordering::SeqCst), frame);
        }
    }
    assert_eq!(sched.frame_count(), 5);
}

// ── Panic propagation ───────────────────────────────────────────────────

#[test]
fn a_panicking_unit_aborts_the_frame() {
    struct Explode;
    impl Work for Explode {
        fn run(&mut self, _cx: &WorkContext<'_>) {
            panic!("unit body failure");
        }
    }

    let mut sched = scheduler(1);
    sched.add_work(Box::new(Explode));
    sched.sort_all(true);

    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| sched.do_one_frame()));
    assert!(outcome.is_err(), "the unit panic must unwind out of the frame");
}

// ── Dependent counts (scenario from the scheduler's public API) ─────────

#[test]
fn dependent_counts_track_edge_edits() {
    let spans = Arc::new(Mutex::new(Vec::new()));
    let mut sched = scheduler(1);
    let a = sched.add_work(Recorder::new("A", Duration::ZERO, &spans));
    let b = sched.add_work(Recorder::new("B", Duration::ZERO, &spans));
    let c = sched.add_work(Recorder::new("C", Duration::ZERO, &spans));
    sched.add_dependency(b, a).unwrap();
    sched.add_dependency(c, a).unwrap();

    assert_eq!(sched.dependent_count_of(a), 2);
    assert_eq!(sched.dependent_count_of(b), 0);
    assert_eq!(sched.dependent_count_of(c), 0);

    let d = sched.add_work(Recorder::new("D", Duration::ZERO, &spans));
    sched.add_dependency(d, b).unwrap();
    assert_eq!(sched.dependent_count_of(a), 3);

    sched.remove_dependency(d, b).unwrap();
    assert_eq!(sched.dependent_count_of(a), 2);

    sched.clear_dependencies(b).unwrap();
    assert_eq!(sched.dependent_count_of(a), 1);
}
