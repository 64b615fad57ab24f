use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::trace;

/// Default number of newly searched nodes required between reports.
pub const DEFAULT_REPORT_EVERY_NODES: u64 = 512;

/// Default minimum wall-clock time between reports.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_millis(200);

/// Progress callback: `(searched, total)`.
pub type ProgressFn<'a> = dyn Fn(u64, u64) + Sync + 'a;

/// A point-in-time view of the search counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub searched: u64,
    pub total: u64,
}

/// When throttled reports may be pushed to the caller. Both thresholds must
/// be met.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressThrottle {
    pub every_nodes: u64,
    pub interval: Duration,
}

impl Default for ProgressThrottle {
    fn default() -> Self {
        Self {
            every_nodes: DEFAULT_REPORT_EVERY_NODES,
            interval: DEFAULT_REPORT_INTERVAL,
        }
    }
}

#[derive(Debug)]
struct LastReport {
    snapshot: ProgressSnapshot,
    at: Instant,
    reported: bool,
}

/// Searched/total counters shared by all workers of one search, plus the
/// throttling state for progress callbacks.
///
/// `total` only grows as children are discovered and is always bumped before
/// the corresponding nodes become visible to workers, so a snapshot never
/// shows `searched > total`.
#[derive(Debug)]
pub struct ProgressTracker {
    searched: AtomicU64,
    total: AtomicU64,
    throttle: ProgressThrottle,
    last: Mutex<LastReport>,
}

impl ProgressTracker {
    pub fn new(initial_total: u64, throttle: ProgressThrottle) -> Self {
        Self {
            searched: AtomicU64::new(0),
            total: AtomicU64::new(initial_total),
            throttle,
            last: Mutex::new(LastReport {
                snapshot: ProgressSnapshot::default(),
                at: Instant::now(),
                reported: false,
            }),
        }
    }

    /// Counts one dequeued node and returns the new searched count.
    pub fn record_searched(&self) -> u64 {
        self.searched.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn add_total(&self, discovered: u64) {
        self.total.fetch_add(discovered, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        // searched first: total can only have grown by the time it is read.
        let searched = self.searched.load(Ordering::SeqCst);
        let total = self.total.load(Ordering::SeqCst);
        ProgressSnapshot { searched, total }
    }

    /// Reports if the throttle allows it, or unconditionally once everything
    /// discovered so far has been searched.
    pub fn maybe_report(&self, sink: Option<&ProgressFn<'_>>) {
        self.report(sink, false);
    }

    /// Pushes a final report unless these exact counts were already reported.
    pub fn flush(&self, sink: Option<&ProgressFn<'_>>) {
        self.report(sink, true);
    }

    fn report(&self, sink: Option<&ProgressFn<'_>>, force: bool) {
        let Some(sink) = sink else {
            return;
        };

        // Reports are delivered under the lock so the caller sees
        // non-decreasing counts.
        let mut last = self.last.lock();
        let snapshot = self.snapshot();
        if last.reported && last.snapshot == snapshot {
            return;
        }

        let caught_up = snapshot.searched == snapshot.total;
        if !force && !caught_up {
            let new_nodes = snapshot.searched.saturating_sub(last.snapshot.searched);
            let enough_nodes = new_nodes >= self.throttle.every_nodes;
            let enough_time = last.at.elapsed() >= self.throttle.interval;
            if !(enough_nodes && enough_time) {
                return;
            }
        }

        trace!(
            "Progress: {}/{} keys searched",
            snapshot.searched,
            snapshot.total
        );
        last.snapshot = snapshot;
        last.at = Instant::now();
        last.reported = true;
        sink(snapshot.searched, snapshot.total);
    }
}
