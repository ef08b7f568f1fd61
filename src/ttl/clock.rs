//! Monotonic timestamps and swappable time sources.
//!
//! The TTL map ranks items by [`Timestamp`], a nanosecond count on a
//! monotonic axis supplied by a [`TimeSource`]. The source also owns the
//! single deferred-wakeup slot the map uses for eviction, so "what time is
//! it" and "run this later" stay on the same clock.
//!
//! Two sources are provided:
//!
//! - [`SystemClock`]: real time; wakeups run on a dedicated timer thread.
//! - [`ManualClock`]: virtual time for tests; `advance` moves the clock and
//!   runs due wakeups synchronously on the calling thread, which makes
//!   expiry scenarios fully deterministic and wakeups countable.
//!
//! ## Operations
//! - `now()`: current instant on the source's axis
//! - `schedule(after, job)`: arm the single wakeup slot
//! - `cancel_scheduled()`: disarm it without running the job
use std::ops::Add;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::rank::Rank;
use crate::ttl::timer::TimerWorker;

/// Nanoseconds since a [`TimeSource`]-defined epoch.
///
/// Ordered, copyable, and usable as a rank. Timestamps from different
/// sources are not comparable in any meaningful way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The source epoch.
    pub const ZERO: Timestamp = Timestamp(0);

    /// Builds a timestamp from raw nanoseconds since the epoch.
    pub fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Returns the raw nanosecond count.
    pub fn as_nanos(self) -> u64 {
        self.0
    }

    /// Returns the time elapsed since `earlier`, or zero if `earlier` is
    /// in this timestamp's future.
    pub fn saturating_since(self, earlier: Timestamp) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

impl Rank for Timestamp {
    #[inline]
    fn before(&self, other: &Self) -> bool {
        self < other
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        Timestamp(self.0 + rhs.as_nanos() as u64)
    }
}

/// A deferred wakeup handed to [`TimeSource::schedule`].
pub type TimerJob = Box<dyn FnOnce() + Send + 'static>;

/// Monotonic clock paired with a single deferred-wakeup slot.
///
/// Implementations must run a scheduled job exactly once, at or after its
/// deadline, unless it is cancelled first. Callers arm at most one job at a
/// time; scheduling while a job is pending replaces it.
pub trait TimeSource: Send + Sync + 'static {
    /// Returns the current instant.
    fn now(&self) -> Timestamp;

    /// Arms the wakeup slot: run `job` once `after` has elapsed.
    fn schedule(&self, after: Duration, job: TimerJob);

    /// Disarms the wakeup slot, dropping any pending job.
    fn cancel_scheduled(&self);
}

// ---------------------------------------------------------------------------
// SystemClock
// ---------------------------------------------------------------------------

/// Real-time source backed by [`Instant`] and a dedicated timer thread.
///
/// The epoch is the moment of construction. Dropping the clock shuts the
/// timer thread down; a pending job is discarded.
pub struct SystemClock {
    epoch: Instant,
    worker: TimerWorker,
}

impl SystemClock {
    /// Creates a clock and spawns its timer thread.
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            worker: TimerWorker::spawn(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.epoch.elapsed().as_nanos() as u64)
    }

    fn schedule(&self, after: Duration, job: TimerJob) {
        self.worker.schedule(after, job);
    }

    fn cancel_scheduled(&self) {
        self.worker.cancel();
    }
}

// ---------------------------------------------------------------------------
// ManualClock
// ---------------------------------------------------------------------------

struct ManualState {
    now: Timestamp,
    pending: Option<(Timestamp, TimerJob)>,
    wakeups: u64,
}

/// Virtual time source for deterministic tests.
///
/// Clones share the same clock. Time only moves through
/// [`advance`](ManualClock::advance), which fires due wakeups inline on the
/// calling thread, in deadline order, before letting time pass them.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use rankkit::ttl::{ManualClock, TimeSource};
///
/// let clock = ManualClock::new();
/// clock.schedule(Duration::from_secs(1), Box::new(|| {}));
/// clock.advance(Duration::from_secs(2));
/// assert_eq!(clock.wakeups(), 1);
/// ```
#[derive(Clone)]
pub struct ManualClock {
    state: Arc<Mutex<ManualState>>,
}

impl ManualClock {
    /// Creates a clock at the epoch with no pending wakeup.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ManualState {
                now: Timestamp::ZERO,
                pending: None,
                wakeups: 0,
            })),
        }
    }

    /// Moves the clock forward by `by`, running every wakeup whose deadline
    /// falls inside the window before time passes it.
    ///
    /// A job that schedules a follow-up wakeup inside the same window fires
    /// too, at its own deadline.
    pub fn advance(&self, by: Duration) {
        let target = {
            let state = self.state.lock();
            state.now + by
        };
        loop {
            let job = {
                let mut state = self.state.lock();
                match &state.pending {
                    Some((deadline, _)) if *deadline <= target => {
                        let deadline = *deadline;
                        if state.now < deadline {
                            state.now = deadline;
                        }
                        state.wakeups += 1;
                        let (_, job) = state.pending.take().unwrap();
                        Some(job)
                    }
                    _ => {
                        state.now = target;
                        None
                    }
                }
            };
            match job {
                Some(job) => job(),
                None => break,
            }
        }
    }

    /// Returns how many wakeups have fired since construction.
    pub fn wakeups(&self) -> u64 {
        self.state.lock().wakeups
    }

    /// Returns the deadline of the pending wakeup, if one is armed.
    pub fn pending_deadline(&self) -> Option<Timestamp> {
        self.state.lock().pending.as_ref().map(|(d, _)| *d)
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> Timestamp {
        self.state.lock().now
    }

    fn schedule(&self, after: Duration, job: TimerJob) {
        let mut state = self.state.lock();
        let deadline = state.now + after;
        state.pending = Some((deadline, job));
    }

    fn cancel_scheduled(&self) {
        self.state.lock().pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn timestamp_arithmetic() {
        let t = Timestamp::from_nanos(100);
        assert_eq!(t + Duration::from_nanos(50), Timestamp::from_nanos(150));
        assert_eq!(
            Timestamp::from_nanos(150).saturating_since(t),
            Duration::from_nanos(50)
        );
        assert_eq!(t.saturating_since(Timestamp::from_nanos(150)), Duration::ZERO);
        assert!(t.before(&Timestamp::from_nanos(101)));
        assert!(!t.before(&t));
    }

    #[test]
    fn manual_clock_fires_due_jobs_in_order() {
        let clock = ManualClock::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let f = fired.clone();
        let chain = clock.clone();
        clock.schedule(
            Duration::from_millis(10),
            Box::new(move || {
                f.fetch_add(1, Ordering::Relaxed);
                let f2 = f.clone();
                // follow-up inside the same advance window
                chain.schedule(
                    Duration::from_millis(10),
                    Box::new(move || {
                        f2.fetch_add(1, Ordering::Relaxed);
                    }),
                );
            }),
        );

        clock.advance(Duration::from_millis(5));
        assert_eq!(fired.load(Ordering::Relaxed), 0);

        clock.advance(Duration::from_millis(20));
        assert_eq!(fired.load(Ordering::Relaxed), 2);
        assert_eq!(clock.wakeups(), 2);
        assert_eq!(clock.now(), Timestamp::from_nanos(25_000_000));
    }

    #[test]
    fn manual_clock_cancel_drops_job() {
        let clock = ManualClock::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        clock.schedule(
            Duration::from_millis(1),
            Box::new(move || {
                f.fetch_add(1, Ordering::Relaxed);
            }),
        );
        clock.cancel_scheduled();
        clock.advance(Duration::from_millis(5));
        assert_eq!(fired.load(Ordering::Relaxed), 0);
        assert_eq!(clock.wakeups(), 0);
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(a <= b);
    }
}
