//! Backend-agnostic transfer progress.
//!
//! Every adapter reports progress the same way: it feeds byte deltas into a
//! [`ProgressTranslator`] (usually through a [`ProgressTracker`]) and the
//! translator produces [`ProgressSnapshot`] values for the caller's
//! [`ProgressObserver`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonic tick source.
pub trait Clock: Send + Sync {
    /// Current tick count. Must never decrease.
    fn now_ticks(&self) -> u64;

    /// Number of ticks in one second.
    fn ticks_per_second(&self) -> u64;
}

/// Wall clock backed by [`Instant`], ticking in nanoseconds.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Creates a clock whose tick zero is now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ticks(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }

    fn ticks_per_second(&self) -> u64 {
        1_000_000_000
    }
}

/// Clock that only moves when told to. Used to make progress deterministic.
#[derive(Debug)]
pub struct ManualClock {
    ticks: AtomicU64,
    per_second: u64,
}

impl ManualClock {
    /// Creates a clock at tick zero with the given resolution.
    pub fn new(ticks_per_second: u64) -> Self {
        Self {
            ticks: AtomicU64::new(0),
            per_second: ticks_per_second.max(1),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, ticks: u64) {
        self.ticks.fetch_add(ticks, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    fn ticks_per_second(&self) -> u64 {
        self.per_second
    }
}

/// Immutable progress report for one transfer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    elapsed: Duration,
    rate: f64,
    transferred: u64,
    expected: u64,
}

impl ProgressSnapshot {
    /// Time since the transfer started.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Bytes per second over the last reporting interval.
    pub fn bytes_per_second(&self) -> f64 {
        self.rate
    }

    /// Cumulative bytes transferred.
    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    /// Expected total, `0` when unknown.
    pub fn expected(&self) -> u64 {
        self.expected
    }

    /// Fraction in `0.0..=1.0` (or above if the source outgrew its declared
    /// length). `None` while the expected length is unknown.
    pub fn percentage(&self) -> Option<f64> {
        (self.expected > 0).then(|| self.transferred as f64 / self.expected as f64)
    }
}

impl fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.percentage() {
            Some(p) => write!(
                f,
                "{}/{} bytes ({:.1}%) at {:.0} B/s",
                self.transferred,
                self.expected,
                p * 100.0,
                self.rate
            ),
            None => write!(f, "{} bytes at {:.0} B/s", self.transferred, self.rate),
        }
    }
}

/// Receives progress snapshots. Implemented for any matching closure.
pub trait ProgressObserver: Send + Sync {
    /// Called for every emitted snapshot, in order.
    fn on_progress(&self, snapshot: &ProgressSnapshot);
}

impl<F> ProgressObserver for F
where
    F: Fn(&ProgressSnapshot) + Send + Sync,
{
    fn on_progress(&self, snapshot: &ProgressSnapshot) {
        self(snapshot)
    }
}

/// Turns raw byte deltas into [`ProgressSnapshot`]s.
///
/// Keeps a total timer started at construction and an interval timer reset on
/// every reported chunk. Once the cumulative count reaches a known expected
/// length, later deltas are swallowed so observers see 100% exactly once.
pub struct ProgressTranslator {
    clock: Arc<dyn Clock>,
    started: u64,
    last: u64,
    last_rate: f64,
    transferred: u64,
    expected: u64,
    done: bool,
}

impl ProgressTranslator {
    /// Translator on the system clock. `expected == 0` means unknown.
    pub fn new(expected: u64) -> Self {
        Self::with_clock(expected, Arc::new(SystemClock::new()))
    }

    /// Translator on a caller supplied clock.
    pub fn with_clock(expected: u64, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_ticks();
        Self {
            clock,
            started: now,
            last: now,
            last_rate: 0.0,
            transferred: 0,
            expected,
            done: false,
        }
    }

    /// Cumulative bytes seen so far.
    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    /// Expected total, `0` when unknown.
    pub fn expected(&self) -> u64 {
        self.expected
    }

    /// Records `delta` new bytes and returns the snapshot to report, if any.
    pub fn record(&mut self, delta: u64) -> Option<ProgressSnapshot> {
        self.transferred = self.transferred.saturating_add(delta);
        if self.done || delta == 0 {
            return None;
        }

        let now = self.clock.now_ticks();
        // zero-length intervals count as one tick
        let interval = now.saturating_sub(self.last).max(1);
        self.last = now;
        self.last_rate = delta as f64 * self.clock.ticks_per_second() as f64 / interval as f64;

        if self.expected > 0 && self.transferred >= self.expected {
            self.done = true;
        }
        Some(self.snapshot(now))
    }

    /// Closes the transfer. For an unknown expected length the transferred
    /// total becomes the expected length and a final snapshot is returned.
    /// An empty transfer never reports anything.
    pub fn finish(&mut self) -> Option<ProgressSnapshot> {
        if self.done || self.expected > 0 {
            return None;
        }
        self.done = true;
        if self.transferred == 0 {
            return None;
        }
        self.expected = self.transferred;
        Some(self.snapshot(self.clock.now_ticks()))
    }

    fn snapshot(&self, now: u64) -> ProgressSnapshot {
        let ticks = now.saturating_sub(self.started) as u128;
        let nanos = ticks * 1_000_000_000 / self.clock.ticks_per_second().max(1) as u128;
        ProgressSnapshot {
            elapsed: Duration::from_nanos(nanos.min(u64::MAX as u128) as u64),
            rate: self.last_rate,
            transferred: self.transferred,
            expected: self.expected,
        }
    }
}

impl fmt::Debug for ProgressTranslator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressTranslator")
            .field("transferred", &self.transferred)
            .field("expected", &self.expected)
            .field("done", &self.done)
            .finish()
    }
}

/// A translator bound to an optional observer, for use inside adapters.
pub struct ProgressTracker<'a> {
    translator: ProgressTranslator,
    observer: Option<&'a dyn ProgressObserver>,
}

impl<'a> ProgressTracker<'a> {
    /// Tracker on the system clock.
    pub fn new(expected: u64, observer: Option<&'a dyn ProgressObserver>) -> Self {
        Self {
            translator: ProgressTranslator::new(expected),
            observer,
        }
    }

    /// Tracker around an existing translator.
    pub fn with_translator(
        translator: ProgressTranslator,
        observer: Option<&'a dyn ProgressObserver>,
    ) -> Self {
        Self {
            translator,
            observer,
        }
    }

    /// Reports `delta` transferred bytes.
    pub fn advance(&mut self, delta: u64) {
        let snapshot = self.translator.record(delta);
        self.emit(snapshot);
    }

    /// Reports completion.
    pub fn finish(&mut self) {
        let snapshot = self.translator.finish();
        self.emit(snapshot);
    }

    /// Cumulative bytes seen so far.
    pub fn transferred(&self) -> u64 {
        self.translator.transferred()
    }

    fn emit(&self, snapshot: Option<ProgressSnapshot>) {
        if let (Some(observer), Some(snapshot)) = (self.observer, snapshot) {
            observer.on_progress(&snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_rate_uses_interval_ticks() {
        let clock = Arc::new(ManualClock::new(1000));
        let mut t = ProgressTranslator::with_clock(300, clock.clone());

        clock.advance(500);
        let first = t.record(100).unwrap();
        assert_eq!(first.transferred(), 100);
        assert_eq!(first.bytes_per_second(), 200.0);
        assert_eq!(first.elapsed(), Duration::from_millis(500));

        clock.advance(100);
        let second = t.record(100).unwrap();
        assert_eq!(second.bytes_per_second(), 1000.0);
        assert_eq!(second.elapsed(), Duration::from_millis(600));
        assert!((second.percentage().unwrap() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_interval_is_guarded() {
        let clock = Arc::new(ManualClock::new(10));
        let mut t = ProgressTranslator::with_clock(0, clock);
        let s = t.record(5).unwrap();
        assert_eq!(s.bytes_per_second(), 50.0);
        assert!(s.percentage().is_none());
    }

    #[test]
    fn test_reports_after_completion_are_suppressed() {
        let clock = Arc::new(ManualClock::new(1));
        let mut t = ProgressTranslator::with_clock(10, clock.clone());
        clock.advance(1);
        assert_eq!(t.record(10).unwrap().percentage(), Some(1.0));
        clock.advance(1);
        assert!(t.record(0).is_none());
        assert!(t.record(3).is_none());
        assert!(t.finish().is_none());
    }

    #[test]
    fn test_zero_delta_produces_nothing() {
        let mut t = ProgressTranslator::new(10);
        assert!(t.record(0).is_none());
        assert_eq!(t.transferred(), 0);
    }

    #[test]
    fn test_finish_unknown_length() {
        let clock = Arc::new(ManualClock::new(1));
        let mut t = ProgressTranslator::with_clock(0, clock.clone());
        clock.advance(2);
        t.record(4);
        let last = t.finish().unwrap();
        assert_eq!(last.expected(), 4);
        assert_eq!(last.percentage(), Some(1.0));
        assert_eq!(last.bytes_per_second(), 2.0);
        assert!(t.finish().is_none());
    }

    #[test]
    fn test_empty_unknown_length_reports_nothing() {
        let clock = Arc::new(ManualClock::new(1));
        let mut t = ProgressTranslator::with_clock(0, clock.clone());
        clock.advance(3);
        assert!(t.record(0).is_none());
        assert!(t.finish().is_none());
        assert!(t.finish().is_none());
    }

    #[test]
    fn test_tracker_forwards_to_observer() {
        let seen = Mutex::new(Vec::new());
        let observer = |s: &ProgressSnapshot| seen.lock().unwrap().push(s.transferred());
        let mut tracker = ProgressTracker::new(6, Some(&observer));
        tracker.advance(2);
        tracker.advance(0);
        tracker.advance(4);
        tracker.advance(1);
        tracker.finish();
        assert_eq!(*seen.lock().unwrap(), vec![2, 6]);
        assert_eq!(tracker.transferred(), 7);
    }

    #[test]
    fn test_display() {
        let clock = Arc::new(ManualClock::new(1));
        let mut t = ProgressTranslator::with_clock(4, clock.clone());
        clock.advance(1);
        let s = t.record(1).unwrap();
        assert_eq!(s.to_string(), "1/4 bytes (25.0%) at 1 B/s");
    }
}
