//! Counters shared by all sessions.

use std::collections::VecDeque;
use std::fmt;
use std::fmt::Display;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

/// Window over which the request rate is averaged.
pub const RATE_WINDOW: Duration = Duration::from_secs(180);

/// Requests per second over a sliding window, kept as one bucket per second.
///
/// Until a full window has passed since the first event, the rate is averaged over the time
/// elapsed so far.
#[derive(Debug)]
pub struct RateTracker {
    start: Instant,
    window_secs: u64,
    first_second: Option<u64>,
    /// `(second since start, events)`, oldest first
    buckets: VecDeque<(u64, u64)>,
}

impl RateTracker {
    #[must_use]
    pub fn new(window: Duration, start: Instant) -> Self {
        Self {
            start,
            window_secs: window.as_secs().max(1),
            first_second: None,
            buckets: VecDeque::new(),
        }
    }

    pub fn record(&mut self, now: Instant) {
        let second = self.second(now);
        self.first_second.get_or_insert(second);
        match self.buckets.back_mut() {
            Some((last, count)) if *last == second => *count += 1,
            _ => self.buckets.push_back((second, 1)),
        }
        self.evict(second);
    }

    /// Average events per second within the window ending at `now`.
    pub fn rate(&mut self, now: Instant) -> f64 {
        let current = self.second(now);
        self.evict(current);
        let Some(first) = self.first_second else {
            return 0.0;
        };
        let elapsed = current.saturating_sub(first).clamp(1, self.window_secs);
        let events: u64 = self.buckets.iter().map(|(_second, count)| count).sum();
        #[expect(
            clippy::cast_precision_loss,
            reason = "event counts stay far below 2^52"
        )]
        let (events, elapsed) = (events as f64, elapsed as f64);
        events / elapsed
    }

    fn second(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.start).as_secs()
    }

    fn evict(&mut self, current: u64) {
        while self
            .buckets
            .front()
            .is_some_and(|(second, _count)| second + self.window_secs <= current)
        {
            self.buckets.pop_front();
        }
    }
}

#[derive(Debug)]
pub struct BridgeStats {
    sessions: AtomicU64,
    requests: AtomicU64,
    served: AtomicU64,
    unavailable: AtomicU64,
    backpressure: AtomicU64,
    up_to_date: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    rate: Mutex<RateTracker>,
}

impl Default for BridgeStats {
    fn default() -> Self {
        Self {
            sessions: AtomicU64::new(0),
            requests: AtomicU64::new(0),
            served: AtomicU64::new(0),
            unavailable: AtomicU64::new(0),
            backpressure: AtomicU64::new(0),
            up_to_date: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            rate: Mutex::new(RateTracker::new(RATE_WINDOW, Instant::now())),
        }
    }
}

impl BridgeStats {
    pub fn session_opened(&self) {
        self.sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_closed(&self) {
        self.sessions.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.rate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(Instant::now());
    }

    pub fn record_served(&self) {
        self.served.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unavailable(&self) {
        self.unavailable.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_backpressure(&self) {
        self.backpressure.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_up_to_date(&self) {
        self.up_to_date.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        let requests_per_second = self
            .rate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .rate(Instant::now());
        StatsSnapshot {
            sessions: self.sessions.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
            served: self.served.load(Ordering::Relaxed),
            unavailable: self.unavailable.load(Ordering::Relaxed),
            backpressure: self.backpressure.load(Ordering::Relaxed),
            up_to_date: self.up_to_date.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            requests_per_second,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsSnapshot {
    pub sessions: u64,
    pub requests: u64,
    pub served: u64,
    pub unavailable: u64,
    pub backpressure: u64,
    pub up_to_date: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub requests_per_second: f64,
}

impl Display for StatsSnapshot {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "{} sessions, {} requests ({:.2}/s): {} served, {} up to date, {} unavailable, {} backpressure, cache {}/{} hits",
            self.sessions,
            self.requests,
            self.requests_per_second,
            self.served,
            self.up_to_date,
            self.unavailable,
            self.backpressure,
            self.cache_hits,
            self.cache_hits + self.cache_misses
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_forgets_old_events() {
        let start = Instant::now();
        let mut tracker = RateTracker::new(Duration::from_secs(10), start);
        for _ in 0..20 {
            tracker.record(start);
        }
        assert!((tracker.rate(start) - 20.0).abs() < 1e-9);
        tracker.record(start + Duration::from_secs(5));
        // averaged over the five seconds since the first event, not the whole window
        assert!((tracker.rate(start + Duration::from_secs(5)) - 4.2).abs() < 1e-9);
        // the first bucket leaves the window after ten seconds
        assert!((tracker.rate(start + Duration::from_secs(10)) - 0.1).abs() < 1e-9);
        assert!(tracker.rate(start + Duration::from_secs(60)).abs() < 1e-9);
    }

    #[test]
    fn idle_tracker_has_no_rate() {
        let start = Instant::now();
        let mut tracker = RateTracker::new(Duration::from_secs(10), start);
        assert!(tracker.rate(start + Duration::from_secs(3)).abs() < 1e-9);
        tracker.record(start + Duration::from_secs(4));
        assert!((tracker.rate(start + Duration::from_secs(6)) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn counters() {
        let stats = BridgeStats::default();
        stats.session_opened();
        stats.record_request();
        stats.record_request();
        stats.record_served();
        stats.record_backpressure();
        stats.record_cache_hit();
        stats.record_cache_miss();
        stats.record_cache_miss();
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.sessions, 1);
        assert_eq!(snapshot.requests, 2);
        assert_eq!(snapshot.served, 1);
        assert_eq!(snapshot.backpressure, 1);
        assert_eq!(snapshot.unavailable, 0);
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.cache_misses, 2);
        assert!(snapshot.to_string().contains("cache 1/3 hits"));
        assert!(snapshot.requests_per_second > 0.0);
        stats.session_closed();
        assert_eq!(stats.snapshot().sessions, 0);
    }
}
