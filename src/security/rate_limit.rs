//! Fixed-window rate limiting per key.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use crate::clock::{Clock, TokioClock};
use crate::config::PolicyConfig;

/// Verdict of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted {
        /// Requests still allowed in the current window.
        remaining: u32,
    },
    Rejected {
        /// Time until the window rolls over.
        retry_after: Duration,
    },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }
}

/// Current window of one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitSnapshot {
    pub limit: u32,
    pub count: u32,
    pub window_ms: u64,
    pub resets_in_ms: u64,
}

#[derive(Debug)]
struct WindowState {
    window_start: Instant,
    count: u32,
}

/// One key's counter.
#[derive(Debug)]
pub struct FixedWindow {
    limit: u32,
    window: Duration,
    state: Mutex<WindowState>,
}

impl FixedWindow {
    pub fn new(limit: u32, window: Duration, now: Instant) -> Self {
        Self {
            limit,
            window,
            state: Mutex::new(WindowState {
                window_start: now,
                count: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WindowState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn roll(&self, st: &mut WindowState, now: Instant) {
        if now.saturating_duration_since(st.window_start) >= self.window {
            st.window_start = now;
            st.count = 0;
        }
    }

    pub fn try_acquire(&self, now: Instant) -> Admission {
        let mut st = self.lock();
        self.roll(&mut st, now);
        if st.count < self.limit {
            st.count += 1;
            Admission::Admitted {
                remaining: self.limit - st.count,
            }
        } else {
            Admission::Rejected {
                retry_after: self
                    .window
                    .saturating_sub(now.saturating_duration_since(st.window_start)),
            }
        }
    }

    /// Read the window as a request at `now` would see it, without rolling it.
    pub fn snapshot(&self, now: Instant) -> RateLimitSnapshot {
        let st = self.lock();
        let elapsed = now.saturating_duration_since(st.window_start);
        let (count, resets_in) = if elapsed >= self.window {
            (0, self.window)
        } else {
            (st.count, self.window - elapsed)
        };
        RateLimitSnapshot {
            limit: self.limit,
            count,
            window_ms: self.window.as_millis() as u64,
            resets_in_ms: resets_in.as_millis() as u64,
        }
    }

    /// True once the window has expired, so a fresh bucket would behave the same.
    fn is_idle(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.lock().window_start) >= self.window
    }

    pub fn reset(&self, now: Instant) {
        let mut st = self.lock();
        st.window_start = now;
        st.count = 0;
    }
}

/// Tracked keys before a new key triggers a sweep of idle buckets.
const SWEEP_THRESHOLD: usize = 1024;

/// Keyed fixed-window limiter.
///
/// Buckets live in a sharded map so unrelated keys never contend; each bucket
/// serializes its own admissions. Once the map holds [`SWEEP_THRESHOLD`] keys,
/// inserting a new key first drops buckets whose window has expired, and the
/// next sweep waits until the map has doubled again.
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    clock: Arc<dyn Clock>,
    buckets: DashMap<String, Arc<FixedWindow>>,
    sweep_at: AtomicUsize,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("limit", &self.limit)
            .field("window", &self.window)
            .field("keys", &self.buckets.len())
            .finish()
    }
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            clock: Arc::new(TokioClock),
            buckets: DashMap::new(),
            sweep_at: AtomicUsize::new(SWEEP_THRESHOLD),
        }
    }

    /// Limiter for a policy, or `None` if the policy sets no rate limit.
    pub fn from_policy(policy: &PolicyConfig) -> Option<Self> {
        policy
            .rate_limit
            .map(|limit| Self::new(limit, policy.rate_window()))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn bucket(&self, key: &str) -> Arc<FixedWindow> {
        if let Some(bucket) = self.buckets.get(key) {
            return Arc::clone(bucket.value());
        }
        let now = self.clock.now();
        if self.buckets.len() >= self.sweep_at.load(Ordering::Relaxed) {
            self.sweep(now);
        }
        let bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(FixedWindow::new(self.limit, self.window, now)));
        Arc::clone(bucket.value())
    }

    /// Admit or reject one request for `key`.
    pub fn try_acquire(&self, key: &str) -> Admission {
        let bucket = self.bucket(key);
        let admission = bucket.try_acquire(self.clock.now());
        if let Admission::Rejected { retry_after } = admission {
            tracing::debug!(key, retry_after_ms = retry_after.as_millis() as u64, "Rate limit exceeded");
        }
        admission
    }

    /// Window state of `key`, if it has been seen.
    pub fn snapshot(&self, key: &str) -> Option<RateLimitSnapshot> {
        let bucket = self.buckets.get(key).map(|b| Arc::clone(b.value()))?;
        Some(bucket.snapshot(self.clock.now()))
    }

    /// Start a fresh window for `key`.
    pub fn reset(&self, key: &str) {
        if let Some(bucket) = self.buckets.get(key).map(|b| Arc::clone(b.value())) {
            bucket.reset(self.clock.now());
        }
    }

    /// Drop every bucket whose window has expired. Returns how many were dropped.
    pub fn evict_idle(&self) -> usize {
        let before = self.buckets.len();
        self.sweep(self.clock.now());
        before.saturating_sub(self.buckets.len())
    }

    fn sweep(&self, now: Instant) {
        // A bucket cloned out of the map is in use and stays.
        self.buckets
            .retain(|_, bucket| Arc::strong_count(bucket) > 1 || !bucket.is_idle(now));
        let next = (self.buckets.len() * 2).max(SWEEP_THRESHOLD);
        self.sweep_at.store(next, Ordering::Relaxed);
        tracing::debug!(keys = self.buckets.len(), next_sweep = next, "Swept idle rate-limit buckets");
    }

    /// Number of keys tracked.
    pub fn tracked_keys(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter(limit: u32, window: Duration) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (RateLimiter::new(limit, window).with_clock(clock.clone()), clock)
    }

    #[test]
    fn test_fourth_request_rejected_until_window_rolls() {
        let (rl, clock) = limiter(3, Duration::from_secs(5));
        assert_eq!(rl.try_acquire("alice"), Admission::Admitted { remaining: 2 });
        assert_eq!(rl.try_acquire("alice"), Admission::Admitted { remaining: 1 });
        assert_eq!(rl.try_acquire("alice"), Admission::Admitted { remaining: 0 });

        clock.advance(Duration::from_secs(2));
        assert_eq!(
            rl.try_acquire("alice"),
            Admission::Rejected {
                retry_after: Duration::from_secs(3)
            }
        );

        clock.advance(Duration::from_secs(3));
        assert_eq!(rl.try_acquire("alice"), Admission::Admitted { remaining: 2 });
    }

    #[test]
    fn test_exhausted_window_rejects_deterministically() {
        let (rl, _clock) = limiter(2, Duration::from_secs(1));
        assert!(rl.try_acquire("k").is_admitted());
        assert!(rl.try_acquire("k").is_admitted());
        for _ in 0..5 {
            assert!(!rl.try_acquire("k").is_admitted());
        }
        assert_eq!(rl.snapshot("k").unwrap().count, 2);
    }

    #[test]
    fn test_keys_are_independent() {
        let (rl, _clock) = limiter(1, Duration::from_secs(5));
        assert!(rl.try_acquire("alice").is_admitted());
        assert!(!rl.try_acquire("alice").is_admitted());
        assert!(rl.try_acquire("bob").is_admitted());
        assert_eq!(rl.tracked_keys(), 2);
    }

    #[test]
    fn test_zero_limit_rejects_everything() {
        let (rl, _clock) = limiter(0, Duration::from_secs(5));
        assert!(!rl.try_acquire("alice").is_admitted());
    }

    #[test]
    fn test_snapshot_and_reset() {
        let (rl, clock) = limiter(3, Duration::from_secs(5));
        assert!(rl.snapshot("alice").is_none());

        rl.try_acquire("alice");
        rl.try_acquire("alice");
        clock.advance(Duration::from_secs(1));
        let snapshot = rl.snapshot("alice").unwrap();
        assert_eq!(snapshot.count, 2);
        assert_eq!(snapshot.resets_in_ms, 4000);

        rl.reset("alice");
        assert_eq!(rl.snapshot("alice").unwrap().count, 0);
    }

    #[test]
    fn test_snapshot_leaves_window_untouched() {
        let admitted_late = |observe: bool| {
            let (rl, clock) = limiter(3, Duration::from_secs(5));
            for _ in 0..3 {
                assert!(rl.try_acquire("k").is_admitted());
            }
            clock.advance(Duration::from_secs(6));
            if observe {
                let snapshot = rl.snapshot("k").unwrap();
                assert_eq!(snapshot.count, 0);
                assert_eq!(snapshot.resets_in_ms, 5000);
            }
            clock.advance(Duration::from_secs(4));
            let mut admitted = (0..3).filter(|_| rl.try_acquire("k").is_admitted()).count();
            clock.advance(Duration::from_secs(1));
            admitted += (0..3).filter(|_| rl.try_acquire("k").is_admitted()).count();
            admitted
        };

        assert_eq!(admitted_late(false), 3);
        assert_eq!(admitted_late(true), 3);
    }

    #[test]
    fn test_idle_buckets_are_evicted() {
        let (rl, clock) = limiter(1, Duration::from_secs(5));
        for user in 0..SWEEP_THRESHOLD {
            rl.try_acquire(&format!("user-{user}"));
        }
        assert_eq!(rl.tracked_keys(), SWEEP_THRESHOLD);

        clock.advance(Duration::from_secs(3));
        assert!(!rl.try_acquire("user-0").is_admitted());
        assert_eq!(rl.tracked_keys(), SWEEP_THRESHOLD);

        clock.advance(Duration::from_secs(3));
        assert!(rl.try_acquire("newcomer").is_admitted());
        assert_eq!(rl.tracked_keys(), 1);
        assert!(rl.snapshot("user-0").is_none());
    }

    #[test]
    fn test_evict_idle_keeps_live_windows() {
        let (rl, clock) = limiter(2, Duration::from_secs(5));
        rl.try_acquire("alice");
        clock.advance(Duration::from_secs(4));
        rl.try_acquire("bob");
        assert_eq!(rl.evict_idle(), 0);

        clock.advance(Duration::from_secs(2));
        assert_eq!(rl.evict_idle(), 1);
        assert!(rl.snapshot("alice").is_none());
        assert_eq!(rl.snapshot("bob").unwrap().count, 1);
    }

    #[test]
    fn test_from_policy() {
        assert!(RateLimiter::from_policy(&PolicyConfig::default()).is_none());
        let policy = PolicyConfig {
            rate_limit: Some(10),
            ..PolicyConfig::default()
        };
        let rl = RateLimiter::from_policy(&policy).unwrap();
        assert_eq!(rl.limit(), 10);
        assert_eq!(rl.window(), Duration::from_millis(5000));
    }

    #[test]
    fn test_concurrent_admissions_respect_limit() {
        let (rl, _clock) = limiter(50, Duration::from_secs(60));
        let rl = Arc::new(rl);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let rl = Arc::clone(&rl);
                std::thread::spawn(move || {
                    (0..20).filter(|_| rl.try_acquire("shared").is_admitted()).count()
                })
            })
            .collect();
        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 50);
    }
}
