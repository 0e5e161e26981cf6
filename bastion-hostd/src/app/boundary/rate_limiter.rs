use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

#[derive(Debug)]
struct Tracker {
    timestamps: VecDeque<Instant>,
    last_used_at: Instant,
    limit: u32,
    window: Duration,
}

impl Tracker {
    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.timestamps.front() {
            if now.saturating_duration_since(*front) >= self.window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct RateOccupancy {
    pub channel: String,
    pub calls_in_window: usize,
    pub limit: u32,
    pub window_ms: u64,
    pub idle_ms: u64,
}

/// Sliding-window call counter per channel. Rejected attempts are not
/// recorded, so a caller hammering a limited channel does not extend its own
/// lockout.
pub struct RateLimiter {
    trackers: Mutex<HashMap<String, Tracker>>,
    cleanup_threshold: Duration,
}

impl RateLimiter {
    pub fn new(cleanup_threshold: Duration) -> Self {
        Self {
            trackers: Mutex::new(HashMap::new()),
            cleanup_threshold,
        }
    }

    pub fn check(&self, channel: &str, limit: u32, window: Duration, now: Instant) -> RateDecision {
        let mut trackers = self.trackers.lock();
        let tracker = trackers
            .entry(channel.to_string())
            .or_insert_with(|| Tracker {
                timestamps: VecDeque::new(),
                last_used_at: now,
                limit,
                window,
            });
        tracker.limit = limit;
        tracker.window = window;
        tracker.last_used_at = now;
        tracker.prune(now);

        if tracker.timestamps.len() >= limit as usize {
            let retry_after = tracker
                .timestamps
                .front()
                .map(|oldest| window.saturating_sub(now.saturating_duration_since(*oldest)))
                .unwrap_or(window);
            return RateDecision::Limited { retry_after };
        }
        tracker.timestamps.push_back(now);
        RateDecision::Allowed {
            remaining: limit.saturating_sub(tracker.timestamps.len() as u32),
        }
    }

    /// Drops trackers idle for longer than the cleanup threshold.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut trackers = self.trackers.lock();
        let before = trackers.len();
        trackers.retain(|_, tracker| {
            now.saturating_duration_since(tracker.last_used_at) <= self.cleanup_threshold
        });
        before - trackers.len()
    }

    pub fn occupancy(&self, now: Instant) -> Vec<RateOccupancy> {
        let trackers = self.trackers.lock();
        let mut out: Vec<RateOccupancy> = trackers
            .iter()
            .map(|(channel, tracker)| RateOccupancy {
                channel: channel.clone(),
                calls_in_window: tracker
                    .timestamps
                    .iter()
                    .filter(|at| now.saturating_duration_since(**at) < tracker.window)
                    .count(),
                limit: tracker.limit,
                window_ms: tracker.window.as_millis() as u64,
                idle_ms: now.saturating_duration_since(tracker.last_used_at).as_millis() as u64,
            })
            .collect();
        out.sort_by(|a, b| a.channel.cmp(&b.channel));
        out
    }

    pub fn tracked_channels(&self) -> usize {
        self.trackers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn window_budget_and_recovery() {
        let limiter = RateLimiter::new(Duration::from_secs(300));
        let window = Duration::from_secs(1);
        let start = Instant::now();
        for i in 0..3 {
            assert_eq!(
                limiter.check("a", 3, window, start),
                RateDecision::Allowed { remaining: 2 - i }
            );
        }
        let later = start + Duration::from_millis(400);
        assert_eq!(
            limiter.check("a", 3, window, later),
            RateDecision::Limited {
                retry_after: Duration::from_millis(600)
            }
        );
        // Other channels have their own budget.
        assert!(matches!(
            limiter.check("b", 3, window, later),
            RateDecision::Allowed { .. }
        ));
        assert!(matches!(
            limiter.check("a", 3, window, start + window),
            RateDecision::Allowed { .. }
        ));
    }

    #[test]
    fn sweep_removes_idle_trackers_only() {
        let limiter = RateLimiter::new(Duration::from_secs(10));
        let start = Instant::now();
        limiter.check("old", 5, Duration::from_secs(1), start);
        limiter.check("fresh", 5, Duration::from_secs(1), start + Duration::from_secs(9));
        assert_eq!(limiter.sweep(start + Duration::from_secs(11)), 1);
        let occupancy = limiter.occupancy(start + Duration::from_secs(11));
        assert_eq!(occupancy.len(), 1);
        assert_eq!(occupancy[0].channel, "fresh");
        assert_eq!(occupancy[0].idle_ms, 2_000);
    }

    proptest! {
        #[test]
        fn exactly_limit_calls_pass(limit in 1u32..50, extra in 1u32..10) {
            let limiter = RateLimiter::new(Duration::from_secs(60));
            let now = Instant::now();
            let window = Duration::from_secs(5);
            let mut allowed = 0;
            for _ in 0..(limit + extra) {
                if let RateDecision::Allowed { .. } = limiter.check("c", limit, window, now) {
                    allowed += 1;
                }
            }
            prop_assert_eq!(allowed, limit);
            let occupancy = limiter.occupancy(now);
            prop_assert_eq!(occupancy[0].calls_in_window, limit as usize);
            let after = limiter.check("c", limit, window, now + window);
            prop_assert!(
                matches!(after, RateDecision::Allowed { .. }),
                "calls pass again after the window"
            );
        }
    }
}
