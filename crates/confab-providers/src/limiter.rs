use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// Sliding-window admission control for one provider.
///
/// Invariant: at any instant the number of recorded timestamps inside
/// `[now - window, now]` never exceeds `max_requests`. Blocked callers
/// re-contend after sleeping; fairness is best-effort, not FIFO-strict.
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// `max_requests` and `window` must both be non-zero.
    pub fn new(max_requests: usize, window: Duration) -> Self {
        assert!(max_requests > 0, "max_requests must be positive");
        assert!(!window.is_zero(), "window must be positive");
        Self {
            max_requests,
            window,
            timestamps: Mutex::new(VecDeque::new()),
        }
    }

    pub fn per_minute(max_requests: usize) -> Self {
        Self::new(max_requests, Duration::from_secs(60))
    }

    /// Record one request, suspending first if the window is full.
    /// Returns how long the caller waited.
    pub async fn wait_if_needed(&self) -> Duration {
        let started = Instant::now();
        loop {
            let sleep_until = {
                let mut ts = self.timestamps.lock().unwrap();
                let now = Instant::now();
                Self::prune(&mut ts, now, self.window);

                if ts.len() < self.max_requests {
                    ts.push_back(now);
                    return started.elapsed();
                }
                // Window full: wake when the oldest entry ages out.
                *ts.front().expect("non-empty when full") + self.window
            };

            debug!(
                wait_ms = sleep_until
                    .saturating_duration_since(Instant::now())
                    .as_millis() as u64,
                "rate limit reached, waiting"
            );
            tokio::time::sleep_until(sleep_until).await;
        }
    }

    /// Non-blocking inquiry: would a request proceed right now?
    pub fn can_proceed(&self) -> bool {
        let mut ts = self.timestamps.lock().unwrap();
        let now = Instant::now();
        Self::prune(&mut ts, now, self.window);
        ts.len() < self.max_requests
    }

    /// Drop all request history.
    pub fn reset(&self) {
        self.timestamps.lock().unwrap().clear();
    }

    fn prune(ts: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(front) = ts.front() {
            if now.duration_since(*front) >= window {
                ts.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn admits_up_to_max_without_waiting() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        for _ in 0..3 {
            let waited = limiter.wait_if_needed().await;
            assert_eq!(waited, Duration::ZERO);
        }
        assert!(!limiter.can_proceed());
    }

    #[tokio::test(start_paused = true)]
    async fn blocks_until_window_frees_a_slot() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        limiter.wait_if_needed().await;
        tokio::time::advance(Duration::from_secs(10)).await;
        limiter.wait_if_needed().await;

        // Third request must wait until the first entry ages out (50s).
        let waited = limiter.wait_if_needed().await;
        assert!(waited >= Duration::from_secs(50));
        assert!(waited < Duration::from_secs(51));
    }

    #[tokio::test(start_paused = true)]
    async fn never_more_than_max_in_any_window() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let mut grant_times = Vec::new();
        for _ in 0..6 {
            limiter.wait_if_needed().await;
            grant_times.push(Instant::now());
        }
        for i in 0..grant_times.len() {
            let in_window = grant_times
                .iter()
                .filter(|t| {
                    **t >= grant_times[i]
                        && t.duration_since(grant_times[i]) < Duration::from_secs(60)
                })
                .count();
            assert!(in_window <= 2, "window starting at grant {i} holds {in_window}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reset_clears_history() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        limiter.wait_if_needed().await;
        assert!(!limiter.can_proceed());
        limiter.reset();
        assert!(limiter.can_proceed());
    }

    #[test]
    #[should_panic(expected = "max_requests must be positive")]
    fn zero_max_requests_is_rejected() {
        let _ = RateLimiter::new(0, Duration::from_secs(1));
    }
}
