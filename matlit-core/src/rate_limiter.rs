//! Client-side request rate limiter for the external services.
//!
//! Proactively throttles requests to stay within each provider's
//! requests-per-minute budget instead of relying on 429 backpressure.

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// A sliding-window counter of recent requests.
#[derive(Debug)]
pub struct SlidingWindow {
    rpm: usize,
    /// Timestamps of recent requests within the window.
    requests_window: VecDeque<Instant>,
    window: Duration,
}

impl SlidingWindow {
    pub fn new(rpm: usize) -> Self {
        Self::with_window(rpm, Duration::from_secs(60))
    }

    pub fn with_window(rpm: usize, window: Duration) -> Self {
        Self {
            rpm,
            requests_window: VecDeque::new(),
            window,
        }
    }

    /// Returns `None` if a request can proceed at `now`, or how long to wait.
    pub fn check(&mut self, now: Instant) -> Option<Duration> {
        self.prune(now);
        if self.rpm > 0
            && self.requests_window.len() >= self.rpm
            && let Some(&oldest) = self.requests_window.front()
        {
            let wait = self.window.saturating_sub(now.duration_since(oldest));
            if !wait.is_zero() {
                return Some(wait);
            }
        }
        None
    }

    pub fn record(&mut self, now: Instant) {
        self.requests_window.push_back(now);
    }

    pub fn has_limits(&self) -> bool {
        self.rpm > 0
    }

    pub fn current_requests(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.requests_window.len()
    }

    fn prune(&mut self, now: Instant) {
        let Some(cutoff) = now.checked_sub(self.window) else {
            return;
        };
        while self.requests_window.front().is_some_and(|t| *t <= cutoff) {
            self.requests_window.pop_front();
        }
    }
}

/// Async rate limiter shared by all requests to one provider.
#[derive(Debug)]
pub struct RequestRateLimiter {
    provider: String,
    inner: Mutex<SlidingWindow>,
}

impl RequestRateLimiter {
    pub fn new(provider: impl Into<String>, rpm: usize) -> Self {
        Self {
            provider: provider.into(),
            inner: Mutex::new(SlidingWindow::new(rpm)),
        }
    }

    /// A limiter that never waits.
    pub fn unlimited(provider: impl Into<String>) -> Self {
        Self::new(provider, 0)
    }

    /// Wait until a request slot is free, then claim it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut window = self.inner.lock().await;
                let now = Instant::now();
                match window.check(now) {
                    None => {
                        window.record(now);
                        return;
                    }
                    Some(wait) => wait,
                }
            };
            debug!(
                provider = %self.provider,
                wait_ms = wait.as_millis() as u64,
                "Rate limit reached, waiting"
            );
            tokio::time::sleep(wait).await;
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_no_limits() {
        let mut window = SlidingWindow::new(0);
        let now = Instant::now();
        for _ in 0..1000 {
            assert!(window.check(now).is_none());
            window.record(now);
        }
        assert!(!window.has_limits());
    }

    #[test]
    fn test_window_rpm() {
        let mut window = SlidingWindow::new(2);
        let now = Instant::now();

        assert!(window.check(now).is_none());
        window.record(now);
        assert!(window.check(now).is_none());
        window.record(now);

        let delay = window.check(now).unwrap();
        assert!(delay.as_secs() > 0);
        assert_eq!(window.current_requests(now), 2);
    }

    #[test]
    fn test_window_expires_old_requests() {
        let mut window = SlidingWindow::with_window(1, Duration::from_millis(100));
        let start = Instant::now();
        window.record(start);
        assert!(window.check(start).is_some());
        let later = start + Duration::from_millis(150);
        assert!(window.check(later).is_none());
        assert_eq!(window.current_requests(later), 0);
    }

    #[tokio::test]
    async fn test_unlimited_acquire_does_not_block() {
        let limiter = RequestRateLimiter::unlimited("test");
        for _ in 0..50 {
            limiter.acquire().await;
        }
        assert_eq!(limiter.provider(), "test");
    }

    #[tokio::test]
    async fn test_acquire_within_budget() {
        let limiter = RequestRateLimiter::new("s2", 5);
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
