//! Sliding-window rate limiter for the profile API.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Allows at most `max_requests` in any window of length `window`.
///
/// Keeps the exact timestamp of every request inside the window. When the
/// window is full, [`acquire`](Self::acquire) sleeps until the oldest
/// timestamp falls out.
pub struct SlidingWindowLimiter {
    window: Duration,
    max_requests: usize,
    stamps: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    pub fn new(window: Duration, max_requests: usize) -> Self {
        Self {
            window,
            max_requests: max_requests.max(1),
            stamps: Mutex::new(VecDeque::new()),
        }
    }

    fn evict(stamps: &mut VecDeque<Instant>, window: Duration, now: Instant) {
        while let Some(&oldest) = stamps.front() {
            if now.duration_since(oldest) >= window {
                stamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Take a slot without waiting. False when the window is full.
    #[cfg(test)]
    async fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut stamps = self.stamps.lock().await;
        Self::evict(&mut stamps, self.window, now);
        if stamps.len() < self.max_requests {
            stamps.push_back(now);
            true
        } else {
            false
        }
    }

    /// Wait for a slot and take it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let now = Instant::now();
                let mut stamps = self.stamps.lock().await;
                Self::evict(&mut stamps, self.window, now);
                if stamps.len() < self.max_requests {
                    stamps.push_back(now);
                    return;
                }
                match stamps.front() {
                    Some(&oldest) => (oldest + self.window).saturating_duration_since(now),
                    None => Duration::ZERO,
                }
            };
            debug!(wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX), "Rate limit reached, waiting");
            tokio::time::sleep(wait).await;
        }
    }

    /// Requests currently counted against the window.
    #[cfg(test)]
    pub(crate) async fn in_window(&self) -> usize {
        let mut stamps = self.stamps.lock().await;
        Self::evict(&mut stamps, self.window, Instant::now());
        stamps.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fourth_request_waits_for_window() {
        let limiter = SlidingWindowLimiter::new(Duration::from_secs(1), 3);
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(!limiter.try_acquire().await);

        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert_eq!(limiter.in_window().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_slides_per_request() {
        let limiter = SlidingWindowLimiter::new(Duration::from_secs(10), 2);
        limiter.acquire().await;
        tokio::time::advance(Duration::from_secs(6)).await;
        limiter.acquire().await;
        assert!(!limiter.try_acquire().await);

        // First stamp expires at t=10, second at t=16
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(limiter.try_acquire().await);
        assert!(!limiter.try_acquire().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_pends_while_window_full() {
        let limiter = SlidingWindowLimiter::new(Duration::from_secs(1), 1);
        limiter.acquire().await;

        let mut waiting = tokio_test::task::spawn(limiter.acquire());
        tokio_test::assert_pending!(waiting.poll());

        tokio::time::advance(Duration::from_secs(1)).await;
        tokio_test::assert_ready!(waiting.poll());
    }
}
