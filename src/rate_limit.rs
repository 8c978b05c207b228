//! Fixed-window admission control for outbound embedding requests.
//!
//! At most `max_requests` requests are admitted per window. Once the ceiling
//! is hit, the next request is admitted only after a full window has passed
//! since the window started; that request opens a fresh window.
//!
//! [`FixedWindowLimiter::acquire`] polls with a fixed sleep rather than
//! computing the exact wake-up time. That is adequate because a process
//! has at most one fetch in flight.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::RateLimitConfig;

#[derive(Debug)]
struct WindowState {
    count: u32,
    window_start: Instant,
}

#[derive(Debug)]
pub struct FixedWindowLimiter {
    max_requests: u32,
    window: Duration,
    poll: Duration,
    state: Mutex<WindowState>,
}

impl FixedWindowLimiter {
    pub fn new(max_requests: u32, window: Duration, poll: Duration) -> Self {
        Self {
            max_requests,
            window,
            poll,
            state: Mutex::new(WindowState {
                count: 0,
                window_start: Instant::now(),
            }),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(
            config.max_requests,
            Duration::from_secs(config.window_secs),
            Duration::from_millis(config.poll_ms),
        )
    }

    /// Try to admit one request at `now` without waiting.
    pub fn try_acquire_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let elapsed = now.saturating_duration_since(state.window_start);

        if state.count < self.max_requests {
            state.count += 1;
            debug!(count = state.count, max = self.max_requests, ?elapsed, "rate limiter admitted");
            return true;
        }
        if elapsed >= self.window {
            state.count = 1;
            state.window_start = now;
            debug!(max = self.max_requests, ?elapsed, "rate limiter window reset");
            return true;
        }
        debug!(count = state.count, max = self.max_requests, ?elapsed, "rate limiter throttled");
        false
    }

    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    /// Wait until a request is admitted.
    pub async fn acquire(&self) {
        while !self.try_acquire() {
            tokio::time::sleep(self.poll).await;
        }
    }
}
