use crate::config::Limits;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Outcome of a rate limiter check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// The call may proceed.
    Allow,
    /// The call is denied; retry after the given number of milliseconds.
    Deny {
        /// Suggested wait before retrying.
        retry_after_ms: u64,
    },
}

/// Current window occupancy, reported to callers as `X-RateLimit-*` response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    /// Maximum requests allowed per window.
    pub limit: u32,
    /// Requests still available in the current window.
    pub remaining: u32,
    /// Milliseconds until the oldest recorded request ages out of the window.
    pub reset_ms: u64,
}

struct SlidingWindow {
    recent: VecDeque<Instant>,
}

impl SlidingWindow {
    const fn new() -> Self {
        Self {
            recent: VecDeque::new(),
        }
    }

    fn check(&mut self, max: u32, window: Duration) -> RateLimitDecision {
        let now = Instant::now();
        while let Some(&oldest) = self.recent.front() {
            if now.duration_since(oldest) >= window {
                self.recent.pop_front();
            } else {
                break;
            }
        }

        if self.recent.len() >= max as usize {
            let oldest = *self.recent.front().expect("len >= max > 0 implies nonempty");
            let age = now.duration_since(oldest);
            let retry_after = window.saturating_sub(age);
            return RateLimitDecision::Deny {
                retry_after_ms: u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
            };
        }

        self.recent.push_back(now);
        RateLimitDecision::Allow
    }

    /// Current occupancy without recording a new request.
    fn status(&mut self, max: u32, window: Duration) -> RateLimitStatus {
        let now = Instant::now();
        while let Some(&oldest) = self.recent.front() {
            if now.duration_since(oldest) >= window {
                self.recent.pop_front();
            } else {
                break;
            }
        }

        let used = u32::try_from(self.recent.len()).unwrap_or(u32::MAX);
        let remaining = max.saturating_sub(used);
        let reset_ms = self.recent.front().map_or(0, |&oldest| {
            let age = now.duration_since(oldest);
            u64::try_from(window.saturating_sub(age).as_millis()).unwrap_or(0)
        });

        RateLimitStatus { limit: max, remaining, reset_ms }
    }
}

/// Per-server sliding-window rate limiters.
#[derive(Clone)]
pub struct RateLimiterRegistry {
    windows: Arc<Mutex<HashMap<String, SlidingWindow>>>,
}

impl RateLimiterRegistry {
    /// Construct an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Check (and, if allowed, record) one request attempt for `server`.
    #[must_use]
    pub fn check(&self, server: &str, limits: &Limits) -> RateLimitDecision {
        let mut windows = self.windows.lock().expect("rate limiter mutex poisoned");
        let window = windows
            .entry(server.to_string())
            .or_insert_with(SlidingWindow::new);
        window.check(limits.rate_per_window, Duration::from_millis(limits.rate_window_ms))
    }

    /// Current window occupancy for `server`, for reporting as response headers. Does not
    /// itself consume a slot.
    #[must_use]
    pub fn status(&self, server: &str, limits: &Limits) -> RateLimitStatus {
        let mut windows = self.windows.lock().expect("rate limiter mutex poisoned");
        let window = windows
            .entry(server.to_string())
            .or_insert_with(SlidingWindow::new);
        window.status(limits.rate_per_window, Duration::from_millis(limits.rate_window_ms))
    }
}

impl Default for RateLimiterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
