use crate::config::Limits;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through normally.
    Closed,
    /// Calls fail fast.
    Open,
    /// A single probe call is allowed through to test recovery.
    HalfOpen,
}

#[derive(Clone, Copy)]
struct Bucket {
    epoch: u64,
    successes: u32,
    failures: u32,
}

impl Bucket {
    const EMPTY: Self = Self {
        epoch: 0,
        successes: 0,
        failures: 0,
    };
}

struct Entry {
    state: CircuitState,
    base: Instant,
    buckets: Vec<Bucket>,
    opened_at: Option<Instant>,
    half_open_probe_in_flight: bool,
}

impl Entry {
    fn new(bucket_count: u32) -> Self {
        Self {
            state: CircuitState::Closed,
            base: Instant::now(),
            buckets: vec![Bucket::EMPTY; bucket_count.max(1) as usize],
            opened_at: None,
            half_open_probe_in_flight: false,
        }
    }

    fn slot_width(&self, limits: &Limits) -> Duration {
        let buckets = self.buckets.len().max(1) as u64;
        let width_ms = (limits.rolling_window_ms / buckets).max(1);
        Duration::from_millis(width_ms)
    }

    fn current_epoch(&self, limits: &Limits) -> u64 {
        let width = self.slot_width(limits);
        let elapsed = self.base.elapsed();
        u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX) / width.as_millis().max(1) as u64
    }

    fn record(&mut self, limits: &Limits, success: bool) {
        let buckets_len = self.buckets.len() as u64;
        let epoch = self.current_epoch(limits);
        let idx = (epoch % buckets_len) as usize;
        if self.buckets[idx].epoch != epoch {
            self.buckets[idx] = Bucket {
                epoch,
                successes: 0,
                failures: 0,
            };
        }
        if success {
            self.buckets[idx].successes += 1;
        } else {
            self.buckets[idx].failures += 1;
        }
    }

    fn error_rate_pct(&self, limits: &Limits) -> Option<f64> {
        let buckets_len = self.buckets.len() as u64;
        let epoch = self.current_epoch(limits);
        let floor = epoch.saturating_sub(buckets_len.saturating_sub(1));
        let (mut successes, mut failures) = (0u64, 0u64);
        for bucket in &self.buckets {
            if bucket.epoch >= floor && bucket.epoch <= epoch {
                successes += u64::from(bucket.successes);
                failures += u64::from(bucket.failures);
            }
        }
        let total = successes + failures;
        if total == 0 {
            None
        } else {
            Some((failures as f64 / total as f64) * 100.0)
        }
    }
}

/// Per-server circuit breakers, each behind the same registry-wide lock-per-server map
/// (one `Mutex`-guarded `HashMap`, matching the rest of the guard subsystem).
#[derive(Clone)]
pub struct CircuitBreakerRegistry {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl CircuitBreakerRegistry {
    /// Construct an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Check whether a call to `server` is currently allowed, transitioning
    /// `Open` -> `HalfOpen` once `reset_timeout_ms` has elapsed.
    #[must_use]
    pub fn allows(&self, server: &str, limits: &Limits) -> bool {
        let mut entries = self.entries.lock().expect("breaker mutex poisoned");
        let entry = entries
            .entry(server.to_string())
            .or_insert_with(|| Entry::new(limits.rolling_buckets));

        match entry.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let reset_timeout = Duration::from_millis(limits.reset_timeout_ms);
                if entry.opened_at.is_some_and(|t| t.elapsed() >= reset_timeout) {
                    entry.state = CircuitState::HalfOpen;
                    entry.half_open_probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if entry.half_open_probe_in_flight {
                    false
                } else {
                    entry.half_open_probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Record a successful call outcome, closing the breaker if it was half-open.
    pub fn record_success(&self, server: &str, limits: &Limits) {
        let mut entries = self.entries.lock().expect("breaker mutex poisoned");
        let entry = entries
            .entry(server.to_string())
            .or_insert_with(|| Entry::new(limits.rolling_buckets));

        if entry.state == CircuitState::HalfOpen {
            *entry = Entry::new(limits.rolling_buckets);
            return;
        }
        entry.record(limits, true);
    }

    /// Record a failed call outcome. Opens the breaker if the rolling error rate meets
    /// `error_threshold_pct`, or immediately reopens it if the failure happened during the
    /// half-open probe.
    pub fn record_failure(&self, server: &str, limits: &Limits) {
        let mut entries = self.entries.lock().expect("breaker mutex poisoned");
        let entry = entries
            .entry(server.to_string())
            .or_insert_with(|| Entry::new(limits.rolling_buckets));

        if entry.state == CircuitState::HalfOpen {
            entry.state = CircuitState::Open;
            entry.opened_at = Some(Instant::now());
            entry.half_open_probe_in_flight = false;
            return;
        }

        entry.record(limits, false);
        if let Some(rate) = entry.error_rate_pct(limits) {
            if rate >= limits.error_threshold_pct {
                entry.state = CircuitState::Open;
                entry.opened_at = Some(Instant::now());
            }
        }
    }

    /// Current state for a server, `Closed` if never observed.
    #[must_use]
    pub fn state(&self, server: &str) -> CircuitState {
        self.entries
            .lock()
            .expect("breaker mutex poisoned")
            .get(server)
            .map_or(CircuitState::Closed, |e| e.state)
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
