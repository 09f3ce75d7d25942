//! Sliding window counter: a weighted two-bucket estimator.
//!
//! The state transition lives on [`WindowCounterState`] so the in-process
//! limiter here and the Redis-backed one in `distributed` apply exactly the
//! same rule.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::backend::RateLimiter;
use super::decision::{Algorithm, Decision};
use super::policy::WindowCounterConfig;
use crate::clock::SharedClock;
use crate::error::{Result, TurnstileError};
use crate::store::MemoryStore;

/// One bucket of the estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterWindow {
    /// When the window opened
    pub start: DateTime<Utc>,
    /// Requests admitted in the window
    pub count: u64,
}

/// Per-identity estimator state.
///
/// This is also the record persisted by the distributed variant, so every
/// field round-trips through serde, including the weight the stored counts
/// are evaluated under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowCounterState {
    /// Window currently accumulating
    pub current: CounterWindow,
    /// The window before it
    pub previous: CounterWindow,
    /// Current-window weight in force when the windows last rolled
    pub weight: f64,
}

impl WindowCounterState {
    /// Fresh state: an empty current window opening at `now` and a synthetic
    /// empty previous window one `duration` earlier.
    pub fn new(now: DateTime<Utc>, config: &WindowCounterConfig) -> Self {
        Self {
            current: CounterWindow { start: now, count: 0 },
            previous: CounterWindow {
                start: now - config.duration,
                count: 0,
            },
            weight: config.weight.current(),
        }
    }

    /// Weighted estimate of occupancy under the record's own weight,
    /// truncated toward zero.
    pub fn estimate(&self) -> u64 {
        let weighted =
            self.current.count as f64 * self.weight + self.previous.count as f64 * (1.0 - self.weight);
        weighted as u64
    }

    /// Apply one request at `now`.
    ///
    /// Rolls the windows when the current one has expired, admits when the
    /// estimate is below capacity, and returns the admission outcome together
    /// with the snapshot taken after any increment.
    ///
    /// The policy weight is stamped into the record only when the windows
    /// roll, so counts written under an earlier weight keep that weight.
    pub fn admit(
        &mut self,
        now: DateTime<Utc>,
        config: &WindowCounterConfig,
        algorithm: Algorithm,
    ) -> (bool, Decision) {
        if now - self.current.start > config.duration {
            self.previous = self.current;
            self.current = CounterWindow { start: now, count: 0 };
            self.weight = config.weight.current();
        }

        let admitted = self.estimate() < config.capacity;
        if admitted {
            self.current.count += 1;
        }

        let decision = Decision {
            algorithm,
            capacity: config.capacity,
            remaining: config.capacity as i64 - self.estimate() as i64,
            // End of the current window plus the previous window's span.
            reset: self.current.start + config.duration * 2,
            evaluated_at: now,
        };

        (admitted, decision)
    }
}

/// In-process weighted window counter.
///
/// A weight near 1 discounts the previous window and behaves like a fixed
/// window; 0.5 blends both windows evenly.
#[derive(Debug)]
pub struct SlidingWindowCounter {
    config: WindowCounterConfig,
    states: MemoryStore<WindowCounterState>,
    clock: SharedClock,
}

impl SlidingWindowCounter {
    /// Create a new sliding window counter limiter.
    pub fn new(config: WindowCounterConfig, clock: SharedClock) -> Self {
        Self {
            config,
            states: MemoryStore::new(clock.clone()),
            clock,
        }
    }
}

#[async_trait]
impl RateLimiter for SlidingWindowCounter {
    async fn allow(&self, identity: &str) -> Result<Decision> {
        let config = &self.config;
        let clock = &self.clock;

        let (admitted, decision) = self.states.with_entry(
            identity,
            || WindowCounterState::new(clock.now(), config),
            |state| state.admit(clock.now(), config, Algorithm::SlidingWindowCounter),
        );

        trace!(
            identity = %identity,
            admitted,
            remaining = decision.remaining,
            "Sliding window counter decision"
        );

        if admitted {
            Ok(decision)
        } else {
            debug!(identity = %identity, "Sliding window counter estimate at capacity");
            Err(TurnstileError::RateLimitExceeded(decision))
        }
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::SlidingWindowCounter
    }

    fn capacity(&self) -> u64 {
        self.config.capacity
    }

    fn idle_horizon(&self) -> Duration {
        // Covers both the current and the previous window.
        self.config.duration * 2
    }

    fn sweep(&self) -> usize {
        self.states.sweep(self.idle_horizon())
    }

    fn tracked_identities(&self) -> usize {
        self.states.len()
    }
}
