//! Fixed window rate limiter.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, trace};

use super::backend::RateLimiter;
use super::decision::{Algorithm, Decision};
use super::policy::WindowConfig;
use crate::clock::SharedClock;
use crate::error::{Result, TurnstileError};
use crate::store::MemoryStore;

/// A counter over one window of time.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Window {
    /// When the current window started
    start: DateTime<Utc>,
    /// Requests admitted in this window
    count: u64,
}

impl Window {
    fn open(now: DateTime<Utc>) -> Self {
        Self { start: now, count: 0 }
    }

    /// Reset the window if it has expired. No partial carry-over.
    fn maybe_reset(&mut self, now: DateTime<Utc>, duration: Duration) {
        if now - self.start > duration {
            self.start = now;
            self.count = 0;
        }
    }

    fn decision(&self, config: &WindowConfig, now: DateTime<Utc>) -> Decision {
        Decision {
            algorithm: Algorithm::FixedWindow,
            capacity: config.capacity,
            remaining: config.capacity as i64 - self.count as i64,
            reset: self.start + config.duration,
            evaluated_at: now,
        }
    }
}

/// Hard-reset counter per identity.
///
/// Up to `2 × capacity` requests can be admitted in a `duration`-long span
/// that straddles a window boundary. That burst is inherent to the algorithm.
#[derive(Debug)]
pub struct FixedWindow {
    config: WindowConfig,
    windows: MemoryStore<Window>,
    clock: SharedClock,
}

impl FixedWindow {
    /// Create a new fixed window limiter.
    pub fn new(config: WindowConfig, clock: SharedClock) -> Self {
        Self {
            config,
            windows: MemoryStore::new(clock.clone()),
            clock,
        }
    }
}

#[async_trait]
impl RateLimiter for FixedWindow {
    async fn allow(&self, identity: &str) -> Result<Decision> {
        let config = &self.config;
        let clock = &self.clock;

        let (admitted, decision) = self.windows.with_entry(
            identity,
            || Window::open(clock.now()),
            |window| {
                let now = clock.now();
                window.maybe_reset(now, config.duration);
                if window.count >= config.capacity {
                    return (false, window.decision(config, now));
                }
                window.count += 1;
                (true, window.decision(config, now))
            },
        );

        trace!(
            identity = %identity,
            admitted,
            remaining = decision.remaining,
            "Fixed window decision"
        );

        if admitted {
            Ok(decision)
        } else {
            debug!(identity = %identity, reset = %decision.reset, "Fixed window exhausted");
            Err(TurnstileError::RateLimitExceeded(decision))
        }
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::FixedWindow
    }

    fn capacity(&self) -> u64 {
        self.config.capacity
    }

    fn idle_horizon(&self) -> Duration {
        self.config.duration
    }

    fn sweep(&self) -> usize {
        self.windows.sweep(self.idle_horizon())
    }

    fn tracked_identities(&self) -> usize {
        self.windows.len()
    }
}
