//! Sliding window log rate limiter.

use async_trait::async_trait;
use chrono::Duration;
use tracing::{debug, trace};

use super::backend::RateLimiter;
use super::decision::{Algorithm, Decision};
use super::policy::WindowConfig;
use super::time_log::TimeLog;
use crate::clock::SharedClock;
use crate::error::{Result, TurnstileError};
use crate::store::MemoryStore;

/// Exact request log per identity.
///
/// Every call, admitted or not, is logged. Rejected attempts therefore keep
/// occupying the window until they age out, so a caller that keeps hammering
/// a full window delays its own recovery.
///
/// Memory per identity is bounded by the number of calls made within one
/// `duration`.
#[derive(Debug)]
pub struct SlidingWindowLog {
    config: WindowConfig,
    logs: MemoryStore<TimeLog>,
    clock: SharedClock,
}

impl SlidingWindowLog {
    /// Create a new sliding window log limiter.
    pub fn new(config: WindowConfig, clock: SharedClock) -> Self {
        Self {
            config,
            logs: MemoryStore::new(clock.clone()),
            clock,
        }
    }
}

#[async_trait]
impl RateLimiter for SlidingWindowLog {
    async fn allow(&self, identity: &str) -> Result<Decision> {
        let config = &self.config;

        // The clock is read under the identity's lock so pushes stay ordered.
        let (logged, now) = self.logs.with_entry(identity, TimeLog::new, |log| {
            let now = self.clock.now();
            log.prune(now, config.duration);
            log.push(now);
            (log.len(), now)
        });

        let decision = Decision {
            algorithm: Algorithm::SlidingWindowLog,
            capacity: config.capacity,
            remaining: config.capacity as i64 - logged as i64,
            // Approximate: the true reset is when the oldest entry ages out.
            reset: now + config.duration,
            evaluated_at: now,
        };

        trace!(
            identity = %identity,
            logged,
            remaining = decision.remaining,
            "Sliding window log decision"
        );

        if logged as u64 > config.capacity {
            debug!(identity = %identity, logged, "Sliding window log over capacity");
            return Err(TurnstileError::RateLimitExceeded(decision));
        }
        Ok(decision)
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::SlidingWindowLog
    }

    fn capacity(&self) -> u64 {
        self.config.capacity
    }

    fn idle_horizon(&self) -> Duration {
        self.config.duration
    }

    fn sweep(&self) -> usize {
        self.logs.sweep(self.idle_horizon())
    }

    fn tracked_identities(&self) -> usize {
        self.logs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, MockClock};
    use std::sync::Arc;

    fn limiter(capacity: u64, duration_secs: i64) -> (SlidingWindowLog, MockClock) {
        let clock = MockClock::default();
        let limiter = SlidingWindowLog::new(
            WindowConfig {
                capacity,
                duration: Duration::seconds(duration_secs),
            },
            Arc::new(clock.clone()),
        );
        (limiter, clock)
    }

    #[tokio::test]
    async fn test_capacity_then_reject() {
        let (limiter, _clock) = limiter(5, 10);

        for expected in (0..5).rev() {
            assert_eq!(limiter.allow("u1").await.unwrap().remaining, expected);
        }

        match limiter.allow("u1").await {
            Err(TurnstileError::RateLimitExceeded(decision)) => {
                assert_eq!(decision.remaining, -1);
                assert_eq!(decision.remaining_clamped(), 0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_half_window_still_rejects() {
        let (limiter, clock) = limiter(5, 10);

        for _ in 0..5 {
            limiter.allow("u1").await.unwrap();
        }
        clock.advance_secs(5);

        assert!(limiter.allow("u1").await.is_err());
    }

    #[tokio::test]
    async fn test_entries_age_out() {
        let (limiter, clock) = limiter(5, 10);

        for _ in 0..5 {
            limiter.allow("u1").await.unwrap();
        }
        clock.advance_secs(11);

        assert_eq!(limiter.allow("u1").await.unwrap().remaining, 4);
    }

    #[tokio::test]
    async fn test_rejected_attempts_extend_occupancy() {
        let (limiter, clock) = limiter(2, 10);

        limiter.allow("u1").await.unwrap();
        limiter.allow("u1").await.unwrap();

        // Rejected at t=6; this attempt stays logged until t=16.
        clock.advance_secs(6);
        assert!(limiter.allow("u1").await.is_err());

        // t=11: the two admitted entries aged out, the rejected one has not.
        clock.advance_secs(5);
        assert_eq!(limiter.allow("u1").await.unwrap().remaining, 0);
        assert!(limiter.allow("u1").await.is_err());
    }

    #[tokio::test]
    async fn test_reset_is_now_plus_duration() {
        let (limiter, clock) = limiter(5, 30);

        let decision = limiter.allow("u1").await.unwrap();
        assert_eq!(decision.reset, clock.now() + Duration::seconds(30));
    }
}
