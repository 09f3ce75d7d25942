//! Token bucket rate limiter.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, trace};

use super::backend::RateLimiter;
use super::decision::{Algorithm, Decision};
use super::policy::TokenBucketConfig;
use super::saturating_add_secs;
use crate::clock::SharedClock;
use crate::error::{Result, TurnstileError};
use crate::store::MemoryStore;

/// Per-identity bucket state.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Bucket {
    /// Tokens currently available
    tokens: u64,
    /// Instant up to which refill has been credited
    last_refill: DateTime<Utc>,
}

impl Bucket {
    fn full(capacity: u64, now: DateTime<Utc>) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
        }
    }

    /// Credit whole elapsed seconds. A sub-second remainder stays on the
    /// refill clock so it accumulates across calls.
    fn refill(&mut self, now: DateTime<Utc>, config: &TokenBucketConfig) {
        let elapsed = (now - self.last_refill).num_seconds();
        if elapsed < 1 {
            return;
        }

        let added = (elapsed as u64).saturating_mul(config.refill_rate);
        self.tokens = self.tokens.saturating_add(added).min(config.capacity);
        self.last_refill += Duration::seconds(elapsed);
    }

    fn decision(&self, config: &TokenBucketConfig, now: DateTime<Utc>) -> Decision {
        Decision {
            algorithm: Algorithm::TokenBucket,
            capacity: config.capacity,
            remaining: self.tokens as i64,
            reset: saturating_add_secs(self.last_refill, config.capacity - self.tokens),
            evaluated_at: now,
        }
    }
}

/// Lazily refilled token bucket, one bucket per identity.
///
/// A new identity starts with a full bucket. Each call credits
/// `elapsed_whole_seconds × refill_rate` tokens (capped at capacity), then
/// spends one token or rejects when none are left.
///
/// The reported reset is `last_refill + (capacity − remaining)` seconds, an
/// estimate of when the bucket is full again.
#[derive(Debug)]
pub struct TokenBucket {
    config: TokenBucketConfig,
    buckets: MemoryStore<Bucket>,
    clock: SharedClock,
}

impl TokenBucket {
    /// Create a new token bucket limiter.
    pub fn new(config: TokenBucketConfig, clock: SharedClock) -> Self {
        Self {
            config,
            buckets: MemoryStore::new(clock.clone()),
            clock,
        }
    }
}

#[async_trait]
impl RateLimiter for TokenBucket {
    async fn allow(&self, identity: &str) -> Result<Decision> {
        let config = &self.config;
        let clock = &self.clock;

        let (admitted, decision) = self.buckets.with_entry(
            identity,
            || Bucket::full(config.capacity, clock.now()),
            |bucket| {
                let now = clock.now();
                bucket.refill(now, config);
                if bucket.tokens == 0 {
                    return (false, bucket.decision(config, now));
                }
                bucket.tokens -= 1;
                (true, bucket.decision(config, now))
            },
        );

        trace!(
            identity = %identity,
            admitted,
            remaining = decision.remaining,
            "Token bucket decision"
        );

        if admitted {
            Ok(decision)
        } else {
            debug!(identity = %identity, "Token bucket empty");
            Err(TurnstileError::RateLimitExceeded(decision))
        }
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::TokenBucket
    }

    fn capacity(&self) -> u64 {
        self.config.capacity
    }

    fn idle_horizon(&self) -> Duration {
        // Time for an empty bucket to refill completely.
        let secs = self.config.capacity.div_ceil(self.config.refill_rate);
        Duration::seconds(secs.min(i64::MAX as u64 / 1000) as i64)
    }

    fn sweep(&self) -> usize {
        self.buckets.sweep(self.idle_horizon())
    }

    fn tracked_identities(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, MockClock};
    use std::sync::Arc;

    fn limiter(capacity: u64, refill_rate: u64) -> (TokenBucket, MockClock) {
        let clock = MockClock::default();
        let limiter = TokenBucket::new(
            TokenBucketConfig {
                capacity,
                refill_rate,
            },
            Arc::new(clock.clone()),
        );
        (limiter, clock)
    }

    #[tokio::test]
    async fn test_burst_then_reject() {
        let (limiter, _clock) = limiter(10, 1);

        for expected in (0..10).rev() {
            let decision = limiter.allow("u1").await.unwrap();
            assert_eq!(decision.remaining, expected);
            assert_eq!(decision.capacity, 10);
            assert_eq!(decision.algorithm, Algorithm::TokenBucket);
        }

        let err = limiter.allow("u1").await.unwrap_err();
        assert!(err.is_rate_limited());
    }

    #[tokio::test]
    async fn test_refill_after_five_seconds() {
        let (limiter, clock) = limiter(10, 1);

        for _ in 0..10 {
            limiter.allow("u1").await.unwrap();
        }
        assert!(limiter.allow("u1").await.is_err());

        clock.advance_secs(5);
        for expected in [4, 3, 2, 1, 0] {
            assert_eq!(limiter.allow("u1").await.unwrap().remaining, expected);
        }
        assert!(limiter.allow("u1").await.is_err());
    }

    #[tokio::test]
    async fn test_refill_rate_tokens_per_second() {
        let (limiter, clock) = limiter(6, 3);

        for _ in 0..6 {
            limiter.allow("u1").await.unwrap();
        }
        assert!(limiter.allow("u1").await.is_err());

        clock.advance_secs(1);
        for _ in 0..3 {
            limiter.allow("u1").await.unwrap();
        }
        assert!(limiter.allow("u1").await.is_err());
    }

    #[tokio::test]
    async fn test_sub_second_elapsed_accumulates() {
        let (limiter, clock) = limiter(2, 1);

        limiter.allow("u1").await.unwrap();
        limiter.allow("u1").await.unwrap();

        clock.advance(Duration::milliseconds(600));
        assert!(limiter.allow("u1").await.is_err());

        // 1.2s since the last credited instant: one token, not zero.
        clock.advance(Duration::milliseconds(600));
        assert_eq!(limiter.allow("u1").await.unwrap().remaining, 0);
    }

    #[tokio::test]
    async fn test_refill_capped_at_capacity() {
        let (limiter, clock) = limiter(3, 1);

        limiter.allow("u1").await.unwrap();
        clock.advance_secs(100);

        assert_eq!(limiter.allow("u1").await.unwrap().remaining, 2);
    }

    #[tokio::test]
    async fn test_reset_estimate() {
        let (limiter, clock) = limiter(10, 1);
        let start = clock.now();

        let decision = limiter.allow("u1").await.unwrap();
        assert_eq!(decision.reset, start + Duration::seconds(1));
        assert_eq!(decision.evaluated_at, start);
    }

    #[tokio::test]
    async fn test_identities_have_separate_buckets() {
        let (limiter, _clock) = limiter(1, 1);

        limiter.allow("a").await.unwrap();
        assert!(limiter.allow("a").await.is_err());
        limiter.allow("b").await.unwrap();
        assert_eq!(limiter.tracked_identities(), 2);
    }

    #[tokio::test]
    async fn test_sweep_after_full_refill_horizon() {
        let (limiter, clock) = limiter(10, 2);
        assert_eq!(limiter.idle_horizon(), Duration::seconds(5));

        limiter.allow("a").await.unwrap();
        clock.advance_secs(6);

        assert_eq!(limiter.sweep(), 1);
        assert_eq!(limiter.tracked_identities(), 0);
    }
}
