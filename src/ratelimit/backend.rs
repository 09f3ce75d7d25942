//! Rate limiter trait shared by every algorithm.

use async_trait::async_trait;
use chrono::Duration;

use super::decision::{Algorithm, Decision};
use crate::error::Result;

/// Trait for rate limiter implementations.
///
/// This trait abstracts over the in-process algorithms and the
/// Redis-backed counter so transports can work with any of them.
#[async_trait]
pub trait RateLimiter: Send + Sync + std::fmt::Debug {
    /// Decide whether to admit the current request for `identity`.
    ///
    /// Returns the capacity snapshot on admission,
    /// [`TurnstileError::RateLimitExceeded`](crate::TurnstileError::RateLimitExceeded)
    /// when the quota is exhausted, and
    /// [`TurnstileError::StoreUnavailable`](crate::TurnstileError::StoreUnavailable)
    /// when external state cannot be read or written.
    async fn allow(&self, identity: &str) -> Result<Decision>;

    /// The algorithm this limiter implements.
    fn algorithm(&self) -> Algorithm;

    /// The configured capacity.
    fn capacity(&self) -> u64;

    /// How long an identity may stay untouched before its state is
    /// indistinguishable from a fresh one.
    fn idle_horizon(&self) -> Duration;

    /// Evict in-process state idle beyond [`idle_horizon`](Self::idle_horizon).
    /// Returns the number of evicted identities.
    fn sweep(&self) -> usize {
        0
    }

    /// Get the number of identities with in-process state.
    fn tracked_identities(&self) -> usize {
        0
    }
}
