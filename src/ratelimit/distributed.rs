//! Distributed sliding window counter backed by a shared key-value store.
//!
//! This limiter applies the same weighted two-bucket rule as
//! [`SlidingWindowCounter`](super::SlidingWindowCounter), but keeps no state
//! in-process: every call loads the identity's record from the store and
//! writes it back with an expiry of `2 × duration`.
//!
//! # Consistency model
//!
//! Each call performs two independent round-trips (read, then write) with no
//! transaction across them. Concurrent calls for the same identity on
//! different replicas can interleave and the last write wins, so the shared
//! quota is a best-effort estimate whose staleness is bounded by one
//! round-trip. Store faults are reported as
//! [`TurnstileError::StoreUnavailable`] and are never turned into an admit or
//! a deny by the limiter itself.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use tracing::{debug, trace, warn};

use super::backend::RateLimiter;
use super::decision::{Algorithm, Decision};
use super::policy::WindowCounterConfig;
use super::window_counter::WindowCounterState;
use crate::clock::SharedClock;
use crate::error::{Result, TurnstileError};
use crate::store::KeyValueStore;

/// Shared handle to the record store.
pub type CounterStore = Arc<dyn KeyValueStore<WindowCounterState>>;

/// A weighted window counter whose state lives in an external store.
#[derive(Debug)]
pub struct DistributedWindowCounter {
    /// Rate limit configuration.
    config: WindowCounterConfig,
    /// The store holding per-identity records.
    store: CounterStore,
    clock: SharedClock,
}

impl DistributedWindowCounter {
    /// Create a new distributed window counter.
    pub fn new(config: WindowCounterConfig, store: CounterStore, clock: SharedClock) -> Self {
        Self {
            config,
            store,
            clock,
        }
    }

    /// Get the store.
    pub fn store(&self) -> &CounterStore {
        &self.store
    }

    /// Expiry applied to every written record.
    pub fn record_ttl(&self) -> Duration {
        self.config.duration * 2
    }
}

#[async_trait]
impl RateLimiter for DistributedWindowCounter {
    async fn allow(&self, identity: &str) -> Result<Decision> {
        let record = self.store.load(identity).await.map_err(|e| {
            warn!(identity = %identity, error = %e, "Failed to load counter record");
            e
        })?;

        let now = self.clock.now();
        let mut state = match record {
            Some(state) => state,
            None => {
                debug!(identity = %identity, "Creating counter record for new identity");
                WindowCounterState::new(now, &self.config)
            }
        };

        let (admitted, decision) =
            state.admit(now, &self.config, Algorithm::RedisSlidingWindowCounter);

        // Written back on rejection too, so a window roll is never lost.
        self.store
            .store(identity, &state, Some(self.record_ttl()))
            .await
            .map_err(|e| {
                warn!(identity = %identity, error = %e, "Failed to store counter record");
                e
            })?;

        trace!(
            identity = %identity,
            admitted,
            current = state.current.count,
            previous = state.previous.count,
            "Distributed window counter decision"
        );

        if admitted {
            Ok(decision)
        } else {
            debug!(
                identity = %identity,
                count = state.current.count,
                limit = self.config.capacity,
                "Distributed rate limit exceeded"
            );
            Err(TurnstileError::RateLimitExceeded(decision))
        }
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::RedisSlidingWindowCounter
    }

    fn capacity(&self) -> u64 {
        self.config.capacity
    }

    fn idle_horizon(&self) -> Duration {
        self.record_ttl()
    }
}
