//! Policy configuration and the limiter factory.
//!
//! A policy arrives as a flat map of string keys to string values (from CLI
//! flags, a YAML file, or environment). [`Policy::from_map`] validates it into
//! a typed, immutable [`Policy`]; [`build`] turns that into a ready limiter.
//! String dispatch ends at this boundary.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use tracing::info;

use super::backend::RateLimiter;
use super::decision::Algorithm;
use super::distributed::DistributedWindowCounter;
use super::fixed_window::FixedWindow;
use super::sliding_log::SlidingWindowLog;
use super::token_bucket::TokenBucket;
use super::window_counter::SlidingWindowCounter;
use crate::clock::{SharedClock, SystemClock};
use crate::error::{Result, TurnstileError};
use crate::store::{RedisStore, DEFAULT_PREFIX};

/// Longest accepted window, in seconds (ten years).
pub const MAX_DURATION_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Default I/O timeout for the networked store, in milliseconds.
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 500;

/// Previous/current window blend factor, validated to lie in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Weight(f64);

impl Weight {
    /// The weight given to the current window.
    pub fn current(&self) -> f64 {
        self.0
    }

    /// The weight given to the previous window.
    pub fn previous(&self) -> f64 {
        1.0 - self.0
    }
}

impl TryFrom<f64> for Weight {
    type Error = TurnstileError;

    fn try_from(value: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&value) {
            return Err(TurnstileError::field(
                "weight",
                format!("{} is outside [0, 1]", value),
            ));
        }
        Ok(Weight(value))
    }
}

impl From<Weight> for f64 {
    fn from(weight: Weight) -> Self {
        weight.0
    }
}

/// Token bucket parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBucketConfig {
    /// Maximum tokens held
    pub capacity: u64,
    /// Tokens added per whole elapsed second
    pub refill_rate: u64,
}

/// Parameters shared by the fixed window and sliding log algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    /// Maximum requests admitted per window
    pub capacity: u64,
    /// Window length
    pub duration: Duration,
}

/// Sliding window counter parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowCounterConfig {
    /// Maximum weighted estimate admitted
    pub capacity: u64,
    /// Window length
    pub duration: Duration,
    /// Blend between current and previous windows
    pub weight: Weight,
}

/// Networked store endpoint parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Redis connection URL
    pub url: String,
    /// Prefix for every stored key
    pub prefix: String,
    /// Bound on each store round-trip
    pub timeout: StdDuration,
}

/// A validated, immutable policy.
#[derive(Debug, Clone, PartialEq)]
pub enum Policy {
    /// Lazily refilled token bucket
    TokenBucket(TokenBucketConfig),
    /// Hard-reset fixed window
    FixedWindow(WindowConfig),
    /// Exact timestamp log
    SlidingWindowLog(WindowConfig),
    /// In-process weighted window counter
    SlidingWindowCounter(WindowCounterConfig),
    /// Redis-persisted weighted window counter
    RedisSlidingWindowCounter(WindowCounterConfig, StoreConfig),
}

impl Policy {
    /// Validate a flat configuration map.
    ///
    /// Keys are matched case-insensitively. Fails with
    /// [`TurnstileError::Configuration`] naming the first missing or invalid
    /// field, or the unknown algorithm.
    pub fn from_map(config: &HashMap<String, String>) -> Result<Self> {
        let fields = Fields::new(config)?;
        let algorithm: Algorithm = fields.required("algorithm")?.parse()?;

        let policy = match algorithm {
            Algorithm::TokenBucket => Policy::TokenBucket(TokenBucketConfig {
                capacity: fields.capacity()?,
                refill_rate: fields.positive_int("refillRate")?,
            }),
            Algorithm::FixedWindow => Policy::FixedWindow(fields.window()?),
            Algorithm::SlidingWindowLog => Policy::SlidingWindowLog(fields.window()?),
            Algorithm::SlidingWindowCounter => {
                Policy::SlidingWindowCounter(fields.window_counter()?)
            }
            Algorithm::RedisSlidingWindowCounter => {
                let counter = fields.window_counter()?;
                let url = fields
                    .optional("storeURL")
                    .or_else(|| fields.optional("redisURL"))
                    .ok_or_else(|| TurnstileError::field("storeURL", "missing"))?;
                let timeout_ms = match fields.optional("storeTimeoutMs") {
                    Some(_) => fields.positive_int("storeTimeoutMs")?,
                    None => DEFAULT_STORE_TIMEOUT_MS,
                };
                let store = StoreConfig {
                    url: url.to_string(),
                    prefix: fields.optional("storePrefix").unwrap_or(DEFAULT_PREFIX).to_string(),
                    timeout: StdDuration::from_millis(timeout_ms),
                };
                Policy::RedisSlidingWindowCounter(counter, store)
            }
        };

        Ok(policy)
    }

    /// The algorithm this policy selects.
    pub fn algorithm(&self) -> Algorithm {
        match self {
            Policy::TokenBucket(_) => Algorithm::TokenBucket,
            Policy::FixedWindow(_) => Algorithm::FixedWindow,
            Policy::SlidingWindowLog(_) => Algorithm::SlidingWindowLog,
            Policy::SlidingWindowCounter(_) => Algorithm::SlidingWindowCounter,
            Policy::RedisSlidingWindowCounter(..) => Algorithm::RedisSlidingWindowCounter,
        }
    }

    /// The configured capacity.
    pub fn capacity(&self) -> u64 {
        match self {
            Policy::TokenBucket(c) => c.capacity,
            Policy::FixedWindow(c) | Policy::SlidingWindowLog(c) => c.capacity,
            Policy::SlidingWindowCounter(c) | Policy::RedisSlidingWindowCounter(c, _) => c.capacity,
        }
    }
}

/// Case-insensitive view over the raw configuration map.
struct Fields<'a> {
    values: HashMap<String, &'a str>,
}

impl<'a> Fields<'a> {
    /// Keys match case-insensitively, so two keys differing only in case
    /// are rejected rather than resolved by map iteration order.
    fn new(config: &'a HashMap<String, String>) -> Result<Self> {
        let mut values = HashMap::with_capacity(config.len());
        for (key, value) in config {
            let name = key.to_ascii_lowercase();
            if values.insert(name.clone(), value.trim()).is_some() {
                return Err(TurnstileError::field(&name, "given more than once"));
            }
        }
        Ok(Self { values })
    }

    fn optional(&self, name: &str) -> Option<&'a str> {
        self.values
            .get(&name.to_ascii_lowercase())
            .copied()
            .filter(|v| !v.is_empty())
    }

    fn required(&self, name: &str) -> Result<&'a str> {
        self.optional(name)
            .ok_or_else(|| TurnstileError::field(name, "missing"))
    }

    fn positive_int(&self, name: &str) -> Result<u64> {
        let raw = self.required(name)?;
        let value: u64 = raw
            .parse()
            .map_err(|_| TurnstileError::field(name, format!("`{}` is not a positive integer", raw)))?;
        if value == 0 {
            return Err(TurnstileError::field(name, "must be greater than zero"));
        }
        Ok(value)
    }

    fn capacity(&self) -> Result<u64> {
        let capacity = self.positive_int("capacity")?;
        if capacity > i64::MAX as u64 {
            return Err(TurnstileError::field("capacity", "too large"));
        }
        Ok(capacity)
    }

    fn duration(&self) -> Result<Duration> {
        let secs = self.positive_int("duration")?;
        if secs > MAX_DURATION_SECS {
            return Err(TurnstileError::field(
                "duration",
                format!("must not exceed {} seconds", MAX_DURATION_SECS),
            ));
        }
        Ok(Duration::seconds(secs as i64))
    }

    fn weight(&self) -> Result<Weight> {
        let raw = self.required("weight")?;
        let value: f64 = raw
            .parse()
            .map_err(|_| TurnstileError::field("weight", format!("`{}` is not a number", raw)))?;
        Weight::try_from(value)
    }

    fn window(&self) -> Result<WindowConfig> {
        Ok(WindowConfig {
            capacity: self.capacity()?,
            duration: self.duration()?,
        })
    }

    fn window_counter(&self) -> Result<WindowCounterConfig> {
        Ok(WindowCounterConfig {
            capacity: self.capacity()?,
            duration: self.duration()?,
            weight: self.weight()?,
        })
    }
}

/// Build a limiter from a flat configuration map using the system clock.
pub async fn build(config: &HashMap<String, String>) -> Result<Arc<dyn RateLimiter>> {
    build_with_clock(config, Arc::new(SystemClock)).await
}

/// Build a limiter from a flat configuration map with an injected clock.
pub async fn build_with_clock(
    config: &HashMap<String, String>,
    clock: SharedClock,
) -> Result<Arc<dyn RateLimiter>> {
    let policy = Policy::from_map(config)?;
    build_policy(policy, clock).await
}

/// Build a limiter from an already validated policy.
///
/// The distributed variant connects eagerly, so an unreachable endpoint fails
/// here with [`TurnstileError::StoreUnavailable`] rather than on first use.
pub async fn build_policy(policy: Policy, clock: SharedClock) -> Result<Arc<dyn RateLimiter>> {
    info!(
        algorithm = %policy.algorithm(),
        capacity = policy.capacity(),
        "Building rate limiter"
    );

    let limiter: Arc<dyn RateLimiter> = match policy {
        Policy::TokenBucket(config) => Arc::new(TokenBucket::new(config, clock)),
        Policy::FixedWindow(config) => Arc::new(FixedWindow::new(config, clock)),
        Policy::SlidingWindowLog(config) => Arc::new(SlidingWindowLog::new(config, clock)),
        Policy::SlidingWindowCounter(config) => {
            Arc::new(SlidingWindowCounter::new(config, clock))
        }
        Policy::RedisSlidingWindowCounter(config, store) => {
            let store = RedisStore::connect(&store.url, &store.prefix, store.timeout).await?;
            Arc::new(DistributedWindowCounter::new(config, Arc::new(store), clock))
        }
    };

    Ok(limiter)
}
