//! Admission decisions and the closed set of algorithms.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TurnstileError;

/// The rate limiting algorithms a policy can select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Algorithm {
    /// Lazily refilled token counter
    TokenBucket,
    /// Hard-reset counter per window
    FixedWindow,
    /// Exact log of request timestamps
    SlidingWindowLog,
    /// Weighted two-bucket estimator held in-process
    SlidingWindowCounter,
    /// Weighted two-bucket estimator persisted in Redis
    RedisSlidingWindowCounter,
}

impl Algorithm {
    /// All algorithms, in declaration order.
    pub const ALL: [Algorithm; 5] = [
        Algorithm::TokenBucket,
        Algorithm::FixedWindow,
        Algorithm::SlidingWindowLog,
        Algorithm::SlidingWindowCounter,
        Algorithm::RedisSlidingWindowCounter,
    ];

    /// The canonical policy name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::TokenBucket => "token-bucket",
            Algorithm::FixedWindow => "fixed-window",
            Algorithm::SlidingWindowLog => "sliding-window-log",
            Algorithm::SlidingWindowCounter => "sliding-window-counter",
            Algorithm::RedisSlidingWindowCounter => "redis-sliding-window-counter",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = TurnstileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        if name == "distributed-sliding-window-counter" {
            return Ok(Algorithm::RedisSlidingWindowCounter);
        }
        Algorithm::ALL
            .into_iter()
            .find(|alg| alg.as_str() == name)
            .ok_or_else(|| TurnstileError::Configuration(format!("unknown algorithm `{}`", s)))
    }
}

/// The capacity snapshot returned for every `allow` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    /// Algorithm that produced the decision
    pub algorithm: Algorithm,
    /// Configured capacity
    pub capacity: u64,
    /// Remaining quota. Negative for a rejected sliding-log request.
    pub remaining: i64,
    /// Estimated instant at which quota is restored
    pub reset: DateTime<Utc>,
    /// Instant at which the decision was evaluated
    pub evaluated_at: DateTime<Utc>,
}

impl Decision {
    /// Remaining quota clamped to zero, for display.
    pub fn remaining_clamped(&self) -> u64 {
        self.remaining.max(0) as u64
    }

    /// Whole seconds from evaluation until reset, never negative.
    pub fn seconds_until_reset(&self) -> u64 {
        (self.reset - self.evaluated_at).num_seconds().max(0) as u64
    }
}
