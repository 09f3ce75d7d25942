//! Error types for Turnstile.

use thiserror::Error;

use crate::ratelimit::Decision;

/// Main error type for Turnstile operations.
///
/// Every failure crossing the core boundary is one of these three kinds.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TurnstileError {
    /// A policy field is missing, malformed, or names an unknown algorithm.
    /// Fatal at construction and never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The caller has exhausted its quota. Carries the capacity snapshot
    /// taken at rejection time.
    #[error("Rate limit exceeded ({}, resets at {})", .0.algorithm, .0.reset)]
    RateLimitExceeded(Decision),

    /// The backing state store could not be reached, timed out, or held a
    /// record that could not be (de)serialized.
    #[error("State store unavailable: {0}")]
    StoreUnavailable(String),
}

impl TurnstileError {
    /// Shorthand for a configuration error naming a policy field.
    pub(crate) fn field(name: &str, problem: impl std::fmt::Display) -> Self {
        TurnstileError::Configuration(format!("field `{}`: {}", name, problem))
    }

    /// Whether this error means "quota exhausted" rather than a fault.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, TurnstileError::RateLimitExceeded(_))
    }
}

impl From<redis::RedisError> for TurnstileError {
    fn from(err: redis::RedisError) -> Self {
        TurnstileError::StoreUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for TurnstileError {
    fn from(err: serde_json::Error) -> Self {
        TurnstileError::StoreUnavailable(format!("record serialization failed: {}", err))
    }
}

impl From<tokio::time::error::Elapsed> for TurnstileError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        TurnstileError::StoreUnavailable("store operation timed out".to_string())
    }
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_timeout_is_store_unavailable() {
        let elapsed = tokio::time::timeout(Duration::from_millis(50), std::future::pending::<()>())
            .await
            .unwrap_err();

        let err = TurnstileError::from(elapsed);
        assert_eq!(
            err,
            TurnstileError::StoreUnavailable("store operation timed out".to_string())
        );
        assert!(!err.is_rate_limited());
    }

    #[test]
    fn test_field_error_names_the_field() {
        let err = TurnstileError::field("capacity", "must be positive");
        assert_eq!(
            err.to_string(),
            "Configuration error: field `capacity`: must be positive"
        );
    }
}
