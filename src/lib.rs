//! Turnstile - Per-identity Admission Control
//!
//! This crate decides, per caller identity, whether a request may proceed
//! under a configured quota. Five algorithms are available: a token bucket,
//! a fixed window, a sliding window log, a sliding window counter, and a
//! Redis-backed sliding window counter shared by every replica.
//!
//! Limiters are built from a flat string map:
//!
//! ```no_run
//! # async fn demo() -> turnstile::Result<()> {
//! use std::collections::HashMap;
//!
//! let config = HashMap::from([
//!     ("algorithm".to_string(), "token-bucket".to_string()),
//!     ("capacity".to_string(), "10".to_string()),
//!     ("refillRate".to_string(), "1".to_string()),
//! ]);
//! let limiter = turnstile::ratelimit::build(&config).await?;
//! let decision = limiter.allow("203.0.113.7").await?;
//! println!("{} remaining until {}", decision.remaining, decision.reset);
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod store;

pub use clock::{Clock, MockClock, SharedClock, SystemClock};
pub use error::{Result, TurnstileError};
pub use ratelimit::{Algorithm, Decision, RateLimiter};
