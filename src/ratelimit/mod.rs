//! Rate limiting algorithms, the decision model, and the policy factory.

mod backend;
mod decision;
mod distributed;
mod fixed_window;
pub mod policy;
mod sliding_log;
mod sweeper;
mod time_log;
mod token_bucket;
mod window_counter;

pub use backend::RateLimiter;
pub use decision::{Algorithm, Decision};
pub use distributed::{CounterStore, DistributedWindowCounter};
pub use fixed_window::FixedWindow;
pub use policy::{
    build, build_policy, build_with_clock, Policy, StoreConfig, TokenBucketConfig, Weight,
    WindowConfig, WindowCounterConfig,
};
pub use sliding_log::SlidingWindowLog;
pub use sweeper::{spawn_sweeper, SweeperHandle, MIN_SWEEP_INTERVAL};
pub use time_log::TimeLog;
pub use token_bucket::TokenBucket;
pub use window_counter::{CounterWindow, SlidingWindowCounter, WindowCounterState};

use chrono::{DateTime, Duration, Utc};

/// `at + secs`, pinned to the latest representable instant on overflow.
pub(crate) fn saturating_add_secs(at: DateTime<Utc>, secs: u64) -> DateTime<Utc> {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saturating_add_secs() {
        let now = Utc::now();
        assert_eq!(saturating_add_secs(now, 5), now + Duration::seconds(5));
        assert_eq!(saturating_add_secs(now, u64::MAX), DateTime::<Utc>::MAX_UTC);
    }
}
