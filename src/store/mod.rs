//! Per-identity state storage.
//!
//! Two backends share the [`KeyValueStore`] contract:
//!
//! - **Memory**: in-process slots behind a [`DashMap`](dashmap::DashMap), one lock per identity
//! - **Redis**: networked records with per-entry expiry, shared across replicas

mod memory;
mod redis;

pub use memory::MemoryStore;
pub use self::redis::{RedisStore, DEFAULT_PREFIX};

use async_trait::async_trait;
use chrono::Duration;

use crate::error::Result;

/// Uniform load/store contract over per-identity records.
///
/// A `ttl` of `None` keeps the record until it is overwritten or reclaimed.
#[async_trait]
pub trait KeyValueStore<V>: Send + Sync + std::fmt::Debug
where
    V: Send + Sync + 'static,
{
    /// Fetch the record for `key`, or `None` when absent or expired.
    async fn load(&self, key: &str) -> Result<Option<V>>;

    /// Write the record for `key`, replacing any previous value.
    async fn store(&self, key: &str, value: &V, ttl: Option<Duration>) -> Result<()>;
}
