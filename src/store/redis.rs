//! Redis-backed state store.
//!
//! Records are stored as JSON strings under `<prefix>:<identity>` with a
//! per-write expiry. Every operation is bounded by an I/O timeout; a timeout
//! surfaces as [`TurnstileError::StoreUnavailable`].

use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Duration;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::timeout;
use tracing::{info, trace};

use super::KeyValueStore;
use crate::error::{Result, TurnstileError};

/// Default key prefix.
pub const DEFAULT_PREFIX: &str = "turnstile";

/// A networked store shared by every replica pointed at the same endpoint.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    prefix: String,
    timeout: StdDuration,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("prefix", &self.prefix)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RedisStore {
    /// Connect to `url`, failing fast when the endpoint cannot be reached
    /// within `io_timeout`.
    pub async fn connect(url: &str, prefix: &str, io_timeout: StdDuration) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| TurnstileError::field("storeURL", e))?;
        let connection = timeout(io_timeout, client.get_connection_manager()).await??;

        info!(prefix = %prefix, timeout_ms = io_timeout.as_millis() as u64, "Connected to Redis state store");

        Ok(Self {
            connection,
            prefix: prefix.to_string(),
            timeout: io_timeout,
        })
    }

    /// The namespaced Redis key for an identity.
    pub fn key(&self, identity: &str) -> String {
        format!("{}:{}", self.prefix, identity)
    }
}

#[async_trait]
impl<V> KeyValueStore<V> for RedisStore
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn load(&self, key: &str) -> Result<Option<V>> {
        let key = self.key(key);
        let mut connection = self.connection.clone();

        let raw: Option<String> = timeout(self.timeout, connection.get(&key)).await??;
        trace!(key = %key, found = raw.is_some(), "Loaded record");

        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn store(&self, key: &str, value: &V, ttl: Option<Duration>) -> Result<()> {
        let key = self.key(key);
        let payload = serde_json::to_string(value)?;
        let mut connection = self.connection.clone();

        match ttl {
            Some(ttl) => {
                // Redis rejects a zero expiry.
                let millis = ttl.num_milliseconds().max(1) as u64;
                timeout(self.timeout, connection.pset_ex::<_, _, ()>(&key, payload, millis)).await??;
            }
            None => {
                timeout(self.timeout, connection.set::<_, _, ()>(&key, payload)).await??;
            }
        }

        trace!(key = %key, "Stored record");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_rejects_malformed_url() {
        let err = RedisStore::connect("not a url", DEFAULT_PREFIX, StdDuration::from_millis(100))
            .await
            .unwrap_err();

        assert!(matches!(err, TurnstileError::Configuration(_)));
        assert!(err.to_string().contains("storeURL"));
    }

    #[tokio::test]
    async fn test_connect_unreachable_is_store_unavailable() {
        // Port 1 is reserved and refuses connections.
        let err = RedisStore::connect("redis://127.0.0.1:1/0", DEFAULT_PREFIX, StdDuration::from_millis(500))
            .await
            .unwrap_err();

        assert!(matches!(err, TurnstileError::StoreUnavailable(_)));
    }
}
