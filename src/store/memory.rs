//! In-process state store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::KeyValueStore;
use crate::clock::SharedClock;
use crate::error::Result;

/// A single identity's state plus bookkeeping for expiry and reclamation.
#[derive(Debug)]
struct Slot<V> {
    value: V,
    last_access: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    /// Set by the sweeper when the slot is unlinked from the map. A caller
    /// that finds this set must look the identity up again.
    evicted: bool,
}

impl<V> Slot<V> {
    fn new(value: V, now: DateTime<Utc>) -> Self {
        Self {
            value,
            last_access: now,
            expires_at: None,
            evicted: false,
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

type SharedSlot<V> = Arc<Mutex<Slot<V>>>;

/// Identity-keyed arena of independently locked slots.
///
/// The top-level map only guards insert-if-absent and removal; every
/// read-modify-write happens under the identity's own mutex, so unrelated
/// identities never serialize behind each other.
pub struct MemoryStore<V> {
    slots: DashMap<String, SharedSlot<V>>,
    clock: SharedClock,
}

impl<V> std::fmt::Debug for MemoryStore<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("slots", &self.slots.len())
            .field("clock", &self.clock)
            .finish()
    }
}

impl<V> MemoryStore<V> {
    /// Create an empty store.
    pub fn new(clock: SharedClock) -> Self {
        Self {
            slots: DashMap::new(),
            clock,
        }
    }

    /// Run `f` against the state for `key`, creating it with `init` on first
    /// sight (or when a TTL has lapsed).
    ///
    /// The identity's lock is held for the duration of `f`, which makes the
    /// whole read-modify-write atomic with respect to other callers for the
    /// same identity.
    pub fn with_entry<R>(&self, key: &str, init: impl Fn() -> V, f: impl FnOnce(&mut V) -> R) -> R {
        loop {
            let slot = self.slot(key, &init);
            let mut guard = slot.lock();
            if guard.evicted {
                trace!(key = %key, "Slot evicted while waiting, retrying");
                continue;
            }

            let now = self.clock.now();
            if guard.is_expired(now) {
                guard.value = init();
                guard.expires_at = None;
            }
            guard.last_access = now;

            return f(&mut guard.value);
        }
    }

    /// Remove every slot not touched within `idle_for`, plus any whose TTL
    /// has lapsed. Returns the number of evicted slots.
    pub fn sweep(&self, idle_for: Duration) -> usize {
        let now = self.clock.now();
        let mut evicted = 0;

        self.slots.retain(|_, slot| {
            let mut guard = slot.lock();
            let stale = now - guard.last_access > idle_for || guard.is_expired(now);
            if stale {
                guard.evicted = true;
                evicted += 1;
            }
            !stale
        });

        if evicted > 0 {
            debug!(evicted, remaining = self.slots.len(), "Swept idle state");
        }
        evicted
    }

    /// Get the number of tracked identities.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no identity is tracked.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Whether state exists for `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.slots.contains_key(key)
    }

    /// Drop all state.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        for entry in self.slots.iter() {
            entry.value().lock().evicted = true;
        }
        self.slots.clear();
    }

    fn slot(&self, key: &str, init: &impl Fn() -> V) -> SharedSlot<V> {
        if let Some(slot) = self.slots.get(key) {
            return Arc::clone(slot.value());
        }

        let slot = self.slots.entry(key.to_owned()).or_insert_with(|| {
            debug!(key = %key, "Creating state for new identity");
            Arc::new(Mutex::new(Slot::new(init(), self.clock.now())))
        });
        Arc::clone(slot.value())
    }
}

#[async_trait]
impl<V> KeyValueStore<V> for MemoryStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn load(&self, key: &str) -> Result<Option<V>> {
        let Some(slot) = self.slots.get(key).map(|s| Arc::clone(s.value())) else {
            return Ok(None);
        };

        let mut guard = slot.lock();
        let now = self.clock.now();
        if guard.evicted || guard.is_expired(now) {
            return Ok(None);
        }
        guard.last_access = now;
        Ok(Some(guard.value.clone()))
    }

    async fn store(&self, key: &str, value: &V, ttl: Option<Duration>) -> Result<()> {
        loop {
            let slot = self.slot(key, &|| value.clone());
            let mut guard = slot.lock();
            if guard.evicted {
                continue;
            }

            let now = self.clock.now();
            guard.value = value.clone();
            guard.last_access = now;
            guard.expires_at = ttl.map(|ttl| now + ttl);
            return Ok(());
        }
    }
}
