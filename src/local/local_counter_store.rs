use std::time::Duration;

use dashmap::{DashMap, mapref::entry::Entry};

use crate::{Clock, CounterStore, StoreError, StoredState, SystemClock};

struct StoreEntry {
    state: StoredState,
    expires_at_ms: u64,
}

impl StoreEntry {
    fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

/// In-process [`CounterStore`] backed by a [`DashMap`].
///
/// Each operation runs while holding the key's shard lock, which makes compare-and-set
/// and increment atomic per key while unrelated keys proceed in parallel.
///
/// # Expiry
///
/// Expired entries read as absent and are overwritten lazily. They only leave memory
/// when the key is touched again or [`purge_expired`](CounterStore::purge_expired)
/// runs (the registry's cleanup loop calls it).
pub struct LocalCounterStore<C: Clock = SystemClock> {
    clock: C,
    entries: DashMap<String, StoreEntry>,
}

impl LocalCounterStore<SystemClock> {
    /// Create an empty store that measures expiry with a [`SystemClock`].
    pub fn new() -> Self {
        Self::with_clock(SystemClock::new())
    }
}

impl Default for LocalCounterStore<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> LocalCounterStore<C> {
    /// Create an empty store that measures expiry with `clock`.
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock,
            entries: DashMap::new(),
        }
    } // end constructor

    /// Number of entries held, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when no entries are held.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn expiry(&self, now_ms: u64, ttl: Duration) -> u64 {
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        now_ms.saturating_add(ttl_ms)
    }

    fn get_sync(&self, key: &str) -> Option<StoredState> {
        let now_ms = self.clock.now_ms();
        let entry = self.entries.get(key)?;

        if entry.is_expired(now_ms) {
            return None;
        }

        Some(entry.state.clone())
    }

    fn compare_and_set_sync(
        &self,
        key: &str,
        expected: Option<&StoredState>,
        new: StoredState,
        ttl: Duration,
    ) -> bool {
        let now_ms = self.clock.now_ms();
        let expires_at_ms = self.expiry(now_ms, ttl);

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get();
                let current = (!current.is_expired(now_ms)).then_some(&current.state);

                if current != expected {
                    return false;
                }

                occupied.insert(StoreEntry {
                    state: new,
                    expires_at_ms,
                });
                true
            }
            Entry::Vacant(vacant) => {
                if expected.is_some() {
                    return false;
                }

                vacant.insert(StoreEntry {
                    state: new,
                    expires_at_ms,
                });
                true
            }
        }
    } // end method compare_and_set_sync

    fn increment_sync(&self, key: &str, delta: i64, ttl: Duration) -> i64 {
        let now_ms = self.clock.now_ms();
        let expires_at_ms = self.expiry(now_ms, ttl);

        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| StoreEntry {
                state: StoredState::scalar(0f64),
                expires_at_ms,
            });

        if entry.is_expired(now_ms) {
            *entry = StoreEntry {
                state: StoredState::scalar(0f64),
                expires_at_ms,
            };
        }

        let value = (entry.state.first() as i64).saturating_add(delta);
        entry.state = StoredState::scalar(value as f64);

        value
    } // end method increment_sync

    fn expire_sync(&self, key: &str, ttl: Duration) {
        if ttl.is_zero() {
            self.entries.remove(key);
            return;
        }

        let now_ms = self.clock.now_ms();
        let expires_at_ms = self.expiry(now_ms, ttl);

        if let Some(mut entry) = self.entries.get_mut(key)
            && !entry.is_expired(now_ms)
        {
            entry.expires_at_ms = expires_at_ms;
        }
    }

    fn purge_expired_sync(&self) {
        let now_ms = self.clock.now_ms();
        self.entries.retain(|_, entry| !entry.is_expired(now_ms));
    }
} // end of impl

impl<C: Clock> CounterStore for LocalCounterStore<C> {
    async fn get(&self, key: &str) -> Result<Option<StoredState>, StoreError> {
        Ok(self.get_sync(key))
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&StoredState>,
        new: StoredState,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        Ok(self.compare_and_set_sync(key, expected, new, ttl))
    }

    async fn increment(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64, StoreError> {
        Ok(self.increment_sync(key, delta, ttl))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        self.expire_sync(key, ttl);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<(), StoreError> {
        self.purge_expired_sync();
        Ok(())
    }
}
