use std::{future::Future, ops::Deref, time::Duration};

use crate::StoreError;

/// Numeric state stored under a single key.
///
/// Limiter algorithms pack their per-key state into a handful of numbers (for example
/// `[tokens, last_refill_ms]`). Integers up to 2^53 round-trip exactly.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StoredState(Vec<f64>);

impl StoredState {
    /// Wrap a list of values.
    pub fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    /// A single-value state, as produced by [`CounterStore::increment`].
    pub fn scalar(value: f64) -> Self {
        Self(vec![value])
    }

    /// First value, or `0` when empty.
    pub fn first(&self) -> f64 {
        self.0.first().copied().unwrap_or(0f64)
    }

    /// Consume into the underlying values.
    pub fn into_inner(self) -> Vec<f64> {
        self.0
    }
}

impl Deref for StoredState {
    type Target = [f64];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<f64>> for StoredState {
    fn from(values: Vec<f64>) -> Self {
        Self(values)
    }
}

/// Key → numeric state storage shared by rate limiters and circuit breakers.
///
/// Implementations may live in-process ([`LocalCounterStore`](crate::LocalCounterStore))
/// or behind the network (`RedisCounterStore` with the `redis` feature). Every
/// mutating operation must be atomic with respect to other operations on the same key;
/// callers build linearizable read-modify-write cycles out of [`get`](Self::get) and
/// [`compare_and_set`](Self::compare_and_set), or use [`increment`](Self::increment).
///
/// Callers bound every call with their own timeout, so implementations do not need one.
pub trait CounterStore: Send + Sync + 'static {
    /// Read the current value of `key`. Expired keys read as absent.
    fn get(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<StoredState>, StoreError>> + Send;

    /// Replace the value of `key` with `new` only if it currently equals `expected`
    /// (`None` meaning absent). On success the key expires after `ttl`.
    ///
    /// Returns `false` when another writer got there first.
    fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&StoredState>,
        new: StoredState,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Add `delta` to the first value of `key`, creating it at `0` when absent, and
    /// return the new value. `ttl` applies when the key is created by this call.
    fn increment(
        &self,
        key: &str,
        delta: i64,
        ttl: Duration,
    ) -> impl Future<Output = Result<i64, StoreError>> + Send;

    /// Set the time to live of `key`. A zero `ttl` removes the key.
    fn expire(&self, key: &str, ttl: Duration)
    -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Drop entries whose time to live has passed.
    ///
    /// Stores that expire keys on their own (e.g. Redis) keep the default no-op.
    fn purge_expired(&self) -> impl Future<Output = Result<(), StoreError>> + Send {
        async { Ok(()) }
    }
}
