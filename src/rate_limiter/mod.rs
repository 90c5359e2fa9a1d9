//! Per-key admission control.
//!
//! A [`RateLimiter`] decides whether a unit of work identified by a key may run now,
//! using one of four interchangeable [`Algorithm`]s:
//!
//! | Algorithm | State per key | Exact? | Bursts |
//! |---|---|---|---|
//! | Token bucket | `[tokens, last_refill_ms]` | yes | up to capacity after idling |
//! | Fixed window | `[window_id, count]` | per window | up to 2× capacity across a boundary |
//! | Sliding window log | one timestamp per admitted permit | yes | none |
//! | Sliding window counter | `[window_id, current, previous]` | approximate | small |
//!
//! Rounding: fractional token and window math is compared with a `1e-9` tolerance and
//! weighted counts are floored, so decisions do not flap at exact boundaries.
//!
//! Every algorithm reads its state, decides, and writes back with
//! [`compare_and_set`](crate::CounterStore::compare_and_set), retrying when another writer
//! got there first. Rejections never write.

mod rate_limit_policy;
pub use rate_limit_policy::*;

mod keyed_rate_limiter;
pub use keyed_rate_limiter::*;

pub(crate) mod fixed_window;
pub(crate) mod sliding_window_counter;
pub(crate) mod sliding_window_log;
pub(crate) mod token_bucket;

/// Optimistic read-modify-write attempts before giving up with
/// [`StoreError::Contention`](crate::StoreError::Contention).
pub(crate) const MAX_CAS_ATTEMPTS: u32 = 1024;

/// Retry hint for a request rejected because its key stayed contended.
pub(crate) const CONTENDED_RETRY_AFTER_MS: u64 = 1;
