use std::time::Duration;

/// Error type for this crate.
///
/// Throttling and open circuits are not errors; they are the `Rejected` variants of
/// [`RateLimitDecision`](crate::RateLimitDecision) and [`CallPermission`](crate::CallPermission).
#[derive(Debug, thiserror::Error)]
pub enum FloodgateError {
    /// Capacity must be at least 1.
    #[error("invalid capacity: {0}")]
    InvalidCapacity(String),

    /// Refill rate must be a positive, finite number of permits per second.
    #[error("invalid refill rate: {0}")]
    InvalidRefillRate(String),

    /// Window length must be at least 1 ms.
    #[error("invalid window size: {0}")]
    InvalidWindowSize(String),

    /// Failure rate threshold must be in `(0, 1]`.
    #[error("invalid failure rate threshold: {0}")]
    InvalidFailureRateThreshold(String),

    /// Minimum call volume must be at least 1.
    #[error("invalid minimum volume: {0}")]
    InvalidMinimumVolume(String),

    /// Half-open trial count must be at least 1.
    #[error("invalid trial count: {0}")]
    InvalidTrialCount(String),

    /// Open-state cooldown must be non-zero.
    #[error("invalid cooldown: {0}")]
    InvalidCooldown(String),

    /// Store timeout must be at least 1 ms.
    #[error("invalid store timeout: {0}")]
    InvalidStoreTimeout(String),

    /// Redis key prefix failed validation.
    #[error("invalid redis key: {0}")]
    InvalidRedisKey(String),

    /// A policy with the same name but a different configuration already exists.
    #[error("policy `{name}` is already registered with a different configuration")]
    ConfigConflict {
        /// Name of the conflicting policy.
        name: String,
    },

    /// No policy is registered under this name.
    #[error("no policy registered under `{name}`")]
    UnknownPolicy {
        /// Name that was looked up.
        name: String,
    },

    /// The policy exists but is of the other kind (rate limit vs circuit breaker).
    #[error("policy `{name}` is not a {expected} policy")]
    PolicyKindMismatch {
        /// Name that was looked up.
        name: String,
        /// Kind the caller asked for.
        expected: &'static str,
    },

    /// Requested cost is zero or can never fit in the policy's capacity.
    #[error("cost {cost} is not admissible for capacity {capacity}")]
    InvalidCost {
        /// Requested cost.
        cost: u64,
        /// Capacity of the policy.
        capacity: u64,
    },

    /// The counter store failed and the policy is configured to propagate it.
    #[error("counter store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    /// A Redis connection pool was requested with zero connections.
    #[cfg(feature = "redis")]
    #[cfg_attr(docsrs, doc(cfg(feature = "redis")))]
    #[error("invalid redis pool size: {0}")]
    InvalidRedisPoolSize(String),

    /// Redis error.
    #[cfg(feature = "redis")]
    #[cfg_attr(docsrs, doc(cfg(feature = "redis")))]
    #[error("redis error: {0}")]
    RedisError(#[from] redis::RedisError),
}

/// Failure of a [`CounterStore`](crate::CounterStore) operation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The operation did not finish within the policy's store timeout.
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    /// Compare-and-set kept losing races.
    #[error("compare-and-set gave up after {attempts} attempts")]
    Contention {
        /// Number of attempts made.
        attempts: u32,
    },

    /// A stored value could not be decoded.
    #[error("corrupt stored value: {0}")]
    Corrupt(String),

    /// Redis error.
    #[cfg(feature = "redis")]
    #[cfg_attr(docsrs, doc(cfg(feature = "redis")))]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}
