//! Entry point that owns every live rate limiter and circuit breaker.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use dashmap::{DashMap, mapref::entry::Entry};
use tokio::task::JoinHandle;

use crate::{
    CallPermission, CircuitBreaker, CircuitBreakerPolicy, Clock, CounterStore, FloodgateError,
    LocalCounterStore, RateLimitDecision, RateLimitPolicy, RateLimiter, SystemClock, runtime,
};

/// Idle time after which the cleanup loop drops a rate limiter handle by default.
pub const DEFAULT_STALE_AFTER_MS: u64 = 10 * 60 * 1000;

/// Period of the cleanup loop by default.
pub const DEFAULT_CLEANUP_INTERVAL_MS: u64 = 30 * 1000;

/// Configuration registered under a policy name.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyConfig {
    /// Admission control policy.
    RateLimit(RateLimitPolicy),
    /// Circuit breaker policy.
    CircuitBreaker(CircuitBreakerPolicy),
}

impl From<RateLimitPolicy> for PolicyConfig {
    fn from(policy: RateLimitPolicy) -> Self {
        Self::RateLimit(policy)
    }
}

impl From<CircuitBreakerPolicy> for PolicyConfig {
    fn from(policy: CircuitBreakerPolicy) -> Self {
        Self::CircuitBreaker(policy)
    }
}

#[derive(Debug, Clone)]
enum RegisteredPolicy {
    RateLimit(Arc<RateLimitPolicy>),
    CircuitBreaker(Arc<CircuitBreakerPolicy>),
}

impl RegisteredPolicy {
    fn kind(&self) -> &'static str {
        match self {
            Self::RateLimit(_) => "rate limit",
            Self::CircuitBreaker(_) => "circuit breaker",
        }
    }

    fn to_config(&self) -> PolicyConfig {
        match self {
            Self::RateLimit(policy) => PolicyConfig::RateLimit(**policy),
            Self::CircuitBreaker(policy) => PolicyConfig::CircuitBreaker(**policy),
        }
    }
}

impl From<PolicyConfig> for RegisteredPolicy {
    fn from(config: PolicyConfig) -> Self {
        match config {
            PolicyConfig::RateLimit(policy) => Self::RateLimit(Arc::new(policy)),
            PolicyConfig::CircuitBreaker(policy) => Self::CircuitBreaker(Arc::new(policy)),
        }
    }
}

/// Owns the policies, rate limiters and circuit breakers of an application.
///
/// Rate limiters and breakers are created lazily, one per `(policy name, key)`, on first
/// use. Construction races resolve to a single instance. All per-key state is reached
/// through this object; there are no process-wide globals, so tests and tenants can
/// each build their own registry.
///
/// # Examples
///
/// ```no_run
/// # async fn run() -> Result<(), floodgate::FloodgateError> {
/// use floodgate::{
///     Capacity, LocalCounterStore, RateLimitDecision, RateLimitPolicy, RefillRate,
///     ResilienceRegistry, SystemClock,
/// };
///
/// let registry = ResilienceRegistry::new(LocalCounterStore::new(), SystemClock::new());
///
/// registry.register_policy(
///     "api",
///     RateLimitPolicy::token_bucket(Capacity::try_from(10)?, RefillRate::try_from(1.0)?),
/// )?;
///
/// match registry.try_acquire("api", "user_123", 1).await? {
///     RateLimitDecision::Admitted => { /* do the work */ }
///     RateLimitDecision::Rejected { retry_after_ms } => {
///         println!("Rate limited, retry in {retry_after_ms}ms");
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct ResilienceRegistry<S: CounterStore = LocalCounterStore, C: Clock = SystemClock> {
    store: Arc<S>,
    clock: Arc<C>,
    policies: DashMap<String, RegisteredPolicy>,
    rate_limiters: DashMap<(String, String), Arc<RateLimiter<S, C>>>,
    circuit_breakers: DashMap<(String, String), Arc<CircuitBreaker<S, C>>>,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

impl<S: CounterStore, C: Clock> ResilienceRegistry<S, C> {
    /// Create an empty registry backed by `store` and reading time from `clock`.
    pub fn new(store: S, clock: C) -> Self {
        Self {
            store: Arc::new(store),
            clock: Arc::new(clock),
            policies: DashMap::new(),
            rate_limiters: DashMap::new(),
            circuit_breakers: DashMap::new(),
            cleanup_task: Mutex::new(None),
        }
    } // end constructor

    /// The counter store shared by every limiter and breaker.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Register `config` under `name`.
    ///
    /// Registering an identical configuration again is a no-op.
    ///
    /// # Errors
    ///
    /// [`FloodgateError::ConfigConflict`] when `name` already holds a different
    /// configuration. The existing policy is left untouched.
    pub fn register_policy(
        &self,
        name: impl Into<String>,
        config: impl Into<PolicyConfig>,
    ) -> Result<(), FloodgateError> {
        let name = name.into();
        let config = config.into();

        match self.policies.entry(name.clone()) {
            Entry::Occupied(existing) => {
                if existing.get().to_config() == config {
                    Ok(())
                } else {
                    Err(FloodgateError::ConfigConflict { name })
                }
            }
            Entry::Vacant(vacant) => {
                let registered = RegisteredPolicy::from(config);
                tracing::info!(policy = %name, kind = registered.kind(), "Registered policy");
                vacant.insert(registered);
                Ok(())
            }
        }
    } // end method register_policy

    /// Configuration registered under `name`, if any.
    pub fn policy(&self, name: &str) -> Option<PolicyConfig> {
        self.policies.get(name).map(|policy| policy.to_config())
    }

    fn registered_policy(&self, name: &str) -> Result<RegisteredPolicy, FloodgateError> {
        self.policies
            .get(name)
            .map(|policy| policy.value().clone())
            .ok_or_else(|| FloodgateError::UnknownPolicy {
                name: name.to_string(),
            })
    }

    /// The rate limiter for `(policy_name, key)`, created on first use.
    ///
    /// # Errors
    ///
    /// [`FloodgateError::UnknownPolicy`] or [`FloodgateError::PolicyKindMismatch`] when
    /// `policy_name` does not name a rate limit policy.
    pub fn rate_limiter(
        &self,
        policy_name: &str,
        key: &str,
    ) -> Result<Arc<RateLimiter<S, C>>, FloodgateError> {
        let instance_key = (policy_name.to_string(), key.to_string());

        if let Some(limiter) = self.rate_limiters.get(&instance_key) {
            return Ok(Arc::clone(&limiter));
        }

        let RegisteredPolicy::RateLimit(policy) = self.registered_policy(policy_name)? else {
            return Err(FloodgateError::PolicyKindMismatch {
                name: policy_name.to_string(),
                expected: "rate limit",
            });
        };

        let limiter = self
            .rate_limiters
            .entry(instance_key)
            .or_insert_with(|| {
                Arc::new(RateLimiter::new(
                    Arc::from(policy_name),
                    Arc::from(key),
                    policy,
                    Arc::clone(&self.store),
                    Arc::clone(&self.clock),
                ))
            });

        Ok(Arc::clone(&limiter))
    } // end method rate_limiter

    /// The circuit breaker for `(policy_name, key)`, created on first use.
    ///
    /// # Errors
    ///
    /// [`FloodgateError::UnknownPolicy`] or [`FloodgateError::PolicyKindMismatch`] when
    /// `policy_name` does not name a circuit breaker policy.
    pub fn circuit_breaker(
        &self,
        policy_name: &str,
        key: &str,
    ) -> Result<Arc<CircuitBreaker<S, C>>, FloodgateError> {
        let instance_key = (policy_name.to_string(), key.to_string());

        if let Some(breaker) = self.circuit_breakers.get(&instance_key) {
            return Ok(Arc::clone(&breaker));
        }

        let RegisteredPolicy::CircuitBreaker(policy) = self.registered_policy(policy_name)?
        else {
            return Err(FloodgateError::PolicyKindMismatch {
                name: policy_name.to_string(),
                expected: "circuit breaker",
            });
        };

        let breaker = self
            .circuit_breakers
            .entry(instance_key)
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    Arc::from(policy_name),
                    Arc::from(key),
                    policy,
                    Arc::clone(&self.store),
                    Arc::clone(&self.clock),
                ))
            });

        Ok(Arc::clone(&breaker))
    } // end method circuit_breaker

    /// Admit or reject `cost` permits for `key` under the rate limit policy `policy_name`.
    ///
    /// Store failures are handled by the policy's [`FailureMode`](crate::FailureMode).
    pub async fn try_acquire(
        &self,
        policy_name: &str,
        key: &str,
        cost: u64,
    ) -> Result<RateLimitDecision, FloodgateError> {
        self.rate_limiter(policy_name, key)?.try_acquire(cost).await
    }

    /// Ask the breaker for `(policy_name, dependency_key)` whether a call may be attempted.
    pub fn allow_call(
        &self,
        policy_name: &str,
        dependency_key: &str,
    ) -> Result<CallPermission, FloodgateError> {
        let permission = self.circuit_breaker(policy_name, dependency_key)?.allow();

        tracing::debug!(
            policy = %policy_name,
            key = %dependency_key,
            ?permission,
            "Circuit breaker decision"
        );

        Ok(permission)
    }

    /// Report the outcome of a guarded call.
    ///
    /// Only an unknown or mistyped policy name is an error; counter store trouble is
    /// absorbed by the breaker.
    pub async fn record_outcome(
        &self,
        policy_name: &str,
        dependency_key: &str,
        success: bool,
        latency: Duration,
    ) -> Result<(), FloodgateError> {
        self.circuit_breaker(policy_name, dependency_key)?
            .record_outcome(success, latency)
            .await;

        Ok(())
    }

    /// Drop the breaker for `(policy_name, dependency_key)` and clear its rolling window.
    /// Returns `false` if none existed.
    ///
    /// The next call for the same pair starts a new, closed breaker with no failure history.
    pub async fn deregister_circuit_breaker(
        &self,
        policy_name: &str,
        dependency_key: &str,
    ) -> bool {
        let Some((_, breaker)) = self
            .circuit_breakers
            .remove(&(policy_name.to_string(), dependency_key.to_string()))
        else {
            return false;
        };

        breaker.reset().await;
        true
    } // end method deregister_circuit_breaker

    /// Number of live rate limiter handles.
    pub fn rate_limiter_count(&self) -> usize {
        self.rate_limiters.len()
    }

    /// Number of live circuit breakers.
    pub fn circuit_breaker_count(&self) -> usize {
        self.circuit_breakers.len()
    }

    /// Drop rate limiter handles idle for more than `stale_after_ms` and purge expired
    /// store entries. Breakers are only removed by explicit deregistration.
    pub(crate) async fn cleanup(&self, stale_after_ms: u64) {
        let now_ms = self.clock.now_ms();

        self.rate_limiters.retain(|_, limiter| {
            now_ms.saturating_sub(limiter.last_used_ms()) <= stale_after_ms
        });

        if let Err(err) = self.store.purge_expired().await {
            tracing::error!(error = ?err, "Failed to purge expired counter store entries");
        }
    } // end method cleanup

    /// Start the background cleanup loop with the default settings.
    ///
    /// See [`run_cleanup_loop_with_config`](Self::run_cleanup_loop_with_config).
    pub fn run_cleanup_loop(self: &Arc<Self>) {
        self.run_cleanup_loop_with_config(DEFAULT_STALE_AFTER_MS, DEFAULT_CLEANUP_INTERVAL_MS);
    }

    /// Start a tokio task that calls the cleanup every `cleanup_interval_ms`.
    ///
    /// Must be called from within a tokio runtime. Idempotent while a loop is running.
    /// The task holds a weak reference and ends once the registry is dropped.
    pub fn run_cleanup_loop_with_config(
        self: &Arc<Self>,
        stale_after_ms: u64,
        cleanup_interval_ms: u64,
    ) {
        let mut task = self
            .cleanup_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if task.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let registry = Arc::downgrade(self);
        let period = Duration::from_millis(cleanup_interval_ms.max(1));

        *task = Some(runtime::spawn_task(async move {
            let mut interval = runtime::new_interval(period);

            loop {
                runtime::tick(&mut interval).await;

                let Some(registry) = registry.upgrade() else {
                    break;
                };

                registry.cleanup(stale_after_ms).await;
            }
        }));
    } // end method run_cleanup_loop_with_config

    /// Stop the cleanup loop. Idempotent.
    pub fn stop_cleanup_loop(&self) {
        let task = self
            .cleanup_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        if let Some(task) = task {
            task.abort();
        }
    }
} // end of impl

impl<S: CounterStore, C: Clock> Drop for ResilienceRegistry<S, C> {
    fn drop(&mut self) {
        self.stop_cleanup_loop();
    }
}
