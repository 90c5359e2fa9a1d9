use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use crate::{
    BreakerMetrics, BreakerState, CallPermission, CircuitBreakerPolicy, Clock, CounterStore,
    circuit_breaker::rolling_window::RollingWindow, common::EPSILON, runtime,
};

struct BreakerCell {
    state: BreakerState,
    /// Bumped on every transition so a window evaluation started in one closed period
    /// cannot open the breaker in a later one.
    transitions: u64,
    /// When the latest half-open trial was let through.
    last_trial_ms: u64,
}

/// Work left to do after the state lock is released.
enum Followup {
    Nothing,
    EvaluateWindow { transitions: u64 },
    ResetWindow,
}

/// Failure-triggered call suppression for one `(policy, dependency)` pair.
///
/// # States
///
/// - **Closed**: Normal operation. Calls pass through; outcomes feed a rolling window kept
///   in the counter store. Once the window holds at least `minimum_volume` calls and the
///   failure rate reaches the threshold, the breaker opens.
/// - **Open**: Calls are rejected immediately. After `cooldown` the next
///   [`allow`](Self::allow) moves to half-open.
/// - **Half-Open**: Up to `half_open_trial_count` trial calls are let through. Any failed
///   trial re-opens the breaker with a fresh cooldown; once every trial has succeeded the
///   breaker closes and the rolling window is cleared. Trials whose outcome is still
///   unreported one `cooldown` after the latest trial started are given up on, freeing
///   their slots. Outcomes arriving with no trial in flight only count in the metrics.
///
/// The state machine itself is process-local and guarded by a per-breaker lock; only the
/// outcome counts go through the store, so several processes sharing a store see the same
/// failure rate.
pub struct CircuitBreaker<S: CounterStore, C: Clock> {
    policy_name: Arc<str>,
    key: Arc<str>,
    policy: Arc<CircuitBreakerPolicy>,
    store: Arc<S>,
    clock: Arc<C>,
    window: RollingWindow,
    cell: Mutex<BreakerCell>,
    metrics: Mutex<BreakerMetrics>,
}

impl<S: CounterStore, C: Clock> CircuitBreaker<S, C> {
    pub(crate) fn new(
        policy_name: Arc<str>,
        key: Arc<str>,
        policy: Arc<CircuitBreakerPolicy>,
        store: Arc<S>,
        clock: Arc<C>,
    ) -> Self {
        let window = RollingWindow::new(
            format!("cb:{}:{}", policy_name, key),
            policy.rolling_window,
        );

        Self {
            policy_name,
            key,
            policy,
            store,
            clock,
            window,
            cell: Mutex::new(BreakerCell {
                state: BreakerState::Closed,
                transitions: 0,
                last_trial_ms: 0,
            }),
            metrics: Mutex::new(BreakerMetrics::default()),
        }
    } // end constructor

    fn lock_cell(&self) -> MutexGuard<'_, BreakerCell> {
        self.cell
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_metrics(&self) -> MutexGuard<'_, BreakerMetrics> {
        self.metrics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Policy this breaker follows.
    pub fn policy(&self) -> &CircuitBreakerPolicy {
        &self.policy
    }

    /// Dependency key this breaker guards.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the current state of the circuit breaker.
    ///
    /// An open breaker whose cooldown has elapsed still reads as open until the next
    /// [`allow`](Self::allow).
    pub fn state(&self) -> BreakerState {
        self.lock_cell().state
    }

    /// Returns a copy of the current metrics.
    pub fn metrics(&self) -> BreakerMetrics {
        *self.lock_metrics()
    }

    /// Decide whether a call to the dependency may be attempted now.
    ///
    /// Never touches the counter store, so it always returns immediately.
    pub fn allow(&self) -> CallPermission {
        let now_ms = self.clock.now_ms();
        let mut cell = self.lock_cell();

        let permission = match cell.state {
            BreakerState::Closed => CallPermission::Allowed,
            BreakerState::Open { opened_at_ms } => {
                let trial_at_ms = opened_at_ms.saturating_add(*self.policy.cooldown);

                if now_ms >= trial_at_ms {
                    cell.last_trial_ms = now_ms;
                    self.transition(
                        &mut cell,
                        BreakerState::HalfOpen {
                            trials_in_flight: 1,
                            trials_succeeded: 0,
                        },
                        None,
                    );
                    CallPermission::Allowed
                } else {
                    CallPermission::Rejected {
                        retry_after_ms: Some(trial_at_ms - now_ms),
                    }
                }
            }
            BreakerState::HalfOpen {
                trials_in_flight,
                trials_succeeded,
            } => {
                let trials_in_flight = if trials_in_flight > 0
                    && now_ms >= cell.last_trial_ms.saturating_add(*self.policy.cooldown)
                {
                    tracing::debug!(
                        policy = %self.policy_name,
                        key = %self.key,
                        trials_in_flight,
                        "Giving up on unreported half-open trials"
                    );
                    0
                } else {
                    trials_in_flight
                };

                if trials_in_flight + trials_succeeded < *self.policy.half_open_trial_count {
                    cell.state = BreakerState::HalfOpen {
                        trials_in_flight: trials_in_flight + 1,
                        trials_succeeded,
                    };
                    cell.last_trial_ms = now_ms;
                    CallPermission::Allowed
                } else {
                    CallPermission::Rejected {
                        retry_after_ms: None,
                    }
                }
            }
        };

        drop(cell);

        if !permission.is_allowed() {
            self.lock_metrics().rejected_calls += 1;
        }

        permission
    } // end method allow

    /// Report the outcome of a call previously allowed by [`allow`](Self::allow).
    ///
    /// Never fails: if the counter store is unavailable the outcome is dropped from the
    /// rolling window and a debug event is emitted. Outcomes reported while open, or while
    /// half-open with no trial in flight, are counted in the metrics only.
    pub async fn record_outcome(&self, success: bool, latency: Duration) {
        let failed = self.policy.is_failure(success, latency);
        self.lock_metrics().record_outcome(success, failed);

        let now_ms = self.clock.now_ms();

        let followup = {
            let mut cell = self.lock_cell();

            match cell.state {
                BreakerState::Closed => Followup::EvaluateWindow {
                    transitions: cell.transitions,
                },
                BreakerState::Open { .. } => Followup::Nothing,
                // a late report from before the breaker opened, or a given-up trial
                BreakerState::HalfOpen {
                    trials_in_flight: 0,
                    ..
                } => Followup::Nothing,
                BreakerState::HalfOpen {
                    trials_in_flight,
                    trials_succeeded,
                } => {
                    let trials_in_flight = trials_in_flight - 1;

                    if failed {
                        self.transition(&mut cell, BreakerState::Open { opened_at_ms: now_ms }, None);
                        Followup::Nothing
                    } else if trials_succeeded + 1 >= *self.policy.half_open_trial_count {
                        self.transition(&mut cell, BreakerState::Closed, None);
                        Followup::ResetWindow
                    } else {
                        cell.state = BreakerState::HalfOpen {
                            trials_in_flight,
                            trials_succeeded: trials_succeeded + 1,
                        };
                        Followup::Nothing
                    }
                }
            }
        };

        match followup {
            Followup::Nothing => {}
            Followup::EvaluateWindow { transitions } => {
                self.evaluate_window(now_ms, failed, transitions).await
            }
            Followup::ResetWindow => self.reset_window(now_ms).await,
        }
    } // end method record_outcome

    async fn evaluate_window(&self, now_ms: u64, failed: bool, transitions: u64) {
        let recorded = runtime::with_timeout(
            self.policy.store_timeout_duration(),
            self.window.record(self.store.as_ref(), now_ms, failed),
        )
        .await;

        let counts = match recorded {
            Ok(counts) => counts,
            Err(err) => {
                tracing::debug!(
                    policy = %self.policy_name,
                    key = %self.key,
                    error = ?err,
                    "Failed to record circuit breaker outcome, skipping evaluation"
                );
                return;
            }
        };

        let failure_rate = counts.failure_rate();

        if counts.calls + EPSILON < *self.policy.minimum_volume as f64
            || failure_rate + EPSILON < *self.policy.failure_rate_threshold
        {
            return;
        }

        let mut cell = self.lock_cell();

        if cell.state.is_closed() && cell.transitions == transitions {
            self.transition(
                &mut cell,
                BreakerState::Open { opened_at_ms: now_ms },
                Some(failure_rate),
            );
        }
    } // end method evaluate_window

    async fn reset_window(&self, now_ms: u64) {
        let reset = runtime::with_timeout(
            self.policy.store_timeout_duration(),
            self.window.reset(self.store.as_ref(), now_ms),
        )
        .await;

        if let Err(err) = reset {
            tracing::debug!(
                policy = %self.policy_name,
                key = %self.key,
                error = ?err,
                "Failed to clear circuit breaker rolling window"
            );
        }
    }

    fn transition(&self, cell: &mut BreakerCell, to: BreakerState, failure_rate: Option<f64>) {
        let from = cell.state;
        cell.state = to;
        cell.transitions += 1;

        {
            let mut metrics = self.lock_metrics();
            match to {
                BreakerState::Open { .. } => metrics.times_opened += 1,
                BreakerState::Closed if from.is_half_open() => metrics.times_closed += 1,
                _ => {}
            }
        }

        tracing::info!(
            policy = %self.policy_name,
            key = %self.key,
            from = from.name(),
            to = to.name(),
            failure_rate,
            "Circuit breaker state changed"
        );
    } // end method transition

    /// Forces the circuit into the open state, starting a fresh cooldown.
    pub fn force_open(&self) {
        let now_ms = self.clock.now_ms();
        let mut cell = self.lock_cell();
        self.transition(&mut cell, BreakerState::Open { opened_at_ms: now_ms }, None);
    }

    /// Forces the circuit into the closed state. The rolling window is kept.
    pub fn force_close(&self) {
        let mut cell = self.lock_cell();
        self.transition(&mut cell, BreakerState::Closed, None);
    }

    /// Closes the circuit, clears the rolling window and zeroes the metrics.
    pub async fn reset(&self) {
        let now_ms = self.clock.now_ms();

        {
            let mut cell = self.lock_cell();
            cell.state = BreakerState::Closed;
            cell.transitions += 1;
        }
        *self.lock_metrics() = BreakerMetrics::default();

        self.reset_window(now_ms).await;
    }
} // end of impl
