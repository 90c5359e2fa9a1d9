//! Circuit breaker state machine.

/// The current state of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BreakerState {
    /// Calls pass through and their outcomes feed the rolling window.
    #[default]
    Closed,

    /// Calls are rejected until the cooldown has elapsed.
    Open {
        /// When the circuit was opened, in clock milliseconds.
        opened_at_ms: u64,
    },

    /// A limited number of trial calls are let through.
    HalfOpen {
        /// Trials allowed whose outcome has not been reported yet.
        trials_in_flight: u32,
        /// Trials reported successful so far.
        trials_succeeded: u32,
    },
}

impl BreakerState {
    /// Returns `true` if the circuit is closed.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Returns `true` if the circuit is open.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    /// Returns `true` if the circuit is half-open.
    pub fn is_half_open(&self) -> bool {
        matches!(self, Self::HalfOpen { .. })
    }

    /// Returns the name of the state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open { .. } => "open",
            Self::HalfOpen { .. } => "half_open",
        }
    }
}

/// Counters about circuit breaker behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BreakerMetrics {
    /// Outcomes reported.
    pub total_calls: u64,
    /// Outcomes reported as successful and not slow.
    pub successful_calls: u64,
    /// Outcomes counted as failures, slow calls included.
    pub failed_calls: u64,
    /// Successful outcomes at or above the slow call threshold.
    pub slow_calls: u64,
    /// Calls rejected because the circuit was open or out of trial slots.
    pub rejected_calls: u64,
    /// Number of times the circuit has opened.
    pub times_opened: u64,
    /// Number of times the circuit has closed from half-open.
    pub times_closed: u64,
}

impl BreakerMetrics {
    pub(crate) fn record_outcome(&mut self, success: bool, failed: bool) {
        self.total_calls += 1;

        if failed {
            self.failed_calls += 1;
            if success {
                self.slow_calls += 1;
            }
        } else {
            self.successful_calls += 1;
        }
    }

    /// Returns the failure rate (0.0 to 1.0) over all reported outcomes.
    pub fn failure_rate(&self) -> f64 {
        if self.total_calls == 0 {
            return 0.0;
        }
        self.failed_calls as f64 / self.total_calls as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breaker_state_default() {
        let state = BreakerState::default();
        assert!(state.is_closed());
    }

    #[test]
    fn test_breaker_state_names() {
        assert_eq!(BreakerState::Closed.name(), "closed");
        assert_eq!(BreakerState::Open { opened_at_ms: 0 }.name(), "open");
        assert_eq!(
            BreakerState::HalfOpen {
                trials_in_flight: 0,
                trials_succeeded: 0,
            }
            .name(),
            "half_open"
        );
    }

    #[test]
    fn test_metrics_count_slow_calls_as_failures() {
        let mut metrics = BreakerMetrics::default();
        assert_eq!(metrics.failure_rate(), 0.0);

        metrics.record_outcome(true, false);
        metrics.record_outcome(true, true);
        metrics.record_outcome(false, true);

        assert_eq!(metrics.total_calls, 3);
        assert_eq!(metrics.successful_calls, 1);
        assert_eq!(metrics.failed_calls, 2);
        assert_eq!(metrics.slow_calls, 1);
        assert!((metrics.failure_rate() - 0.666).abs() < 0.01);
    }
}
