//! Circuit breaking for downstream dependencies.
//!
//! The circuit breaker pattern prevents cascading failures by temporarily
//! stopping traffic to failing dependencies and periodically probing them to
//! detect recovery.
//!
//! ## States
//!
//! - **Closed**: Normal operation; calls pass through.
//! - **Open**: Dependency is failing; calls are rejected immediately.
//! - **Half-Open**: Probing the dependency to see if it has recovered.
//!
//! ## Usage
//!
//! ```no_run
//! # async fn run() -> Result<(), floodgate::FloodgateError> {
//! use std::time::Duration;
//!
//! use floodgate::{CircuitBreakerPolicy, LocalCounterStore, ResilienceRegistry, SystemClock};
//!
//! let registry = ResilienceRegistry::new(LocalCounterStore::new(), SystemClock::new());
//! registry.register_policy("payments", CircuitBreakerPolicy::default())?;
//!
//! if registry.allow_call("payments", "psp-eu")?.is_allowed() {
//!     // call the dependency, then report how it went
//!     registry
//!         .record_outcome("payments", "psp-eu", true, Duration::from_millis(42))
//!         .await?;
//! }
//! # Ok(())
//! # }
//! ```

mod breaker_state;
pub use breaker_state::*;

mod circuit_breaker_policy;
pub use circuit_breaker_policy::*;

mod keyed_circuit_breaker;
pub use keyed_circuit_breaker::*;

mod rolling_window;
