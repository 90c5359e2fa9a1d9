//! In-process counter store.
//!
//! [`LocalCounterStore`] keeps per-key state within the current process using a
//! [`DashMap`](dashmap::DashMap).
//!
//! # Key Characteristics
//!
//! - **Thread-safe:** compare-and-set and increment are atomic per key
//! - **Zero external dependencies:** No network or database required
//! - **Low latency:** No I/O; store futures complete on first poll
//! - **Process-scoped:** State is not shared across processes
//!
//! # When to Use
//!
//! ✅ **Use the local store when:**
//! - Single-process application
//! - Low-latency requirements
//! - No need for distributed coordination
//!
//! ❌ **Don't use the local store when:**
//! - Multiple application instances need shared limits or shared failure rates
//! - Limits must survive process restarts
//!
//! # Examples
//!
//! ```no_run
//! use floodgate::{LocalCounterStore, ResilienceRegistry, SystemClock};
//!
//! let registry = ResilienceRegistry::new(LocalCounterStore::new(), SystemClock::new());
//! ```

mod local_counter_store;
pub use local_counter_store::*;
