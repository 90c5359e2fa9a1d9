//! Redis-backed counter store.
//!
//! Lets several processes share rate limit state and circuit breaker failure counts.
//!
//! # Requirements
//!
//! - **Redis:** >= 6.2.0
//! - **Runtime:** Tokio

mod common;
pub use common::*;

mod redis_counter_store;
pub use redis_counter_store::*;
