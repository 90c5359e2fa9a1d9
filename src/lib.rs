#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
#![forbid(unsafe_code)]

mod rate_limiter;
pub use rate_limiter::*;

mod circuit_breaker;
pub use circuit_breaker::*;

mod registry;
pub use registry::*;

mod counter_store;
pub use counter_store::*;

mod local;
pub use local::*;

#[cfg(feature = "redis")]
mod redis;
#[cfg(feature = "redis")]
pub use redis::*;

mod clock;
pub use clock::*;

mod error;
pub use error::*;

mod common;
pub use common::{
    CallPermission, Capacity, FailureMode, RateLimitDecision, RefillRate, StoreTimeoutMs,
    WindowSizeMs,
};

mod runtime;

#[cfg(test)]
mod tests;
