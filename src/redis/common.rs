use std::{
    ops::Deref,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use redis::{Client, aio::ConnectionManager};

use crate::{FloodgateError, StoreError, StoredState};

/// Pool of Redis connections shared by every key a [`RedisCounterStore`] touches.
///
/// Each store call takes the next connection in turn, so concurrent limiter and breaker
/// round trips spread over the pool instead of queueing behind one multiplexed
/// connection. Clones share both the connections and the turn counter.
///
/// [`RedisCounterStore`]: crate::RedisCounterStore
#[derive(Debug, Clone)]
pub struct FloodgateRedisClient {
    connections: Arc<[ConnectionManager]>,
    next: Arc<AtomicUsize>,
}

impl FloodgateRedisClient {
    /// Open a single reconnecting connection to `client`.
    pub async fn connect(client: Client) -> Result<Self, FloodgateError> {
        Self::connect_pool(client, 1).await
    }

    /// Open `pool_size` reconnecting connections to `client`.
    ///
    /// # Errors
    ///
    /// [`FloodgateError::InvalidRedisPoolSize`] when `pool_size` is `0`, or the Redis error
    /// of the first connection that fails.
    pub async fn connect_pool(client: Client, pool_size: usize) -> Result<Self, FloodgateError> {
        if pool_size == 0 {
            return Err(FloodgateError::InvalidRedisPoolSize(
                "pool size must be at least 1".to_string(),
            ));
        }

        let mut connections = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            connections.push(client.get_connection_manager().await?);
        }

        Ok(Self::over(connections))
    }

    fn over(connections: Vec<ConnectionManager>) -> Self {
        Self {
            connections: Arc::from(connections),
            next: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Connection for the next store call.
    pub(crate) fn next_connection(&self) -> ConnectionManager {
        let turn = self.next.fetch_add(1, Ordering::Relaxed);
        self.connections[turn % self.connections.len()].clone()
    }
} // end impl FloodgateRedisClient

impl From<ConnectionManager> for FloodgateRedisClient {
    fn from(connection: ConnectionManager) -> Self {
        Self::over(vec![connection])
    }
}

/// A validated newtype for the Redis key prefix.
///
/// This is a string with the following constraints:
/// - Must not be empty
/// - Must not be longer than 255 bytes
/// - Must not contain colons
#[derive(Debug, Clone, PartialEq, PartialOrd, Hash, Eq)]
pub struct RedisKey(Arc<str>);

impl RedisKey {
    /// The prefix used when none is configured.
    pub fn default_prefix() -> Self {
        Self(Arc::from("floodgate"))
    }
}

impl Deref for RedisKey {
    type Target = Arc<str>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<String> for RedisKey {
    type Error = FloodgateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            Err(FloodgateError::InvalidRedisKey(
                "Redis key must not be empty".to_string(),
            ))
        } else if value.len() > 255 {
            Err(FloodgateError::InvalidRedisKey(
                "Redis key must not be longer than 255 characters".to_string(),
            ))
        } else if value.contains(':') {
            Err(FloodgateError::InvalidRedisKey(
                "Redis key must not contain colons".to_string(),
            ))
        } else {
            Ok(Self(Arc::from(value)))
        }
    }
}

/// Comma-separated wire form of a [`StoredState`].
///
/// `f64`'s `Display` is the shortest string that parses back to the same value, so a
/// value read, decoded and re-encoded compares equal to what Redis holds.
pub(crate) fn encode_state(state: &StoredState) -> String {
    state
        .iter()
        .map(|value| value.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

pub(crate) fn decode_state(raw: &str) -> Result<StoredState, StoreError> {
    if raw.is_empty() {
        return Ok(StoredState::default());
    }

    raw.split(',')
        .map(|part| {
            part.parse::<f64>()
                .map_err(|err| StoreError::Corrupt(format!("{raw:?}: {err}")))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(StoredState::new)
}
