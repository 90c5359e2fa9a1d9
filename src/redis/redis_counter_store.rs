use std::time::Duration;

use redis::{AsyncCommands, Script};

use crate::{
    CounterStore, StoreError, StoredState,
    redis::{FloodgateRedisClient, RedisKey, decode_state, encode_state},
};

const COMPARE_AND_SET_SCRIPT: &str = r#"
    local key = KEYS[1]

    local expect_present = ARGV[1] == "1"
    local expected = ARGV[2]
    local new_value = ARGV[3]
    local ttl_ms = tonumber(ARGV[4])

    local current = redis.call("GET", key)

    if expect_present then
        if current ~= expected then
            return 0
        end
    elseif current then
        return 0
    end

    redis.call("SET", key, new_value, "PX", ttl_ms)

    return 1
"#;

const INCREMENT_SCRIPT: &str = r#"
    local key = KEYS[1]

    local delta = tonumber(ARGV[1])
    local ttl_ms = tonumber(ARGV[2])

    local existed = redis.call("EXISTS", key)
    local value = redis.call("INCRBY", key, delta)

    if existed == 0 then
        redis.call("PEXPIRE", key, ttl_ms)
    end

    return value
"#;

/// Configuration for [`RedisCounterStore`].
///
/// # Examples
///
/// ```ignore
/// use floodgate::{FloodgateRedisClient, RedisCounterStoreOptions, RedisKey};
///
/// let client = redis::Client::open("redis://127.0.0.1:6379/")?;
///
/// let options = RedisCounterStoreOptions {
///     client: FloodgateRedisClient::connect_pool(client, 4).await?,
///     prefix: Some(RedisKey::try_from("myapp".to_string())?), // Keys: myapp:<key>
/// };
/// ```
#[derive(Clone, Debug)]
pub struct RedisCounterStoreOptions {
    /// Connections used by the store, picked round-robin.
    pub client: FloodgateRedisClient,

    /// Optional prefix for all Redis keys.
    ///
    /// If `None`, defaults to `"floodgate"`.
    pub prefix: Option<RedisKey>,
}

/// [`CounterStore`] shared across processes through Redis.
///
/// Compare-and-set and increment-with-ttl run as Lua scripts, so each is atomic within
/// Redis. Keys expire on their own; [`purge_expired`](CounterStore::purge_expired) is a
/// no-op.
///
/// Values are stored as comma-separated numbers under `<prefix>:<key>`.
pub struct RedisCounterStore {
    client: FloodgateRedisClient,
    prefix: RedisKey,
    compare_and_set_script: Script,
    increment_script: Script,
}

impl RedisCounterStore {
    /// Create a store from `options`.
    pub fn new(options: RedisCounterStoreOptions) -> Self {
        Self {
            client: options.client,
            prefix: options.prefix.unwrap_or_else(RedisKey::default_prefix),
            compare_and_set_script: Script::new(COMPARE_AND_SET_SCRIPT),
            increment_script: Script::new(INCREMENT_SCRIPT),
        }
    } // end constructor

    fn full_key(&self, key: &str) -> String {
        format!("{}:{}", *self.prefix, key)
    }
}

fn ttl_ms(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

impl CounterStore for RedisCounterStore {
    async fn get(&self, key: &str) -> Result<Option<StoredState>, StoreError> {
        let mut connection_manager = self.client.next_connection();

        let raw: Option<String> = connection_manager.get(self.full_key(key)).await?;

        raw.as_deref().map(decode_state).transpose()
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&StoredState>,
        new: StoredState,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut connection_manager = self.client.next_connection();

        let (expect_present, expected) = match expected {
            Some(expected) => ("1", encode_state(expected)),
            None => ("0", String::new()),
        };

        let swapped: i64 = self
            .compare_and_set_script
            .key(self.full_key(key))
            .arg(expect_present)
            .arg(expected)
            .arg(encode_state(&new))
            .arg(ttl_ms(ttl))
            .invoke_async(&mut connection_manager)
            .await?;

        Ok(swapped == 1)
    } // end method compare_and_set

    async fn increment(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64, StoreError> {
        let mut connection_manager = self.client.next_connection();

        let value: i64 = self
            .increment_script
            .key(self.full_key(key))
            .arg(delta)
            .arg(ttl_ms(ttl))
            .invoke_async(&mut connection_manager)
            .await?;

        Ok(value)
    } // end method increment

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut connection_manager = self.client.next_connection();
        let key = self.full_key(key);

        if ttl.is_zero() {
            let _: () = connection_manager.del(key).await?;
        } else {
            let ttl_ms = i64::try_from(ttl_ms(ttl)).unwrap_or(i64::MAX);
            let _: () = connection_manager.pexpire(key, ttl_ms).await?;
        }

        Ok(())
    }
}
