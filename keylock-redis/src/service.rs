//! Redis service exposing the commands the token lock relies on.

use redis::AsyncCommands;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::{
    RedisConfig, RedisError, Result,
    pool::{RedisConnection, RedisPool, RedisPoolBuilder},
};

/// Deletes `KEYS[1]` only while it still holds `ARGV[1]`.
///
/// Runs server-side so an entry that expires and is re-acquired by another
/// holder between the read and the delete is never removed.
pub const COMPARE_AND_DELETE_SCRIPT: &str = r#"
    if redis.call("get", KEYS[1]) == ARGV[1] then
        return redis.call("del", KEYS[1])
    else
        return 0
    end
"#;

/// Redis service providing the connection pool and lock commands.
pub struct RedisService {
    config: RedisConfig,
    pool: RedisPool,
    compare_and_delete: redis::Script,
}

impl RedisService {
    /// Connect and create the pool.
    pub async fn new(config: RedisConfig) -> Result<Self> {
        let pool = RedisPoolBuilder::new(config.clone()).build().await?;
        Ok(Self::from_pool(config, pool))
    }

    /// Create from an existing pool.
    pub fn from_pool(config: RedisConfig, pool: RedisPool) -> Self {
        Self {
            config,
            pool,
            compare_and_delete: redis::Script::new(COMPARE_AND_DELETE_SCRIPT),
        }
    }

    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    /// Get a connection from the pool.
    pub async fn get(&self) -> Result<RedisConnection<'_>> {
        let conn = self.pool.get().await?;
        Ok(RedisConnection::new(conn))
    }

    /// Bound a command by the configured command timeout.
    async fn timed<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.config.command_timeout, fut)
            .await
            .map_err(|_| RedisError::Timeout)?
    }

    /// `SET key value NX PX ttl`: store `value` only if `key` is absent.
    ///
    /// Returns `true` when the value was stored. A TTL below one
    /// millisecond is rounded up, since Redis rejects `PX 0`.
    pub async fn set_nx_px(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let ttl_ms = ttl.as_millis().clamp(1, u64::MAX as u128) as u64;

        self.timed(async {
            let mut conn = self.get().await?;
            let reply: Option<String> = redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("NX")
                .arg("PX")
                .arg(ttl_ms)
                .query_async(&mut *conn)
                .await?;
            Ok(reply.is_some())
        })
        .await
    }

    /// Atomically delete `key` if and only if it still holds `expected`.
    pub async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool> {
        self.timed(async {
            let mut conn = self.get().await?;
            let deleted: i64 = self
                .compare_and_delete
                .key(key)
                .arg(expected)
                .invoke_async(&mut *conn)
                .await?;
            debug!(key, deleted, "compare-and-delete");
            Ok(deleted == 1)
        })
        .await
    }

    /// Check if a key exists.
    pub async fn exists(&self, key: &str) -> Result<bool> {
        self.timed(async {
            let mut conn = self.get().await?;
            let exists: bool = conn.exists(key).await?;
            Ok(exists)
        })
        .await
    }

    /// Current value of a key.
    pub async fn get_value(&self, key: &str) -> Result<Option<String>> {
        self.timed(async {
            let mut conn = self.get().await?;
            let value: Option<String> = conn.get(key).await?;
            Ok(value)
        })
        .await
    }

    /// Check if the connection is healthy.
    pub async fn health_check(&self) -> Result<()> {
        self.timed(async {
            let mut conn = self.get().await?;
            let _: String = redis::cmd("PING")
                .query_async(&mut *conn)
                .await
                .map_err(|e| RedisError::Connection(e.to_string()))?;
            Ok(())
        })
        .await
    }

    /// Get pool statistics.
    pub fn pool_stats(&self) -> PoolStats {
        let state = self.pool.state();
        PoolStats {
            connections: state.connections,
            idle_connections: state.idle_connections,
        }
    }
}

/// Connection pool statistics.
#[derive(Debug, Clone)]
pub struct PoolStats {
    /// Total connections.
    pub connections: u32,
    /// Idle connections.
    pub idle_connections: u32,
}
