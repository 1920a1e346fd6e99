//! Connection pool behind the token lock store.
//!
//! Every lock command checks a connection out for one round trip, so the
//! pool is sized by `pool_size` and checkouts are bounded by
//! `connection_timeout`.

use bb8::{Pool, PooledConnection};
use bb8_redis::RedisConnectionManager;
use redis::aio::MultiplexedConnection;
use std::ops::{Deref, DerefMut};
use tracing::info;

use crate::{RedisConfig, RedisError, Result};

/// Pool of multiplexed connections to the lock server.
pub type RedisPool = Pool<RedisConnectionManager>;

/// Connection checked out for a single lock command.
pub struct RedisConnection<'a> {
    conn: PooledConnection<'a, RedisConnectionManager>,
}

impl<'a> RedisConnection<'a> {
    pub fn new(conn: PooledConnection<'a, RedisConnectionManager>) -> Self {
        Self { conn }
    }
}

impl Deref for RedisConnection<'_> {
    type Target = MultiplexedConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for RedisConnection<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

/// Opens the pool used by the token lock store.
pub struct RedisPoolBuilder {
    config: RedisConfig,
}

impl RedisPoolBuilder {
    pub fn new(config: RedisConfig) -> Self {
        Self { config }
    }

    /// Open the pool and make sure the lock server answers.
    ///
    /// A server that cannot be reached fails here, before any lock is
    /// attempted against it.
    pub async fn build(self) -> Result<RedisPool> {
        let manager = RedisConnectionManager::new(self.config.connection_url())
            .map_err(|e| RedisError::Config(e.to_string()))?;

        let pool = Pool::builder()
            .max_size(self.config.pool_size)
            .min_idle(self.config.min_idle)
            .connection_timeout(self.config.connection_timeout)
            .build(manager)
            .await
            .map_err(|e| RedisError::Connection(e.to_string()))?;

        ping(&pool).await?;

        info!(
            pool_size = self.config.pool_size,
            database = self.config.database.unwrap_or(0),
            "Lock store connection pool ready"
        );

        Ok(pool)
    }
}

/// Round trip on one pooled connection, returned before the pool is handed out
async fn ping(pool: &RedisPool) -> Result<()> {
    let mut conn = pool.get().await?;
    let _: String = redis::cmd("PING")
        .query_async(&mut *conn)
        .await
        .map_err(|e| RedisError::Connection(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_malformed_url_is_config_error() {
        let result = RedisPoolBuilder::new(RedisConfig::new("not a redis url")).build().await;
        assert!(matches!(result, Err(RedisError::Config(_))));
    }
}
