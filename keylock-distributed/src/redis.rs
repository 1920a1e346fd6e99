//! Redis implementation of [`CasStore`]

use crate::error::StoreError;
use crate::store::CasStore;
use async_trait::async_trait;
use keylock_redis::{RedisConfig, RedisService};
use std::sync::Arc;
use std::time::Duration;

/// CAS store over a pooled Redis connection
///
/// Acquisition is `SET NX PX`; release runs the compare-and-delete script.
#[derive(Clone)]
pub struct RedisCasStore {
    redis: Arc<RedisService>,
}

impl RedisCasStore {
    pub fn new(redis: Arc<RedisService>) -> Self {
        Self { redis }
    }

    /// Connect with `config` and build the store
    pub async fn connect(config: RedisConfig) -> Result<Self, StoreError> {
        let redis = RedisService::new(config).await?;
        Ok(Self::new(Arc::new(redis)))
    }

    pub fn service(&self) -> &RedisService {
        &self.redis
    }
}

#[async_trait]
impl CasStore for RedisCasStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        Ok(self.redis.set_nx_px(key, value, ttl).await?)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        Ok(self.redis.compare_and_delete(key, expected).await?)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.redis.exists(key).await?)
    }
}
