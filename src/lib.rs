// keylock - keyed distributed locks
//
// Re-exports the lock core, its configuration and the Redis store, and wires
// them together from settings.

use std::sync::Arc;
use thiserror::Error;
use tracing::info;

pub use keylock_config as config;
pub use keylock_distributed as distributed;
#[cfg(feature = "log")]
pub use keylock_log as log;
pub use keylock_redis as redis;

pub use keylock_config::{LockSettings, RecipeLockSettings, SettingsLoader, TokenLockSettings};
pub use keylock_distributed::*;
pub use keylock_redis::RedisConfig;

/// Anything that can go wrong while assembling a coordinator
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] keylock_config::ConfigError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Build a coordinator for `settings`
///
/// Connects to Redis with `redis` only when the strategy uses the token
/// lock. `coordination` must be given when it uses the recipe lock. An
/// unknown strategy is not an error here: the coordinator is built and
/// refuses every operation.
pub async fn connect(
    settings: LockSettings,
    redis: RedisConfig,
    coordination: Option<Arc<dyn CoordinationClient>>,
) -> Result<LockCoordinator> {
    use keylock_config::Validate;

    settings.validate()?;

    let mut builder = LockCoordinator::builder(settings.clone());
    if let Ok(strategy) = settings.strategy.parse::<Strategy>() {
        if strategy.uses_token_lock() {
            info!(url = %redis.url, "Connecting token lock store");
            builder = builder.cas_store(Arc::new(RedisCasStore::connect(redis).await?));
        }
        if strategy.uses_recipe_lock()
            && let Some(client) = coordination
        {
            builder = builder.coordination_client(client);
        }
    }

    Ok(builder.build()?)
}

/// Install logging, load settings from the environment and connect, with
/// Redis settings from `REDIS_*` variables
pub async fn connect_from_env(coordination: Option<Arc<dyn CoordinationClient>>) -> Result<LockCoordinator> {
    #[cfg(feature = "log")]
    keylock_log::init();

    let settings = SettingsLoader::new().dotenv(None).load()?;
    connect(settings, RedisConfig::from_env().build(), coordination).await
}

pub mod prelude {
    pub use crate::{
        CancellationToken,
        LockBackend,
        LockCoordinator,
        LockHandle,
        LockInfo,
        LockLease,
        LockSettings,
        RecipeLock,
        Strategy,
        TokenLock,
    };
}
