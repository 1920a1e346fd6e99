//! Lock settings consumed by the lock core.

use crate::{ConfigValidator, Result, Validate};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level lock settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    /// Which backends to drive: `token`, `recipe` or `both`.
    ///
    /// Kept as a string; an unknown value is reported by the coordinator,
    /// which then refuses every operation.
    pub strategy: String,
    /// Token (CAS+TTL) backend settings.
    pub token: TokenLockSettings,
    /// Recipe (advisory-lock) backend settings.
    pub recipe: RecipeLockSettings,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            strategy: "both".to_string(),
            token: TokenLockSettings::default(),
            recipe: RecipeLockSettings::default(),
        }
    }
}

impl Validate for LockSettings {
    fn validate(&self) -> Result<()> {
        ConfigValidator::not_empty(&self.strategy, "strategy")?;
        self.token.validate()?;
        self.recipe.validate()
    }
}

/// Settings for the token backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenLockSettings {
    /// Default wait, also used as entry TTL, in milliseconds.
    pub ttl_ms: u64,
    /// Retries after the first failed attempt.
    pub retry_times: u32,
    /// Pause between attempts, in milliseconds.
    pub retry_interval_ms: u64,
    /// Prepended to every key in the store.
    pub key_prefix: String,
}

impl TokenLockSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

impl Default for TokenLockSettings {
    fn default() -> Self {
        Self {
            ttl_ms: 30_000,
            retry_times: 3,
            retry_interval_ms: 100,
            key_prefix: "lock:".to_string(),
        }
    }
}

impl Validate for TokenLockSettings {
    fn validate(&self) -> Result<()> {
        ConfigValidator::positive(self.ttl_ms, "token.ttl_ms")?;
        ConfigValidator::positive(self.retry_interval_ms, "token.retry_interval_ms")?;
        ConfigValidator::in_range(self.retry_times, 0, 10_000, "token.retry_times")?;
        ConfigValidator::not_empty(&self.key_prefix, "token.key_prefix")
    }
}

/// Settings for the recipe backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecipeLockSettings {
    /// Parent node of every lock path.
    pub base_path: String,
    /// Default wait, in milliseconds.
    pub wait_time_ms: u64,
}

impl RecipeLockSettings {
    pub fn wait_time(&self) -> Duration {
        Duration::from_millis(self.wait_time_ms)
    }

    /// Node path guarding `key`.
    pub fn lock_path(&self, key: &str) -> String {
        format!("{}/{}", self.base_path, key)
    }
}

impl Default for RecipeLockSettings {
    fn default() -> Self {
        Self {
            base_path: "/locks".to_string(),
            wait_time_ms: 30_000,
        }
    }
}

impl Validate for RecipeLockSettings {
    fn validate(&self) -> Result<()> {
        ConfigValidator::is_node_path(&self.base_path, "recipe.base_path")?;
        ConfigValidator::positive(self.wait_time_ms, "recipe.wait_time_ms")
    }
}
