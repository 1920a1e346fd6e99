//! # keylock Redis
//!
//! Pooled Redis access for the token lock backend.
//!
//! ## Features
//!
//! - **Connection Pooling**: connection management with bb8
//! - **Lock Commands**: `SET NX PX`, an atomic compare-and-delete script, `EXISTS`
//! - **Command Timeouts**: every command is bounded by `command_timeout`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use keylock_redis::{RedisConfig, RedisService};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RedisConfig::from_env().pool_size(4).build();
//!     let redis = RedisService::new(config).await?;
//!
//!     if redis.set_nx_px("lock:job-42", "token-a", Duration::from_secs(30)).await? {
//!         redis.compare_and_delete("lock:job-42", "token-a").await?;
//!     }
//!
//!     Ok(())
//! }
//! ```

mod config;
mod error;
mod pool;
mod service;

pub use config::{RedisConfig, RedisConfigBuilder};
pub use error::{RedisError, Result};
pub use pool::{RedisConnection, RedisPool, RedisPoolBuilder};
pub use service::{COMPARE_AND_DELETE_SCRIPT, PoolStats, RedisService};

// Re-export redis crate for convenience
pub use redis;
