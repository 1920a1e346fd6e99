//! Keyed distributed locks
//!
//! Mutual exclusion identified by a string key, backed by one or two
//! external stores and driven through a single coordinator.
//!
//! ## Backends
//!
//! - **[`TokenLock`]** - a CAS+TTL store (Redis). Each acquisition mints a
//!   fresh token stored with set-if-absent-with-expiry; release deletes the
//!   entry only if it still holds that token.
//! - **[`RecipeLock`]** - a hierarchical coordination service. Delegates to the
//!   service's advisory mutex; session loss frees the lock.
//!
//! ## Strategies
//!
//! [`LockCoordinator`] drives `token`, `recipe` or `both`. Under `both` the
//! token lock is taken first, a refusal stops the acquisition, and anything
//! already taken is released before reporting failure.
//!
//! ## Quick Start
//!
//! ```rust
//! use keylock_config::LockSettings;
//! use keylock_distributed::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), LockError> {
//! let service = InMemoryCoordination::new();
//! let coordinator = LockCoordinator::builder(LockSettings::default())
//!     .cas_store(Arc::new(InMemoryCasStore::new()))
//!     .coordination_client(Arc::new(service.connect()))
//!     .build()?;
//!
//! if let Some(mut lease) = coordinator.acquire_lock("job-42", Duration::from_secs(5)).await {
//!     // critical section
//!     assert!(coordinator.release_lock(&mut lease).await);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Ownership lives in the returned [`LockLease`] / [`LockHandle`]; nothing
//! about an acquisition is kept in shared or thread-bound state.

pub mod backend;
pub mod coordinator;
pub mod error;
pub mod handle;
pub mod memory;
pub mod recipe;
pub mod redis;
pub mod retry;
pub mod store;
pub mod token;

pub use backend::LockBackend;
pub use coordinator::{LockCoordinator, LockCoordinatorBuilder, LockInfo, LockLease, Strategy};
pub use error::{LockError, StoreError};
pub use handle::{LockHandle, LockToken};
pub use memory::{InMemoryCasStore, InMemoryCoordination, InMemorySession};
pub use recipe::RecipeLock;
pub use redis::RedisCasStore;
pub use retry::{RetryLoop, Step};
pub use store::{AdvisoryMutex, CasStore, CoordinationClient};
pub use token::TokenLock;

pub use tokio_util::sync::CancellationToken;
