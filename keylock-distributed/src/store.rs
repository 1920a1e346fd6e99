//! Capabilities consumed from the backing stores

use crate::error::StoreError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Key-value store with atomic set-if-absent and compare-and-delete
#[async_trait]
pub trait CasStore: Send + Sync {
    /// Store `value` under `key` with `ttl` only if `key` is absent
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Delete `key` only if it currently holds `expected`, in one atomic step
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;
}

/// Session-scoped client of a hierarchical coordination service
#[async_trait]
pub trait CoordinationClient: Send + Sync {
    /// Create a persistent node, creating missing parents
    ///
    /// Fails with [`StoreError::NodeExists`] if the node is already there.
    async fn create_path(&self, path: &str) -> Result<(), StoreError>;

    async fn exists(&self, path: &str) -> Result<bool, StoreError>;

    /// A new advisory mutex guarding `path`, tied to this client's session
    ///
    /// Each call returns an independent contender.
    fn mutex(&self, path: &str) -> Arc<dyn AdvisoryMutex>;
}

/// Store-provided mutual exclusion recipe
///
/// Reentrant per instance: acquiring an instance that already holds the
/// lock succeeds immediately and needs a matching release.
#[async_trait]
pub trait AdvisoryMutex: Send + Sync {
    /// Wait up to `timeout`; `Ok(false)` when the wait ran out
    async fn acquire(&self, timeout: Duration) -> Result<bool, StoreError>;

    async fn release(&self) -> Result<(), StoreError>;

    fn is_acquired_in_this_process(&self) -> bool;
}
