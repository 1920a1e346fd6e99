//! Recipe lock over a hierarchical coordination service
//!
//! Delegates mutual exclusion to the service's advisory mutex and keeps the
//! live mutex of each held key in a per-process map. Crash recovery comes
//! from the service: a dead process's session and its ephemeral nodes go
//! away.

use crate::backend::{LockBackend, check_handle, check_key};
use crate::error::{LockError, StoreError};
use crate::handle::{LockHandle, LockToken};
use crate::store::{AdvisoryMutex, CoordinationClient};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use keylock_config::RecipeLockSettings;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Keys become path segments under the base path; `/` may nest them but
/// must not produce an empty segment
fn check_path_key(key: &str) -> Result<(), LockError> {
    check_key(key)?;
    if key.starts_with('/') || key.ends_with('/') || key.contains("//") {
        return Err(LockError::InvalidKey(key.to_string()));
    }
    Ok(())
}

struct HeldLock {
    token: LockToken,
    mutex: Arc<dyn AdvisoryMutex>,
}

/// Advisory-mutex lock backend
pub struct RecipeLock {
    client: Arc<dyn CoordinationClient>,
    settings: RecipeLockSettings,
    held: DashMap<String, HeldLock>,
}

impl RecipeLock {
    pub const NAME: &'static str = "recipe";

    pub fn new(client: Arc<dyn CoordinationClient>, settings: RecipeLockSettings) -> Self {
        Self {
            client,
            settings,
            held: DashMap::new(),
        }
    }

    pub fn settings(&self) -> &RecipeLockSettings {
        &self.settings
    }

    /// Keys this process currently holds
    pub fn held_count(&self) -> usize {
        self.held.len()
    }

    async fn ensure_base_path(&self) -> Result<(), StoreError> {
        match self.client.create_path(&self.settings.base_path).await {
            Ok(()) | Err(StoreError::NodeExists(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn try_acquire(
        &self,
        key: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<LockHandle, LockError> {
        check_path_key(key)?;
        let path = self.settings.lock_path(key);

        self.ensure_base_path().await?;

        let mutex = self.client.mutex(&path);
        let acquired = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LockError::Cancelled(path)),
            acquired = mutex.acquire(timeout) => acquired?,
        };
        if !acquired {
            return Err(LockError::Timeout(path));
        }

        let token = LockToken::generate();
        let recorded = match self.held.entry(key.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(HeldLock {
                    token: token.clone(),
                    mutex: mutex.clone(),
                });
                true
            }
            // Left behind by a release whose store call failed after the
            // service had already let go of the mutex
            Entry::Occupied(mut slot) if !slot.get().mutex.is_acquired_in_this_process() => {
                slot.insert(HeldLock {
                    token: token.clone(),
                    mutex: mutex.clone(),
                });
                true
            }
            Entry::Occupied(_) => false,
        };

        if !recorded {
            if let Err(e) = mutex.release().await {
                warn!(path = %path, error = %e, "Failed to undo duplicate recipe lock");
            }
            return Err(LockError::Contended(path));
        }

        debug!(path = %path, "Acquired recipe lock");
        Ok(LockHandle::new(key, token, Self::NAME))
    }
}

#[async_trait]
impl LockBackend for RecipeLock {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn default_timeout(&self) -> Duration {
        self.settings.wait_time()
    }

    async fn acquire(
        &self,
        key: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Option<LockHandle> {
        match self.try_acquire(key, timeout, cancel).await {
            Ok(handle) => Some(handle),
            Err(LockError::Store(e)) => {
                error!(key, error = %e, "Error acquiring recipe lock");
                None
            }
            Err(e) => {
                debug!(key, reason = %e, "Recipe lock not acquired");
                None
            }
        }
    }

    async fn release(&self, handle: &mut LockHandle) -> bool {
        if let Err(e) = check_handle(handle, Self::NAME) {
            warn!(key = handle.key(), reason = %e, "Cannot release recipe lock, no token held");
            return false;
        }
        let Some(token) = handle.token().cloned() else {
            return false;
        };

        let mutex = match self.held.get(handle.key()) {
            Some(record) if record.token == token => record.mutex.clone(),
            Some(_) => {
                warn!(key = handle.key(), "Cannot release recipe lock, held by another acquisition");
                return false;
            }
            None => {
                warn!(key = handle.key(), "Cannot release recipe lock, not held by this process");
                return false;
            }
        };

        match mutex.release().await {
            Ok(()) => {
                self.held.remove_if(handle.key(), |_, record| record.token == token);
                debug!(key = handle.key(), "Released recipe lock");
                handle.clear();
                true
            }
            Err(e) => {
                error!(key = handle.key(), error = %e, "Error releasing recipe lock");
                false
            }
        }
    }

    async fn is_locked(&self, key: &str) -> bool {
        if !self.held.contains_key(key) {
            return false;
        }

        let path = self.settings.lock_path(key);
        match self.client.exists(&path).await {
            Ok(exists) => exists,
            Err(e) => {
                error!(path = %path, error = %e, "Error checking recipe lock");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryCoordination;

    fn recipe_lock(service: &InMemoryCoordination) -> RecipeLock {
        RecipeLock::new(Arc::new(service.connect()), RecipeLockSettings::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_and_release() {
        let service = InMemoryCoordination::new();
        let lock = recipe_lock(&service);
        let cancel = CancellationToken::new();

        let mut handle = lock.acquire("job-42", Duration::from_secs(1), &cancel).await.unwrap();
        assert_eq!(handle.backend(), "recipe");
        assert!(service.node_exists("/locks"));
        assert_eq!(service.children("/locks/job-42").len(), 1);
        assert!(lock.is_locked("job-42").await);
        assert_eq!(lock.held_count(), 1);

        assert!(lock.release(&mut handle).await);
        assert!(!handle.is_held());
        assert_eq!(lock.held_count(), 0);
        assert!(service.children("/locks/job-42").is_empty());
        assert!(!lock.is_locked("job-42").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nested_key_then_parent_key() {
        let service = InMemoryCoordination::new();
        let lock = recipe_lock(&service);
        let cancel = CancellationToken::new();

        let mut nested = lock.acquire("orders/42", Duration::from_secs(1), &cancel).await.unwrap();
        assert!(lock.release(&mut nested).await);

        let mut parent = lock.acquire("orders", Duration::from_secs(1), &cancel).await.unwrap();
        assert!(lock.is_locked("orders").await);
        assert!(!lock.is_locked("orders/42").await);
        assert!(lock.release(&mut parent).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_with_empty_segments_rejected() {
        let service = InMemoryCoordination::new();
        let lock = recipe_lock(&service);
        let cancel = CancellationToken::new();

        for key in ["job/", "/job", "a//b", "/"] {
            assert!(matches!(check_path_key(key), Err(LockError::InvalidKey(_))));
            assert!(lock.acquire(key, Duration::from_secs(1), &cancel).await.is_none());
        }
        // rejected before the base path is created
        assert!(!service.node_exists("/locks"));
        assert_eq!(lock.held_count(), 0);
        assert!(check_path_key("orders/42").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_base_path_already_present() {
        let service = InMemoryCoordination::new();
        let setup = service.connect();
        setup.create_path("/locks").await.unwrap();

        let lock = recipe_lock(&service);
        assert!(lock.acquire("job", Duration::from_secs(1), &CancellationToken::new()).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_attempt_keeps_holder_record() {
        let service = InMemoryCoordination::new();
        let lock = recipe_lock(&service);
        let cancel = CancellationToken::new();

        let mut first = lock.acquire("job", Duration::from_secs(1), &cancel).await.unwrap();
        assert!(lock.acquire("job", Duration::from_millis(100), &cancel).await.is_none());

        assert_eq!(lock.held_count(), 1);
        assert!(lock.is_locked("job").await);
        assert!(lock.release(&mut first).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_process_times_out() {
        let service = InMemoryCoordination::new();
        let ours = recipe_lock(&service);
        let theirs = recipe_lock(&service);
        let cancel = CancellationToken::new();

        let mut handle = ours.acquire("job", Duration::from_secs(1), &cancel).await.unwrap();

        let start = tokio::time::Instant::now();
        assert!(theirs.acquire("job", Duration::from_millis(300), &cancel).await.is_none());
        assert_eq!(start.elapsed(), Duration::from_millis(300));

        // only our own locks are visible
        assert!(!theirs.is_locked("job").await);

        assert!(ours.release(&mut handle).await);
        assert!(theirs.acquire("job", Duration::from_millis(300), &cancel).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_loss_releases_lock() {
        let service = InMemoryCoordination::new();
        let crashed = service.connect();
        let survivor = recipe_lock(&service);
        let cancel = CancellationToken::new();

        let crashed_lock = RecipeLock::new(Arc::new(crashed), RecipeLockSettings::default());
        assert!(crashed_lock.acquire("job", Duration::from_secs(1), &cancel).await.is_some());
        drop(crashed_lock);

        assert!(survivor.acquire("job", Duration::from_millis(10), &cancel).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_with_foreign_token_rejected() {
        let service = InMemoryCoordination::new();
        let lock = recipe_lock(&service);

        let mut handle = lock
            .acquire("job", Duration::from_secs(1), &CancellationToken::new())
            .await
            .unwrap();

        let mut forged = LockHandle::new("job", LockToken::generate(), RecipeLock::NAME);
        assert!(!lock.release(&mut forged).await);
        assert!(lock.is_locked("job").await);

        let mut unknown = LockHandle::new("other", LockToken::generate(), RecipeLock::NAME);
        assert!(!lock.release(&mut unknown).await);

        assert!(lock.release(&mut handle).await);
        assert!(!lock.release(&mut handle).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_errors_read_as_failure() {
        let service = InMemoryCoordination::new();
        let lock = recipe_lock(&service);
        let cancel = CancellationToken::new();

        let mut handle = lock.acquire("job", Duration::from_secs(1), &cancel).await.unwrap();

        service.set_available(false);
        assert!(lock.acquire("other", Duration::from_secs(1), &cancel).await.is_none());
        assert!(!lock.is_locked("job").await);
        assert!(!lock.release(&mut handle).await);
        assert_eq!(lock.held_count(), 1);

        service.set_available(true);
        assert!(lock.release(&mut handle).await);
        assert_eq!(lock.held_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_withdraws_waiter() {
        let service = InMemoryCoordination::new();
        let holder = recipe_lock(&service);
        let waiter = Arc::new(recipe_lock(&service));
        let cancel = CancellationToken::new();

        let _held = holder.acquire("job", Duration::from_secs(1), &cancel).await.unwrap();

        let task = {
            let waiter = waiter.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { waiter.acquire("job", Duration::from_secs(60), &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(service.children("/locks/job").len(), 2);

        cancel.cancel();
        assert!(task.await.unwrap().is_none());
        assert_eq!(service.children("/locks/job").len(), 1);
        assert_eq!(waiter.held_count(), 0);
    }
}
