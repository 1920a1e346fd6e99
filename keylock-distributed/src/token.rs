//! Token lock over a CAS+TTL store
//!
//! Every acquisition mints a fresh token and stores it with
//! set-if-absent-with-expiry. Only the holder of the token can delete the
//! entry; an entry whose holder disappears expires on its own.

use crate::backend::{LockBackend, check_handle, check_key};
use crate::error::LockError;
use crate::handle::{LockHandle, LockToken};
use crate::retry::{RetryLoop, Step};
use crate::store::CasStore;
use async_trait::async_trait;
use keylock_config::TokenLockSettings;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// CAS+TTL lock backend
pub struct TokenLock {
    store: Arc<dyn CasStore>,
    settings: TokenLockSettings,
}

impl TokenLock {
    pub const NAME: &'static str = "token";

    /// Create a token lock over `store`
    ///
    /// # Examples
    ///
    /// ```rust
    /// use keylock_config::TokenLockSettings;
    /// use keylock_distributed::{InMemoryCasStore, TokenLock};
    /// use std::sync::Arc;
    ///
    /// let lock = TokenLock::new(Arc::new(InMemoryCasStore::new()), TokenLockSettings::default());
    /// assert_eq!(lock.store_key("job-42"), "lock:job-42");
    /// ```
    pub fn new(store: Arc<dyn CasStore>, settings: TokenLockSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &TokenLockSettings {
        &self.settings
    }

    /// Key used in the store for `key`
    pub fn store_key(&self, key: &str) -> String {
        format!("{}{}", self.settings.key_prefix, key)
    }

    async fn try_acquire(
        &self,
        key: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<LockHandle, LockError> {
        check_key(key)?;

        let store_key = self.store_key(key);
        let token = LockToken::generate();
        let mut retry = RetryLoop::new(
            timeout,
            self.settings.retry_times,
            self.settings.retry_interval(),
        );

        loop {
            match retry.next_step() {
                Step::Attempt => {
                    if cancel.is_cancelled() {
                        return Err(LockError::Cancelled(store_key));
                    }

                    // The entry lives exactly as long as the caller was willing to wait
                    if self.store.set_if_absent(&store_key, token.as_str(), timeout).await? {
                        debug!(key = %store_key, attempts = retry.attempts(), "Acquired token lock");
                        return Ok(LockHandle::new(key, token, Self::NAME));
                    }

                    retry.contended();
                }
                Step::Wait(delay) => {
                    debug!(
                        key = %store_key,
                        retry = retry.retries(),
                        max_retries = self.settings.retry_times,
                        "Waiting for token lock"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(LockError::Cancelled(store_key)),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Step::TimedOut => return Err(LockError::Timeout(store_key)),
                Step::Exhausted => return Err(LockError::Contended(store_key)),
            }
        }
    }
}

#[async_trait]
impl LockBackend for TokenLock {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn default_timeout(&self) -> Duration {
        self.settings.ttl()
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
                error!(key, error = %e, "Error acquiring token lock");
                None
            }
            Err(e) => {
                debug!(key, reason = %e, "Token lock not acquired");
                None
            }
        }
    }

    async fn release(&self, handle: &mut LockHandle) -> bool {
        if let Err(e) = check_handle(handle, Self::NAME) {
            warn!(key = handle.key(), reason = %e, "Cannot release token lock, no token held");
            return false;
        }
        let Some(token) = handle.token().cloned() else {
            return false;
        };

        let store_key = self.store_key(handle.key());
        match self.store.compare_and_delete(&store_key, token.as_str()).await {
            Ok(true) => {
                handle.clear();
                debug!(key = %store_key, "Released token lock");
                true
            }
            Ok(false) => {
                warn!(key = %store_key, "Failed to release token lock (expired or taken over)");
                false
            }
            Err(e) => {
                error!(key = %store_key, error = %e, "Error releasing token lock");
                false
            }
        }
    }

    async fn is_locked(&self, key: &str) -> bool {
        let store_key = self.store_key(key);
        match self.store.exists(&store_key).await {
            Ok(exists) => exists,
            Err(e) => {
                error!(key = %store_key, error = %e, "Error checking token lock");
                false
            }
        }
    }
}
