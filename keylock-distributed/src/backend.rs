//! The contract every lock backend implements

use crate::error::LockError;
use crate::handle::LockHandle;
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A store-backed mutual-exclusion protocol
///
/// Failures of any kind (contention, timeout, store errors, cancellation)
/// are logged by the backend and reported as `None` / `false`.
#[async_trait]
pub trait LockBackend: Send + Sync {
    /// Short name used in logs, handles and `LockInfo`
    fn name(&self) -> &'static str;

    /// Wait used when the caller does not give one
    fn default_timeout(&self) -> Duration;

    /// Try to acquire `key`, waiting at most `timeout`
    async fn acquire(
        &self,
        key: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Option<LockHandle>;

    /// Release the lock recorded in `handle`
    ///
    /// The handle's token is cleared only when the release is confirmed.
    async fn release(&self, handle: &mut LockHandle) -> bool;

    /// Best-effort status of `key`
    async fn is_locked(&self, key: &str) -> bool;
}

pub(crate) fn check_key(key: &str) -> Result<(), LockError> {
    if key.trim().is_empty() {
        return Err(LockError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Local ownership check done before any store round trip
pub(crate) fn check_handle(handle: &LockHandle, backend: &'static str) -> Result<(), LockError> {
    if handle.backend() != backend || !handle.is_held() {
        return Err(LockError::NotHeld(handle.key().to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::LockToken;

    #[test]
    fn test_check_key() {
        assert!(check_key("job-42").is_ok());
        assert!(matches!(check_key(""), Err(LockError::InvalidKey(_))));
        assert!(matches!(check_key("  "), Err(LockError::InvalidKey(_))));
    }

    #[test]
    fn test_check_handle() {
        let mut handle = LockHandle::new("a", LockToken::generate(), "token");
        assert!(check_handle(&handle, "token").is_ok());
        assert!(check_handle(&handle, "recipe").is_err());

        handle.clear();
        assert!(matches!(check_handle(&handle, "token"), Err(LockError::NotHeld(_))));
    }
}
