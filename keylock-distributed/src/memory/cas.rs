use crate::error::StoreError;
use crate::store::CasStore;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-memory CAS+TTL store
pub struct InMemoryCasStore {
    entries: Mutex<HashMap<String, Entry>>,
    available: AtomicBool,
    set_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl InMemoryCasStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            set_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
        }
    }

    /// Simulate the store going away (`false`) or coming back (`true`)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Live value of `key`
    pub fn value(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.entries
            .lock()
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.value.clone())
    }

    /// Remaining TTL of `key`
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .lock()
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.expires_at - now)
    }

    /// Number of `set_if_absent` calls that reached the store
    pub fn set_calls(&self) -> usize {
        self.set_calls.load(Ordering::SeqCst)
    }

    /// Number of `compare_and_delete` calls that reached the store
    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory CAS store offline".to_string()))
        }
    }
}

impl Default for InMemoryCasStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CasStore for InMemoryCasStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;

        let now = Instant::now();
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(|entry| entry.expires_at > now) {
            return Ok(false);
        }

        let ttl = ttl.max(Duration::from_millis(1));
        let expires_at = now
            .checked_add(ttl)
            .unwrap_or_else(|| now + Duration::from_secs(86400 * 365 * 30));
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(true)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;

        let now = Instant::now();
        let mut entries = self.entries.lock();
        let matches = entries
            .get(key)
            .is_some_and(|entry| entry.expires_at > now && entry.value == expected);
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.check()?;
        Ok(self.value(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_set_if_absent() {
        let store = InMemoryCasStore::new();

        assert!(store.set_if_absent("k", "a", Duration::from_secs(1)).await.unwrap());
        assert!(!store.set_if_absent("k", "b", Duration::from_secs(1)).await.unwrap());
        assert_eq!(store.value("k").as_deref(), Some("a"));
        assert_eq!(store.set_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let store = InMemoryCasStore::new();

        store.set_if_absent("k", "a", Duration::from_millis(50)).await.unwrap();
        assert_eq!(store.ttl("k"), Some(Duration::from_millis(50)));

        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(!store.exists("k").await.unwrap());
        assert!(store.set_if_absent("k", "b", Duration::from_millis(50)).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_compare_and_delete() {
        let store = InMemoryCasStore::new();
        store.set_if_absent("k", "a", Duration::from_secs(1)).await.unwrap();

        assert!(!store.compare_and_delete("k", "b").await.unwrap());
        assert!(store.exists("k").await.unwrap());
        assert!(store.compare_and_delete("k", "a").await.unwrap());
        assert!(!store.exists("k").await.unwrap());
        assert!(!store.compare_and_delete("k", "a").await.unwrap());
    }

    #[tokio::test]
    async fn test_offline_store_errors() {
        let store = InMemoryCasStore::new();
        store.set_available(false);

        assert!(matches!(
            store.set_if_absent("k", "a", Duration::from_secs(1)).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.exists("k").await.is_err());
        assert_eq!(store.set_calls(), 1);
    }
}
