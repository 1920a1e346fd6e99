//! Strategy-driven composition of lock backends
//!
//! The coordinator drives an ordered list of backends. With several backends
//! an acquisition succeeds only if every backend grants the lock, stops at the
//! first refusal, and hands back whatever it already took.

use crate::backend::LockBackend;
use crate::error::LockError;
use crate::handle::LockHandle;
use crate::recipe::RecipeLock;
use crate::store::{CasStore, CoordinationClient};
use crate::token::TokenLock;
use keylock_config::LockSettings;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Which backends a coordinator drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Token lock only
    Token,
    /// Recipe lock only
    Recipe,
    /// Token lock, then recipe lock
    Both,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Token => "token",
            Strategy::Recipe => "recipe",
            Strategy::Both => "both",
        }
    }

    pub fn uses_token_lock(&self) -> bool {
        matches!(self, Strategy::Token | Strategy::Both)
    }

    pub fn uses_recipe_lock(&self) -> bool {
        matches!(self, Strategy::Recipe | Strategy::Both)
    }
}

impl FromStr for Strategy {
    type Err = LockError;

    /// Case-insensitive; also accepts the store names `redis` and `zookeeper`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "token" | "redis" => Ok(Strategy::Token),
            "recipe" | "zookeeper" => Ok(Strategy::Recipe),
            "both" => Ok(Strategy::Both),
            _ => Err(LockError::InvalidStrategy(s.to_string())),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a coordinator's configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockInfo {
    pub strategy: String,
    pub using_token_lock: bool,
    pub using_recipe_lock: bool,
}

/// A coordinator-level acquisition: one handle per backend, in backend order
#[derive(Debug)]
pub struct LockLease {
    key: String,
    handles: Vec<LockHandle>,
}

impl LockLease {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn handles(&self) -> &[LockHandle] {
        &self.handles
    }

    /// Handle issued by the named backend
    pub fn handle(&self, backend: &str) -> Option<&LockHandle> {
        self.handles.iter().find(|h| h.backend() == backend)
    }

    /// Whether any backend still holds the lock for this lease
    ///
    /// After a partially failed release this stays `true` until the
    /// remaining backends confirm.
    pub fn is_held(&self) -> bool {
        self.handles.iter().any(LockHandle::is_held)
    }
}

enum Mode {
    Active {
        strategy: String,
        backends: Vec<Arc<dyn LockBackend>>,
    },
    Misconfigured {
        strategy: String,
    },
}

/// Acquire/release/status front end over one or more backends
pub struct LockCoordinator {
    mode: Mode,
}

impl LockCoordinator {
    /// Create a coordinator for a named strategy
    ///
    /// An unrecognised `strategy` yields a coordinator on which every
    /// operation fails; the problem is logged here and on each call.
    pub fn new(
        strategy: &str,
        token_lock: Arc<dyn LockBackend>,
        recipe_lock: Arc<dyn LockBackend>,
    ) -> Self {
        match strategy.parse::<Strategy>() {
            Ok(parsed) => {
                let mut backends = Vec::with_capacity(2);
                if parsed.uses_token_lock() {
                    backends.push(token_lock);
                }
                if parsed.uses_recipe_lock() {
                    backends.push(recipe_lock);
                }
                Self::with_backends(strategy, backends)
            }
            Err(e) => Self::misconfigured(strategy, &e),
        }
    }

    /// Create a coordinator over an explicit backend order
    ///
    /// Acquisition visits `backends` front to back. An empty list is a
    /// configuration error.
    pub fn with_backends(strategy: impl Into<String>, backends: Vec<Arc<dyn LockBackend>>) -> Self {
        let strategy = strategy.into();
        if backends.is_empty() {
            let e = LockError::InvalidStrategy(format!("{strategy} (no backends)"));
            return Self::misconfigured(&strategy, &e);
        }

        info!(
            strategy = %strategy,
            backends = ?backends.iter().map(|b| b.name()).collect::<Vec<_>>(),
            "Lock coordinator ready"
        );
        Self {
            mode: Mode::Active { strategy, backends },
        }
    }

    fn misconfigured(strategy: &str, reason: &LockError) -> Self {
        error!(strategy, error = %reason, "Lock coordinator misconfigured, all lock operations will fail");
        Self {
            mode: Mode::Misconfigured {
                strategy: strategy.to_string(),
            },
        }
    }

    pub fn builder(settings: LockSettings) -> LockCoordinatorBuilder {
        LockCoordinatorBuilder::new(settings)
    }

    /// Whether the coordinator has a usable strategy
    pub fn is_configured(&self) -> bool {
        matches!(self.mode, Mode::Active { .. })
    }

    fn backends(&self, operation: &str) -> Option<&[Arc<dyn LockBackend>]> {
        match &self.mode {
            Mode::Active { backends, .. } => Some(backends.as_slice()),
            Mode::Misconfigured { strategy } => {
                error!(strategy = %strategy, operation, "Invalid lock strategy, refusing operation");
                None
            }
        }
    }

    /// Acquire `key` on every backend, waiting up to `timeout` on each
    pub async fn acquire_lock(&self, key: &str, timeout: Duration) -> Option<LockLease> {
        self.acquire(key, Some(timeout), &CancellationToken::new()).await
    }

    /// Like [`acquire_lock`](Self::acquire_lock), abandoned when `cancel` fires
    pub async fn acquire_lock_with_cancel(
        &self,
        key: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Option<LockLease> {
        self.acquire(key, Some(timeout), cancel).await
    }

    /// Acquire `key` using each backend's configured default wait
    pub async fn acquire_lock_default(&self, key: &str) -> Option<LockLease> {
        self.acquire(key, None, &CancellationToken::new()).await
    }

    async fn acquire(
        &self,
        key: &str,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Option<LockLease> {
        let backends = self.backends("acquire")?;
        let mut handles = Vec::with_capacity(backends.len());

        for backend in backends {
            let wait = timeout.unwrap_or_else(|| backend.default_timeout());
            match backend.acquire(key, wait, cancel).await {
                Some(handle) => handles.push(handle),
                None => {
                    debug!(key, backend = backend.name(), "Lock refused, undoing partial acquisition");
                    self.compensate(backends, handles).await;
                    return None;
                }
            }
        }

        debug!(key, "Acquired lock");
        Some(LockLease {
            key: key.to_string(),
            handles,
        })
    }

    /// Release what a failed acquisition already took, newest first
    async fn compensate(&self, backends: &[Arc<dyn LockBackend>], handles: Vec<LockHandle>) {
        for (backend, mut handle) in backends.iter().zip(handles).rev() {
            if !backend.release(&mut handle).await {
                warn!(
                    key = handle.key(),
                    backend = backend.name(),
                    "Failed to undo partial acquisition, lock left to expire"
                );
            }
        }
    }

    /// Release every still-held part of `lease`
    ///
    /// Each backend is attempted even if an earlier one fails. The result is
    /// `true` only if all of them confirmed; a `false` does not mean nothing
    /// was released, and calling again retries only the parts still held.
    pub async fn release_lock(&self, lease: &mut LockLease) -> bool {
        let Some(backends) = self.backends("release") else {
            return false;
        };

        let mut attempted = false;
        let mut released = true;
        for handle in lease.handles.iter_mut().filter(|h| h.is_held()) {
            attempted = true;
            let ok = match backends.iter().find(|b| b.name() == handle.backend()) {
                Some(backend) => backend.release(handle).await,
                None => {
                    warn!(key = handle.key(), backend = handle.backend(), "No such backend for lock handle");
                    false
                }
            };
            released &= ok;
        }

        if !attempted {
            warn!(key = %lease.key, "Lock lease holds nothing to release");
            return false;
        }
        if released {
            debug!(key = %lease.key, "Released lock");
        }
        released
    }

    /// Whether every backend reports `key` as locked
    pub async fn is_locked(&self, key: &str) -> bool {
        let Some(backends) = self.backends("is_locked") else {
            return false;
        };

        for backend in backends {
            if !backend.is_locked(key).await {
                return false;
            }
        }
        true
    }

    /// Configured strategy and enabled backends; touches no store
    pub fn info(&self) -> LockInfo {
        match &self.mode {
            Mode::Active { strategy, backends } => LockInfo {
                strategy: strategy.clone(),
                using_token_lock: backends.iter().any(|b| b.name() == TokenLock::NAME),
                using_recipe_lock: backends.iter().any(|b| b.name() == RecipeLock::NAME),
            },
            Mode::Misconfigured { strategy } => LockInfo {
                strategy: strategy.clone(),
                using_token_lock: false,
                using_recipe_lock: false,
            },
        }
    }
}

impl fmt::Debug for LockCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.mode {
            Mode::Active { strategy, backends } => f
                .debug_struct("LockCoordinator")
                .field("strategy", strategy)
                .field("backends", &backends.iter().map(|b| b.name()).collect::<Vec<_>>())
                .finish(),
            Mode::Misconfigured { strategy } => f
                .debug_struct("LockCoordinator")
                .field("strategy", strategy)
                .field("misconfigured", &true)
                .finish(),
        }
    }
}

/// Assembles a [`LockCoordinator`] from [`LockSettings`] and store clients
///
/// Only the stores the strategy needs must be supplied.
pub struct LockCoordinatorBuilder {
    settings: LockSettings,
    cas_store: Option<Arc<dyn CasStore>>,
    coordination_client: Option<Arc<dyn CoordinationClient>>,
}

impl LockCoordinatorBuilder {
    pub fn new(settings: LockSettings) -> Self {
        Self {
            settings,
            cas_store: None,
            coordination_client: None,
        }
    }

    /// Store used by the token backend
    pub fn cas_store(mut self, store: Arc<dyn CasStore>) -> Self {
        self.cas_store = Some(store);
        self
    }

    /// Client used by the recipe backend
    pub fn coordination_client(mut self, client: Arc<dyn CoordinationClient>) -> Self {
        self.coordination_client = Some(client);
        self
    }

    /// Build the coordinator
    ///
    /// An unknown strategy still builds, as a coordinator that refuses every
    /// operation. A known strategy whose store was not supplied is an error.
    pub fn build(self) -> Result<LockCoordinator, LockError> {
        let strategy = match self.settings.strategy.parse::<Strategy>() {
            Ok(strategy) => strategy,
            Err(e) => return Ok(LockCoordinator::misconfigured(&self.settings.strategy, &e)),
        };

        let mut backends: Vec<Arc<dyn LockBackend>> = Vec::with_capacity(2);
        if strategy.uses_token_lock() {
            let store = self.cas_store.ok_or(LockError::MissingStore(TokenLock::NAME))?;
            backends.push(Arc::new(TokenLock::new(store, self.settings.token)));
        }
        if strategy.uses_recipe_lock() {
            let client = self
                .coordination_client
                .ok_or(LockError::MissingStore(RecipeLock::NAME))?;
            backends.push(Arc::new(RecipeLock::new(client, self.settings.recipe)));
        }

        Ok(LockCoordinator::with_backends(self.settings.strategy, backends))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::LockToken;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Backend with fixed answers that counts its calls
    struct ScriptedBackend {
        name: &'static str,
        grant: AtomicBool,
        confirm_release: AtomicBool,
        locked: AtomicBool,
        acquires: AtomicUsize,
        releases: AtomicUsize,
        status_checks: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                grant: AtomicBool::new(true),
                confirm_release: AtomicBool::new(true),
                locked: AtomicBool::new(false),
                acquires: AtomicUsize::new(0),
                releases: AtomicUsize::new(0),
                status_checks: AtomicUsize::new(0),
            })
        }

        fn refusing(name: &'static str) -> Arc<Self> {
            let backend = Self::new(name);
            backend.grant.store(false, Ordering::SeqCst);
            backend
        }

        fn acquires(&self) -> usize {
            self.acquires.load(Ordering::SeqCst)
        }

        fn releases(&self) -> usize {
            self.releases.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LockBackend for ScriptedBackend {
        fn name(&self) -> &'static str {
            self.name
        }

        fn default_timeout(&self) -> Duration {
            Duration::from_secs(30)
        }

        async fn acquire(&self, key: &str, _timeout: Duration, _cancel: &CancellationToken) -> Option<LockHandle> {
            self.acquires.fetch_add(1, Ordering::SeqCst);
            if !self.grant.load(Ordering::SeqCst) {
                return None;
            }
            self.locked.store(true, Ordering::SeqCst);
            Some(LockHandle::new(key, LockToken::generate(), self.name))
        }

        async fn release(&self, handle: &mut LockHandle) -> bool {
            self.releases.fetch_add(1, Ordering::SeqCst);
            if !handle.is_held() || !self.confirm_release.load(Ordering::SeqCst) {
                return false;
            }
            self.locked.store(false, Ordering::SeqCst);
            handle.clear();
            true
        }

        async fn is_locked(&self, _key: &str) -> bool {
            self.status_checks.fetch_add(1, Ordering::SeqCst);
            self.locked.load(Ordering::SeqCst)
        }
    }

    fn both(token: &Arc<ScriptedBackend>, recipe: &Arc<ScriptedBackend>) -> LockCoordinator {
        LockCoordinator::new("both", token.clone(), recipe.clone())
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!("token".parse::<Strategy>().unwrap(), Strategy::Token);
        assert_eq!("Redis".parse::<Strategy>().unwrap(), Strategy::Token);
        assert_eq!("recipe".parse::<Strategy>().unwrap(), Strategy::Recipe);
        assert_eq!("ZOOKEEPER".parse::<Strategy>().unwrap(), Strategy::Recipe);
        assert_eq!(" both ".parse::<Strategy>().unwrap(), Strategy::Both);
        assert!(matches!("etcd".parse::<Strategy>(), Err(LockError::InvalidStrategy(s)) if s == "etcd"));
    }

    #[tokio::test]
    async fn test_single_strategy_passes_through() {
        let token = ScriptedBackend::new("token");
        let recipe = ScriptedBackend::new("recipe");
        let coordinator = LockCoordinator::new("token", token.clone(), recipe.clone());

        let mut lease = coordinator.acquire_lock("job", Duration::from_secs(1)).await.unwrap();
        assert_eq!(lease.handles().len(), 1);
        assert!(lease.handle("token").is_some());
        assert!(coordinator.is_locked("job").await);
        assert!(coordinator.release_lock(&mut lease).await);

        assert_eq!(recipe.acquires(), 0);
        assert_eq!(recipe.releases(), 0);
    }

    #[tokio::test]
    async fn test_both_acquires_in_order() {
        let token = ScriptedBackend::new("token");
        let recipe = ScriptedBackend::new("recipe");
        let coordinator = both(&token, &recipe);

        let lease = coordinator.acquire_lock("job", Duration::from_secs(1)).await.unwrap();
        let order: Vec<_> = lease.handles().iter().map(LockHandle::backend).collect();
        assert_eq!(order, ["token", "recipe"]);
        assert!(lease.is_held());
    }

    #[tokio::test]
    async fn test_both_fails_fast() {
        let token = ScriptedBackend::refusing("token");
        let recipe = ScriptedBackend::new("recipe");
        let coordinator = both(&token, &recipe);

        assert!(coordinator.acquire_lock("job", Duration::from_secs(1)).await.is_none());
        assert_eq!(token.acquires(), 1);
        assert_eq!(recipe.acquires(), 0);
        assert_eq!(token.releases(), 0);
    }

    #[tokio::test]
    async fn test_both_compensates_partial_acquisition() {
        let token = ScriptedBackend::new("token");
        let recipe = ScriptedBackend::refusing("recipe");
        let coordinator = both(&token, &recipe);

        assert!(coordinator.acquire_lock("job", Duration::from_secs(1)).await.is_none());
        assert_eq!(token.releases(), 1);
        assert!(!token.is_locked("job").await);
        assert_eq!(recipe.releases(), 0);
    }

    #[tokio::test]
    async fn test_both_release_attempts_every_backend() {
        let token = ScriptedBackend::new("token");
        let recipe = ScriptedBackend::new("recipe");
        let coordinator = both(&token, &recipe);

        let mut lease = coordinator.acquire_lock("job", Duration::from_secs(1)).await.unwrap();
        recipe.confirm_release.store(false, Ordering::SeqCst);

        assert!(!coordinator.release_lock(&mut lease).await);
        assert_eq!(token.releases(), 1);
        assert_eq!(recipe.releases(), 1);
        assert!(!token.is_locked("job").await);
        assert!(!lease.handle("token").unwrap().is_held());
        assert!(lease.is_held());

        // a retry only touches what is still held
        recipe.confirm_release.store(true, Ordering::SeqCst);
        assert!(coordinator.release_lock(&mut lease).await);
        assert_eq!(token.releases(), 1);
        assert_eq!(recipe.releases(), 2);
        assert!(!lease.is_held());

        assert!(!coordinator.release_lock(&mut lease).await);
        assert_eq!(recipe.releases(), 2);
    }

    #[tokio::test]
    async fn test_both_status_requires_agreement() {
        let token = ScriptedBackend::new("token");
        let recipe = ScriptedBackend::new("recipe");
        let coordinator = both(&token, &recipe);

        assert!(!coordinator.is_locked("job").await);
        assert_eq!(recipe.status_checks.load(Ordering::SeqCst), 0);

        token.locked.store(true, Ordering::SeqCst);
        assert!(!coordinator.is_locked("job").await);

        recipe.locked.store(true, Ordering::SeqCst);
        assert!(coordinator.is_locked("job").await);
    }

    #[tokio::test]
    async fn test_default_acquire_uses_backend_wait() {
        let token = ScriptedBackend::new("token");
        let recipe = ScriptedBackend::new("recipe");
        let coordinator = both(&token, &recipe);

        assert!(coordinator.acquire_lock_default("job").await.is_some());
        assert_eq!(token.acquires(), 1);
        assert_eq!(recipe.acquires(), 1);
    }

    #[tokio::test]
    async fn test_invalid_strategy_refuses_everything() {
        let token = ScriptedBackend::new("token");
        let recipe = ScriptedBackend::new("recipe");
        let coordinator = LockCoordinator::new("etcd", token.clone(), recipe.clone());

        assert!(!coordinator.is_configured());
        assert!(coordinator.acquire_lock("job", Duration::from_secs(1)).await.is_none());
        assert!(!coordinator.is_locked("job").await);

        let mut lease = LockLease {
            key: "job".to_string(),
            handles: vec![LockHandle::new("job", LockToken::generate(), "token")],
        };
        assert!(!coordinator.release_lock(&mut lease).await);
        assert_eq!(token.acquires() + token.releases(), 0);

        let info = coordinator.info();
        assert_eq!(info.strategy, "etcd");
        assert!(!info.using_token_lock);
        assert!(!info.using_recipe_lock);
    }

    #[test]
    fn test_info_reflects_strategy() {
        for (name, token_on, recipe_on) in [
            ("token", true, false),
            ("recipe", false, true),
            ("both", true, true),
        ] {
            let token = ScriptedBackend::new("token");
            let recipe = ScriptedBackend::new("recipe");
            let info = LockCoordinator::new(name, token.clone(), recipe.clone()).info();

            assert_eq!(info.strategy, name);
            assert_eq!(info.using_token_lock, token_on);
            assert_eq!(info.using_recipe_lock, recipe_on);
            assert_eq!(token.status_checks.load(Ordering::SeqCst), 0);
            assert_eq!(recipe.status_checks.load(Ordering::SeqCst), 0);
        }
    }

    #[test]
    fn test_info_keeps_configured_alias() {
        for (name, token_on, recipe_on) in [("redis", true, false), ("zookeeper", false, true)] {
            let token = ScriptedBackend::new("token");
            let recipe = ScriptedBackend::new("recipe");
            let info = LockCoordinator::new(name, token, recipe).info();

            assert_eq!(info.strategy, name);
            assert_eq!(info.using_token_lock, token_on);
            assert_eq!(info.using_recipe_lock, recipe_on);
        }

        let settings = LockSettings {
            strategy: "redis".to_string(),
            ..LockSettings::default()
        };
        let coordinator = LockCoordinator::builder(settings)
            .cas_store(Arc::new(crate::memory::InMemoryCasStore::new()))
            .build()
            .unwrap();
        assert_eq!(coordinator.info().strategy, "redis");
        assert!(coordinator.info().using_token_lock);
    }

    #[test]
    fn test_info_serializes_camel_case() {
        let info = LockInfo {
            strategy: "both".to_string(),
            using_token_lock: true,
            using_recipe_lock: true,
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["strategy"], "both");
        assert_eq!(json["usingTokenLock"], true);
        assert_eq!(json["usingRecipeLock"], true);
    }

    #[test]
    fn test_builder_requires_needed_stores() {
        let settings = LockSettings {
            strategy: "recipe".to_string(),
            ..LockSettings::default()
        };
        let result = LockCoordinator::builder(settings)
            .cas_store(Arc::new(crate::memory::InMemoryCasStore::new()))
            .build();
        let err = tokio_test::assert_err!(result);
        assert!(matches!(err, LockError::MissingStore("recipe")));

        let settings = LockSettings {
            strategy: "token".to_string(),
            ..LockSettings::default()
        };
        let coordinator = tokio_test::assert_ok!(
            LockCoordinator::builder(settings)
                .cas_store(Arc::new(crate::memory::InMemoryCasStore::new()))
                .build()
        );
        assert_eq!(coordinator.info().strategy, "token");
    }

    #[test]
    fn test_builder_keeps_invalid_strategy() {
        let settings = LockSettings {
            strategy: "nonsense".to_string(),
            ..LockSettings::default()
        };
        let coordinator = LockCoordinatorBuilder::new(settings).build().unwrap();
        assert!(!coordinator.is_configured());
        assert_eq!(coordinator.info().strategy, "nonsense");
    }
}
