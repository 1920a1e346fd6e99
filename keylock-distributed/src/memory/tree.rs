use crate::error::StoreError;
use crate::store::{AdvisoryMutex, CoordinationClient};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

const LOCK_NODE_PREFIX: &str = "lock-";

#[derive(Debug)]
struct Node {
    /// Session owning an ephemeral node; `None` for persistent nodes
    owner: Option<u64>,
}

#[derive(Default)]
struct TreeState {
    nodes: BTreeMap<String, Node>,
    next_sequence: u64,
}

struct Tree {
    state: Mutex<TreeState>,
    /// Bumped on every structural change; waiters watch it
    changes: watch::Sender<u64>,
    available: AtomicBool,
    next_session: AtomicU64,
}

impl Tree {
    fn check(&self, session: &SessionState) -> Result<(), StoreError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory coordination service offline".to_string()));
        }
        if session.closed.load(Ordering::SeqCst) {
            return Err(StoreError::SessionExpired);
        }
        Ok(())
    }

    fn notify(&self) {
        self.changes.send_modify(|version| *version += 1);
    }

    /// Create `path` (or `path` plus a sequence suffix), adding missing
    /// persistent parents. Returns the created path.
    fn create(&self, path: &str, owner: Option<u64>, sequential: bool) -> Result<String, StoreError> {
        validate_path(path)?;

        let created = {
            let mut state = self.state.lock();

            let path = if sequential {
                state.next_sequence += 1;
                format!("{}{:010}", path, state.next_sequence)
            } else {
                path.to_string()
            };
            if state.nodes.contains_key(&path) {
                return Err(StoreError::NodeExists(path));
            }

            for parent in ancestors(&path) {
                state
                    .nodes
                    .entry(parent.to_string())
                    .or_insert(Node { owner: None });
            }
            state.nodes.insert(path.clone(), Node { owner });
            path
        };

        self.notify();
        Ok(created)
    }

    fn delete(&self, path: &str) -> Result<(), StoreError> {
        let removed = self.state.lock().nodes.remove(path).is_some();
        if !removed {
            return Err(StoreError::NoNode(path.to_string()));
        }
        self.notify();
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        self.state.lock().nodes.contains_key(path)
    }

    /// Direct children of `parent`, sorted
    fn children(&self, parent: &str) -> Vec<String> {
        let prefix = format!("{}/", parent.trim_end_matches('/'));
        self.state
            .lock()
            .nodes
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
            .filter(|(path, _)| !path[prefix.len()..].contains('/'))
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// Sequential lock nodes under `path`, lowest first
    fn contenders(&self, path: &str) -> Vec<String> {
        let mut nodes = self.children(path);
        nodes.retain(|node| {
            node.rsplit('/')
                .next()
                .is_some_and(|name| name.starts_with(LOCK_NODE_PREFIX))
        });
        nodes
    }

    fn expire_session(&self, session: u64) {
        let removed = {
            let mut state = self.state.lock();
            let before = state.nodes.len();
            state.nodes.retain(|_, node| node.owner != Some(session));
            before - state.nodes.len()
        };
        debug!(session, removed, "Coordination session closed");
        self.notify();
    }
}

fn validate_path(path: &str) -> Result<(), StoreError> {
    if !path.starts_with('/') || path.len() < 2 || path.ends_with('/') || path.contains("//") {
        return Err(StoreError::NoNode(format!("invalid path {:?}", path)));
    }
    Ok(())
}

/// `/a/b/c` yields `/a` then `/a/b`
fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    path.match_indices('/')
        .skip(1)
        .map(move |(idx, _)| &path[..idx])
}

struct SessionState {
    id: u64,
    closed: AtomicBool,
}

/// In-memory hierarchical coordination service
///
/// Sessions obtained from [`connect`](Self::connect) behave like clients of
/// one shared ensemble: ephemeral nodes vanish when their session closes.
#[derive(Clone)]
pub struct InMemoryCoordination {
    tree: Arc<Tree>,
}

impl InMemoryCoordination {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            tree: Arc::new(Tree {
                state: Mutex::new(TreeState::default()),
                changes,
                available: AtomicBool::new(true),
                next_session: AtomicU64::new(1),
            }),
        }
    }

    /// Open a new client session
    pub fn connect(&self) -> InMemorySession {
        InMemorySession {
            tree: self.tree.clone(),
            session: Arc::new(SessionState {
                id: self.tree.next_session.fetch_add(1, Ordering::SeqCst),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Simulate the service going away (`false`) or coming back (`true`)
    pub fn set_available(&self, available: bool) {
        self.tree.available.store(available, Ordering::SeqCst);
    }

    pub fn node_exists(&self, path: &str) -> bool {
        self.tree.exists(path)
    }

    /// Direct children of `path`
    pub fn children(&self, path: &str) -> Vec<String> {
        self.tree.children(path)
    }
}

impl Default for InMemoryCoordination {
    fn default() -> Self {
        Self::new()
    }
}

/// One client session of an [`InMemoryCoordination`]
///
/// Dropping the session closes it.
pub struct InMemorySession {
    tree: Arc<Tree>,
    session: Arc<SessionState>,
}

impl InMemorySession {
    pub fn id(&self) -> u64 {
        self.session.id
    }

    /// End the session, removing its ephemeral nodes
    pub fn close(&self) {
        if !self.session.closed.swap(true, Ordering::SeqCst) {
            self.tree.expire_session(self.session.id);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.session.closed.load(Ordering::SeqCst)
    }
}

impl Drop for InMemorySession {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl CoordinationClient for InMemorySession {
    async fn create_path(&self, path: &str) -> Result<(), StoreError> {
        self.tree.check(&self.session)?;
        self.tree.create(path, None, false).map(|_| ())
    }

    async fn exists(&self, path: &str) -> Result<bool, StoreError> {
        self.tree.check(&self.session)?;
        Ok(self.tree.exists(path))
    }

    fn mutex(&self, path: &str) -> Arc<dyn AdvisoryMutex> {
        Arc::new(InMemoryMutex {
            tree: self.tree.clone(),
            session: self.session.clone(),
            path: path.to_string(),
            held: Mutex::new(None),
        })
    }
}

struct Held {
    node: String,
    count: u32,
}

/// Lock recipe: the contender owning the lowest sequential ephemeral child
/// of the lock path holds the lock
struct InMemoryMutex {
    tree: Arc<Tree>,
    session: Arc<SessionState>,
    path: String,
    held: Mutex<Option<Held>>,
}

/// Withdraws a contender node unless the wait ended in ownership
struct PendingNode<'a> {
    tree: &'a Tree,
    node: Option<String>,
}

impl PendingNode<'_> {
    fn keep(mut self) -> String {
        self.node.take().unwrap_or_default()
    }
}

impl Drop for PendingNode<'_> {
    fn drop(&mut self) {
        if let Some(node) = self.node.take() {
            // Already gone if the session expired meanwhile
            let _ = self.tree.delete(&node);
        }
    }
}

#[async_trait]
impl AdvisoryMutex for InMemoryMutex {
    async fn acquire(&self, timeout: Duration) -> Result<bool, StoreError> {
        self.tree.check(&self.session)?;

        {
            let mut held = self.held.lock();
            if let Some(held) = held.as_mut() {
                held.count += 1;
                return Ok(true);
            }
        }

        let now = Instant::now();
        let deadline = now
            .checked_add(timeout)
            .unwrap_or_else(|| now + Duration::from_secs(86400 * 365 * 30));

        let mut changes = self.tree.changes.subscribe();
        let prefix = format!("{}/{}", self.path, LOCK_NODE_PREFIX);
        let node = self.tree.create(&prefix, Some(self.session.id), true)?;
        let pending = PendingNode {
            tree: &self.tree,
            node: Some(node.clone()),
        };

        loop {
            changes.borrow_and_update();
            self.tree.check(&self.session)?;

            let contenders = self.tree.contenders(&self.path);
            if !contenders.contains(&node) {
                return Err(StoreError::SessionExpired);
            }
            if contenders.first() == Some(&node) {
                let node = pending.keep();
                *self.held.lock() = Some(Held { node, count: 1 });
                return Ok(true);
            }

            match tokio::time::timeout_at(deadline, changes.changed()).await {
                Err(_) => return Ok(false),
                Ok(Err(_)) => return Err(StoreError::Unavailable("coordination service dropped".to_string())),
                Ok(Ok(())) => {}
            }
        }
    }

    async fn release(&self) -> Result<(), StoreError> {
        self.tree.check(&self.session)?;

        let node = {
            let mut held = self.held.lock();
            match held.as_mut() {
                None => return Err(StoreError::NotOwner(self.path.clone())),
                Some(h) if h.count > 1 => {
                    h.count -= 1;
                    return Ok(());
                }
                Some(_) => held.take().map(|h| h.node).unwrap_or_default(),
            }
        };

        self.tree.delete(&node)
    }

    fn is_acquired_in_this_process(&self) -> bool {
        self.held.lock().is_some()
    }
}
