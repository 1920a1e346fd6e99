//! Ownership records handed out by successful acquisitions

use std::fmt;
use uuid::Uuid;

/// Opaque proof of ownership, unique per acquisition
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    /// Mint a fresh random token
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for LockToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for LockToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One backend's record of a successful acquisition
///
/// The handle is the only place the token lives on the caller's side. It is
/// passed back into `release`, which clears the token once the store has
/// confirmed the release; a cleared handle releases nothing.
#[derive(Debug)]
pub struct LockHandle {
    key: String,
    token: Option<LockToken>,
    backend: &'static str,
}

impl LockHandle {
    pub fn new(key: impl Into<String>, token: LockToken, backend: &'static str) -> Self {
        Self {
            key: key.into(),
            token: Some(token),
            backend,
        }
    }

    /// Caller-supplied key, without any backend prefix
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> Option<&LockToken> {
        self.token.as_ref()
    }

    /// Name of the backend that issued this handle
    pub fn backend(&self) -> &'static str {
        self.backend
    }

    /// Whether the handle still owns its lock
    pub fn is_held(&self) -> bool {
        self.token.is_some()
    }

    pub(crate) fn clear(&mut self) {
        self.token = None;
    }
}
