//! Lock and store errors
//!
//! These never cross the coordinator boundary: backends log them and report
//! a plain failure.

use thiserror::Error;

/// Errors raised by a backing store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Session expired")]
    SessionExpired,

    #[error("Node already exists: {0}")]
    NodeExists(String),

    #[error("No such node: {0}")]
    NoNode(String),

    #[error("Mutex not held: {0}")]
    NotOwner(String),

    #[error("Redis error: {0}")]
    Redis(#[from] keylock_redis::RedisError),
}

/// Why a lock operation did not succeed
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Lock held by another holder: {0}")]
    Contended(String),

    #[error("Lock timeout: {0}")]
    Timeout(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Lock not held: {0}")]
    NotHeld(String),

    #[error("Lock acquisition cancelled: {0}")]
    Cancelled(String),

    #[error("Invalid lock key: {0:?}")]
    InvalidKey(String),

    #[error("Invalid lock strategy: {0}")]
    InvalidStrategy(String),

    #[error("No store configured for the {0} backend")]
    MissingStore(&'static str),
}
