//! In-memory stores (for testing/development)
//!
//! Both stores honour the same atomicity the real services provide, run on
//! tokio time (so paused-clock tests see expiry), and can be switched
//! offline to exercise store failures.

mod cas;
mod tree;

pub use cas::InMemoryCasStore;
pub use tree::{InMemoryCoordination, InMemorySession};
