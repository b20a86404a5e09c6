//! # Counter storage
//!
//! Durable keyed storage of page view counts, one row per key.
//!
//! ## Requirements
//!
//! - At most one row per key
//! - `count` never decreases
//! - Each of [`CounterStore::increment`] and [`CounterStore::create_if_absent`] is a single
//!   atomic step on the backend. No implementation may read the count, add to it
//!   client side and write it back.
//!
//! ## Implementation
//!
//! - [`crate::redis::RedisCounterStore`]: one Redis hash per key, both mutations run as
//!   server side Lua scripts
//! - [`crate::memory::MemoryCounterStore`]: in-process map, each call one critical section
use crate::error::Result;
use crate::key::PageKey;
use chrono::{DateTime, Utc};

/// A stored counter row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCounter {
    pub key: String,
    pub count: u64,
    pub last_updated: DateTime<Utc>,
}

/// Result of [`CounterStore::increment`]. When `existed` is false nothing was
/// written and `count` is meaningless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Increment {
    pub count: u64,
    pub existed: bool,
}

/// Result of [`CounterStore::create_if_absent`]. When `created` is false
/// `count` is the value already in storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Creation {
    pub count: u64,
    pub created: bool,
}

/// An async trait that defines the behavior of a page counter storage.
///
/// Methods take `&self` so one store can be shared by every concurrent
/// visit without a caller side lock.
#[async_trait::async_trait]
pub trait CounterStore: Send + Sync {
    /// Add one to an existing row. Never creates a row.
    async fn increment(&self, key: &PageKey) -> Result<Increment>;

    /// Insert a row with `initial` if none exists. Never overwrites.
    async fn create_if_absent(&self, key: &PageKey, initial: u64) -> Result<Creation>;

    /// Point read without side effects.
    async fn get(&self, key: &PageKey) -> Result<Option<PageCounter>>;
}
