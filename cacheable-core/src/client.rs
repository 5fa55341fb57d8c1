//! # Cache Clients
//!
//! The cache layer never stores anything itself: every read and write goes
//! through a [`CacheClient`], an async key-value store supplied by the caller.
//! Values travel as `serde_json::Value` so any backend that can hold JSON can
//! be plugged in.
//!
//! [`MemoryClient`] is a small in-process implementation with per-entry TTL
//! and no eviction policy, enough for tests, tools and single-process use.

use crate::error::Result;
use crate::CacheEntry;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Async key-value store backing a [`crate::Cacheable`].
///
/// Keys passed to the client are already prefixed. Implementations are
/// expected to serialize their own operations; the cache layer never locks
/// around client calls.
#[async_trait]
pub trait CacheClient: Send + Sync + 'static {
    /// Returns the value stored under `key`, `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Stores `value` under `key`. `ttl` is advisory.
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()>;

    /// Removes `key`, returning whether it was present.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Removes every entry, including those written under other prefixes
    /// when the client is shared.
    async fn reset(&self) -> Result<()>;
}

#[async_trait]
impl<C> CacheClient for Arc<C>
where
    C: CacheClient + ?Sized,
{
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        (**self).set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        (**self).delete(key).await
    }

    async fn reset(&self) -> Result<()> {
        (**self).reset().await
    }
}

/// In-memory [`CacheClient`] backed by a `DashMap`.
///
/// Expired entries are dropped lazily on read. There is no size bound.
///
/// # Examples
///
/// ```
/// use cacheable_core::{CacheClient, MemoryClient};
/// use serde_json::json;
///
/// # tokio_test_block(async {
/// let client = MemoryClient::new();
/// client.set("k", json!(1), None).await.unwrap();
/// assert_eq!(client.get("k").await.unwrap(), Some(json!(1)));
/// assert!(client.delete("k").await.unwrap());
/// assert_eq!(client.get("k").await.unwrap(), None);
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemoryClient {
    entries: DashMap<String, CacheEntry<Value>>,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included until they are read.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Physical keys currently stored, in no particular order.
    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        before.saturating_sub(self.entries.len())
    }
}

#[async_trait]
impl CacheClient for MemoryClient {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        // clone out of the shard guard before any removal to avoid deadlocking
        let entry = self.entries.get(key).map(|entry| entry.clone());
        match entry {
            Some(entry) if entry.is_expired() => {
                self.entries
                    .remove_if(key, |_, current| current.is_expired());
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        self.entries
            .insert(key.to_string(), CacheEntry::new(value, ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn reset(&self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }
}
