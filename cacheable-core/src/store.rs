//! Prefixing adapter between the cache layer and its client.
//!
//! Templates render logical keys; the store turns them into physical keys by
//! prepending the configured prefix.

use crate::client::CacheClient;
use crate::error::Result;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Namespacing adapter over a shared [`CacheClient`].
///
/// Every logical key is turned into `prefix + key` before it reaches the
/// client, so the keys of one `Cacheable` never collide with other users of
/// the same backend (as long as their prefixes differ).
#[derive(Clone)]
pub struct CacheStore {
    client: Arc<dyn CacheClient>,
    prefix: Arc<str>,
}

impl CacheStore {
    pub fn new(client: Arc<dyn CacheClient>, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: Arc::from(prefix.into()),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn client(&self) -> &Arc<dyn CacheClient> {
        &self.client
    }

    /// The key actually sent to the client for a logical `key`.
    pub fn physical_key(&self, key: &str) -> String {
        let mut physical = String::with_capacity(self.prefix.len() + key.len());
        physical.push_str(&self.prefix);
        physical.push_str(key);
        physical
    }

    /// Reads the logical `key`.
    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.client.get(&self.physical_key(key)).await
    }

    /// Writes the logical `key`; `ttl` is passed through to the client.
    pub async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        self.client.set(&self.physical_key(key), value, ttl).await
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.client.delete(&self.physical_key(key)).await
    }

    /// Resets the whole client. This is not limited to the prefix: the client
    /// interface has no way to enumerate keys.
    pub async fn reset(&self) -> Result<()> {
        self.client.reset().await
    }
}

impl fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}
