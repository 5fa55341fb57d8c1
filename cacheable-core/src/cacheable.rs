//! The `Cacheable` entry point and its builder.
//!
//! A `Cacheable` binds one client and one prefix to a method registry, an
//! in-flight table and an instance-id counter. Everything created from it
//! (wrapped functions, class handles, instances) shares those.

use crate::client::CacheClient;
use crate::error::{CacheError, Result};
use crate::options::CacheableOptions;
use crate::registry::{Class, ClassHandle, MethodRegistry};
use crate::single_flight::SingleFlight;
use crate::store::CacheStore;
use crate::wrap::{CachedFn, WrapOptions};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

struct Inner {
    store: CacheStore,
    options: CacheableOptions,
    registry: MethodRegistry,
    flight: Arc<SingleFlight>,
    instance_ids: Arc<AtomicU64>,
}

/// Entry point: a namespaced view of a cache client plus the registry of
/// classes cached through it.
///
/// Cloning is cheap; clones share the client, the registry and the
/// in-flight table.
///
/// # Examples
///
/// ```
/// use cacheable_core::{Cacheable, CacheableOptions, MemoryClient};
///
/// let cache = Cacheable::new(MemoryClient::new());
/// assert_eq!(cache.prefix(), "cached:");
/// assert!(cache.silent());
///
/// let cache = Cacheable::with_options(
///     MemoryClient::new(),
///     CacheableOptions::default().prefix("app:").silent(false),
/// );
/// assert_eq!(cache.prefix(), "app:");
/// ```
#[derive(Clone)]
pub struct Cacheable {
    inner: Arc<Inner>,
}

impl Cacheable {
    /// A cache over `client` with default options.
    pub fn new<C: CacheClient>(client: C) -> Self {
        Self::with_options(client, CacheableOptions::default())
    }

    pub fn with_options<C: CacheClient>(client: C, options: CacheableOptions) -> Self {
        Self::from_shared(Arc::new(client), options)
    }

    /// A cache over an already shared client.
    pub fn from_shared(client: Arc<dyn CacheClient>, options: CacheableOptions) -> Self {
        tracing::debug!(prefix = %options.prefix, silent = options.silent, "creating cacheable");
        Self {
            inner: Arc::new(Inner {
                store: CacheStore::new(client, options.prefix.clone()),
                options,
                registry: MethodRegistry::new(),
                flight: Arc::new(SingleFlight::new()),
                instance_ids: Arc::new(AtomicU64::new(0)),
            }),
        }
    }

    pub fn builder() -> CacheableBuilder {
        CacheableBuilder::default()
    }

    pub fn prefix(&self) -> &str {
        &self.inner.options.prefix
    }

    pub fn silent(&self) -> bool {
        self.inner.options.silent
    }

    pub fn options(&self) -> &CacheableOptions {
        &self.inner.options
    }

    pub fn store(&self) -> &CacheStore {
        &self.inner.store
    }

    pub fn registry(&self) -> &MethodRegistry {
        &self.inner.registry
    }

    /// Reads the logical `key` straight from the client.
    ///
    /// # Arguments
    ///
    /// * `key` - The logical key, as rendered by a template; the prefix is
    ///   added before the client sees it
    ///
    /// # Returns
    ///
    /// * `Ok(Some(value))` - The stored JSON value
    /// * `Ok(None)` - Nothing stored (or the entry expired)
    /// * `Err(CacheError::Client)` - The client failed; unlike cached calls,
    ///   direct reads surface client errors
    ///
    /// # Examples
    ///
    /// ```
    /// use cacheable_core::{CacheClient, Cacheable, MemoryClient};
    /// use serde_json::json;
    /// use std::sync::Arc;
    ///
    /// # tokio_test_block(async {
    /// let client = Arc::new(MemoryClient::new());
    /// let cache = Cacheable::new(client.clone());
    ///
    /// client.set("cached:answer", json!(42), None).await.unwrap();
    /// assert_eq!(cache.get("answer").await.unwrap(), Some(json!(42)));
    /// assert_eq!(cache.get("cached:answer").await.unwrap(), None);
    /// # });
    /// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
    /// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
    /// # }
    /// ```
    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.inner.store.get(key).await
    }

    /// Reads the logical `key` and deserializes it into `T`.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.inner.store.get(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Removes the logical `key`.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - An entry was removed
    /// * `Ok(false)` - Nothing was stored under `key`
    /// * `Err(CacheError::Client)` - The client failed
    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.inner.store.delete(key).await
    }

    /// Resets the underlying client.
    ///
    /// This clears every entry of the client, including those written under
    /// other prefixes when the client is shared.
    pub async fn reset(&self) -> Result<()> {
        self.inner.store.reset().await
    }

    /// Wraps `func` with the default template `{_fn_}:%j{0}`, where `_fn_` is
    /// `name`.
    pub fn wrap<F, A, V, E, Fut>(&self, name: impl Into<String>, func: F) -> CachedFn<F, A, V, E>
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
        A: Serialize,
        V: Serialize + DeserializeOwned,
    {
        self.wrap_with(name, func, WrapOptions::default())
    }

    /// Wraps `func` with explicit template, ttl, context and parameter names.
    ///
    /// # Examples
    ///
    /// ```
    /// use cacheable_core::{Cacheable, MemoryClient, WrapOptions};
    /// use std::convert::Infallible;
    ///
    /// # tokio_test_block(async {
    /// let cache = Cacheable::new(MemoryClient::new());
    /// let add = cache.wrap_with(
    ///     "add",
    ///     |(a, b): (i32, i32)| async move { Ok::<_, Infallible>(a + b) },
    ///     WrapOptions::new().template("add-{0}-{1}"),
    /// );
    ///
    /// assert_eq!(add.call((2, 5)).await.unwrap(), 7);
    /// assert_eq!(cache.get_as::<i32>("add-2-5").await.unwrap(), Some(7));
    /// # });
    /// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
    /// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
    /// # }
    /// ```
    pub fn wrap_with<F, A, V, E, Fut>(
        &self,
        name: impl Into<String>,
        func: F,
        options: WrapOptions,
    ) -> CachedFn<F, A, V, E>
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
        A: Serialize,
        V: Serialize + DeserializeOwned,
    {
        CachedFn::new(
            name.into(),
            func,
            self.inner.store.clone(),
            self.inner.options.silent,
            Arc::clone(&self.inner.flight),
            options,
        )
    }

    /// Registers `class`. A type can be registered once per `Cacheable`; a
    /// second attempt fails with [`CacheError::DuplicateRegistry`] and leaves
    /// the first registration in place.
    pub fn register<T>(&self, class: Class<T>) -> Result<ClassHandle<T>>
    where
        T: Send + Sync + 'static,
    {
        let entry = self.inner.registry.register(class)?;
        Ok(self.handle(entry))
    }

    /// Handle to an already registered class.
    pub fn class<T>(&self) -> Option<ClassHandle<T>>
    where
        T: Send + Sync + 'static,
    {
        self.inner.registry.lookup::<T>().map(|entry| self.handle(entry))
    }

    pub fn is_registered<T: 'static>(&self) -> bool {
        self.inner.registry.is_registered::<T>()
    }

    fn handle<T>(&self, entry: Arc<crate::registry::ClassEntry<T>>) -> ClassHandle<T> {
        ClassHandle {
            entry,
            store: self.inner.store.clone(),
            flight: Arc::clone(&self.inner.flight),
            instance_ids: Arc::clone(&self.inner.instance_ids),
            silent: self.inner.options.silent,
        }
    }
}

impl fmt::Debug for Cacheable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cacheable")
            .field("options", &self.inner.options)
            .field("registry", &self.inner.registry)
            .finish()
    }
}

/// Builder for [`Cacheable`]; `build` fails without a client.
///
/// # Examples
///
/// ```
/// use cacheable_core::{Cacheable, ErrorCode, MemoryClient};
///
/// let cache = Cacheable::builder()
///     .client(MemoryClient::new())
///     .prefix("svc:")
///     .build()
///     .unwrap();
/// assert_eq!(cache.prefix(), "svc:");
///
/// let err = Cacheable::builder().build().unwrap_err();
/// assert_eq!(err.code(), ErrorCode::Configuration);
/// ```
#[derive(Default)]
pub struct CacheableBuilder {
    client: Option<Arc<dyn CacheClient>>,
    options: CacheableOptions,
}

impl CacheableBuilder {
    pub fn client<C: CacheClient>(mut self, client: C) -> Self {
        self.client = Some(Arc::new(client));
        self
    }

    pub fn shared_client(mut self, client: Arc<dyn CacheClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.options.prefix = prefix.into();
        self
    }

    pub fn silent(mut self, silent: bool) -> Self {
        self.options.silent = silent;
        self
    }

    pub fn options(mut self, options: CacheableOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> Result<Cacheable> {
        let client = self
            .client
            .ok_or_else(|| CacheError::Configuration("a cache client is required".to_string()))?;
        Ok(Cacheable::from_shared(client, self.options))
    }
}

impl fmt::Debug for CacheableBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheableBuilder")
            .field("has_client", &self.client.is_some())
            .field("options", &self.options)
            .finish()
    }
}
