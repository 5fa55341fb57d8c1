//! Instances of registered classes and their cache invalidation.
//!
//! Every cached instance-method call records its rendered key in the
//! instance's own index. [`Instance::clear_cache`] deletes exactly those keys,
//! leaving static-method entries and other instances alone.

use crate::error::{CacheError, Result};
use crate::registry::{ClassHandle, MethodScope};
use crate::template::RenderContext;
use crate::wrap::positional;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// A value of a registered class, able to call its instance methods.
///
/// Each instance has an identifier that instance-method keys embed
/// (`{_id_}`), and remembers every key its cached calls produced so
/// [`Instance::clear_cache`] can drop exactly those entries.
pub struct Instance<T> {
    class: ClassHandle<T>,
    value: Arc<T>,
    id: String,
    index: Mutex<HashSet<String>>,
}

impl<T> Instance<T>
where
    T: Send + Sync + 'static,
{
    pub(crate) fn new(class: ClassHandle<T>, value: Arc<T>, id: String) -> Self {
        Self {
            class,
            value,
            id,
            index: Mutex::new(HashSet::new()),
        }
    }

    /// Identifier embedded in this instance's keys.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn shared(&self) -> Arc<T> {
        Arc::clone(&self.value)
    }

    pub fn class(&self) -> &ClassHandle<T> {
        &self.class
    }

    /// Logical keys recorded by this instance's cached calls, sorted.
    pub fn cached_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.index.lock().iter().cloned().collect();
        keys.sort();
        keys
    }

    /// Calls instance method `name` with the argument tuple `args`.
    ///
    /// When caching is enabled for `.name` the key is rendered with this
    /// instance's identifier (`{_id_}`) and its context (`{this.*}`), and is
    /// recorded for [`Instance::clear_cache`] once the call succeeds.
    ///
    /// # Arguments
    ///
    /// * `name` - The instance method, without the leading `.`
    /// * `args` - The arguments as a tuple, `()` for none
    ///
    /// # Returns
    ///
    /// * `Ok(R)` - The cached or freshly computed result
    /// * `Err(CacheError::NotFound)` - The class has no such instance method
    /// * `Err(CacheError::Upstream)` - The method failed; nothing was stored
    /// * `Err(CacheError::Serialization)` - `args` or the result do not fit
    ///   the method's types
    ///
    /// # Examples
    ///
    /// ```
    /// use cacheable_core::{Cacheable, Class, MemoryClient};
    /// use std::convert::Infallible;
    /// use std::sync::Arc;
    ///
    /// struct Cart {
    ///     items: Vec<u32>,
    /// }
    ///
    /// # tokio_test_block(async {
    /// let cache = Cacheable::new(MemoryClient::new());
    /// let carts = cache
    ///     .register(Class::<Cart>::new("Cart").instance_method(
    ///         "total",
    ///         |this: Arc<Cart>, (): ()| async move {
    ///             Ok::<_, Infallible>(this.items.iter().sum::<u32>())
    ///         },
    ///     ))
    ///     .unwrap();
    /// carts.enable_cache(".total").unwrap();
    ///
    /// let cart = carts.instance_with_id(Cart { items: vec![2, 3] }, "c1");
    /// let total: u32 = cart.call("total", ()).await.unwrap();
    /// assert_eq!(total, 5);
    /// assert_eq!(cart.cached_keys(), vec!["Cart.total#c1:[]".to_string()]);
    /// # });
    /// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
    /// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
    /// # }
    /// ```
    pub async fn call<R, A>(&self, name: &str, args: A) -> Result<R>
    where
        R: DeserializeOwned,
        A: Serialize,
    {
        let entry = &self.class.entry;
        let slot = entry.methods.get(name).ok_or_else(|| CacheError::NotFound {
            class: entry.name.clone(),
            method: name.to_string(),
            scope: MethodScope::Instance.as_str(),
        })?;
        let args = serde_json::to_value(&args)?;

        let value = match slot.cache() {
            None => (slot.func)(Arc::clone(&self.value), args).await?,
            Some(cache) => {
                let positional = positional(&args);
                let context = entry
                    .context
                    .as_ref()
                    .and_then(|context| context(&*self.value));
                let key = cache.template.render(
                    &RenderContext::new(&positional)
                        .function(&slot.qualified)
                        .context(context.as_ref())
                        .instance_id(Some(self.id.as_str()))
                        .silent(self.class.silent),
                );
                let this = Arc::clone(&self.value);
                let value = self
                    .class
                    .run_cached(&cache, &key, || (slot.func)(this, args), slot)
                    .await?;
                self.index.lock().insert(key);
                value
            }
        };
        Ok(serde_json::from_value(value)?)
    }

    /// Deletes every entry this instance's cached calls produced and forgets
    /// them. Static-method entries and other instances are untouched.
    ///
    /// Keys whose delete fails stay recorded so a later call can retry; the
    /// first failure is returned after all keys were attempted.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Every recorded key was deleted (or there were none)
    /// * `Err(CacheError::Client)` - The first delete that failed
    ///
    /// # Examples
    ///
    /// ```
    /// use cacheable_core::{Cacheable, Class, MemoryClient};
    /// use std::convert::Infallible;
    /// use std::sync::Arc;
    ///
    /// struct Page(u32);
    ///
    /// # tokio_test_block(async {
    /// let cache = Cacheable::new(MemoryClient::new());
    /// let pages = cache
    ///     .register(Class::<Page>::new("Page").instance_method(
    ///         "number",
    ///         |this: Arc<Page>, (): ()| async move { Ok::<_, Infallible>(this.0) },
    ///     ))
    ///     .unwrap();
    /// pages.enable_cache(".number").unwrap();
    ///
    /// let page = pages.instance_with_id(Page(4), "p4");
    /// let _: u32 = page.call("number", ()).await.unwrap();
    /// assert!(cache.get("Page.number#p4:[]").await.unwrap().is_some());
    ///
    /// page.clear_cache().await.unwrap();
    /// assert!(page.cached_keys().is_empty());
    /// assert_eq!(cache.get("Page.number#p4:[]").await.unwrap(), None);
    /// # });
    /// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
    /// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
    /// # }
    /// ```
    pub async fn clear_cache(&self) -> Result<()> {
        let keys: Vec<String> = self.index.lock().drain().collect();
        let mut failed = Vec::new();
        let mut first_error = None;

        for key in keys {
            if let Err(err) = self.class.store.delete(&key).await {
                tracing::warn!(key = %key, error = %err, "failed to delete instance cache entry");
                failed.push(key);
                first_error.get_or_insert(err);
            }
        }

        tracing::debug!(
            class = %self.class.entry.name,
            instance = %self.id,
            failed = failed.len(),
            "cleared instance cache"
        );
        if !failed.is_empty() {
            self.index.lock().extend(failed);
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl<T> Deref for Instance<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> fmt::Debug for Instance<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("class", &self.class.entry.name)
            .field("id", &self.id)
            .field("value", &self.value)
            .finish()
    }
}
