//! # Cached Functions
//!
//! [`CachedFn`] turns an async fallible function into a cache-checked
//! equivalent. Each call:
//!
//! 1. serializes the arguments into positional JSON values,
//! 2. renders the key template against them and the bound context,
//! 3. returns the stored value on a hit, or runs the function on a miss and
//!    stores an `Ok` result before returning it.
//!
//! Errors are returned verbatim and never stored.

use crate::single_flight::{Flight, SingleFlight};
use crate::store::CacheStore;
use crate::template::{KeyTemplate, RenderContext};
#[cfg(feature = "stats")]
use crate::CacheStats;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

/// Per-wrap configuration.
///
/// # Examples
///
/// ```
/// use cacheable_core::WrapOptions;
/// use serde_json::json;
/// use std::time::Duration;
///
/// let options = WrapOptions::new()
///     .template("user:{id}:{this.region}")
///     .params(["id"])
///     .context(json!({ "region": "eu" }))
///     .ttl(Duration::from_secs(30));
/// assert_eq!(options.ttl_value(), Some(Duration::from_secs(30)));
/// ```
#[derive(Clone, Debug)]
pub struct WrapOptions {
    template: Option<KeyTemplate>,
    ttl: Option<Duration>,
    context: Option<Value>,
    params: Vec<String>,
    single_flight: bool,
}

impl Default for WrapOptions {
    fn default() -> Self {
        Self {
            template: None,
            ttl: None,
            context: None,
            params: Vec::new(),
            single_flight: true,
        }
    }
}

impl WrapOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key template; defaults to `{_fn_}:%j{0}`.
    pub fn template(mut self, template: impl Into<KeyTemplate>) -> Self {
        self.template = Some(template.into());
        self
    }

    /// Advisory time-to-live handed to the client on every write.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Context object for `{this.prop}` and bare-name placeholders.
    pub fn context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    /// Serializes `context` and binds it.
    pub fn context_from<C: Serialize>(self, context: &C) -> crate::Result<Self> {
        Ok(self.context(serde_json::to_value(context)?))
    }

    /// Names of the positional parameters, in order, so templates can use
    /// `{name}` instead of `{N}`.
    pub fn params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params = params.into_iter().map(Into::into).collect();
        self
    }

    /// Coalesce concurrent misses on one key (on by default).
    pub fn single_flight(mut self, enabled: bool) -> Self {
        self.single_flight = enabled;
        self
    }

    pub fn ttl_value(&self) -> Option<Duration> {
        self.ttl
    }
}

/// Splits serialized call arguments into positional values.
///
/// Tuples serialize to arrays, `()` to `null`; anything else counts as a
/// single argument.
pub(crate) fn positional(args: &Value) -> Vec<Value> {
    match args {
        Value::Array(items) => items.clone(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    }
}

/// One cached invocation: where to look and where to write.
pub(crate) struct CallSite<'a> {
    pub store: &'a CacheStore,
    pub flight: Option<&'a Arc<SingleFlight>>,
    pub key: &'a str,
    pub ttl: Option<Duration>,
    #[cfg(feature = "stats")]
    pub stats: &'a CacheStats,
}

/// Cache-checked execution shared by [`CachedFn`] and registered methods.
///
/// `run` is invoked at most once. `should_store` decides whether an `Ok`
/// value is written.
pub(crate) async fn cached_call<V, E, F, Fut>(
    site: CallSite<'_>,
    run: F,
    should_store: impl Fn(&V) -> bool,
) -> Result<V, E>
where
    V: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<V, E>>,
{
    match site.store.get(site.key).await {
        Ok(Some(stored)) => match serde_json::from_value::<V>(stored) {
            Ok(value) => {
                tracing::debug!(key = %site.key, "cache hit");
                #[cfg(feature = "stats")]
                site.stats.record_hit();
                return Ok(value);
            }
            Err(err) => {
                tracing::warn!(key = %site.key, error = %err, "cached value does not match the expected type, treating as miss");
            }
        },
        Ok(None) => {}
        Err(err) => {
            tracing::warn!(key = %site.key, error = %err, "cache read failed, treating as miss");
        }
    }

    let guard = match site.flight.map(|flight| flight.join(site.key)) {
        Some(Flight::Waiter(rx)) => {
            if let Ok(Some(shared)) = rx.await {
                if let Ok(value) = serde_json::from_value::<V>(shared) {
                    tracing::debug!(key = %site.key, "served by in-flight call");
                    #[cfg(feature = "stats")]
                    site.stats.record_coalesced();
                    return Ok(value);
                }
            }
            None
        }
        Some(Flight::Leader(guard)) => Some(guard),
        None => None,
    };

    tracing::debug!(key = %site.key, "cache miss");
    #[cfg(feature = "stats")]
    site.stats.record_miss();

    match run().await {
        Ok(value) => {
            let encoded = match serde_json::to_value(&value) {
                Ok(encoded) => Some(encoded),
                Err(err) => {
                    tracing::warn!(key = %site.key, error = %err, "result is not serializable, not caching");
                    None
                }
            };

            if let Some(encoded) = encoded.as_ref().filter(|_| should_store(&value)) {
                match site.store.set(site.key, encoded.clone(), site.ttl).await {
                    Ok(()) => {
                        tracing::debug!(key = %site.key, "cached result");
                        #[cfg(feature = "stats")]
                        site.stats.record_write();
                    }
                    Err(err) => {
                        tracing::warn!(key = %site.key, error = %err, "cache write failed");
                    }
                }
            }

            if let Some(guard) = guard {
                guard.complete(encoded);
            }
            Ok(value)
        }
        Err(err) => {
            #[cfg(feature = "stats")]
            site.stats.record_error();
            if let Some(guard) = guard {
                guard.complete(None);
            }
            Err(err)
        }
    }
}

type Predicate<V> = dyn Fn(&V) -> bool + Send + Sync;

struct Inner<F, V> {
    name: String,
    func: F,
    store: CacheStore,
    template: KeyTemplate,
    ttl: Option<Duration>,
    context: Option<Value>,
    params: Vec<String>,
    silent: bool,
    flight: Option<Arc<SingleFlight>>,
    cache_if: Option<Box<Predicate<V>>>,
    #[cfg(feature = "stats")]
    stats: CacheStats,
}

/// A cache-checked async function, built by [`crate::Cacheable::wrap`].
///
/// Cloning is cheap and clones share configuration and statistics.
///
/// # Type Parameters
///
/// * `F` - the wrapped function, `Fn(A) -> impl Future<Output = Result<V, E>>`
/// * `A` - the argument tuple (`()` for none)
/// * `V` - the success value, stored as JSON
/// * `E` - the error type, returned verbatim and never stored
pub struct CachedFn<F, A, V, E> {
    inner: Arc<Inner<F, V>>,
    _marker: PhantomData<fn(A) -> Result<V, E>>,
}

impl<F, A, V, E> Clone for CachedFn<F, A, V, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _marker: PhantomData,
        }
    }
}

impl<F, A, V, E> fmt::Debug for CachedFn<F, A, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedFn")
            .field("name", &self.inner.name)
            .field("template", &self.inner.template.source())
            .field("ttl", &self.inner.ttl)
            .finish_non_exhaustive()
    }
}

impl<F, A, V, E, Fut> CachedFn<F, A, V, E>
where
    F: Fn(A) -> Fut,
    Fut: Future<Output = Result<V, E>>,
    A: Serialize,
    V: Serialize + DeserializeOwned,
{
    pub(crate) fn new(
        name: String,
        func: F,
        store: CacheStore,
        silent: bool,
        flight: Arc<SingleFlight>,
        options: WrapOptions,
    ) -> Self {
        let WrapOptions {
            template,
            ttl,
            context,
            params,
            single_flight,
        } = options;

        Self {
            inner: Arc::new(Inner {
                name,
                func,
                store,
                template: template.unwrap_or_default(),
                ttl,
                context,
                params,
                silent,
                flight: single_flight.then_some(flight),
                cache_if: None,
                #[cfg(feature = "stats")]
                stats: CacheStats::new(),
            }),
            _marker: PhantomData,
        }
    }

    /// Only store `Ok` values for which `predicate` returns true. Values that
    /// fail the predicate are still returned to the caller.
    ///
    /// Must be called before the function is cloned or shared; afterwards it
    /// is a no-op that logs a warning.
    pub fn cache_if<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&V) -> bool + Send + Sync + 'static,
    {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => inner.cache_if = Some(Box::new(predicate)),
            None => {
                tracing::warn!(name = %self.inner.name, "cache_if ignored on a shared CachedFn");
            }
        }
        self
    }

    /// Calls the function through the cache.
    pub async fn call(&self, args: A) -> Result<V, E> {
        let inner = &*self.inner;
        let key = match self.key_for(&args) {
            Some(key) => key,
            None => return (inner.func)(args).await,
        };

        let site = CallSite {
            store: &inner.store,
            flight: inner.flight.as_ref(),
            key: &key,
            ttl: inner.ttl,
            #[cfg(feature = "stats")]
            stats: &inner.stats,
        };
        let should_store = |value: &V| inner.cache_if.as_ref().map_or(true, |p| p(value));

        cached_call(site, || (inner.func)(args), should_store).await
    }

    /// The logical (unprefixed) key a call with `args` would use, or `None`
    /// when the arguments cannot be serialized. Such calls bypass the cache.
    pub fn key_for(&self, args: &A) -> Option<String> {
        let inner = &*self.inner;
        let args = match serde_json::to_value(args) {
            Ok(args) => positional(&args),
            Err(err) => {
                tracing::warn!(name = %inner.name, error = %err, "arguments are not serializable, bypassing cache");
                return None;
            }
        };

        let ctx = RenderContext::new(&args)
            .function(&inner.name)
            .params(&inner.params)
            .context(inner.context.as_ref())
            .silent(inner.silent);
        Some(inner.template.render(&ctx))
    }

    /// Removes the stored value for `args`, returning whether one existed.
    pub async fn invalidate(&self, args: &A) -> crate::Result<bool> {
        match self.key_for(args) {
            Some(key) => self.inner.store.delete(&key).await,
            None => Ok(false),
        }
    }
}

impl<F, A, V, E> CachedFn<F, A, V, E> {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn template(&self) -> &KeyTemplate {
        &self.inner.template
    }

    #[cfg(feature = "stats")]
    pub fn stats(&self) -> &CacheStats {
        &self.inner.stats
    }
}
