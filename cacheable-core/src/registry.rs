//! # Method Registry
//!
//! Rust types have no mutable method tables, so a "class" here is an explicit
//! table of named async methods declared with [`Class`] and handed to
//! [`crate::Cacheable::register`]. The registry owned by the `Cacheable` maps
//! each registered type to its table; every method slot carries its own cache
//! state, switched on and off with [`ClassHandle::enable_cache`] and
//! [`ClassHandle::disable_cache`]. Callers always go through
//! [`ClassHandle::call`] or [`crate::Instance::call`], so toggling caching
//! never changes how a method is invoked.
//!
//! Method specs follow the usual convention: `"get"` names a static method,
//! `".article_ids"` an instance method.
//!
//! ```
//! use cacheable_core::{Cacheable, Class, MemoryClient};
//! use std::convert::Infallible;
//!
//! struct Counter;
//!
//! # tokio_test_block(async {
//! let cache = Cacheable::new(MemoryClient::new());
//! let counter = cache
//!     .register(Class::<Counter>::new("Counter").static_method(
//!         "double",
//!         |(n,): (u64,)| async move { Ok::<_, Infallible>(n * 2) },
//!     ))
//!     .unwrap();
//!
//! counter.enable_cache("double").unwrap();
//! let value: u64 = counter.call("double", (21u64,)).await.unwrap();
//! assert_eq!(value, 42);
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use crate::error::{BoxError, CacheError, Result};
use crate::instance::Instance;
use crate::single_flight::SingleFlight;
use crate::store::CacheStore;
use crate::template::{self, KeyTemplate, RenderContext};
use crate::wrap::{cached_call, positional, CallSite};
#[cfg(feature = "stats")]
use crate::CacheStats;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub(crate) type MethodFuture = BoxFuture<'static, Result<Value>>;
type StaticFn = Arc<dyn Fn(Value) -> MethodFuture + Send + Sync>;
type InstanceFn<T> = Arc<dyn Fn(Arc<T>, Value) -> MethodFuture + Send + Sync>;
type ContextFn<T> = Arc<dyn Fn(&T) -> Option<Value> + Send + Sync>;

/// Whether a method is called on the class or on an instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MethodScope {
    Static,
    Instance,
}

impl MethodScope {
    /// Splits a method spec into scope and name: `".name"` is an instance
    /// method, anything else a static one.
    pub fn parse(spec: &str) -> (MethodScope, &str) {
        match spec.strip_prefix('.') {
            Some(name) => (MethodScope::Instance, name),
            None => (MethodScope::Static, spec),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MethodScope::Static => "static",
            MethodScope::Instance => "instance",
        }
    }
}

/// Caching options for one registered method.
#[derive(Clone, Debug)]
pub struct MethodOptions {
    template: Option<KeyTemplate>,
    ttl: Option<Duration>,
    single_flight: bool,
}

impl Default for MethodOptions {
    fn default() -> Self {
        Self {
            template: None,
            ttl: None,
            single_flight: true,
        }
    }
}

impl MethodOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the default template (`{_fn_}:%j{*}` for static methods,
    /// `{_fn_}#{_id_}:%j{*}` for instance methods).
    pub fn template(mut self, template: impl Into<KeyTemplate>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn single_flight(mut self, enabled: bool) -> Self {
        self.single_flight = enabled;
        self
    }
}

/// Cache state of an enabled method.
pub(crate) struct MethodCache {
    pub(crate) template: KeyTemplate,
    pub(crate) ttl: Option<Duration>,
    pub(crate) single_flight: bool,
}

pub(crate) struct MethodSlot<F> {
    pub(crate) qualified: String,
    pub(crate) func: F,
    pub(crate) cache: RwLock<Option<Arc<MethodCache>>>,
    #[cfg(feature = "stats")]
    pub(crate) stats: CacheStats,
}

impl<F> MethodSlot<F> {
    fn new(class: &str, name: &str, func: F) -> Self {
        Self {
            qualified: format!("{}.{}", class, name),
            func,
            cache: RwLock::new(None),
            #[cfg(feature = "stats")]
            stats: CacheStats::new(),
        }
    }

    pub(crate) fn cache(&self) -> Option<Arc<MethodCache>> {
        self.cache.read().clone()
    }
}

fn decode<A: DeserializeOwned>(args: Value) -> Result<A> {
    // `()` serializes to null, so an empty call deserializes back into unit
    Ok(serde_json::from_value(args)?)
}

/// Declaration of a class: its name and its static and instance methods.
///
/// Methods receive their arguments as one tuple `A` and return
/// `Result<R, E>`; `R` is stored as JSON and `E` surfaces as
/// [`CacheError::Upstream`].
pub struct Class<T> {
    name: String,
    statics: HashMap<String, StaticFn>,
    methods: HashMap<String, InstanceFn<T>>,
    context: Option<ContextFn<T>>,
}

impl<T> Class<T>
where
    T: Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            statics: HashMap::new(),
            methods: HashMap::new(),
            context: None,
        }
    }

    /// Declares a static method.
    pub fn static_method<A, R, E, F, Fut>(mut self, name: impl Into<String>, func: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        E: Into<BoxError> + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    {
        let erased: StaticFn = Arc::new(move |args: Value| match decode::<A>(args) {
            Ok(args) => {
                let fut = func(args);
                async move {
                    let value = fut.await.map_err(CacheError::upstream)?;
                    Ok(serde_json::to_value(value)?)
                }
                .boxed()
            }
            Err(err) => futures::future::ready(Err(err)).boxed(),
        });
        self.statics.insert(name.into(), erased);
        self
    }

    /// Declares an instance method. The instance is passed as `Arc<T>`.
    pub fn instance_method<A, R, E, F, Fut>(mut self, name: impl Into<String>, func: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        E: Into<BoxError> + Send + 'static,
        F: Fn(Arc<T>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    {
        let erased: InstanceFn<T> = Arc::new(move |this: Arc<T>, args: Value| {
            match decode::<A>(args) {
                Ok(args) => {
                    let fut = func(this, args);
                    async move {
                        let value = fut.await.map_err(CacheError::upstream)?;
                        Ok(serde_json::to_value(value)?)
                    }
                    .boxed()
                }
                Err(err) => futures::future::ready(Err(err)).boxed(),
            }
        });
        self.methods.insert(name.into(), erased);
        self
    }

    /// Exposes each instance to instance-method templates as the bound
    /// context (`{this.field}`). Return `None` to leave the context empty.
    pub fn context<C>(mut self, context: C) -> Self
    where
        C: Fn(&T) -> Option<Value> + Send + Sync + 'static,
    {
        self.context = Some(Arc::new(context));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T> Class<T>
where
    T: Serialize + Send + Sync + 'static,
{
    /// Uses the instance's own serialized form as the template context.
    pub fn serialized_context(self) -> Self {
        self.context(|this: &T| serde_json::to_value(this).ok())
    }
}

impl<T> fmt::Debug for Class<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("name", &self.name)
            .field("statics", &self.statics.keys().collect::<Vec<_>>())
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A registered class's method table.
pub(crate) struct ClassEntry<T> {
    pub(crate) name: String,
    pub(crate) statics: HashMap<String, MethodSlot<StaticFn>>,
    pub(crate) methods: HashMap<String, MethodSlot<InstanceFn<T>>>,
    pub(crate) context: Option<ContextFn<T>>,
}

impl<T> ClassEntry<T> {
    fn from_class(class: Class<T>) -> Self {
        let Class {
            name,
            statics,
            methods,
            context,
        } = class;

        Self {
            statics: statics
                .into_iter()
                .map(|(method, func)| {
                    let slot = MethodSlot::new(&name, &method, func);
                    (method, slot)
                })
                .collect(),
            methods: methods
                .into_iter()
                .map(|(method, func)| {
                    let slot = MethodSlot::new(&name, &method, func);
                    (method, slot)
                })
                .collect(),
            context,
            name,
        }
    }

    fn not_found(&self, scope: MethodScope, method: &str) -> CacheError {
        CacheError::NotFound {
            class: self.name.clone(),
            method: method.to_string(),
            scope: scope.as_str(),
        }
    }

    /// The cache slot of a method spec, as a lock over its cache state.
    fn cache_slot(&self, spec: &str) -> Result<&RwLock<Option<Arc<MethodCache>>>> {
        match MethodScope::parse(spec) {
            (MethodScope::Static, name) => self
                .statics
                .get(name)
                .map(|slot| &slot.cache)
                .ok_or_else(|| self.not_found(MethodScope::Static, name)),
            (MethodScope::Instance, name) => self
                .methods
                .get(name)
                .map(|slot| &slot.cache)
                .ok_or_else(|| self.not_found(MethodScope::Instance, name)),
        }
    }
}

struct Registered {
    name: String,
    entry: Arc<dyn Any + Send + Sync>,
}

/// Registered classes of one `Cacheable`, keyed by Rust type.
#[derive(Default)]
pub struct MethodRegistry {
    classes: RwLock<HashMap<TypeId, Registered>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `class`; fails with `DUPLICATE_REGISTRY` if `T` is already
    /// registered, leaving the existing registration untouched.
    pub(crate) fn register<T>(&self, class: Class<T>) -> Result<Arc<ClassEntry<T>>>
    where
        T: Send + Sync + 'static,
    {
        let mut classes = self.classes.write();
        if let Some(existing) = classes.get(&TypeId::of::<T>()) {
            return Err(CacheError::DuplicateRegistry {
                class: existing.name.clone(),
            });
        }

        let entry = Arc::new(ClassEntry::from_class(class));
        tracing::debug!(
            class = %entry.name,
            statics = entry.statics.len(),
            methods = entry.methods.len(),
            "registered class"
        );
        classes.insert(
            TypeId::of::<T>(),
            Registered {
                name: entry.name.clone(),
                entry: entry.clone(),
            },
        );
        Ok(entry)
    }

    pub(crate) fn lookup<T>(&self) -> Option<Arc<ClassEntry<T>>>
    where
        T: Send + Sync + 'static,
    {
        let classes = self.classes.read();
        let registered = classes.get(&TypeId::of::<T>())?;
        Arc::clone(&registered.entry).downcast::<ClassEntry<T>>().ok()
    }

    pub fn is_registered<T: 'static>(&self) -> bool {
        self.classes.read().contains_key(&TypeId::of::<T>())
    }

    /// Names of all registered classes, sorted.
    pub fn class_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .classes
            .read()
            .values()
            .map(|registered| registered.name.clone())
            .collect();
        names.sort();
        names
    }
}

impl fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodRegistry")
            .field("classes", &self.class_names())
            .finish()
    }
}

/// Handle to a registered class, returned by [`crate::Cacheable::register`].
///
/// Handles are cheap to clone; all clones share the same method table.
pub struct ClassHandle<T> {
    pub(crate) entry: Arc<ClassEntry<T>>,
    pub(crate) store: CacheStore,
    pub(crate) flight: Arc<SingleFlight>,
    pub(crate) instance_ids: Arc<AtomicU64>,
    pub(crate) silent: bool,
}

impl<T> Clone for ClassHandle<T> {
    fn clone(&self) -> Self {
        Self {
            entry: Arc::clone(&self.entry),
            store: self.store.clone(),
            flight: Arc::clone(&self.flight),
            instance_ids: Arc::clone(&self.instance_ids),
            silent: self.silent,
        }
    }
}

impl<T> fmt::Debug for ClassHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassHandle")
            .field("class", &self.entry.name)
            .finish_non_exhaustive()
    }
}

impl<T> ClassHandle<T>
where
    T: Send + Sync + 'static,
{
    pub fn name(&self) -> &str {
        &self.entry.name
    }

    /// Turns caching on for `spec` with default options. Enabling an already
    /// enabled method is a no-op.
    pub fn enable_cache(&self, spec: &str) -> Result<()> {
        self.enable_cache_with(spec, MethodOptions::default())
    }

    /// Turns caching on for `spec`. Enabling an already enabled method is a
    /// no-op, even if `options` differ; disable it first to reconfigure.
    ///
    /// An instance-method template without `{_id_}` gets `#{_id_}` appended,
    /// so instances never share entries and [`Instance::clear_cache`] stays
    /// scoped to one instance.
    pub fn enable_cache_with(&self, spec: &str, options: MethodOptions) -> Result<()> {
        let slot = self.entry.cache_slot(spec)?;
        let mut cache = slot.write();
        if cache.is_some() {
            return Ok(());
        }

        let template = match (MethodScope::parse(spec).0, options.template) {
            (MethodScope::Static, None) => template::DEFAULT_STATIC.clone(),
            (MethodScope::Instance, None) => template::DEFAULT_INSTANCE.clone(),
            (MethodScope::Static, Some(template)) => template,
            // instance keys must stay per instance
            (MethodScope::Instance, Some(template)) if !template.uses_instance_id() => {
                let scoped = KeyTemplate::parse(&format!("{}#{{_id_}}", template.source()));
                tracing::debug!(
                    class = %self.entry.name,
                    method = %spec,
                    template = %scoped.source(),
                    "instance template has no {{_id_}}, appending it"
                );
                scoped
            }
            (MethodScope::Instance, Some(template)) => template,
        };
        tracing::debug!(class = %self.entry.name, method = %spec, template = %template.source(), "enabled cache");

        *cache = Some(Arc::new(MethodCache {
            template,
            ttl: options.ttl,
            single_flight: options.single_flight,
        }));
        Ok(())
    }

    /// Routes `spec` back to the uncached method. Stored entries are left in
    /// place. Returns whether caching was enabled.
    pub fn disable_cache(&self, spec: &str) -> Result<bool> {
        let slot = self.entry.cache_slot(spec)?;
        let was_enabled = slot.write().take().is_some();
        if was_enabled {
            tracing::debug!(class = %self.entry.name, method = %spec, "disabled cache");
        }
        Ok(was_enabled)
    }

    /// Whether caching is enabled for `spec`; `false` for unknown methods.
    pub fn is_enabled(&self, spec: &str) -> bool {
        self.entry
            .cache_slot(spec)
            .map(|slot| slot.read().is_some())
            .unwrap_or(false)
    }

    /// Calls static method `name` with the argument tuple `args`.
    pub async fn call<R, A>(&self, name: &str, args: A) -> Result<R>
    where
        R: DeserializeOwned,
        A: Serialize,
    {
        let slot = self
            .entry
            .statics
            .get(name)
            .ok_or_else(|| self.entry.not_found(MethodScope::Static, name))?;
        let args = serde_json::to_value(&args)?;

        let value = match slot.cache() {
            None => (slot.func)(args).await?,
            Some(cache) => {
                let positional = positional(&args);
                let key = cache.template.render(
                    &RenderContext::new(&positional)
                        .function(&slot.qualified)
                        .silent(self.silent),
                );
                self.run_cached(&cache, &key, || (slot.func)(args), slot).await?
            }
        };
        Ok(serde_json::from_value(value)?)
    }

    pub(crate) async fn run_cached<F, S>(
        &self,
        cache: &MethodCache,
        key: &str,
        run: F,
        slot: &MethodSlot<S>,
    ) -> Result<Value>
    where
        F: FnOnce() -> MethodFuture,
    {
        let site = CallSite {
            store: &self.store,
            flight: cache.single_flight.then_some(&self.flight),
            key,
            ttl: cache.ttl,
            #[cfg(feature = "stats")]
            stats: &slot.stats,
        };
        #[cfg(not(feature = "stats"))]
        let _ = slot;
        cached_call(site, run, |_| true).await
    }

    /// Wraps `value` as an instance of this class with a fresh identifier.
    pub fn instance(&self, value: T) -> Instance<T> {
        self.instance_arc(Arc::new(value))
    }

    /// Like [`ClassHandle::instance`] for an already shared value.
    ///
    /// Generated identifiers have the form `#N`.
    pub fn instance_arc(&self, value: Arc<T>) -> Instance<T> {
        let id = self.instance_ids.fetch_add(1, Ordering::Relaxed) + 1;
        Instance::new(self.clone(), value, format!("#{}", id))
    }

    /// Wraps `value` under a caller-chosen identifier. Instances sharing an
    /// identifier share their instance-method cache entries.
    ///
    /// Identifiers starting with `#` are escaped with a second `#` so they
    /// never collide with generated ones; [`Instance::id`] returns the
    /// escaped form.
    pub fn instance_with_id(&self, value: T, id: impl Into<String>) -> Instance<T> {
        Instance::new(self.clone(), Arc::new(value), explicit_id(id.into()))
    }

    /// Snapshot of the counters of `spec`.
    #[cfg(feature = "stats")]
    pub fn stats(&self, spec: &str) -> Option<CacheStats> {
        match MethodScope::parse(spec) {
            (MethodScope::Static, name) => self.entry.statics.get(name).map(|s| s.stats.clone()),
            (MethodScope::Instance, name) => {
                self.entry.methods.get(name).map(|s| s.stats.clone())
            }
        }
    }
}

fn explicit_id(id: String) -> String {
    if id.starts_with('#') {
        format!("#{}", id)
    } else {
        id
    }
}
