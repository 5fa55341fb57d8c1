//! # Cacheable
//!
//! Memoization for async functions and registered methods over a pluggable
//! cache client.
//!
//! ## Features
//!
//! - **Bring your own store**: anything implementing [`CacheClient`] works; an
//!   in-memory [`MemoryClient`] is included
//! - **Templated keys**: `"user:{0}"`, `"{this.region}:{id}"`, `"{_fn_}:%j{0}"`
//! - **Result-aware**: only `Ok` values are stored, errors pass through untouched
//! - **Single-flight**: concurrent misses on one key run the function once
//! - **Method registry**: switch caching on and off per method of a registered
//!   class without changing call sites
//! - **Instance invalidation**: drop everything one instance cached, and nothing else
//!
//! ## Quick Start
//!
//! ```rust
//! use cacheable::{Cacheable, MemoryClient};
//! use std::convert::Infallible;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! static CALLS: AtomicUsize = AtomicUsize::new(0);
//!
//! # tokio_test_block(async {
//! let cache = Cacheable::new(MemoryClient::new());
//! let square = cache.wrap("square", |(n,): (u64,)| async move {
//!     CALLS.fetch_add(1, Ordering::SeqCst);
//!     Ok::<_, Infallible>(n * n)
//! });
//!
//! assert_eq!(square.call((12,)).await.unwrap(), 144);
//! assert_eq!(square.call((12,)).await.unwrap(), 144);
//! assert_eq!(CALLS.load(Ordering::SeqCst), 1);
//!
//! // default template is `{_fn_}:%j{0}`
//! assert_eq!(cache.get("square:12").await.unwrap(), Some(144.into()));
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```
//!
//! ## Classes
//!
//! ```rust
//! use cacheable::{Cacheable, Class, MemoryClient};
//! use std::convert::Infallible;
//! use std::sync::Arc;
//!
//! struct User {
//!     id: u64,
//! }
//!
//! # tokio_test_block(async {
//! let cache = Cacheable::new(MemoryClient::new());
//! let users = cache
//!     .register(
//!         Class::<User>::new("User")
//!             .static_method("name_of", |(id,): (u64,)| async move {
//!                 Ok::<_, Infallible>(format!("user-{}", id))
//!             })
//!             .instance_method("article_ids", |this: Arc<User>, (): ()| async move {
//!                 Ok::<_, Infallible>(vec![this.id, 2, 3])
//!             }),
//!     )
//!     .unwrap();
//!
//! users.enable_cache("name_of").unwrap();
//! users.enable_cache(".article_ids").unwrap();
//!
//! let name: String = users.call("name_of", (1u64,)).await.unwrap();
//! assert_eq!(name, "user-1");
//!
//! let user = users.instance(User { id: 1 });
//! let ids: Vec<u64> = user.call("article_ids", ()).await.unwrap();
//! assert_eq!(ids, vec![1, 2, 3]);
//!
//! // forget only what this instance cached
//! user.clear_cache().await.unwrap();
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

pub use cacheable_core::*;

/// Renders `template` with positional `args` and no context.
///
/// Shorthand for [`cacheable_core::render`] when there is nothing to bind.
///
/// # Examples
///
/// ```rust
/// use serde_json::json;
///
/// assert_eq!(cacheable::render_args("foor-{0}-{1}", &[json!(2), json!(5)]), "foor-2-5");
/// ```
pub fn render_args(template: &str, args: &[serde_json::Value]) -> String {
    cacheable_core::render(template, args, None)
}

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        CacheClient, CacheError, Cacheable, CacheableOptions, CachedFn, Class, ClassHandle,
        ErrorCode, Instance, MemoryClient, MethodOptions, WrapOptions,
    };
}
