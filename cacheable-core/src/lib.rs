//! # Cacheable Core
//!
//! Building blocks of the `cacheable` memoization layer.
//!
//! A [`Cacheable`] wraps a caller-supplied [`CacheClient`] and offers two ways
//! to cache async functions:
//!
//! - [`Cacheable::wrap`] turns a single async function into a [`CachedFn`]
//! - [`Cacheable::register`] takes a [`Class`], an explicit table of static and
//!   instance methods, whose methods can then be switched to cached execution
//!   one by one
//!
//! Keys come from [`template`] strings such as `"user:{0}"` or
//! `"{_fn_}:%j{0}"`, and are namespaced by the cache prefix before reaching
//! the client.
//!
//! ## Module Organization
//!
//! - [`template`] - key template parsing and rendering
//! - [`client`] - the client trait and the in-memory client
//! - `store` - prefixing adapter over a client
//! - `wrap` - cached functions and the shared hit/miss/store routine
//! - `single_flight` - coalescing of concurrent misses on one key
//! - [`registry`] - classes, method tables and cache enablement
//! - `instance` - per-instance key index and invalidation
//!
mod cache_entry;
mod cacheable;
mod error;
mod instance;
mod options;
mod single_flight;
mod store;
mod wrap;

pub mod client;
pub mod registry;
pub mod template;

#[cfg(feature = "stats")]
mod stats;

pub use cache_entry::CacheEntry;
pub use cacheable::{Cacheable, CacheableBuilder};
pub use client::{CacheClient, MemoryClient};
pub use error::{BoxError, CacheError, ErrorCode, Result};
pub use instance::Instance;
pub use options::{CacheableOptions, DEFAULT_PREFIX};
pub use registry::{Class, ClassHandle, MethodOptions, MethodRegistry, MethodScope};
pub use store::CacheStore;
pub use template::{render, KeyTemplate, RenderContext, DEFAULT_TEMPLATE};
pub use wrap::{CachedFn, WrapOptions};

#[cfg(feature = "stats")]
pub use stats::CacheStats;
