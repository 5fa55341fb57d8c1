//! Options of a `Cacheable`.
//!
//! Loadable from any serde format; the builder on [`crate::Cacheable`]
//! covers the same settings in code.

use serde::Deserialize;

/// Prefix applied to every key when none is configured.
pub const DEFAULT_PREFIX: &str = "cached:";

/// Options of a [`crate::Cacheable`].
///
/// Deserializable so it can live in an application's config file; missing
/// fields take their defaults.
///
/// # Examples
///
/// ```
/// use cacheable_core::CacheableOptions;
///
/// let options = CacheableOptions::default();
/// assert_eq!(options.prefix, "cached:");
/// assert!(options.silent);
///
/// let options: CacheableOptions = serde_json::from_str(r#"{ "prefix": "app:" }"#).unwrap();
/// assert_eq!(options.prefix, "app:");
/// assert!(options.silent);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheableOptions {
    /// Namespace prepended to every key sent to the client.
    pub prefix: String,
    /// Suppresses warnings about unresolved template placeholders.
    pub silent: bool,
}

impl Default for CacheableOptions {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            silent: true,
        }
    }
}

impl CacheableOptions {
    /// Sets the key namespace.
    ///
    /// # Arguments
    ///
    /// * `prefix` - Prepended to every logical key; may be empty
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Sets whether unresolved template placeholders are logged.
    ///
    /// # Arguments
    ///
    /// * `silent` - `false` emits a `tracing` warning per unresolved
    ///   placeholder
    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }
}
