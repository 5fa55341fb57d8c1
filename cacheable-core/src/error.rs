use std::fmt;

/// Boxed error type used for failures coming out of registered methods and
/// cache clients, whose concrete error types are not known to this crate.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Machine-readable error code carried by every [`CacheError`].
///
/// # Examples
///
/// ```
/// use cacheable_core::ErrorCode;
///
/// assert_eq!(ErrorCode::DuplicateRegistry.as_str(), "DUPLICATE_REGISTRY");
/// assert_eq!(ErrorCode::NotFound.to_string(), "NOT_FOUND");
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Configuration,
    DuplicateRegistry,
    NotFound,
    Client,
    Serialization,
    Upstream,
}

impl ErrorCode {
    /// Returns the wire form of the code, e.g. `"DUPLICATE_REGISTRY"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Configuration => "CONFIGURATION",
            ErrorCode::DuplicateRegistry => "DUPLICATE_REGISTRY",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Client => "CLIENT",
            ErrorCode::Serialization => "SERIALIZATION",
            ErrorCode::Upstream => "UPSTREAM",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by the cache layer.
///
/// Construction and registration failures are programmer errors and are
/// returned synchronously. Runtime failures of a call travel through the
/// `Result` of that call.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The cache was built without a required option (the client).
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The same class was registered twice on one `Cacheable`.
    #[error("class `{class}` is already registered")]
    DuplicateRegistry { class: String },

    /// A method name that the class does not declare.
    #[error("`{class}` has no {scope} method `{method}`")]
    NotFound {
        class: String,
        method: String,
        scope: &'static str,
    },

    /// The backing client failed.
    #[error("cache client error: {0}")]
    Client(#[source] BoxError),

    /// Arguments or results could not be converted to or from JSON.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A registered method reported an error. Never cached.
    #[error("method failed: {0}")]
    Upstream(#[source] BoxError),
}

impl CacheError {
    /// Returns the machine-readable code of this error.
    ///
    /// # Examples
    ///
    /// ```
    /// use cacheable_core::{CacheError, ErrorCode};
    ///
    /// let err = CacheError::DuplicateRegistry { class: "User".into() };
    /// assert_eq!(err.code(), ErrorCode::DuplicateRegistry);
    /// assert_eq!(err.code().as_str(), "DUPLICATE_REGISTRY");
    /// ```
    pub fn code(&self) -> ErrorCode {
        match self {
            CacheError::Configuration(_) => ErrorCode::Configuration,
            CacheError::DuplicateRegistry { .. } => ErrorCode::DuplicateRegistry,
            CacheError::NotFound { .. } => ErrorCode::NotFound,
            CacheError::Client(_) => ErrorCode::Client,
            CacheError::Serialization(_) => ErrorCode::Serialization,
            CacheError::Upstream(_) => ErrorCode::Upstream,
        }
    }

    /// Wraps any client-side failure.
    pub fn client<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        CacheError::Client(err.into())
    }

    /// Wraps a failure reported by a registered method.
    pub fn upstream<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        CacheError::Upstream(err.into())
    }

    /// Returns the upstream error as `E` if this is an upstream failure of
    /// that type.
    pub fn upstream_ref<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        match self {
            CacheError::Upstream(inner) => inner.downcast_ref::<E>(),
            _ => None,
        }
    }
}
