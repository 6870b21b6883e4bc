//! Error types for the cacheme engine.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Result type alias for [`Store`](crate::Store) primitives.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Failures raised by an associative store backend.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backend could not be reached or refused the command.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A command was issued against a key holding another kind of value.
    #[error("key `{key}` holds a {found}, expected a {expected}")]
    WrongType {
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    /// A scan pattern could not be compiled.
    #[error("invalid key pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// A scan was resumed with a cursor the backend did not issue.
    #[error("invalid scan cursor `{0}`")]
    InvalidCursor(String),

    /// Error reported by the Redis client.
    #[cfg(feature = "redis")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Errors surfaced by the caching engine.
#[derive(Error, Debug)]
pub enum CacheError {
    /// A store primitive failed. Transient; the call may be retried.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Two computations were registered under the same tag.
    #[error("tag `{0}` is already registered")]
    DuplicateTag(String),

    /// A tag named in a request was never registered.
    #[error("unknown tag `{0}`")]
    UnknownTag(String),

    /// A computed value could not be serialized for storage.
    #[error("failed to encode value for `{key}`: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// A manual invalidation request was rejected.
    #[error("invalid invalidation request: {0}")]
    InvalidRequest(String),

    /// `CacheMe::install` was called twice.
    #[error("a global cache engine is already installed")]
    AlreadyInstalled,

    /// A global helper was used before `CacheMe::install`.
    #[error("no global cache engine has been installed")]
    NotInstalled,

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] Box<figment::Error>),
}

impl CacheError {
    /// Whether the error came from the store and may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, CacheError::Store(_))
    }
}
