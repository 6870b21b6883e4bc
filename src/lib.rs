//! # CacheMe
//!
//! Read-through memoization backed by a shared store, with lazy,
//! event-driven invalidation.
//!
//! ## Features
//!
//! - **Easy to use**: add `#[cacheme]` to a function to cache its results
//! - **Lazy invalidation**: data changes mark dependent entries stale; they
//!   are recomputed on their next read, never eagerly
//! - **Relation aware**: many-to-many changes invalidate both sides
//! - **Tags and patterns**: invalidate everything a computation cached, or
//!   every key matching a glob pattern
//! - **Shared state**: all bookkeeping lives in the store (in-memory or Redis)
//! - **Audited**: manual invalidations are recorded with who, what and when
//!
//! ## Quick Start
//!
//! Install an engine once at startup, then annotate functions:
//!
//! ```rust
//! use cacheme::{cacheme, CacheMe, ChangeKind, ChangeSource, EntityChange};
//!
//! #[cacheme(
//!     key = |c| format!("User:{}:name", c.text("id")),
//!     invalidation_keys = |c| format!("User:{}", c.text("id")),
//!     sources = [ChangeSource::entity("User")]
//! )]
//! fn user_name(id: u64) -> String {
//!     format!("user {id}")
//! }
//!
//! CacheMe::default().install().unwrap();
//!
//! // First call computes and stores the result
//! assert_eq!(user_name(1), "user 1");
//! // Second call is served from the store
//! assert_eq!(user_name(1), "user 1");
//!
//! // The user changed: the entry is recomputed on its next read
//! let change = EntityChange::new("User", "User:1", ChangeKind::Updated);
//! assert_eq!(cacheme::dispatch(&change).unwrap(), 1);
//! assert_eq!(user_name(1), "user 1");
//! ```
//!
//! ## Without the attribute
//!
//! ```rust
//! use cacheme::{CacheMe, CacheOptions, CallContext};
//!
//! let engine = CacheMe::default();
//! let square = engine
//!     .register(
//!         "square",
//!         CacheOptions::new(|c| format!("square:{}", c.text("n"))),
//!         |c: &CallContext| c.arg::<u64>("n").unwrap_or_default().pow(2),
//!     )
//!     .unwrap();
//!
//! assert_eq!(square.call(CallContext::new().with("n", &12)).unwrap(), 144);
//! ```
//!
//! ## Configuration
//!
//! [`CacheMeConfig::load`] layers built-in defaults, `cacheme.toml` and
//! `CACHEME_*` environment variables:
//!
//! ```rust,no_run
//! use cacheme::{CacheMe, CacheMeConfig};
//!
//! let config = CacheMeConfig::load()?;
//! CacheMe::from_config(config)?.install()?;
//! # Ok::<(), cacheme::CacheError>(())
//! ```

pub use cacheme_core::*;
pub use cacheme_macros::cacheme;

fn installed() -> Result<&'static CacheMe> {
    CacheMe::global().ok_or(CacheError::NotInstalled)
}

/// Reports a data change to the installed engine.
///
/// Every cache entry depending on the change is marked stale and recomputed
/// on its next read.
///
/// # Returns
///
/// The number of cache entries marked stale
///
/// # Errors
///
/// [`CacheError::NotInstalled`] when no engine was installed, or a store error.
pub fn dispatch(change: &EntityChange) -> Result<usize> {
    installed()?.dispatch(change)
}

/// Marks every entry depending on `trigger` stale.
///
/// # Examples
///
/// ```rust
/// use cacheme::CacheMe;
///
/// CacheMe::default().install().unwrap();
/// assert_eq!(cacheme::invalidate_key("User:1").unwrap(), 0);
/// ```
pub fn invalidate_key(trigger: &str) -> Result<usize> {
    installed()?.invalidate_key(trigger)
}

/// Marks every entry cached under `tag` stale.
///
/// # Examples
///
/// ```rust
/// use cacheme::{cacheme, CacheMe};
///
/// #[cacheme(tag = "user_data")]
/// fn user_data(id: u64) -> String {
///     format!("data {id}")
/// }
///
/// CacheMe::default().install().unwrap();
/// user_data(1);
/// user_data(2);
/// assert_eq!(cacheme::invalidate_tag("user_data").unwrap(), 2);
/// ```
pub fn invalidate_tag(tag: &str) -> Result<usize> {
    installed()?.invalidate_tag(tag)
}

/// Deletes every store key matching a glob `pattern`.
///
/// The pattern is matched against raw store keys, prefix included.
pub fn invalidate_pattern(pattern: &str) -> Result<usize> {
    installed()?.invalidate_pattern(pattern)
}

/// Executes and records a manual invalidation request.
pub fn submit(request: InvalidationRequest) -> Result<InvalidationRecord> {
    installed()?.submit(request)
}

/// Statistics snapshot of the computation registered under `tag`.
#[cfg(feature = "stats")]
pub fn stats(tag: &str) -> Option<CacheStats> {
    CacheMe::global().and_then(|engine| engine.registry().stats(tag))
}
