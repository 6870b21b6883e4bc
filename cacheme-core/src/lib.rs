//! # CacheMe Core
//!
//! Store-backed read-through memoization with lazy, event-driven
//! invalidation.
//!
//! A cached computation stores its result under a key built from its
//! arguments. Changes to the underlying data never delete cached values
//! directly: they mark every dependent key as *pending deletion*, and the next
//! read of such a key recomputes it. All coordination state lives in the
//! store, so several processes sharing one store see each other's
//! invalidations.
//!
//! ## Module Organization
//!
//! - [`key_codec`] - splits cache keys into `(bucket, field)` storage addresses
//! - [`store`] - the associative store contract, in-memory and Redis backends
//! - [`policy`] - cache policies and the invocation pipeline
//! - [`invalidation`] - trigger-key index and pending-delete set
//! - [`registry`] - policies by tag, tag-wide invalidation
//! - [`pattern`] - bulk deletion by key pattern
//! - [`events`] - entity and relation change dispatch
//! - [`manual`] - administrative invalidation with an audit trail
//! - [`engine`] - the [`CacheMe`] engine tying everything together
//!
//! ## Example
//!
//! ```rust
//! use cacheme_core::{
//!     CacheMe, CacheOptions, CallContext, ChangeKind, ChangeSource, EntityChange,
//! };
//!
//! let engine = CacheMe::default();
//! let books = engine
//!     .register(
//!         "user_books",
//!         CacheOptions::new(|ctx| format!("User:{}:books", ctx.text("user")))
//!             .invalidation_keys(|ctx| format!("User:{}", ctx.text("user")))
//!             .sources([ChangeSource::entity("User")]),
//!         |ctx: &CallContext| vec![format!("book of {}", ctx.text("user"))],
//!     )
//!     .unwrap();
//!
//! let ctx = CallContext::new().with("user", &1);
//! books.call(ctx.clone()).unwrap();
//!
//! // The user changed: the cached list is recomputed on its next read
//! let change = EntityChange::new("User", "User:1", ChangeKind::Updated);
//! assert_eq!(engine.dispatch(&change).unwrap(), 1);
//! assert!(engine.index().is_pending("CMUser:1:books").unwrap());
//! books.call(ctx).unwrap();
//! assert!(!engine.index().is_pending("CMUser:1:books").unwrap());
//! ```
mod context;
mod error;
mod trigger;

pub mod config;
pub mod engine;
pub mod events;
pub mod invalidation;
pub mod key_codec;
pub mod manual;
pub mod pattern;
pub mod policy;
pub mod registry;
pub mod store;

#[cfg(feature = "stats")]
mod stats;

pub use config::{CacheMeConfig, StoreErrorPolicy};
pub use context::CallContext;
pub use engine::CacheMe;
pub use error::{CacheError, Result, StoreError, StoreResult};
pub use events::{
    CacheEntity, ChangeDispatcher, ChangeKind, ChangeSource, EntityChange, RelationChange,
    RelationSource,
};
pub use invalidation::InvalidationIndex;
pub use key_codec::KeyLayout;
pub use manual::{InvalidationRecord, InvalidationRequest, ManualInvalidator};
pub use pattern::PatternInvalidator;
pub use policy::{CacheOptions, CachePolicy, Memoized, Skip};
pub use registry::{TagRegistry, TaggedPolicy};
pub use store::{MemoryStore, ScanCursor, ScanPage, Store};
pub use trigger::TriggerKeys;

#[cfg(feature = "redis")]
pub use store::RedisStore;

#[cfg(feature = "stats")]
pub use stats::CacheStats;

/// Support code for the `#[cacheme]` attribute. Not public API.
#[doc(hidden)]
pub mod __private {
    use std::sync::Arc;

    use serde::de::DeserializeOwned;
    use serde::Serialize;

    use crate::{CacheMe, CacheOptions, CachePolicy, CallContext};

    pub use once_cell::sync::OnceCell;

    /// Per-function slot holding the lazily registered policy. `None` records
    /// a failed registration so it is not retried on every call.
    pub type PolicyCell<R> = OnceCell<Option<Arc<CachePolicy<R>>>>;

    /// Runs `compute` through the installed engine, registering the policy on
    /// first use. Without an installed engine the computation runs directly.
    ///
    /// A registration failure, such as a tag already claimed by another
    /// function of the same name, is logged once and leaves the function
    /// uncached for the life of the process.
    pub fn run_cached<R, O, F>(
        cell: &PolicyCell<R>,
        name: &str,
        options: O,
        ctx: CallContext,
        compute: F,
    ) -> R
    where
        R: Serialize + DeserializeOwned + 'static,
        O: FnOnce() -> CacheOptions<R>,
        F: FnOnce(&CallContext) -> R,
    {
        let Some(engine) = CacheMe::global() else {
            return compute(&ctx);
        };
        let policy = cell.get_or_init(|| match options().build(engine, name) {
            Ok(policy) => Some(policy),
            Err(err) => {
                tracing::error!(name, error = %err, "cache registration failed, calls run uncached");
                None
            }
        });
        match policy {
            Some(policy) => policy.get_or_compute(ctx, compute),
            None => compute(&ctx),
        }
    }
}
