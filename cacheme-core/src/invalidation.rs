//! # Cache Invalidation
//!
//! Lazy, event-driven invalidation backed by the store.
//!
//! Two structures cooperate:
//!
//! - **Invalidation index**: for every domain trigger key, the set of cache
//!   keys whose value depends on it (`{prefix}{trigger}:invalid`).
//! - **Pending-delete set**: cache keys marked stale but not yet recomputed
//!   (`{prefix}:delete`). Membership means "the next read must recompute";
//!   absence means the stored value, if any, is authoritative.
//!
//! Firing a trigger only copies its dependents into the pending-delete set.
//! Nothing is deleted; the next read of each key clears the marker with an
//! atomic test-and-remove and recomputes.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use cacheme_core::{InvalidationIndex, KeyLayout, MemoryStore};
//!
//! let store = Arc::new(MemoryStore::new());
//! let index = InvalidationIndex::new(store, KeyLayout::default());
//!
//! index.link("User:1", "CMprofile:1").unwrap();
//! assert_eq!(index.fire("User:1").unwrap(), 1);
//!
//! // The marker is consumed by exactly one reader
//! assert!(index.take_pending("CMprofile:1").unwrap());
//! assert!(!index.take_pending("CMprofile:1").unwrap());
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::key_codec::KeyLayout;
use crate::store::Store;

/// Reverse index from trigger keys to dependent cache keys, plus the
/// pending-delete set it feeds.
///
/// Cheap to clone; clones share the same store.
#[derive(Clone)]
pub struct InvalidationIndex {
    store: Arc<dyn Store>,
    layout: KeyLayout,
    /// Expiry refreshed on an `:invalid` set every time a key is linked into it.
    entry_ttl: Option<Duration>,
}

impl InvalidationIndex {
    pub fn new(store: Arc<dyn Store>, layout: KeyLayout) -> Self {
        Self {
            store,
            layout,
            entry_ttl: None,
        }
    }

    /// Bounds index growth: an `:invalid` set that is not linked into for
    /// `ttl` disappears.
    ///
    /// A cache key whose value outlives the expiry of its trigger set can no
    /// longer be invalidated through that trigger, so `ttl` should exceed the
    /// TTL of every policy linking into the index.
    pub fn with_entry_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.entry_ttl = ttl;
        self
    }

    pub fn layout(&self) -> &KeyLayout {
        &self.layout
    }

    /// Registers `cache_key` as dependent on `trigger`. Idempotent.
    pub fn link(&self, trigger: &str, cache_key: &str) -> Result<()> {
        let set = self.layout.invalid_set(trigger);
        self.store.set_add(&set, &[cache_key.to_string()])?;
        if let Some(ttl) = self.entry_ttl {
            self.store.expire(&set, ttl)?;
        }
        Ok(())
    }

    /// Registers `cache_key` under every trigger in `triggers`.
    pub fn link_all(&self, triggers: &BTreeSet<String>, cache_key: &str) -> Result<()> {
        for trigger in triggers {
            self.link(trigger, cache_key)?;
        }
        Ok(())
    }

    /// Cache keys currently registered under `trigger`.
    pub fn dependents(&self, trigger: &str) -> Result<BTreeSet<String>> {
        Ok(self.store.set_members(&self.layout.invalid_set(trigger))?)
    }

    /// Marks every dependent of `trigger` stale.
    ///
    /// The `:invalid` set itself is left untouched so later changes keep
    /// invalidating the same dependents. Returns the number of dependents.
    pub fn fire(&self, trigger: &str) -> Result<usize> {
        let dependents = self.dependents(trigger)?;
        let count = self.mark_stale(dependents)?;
        tracing::debug!(trigger, count, "fired invalidation trigger");
        Ok(count)
    }

    /// Fires several triggers with a single write to the pending-delete set.
    pub fn fire_all<'a, I>(&self, triggers: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut dependents = BTreeSet::new();
        for trigger in triggers {
            dependents.extend(self.dependents(trigger)?);
        }
        let count = self.mark_stale(dependents)?;
        tracing::debug!(count, "fired invalidation triggers");
        Ok(count)
    }

    /// Adds cache keys to the pending-delete set in one bulk operation.
    pub fn mark_stale(&self, keys: impl IntoIterator<Item = String>) -> Result<usize> {
        let keys: Vec<String> = keys.into_iter().collect();
        if keys.is_empty() {
            return Ok(0);
        }
        self.store.set_add(&self.layout.pending_set(), &keys)?;
        Ok(keys.len())
    }

    /// Atomically tests whether `cache_key` is pending and clears the marker.
    pub fn take_pending(&self, cache_key: &str) -> Result<bool> {
        Ok(self
            .store
            .set_remove(&self.layout.pending_set(), cache_key)?)
    }

    /// Whether `cache_key` is pending, without clearing the marker.
    pub fn is_pending(&self, cache_key: &str) -> Result<bool> {
        Ok(self
            .store
            .set_members(&self.layout.pending_set())?
            .contains(cache_key))
    }

    /// Every key currently pending.
    pub fn pending(&self) -> Result<BTreeSet<String>> {
        Ok(self.store.set_members(&self.layout.pending_set())?)
    }
}
