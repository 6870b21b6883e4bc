//! # Tag registry
//!
//! Process-wide index of every cached computation by its tag. The registry
//! itself only knows which tags exist; the keys written under each tag live in
//! the store (`{prefix}:tag:{tag}`), so tag invalidation reaches entries
//! written by other processes sharing the store.
//!
//! ```rust
//! use std::sync::Arc;
//! use cacheme_core::{KeyLayout, MemoryStore, Store, TagRegistry};
//!
//! let store = Arc::new(MemoryStore::new());
//! let registry = TagRegistry::new(store.clone(), KeyLayout::default());
//!
//! store.set_add("CM:tag:get_user", &["CMUser:1".to_string()]).unwrap();
//! assert_eq!(registry.invalidate_all("get_user").unwrap(), 1);
//! assert!(registry.all_keys("get_user").unwrap().is_empty());
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{CacheError, Result};
use crate::key_codec::KeyLayout;
use crate::store::Store;
#[cfg(feature = "stats")]
use crate::CacheStats;

/// Type-erased view of a registered cache policy.
pub trait TaggedPolicy: Send + Sync {
    /// Name of the wrapped computation.
    fn name(&self) -> &str;

    /// Tag the policy's keys are recorded under.
    fn tag(&self) -> &str;

    #[cfg(feature = "stats")]
    fn stats(&self) -> &CacheStats;
}

/// Registry of cache policies keyed by tag.
pub struct TagRegistry {
    store: Arc<dyn Store>,
    layout: KeyLayout,
    policies: RwLock<BTreeMap<String, Arc<dyn TaggedPolicy>>>,
}

impl TagRegistry {
    pub fn new(store: Arc<dyn Store>, layout: KeyLayout) -> Self {
        Self {
            store,
            layout,
            policies: RwLock::new(BTreeMap::new()),
        }
    }

    /// Registers `policy` under its tag.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::DuplicateTag`] when another policy already owns
    /// the tag. Two computations sharing a tag would make tag invalidation
    /// ambiguous.
    pub fn register(&self, policy: Arc<dyn TaggedPolicy>) -> Result<()> {
        let mut policies = self.policies.write();
        let tag = policy.tag().to_string();
        if policies.contains_key(&tag) {
            return Err(CacheError::DuplicateTag(tag));
        }
        tracing::debug!(tag = %tag, name = policy.name(), "registered cache policy");
        policies.insert(tag, policy);
        Ok(())
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.policies.read().contains_key(tag)
    }

    pub fn get(&self, tag: &str) -> Option<Arc<dyn TaggedPolicy>> {
        self.policies.read().get(tag).cloned()
    }

    /// Every registered tag, sorted.
    pub fn list_tags(&self) -> Vec<String> {
        self.policies.read().keys().cloned().collect()
    }

    /// Cache keys written under `tag` and not yet invalidated.
    pub fn all_keys(&self, tag: &str) -> Result<BTreeSet<String>> {
        Ok(self.store.set_members(&self.layout.tag_set(tag))?)
    }

    /// Marks every key written under `tag` stale and forgets them.
    ///
    /// The tag key-set is moved into the pending-delete set in one atomic
    /// store operation. Keys written after this call start a fresh key-set.
    /// Works for tags registered by other processes as well.
    pub fn invalidate_all(&self, tag: &str) -> Result<usize> {
        let marked = self
            .store
            .set_drain_into(&self.layout.tag_set(tag), &self.layout.pending_set())?;
        tracing::info!(tag, marked, "invalidated cache tag");
        Ok(marked)
    }

    /// Snapshot of the statistics of the policy registered under `tag`.
    #[cfg(feature = "stats")]
    pub fn stats(&self, tag: &str) -> Option<CacheStats> {
        self.policies.read().get(tag).map(|policy| policy.stats().clone())
    }

    /// Resets the statistics of the policy registered under `tag`.
    ///
    /// Returns `false` when the tag is unknown.
    #[cfg(feature = "stats")]
    pub fn reset_stats(&self, tag: &str) -> bool {
        match self.policies.read().get(tag) {
            Some(policy) => {
                policy.stats().reset();
                true
            }
            None => false,
        }
    }
}
