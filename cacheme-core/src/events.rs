//! # Change events
//!
//! The data layer reports mutations as [`EntityChange`] values; the
//! [`ChangeDispatcher`] translates them into trigger keys and fires them on
//! the [`InvalidationIndex`].
//!
//! Only sources some cache policy subscribed to are acted upon. A policy
//! subscribes through the `sources` option when it is registered.
//!
//! Relation changes (many-to-many links added, removed or cleared) invalidate
//! both sides of the relation:
//!
//! - the changed entity's keys with the relation suffix appended
//!   (`"Book:1" + ":" + "members"`)
//! - the keys of every related entity, derived from its id
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use cacheme_core::{
//!     ChangeDispatcher, ChangeKind, ChangeSource, EntityChange, InvalidationIndex,
//!     KeyLayout, MemoryStore,
//! };
//!
//! let store = Arc::new(MemoryStore::new());
//! let index = InvalidationIndex::new(store, KeyLayout::default());
//! let dispatcher = ChangeDispatcher::new(index.clone());
//!
//! dispatcher.subscribe(&ChangeSource::entity("User"));
//! index.link("User:1", "CMprofile:1").unwrap();
//!
//! let change = EntityChange::new("User", "User:1", ChangeKind::Updated);
//! assert_eq!(dispatcher.dispatch(&change).unwrap(), 1);
//! ```

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Result;
use crate::invalidation::InvalidationIndex;
use crate::trigger::TriggerKeys;

/// Derives the trigger keys of a related entity from its id.
pub type RelatedKeysFn = Arc<dyn Fn(&str) -> TriggerKeys + Send + Sync>;

/// What happened to an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
    RelationAdded,
    RelationRemoved,
    RelationCleared,
}

impl ChangeKind {
    pub fn is_relation(self) -> bool {
        matches!(
            self,
            ChangeKind::RelationAdded | ChangeKind::RelationRemoved | ChangeKind::RelationCleared
        )
    }
}

/// Domain types that know their own trigger keys.
///
/// ```
/// use cacheme_core::{CacheEntity, ChangeKind, EntityChange, TriggerKeys};
///
/// struct Book {
///     id: u64,
/// }
///
/// impl CacheEntity for Book {
///     fn entity_name(&self) -> &str {
///         "Book"
///     }
///
///     fn cache_keys(&self) -> TriggerKeys {
///         format!("Book:{}", self.id).into()
///     }
/// }
///
/// let change = EntityChange::of(&Book { id: 3 }, ChangeKind::Deleted);
/// assert_eq!(change.entity, "Book");
/// ```
pub trait CacheEntity {
    fn entity_name(&self) -> &str;

    fn cache_keys(&self) -> TriggerKeys;
}

/// Ids on the other side of a changed relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationChange {
    /// Name of the relation source the change belongs to.
    pub relation: String,
    pub related_ids: Vec<String>,
}

/// A mutation reported by the data layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityChange {
    pub entity: String,
    /// Trigger keys of the changed entity.
    pub keys: TriggerKeys,
    pub kind: ChangeKind,
    pub relation: Option<RelationChange>,
}

impl EntityChange {
    pub fn new(entity: impl Into<String>, keys: impl Into<TriggerKeys>, kind: ChangeKind) -> Self {
        Self {
            entity: entity.into(),
            keys: keys.into(),
            kind,
            relation: None,
        }
    }

    /// Change of a [`CacheEntity`].
    pub fn of<E: CacheEntity + ?Sized>(entity: &E, kind: ChangeKind) -> Self {
        Self::new(entity.entity_name(), entity.cache_keys(), kind)
    }

    /// Attaches the relation that changed and the ids on its other side.
    pub fn with_relation<I, S>(mut self, relation: impl Into<String>, related_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        self.relation = Some(RelationChange {
            relation: relation.into(),
            related_ids: related_ids.into_iter().map(|id| id.to_string()).collect(),
        });
        self
    }
}

/// A many-to-many relation whose changes invalidate caches.
#[derive(Clone)]
pub struct RelationSource {
    name: String,
    suffix: Option<String>,
    related_keys: Option<RelatedKeysFn>,
}

impl RelationSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            suffix: None,
            related_keys: None,
        }
    }

    /// Suffix appended to the changed entity's keys, so caches can depend on
    /// one side of a relation without depending on the whole entity.
    pub fn suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }

    /// Derives the trigger keys of the other side from each related id.
    pub fn related_keys<F, K>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> K + Send + Sync + 'static,
        K: Into<TriggerKeys>,
    {
        self.related_keys = Some(Arc::new(move |id: &str| f(id).into()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for RelationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationSource")
            .field("name", &self.name)
            .field("suffix", &self.suffix)
            .field("related_keys", &self.related_keys.is_some())
            .finish()
    }
}

/// Something whose changes a cache policy wants to hear about.
#[derive(Debug, Clone)]
pub enum ChangeSource {
    Entity(String),
    Relation(RelationSource),
}

impl ChangeSource {
    pub fn entity(name: impl Into<String>) -> Self {
        ChangeSource::Entity(name.into())
    }

    pub fn relation(source: RelationSource) -> Self {
        ChangeSource::Relation(source)
    }

    pub fn name(&self) -> &str {
        match self {
            ChangeSource::Entity(name) => name,
            ChangeSource::Relation(source) => source.name(),
        }
    }
}

/// Routes entity changes to the invalidation index.
pub struct ChangeDispatcher {
    index: InvalidationIndex,
    entities: RwLock<HashSet<String>>,
    relations: RwLock<HashMap<String, RelationSource>>,
}

impl ChangeDispatcher {
    pub fn new(index: InvalidationIndex) -> Self {
        Self {
            index,
            entities: RwLock::new(HashSet::new()),
            relations: RwLock::new(HashMap::new()),
        }
    }

    /// Starts listening to `source`. Subscribing twice is harmless; a relation
    /// subscribed again replaces its earlier definition.
    pub fn subscribe(&self, source: &ChangeSource) {
        match source {
            ChangeSource::Entity(name) => {
                self.entities.write().insert(name.clone());
            }
            ChangeSource::Relation(relation) => {
                self.relations
                    .write()
                    .insert(relation.name.clone(), relation.clone());
            }
        }
    }

    pub fn is_subscribed(&self, source: &str) -> bool {
        self.entities.read().contains(source) || self.relations.read().contains_key(source)
    }

    /// Trigger keys a change resolves to, or `None` when nobody subscribed to
    /// its source.
    pub fn trigger_keys(&self, change: &EntityChange) -> Option<BTreeSet<String>> {
        match &change.relation {
            None => self
                .entities
                .read()
                .contains(&change.entity)
                .then(|| change.keys.clone().flatten()),
            Some(relation) => {
                let relations = self.relations.read();
                let source = relations.get(&relation.relation)?;
                let own = match &source.suffix {
                    Some(suffix) => change.keys.clone().with_suffix(suffix),
                    None => change.keys.clone(),
                };
                let mut keys = own.flatten();
                if let Some(related_keys) = &source.related_keys {
                    for id in &relation.related_ids {
                        keys.extend(related_keys(id).flatten());
                    }
                }
                Some(keys)
            }
        }
    }

    /// Fires the trigger keys of `change`, returning how many cache keys were
    /// marked stale.
    pub fn dispatch(&self, change: &EntityChange) -> Result<usize> {
        match self.trigger_keys(change) {
            Some(keys) => self.index.fire_all(&keys),
            None => {
                tracing::debug!(
                    entity = %change.entity,
                    kind = ?change.kind,
                    "ignoring change from unsubscribed source"
                );
                Ok(0)
            }
        }
    }
}
