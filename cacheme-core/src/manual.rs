//! # Manual invalidation
//!
//! Administrative entry point: an operator names a key pattern and,
//! optionally, tags to invalidate. Every accepted request is persisted as an
//! [`InvalidationRecord`] in the store so there is an audit trail of who
//! invalidated what.
//!
//! Pattern matches are deleted immediately; tagged keys are marked stale and
//! recomputed on their next read.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CacheError, Result};
use crate::key_codec::KeyLayout;
use crate::pattern::PatternInvalidator;
use crate::registry::TagRegistry;
use crate::store::Store;

/// A request to invalidate cache entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationRequest {
    pub user: String,
    /// Glob pattern matched against raw store keys.
    pub pattern: String,
    /// Tags whose keys are marked stale.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl InvalidationRequest {
    pub fn new(user: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            pattern: pattern.into(),
            tags: Vec::new(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }
}

/// Audit entry written for every executed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationRecord {
    pub id: Uuid,
    pub user: String,
    pub pattern: String,
    pub tags: Vec<String>,
    pub created: DateTime<Utc>,
    /// Keys deleted by the pattern.
    pub deleted: usize,
    /// Keys marked stale through the tags.
    pub marked: usize,
}

/// Executes and records manual invalidation requests.
#[derive(Clone)]
pub struct ManualInvalidator {
    store: Arc<dyn Store>,
    layout: KeyLayout,
    registry: Arc<TagRegistry>,
    patterns: PatternInvalidator,
}

impl ManualInvalidator {
    pub fn new(
        store: Arc<dyn Store>,
        layout: KeyLayout,
        registry: Arc<TagRegistry>,
        patterns: PatternInvalidator,
    ) -> Self {
        Self {
            store,
            layout,
            registry,
            patterns,
        }
    }

    /// Tags an operator may pick from.
    pub fn choices(&self) -> Vec<String> {
        self.registry.list_tags()
    }

    /// Validates and executes `request`, then records it.
    ///
    /// # Errors
    ///
    /// - [`CacheError::InvalidRequest`] for an empty pattern
    /// - [`CacheError::UnknownTag`] when a tag was never registered
    /// - [`CacheError::Store`] when the store fails; work done before the
    ///   failure is not rolled back and no record is written
    pub fn submit(&self, request: InvalidationRequest) -> Result<InvalidationRecord> {
        if request.pattern.trim().is_empty() {
            return Err(CacheError::InvalidRequest(
                "pattern must not be empty".to_string(),
            ));
        }
        if let Some(unknown) = request
            .tags
            .iter()
            .find(|tag| !self.registry.contains(tag))
        {
            return Err(CacheError::UnknownTag(unknown.clone()));
        }

        let deleted = self.patterns.invalidate(&request.pattern)?;
        let mut marked = 0;
        for tag in &request.tags {
            marked += self.registry.invalidate_all(tag)?;
        }

        let record = InvalidationRecord {
            id: Uuid::new_v4(),
            user: request.user,
            pattern: request.pattern,
            tags: request.tags,
            created: Utc::now(),
            deleted,
            marked,
        };
        let bytes = serde_json::to_vec(&record).map_err(|source| CacheError::Encode {
            key: self.layout.audit_bucket(),
            source,
        })?;
        self.store
            .hash_set(&self.layout.audit_bucket(), &record.id.to_string(), &bytes)?;

        tracing::info!(
            id = %record.id,
            user = %record.user,
            pattern = %record.pattern,
            tags = ?record.tags,
            deleted,
            marked,
            "manual cache invalidation"
        );
        Ok(record)
    }

    /// Every recorded invalidation, oldest first. Unreadable records are
    /// skipped with a warning.
    pub fn history(&self) -> Result<Vec<InvalidationRecord>> {
        let bucket = self.layout.audit_bucket();
        let mut records: Vec<InvalidationRecord> = self
            .store
            .hash_get_all(&bucket)?
            .into_iter()
            .filter_map(|(id, bytes)| match serde_json::from_slice(&bytes) {
                Ok(record) => Some(record),
                Err(err) => {
                    tracing::warn!(id = %id, error = %err, "skipping unreadable invalidation record");
                    None
                }
            })
            .collect();
        records.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TaggedPolicy;
    use crate::store::MemoryStore;
    #[cfg(feature = "stats")]
    use crate::CacheStats;

    struct Tagged {
        tag: &'static str,
        #[cfg(feature = "stats")]
        stats: CacheStats,
    }

    impl TaggedPolicy for Tagged {
        fn name(&self) -> &str {
            self.tag
        }

        fn tag(&self) -> &str {
            self.tag
        }

        #[cfg(feature = "stats")]
        fn stats(&self) -> &CacheStats {
            &self.stats
        }
    }

    fn tagged(tag: &'static str) -> Arc<dyn TaggedPolicy> {
        Arc::new(Tagged {
            tag,
            #[cfg(feature = "stats")]
            stats: CacheStats::new(),
        })
    }

    fn setup() -> (Arc<MemoryStore>, ManualInvalidator) {
        let store = Arc::new(MemoryStore::new());
        let layout = KeyLayout::default();
        let registry = Arc::new(TagRegistry::new(store.clone(), layout.clone()));
        registry.register(tagged("get_user")).unwrap();
        registry.register(tagged("get_book")).unwrap();
        let patterns = PatternInvalidator::new(store.clone());
        let manual = ManualInvalidator::new(store.clone(), layout, registry, patterns);
        (store, manual)
    }

    #[test]
    fn test_submit_runs_pattern_and_tags() {
        let (store, manual) = setup();
        store.hash_set("CMUser:1", "base", b"1").unwrap();
        store.hash_set("CMUser:2", "base", b"1").unwrap();
        store.hash_set("CMBook:1", "base", b"1").unwrap();
        store
            .set_add("CM:tag:get_book", &["CMBook:1".to_string()])
            .unwrap();

        let request = InvalidationRequest::new("admin", "CMUser:*").with_tags(["get_book"]);
        let record = manual.submit(request).unwrap();

        assert_eq!(record.deleted, 2);
        assert_eq!(record.marked, 1);
        assert!(!store.contains_key("CMUser:1"));
        assert!(store.contains_key("CMBook:1"));
        assert!(store.set_members("CM:delete").unwrap().contains("CMBook:1"));
    }

    #[test]
    fn test_history_is_ordered_and_complete() {
        let (_, manual) = setup();
        let first = manual.submit(InvalidationRequest::new("ada", "A*")).unwrap();
        let second = manual
            .submit(InvalidationRequest::new("bob", "B*").with_tags(["get_user"]))
            .unwrap();

        let history = manual.history().unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].created <= history[1].created);
        assert!(history.contains(&first));
        assert!(history.contains(&second));
    }

    #[test]
    fn test_rejected_requests_leave_no_record() {
        let (store, manual) = setup();
        store.hash_set("CMUser:1", "base", b"1").unwrap();

        let err = manual
            .submit(InvalidationRequest::new("admin", "  "))
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidRequest(_)));

        let err = manual
            .submit(InvalidationRequest::new("admin", "CMUser:*").with_tags(["nope"]))
            .unwrap_err();
        assert!(matches!(err, CacheError::UnknownTag(tag) if tag == "nope"));

        assert!(store.contains_key("CMUser:1"));
        assert!(manual.history().unwrap().is_empty());
    }

    #[test]
    fn test_choices_lists_tags() {
        let (_, manual) = setup();
        assert_eq!(manual.choices(), vec!["get_book", "get_user"]);
    }
}
