//! Bulk deletion of store keys by glob pattern.
//!
//! Unlike tag or trigger invalidation this deletes keys outright, bypassing
//! the pending-delete set. The pattern is matched against raw store keys, so
//! it must include the prefix (`"CMUser:*"`).

use std::sync::Arc;

use crate::error::Result;
use crate::store::{ScanCursor, Store};

/// Keys examined per scan page unless configured otherwise.
pub const DEFAULT_SCAN_COUNT: usize = 10;

/// Keys deleted per batch unless configured otherwise.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Scans the store for keys matching a pattern and deletes them in batches.
///
/// Memory stays bounded by the batch size regardless of how many keys match.
/// When a store call fails midway, earlier batches stay deleted; running the
/// same pattern again finishes the job.
///
/// ```rust
/// use std::sync::Arc;
/// use cacheme_core::{MemoryStore, PatternInvalidator, Store};
///
/// let store = Arc::new(MemoryStore::new());
/// for key in ["PATTERN:1", "PATTERN:2", "ANOTHER:3"] {
///     store.hash_set(key, "base", b"1").unwrap();
/// }
///
/// let invalidator = PatternInvalidator::new(store.clone());
/// assert_eq!(invalidator.invalidate("PATTERN*").unwrap(), 2);
/// assert_eq!(store.keys(), vec!["ANOTHER:3"]);
/// ```
#[derive(Clone)]
pub struct PatternInvalidator {
    store: Arc<dyn Store>,
    scan_count: usize,
    batch_size: usize,
}

impl PatternInvalidator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            scan_count: DEFAULT_SCAN_COUNT,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_scan_count(mut self, scan_count: usize) -> Self {
        self.scan_count = scan_count.max(1);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Deletes every key matching `pattern`, returning how many were deleted.
    pub fn invalidate(&self, pattern: &str) -> Result<usize> {
        let mut cursor: Option<ScanCursor> = None;
        let mut batch: Vec<String> = Vec::with_capacity(self.batch_size);
        let mut deleted = 0;

        loop {
            let page = self.store.scan(pattern, cursor.as_ref(), self.scan_count)?;
            for key in page.keys {
                batch.push(key);
                if batch.len() >= self.batch_size {
                    deleted += self.flush(pattern, &mut batch)?;
                }
            }
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        deleted += self.flush(pattern, &mut batch)?;
        tracing::debug!(pattern, deleted, "pattern invalidation finished");
        Ok(deleted)
    }

    fn flush(&self, pattern: &str, batch: &mut Vec<String>) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }
        // Scans may report a key twice; deleting it again is a no-op.
        batch.sort_unstable();
        batch.dedup();
        let deleted = self.store.delete(batch)?;
        tracing::debug!(pattern, batch = batch.len(), deleted, "deleted key batch");
        batch.clear();
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreResult;
    use crate::store::{MemoryStore, ScanPage};
    use parking_lot::Mutex;
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn seeded(keys: &[&str]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for key in keys {
            store.hash_set(key, "base", b"1").unwrap();
        }
        store
    }

    #[test]
    fn test_pattern_leaves_non_matching_keys() {
        let store = seeded(&["PATTERN:1", "PATTERN:2", "ANOTHER:3"]);
        let invalidator = PatternInvalidator::new(store.clone());

        assert_eq!(invalidator.invalidate("PATTERN*").unwrap(), 2);
        assert_eq!(store.keys(), vec!["ANOTHER:3"]);
        assert_eq!(invalidator.invalidate("PATTERN*").unwrap(), 0);
    }

    #[test]
    fn test_many_keys_small_pages_and_batches() {
        let keys: Vec<String> = (0..257).map(|i| format!("CMUser:{i:04}")).collect();
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let store = seeded(&refs);
        store.hash_set("CMBook:1", "base", b"1").unwrap();

        let invalidator = PatternInvalidator::new(store.clone())
            .with_scan_count(3)
            .with_batch_size(10);
        assert_eq!(invalidator.invalidate("CMUser:*").unwrap(), 257);
        assert_eq!(store.keys(), vec!["CMBook:1"]);
    }

    #[test]
    fn test_no_match() {
        let store = seeded(&["A", "B"]);
        let invalidator = PatternInvalidator::new(store.clone());
        assert_eq!(invalidator.invalidate("Z*").unwrap(), 0);
        assert_eq!(store.keys().len(), 2);
    }

    /// Records the size of every delete call.
    struct RecordingStore {
        inner: MemoryStore,
        deletes: Mutex<Vec<usize>>,
    }

    impl Store for RecordingStore {
        fn hash_get(&self, bucket: &str, field: &str) -> StoreResult<Option<Vec<u8>>> {
            self.inner.hash_get(bucket, field)
        }
        fn hash_set(&self, bucket: &str, field: &str, value: &[u8]) -> StoreResult<()> {
            self.inner.hash_set(bucket, field, value)
        }
        fn hash_get_all(&self, bucket: &str) -> StoreResult<Vec<(String, Vec<u8>)>> {
            self.inner.hash_get_all(bucket)
        }
        fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
            self.inner.expire(key, ttl)
        }
        fn set_add(&self, set: &str, members: &[String]) -> StoreResult<usize> {
            self.inner.set_add(set, members)
        }
        fn set_remove(&self, set: &str, member: &str) -> StoreResult<bool> {
            self.inner.set_remove(set, member)
        }
        fn set_members(&self, set: &str) -> StoreResult<BTreeSet<String>> {
            self.inner.set_members(set)
        }
        fn set_union_into(&self, dest: &str, sources: &[&str]) -> StoreResult<usize> {
            self.inner.set_union_into(dest, sources)
        }
        fn delete(&self, keys: &[String]) -> StoreResult<usize> {
            self.deletes.lock().push(keys.len());
            self.inner.delete(keys)
        }
        fn scan(
            &self,
            pattern: &str,
            cursor: Option<&ScanCursor>,
            count: usize,
        ) -> StoreResult<ScanPage> {
            self.inner.scan(pattern, cursor, count)
        }
    }

    #[test]
    fn test_deletes_in_bounded_batches() {
        let store = Arc::new(RecordingStore {
            inner: MemoryStore::new(),
            deletes: Mutex::new(Vec::new()),
        });
        for i in 0..25 {
            store.hash_set(&format!("K{i:02}"), "base", b"1").unwrap();
        }

        let invalidator = PatternInvalidator::new(store.clone())
            .with_scan_count(4)
            .with_batch_size(10);
        assert_eq!(invalidator.invalidate("K*").unwrap(), 25);
        assert_eq!(*store.deletes.lock(), vec![10, 10, 5]);
    }
}
