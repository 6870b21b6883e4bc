//! # Associative store
//!
//! The engine keeps all coordination state (cached values, the pending-delete
//! set, the invalidation index and tag key-sets) in an external associative
//! store. Correctness relies only on each primitive below being atomic on its
//! own; the engine never locks around sequences of calls.
//!
//! Two backends ship with the crate:
//!
//! - [`MemoryStore`] - in-process, shared by every caller holding the same handle
//! - `RedisStore` - Redis-backed, shared across processes (requires the `redis` feature)

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use crate::error::StoreResult;

mod memory;
#[cfg(feature = "redis")]
mod redis_store;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;

/// Opaque position of a resumable [`Store::scan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanCursor(String);

impl ScanCursor {
    pub fn new(position: impl Into<String>) -> Self {
        Self(position.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScanCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One page of keys returned by [`Store::scan`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// Keys matching the pattern found in this page. May be empty even when
    /// the scan is not finished.
    pub keys: Vec<String>,
    /// Where to resume, or `None` once the whole key space was visited.
    pub next: Option<ScanCursor>,
}

/// Primitives required from an associative store.
///
/// Buckets are hashes of `field -> bytes`; sets hold strings. Any key may be
/// expired or deleted regardless of its kind.
pub trait Store: Send + Sync {
    /// Reads one field of a hash bucket.
    fn hash_get(&self, bucket: &str, field: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Writes one field of a hash bucket, creating the bucket if needed.
    fn hash_set(&self, bucket: &str, field: &str, value: &[u8]) -> StoreResult<()>;

    /// Reads every field of a hash bucket.
    fn hash_get_all(&self, bucket: &str) -> StoreResult<Vec<(String, Vec<u8>)>>;

    /// Expires `key` (and everything stored under it) after `ttl`.
    ///
    /// Returns `false` when the key does not exist.
    fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// Adds members to a set, returning how many were not already present.
    fn set_add(&self, set: &str, members: &[String]) -> StoreResult<usize>;

    /// Atomically tests membership and removes `member` if present.
    fn set_remove(&self, set: &str, member: &str) -> StoreResult<bool>;

    /// Returns every member of a set (empty when absent).
    fn set_members(&self, set: &str) -> StoreResult<BTreeSet<String>>;

    /// Stores the union of `dest` and `sources` into `dest`, returning its size.
    fn set_union_into(&self, dest: &str, sources: &[&str]) -> StoreResult<usize>;

    /// Moves every member of `source` into `dest` and deletes `source`.
    ///
    /// Returns the number of members moved. Backends should perform this as a
    /// single atomic step; the default falls back to two primitives.
    fn set_drain_into(&self, source: &str, dest: &str) -> StoreResult<usize> {
        let moved = self.set_members(source)?.len();
        if moved > 0 {
            self.set_union_into(dest, &[source])?;
        }
        self.delete(&[source.to_string()])?;
        Ok(moved)
    }

    /// Unconditionally deletes keys, returning how many existed.
    fn delete(&self, keys: &[String]) -> StoreResult<usize>;

    /// Returns the next page of keys matching a glob `pattern`.
    ///
    /// `count` bounds how many keys the backend examines per page. Discovery
    /// order is backend-defined; a key present for the whole scan is returned
    /// at least once.
    fn scan(&self, pattern: &str, cursor: Option<&ScanCursor>, count: usize)
        -> StoreResult<ScanPage>;
}
