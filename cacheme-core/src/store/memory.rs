use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use std::time::{Duration, Instant};

use globset::{GlobBuilder, GlobMatcher};
use parking_lot::Mutex;

use super::{ScanCursor, ScanPage, Store};
use crate::error::{StoreError, StoreResult};

enum Value {
    Hash(HashMap<String, Vec<u8>>),
    Set(BTreeSet<String>),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Hash(_) => "hash",
            Value::Set(_) => "set",
        }
    }
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}

/// In-process associative store.
///
/// Every primitive runs under a single `parking_lot::Mutex`, so each call is
/// atomic with respect to every other call on the same store. Clones of an
/// `Arc<MemoryStore>` share the same data, which makes it suitable for tests
/// and single-process deployments.
///
/// Expired keys are dropped lazily when touched and eagerly during scans.
/// Keys are kept in order, so scan cursors stay valid while matched keys are
/// deleted between pages.
///
/// # Examples
///
/// ```
/// use cacheme_core::{MemoryStore, Store};
///
/// let store = MemoryStore::new();
/// store.hash_set("CMUser:1", "base", b"42").unwrap();
/// assert_eq!(store.hash_get("CMUser:1", "base").unwrap(), Some(b"42".to_vec()));
///
/// assert!(!store.set_remove("CM:delete", "CMUser:1").unwrap());
/// store.set_add("CM:delete", &["CMUser:1".to_string()]).unwrap();
/// assert!(store.set_remove("CM:delete", "CMUser:1").unwrap());
/// ```
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every live key, in order.
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| !entry.is_expired(now));
        entries.keys().cloned().collect()
    }

    /// Whether `key` exists and has not expired.
    pub fn contains_key(&self, key: &str) -> bool {
        let mut entries = self.entries.lock();
        live(&mut entries, key).is_some()
    }

    /// Removes every key.
    pub fn flush(&self) {
        self.entries.lock().clear();
    }
}

fn live<'a>(entries: &'a mut BTreeMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
    let expired = entries.get(key)?.is_expired(Instant::now());
    if expired {
        entries.remove(key);
        return None;
    }
    entries.get_mut(key)
}

fn wrong_type(key: &str, expected: &'static str, found: &Value) -> StoreError {
    StoreError::WrongType {
        key: key.to_string(),
        expected,
        found: found.kind(),
    }
}

fn compile(pattern: &str) -> StoreResult<GlobMatcher> {
    GlobBuilder::new(pattern)
        .literal_separator(false)
        .backslash_escape(true)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|err| StoreError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: err.to_string(),
        })
}

impl Store for MemoryStore {
    fn hash_get(&self, bucket: &str, field: &str) -> StoreResult<Option<Vec<u8>>> {
        let mut entries = self.entries.lock();
        match live(&mut entries, bucket) {
            None => Ok(None),
            Some(Entry {
                value: Value::Hash(fields),
                ..
            }) => Ok(fields.get(field).cloned()),
            Some(entry) => Err(wrong_type(bucket, "hash", &entry.value)),
        }
    }

    fn hash_set(&self, bucket: &str, field: &str, value: &[u8]) -> StoreResult<()> {
        let mut entries = self.entries.lock();
        if live(&mut entries, bucket).is_none() {
            entries.insert(bucket.to_string(), Entry::new(Value::Hash(HashMap::new())));
        }
        match entries.get_mut(bucket).map(|entry| &mut entry.value) {
            Some(Value::Hash(fields)) => {
                fields.insert(field.to_string(), value.to_vec());
                Ok(())
            }
            Some(other) => Err(wrong_type(bucket, "hash", other)),
            None => Err(StoreError::Unavailable(format!("bucket `{bucket}` vanished"))),
        }
    }

    fn hash_get_all(&self, bucket: &str) -> StoreResult<Vec<(String, Vec<u8>)>> {
        let mut entries = self.entries.lock();
        match live(&mut entries, bucket) {
            None => Ok(Vec::new()),
            Some(Entry {
                value: Value::Hash(fields),
                ..
            }) => Ok(fields
                .iter()
                .map(|(field, value)| (field.clone(), value.clone()))
                .collect()),
            Some(entry) => Err(wrong_type(bucket, "hash", &entry.value)),
        }
    }

    fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut entries = self.entries.lock();
        match live(&mut entries, key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn set_add(&self, set: &str, members: &[String]) -> StoreResult<usize> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut entries = self.entries.lock();
        if live(&mut entries, set).is_none() {
            entries.insert(set.to_string(), Entry::new(Value::Set(BTreeSet::new())));
        }
        match entries.get_mut(set).map(|entry| &mut entry.value) {
            Some(Value::Set(existing)) => Ok(members
                .iter()
                .filter(|member| existing.insert((*member).clone()))
                .count()),
            Some(other) => Err(wrong_type(set, "set", other)),
            None => Err(StoreError::Unavailable(format!("set `{set}` vanished"))),
        }
    }

    fn set_remove(&self, set: &str, member: &str) -> StoreResult<bool> {
        let mut entries = self.entries.lock();
        let (removed, now_empty) = match live(&mut entries, set) {
            None => return Ok(false),
            Some(Entry {
                value: Value::Set(members),
                ..
            }) => (members.remove(member), members.is_empty()),
            Some(entry) => return Err(wrong_type(set, "set", &entry.value)),
        };
        if now_empty {
            entries.remove(set);
        }
        Ok(removed)
    }

    fn set_members(&self, set: &str) -> StoreResult<BTreeSet<String>> {
        let mut entries = self.entries.lock();
        match live(&mut entries, set) {
            None => Ok(BTreeSet::new()),
            Some(Entry {
                value: Value::Set(members),
                ..
            }) => Ok(members.clone()),
            Some(entry) => Err(wrong_type(set, "set", &entry.value)),
        }
    }

    fn set_union_into(&self, dest: &str, sources: &[&str]) -> StoreResult<usize> {
        let mut entries = self.entries.lock();
        let mut union = BTreeSet::new();
        for key in std::iter::once(&dest).chain(sources.iter()) {
            match live(&mut entries, key) {
                None => {}
                Some(Entry {
                    value: Value::Set(members),
                    ..
                }) => union.extend(members.iter().cloned()),
                Some(entry) => return Err(wrong_type(key, "set", &entry.value)),
            }
        }
        let size = union.len();
        if union.is_empty() {
            entries.remove(dest);
        } else {
            entries.insert(dest.to_string(), Entry::new(Value::Set(union)));
        }
        Ok(size)
    }

    fn set_drain_into(&self, source: &str, dest: &str) -> StoreResult<usize> {
        let mut entries = self.entries.lock();
        let moved = match live(&mut entries, source) {
            None => return Ok(0),
            Some(Entry {
                value: Value::Set(members),
                ..
            }) => std::mem::take(members),
            Some(entry) => return Err(wrong_type(source, "set", &entry.value)),
        };
        entries.remove(source);
        let count = moved.len();
        if count == 0 {
            return Ok(0);
        }
        if live(&mut entries, dest).is_none() {
            entries.insert(dest.to_string(), Entry::new(Value::Set(BTreeSet::new())));
        }
        match entries.get_mut(dest).map(|entry| &mut entry.value) {
            Some(Value::Set(existing)) => {
                existing.extend(moved);
                Ok(count)
            }
            Some(other) => Err(wrong_type(dest, "set", other)),
            None => Err(StoreError::Unavailable(format!("set `{dest}` vanished"))),
        }
    }

    fn delete(&self, keys: &[String]) -> StoreResult<usize> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        Ok(keys
            .iter()
            .filter_map(|key| entries.remove(key))
            .filter(|entry| !entry.is_expired(now))
            .count())
    }

    fn scan(
        &self,
        pattern: &str,
        cursor: Option<&ScanCursor>,
        count: usize,
    ) -> StoreResult<ScanPage> {
        let matcher = compile(pattern)?;
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let lower = match cursor {
            Some(cursor) => Bound::Excluded(cursor.as_str().to_string()),
            None => Bound::Unbounded,
        };

        let mut examined = Vec::new();
        let mut more = false;
        for key in entries
            .range::<String, _>((lower, Bound::Unbounded))
            .map(|(key, _)| key)
        {
            if examined.len() == count.max(1) {
                more = true;
                break;
            }
            examined.push(key.clone());
        }

        let mut keys = Vec::new();
        for key in &examined {
            let expired = entries.get(key).map_or(true, |entry| entry.is_expired(now));
            if expired {
                entries.remove(key);
            } else if matcher.is_match(key.as_str()) {
                keys.push(key.clone());
            }
        }

        let next = match examined.last() {
            Some(last) if more => Some(ScanCursor::new(last.clone())),
            _ => None,
        };
        Ok(ScanPage { keys, next })
    }
}
