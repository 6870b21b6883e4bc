//! # Key codec
//!
//! Splits a logical cache key into the `(bucket, field)` pair used for hashed
//! storage. Several logical keys may share one bucket (and therefore one
//! expiry) while remaining independently addressable by field.
//!
//! ```
//! use cacheme_core::key_codec::{split, BASE_FIELD};
//!
//! assert_eq!(split("CMUser:1>books"), ("CMUser:1", "books"));
//! assert_eq!(split("CMUser:1"), ("CMUser:1", BASE_FIELD));
//! ```

/// Reserved delimiter between bucket and field.
pub const DELIMITER: char = '>';

/// Field used when a key carries no delimiter.
pub const BASE_FIELD: &str = "base";

/// Splits `key` on the first [`DELIMITER`].
///
/// Everything after the first delimiter is the field, so `"a>b>c"` maps to
/// bucket `"a"` and field `"b>c"`. Any input is valid.
pub fn split(key: &str) -> (&str, &str) {
    match key.split_once(DELIMITER) {
        Some((bucket, field)) => (bucket, field),
        None => (key, BASE_FIELD),
    }
}

/// Inverse of [`split`] for a bucket and field.
pub fn join(bucket: &str, field: &str) -> String {
    if field == BASE_FIELD {
        bucket.to_string()
    } else {
        format!("{bucket}{DELIMITER}{field}")
    }
}

/// Physical layout of every key the engine writes to the store.
///
/// All engine state lives under one prefix so that several applications can
/// share a store without colliding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
    prefix: String,
}

impl KeyLayout {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Canonical cache key for the output of a key builder.
    pub fn cache_key(&self, built: &str) -> String {
        format!("{}{}", self.prefix, built)
    }

    /// Set of keys marked stale and awaiting recomputation.
    pub fn pending_set(&self) -> String {
        format!("{}:delete", self.prefix)
    }

    /// Set of cache keys that depend on `trigger`.
    pub fn invalid_set(&self, trigger: &str) -> String {
        format!("{}{}:invalid", self.prefix, trigger)
    }

    /// Set of every cache key written under `tag`.
    pub fn tag_set(&self, tag: &str) -> String {
        format!("{}:tag:{}", self.prefix, tag)
    }

    /// Hash holding manual invalidation records.
    pub fn audit_bucket(&self) -> String {
        format!("{}:invalidations", self.prefix)
    }
}

impl Default for KeyLayout {
    fn default() -> Self {
        Self::new("CM")
    }
}
