//! Trigger keys returned by invalidation-key builders.
//!
//! Builders may return a single key, an optional key, or arbitrarily nested
//! collections of those. [`TriggerKeys::flatten`] reduces any of them to a
//! sorted, de-duplicated set with `None` entries discarded.

use std::collections::BTreeSet;

/// Possibly nested collection of domain trigger keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TriggerKeys {
    #[default]
    None,
    One(String),
    Many(Vec<TriggerKeys>),
}

impl TriggerKeys {
    /// Flattens nested collections into a set of keys.
    ///
    /// ```
    /// use cacheme_core::TriggerKeys;
    ///
    /// let keys = TriggerKeys::from(vec![
    ///     TriggerKeys::from("User:1"),
    ///     TriggerKeys::from(vec![Some("User:2"), None, Some("User:1")]),
    /// ]);
    /// let flat: Vec<String> = keys.flatten().into_iter().collect();
    /// assert_eq!(flat, vec!["User:1", "User:2"]);
    /// ```
    pub fn flatten(self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_into(&mut out);
        out
    }

    fn collect_into(self, out: &mut BTreeSet<String>) {
        match self {
            TriggerKeys::None => {}
            TriggerKeys::One(key) => {
                out.insert(key);
            }
            TriggerKeys::Many(items) => {
                for item in items {
                    item.collect_into(out);
                }
            }
        }
    }

    /// Appends `suffix` to every key, separated by `:`.
    pub fn with_suffix(self, suffix: &str) -> TriggerKeys {
        match self {
            TriggerKeys::None => TriggerKeys::None,
            TriggerKeys::One(key) => TriggerKeys::One(format!("{key}:{suffix}")),
            TriggerKeys::Many(items) => {
                TriggerKeys::Many(items.into_iter().map(|k| k.with_suffix(suffix)).collect())
            }
        }
    }
}

impl From<String> for TriggerKeys {
    fn from(key: String) -> Self {
        TriggerKeys::One(key)
    }
}

impl From<&str> for TriggerKeys {
    fn from(key: &str) -> Self {
        TriggerKeys::One(key.to_string())
    }
}

impl From<&String> for TriggerKeys {
    fn from(key: &String) -> Self {
        TriggerKeys::One(key.clone())
    }
}

impl<T: Into<TriggerKeys>> From<Option<T>> for TriggerKeys {
    fn from(key: Option<T>) -> Self {
        key.map_or(TriggerKeys::None, Into::into)
    }
}

impl<T: Into<TriggerKeys>> From<Vec<T>> for TriggerKeys {
    fn from(keys: Vec<T>) -> Self {
        TriggerKeys::Many(keys.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<TriggerKeys>, const N: usize> From<[T; N]> for TriggerKeys {
    fn from(keys: [T; N]) -> Self {
        TriggerKeys::Many(keys.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeSet<String>> for TriggerKeys {
    fn from(keys: BTreeSet<String>) -> Self {
        TriggerKeys::Many(keys.into_iter().map(TriggerKeys::One).collect())
    }
}

impl<T: Into<TriggerKeys>> FromIterator<T> for TriggerKeys {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        TriggerKeys::Many(iter.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(keys: impl Into<TriggerKeys>) -> Vec<String> {
        keys.into().flatten().into_iter().collect()
    }

    #[test]
    fn test_single_and_optional() {
        assert_eq!(flat("User:1"), vec!["User:1"]);
        assert_eq!(flat(Some("User:1".to_string())), vec!["User:1"]);
        assert!(flat(Option::<String>::None).is_empty());
    }

    #[test]
    fn test_nested_collections_flatten_and_dedupe() {
        let nested = vec![
            vec![Some("b"), None],
            vec![Some("a"), Some("b")],
            vec![],
        ];
        assert_eq!(flat(nested), vec!["a", "b"]);
        assert_eq!(flat(["x", "x", "y"]), vec!["x", "y"]);
    }

    #[test]
    fn test_collect_from_iterator() {
        let keys: TriggerKeys = (1..=3).map(|id| format!("User:{id}")).collect();
        assert_eq!(flat(keys), vec!["User:1", "User:2", "User:3"]);
    }

    #[test]
    fn test_suffix() {
        let keys = TriggerKeys::from(vec!["Book:1", "Book:2"]).with_suffix("members");
        assert_eq!(flat(keys), vec!["Book:1:members", "Book:2:members"]);
    }
}
