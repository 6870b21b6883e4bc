//! # Call context
//!
//! Arguments of a cached call bound to their parameter names. Key builders,
//! trigger-key builders and skip predicates all receive the context as their
//! only argument, so they can stay one-argument closures no matter what the
//! wrapped computation looks like.
//!
//! Values are stored as JSON, which lets a context hold any `Serialize`
//! argument and hand it back typed through [`CallContext::arg`].
//!
//! ```
//! use cacheme_core::CallContext;
//!
//! let ctx = CallContext::new()
//!     .with("user_id", &42u64)
//!     .with("name", "ada");
//!
//! assert_eq!(ctx.arg::<u64>("user_id"), Some(42));
//! assert_eq!(ctx.text("name"), "ada");
//! assert_eq!(ctx.text("user_id"), "42");
//! assert_eq!(ctx.positional(1), ctx.get("name"));
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Immutable view of a call's bound arguments plus the computed result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallContext {
    args: Vec<(String, Value)>,
    /// Parameters whose value could not be represented as JSON.
    unbound: Vec<String>,
    result: Option<Value>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `value` to the parameter `name`, replacing an earlier binding.
    ///
    /// A value that cannot be represented as JSON is bound as `null` and the
    /// parameter is reported by [`CallContext::unbound`].
    pub fn with<T: Serialize + ?Sized>(mut self, name: &str, value: &T) -> Self {
        self.unbound.retain(|existing| existing != name);
        let value = serde_json::to_value(value).unwrap_or_else(|err| {
            tracing::warn!(parameter = name, error = %err, "argument is not serializable, binding null");
            self.unbound.push(name.to_string());
            Value::Null
        });
        match self.args.iter_mut().find(|(existing, _)| existing == name) {
            Some((_, slot)) => *slot = value,
            None => self.args.push((name.to_string(), value)),
        }
        self
    }

    /// Raw JSON value bound to `name`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.args
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value)
    }

    /// Argument `name` decoded as `T`.
    pub fn arg<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.get(name)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Argument `name` rendered for use inside a key.
    ///
    /// Strings are rendered without quotes, missing arguments as `""`.
    pub fn text(&self, name: &str) -> String {
        self.get(name).map(render).unwrap_or_default()
    }

    /// Argument at `index` in declaration order.
    pub fn positional(&self, index: usize) -> Option<&Value> {
        self.args.get(index).map(|(_, value)| value)
    }

    /// Parameter names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.args.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Parameters bound as `null` because their value could not be encoded.
    pub fn unbound(&self) -> &[String] {
        &self.unbound
    }

    /// Every argument value, in declaration order, encoded as a JSON array.
    /// Used as the default key of a computation that declares no key builder.
    ///
    /// Distinct argument lists always give distinct fingerprints. `>` is
    /// written as `\u003e` so the fingerprint never moves the key into another
    /// bucket.
    ///
    /// ```
    /// use cacheme_core::CallContext;
    ///
    /// let ctx = CallContext::new().with("a", "x|y").with("b", &Some(1));
    /// assert_eq!(ctx.fingerprint(), r#"["x|y",1]"#);
    /// ```
    pub fn fingerprint(&self) -> String {
        Value::Array(self.args.iter().map(|(_, value)| value.clone()).collect())
            .to_string()
            .replace('>', "\\u003e")
    }

    /// The computed result, available to trigger-key builders once the
    /// computation has run.
    pub fn result<T: DeserializeOwned>(&self) -> Option<T> {
        self.result
            .as_ref()
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn result_value(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub(crate) fn set_result(&mut self, value: Value) {
        self.result = Some(value);
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
