//! Lazily computed property bags
//!
//! A [`PropertyBag`] maps names to either a stored value or a pending
//! provider. Reading a pending property runs its provider once and caches
//! the result for the rest of the run. Providers receive the bag itself, so
//! one property can be derived from another.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::rc::Rc;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("no property named '{0}'")]
    Unknown(String),

    #[error("'{0}' is a read only property")]
    ReadOnly(String),

    #[error("property '{0}' depends on itself")]
    Recursive(String),

    #[error("property '{property}' could not read {}: {source}", path.display())]
    Io {
        property: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("property '{property}' is not valid UTF-8: {source}")]
    Decode {
        property: String,
        #[source]
        source: std::string::FromUtf8Error,
    },

    #[error("property '{property}' expected {expected}, found {found}")]
    Type {
        property: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("property '{property}' failed: {message}")]
    Provider { property: String, message: String },
}

/// A property value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Bytes(Vec<u8>),
    Text(String),
    Json(serde_json::Value),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Bytes(_) => "bytes",
            Value::Text(_) => "text",
            Value::Json(_) => "json",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Value::Json(v) => Some(v),
            _ => None,
        }
    }

    /// JSON form of the value; raw bytes have none
    pub fn to_json(&self) -> Option<serde_json::Value> {
        match self {
            Value::Bool(b) => Some(serde_json::Value::Bool(*b)),
            Value::Bytes(_) => None,
            Value::Text(s) => Some(serde_json::Value::String(s.clone())),
            Value::Json(v) => Some(v.clone()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Bytes(bytes)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

/// Computes a property from the bag that owns it
pub type Provider = Rc<dyn Fn(&mut PropertyBag) -> Result<Value, ContextError>>;

enum Slot {
    Ready(Value),
    Pending(Provider),
    Computing,
}

struct Entry {
    slot: Slot,
    read_only: bool,
}

/// Named properties, computed on first read
#[derive(Default)]
pub struct PropertyBag {
    entries: BTreeMap<String, Entry>,
}

impl PropertyBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a lazily computed, read-only property.
    ///
    /// Fails if `name` is already a read-only property.
    pub fn define<F>(&mut self, name: impl Into<String>, provider: F) -> Result<(), ContextError>
    where
        F: Fn(&mut PropertyBag) -> Result<Value, ContextError> + 'static,
    {
        let name = name.into();
        if self.is_read_only(&name) {
            return Err(ContextError::ReadOnly(name));
        }
        self.insert_lazy(name, provider);
        Ok(())
    }

    /// Stores a plain value, replacing any previous plain value
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Result<(), ContextError> {
        let name = name.into();
        if self.is_read_only(&name) {
            return Err(ContextError::ReadOnly(name));
        }
        self.entries.insert(
            name,
            Entry {
                slot: Slot::Ready(value.into()),
                read_only: false,
            },
        );
        Ok(())
    }

    pub(super) fn insert_lazy<F>(&mut self, name: impl Into<String>, provider: F)
    where
        F: Fn(&mut PropertyBag) -> Result<Value, ContextError> + 'static,
    {
        self.entries.insert(
            name.into(),
            Entry {
                slot: Slot::Pending(Rc::new(provider)),
                read_only: true,
            },
        );
    }

    pub(super) fn insert_plain(&mut self, name: impl Into<String>, value: Value) {
        self.entries.insert(
            name.into(),
            Entry {
                slot: Slot::Ready(value),
                read_only: false,
            },
        );
    }

    /// Reads a property, computing and caching it on first access.
    ///
    /// A provider that fails leaves the property pending, so a later read
    /// retries it.
    pub fn get(&mut self, name: &str) -> Result<&Value, ContextError> {
        let entry = self
            .entries
            .get_mut(name)
            .ok_or_else(|| ContextError::Unknown(name.to_string()))?;

        let provider = match std::mem::replace(&mut entry.slot, Slot::Computing) {
            Slot::Ready(value) => {
                entry.slot = Slot::Ready(value);
                None
            }
            Slot::Pending(provider) => Some(provider),
            Slot::Computing => return Err(ContextError::Recursive(name.to_string())),
        };

        if let Some(provider) = provider {
            match provider(self) {
                Ok(value) => self.restore(name, Slot::Ready(value)),
                Err(err) => {
                    self.restore(name, Slot::Pending(provider));
                    return Err(err);
                }
            }
        }

        match self.entries.get(name).map(|e| &e.slot) {
            Some(Slot::Ready(value)) => Ok(value),
            _ => Err(ContextError::Unknown(name.to_string())),
        }
    }

    /// Reads a text property
    pub fn get_str(&mut self, name: &str) -> Result<&str, ContextError> {
        let value = self.get(name)?;
        value.as_str().ok_or_else(|| ContextError::Type {
            property: name.to_string(),
            expected: "text",
            found: value.kind(),
        })
    }

    /// Reads a bytes property
    pub fn get_bytes(&mut self, name: &str) -> Result<&[u8], ContextError> {
        let value = self.get(name)?;
        value.as_bytes().ok_or_else(|| ContextError::Type {
            property: name.to_string(),
            expected: "bytes",
            found: value.kind(),
        })
    }

    fn restore(&mut self, name: &str, slot: Slot) {
        if let Some(entry) = self.entries.get_mut(name) {
            entry.slot = slot;
        }
    }

    /// Removes a property of either kind
    pub fn remove(&mut self, name: &str) -> bool {
        self.entries.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn is_read_only(&self, name: &str) -> bool {
        self.entries.get(name).is_some_and(|e| e.read_only)
    }

    /// Returns true once the property holds a value
    pub fn is_computed(&self, name: &str) -> bool {
        matches!(self.entries.get(name).map(|e| &e.slot), Some(Slot::Ready(_)))
    }

    /// Property names, sorted
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Computed values with a JSON form. Never runs a provider.
    pub fn snapshot(&self) -> serde_json::Map<String, serde_json::Value> {
        self.entries
            .iter()
            .filter_map(|(name, entry)| match &entry.slot {
                Slot::Ready(value) => value.to_json().map(|json| (name.clone(), json)),
                _ => None,
            })
            .collect()
    }
}

impl fmt::Debug for PropertyBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (name, entry) in &self.entries {
            match &entry.slot {
                Slot::Ready(value) => map.entry(name, value),
                Slot::Pending(_) => map.entry(name, &"<pending>"),
                Slot::Computing => map.entry(name, &"<computing>"),
            };
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn provider_runs_once() {
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);

        let mut bag = PropertyBag::new();
        bag.define("answer", move |_| {
            counter.set(counter.get() + 1);
            Ok(Value::Json(serde_json::json!(42)))
        })
        .unwrap();

        assert!(!bag.is_computed("answer"));
        assert_eq!(bag.get("answer").unwrap(), &Value::Json(serde_json::json!(42)));
        assert_eq!(bag.get("answer").unwrap(), &Value::Json(serde_json::json!(42)));
        assert_eq!(calls.get(), 1);
        assert!(bag.is_computed("answer"));
    }

    #[test]
    fn derived_property_reads_sibling() {
        let mut bag = PropertyBag::new();
        bag.set("name", "index.html").unwrap();
        bag.define("shout", |bag| {
            let name = bag.get_str("name")?.to_uppercase();
            Ok(Value::Text(name))
        })
        .unwrap();

        assert_eq!(bag.get_str("shout").unwrap(), "INDEX.HTML");
    }

    #[test]
    fn defined_property_is_read_only() {
        let mut bag = PropertyBag::new();
        bag.define("html", |_| Ok(Value::Bool(true))).unwrap();

        assert!(matches!(bag.set("html", false), Err(ContextError::ReadOnly(_))));
        assert!(matches!(
            bag.define("html", |_| Ok(Value::Bool(false))),
            Err(ContextError::ReadOnly(_))
        ));
    }

    #[test]
    fn plain_values_can_be_replaced() {
        let mut bag = PropertyBag::new();
        bag.set("count", serde_json::json!(1)).unwrap();
        bag.set("count", serde_json::json!(2)).unwrap();

        assert_eq!(bag.get("count").unwrap().as_json(), Some(&serde_json::json!(2)));
    }

    #[test]
    fn unknown_property() {
        let mut bag = PropertyBag::new();
        assert!(matches!(bag.get("nope"), Err(ContextError::Unknown(_))));
    }

    #[test]
    fn self_reference_is_reported() {
        let mut bag = PropertyBag::new();
        bag.define("loop", |bag| bag.get("loop").cloned()).unwrap();

        assert!(matches!(bag.get("loop"), Err(ContextError::Recursive(_))));
    }

    #[test]
    fn failed_provider_is_retried() {
        let fail = Rc::new(Cell::new(true));
        let flag = Rc::clone(&fail);

        let mut bag = PropertyBag::new();
        bag.define("flaky", move |_| {
            if flag.get() {
                Err(ContextError::Provider {
                    property: "flaky".to_string(),
                    message: "not yet".to_string(),
                })
            } else {
                Ok(Value::Bool(true))
            }
        })
        .unwrap();

        assert!(bag.get("flaky").is_err());
        fail.set(false);
        assert_eq!(bag.get("flaky").unwrap().as_bool(), Some(true));
    }

    #[test]
    fn type_mismatch_reported() {
        let mut bag = PropertyBag::new();
        bag.set("flag", true).unwrap();

        let err = bag.get_str("flag").unwrap_err();
        assert!(matches!(err, ContextError::Type { expected: "text", found: "bool", .. }));
    }

    #[test]
    fn remove_drops_property() {
        let mut bag = PropertyBag::new();
        bag.define("html", |_| Ok(Value::Bool(true))).unwrap();

        assert!(bag.remove("html"));
        assert!(!bag.contains("html"));
        bag.set("html", "plain").unwrap();
    }

    #[test]
    fn snapshot_skips_pending_and_bytes() {
        let mut bag = PropertyBag::new();
        bag.set("title", "Home").unwrap();
        bag.set("raw", vec![1u8, 2, 3]).unwrap();
        bag.define("lazy", |_| Ok(Value::Bool(true))).unwrap();

        let snapshot = bag.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot["title"], serde_json::json!("Home"));
    }
}
