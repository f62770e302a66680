//! Run-scoped shared state
//!
//! [`SharedState`] is a key/value store handed to every handler context of a run. Clones share
//! the same store. Writes are last-writer-wins; each `get`/`set` is atomic per key.

use crate::error::Result;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct SharedState {
    inner: Arc<RwLock<HashMap<String, Value>>>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.read().get(key).cloned()
    }

    /// Read and decode a value. A missing key is `Ok(None)`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Set a value, returning the previous one.
    pub fn set(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.inner.write().insert(key.into(), value)
    }

    pub fn set_as<T: Serialize>(&self, key: impl Into<String>, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.set(key, value);
        Ok(())
    }

    pub fn delete(&self, key: &str) -> Option<Value> {
        self.inner.write().remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.read().contains_key(key)
    }

    /// Keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.inner.read().clone()
    }

    /// Replace the whole store.
    pub fn replace(&self, values: HashMap<String, Value>) {
        *self.inner.write() = values;
    }

    pub fn clear(&self) {
        self.inner.write().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_clones_share_the_store() {
        let state = SharedState::new();
        let other = state.clone();

        state.set("count", json!(1));
        assert_eq!(other.get("count"), Some(json!(1)));

        assert_eq!(other.set("count", json!(2)), Some(json!(1)));
        assert_eq!(state.get_as::<i64>("count").unwrap(), Some(2));
    }

    #[test]
    fn test_typed_access() {
        let state = SharedState::new();
        state.set_as("names", &vec!["a", "b"]).unwrap();

        let names: Option<Vec<String>> = state.get_as("names").unwrap();
        assert_eq!(names.unwrap(), vec!["a", "b"]);
        assert_eq!(state.get_as::<String>("missing").unwrap(), None);
        assert!(state.get_as::<i64>("names").is_err());
    }

    #[test]
    fn test_delete_keys_and_replace() {
        let state = SharedState::new();
        state.set("b", json!(2));
        state.set("a", json!(1));
        assert_eq!(state.keys(), vec!["a", "b"]);
        assert!(state.contains("a"));

        assert_eq!(state.delete("a"), Some(json!(1)));
        assert!(!state.contains("a"));

        let mut fresh = HashMap::new();
        fresh.insert("z".to_string(), json!(true));
        state.replace(fresh);
        assert_eq!(state.keys(), vec!["z"]);
        assert_eq!(state.len(), 1);

        state.clear();
        assert!(state.is_empty());
    }
}
