//! The composed root state: one JSON slice per feature module.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RootStoreError;

/// Slice id → slice state. Snapshots are shared as `Arc<RootState>` and never
/// mutated after publication.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RootState(Map<String, Value>);

impl RootState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON object. Anything else is rejected.
    pub fn from_value(value: Value) -> Result<Self, RootStoreError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(RootStoreError::Config(format!(
                "root state must be a JSON object, got {other}"
            ))),
        }
    }

    pub fn slice(&self, id: &str) -> Option<&Value> {
        self.0.get(id)
    }

    /// Deserialize a slice. `Ok(None)` when the slice is absent.
    pub fn slice_as<T: DeserializeOwned>(&self, id: &str) -> Result<Option<T>, RootStoreError> {
        self.0
            .get(id)
            .map(|value| serde_json::from_value(value.clone()))
            .transpose()
            .map_err(|e| RootStoreError::Anyhow(e.into()))
    }

    pub fn with_slice(mut self, id: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(id.into(), value.into());
        self
    }

    pub(crate) fn insert(&mut self, id: String, value: Value) {
        self.0.insert(id, value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

/// Builder used by the reducer composer: starts from a snapshot and only
/// records slices that actually changed.
pub struct RootStateDraft<'a> {
    base: &'a RootState,
    next: Option<RootState>,
}

impl<'a> RootStateDraft<'a> {
    pub fn new(base: &'a RootState) -> Self {
        Self { base, next: None }
    }

    pub fn previous(&self, id: &str) -> Option<&Value> {
        self.base.slice(id)
    }

    pub fn set(&mut self, id: &str, value: Value) {
        if self.base.slice(id) == Some(&value) {
            return;
        }
        self.next
            .get_or_insert_with(|| self.base.clone())
            .insert(id.to_string(), value);
    }

    /// The changed state, or `None` when every slice kept its value.
    pub fn finish(self) -> Option<RootState> {
        self.next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_value_requires_object() {
        assert!(RootState::from_value(json!({ "a": 1 })).is_ok());
        assert!(matches!(
            RootState::from_value(json!([1])),
            Err(RootStoreError::Config(_))
        ));
    }

    #[test]
    fn slice_as_deserializes() {
        let state = RootState::new().with_slice("count", 3);
        assert_eq!(state.slice_as::<u32>("count").unwrap(), Some(3));
        assert_eq!(state.slice_as::<u32>("missing").unwrap(), None);
        assert!(state.slice_as::<String>("count").is_err());
    }

    #[test]
    fn draft_only_copies_on_change() {
        let base = RootState::new().with_slice("a", 1);

        let mut unchanged = RootStateDraft::new(&base);
        unchanged.set("a", json!(1));
        assert!(unchanged.finish().is_none());

        let mut changed = RootStateDraft::new(&base);
        changed.set("b", json!("x"));
        let next = changed.finish().unwrap();
        assert_eq!(next.slice("a"), Some(&json!(1)));
        assert_eq!(next.slice("b"), Some(&json!("x")));
        assert_eq!(base.len(), 1);
    }

    #[test]
    fn serializes_as_plain_object() {
        let state = RootState::new().with_slice("sample", "default");
        assert_eq!(serde_json::to_value(&state).unwrap(), json!({ "sample": "default" }));
        assert_eq!(state.to_value(), json!({ "sample": "default" }));
    }
}
