//! Actions: tagged intents to change state.
//!
//! Serialized as `{ "type": "...", "payload": ... }`. The payload is opaque
//! JSON; reducers decide what it means.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Dispatched once when a store is built.
pub const INIT_ACTION: &str = "@@rootstore/INIT";

/// Dispatched after every reducer hot swap so freshly admitted slices take
/// their default value.
pub const REPLACE_ACTION: &str = "@@rootstore/REPLACE";

/// Announces that a feature module became active. Payload is the module id.
pub const INIT_FEATURE_ACTION: &str = "@@rootstore/INIT_FEATURE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Action {
    pub fn new(action_type: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            payload: None,
        }
    }

    /// Attach anything that serializes to JSON as the payload.
    pub fn with_payload(mut self, payload: impl Into<Value>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn is(&self, action_type: &str) -> bool {
        self.action_type == action_type
    }
}

/// The action's payload, or `Value::Null` when it carries none.
pub fn select_payload(action: &Action) -> Value {
    action.payload.clone().unwrap_or(Value::Null)
}

pub fn init_feature_action(module_id: &str) -> Action {
    Action::new(INIT_FEATURE_ACTION).with_payload(module_id)
}

/// True when `action` announces the activation of `module_id`.
pub fn is_init_feature(action: &Action, module_id: &str) -> bool {
    action.is(INIT_FEATURE_ACTION) && action.payload.as_ref().and_then(Value::as_str) == Some(module_id)
}
