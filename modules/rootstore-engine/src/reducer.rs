//! Reducer composition: per-slice reducers folded into one root reducer.

use std::collections::HashMap;
use std::sync::Arc;

use rootstore_common::{Action, RootState, RootStateDraft};
use serde_json::Value;

use crate::traits::SliceReducer;

type Handler = Arc<dyn Fn(&Value, &Action) -> Value + Send + Sync>;

/// Slice reducer built from a default value and one handler per action type.
/// Unhandled actions leave the slice as it is.
#[derive(Clone)]
pub struct ActionHandlers {
    default: Value,
    handlers: HashMap<String, Handler>,
}

impl ActionHandlers {
    pub fn new(default: impl Into<Value>) -> Self {
        Self {
            default: default.into(),
            handlers: HashMap::new(),
        }
    }

    pub fn on<F>(mut self, action_type: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Value, &Action) -> Value + Send + Sync + 'static,
    {
        self.handlers.insert(action_type.into(), Arc::new(handler));
        self
    }
}

impl SliceReducer for ActionHandlers {
    fn reduce(&self, state: Option<&Value>, action: &Action) -> Value {
        let current = state.unwrap_or(&self.default);
        match self.handlers.get(&action.action_type) {
            Some(handler) => handler(current, action),
            None => current.clone(),
        }
    }
}

#[derive(Clone)]
struct Entry {
    id: String,
    reducer: Arc<dyn SliceReducer>,
}

/// The root reducer: every registered slice reducer, each owning the state
/// key equal to its module id.
///
/// Immutable once built; the composer hands out a fresh one per change.
#[derive(Clone, Default)]
pub struct CombinedReducer {
    entries: Arc<Vec<Entry>>,
}

impl CombinedReducer {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn slice_ids(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.id.as_str()).collect()
    }

    /// Returns `state` itself when no slice changed. Keys without a
    /// registered reducer are carried over untouched.
    pub fn reduce(&self, state: &Arc<RootState>, action: &Action) -> Arc<RootState> {
        let mut draft = RootStateDraft::new(state);
        for entry in self.entries.iter() {
            let next = entry.reducer.reduce(draft.previous(&entry.id), action);
            draft.set(&entry.id, next);
        }
        match draft.finish() {
            Some(next) => Arc::new(next),
            None => Arc::clone(state),
        }
    }
}

/// Accumulates slice reducers as modules arrive.
#[derive(Default)]
pub struct ReducerComposer {
    current: CombinedReducer,
}

impl ReducerComposer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `reducer` for slice `id` and return the new root reducer.
    /// A second reducer for the same id replaces the first.
    pub fn add(&mut self, id: &str, reducer: Arc<dyn SliceReducer>) -> CombinedReducer {
        let mut entries: Vec<Entry> = self
            .current
            .entries
            .iter()
            .filter(|e| e.id != id)
            .cloned()
            .collect();
        entries.push(Entry {
            id: id.to_string(),
            reducer,
        });
        self.current = CombinedReducer {
            entries: Arc::new(entries),
        };
        self.current.clone()
    }

    pub fn current(&self) -> CombinedReducer {
        self.current.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rootstore_common::select_payload;
    use serde_json::json;

    fn sample_reducer() -> Arc<dyn SliceReducer> {
        Arc::new(ActionHandlers::new("default").on("ADD_SAMPLE", |_, action| select_payload(action)))
    }

    #[test]
    fn handlers_start_from_default() {
        let reducer = ActionHandlers::new("default")
            .on("ADD_SAMPLE", |_, action| select_payload(action));

        assert_eq!(reducer.reduce(None, &Action::new("noise")), json!("default"));
        assert_eq!(
            reducer.reduce(None, &Action::new("ADD_SAMPLE").with_payload("x")),
            json!("x")
        );
        assert_eq!(
            reducer.reduce(Some(&json!("kept")), &Action::new("noise")),
            json!("kept")
        );
    }

    #[test]
    fn handlers_see_the_current_slice() {
        let counter = ActionHandlers::new(0).on("INC", |state, _| {
            json!(state.as_i64().unwrap_or_default() + 1)
        });
        let once = counter.reduce(None, &Action::new("INC"));
        assert_eq!(counter.reduce(Some(&once), &Action::new("INC")), json!(2));
    }

    #[test]
    fn empty_reducer_returns_same_state() {
        let state = Arc::new(RootState::new().with_slice("foreign", 1));
        let next = CombinedReducer::default().reduce(&state, &Action::new("X"));
        assert!(Arc::ptr_eq(&state, &next));
    }

    #[test]
    fn slices_are_initialized_and_unknown_keys_kept() {
        let mut composer = ReducerComposer::new();
        let combined = composer.add("sample", sample_reducer());

        let state = Arc::new(RootState::new().with_slice("foreign", 1));
        let next = combined.reduce(&state, &Action::new("@@rootstore/REPLACE"));
        assert_eq!(next.slice("sample"), Some(&json!("default")));
        assert_eq!(next.slice("foreign"), Some(&json!(1)));
    }

    #[test]
    fn unchanged_slices_keep_state_identity() {
        let mut composer = ReducerComposer::new();
        let combined = composer.add("sample", sample_reducer());

        let state = combined.reduce(&Arc::new(RootState::new()), &Action::new("init"));
        let again = combined.reduce(&state, &Action::new("noise"));
        assert!(Arc::ptr_eq(&state, &again));
    }

    #[test]
    fn composer_returns_fresh_reducer_each_time() {
        let mut composer = ReducerComposer::new();
        let first = composer.add("a", sample_reducer());
        let second = composer.add("b", sample_reducer());

        assert_eq!(first.slice_ids(), vec!["a"]);
        assert_eq!(second.slice_ids(), vec!["a", "b"]);
        assert_eq!(composer.current().len(), 2);
    }

    #[test]
    fn re_adding_an_id_replaces_its_reducer() {
        let mut composer = ReducerComposer::new();
        composer.add("a", sample_reducer());
        let combined = composer.add("a", Arc::new(ActionHandlers::new("other")));

        assert_eq!(combined.len(), 1);
        let next = combined.reduce(&Arc::new(RootState::new()), &Action::new("X"));
        assert_eq!(next.slice("a"), Some(&json!("other")));
    }
}
