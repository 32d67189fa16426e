//! Core traits for feature modules.

use std::sync::Arc;

use futures::stream::{BoxStream, StreamExt};
use rootstore_common::{is_init_feature, Action, RootState};
use serde_json::Value;

use crate::effects::EffectDeps;

/// Live stream of dispatched actions.
pub type ActionStream = BoxStream<'static, Action>;

/// Live stream of root state snapshots.
pub type StateStream = BoxStream<'static, Arc<RootState>>;

/// Pure slice update. No I/O, no side effects.
///
/// `state` is `None` until the slice has a value; return the slice's default
/// then. Implemented for plain closures and fns with the same signature.
pub trait SliceReducer: Send + Sync {
    fn reduce(&self, state: Option<&Value>, action: &Action) -> Value;
}

impl<F> SliceReducer for F
where
    F: Fn(Option<&Value>, &Action) -> Value + Send + Sync,
{
    fn reduce(&self, state: Option<&Value>, action: &Action) -> Value {
        self(state, action)
    }
}

/// Side-effect pipeline. Watches the action and state streams and returns
/// the stream of follow-up actions to dispatch.
///
/// Called once, when the owning module is admitted. The returned stream is
/// driven on its own task for the lifetime of the store.
pub trait Effect: Send + Sync {
    fn run(&self, actions: ActionStream, states: StateStream, deps: EffectDeps) -> ActionStream;
}

impl<F> Effect for F
where
    F: Fn(ActionStream, StateStream, EffectDeps) -> ActionStream + Send + Sync,
{
    fn run(&self, actions: ActionStream, states: StateStream, deps: EffectDeps) -> ActionStream {
        self(actions, states, deps)
    }
}

/// Filters for writing effect pipelines.
pub trait ActionStreamExt: Sized {
    /// Keep actions whose type is one of `types`.
    fn of_type(self, types: &[&str]) -> ActionStream;

    /// Keep only the activation announcement of `module_id`.
    fn of_init_feature(self, module_id: &str) -> ActionStream;
}

impl ActionStreamExt for ActionStream {
    fn of_type(self, types: &[&str]) -> ActionStream {
        let types: Vec<String> = types.iter().map(|t| t.to_string()).collect();
        self.filter(move |action| {
            futures::future::ready(types.iter().any(|t| action.is(t)))
        })
        .boxed()
    }

    fn of_init_feature(self, module_id: &str) -> ActionStream {
        let module_id = module_id.to_string();
        self.filter(move |action| futures::future::ready(is_init_feature(action, &module_id)))
            .boxed()
    }
}
