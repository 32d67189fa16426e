//! Root store with dynamic feature-module composition.
//!
//! Feature modules bring a slice reducer and/or an effect and may depend on
//! other modules. Registering one admits it and its missing dependencies
//! exactly once, dependencies first, folds their reducers into the root
//! reducer without restarting, starts their effects, and announces each of
//! them with an `@@rootstore/INIT_FEATURE` action.

pub mod effects;
pub mod module;
pub mod reducer;
pub mod registry;
pub mod store;
pub mod traits;

pub use effects::{EffectDeps, EffectMultiplexer};
pub use module::{FeatureModule, FeatureModuleBuilder};
pub use reducer::{ActionHandlers, CombinedReducer, ReducerComposer};
pub use registry::ModuleRegistry;
pub use store::{RootStore, RootStoreBuilder, Subscription};
pub use traits::{ActionStream, ActionStreamExt, Effect, SliceReducer, StateStream};
