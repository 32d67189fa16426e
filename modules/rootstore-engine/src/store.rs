//! The root store: state container, dispatch, subscriptions, and dynamic
//! feature-module registration.
//!
//! Dispatch is serialized by a single writer lock: reduce, publish the new
//! snapshot, then feed the action to running effects. Readers never block;
//! they load the current snapshot from an `ArcSwap`. Listeners are called
//! after the lock is released, so they may dispatch themselves.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use arc_swap::ArcSwap;
use futures::StreamExt;
use rootstore_common::{
    init_feature_action, Action, RootState, RootStoreError, StoreConfig, INIT_ACTION,
    REPLACE_ACTION,
};
use rootstore_stream::StreamSource;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::effects::{panic_message, EffectDeps, EffectMultiplexer};
use crate::module::FeatureModule;
use crate::reducer::{CombinedReducer, ReducerComposer};
use crate::registry::ModuleRegistry;
use crate::traits::{Effect, StateStream};

type Listener = Arc<dyn Fn() + Send + Sync>;

/// Cheap to clone; clones share one store.
///
/// Running effects hold a clone, so call [`RootStore::shutdown`] to stop
/// them and let the store go.
#[derive(Clone)]
pub struct RootStore {
    inner: Arc<Inner>,
}

struct Inner {
    config: StoreConfig,
    state: ArcSwap<RootState>,
    reducer: ArcSwap<CombinedReducer>,
    write_lock: Mutex<()>,
    modules: Mutex<Modules>,
    effects: EffectMultiplexer,
    listeners: Mutex<Listeners>,
    announcements: Mutex<VecDeque<String>>,
    announcing: AtomicBool,
    dependencies: Arc<dyn Any + Send + Sync>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

#[derive(Default)]
struct Modules {
    registry: ModuleRegistry,
    composer: ReducerComposer,
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: HashMap<u64, Listener>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct RootStoreBuilder {
    config: Option<StoreConfig>,
    dependencies: Arc<dyn Any + Send + Sync>,
    preloaded_state: Option<RootState>,
}

impl Default for RootStoreBuilder {
    fn default() -> Self {
        Self {
            config: None,
            dependencies: Arc::new(()),
            preloaded_state: None,
        }
    }
}

impl RootStoreBuilder {
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Value handed to every effect through [`EffectDeps::get`].
    pub fn dependencies<D: Any + Send + Sync>(mut self, dependencies: D) -> Self {
        self.dependencies = Arc::new(dependencies);
        self
    }

    /// Initial state. Takes precedence over the configured preloaded-state file.
    pub fn preloaded_state(mut self, state: RootState) -> Self {
        self.preloaded_state = Some(state);
        self
    }

    /// Must be called from within a tokio runtime; effects run on it.
    pub fn build(self) -> Result<RootStore, RootStoreError> {
        let runtime = Handle::try_current().map_err(|_| RootStoreError::NoRuntime)?;
        let config = self.config.unwrap_or_default();
        let initial = match self.preloaded_state {
            Some(state) => state,
            None => config.load_preloaded_state()?.unwrap_or_default(),
        };

        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let store = RootStore {
            inner: Arc::new(Inner {
                state: ArcSwap::from_pointee(initial),
                reducer: ArcSwap::from_pointee(CombinedReducer::default()),
                write_lock: Mutex::new(()),
                modules: Mutex::new(Modules::default()),
                effects: EffectMultiplexer::new(runtime.clone(), output_tx),
                listeners: Mutex::new(Listeners::default()),
                announcements: Mutex::new(VecDeque::new()),
                announcing: AtomicBool::new(false),
                dependencies: self.dependencies,
                forwarder: Mutex::new(None),
                shut_down: AtomicBool::new(false),
                config,
            }),
        };

        store.dispatch(Action::new(INIT_ACTION))?;

        let forwarder = runtime.spawn(forward_effect_output(
            Arc::downgrade(&store.inner),
            output_rx,
        ));
        *lock(&store.inner.forwarder) = Some(forwarder);

        info!(
            store = %store.name(),
            slices = store.get_state().len(),
            "Root store ready"
        );
        Ok(store)
    }
}

/// Dispatches whatever the effect pipelines emit, in emission order.
async fn forward_effect_output(inner: Weak<Inner>, mut output: mpsc::UnboundedReceiver<Action>) {
    while let Some(action) = output.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let store = RootStore { inner };
        match store.dispatch(action) {
            Ok(()) => {}
            Err(RootStoreError::ShutDown) => break,
            Err(err) => error!(store = %store.name(), error = %err, "Effect output failed to dispatch"),
        }
    }
}

impl RootStore {
    pub fn builder() -> RootStoreBuilder {
        RootStoreBuilder::default()
    }

    /// Store with default config and no modules.
    pub fn new() -> Result<Self, RootStoreError> {
        Self::builder().build()
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Current snapshot. Never blocks on a dispatch in progress.
    pub fn get_state(&self) -> Arc<RootState> {
        self.inner.state.load_full()
    }

    /// Reduce `action`, publish the result, feed running effects, then call
    /// listeners. A panicking reducer leaves the state untouched and is
    /// reported as [`RootStoreError::ReducerPanicked`].
    pub fn dispatch(&self, action: Action) -> Result<(), RootStoreError> {
        if self.is_shut_down() {
            return Err(RootStoreError::ShutDown);
        }
        let changed = {
            let _writer = lock(&self.inner.write_lock);
            self.inner.reduce_locked(&action, true)?
        };
        if changed {
            self.inner.notify_listeners();
        }
        Ok(())
    }

    /// A callable bound to this store.
    pub fn dispatcher(&self) -> impl Fn(Action) -> Result<(), RootStoreError> + Clone + Send + Sync {
        let store = self.clone();
        move |action| store.dispatch(action)
    }

    /// Call `listener` after every dispatch that changes the state. Detached
    /// when the returned handle is dropped. After shutdown the listener is
    /// dropped right away and the handle is inert.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut listeners = lock(&self.inner.listeners);
        // Checked under the listeners lock, which shutdown takes after
        // raising the flag.
        if self.is_shut_down() {
            drop(listeners);
            drop(listener);
            return Subscription {
                inner: Weak::new(),
                id: 0,
            };
        }
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.entries.insert(id, Arc::new(listener));
        Subscription {
            inner: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// The current state, then every new state. Ends on shutdown.
    pub fn as_stream(&self) -> StateStream {
        let (tx, rx) = futures::channel::mpsc::unbounded();

        let weak = Arc::downgrade(&self.inner);
        let sender = tx.clone();
        let subscription = self.subscribe(move || {
            if let Some(inner) = weak.upgrade() {
                let _ = sender.unbounded_send(inner.state.load_full());
            }
        });
        // Subscribed first: a concurrent dispatch may repeat a state but
        // can never be missed.
        let _ = tx.unbounded_send(self.get_state());
        drop(tx);

        rx.map(move |state| {
            // Keeps the listener attached for as long as the stream lives.
            let _ = &subscription;
            state
        })
        .boxed()
    }

    /// Re-subscribable view of [`RootStore::as_stream`].
    pub fn as_source(&self) -> StreamSource<Arc<RootState>> {
        let store = self.clone();
        StreamSource::new(move || store.as_stream())
    }

    /// Memoized projection of the state: `selector` runs once per state
    /// change however many consumers subscribe, and consumers only see
    /// distinct results.
    pub fn select<R, F>(&self, selector: F) -> StreamSource<R>
    where
        R: Clone + PartialEq + Send + 'static,
        F: Fn(Arc<RootState>) -> R + Send + Sync + 'static,
    {
        self.as_source().select(selector)
    }

    /// Admit `module` and any dependencies not yet known, dependencies first.
    /// Each newly admitted module gets its reducer installed, its effect
    /// started, and an activation announcement dispatched, in admission
    /// order. Adding a known module id is a no-op.
    pub fn add_feature_module(&self, module: &Arc<FeatureModule>) -> &Self {
        if self.is_shut_down() {
            warn!(store = %self.name(), module = %module.id(), "Store is shut down, module ignored");
            return self;
        }

        let (admitted, replaced) = {
            let mut modules = lock(&self.inner.modules);
            let admitted = modules.registry.admit(module);
            if admitted.is_empty() {
                debug!(store = %self.name(), module = %module.id(), "Feature module already registered");
                return self;
            }

            let mut combined = None;
            for m in &admitted {
                if let Some(reducer) = m.reducer() {
                    combined = Some(modules.composer.add(m.id(), Arc::clone(reducer)));
                }
            }
            let replaced = match combined {
                Some(combined) => self.inner.replace_reducer(combined),
                None => false,
            };

            (admitted, replaced)
        };

        if replaced {
            self.inner.notify_listeners();
        }

        // Effects are user code and may call back into the store, so they
        // start with the modules lock released. Their feeds are registered
        // before any announcement is queued.
        for m in &admitted {
            if let Some(effect) = m.effect() {
                self.start_effect(m.id(), effect);
            }
            info!(
                store = %self.name(),
                module = %m.id(),
                reducer = m.has_reducer(),
                effect = m.has_effect(),
                "Feature module registered"
            );
        }

        lock(&self.inner.announcements).extend(admitted.iter().map(|m| m.id().to_string()));
        self.announce_pending();
        self
    }

    /// Ids of every registered module, in admission order.
    pub fn module_ids(&self) -> Vec<String> {
        lock(&self.inner.modules)
            .registry
            .admission_order()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    pub fn has_module(&self, id: &str) -> bool {
        lock(&self.inner.modules).registry.contains(id)
    }

    /// Every module registered so far, then each one registered later.
    pub fn admissions(&self) -> futures::stream::BoxStream<'static, Arc<FeatureModule>> {
        lock(&self.inner.modules).registry.subscribe().boxed()
    }

    pub fn running_effects(&self) -> usize {
        self.inner.effects.running()
    }

    /// Stop every effect, detach every listener, and end every state stream.
    /// Later dispatches fail with [`RootStoreError::ShutDown`].
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.effects.shutdown();
        if let Some(forwarder) = lock(&self.inner.forwarder).take() {
            forwarder.abort();
        }
        // Dropped outside the lock: listeners own stream senders.
        let listeners = std::mem::take(&mut lock(&self.inner.listeners).entries);
        drop(listeners);
        info!(store = %self.name(), "Root store shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    fn start_effect(&self, module_id: &str, effect: &Arc<dyn Effect>) {
        let actions = self.inner.effects.action_stream();
        let states = self.as_stream();
        let deps = EffectDeps::new(self.clone(), Arc::clone(&self.inner.dependencies));
        self.inner
            .effects
            .attach(module_id, effect, actions, states, deps);
        debug!(store = %self.name(), module = %module_id, "Effect started");
    }

    /// Dispatches queued activation announcements. Re-entrant calls (an
    /// effect registering a module while reacting to an announcement) only
    /// queue; the outermost call drains.
    fn announce_pending(&self) {
        loop {
            if self.inner.announcing.swap(true, Ordering::SeqCst) {
                return;
            }
            loop {
                let next = lock(&self.inner.announcements).pop_front();
                let Some(id) = next else {
                    break;
                };
                debug!(store = %self.name(), module = %id, "Announcing feature module");
                if let Err(err) = self.dispatch(init_feature_action(&id)) {
                    error!(store = %self.name(), module = %id, error = %err, "Feature announcement failed");
                }
            }
            self.inner.announcing.store(false, Ordering::SeqCst);
            // Another thread may have queued between the last pop and the reset.
            if lock(&self.inner.announcements).is_empty() {
                return;
            }
        }
    }
}

impl fmt::Debug for RootStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootStore")
            .field("name", &self.name())
            .field("modules", &self.module_ids())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

impl Inner {
    /// Caller holds the write lock. Returns whether the state changed.
    fn reduce_locked(&self, action: &Action, broadcast: bool) -> Result<bool, RootStoreError> {
        if self.config.trace_actions {
            info!(store = %self.config.name, action_type = %action.action_type, "Dispatching action");
        } else {
            trace!(store = %self.config.name, action_type = %action.action_type, "Dispatching action");
        }

        let reducer = self.reducer.load_full();
        let previous = self.state.load_full();
        let next = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            reducer.reduce(&previous, action)
        }))
        .map_err(|panic| {
            let message = panic_message(panic.as_ref());
            error!(
                store = %self.config.name,
                action_type = %action.action_type,
                payload = ?action.payload,
                %message,
                "Reducer panicked, state left unchanged"
            );
            RootStoreError::ReducerPanicked {
                action_type: action.action_type.clone(),
                message,
            }
        })?;

        let changed = !Arc::ptr_eq(&previous, &next);
        if changed {
            self.state.store(next);
        }
        if broadcast {
            self.effects.broadcast(action);
        }
        Ok(changed)
    }

    /// Install `combined` and let it initialize its slices. Returns whether
    /// the state changed.
    fn replace_reducer(&self, combined: CombinedReducer) -> bool {
        let _writer = lock(&self.write_lock);
        debug!(store = %self.config.name, slices = combined.len(), "Swapping root reducer");
        self.reducer.store(Arc::new(combined));
        match self.reduce_locked(&Action::new(REPLACE_ACTION), false) {
            Ok(changed) => changed,
            Err(err) => {
                error!(store = %self.config.name, error = %err, "Replacing the root reducer failed");
                false
            }
        }
    }

    fn notify_listeners(&self) {
        let snapshot: Vec<Listener> = lock(&self.listeners).entries.values().cloned().collect();
        for listener in snapshot {
            listener();
        }
    }
}

/// Handle returned by [`RootStore::subscribe`].
#[must_use = "dropping a Subscription detaches its listener"]
pub struct Subscription {
    inner: Weak<Inner>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            let removed = lock(&inner.listeners).entries.remove(&self.id);
            drop(removed);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reducer::ActionHandlers;
    use rootstore_common::select_payload;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn sample_module() -> Arc<FeatureModule> {
        FeatureModule::builder("sample")
            .reducer(ActionHandlers::new("default").on("ADD_SAMPLE", |_, a| select_payload(a)))
            .build()
            .unwrap()
    }

    #[test]
    fn build_outside_runtime_fails() {
        assert!(matches!(RootStore::new(), Err(RootStoreError::NoRuntime)));
    }

    #[tokio::test]
    async fn new_store_is_empty() {
        let store = RootStore::new().unwrap();
        assert!(store.get_state().is_empty());
        assert!(store.module_ids().is_empty());
        store.shutdown();
    }

    #[tokio::test]
    async fn registering_a_reducer_initializes_its_slice() {
        let store = RootStore::new().unwrap();
        store.add_feature_module(&sample_module());
        assert_eq!(store.get_state().slice("sample"), Some(&json!("default")));
        store.shutdown();
    }

    #[tokio::test]
    async fn listeners_only_fire_on_change() {
        let store = RootStore::new().unwrap();
        store.add_feature_module(&sample_module());

        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let _subscription = store.subscribe(move || {
            counted.fetch_add(1, Ordering::SeqCst);
        });

        store.dispatch(Action::new("noise")).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        store.dispatch(Action::new("ADD_SAMPLE").with_payload("x")).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        store.shutdown();
    }

    #[tokio::test]
    async fn dispatch_after_shutdown_fails() {
        let store = RootStore::new().unwrap();
        store.shutdown();
        assert!(matches!(
            store.dispatch(Action::new("X")),
            Err(RootStoreError::ShutDown)
        ));
    }

    #[tokio::test]
    async fn dependencies_reach_effect_deps() {
        let store = RootStore::builder().dependencies(42_u32).build().unwrap();
        let deps = EffectDeps::new(store.clone(), Arc::clone(&store.inner.dependencies));
        assert_eq!(deps.get::<u32>(), Some(&42));
        assert!(deps.get::<String>().is_none());
        store.shutdown();
    }
}
