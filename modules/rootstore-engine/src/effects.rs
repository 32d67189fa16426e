//! Effect multiplexer: one live action feed per running effect, and one task
//! per effect pipeline forwarding its output back into the store.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::channel::mpsc as feed;
use futures::{FutureExt, StreamExt};
use rootstore_common::Action;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::store::RootStore;
use crate::traits::{ActionStream, Effect, StateStream};

/// What every effect receives besides its streams: the store it runs in and
/// the caller-supplied dependency value.
#[derive(Clone)]
pub struct EffectDeps {
    root_store: RootStore,
    extras: Arc<dyn Any + Send + Sync>,
}

impl EffectDeps {
    pub(crate) fn new(root_store: RootStore, extras: Arc<dyn Any + Send + Sync>) -> Self {
        Self { root_store, extras }
    }

    pub fn root_store(&self) -> &RootStore {
        &self.root_store
    }

    /// The dependency value passed to the store builder, if it is a `T`.
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.extras.downcast_ref::<T>()
    }
}

impl fmt::Debug for EffectDeps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectDeps")
            .field("root_store", &self.root_store.name())
            .finish_non_exhaustive()
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

pub struct EffectMultiplexer {
    runtime: Handle,
    feeds: Mutex<Vec<feed::UnboundedSender<Action>>>,
    output: mpsc::UnboundedSender<Action>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl EffectMultiplexer {
    /// Effect output is sent to `output`; the receiving end dispatches it.
    pub fn new(runtime: Handle, output: mpsc::UnboundedSender<Action>) -> Self {
        Self {
            runtime,
            feeds: Mutex::new(Vec::new()),
            output,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// A new live action feed. Registered immediately: every action broadcast
    /// after this call is delivered, even before the stream is first polled.
    pub fn action_stream(&self) -> ActionStream {
        let (tx, rx) = feed::unbounded();
        lock(&self.feeds).push(tx);
        rx.boxed()
    }

    /// Deliver `action` to every live feed, pruning closed ones.
    pub fn broadcast(&self, action: &Action) {
        lock(&self.feeds).retain(|tx| tx.unbounded_send(action.clone()).is_ok());
    }

    /// Build the effect's pipeline and drive it on its own task.
    pub fn attach(
        &self,
        module_id: &str,
        effect: &Arc<dyn Effect>,
        actions: ActionStream,
        states: StateStream,
        deps: EffectDeps,
    ) {
        let pipeline = match std::panic::catch_unwind(AssertUnwindSafe(|| {
            effect.run(actions, states, deps)
        })) {
            Ok(pipeline) => pipeline,
            Err(panic) => {
                error!(
                    module = %module_id,
                    message = %panic_message(panic.as_ref()),
                    "Effect panicked while building its pipeline"
                );
                return;
            }
        };

        let module_id = module_id.to_string();
        let output = self.output.clone();
        let handle = self.runtime.spawn(async move {
            let forward = async {
                let mut pipeline = pipeline;
                while let Some(action) = pipeline.next().await {
                    if output.send(action).is_err() {
                        break;
                    }
                }
            };
            if let Err(panic) = AssertUnwindSafe(forward).catch_unwind().await {
                error!(
                    module = %module_id,
                    message = %panic_message(panic.as_ref()),
                    "Effect pipeline panicked"
                );
                return;
            }
            debug!(module = %module_id, "Effect pipeline completed");
        });
        lock(&self.tasks).push(handle);
    }

    pub fn running(&self) -> usize {
        lock(&self.tasks).iter().filter(|t| !t.is_finished()).count()
    }

    /// Abort every pipeline and close every feed.
    pub fn shutdown(&self) {
        let tasks = std::mem::take(&mut *lock(&self.tasks));
        for task in &tasks {
            task.abort();
        }
        lock(&self.feeds).clear();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn feeds_see_actions_broadcast_before_first_poll() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let effects = EffectMultiplexer::new(Handle::current(), tx);

        let mut first = effects.action_stream();
        let mut second = effects.action_stream();
        effects.broadcast(&Action::new("A"));

        assert_eq!(first.next().await, Some(Action::new("A")));
        assert_eq!(second.next().await, Some(Action::new("A")));
    }

    #[tokio::test]
    async fn dropped_feeds_are_pruned_and_shutdown_closes_the_rest() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let effects = EffectMultiplexer::new(Handle::current(), tx);

        drop(effects.action_stream());
        let mut kept = effects.action_stream();
        effects.broadcast(&Action::new("A"));
        assert_eq!(lock(&effects.feeds).len(), 1);

        effects.shutdown();
        assert_eq!(kept.next().await, Some(Action::new("A")));
        assert_eq!(
            tokio::time::timeout(Duration::from_secs(1), kept.next()).await.unwrap(),
            None
        );
    }

    #[test]
    fn panic_messages_are_extracted() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(boxed.as_ref()), "non-string panic payload");
    }
}
