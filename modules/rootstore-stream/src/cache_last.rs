//! CacheLast: one shared upstream, replay-last for late consumers, duplicate
//! suppression per consumer, and teardown when the last consumer detaches.
//!
//! The upstream is pull-driven: whichever consumer polls first drives it on
//! behalf of everyone. Every emission lands in the slot *before* it is fanned
//! out to the per-consumer queues, and attach seeds the new queue from the
//! slot under the same lock, so a consumer can neither miss nor double-see a
//! value that races its attach.
//!
//! Unlike a plain share-and-replay:
//! - dropping the last consumer drops the upstream stream right away, which
//!   cancels whatever the upstream was doing;
//! - the slot is cleared with it, so a consumer attaching after a gap waits
//!   for the fresh subscription's first value instead of seeing a stale one.

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

use futures::stream::{BoxStream, Stream, StreamExt};
use futures::task::ArcWake;
use rootstore_common::EqualsPredicate;
use tracing::debug;

use crate::source::StreamSource;

pub struct CacheLast<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for CacheLast<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

struct Shared<T> {
    source: StreamSource<T>,
    equals: EqualsPredicate<T>,
    entry: Mutex<Entry<T>>,
    notifier: Arc<Notifier>,
}

/// Lives as long as at least one consumer is attached.
struct Entry<T> {
    upstream: Option<BoxStream<'static, T>>,
    last: Option<T>,
    completed: bool,
    consumers: HashMap<u64, VecDeque<T>>,
    next_id: u64,
}

impl<T> Default for Entry<T> {
    fn default() -> Self {
        Self {
            upstream: None,
            last: None,
            completed: false,
            consumers: HashMap::new(),
            next_id: 0,
        }
    }
}

/// Waker handed to the upstream. Wakes every consumer currently waiting, so
/// whoever polls next drives the shared subscription.
#[derive(Default)]
struct Notifier {
    wakers: Mutex<HashMap<u64, Waker>>,
}

impl Notifier {
    fn register(&self, id: u64, waker: &Waker) {
        let mut wakers = self.wakers.lock().unwrap_or_else(PoisonError::into_inner);
        match wakers.get_mut(&id) {
            Some(existing) if existing.will_wake(waker) => {}
            Some(existing) => existing.clone_from(waker),
            None => {
                wakers.insert(id, waker.clone());
            }
        }
    }

    fn remove(&self, id: u64) {
        self.wakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    fn wake_except(&self, skip: Option<u64>) {
        let woken: Vec<Waker> = {
            let mut wakers = self.wakers.lock().unwrap_or_else(PoisonError::into_inner);
            let ids: Vec<u64> = wakers.keys().copied().filter(|id| Some(*id) != skip).collect();
            ids.into_iter().filter_map(|id| wakers.remove(&id)).collect()
        };
        for waker in woken {
            waker.wake();
        }
    }
}

impl ArcWake for Notifier {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.wake_except(None);
    }
}

impl<T: Clone + Send + 'static> CacheLast<T> {
    pub fn new(source: StreamSource<T>, equals: EqualsPredicate<T>) -> Self {
        Self {
            shared: Arc::new(Shared {
                source,
                equals,
                entry: Mutex::new(Entry::default()),
                notifier: Arc::new(Notifier::default()),
            }),
        }
    }

    /// Attach a consumer. The first attach opens the upstream subscription;
    /// later ones join it and start from the cached value, if any.
    pub fn attach(&self) -> CacheLastStream<T> {
        let mut entry = self.shared.lock();
        let id = entry.next_id;
        entry.next_id += 1;

        if entry.consumers.is_empty() {
            debug!(consumer = id, "Opening upstream subscription");
            entry.upstream = Some(self.shared.source.subscribe());
            entry.completed = false;
        }

        let queue: VecDeque<T> = entry.last.iter().cloned().collect();
        entry.consumers.insert(id, queue);

        CacheLastStream {
            shared: Arc::clone(&self.shared),
            id,
            previous: None,
        }
    }

    /// Expose the cache as a source; every subscription is an attach.
    pub fn into_source(self) -> StreamSource<T> {
        StreamSource::new(move || self.attach())
    }

    pub fn consumer_count(&self) -> usize {
        self.shared.lock().consumers.len()
    }

    pub fn has_value(&self) -> bool {
        self.shared.lock().last.is_some()
    }
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, Entry<T>> {
        self.entry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the upstream to drop when `id` was the last consumer.
    fn detach(&self, id: u64) -> Option<BoxStream<'static, T>> {
        self.notifier.remove(id);
        let mut entry = self.lock();
        entry.consumers.remove(&id);
        if !entry.consumers.is_empty() {
            return None;
        }
        debug!(consumer = id, "Last consumer detached, tearing down upstream");
        entry.last = None;
        entry.completed = false;
        entry.upstream.take()
    }
}

impl<T: Clone> Shared<T> {
    fn poll_for(&self, id: u64, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let (poll, finished) = self.poll_locked(id, cx);
        // Dropped outside the lock: upstream teardown may run arbitrary code.
        drop(finished);
        poll
    }

    /// Also returns a completed upstream, for the caller to drop once the
    /// entry lock is released.
    fn poll_locked(
        &self,
        id: u64,
        cx: &mut Context<'_>,
    ) -> (Poll<Option<T>>, Option<BoxStream<'static, T>>) {
        let mut entry = self.lock();
        loop {
            if let Some(value) = entry.consumers.get_mut(&id).and_then(VecDeque::pop_front) {
                return (Poll::Ready(Some(value)), None);
            }
            if entry.completed {
                return (Poll::Ready(None), None);
            }
            let Some(upstream) = entry.upstream.as_mut() else {
                return (Poll::Ready(None), None);
            };

            self.notifier.register(id, cx.waker());
            let waker = futures::task::waker(Arc::clone(&self.notifier));
            let mut upstream_cx = Context::from_waker(&waker);

            match upstream.poll_next_unpin(&mut upstream_cx) {
                Poll::Ready(Some(value)) => {
                    entry.last = Some(value.clone());
                    for queue in entry.consumers.values_mut() {
                        queue.push_back(value.clone());
                    }
                    self.notifier.wake_except(Some(id));
                }
                Poll::Ready(None) => {
                    debug!("Upstream completed");
                    entry.completed = true;
                    let finished = entry.upstream.take();
                    self.notifier.wake_except(Some(id));
                    // Only polled with an empty queue, so nothing is left for `id`.
                    return (Poll::Ready(None), finished);
                }
                Poll::Pending => return (Poll::Pending, None),
            }
        }
    }
}

/// One consumer of a [`CacheLast`]. Dropping it detaches.
pub struct CacheLastStream<T> {
    shared: Arc<Shared<T>>,
    id: u64,
    previous: Option<T>,
}

impl<T> Unpin for CacheLastStream<T> {}

impl<T: Clone> Stream for CacheLastStream<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let this = self.get_mut();
        loop {
            match this.shared.poll_for(this.id, cx) {
                Poll::Ready(Some(value)) => {
                    if let Some(previous) = &this.previous {
                        if (this.shared.equals)(previous, &value) {
                            continue;
                        }
                    }
                    this.previous = Some(value.clone());
                    return Poll::Ready(Some(value));
                }
                other => return other,
            }
        }
    }
}

impl<T> Drop for CacheLastStream<T> {
    fn drop(&mut self) {
        // Dropped outside the lock: upstream teardown may run arbitrary code.
        let released = self.shared.detach(self.id);
        drop(released);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use rootstore_common::default_equality;

    fn open_source(values: Vec<i32>) -> StreamSource<i32> {
        StreamSource::new(move || {
            futures::stream::iter(values.clone()).chain(futures::stream::pending())
        })
    }

    #[tokio::test]
    async fn counts_consumers() {
        let cache = CacheLast::new(open_source(vec![1]), default_equality());
        assert_eq!(cache.consumer_count(), 0);

        let a = cache.attach();
        let b = cache.attach();
        assert_eq!(cache.consumer_count(), 2);

        drop(a);
        assert_eq!(cache.consumer_count(), 1);
        drop(b);
        assert_eq!(cache.consumer_count(), 0);
    }

    #[tokio::test]
    async fn slot_is_filled_by_polling_and_cleared_on_teardown() {
        let cache = CacheLast::new(open_source(vec![5]), default_equality());
        let mut consumer = cache.attach();
        assert!(!cache.has_value());

        assert_eq!(consumer.next().await, Some(5));
        assert!(cache.has_value());

        drop(consumer);
        assert!(!cache.has_value());
    }

    #[tokio::test]
    async fn custom_equality_coalesces() {
        let same_parity: EqualsPredicate<i32> = Arc::new(|a: &i32, b: &i32| a % 2 == b % 2);
        let cache = CacheLast::new(
            StreamSource::from_values(vec![1, 3, 2, 4, 5]),
            same_parity,
        );
        let values: Vec<i32> = cache.attach().collect().await;
        assert_eq!(values, vec![1, 2, 5]);
    }

    #[tokio::test]
    async fn nothing_before_first_value() {
        let cache = CacheLast::new(
            StreamSource::new(futures::stream::pending::<i32>),
            default_equality(),
        );
        let mut consumer = cache.attach();
        assert!(consumer.next().now_or_never().is_none());
    }
}
