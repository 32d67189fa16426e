//! StreamSource: a re-subscribable stream.
//!
//! A `futures::Stream` can be consumed once. Sharing operators need to open a
//! *fresh* upstream subscription after a full teardown, so they work on a
//! factory instead: every `subscribe()` call builds a new stream.

use std::sync::Arc;

use futures::stream::{BoxStream, Stream, StreamExt};
use rootstore_common::{default_equality, EqualsPredicate};

use crate::cache_last::CacheLast;
use crate::memoize::memoize;

type Subscribe<T> = dyn Fn() -> BoxStream<'static, T> + Send + Sync;

pub struct StreamSource<T> {
    subscribe: Arc<Subscribe<T>>,
}

impl<T> Clone for StreamSource<T> {
    fn clone(&self) -> Self {
        Self {
            subscribe: Arc::clone(&self.subscribe),
        }
    }
}

impl<T> std::fmt::Debug for StreamSource<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSource").finish_non_exhaustive()
    }
}

impl<T: Send + 'static> StreamSource<T> {
    pub fn new<F, S>(factory: F) -> Self
    where
        F: Fn() -> S + Send + Sync + 'static,
        S: Stream<Item = T> + Send + 'static,
    {
        Self {
            subscribe: Arc::new(move || factory().boxed()),
        }
    }

    /// A cold source replaying `items` to every subscriber, then completing.
    pub fn from_values<I>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Clone + Sync,
    {
        let items: Arc<Vec<T>> = Arc::new(items.into_iter().collect());
        Self::new(move || futures::stream::iter(items.as_ref().clone()))
    }

    /// Open a new subscription.
    pub fn subscribe(&self) -> BoxStream<'static, T> {
        (self.subscribe)()
    }

    pub fn map<R, F>(&self, transform: F) -> StreamSource<R>
    where
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        let upstream = self.clone();
        let transform = Arc::new(transform);
        StreamSource::new(move || {
            let transform = Arc::clone(&transform);
            upstream.subscribe().map(move |value| (*transform)(value))
        })
    }

    pub fn filter<F>(&self, predicate: F) -> StreamSource<T>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let upstream = self.clone();
        let predicate = Arc::new(predicate);
        StreamSource::new(move || {
            let predicate = Arc::clone(&predicate);
            upstream
                .subscribe()
                .filter(move |value| futures::future::ready((*predicate)(value)))
        })
    }

    /// Apply an operator built elsewhere, e.g. the one returned by [`memoize`].
    pub fn pipe<R, Op>(&self, operator: Op) -> StreamSource<R>
    where
        Op: FnOnce(StreamSource<T>) -> StreamSource<R>,
    {
        operator(self.clone())
    }
}

impl<T: Clone + Send + 'static> StreamSource<T> {
    /// Share this source through a [`CacheLast`] with `PartialEq` equality.
    pub fn cache_last(&self) -> StreamSource<T>
    where
        T: PartialEq,
    {
        self.cache_last_by(default_equality())
    }

    pub fn cache_last_by(&self, equals: EqualsPredicate<T>) -> StreamSource<T> {
        CacheLast::new(self.clone(), equals).into_source()
    }

    /// Memoized selector with `PartialEq` equality on the selected value.
    pub fn select<R, F>(&self, selector: F) -> StreamSource<R>
    where
        R: Clone + PartialEq + Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        self.pipe(memoize(selector, default_equality()))
    }

    /// Memoized selector with a custom equality on the selected value.
    pub fn select_by<R, F>(&self, selector: F, equals: EqualsPredicate<R>) -> StreamSource<R>
    where
        R: Clone + Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        self.pipe(memoize(selector, equals))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_subscription_starts_over() {
        let source = StreamSource::from_values(vec![1, 2, 3]);
        let first: Vec<i32> = source.subscribe().collect().await;
        let second: Vec<i32> = source.subscribe().collect().await;
        assert_eq!(first, vec![1, 2, 3]);
        assert_eq!(second, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn map_and_filter_compose() {
        let source = StreamSource::from_values(1..=6)
            .filter(|v| v % 2 == 0)
            .map(|v| v * 10);
        let values: Vec<i32> = source.subscribe().collect().await;
        assert_eq!(values, vec![20, 40, 60]);
    }
}
