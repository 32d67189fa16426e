//! Memoized selectors: compute once per upstream value, replay to everyone.

use std::sync::Arc;

use rootstore_common::EqualsPredicate;

use crate::source::StreamSource;

/// Builds an operator that maps every upstream value through `transform` and
/// shares the results through a `CacheLast` configured with `equals`.
///
/// The transform sits upstream of the shared subscription, so it runs once
/// per upstream value no matter how many consumers are attached. Consumers
/// only see a new value when it differs from their previous one.
pub fn memoize<T, R, F>(
    transform: F,
    equals: EqualsPredicate<R>,
) -> impl FnOnce(StreamSource<T>) -> StreamSource<R>
where
    T: Send + 'static,
    R: Clone + Send + 'static,
    F: Fn(T) -> R + Send + Sync + 'static,
{
    let transform = Arc::new(transform);
    move |source: StreamSource<T>| {
        source
            .map(move |value| (*transform)(value))
            .cache_last_by(equals)
    }
}
