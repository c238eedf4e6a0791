//! Bounded-concurrency execution over item sequences.
//!
//! Engine passes are I/O-bound and commutative; each call site picks its own
//! concurrency level, there is no global limit. Results are collected in
//! completion order, callers sort afterwards when they need determinism.

use futures::stream::{self, StreamExt, TryStreamExt};
use std::future::Future;

/// Run `worker` over `items` with at most `concurrency` operations in
/// flight, collecting all results in completion order.
pub async fn collect_bounded<I, T, F, Fut, R, E>(
    items: I,
    concurrency: usize,
    worker: F,
) -> Result<Vec<R>, E>
where
    I: IntoIterator<Item = T>,
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<R, E>>,
{
    stream::iter(items)
        .map(worker)
        .buffer_unordered(concurrency.max(1))
        .try_collect()
        .await
}

/// Run `worker` over `items` with at most `concurrency` operations in
/// flight, failing fast on the first error.
pub async fn try_for_each_bounded<I, T, F, Fut, E>(
    items: I,
    concurrency: usize,
    worker: F,
) -> Result<(), E>
where
    I: IntoIterator<Item = T>,
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<(), E>>,
{
    stream::iter(items.into_iter().map(Ok))
        .try_for_each_concurrent(Some(concurrency.max(1)), worker)
        .await
}
