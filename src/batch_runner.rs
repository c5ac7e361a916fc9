// QuestSage - batch_runner.rs

use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;

/// How many items of a batch may be in flight at once.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Runs `op` over every item with at most `limit` operations in flight.
///
/// Each item gets its own `Result`, returned in input order no matter when
/// the items finish. A failing item never cancels its siblings; the caller
/// decides whether a partial batch is worth continuing with. The closure
/// also receives the item's input index, which is the identity results are
/// tracked by (titles are not unique).
pub async fn run_batch<T, R, E, F, Fut>(items: Vec<T>, limit: usize, op: F) -> Vec<Result<R, E>>
where
    F: Fn(usize, T) -> Fut,
    Fut: Future<Output = Result<R, E>>,
{
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
    let tasks = items.into_iter().enumerate().map(|(index, item)| {
        let semaphore = Arc::clone(&semaphore);
        let task = op(index, item);
        async move {
            let _permit = semaphore.acquire().await.expect("semaphore never closed");
            task.await
        }
    });
    join_all(tasks).await
}
