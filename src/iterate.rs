use crate::error::IterateError;
use crate::limit::ConcurrencyLimit;
use crate::limiter::Limiter;

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;

use futures::stream::{self, Stream, StreamExt};
use tokio::runtime::Handle as TokioHandle;
use tracing::{debug, info, warn};

/// Runs `operation` for every item of `producer`, with at most `limit` operations in
/// progress at once.
///
/// Items are pulled one at a time and only after the previous one was admitted. The
/// first operation failure stops admission; the run then waits for every started
/// operation to settle and fails with all of their failures.
///
/// # Errors
/// - `IterateError::Aggregated` if any operation failed (or panicked).
/// - `IterateError::Producer` if the producer yielded an error. Started operations are
///   drained first.
/// - `IterateError::NoRuntime` if called outside a Tokio runtime.
pub async fn iterate<S, T, P, E, F, Fut, R>(
  producer: S,
  limit: impl Into<ConcurrencyLimit>,
  operation: F,
) -> Result<(), IterateError<E, P>>
where
  S: Stream<Item = Result<T, P>>,
  F: FnMut(T) -> Fut,
  Fut: Future<Output = Result<R, E>> + Send + 'static,
  E: Send + Sync + 'static,
{
  let tokio_handle = TokioHandle::try_current().map_err(|_| IterateError::NoRuntime)?;
  let limiter = Limiter::new(limit, tokio_handle, "iterate");
  drive(&limiter, producer, operation).await
}

/// `iterate` over a plain collection.
pub async fn iterate_items<I, E, F, Fut, R>(
  items: I,
  limit: impl Into<ConcurrencyLimit>,
  operation: F,
) -> Result<(), IterateError<E, Infallible>>
where
  I: IntoIterator,
  F: FnMut(I::Item) -> Fut,
  Fut: Future<Output = Result<R, E>> + Send + 'static,
  E: Send + Sync + 'static,
{
  iterate(stream::iter(items).map(Ok::<_, Infallible>), limit, operation).await
}

/// Feeds `producer` through an existing `limiter` and waits for it to drain.
///
/// Useful when the caller wants to observe the limiter while the run is in progress.
pub async fn drive<S, T, P, E, F, Fut, R>(
  limiter: &Arc<Limiter<E>>,
  producer: S,
  mut operation: F,
) -> Result<(), IterateError<E, P>>
where
  S: Stream<Item = Result<T, P>>,
  F: FnMut(T) -> Fut,
  Fut: Future<Output = Result<R, E>> + Send + 'static,
  E: Send + Sync + 'static,
{
  tokio::pin!(producer);
  let mut started = 0usize;

  while let Some(next) = producer.next().await {
    let item = match next {
      Ok(item) => item,
      Err(error) => {
        warn!(limiter = %limiter.name(), started, "Producer failed. Draining started operations before returning.");
        let failures = limiter.finished().await.err();
        return Err(IterateError::Producer { error, failures });
      }
    };

    if let Err(aggregate) = limiter.ready().await {
      debug!(limiter = %limiter.name(), failures = aggregate.len(), "Admission refused. Stopping producer.");
      break;
    }
    if let Err(closed) = limiter.track(operation(item)) {
      // A failure settled between admission and tracking.
      debug!(limiter = %limiter.name(), "{}. Stopping producer.", closed);
      break;
    }
    started += 1;
    // Let the new operation reach its first suspension point before pulling again, so a
    // failure it raises synchronously closes admission for the next item.
    tokio::task::yield_now().await;
  }

  limiter.finished().await?;
  info!(limiter = %limiter.name(), started, "All operations completed.");
  Ok(())
}
