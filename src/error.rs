use std::fmt;
use std::slice;
use std::sync::Arc;

use thiserror::Error;

/// A single failure recorded by a `Limiter` when a tracked operation settles unsuccessfully.
#[derive(Error, Debug)]
pub enum Failure<E> {
  /// The operation completed with `Err(E)`.
  #[error("operation failed: {0}")]
  Operation(E),

  /// The operation panicked. Holds the panic message when it was a string.
  #[error("operation panicked: {0}")]
  Panicked(String),

  /// The runtime dropped the operation before it settled (e.g. during runtime shutdown).
  #[error("operation was dropped before it settled")]
  Aborted,
}

impl<E> Failure<E> {
  /// Returns the operation's own error, if this failure carries one.
  pub fn as_operation_error(&self) -> Option<&E> {
    match self {
      Failure::Operation(err) => Some(err),
      _ => None,
    }
  }
}

/// Every failure a `Limiter` recorded, in the order the operations settled.
///
/// Delivered only once all tracked work has drained. Cloning is cheap: all clones
/// share the same sealed list, so every rejected waiter observes the same failures.
#[derive(Error)]
#[error("{} tracked operation(s) failed", .failures.len())]
pub struct AggregatedFailure<E> {
  failures: Arc<[Failure<E>]>,
}

impl<E> AggregatedFailure<E> {
  pub(crate) fn seal(failures: Vec<Failure<E>>) -> Self {
    Self {
      failures: failures.into(),
    }
  }

  /// The recorded failures in settlement order.
  pub fn failures(&self) -> &[Failure<E>] {
    &self.failures
  }

  pub fn len(&self) -> usize {
    self.failures.len()
  }

  pub fn is_empty(&self) -> bool {
    self.failures.is_empty()
  }

  pub fn iter(&self) -> slice::Iter<'_, Failure<E>> {
    self.failures.iter()
  }

  /// Iterates over the operations' own errors, skipping panics and aborts.
  pub fn operation_errors(&self) -> impl Iterator<Item = &E> + '_ {
    self.failures.iter().filter_map(Failure::as_operation_error)
  }
}

impl<E> Clone for AggregatedFailure<E> {
  fn clone(&self) -> Self {
    Self {
      failures: Arc::clone(&self.failures),
    }
  }
}

impl<E: fmt::Debug> fmt::Debug for AggregatedFailure<E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("AggregatedFailure")
      .field("failures", &&*self.failures)
      .finish()
  }
}

impl<'a, E> IntoIterator for &'a AggregatedFailure<E> {
  type Item = &'a Failure<E>;
  type IntoIter = slice::Iter<'a, Failure<E>>;

  fn into_iter(self) -> Self::IntoIter {
    self.iter()
  }
}

/// Errors returned by `iterate`, `iterate_items` and `drive`.
#[derive(Error, Debug)]
pub enum IterateError<E, P> {
  /// The producer failed. Already-tracked operations were drained first; if any of
  /// them failed meanwhile, their aggregate is carried in `failures`.
  #[error("producer failed: {error}")]
  Producer {
    error: P,
    failures: Option<AggregatedFailure<E>>,
  },

  /// One or more tracked operations failed.
  #[error("{0}")]
  Aggregated(#[from] AggregatedFailure<E>),

  #[error("no Tokio runtime is available to run tracked operations")]
  NoRuntime,
}

impl<E, P> IterateError<E, P> {
  /// The aggregated operation failures carried by this error, if any.
  pub fn aggregated(&self) -> Option<&AggregatedFailure<E>> {
    match self {
      IterateError::Aggregated(aggregate) => Some(aggregate),
      IterateError::Producer { failures, .. } => failures.as_ref(),
      IterateError::NoRuntime => None,
    }
  }
}

/// Returned by `Limiter::track` once a failure has been recorded. The operation was not started.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("limiter stopped admitting operations after a failure")]
pub struct AdmissionClosed;

/// Returned when a string cannot be parsed into a `ConcurrencyLimit`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid concurrency limit {0:?}: expected a positive integer or \"unbounded\"")]
pub struct LimitParseError(pub String);
