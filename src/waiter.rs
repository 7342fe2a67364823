use crate::error::AggregatedFailure;

use std::fmt;

use tokio::sync::oneshot;

pub(crate) type WaitOutcome<E> = Result<(), AggregatedFailure<E>>;

/// A caller suspended in `ready()` or `finished()`.
///
/// Settling consumes the waiter, so it can be resolved or rejected at most once.
pub(crate) struct Waiter<E> {
  /// The in-progress count this waiter is waiting to fall below.
  pub(crate) threshold: usize,
  sender: oneshot::Sender<WaitOutcome<E>>,
}

impl<E> fmt::Debug for Waiter<E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Waiter")
      .field("threshold", &self.threshold)
      .field("abandoned", &self.is_abandoned())
      .finish()
  }
}

impl<E> Waiter<E> {
  pub(crate) fn new(threshold: usize) -> (Self, oneshot::Receiver<WaitOutcome<E>>) {
    let (sender, receiver) = oneshot::channel();
    (Self { threshold, sender }, receiver)
  }

  /// The caller stopped waiting (its future was dropped).
  pub(crate) fn is_abandoned(&self) -> bool {
    self.sender.is_closed()
  }

  pub(crate) fn resolve(self) {
    // A dropped receiver means nobody is listening anymore.
    let _ = self.sender.send(Ok(()));
  }

  pub(crate) fn reject(self, failure: AggregatedFailure<E>) {
    let _ = self.sender.send(Err(failure));
  }
}
