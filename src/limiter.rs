use crate::error::{AdmissionClosed, AggregatedFailure, Failure};
use crate::limit::ConcurrencyLimit;
use crate::waiter::Waiter;

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::mem;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle as TokioHandle;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

/// Observable lifecycle of a `Limiter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimiterState {
  /// No failure recorded; admission is gated only by the concurrency limit.
  Accepting,
  /// A failure was recorded; every request now waits for zero operations in progress.
  Draining,
  /// Drained after a failure. All waiters were rejected and nothing more is tracked.
  Settled,
}

enum Phase<E> {
  Accepting,
  Draining(Vec<Failure<E>>),
  Settled(AggregatedFailure<E>),
}

impl<E> Phase<E> {
  fn state(&self) -> LimiterState {
    match self {
      Phase::Accepting => LimiterState::Accepting,
      Phase::Draining(_) => LimiterState::Draining,
      Phase::Settled(_) => LimiterState::Settled,
    }
  }
}

struct LimiterInner<E> {
  in_progress: usize,
  phase: Phase<E>,
  waiters: Vec<Waiter<E>>,
}

impl<E> LimiterInner<E> {
  fn record_failure(&mut self, failure: Failure<E>, name: &str) {
    match &mut self.phase {
      Phase::Draining(failures) => {
        failures.push(failure);
        debug!(limiter = %name, recorded = failures.len(), "Additional failure recorded while draining.");
        return;
      }
      // `track` refuses work unless accepting, so nothing is in flight once settled.
      Phase::Settled(_) => {
        debug_assert!(false, "failure settled after the aggregate was sealed");
        return;
      }
      Phase::Accepting => {}
    }
    info!(
      limiter = %name,
      in_progress = self.in_progress,
      "First failure recorded. No further admissions; waiting for in-flight operations to drain."
    );
    self.phase = Phase::Draining(vec![failure]);
  }

  /// Runs after every change to the counter or the failure list.
  fn resolve_waiters(&mut self, name: &str) {
    self.phase = match mem::replace(&mut self.phase, Phase::Accepting) {
      Phase::Accepting => {
        self.resolve_below_threshold(name);
        Phase::Accepting
      }
      Phase::Draining(failures) if self.in_progress > 0 => {
        trace!(limiter = %name, in_progress = self.in_progress, "Draining; failure delivery deferred.");
        Phase::Draining(failures)
      }
      Phase::Draining(failures) => {
        let aggregate = AggregatedFailure::seal(failures);
        info!(limiter = %name, failures = aggregate.len(), "Drained after failure. Limiter settled.");
        Phase::Settled(self.reject_all(aggregate, name))
      }
      Phase::Settled(aggregate) => Phase::Settled(self.reject_all(aggregate, name)),
    };
  }

  fn resolve_below_threshold(&mut self, name: &str) {
    let in_progress = self.in_progress;
    let (ready, pending): (Vec<_>, Vec<_>) = mem::take(&mut self.waiters)
      .into_iter()
      .partition(|waiter| waiter.threshold > in_progress);
    self.waiters = pending;

    if !ready.is_empty() {
      trace!(limiter = %name, in_progress, resolved = ready.len(), still_waiting = self.waiters.len(), "Resolving waiters.");
    }
    for waiter in ready {
      waiter.resolve();
    }
  }

  fn reject_all(&mut self, aggregate: AggregatedFailure<E>, name: &str) -> AggregatedFailure<E> {
    let waiters = mem::take(&mut self.waiters);
    if !waiters.is_empty() {
      debug!(limiter = %name, rejected = waiters.len(), "Rejecting waiters with aggregated failure.");
    }
    for waiter in waiters {
      waiter.reject(aggregate.clone());
    }
    aggregate
  }
}

/// Bounds how many tracked operations run at once and defers their failures
/// until every in-flight operation has settled.
///
/// Create one limiter per cohort of related work. Tracked operations are spawned on
/// the Tokio runtime whose handle is given at construction.
pub struct Limiter<E> {
  name: Arc<String>,
  limit: ConcurrencyLimit,
  tokio_handle: TokioHandle,
  next_task_id: AtomicU64,
  inner: Mutex<LimiterInner<E>>,
}

impl<E> fmt::Debug for Limiter<E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    // try_lock: never block inside Debug
    let mut debug = f.debug_struct("Limiter");
    debug.field("name", &self.name).field("limit", &self.limit);
    if let Some(inner) = self.inner.try_lock() {
      debug
        .field("in_progress", &inner.in_progress)
        .field("state", &inner.phase.state())
        .field("waiters", &inner.waiters.len());
    }
    debug.finish_non_exhaustive()
  }
}

impl<E> Limiter<E> {
  pub fn new(limit: impl Into<ConcurrencyLimit>, tokio_handle: TokioHandle, name: &str) -> Arc<Self> {
    let limit = limit.into();
    debug!(limiter = %name, %limit, "Creating limiter.");
    Arc::new(Self {
      name: Arc::new(name.to_string()),
      limit,
      tokio_handle,
      next_task_id: AtomicU64::new(0),
      inner: Mutex::new(LimiterInner {
        in_progress: 0,
        phase: Phase::Accepting,
        waiters: Vec::new(),
      }),
    })
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn limit(&self) -> ConcurrencyLimit {
    self.limit
  }

  /// Number of tracked operations that have not settled yet.
  pub fn in_progress(&self) -> usize {
    self.inner.lock().in_progress
  }

  pub fn state(&self) -> LimiterState {
    self.inner.lock().phase.state()
  }

  /// Number of failures recorded so far.
  pub fn failure_count(&self) -> usize {
    match &self.inner.lock().phase {
      Phase::Accepting => 0,
      Phase::Draining(failures) => failures.len(),
      Phase::Settled(aggregate) => aggregate.len(),
    }
  }

  /// Number of callers currently suspended in `ready()` or `finished()`.
  pub fn waiter_count(&self) -> usize {
    self.inner.lock().waiters.iter().filter(|waiter| !waiter.is_abandoned()).count()
  }

  /// The sealed failure list, once the limiter has settled.
  pub fn aggregated_failure(&self) -> Option<AggregatedFailure<E>> {
    match &self.inner.lock().phase {
      Phase::Settled(aggregate) => Some(aggregate.clone()),
      _ => None,
    }
  }

  /// Waits until another operation may be started.
  ///
  /// Returns immediately while no failure has been recorded and fewer than `limit`
  /// operations are in progress. Once a failure is recorded, waits for every tracked
  /// operation to settle instead and then fails.
  ///
  /// # Errors
  /// Returns the `AggregatedFailure` of every recorded failure, in settlement order,
  /// once the limiter has drained after a failure.
  pub async fn ready(&self) -> Result<(), AggregatedFailure<E>> {
    self.wait_in_progress_below(self.limit.admission_threshold()).await
  }

  /// Waits until no tracked operation is in progress.
  ///
  /// # Errors
  /// Returns the `AggregatedFailure` if any tracked operation failed.
  pub async fn finished(&self) -> Result<(), AggregatedFailure<E>> {
    self.wait_in_progress_below(1).await
  }

  async fn wait_in_progress_below(&self, threshold: usize) -> Result<(), AggregatedFailure<E>> {
    loop {
      let receiver = {
        let mut inner = self.inner.lock();
        match &inner.phase {
          Phase::Settled(aggregate) => return Err(aggregate.clone()),
          Phase::Accepting if inner.in_progress < threshold => return Ok(()),
          _ => {}
        }
        inner.waiters.retain(|waiter| !waiter.is_abandoned());
        let (waiter, receiver) = Waiter::new(threshold);
        inner.waiters.push(waiter);
        trace!(
          limiter = %self.name,
          threshold,
          in_progress = inner.in_progress,
          waiters = inner.waiters.len(),
          "Suspending caller until in-progress count drops."
        );
        receiver
      };

      match receiver.await {
        Ok(outcome) => return outcome,
        Err(recv_error) => {
          // Waiters are only dropped after being settled, so re-check the state.
          warn!(limiter = %self.name, "Waiter channel closed without an outcome: {}. Re-checking.", recv_error);
        }
      }
    }
  }

  /// Records the counter/failure change for one settled operation and wakes waiters.
  fn settle(&self, task_id: u64, outcome: Result<(), Failure<E>>) {
    let mut inner = self.inner.lock();
    match inner.in_progress.checked_sub(1) {
      Some(remaining) => inner.in_progress = remaining,
      None => error!(limiter = %self.name, task_id, "Operation settled with nothing in progress."),
    }

    match outcome {
      Ok(()) => trace!(limiter = %self.name, task_id, in_progress = inner.in_progress, "Tracked operation succeeded."),
      Err(failure) => {
        debug!(limiter = %self.name, task_id, in_progress = inner.in_progress, "Tracked operation failed.");
        inner.record_failure(failure, &self.name);
      }
    }
    inner.resolve_waiters(&self.name);
  }
}

impl<E: Send + Sync + 'static> Limiter<E> {
  /// Starts watching `operation`, spawning it on the limiter's runtime.
  ///
  /// The in-progress count is incremented before this returns. When the operation
  /// settles the count is decremented, an `Err` (or panic) is recorded as a failure,
  /// and waiters are re-evaluated.
  ///
  /// This does not wait for admission; call `ready()` first to respect the limit.
  ///
  /// # Errors
  /// Returns `AdmissionClosed` without running `operation` once any failure has been
  /// recorded, so nothing new starts after the first failure.
  pub fn track<T, Fut>(self: &Arc<Self>, operation: Fut) -> Result<(), AdmissionClosed>
  where
    Fut: Future<Output = Result<T, E>> + Send + 'static,
  {
    let task_id = self.next_task_id.fetch_add(1, AtomicOrdering::Relaxed);
    {
      let mut inner = self.inner.lock();
      if !matches!(inner.phase, Phase::Accepting) {
        debug!(limiter = %self.name, task_id, state = ?inner.phase.state(), "Track: failure already recorded. Operation not started.");
        return Err(AdmissionClosed);
      }
      inner.in_progress += 1;
      debug!(limiter = %self.name, task_id, in_progress = inner.in_progress, "Tracking operation.");
    }

    let settlement = Settlement {
      limiter: Arc::clone(self),
      task_id,
      settled: false,
    };

    self.tokio_handle.spawn(
      async move {
        let outcome = match AssertUnwindSafe(operation).catch_unwind().await {
          Ok(Ok(_)) => Ok(()),
          Ok(Err(err)) => Err(Failure::Operation(err)),
          Err(panic_payload) => {
            error!("Tracked operation panicked.");
            Err(Failure::Panicked(panic_message(&*panic_payload)))
          }
        };
        settlement.complete(outcome);
      }
      .instrument(info_span!("tracked_operation", limiter = %self.name, %task_id)),
    );
    Ok(())
  }
}

/// Settles a tracked operation exactly once, even if the runtime drops it unfinished.
struct Settlement<E> {
  limiter: Arc<Limiter<E>>,
  task_id: u64,
  settled: bool,
}

impl<E> Settlement<E> {
  fn complete(mut self, outcome: Result<(), Failure<E>>) {
    self.settled = true;
    self.limiter.settle(self.task_id, outcome);
  }
}

impl<E> Drop for Settlement<E> {
  fn drop(&mut self) {
    if !self.settled {
      warn!(limiter = %self.limiter.name, task_id = self.task_id, "Tracked operation dropped before settling.");
      self.limiter.settle(self.task_id, Err(Failure::Aborted));
    }
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(message) = payload.downcast_ref::<&str>() {
    (*message).to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "non-string panic payload".to_string()
  }
}
