//! A Tokio-based admission limiter that bounds how many futures run at once and
//! aggregates their failures until every in-flight future has drained.

mod error;
mod iterate;
mod limit;
mod limiter;
mod waiter;

pub use error::{AdmissionClosed, AggregatedFailure, Failure, IterateError, LimitParseError};
pub use iterate::{drive, iterate, iterate_items};
pub use limit::ConcurrencyLimit;
pub use limiter::{Limiter, LimiterState};
