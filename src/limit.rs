use crate::error::LimitParseError;

use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;

/// How many tracked operations a `Limiter` admits at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConcurrencyLimit {
  /// At most this many operations in progress.
  Bounded(NonZeroUsize),
  /// Admission always succeeds immediately while no failure has been recorded.
  Unbounded,
}

impl ConcurrencyLimit {
  /// Returns the numeric limit, or `None` when unbounded.
  pub fn get(&self) -> Option<usize> {
    match self {
      ConcurrencyLimit::Bounded(n) => Some(n.get()),
      ConcurrencyLimit::Unbounded => None,
    }
  }

  pub fn is_unbounded(&self) -> bool {
    matches!(self, ConcurrencyLimit::Unbounded)
  }

  /// The in-progress count an admission request must stay below.
  pub(crate) fn admission_threshold(&self) -> usize {
    match self {
      ConcurrencyLimit::Bounded(n) => n.get(),
      ConcurrencyLimit::Unbounded => usize::MAX,
    }
  }
}

/// A limit of zero is clamped to one.
impl From<usize> for ConcurrencyLimit {
  fn from(limit: usize) -> Self {
    ConcurrencyLimit::Bounded(NonZeroUsize::new(limit).unwrap_or(NonZeroUsize::MIN))
  }
}

impl From<NonZeroUsize> for ConcurrencyLimit {
  fn from(limit: NonZeroUsize) -> Self {
    ConcurrencyLimit::Bounded(limit)
  }
}

/// `None` means unbounded.
impl From<Option<usize>> for ConcurrencyLimit {
  fn from(limit: Option<usize>) -> Self {
    limit.map_or(ConcurrencyLimit::Unbounded, ConcurrencyLimit::from)
  }
}

impl FromStr for ConcurrencyLimit {
  type Err = LimitParseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let trimmed = s.trim();
    match trimmed.to_ascii_lowercase().as_str() {
      "unbounded" | "unlimited" | "inf" | "infinity" => Ok(ConcurrencyLimit::Unbounded),
      other => other
        .parse::<NonZeroUsize>()
        .map(ConcurrencyLimit::Bounded)
        .map_err(|_| LimitParseError(trimmed.to_string())),
    }
  }
}

impl fmt::Display for ConcurrencyLimit {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ConcurrencyLimit::Bounded(n) => write!(f, "{}", n),
      ConcurrencyLimit::Unbounded => f.write_str("unbounded"),
    }
  }
}
