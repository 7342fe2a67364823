use futures_limiter::{ConcurrencyLimit, LimitParseError};
use std::num::NonZeroUsize;

#[test]
fn test_zero_limit_is_clamped_to_one() {
  assert_eq!(ConcurrencyLimit::from(0), ConcurrencyLimit::from(1));
  assert_eq!(ConcurrencyLimit::from(0).get(), Some(1));
}

#[test]
fn test_none_means_unbounded() {
  assert_eq!(ConcurrencyLimit::from(None), ConcurrencyLimit::Unbounded);
  assert_eq!(ConcurrencyLimit::from(Some(4)).get(), Some(4));
  assert!(ConcurrencyLimit::Unbounded.is_unbounded());
  assert_eq!(ConcurrencyLimit::Unbounded.get(), None);
}

#[test]
fn test_parse_limits() {
  assert_eq!("8".parse::<ConcurrencyLimit>(), Ok(ConcurrencyLimit::from(8)));
  assert_eq!(" 3 ".parse::<ConcurrencyLimit>(), Ok(ConcurrencyLimit::from(3)));
  for unbounded in ["unbounded", "Unlimited", "inf", "INFINITY"] {
    assert_eq!(unbounded.parse::<ConcurrencyLimit>(), Ok(ConcurrencyLimit::Unbounded));
  }
}

#[test]
fn test_parse_rejects_zero_and_garbage() {
  assert_eq!("0".parse::<ConcurrencyLimit>(), Err(LimitParseError("0".to_string())));
  assert_eq!("-2".parse::<ConcurrencyLimit>(), Err(LimitParseError("-2".to_string())));
  assert!("lots".parse::<ConcurrencyLimit>().is_err());
}

#[test]
fn test_display_round_trips_through_parse() {
  let bounded = ConcurrencyLimit::from(NonZeroUsize::new(12).unwrap());
  assert_eq!(bounded.to_string(), "12");
  assert_eq!(ConcurrencyLimit::Unbounded.to_string(), "unbounded");
  assert_eq!(ConcurrencyLimit::Unbounded.to_string().parse::<ConcurrencyLimit>(), Ok(ConcurrencyLimit::Unbounded));
}
