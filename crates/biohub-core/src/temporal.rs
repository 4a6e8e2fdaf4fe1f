//! Validity intervals for soft-versioned records.
//!
//! Versioned rows are never updated in place or deleted. A row is "current"
//! while its `end_date` is open; replacing it means closing the interval and
//! inserting a successor in the same transaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The half-open interval `[effective_date, end_date)` during which a row is
/// in force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validity {
  pub effective_date: DateTime<Utc>,
  /// `None` while the row is current.
  pub end_date:       Option<DateTime<Utc>>,
}

impl Validity {
  /// An open interval starting at `at`.
  pub fn starting(at: DateTime<Utc>) -> Self {
    Self { effective_date: at, end_date: None }
  }

  pub fn is_current(&self) -> bool { self.end_date.is_none() }

  /// Whether the row was in force at instant `at`.
  pub fn is_effective_at(&self, at: DateTime<Utc>) -> bool {
    self.effective_date <= at && self.end_date.is_none_or(|end| at < end)
  }
}

#[cfg(test)]
mod tests {
  use chrono::{Duration, TimeZone};

  use super::*;

  #[test]
  fn open_interval_is_current_and_effective_afterwards() {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let v = Validity::starting(start);
    assert!(v.is_current());
    assert!(v.is_effective_at(start));
    assert!(v.is_effective_at(start + Duration::days(400)));
    assert!(!v.is_effective_at(start - Duration::seconds(1)));
  }

  #[test]
  fn closed_interval_excludes_end_instant() {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let end = start + Duration::days(1);
    let v = Validity { effective_date: start, end_date: Some(end) };
    assert!(!v.is_current());
    assert!(v.is_effective_at(start + Duration::hours(5)));
    assert!(!v.is_effective_at(end));
  }
}
