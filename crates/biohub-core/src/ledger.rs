//! Feature security ledger types.
//!
//! The ledger records which rules currently secure which features. It is
//! written only by explicit commits (automatic evaluation results or a
//! reviewer's staged changes), never inferred from evaluation.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{engine::RuleOutcome, temporal::Validity};

/// One `submission_feature_security` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSecurityLink {
  pub submission_feature_security_id: Uuid,
  pub submission_feature_id:          Uuid,
  pub security_rule_id:               Uuid,
  pub validity:                       Validity,
}

/// Rules a reviewer has staged for application and removal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedChanges {
  pub apply:  BTreeSet<Uuid>,
  pub remove: BTreeSet<Uuid>,
}

impl StagedChanges {
  /// Stage every rule that hit. Misses are not staged for removal, so links
  /// applied manually by a reviewer survive an automatic commit.
  pub fn from_outcomes(outcomes: &[RuleOutcome]) -> Self {
    Self {
      apply:  outcomes
        .iter()
        .filter(|o| o.hit)
        .map(|o| o.security_rule_id)
        .collect(),
      remove: BTreeSet::new(),
    }
  }

  pub fn is_empty(&self) -> bool { self.apply.is_empty() && self.remove.is_empty() }
}

/// What the public-read layer may do with a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
  Public,
  Redacted,
}

impl Visibility {
  /// Fail closed: an error deciding whether a feature is secured redacts it.
  pub fn from_check<E: std::fmt::Display>(
    feature_id: Uuid,
    secured: Result<bool, E>,
  ) -> Self {
    match secured {
      Ok(false) => Self::Public,
      Ok(true) => Self::Redacted,
      Err(error) => {
        tracing::warn!(%feature_id, %error, "security check failed; redacting feature");
        Self::Redacted
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn only_hits_are_staged() {
    let hit = Uuid::new_v4();
    let miss = Uuid::new_v4();
    let staged = StagedChanges::from_outcomes(&[
      RuleOutcome { security_rule_id: hit, hit: true },
      RuleOutcome { security_rule_id: miss, hit: false },
    ]);
    assert_eq!(staged.apply, BTreeSet::from([hit]));
    assert!(staged.remove.is_empty());
    assert!(StagedChanges::from_outcomes(&[]).is_empty());
  }

  #[test]
  fn errors_fail_closed() {
    let id = Uuid::new_v4();
    assert_eq!(Visibility::from_check::<String>(id, Ok(false)), Visibility::Public);
    assert_eq!(Visibility::from_check::<String>(id, Ok(true)), Visibility::Redacted);
    assert_eq!(
      Visibility::from_check(id, Err("database is locked")),
      Visibility::Redacted
    );
  }
}
