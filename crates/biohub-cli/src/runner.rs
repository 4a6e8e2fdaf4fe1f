//! Batch operations behind the `biohub-security` subcommands.
//!
//! Generic over [`SubmissionStore`]; `main` supplies the SQLite backend.

use std::collections::BTreeSet;

use biohub_core::{
  engine::RuleOutcome,
  feature::FeatureTree,
  ledger::{StagedChanges, Visibility},
  rule::SecurityRule,
  store::SubmissionStore,
};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct FeatureReport {
  pub feature_id: Uuid,
  pub outcomes:   Vec<RuleOutcome>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error:      Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubmissionReport {
  pub submission_id: Uuid,
  pub committed:     bool,
  pub features:      Vec<FeatureReport>,
  pub failed:        usize,
}

#[derive(Debug, Serialize)]
pub struct SecuredByReport {
  pub feature_id: Uuid,
  pub rules:      BTreeSet<Uuid>,
  pub visibility: Visibility,
}

#[derive(Debug, Serialize)]
pub struct RuleSummary {
  pub security_rule_id: Uuid,
  pub name:             String,
  pub description:      Option<String>,
  pub category:         Option<String>,
  pub conditions:       usize,
}

impl From<&SecurityRule> for RuleSummary {
  fn from(rule: &SecurityRule) -> Self {
    Self {
      security_rule_id: rule.security_rule_id,
      name:             rule.name.clone(),
      description:      rule.description.clone(),
      category:         rule.category.clone(),
      conditions:       rule.conditions.len(),
    }
  }
}

pub async fn evaluate_feature<S: SubmissionStore>(
  store: &S,
  feature_id: Uuid,
  commit: bool,
) -> Result<FeatureReport, S::Error> {
  let outcomes = if commit {
    store.commit_evaluation(feature_id).await?
  } else {
    store.evaluate_all(feature_id).await?
  };
  Ok(FeatureReport { feature_id, outcomes, error: None })
}

/// Evaluate every current feature of a submission, parents first.
///
/// A failing feature is recorded in the report and does not stop the run.
/// When committing, a failing feature is secured under every current rule.
pub async fn evaluate_submission<S: SubmissionStore>(
  store: &S,
  submission_id: Uuid,
  commit: bool,
) -> Result<SubmissionReport, S::Error> {
  let features = store.submission_features(submission_id).await?;
  let tree = FeatureTree::new(features).map_err(S::Error::from)?;

  let mut report = SubmissionReport {
    submission_id,
    committed: commit,
    features: Vec::with_capacity(tree.len()),
    failed: 0,
  };
  for feature in tree.preorder() {
    let feature_id = feature.submission_feature_id;
    match evaluate_feature(store, feature_id, commit).await {
      Ok(r) => report.features.push(r),
      Err(e) => {
        tracing::warn!(%feature_id, error = %e, "feature evaluation failed");
        report.failed += 1;
        report.features.push(FeatureReport {
          feature_id,
          outcomes: Vec::new(),
          error: Some(e.to_string()),
        });
      }
    }
  }

  tracing::info!(
    %submission_id,
    features = report.features.len(),
    failed = report.failed,
    committed = commit,
    "evaluated submission"
  );
  Ok(report)
}

pub async fn secured_by<S: SubmissionStore>(
  store: &S,
  feature_id: Uuid,
) -> Result<SecuredByReport, S::Error> {
  Ok(SecuredByReport {
    feature_id,
    rules: store.secured_by(feature_id).await?,
    visibility: store.visibility(feature_id).await,
  })
}

pub async fn rules<S: SubmissionStore>(store: &S) -> Result<Vec<RuleSummary>, S::Error> {
  Ok(store.current_rules().await?.iter().map(RuleSummary::from).collect())
}

/// Stage `rules` for application (or removal) over `features` and commit.
pub async fn stage<S: SubmissionStore>(
  store: &S,
  features: Vec<Uuid>,
  rules: Vec<Uuid>,
  remove: bool,
) -> Result<(), S::Error> {
  let rules: BTreeSet<Uuid> = rules.into_iter().collect();
  let staged = if remove {
    StagedChanges { apply: BTreeSet::new(), remove: rules }
  } else {
    StagedChanges { apply: rules, remove: BTreeSet::new() }
  };
  store.apply_staged(features, staged).await
}
