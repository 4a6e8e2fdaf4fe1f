//! The `SubmissionStore` trait.
//!
//! The trait is implemented by storage backends (e.g. `biohub-store-sqlite`).
//! Callers such as the batch runner depend on this abstraction, not on any
//! concrete backend.

use std::{collections::BTreeSet, future::Future};

use uuid::Uuid;

use crate::{
  engine::{self, RuleOutcome},
  feature::{NewSubmissionFeature, SubmissionFeature},
  index::FeatureIndex,
  ledger::{FeatureSecurityLink, StagedChanges, Visibility},
  rule::{NewSecurityRule, SecurityRule},
  schema::{
    FeatureProperty, FeatureType, FeatureTypeProperty, NewFeatureProperty,
    NewFeatureType, SchemaRegistry,
  },
};

/// Abstraction over the feature store, search index, rule registry and
/// security ledger.
///
/// Versioned rows are never deleted. Every mutation end-dates the current row
/// and inserts its successor inside one transaction, so readers never see a
/// key with zero or two current rows.
///
/// All methods return `Send` futures so the trait can be used in multi-threaded
/// async runtimes.
pub trait SubmissionStore: Send + Sync {
  type Error: std::error::Error + From<crate::Error> + Send + Sync + 'static;

  // ── Schema registry ───────────────────────────────────────────────────

  fn add_feature_type(
    &self,
    input: NewFeatureType,
  ) -> impl Future<Output = Result<FeatureType, Self::Error>> + Send + '_;

  /// Fails with `UnknownProperty` if the parent is not current.
  fn add_feature_property(
    &self,
    input: NewFeatureProperty,
  ) -> impl Future<Output = Result<FeatureProperty, Self::Error>> + Send + '_;

  /// Declare `feature_property_id` legal for `feature_type_id`.
  fn attach_property(
    &self,
    feature_type_id: Uuid,
    feature_property_id: Uuid,
    sort: Option<i32>,
  ) -> impl Future<Output = Result<FeatureTypeProperty, Self::Error>> + Send + '_;

  /// End-date a property together with its feature type links.
  fn retire_feature_property(
    &self,
    feature_property_id: Uuid,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Snapshot of the currently-effective schema.
  fn schema_registry(
    &self,
  ) -> impl Future<Output = Result<SchemaRegistry, Self::Error>> + Send + '_;

  // ── Features and their index ──────────────────────────────────────────

  /// Persist a feature and its index rows in one transaction.
  ///
  /// The parent, if any, must be a current feature of the same submission.
  fn insert_feature(
    &self,
    input: NewSubmissionFeature,
  ) -> impl Future<Output = Result<SubmissionFeature, Self::Error>> + Send + '_;

  fn get_feature(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<SubmissionFeature>, Self::Error>> + Send + '_;

  /// Current features of a submission.
  fn submission_features(
    &self,
    submission_id: Uuid,
  ) -> impl Future<Output = Result<Vec<SubmissionFeature>, Self::Error>> + Send + '_;

  /// Replace a feature's `data`, end-dating its current index rows and
  /// inserting the new projection atomically.
  fn reindex_feature(
    &self,
    id: Uuid,
    data: serde_json::Value,
  ) -> impl Future<Output = Result<SubmissionFeature, Self::Error>> + Send + '_;

  /// End-date a feature and its index rows.
  fn retire_feature(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// The current index rows of a feature. Fails with `FeatureNotFound` if
  /// the feature is not current.
  fn feature_index(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<FeatureIndex, Self::Error>> + Send + '_;

  // ── Security rules ────────────────────────────────────────────────────

  /// Author a rule. Fails with `EmptyConditionSet`, `DuplicateRuleName`,
  /// `UnknownProperty`, `TypeMismatch` or `ComparatorNotSupported`.
  fn add_rule(
    &self,
    input: NewSecurityRule,
  ) -> impl Future<Output = Result<SecurityRule, Self::Error>> + Send + '_;

  /// End-date a rule. Its conditions and ledger history are kept.
  fn retire_rule(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// A current rule with its conditions.
  fn get_rule(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<SecurityRule>, Self::Error>> + Send + '_;

  /// Every current rule with its conditions.
  fn current_rules(
    &self,
  ) -> impl Future<Output = Result<Vec<SecurityRule>, Self::Error>> + Send + '_;

  // ── Security ledger ───────────────────────────────────────────────────

  /// Secure a feature under a rule. Re-applying replaces the current link.
  fn apply_rule(
    &self,
    feature_id: Uuid,
    rule_id: Uuid,
  ) -> impl Future<Output = Result<FeatureSecurityLink, Self::Error>> + Send + '_;

  /// End-date the current link, if any. Not an error when absent.
  fn remove_rule(
    &self,
    feature_id: Uuid,
    rule_id: Uuid,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Apply and remove staged rules over a set of features, all or nothing.
  fn apply_staged(
    &self,
    feature_ids: Vec<Uuid>,
    staged: StagedChanges,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Rules currently securing a feature.
  fn secured_by(
    &self,
    feature_id: Uuid,
  ) -> impl Future<Output = Result<BTreeSet<Uuid>, Self::Error>> + Send + '_;

  /// Features currently secured by a rule.
  fn secured_features(
    &self,
    rule_id: Uuid,
  ) -> impl Future<Output = Result<BTreeSet<Uuid>, Self::Error>> + Send + '_;

  /// Every ledger row for a feature, current and ended, oldest first.
  fn security_history(
    &self,
    feature_id: Uuid,
  ) -> impl Future<Output = Result<Vec<FeatureSecurityLink>, Self::Error>> + Send + '_;

  // ── Provided ──────────────────────────────────────────────────────────

  fn is_secured(
    &self,
    feature_id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_ {
    async move {
      let rules = self.secured_by(feature_id).await?;
      Ok::<_, Self::Error>(!rules.is_empty())
    }
  }

  /// Whether the public-read layer may return the feature. Fails closed.
  fn visibility(
    &self,
    feature_id: Uuid,
  ) -> impl Future<Output = Visibility> + Send + '_ {
    async move { Visibility::from_check(feature_id, self.is_secured(feature_id).await) }
  }

  /// Evaluate one rule against one feature. Read-only.
  fn evaluate(
    &self,
    feature_id: Uuid,
    rule_id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_ {
    async move {
      let rule = self
        .get_rule(rule_id)
        .await?
        .ok_or(crate::Error::RuleNotFound(rule_id))?;
      let registry = self.schema_registry().await?;
      let index = self.feature_index(feature_id).await?;
      Ok::<_, Self::Error>(engine::evaluate(&registry, &index, &rule)?)
    }
  }

  /// Evaluate every current rule against one feature. Read-only.
  fn evaluate_all(
    &self,
    feature_id: Uuid,
  ) -> impl Future<Output = Result<Vec<RuleOutcome>, Self::Error>> + Send + '_ {
    async move {
      let rules = self.current_rules().await?;
      let registry = self.schema_registry().await?;
      let index = self.feature_index(feature_id).await?;
      Ok::<_, Self::Error>(engine::evaluate_all(&registry, &index, &rules)?)
    }
  }

  /// Evaluate every current rule and commit the hits to the ledger.
  ///
  /// If evaluation fails the feature is secured under every current rule
  /// before the error is returned, so a broken rule or schema never leaves a
  /// feature public.
  fn commit_evaluation(
    &self,
    feature_id: Uuid,
  ) -> impl Future<Output = Result<Vec<RuleOutcome>, Self::Error>> + Send + '_ {
    async move {
      let outcomes = match self.evaluate_all(feature_id).await {
        Ok(outcomes) => outcomes,
        Err(error) => {
          tracing::warn!(%feature_id, %error, "evaluation failed; securing feature");
          if let Err(secure_error) = self.secure_fully(feature_id).await {
            tracing::warn!(%feature_id, error = %secure_error, "could not secure feature");
          }
          return Err(error);
        }
      };
      let staged = StagedChanges::from_outcomes(&outcomes);
      if !staged.is_empty() {
        self.apply_staged(vec![feature_id], staged).await?;
      }
      Ok::<_, Self::Error>(outcomes)
    }
  }

  /// Apply every current rule to a feature in one staged batch.
  fn secure_fully(
    &self,
    feature_id: Uuid,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_ {
    async move {
      let rules = self.current_rules().await?;
      let staged = StagedChanges {
        apply:  rules.iter().map(|r| r.security_rule_id).collect(),
        remove: BTreeSet::new(),
      };
      if !staged.is_empty() {
        self.apply_staged(vec![feature_id], staged).await?;
      }
      Ok::<_, Self::Error>(())
    }
  }
}
