//! Security rules and their typed conditions.
//!
//! A rule is a named, AND-combined set of conditions. Each condition compares
//! the indexed values of one feature property against a threshold using a
//! comparator from a closed set; nothing here is ever turned into query text.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::{
  Error, Result,
  geometry::SpatialValue,
  schema::{PropertyKind, SchemaRegistry},
  temporal::Validity,
};

// ─── Comparators ─────────────────────────────────────────────────────────────

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  AsRefStr,
  Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Comparator {
  Eq,
  Ne,
  Lt,
  Lte,
  Gt,
  Gte,
  Contains,
  Intersects,
}

impl Comparator {
  /// Whether this comparator may be used on values of `kind`.
  pub fn supports(self, kind: PropertyKind) -> bool {
    match kind {
      PropertyKind::String => {
        matches!(self, Self::Eq | Self::Ne | Self::Contains)
      }
      PropertyKind::Number | PropertyKind::Datetime => matches!(
        self,
        Self::Eq | Self::Ne | Self::Lt | Self::Lte | Self::Gt | Self::Gte
      ),
      PropertyKind::Spatial => self == Self::Intersects,
      _ => false,
    }
  }

  /// Apply an ordering comparator to `actual` against `threshold`.
  /// Incomparable values (NaN) never satisfy anything.
  pub fn holds<T: PartialOrd>(self, actual: &T, threshold: &T) -> bool {
    let Some(ord) = actual.partial_cmp(threshold) else {
      return false;
    };
    match self {
      Self::Eq => ord == Ordering::Equal,
      Self::Ne => ord != Ordering::Equal,
      Self::Lt => ord == Ordering::Less,
      Self::Lte => ord != Ordering::Greater,
      Self::Gt => ord == Ordering::Greater,
      Self::Gte => ord != Ordering::Less,
      Self::Contains | Self::Intersects => false,
    }
  }
}

// ─── Conditions ──────────────────────────────────────────────────────────────

/// The threshold of a condition. The variant selects the condition table.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionValue {
  String(String),
  Number(f64),
  Datetime(DateTime<Utc>),
  Spatial(SpatialValue),
}

impl ConditionValue {
  pub fn kind(&self) -> PropertyKind {
    match self {
      Self::String(_) => PropertyKind::String,
      Self::Number(_) => PropertyKind::Number,
      Self::Datetime(_) => PropertyKind::Datetime,
      Self::Spatial(_) => PropertyKind::Spatial,
    }
  }
}

/// A persisted condition belonging to a rule.
#[derive(Debug, Clone, PartialEq)]
pub struct SecurityCondition {
  pub security_condition_id: Uuid,
  pub security_rule_id:      Uuid,
  pub feature_property_id:   Uuid,
  pub comparator:            Comparator,
  pub value:                 ConditionValue,
}

/// Condition input for [`NewSecurityRule`].
#[derive(Debug, Clone)]
pub struct NewCondition {
  pub feature_property_id: Uuid,
  pub comparator:          Comparator,
  pub value:               ConditionValue,
}

impl NewCondition {
  pub fn new(
    feature_property_id: Uuid,
    comparator: Comparator,
    value: ConditionValue,
  ) -> Self {
    Self { feature_property_id, comparator, value }
  }
}

// ─── Rules ───────────────────────────────────────────────────────────────────

/// A named unit of redaction policy together with its conditions.
#[derive(Debug, Clone)]
pub struct SecurityRule {
  pub security_rule_id: Uuid,
  pub name:             String,
  pub description:      Option<String>,
  pub category:         Option<String>,
  pub validity:         Validity,
  pub conditions:       Vec<SecurityCondition>,
}

/// Input to [`crate::store::SubmissionStore::add_rule`].
#[derive(Debug, Clone)]
pub struct NewSecurityRule {
  pub name:        String,
  pub description: Option<String>,
  pub category:    Option<String>,
  pub conditions:  Vec<NewCondition>,
}

impl NewSecurityRule {
  pub fn new(name: impl Into<String>, conditions: Vec<NewCondition>) -> Self {
    Self {
      name: name.into(),
      description: None,
      category: None,
      conditions,
    }
  }

  /// Reject rules that could never be evaluated meaningfully.
  pub fn validate(&self, registry: &SchemaRegistry) -> Result<()> {
    if self.conditions.is_empty() {
      return Err(Error::EmptyConditionSet);
    }
    for condition in &self.conditions {
      let property = registry.property(condition.feature_property_id)?;
      let kind = condition.value.kind();
      if property.kind != kind {
        return Err(Error::TypeMismatch {
          property: property.name.clone(),
          expected: property.kind.to_string(),
          actual:   kind.to_string(),
        });
      }
      if !condition.comparator.supports(kind) {
        return Err(Error::ComparatorNotSupported {
          comparator: condition.comparator.to_string(),
          kind:       kind.to_string(),
        });
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::schema::tests::prop;

  fn registry_with(kind: PropertyKind) -> (SchemaRegistry, Uuid) {
    let p = prop("p", kind);
    let id = p.feature_property_id;
    (SchemaRegistry::new(vec![], vec![p], vec![]), id)
  }

  #[test]
  fn comparator_sets_are_closed_per_kind() {
    assert!(Comparator::Contains.supports(PropertyKind::String));
    assert!(!Comparator::Lt.supports(PropertyKind::String));
    assert!(Comparator::Gte.supports(PropertyKind::Datetime));
    assert!(!Comparator::Intersects.supports(PropertyKind::Number));
    assert!(Comparator::Intersects.supports(PropertyKind::Spatial));
    assert!(!Comparator::Eq.supports(PropertyKind::Spatial));
    assert!(!Comparator::Eq.supports(PropertyKind::Taxonomy));
  }

  #[test]
  fn ordering_comparators() {
    assert!(Comparator::Gt.holds(&45.0, &40.0));
    assert!(!Comparator::Gt.holds(&40.0, &40.0));
    assert!(Comparator::Gte.holds(&40.0, &40.0));
    assert!(Comparator::Ne.holds(&1.0, &2.0));
    assert!(Comparator::Lte.holds(&1.0, &2.0));
    assert!(!Comparator::Eq.holds(&f64::NAN, &f64::NAN));
    assert!(!Comparator::Ne.holds(&f64::NAN, &1.0));
  }

  #[test]
  fn comparator_text_form() {
    assert_eq!(Comparator::Gte.as_ref(), "gte");
    assert_eq!("intersects".parse::<Comparator>().unwrap(), Comparator::Intersects);
    assert!("; DROP TABLE".parse::<Comparator>().is_err());
  }

  #[test]
  fn empty_rule_is_rejected() {
    let (registry, _) = registry_with(PropertyKind::Number);
    let err = NewSecurityRule::new("empty", vec![]).validate(&registry).unwrap_err();
    assert!(matches!(err, Error::EmptyConditionSet));
  }

  #[test]
  fn condition_kind_must_match_property() {
    let (registry, id) = registry_with(PropertyKind::Number);
    let rule = NewSecurityRule::new(
      "wrong kind",
      vec![NewCondition::new(
        id,
        Comparator::Eq,
        ConditionValue::String("45".into()),
      )],
    );
    assert!(matches!(
      rule.validate(&registry),
      Err(Error::TypeMismatch { .. })
    ));
  }

  #[test]
  fn unsupported_comparator_is_rejected() {
    let (registry, id) = registry_with(PropertyKind::Number);
    let rule = NewSecurityRule::new(
      "contains number",
      vec![NewCondition::new(id, Comparator::Contains, ConditionValue::Number(1.0))],
    );
    assert!(matches!(
      rule.validate(&registry),
      Err(Error::ComparatorNotSupported { .. })
    ));
  }

  #[test]
  fn unknown_property_is_rejected() {
    let (registry, _) = registry_with(PropertyKind::Number);
    let rule = NewSecurityRule::new(
      "dangling",
      vec![NewCondition::new(
        Uuid::new_v4(),
        Comparator::Eq,
        ConditionValue::Number(1.0),
      )],
    );
    assert!(matches!(
      rule.validate(&registry),
      Err(Error::UnknownProperty(_))
    ));
  }
}
