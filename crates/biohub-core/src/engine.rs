//! Rule evaluation engine.
//!
//! Evaluation is a pure function of a [`FeatureIndex`], the rule snapshot and
//! the schema registry. It never reads or writes the security ledger, so it
//! can run concurrently across rules and features without coordination.
//!
//! Semantics:
//! - a condition holds iff at least one indexed value of its property
//!   satisfies the comparator (no values means it does not hold);
//! - a rule hits iff every one of its conditions holds;
//! - a rule without conditions never hits.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result,
  index::{FeatureIndex, IndexValue},
  rule::{Comparator, ConditionValue, SecurityCondition, SecurityRule},
  schema::SchemaRegistry,
};

/// The result of evaluating one rule against one feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleOutcome {
  pub security_rule_id: Uuid,
  pub hit:              bool,
}

/// Evaluate a single condition against a feature's index.
pub fn evaluate_condition(
  registry: &SchemaRegistry,
  index: &FeatureIndex,
  condition: &SecurityCondition,
) -> Result<bool> {
  // A retired property is a configuration error, not a miss.
  let property = registry.property(condition.feature_property_id)?;
  if property.kind != condition.value.kind() {
    return Err(Error::TypeMismatch {
      property: property.name.clone(),
      expected: property.kind.to_string(),
      actual:   condition.value.kind().to_string(),
    });
  }

  // Checked up front so a bad comparator fails even when nothing is indexed.
  let comparator = condition.comparator;
  if !comparator.supports(property.kind) {
    return Err(unsupported(comparator, condition));
  }

  let mut satisfied = false;
  for value in index.values(condition.feature_property_id) {
    let holds = match (&condition.value, value) {
      (ConditionValue::String(threshold), IndexValue::String(actual)) => {
        match comparator {
          Comparator::Eq => actual == threshold,
          Comparator::Ne => actual != threshold,
          Comparator::Contains => actual.contains(threshold.as_str()),
          _ => return Err(unsupported(comparator, condition)),
        }
      }
      (ConditionValue::Number(threshold), IndexValue::Number(actual)) => {
        comparator.holds(actual, threshold)
      }
      (ConditionValue::Datetime(threshold), IndexValue::Datetime(actual)) => {
        comparator.holds(actual, threshold)
      }
      (ConditionValue::Spatial(threshold), IndexValue::Spatial(actual)) => {
        // Checked on every row so a reference mismatch is never hidden
        // behind an earlier match.
        threshold.intersects(actual)?
      }
      (_, other) => {
        return Err(Error::TypeMismatch {
          property: property.name.clone(),
          expected: property.kind.to_string(),
          actual:   other.kind().to_string(),
        });
      }
    };
    satisfied |= holds;
  }
  Ok(satisfied)
}

fn unsupported(comparator: Comparator, condition: &SecurityCondition) -> Error {
  Error::ComparatorNotSupported {
    comparator: comparator.to_string(),
    kind:       condition.value.kind().to_string(),
  }
}

/// Whether `rule` hits the indexed feature.
pub fn evaluate(
  registry: &SchemaRegistry,
  index: &FeatureIndex,
  rule: &SecurityRule,
) -> Result<bool> {
  if rule.conditions.is_empty() {
    return Ok(false);
  }
  for condition in &rule.conditions {
    if !evaluate_condition(registry, index, condition)? {
      return Ok(false);
    }
  }
  Ok(true)
}

/// Evaluate every rule in `rules` against one feature, in the given order.
pub fn evaluate_all(
  registry: &SchemaRegistry,
  index: &FeatureIndex,
  rules: &[SecurityRule],
) -> Result<Vec<RuleOutcome>> {
  rules
    .iter()
    .map(|rule| {
      Ok(RuleOutcome {
        security_rule_id: rule.security_rule_id,
        hit:              evaluate(registry, index, rule)?,
      })
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use chrono::{TimeZone, Utc};
  use serde_json::json;

  use super::*;
  use crate::{
    geometry::SpatialValue,
    index::parse_datetime,
    schema::{PropertyKind, tests::prop},
    temporal::Validity,
  };

  struct Fixture {
    registry: SchemaRegistry,
    count:    Uuid,
    start:    Uuid,
    name:     Uuid,
    location: Uuid,
  }

  fn fixture() -> Fixture {
    let count = prop("count", PropertyKind::Number);
    let start = prop("start_date", PropertyKind::Datetime);
    let name = prop("name", PropertyKind::String);
    let location = prop("geometry", PropertyKind::Spatial);
    Fixture {
      count: count.feature_property_id,
      start: start.feature_property_id,
      name: name.feature_property_id,
      location: location.feature_property_id,
      registry: SchemaRegistry::new(vec![], vec![count, start, name, location], vec![]),
    }
  }

  fn condition(
    property: Uuid,
    comparator: Comparator,
    value: ConditionValue,
  ) -> SecurityCondition {
    SecurityCondition {
      security_condition_id: Uuid::new_v4(),
      security_rule_id: Uuid::nil(),
      feature_property_id: property,
      comparator,
      value,
    }
  }

  fn rule(conditions: Vec<SecurityCondition>) -> SecurityRule {
    SecurityRule {
      security_rule_id: Uuid::new_v4(),
      name:             "rule".into(),
      description:      None,
      category:         None,
      validity:         Validity::starting(Utc::now()),
      conditions,
    }
  }

  fn feature(f: &Fixture, count: f64, start: &str) -> FeatureIndex {
    let mut index = FeatureIndex::new(Uuid::new_v4());
    index.push(f.count, IndexValue::Number(count));
    index.push(f.start, IndexValue::Datetime(parse_datetime(start).unwrap()));
    index
  }

  fn r1(f: &Fixture) -> SecurityRule {
    rule(vec![
      condition(f.count, Comparator::Gt, ConditionValue::Number(40.0)),
      condition(
        f.start,
        Comparator::Gt,
        ConditionValue::Datetime(Utc.with_ymd_and_hms(2023, 8, 1, 0, 0, 0).unwrap()),
      ),
    ])
  }

  #[test]
  fn all_conditions_must_hold() {
    let f = fixture();
    let rule = r1(&f);

    let f1 = feature(&f, 45.0, "2023-09-01");
    assert!(evaluate(&f.registry, &f1, &rule).unwrap());

    let f2 = feature(&f, 45.0, "2023-01-01");
    assert!(!evaluate(&f.registry, &f2, &rule).unwrap());
  }

  #[test]
  fn rule_is_conjunction_of_conditions() {
    let f = fixture();
    let rule = r1(&f);
    for (count, start) in [(45.0, "2023-09-01"), (10.0, "2023-09-01"), (45.0, "2020-01-01"), (1.0, "2000-01-01")] {
      let index = feature(&f, count, start);
      let expected = rule
        .conditions
        .iter()
        .all(|c| evaluate_condition(&f.registry, &index, c).unwrap());
      assert_eq!(evaluate(&f.registry, &index, &rule).unwrap(), expected);
    }
  }

  #[test]
  fn absent_values_never_satisfy() {
    let f = fixture();
    let empty = FeatureIndex::new(Uuid::new_v4());
    for comparator in [Comparator::Eq, Comparator::Ne, Comparator::Lt, Comparator::Gt] {
      let c = condition(f.count, comparator, ConditionValue::Number(0.0));
      assert!(!evaluate_condition(&f.registry, &empty, &c).unwrap());
    }
    let c = condition(f.name, Comparator::Ne, ConditionValue::String("x".into()));
    assert!(!evaluate_condition(&f.registry, &empty, &c).unwrap());
  }

  #[test]
  fn any_matching_occurrence_satisfies() {
    let f = fixture();
    let mut index = FeatureIndex::new(Uuid::new_v4());
    index.push(f.name, IndexValue::String("Rangifer tarandus".into()));
    index.push(f.name, IndexValue::String("Alces alces".into()));

    let eq = condition(f.name, Comparator::Eq, ConditionValue::String("Alces alces".into()));
    let contains =
      condition(f.name, Comparator::Contains, ConditionValue::String("tarandus".into()));
    let missing = condition(f.name, Comparator::Eq, ConditionValue::String("Ursus".into()));
    assert!(evaluate_condition(&f.registry, &index, &eq).unwrap());
    assert!(evaluate_condition(&f.registry, &index, &contains).unwrap());
    assert!(!evaluate_condition(&f.registry, &index, &missing).unwrap());
  }

  #[test]
  fn unsupported_comparator_fails_without_index_rows() {
    let f = fixture();
    let empty = FeatureIndex::new(Uuid::new_v4());
    let c = condition(f.name, Comparator::Gt, ConditionValue::String("m".into()));
    assert!(matches!(
      evaluate_condition(&f.registry, &empty, &c),
      Err(Error::ComparatorNotSupported { .. })
    ));

    let c = condition(f.count, Comparator::Intersects, ConditionValue::Number(1.0));
    assert!(matches!(
      evaluate_condition(&f.registry, &empty, &c),
      Err(Error::ComparatorNotSupported { .. })
    ));
  }

  #[test]
  fn rule_without_conditions_never_hits() {
    let f = fixture();
    let index = feature(&f, 45.0, "2023-09-01");
    assert!(!evaluate(&f.registry, &index, &rule(vec![])).unwrap());
  }

  #[test]
  fn spatial_intersection() {
    let f = fixture();
    let polygon = SpatialValue::from_geojson(&json!({
      "type": "Polygon",
      "coordinates": [[[100, 400], [200, 400], [200, 500], [100, 500], [100, 400]]]
    }))
    .unwrap();
    let c = condition(f.location, Comparator::Intersects, ConditionValue::Spatial(polygon));

    let mut inside = FeatureIndex::new(Uuid::new_v4());
    inside.push(
      f.location,
      IndexValue::Spatial(
        SpatialValue::from_geojson(&json!({"type": "Point", "coordinates": [123, 456]}))
          .unwrap(),
      ),
    );
    assert!(evaluate_condition(&f.registry, &inside, &c).unwrap());

    let mut outside = FeatureIndex::new(Uuid::new_v4());
    outside.push(
      f.location,
      IndexValue::Spatial(
        SpatialValue::from_geojson(&json!({"type": "Point", "coordinates": [0, 0]}))
          .unwrap(),
      ),
    );
    assert!(!evaluate_condition(&f.registry, &outside, &c).unwrap());
  }

  #[test]
  fn spatial_reference_mismatch_is_an_error() {
    let f = fixture();
    let mut polygon = SpatialValue::from_geojson(&json!({
      "type": "Polygon",
      "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 0]]]
    }))
    .unwrap();
    polygon.srid = 3005;
    let c = condition(f.location, Comparator::Intersects, ConditionValue::Spatial(polygon));

    let mut index = FeatureIndex::new(Uuid::new_v4());
    index.push(
      f.location,
      IndexValue::Spatial(
        SpatialValue::from_geojson(&json!({"type": "Point", "coordinates": [0.5, 0.2]}))
          .unwrap(),
      ),
    );
    assert!(matches!(
      evaluate_condition(&f.registry, &index, &c),
      Err(Error::GeometryReferenceMismatch { .. })
    ));
  }

  #[test]
  fn retired_property_is_a_configuration_error() {
    let f = fixture();
    let index = feature(&f, 45.0, "2023-09-01");
    let dangling = rule(vec![condition(
      Uuid::new_v4(),
      Comparator::Eq,
      ConditionValue::Number(1.0),
    )]);
    assert!(matches!(
      evaluate(&f.registry, &index, &dangling),
      Err(Error::UnknownProperty(_))
    ));
  }

  #[test]
  fn evaluate_all_reports_every_rule() {
    let f = fixture();
    let index = feature(&f, 45.0, "2023-09-01");
    let hit = r1(&f);
    let miss = rule(vec![condition(f.count, Comparator::Lt, ConditionValue::Number(10.0))]);

    let outcomes =
      evaluate_all(&f.registry, &index, &[hit.clone(), miss.clone()]).unwrap();
    assert_eq!(
      outcomes,
      [
        RuleOutcome { security_rule_id: hit.security_rule_id, hit: true },
        RuleOutcome { security_rule_id: miss.security_rule_id, hit: false },
      ]
    );
  }
}
