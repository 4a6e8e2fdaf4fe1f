//! Attribute indexer: typed projection of feature payloads.
//!
//! A feature's `data` is semi-structured JSON. [`project`] walks the
//! properties legal for the feature's type and coerces each value found into
//! an [`IndexValue`]; storage backends persist the result into one search
//! table per kind. Evaluation reads the projection back as a
//! [`FeatureIndex`] and never re-parses the payload.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::{
  Error, Result,
  geometry::{DEFAULT_SRID, SpatialValue},
  schema::{FeatureProperty, PropertyKind, SchemaRegistry},
};

// ─── Values ──────────────────────────────────────────────────────────────────

/// One typed search value. The variant selects the search table.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexValue {
  String(String),
  Number(f64),
  Datetime(DateTime<Utc>),
  Spatial(SpatialValue),
  /// A taxon identifier.
  Taxonomy(i64),
}

impl IndexValue {
  pub fn kind(&self) -> PropertyKind {
    match self {
      Self::String(_) => PropertyKind::String,
      Self::Number(_) => PropertyKind::Number,
      Self::Datetime(_) => PropertyKind::Datetime,
      Self::Spatial(_) => PropertyKind::Spatial,
      Self::Taxonomy(_) => PropertyKind::Taxonomy,
    }
  }
}

/// A single search row: one occurrence of one property on one feature.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
  pub submission_feature_id: Uuid,
  pub feature_property_id:   Uuid,
  pub value:                 IndexValue,
}

// ─── Per-feature snapshot ────────────────────────────────────────────────────

/// The current search rows of one feature, grouped by property.
#[derive(Debug, Clone, Default)]
pub struct FeatureIndex {
  pub submission_feature_id: Uuid,
  values:                    HashMap<Uuid, Vec<IndexValue>>,
}

impl FeatureIndex {
  pub fn new(submission_feature_id: Uuid) -> Self {
    Self { submission_feature_id, values: HashMap::new() }
  }

  pub fn from_entries(
    submission_feature_id: Uuid,
    entries: impl IntoIterator<Item = IndexEntry>,
  ) -> Self {
    let mut index = Self::new(submission_feature_id);
    for entry in entries {
      index.push(entry.feature_property_id, entry.value);
    }
    index
  }

  pub fn push(&mut self, feature_property_id: Uuid, value: IndexValue) {
    self.values.entry(feature_property_id).or_default().push(value);
  }

  /// Every value indexed for `feature_property_id`; empty when none.
  pub fn values(&self, feature_property_id: Uuid) -> &[IndexValue] {
    self
      .values
      .get(&feature_property_id)
      .map(Vec::as_slice)
      .unwrap_or_default()
  }

  pub fn len(&self) -> usize { self.values.values().map(Vec::len).sum() }

  pub fn is_empty(&self) -> bool { self.len() == 0 }

  /// Flatten back into rows.
  pub fn entries(&self) -> impl Iterator<Item = IndexEntry> + '_ {
    self.values.iter().flat_map(move |(property, values)| {
      values.iter().map(move |value| IndexEntry {
        submission_feature_id: self.submission_feature_id,
        feature_property_id:   *property,
        value:                 value.clone(),
      })
    })
  }
}

// ─── Projection ──────────────────────────────────────────────────────────────

/// Project `data` for a feature of type `feature_type_id` into index entries.
///
/// Absent and `null` values produce nothing; arrays produce one entry per
/// element. Any value that cannot be coerced to its property's kind fails the
/// whole projection, so a feature is never partially indexed.
pub fn project(
  registry: &SchemaRegistry,
  submission_feature_id: Uuid,
  feature_type_id: Uuid,
  data: &Value,
) -> Result<Vec<IndexEntry>> {
  if !data.is_object() {
    return Err(Error::TypeMismatch {
      property: "data".into(),
      expected: "object".into(),
      actual:   json_kind(data).into(),
    });
  }

  let mut entries = Vec::new();
  for property in registry.properties_for_type(feature_type_id)? {
    if !property.kind.is_indexed() {
      continue;
    }
    let path = registry.path(property.feature_property_id)?;
    let Some(raw) = lookup(data, &path) else {
      continue;
    };

    // A GeoJSON value is always an object, so arrays split for every kind.
    let occurrences: &[Value] = match raw {
      Value::Array(items) => items,
      single => std::slice::from_ref(single),
    };
    for occurrence in occurrences.iter().filter(|v| !v.is_null()) {
      entries.push(IndexEntry {
        submission_feature_id,
        feature_property_id: property.feature_property_id,
        value: coerce(property, occurrence)?,
      });
    }
  }
  Ok(entries)
}

fn lookup<'a>(data: &'a Value, path: &[&str]) -> Option<&'a Value> {
  path
    .iter()
    .try_fold(data, |node, key| node.get(key))
    .filter(|v| !v.is_null())
}

/// Coerce a single JSON value to the property's declared kind.
pub fn coerce(property: &FeatureProperty, value: &Value) -> Result<IndexValue> {
  let mismatch = || Error::TypeMismatch {
    property: property.name.clone(),
    expected: property.kind.to_string(),
    actual:   json_kind(value).into(),
  };

  match property.kind {
    PropertyKind::String => match value {
      Value::String(s) => Ok(IndexValue::String(s.clone())),
      Value::Number(n) => Ok(IndexValue::String(n.to_string())),
      Value::Bool(b) => Ok(IndexValue::String(b.to_string())),
      _ => Err(mismatch()),
    },
    PropertyKind::Number => match value {
      Value::Number(n) => n.as_f64().map(IndexValue::Number).ok_or_else(mismatch),
      Value::String(s) => s
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .map(IndexValue::Number)
        .ok_or_else(mismatch),
      _ => Err(mismatch()),
    },
    PropertyKind::Datetime => value
      .as_str()
      .and_then(parse_datetime)
      .map(IndexValue::Datetime)
      .ok_or_else(mismatch),
    PropertyKind::Taxonomy => match value {
      Value::Number(n) => n.as_i64().map(IndexValue::Taxonomy).ok_or_else(mismatch),
      Value::String(s) => {
        s.trim().parse().map(IndexValue::Taxonomy).map_err(|_| mismatch())
      }
      _ => Err(mismatch()),
    },
    PropertyKind::Spatial => {
      if !value.is_object() {
        return Err(mismatch());
      }
      SpatialValue::from_geojson_in(value, DEFAULT_SRID).map(IndexValue::Spatial)
    }
    PropertyKind::Boolean | PropertyKind::Object | PropertyKind::Array => {
      Err(mismatch())
    }
  }
}

/// Accepts RFC 3339, a naive `YYYY-MM-DDTHH:MM:SS` (taken as UTC) or a bare
/// date (midnight UTC).
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
  let s = s.trim();
  if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
    return Some(dt.with_timezone(&Utc));
  }
  if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
    return Some(naive.and_utc());
  }
  NaiveDate::parse_from_str(s, "%Y-%m-%d")
    .ok()
    .and_then(|d| d.and_hms_opt(0, 0, 0))
    .map(|naive| naive.and_utc())
}

fn json_kind(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "boolean",
    Value::Number(_) => "number",
    Value::String(_) => "string",
    Value::Array(_) => "array",
    Value::Object(_) => "object",
  }
}
