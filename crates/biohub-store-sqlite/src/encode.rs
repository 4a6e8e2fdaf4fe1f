//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are RFC 3339 UTC strings with a fixed microsecond precision, so
//! text order is chronological order. UUIDs are stored as hyphenated
//! lowercase strings. Closed enums are stored as their snake_case names.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use biohub_core::{
  feature::SubmissionFeature,
  geometry::SpatialValue,
  index::{IndexEntry, IndexValue},
  ledger::FeatureSecurityLink,
  rule::{Comparator, ConditionValue, SecurityCondition, SecurityRule},
  schema::{FeatureProperty, FeatureType, FeatureTypeProperty, PropertyKind},
  temporal::Validity,
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

fn decode_opt_dt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
  s.as_deref().map(decode_dt).transpose()
}

fn decode_opt_uuid(s: Option<String>) -> Result<Option<Uuid>> {
  s.as_deref().map(decode_uuid).transpose()
}

fn decode_enum<T: FromStr>(what: &str, s: &str) -> Result<T> {
  s.parse()
    .map_err(|_| Error::Decode(format!("unknown {what}: {s:?}")))
}

fn decode_validity(effective: &str, end: Option<String>) -> Result<Validity> {
  Ok(Validity {
    effective_date: decode_dt(effective)?,
    end_date:       decode_opt_dt(end)?,
  })
}

// ─── Schema rows ─────────────────────────────────────────────────────────────

pub struct RawFeatureType {
  pub feature_type_id: String,
  pub name:            String,
  pub display_name:    String,
  pub sort:            Option<i32>,
  pub effective_date:  String,
  pub end_date:        Option<String>,
}

impl RawFeatureType {
  pub fn into_feature_type(self) -> Result<FeatureType> {
    Ok(FeatureType {
      feature_type_id: decode_uuid(&self.feature_type_id)?,
      name:            self.name,
      display_name:    self.display_name,
      sort:            self.sort,
      validity:        decode_validity(&self.effective_date, self.end_date)?,
    })
  }
}

pub struct RawFeatureProperty {
  pub feature_property_id:        String,
  pub name:                       String,
  pub display_name:               String,
  pub property_type:              String,
  pub parent_feature_property_id: Option<String>,
  pub effective_date:             String,
  pub end_date:                   Option<String>,
}

impl RawFeatureProperty {
  pub fn into_property(self) -> Result<FeatureProperty> {
    Ok(FeatureProperty {
      feature_property_id:        decode_uuid(&self.feature_property_id)?,
      name:                       self.name,
      display_name:               self.display_name,
      kind:                       decode_enum::<PropertyKind>(
        "property type",
        &self.property_type,
      )?,
      parent_feature_property_id: decode_opt_uuid(self.parent_feature_property_id)?,
      validity:                   decode_validity(&self.effective_date, self.end_date)?,
    })
  }
}

pub struct RawFeatureTypeProperty {
  pub feature_type_property_id: String,
  pub feature_type_id:          String,
  pub feature_property_id:      String,
  pub sort:                     Option<i32>,
  pub effective_date:           String,
  pub end_date:                 Option<String>,
}

impl RawFeatureTypeProperty {
  pub fn into_link(self) -> Result<FeatureTypeProperty> {
    Ok(FeatureTypeProperty {
      feature_type_property_id: decode_uuid(&self.feature_type_property_id)?,
      feature_type_id:          decode_uuid(&self.feature_type_id)?,
      feature_property_id:      decode_uuid(&self.feature_property_id)?,
      sort:                     self.sort,
      validity:                 decode_validity(&self.effective_date, self.end_date)?,
    })
  }
}

// ─── Features ────────────────────────────────────────────────────────────────

pub struct RawFeature {
  pub submission_feature_id:        String,
  pub submission_id:                String,
  pub feature_type_id:              String,
  pub data:                         String,
  pub parent_submission_feature_id: Option<String>,
  pub revision_count:               u32,
  pub create_date:                  String,
  pub update_date:                  Option<String>,
  pub effective_date:               String,
  pub end_date:                     Option<String>,
}

impl RawFeature {
  pub fn into_feature(self) -> Result<SubmissionFeature> {
    Ok(SubmissionFeature {
      submission_feature_id:        decode_uuid(&self.submission_feature_id)?,
      submission_id:                decode_uuid(&self.submission_id)?,
      feature_type_id:              decode_uuid(&self.feature_type_id)?,
      data:                         serde_json::from_str(&self.data)?,
      parent_submission_feature_id: decode_opt_uuid(self.parent_submission_feature_id)?,
      revision_count:               self.revision_count,
      create_date:                  decode_dt(&self.create_date)?,
      update_date:                  decode_opt_dt(self.update_date)?,
      validity:                     decode_validity(&self.effective_date, self.end_date)?,
    })
  }
}

// ─── Search rows ─────────────────────────────────────────────────────────────

/// A search row in column form; the variant selects the table.
pub enum RawIndexRow {
  String { property: String, value: String },
  Number { property: String, value: f64 },
  Datetime { property: String, value: String },
  Spatial { property: String, value: String, srid: u32 },
  Taxonomy { property: String, value: i64 },
}

impl RawIndexRow {
  pub fn from_entry(entry: &IndexEntry) -> Result<Self> {
    let property = encode_uuid(entry.feature_property_id);
    Ok(match &entry.value {
      IndexValue::String(v) => Self::String { property, value: v.clone() },
      IndexValue::Number(v) => Self::Number { property, value: *v },
      IndexValue::Datetime(v) => Self::Datetime { property, value: encode_dt(*v) },
      IndexValue::Spatial(v) => Self::Spatial {
        property,
        value: v.to_geojson_string()?,
        srid: v.srid,
      },
      IndexValue::Taxonomy(v) => Self::Taxonomy { property, value: *v },
    })
  }

  pub fn into_entry(self, submission_feature_id: Uuid) -> Result<IndexEntry> {
    let (property, value) = match self {
      Self::String { property, value } => (property, IndexValue::String(value)),
      Self::Number { property, value } => (property, IndexValue::Number(value)),
      Self::Datetime { property, value } => {
        (property, IndexValue::Datetime(decode_dt(&value)?))
      }
      Self::Spatial { property, value, srid } => (
        property,
        IndexValue::Spatial(SpatialValue::from_geojson_str(&value, srid)?),
      ),
      Self::Taxonomy { property, value } => (property, IndexValue::Taxonomy(value)),
    };
    Ok(IndexEntry {
      submission_feature_id,
      feature_property_id: decode_uuid(&property)?,
      value,
    })
  }
}

// ─── Rules ───────────────────────────────────────────────────────────────────

/// A condition threshold in column form; the variant selects the table.
pub enum RawConditionValue {
  String(String),
  Number(f64),
  Datetime(String),
  Spatial { value: String, srid: u32 },
}

pub struct RawCondition {
  pub security_condition_id: String,
  pub security_rule_id:      String,
  pub feature_property_id:   String,
  pub comparator:            String,
  pub value:                 RawConditionValue,
}

impl RawCondition {
  pub fn from_condition(c: &SecurityCondition) -> Result<Self> {
    Ok(Self {
      security_condition_id: encode_uuid(c.security_condition_id),
      security_rule_id:      encode_uuid(c.security_rule_id),
      feature_property_id:   encode_uuid(c.feature_property_id),
      comparator:            c.comparator.as_ref().to_owned(),
      value:                 match &c.value {
        ConditionValue::String(v) => RawConditionValue::String(v.clone()),
        ConditionValue::Number(v) => RawConditionValue::Number(*v),
        ConditionValue::Datetime(v) => RawConditionValue::Datetime(encode_dt(*v)),
        ConditionValue::Spatial(v) => RawConditionValue::Spatial {
          value: v.to_geojson_string()?,
          srid:  v.srid,
        },
      },
    })
  }

  pub fn into_condition(self) -> Result<SecurityCondition> {
    Ok(SecurityCondition {
      security_condition_id: decode_uuid(&self.security_condition_id)?,
      security_rule_id:      decode_uuid(&self.security_rule_id)?,
      feature_property_id:   decode_uuid(&self.feature_property_id)?,
      comparator:            decode_enum::<Comparator>("comparator", &self.comparator)?,
      value:                 match self.value {
        RawConditionValue::String(v) => ConditionValue::String(v),
        RawConditionValue::Number(v) => ConditionValue::Number(v),
        RawConditionValue::Datetime(v) => ConditionValue::Datetime(decode_dt(&v)?),
        RawConditionValue::Spatial { value, srid } => {
          ConditionValue::Spatial(SpatialValue::from_geojson_str(&value, srid)?)
        }
      },
    })
  }
}

pub struct RawRule {
  pub security_rule_id: String,
  pub name:             String,
  pub description:      Option<String>,
  pub category:         Option<String>,
  pub effective_date:   String,
  pub end_date:         Option<String>,
}

impl RawRule {
  /// Attach the conditions whose `security_rule_id` matches this rule.
  pub fn into_rule(self, conditions: Vec<SecurityCondition>) -> Result<SecurityRule> {
    Ok(SecurityRule {
      security_rule_id: decode_uuid(&self.security_rule_id)?,
      name:             self.name,
      description:      self.description,
      category:         self.category,
      validity:         decode_validity(&self.effective_date, self.end_date)?,
      conditions,
    })
  }
}

// ─── Ledger ──────────────────────────────────────────────────────────────────

pub struct RawLink {
  pub submission_feature_security_id: String,
  pub submission_feature_id:          String,
  pub security_rule_id:               String,
  pub effective_date:                 String,
  pub end_date:                       Option<String>,
}

impl RawLink {
  pub fn into_link(self) -> Result<FeatureSecurityLink> {
    Ok(FeatureSecurityLink {
      submission_feature_security_id: decode_uuid(&self.submission_feature_security_id)?,
      submission_feature_id:          decode_uuid(&self.submission_feature_id)?,
      security_rule_id:               decode_uuid(&self.security_rule_id)?,
      validity:                       decode_validity(&self.effective_date, self.end_date)?,
    })
  }
}
