//! Feature schema registry (schema-as-data).
//!
//! Feature types and properties are rows, not Rust structs. A
//! [`SchemaRegistry`] is an immutable snapshot of the currently-effective
//! schema rows, loaded once per request or batch and consulted by the
//! attribute indexer and the rule evaluation engine.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::{Error, Result, temporal::Validity};

// ─── Property kinds ──────────────────────────────────────────────────────────

/// The value kind of a feature property. Stored as the `property_type` column.
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
pub enum PropertyKind {
  String,
  Number,
  Datetime,
  Spatial,
  Taxonomy,
  Boolean,
  Object,
  Array,
}

impl PropertyKind {
  /// Whether values of this kind are projected into a search table.
  pub fn is_indexed(self) -> bool {
    matches!(
      self,
      Self::String | Self::Number | Self::Datetime | Self::Spatial | Self::Taxonomy
    )
  }
}

// ─── Rows ────────────────────────────────────────────────────────────────────

/// A category of submitted unit (dataset, sample_site, observation, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureType {
  pub feature_type_id: Uuid,
  pub name:            String,
  pub display_name:    String,
  pub sort:            Option<i32>,
  pub validity:        Validity,
}

/// Input to [`crate::store::SubmissionStore::add_feature_type`].
#[derive(Debug, Clone)]
pub struct NewFeatureType {
  pub name:         String,
  pub display_name: String,
  pub sort:         Option<i32>,
}

/// A named attribute and the kind of value it holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureProperty {
  pub feature_property_id:        Uuid,
  pub name:                       String,
  pub display_name:               String,
  pub kind:                       PropertyKind,
  /// Set for nested properties, e.g. `start_date` under `date_range`.
  pub parent_feature_property_id: Option<Uuid>,
  pub validity:                   Validity,
}

/// Input to [`crate::store::SubmissionStore::add_feature_property`].
#[derive(Debug, Clone)]
pub struct NewFeatureProperty {
  pub name:                       String,
  pub display_name:               String,
  pub kind:                       PropertyKind,
  pub parent_feature_property_id: Option<Uuid>,
}

/// Declares that a property is legal for a feature type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureTypeProperty {
  pub feature_type_property_id: Uuid,
  pub feature_type_id:          Uuid,
  pub feature_property_id:      Uuid,
  pub sort:                     Option<i32>,
  pub validity:                 Validity,
}

// ─── Registry ────────────────────────────────────────────────────────────────

/// Snapshot of the currently-effective schema.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
  types:           HashMap<Uuid, FeatureType>,
  type_names:      HashMap<String, Uuid>,
  properties:      HashMap<Uuid, FeatureProperty>,
  property_names:  HashMap<String, Uuid>,
  /// Property ids per feature type, already ordered by `sort`.
  type_properties: HashMap<Uuid, Vec<Uuid>>,
}

impl SchemaRegistry {
  /// Build a registry from current rows. Rows that are not current, and links
  /// that point at non-current types or properties, are ignored.
  pub fn new(
    types: Vec<FeatureType>,
    properties: Vec<FeatureProperty>,
    links: Vec<FeatureTypeProperty>,
  ) -> Self {
    let types: HashMap<_, _> = types
      .into_iter()
      .filter(|t| t.validity.is_current())
      .map(|t| (t.feature_type_id, t))
      .collect();
    let properties: HashMap<_, _> = properties
      .into_iter()
      .filter(|p| p.validity.is_current())
      .map(|p| (p.feature_property_id, p))
      .collect();

    let type_names =
      types.values().map(|t| (t.name.clone(), t.feature_type_id)).collect();
    let property_names = properties
      .values()
      .map(|p| (p.name.clone(), p.feature_property_id))
      .collect();

    let mut ordered: HashMap<Uuid, Vec<(Option<i32>, String, Uuid)>> =
      HashMap::new();
    for link in links.into_iter().filter(|l| l.validity.is_current()) {
      let (Some(_), Some(prop)) = (
        types.get(&link.feature_type_id),
        properties.get(&link.feature_property_id),
      ) else {
        continue;
      };
      ordered.entry(link.feature_type_id).or_default().push((
        link.sort,
        prop.name.clone(),
        link.feature_property_id,
      ));
    }

    // Unsorted links go last; name breaks ties so the order is deterministic.
    let type_properties = ordered
      .into_iter()
      .map(|(type_id, mut entries)| {
        entries.sort_by(|a, b| {
          let key = |e: &(Option<i32>, String, Uuid)| (e.0.is_none(), e.0, e.1.clone());
          key(a).cmp(&key(b))
        });
        (type_id, entries.into_iter().map(|(_, _, id)| id).collect())
      })
      .collect();

    Self { types, type_names, properties, property_names, type_properties }
  }

  pub fn feature_type(&self, id: Uuid) -> Result<&FeatureType> {
    self
      .types
      .get(&id)
      .ok_or_else(|| Error::UnknownFeatureType(id.to_string()))
  }

  pub fn feature_type_by_name(&self, name: &str) -> Result<&FeatureType> {
    self
      .type_names
      .get(name)
      .and_then(|id| self.types.get(id))
      .ok_or_else(|| Error::UnknownFeatureType(name.to_owned()))
  }

  pub fn property(&self, id: Uuid) -> Result<&FeatureProperty> {
    self
      .properties
      .get(&id)
      .ok_or_else(|| Error::UnknownProperty(id.to_string()))
  }

  pub fn property_by_name(&self, name: &str) -> Result<&FeatureProperty> {
    self
      .property_names
      .get(name)
      .and_then(|id| self.properties.get(id))
      .ok_or_else(|| Error::UnknownProperty(name.to_owned()))
  }

  /// The value kind declared for the property called `name`.
  pub fn property_type(&self, name: &str) -> Result<PropertyKind> {
    Ok(self.property_by_name(name)?.kind)
  }

  /// Properties legal for the feature type called `name`, in sort order.
  pub fn properties_for(&self, name: &str) -> Result<Vec<&FeatureProperty>> {
    let ty = self.feature_type_by_name(name)?;
    self.properties_for_type(ty.feature_type_id)
  }

  /// Properties legal for the feature type `id`, in sort order.
  pub fn properties_for_type(&self, id: Uuid) -> Result<Vec<&FeatureProperty>> {
    self.feature_type(id)?;
    Ok(
      self
        .type_properties
        .get(&id)
        .map(|ids| ids.iter().filter_map(|p| self.properties.get(p)).collect())
        .unwrap_or_default(),
    )
  }

  /// Names from the outermost ancestor down to the property itself; the path
  /// at which the property's value sits inside a feature's `data`.
  pub fn path(&self, id: Uuid) -> Result<Vec<&str>> {
    let mut path = Vec::new();
    let mut cursor = Some(id);
    while let Some(current) = cursor {
      let prop = self.property(current)?;
      if path.len() > self.properties.len() {
        // A parent cycle can only come from hand-edited rows.
        return Err(Error::UnknownProperty(prop.name.clone()));
      }
      path.push(prop.name.as_str());
      cursor = prop.parent_feature_property_id;
    }
    path.reverse();
    Ok(path)
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use chrono::Utc;

  use super::*;

  pub(crate) fn prop(name: &str, kind: PropertyKind) -> FeatureProperty {
    FeatureProperty {
      feature_property_id:        Uuid::new_v4(),
      name:                       name.into(),
      display_name:               name.into(),
      kind,
      parent_feature_property_id: None,
      validity:                   Validity::starting(Utc::now()),
    }
  }

  pub(crate) fn ftype(name: &str) -> FeatureType {
    FeatureType {
      feature_type_id: Uuid::new_v4(),
      name:            name.into(),
      display_name:    name.into(),
      sort:            None,
      validity:        Validity::starting(Utc::now()),
    }
  }

  pub(crate) fn link(
    ty: &FeatureType,
    p: &FeatureProperty,
    sort: Option<i32>,
  ) -> FeatureTypeProperty {
    FeatureTypeProperty {
      feature_type_property_id: Uuid::new_v4(),
      feature_type_id:          ty.feature_type_id,
      feature_property_id:      p.feature_property_id,
      sort,
      validity:                 Validity::starting(Utc::now()),
    }
  }

  #[test]
  fn properties_follow_sort_order() {
    let observation = ftype("observation");
    let count = prop("count", PropertyKind::Number);
    let name = prop("name", PropertyKind::String);
    let when = prop("start_date", PropertyKind::Datetime);
    let links = vec![
      link(&observation, &when, None),
      link(&observation, &count, Some(2)),
      link(&observation, &name, Some(1)),
    ];
    let registry = SchemaRegistry::new(
      vec![observation],
      vec![count, name, when],
      links,
    );

    let names: Vec<_> = registry
      .properties_for("observation")
      .unwrap()
      .into_iter()
      .map(|p| p.name.as_str())
      .collect();
    assert_eq!(names, ["name", "count", "start_date"]);
  }

  #[test]
  fn retired_rows_are_unknown() {
    let mut dataset = ftype("dataset");
    dataset.validity.end_date = Some(Utc::now());
    let mut old = prop("old", PropertyKind::String);
    old.validity.end_date = Some(Utc::now());
    let registry = SchemaRegistry::new(vec![dataset], vec![old], vec![]);

    assert!(matches!(
      registry.properties_for("dataset"),
      Err(Error::UnknownFeatureType(_))
    ));
    assert!(matches!(
      registry.property_type("old"),
      Err(Error::UnknownProperty(_))
    ));
  }

  #[test]
  fn nested_property_path() {
    let range = prop("date_range", PropertyKind::Object);
    let mut start = prop("start_date", PropertyKind::Datetime);
    start.parent_feature_property_id = Some(range.feature_property_id);
    let start_id = start.feature_property_id;
    let registry = SchemaRegistry::new(vec![], vec![range, start], vec![]);

    assert_eq!(registry.path(start_id).unwrap(), ["date_range", "start_date"]);
    assert_eq!(
      registry.property_type("start_date").unwrap(),
      PropertyKind::Datetime
    );
  }

  #[test]
  fn kind_round_trips_through_text() {
    assert_eq!(PropertyKind::Datetime.as_ref(), "datetime");
    assert_eq!("taxonomy".parse::<PropertyKind>().unwrap(), PropertyKind::Taxonomy);
    assert!(!PropertyKind::Object.is_indexed());
  }
}
