//! Error types for `biohub-core`.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
  // ── Configuration ───────────────────────────────────────────────────────
  #[error("unknown feature type: {0}")]
  UnknownFeatureType(String),

  #[error("unknown feature property: {0}")]
  UnknownProperty(String),

  #[error("security rule has no conditions")]
  EmptyConditionSet,

  #[error("a current security rule named {0:?} already exists")]
  DuplicateRuleName(String),

  #[error("a current feature type named {0:?} already exists")]
  DuplicateFeatureType(String),

  #[error("a current feature property named {0:?} already exists")]
  DuplicateProperty(String),

  #[error("comparator {comparator} is not supported for {kind} values")]
  ComparatorNotSupported { comparator: String, kind: String },

  // ── Data quality ────────────────────────────────────────────────────────
  #[error("property {property:?} expected a {expected} value, got {actual}")]
  TypeMismatch {
    property: String,
    expected: String,
    actual:   String,
  },

  #[error("geometry reference system mismatch: expected EPSG:{expected}, got EPSG:{actual}")]
  GeometryReferenceMismatch { expected: u32, actual: u32 },

  #[error("invalid geometry: {0}")]
  InvalidGeometry(String),

  // ── Lookups ─────────────────────────────────────────────────────────────
  #[error("submission feature not found: {0}")]
  FeatureNotFound(Uuid),

  #[error("security rule not found: {0}")]
  RuleNotFound(Uuid),

  #[error("parent feature not found: {0}")]
  ParentNotFound(Uuid),

  #[error("parent feature {parent} belongs to a different submission")]
  ParentSubmissionMismatch { parent: Uuid },

  // ── Concurrency ─────────────────────────────────────────────────────────
  #[error("submission feature {0} was modified concurrently")]
  StaleFeature(Uuid),

  #[error("concurrent modification of security link ({feature}, {rule})")]
  ConcurrentModification { feature: Uuid, rule: Uuid },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
