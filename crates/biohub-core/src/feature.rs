//! Submission features and the per-submission feature tree.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result, temporal::Validity};

/// The atomic unit of submitted content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionFeature {
  pub submission_feature_id:        Uuid,
  pub submission_id:                Uuid,
  pub feature_type_id:              Uuid,
  /// Keys are expected to match property names legal for the feature type.
  pub data:                         serde_json::Value,
  pub parent_submission_feature_id: Option<Uuid>,
  /// Incremented on every correction of `data`.
  pub revision_count:               u32,
  pub create_date:                  DateTime<Utc>,
  pub update_date:                  Option<DateTime<Utc>>,
  pub validity:                     Validity,
}

/// Input to [`crate::store::SubmissionStore::insert_feature`].
#[derive(Debug, Clone)]
pub struct NewSubmissionFeature {
  pub submission_id:                Uuid,
  pub feature_type_id:              Uuid,
  pub data:                         serde_json::Value,
  pub parent_submission_feature_id: Option<Uuid>,
}

impl NewSubmissionFeature {
  /// A root feature with no parent.
  pub fn new(
    submission_id: Uuid,
    feature_type_id: Uuid,
    data: serde_json::Value,
  ) -> Self {
    Self {
      submission_id,
      feature_type_id,
      data,
      parent_submission_feature_id: None,
    }
  }

  pub fn with_parent(mut self, parent: Uuid) -> Self {
    self.parent_submission_feature_id = Some(parent);
    self
  }
}

// ─── Tree ────────────────────────────────────────────────────────────────────

/// Arena over the features of one submission, linked by parent id.
#[derive(Debug, Clone, Default)]
pub struct FeatureTree {
  nodes:    Vec<SubmissionFeature>,
  slots:    HashMap<Uuid, usize>,
  children: Vec<Vec<usize>>,
  roots:    Vec<usize>,
}

impl FeatureTree {
  /// Build the tree. Every parent must be present and belong to the same
  /// submission as its child.
  pub fn new(features: Vec<SubmissionFeature>) -> Result<Self> {
    let slots: HashMap<Uuid, usize> = features
      .iter()
      .enumerate()
      .map(|(slot, f)| (f.submission_feature_id, slot))
      .collect();

    let mut children = vec![Vec::new(); features.len()];
    let mut roots = Vec::new();
    for (slot, feature) in features.iter().enumerate() {
      match feature.parent_submission_feature_id {
        None => roots.push(slot),
        Some(parent_id) => {
          let parent = *slots.get(&parent_id).ok_or(Error::ParentNotFound(parent_id))?;
          if features[parent].submission_id != feature.submission_id {
            return Err(Error::ParentSubmissionMismatch { parent: parent_id });
          }
          children[parent].push(slot);
        }
      }
    }

    Ok(Self { nodes: features, slots, children, roots })
  }

  pub fn len(&self) -> usize { self.nodes.len() }

  pub fn is_empty(&self) -> bool { self.nodes.is_empty() }

  pub fn get(&self, id: Uuid) -> Option<&SubmissionFeature> {
    self.slots.get(&id).map(|&slot| &self.nodes[slot])
  }

  pub fn roots(&self) -> impl Iterator<Item = &SubmissionFeature> {
    self.roots.iter().map(|&slot| &self.nodes[slot])
  }

  pub fn children(&self, id: Uuid) -> impl Iterator<Item = &SubmissionFeature> {
    self
      .slots
      .get(&id)
      .map(|&slot| self.children[slot].as_slice())
      .unwrap_or_default()
      .iter()
      .map(|&child| &self.nodes[child])
  }

  /// Parent, grandparent, ... up to the root.
  pub fn ancestors(&self, id: Uuid) -> Vec<&SubmissionFeature> {
    let mut out = Vec::new();
    let mut cursor = self.get(id).and_then(|f| f.parent_submission_feature_id);
    while let Some(parent_id) = cursor {
      let Some(parent) = self.get(parent_id) else { break };
      if out.len() >= self.nodes.len() {
        break;
      }
      out.push(parent);
      cursor = parent.parent_submission_feature_id;
    }
    out
  }

  /// Depth-first, parents before children.
  pub fn preorder(&self) -> Vec<&SubmissionFeature> {
    let mut out = Vec::with_capacity(self.nodes.len());
    let mut stack: Vec<usize> = self.roots.iter().rev().copied().collect();
    while let Some(slot) = stack.pop() {
      out.push(&self.nodes[slot]);
      stack.extend(self.children[slot].iter().rev());
    }
    out
  }
}
