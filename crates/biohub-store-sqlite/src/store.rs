//! [`SqliteStore`], the SQLite implementation of [`SubmissionStore`].

use std::{
  collections::{BTreeSet, HashMap},
  path::Path,
  time::Duration,
};

use chrono::Utc;
use rusqlite::{OptionalExtension as _, TransactionBehavior, params};
use uuid::Uuid;

use biohub_core::{
  feature::{NewSubmissionFeature, SubmissionFeature},
  index::{self, FeatureIndex},
  ledger::{FeatureSecurityLink, StagedChanges},
  rule::{NewSecurityRule, SecurityCondition, SecurityRule},
  schema::{
    FeatureProperty, FeatureType, FeatureTypeProperty, NewFeatureProperty,
    NewFeatureType, SchemaRegistry,
  },
  store::SubmissionStore,
  temporal::Validity,
};

use crate::{
  Error, Result,
  encode::{RawCondition, RawIndexRow, decode_uuid, encode_dt, encode_uuid},
  schema::SCHEMA,
  sql,
};

/// How long a writer waits on a locked database before giving up.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type CoreResult<T> = std::result::Result<T, biohub_core::Error>;

// ─── Store ───────────────────────────────────────────────────────────────────

/// A BioHub submission store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    Self::open_with(path, DEFAULT_BUSY_TIMEOUT).await
  }

  pub async fn open_with(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init(busy_timeout).await?;
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init(DEFAULT_BUSY_TIMEOUT).await?;
    Ok(store)
  }

  async fn init(&self, busy_timeout: Duration) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Run `f` inside an immediate transaction.
  ///
  /// `f` returns `Ok(Err(_))` for domain rejections; the transaction is then
  /// rolled back and the rejection surfaces as [`Error::Core`].
  async fn write<T, F>(&self, f: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&rusqlite::Transaction<'_>) -> rusqlite::Result<CoreResult<T>>
      + Send
      + 'static,
  {
    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let outcome = f(&tx)?;
        if outcome.is_ok() {
          tx.commit()?;
        }
        Ok(outcome)
      })
      .await?;
    Ok(outcome?)
  }

  /// Run a ledger write, retrying once in a fresh transaction if it lost a
  /// race on the current-link unique index.
  ///
  /// Ledger writers are serialised by the immediate transaction in
  /// [`Self::write`]: the write lock is held from before the current link is
  /// end-dated until the successor is inserted. The collision branch in
  /// `replace_link` therefore only fires if a row was written by something
  /// other than this store; the partial unique index is the invariant.
  async fn write_ledger<T, F>(&self, f: F) -> Result<T>
  where
    T: Send + 'static,
    F: Fn(&rusqlite::Transaction<'_>) -> rusqlite::Result<CoreResult<T>>
      + Clone
      + Send
      + 'static,
  {
    match self.write(f.clone()).await {
      Err(Error::Core(biohub_core::Error::ConcurrentModification { feature, rule })) => {
        tracing::warn!(%feature, %rule, "security link conflict; retrying");
        self.write(f).await
      }
      other => other,
    }
  }

  async fn current_feature(&self, id: Uuid) -> Result<SubmissionFeature> {
    match self.get_feature(id).await? {
      Some(f) if f.validity.is_current() => Ok(f),
      _ => Err(biohub_core::Error::FeatureNotFound(id).into()),
    }
  }

  /// Current rules with their conditions attached; all of them, or just
  /// `rule` if given.
  async fn load_rules(&self, rule: Option<Uuid>) -> Result<Vec<SecurityRule>> {
    let rule_str = rule.map(encode_uuid);
    let (raw_rules, raw_conditions) = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {} FROM security_rule
           WHERE end_date IS NULL AND (?1 IS NULL OR security_rule_id = ?1)
           ORDER BY name",
          sql::RULE_COLUMNS
        ))?;
        let rules = stmt
          .query_map(params![rule_str], sql::rule_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        let conditions = sql::select_conditions(conn, rule_str.as_deref())?;
        Ok((rules, conditions))
      })
      .await?;

    let mut by_rule: HashMap<Uuid, Vec<SecurityCondition>> = HashMap::new();
    for raw in raw_conditions {
      let condition = raw.into_condition()?;
      by_rule.entry(condition.security_rule_id).or_default().push(condition);
    }

    raw_rules
      .into_iter()
      .map(|raw| {
        let id = decode_uuid(&raw.security_rule_id)?;
        raw.into_rule(by_rule.remove(&id).unwrap_or_default())
      })
      .collect()
  }

  async fn current_links(&self, column: &'static str, id: Uuid) -> Result<Vec<FeatureSecurityLink>> {
    let id_str = encode_uuid(id);
    let raws = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {} FROM submission_feature_security
           WHERE {column} = ?1 AND end_date IS NULL",
          sql::LINK_COLUMNS
        ))?;
        let rows = stmt
          .query_map(params![id_str], sql::link_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(|r| r.into_link()).collect()
  }
}

/// End-date any current link for the pair and insert a new one.
///
/// Must run inside an immediate transaction; a unique violation here means a
/// current row appeared outside the store's own write lock.
fn replace_link(
  tx: &rusqlite::Transaction<'_>,
  feature: Uuid,
  rule: Uuid,
  link_id: Uuid,
  at: &str,
) -> rusqlite::Result<CoreResult<()>> {
  let (feature_str, rule_str) = (encode_uuid(feature), encode_uuid(rule));
  sql::end_link(tx, &feature_str, &rule_str, at)?;
  match sql::insert_link(tx, &encode_uuid(link_id), &feature_str, &rule_str, at) {
    Ok(()) => Ok(Ok(())),
    Err(e) if sql::is_unique_violation(&e) => {
      Ok(Err(biohub_core::Error::ConcurrentModification { feature, rule }))
    }
    Err(e) => Err(e),
  }
}

impl SubmissionStore for SqliteStore {
  type Error = Error;

  // ── Schema registry ───────────────────────────────────────────────────

  async fn add_feature_type(&self, input: NewFeatureType) -> Result<FeatureType> {
    let row = FeatureType {
      feature_type_id: Uuid::new_v4(),
      name:            input.name,
      display_name:    input.display_name,
      sort:            input.sort,
      validity:        Validity::starting(Utc::now()),
    };

    let id_str = encode_uuid(row.feature_type_id);
    let at_str = encode_dt(row.validity.effective_date);
    let (name, display_name, sort) = (row.name.clone(), row.display_name.clone(), row.sort);
    self
      .write(move |tx| {
        if sql::name_is_taken(tx, "feature_type", &name)? {
          return Ok(Err(biohub_core::Error::DuplicateFeatureType(name)));
        }
        tx.execute(
          "INSERT INTO feature_type
             (feature_type_id, name, display_name, sort, effective_date)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          params![id_str, name, display_name, sort, at_str],
        )?;
        Ok(Ok(()))
      })
      .await?;

    tracing::debug!(feature_type = %row.name, "added feature type");
    Ok(row)
  }

  async fn add_feature_property(&self, input: NewFeatureProperty) -> Result<FeatureProperty> {
    let row = FeatureProperty {
      feature_property_id:        Uuid::new_v4(),
      name:                       input.name,
      display_name:               input.display_name,
      kind:                       input.kind,
      parent_feature_property_id: input.parent_feature_property_id,
      validity:                   Validity::starting(Utc::now()),
    };

    let id_str = encode_uuid(row.feature_property_id);
    let at_str = encode_dt(row.validity.effective_date);
    let kind_str = row.kind.as_ref().to_owned();
    let parent = row.parent_feature_property_id;
    let (name, display_name) = (row.name.clone(), row.display_name.clone());
    self
      .write(move |tx| {
        let parent_str = parent.map(encode_uuid);
        if let Some(p) = &parent_str
          && !sql::property_is_current(tx, p)?
        {
          return Ok(Err(biohub_core::Error::UnknownProperty(p.clone())));
        }
        if sql::name_is_taken(tx, "feature_property", &name)? {
          return Ok(Err(biohub_core::Error::DuplicateProperty(name)));
        }
        tx.execute(
          "INSERT INTO feature_property
             (feature_property_id, name, display_name, property_type,
              parent_feature_property_id, effective_date)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          params![id_str, name, display_name, kind_str, parent_str, at_str],
        )?;
        Ok(Ok(()))
      })
      .await?;

    tracing::debug!(property = %row.name, kind = %row.kind, "added feature property");
    Ok(row)
  }

  async fn attach_property(
    &self,
    feature_type_id: Uuid,
    feature_property_id: Uuid,
    sort: Option<i32>,
  ) -> Result<FeatureTypeProperty> {
    let row = FeatureTypeProperty {
      feature_type_property_id: Uuid::new_v4(),
      feature_type_id,
      feature_property_id,
      sort,
      validity: Validity::starting(Utc::now()),
    };

    let id_str = encode_uuid(row.feature_type_property_id);
    let type_str = encode_uuid(feature_type_id);
    let prop_str = encode_uuid(feature_property_id);
    let at_str = encode_dt(row.validity.effective_date);
    self
      .write(move |tx| {
        if !sql::feature_type_is_current(tx, &type_str)? {
          return Ok(Err(biohub_core::Error::UnknownFeatureType(type_str)));
        }
        if !sql::property_is_current(tx, &prop_str)? {
          return Ok(Err(biohub_core::Error::UnknownProperty(prop_str)));
        }
        // Re-attaching replaces the sort order of the current link.
        tx.execute(
          "UPDATE feature_type_property SET end_date = ?3
           WHERE feature_type_id = ?1 AND feature_property_id = ?2 AND end_date IS NULL",
          params![type_str, prop_str, at_str],
        )?;
        tx.execute(
          "INSERT INTO feature_type_property
             (feature_type_property_id, feature_type_id, feature_property_id, sort, effective_date)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          params![id_str, type_str, prop_str, sort, at_str],
        )?;
        Ok(Ok(()))
      })
      .await?;

    Ok(row)
  }

  async fn retire_feature_property(&self, feature_property_id: Uuid) -> Result<()> {
    let id_str = encode_uuid(feature_property_id);
    let at_str = encode_dt(Utc::now());
    self
      .write(move |tx| {
        let ended = tx.execute(
          "UPDATE feature_property SET end_date = ?2
           WHERE feature_property_id = ?1 AND end_date IS NULL",
          params![id_str, at_str],
        )?;
        if ended == 0 {
          return Ok(Err(biohub_core::Error::UnknownProperty(id_str)));
        }
        tx.execute(
          "UPDATE feature_type_property SET end_date = ?2
           WHERE feature_property_id = ?1 AND end_date IS NULL",
          params![id_str, at_str],
        )?;
        Ok(Ok(()))
      })
      .await?;

    tracing::debug!(%feature_property_id, "retired feature property");
    Ok(())
  }

  async fn schema_registry(&self) -> Result<SchemaRegistry> {
    let (types, properties, links) = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {} FROM feature_type WHERE end_date IS NULL",
          sql::FEATURE_TYPE_COLUMNS
        ))?;
        let types = stmt
          .query_map([], sql::feature_type_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stmt = conn.prepare(&format!(
          "SELECT {} FROM feature_property WHERE end_date IS NULL",
          sql::PROPERTY_COLUMNS
        ))?;
        let properties = stmt
          .query_map([], sql::property_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stmt = conn.prepare(&format!(
          "SELECT {} FROM feature_type_property WHERE end_date IS NULL",
          sql::TYPE_PROPERTY_COLUMNS
        ))?;
        let links = stmt
          .query_map([], sql::type_property_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok((types, properties, links))
      })
      .await?;

    Ok(SchemaRegistry::new(
      types
        .into_iter()
        .map(|r| r.into_feature_type())
        .collect::<Result<_>>()?,
      properties
        .into_iter()
        .map(|r| r.into_property())
        .collect::<Result<_>>()?,
      links
        .into_iter()
        .map(|r| r.into_link())
        .collect::<Result<_>>()?,
    ))
  }

  // ── Features and their index ──────────────────────────────────────────

  async fn insert_feature(&self, input: NewSubmissionFeature) -> Result<SubmissionFeature> {
    let registry = self.schema_registry().await?;
    registry.feature_type(input.feature_type_id)?;

    let now = Utc::now();
    let feature = SubmissionFeature {
      submission_feature_id:        Uuid::new_v4(),
      submission_id:                input.submission_id,
      feature_type_id:              input.feature_type_id,
      data:                         input.data,
      parent_submission_feature_id: input.parent_submission_feature_id,
      revision_count:               0,
      create_date:                  now,
      update_date:                  None,
      validity:                     Validity::starting(now),
    };

    // Projection runs before the write so a coercion failure stores nothing.
    let entries = index::project(
      &registry,
      feature.submission_feature_id,
      feature.feature_type_id,
      &feature.data,
    )?;
    let rows = entries
      .iter()
      .map(RawIndexRow::from_entry)
      .collect::<Result<Vec<_>>>()?;

    let id_str = encode_uuid(feature.submission_feature_id);
    let submission_str = encode_uuid(feature.submission_id);
    let type_str = encode_uuid(feature.feature_type_id);
    let data_str = serde_json::to_string(&feature.data)?;
    let parent = feature.parent_submission_feature_id;
    let at_str = encode_dt(now);
    let row_count = rows.len();
    self
      .write(move |tx| {
        if let Some(parent) = parent {
          match sql::current_feature_submission(tx, &encode_uuid(parent))? {
            None => return Ok(Err(biohub_core::Error::ParentNotFound(parent))),
            Some(s) if s != submission_str => {
              return Ok(Err(biohub_core::Error::ParentSubmissionMismatch { parent }));
            }
            Some(_) => {}
          }
        }
        if !sql::feature_type_is_current(tx, &type_str)? {
          return Ok(Err(biohub_core::Error::UnknownFeatureType(type_str)));
        }
        tx.execute(
          "INSERT INTO submission_feature
             (submission_feature_id, submission_id, feature_type_id, data,
              parent_submission_feature_id, revision_count, create_date, effective_date)
           VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?6)",
          params![
            id_str,
            submission_str,
            type_str,
            data_str,
            parent.map(encode_uuid),
            at_str
          ],
        )?;
        sql::insert_index_rows(tx, &id_str, &at_str, &rows)?;
        Ok(Ok(()))
      })
      .await?;

    tracing::debug!(
      feature = %feature.submission_feature_id,
      rows = row_count,
      "indexed new feature"
    );
    Ok(feature)
  }

  async fn get_feature(&self, id: Uuid) -> Result<Option<SubmissionFeature>> {
    let id_str = encode_uuid(id);
    let raw = self
      .conn
      .call(move |conn| {
        let raw = conn
          .query_row(
            &format!(
              "SELECT {} FROM submission_feature WHERE submission_feature_id = ?1",
              sql::FEATURE_COLUMNS
            ),
            params![id_str],
            sql::feature_row,
          )
          .optional()?;
        Ok(raw)
      })
      .await?;
    raw.map(|r| r.into_feature()).transpose()
  }

  async fn submission_features(&self, submission_id: Uuid) -> Result<Vec<SubmissionFeature>> {
    let id_str = encode_uuid(submission_id);
    let raws = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {} FROM submission_feature
           WHERE submission_id = ?1 AND end_date IS NULL
           ORDER BY create_date, rowid",
          sql::FEATURE_COLUMNS
        ))?;
        let rows = stmt
          .query_map(params![id_str], sql::feature_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(|r| r.into_feature()).collect()
  }

  async fn reindex_feature(
    &self,
    id: Uuid,
    data: serde_json::Value,
  ) -> Result<SubmissionFeature> {
    let mut feature = self.current_feature(id).await?;
    let registry = self.schema_registry().await?;
    let entries = index::project(&registry, id, feature.feature_type_id, &data)?;
    let rows = entries
      .iter()
      .map(RawIndexRow::from_entry)
      .collect::<Result<Vec<_>>>()?;

    let now = Utc::now();
    let id_str = encode_uuid(id);
    let data_str = serde_json::to_string(&data)?;
    let at_str = encode_dt(now);
    let expected_revision = feature.revision_count;
    let row_count = rows.len();
    self
      .write(move |tx| {
        let updated = tx.execute(
          "UPDATE submission_feature
           SET data = ?2, revision_count = revision_count + 1, update_date = ?3
           WHERE submission_feature_id = ?1 AND end_date IS NULL AND revision_count = ?4",
          params![id_str, data_str, at_str, expected_revision],
        )?;
        if updated == 0 {
          return Ok(Err(biohub_core::Error::StaleFeature(id)));
        }
        sql::end_index_rows(tx, &id_str, &at_str)?;
        sql::insert_index_rows(tx, &id_str, &at_str, &rows)?;
        Ok(Ok(()))
      })
      .await?;

    tracing::debug!(feature = %id, rows = row_count, "re-indexed feature");
    feature.data = data;
    feature.revision_count += 1;
    feature.update_date = Some(now);
    Ok(feature)
  }

  async fn retire_feature(&self, id: Uuid) -> Result<()> {
    let id_str = encode_uuid(id);
    let at_str = encode_dt(Utc::now());
    self
      .write(move |tx| {
        let ended = tx.execute(
          "UPDATE submission_feature SET end_date = ?2
           WHERE submission_feature_id = ?1 AND end_date IS NULL",
          params![id_str, at_str],
        )?;
        if ended == 0 {
          return Ok(Err(biohub_core::Error::FeatureNotFound(id)));
        }
        sql::end_index_rows(tx, &id_str, &at_str)?;
        Ok(Ok(()))
      })
      .await?;

    tracing::debug!(feature = %id, "retired feature");
    Ok(())
  }

  async fn feature_index(&self, id: Uuid) -> Result<FeatureIndex> {
    let id_str = encode_uuid(id);
    let raws = self
      .conn
      .call(move |conn| {
        if sql::current_feature_submission(conn, &id_str)?.is_none() {
          return Ok(None);
        }
        Ok(Some(sql::select_index_rows(conn, &id_str)?))
      })
      .await?
      .ok_or(biohub_core::Error::FeatureNotFound(id))?;

    let entries = raws
      .into_iter()
      .map(|r| r.into_entry(id))
      .collect::<Result<Vec<_>>>()?;
    Ok(FeatureIndex::from_entries(id, entries))
  }

  // ── Security rules ────────────────────────────────────────────────────

  async fn add_rule(&self, input: NewSecurityRule) -> Result<SecurityRule> {
    let registry = self.schema_registry().await?;
    input.validate(&registry)?;

    let security_rule_id = Uuid::new_v4();
    let rule = SecurityRule {
      security_rule_id,
      name: input.name,
      description: input.description,
      category: input.category,
      validity: Validity::starting(Utc::now()),
      conditions: input
        .conditions
        .into_iter()
        .map(|c| SecurityCondition {
          security_condition_id: Uuid::new_v4(),
          security_rule_id,
          feature_property_id: c.feature_property_id,
          comparator: c.comparator,
          value: c.value,
        })
        .collect(),
    };

    let raw_conditions = rule
      .conditions
      .iter()
      .map(RawCondition::from_condition)
      .collect::<Result<Vec<_>>>()?;
    let id_str = encode_uuid(security_rule_id);
    let at_str = encode_dt(rule.validity.effective_date);
    let (name, description, category) =
      (rule.name.clone(), rule.description.clone(), rule.category.clone());
    self
      .write(move |tx| {
        if sql::name_is_taken(tx, "security_rule", &name)? {
          return Ok(Err(biohub_core::Error::DuplicateRuleName(name)));
        }
        tx.execute(
          "INSERT INTO security_rule
             (security_rule_id, name, description, category, effective_date)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          params![id_str, name, description, category, at_str],
        )?;
        sql::insert_conditions(tx, &raw_conditions)?;
        Ok(Ok(()))
      })
      .await?;

    tracing::debug!(
      rule = %rule.name,
      conditions = rule.conditions.len(),
      "added security rule"
    );
    Ok(rule)
  }

  async fn retire_rule(&self, id: Uuid) -> Result<()> {
    let id_str = encode_uuid(id);
    let at_str = encode_dt(Utc::now());
    self
      .write(move |tx| {
        let ended = tx.execute(
          "UPDATE security_rule SET end_date = ?2
           WHERE security_rule_id = ?1 AND end_date IS NULL",
          params![id_str, at_str],
        )?;
        if ended == 0 {
          return Ok(Err(biohub_core::Error::RuleNotFound(id)));
        }
        Ok(Ok(()))
      })
      .await?;

    tracing::debug!(rule = %id, "retired security rule");
    Ok(())
  }

  async fn get_rule(&self, id: Uuid) -> Result<Option<SecurityRule>> {
    Ok(self.load_rules(Some(id)).await?.into_iter().next())
  }

  async fn current_rules(&self) -> Result<Vec<SecurityRule>> {
    self.load_rules(None).await
  }

  // ── Security ledger ───────────────────────────────────────────────────

  async fn apply_rule(&self, feature_id: Uuid, rule_id: Uuid) -> Result<FeatureSecurityLink> {
    let link = FeatureSecurityLink {
      submission_feature_security_id: Uuid::new_v4(),
      submission_feature_id:          feature_id,
      security_rule_id:               rule_id,
      validity:                       Validity::starting(Utc::now()),
    };

    let link_id = link.submission_feature_security_id;
    let at_str = encode_dt(link.validity.effective_date);
    self
      .write_ledger(move |tx| {
        if sql::current_feature_submission(tx, &encode_uuid(feature_id))?.is_none() {
          return Ok(Err(biohub_core::Error::FeatureNotFound(feature_id)));
        }
        if !sql::rule_is_current(tx, &encode_uuid(rule_id))? {
          return Ok(Err(biohub_core::Error::RuleNotFound(rule_id)));
        }
        replace_link(tx, feature_id, rule_id, link_id, &at_str)
      })
      .await?;

    tracing::debug!(feature = %feature_id, rule = %rule_id, "applied security rule");
    Ok(link)
  }

  async fn remove_rule(&self, feature_id: Uuid, rule_id: Uuid) -> Result<()> {
    let (feature_str, rule_str) = (encode_uuid(feature_id), encode_uuid(rule_id));
    let at_str = encode_dt(Utc::now());
    let ended = self
      .write(move |tx| Ok(Ok(sql::end_link(tx, &feature_str, &rule_str, &at_str)?)))
      .await?;

    if ended > 0 {
      tracing::debug!(feature = %feature_id, rule = %rule_id, "removed security rule");
    }
    Ok(())
  }

  async fn apply_staged(&self, feature_ids: Vec<Uuid>, staged: StagedChanges) -> Result<()> {
    let at_str = encode_dt(Utc::now());
    let (features, rules) = (feature_ids.len(), staged.apply.len() + staged.remove.len());
    self
      .write_ledger(move |tx| {
        for &feature in &feature_ids {
          if sql::current_feature_submission(tx, &encode_uuid(feature))?.is_none() {
            return Ok(Err(biohub_core::Error::FeatureNotFound(feature)));
          }
        }
        for &rule in &staged.apply {
          if !sql::rule_is_current(tx, &encode_uuid(rule))? {
            return Ok(Err(biohub_core::Error::RuleNotFound(rule)));
          }
        }

        // Applications first, so a rule staged both ways ends up removed.
        for &feature in &feature_ids {
          for &rule in &staged.apply {
            if let Err(e) = replace_link(tx, feature, rule, Uuid::new_v4(), &at_str)? {
              return Ok(Err(e));
            }
          }
          for &rule in &staged.remove {
            sql::end_link(tx, &encode_uuid(feature), &encode_uuid(rule), &at_str)?;
          }
        }
        Ok(Ok(()))
      })
      .await?;

    tracing::debug!(features, rules, "committed staged security changes");
    Ok(())
  }

  async fn secured_by(&self, feature_id: Uuid) -> Result<BTreeSet<Uuid>> {
    Ok(
      self
        .current_links("submission_feature_id", feature_id)
        .await?
        .into_iter()
        .map(|l| l.security_rule_id)
        .collect(),
    )
  }

  async fn secured_features(&self, rule_id: Uuid) -> Result<BTreeSet<Uuid>> {
    Ok(
      self
        .current_links("security_rule_id", rule_id)
        .await?
        .into_iter()
        .map(|l| l.submission_feature_id)
        .collect(),
    )
  }

  async fn security_history(&self, feature_id: Uuid) -> Result<Vec<FeatureSecurityLink>> {
    let id_str = encode_uuid(feature_id);
    let raws = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {} FROM submission_feature_security
           WHERE submission_feature_id = ?1
           ORDER BY effective_date, rowid",
          sql::LINK_COLUMNS
        ))?;
        let rows = stmt
          .query_map(params![id_str], sql::link_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(|r| r.into_link()).collect()
  }
}
