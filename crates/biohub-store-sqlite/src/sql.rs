//! Synchronous statement helpers run on the connection thread, usually
//! inside an open transaction. All values arrive pre-encoded as column text.

use rusqlite::{Connection, OptionalExtension as _, Row, params};

use crate::encode::{
  RawCondition, RawConditionValue, RawFeature, RawFeatureProperty,
  RawFeatureType, RawFeatureTypeProperty, RawIndexRow, RawLink, RawRule,
};

/// Every search table. End-dating a feature's projection touches all of them.
const SEARCH_TABLES: [&str; 5] = [
  "search_string",
  "search_number",
  "search_datetime",
  "search_spatial",
  "search_taxonomy",
];

/// Whether `e` is a violation of a unique index, i.e. a second current row
/// for a key that must have at most one.
pub fn is_unique_violation(e: &rusqlite::Error) -> bool {
  matches!(
    e,
    rusqlite::Error::SqliteFailure(err, _)
      if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
  )
}

// ─── Row mappers ─────────────────────────────────────────────────────────────

pub const FEATURE_TYPE_COLUMNS: &str =
  "feature_type_id, name, display_name, sort, effective_date, end_date";

pub fn feature_type_row(row: &Row<'_>) -> rusqlite::Result<RawFeatureType> {
  Ok(RawFeatureType {
    feature_type_id: row.get(0)?,
    name:            row.get(1)?,
    display_name:    row.get(2)?,
    sort:            row.get(3)?,
    effective_date:  row.get(4)?,
    end_date:        row.get(5)?,
  })
}

pub const PROPERTY_COLUMNS: &str = "feature_property_id, name, display_name, \
  property_type, parent_feature_property_id, effective_date, end_date";

pub fn property_row(row: &Row<'_>) -> rusqlite::Result<RawFeatureProperty> {
  Ok(RawFeatureProperty {
    feature_property_id:        row.get(0)?,
    name:                       row.get(1)?,
    display_name:               row.get(2)?,
    property_type:              row.get(3)?,
    parent_feature_property_id: row.get(4)?,
    effective_date:             row.get(5)?,
    end_date:                   row.get(6)?,
  })
}

pub const TYPE_PROPERTY_COLUMNS: &str = "feature_type_property_id, \
  feature_type_id, feature_property_id, sort, effective_date, end_date";

pub fn type_property_row(row: &Row<'_>) -> rusqlite::Result<RawFeatureTypeProperty> {
  Ok(RawFeatureTypeProperty {
    feature_type_property_id: row.get(0)?,
    feature_type_id:          row.get(1)?,
    feature_property_id:      row.get(2)?,
    sort:                     row.get(3)?,
    effective_date:           row.get(4)?,
    end_date:                 row.get(5)?,
  })
}

pub const FEATURE_COLUMNS: &str = "submission_feature_id, submission_id, \
  feature_type_id, data, parent_submission_feature_id, revision_count, \
  create_date, update_date, effective_date, end_date";

pub fn feature_row(row: &Row<'_>) -> rusqlite::Result<RawFeature> {
  Ok(RawFeature {
    submission_feature_id:        row.get(0)?,
    submission_id:                row.get(1)?,
    feature_type_id:              row.get(2)?,
    data:                         row.get(3)?,
    parent_submission_feature_id: row.get(4)?,
    revision_count:               row.get(5)?,
    create_date:                  row.get(6)?,
    update_date:                  row.get(7)?,
    effective_date:               row.get(8)?,
    end_date:                     row.get(9)?,
  })
}

pub const RULE_COLUMNS: &str =
  "security_rule_id, name, description, category, effective_date, end_date";

pub fn rule_row(row: &Row<'_>) -> rusqlite::Result<RawRule> {
  Ok(RawRule {
    security_rule_id: row.get(0)?,
    name:             row.get(1)?,
    description:      row.get(2)?,
    category:         row.get(3)?,
    effective_date:   row.get(4)?,
    end_date:         row.get(5)?,
  })
}

pub const LINK_COLUMNS: &str = "submission_feature_security_id, \
  submission_feature_id, security_rule_id, effective_date, end_date";

pub fn link_row(row: &Row<'_>) -> rusqlite::Result<RawLink> {
  Ok(RawLink {
    submission_feature_security_id: row.get(0)?,
    submission_feature_id:          row.get(1)?,
    security_rule_id:               row.get(2)?,
    effective_date:                 row.get(3)?,
    end_date:                       row.get(4)?,
  })
}

// ─── Existence checks ────────────────────────────────────────────────────────

/// `submission_id` of the current feature `id`, if there is one.
pub fn current_feature_submission(
  conn: &Connection,
  id: &str,
) -> rusqlite::Result<Option<String>> {
  conn
    .query_row(
      "SELECT submission_id FROM submission_feature
       WHERE submission_feature_id = ?1 AND end_date IS NULL",
      params![id],
      |r| r.get(0),
    )
    .optional()
}

pub fn feature_type_is_current(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
  is_current(conn, "SELECT 1 FROM feature_type WHERE feature_type_id = ?1 AND end_date IS NULL", id)
}

pub fn property_is_current(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
  is_current(
    conn,
    "SELECT 1 FROM feature_property WHERE feature_property_id = ?1 AND end_date IS NULL",
    id,
  )
}

pub fn rule_is_current(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
  is_current(conn, "SELECT 1 FROM security_rule WHERE security_rule_id = ?1 AND end_date IS NULL", id)
}

pub fn name_is_taken(conn: &Connection, table: &str, name: &str) -> rusqlite::Result<bool> {
  is_current(
    conn,
    &format!("SELECT 1 FROM {table} WHERE name = ?1 AND end_date IS NULL"),
    name,
  )
}

fn is_current(conn: &Connection, sql: &str, key: &str) -> rusqlite::Result<bool> {
  Ok(
    conn
      .query_row(sql, params![key], |_| Ok(true))
      .optional()?
      .unwrap_or(false),
  )
}

// ─── Search rows ─────────────────────────────────────────────────────────────

pub fn insert_index_rows(
  conn: &Connection,
  feature: &str,
  at: &str,
  rows: &[RawIndexRow],
) -> rusqlite::Result<()> {
  for row in rows {
    match row {
      RawIndexRow::String { property, value } => conn.execute(
        "INSERT INTO search_string
           (submission_feature_id, feature_property_id, value, effective_date)
         VALUES (?1, ?2, ?3, ?4)",
        params![feature, property, value, at],
      )?,
      RawIndexRow::Number { property, value } => conn.execute(
        "INSERT INTO search_number
           (submission_feature_id, feature_property_id, value, effective_date)
         VALUES (?1, ?2, ?3, ?4)",
        params![feature, property, value, at],
      )?,
      RawIndexRow::Datetime { property, value } => conn.execute(
        "INSERT INTO search_datetime
           (submission_feature_id, feature_property_id, value, effective_date)
         VALUES (?1, ?2, ?3, ?4)",
        params![feature, property, value, at],
      )?,
      RawIndexRow::Spatial { property, value, srid } => conn.execute(
        "INSERT INTO search_spatial
           (submission_feature_id, feature_property_id, value, srid, effective_date)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![feature, property, value, srid, at],
      )?,
      RawIndexRow::Taxonomy { property, value } => conn.execute(
        "INSERT INTO search_taxonomy
           (submission_feature_id, feature_property_id, value, effective_date)
         VALUES (?1, ?2, ?3, ?4)",
        params![feature, property, value, at],
      )?,
    };
  }
  Ok(())
}

/// End-date every current search row of `feature`; returns the row count.
pub fn end_index_rows(conn: &Connection, feature: &str, at: &str) -> rusqlite::Result<usize> {
  let mut ended = 0;
  for table in SEARCH_TABLES {
    ended += conn.execute(
      &format!(
        "UPDATE {table} SET end_date = ?2
         WHERE submission_feature_id = ?1 AND end_date IS NULL"
      ),
      params![feature, at],
    )?;
  }
  Ok(ended)
}

pub fn select_index_rows(conn: &Connection, feature: &str) -> rusqlite::Result<Vec<RawIndexRow>> {
  let mut rows = Vec::new();
  // Rowid order keeps repeated occurrences in insertion order.
  let current = "WHERE submission_feature_id = ?1 AND end_date IS NULL ORDER BY 1";

  let mut stmt = conn.prepare(&format!(
    "SELECT search_string_id, feature_property_id, value FROM search_string {current}"
  ))?;
  for row in stmt.query_map(params![feature], |r| {
    Ok(RawIndexRow::String { property: r.get(1)?, value: r.get(2)? })
  })? {
    rows.push(row?);
  }

  let mut stmt = conn.prepare(&format!(
    "SELECT search_number_id, feature_property_id, value FROM search_number {current}"
  ))?;
  for row in stmt.query_map(params![feature], |r| {
    Ok(RawIndexRow::Number { property: r.get(1)?, value: r.get(2)? })
  })? {
    rows.push(row?);
  }

  let mut stmt = conn.prepare(&format!(
    "SELECT search_datetime_id, feature_property_id, value FROM search_datetime {current}"
  ))?;
  for row in stmt.query_map(params![feature], |r| {
    Ok(RawIndexRow::Datetime { property: r.get(1)?, value: r.get(2)? })
  })? {
    rows.push(row?);
  }

  let mut stmt = conn.prepare(&format!(
    "SELECT search_spatial_id, feature_property_id, value, srid FROM search_spatial {current}"
  ))?;
  for row in stmt.query_map(params![feature], |r| {
    Ok(RawIndexRow::Spatial {
      property: r.get(1)?,
      value:    r.get(2)?,
      srid:     r.get(3)?,
    })
  })? {
    rows.push(row?);
  }

  let mut stmt = conn.prepare(&format!(
    "SELECT search_taxonomy_id, feature_property_id, value FROM search_taxonomy {current}"
  ))?;
  for row in stmt.query_map(params![feature], |r| {
    Ok(RawIndexRow::Taxonomy { property: r.get(1)?, value: r.get(2)? })
  })? {
    rows.push(row?);
  }

  Ok(rows)
}

// ─── Conditions ──────────────────────────────────────────────────────────────

pub fn insert_conditions(conn: &Connection, conditions: &[RawCondition]) -> rusqlite::Result<()> {
  for c in conditions {
    let ids = (&c.security_condition_id, &c.security_rule_id, &c.feature_property_id);
    match &c.value {
      RawConditionValue::String(value) => conn.execute(
        "INSERT INTO security_string
           (security_string_id, security_rule_id, feature_property_id, comparator, value)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![ids.0, ids.1, ids.2, c.comparator, value],
      )?,
      RawConditionValue::Number(value) => conn.execute(
        "INSERT INTO security_number
           (security_number_id, security_rule_id, feature_property_id, comparator, value)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![ids.0, ids.1, ids.2, c.comparator, value],
      )?,
      RawConditionValue::Datetime(value) => conn.execute(
        "INSERT INTO security_datetime
           (security_datetime_id, security_rule_id, feature_property_id, comparator, value)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![ids.0, ids.1, ids.2, c.comparator, value],
      )?,
      RawConditionValue::Spatial { value, srid } => conn.execute(
        "INSERT INTO security_spatial
           (security_spatial_id, security_rule_id, feature_property_id, comparator, value, srid)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![ids.0, ids.1, ids.2, c.comparator, value, srid],
      )?,
    };
  }
  Ok(())
}

/// Conditions of current rules, optionally restricted to one rule.
pub fn select_conditions(
  conn: &Connection,
  rule: Option<&str>,
) -> rusqlite::Result<Vec<RawCondition>> {
  let mut out = Vec::new();

  for (table, id_column) in [
    ("security_string", "security_string_id"),
    ("security_number", "security_number_id"),
    ("security_datetime", "security_datetime_id"),
    ("security_spatial", "security_spatial_id"),
  ] {
    let srid = if table == "security_spatial" { "c.srid" } else { "NULL" };
    let mut stmt = conn.prepare(&format!(
      "SELECT c.{id_column}, c.security_rule_id, c.feature_property_id,
              c.comparator, c.value, {srid}
       FROM {table} c
       JOIN security_rule r ON r.security_rule_id = c.security_rule_id
       WHERE r.end_date IS NULL
         AND (?1 IS NULL OR c.security_rule_id = ?1)
       ORDER BY c.rowid"
    ))?;
    let rows = stmt.query_map(params![rule], |r| {
      let value = match table {
        "security_string" => RawConditionValue::String(r.get(4)?),
        "security_number" => RawConditionValue::Number(r.get(4)?),
        "security_datetime" => RawConditionValue::Datetime(r.get(4)?),
        _ => RawConditionValue::Spatial { value: r.get(4)?, srid: r.get(5)? },
      };
      Ok(RawCondition {
        security_condition_id: r.get(0)?,
        security_rule_id: r.get(1)?,
        feature_property_id: r.get(2)?,
        comparator: r.get(3)?,
        value,
      })
    })?;
    for row in rows {
      out.push(row?);
    }
  }

  Ok(out)
}

// ─── Ledger ──────────────────────────────────────────────────────────────────

/// End-date the current link for a pair; returns how many rows were ended.
pub fn end_link(conn: &Connection, feature: &str, rule: &str, at: &str) -> rusqlite::Result<usize> {
  conn.execute(
    "UPDATE submission_feature_security SET end_date = ?3
     WHERE submission_feature_id = ?1 AND security_rule_id = ?2 AND end_date IS NULL",
    params![feature, rule, at],
  )
}

pub fn insert_link(
  conn: &Connection,
  id: &str,
  feature: &str,
  rule: &str,
  at: &str,
) -> rusqlite::Result<()> {
  conn.execute(
    "INSERT INTO submission_feature_security
       (submission_feature_security_id, submission_feature_id, security_rule_id, effective_date)
     VALUES (?1, ?2, ?3, ?4)",
    params![id, feature, rule, at],
  )?;
  Ok(())
}
