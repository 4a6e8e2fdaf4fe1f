//! SQL schema for the BioHub SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.
//!
//! Versioned tables carry `effective_date` / `end_date`. Rows are never
//! deleted; "at most one current row per key" is a partial unique index over
//! the key `WHERE end_date IS NULL`.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- ── Feature schema registry ────────────────────────────────────────────────

CREATE TABLE IF NOT EXISTS feature_type (
    feature_type_id TEXT PRIMARY KEY,
    name            TEXT NOT NULL,
    display_name    TEXT NOT NULL,
    sort            INTEGER,
    effective_date  TEXT NOT NULL,
    end_date        TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS feature_type_name_uk
    ON feature_type(name) WHERE end_date IS NULL;

CREATE TABLE IF NOT EXISTS feature_property (
    feature_property_id        TEXT PRIMARY KEY,
    name                       TEXT NOT NULL,
    display_name               TEXT NOT NULL,
    property_type              TEXT NOT NULL CHECK (property_type IN (
        'string', 'number', 'datetime', 'spatial',
        'taxonomy', 'boolean', 'object', 'array'
    )),
    parent_feature_property_id TEXT REFERENCES feature_property(feature_property_id),
    effective_date             TEXT NOT NULL,
    end_date                   TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS feature_property_name_uk
    ON feature_property(name) WHERE end_date IS NULL;

CREATE TABLE IF NOT EXISTS feature_type_property (
    feature_type_property_id TEXT PRIMARY KEY,
    feature_type_id          TEXT NOT NULL REFERENCES feature_type(feature_type_id),
    feature_property_id      TEXT NOT NULL REFERENCES feature_property(feature_property_id),
    sort                     INTEGER,
    effective_date           TEXT NOT NULL,
    end_date                 TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS feature_type_property_uk
    ON feature_type_property(feature_type_id, feature_property_id)
    WHERE end_date IS NULL;

-- ── Submission features ────────────────────────────────────────────────────

CREATE TABLE IF NOT EXISTS submission_feature (
    submission_feature_id        TEXT PRIMARY KEY,
    submission_id                TEXT NOT NULL,
    feature_type_id              TEXT NOT NULL REFERENCES feature_type(feature_type_id),
    data                         TEXT NOT NULL,   -- JSON document
    parent_submission_feature_id TEXT REFERENCES submission_feature(submission_feature_id),
    revision_count               INTEGER NOT NULL DEFAULT 0,
    create_date                  TEXT NOT NULL,
    update_date                  TEXT,
    effective_date               TEXT NOT NULL,
    end_date                     TEXT,
    CHECK (parent_submission_feature_id IS NULL
           OR parent_submission_feature_id != submission_feature_id)
);
CREATE INDEX IF NOT EXISTS submission_feature_submission_idx
    ON submission_feature(submission_id);
CREATE INDEX IF NOT EXISTS submission_feature_parent_idx
    ON submission_feature(parent_submission_feature_id);

-- ── Search index: one row per (feature, property, occurrence) ──────────────

CREATE TABLE IF NOT EXISTS search_string (
    search_string_id      INTEGER PRIMARY KEY,
    submission_feature_id TEXT NOT NULL REFERENCES submission_feature(submission_feature_id),
    feature_property_id   TEXT NOT NULL REFERENCES feature_property(feature_property_id),
    value                 TEXT NOT NULL,
    effective_date        TEXT NOT NULL,
    end_date              TEXT
);
CREATE INDEX IF NOT EXISTS search_string_feature_idx
    ON search_string(submission_feature_id, feature_property_id)
    WHERE end_date IS NULL;

CREATE TABLE IF NOT EXISTS search_number (
    search_number_id      INTEGER PRIMARY KEY,
    submission_feature_id TEXT NOT NULL REFERENCES submission_feature(submission_feature_id),
    feature_property_id   TEXT NOT NULL REFERENCES feature_property(feature_property_id),
    value                 REAL NOT NULL,
    effective_date        TEXT NOT NULL,
    end_date              TEXT
);
CREATE INDEX IF NOT EXISTS search_number_feature_idx
    ON search_number(submission_feature_id, feature_property_id)
    WHERE end_date IS NULL;

CREATE TABLE IF NOT EXISTS search_datetime (
    search_datetime_id    INTEGER PRIMARY KEY,
    submission_feature_id TEXT NOT NULL REFERENCES submission_feature(submission_feature_id),
    feature_property_id   TEXT NOT NULL REFERENCES feature_property(feature_property_id),
    value                 TEXT NOT NULL,   -- RFC 3339 UTC
    effective_date        TEXT NOT NULL,
    end_date              TEXT
);
CREATE INDEX IF NOT EXISTS search_datetime_feature_idx
    ON search_datetime(submission_feature_id, feature_property_id)
    WHERE end_date IS NULL;

CREATE TABLE IF NOT EXISTS search_spatial (
    search_spatial_id     INTEGER PRIMARY KEY,
    submission_feature_id TEXT NOT NULL REFERENCES submission_feature(submission_feature_id),
    feature_property_id   TEXT NOT NULL REFERENCES feature_property(feature_property_id),
    value                 TEXT NOT NULL,   -- GeoJSON geometry
    srid                  INTEGER NOT NULL,
    effective_date        TEXT NOT NULL,
    end_date              TEXT
);
CREATE INDEX IF NOT EXISTS search_spatial_feature_idx
    ON search_spatial(submission_feature_id, feature_property_id)
    WHERE end_date IS NULL;

CREATE TABLE IF NOT EXISTS search_taxonomy (
    search_taxonomy_id    INTEGER PRIMARY KEY,
    submission_feature_id TEXT NOT NULL REFERENCES submission_feature(submission_feature_id),
    feature_property_id   TEXT NOT NULL REFERENCES feature_property(feature_property_id),
    value                 INTEGER NOT NULL,   -- taxon identifier
    effective_date        TEXT NOT NULL,
    end_date              TEXT
);
CREATE INDEX IF NOT EXISTS search_taxonomy_feature_idx
    ON search_taxonomy(submission_feature_id, feature_property_id)
    WHERE end_date IS NULL;

-- ── Security rules and conditions ──────────────────────────────────────────

CREATE TABLE IF NOT EXISTS security_rule (
    security_rule_id TEXT PRIMARY KEY,
    name             TEXT NOT NULL,
    description      TEXT,
    category         TEXT,
    effective_date   TEXT NOT NULL,
    end_date         TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS security_rule_name_uk
    ON security_rule(name) WHERE end_date IS NULL;

-- Comparators are a closed set per table; never free text.
CREATE TABLE IF NOT EXISTS security_string (
    security_string_id  TEXT PRIMARY KEY,
    security_rule_id    TEXT NOT NULL REFERENCES security_rule(security_rule_id),
    feature_property_id TEXT NOT NULL REFERENCES feature_property(feature_property_id),
    comparator          TEXT NOT NULL CHECK (comparator IN ('eq', 'ne', 'contains')),
    value               TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS security_number (
    security_number_id  TEXT PRIMARY KEY,
    security_rule_id    TEXT NOT NULL REFERENCES security_rule(security_rule_id),
    feature_property_id TEXT NOT NULL REFERENCES feature_property(feature_property_id),
    comparator          TEXT NOT NULL CHECK (comparator IN ('eq', 'ne', 'lt', 'lte', 'gt', 'gte')),
    value               REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS security_datetime (
    security_datetime_id TEXT PRIMARY KEY,
    security_rule_id     TEXT NOT NULL REFERENCES security_rule(security_rule_id),
    feature_property_id  TEXT NOT NULL REFERENCES feature_property(feature_property_id),
    comparator           TEXT NOT NULL CHECK (comparator IN ('eq', 'ne', 'lt', 'lte', 'gt', 'gte')),
    value                TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS security_spatial (
    security_spatial_id TEXT PRIMARY KEY,
    security_rule_id    TEXT NOT NULL REFERENCES security_rule(security_rule_id),
    feature_property_id TEXT NOT NULL REFERENCES feature_property(feature_property_id),
    comparator          TEXT NOT NULL CHECK (comparator = 'intersects'),
    value               TEXT NOT NULL,   -- GeoJSON geometry
    srid                INTEGER NOT NULL
);

-- ── Feature security ledger ────────────────────────────────────────────────

CREATE TABLE IF NOT EXISTS submission_feature_security (
    submission_feature_security_id TEXT PRIMARY KEY,
    submission_feature_id          TEXT NOT NULL REFERENCES submission_feature(submission_feature_id),
    security_rule_id               TEXT NOT NULL REFERENCES security_rule(security_rule_id),
    effective_date                 TEXT NOT NULL,
    end_date                       TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS submission_feature_security_uk
    ON submission_feature_security(submission_feature_id, security_rule_id)
    WHERE end_date IS NULL;
CREATE INDEX IF NOT EXISTS submission_feature_security_rule_idx
    ON submission_feature_security(security_rule_id)
    WHERE end_date IS NULL;

PRAGMA user_version = 1;
";
