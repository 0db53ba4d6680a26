//! The physical layout shared by every engine.
//!
//! Migrations are tera templates: the table names are bound into the context so that a migration refers to
//! `{{ records }}` rather than spelling the name out.  The rendered SQL is plain enough to run unchanged on SQLite and
//! DuckDB.
use anyhow::Result;

pub(crate) const RECORDS: &str = "records";
pub(crate) const RECORD_LINKS: &str = "record_links";
pub(crate) const COMMENTS: &str = "comments";
pub(crate) const ATTACHMENTS: &str = "attachments";

/// Columns of the records table, in the order every select returns them.
pub(crate) const RECORD_COLUMNS: &[&str] = &[
    "id",
    "table_id",
    "cells",
    "position",
    "created_by",
    "created_at",
    "updated_by",
    "updated_at",
];

pub(crate) const LINK_COLUMNS: &[&str] = &[
    "id",
    "source_record_id",
    "source_field_id",
    "target_record_id",
    "position",
    "created_at",
];

/// Tables which hang off a record by `record_id` and go away with it.
pub(crate) const DEPENDENT_TABLES: &[&str] = &[COMMENTS, ATTACHMENTS];

pub(crate) struct Migration {
    pub name: &'static str,
    pub sql: &'static str,
}

// Timestamps are unix milliseconds.
const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "0001_records",
        sql: r#"
CREATE TABLE IF NOT EXISTS {{ records }} (
    id TEXT PRIMARY KEY,
    table_id TEXT NOT NULL,
    -- JSON object keyed by field id.
    cells TEXT NOT NULL,
    position BIGINT NOT NULL,
    created_by TEXT NOT NULL,
    created_at BIGINT NOT NULL,
    updated_by TEXT NOT NULL,
    updated_at BIGINT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_records_table_position ON {{ records }}(table_id, position);
"#,
    },
    Migration {
        name: "0002_record_links",
        sql: r#"
CREATE TABLE IF NOT EXISTS {{ record_links }} (
    id TEXT PRIMARY KEY,
    source_record_id TEXT NOT NULL,
    source_field_id TEXT NOT NULL,
    target_record_id TEXT NOT NULL,
    position BIGINT NOT NULL,
    created_at BIGINT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_record_links_edge
    ON {{ record_links }}(source_record_id, source_field_id, target_record_id);
CREATE INDEX IF NOT EXISTS idx_record_links_target ON {{ record_links }}(target_record_id);
"#,
    },
    Migration {
        name: "0003_record_dependents",
        sql: r#"
CREATE TABLE IF NOT EXISTS {{ comments }} (
    id TEXT PRIMARY KEY,
    record_id TEXT NOT NULL,
    author TEXT NOT NULL,
    body TEXT NOT NULL,
    created_at BIGINT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_comments_record ON {{ comments }}(record_id);
CREATE TABLE IF NOT EXISTS {{ attachments }} (
    id TEXT PRIMARY KEY,
    record_id TEXT NOT NULL,
    field_id TEXT NOT NULL,
    filename TEXT NOT NULL,
    size BIGINT NOT NULL,
    created_at BIGINT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_attachments_record ON {{ attachments }}(record_id);
"#,
    },
];

/// The table which records which migrations have run.
pub(crate) const MIGRATIONS_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS migrations (
    -- Name of the migration.
    name TEXT NOT NULL,
    -- The specific sql run for this migration after template rendering, which can be useful for debugging.
    sql TEXT NOT NULL,
    -- Unix timestamp as real seconds.
    ran_at DOUBLE,
    -- Duration taken as real seconds.
    duration DOUBLE NOT NULL
)"#;

/// Render every migration, returning `(name, sql)` in the order they must run.
pub(crate) fn render_migrations() -> Result<Vec<(&'static str, String)>> {
    let mut ctx = tera::Context::new();
    for table in [RECORDS, RECORD_LINKS, COMMENTS, ATTACHMENTS] {
        ctx.insert(table, table);
    }

    MIGRATIONS
        .iter()
        .map(|m| Ok((m.name, tera::Tera::one_off(m.sql, &ctx, false)?)))
        .collect()
}
