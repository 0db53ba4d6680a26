//! Statements whose text depends on how many rows they touch.
use std::collections::hash_map::Entry;
use std::collections::HashMap;

use itertools::Itertools;
use log::*;

use tabula_records::{Dialect, ListOpts};

use crate::schema::{LINK_COLUMNS, RECORD_COLUMNS};
use crate::{DbError, DbResult};

const INSERT_TEMPLATE: &str = r#"
INSERT INTO {{ table }}({{ columns | join(sep=", ") }}) VALUES
{%- for row in rows %}
({{ row | join(sep=", ") }}){% if not loop.last %},{% endif %}
{%- endfor %}
"#;

/// Build a multi-row insert with `rows` rows of placeholders, numbered row-major from 1.
pub(crate) fn render_insert(
    dialect: &dyn Dialect,
    table: &str,
    columns: &[&str],
    rows: usize,
) -> Result<String, tera::Error> {
    let placeholders = (0..rows)
        .map(|r| {
            (0..columns.len())
                .map(|c| dialect.placeholder(r * columns.len() + c + 1))
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();

    let mut context = tera::Context::new();
    context.insert("table", table);
    context.insert("columns", columns);
    context.insert("rows", &placeholders);

    let stmt = tera::Tera::one_off(INSERT_TEMPLATE, &context, false)?;
    debug!("Insert statement for {} rows of {}: {}", rows, table, stmt);
    Ok(stmt)
}

/// Multi-row inserts into one table, rendered once per row count.
///
/// Batches are chunked to a fixed size, so in practice this holds the full-chunk statement and one for the remainder.
pub(crate) struct InsertCache {
    table: &'static str,
    columns: &'static [&'static str],
    by_rows: HashMap<usize, String>,
}

impl InsertCache {
    pub(crate) fn new(table: &'static str, columns: &'static [&'static str]) -> Self {
        InsertCache {
            table,
            columns,
            by_rows: Default::default(),
        }
    }

    pub(crate) fn get(&mut self, dialect: &dyn Dialect, rows: usize) -> Result<&str, tera::Error> {
        let stmt = match self.by_rows.entry(rows) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => e.insert(render_insert(dialect, self.table, self.columns, rows)?),
        };
        Ok(stmt.as_str())
    }
}

/// `(p1, p2, ...)` for `count` placeholders starting at `first`.
pub(crate) fn placeholder_list(dialect: &dyn Dialect, first: usize, count: usize) -> String {
    format!(
        "({})",
        (first..first + count)
            .map(|i| dialect.placeholder(i))
            .join(", ")
    )
}

/// The select list for a set of columns.
pub(crate) fn column_list(columns: &[&str]) -> String {
    columns.iter().join(", ")
}

/// `SELECT <record columns> FROM records <tail>`.
pub(crate) fn select_records(tail: &str) -> String {
    format!("SELECT {} FROM records {}", column_list(RECORD_COLUMNS), tail)
}

pub(crate) fn select_links(tail: &str) -> String {
    format!("SELECT {} FROM record_links {}", column_list(LINK_COLUMNS), tail)
}

/// The list offset as an SQL integer.  SQLite reads a negative OFFSET as 0, so one that doesn't fit mustn't wrap.
pub(crate) fn offset_arg(opts: &ListOpts) -> DbResult<i64> {
    i64::try_from(opts.offset)
        .map_err(|_| DbError::InvalidArgument(format!("offset {} is out of range", opts.offset)))
}
