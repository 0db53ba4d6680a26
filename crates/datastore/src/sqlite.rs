//! The SQLite engine.
use std::collections::HashMap;

use itertools::Itertools;
use log::*;
use parking_lot::Mutex;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params, params_from_iter, OptionalExtension};
use serde_json::Value;
use time::OffsetDateTime;

use tabula_records::query::{self, is_addressable, json_path, Params};
use tabula_records::{
    decode_cells, encode_cells, from_unix_millis, to_unix_millis, CellsWrite, Dialect, Error,
    Field, ListOpts, NewLink, NewRecord, Record, RecordLink, RecordList, RecordStore, Result,
    SqlArg,
};

use crate::schema::{DEPENDENT_TABLES, LINK_COLUMNS, RECORDS, RECORD_COLUMNS};
use crate::statements::{
    column_list, offset_arg, placeholder_list, select_links, select_records, InsertCache,
};
use crate::{DbError, DbResult, StoreConfig};

/// The cells column, or an empty object if the column doesn't hold valid JSON.  SQLite's JSON functions raise an
/// error on malformed input, and one bad row mustn't fail every query which touches the table.
const CELLS_DOC: &str = "(CASE WHEN json_valid(cells) THEN cells ELSE '{}' END)";

/// Parses text with [query::parse_number].  SQLite's own `CAST` reads leading digits and ignores the rest.
const NUMBER_FN: &str = "tabula_number";

/// Unicode lower-casing.  SQLite's built-in `LOWER` only folds ASCII.
const LOWER_FN: &str = "tabula_lower";

/// Register the functions [SqliteDialect] relies on.  Must run on every connection before it is queried.
pub(crate) fn register_functions(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;

    conn.create_scalar_function(NUMBER_FN, 1, flags, |ctx| {
        Ok(match ctx.get_raw(0) {
            ValueRef::Integer(i) => Some(i as f64),
            ValueRef::Real(f) => Some(f),
            ValueRef::Text(t) => std::str::from_utf8(t).ok().and_then(query::parse_number),
            _ => None,
        })
    })?;

    conn.create_scalar_function(LOWER_FN, 1, flags, |ctx| {
        Ok(match ctx.get_raw(0) {
            ValueRef::Text(t) => Some(String::from_utf8_lossy(t).to_lowercase()),
            ValueRef::Integer(i) => Some(i.to_string()),
            ValueRef::Real(f) => Some(f.to_string()),
            _ => None,
        })
    })?;

    Ok(())
}

/// Addresses cells with SQLite's JSON1 functions.
#[derive(Copy, Clone, Debug, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn placeholder(&self, index: usize) -> String {
        format!("?{}", index)
    }

    fn cell_text(&self, path: &str) -> String {
        // json_extract hands booleans back as 1 and 0.
        format!(
            "(CASE json_type({doc}, {p}) \
             WHEN 'true' THEN 'true' \
             WHEN 'false' THEN 'false' \
             ELSE CAST(json_extract({doc}, {p}) AS TEXT) END)",
            doc = CELLS_DOC,
            p = path
        )
    }

    fn cell_number(&self, path: &str) -> String {
        let value = format!("json_extract({}, {})", CELLS_DOC, path);
        // Numeric strings count, since imports sometimes store numbers that way.
        format!(
            "(CASE json_type({doc}, {path}) \
             WHEN 'integer' THEN {v} \
             WHEN 'real' THEN {v} \
             WHEN 'text' THEN {num}({v}) \
             END)",
            doc = CELLS_DOC,
            path = path,
            v = value,
            num = NUMBER_FN
        )
    }

    fn lower(&self, expr: &str) -> String {
        format!("{}({})", LOWER_FN, expr)
    }

    fn cell_bool(&self, path: &str) -> String {
        format!(
            "(CASE json_type({}, {}) WHEN 'true' THEN 1 WHEN 'false' THEN 0 END)",
            CELLS_DOC, path
        )
    }
}

fn to_sql_value(arg: &SqlArg) -> SqlValue {
    match arg {
        SqlArg::Null => SqlValue::Null,
        SqlArg::Int(i) => SqlValue::Integer(*i),
        SqlArg::Real(f) => SqlValue::Real(*f),
        SqlArg::Text(s) => SqlValue::Text(s.clone()),
    }
}

fn record_from_row(row: &rusqlite::Row) -> rusqlite::Result<Record> {
    let cells = match row.get_ref(2)? {
        ValueRef::Text(raw) => decode_cells(&String::from_utf8_lossy(raw)),
        ValueRef::Null => Default::default(),
        _ => {
            warn!(
                "Cells of record {} are not text; treating as empty",
                row.get::<_, String>(0).unwrap_or_default()
            );
            Default::default()
        }
    };

    Ok(Record {
        id: row.get(0)?,
        table_id: row.get(1)?,
        cells,
        position: row.get(3)?,
        created_by: row.get(4)?,
        created_at: from_unix_millis(row.get(5)?),
        updated_by: row.get(6)?,
        updated_at: from_unix_millis(row.get(7)?),
    })
}

fn link_from_row(row: &rusqlite::Row) -> rusqlite::Result<RecordLink> {
    Ok(RecordLink {
        id: row.get(0)?,
        source_record_id: row.get(1)?,
        source_field_id: row.get(2)?,
        target_record_id: row.get(3)?,
        position: row.get(4)?,
        created_at: from_unix_millis(row.get(5)?),
    })
}

/// The position after the last record of a table.
fn next_position(conn: &rusqlite::Connection, table_id: &str) -> DbResult<i64> {
    Ok(conn
        .prepare_cached("SELECT COALESCE(MAX(position), 0) + 1 FROM records WHERE table_id = ?1")?
        .query_row(params![table_id], |r| r.get(0))?)
}

fn insert_records(
    conn: &rusqlite::Connection,
    inserts: &mut InsertCache,
    records: &[Record],
) -> DbResult<()> {
    let sql = inserts.get(&SqliteDialect, records.len())?;
    let mut args: Vec<SqlValue> = Vec::with_capacity(records.len() * RECORD_COLUMNS.len());
    for r in records.iter() {
        args.extend([
            SqlValue::Text(r.id.clone()),
            SqlValue::Text(r.table_id.clone()),
            SqlValue::Text(encode_cells(&r.cells)),
            SqlValue::Integer(r.position),
            SqlValue::Text(r.created_by.clone()),
            SqlValue::Integer(to_unix_millis(r.created_at)),
            SqlValue::Text(r.updated_by.clone()),
            SqlValue::Integer(to_unix_millis(r.updated_at)),
        ]);
    }

    conn.prepare_cached(sql)?
        .execute(params_from_iter(args.iter()))?;
    Ok(())
}

fn fetch_one(conn: &rusqlite::Connection, id: &str) -> DbResult<Record> {
    conn.prepare_cached(&select_records("WHERE id = ?1"))?
        .query_row(params![id], record_from_row)
        .optional()?
        .ok_or_else(|| DbError::NotFound(id.to_string()))
}

fn fetch_many(
    conn: &rusqlite::Connection,
    ids: &[&str],
    batch_size: usize,
) -> DbResult<HashMap<String, Record>> {
    let mut ret = HashMap::with_capacity(ids.len());
    for chunk in ids.chunks(batch_size) {
        let sql = select_records(&format!(
            "WHERE id IN {}",
            placeholder_list(&SqliteDialect, 1, chunk.len())
        ));
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params_from_iter(chunk.iter()), record_from_row)?;
        for r in rows {
            let r = r?;
            ret.insert(r.id.clone(), r);
        }
    }

    Ok(ret)
}

fn record_exists(conn: &rusqlite::Connection, id: &str) -> DbResult<bool> {
    Ok(conn
        .prepare_cached("SELECT 1 FROM records WHERE id = ?1")?
        .exists(params![id])?)
}

fn write_cells(conn: &rusqlite::Connection, write: &CellsWrite) -> DbResult<()> {
    let changed = conn
        .prepare_cached(
            "UPDATE records SET cells = ?1, updated_by = ?2, updated_at = ?3 WHERE id = ?4",
        )?
        .execute(params![
            encode_cells(&write.cells),
            write.updated_by,
            to_unix_millis(write.updated_at),
            write.id,
        ])?;
    if changed == 0 {
        return Err(DbError::NotFound(write.id.clone()));
    }

    Ok(())
}

/// Delete records along with everything that hangs off them.  Returns how many records were deleted.
fn delete_records(conn: &rusqlite::Connection, ids: &[&str]) -> DbResult<usize> {
    let list = placeholder_list(&SqliteDialect, 1, ids.len());

    for table in DEPENDENT_TABLES.iter() {
        let removed = conn.execute(
            &format!("DELETE FROM {} WHERE record_id IN {}", table, list),
            params_from_iter(ids.iter()),
        )?;
        if removed > 0 {
            debug!("Deleted {} rows of {}", removed, table);
        }
    }

    conn.execute(
        &format!(
            "DELETE FROM record_links WHERE source_record_id IN {0} OR target_record_id IN {0}",
            list
        ),
        params_from_iter(ids.iter()),
    )?;

    Ok(conn.execute(
        &format!("DELETE FROM {} WHERE id IN {}", RECORDS, list),
        params_from_iter(ids.iter()),
    )?)
}

struct State {
    conn: rusqlite::Connection,
    inserts: InsertCache,
}

/// A [RecordStore] over one SQLite connection.
///
/// SQLite serializes writers anyway, so the connection sits behind a mutex and every operation is one transaction.
pub struct SqliteStore {
    state: Mutex<State>,
    batch_size: usize,
}

impl SqliteStore {
    pub fn open(config: &StoreConfig) -> anyhow::Result<Self> {
        let conn = crate::database::open_connection(config)?;
        Ok(SqliteStore {
            state: Mutex::new(State {
                conn,
                inserts: InsertCache::new(RECORDS, RECORD_COLUMNS),
            }),
            batch_size: config.effective_batch_size(),
        })
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        SqliteStore::open(&StoreConfig::in_memory())
    }

    /// Run a closure against the underlying connection.
    ///
    /// This is for tooling and tests which need to see the tables directly.
    pub fn with_connection<T>(&self, f: impl FnOnce(&rusqlite::Connection) -> T) -> T {
        f(&self.state.lock().conn)
    }

    /// Run `f` in a transaction, committing if it succeeds.
    fn transact<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction, &mut InsertCache) -> DbResult<T>,
    ) -> Result<T> {
        let mut state = self.state.lock();
        let State { conn, inserts } = &mut *state;
        let tx = conn.transaction().map_err(DbError::from)?;
        let ret = f(&tx, inserts)?;
        tx.commit().map_err(DbError::from)?;
        Ok(ret)
    }

    fn list_inner(
        &self,
        tx: &rusqlite::Connection,
        table_id: &str,
        fields: &[Field],
        opts: &ListOpts,
    ) -> DbResult<RecordList> {
        let dialect = SqliteDialect;
        let mut params = Params::new(&dialect);
        let table = params.push(table_id);
        let where_sql = match query::compile_where(
            &mut params,
            fields,
            &opts.filters,
            opts.filter_logic,
            &opts.search,
        ) {
            Some(w) => format!("table_id = {} AND ({})", table, w),
            None => format!("table_id = {}", table),
        };
        // The count binds only the arguments of the where clause.
        let where_args = params.len();
        let order_sql = query::compile_order(&mut params, fields, &opts.sorts);
        let limit = params.push(opts.effective_limit() as i64);
        let offset = params.push(offset_arg(opts)?);
        let args = params.args().iter().map(to_sql_value).collect::<Vec<_>>();

        let count_sql = format!("SELECT COUNT(*) FROM records WHERE {}", where_sql);
        let list_sql = select_records(&format!(
            "WHERE {} ORDER BY {} LIMIT {} OFFSET {}",
            where_sql, order_sql, limit, offset
        ));
        debug!("Listing {}: {}", table_id, list_sql);

        let total: i64 = tx.query_row(
            &count_sql,
            params_from_iter(args[..where_args].iter()),
            |r| r.get(0),
        )?;
        let mut stmt = tx.prepare(&list_sql)?;
        let records = stmt
            .query_map(params_from_iter(args.iter()), record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(RecordList {
            records,
            offset: opts.offset,
            total: total as usize,
        })
    }
}

fn check_addressable(field_id: &str) -> DbResult<()> {
    if is_addressable(field_id) {
        Ok(())
    } else {
        Err(DbError::InvalidArgument(format!(
            "field id {:?} can't be used as a cell key",
            field_id
        )))
    }
}

impl RecordStore for SqliteStore {
    fn create(&self, record: NewRecord) -> Result<Record> {
        self.create_batch(vec![record])?
            .pop()
            .ok_or_else(|| Error::storage("insert produced no record"))
    }

    fn create_batch(&self, records: Vec<NewRecord>) -> Result<Vec<Record>> {
        if records.is_empty() {
            return Ok(vec![]);
        }

        let batch_size = self.batch_size;
        self.transact(|tx, inserts| {
            // A batch may span tables, and positions are per table.
            let mut next: HashMap<String, i64> = HashMap::new();
            let mut created = Vec::with_capacity(records.len());
            for r in records {
                let position = match next.get_mut(&r.table_id) {
                    Some(p) => {
                        *p += 1;
                        *p
                    }
                    None => {
                        let p = next_position(tx, &r.table_id)?;
                        next.insert(r.table_id.clone(), p);
                        p
                    }
                };
                created.push(r.into_record(position));
            }

            for chunk in created.chunks(batch_size) {
                insert_records(tx, inserts, chunk)?;
            }

            debug!(
                "Created {} records in {}",
                created.len(),
                next.keys().join(", ")
            );
            Ok(created)
        })
    }

    fn get_by_id(&self, id: &str) -> Result<Record> {
        self.transact(|tx, _| fetch_one(tx, id))
    }

    fn get_by_ids(&self, ids: &[String]) -> Result<HashMap<String, Record>> {
        let ids = ids.iter().map(String::as_str).unique().collect::<Vec<_>>();
        self.transact(|tx, _| fetch_many(tx, &ids, self.batch_size))
    }

    fn update(&self, write: CellsWrite) -> Result<Record> {
        self.transact(|tx, _| {
            write_cells(tx, &write)?;
            fetch_one(tx, &write.id)
        })
    }

    fn update_batch(&self, writes: Vec<CellsWrite>) -> Result<Vec<Record>> {
        if writes.is_empty() {
            return Ok(vec![]);
        }

        self.transact(|tx, _| {
            for w in writes.iter() {
                write_cells(tx, w)?;
            }

            let ids = writes.iter().map(|w| w.id.as_str()).unique().collect::<Vec<_>>();
            let found = fetch_many(tx, &ids, self.batch_size)?;
            writes
                .iter()
                .map(|w| {
                    found
                        .get(&w.id)
                        .cloned()
                        .ok_or_else(|| DbError::NotFound(w.id.clone()))
                })
                .collect()
        })
    }

    fn delete(&self, id: &str) -> Result<()> {
        self.transact(|tx, _| {
            if delete_records(tx, &[id])? == 0 {
                return Err(DbError::NotFound(id.to_string()));
            }
            Ok(())
        })
    }

    fn delete_batch(&self, ids: &[String]) -> Result<()> {
        let ids = ids.iter().map(String::as_str).unique().collect::<Vec<_>>();
        if ids.is_empty() {
            return Ok(());
        }

        self.transact(|tx, _| {
            let mut deleted = 0;
            for chunk in ids.chunks(self.batch_size) {
                deleted += delete_records(tx, chunk)?;
            }
            debug!("Deleted {} of {} requested records", deleted, ids.len());
            Ok(())
        })
    }

    fn list(&self, table_id: &str, fields: &[Field], opts: &ListOpts) -> Result<RecordList> {
        // One transaction so that the count and the page agree.
        self.transact(|tx, _| self.list_inner(tx, table_id, fields, opts))
    }

    fn update_cell(
        &self,
        id: &str,
        field_id: &str,
        value: &Value,
        editor: &str,
        at: OffsetDateTime,
    ) -> Result<()> {
        if value.is_null() {
            return self.clear_cell(id, field_id, editor, at);
        }

        check_addressable(field_id)?;
        let sql = format!(
            "UPDATE records SET cells = json_set({}, ?1, json(?2)), updated_by = ?3, updated_at = ?4 WHERE id = ?5",
            CELLS_DOC
        );
        self.transact(|tx, _| {
            let changed = tx.execute(
                &sql,
                params![
                    json_path(field_id),
                    value.to_string(),
                    editor,
                    to_unix_millis(at),
                    id
                ],
            )?;
            if changed == 0 {
                return Err(DbError::NotFound(id.to_string()));
            }
            Ok(())
        })
    }

    fn clear_cell(&self, id: &str, field_id: &str, editor: &str, at: OffsetDateTime) -> Result<()> {
        check_addressable(field_id)?;
        let sql = format!(
            "UPDATE records SET cells = json_remove({}, ?1), updated_by = ?2, updated_at = ?3 WHERE id = ?4",
            CELLS_DOC
        );
        self.transact(|tx, _| {
            let changed = tx.execute(
                &sql,
                params![json_path(field_id), editor, to_unix_millis(at), id],
            )?;
            if changed == 0 {
                return Err(DbError::NotFound(id.to_string()));
            }
            Ok(())
        })
    }

    fn create_link(&self, link: NewLink) -> Result<RecordLink> {
        self.transact(|tx, _| {
            for id in [&link.source_record_id, &link.target_record_id] {
                if !record_exists(tx, id)? {
                    return Err(DbError::NotFound(id.clone()));
                }
            }

            let position: i64 = tx.query_row(
                "SELECT COALESCE(MAX(position), 0) + 1 FROM record_links WHERE source_record_id = ?1 AND source_field_id = ?2",
                params![link.source_record_id, link.source_field_id],
                |r| r.get(0),
            )?;
            let link = link.into_link(position);
            tx.execute(
                &format!(
                    "INSERT INTO record_links({}) VALUES {}",
                    column_list(LINK_COLUMNS),
                    placeholder_list(&SqliteDialect, 1, LINK_COLUMNS.len())
                ),
                params![
                    link.id,
                    link.source_record_id,
                    link.source_field_id,
                    link.target_record_id,
                    link.position,
                    to_unix_millis(link.created_at),
                ],
            )?;
            Ok(link)
        })
    }

    fn delete_link(
        &self,
        source_record_id: &str,
        source_field_id: &str,
        target_record_id: &str,
    ) -> Result<()> {
        self.transact(|tx, _| {
            tx.execute(
                "DELETE FROM record_links WHERE source_record_id = ?1 AND source_field_id = ?2 AND target_record_id = ?3",
                params![source_record_id, source_field_id, target_record_id],
            )?;
            Ok(())
        })
    }

    fn list_links_by_source(
        &self,
        source_record_id: &str,
        source_field_id: Option<&str>,
    ) -> Result<Vec<RecordLink>> {
        self.transact(|tx, _| {
            let links = match source_field_id {
                Some(field) => tx
                    .prepare_cached(&select_links(
                        "WHERE source_record_id = ?1 AND source_field_id = ?2 ORDER BY position, id",
                    ))?
                    .query_map(params![source_record_id, field], link_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?,
                None => tx
                    .prepare_cached(&select_links(
                        "WHERE source_record_id = ?1 ORDER BY source_field_id, position, id",
                    ))?
                    .query_map(params![source_record_id], link_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?,
            };
            Ok(links)
        })
    }

    fn list_links_by_target(&self, target_record_id: &str) -> Result<Vec<RecordLink>> {
        self.transact(|tx, _| {
            Ok(tx
                .prepare_cached(&select_links(
                    "WHERE target_record_id = ?1 ORDER BY created_at, id",
                ))?
                .query_map(params![target_record_id], link_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }
}
