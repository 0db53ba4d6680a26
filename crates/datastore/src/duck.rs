//! The DuckDB engine.
//!
//! Shaped like the SQLite engine.  The differences are the dialect, and that DuckDB has no way to set or remove one key
//! of a JSON document in place: single-cell writes read the record, change the cells, and write them back.
use std::collections::HashMap;

use anyhow::Result as AnyResult;
use duckdb::types::Value as SqlValue;
use duckdb::{params, params_from_iter, OptionalExt};
use itertools::Itertools;
use log::*;
use parking_lot::Mutex;
use serde_json::Value;
use time::OffsetDateTime;

use tabula_records::query::{self, is_addressable, Params};
use tabula_records::{
    decode_cells, encode_cells, from_unix_millis, to_unix_millis, CellsWrite, Dialect, Error,
    Field, ListOpts, NewLink, NewRecord, Record, RecordLink, RecordList, RecordStore, Result,
    SqlArg,
};

use crate::schema::{
    render_migrations, DEPENDENT_TABLES, LINK_COLUMNS, MIGRATIONS_TABLE_SQL, RECORDS, RECORD_COLUMNS,
};
use crate::statements::{
    column_list, offset_arg, placeholder_list, select_links, select_records, InsertCache,
};
use crate::{DbError, DbResult, StoreConfig};

const CELLS_DOC: &str = "(CASE WHEN json_valid(cells) THEN cells ELSE '{}' END)";

/// Addresses cells with DuckDB's json extension.
#[derive(Copy, Clone, Debug, Default)]
pub struct DuckDbDialect;

impl Dialect for DuckDbDialect {
    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn cell_text(&self, path: &str) -> String {
        format!("json_extract_string({}, {})", CELLS_DOC, path)
    }

    fn cell_number(&self, path: &str) -> String {
        let cast = format!(
            "TRY_CAST(trim(json_extract_string({}, {})) AS DOUBLE)",
            CELLS_DOC, path
        );
        // TRY_CAST accepts "inf" and "nan", which aren't numbers to a filter.
        format!("(CASE WHEN isfinite({c}) THEN {c} END)", c = cast)
    }

    fn cell_bool(&self, path: &str) -> String {
        format!(
            "(CASE json_type({doc}, {p}) WHEN 'BOOLEAN' THEN \
             (CASE json_extract_string({doc}, {p}) WHEN 'true' THEN 1 ELSE 0 END) END)",
            doc = CELLS_DOC,
            p = path
        )
    }
}

fn to_sql_value(arg: &SqlArg) -> SqlValue {
    match arg {
        SqlArg::Null => SqlValue::Null,
        SqlArg::Int(i) => SqlValue::BigInt(*i),
        SqlArg::Real(f) => SqlValue::Double(*f),
        SqlArg::Text(s) => SqlValue::Text(s.clone()),
    }
}

fn record_from_row(row: &duckdb::Row) -> duckdb::Result<Record> {
    let cells: Option<String> = row.get(2)?;
    Ok(Record {
        id: row.get(0)?,
        table_id: row.get(1)?,
        cells: cells.as_deref().map(decode_cells).unwrap_or_default(),
        position: row.get(3)?,
        created_by: row.get(4)?,
        created_at: from_unix_millis(row.get(5)?),
        updated_by: row.get(6)?,
        updated_at: from_unix_millis(row.get(7)?),
    })
}

fn link_from_row(row: &duckdb::Row) -> duckdb::Result<RecordLink> {
    Ok(RecordLink {
        id: row.get(0)?,
        source_record_id: row.get(1)?,
        source_field_id: row.get(2)?,
        target_record_id: row.get(3)?,
        position: row.get(4)?,
        created_at: from_unix_millis(row.get(5)?),
    })
}

fn run_migrations(conn: &mut duckdb::Connection) -> AnyResult<()> {
    let transaction = conn.transaction()?;
    transaction.execute_batch(MIGRATIONS_TABLE_SQL)?;

    for (name, sql) in render_migrations()? {
        let had_migration: i64 = transaction.query_row(
            "SELECT COUNT(*) FROM migrations WHERE name = $1",
            params![name],
            |r| r.get(0),
        )?;
        if had_migration > 0 {
            continue;
        }

        let ran_at = (std::time::SystemTime::now().duration_since(std::time::SystemTime::UNIX_EPOCH)?)
            .as_secs_f64();
        let start_time = std::time::Instant::now();
        transaction.execute_batch(&sql)?;
        let duration = start_time.elapsed().as_secs_f64();
        info!("Ran migration {} in {:.3}s", name, duration);

        transaction.execute(
            "INSERT INTO migrations(name, sql, ran_at, duration) VALUES($1, $2, $3, $4)",
            params![name, sql.as_str(), ran_at, duration],
        )?;
    }

    transaction.commit()?;
    Ok(())
}

fn next_position(conn: &duckdb::Connection, table_id: &str) -> DbResult<i64> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(position), 0) + 1 FROM records WHERE table_id = $1",
        params![table_id],
        |r| r.get(0),
    )?)
}

fn insert_records(
    conn: &duckdb::Connection,
    inserts: &mut InsertCache,
    records: &[Record],
) -> DbResult<()> {
    let sql = inserts.get(&DuckDbDialect, records.len())?;
    let mut args: Vec<SqlValue> = Vec::with_capacity(records.len() * RECORD_COLUMNS.len());
    for r in records.iter() {
        args.extend([
            SqlValue::Text(r.id.clone()),
            SqlValue::Text(r.table_id.clone()),
            SqlValue::Text(encode_cells(&r.cells)),
            SqlValue::BigInt(r.position),
            SqlValue::Text(r.created_by.clone()),
            SqlValue::BigInt(to_unix_millis(r.created_at)),
            SqlValue::Text(r.updated_by.clone()),
            SqlValue::BigInt(to_unix_millis(r.updated_at)),
        ]);
    }

    conn.prepare_cached(sql)?
        .execute(params_from_iter(args.iter()))?;
    Ok(())
}

fn fetch_one(conn: &duckdb::Connection, id: &str) -> DbResult<Record> {
    conn.query_row(&select_records("WHERE id = $1"), params![id], record_from_row)
        .optional()?
        .ok_or_else(|| DbError::NotFound(id.to_string()))
}

fn fetch_many(
    conn: &duckdb::Connection,
    ids: &[&str],
    batch_size: usize,
) -> DbResult<HashMap<String, Record>> {
    let mut ret = HashMap::with_capacity(ids.len());
    for chunk in ids.chunks(batch_size) {
        let sql = select_records(&format!(
            "WHERE id IN {}",
            placeholder_list(&DuckDbDialect, 1, chunk.len())
        ));
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(chunk.iter()), record_from_row)?;
        for r in rows {
            let r = r?;
            ret.insert(r.id.clone(), r);
        }
    }

    Ok(ret)
}

fn record_exists(conn: &duckdb::Connection, id: &str) -> DbResult<bool> {
    let found: i64 = conn.query_row(
        "SELECT COUNT(*) FROM records WHERE id = $1",
        params![id],
        |r| r.get(0),
    )?;
    Ok(found > 0)
}

fn write_cells(conn: &duckdb::Connection, write: &CellsWrite) -> DbResult<()> {
    let changed = conn.execute(
        "UPDATE records SET cells = $1, updated_by = $2, updated_at = $3 WHERE id = $4",
        params![
            encode_cells(&write.cells),
            write.updated_by,
            to_unix_millis(write.updated_at),
            write.id,
        ],
    )?;
    if changed == 0 {
        return Err(DbError::NotFound(write.id.clone()));
    }

    Ok(())
}

fn delete_records(conn: &duckdb::Connection, ids: &[&str]) -> DbResult<usize> {
    let list = placeholder_list(&DuckDbDialect, 1, ids.len());

    for table in DEPENDENT_TABLES.iter() {
        conn.execute(
            &format!("DELETE FROM {} WHERE record_id IN {}", table, list),
            params_from_iter(ids.iter()),
        )?;
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

struct State {
    conn: duckdb::Connection,
    inserts: InsertCache,
}

/// A [RecordStore] over one DuckDB connection.
pub struct DuckDbStore {
    state: Mutex<State>,
    batch_size: usize,
}

impl DuckDbStore {
    pub fn open(config: &StoreConfig) -> AnyResult<Self> {
        info!("Opening DuckDB database at {}", config.describe_path());
        let mut conn = match config.path.as_ref() {
            Some(p) => duckdb::Connection::open(p)?,
            None => duckdb::Connection::open_in_memory()?,
        };
        run_migrations(&mut conn)?;

        Ok(DuckDbStore {
            state: Mutex::new(State {
                conn,
                inserts: InsertCache::new(RECORDS, RECORD_COLUMNS),
            }),
            batch_size: config.effective_batch_size(),
        })
    }

    pub fn open_in_memory() -> AnyResult<Self> {
        DuckDbStore::open(&StoreConfig::in_memory())
    }

    /// Run a closure against the underlying connection.
    pub fn with_connection<T>(&self, f: impl FnOnce(&duckdb::Connection) -> T) -> T {
        f(&self.state.lock().conn)
    }

    fn transact<T>(
        &self,
        f: impl FnOnce(&duckdb::Transaction, &mut InsertCache) -> DbResult<T>,
    ) -> Result<T> {
        let mut state = self.state.lock();
        let State { conn, inserts } = &mut *state;
        let tx = conn.transaction().map_err(DbError::from)?;
        let ret = f(&tx, inserts)?;
        tx.commit().map_err(DbError::from)?;
        Ok(ret)
    }

    /// Read a record, change its cells, and write it back.
    fn modify_cells(
        &self,
        id: &str,
        editor: &str,
        at: OffsetDateTime,
        change: impl FnOnce(&mut tabula_records::Cells),
    ) -> Result<()> {
        self.transact(|tx, _| {
            let mut record = fetch_one(tx, id)?;
            change(&mut record.cells);
            write_cells(
                tx,
                &CellsWrite {
                    id: record.id,
                    cells: record.cells,
                    updated_by: editor.to_string(),
                    updated_at: at,
                },
            )
        })
    }

    fn list_inner(
        &self,
        tx: &duckdb::Connection,
        table_id: &str,
        fields: &[Field],
        opts: &ListOpts,
    ) -> DbResult<RecordList> {
        let dialect = DuckDbDialect;
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
            .collect::<duckdb::Result<Vec<_>>>()?;

        Ok(RecordList {
            records,
            offset: opts.offset,
            total: total as usize,
        })
    }
}

impl RecordStore for DuckDbStore {
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
            for chunk in ids.chunks(self.batch_size) {
                delete_records(tx, chunk)?;
            }
            Ok(())
        })
    }

    fn list(&self, table_id: &str, fields: &[Field], opts: &ListOpts) -> Result<RecordList> {
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
        self.modify_cells(id, editor, at, |cells| {
            cells.insert(field_id.to_string(), value.clone());
        })
    }

    fn clear_cell(&self, id: &str, field_id: &str, editor: &str, at: OffsetDateTime) -> Result<()> {
        check_addressable(field_id)?;
        self.modify_cells(id, editor, at, |cells| {
            cells.remove(field_id);
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
                "SELECT COALESCE(MAX(position), 0) + 1 FROM record_links WHERE source_record_id = $1 AND source_field_id = $2",
                params![link.source_record_id, link.source_field_id],
                |r| r.get(0),
            )?;
            let link = link.into_link(position);
            tx.execute(
                &format!(
                    "INSERT INTO record_links({}) VALUES {}",
                    column_list(LINK_COLUMNS),
                    placeholder_list(&DuckDbDialect, 1, LINK_COLUMNS.len())
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
                "DELETE FROM record_links WHERE source_record_id = $1 AND source_field_id = $2 AND target_record_id = $3",
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
                    .prepare(&select_links(
                        "WHERE source_record_id = $1 AND source_field_id = $2 ORDER BY position, id",
                    ))?
                    .query_map(params![source_record_id, field], link_from_row)?
                    .collect::<duckdb::Result<Vec<_>>>()?,
                None => tx
                    .prepare(&select_links(
                        "WHERE source_record_id = $1 ORDER BY source_field_id, position, id",
                    ))?
                    .query_map(params![source_record_id], link_from_row)?
                    .collect::<duckdb::Result<Vec<_>>>()?,
            };
            Ok(links)
        })
    }

    fn list_links_by_target(&self, target_record_id: &str) -> Result<Vec<RecordLink>> {
        self.transact(|tx, _| {
            Ok(tx
                .prepare(&select_links(
                    "WHERE target_record_id = $1 ORDER BY created_at, id",
                ))?
                .query_map(params![target_record_id], link_from_row)?
                .collect::<duckdb::Result<Vec<_>>>()?)
        })
    }
}
