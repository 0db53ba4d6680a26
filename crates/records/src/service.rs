//! The record service: what handlers, import/export, and dashboards call.
//!
//! This is thin on purpose.  It mints ids and timestamps, merges partial updates, and leaves everything about
//! persistence to the [RecordStore].
use std::collections::HashMap;

use log::*;
use serde_json::Value;

use crate::{
    new_id, now, parse_cursor, project_cells, CellDelta, Cells, CellsWrite, Error, Field, ListOpts,
    NewLink, NewRecord, Record, RecordLink, RecordList, RecordStore, Result,
};

/// A partial update to one record.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RecordUpdate {
    pub id: String,
    pub cells: CellDelta,
}

pub struct RecordService<S> {
    store: S,
}

impl<S: RecordStore> RecordService<S> {
    pub fn new(store: S) -> Self {
        RecordService { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn mint(&self, table_id: &str, cells: Cells, author: &str) -> NewRecord {
        NewRecord {
            id: new_id(),
            table_id: table_id.to_string(),
            cells,
            created_by: author.to_string(),
            created_at: now(),
        }
    }

    /// Create one record.  Empty cells are fine.
    pub fn create(&self, table_id: &str, cells: Cells, author: &str) -> Result<Record> {
        self.store.create(self.mint(table_id, cells, author))
    }

    /// Create many records in one go.  The output is in input order.
    pub fn create_batch(
        &self,
        table_id: &str,
        cells: Vec<Cells>,
        author: &str,
    ) -> Result<Vec<Record>> {
        if cells.is_empty() {
            return Ok(vec![]);
        }

        let records = cells
            .into_iter()
            .map(|c| self.mint(table_id, c, author))
            .collect::<Vec<_>>();
        debug!("Creating {} records in table {}", records.len(), table_id);
        self.store.create_batch(records)
    }

    pub fn get(&self, id: &str) -> Result<Record> {
        self.store.get_by_id(id)
    }

    pub fn get_many(&self, ids: &[String]) -> Result<HashMap<String, Record>> {
        self.store.get_by_ids(ids)
    }

    /// Merge a delta into a record's cells.
    pub fn update(&self, id: &str, delta: &CellDelta, editor: &str) -> Result<Record> {
        let mut cells = self.store.get_by_id(id)?.cells;
        delta.apply(&mut cells);
        self.store.update(CellsWrite {
            id: id.to_string(),
            cells,
            updated_by: editor.to_string(),
            updated_at: now(),
        })
    }

    /// Merge deltas into many records.
    ///
    /// The records are read in one round trip.  If any is missing the whole batch fails before anything is written,
    /// and the store applies the writes atomically.  Repeated ids are folded together in order; the output has one
    /// record per distinct id, in order of first appearance.
    pub fn update_batch(&self, updates: Vec<RecordUpdate>, editor: &str) -> Result<Vec<Record>> {
        if updates.is_empty() {
            return Ok(vec![]);
        }

        let mut order: Vec<String> = vec![];
        let mut deltas: HashMap<String, CellDelta> = HashMap::new();
        for u in updates.into_iter() {
            match deltas.get_mut(&u.id) {
                Some(d) => d.merge(u.cells),
                None => {
                    order.push(u.id.clone());
                    deltas.insert(u.id, u.cells);
                }
            }
        }

        let mut existing = self.store.get_by_ids(&order)?;
        if let Some(missing) = order.iter().find(|id| !existing.contains_key(*id)) {
            return Err(Error::NotFound(missing.clone()));
        }

        let at = now();
        let mut writes = Vec::with_capacity(order.len());
        for id in order.into_iter() {
            let mut cells = existing
                .remove(&id)
                .map(|r| r.cells)
                .ok_or_else(|| Error::NotFound(id.clone()))?;
            if let Some(d) = deltas.get(&id) {
                d.apply(&mut cells);
            }
            writes.push(CellsWrite {
                id,
                cells,
                updated_by: editor.to_string(),
                updated_at: at,
            });
        }

        self.store.update_batch(writes)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        self.store.delete(id)
    }

    pub fn delete_batch(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.store.delete_batch(ids)
    }

    /// Set one cell without touching the others.
    pub fn update_cell(&self, id: &str, field_id: &str, value: Value, editor: &str) -> Result<()> {
        if value.is_null() {
            return self.clear_cell(id, field_id, editor);
        }
        self.store.update_cell(id, field_id, &value, editor, now())
    }

    pub fn clear_cell(&self, id: &str, field_id: &str, editor: &str) -> Result<()> {
        self.store.clear_cell(id, field_id, editor, now())
    }

    /// List a table, trimming cells to `opts.fields` when it is non-empty.
    pub fn list(&self, table_id: &str, fields: &[Field], opts: &ListOpts) -> Result<RecordList> {
        let mut list = self.store.list(table_id, fields, opts)?;
        if !opts.fields.is_empty() {
            for r in list.records.iter_mut() {
                r.cells = project_cells(std::mem::take(&mut r.cells), &opts.fields);
            }
        }
        Ok(list)
    }

    /// [RecordService::list], but paging with the opaque cursor handlers hand out.
    pub fn list_page(
        &self,
        table_id: &str,
        fields: &[Field],
        opts: &ListOpts,
        cursor: Option<&str>,
    ) -> Result<RecordList> {
        let opts = ListOpts {
            offset: parse_cursor(cursor)?,
            ..opts.clone()
        };
        self.list(table_id, fields, &opts)
    }

    pub fn create_link(
        &self,
        source_record_id: &str,
        source_field_id: &str,
        target_record_id: &str,
    ) -> Result<RecordLink> {
        self.store.create_link(NewLink {
            id: new_id(),
            source_record_id: source_record_id.to_string(),
            source_field_id: source_field_id.to_string(),
            target_record_id: target_record_id.to_string(),
            created_at: now(),
        })
    }

    pub fn delete_link(
        &self,
        source_record_id: &str,
        source_field_id: &str,
        target_record_id: &str,
    ) -> Result<()> {
        self.store
            .delete_link(source_record_id, source_field_id, target_record_id)
    }

    pub fn links_from(
        &self,
        source_record_id: &str,
        source_field_id: Option<&str>,
    ) -> Result<Vec<RecordLink>> {
        self.store
            .list_links_by_source(source_record_id, source_field_id)
    }

    pub fn links_to(&self, target_record_id: &str) -> Result<Vec<RecordLink>> {
        self.store.list_links_by_target(target_record_id)
    }
}
