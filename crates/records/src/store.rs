//! The contract every storage engine implements.
use std::collections::HashMap;

use serde_json::Value;
use time::OffsetDateTime;

use crate::{
    CellsWrite, Error, Field, Filter, FilterLogic, NewLink, NewRecord, Record, RecordLink, Result,
    SortSpec,
};

pub const DEFAULT_LIST_LIMIT: usize = 100;

/// Options for listing the records of a table.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ListOpts {
    /// The view the caller is rendering, if any.  Informational: the caller resolves the view's saved filters and
    /// sorts into the fields below.
    pub view_id: Option<String>,
    pub filters: Vec<Filter>,
    pub filter_logic: FilterLogic,
    pub sorts: Vec<SortSpec>,
    pub search: String,
    /// Only return these cells.  Empty means all of them.
    pub fields: Vec<String>,
    pub offset: usize,
    /// Zero means [DEFAULT_LIST_LIMIT].
    pub limit: usize,
}

impl ListOpts {
    pub fn effective_limit(&self) -> usize {
        if self.limit == 0 {
            DEFAULT_LIST_LIMIT
        } else {
            self.limit
        }
    }
}

/// One page of a listing.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RecordList {
    pub records: Vec<Record>,
    pub offset: usize,
    /// Matching records across all pages.
    pub total: usize,
}

impl RecordList {
    pub fn has_more(&self) -> bool {
        self.offset + self.records.len() < self.total
    }

    /// Cursors are offsets rendered as strings.
    pub fn next_cursor(&self) -> Option<String> {
        if self.has_more() {
            Some((self.offset + self.records.len()).to_string())
        } else {
            None
        }
    }
}

/// Parse a cursor from [RecordList::next_cursor].  No cursor is the first page.
pub fn parse_cursor(cursor: Option<&str>) -> Result<usize> {
    match cursor.map(str::trim) {
        None | Some("") => Ok(0),
        Some(c) => c
            .parse::<usize>()
            .map_err(|_| Error::InvalidArgument(format!("invalid cursor {:?}", c))),
    }
}

/// Persistence of records and the links between them.
///
/// Implementations own positions: `create` and `create_batch` assign `max(position in table) + 1` onwards.  They also
/// own cascading: deleting a record deletes the comments, attachments, and links which reference it.
///
/// Reads never cache; every call goes to the engine.
pub trait RecordStore: Send + Sync {
    fn create(&self, record: NewRecord) -> Result<Record>;

    /// Positions are contiguous across the batch and output order matches input order.
    fn create_batch(&self, records: Vec<NewRecord>) -> Result<Vec<Record>>;

    fn get_by_id(&self, id: &str) -> Result<Record>;

    /// Missing ids are absent from the result rather than an error.
    fn get_by_ids(&self, ids: &[String]) -> Result<HashMap<String, Record>>;

    /// Replace a record's cells.
    fn update(&self, write: CellsWrite) -> Result<Record>;

    /// Replace the cells of many records at once.  Fails with [Error::NotFound] without writing anything if any record
    /// is missing.  Output order matches input order.
    fn update_batch(&self, writes: Vec<CellsWrite>) -> Result<Vec<Record>>;

    fn delete(&self, id: &str) -> Result<()>;

    /// Ids which don't exist are ignored.
    fn delete_batch(&self, ids: &[String]) -> Result<()>;

    /// List a table.  `fields` is the table's field list, used to compile filters, sorts, and search.
    fn list(&self, table_id: &str, fields: &[Field], opts: &ListOpts) -> Result<RecordList>;

    fn update_cell(
        &self,
        id: &str,
        field_id: &str,
        value: &Value,
        editor: &str,
        at: OffsetDateTime,
    ) -> Result<()>;

    fn clear_cell(&self, id: &str, field_id: &str, editor: &str, at: OffsetDateTime) -> Result<()>;

    /// Both ends must exist.  The link goes after any existing links of the same source and field.
    fn create_link(&self, link: NewLink) -> Result<RecordLink>;

    fn delete_link(
        &self,
        source_record_id: &str,
        source_field_id: &str,
        target_record_id: &str,
    ) -> Result<()>;

    /// Links out of a record, optionally restricted to one field, ordered by field and position.
    fn list_links_by_source(
        &self,
        source_record_id: &str,
        source_field_id: Option<&str>,
    ) -> Result<Vec<RecordLink>>;

    /// Links into a record, oldest first.
    fn list_links_by_target(&self, target_record_id: &str) -> Result<Vec<RecordLink>>;
}
