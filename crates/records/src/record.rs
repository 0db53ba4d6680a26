//! Records and the value types which flow between the service and the stores.
use time::OffsetDateTime;

use crate::Cells;

/// One row of a table.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Record {
    pub id: String,
    pub table_id: String,
    #[serde(default)]
    pub cells: Cells,
    /// Default display order within the table.  Not unique: concurrent creates may collide, and deletes leave gaps.
    pub position: i64,
    pub created_by: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub updated_by: String,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// A record the service has minted but which has no position yet.  The store assigns the position.
#[derive(Clone, Debug, PartialEq)]
pub struct NewRecord {
    pub id: String,
    pub table_id: String,
    pub cells: Cells,
    pub created_by: String,
    pub created_at: OffsetDateTime,
}

impl NewRecord {
    /// Turn this into a record at the given position.
    pub fn into_record(self, position: i64) -> Record {
        Record {
            id: self.id,
            table_id: self.table_id,
            cells: self.cells,
            position,
            updated_by: self.created_by.clone(),
            created_by: self.created_by,
            created_at: self.created_at,
            updated_at: self.created_at,
        }
    }
}

/// A full rewrite of one record's cells, produced after the service has merged a delta.
#[derive(Clone, Debug, PartialEq)]
pub struct CellsWrite {
    pub id: String,
    pub cells: Cells,
    pub updated_by: String,
    pub updated_at: OffsetDateTime,
}

/// A directed edge between two records, scoped to the link field which owns it.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RecordLink {
    pub id: String,
    pub source_record_id: String,
    pub source_field_id: String,
    pub target_record_id: String,
    /// Order among the links of one source record and field.
    pub position: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A link without its position.
#[derive(Clone, Debug, PartialEq)]
pub struct NewLink {
    pub id: String,
    pub source_record_id: String,
    pub source_field_id: String,
    pub target_record_id: String,
    pub created_at: OffsetDateTime,
}

impl NewLink {
    pub fn into_link(self, position: i64) -> RecordLink {
        RecordLink {
            id: self.id,
            source_record_id: self.source_record_id,
            source_field_id: self.source_field_id,
            target_record_id: self.target_record_id,
            position,
            created_at: self.created_at,
        }
    }
}

/// The current time, truncated to what the stores persist (milliseconds).
pub fn now() -> OffsetDateTime {
    from_unix_millis(to_unix_millis(OffsetDateTime::now_utc()))
}

pub fn to_unix_millis(t: OffsetDateTime) -> i64 {
    (t.unix_timestamp_nanos() / 1_000_000) as i64
}

/// Out of range values are clamped to the epoch rather than failing the read.
pub fn from_unix_millis(millis: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp_nanos(millis as i128 * 1_000_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}
