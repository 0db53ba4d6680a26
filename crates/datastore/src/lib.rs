//! Storage engines for tabula records.
//!
//! Each engine implements [tabula_records::RecordStore] against an embedded SQL database:
//!
//! - [SqliteStore], the default.  SQLite allows one writer at a time, so the store owns a single connection.  Cells
//!   live in a JSON text column and single-cell updates are done in place with `json_set`/`json_remove`.
//! - `DuckDbStore`, behind the `duckdb` feature.  DuckDB has no JSON patch function, so single-cell updates read the
//!   record, change it, and write it back.
//!
//! Both share a physical layout (see `schema`), the batch size used to chunk inserts, and the query compiler from
//! `tabula_records`; the only thing that differs in queries is the [tabula_records::Dialect].
//!
//! Deleting a record deletes its comments, attachments, and links in the same transaction.  Those tables belong to
//! other parts of the application; the store only creates them so that the cascade has something to act on.
mod config;
mod database;
#[cfg(feature = "duckdb")]
mod duck;
mod error;
mod schema;
mod sqlite;
mod statements;

pub use config::*;
#[cfg(feature = "duckdb")]
pub use duck::*;
pub use error::*;
pub use sqlite::*;
