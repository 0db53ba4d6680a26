//! The record model and the storage contract for tabula tables.
//!
//! A table's rows ("records") don't have a physical schema.  Instead, every record carries a map from field id to a
//! JSON value (the "cells"), and user-defined fields are just metadata describing how to interpret those values.  This
//! crate owns:
//!
//! - The cell value model: [Record], [Cells], and [CellDelta] for partial updates.
//! - The field vocabulary used to interpret cells ([Field], [FieldType]).
//! - The query compiler, which turns filters, sorts, and a search string into a SQL fragment for a given [Dialect].
//! - The [RecordStore] trait that storage engines implement, and the [RecordService] which sits in front of it.
//!
//! Engine implementations live in the `tabula_datastore` crate; nothing here touches a database.
mod cell;
pub mod cell_text;
mod error;
mod field;
mod ids;
pub mod query;
mod record;
mod service;
mod store;

pub use cell::*;
pub use error::*;
pub use field::*;
pub use ids::*;
pub use query::{Dialect, Filter, FilterLogic, Operator, SortDirection, SortSpec, SqlArg};
pub use record::*;
pub use service::*;
pub use store::*;
