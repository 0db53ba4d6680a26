/// Errors inside the engines, converted to [tabula_records::Error] at the trait boundary.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DbError {
    #[error("Record {0} not found")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[cfg(feature = "duckdb")]
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    #[error("Unable to render statement: {0}")]
    Template(#[from] tera::Error),
}

impl From<DbError> for tabula_records::Error {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound(id) => tabula_records::Error::NotFound(id),
            DbError::InvalidArgument(msg) => tabula_records::Error::InvalidArgument(msg),
            other => tabula_records::Error::storage(other),
        }
    }
}

pub type DbResult<T> = std::result::Result<T, DbError>;
