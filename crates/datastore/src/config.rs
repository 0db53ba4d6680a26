use std::path::PathBuf;

/// Rows per insert statement.  Eight columns a row keeps this under SQLite's historical 999 parameter limit.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// How to open a store.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// The database file.  None opens a private in-memory database.
    pub path: Option<PathBuf>,

    /// How long a connection waits on a lock held by another process.
    pub busy_timeout_ms: u32,

    /// Page cache size for engines which let us set it.
    pub cache_size_kib: u32,

    /// Rows per insert statement, and ids per `IN` list.
    pub batch_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            path: None,
            busy_timeout_ms: 1000,
            cache_size_kib: 100_000,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl StoreConfig {
    pub fn in_memory() -> Self {
        Default::default()
    }

    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        StoreConfig {
            path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// The batch size, never zero.
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.max(1)
    }

    pub(crate) fn describe_path(&self) -> String {
        self.path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| ":memory:".to_string())
    }
}
