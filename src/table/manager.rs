use crate::storage::buffer::BufferPool;
use crate::storage::error::{StorageError, StorageResult};
use crate::table::file::TableFile;
use dashmap::DashMap;
use log::debug;
use std::path::PathBuf;
use std::sync::Arc;

/// Registry of open tables.
///
/// At most one [`TableFile`] instance exists per name; every opener
/// shares it through an `Arc`, so all accessors of a table go through
/// the same block file and the same buffer-pool frames.
pub struct FileManager {
    pool: BufferPool,
    base_dir: PathBuf,
    open: DashMap<String, Arc<TableFile>>,
}

impl FileManager {
    pub fn new(pool: BufferPool, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            pool,
            base_dir: base_dir.into(),
            open: DashMap::new(),
        }
    }

    /// Create and register a new table. Fails if a backing store for
    /// `name` already exists, leaving it untouched.
    pub fn create_table(&self, name: &str, columns: &[String]) -> StorageResult<Arc<TableFile>> {
        let path = self.table_path(name);
        if path.exists() {
            return Err(StorageError::TableExists(name.to_owned()));
        }

        debug!("creating table {name:?}");
        let table = Arc::new(TableFile::create(self.pool.clone(), &path, columns)?);
        self.open.insert(name.to_owned(), Arc::clone(&table));
        Ok(table)
    }

    /// Open a table by name. A table that is already open is returned
    /// as-is, never as a second independent instance; a table that was
    /// never created yields `None`.
    pub fn open_table(&self, name: &str) -> StorageResult<Option<Arc<TableFile>>> {
        if let Some(table) = self.open.get(name) {
            return Ok(Some(Arc::clone(table.value())));
        }

        let path = self.table_path(name);
        if !path.exists() {
            return Ok(None);
        }

        debug!("opening table {name:?}");
        let table = Arc::new(TableFile::open(self.pool.clone(), &path)?);
        // entry() so a racing open still resolves to one shared instance
        let table = self
            .open
            .entry(name.to_owned())
            .or_insert(table)
            .value()
            .clone();
        Ok(Some(table))
    }

    /// Force every dirty cached page of every attached file to disk.
    pub fn flush_all(&self) -> StorageResult<()> {
        self.pool.flush_all()
    }

    fn table_path(&self, name: &str) -> PathBuf {
        self.base_dir.join(format!("{name}.tbl"))
    }
}
