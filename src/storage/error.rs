//! Storage layer error types.

use thiserror::Error;

use crate::storage::buffer::FileId;

/// Errors that can occur in the storage layer.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("page is full: requires {required} bytes but only {available} available")]
    PageFull { required: usize, available: usize },

    #[error("record of {0} bytes cannot fit in a single page")]
    RecordTooLarge(usize),

    #[error("buffer pool is full: no unpinned frame to evict")]
    BufferPoolFull,

    #[error("file {0:?} is not attached to the buffer pool")]
    FileNotAttached(FileId),

    #[error("file is already attached to the buffer pool: {0}")]
    FileAlreadyAttached(String),

    #[error("table already exists: {0}")]
    TableExists(String),

    #[error("schema header of {0} bytes does not fit in page 0")]
    SchemaTooLarge(usize),

    #[error("table schema needs at least one column")]
    EmptySchema,

    #[error("rows must have at least one column")]
    EmptyRow,

    #[error("schema header on page 0 is missing or corrupt")]
    CorruptHeader,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
