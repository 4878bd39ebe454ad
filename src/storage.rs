//! Storage layer implementation for pagestore.
//!
//! This module provides persistent data storage using a page-based
//! architecture. Key components:
//!
//! - **Page**: Fixed-size slotted blocks of data, the basic unit of I/O
//! - **DiskManager**: Handles reading/writing pages of one backing file
//! - **BufferPool**: Shared in-memory cache of pages with LRU eviction,
//!   keyed by (file, page number)
//! - **BlockFile**: Per-file page access routed through the buffer pool
//!
//! Durability is deliberately lazy: a page mutation is visible to every
//! cache reader immediately but reaches disk only when its frame is
//! evicted or explicitly flushed.

pub mod block;
pub mod buffer;
pub mod disk;
pub mod error;
pub mod page;

pub use block::BlockFile;
pub use buffer::{BufferPool, FileId, PageKey, PageReadGuard, PageWriteGuard};
pub use disk::{DiskManager, PageNo, PAGE_SIZE};
pub use error::{StorageError, StorageResult};
pub use page::Page;
