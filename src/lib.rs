//! pagestore: a minimal paged storage engine.
//!
//! Fixed-size on-disk pages are accessed exclusively through a shared
//! buffer pool, with a thin append-only table layer on top. There is no
//! query language, no transactions beyond page pinning, and no network
//! surface; a calling layer drives [`table::FileManager`] and
//! [`table::TableFile`] directly.

pub mod storage;
pub mod table;
