//! Row-oriented table layer built on the paged storage core.
//!
//! A table is a named, append-only collection of rows sharing one
//! column-name schema, backed by a single `<name>.tbl` file of pages.
//! Rows are lists of raw byte strings; nothing above a column-name list
//! is type-checked here.

pub mod file;
pub mod manager;
pub mod row;

pub use file::TableFile;
pub use manager::FileManager;
pub use row::Row;
