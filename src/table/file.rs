use crate::storage::block::BlockFile;
use crate::storage::buffer::BufferPool;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::Page;
use crate::storage::PAGE_SIZE;
use crate::table::row::{decode_row, encode_row, Row};
use log::debug;
use parking_lot::Mutex;
use std::path::Path;

const SCHEMA_TAG: &[u8] = b"cols:";

/// Append-only row storage over one block file.
///
/// Page 0 holds the schema header (`cols:a,b,c` NUL-terminated in an
/// otherwise zero page); data pages start at 1 and are filled tail-only.
/// Rows are never updated or deleted in place and never span pages, and
/// non-tail pages are never revisited for free space.
pub struct TableFile {
    block: BlockFile,
    /// Serializes the read-last-page-maybe-extend append path, which
    /// would otherwise race between concurrent appenders.
    append_lock: Mutex<()>,
}

impl std::fmt::Debug for TableFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableFile").finish_non_exhaustive()
    }
}

impl TableFile {
    /// Create the backing file and write the schema header. The header
    /// lands in the cache like any other write: it is not durable until
    /// a flush or eviction.
    pub fn create(pool: BufferPool, path: &Path, columns: &[String]) -> StorageResult<Self> {
        if columns.is_empty() {
            return Err(StorageError::EmptySchema);
        }

        let mut header = Vec::with_capacity(SCHEMA_TAG.len() + 16 * columns.len());
        header.extend_from_slice(SCHEMA_TAG);
        header.extend_from_slice(columns.join(",").as_bytes());
        // the NUL terminator is the first of the page's remaining zeros
        if header.len() >= PAGE_SIZE {
            return Err(StorageError::SchemaTooLarge(header.len()));
        }

        let block = BlockFile::create(pool, path)?;
        let mut meta = Page::new();
        meta.data_mut()[..header.len()].copy_from_slice(&header);
        block.write_page(0, &meta)?;

        debug!("created table file {:?} with {} columns", path, columns.len());
        Ok(Self {
            block,
            append_lock: Mutex::new(()),
        })
    }

    /// Attach to an existing table file; fails if it is absent.
    pub fn open(pool: BufferPool, path: &Path) -> StorageResult<Self> {
        let block = BlockFile::open(pool, path)?;
        Ok(Self {
            block,
            append_lock: Mutex::new(()),
        })
    }

    /// Re-read page 0 and parse the column list up to the first NUL.
    pub fn column_list(&self) -> StorageResult<Vec<String>> {
        let mut meta = Page::new();
        self.block.read_page(0, &mut meta)?;

        let raw = &meta.data()[..];
        if !raw.starts_with(SCHEMA_TAG) {
            return Err(StorageError::CorruptHeader);
        }
        let rest = &raw[SCHEMA_TAG.len()..];
        let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
        let list = std::str::from_utf8(&rest[..end]).map_err(|_| StorageError::CorruptHeader)?;

        Ok(list.split(',').map(str::to_owned).collect())
    }

    /// Append one row to the tail page, allocating a fresh page when the
    /// tail is full (the full page is left untouched). Zero-column rows
    /// are rejected so that an empty decoded row always means
    /// corruption; a row too large for a fresh page is a hard error,
    /// rows never span pages.
    pub fn append_row(&self, row: &[Vec<u8>]) -> StorageResult<()> {
        if row.is_empty() {
            return Err(StorageError::EmptyRow);
        }
        let bytes = encode_row(row);
        if bytes.len() > Page::capacity() {
            return Err(StorageError::RecordTooLarge(bytes.len()));
        }

        let _guard = self.append_lock.lock();

        let last = self.block.page_count()?.saturating_sub(1);
        if last == 0 {
            // only the metadata page exists; start the first data page
            let mut fresh = Page::new();
            fresh.insert_record(&bytes)?;
            return self.block.write_page(1, &fresh);
        }

        let mut page = Page::new();
        self.block.read_page(last, &mut page)?;
        match page.insert_record(&bytes) {
            Ok(_) => self.block.write_page(last, &page),
            Err(StorageError::PageFull { .. }) => {
                debug!("page {} full, spilling row to page {}", last, last + 1);
                let mut fresh = Page::new();
                fresh.insert_record(&bytes)?;
                self.block.write_page(last + 1, &fresh)
            }
            Err(e) => Err(e),
        }
    }

    /// Load every row, scanning data pages ascending and records within
    /// each page in slot order. That (page, slot) order is the only
    /// access path, and it is exactly append order.
    pub fn load_all_rows(&self) -> StorageResult<Vec<Row>> {
        let mut rows = Vec::new();
        let mut page = Page::new();
        for page_no in 1..self.block.page_count()? {
            self.block.read_page(page_no, &mut page)?;
            page.for_each_record(|record| rows.push(decode_row(record)));
        }
        Ok(rows)
    }

    /// Force every dirty cached page of this table to disk. The only
    /// durability point besides eviction.
    pub fn flush(&self) -> StorageResult<()> {
        self.block.flush()
    }
}
