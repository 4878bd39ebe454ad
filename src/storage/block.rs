use crate::storage::buffer::{BufferPool, FileId, PageKey};
use crate::storage::disk::PageNo;
use crate::storage::error::StorageResult;
use crate::storage::page::Page;
use std::path::Path;

/// Page-level access to one backing file, routed through the shared
/// buffer pool.
///
/// Reads always reflect the pool's current version of a page, which may
/// be ahead of what is on disk; writes update only the cache (and the
/// on-disk extent), so callers needing durability must [`flush`].
///
/// [`flush`]: BlockFile::flush
pub struct BlockFile {
    pool: BufferPool,
    file_id: FileId,
}

impl BlockFile {
    /// Create (or re-initialize) the backing file. Page 0 is
    /// materialized zero-filled, reserved for metadata.
    pub fn create(pool: BufferPool, path: &Path) -> StorageResult<Self> {
        let file_id = pool.attach_create(path)?;
        Ok(Self { pool, file_id })
    }

    /// Attach to an existing backing file; fails if it is absent.
    pub fn open(pool: BufferPool, path: &Path) -> StorageResult<Self> {
        let file_id = pool.attach_open(path)?;
        Ok(Self { pool, file_id })
    }

    /// Copy page `page_no` out of the cache into `page`.
    pub fn read_page(&self, page_no: PageNo, page: &mut Page) -> StorageResult<()> {
        let guard = self.pool.fetch_page(self.key(page_no))?;
        page.data_mut().copy_from_slice(&guard[..]);
        Ok(())
    }

    /// Overwrite page `page_no` in the cache with `page`'s bytes. The
    /// on-disk extent grows immediately (zero-filled) so that
    /// [`page_count`] sees the new page, but the bytes themselves reach
    /// disk only on eviction or flush.
    ///
    /// [`page_count`]: BlockFile::page_count
    pub fn write_page(&self, page_no: PageNo, page: &Page) -> StorageResult<()> {
        self.pool.extend_to(self.file_id, page_no + 1)?;
        let mut guard = self.pool.fetch_page_write(self.key(page_no))?;
        guard.copy_from_slice(&page.data()[..]);
        Ok(())
    }

    /// On-disk extent in pages.
    pub fn page_count(&self) -> StorageResult<PageNo> {
        self.pool.num_pages(self.file_id)
    }

    /// Force every dirty cached page of this file to disk.
    pub fn flush(&self) -> StorageResult<()> {
        self.pool.flush_file(self.file_id)
    }

    fn key(&self, page_no: PageNo) -> PageKey {
        PageKey {
            file: self.file_id,
            page_no,
        }
    }
}
