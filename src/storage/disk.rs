use crate::storage::error::StorageResult;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

pub const PAGE_SIZE: usize = 4096;

/// Page number within one backing file. Page 0 is reserved for metadata.
pub type PageNo = u32;

/// Raw page-granular access to one backing file.
///
/// Sits beneath the buffer pool: once a file is attached, nothing else
/// reads or writes it directly.
pub struct DiskManager {
    file: File,
}

impl DiskManager {
    /// Create (or re-initialize) the backing file, materializing a
    /// zero-filled page 0 so extent queries are well-defined immediately.
    pub fn create(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(PAGE_SIZE as u64)?;
        Ok(Self { file })
    }

    /// Attach to an existing backing file; fails if it is absent.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self { file })
    }

    pub fn read_page(&mut self, page_no: PageNo, buf: &mut [u8; PAGE_SIZE]) -> StorageResult<()> {
        self.file.seek(SeekFrom::Start(Self::offset(page_no)))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    pub fn write_page(&mut self, page_no: PageNo, data: &[u8; PAGE_SIZE]) -> StorageResult<()> {
        let offset = Self::offset(page_no);
        if offset + PAGE_SIZE as u64 > self.file.metadata()?.len() {
            self.file.set_len(offset + PAGE_SIZE as u64)?;
        }
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        self.file.sync_all()?;
        Ok(())
    }

    /// On-disk extent in pages. Reflects what has been allocated, not
    /// what the cache holds.
    pub fn num_pages(&self) -> StorageResult<PageNo> {
        Ok((self.file.metadata()?.len() / PAGE_SIZE as u64) as PageNo)
    }

    /// Grow the file to hold at least `pages` pages, zero-filled.
    /// Never shrinks.
    pub fn extend_to(&mut self, pages: PageNo) -> StorageResult<()> {
        let want = pages as u64 * PAGE_SIZE as u64;
        if self.file.metadata()?.len() < want {
            self.file.set_len(want)?;
        }
        Ok(())
    }

    fn offset(page_no: PageNo) -> u64 {
        page_no as u64 * PAGE_SIZE as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;

    #[test]
    fn test_create_materializes_page_zero() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.tbl");

        let dm = DiskManager::create(&path)?;
        assert_eq!(dm.num_pages()?, 1);
        assert_eq!(std::fs::metadata(&path)?.len(), PAGE_SIZE as u64);

        Ok(())
    }

    #[test]
    fn test_open_nonexistent_fails() -> Result<()> {
        let dir = tempdir()?;
        assert!(DiskManager::open(&dir.path().join("missing.tbl")).is_err());
        Ok(())
    }

    #[test]
    fn test_write_and_read_page() -> Result<()> {
        let dir = tempdir()?;
        let mut dm = DiskManager::create(&dir.path().join("test.tbl"))?;

        let mut buf = [0u8; PAGE_SIZE];
        buf[0] = 42;
        buf[PAGE_SIZE - 1] = 24;
        dm.write_page(3, &buf)?;
        assert_eq!(dm.num_pages()?, 4);

        let mut read_buf = [0u8; PAGE_SIZE];
        dm.read_page(3, &mut read_buf)?;
        assert_eq!(read_buf[0], 42);
        assert_eq!(read_buf[PAGE_SIZE - 1], 24);

        // intermediate pages come back zeroed
        dm.read_page(1, &mut read_buf)?;
        assert!(read_buf.iter().all(|&b| b == 0));

        Ok(())
    }

    #[test]
    fn test_extend_to() -> Result<()> {
        let dir = tempdir()?;
        let mut dm = DiskManager::create(&dir.path().join("test.tbl"))?;

        dm.extend_to(5)?;
        assert_eq!(dm.num_pages()?, 5);

        // never shrinks
        dm.extend_to(2)?;
        assert_eq!(dm.num_pages()?, 5);

        Ok(())
    }

    #[test]
    fn test_persistence_across_reopen() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.tbl");

        {
            let mut dm = DiskManager::create(&path)?;
            let buf = [99u8; PAGE_SIZE];
            dm.write_page(0, &buf)?;
        }

        {
            let mut dm = DiskManager::open(&path)?;
            let mut buf = [0u8; PAGE_SIZE];
            dm.read_page(0, &mut buf)?;
            assert_eq!(buf[0], 99);
        }

        Ok(())
    }
}
