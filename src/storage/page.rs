use crate::storage::disk::PAGE_SIZE;
use crate::storage::error::{StorageError, StorageResult};

// Header: record count (u16) + free-space end (u16), little-endian.
const HEADER_SIZE: usize = 4;
const RECORD_COUNT_OFFSET: usize = 0;
const FREE_END_OFFSET: usize = 2;

// Slot: record offset (u16) + record length (u16).
const SLOT_SIZE: usize = 4;

/// A fixed-size slotted page.
///
/// The slot directory grows forward from the header while record bytes
/// are packed backward from the end of the page; the gap between them is
/// the free space. Records are write-once: there is no delete, update or
/// compaction, a producer that fills a page simply starts a new one.
///
/// A `Page` is a private byte buffer with no I/O of its own; it only
/// shuttles bytes across the block-file/buffer-pool boundary. An
/// all-zero buffer (a page never written, or freshly materialized on
/// disk) decodes as a valid empty page.
pub struct Page {
    data: Box<[u8; PAGE_SIZE]>,
}

impl Page {
    pub fn new() -> Self {
        Self {
            data: Box::new([0u8; PAGE_SIZE]),
        }
    }

    /// Largest record a fresh page can hold.
    pub const fn capacity() -> usize {
        PAGE_SIZE - HEADER_SIZE - SLOT_SIZE
    }

    pub fn record_count(&self) -> u16 {
        u16::from_le_bytes([
            self.data[RECORD_COUNT_OFFSET],
            self.data[RECORD_COUNT_OFFSET + 1],
        ])
    }

    /// Start of the packed record region. Stored as 0 on an untouched
    /// page, which means the whole page is still free.
    fn free_end(&self) -> usize {
        let raw = u16::from_le_bytes([self.data[FREE_END_OFFSET], self.data[FREE_END_OFFSET + 1]]);
        if raw == 0 {
            PAGE_SIZE
        } else {
            raw as usize
        }
    }

    /// Gap between the end of the slot directory and the start of the
    /// packed records.
    pub fn free_space(&self) -> usize {
        self.free_end()
            .saturating_sub(HEADER_SIZE + self.record_count() as usize * SLOT_SIZE)
    }

    /// Append a record, returning its slot index. Fails with
    /// [`StorageError::PageFull`] when the free gap cannot hold one slot
    /// entry plus the record bytes; a failed insert leaves the page
    /// byte-for-byte unchanged.
    pub fn insert_record(&mut self, record: &[u8]) -> StorageResult<u16> {
        let required = SLOT_SIZE + record.len();
        let available = self.free_space();
        if required > available {
            return Err(StorageError::PageFull {
                required,
                available,
            });
        }

        let count = self.record_count();
        let offset = self.free_end() - record.len();
        self.data[offset..offset + record.len()].copy_from_slice(record);

        let slot = HEADER_SIZE + count as usize * SLOT_SIZE;
        self.data[slot..slot + 2].copy_from_slice(&(offset as u16).to_le_bytes());
        self.data[slot + 2..slot + 4].copy_from_slice(&(record.len() as u16).to_le_bytes());

        self.set_record_count(count + 1);
        self.set_free_end(offset as u16);

        Ok(count)
    }

    /// Visit every record in ascending slot order. Read-only; slots
    /// whose bounds fall outside the page are skipped rather than read.
    pub fn for_each_record<F>(&self, mut visit: F)
    where
        F: FnMut(&[u8]),
    {
        for idx in 0..self.record_count() {
            let slot = HEADER_SIZE + idx as usize * SLOT_SIZE;
            let offset =
                u16::from_le_bytes([self.data[slot], self.data[slot + 1]]) as usize;
            let len =
                u16::from_le_bytes([self.data[slot + 2], self.data[slot + 3]]) as usize;
            if offset + len > PAGE_SIZE {
                continue;
            }
            visit(&self.data[offset..offset + len]);
        }
    }

    /// The whole fixed-size buffer, for bulk transfer out of the cache.
    pub fn data(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    /// The whole fixed-size buffer, for bulk transfer into the cache.
    pub fn data_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        &mut self.data
    }

    fn set_record_count(&mut self, count: u16) {
        self.data[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 2]
            .copy_from_slice(&count.to_le_bytes());
    }

    fn set_free_end(&mut self, end: u16) {
        self.data[FREE_END_OFFSET..FREE_END_OFFSET + 2].copy_from_slice(&end.to_le_bytes());
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}
