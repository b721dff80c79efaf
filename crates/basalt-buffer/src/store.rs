//! Block storage seam consumed by the buffer manager.

use basalt_common::page::PageId;
use basalt_common::{BasaltError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Fixed-size block storage addressed by (file id, block number).
///
/// Every block of every file has the same size, `page_size()`.
pub trait BlockStore: Send + Sync {
    /// Size in bytes of every block.
    fn page_size(&self) -> usize;

    /// Reads a block into `buf`, which must be `page_size()` bytes.
    fn read_block(&self, page_id: PageId, buf: &mut [u8]) -> Result<()>;

    /// Writes `data` (`page_size()` bytes) to an existing block.
    fn write_block(&self, page_id: PageId, data: &[u8]) -> Result<()>;

    /// Number of blocks in a file. A file never written has zero blocks.
    fn block_count(&self, file_id: u32) -> Result<u32>;

    /// Appends a zeroed block and returns its block number.
    fn append_block(&self, file_id: u32) -> Result<u32>;

    /// Truncates or extends (with zeroed blocks) a file to `count` blocks.
    fn set_block_count(&self, file_id: u32, count: u32) -> Result<()>;
}

/// Block store kept entirely in memory.
///
/// Counts block writes so callers can observe write-back behavior.
pub struct MemoryStore {
    page_size: usize,
    files: Mutex<HashMap<u32, Vec<Box<[u8]>>>>,
    writes: AtomicU64,
}

impl MemoryStore {
    /// Creates an empty store with the given block size.
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            files: Mutex::new(HashMap::new()),
            writes: AtomicU64::new(0),
        }
    }

    /// Number of `write_block` calls so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Returns a copy of a block's stored bytes.
    pub fn block(&self, page_id: PageId) -> Option<Vec<u8>> {
        let files = self.files.lock();
        files
            .get(&page_id.file_id)
            .and_then(|blocks| blocks.get(page_id.page_num as usize))
            .map(|b| b.to_vec())
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len != self.page_size {
            return Err(BasaltError::PageSizeMismatch {
                expected: self.page_size,
                actual: len,
            });
        }
        Ok(())
    }

    fn missing(page_id: PageId) -> BasaltError {
        BasaltError::IoError(format!(
            "block {} does not exist in file {}",
            page_id.page_num, page_id.file_id
        ))
    }
}

impl BlockStore for MemoryStore {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn read_block(&self, page_id: PageId, buf: &mut [u8]) -> Result<()> {
        self.check_len(buf.len())?;
        let files = self.files.lock();
        let block = files
            .get(&page_id.file_id)
            .and_then(|blocks| blocks.get(page_id.page_num as usize))
            .ok_or_else(|| Self::missing(page_id))?;
        buf.copy_from_slice(block);
        Ok(())
    }

    fn write_block(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        self.check_len(data.len())?;
        let mut files = self.files.lock();
        let block = files
            .get_mut(&page_id.file_id)
            .and_then(|blocks| blocks.get_mut(page_id.page_num as usize))
            .ok_or_else(|| Self::missing(page_id))?;
        block.copy_from_slice(data);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn block_count(&self, file_id: u32) -> Result<u32> {
        let files = self.files.lock();
        Ok(files.get(&file_id).map_or(0, |blocks| blocks.len() as u32))
    }

    fn append_block(&self, file_id: u32) -> Result<u32> {
        let mut files = self.files.lock();
        let blocks = files.entry(file_id).or_default();
        blocks.push(vec![0u8; self.page_size].into_boxed_slice());
        Ok(blocks.len() as u32 - 1)
    }

    fn set_block_count(&self, file_id: u32, count: u32) -> Result<()> {
        let mut files = self.files.lock();
        let blocks = files.entry(file_id).or_default();
        let page_size = self.page_size;
        blocks.resize_with(count as usize, || vec![0u8; page_size].into_boxed_slice());
        Ok(())
    }
}
