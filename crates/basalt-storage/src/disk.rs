//! Disk manager for block-level file I/O.

use basalt_buffer::BlockStore;
use basalt_common::config::StorageConfig;
use basalt_common::page::{PageId, DEFAULT_PAGE_SIZE};
use basalt_common::{BasaltError, Result};
use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Configuration for the disk manager.
#[derive(Debug, Clone)]
pub struct DiskManagerConfig {
    /// Base directory for data files.
    pub data_dir: PathBuf,
    /// Size of every block in bytes.
    pub page_size: usize,
    /// Enable fsync after writes.
    pub fsync_enabled: bool,
}

impl Default for DiskManagerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            page_size: DEFAULT_PAGE_SIZE,
            fsync_enabled: true,
        }
    }
}

impl From<&StorageConfig> for DiskManagerConfig {
    fn from(config: &StorageConfig) -> Self {
        Self {
            data_dir: config.data_dir.clone(),
            page_size: config.page_size,
            fsync_enabled: config.fsync_enabled,
        }
    }
}

/// Reads and writes fixed-size blocks of data files.
///
/// Each file_id maps to a separate file `{file_id:08}.dat` under the data
/// directory. Block `n` lives at byte offset `n * page_size`.
pub struct DiskManager {
    config: DiskManagerConfig,
    files: Mutex<HashMap<u32, FileHandle>>,
}

struct FileHandle {
    file: File,
    num_blocks: u32,
}

impl DiskManager {
    /// Creates a new disk manager, creating the data directory if needed.
    pub fn new(config: DiskManagerConfig) -> Result<Self> {
        if config.page_size == 0 {
            return Err(BasaltError::InvalidParameter {
                name: "page_size".to_string(),
                value: "0".to_string(),
            });
        }
        std::fs::create_dir_all(&config.data_dir)?;

        Ok(Self {
            config,
            files: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    fn file_path(&self, file_id: u32) -> PathBuf {
        self.config.data_dir.join(format!("{:08}.dat", file_id))
    }

    /// Runs `f` against the open handle of a file, opening it on first use.
    fn with_file<T>(&self, file_id: u32, f: impl FnOnce(&mut FileHandle) -> Result<T>) -> Result<T> {
        let mut files = self.files.lock();

        if !files.contains_key(&file_id) {
            let path = self.file_path(file_id);
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)?;

            let file_size = file.metadata()?.len();
            let num_blocks = (file_size / self.config.page_size as u64) as u32;
            debug!("Opened {} with {} blocks", path.display(), num_blocks);
            files.insert(file_id, FileHandle { file, num_blocks });
        }

        let handle = files
            .get_mut(&file_id)
            .ok_or_else(|| BasaltError::IoError(format!("file {} not open", file_id)))?;
        f(handle)
    }

    fn offset(&self, block: u32) -> u64 {
        block as u64 * self.config.page_size as u64
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len != self.config.page_size {
            return Err(BasaltError::PageSizeMismatch {
                expected: self.config.page_size,
                actual: len,
            });
        }
        Ok(())
    }

    fn sync(&self, handle: &FileHandle) -> Result<()> {
        if self.config.fsync_enabled {
            handle.file.sync_all()?;
        }
        Ok(())
    }

    /// Closes a specific file.
    pub fn close_file(&self, file_id: u32) -> Result<()> {
        let mut files = self.files.lock();
        if let Some(handle) = files.remove(&file_id) {
            handle.file.sync_all()?;
        }
        Ok(())
    }

    /// Closes all open files.
    pub fn close_all(&self) -> Result<()> {
        let mut files = self.files.lock();
        for (_, handle) in files.drain() {
            handle.file.sync_all()?;
        }
        Ok(())
    }

    /// Deletes a data file.
    pub fn delete_file(&self, file_id: u32) -> Result<()> {
        self.close_file(file_id)?;
        let path = self.file_path(file_id);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

impl BlockStore for DiskManager {
    fn page_size(&self) -> usize {
        self.config.page_size
    }

    fn read_block(&self, page_id: PageId, buf: &mut [u8]) -> Result<()> {
        self.check_len(buf.len())?;
        let offset = self.offset(page_id.page_num);
        self.with_file(page_id.file_id, |handle| {
            if page_id.page_num >= handle.num_blocks {
                return Err(BasaltError::IoError(format!(
                    "block {} does not exist in file {}",
                    page_id.page_num, page_id.file_id
                )));
            }
            handle.file.seek(SeekFrom::Start(offset))?;
            handle.file.read_exact(buf)?;
            Ok(())
        })
    }

    fn write_block(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        self.check_len(data.len())?;
        let offset = self.offset(page_id.page_num);
        self.with_file(page_id.file_id, |handle| {
            if page_id.page_num >= handle.num_blocks {
                return Err(BasaltError::IoError(format!(
                    "block {} does not exist in file {}",
                    page_id.page_num, page_id.file_id
                )));
            }
            handle.file.seek(SeekFrom::Start(offset))?;
            handle.file.write_all(data)?;
            self.sync(handle)
        })
    }

    fn block_count(&self, file_id: u32) -> Result<u32> {
        self.with_file(file_id, |handle| Ok(handle.num_blocks))
    }

    fn append_block(&self, file_id: u32) -> Result<u32> {
        let zeros = vec![0u8; self.config.page_size];
        self.with_file(file_id, |handle| {
            let block = handle.num_blocks;
            handle.file.seek(SeekFrom::Start(self.offset(block)))?;
            handle.file.write_all(&zeros)?;
            self.sync(handle)?;
            handle.num_blocks = block + 1;
            Ok(block)
        })
    }

    fn set_block_count(&self, file_id: u32, count: u32) -> Result<()> {
        self.with_file(file_id, |handle| {
            handle.file.set_len(self.offset(count))?;
            self.sync(handle)?;
            debug!(
                "Resized file {} from {} to {} blocks",
                file_id, handle.num_blocks, count
            );
            handle.num_blocks = count;
            Ok(())
        })
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        if let Err(e) = self.close_all() {
            warn!("Failed to close data files: {}", e);
        }
    }
}
