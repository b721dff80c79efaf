//! Configuration structures for basalt.

use crate::error::{BasaltError, Result};
use crate::page::DEFAULT_PAGE_SIZE;
use crate::types::AttrType;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Smallest page size accepted: an entry-count header plus room for two
/// minimal entries.
pub const MIN_PAGE_SIZE: usize = 32;

/// Storage configuration for the database engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for data files.
    pub data_dir: PathBuf,
    /// Page size in bytes, shared by every block of every file.
    pub page_size: usize,
    /// Buffer pool size in number of frames.
    pub buffer_pool_pages: usize,
    /// Enable fsync for durability.
    pub fsync_enabled: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            page_size: DEFAULT_PAGE_SIZE,
            buffer_pool_pages: 64,
            fsync_enabled: true,
        }
    }
}

impl StorageConfig {
    /// Checks the configuration for values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.page_size < MIN_PAGE_SIZE {
            return Err(BasaltError::ConfigError(format!(
                "page_size {} is below the minimum of {}",
                self.page_size, MIN_PAGE_SIZE
            )));
        }
        if self.buffer_pool_pages == 0 {
            return Err(BasaltError::ConfigError(
                "buffer_pool_pages must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Index implementation selected when opening an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IndexKind {
    /// Paged, sorted, sequential index.
    #[default]
    Sequential,
}

/// Access mode an index handle is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AccessMode {
    /// Page 0 is held with a shared lock.
    Read,
    /// Page 0 is held with an intent-write lock.
    #[default]
    Write,
}

/// Configuration for opening an index over one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Index implementation.
    pub kind: IndexKind,
    /// Type of the indexed attribute.
    pub key_type: AttrType,
    /// At most one tuple id per key.
    pub unique: bool,
    /// Lock mode for the root page.
    pub access: AccessMode,
}

impl IndexConfig {
    /// Creates a sequential, writable index configuration.
    pub fn new(key_type: AttrType, unique: bool) -> Self {
        Self {
            kind: IndexKind::Sequential,
            key_type,
            unique,
            access: AccessMode::Write,
        }
    }
}
