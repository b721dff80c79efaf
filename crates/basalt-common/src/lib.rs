//! basalt common types, errors, and utilities.
//!
//! This crate provides shared definitions used by the buffer manager and the
//! storage layer.

pub mod config;
pub mod error;
pub mod page;
pub mod types;

pub use config::{AccessMode, IndexConfig, IndexKind, StorageConfig};
pub use error::{BasaltError, Result};
pub use page::{PageId, DEFAULT_PAGE_SIZE};
pub use types::{AttrType, Value};
