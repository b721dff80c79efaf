//! Buffer management for basalt.
//!
//! This crate provides the page cache that sits in front of block storage:
//! - Fixed-size frame pool addressed by (file, block) pairs
//! - Non-blocking shared / intent-write / exclusive block locks
//! - Least-recently-fixed eviction driven by recency stamps
//! - Write-back of valid content on eviction, discard of invalidated content

mod frame;
mod pool;
mod replacer;
mod store;

pub use frame::{BufferFrame, FrameId, LockMode, LockState};
pub use pool::{BlockHandle, BufferManager, BufferPoolConfig, BufferPoolStats};
pub use replacer::{FreeBitmap, LruReplacer, Replacer};
pub use store::{BlockStore, MemoryStore};
