//! Storage layer for basalt.
//!
//! This crate provides:
//! - Disk manager implementing block storage over one file per id
//! - Tuple identifiers referenced from index entries
//! - Paged sequential sorted index with page split and page removal

mod disk;
mod index;
mod tuple;

pub use disk::{DiskManager, DiskManagerConfig};
pub use index::{
    open_index, Index, IndexEntry, PageLayout, SeqIndex, HEADER_SIZE, MAX_TIDS_PER_ENTRY,
    ROOT_BLOCK,
};
pub use tuple::TupleId;
