//! Index access methods over buffer-managed files.
//!
//! An index maps typed keys to the tuple ids of the records holding them.
//! Implementations are selected through [`open_index`] by [`IndexKind`].

mod page;
mod pins;
mod seq;

pub use page::{IndexEntry, PageLayout, HEADER_SIZE, MAX_TIDS_PER_ENTRY};
pub use seq::{SeqIndex, ROOT_BLOCK};

use crate::tuple::TupleId;
use basalt_buffer::BufferManager;
use basalt_common::config::{IndexConfig, IndexKind};
use basalt_common::types::{AttrType, Value};
use basalt_common::Result;

/// Operations common to every index kind.
pub trait Index {
    /// Returns the tuple ids stored under `val`, empty if there are none.
    fn find(&mut self, val: &Value) -> Result<Vec<TupleId>>;

    /// Adds `tid` under `val`.
    fn insert(&mut self, val: &Value, tid: TupleId) -> Result<()>;

    /// Removes `tids` from the entry of `val`.
    fn remove(&mut self, val: &Value, tids: &[TupleId]) -> Result<()>;

    fn key_type(&self) -> AttrType;

    fn is_unique(&self) -> bool;
}

/// Opens the index stored in `file_id` with the implementation `config` names.
pub fn open_index<'a>(
    buffer: &'a BufferManager,
    file_id: u32,
    config: &IndexConfig,
) -> Result<Box<dyn Index + 'a>> {
    match config.kind {
        IndexKind::Sequential => Ok(Box::new(SeqIndex::open(buffer, file_id, config)?)),
    }
}
