//! Tuple identifiers referenced by index entries.

use basalt_common::page::PageId;
use basalt_common::{BasaltError, Result};
use bytes::{Buf, BufMut};

/// Unique identifier for a tuple within the database.
///
/// Combines a PageId with a slot number to identify where a tuple is stored.
/// Ordered by page, then slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TupleId {
    /// Page containing this tuple.
    pub page_id: PageId,
    /// Slot number within the page.
    pub slot_id: u16,
}

impl TupleId {
    /// Encoded size in bytes.
    pub const SIZE: usize = 10;

    /// Invalid tuple ID, terminating the identifier list of an index entry.
    pub const INVALID: TupleId = TupleId {
        page_id: PageId {
            file_id: u32::MAX,
            page_num: u32::MAX,
        },
        slot_id: u16::MAX,
    };

    /// Creates a new tuple ID.
    pub fn new(page_id: PageId, slot_id: u16) -> Self {
        Self { page_id, slot_id }
    }

    /// Returns true if this is not the invalid sentinel.
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }

    /// Writes the little-endian encoding into `out` (exactly `SIZE` bytes).
    pub fn encode_into(&self, out: &mut [u8]) -> Result<()> {
        if out.len() != Self::SIZE {
            return Err(BasaltError::Internal(format!(
                "tuple id slot is {} bytes, expected {}",
                out.len(),
                Self::SIZE
            )));
        }
        let mut buf = out;
        buf.put_u32_le(self.page_id.file_id);
        buf.put_u32_le(self.page_id.page_num);
        buf.put_u16_le(self.slot_id);
        Ok(())
    }

    /// Reads a tuple id from exactly `SIZE` bytes.
    pub fn decode(mut bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::SIZE {
            return Err(BasaltError::Internal(format!(
                "tuple id slot is {} bytes, expected {}",
                bytes.len(),
                Self::SIZE
            )));
        }
        let file_id = bytes.get_u32_le();
        let page_num = bytes.get_u32_le();
        let slot_id = bytes.get_u16_le();
        Ok(Self::new(PageId::new(file_id, page_num), slot_id))
    }
}

impl std::fmt::Display for TupleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.page_id, self.slot_id)
    }
}
