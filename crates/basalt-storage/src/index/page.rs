//! Fixed-slot index page layout.
//!
//! ```text
//! +-----------+---------------------------------------------+
//! | count u32 | entry 0 | entry 1 | ... | entry (epp - 1)   |
//! +-----------+---------------------------------------------+
//! entry = key (key_type.size() bytes) + tids_per_entry * TupleId
//! ```
//!
//! Unused identifier slots of an entry hold `TupleId::INVALID`. Every
//! accessor bounds-checks its offsets against the layout.

use crate::tuple::TupleId;
use basalt_common::types::{AttrType, Value};
use basalt_common::{BasaltError, Result};
use bytes::{Buf, BufMut};
use std::ops::Range;

/// Size of the entry-count header.
pub const HEADER_SIZE: usize = 4;

/// Identifier slots per entry in a non-unique index.
pub const MAX_TIDS_PER_ENTRY: usize = 20;

/// One decoded index entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub key: Value,
    pub tids: Vec<TupleId>,
}

/// Geometry of an index page for one key type and uniqueness setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLayout {
    page_size: usize,
    key_type: AttrType,
    key_size: usize,
    tids_per_entry: usize,
    entry_size: usize,
    entries_per_page: usize,
}

impl PageLayout {
    /// Computes the layout. Fails unless at least two entries fit on a page.
    pub fn new(page_size: usize, key_type: AttrType, tids_per_entry: usize) -> Result<Self> {
        let key_size = key_type.size();
        let entry_size = key_size + TupleId::SIZE * tids_per_entry;
        let entries_per_page = if tids_per_entry == 0 {
            0
        } else {
            page_size.saturating_sub(HEADER_SIZE) / entry_size
        };

        if entries_per_page <= 1 {
            return Err(BasaltError::InvalidParameter {
                name: "entries_per_page".to_string(),
                value: format!(
                    "{} ({}-byte pages, {} key, {} tids per entry)",
                    entries_per_page, page_size, key_type, tids_per_entry
                ),
            });
        }

        Ok(Self {
            page_size,
            key_type,
            key_size,
            tids_per_entry,
            entry_size,
            entries_per_page,
        })
    }

    /// Layout for a unique (one identifier per key) or non-unique index.
    pub fn for_index(page_size: usize, key_type: AttrType, unique: bool) -> Result<Self> {
        let tids_per_entry = if unique { 1 } else { MAX_TIDS_PER_ENTRY };
        Self::new(page_size, key_type, tids_per_entry)
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn key_type(&self) -> AttrType {
        self.key_type
    }

    pub fn tids_per_entry(&self) -> usize {
        self.tids_per_entry
    }

    pub fn entry_size(&self) -> usize {
        self.entry_size
    }

    pub fn entries_per_page(&self) -> usize {
        self.entries_per_page
    }

    #[inline]
    fn offset(&self, idx: usize) -> usize {
        HEADER_SIZE + idx * self.entry_size
    }

    fn check_page(&self, page: &[u8]) -> Result<()> {
        if page.len() != self.page_size {
            return Err(BasaltError::PageSizeMismatch {
                expected: self.page_size,
                actual: page.len(),
            });
        }
        Ok(())
    }

    /// Byte range of entries `from..to`.
    fn span(&self, from: usize, to: usize) -> Result<Range<usize>> {
        if from > to || to > self.entries_per_page {
            return Err(BasaltError::Internal(format!(
                "entry range {}..{} outside page of {} entries",
                from, to, self.entries_per_page
            )));
        }
        Ok(self.offset(from)..self.offset(to))
    }

    fn tid_range(&self, idx: usize, slot: usize) -> Result<Range<usize>> {
        if slot >= self.tids_per_entry {
            return Err(BasaltError::Internal(format!(
                "tid slot {} outside entry of {} slots",
                slot, self.tids_per_entry
            )));
        }
        let start = self.span(idx, idx + 1)?.start + self.key_size + slot * TupleId::SIZE;
        Ok(start..start + TupleId::SIZE)
    }

    /// Number of populated entries.
    pub fn count(&self, page: &[u8]) -> Result<usize> {
        self.check_page(page)?;
        let mut header = &page[..HEADER_SIZE];
        let count = header.get_u32_le() as usize;
        if count > self.entries_per_page {
            return Err(BasaltError::Internal(format!(
                "entry count {} exceeds page capacity {}",
                count, self.entries_per_page
            )));
        }
        Ok(count)
    }

    pub fn set_count(&self, page: &mut [u8], count: usize) -> Result<()> {
        self.check_page(page)?;
        if count > self.entries_per_page {
            return Err(BasaltError::Internal(format!(
                "entry count {} exceeds page capacity {}",
                count, self.entries_per_page
            )));
        }
        let mut header = &mut page[..HEADER_SIZE];
        header.put_u32_le(count as u32);
        Ok(())
    }

    /// Decodes the key of entry `idx`.
    pub fn key(&self, page: &[u8], idx: usize) -> Result<Value> {
        self.check_page(page)?;
        let start = self.span(idx, idx + 1)?.start;
        Value::decode(self.key_type, &page[start..start + self.key_size])
    }

    /// Decodes the identifiers of entry `idx` up to the first invalid slot.
    pub fn tids(&self, page: &[u8], idx: usize) -> Result<Vec<TupleId>> {
        self.check_page(page)?;
        let mut tids = Vec::new();
        for slot in 0..self.tids_per_entry {
            let tid = TupleId::decode(&page[self.tid_range(idx, slot)?])?;
            if !tid.is_valid() {
                break;
            }
            tids.push(tid);
        }
        Ok(tids)
    }

    pub fn set_tid(&self, page: &mut [u8], idx: usize, slot: usize, tid: TupleId) -> Result<()> {
        self.check_page(page)?;
        let range = self.tid_range(idx, slot)?;
        tid.encode_into(&mut page[range])
    }

    /// Rewrites the identifier list of entry `idx`, padding with the sentinel.
    pub fn set_tids(&self, page: &mut [u8], idx: usize, tids: &[TupleId]) -> Result<()> {
        if tids.len() > self.tids_per_entry {
            return Err(BasaltError::EntryFull {
                max: self.tids_per_entry,
            });
        }
        for slot in 0..self.tids_per_entry {
            let tid = tids.get(slot).copied().unwrap_or(TupleId::INVALID);
            self.set_tid(page, idx, slot, tid)?;
        }
        Ok(())
    }

    /// Writes a complete entry at slot `idx`.
    pub fn write_entry(&self, page: &mut [u8], idx: usize, key: &Value, tids: &[TupleId]) -> Result<()> {
        self.check_page(page)?;
        let start = self.span(idx, idx + 1)?.start;
        key.encode_into(self.key_type, &mut page[start..start + self.key_size])?;
        self.set_tids(page, idx, tids)
    }

    /// Decodes entry `idx`.
    pub fn entry(&self, page: &[u8], idx: usize) -> Result<IndexEntry> {
        Ok(IndexEntry {
            key: self.key(page, idx)?,
            tids: self.tids(page, idx)?,
        })
    }

    /// Decodes every populated entry.
    pub fn entries(&self, page: &[u8]) -> Result<Vec<IndexEntry>> {
        (0..self.count(page)?).map(|i| self.entry(page, i)).collect()
    }

    /// Moves entries `idx..count` one slot right, opening a gap at `idx`.
    pub fn shift_right(&self, page: &mut [u8], idx: usize, count: usize) -> Result<()> {
        self.check_page(page)?;
        if count >= self.entries_per_page {
            return Err(BasaltError::Internal(format!(
                "cannot shift a full page of {} entries",
                count
            )));
        }
        let src = self.span(idx, count)?;
        page.copy_within(src, self.offset(idx + 1));
        Ok(())
    }

    /// Moves entries `idx + 1..count` one slot left over entry `idx` and
    /// zeroes the vacated last slot.
    pub fn remove_entry(&self, page: &mut [u8], idx: usize, count: usize) -> Result<()> {
        self.check_page(page)?;
        if idx >= count {
            return Err(BasaltError::Internal(format!(
                "entry {} outside {} populated entries",
                idx, count
            )));
        }
        let src = self.span(idx + 1, count)?;
        page.copy_within(src, self.offset(idx));
        self.clear_entries(page, count - 1, count)
    }

    /// Raw bytes of entries `from..to`.
    pub fn entries_bytes<'p>(&self, page: &'p [u8], from: usize, to: usize) -> Result<&'p [u8]> {
        self.check_page(page)?;
        Ok(&page[self.span(from, to)?])
    }

    /// Copies whole encoded entries into the page starting at slot `at`.
    pub fn write_entries(&self, page: &mut [u8], at: usize, bytes: &[u8]) -> Result<()> {
        self.check_page(page)?;
        if bytes.len() % self.entry_size != 0 {
            return Err(BasaltError::Internal(format!(
                "{} bytes is not a whole number of {}-byte entries",
                bytes.len(),
                self.entry_size
            )));
        }
        let range = self.span(at, at + bytes.len() / self.entry_size)?;
        page[range].copy_from_slice(bytes);
        Ok(())
    }

    pub fn clear_entries(&self, page: &mut [u8], from: usize, to: usize) -> Result<()> {
        self.check_page(page)?;
        let range = self.span(from, to)?;
        page[range].fill(0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_common::page::PageId;

    fn tid(n: u32) -> TupleId {
        TupleId::new(PageId::new(9, n), n as u16)
    }

    fn layout() -> PageLayout {
        // (64 - 4) / (4 + 10) = 4 entries
        PageLayout::new(64, AttrType::Int32, 1).unwrap()
    }

    fn page_with(layout: &PageLayout, keys: &[i32]) -> Vec<u8> {
        let mut page = vec![0u8; layout.page_size()];
        for (i, &k) in keys.iter().enumerate() {
            layout
                .write_entry(&mut page, i, &Value::Int32(k), &[tid(k as u32)])
                .unwrap();
        }
        layout.set_count(&mut page, keys.len()).unwrap();
        page
    }

    fn keys(layout: &PageLayout, page: &[u8]) -> Vec<i32> {
        layout
            .entries(page)
            .unwrap()
            .into_iter()
            .map(|e| match e.key {
                Value::Int32(k) => k,
                other => panic!("unexpected key {other}"),
            })
            .collect()
    }

    #[test]
    fn test_layout_geometry() {
        let unique = PageLayout::for_index(1024, AttrType::Int32, true).unwrap();
        assert_eq!(unique.entry_size(), 14);
        assert_eq!(unique.entries_per_page(), 72);

        let multi = PageLayout::for_index(1024, AttrType::Char(30), false).unwrap();
        assert_eq!(multi.tids_per_entry(), MAX_TIDS_PER_ENTRY);
        assert_eq!(multi.entries_per_page(), 4);

        let tiny = PageLayout::for_index(32, AttrType::Int32, true).unwrap();
        assert_eq!(tiny.entries_per_page(), 2);
    }

    #[test]
    fn test_layout_rejects_single_entry_pages() {
        assert!(matches!(
            PageLayout::for_index(32, AttrType::Int32, false),
            Err(BasaltError::InvalidParameter { .. })
        ));
        assert!(PageLayout::new(1024, AttrType::Int32, 0).is_err());
    }

    #[test]
    fn test_entry_roundtrip_with_sentinel() {
        let layout = PageLayout::new(512, AttrType::Int64, 3).unwrap();
        let mut page = vec![0u8; 512];
        layout
            .write_entry(&mut page, 1, &Value::Int64(-5), &[tid(1), tid(2)])
            .unwrap();

        assert_eq!(layout.key(&page, 1).unwrap(), Value::Int64(-5));
        assert_eq!(layout.tids(&page, 1).unwrap(), vec![tid(1), tid(2)]);

        layout.set_tid(&mut page, 1, 2, tid(3)).unwrap();
        assert_eq!(layout.tids(&page, 1).unwrap().len(), 3);

        assert!(matches!(
            layout.set_tids(&mut page, 1, &[tid(1), tid(2), tid(3), tid(4)]),
            Err(BasaltError::EntryFull { max: 3 })
        ));
    }

    #[test]
    fn test_count_bounds() {
        let layout = layout();
        let mut page = vec![0u8; 64];
        assert_eq!(layout.count(&page).unwrap(), 0);
        assert!(layout.set_count(&mut page, 5).is_err());

        page[0] = 9;
        assert!(layout.count(&page).is_err());
        assert!(layout.count(&page[..32]).is_err());
    }

    #[test]
    fn test_out_of_range_access() {
        let layout = layout();
        let page = vec![0u8; 64];
        assert!(layout.key(&page, 4).is_err());
        assert!(layout.entries_bytes(&page, 2, 5).is_err());
        assert!(layout.entries_bytes(&page, 3, 2).is_err());
    }

    #[test]
    fn test_shift_right_and_insert() {
        let layout = layout();
        let mut page = page_with(&layout, &[10, 30, 40]);

        layout.shift_right(&mut page, 1, 3).unwrap();
        layout
            .write_entry(&mut page, 1, &Value::Int32(20), &[tid(20)])
            .unwrap();
        layout.set_count(&mut page, 4).unwrap();

        assert_eq!(keys(&layout, &page), vec![10, 20, 30, 40]);
        assert_eq!(layout.tids(&page, 3).unwrap(), vec![tid(40)]);
        assert!(layout.shift_right(&mut page, 0, 4).is_err());
    }

    #[test]
    fn test_remove_entry_compacts() {
        let layout = layout();
        let mut page = page_with(&layout, &[1, 2, 3, 4]);

        layout.remove_entry(&mut page, 1, 4).unwrap();
        layout.set_count(&mut page, 3).unwrap();
        assert_eq!(keys(&layout, &page), vec![1, 3, 4]);
        assert!(layout.entries_bytes(&page, 3, 4).unwrap().iter().all(|&b| b == 0));

        assert!(layout.remove_entry(&mut page, 3, 3).is_err());
    }

    #[test]
    fn test_move_tail_between_pages() {
        let layout = layout();
        let left = page_with(&layout, &[1, 2, 3, 4]);
        let tail = layout.entries_bytes(&left, 2, 4).unwrap().to_vec();

        let mut right = vec![0u8; 64];
        layout.write_entries(&mut right, 0, &tail).unwrap();
        layout.set_count(&mut right, 2).unwrap();
        assert_eq!(keys(&layout, &right), vec![3, 4]);

        assert!(layout.write_entries(&mut right, 3, &tail).is_err());
        assert!(layout.write_entries(&mut right, 0, &tail[1..]).is_err());
    }
}
