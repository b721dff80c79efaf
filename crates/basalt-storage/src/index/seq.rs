//! Sequential sorted index.
//!
//! Entries live in key order across a contiguous run of pages starting at
//! block 0. There is no free list: a split shifts every following page one
//! block toward the end of the file, and an emptied page is closed up by
//! shifting the following pages back and truncating the file.

use super::page::{IndexEntry, PageLayout};
use super::pins::PinStack;
use super::Index;
use crate::tuple::TupleId;
use basalt_buffer::{BlockHandle, BufferManager, LockMode};
use basalt_common::config::{AccessMode, IndexConfig};
use basalt_common::page::PageId;
use basalt_common::types::{AttrType, Value};
use basalt_common::{BasaltError, Result};
use log::{debug, trace};
use std::cmp::Ordering;

/// Block holding the first page; fixed for the lifetime of an open index.
pub const ROOT_BLOCK: u32 = 0;

/// Sorted index over one file of fixed-slot pages.
///
/// The root page stays fixed while the handle is open. Every public
/// operation starts and ends with exactly that one block on the pin stack.
pub struct SeqIndex<'a> {
    buffer: &'a BufferManager,
    file_id: u32,
    unique: bool,
    layout: PageLayout,
    pins: PinStack<'a>,
}

fn invalid_page(page_id: PageId, reason: impl Into<String>) -> BasaltError {
    BasaltError::InvalidPage {
        page_id,
        reason: reason.into(),
    }
}

fn entry_count(layout: &PageLayout, page: &BlockHandle<'_>) -> Result<usize> {
    layout
        .count(&page.data())
        .map_err(|e| invalid_page(page.page_id(), e.to_string()))
}

impl<'a> SeqIndex<'a> {
    /// Opens the index stored in `file_id`, initializing an empty file.
    ///
    /// The root is fixed shared for `AccessMode::Read` and intent-write for
    /// `AccessMode::Write`.
    pub fn open(buffer: &'a BufferManager, file_id: u32, config: &IndexConfig) -> Result<Self> {
        let layout = PageLayout::for_index(buffer.page_size(), config.key_type, config.unique)?;

        if buffer.block_count(file_id)? == 0 {
            Self::initialize_index(buffer, file_id)?;
        }

        let mode = match config.access {
            AccessMode::Read => LockMode::Shared,
            AccessMode::Write => LockMode::IntentWrite,
        };
        let mut pins = PinStack::new(buffer, file_id);
        pins.fix(ROOT_BLOCK, mode)?;
        entry_count(&layout, pins.root()?)?;

        debug!(
            "Opened sequential index on file {}: {} key, {} entries per page, {} tids per entry",
            file_id,
            config.key_type,
            layout.entries_per_page(),
            layout.tids_per_entry()
        );

        Ok(Self {
            buffer,
            file_id,
            unique: config.unique,
            layout,
            pins,
        })
    }

    /// Writes an empty root page into a file that has no blocks yet.
    pub fn initialize_index(buffer: &BufferManager, file_id: u32) -> Result<()> {
        let blocks = buffer.block_count(file_id)?;
        if blocks != 0 {
            return Err(BasaltError::InvalidParameter {
                name: "file_id".to_string(),
                value: format!("{} already holds {} blocks", file_id, blocks),
            });
        }

        let mut root = buffer.fix_new_block(file_id)?;
        root.data_mut()?.fill(0);
        buffer.unfix_block(root)?;
        debug!("Initialized index file {}", file_id);
        Ok(())
    }

    /// Releases the root page, reporting a failure instead of logging it.
    pub fn close(mut self) -> Result<()> {
        self.pins.unfix_all()
    }

    pub fn layout(&self) -> &PageLayout {
        &self.layout
    }

    pub fn entries_per_page(&self) -> usize {
        self.layout.entries_per_page()
    }

    pub fn tids_per_entry(&self) -> usize {
        self.layout.tids_per_entry()
    }

    /// Number of blocks currently fixed by this handle.
    pub fn pin_depth(&self) -> usize {
        self.pins.depth()
    }

    /// Number of pages in the index file.
    pub fn page_count(&self) -> Result<u32> {
        self.buffer.block_count(self.file_id)
    }

    /// Returns every tuple id stored under `val`, in page order.
    pub fn find(&mut self, val: &Value) -> Result<Vec<TupleId>> {
        self.check_key(val)?;
        self.run(|index| {
            let (found, block) = index.find_first_page(val)?;
            if !found {
                return Ok(Vec::new());
            }
            index.find_from_page(val, block)
        })
    }

    /// Associates `tid` with `val`.
    ///
    /// Fails with `DuplicateKey` if the index is unique and `val` exists,
    /// `DuplicateTid` if the pair exists, and `EntryFull` once the entry for
    /// `val` holds `tids_per_entry` identifiers.
    pub fn insert(&mut self, val: &Value, tid: TupleId) -> Result<()> {
        self.check_key(val)?;
        if !tid.is_valid() {
            return Err(BasaltError::InvalidParameter {
                name: "tid".to_string(),
                value: tid.to_string(),
            });
        }
        self.run(|index| {
            index.upgrade_root()?;
            let (_, block) = index.find_first_page(val)?;
            index.insert_in_page(val, tid, block)
        })
    }

    /// Removes exactly `tids` from the entry of `val`.
    pub fn remove(&mut self, val: &Value, tids: &[TupleId]) -> Result<()> {
        self.check_key(val)?;
        if self.unique && tids.len() > 1 {
            return Err(BasaltError::UniqueViolation {
                requested: tids.len(),
            });
        }
        self.run(|index| {
            index.upgrade_root()?;
            let (found, block) = index.find_first_page(val)?;
            if !found {
                return Err(BasaltError::KeyNotFound);
            }
            index.remove_from_page(val, tids, block)
        })
    }

    /// Decodes the entries of one page.
    pub fn page_entries(&mut self, block: u32) -> Result<Vec<IndexEntry>> {
        let count = self.page_count()?;
        if block >= count {
            return Err(BasaltError::InvalidParameter {
                name: "block".to_string(),
                value: format!("{} (index has {} pages)", block, count),
            });
        }
        let layout = self.layout;
        self.run(|index| {
            index.with_page(block, LockMode::Shared, |page| {
                layout
                    .entries(&page.data())
                    .map_err(|e| invalid_page(page.page_id(), e.to_string()))
            })
        })
    }

    /// Decodes every entry of the index in page order.
    pub fn scan(&mut self) -> Result<Vec<IndexEntry>> {
        let mut entries = Vec::new();
        for block in 0..self.page_count()? {
            entries.extend(self.page_entries(block)?);
        }
        Ok(entries)
    }

    fn check_key(&self, val: &Value) -> Result<()> {
        val.encode(self.layout.key_type()).map(|_| ())
    }

    fn check_pins(&self) -> Result<()> {
        match self.pins.depth() {
            1 => Ok(()),
            depth => Err(BasaltError::PinStackInvalid { depth }),
        }
    }

    /// Runs one public operation, leaving only the root fixed afterwards.
    fn run<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.check_pins()?;
        let result = op(self);
        self.pins.truncate_to_root();
        let checked = self.check_pins();
        let value = result?;
        checked?;
        Ok(value)
    }

    fn upgrade_root(&mut self) -> Result<()> {
        let buffer = self.buffer;
        let root = self.pins.root_mut()?;
        if root.mode() != LockMode::Exclusive {
            buffer.upgrade_to_exclusive(root)?;
        }
        Ok(())
    }

    /// Runs `f` on block `block`, fixing and unfixing it unless it is the root.
    fn with_page<T>(
        &mut self,
        block: u32,
        mode: LockMode,
        f: impl FnOnce(&mut BlockHandle<'a>) -> Result<T>,
    ) -> Result<T> {
        if block == ROOT_BLOCK {
            return f(self.pins.root_mut()?);
        }
        self.pins.fix(block, mode)?;
        let result = self.pins.top_mut().and_then(f);
        let released = self.pins.pop();
        let value = result?;
        released?;
        Ok(value)
    }

    fn page_bounds(&mut self, block: u32) -> Result<(Value, Value)> {
        let layout = self.layout;
        self.with_page(block, LockMode::Shared, |page| {
            let count = entry_count(&layout, page)?;
            if count == 0 {
                return Err(invalid_page(page.page_id(), "empty page inside the key range"));
            }
            let data = page.data();
            Ok((layout.key(&data, 0)?, layout.key(&data, count - 1)?))
        })
    }

    /// Binary search for the first page that may hold `val`.
    ///
    /// Returns `(false, _)` only when `val` cannot be present; the block is
    /// then still the right place to insert it.
    fn find_first_page(&mut self, val: &Value) -> Result<(bool, u32)> {
        if entry_count(&self.layout, self.pins.root()?)? == 0 {
            return Ok((false, ROOT_BLOCK));
        }

        let mut found = false;
        let mut fallback = None;
        let mut block = ROOT_BLOCK;
        let mut low = ROOT_BLOCK;
        let mut high = self.page_count()?;

        while low < high && !found {
            block = low + (high - low) / 2;
            let (first, last) = self.page_bounds(block)?;
            trace!(
                "Probe block {} of file {}: [{}, {}] for {}",
                block,
                self.file_id,
                first,
                last,
                val
            );

            if *val < first {
                high = block;
            } else if *val > last {
                low = block + 1;
            } else if self.unique {
                found = true;
            } else if *val == first && block != ROOT_BLOCK {
                // The key may continue from the previous page.
                low = block - 1;
                high = block;
                fallback = Some(block);
            } else {
                found = true;
            }
        }

        if !found {
            if let Some(fallback) = fallback {
                return Ok((true, fallback));
            }
        }
        Ok((found, block))
    }

    fn find_from_page(&mut self, val: &Value, start: u32) -> Result<Vec<TupleId>> {
        let layout = self.layout;
        let count = self.page_count()?;
        let mut tids = Vec::new();
        let mut done = false;
        let mut block = start;

        while !done && block < count {
            done = self.with_page(block, LockMode::Shared, |page| {
                let entries = entry_count(&layout, page)?;
                if entries == 0 {
                    return Err(invalid_page(page.page_id(), "empty page inside the key range"));
                }
                let data = page.data();
                for i in 0..entries {
                    match layout.key(&data, i)?.cmp(val) {
                        Ordering::Less => {}
                        Ordering::Equal => tids.extend(layout.tids(&data, i)?),
                        Ordering::Greater => return Ok(true),
                    }
                }
                Ok(false)
            })?;
            block += 1;
        }

        Ok(tids)
    }

    fn insert_in_page(&mut self, val: &Value, tid: TupleId, block: u32) -> Result<()> {
        if block != ROOT_BLOCK {
            self.pins.fix(block, LockMode::Exclusive)?;
        }

        let layout = self.layout;
        let (count, pos, existing) = {
            let page = self.pins.top()?;
            let count = entry_count(&layout, page)?;
            let data = page.data();
            let mut pos = count;
            let mut existing = None;
            for i in 0..count {
                match layout.key(&data, i)?.cmp(val) {
                    Ordering::Less => {}
                    Ordering::Equal => {
                        existing = Some(i);
                        break;
                    }
                    Ordering::Greater => {
                        pos = i;
                        break;
                    }
                }
            }
            (count, pos, existing)
        };

        if let Some(idx) = existing {
            return self.append_tid(idx, tid);
        }
        if count < layout.entries_per_page() {
            return self.insert_entry(pos, count, val, tid);
        }
        self.split_and_insert(pos, val, tid)
    }

    fn append_tid(&mut self, idx: usize, tid: TupleId) -> Result<()> {
        if self.unique {
            return Err(BasaltError::DuplicateKey);
        }

        let layout = self.layout;
        let page = self.pins.top_mut()?;
        let current = layout.tids(&page.data(), idx)?;
        if current.contains(&tid) {
            return Err(BasaltError::DuplicateTid {
                tid: tid.to_string(),
            });
        }
        if current.len() >= layout.tids_per_entry() {
            return Err(BasaltError::EntryFull {
                max: layout.tids_per_entry(),
            });
        }
        layout.set_tid(&mut page.data_mut()?, idx, current.len(), tid)?;
        Ok(())
    }

    /// Writes a new entry at `pos` of the top page, which holds `count` entries.
    fn insert_entry(&mut self, pos: usize, count: usize, val: &Value, tid: TupleId) -> Result<()> {
        let layout = self.layout;
        let page = self.pins.top_mut()?;
        let mut data = page.data_mut()?;
        if pos < count {
            layout.shift_right(&mut data, pos, count)?;
        }
        layout.write_entry(&mut data, pos, val, &[tid])?;
        layout.set_count(&mut data, count + 1)?;
        Ok(())
    }

    /// Splits the full top page and inserts into whichever half owns `pos`.
    ///
    /// The split page is released while the following pages shift, so a
    /// split never holds more than three blocks at once. It stays full and
    /// unchanged until the new page exists.
    fn split_and_insert(&mut self, pos: usize, val: &Value, tid: TupleId) -> Result<()> {
        let layout = self.layout;
        let per_page = layout.entries_per_page();
        let left = per_page - per_page / 2;
        let right = per_page - left;

        let split_block = self.pins.top()?.block_no();
        self.pins.pop_above_root()?;
        self.insert_empty_page(split_block + 1)?;

        if split_block != ROOT_BLOCK {
            self.pins.fix(split_block, LockMode::Exclusive)?;
        }
        let tail = {
            let page = self.pins.top_mut()?;
            let mut data = page.data_mut()?;
            let tail = layout.entries_bytes(&data, left, per_page)?.to_vec();
            layout.clear_entries(&mut data, left, per_page)?;
            layout.set_count(&mut data, left)?;
            tail
        };

        self.pins.fix(split_block + 1, LockMode::Exclusive)?;
        {
            let page = self.pins.top_mut()?;
            let mut data = page.data_mut()?;
            layout.write_entries(&mut data, 0, &tail)?;
            layout.set_count(&mut data, right)?;
        }

        debug!(
            "Split block {} of file {}: {} entries stay, {} move to block {}",
            split_block,
            self.file_id,
            left,
            right,
            split_block + 1
        );

        if pos <= left {
            self.pins.pop()?;
            self.insert_entry(pos, left, val, tid)
        } else {
            self.insert_entry(pos - left, right, val, tid)
        }
    }

    /// Opens an empty page at `pos`, shifting pages `pos..` one block right.
    ///
    /// The pin stack has the same depth on return.
    fn insert_empty_page(&mut self, pos: u32) -> Result<()> {
        let depth = self.pins.depth();
        let buffer = self.buffer;

        let top = self.pins.top_mut()?;
        if top.mode() != LockMode::Exclusive {
            buffer.upgrade_to_exclusive(top)?;
        }

        self.pins.push(buffer.fix_new_block(self.file_id)?);
        let mut block = self.pins.top()?.block_no();
        let appended = block;

        while block > pos {
            block -= 1;
            let left = buffer.fix_block(PageId::new(self.file_id, block), LockMode::Exclusive, true)?;
            let content = left.data().to_vec();
            self.pins.top_mut()?.data_mut()?.copy_from_slice(&content);
            self.pins.pop_above_root()?;
            self.pins.push(left);
        }

        self.pins.top_mut()?.data_mut()?.fill(0);
        self.pins.pop_above_root()?;

        if self.pins.depth() != depth {
            return Err(BasaltError::PinStackInvalid {
                depth: self.pins.depth(),
            });
        }
        debug!(
            "Inserted empty block {} into file {} (now {} blocks)",
            pos,
            self.file_id,
            appended + 1
        );
        Ok(())
    }

    /// Closes up the empty page at `block`, shifting later pages one block left.
    ///
    /// The pin stack has the same depth on return.
    fn remove_empty_page(&mut self, block: u32) -> Result<()> {
        let depth = self.pins.depth();
        let buffer = self.buffer;
        let count = buffer.block_count(self.file_id)?;

        if count > 1 {
            if block != ROOT_BLOCK {
                self.pins.fix(block, LockMode::Exclusive)?;
            }

            for next in block + 1..count {
                let right = buffer.fix_block(PageId::new(self.file_id, next), LockMode::Exclusive, true)?;
                let content = right.data().to_vec();
                self.pins.top_mut()?.data_mut()?.copy_from_slice(&content);
                self.pins.pop_above_root()?;
                self.pins.push(right);
            }

            self.pins.pop_above_root()?;
            buffer.set_block_count(self.file_id, count - 1)?;
            debug!(
                "Removed empty block {} from file {} (now {} blocks)",
                block,
                self.file_id,
                count - 1
            );
        }

        if self.pins.depth() != depth {
            return Err(BasaltError::PinStackInvalid {
                depth: self.pins.depth(),
            });
        }
        Ok(())
    }

    fn remove_from_page(&mut self, val: &Value, tids: &[TupleId], start: u32) -> Result<()> {
        let layout = self.layout;
        let mut wanted = tids.to_vec();
        wanted.sort();
        wanted.dedup();

        let mut remaining = wanted.len();
        let mut seen = false;
        let mut done = false;
        let mut block = start;

        while !done && remaining > 0 && block < self.page_count()? {
            let emptied = self.with_page(block, LockMode::Exclusive, |page| {
                let count = entry_count(&layout, page)?;
                if count == 0 {
                    return Err(invalid_page(page.page_id(), "empty page inside the key range"));
                }

                let mut hit = None;
                {
                    let data = page.data();
                    for i in 0..count {
                        match layout.key(&data, i)?.cmp(val) {
                            Ordering::Less => {}
                            Ordering::Equal => {
                                hit = Some(i);
                                break;
                            }
                            Ordering::Greater => {
                                done = true;
                                break;
                            }
                        }
                    }
                }
                let Some(i) = hit else {
                    return Ok(false);
                };

                // Keys are unique per entry, so nothing past this one matches.
                seen = true;
                done = true;
                let current = layout.tids(&page.data(), i)?;
                let kept: Vec<TupleId> = current
                    .iter()
                    .copied()
                    .filter(|t| wanted.binary_search(t).is_err())
                    .collect();
                if kept.len() == current.len() {
                    return Ok(false);
                }
                remaining = remaining.saturating_sub(current.len() - kept.len());

                let mut data = page.data_mut()?;
                if kept.is_empty() {
                    layout.remove_entry(&mut data, i, count)?;
                    layout.set_count(&mut data, count - 1)?;
                    Ok(count == 1)
                } else {
                    layout.set_tids(&mut data, i, &kept)?;
                    Ok(false)
                }
            })?;

            if emptied && self.page_count()? > 1 {
                self.remove_empty_page(block)?;
            } else {
                block += 1;
            }
        }

        if !seen && !wanted.is_empty() {
            return Err(BasaltError::KeyNotFound);
        }
        if remaining > 0 {
            return Err(BasaltError::NotAllRemoved { remaining });
        }
        Ok(())
    }
}

impl Index for SeqIndex<'_> {
    fn find(&mut self, val: &Value) -> Result<Vec<TupleId>> {
        SeqIndex::find(self, val)
    }

    fn insert(&mut self, val: &Value, tid: TupleId) -> Result<()> {
        SeqIndex::insert(self, val, tid)
    }

    fn remove(&mut self, val: &Value, tids: &[TupleId]) -> Result<()> {
        SeqIndex::remove(self, val, tids)
    }

    fn key_type(&self) -> AttrType {
        self.layout.key_type()
    }

    fn is_unique(&self) -> bool {
        self.unique
    }
}

impl std::fmt::Debug for SeqIndex<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeqIndex")
            .field("file_id", &self.file_id)
            .field("unique", &self.unique)
            .field("layout", &self.layout)
            .field("pin_depth", &self.pins.depth())
            .finish()
    }
}
