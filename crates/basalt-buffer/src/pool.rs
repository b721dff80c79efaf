//! Buffer manager.

use crate::frame::{BufferFrame, FrameId, LockMode, LockState};
use crate::replacer::{LruReplacer, Replacer};
use crate::store::BlockStore;
use basalt_common::config::StorageConfig;
use basalt_common::page::PageId;
use basalt_common::{BasaltError, Result};
use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use sysinfo::System;

/// Configuration for the buffer manager.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of frames in the pool.
    pub num_frames: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self { num_frames: 64 }
    }
}

impl From<&StorageConfig> for BufferPoolConfig {
    fn from(config: &StorageConfig) -> Self {
        Self {
            num_frames: config.buffer_pool_pages,
        }
    }
}

/// Residency and lock bookkeeping, guarded by one mutex.
struct PoolState {
    page_table: HashMap<PageId, FrameId>,
    locks: Vec<LockState>,
}

/// Buffer manager.
///
/// Translates (file, block) pairs into frames of a fixed-size pool:
/// - fixing grants a non-blocking lock and never waits on a conflict
/// - an unfixed frame keeps its content as a read cache until it is chosen
///   as a victim
/// - the victim is the unfixed frame fixed least recently
/// - a victim whose content is still valid is written back before reuse
/// - content marked dirty (invalid) is dropped when its last lock goes away
pub struct BufferManager {
    config: BufferPoolConfig,
    store: Arc<dyn BlockStore>,
    frames: Vec<BufferFrame>,
    state: Mutex<PoolState>,
    replacer: Box<dyn Replacer>,
}

impl BufferManager {
    /// Creates a buffer manager in front of `store`.
    pub fn new(config: BufferPoolConfig, store: Arc<dyn BlockStore>) -> Result<Self> {
        let replacer = Box::new(LruReplacer::new(config.num_frames));
        Self::with_replacer(config, store, replacer)
    }

    /// Creates a buffer manager with a caller-supplied replacement policy.
    ///
    /// The replacer must start with every frame marked evictable.
    pub fn with_replacer(
        config: BufferPoolConfig,
        store: Arc<dyn BlockStore>,
        replacer: Box<dyn Replacer>,
    ) -> Result<Self> {
        if config.num_frames == 0 {
            return Err(BasaltError::InvalidParameter {
                name: "num_frames".to_string(),
                value: "0".to_string(),
            });
        }

        let page_size = store.page_size();
        let frames = (0..config.num_frames)
            .map(|i| BufferFrame::new(FrameId(i as u32), page_size))
            .collect();

        Ok(Self {
            state: Mutex::new(PoolState {
                page_table: HashMap::with_capacity(config.num_frames),
                locks: vec![LockState::default(); config.num_frames],
            }),
            config,
            store,
            frames,
            replacer,
        })
    }

    /// Creates a buffer manager sized to 25% of available system RAM.
    ///
    /// Minimum 1,000 frames so that small hosts still get useful caching.
    pub fn auto_sized(store: Arc<dyn BlockStore>) -> Result<Self> {
        let mut sys = System::new_all();
        sys.refresh_memory();

        let available_bytes = sys.available_memory() as usize;
        let target_bytes = available_bytes / 4;
        let num_frames = (target_bytes / store.page_size().max(1)).max(1_000);

        Self::new(BufferPoolConfig { num_frames }, store)
    }

    /// Returns the number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.config.num_frames
    }

    /// Returns the block size of the underlying store.
    pub fn page_size(&self) -> usize {
        self.store.page_size()
    }

    /// Returns true if the block is resident in some frame.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.state.lock().page_table.contains_key(&page_id)
    }

    /// Fixes a block in `mode`, loading it into a frame on a miss.
    ///
    /// With `read` false the frame starts zeroed instead of being read from
    /// the store. Fails with `LockConflict` when the block is resident under
    /// an incompatible lock and with `BufferPoolFull` when every frame is
    /// fixed.
    pub fn fix_block(&self, page_id: PageId, mode: LockMode, read: bool) -> Result<BlockHandle<'_>> {
        let mut state = self.state.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            if !state.locks[frame_id.index()].grant(mode) {
                return Err(BasaltError::LockConflict {
                    page_id,
                    requested: mode.to_string(),
                });
            }
            self.replacer.set_evictable(frame_id, false);
            self.replacer.record_access(frame_id);
            debug!("Fixed block {} in {} as {} (hit)", page_id, frame_id, mode);
            return Ok(BlockHandle::new(self, frame_id, page_id, mode));
        }

        let frame_id = self.replacer.evict().ok_or(BasaltError::BufferPoolFull)?;
        let frame = &self.frames[frame_id.index()];

        if let Some(old_page) = frame.page_id() {
            if !frame.is_dirty() {
                if let Err(e) = self.write_back(frame, old_page) {
                    self.replacer.set_evictable(frame_id, true);
                    return Err(e);
                }
            }
            state.page_table.remove(&old_page);
            debug!("Evicted block {} from {}", old_page, frame_id);
        }

        frame.reset();
        if read {
            let loaded = {
                let mut data = frame.write_data();
                self.store.read_block(page_id, &mut data)
            };
            if let Err(e) = loaded {
                self.replacer.remove(frame_id);
                self.replacer.set_evictable(frame_id, true);
                return Err(e);
            }
        }

        frame.set_page_id(Some(page_id));
        state.page_table.insert(page_id, frame_id);
        let lock = &mut state.locks[frame_id.index()];
        *lock = LockState::default();
        lock.grant(mode);
        self.replacer.record_access(frame_id);

        debug!("Fixed block {} in {} as {} (miss)", page_id, frame_id, mode);
        Ok(BlockHandle::new(self, frame_id, page_id, mode))
    }

    /// Appends a block to the file and fixes it exclusively with zeroed content.
    ///
    /// If the fix fails the file is cut back to its previous length.
    pub fn fix_new_block(&self, file_id: u32) -> Result<BlockHandle<'_>> {
        let block = self.store.append_block(file_id)?;
        match self.fix_block(PageId::new(file_id, block), LockMode::Exclusive, false) {
            Ok(handle) => Ok(handle),
            Err(e) => {
                if let Err(undo) = self.store.set_block_count(file_id, block) {
                    warn!("Failed to drop appended block {} of file {}: {}", block, file_id, undo);
                }
                Err(e)
            }
        }
    }

    /// Upgrades a shared or intent-write handle to exclusive.
    ///
    /// Succeeds only if the handle is the sole holder of the block.
    pub fn upgrade_to_exclusive(&self, handle: &mut BlockHandle<'_>) -> Result<()> {
        if handle.mode == LockMode::Exclusive {
            return Ok(());
        }

        let mut state = self.state.lock();
        let idx = handle.frame.frame_id().index();
        if !state.locks[idx].upgrade(handle.mode) {
            return Err(BasaltError::LockConflict {
                page_id: handle.page_id,
                requested: LockMode::Exclusive.to_string(),
            });
        }
        debug!("Upgraded block {} from {} to EXCLUSIVE", handle.page_id, handle.mode);
        handle.mode = LockMode::Exclusive;
        Ok(())
    }

    /// Releases the lock held by `handle`.
    pub fn unfix_block(&self, mut handle: BlockHandle<'_>) -> Result<()> {
        if !std::ptr::eq(handle.manager, self) {
            return Err(BasaltError::Internal(format!(
                "block {} was fixed by another buffer manager",
                handle.page_id
            )));
        }
        handle.released = true;
        self.release(handle.frame.frame_id(), handle.page_id, handle.mode)
    }

    fn release(&self, frame_id: FrameId, page_id: PageId, mode: LockMode) -> Result<()> {
        let mut state = self.state.lock();
        let frame = &self.frames[frame_id.index()];
        if frame.page_id() != Some(page_id) {
            return Err(BasaltError::PageNotResident { page_id });
        }

        let lock = &mut state.locks[frame_id.index()];
        lock.release(mode);
        if !lock.is_unlocked() {
            debug!("Unfixed block {} ({}), still locked", page_id, mode);
            return Ok(());
        }

        if frame.is_dirty() {
            state.page_table.remove(&page_id);
            self.discard(frame);
            debug!("Unfixed block {}, discarded dirty content", page_id);
        } else {
            self.replacer.set_evictable(frame_id, true);
            debug!("Unfixed block {} ({})", page_id, mode);
        }
        Ok(())
    }

    /// Writes the block's content to the store and clears its flags.
    pub fn flush_block(&self, handle: &BlockHandle<'_>) -> Result<()> {
        let _state = self.state.lock();
        self.write_back(handle.frame, handle.page_id)?;
        handle.frame.set_dirty(false);
        Ok(())
    }

    /// Returns true if any block of the file is resident.
    pub fn is_block_of_file_open(&self, file_id: u32) -> bool {
        self.state
            .lock()
            .page_table
            .keys()
            .any(|page_id| page_id.file_id == file_id)
    }

    /// Writes back and frees every resident block of a file.
    ///
    /// Fails with `BlockLocked` without touching any frame if one of the
    /// blocks is still fixed.
    pub fn close_all_open_blocks(&self, file_id: u32) -> Result<()> {
        let mut state = self.state.lock();
        let resident = Self::resident_blocks(&state, |pid| pid.file_id == file_id);
        Self::check_unlocked(&state, &resident)?;

        for (page_id, frame_id) in resident {
            let frame = &self.frames[frame_id.index()];
            if !frame.is_dirty() {
                self.write_back(frame, page_id)?;
            }
            state.page_table.remove(&page_id);
            self.discard(frame);
        }
        debug!("Closed all open blocks of file {}", file_id);
        Ok(())
    }

    /// Returns the number of blocks in a file.
    pub fn block_count(&self, file_id: u32) -> Result<u32> {
        self.store.block_count(file_id)
    }

    /// Resizes a file to `count` blocks.
    ///
    /// Resident blocks at or beyond `count` are dropped without write-back.
    /// Fails with `BlockLocked` if one of them is still fixed.
    pub fn set_block_count(&self, file_id: u32, count: u32) -> Result<()> {
        let mut state = self.state.lock();
        let cut = Self::resident_blocks(&state, |pid| {
            pid.file_id == file_id && pid.page_num >= count
        });
        Self::check_unlocked(&state, &cut)?;

        for (page_id, frame_id) in cut {
            state.page_table.remove(&page_id);
            self.discard(&self.frames[frame_id.index()]);
        }
        self.store.set_block_count(file_id, count)
    }

    /// Writes back every resident block whose content is valid.
    ///
    /// Returns the number of blocks written.
    pub fn flush_all(&self) -> Result<usize> {
        let state = self.state.lock();
        let mut written = 0;
        for (&page_id, &frame_id) in state.page_table.iter() {
            let frame = &self.frames[frame_id.index()];
            if !frame.is_dirty() {
                self.write_back(frame, page_id)?;
                written += 1;
            }
        }
        Ok(written)
    }

    /// Returns statistics about the pool.
    pub fn stats(&self) -> BufferPoolStats {
        let state = self.state.lock();
        let locked_frames = state.locks.iter().filter(|l| !l.is_unlocked()).count();
        let modified_frames = state
            .page_table
            .values()
            .filter(|fid| self.frames[fid.index()].is_modified())
            .count();

        BufferPoolStats {
            total_frames: self.config.num_frames,
            free_frames: self.replacer.size(),
            used_frames: state.page_table.len(),
            locked_frames,
            modified_frames,
            access_counter: self.replacer.access_counter(),
        }
    }

    fn write_back(&self, frame: &BufferFrame, page_id: PageId) -> Result<()> {
        let data = frame.read_data();
        self.store.write_block(page_id, &data)?;
        frame.set_modified(false);
        Ok(())
    }

    fn discard(&self, frame: &BufferFrame) {
        let frame_id = frame.frame_id();
        frame.reset();
        self.replacer.remove(frame_id);
        self.replacer.set_evictable(frame_id, true);
    }

    fn resident_blocks(
        state: &PoolState,
        filter: impl Fn(&PageId) -> bool,
    ) -> Vec<(PageId, FrameId)> {
        let mut blocks: Vec<_> = state
            .page_table
            .iter()
            .filter(|(pid, _)| filter(*pid))
            .map(|(&pid, &fid)| (pid, fid))
            .collect();
        blocks.sort_by_key(|(pid, _)| *pid);
        blocks
    }

    fn check_unlocked(state: &PoolState, blocks: &[(PageId, FrameId)]) -> Result<()> {
        match blocks
            .iter()
            .find(|(_, fid)| !state.locks[fid.index()].is_unlocked())
        {
            Some(&(page_id, _)) => Err(BasaltError::BlockLocked { page_id }),
            None => Ok(()),
        }
    }
}

impl Drop for BufferManager {
    fn drop(&mut self) {
        if let Err(e) = self.flush_all() {
            warn!("Failed to flush buffer pool on shutdown: {}", e);
        }
    }
}

/// Statistics about the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolStats {
    /// Total number of frames.
    pub total_frames: usize,
    /// Number of unfixed frames.
    pub free_frames: usize,
    /// Number of frames holding a block.
    pub used_frames: usize,
    /// Number of frames with at least one lock granted.
    pub locked_frames: usize,
    /// Number of frames changed since the last write-back.
    pub modified_frames: usize,
    /// Stamp the next fix will receive.
    pub access_counter: u64,
}

/// A fixed block.
///
/// Dropping a handle unfixes the block; failures on that path are logged.
/// Use `BufferManager::unfix_block` to observe them.
pub struct BlockHandle<'a> {
    manager: &'a BufferManager,
    frame: &'a BufferFrame,
    page_id: PageId,
    mode: LockMode,
    released: bool,
}

impl<'a> BlockHandle<'a> {
    fn new(manager: &'a BufferManager, frame_id: FrameId, page_id: PageId, mode: LockMode) -> Self {
        Self {
            manager,
            frame: &manager.frames[frame_id.index()],
            page_id,
            mode,
            released: false,
        }
    }

    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns the block number within its file.
    pub fn block_no(&self) -> u32 {
        self.page_id.page_num
    }

    /// Returns the lock mode currently held.
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Returns the block content.
    pub fn data(&self) -> parking_lot::RwLockReadGuard<'_, Box<[u8]>> {
        self.frame.read_data()
    }

    /// Returns mutable block content and marks the frame modified.
    ///
    /// Requires an exclusive lock.
    pub fn data_mut(&mut self) -> Result<parking_lot::RwLockWriteGuard<'_, Box<[u8]>>> {
        if self.mode != LockMode::Exclusive {
            return Err(BasaltError::LockConflict {
                page_id: self.page_id,
                requested: LockMode::Exclusive.to_string(),
            });
        }
        self.frame.set_modified(true);
        Ok(self.frame.write_data())
    }

    /// Marks the content invalid; it is discarded once the block is fully unfixed.
    pub fn set_dirty(&self) {
        self.frame.set_dirty(true);
    }

    /// Returns true if the content has been marked invalid.
    pub fn is_dirty(&self) -> bool {
        self.frame.is_dirty()
    }
}

impl std::fmt::Debug for BlockHandle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockHandle")
            .field("page_id", &self.page_id)
            .field("mode", &self.mode)
            .finish()
    }
}

impl Drop for BlockHandle<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self
            .manager
            .release(self.frame.frame_id(), self.page_id, self.mode)
        {
            warn!("Failed to unfix block {} on drop: {}", self.page_id, e);
        }
    }
}
