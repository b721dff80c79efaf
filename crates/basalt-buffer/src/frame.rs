//! Buffer frames and page lock modes.

use basalt_common::page::PageId;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Sentinel value indicating no page is loaded in the frame.
const NO_PAGE: u64 = u64::MAX;

/// Unique identifier for a frame in the buffer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(pub u32);

impl FrameId {
    /// Invalid frame ID.
    pub const INVALID: FrameId = FrameId(u32::MAX);

    /// Returns true if this is a valid frame ID.
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }

    #[inline]
    pub(crate) fn index(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "frame:{}", self.0)
    }
}

/// Lock mode requested when fixing a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Read-only access; any number of holders.
    Shared,
    /// Read access that may later be upgraded to exclusive; one holder,
    /// compatible with shared readers.
    IntentWrite,
    /// Sole writer.
    Exclusive,
}

impl std::fmt::Display for LockMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LockMode::Shared => "SHARED",
            LockMode::IntentWrite => "INTWRITE",
            LockMode::Exclusive => "EXCLUSIVE",
        };
        write!(f, "{}", name)
    }
}

/// Locks currently granted on one frame.
///
/// Compatibility: shared over none/shared/intent-write, intent-write over
/// none/shared, exclusive over none.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockState {
    shared: u32,
    intent_write: bool,
    exclusive: bool,
}

impl LockState {
    /// Returns true if no lock is granted.
    pub fn is_unlocked(&self) -> bool {
        self.shared == 0 && !self.intent_write && !self.exclusive
    }

    /// Returns the number of holders.
    pub fn holders(&self) -> u32 {
        self.shared + self.intent_write as u32 + self.exclusive as u32
    }

    /// Returns true if `mode` can be granted on top of the current locks.
    pub fn can_grant(&self, mode: LockMode) -> bool {
        match mode {
            LockMode::Shared => !self.exclusive,
            LockMode::IntentWrite => !self.exclusive && !self.intent_write,
            LockMode::Exclusive => self.is_unlocked(),
        }
    }

    /// Grants `mode` if compatible. Returns false without changing state otherwise.
    pub fn grant(&mut self, mode: LockMode) -> bool {
        if !self.can_grant(mode) {
            return false;
        }
        match mode {
            LockMode::Shared => self.shared += 1,
            LockMode::IntentWrite => self.intent_write = true,
            LockMode::Exclusive => self.exclusive = true,
        }
        true
    }

    /// Releases one lock of `mode`.
    pub fn release(&mut self, mode: LockMode) {
        match mode {
            LockMode::Shared => self.shared = self.shared.saturating_sub(1),
            LockMode::IntentWrite => self.intent_write = false,
            LockMode::Exclusive => self.exclusive = false,
        }
    }

    /// Upgrades a lock held in `from` to exclusive.
    ///
    /// Succeeds only if the caller is the sole holder.
    pub fn upgrade(&mut self, from: LockMode) -> bool {
        let sole_holder = match from {
            LockMode::Shared => self.shared == 1 && !self.intent_write && !self.exclusive,
            LockMode::IntentWrite => self.intent_write && self.shared == 0 && !self.exclusive,
            LockMode::Exclusive => return self.exclusive,
        };
        if !sole_holder {
            return false;
        }
        self.release(from);
        self.exclusive = true;
        true
    }
}

/// A frame in the buffer pool holding a single page.
///
/// Lock state is owned by the buffer manager; the frame carries the page
/// identity, content, and content flags.
pub struct BufferFrame {
    /// Frame identifier.
    frame_id: FrameId,
    /// The page currently stored in this frame (packed as u64, NO_PAGE = none).
    page_id: AtomicU64,
    /// Page data buffer.
    data: RwLock<Box<[u8]>>,
    /// Content is invalid and must be discarded instead of written back.
    is_dirty: AtomicBool,
    /// Content changed since it was read or last written.
    is_modified: AtomicBool,
}

impl BufferFrame {
    /// Creates a new empty buffer frame of `page_size` bytes.
    pub fn new(frame_id: FrameId, page_size: usize) -> Self {
        Self {
            frame_id,
            page_id: AtomicU64::new(NO_PAGE),
            data: RwLock::new(vec![0u8; page_size].into_boxed_slice()),
            is_dirty: AtomicBool::new(false),
            is_modified: AtomicBool::new(false),
        }
    }

    /// Returns the frame ID.
    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Returns the page ID currently stored in this frame.
    #[inline]
    pub fn page_id(&self) -> Option<PageId> {
        let packed = self.page_id.load(Ordering::Acquire);
        if packed == NO_PAGE {
            None
        } else {
            Some(PageId::from_u64(packed))
        }
    }

    /// Sets the page ID for this frame.
    #[inline]
    pub fn set_page_id(&self, page_id: Option<PageId>) {
        let packed = page_id.map(|pid| pid.as_u64()).unwrap_or(NO_PAGE);
        self.page_id.store(packed, Ordering::Release);
    }

    /// Returns true if this frame holds no page.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.page_id.load(Ordering::Acquire) == NO_PAGE
    }

    /// Returns true if the content has been invalidated.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    /// Marks the content as invalidated (or valid again).
    #[inline]
    pub fn set_dirty(&self, dirty: bool) {
        self.is_dirty.store(dirty, Ordering::Release);
    }

    /// Returns true if the content differs from what storage last saw.
    #[inline]
    pub fn is_modified(&self) -> bool {
        self.is_modified.load(Ordering::Acquire)
    }

    /// Sets the modified flag.
    #[inline]
    pub fn set_modified(&self, modified: bool) {
        self.is_modified.store(modified, Ordering::Release);
    }

    /// Returns the page size of this frame.
    pub fn page_size(&self) -> usize {
        self.data.read().len()
    }

    /// Reads the page data.
    #[inline]
    pub fn read_data(&self) -> parking_lot::RwLockReadGuard<'_, Box<[u8]>> {
        self.data.read()
    }

    /// Writes to the page data.
    #[inline]
    pub fn write_data(&self) -> parking_lot::RwLockWriteGuard<'_, Box<[u8]>> {
        self.data.write()
    }

    /// Resets the frame to the empty state.
    pub fn reset(&self) {
        self.page_id.store(NO_PAGE, Ordering::Release);
        self.is_dirty.store(false, Ordering::Release);
        self.is_modified.store(false, Ordering::Release);
        self.data.write().fill(0);
    }
}

impl std::fmt::Debug for BufferFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferFrame")
            .field("frame_id", &self.frame_id)
            .field("page_id", &self.page_id())
            .field("is_dirty", &self.is_dirty())
            .field("is_modified", &self.is_modified())
            .finish()
    }
}
