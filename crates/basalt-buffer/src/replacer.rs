//! Page replacement policies for the buffer pool.

use crate::frame::FrameId;
use parking_lot::Mutex;

/// Trait for page replacement algorithms.
pub trait Replacer: Send + Sync {
    /// Records that the given frame was fixed.
    fn record_access(&self, frame_id: FrameId);

    /// Marks a frame as evictable (unfixed) or not.
    fn set_evictable(&self, frame_id: FrameId, evictable: bool);

    /// Selects a victim frame for eviction.
    ///
    /// Returns None if no frames are evictable.
    fn evict(&self) -> Option<FrameId>;

    /// Forgets the access history of a frame and marks it non-evictable.
    fn remove(&self, frame_id: FrameId);

    /// Returns the number of evictable frames.
    fn size(&self) -> usize;

    /// Returns the value the next recorded access will be stamped with.
    fn access_counter(&self) -> u64;
}

/// One bit per frame; a set bit means the frame is unfixed.
#[derive(Debug, Clone)]
pub struct FreeBitmap {
    words: Vec<u64>,
    len: usize,
}

impl FreeBitmap {
    /// Creates a bitmap of `len` bits, all clear.
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(64)],
            len,
        }
    }

    /// Number of bits.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn get(&self, idx: usize) -> bool {
        idx < self.len && self.words[idx / 64] & (1 << (idx % 64)) != 0
    }

    #[inline]
    pub fn set(&mut self, idx: usize) {
        if idx < self.len {
            self.words[idx / 64] |= 1 << (idx % 64);
        }
    }

    #[inline]
    pub fn clear(&mut self, idx: usize) {
        if idx < self.len {
            self.words[idx / 64] &= !(1 << (idx % 64));
        }
    }

    /// Number of set bits.
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Iterates the indices of set bits in ascending order.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).filter(move |&i| self.get(i))
    }
}

/// Least-recently-fixed replacement driven by per-frame recency stamps.
///
/// Every access stamps the frame with the global counter and advances it.
/// The victim is the unfixed frame with the smallest stamp, ties going to
/// the lower frame id. A stamp of 0 ends the scan early since nothing can be
/// older. When the counter reaches `u32::MAX` all stamps and the counter are
/// reset to 0; the reset happens under the same mutex as every other update.
pub struct LruReplacer {
    inner: Mutex<LruReplacerInner>,
}

struct LruReplacerInner {
    free: FreeBitmap,
    stamps: Vec<u32>,
    counter: u32,
}

impl LruReplacer {
    /// Creates a replacer for `num_frames` frames, all of them free.
    pub fn new(num_frames: usize) -> Self {
        Self::with_counter(num_frames, 1)
    }

    /// Creates a replacer whose global counter starts at `counter`.
    ///
    /// Used to drive the counter to its wrap point without billions of fixes.
    pub fn with_counter(num_frames: usize, counter: u32) -> Self {
        let mut free = FreeBitmap::new(num_frames);
        for i in 0..num_frames {
            free.set(i);
        }
        Self {
            inner: Mutex::new(LruReplacerInner {
                free,
                stamps: vec![0; num_frames],
                counter,
            }),
        }
    }

    /// Returns the total capacity.
    pub fn capacity(&self) -> usize {
        self.inner.lock().stamps.len()
    }

    /// Returns the recency stamp of a frame.
    pub fn stamp(&self, frame_id: FrameId) -> Option<u32> {
        self.inner.lock().stamps.get(frame_id.index()).copied()
    }

    /// Returns true if the frame is marked free.
    pub fn is_evictable(&self, frame_id: FrameId) -> bool {
        self.inner.lock().free.get(frame_id.index())
    }
}

impl Replacer for LruReplacer {
    fn record_access(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        let idx = frame_id.index();
        if idx >= inner.stamps.len() {
            return;
        }

        inner.stamps[idx] = inner.counter;
        inner.counter += 1;
        if inner.counter == u32::MAX {
            log::debug!("Recency counter wrapped, resetting {} stamps", inner.stamps.len());
            inner.stamps.fill(0);
            inner.counter = 0;
        }
    }

    fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        let mut inner = self.inner.lock();
        if evictable {
            inner.free.set(frame_id.index());
        } else {
            inner.free.clear(frame_id.index());
        }
    }

    fn evict(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock();

        let mut victim: Option<(usize, u32)> = None;
        for idx in inner.free.iter_ones() {
            let stamp = inner.stamps[idx];
            let older = match victim {
                Some((_, min)) => stamp < min,
                None => true,
            };
            if older {
                victim = Some((idx, stamp));
                if stamp == 0 {
                    break;
                }
            }
        }

        let (idx, _) = victim?;
        inner.free.clear(idx);
        Some(FrameId(idx as u32))
    }

    fn remove(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        let idx = frame_id.index();
        if idx < inner.stamps.len() {
            inner.free.clear(idx);
            inner.stamps[idx] = 0;
        }
    }

    fn size(&self) -> usize {
        self.inner.lock().free.count_ones()
    }

    fn access_counter(&self) -> u64 {
        self.inner.lock().counter as u64
    }
}
