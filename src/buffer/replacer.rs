use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

use super::FrameId;

/// Registry of frames currently eligible for eviction, ordered by how long
/// ago each one became eligible.
///
/// Recency is defined purely by `unpin` call order; a fetch hit does not
/// refresh anything, it only removes eligibility via `pin`. The pool calls in
/// while holding its own lock, so this type carries its own mutex and never
/// calls back into the pool.
pub struct LruReplacer {
    registry: Mutex<LruCache<FrameId, ()>>,
}

impl LruReplacer {
    pub fn new(capacity: usize) -> Self {
        Self {
            registry: Mutex::new(LruCache::new(NonZeroUsize::new(capacity.max(1)).unwrap())),
        }
    }

    /// Remove and return the least recently unpinned frame
    pub fn victim(&self) -> Option<FrameId> {
        self.registry
            .lock()
            .unwrap()
            .pop_lru()
            .map(|(frame_id, ())| frame_id)
    }

    /// Make a frame ineligible for eviction; no-op if it is not tracked
    pub fn pin(&self, frame_id: FrameId) {
        self.registry.lock().unwrap().pop(&frame_id);
    }

    /// Insert a frame as the most recently unpinned. No-op if it is already
    /// tracked (its position is kept) or the registry is at capacity.
    pub fn unpin(&self, frame_id: FrameId) {
        let mut registry = self.registry.lock().unwrap();
        if !registry.contains(&frame_id) && registry.len() < registry.cap().get() {
            registry.put(frame_id, ());
        }
    }

    /// Number of evictable frames
    pub fn size(&self) -> usize {
        self.registry.lock().unwrap().len()
    }
}
