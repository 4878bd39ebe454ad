use std::fmt::Debug;

pub type FrameId = u32;

/// Eviction policy over buffer-pool frames. Only frames with no
/// outstanding pins are ever handed to it.
pub trait Replacer: Send + Sync + Debug {
    /// Select a frame to evict. Returns None if no frame is evictable.
    fn evict(&mut self) -> Option<FrameId>;

    /// Mark a frame as pinned (not evictable).
    fn pin(&mut self, frame_id: FrameId);

    /// Mark a frame as unpinned (evictable).
    fn unpin(&mut self, frame_id: FrameId);

    /// Number of evictable frames.
    fn size(&self) -> usize;
}
