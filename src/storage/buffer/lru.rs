use super::replacer::{FrameId, Replacer};
use std::collections::{HashSet, VecDeque};

/// Least-recently-used replacement: the frame unpinned longest ago is
/// evicted first.
#[derive(Debug, Default)]
pub struct LruReplacer {
    /// Evictable frames, least recently used at the front.
    queue: VecDeque<FrameId>,
    /// Membership set mirroring `queue`, for O(1) lookups.
    members: HashSet<FrameId>,
}

impl LruReplacer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Replacer for LruReplacer {
    fn evict(&mut self) -> Option<FrameId> {
        let frame_id = self.queue.pop_front()?;
        self.members.remove(&frame_id);
        Some(frame_id)
    }

    fn pin(&mut self, frame_id: FrameId) {
        if self.members.remove(&frame_id) {
            self.queue.retain(|&f| f != frame_id);
        }
    }

    fn unpin(&mut self, frame_id: FrameId) {
        if self.members.insert(frame_id) {
            self.queue.push_back(frame_id);
        }
    }

    fn size(&self) -> usize {
        self.queue.len()
    }
}
