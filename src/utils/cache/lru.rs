use std::collections::{HashSet, VecDeque};

use parking_lot::Mutex;

use crate::buffer::FrameId;
use crate::utils::cache::Replacer;

#[derive(Debug, Default)]
struct LruState {
    // MRU at the front, LRU at the back.
    queue: VecDeque<FrameId>,
    members: HashSet<FrameId>,
}

/// Bounded LRU over unpinned frame ids.
#[derive(Debug)]
pub struct LruReplacer {
    capacity: usize,
    state: Mutex<LruState>,
}

impl LruReplacer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(LruState::default()),
        }
    }
}

impl Replacer for LruReplacer {
    fn unpin(&self, frame_id: FrameId) {
        let mut state = self.state.lock();
        if !state.members.contains(&frame_id) && state.members.len() < self.capacity {
            state.queue.push_front(frame_id);
            state.members.insert(frame_id);
        }
    }

    fn pin(&self, frame_id: FrameId) {
        let mut state = self.state.lock();
        if state.members.remove(&frame_id) {
            state.queue.retain(|f| *f != frame_id);
        }
    }

    fn victim(&self) -> Option<FrameId> {
        let mut state = self.state.lock();
        let frame_id = state.queue.pop_back()?;
        state.members.remove(&frame_id);
        Some(frame_id)
    }

    fn size(&self) -> usize {
        self.state.lock().members.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn test_lru_victim_order() {
        let replacer = LruReplacer::new(7);
        replacer.unpin(1);
        replacer.unpin(2);
        replacer.unpin(3);
        replacer.unpin(4);
        replacer.unpin(5);
        replacer.unpin(6);
        assert_eq!(replacer.size(), 6);

        assert_eq!(replacer.victim(), Some(1));
        assert_eq!(replacer.victim(), Some(2));
        assert_eq!(replacer.victim(), Some(3));

        replacer.pin(4);
        assert_eq!(replacer.size(), 2);

        replacer.unpin(4);
        assert_eq!(replacer.victim(), Some(5));
        assert_eq!(replacer.victim(), Some(6));
        assert_eq!(replacer.victim(), Some(4));
        assert_eq!(replacer.victim(), None);
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    pub fn test_lru_duplicate_unpin() {
        let replacer = LruReplacer::new(3);
        replacer.unpin(1);
        replacer.unpin(1);
        replacer.unpin(1);
        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.victim(), Some(1));
        assert_eq!(replacer.victim(), None);
    }

    #[test]
    pub fn test_lru_capacity_bound() {
        let replacer = LruReplacer::new(2);
        replacer.unpin(1);
        replacer.unpin(2);
        // Over capacity: dropped on the floor.
        replacer.unpin(3);
        assert_eq!(replacer.size(), 2);
        assert_eq!(replacer.victim(), Some(1));
        assert_eq!(replacer.victim(), Some(2));
        assert_eq!(replacer.victim(), None);
    }

    #[test]
    pub fn test_lru_pin_absent_frame() {
        let replacer = LruReplacer::new(2);
        replacer.pin(9);
        assert_eq!(replacer.size(), 0);
        replacer.unpin(1);
        replacer.pin(9);
        assert_eq!(replacer.size(), 1);
    }
}
