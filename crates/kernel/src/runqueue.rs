//! Priority-bucketed thread queue shared by the ready queue and wait queues.

use alloc::collections::VecDeque;

use crate::thread::{Priority, ThreadId, NUM_PRIORITIES};

/// 32-level FIFO-per-level queue with an occupancy bitmap.
///
/// The bitmap tracks which levels are non-empty, so the highest occupied
/// level is found with a single `leading_zeros`.
pub(crate) struct PrioQueue {
    bitmap: u32,
    levels: [VecDeque<ThreadId>; NUM_PRIORITIES],
    len: usize,
}

impl Default for PrioQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PrioQueue {
    pub fn new() -> Self {
        Self {
            bitmap: 0,
            levels: core::array::from_fn(|_| VecDeque::new()),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends `id` behind every thread already queued at `prio`.
    pub fn push_back(&mut self, id: ThreadId, prio: Priority) {
        let level = prio.index();
        self.levels[level].push_back(id);
        self.bitmap |= 1 << level;
        self.len += 1;
    }

    /// Inserts `id` ahead of every thread already queued at `prio`.
    pub fn push_front(&mut self, id: ThreadId, prio: Priority) {
        let level = prio.index();
        self.levels[level].push_front(id);
        self.bitmap |= 1 << level;
        self.len += 1;
    }

    /// Highest occupied level.
    pub fn max_priority(&self) -> Option<Priority> {
        if self.bitmap == 0 {
            None
        } else {
            Some(Priority(31 - self.bitmap.leading_zeros() as u8))
        }
    }

    /// Removes and returns the oldest thread at the highest occupied level.
    pub fn pop(&mut self) -> Option<ThreadId> {
        let level = self.max_priority()?.index();
        let id = self.levels[level].pop_front()?;
        self.settle(level);
        Some(id)
    }

    /// Removes `id` from the `prio` level. Returns false if it was not there.
    pub fn remove(&mut self, id: ThreadId, prio: Priority) -> bool {
        let level = prio.index();
        let Some(pos) = self.levels[level].iter().position(|&queued| queued == id) else {
            return false;
        };
        self.levels[level].remove(pos);
        self.settle(level);
        true
    }

    pub fn contains(&self, id: ThreadId) -> bool {
        self.iter().any(|queued| queued == id)
    }

    /// Iterates in dispatch order: highest level first, FIFO within a level.
    pub fn iter(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.levels.iter().rev().flat_map(|level| level.iter().copied())
    }

    fn settle(&mut self, level: usize) {
        self.len -= 1;
        if self.levels[level].is_empty() {
            self.bitmap &= !(1 << level);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    fn ids(queue: &PrioQueue) -> Vec<u32> {
        queue.iter().map(|id| id.0).collect()
    }

    #[test]
    fn pops_highest_priority_first() {
        let mut queue = PrioQueue::new();
        queue.push_back(ThreadId(1), Priority(5));
        queue.push_back(ThreadId(2), Priority(5));
        queue.push_back(ThreadId(3), Priority(10));

        assert_eq!(queue.max_priority(), Some(Priority(10)));
        assert_eq!(queue.pop(), Some(ThreadId(3)));
        assert_eq!(queue.pop(), Some(ThreadId(1)));
        assert_eq!(queue.pop(), Some(ThreadId(2)));
        assert_eq!(queue.pop(), None);
        assert!(queue.is_empty());
        assert_eq!(queue.max_priority(), None);
    }

    #[test]
    fn push_front_jumps_its_level_only() {
        let mut queue = PrioQueue::new();
        queue.push_back(ThreadId(1), Priority(8));
        queue.push_back(ThreadId(2), Priority(16));
        queue.push_front(ThreadId(3), Priority(8));

        assert_eq!(ids(&queue), [2, 3, 1]);
    }

    #[test]
    fn remove_clears_empty_levels() {
        let mut queue = PrioQueue::new();
        queue.push_back(ThreadId(1), Priority(31));
        queue.push_back(ThreadId(2), Priority(0));

        assert!(!queue.remove(ThreadId(1), Priority(0)));
        assert!(queue.remove(ThreadId(1), Priority(31)));
        assert_eq!(queue.max_priority(), Some(Priority(0)));
        assert_eq!(queue.len(), 1);
        assert!(queue.contains(ThreadId(2)));
        assert!(!queue.contains(ThreadId(1)));
    }
}
