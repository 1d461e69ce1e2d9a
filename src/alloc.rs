//! Free-segment bookkeeping via a multi-level bit tree.
//!
//! Level 0 is one bit per segment (1 = allocated). Each level above holds
//! one bit per 64 bits of the level below, set once every bit in that group
//! of 64 is allocated. Finding a free segment is then a descent from the
//! top level picking the first zero bit at each level instead of a linear
//! scan of the whole bitmap; freeing a segment does the mirror-image
//! bubble-down of the "full" bit. Depth grows with `max_segments` and stops
//! once a level fits in a single `u64` word.

use std::sync::Mutex;

use crate::config::SegmentId;

struct Inner {
    /// `levels[0]` is the leaf bitmap; `levels[levels.len() - 1]` is the
    /// top, always exactly one word.
    levels: Vec<Vec<u64>>,
    used_segments: u64,
}

pub struct SegmentAllocator {
    inner: Mutex<Inner>,
    max_segments: u64,
}

fn level_sizes(max_segments: u64) -> Vec<usize> {
    let mut sizes = Vec::new();
    let mut n = max_segments.max(1);
    loop {
        let words = ((n + 63) / 64) as usize;
        sizes.push(words.max(1));
        if words <= 1 {
            break;
        }
        n = words as u64;
    }
    sizes
}

/// Sets the bit for `child_word_idx` at `levels[child_level + 1]`, and keeps
/// climbing while the word it just touched became entirely ones.
fn mark_full_upward(levels: &mut [Vec<u64>], mut child_level: usize, mut child_word_idx: usize) {
    loop {
        if child_level + 1 >= levels.len() {
            break;
        }
        let parent_level = child_level + 1;
        let parent_word_idx = child_word_idx / 64;
        let parent_bit = (child_word_idx % 64) as u32;
        levels[parent_level][parent_word_idx] |= 1u64 << parent_bit;
        if levels[parent_level][parent_word_idx] != u64::MAX {
            break;
        }
        child_level = parent_level;
        child_word_idx = parent_word_idx;
    }
}

impl Inner {
    fn find_first_free(&self) -> Option<u64> {
        let top = self.levels.len() - 1;
        let mut index: u64 = 0;
        for level in (0..=top).rev() {
            let word = self.levels[level][index as usize];
            if word == u64::MAX {
                return None;
            }
            let bit = (!word).trailing_zeros() as u64;
            index = index * 64 + bit;
        }
        Some(index)
    }

    fn allocate_id_locked(&mut self, id: u64) -> bool {
        let word_idx = (id / 64) as usize;
        let bit = (id % 64) as u32;
        if self.levels[0][word_idx] & (1u64 << bit) != 0 {
            return false;
        }
        self.levels[0][word_idx] |= 1u64 << bit;
        if self.levels[0][word_idx] == u64::MAX {
            mark_full_upward(&mut self.levels, 0, word_idx);
        }
        self.used_segments += 1;
        true
    }

    fn free_id_locked(&mut self, id: u64) -> bool {
        let word_idx = (id / 64) as usize;
        let bit = (id % 64) as u32;
        if self.levels[0][word_idx] & (1u64 << bit) == 0 {
            return false;
        }
        let mut propagate = self.levels[0][word_idx] == u64::MAX;
        self.levels[0][word_idx] &= !(1u64 << bit);
        let mut child_word_idx = word_idx;
        for level in 1..self.levels.len() {
            if !propagate {
                break;
            }
            let parent_word_idx = child_word_idx / 64;
            let parent_bit = (child_word_idx % 64) as u32;
            let parent_word = self.levels[level][parent_word_idx];
            let parent_was_full = parent_word == u64::MAX;
            self.levels[level][parent_word_idx] = parent_word & !(1u64 << parent_bit);
            propagate = parent_was_full;
            child_word_idx = parent_word_idx;
        }
        self.used_segments -= 1;
        true
    }

    fn is_free_locked(&self, id: u64) -> bool {
        let word_idx = (id / 64) as usize;
        let bit = (id % 64) as u32;
        self.levels[0][word_idx] & (1u64 << bit) == 0
    }
}

impl SegmentAllocator {
    pub fn new(max_segments: u64) -> Self {
        let sizes = level_sizes(max_segments);
        let mut levels: Vec<Vec<u64>> = sizes.into_iter().map(|n| vec![0u64; n]).collect();

        // Mark padding bits past max_segments as permanently allocated so
        // find_first_free never returns an out-of-range id.
        let total_leaf_bits = levels[0].len() as u64 * 64;
        for id in max_segments..total_leaf_bits {
            let word_idx = (id / 64) as usize;
            let bit = (id % 64) as u32;
            levels[0][word_idx] |= 1u64 << bit;
        }
        for word_idx in 0..levels[0].len() {
            if levels[0][word_idx] == u64::MAX {
                mark_full_upward(&mut levels, 0, word_idx);
            }
        }

        Self {
            inner: Mutex::new(Inner {
                levels,
                used_segments: 0,
            }),
            max_segments,
        }
    }

    /// Allocates `count` free segments, all or nothing: if fewer than
    /// `count` are available the segments found so far are put back before
    /// returning `None`.
    pub fn allocate(&self, count: usize) -> Option<Vec<SegmentId>> {
        let mut inner = self.inner.lock().expect("allocator mutex poisoned");
        let mut allocated = Vec::with_capacity(count);
        for _ in 0..count {
            match inner.find_first_free() {
                Some(id) => {
                    inner.allocate_id_locked(id);
                    allocated.push(id as SegmentId);
                }
                None => {
                    for id in &allocated {
                        inner.free_id_locked(*id as u64);
                    }
                    return None;
                }
            }
        }
        Some(allocated)
    }

    /// Frees every id in `ids`. Returns `true` only if every id was
    /// actually allocated beforehand; ids that were already free are
    /// skipped (and cause a `false` return) rather than causing a panic.
    pub fn free(&self, ids: &[SegmentId]) -> bool {
        let mut inner = self.inner.lock().expect("allocator mutex poisoned");
        let mut all_ok = true;
        for &id in ids {
            if !inner.free_id_locked(id as u64) {
                all_ok = false;
            }
        }
        all_ok
    }

    /// Marks a single segment id allocated without searching for it.
    /// Returns `false` if it was already allocated. Used only by restore,
    /// before any disk I/O thread exists to contend on the lock.
    pub fn allocate_id(&self, id: SegmentId) -> bool {
        let mut inner = self.inner.lock().expect("allocator mutex poisoned");
        inner.allocate_id_locked(id as u64)
    }

    pub fn is_free(&self, id: SegmentId) -> bool {
        let inner = self.inner.lock().expect("allocator mutex poisoned");
        inner.is_free_locked(id as u64)
    }

    pub fn max_segments(&self) -> u64 {
        self.max_segments
    }

    pub fn used_segments(&self) -> u64 {
        self.inner.lock().expect("allocator mutex poisoned").used_segments
    }

    pub fn free_segments(&self) -> u64 {
        self.max_segments - self.used_segments()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_then_free_round_trips() {
        let a = SegmentAllocator::new(200);
        let ids = a.allocate(5).unwrap();
        assert_eq!(ids.len(), 5);
        assert_eq!(a.used_segments(), 5);
        assert!(a.free(&ids));
        assert_eq!(a.used_segments(), 0);
        for id in ids {
            assert!(a.is_free(id));
        }
    }

    #[test]
    fn exhausts_and_rolls_back_on_partial_failure() {
        let a = SegmentAllocator::new(10);
        let first = a.allocate(10).unwrap();
        assert_eq!(first.len(), 10);
        assert!(a.allocate(1).is_none());
        assert_eq!(a.used_segments(), 10);

        // rollback must not have corrupted bookkeeping
        assert!(a.free(&first[0..1]));
        assert_eq!(a.used_segments(), 9);
        let second = a.allocate(1).unwrap();
        assert_eq!(second, first[0..1]);
    }

    #[test]
    fn partial_allocation_rollback_restores_state() {
        let a = SegmentAllocator::new(8);
        let first = a.allocate(8).unwrap();
        assert!(a.free(&first));
        // now request more than available to exercise the rollback path
        assert!(a.allocate(9).is_none());
        assert_eq!(a.used_segments(), 0);
        assert_eq!(a.allocate(8).unwrap().len(), 8);
    }

    #[test]
    fn allocate_id_rejects_duplicate_and_updates_count() {
        let a = SegmentAllocator::new(128);
        assert!(a.allocate_id(5));
        assert!(!a.is_free(5));
        assert!(!a.allocate_id(5));
        assert_eq!(a.used_segments(), 1);
    }

    #[test]
    fn crosses_multiple_leaf_words() {
        let a = SegmentAllocator::new(5000);
        let ids = a.allocate(200).unwrap();
        assert_eq!(ids.len(), 200);
        let mut sorted = ids.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), 200, "allocator must never hand out duplicates");
        assert!(a.free(&ids));
        assert_eq!(a.used_segments(), 0);
    }
}
