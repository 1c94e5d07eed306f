//! Page table mapping resident pages to buffer frames.

use crate::frame::FrameId;
use kestrel_common::page::FilePageId;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Sentinel for empty key slots.
const EMPTY_KEY: u64 = u64::MAX;

/// Sentinel for deleted key slots (tombstone).
const TOMBSTONE_KEY: u64 = u64::MAX - 1;

/// Sentinel for empty value slots.
const EMPTY_FRAME: u32 = u32::MAX;

/// Open-addressing hash table from `FilePageId` to `FrameId`.
///
/// Keys are the packed u64 form of the page identity; linear probing with
/// tombstones keeps removals cheap. Atomic slots allow lock-free lookups.
pub struct PageTable {
    /// Packed page identities.
    keys: Box<[AtomicU64]>,
    /// Frame ids, parallel to `keys`.
    values: Box<[AtomicU32]>,
    /// Bitmask for table indexing (table size - 1).
    mask: usize,
}

impl PageTable {
    /// Creates a page table sized for the given number of frames.
    pub fn new(capacity: usize) -> Self {
        // Next power of two at 2x capacity keeps the load factor near 50%.
        let size = (capacity * 2).next_power_of_two().max(64);

        let keys: Box<[AtomicU64]> = (0..size).map(|_| AtomicU64::new(EMPTY_KEY)).collect();
        let values: Box<[AtomicU32]> = (0..size).map(|_| AtomicU32::new(EMPTY_FRAME)).collect();

        Self {
            keys,
            values,
            mask: size - 1,
        }
    }

    #[inline(always)]
    fn slot_of(&self, key: u64) -> usize {
        // Fibonacci-style multiplicative hash for distribution.
        let hash = key.wrapping_mul(0x9e37_79b9_7f4a_7c15);
        (hash as usize) & self.mask
    }

    /// Looks up a page and returns its frame if resident.
    pub fn get(&self, id: FilePageId) -> Option<FrameId> {
        let key = id.as_u64();
        let mut idx = self.slot_of(key);

        for _ in 0..self.keys.len() {
            let stored = self.keys[idx].load(Ordering::Acquire);
            if stored == EMPTY_KEY {
                return None;
            }
            if stored == key {
                return Some(FrameId(self.values[idx].load(Ordering::Acquire)));
            }
            idx = (idx + 1) & self.mask;
        }
        None
    }

    /// Inserts or updates a mapping. Returns false if the table is full.
    pub fn insert(&self, id: FilePageId, frame_id: FrameId) -> bool {
        let key = id.as_u64();
        let mut idx = self.slot_of(key);

        for _ in 0..self.keys.len() {
            let stored = self.keys[idx].load(Ordering::Acquire);
            if stored == EMPTY_KEY || stored == TOMBSTONE_KEY {
                self.values[idx].store(frame_id.0, Ordering::Release);
                self.keys[idx].store(key, Ordering::Release);
                return true;
            }
            if stored == key {
                self.values[idx].store(frame_id.0, Ordering::Release);
                return true;
            }
            idx = (idx + 1) & self.mask;
        }
        false
    }

    /// Removes a mapping. Returns the frame id if it was present.
    pub fn remove(&self, id: FilePageId) -> Option<FrameId> {
        let key = id.as_u64();
        let mut idx = self.slot_of(key);

        for _ in 0..self.keys.len() {
            let stored = self.keys[idx].load(Ordering::Acquire);
            if stored == EMPTY_KEY {
                return None;
            }
            if stored == key {
                let frame_id = self.values[idx].load(Ordering::Acquire);
                self.keys[idx].store(TOMBSTONE_KEY, Ordering::Release);
                return Some(FrameId(frame_id));
            }
            idx = (idx + 1) & self.mask;
        }
        None
    }

    /// Returns true if the page is resident.
    pub fn contains(&self, id: FilePageId) -> bool {
        self.get(id).is_some()
    }

    /// Returns the number of resident pages.
    pub fn len(&self) -> usize {
        self.keys
            .iter()
            .filter(|slot| {
                let key = slot.load(Ordering::Relaxed);
                key != EMPTY_KEY && key != TOMBSTONE_KEY
            })
            .count()
    }

    /// Returns true if no pages are resident.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Calls `f` for each resident page. Stops early if `f` returns false.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(FilePageId, FrameId) -> bool,
    {
        for (idx, slot) in self.keys.iter().enumerate() {
            let key = slot.load(Ordering::Relaxed);
            if key != EMPTY_KEY && key != TOMBSTONE_KEY {
                let frame_id = FrameId(self.values[idx].load(Ordering::Relaxed));
                if !f(FilePageId::from_u64(key), frame_id) {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get() {
        let table = PageTable::new(16);
        let id = FilePageId::new(1, 42);

        assert!(table.insert(id, FrameId(7)));
        assert_eq!(table.get(id), Some(FrameId(7)));
        assert!(table.contains(id));
    }

    #[test]
    fn test_get_missing() {
        let table = PageTable::new(16);
        assert_eq!(table.get(FilePageId::new(1, 1)), None);
    }

    #[test]
    fn test_remove() {
        let table = PageTable::new(16);
        let id = FilePageId::new(1, 42);

        table.insert(id, FrameId(7));
        assert_eq!(table.remove(id), Some(FrameId(7)));
        assert_eq!(table.get(id), None);
        assert_eq!(table.remove(id), None);
    }

    #[test]
    fn test_reinsert_after_remove() {
        let table = PageTable::new(16);
        let id = FilePageId::new(2, 9);

        table.insert(id, FrameId(1));
        table.remove(id);
        assert!(table.insert(id, FrameId(3)));
        assert_eq!(table.get(id), Some(FrameId(3)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_update_existing() {
        let table = PageTable::new(16);
        let id = FilePageId::new(1, 5);

        table.insert(id, FrameId(1));
        table.insert(id, FrameId(2));
        assert_eq!(table.get(id), Some(FrameId(2)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_len_across_files() {
        let table = PageTable::new(16);

        assert!(table.is_empty());
        table.insert(FilePageId::new(1, 1), FrameId(0));
        table.insert(FilePageId::new(1, 2), FrameId(1));
        table.insert(FilePageId::new(2, 1), FrameId(2));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_for_each() {
        let table = PageTable::new(16);
        table.insert(FilePageId::new(1, 1), FrameId(0));
        table.insert(FilePageId::new(1, 2), FrameId(1));

        let mut seen = Vec::new();
        table.for_each(|id, _| {
            seen.push(id);
            true
        });
        seen.sort_by_key(|id| id.as_u64());
        assert_eq!(seen, vec![FilePageId::new(1, 1), FilePageId::new(1, 2)]);
    }

    #[test]
    fn test_many_entries_probe_chains() {
        let table = PageTable::new(64);
        for page_no in 1..=100u32 {
            assert!(table.insert(FilePageId::new(3, page_no), FrameId(page_no)));
        }
        for page_no in 1..=100u32 {
            assert_eq!(
                table.get(FilePageId::new(3, page_no)),
                Some(FrameId(page_no))
            );
        }
        assert_eq!(table.len(), 100);
    }
}
