//! Page replacement policy for the buffer pool.

use crate::frame::FrameId;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

/// Trait for page replacement algorithms.
///
/// Eviction takes a predicate so the pool can reject frames that are still
/// pinned without the replacer tracking pin counts itself.
pub trait Replacer: Send + Sync {
    /// Records that the given frame was accessed.
    fn record_access(&self, frame_id: FrameId);

    /// Registers a frame as an eviction candidate.
    fn add_candidate(&self, frame_id: FrameId);

    /// Selects a victim among candidates for which `can_evict` holds.
    fn evict(&self, can_evict: &dyn Fn(FrameId) -> bool) -> Option<FrameId>;

    /// Removes a frame from consideration.
    fn remove(&self, frame_id: FrameId);
}

/// Clock replacement algorithm.
///
/// Reference bits are atomic so access recording never takes the lock; the
/// candidate set and clock hand live behind a mutex.
pub struct ClockReplacer {
    /// Number of frames.
    num_frames: usize,
    /// Reference bits, one per frame.
    reference_bits: Vec<AtomicBool>,
    /// Candidate set and clock hand.
    inner: Mutex<ClockInner>,
}

struct ClockInner {
    candidates: HashSet<FrameId>,
    hand: usize,
}

impl ClockReplacer {
    /// Creates a clock replacer for the given number of frames.
    pub fn new(num_frames: usize) -> Self {
        Self {
            num_frames,
            reference_bits: (0..num_frames).map(|_| AtomicBool::new(false)).collect(),
            inner: Mutex::new(ClockInner {
                candidates: HashSet::new(),
                hand: 0,
            }),
        }
    }

    /// Returns the number of eviction candidates.
    pub fn candidate_count(&self) -> usize {
        self.inner.lock().candidates.len()
    }
}

impl Replacer for ClockReplacer {
    #[inline]
    fn record_access(&self, frame_id: FrameId) {
        if let Some(bit) = self.reference_bits.get(frame_id.0 as usize) {
            bit.store(true, Ordering::Relaxed);
        }
    }

    fn add_candidate(&self, frame_id: FrameId) {
        if (frame_id.0 as usize) < self.num_frames {
            self.inner.lock().candidates.insert(frame_id);
        }
    }

    fn evict(&self, can_evict: &dyn Fn(FrameId) -> bool) -> Option<FrameId> {
        let mut inner = self.inner.lock();
        if inner.candidates.is_empty() {
            return None;
        }

        // Two full sweeps: the first clears reference bits, the second must
        // then find any candidate whose bit is clear.
        for _ in 0..(2 * self.num_frames) {
            let hand = inner.hand;
            inner.hand = (hand + 1) % self.num_frames;

            let frame_id = FrameId(hand as u32);
            if !inner.candidates.contains(&frame_id) || !can_evict(frame_id) {
                continue;
            }
            if self.reference_bits[hand].load(Ordering::Relaxed) {
                self.reference_bits[hand].store(false, Ordering::Relaxed);
                continue;
            }
            inner.candidates.remove(&frame_id);
            return Some(frame_id);
        }

        // Every candidate kept its reference bit set across both sweeps,
        // which means none passed can_evict.
        None
    }

    fn remove(&self, frame_id: FrameId) {
        let idx = frame_id.0 as usize;
        if idx < self.num_frames {
            self.inner.lock().candidates.remove(&frame_id);
            self.reference_bits[idx].store(false, Ordering::Relaxed);
        }
    }
}
