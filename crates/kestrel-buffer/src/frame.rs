//! Buffer frame management.

use kestrel_common::page::{FilePageId, PAGE_SIZE};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// Sentinel value indicating no page is resident in the frame.
const NO_RESIDENT: u64 = u64::MAX;

/// Unique identifier for a frame in the buffer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(pub u32);

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "frame:{}", self.0)
    }
}

/// A frame in the buffer pool holding a single page.
///
/// Each frame carries the page bytes plus the bookkeeping the pool needs:
/// the identity of the resident page, a pin count, a dirty flag, and a
/// reference bit for the clock replacement algorithm.
pub struct BufferFrame {
    /// Frame identifier.
    frame_id: FrameId,
    /// Identity of the resident page, packed via `FilePageId::as_u64`.
    /// `NO_RESIDENT` when the frame is empty.
    resident: AtomicU64,
    /// Page data buffer.
    data: RwLock<Box<[u8; PAGE_SIZE]>>,
    /// Number of callers currently using this page.
    pin_count: AtomicU32,
    /// Whether the page bytes have been modified since load.
    dirty: AtomicBool,
    /// Reference bit for clock replacement.
    reference_bit: AtomicBool,
}

impl BufferFrame {
    /// Creates a new empty buffer frame.
    pub fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            resident: AtomicU64::new(NO_RESIDENT),
            data: RwLock::new(Box::new([0u8; PAGE_SIZE])),
            pin_count: AtomicU32::new(0),
            dirty: AtomicBool::new(false),
            reference_bit: AtomicBool::new(false),
        }
    }

    /// Returns the frame id.
    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Returns the identity of the resident page, if any.
    #[inline]
    pub fn resident_page(&self) -> Option<FilePageId> {
        let packed = self.resident.load(Ordering::Acquire);
        if packed == NO_RESIDENT {
            None
        } else {
            Some(FilePageId::from_u64(packed))
        }
    }

    /// Sets the identity of the resident page.
    #[inline]
    pub fn set_resident_page(&self, id: Option<FilePageId>) {
        let packed = id.map(|p| p.as_u64()).unwrap_or(NO_RESIDENT);
        self.resident.store(packed, Ordering::Release);
    }

    /// Returns the current pin count.
    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Increments the pin count and sets the reference bit.
    #[inline]
    pub fn pin(&self) {
        self.pin_count.fetch_add(1, Ordering::AcqRel);
        self.reference_bit.store(true, Ordering::Relaxed);
    }

    /// Decrements the pin count. Returns false if the frame was not pinned.
    #[inline]
    pub fn unpin(&self) -> bool {
        self.pin_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            })
            .is_ok()
    }

    /// Returns true if this frame is pinned.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin_count() > 0
    }

    /// Returns true if this frame is dirty.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Sets or clears the dirty flag.
    #[inline]
    pub fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::Release);
    }

    /// Returns the reference bit value.
    #[inline]
    pub fn reference_bit(&self) -> bool {
        self.reference_bit.load(Ordering::Relaxed)
    }

    /// Clears the reference bit.
    #[inline]
    pub fn clear_reference_bit(&self) {
        self.reference_bit.store(false, Ordering::Relaxed);
    }

    /// Reads the page data.
    #[inline]
    pub fn read_data(&self) -> parking_lot::RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.data.read()
    }

    /// Writes to the page data.
    #[inline]
    pub fn write_data(&self) -> parking_lot::RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.data.write()
    }

    /// Copies page bytes into the frame.
    #[inline]
    pub fn load_from(&self, src: &[u8; PAGE_SIZE]) {
        self.data.write().copy_from_slice(src);
    }

    /// Copies page bytes out of the frame.
    #[inline]
    pub fn snapshot(&self) -> Box<[u8; PAGE_SIZE]> {
        let data = self.data.read();
        let mut out = Box::new([0u8; PAGE_SIZE]);
        out.copy_from_slice(&**data);
        out
    }

    /// Resets the frame to the empty state, zeroing the page bytes.
    pub fn reset(&self) {
        self.resident.store(NO_RESIDENT, Ordering::Release);
        self.pin_count.store(0, Ordering::Release);
        self.dirty.store(false, Ordering::Release);
        self.reference_bit.store(false, Ordering::Relaxed);
        self.data.write().fill(0);
    }
}

impl std::fmt::Debug for BufferFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferFrame")
            .field("frame_id", &self.frame_id)
            .field("resident", &self.resident_page())
            .field("pin_count", &self.pin_count())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}
