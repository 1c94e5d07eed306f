//! Buffer pool manager.

use crate::frame::{BufferFrame, FrameId};
use crate::page_table::PageTable;
use crate::replacer::{ClockReplacer, Replacer};
use kestrel_common::page::{FileId, FilePageId, PageId, PAGE_SIZE};
use kestrel_common::{KestrelError, Result};
use parking_lot::Mutex;

/// A dirty page displaced from the pool to make room.
///
/// The caller must write it back to its file to prevent data loss.
#[derive(Debug)]
pub struct EvictedPage {
    pub id: FilePageId,
    pub data: Box<[u8; PAGE_SIZE]>,
}

/// Configuration for the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of frames in the pool.
    pub num_frames: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self { num_frames: 1024 }
    }
}

/// Buffer pool manager.
///
/// Manages a fixed set of page frames with a page table for residency
/// lookup, a free list for unoccupied frames, clock replacement for
/// eviction, and pin counting to protect pages in use.
pub struct BufferPool {
    /// Configuration.
    config: BufferPoolConfig,
    /// Array of buffer frames.
    frames: Vec<BufferFrame>,
    /// Resident-page to frame mapping.
    page_table: PageTable,
    /// Unoccupied frames.
    free_list: Mutex<Vec<FrameId>>,
    /// Page replacement policy.
    replacer: ClockReplacer,
}

impl BufferPool {
    /// Creates a new buffer pool.
    pub fn new(config: BufferPoolConfig) -> Self {
        let num_frames = config.num_frames;

        let frames: Vec<_> = (0..num_frames)
            .map(|i| BufferFrame::new(FrameId(i as u32)))
            .collect();
        let free_list: Vec<_> = (0..num_frames).map(|i| FrameId(i as u32)).collect();

        Self {
            config,
            frames,
            page_table: PageTable::new(num_frames),
            free_list: Mutex::new(free_list),
            replacer: ClockReplacer::new(num_frames),
        }
    }

    /// Returns the number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.config.num_frames
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> usize {
        self.free_list.lock().len()
    }

    /// Returns the number of resident pages.
    pub fn page_count(&self) -> usize {
        self.page_table.len()
    }

    /// Checks whether a page is resident.
    pub fn contains(&self, id: FilePageId) -> bool {
        self.page_table.contains(id)
    }

    /// Pins and returns the frame of a resident page, or None on a miss.
    pub fn fetch_resident(&self, id: FilePageId) -> Option<&BufferFrame> {
        let frame_id = self.page_table.get(id)?;
        let frame = &self.frames[frame_id.0 as usize];
        frame.pin();
        self.replacer.record_access(frame_id);
        Some(frame)
    }

    /// Returns the frame of a resident page without pinning it.
    ///
    /// For callers that already hold a pin on the page.
    pub fn resident_frame(&self, id: FilePageId) -> Option<&BufferFrame> {
        let frame_id = self.page_table.get(id)?;
        Some(&self.frames[frame_id.0 as usize])
    }

    /// Claims a frame: from the free list if possible, by eviction otherwise.
    ///
    /// Only unpinned frames are eviction victims. If the victim is dirty its
    /// bytes are captured and returned so the caller can write them back.
    fn claim_frame(&self) -> Result<(FrameId, Option<EvictedPage>)> {
        if let Some(frame_id) = self.free_list.lock().pop() {
            return Ok((frame_id, None));
        }

        let victim_id = self
            .replacer
            .evict(&|fid| self.frames[fid.0 as usize].pin_count() == 0)
            .ok_or(KestrelError::BufferPoolFull)?;

        let frame = &self.frames[victim_id.0 as usize];
        let evicted = match frame.resident_page() {
            Some(old_id) => {
                self.page_table.remove(old_id);
                frame.is_dirty().then(|| EvictedPage {
                    id: old_id,
                    data: frame.snapshot(),
                })
            }
            None => None,
        };

        Ok((victim_id, evicted))
    }

    /// Installs a page into the pool, pinned.
    ///
    /// If the page is already resident the existing frame is pinned and
    /// returned. Otherwise a frame is claimed and reset to zeros; the caller
    /// fills it (from disk, or leaves it zeroed for a fresh page) and must
    /// write back any returned evicted page.
    pub fn install_page(&self, id: FilePageId) -> Result<(&BufferFrame, Option<EvictedPage>)> {
        if let Some(frame_id) = self.page_table.get(id) {
            let frame = &self.frames[frame_id.0 as usize];
            frame.pin();
            self.replacer.record_access(frame_id);
            return Ok((frame, None));
        }

        let (frame_id, evicted) = self.claim_frame()?;
        let frame = &self.frames[frame_id.0 as usize];
        frame.reset();
        frame.set_resident_page(Some(id));
        frame.pin();

        self.page_table.insert(id, frame_id);
        self.replacer.add_candidate(frame_id);
        self.replacer.record_access(frame_id);

        Ok((frame, evicted))
    }

    /// Unpins a page, marking it dirty if requested.
    pub fn unpin_page(&self, id: FilePageId, dirty: bool) -> Result<()> {
        let frame_id = self
            .page_table
            .get(id)
            .ok_or(KestrelError::PageNotFound { page_no: id.page_no })?;
        let frame = &self.frames[frame_id.0 as usize];

        if dirty {
            frame.set_dirty(true);
        }
        if !frame.unpin() {
            return Err(KestrelError::PageNotPinned { page_no: id.page_no });
        }
        Ok(())
    }

    /// Returns the number of pinned pages belonging to a file.
    pub fn pinned_count(&self, file_id: FileId) -> usize {
        let mut pinned = 0;
        self.page_table.for_each(|id, frame_id| {
            if id.file_id == file_id && self.frames[frame_id.0 as usize].is_pinned() {
                pinned += 1;
            }
            true
        });
        pinned
    }

    /// Returns the page number of some pinned page of a file, if any.
    pub fn pinned_page(&self, file_id: FileId) -> Option<PageId> {
        let mut found = None;
        self.page_table.for_each(|id, frame_id| {
            if id.file_id == file_id && self.frames[frame_id.0 as usize].is_pinned() {
                found = Some(id.page_no);
                return false;
            }
            true
        });
        found
    }

    /// Flushes all dirty pages of a file through the given callback.
    ///
    /// Returns the number of pages flushed.
    pub fn flush_file<F>(&self, file_id: FileId, mut flush_fn: F) -> Result<usize>
    where
        F: FnMut(PageId, &[u8; PAGE_SIZE]) -> Result<()>,
    {
        let mut targets = Vec::new();
        self.page_table.for_each(|id, frame_id| {
            if id.file_id == file_id {
                targets.push((id, frame_id));
            }
            true
        });

        let mut flushed = 0;
        for (id, frame_id) in targets {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_dirty() {
                let data = frame.read_data();
                flush_fn(id.page_no, &data)?;
                drop(data);
                frame.set_dirty(false);
                flushed += 1;
            }
        }
        Ok(flushed)
    }

    /// Drops all frames of a file, returning them to the free list.
    ///
    /// Fails with `PagePinned` if any page of the file is still pinned;
    /// dirty bytes are discarded, so flush first.
    pub fn discard_file(&self, file_id: FileId) -> Result<()> {
        let mut targets = Vec::new();
        self.page_table.for_each(|id, frame_id| {
            if id.file_id == file_id {
                targets.push((id, frame_id));
            }
            true
        });

        for (id, frame_id) in &targets {
            if self.frames[frame_id.0 as usize].is_pinned() {
                return Err(KestrelError::PagePinned { page_no: id.page_no });
            }
        }

        let mut free_list = self.free_list.lock();
        for (id, frame_id) in targets {
            self.page_table.remove(id);
            self.replacer.remove(frame_id);
            self.frames[frame_id.0 as usize].reset();
            free_list.push(frame_id);
        }
        Ok(())
    }

    /// Returns statistics about the pool.
    pub fn stats(&self) -> BufferPoolStats {
        let mut pinned_frames = 0;
        let mut dirty_frames = 0;

        self.page_table.for_each(|_, frame_id| {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_pinned() {
                pinned_frames += 1;
            }
            if frame.is_dirty() {
                dirty_frames += 1;
            }
            true
        });

        BufferPoolStats {
            total_frames: self.config.num_frames,
            free_frames: self.free_count(),
            used_frames: self.page_table.len(),
            pinned_frames,
            dirty_frames,
        }
    }
}

/// Statistics about the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolStats {
    /// Total number of frames.
    pub total_frames: usize,
    /// Number of free frames.
    pub free_frames: usize,
    /// Number of frames holding pages.
    pub used_frames: usize,
    /// Number of pinned frames.
    pub pinned_frames: usize,
    /// Number of dirty frames.
    pub dirty_frames: usize,
}
