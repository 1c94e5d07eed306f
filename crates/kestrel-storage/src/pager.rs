//! Pager facade over the buffer pool and on-disk page files.

use crate::file::PageFile;
use kestrel_buffer::{BufferFrame, BufferPool, BufferPoolConfig, BufferPoolStats, EvictedPage};
use kestrel_common::page::{FileId, FilePageId, PageId};
use kestrel_common::{KestrelError, Result, StorageConfig};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Pager: the narrow page-residency contract the rest of the system runs on.
///
/// Owns the buffer pool and a registry of open page files. All page access
/// goes through here: `alloc_page` and `fetch_page` return a pinned frame,
/// every pin must be balanced by exactly one `unpin_page`, and `flush_file`
/// requires the file to have no pinned pages. Dirty pages displaced by
/// eviction are written back to their owning file via the registry.
pub struct Pager {
    /// Buffer pool shared by all registered files.
    pool: BufferPool,
    /// Open files by pager-assigned id.
    files: Mutex<HashMap<FileId, Arc<PageFile>>>,
    /// Next file id to assign. Starts at 1.
    next_file_id: AtomicU32,
    /// Directory that file names resolve against.
    data_dir: std::path::PathBuf,
    /// fsync after writes.
    fsync_enabled: bool,
}

impl Pager {
    /// Creates a pager from storage configuration, creating the data
    /// directory if needed.
    pub fn new(config: StorageConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        Ok(Self {
            pool: BufferPool::new(BufferPoolConfig {
                num_frames: config.buffer_pool_frames,
            }),
            files: Mutex::new(HashMap::new()),
            next_file_id: AtomicU32::new(1),
            data_dir: config.data_dir,
            fsync_enabled: config.fsync_enabled,
        })
    }

    fn resolve(&self, name: &str) -> std::path::PathBuf {
        self.data_dir.join(name)
    }

    fn register(&self, file: PageFile) -> Arc<PageFile> {
        let file = Arc::new(file);
        self.files.lock().insert(file.file_id(), Arc::clone(&file));
        file
    }

    /// Creates and registers a new page file.
    pub fn create_file(&self, name: &str) -> Result<Arc<PageFile>> {
        let file_id = self.next_file_id.fetch_add(1, Ordering::Relaxed);
        let file = PageFile::create(&self.resolve(name), file_id, self.fsync_enabled)?;
        debug!(name, file_id, "created page file");
        Ok(self.register(file))
    }

    /// Opens and registers an existing page file.
    pub fn open_file(&self, name: &str) -> Result<Arc<PageFile>> {
        let file_id = self.next_file_id.fetch_add(1, Ordering::Relaxed);
        let file = PageFile::open(&self.resolve(name), file_id, self.fsync_enabled)?;
        debug!(name, file_id, num_pages = file.num_pages(), "opened page file");
        Ok(self.register(file))
    }

    /// Writes an evicted dirty page back to its owning file.
    fn write_back(&self, evicted: EvictedPage) -> Result<()> {
        trace!(page = %evicted.id, "writing back evicted page");
        let file = self
            .files
            .lock()
            .get(&evicted.id.file_id)
            .cloned()
            .ok_or(KestrelError::PageNotFound {
                page_no: evicted.id.page_no,
            })?;
        file.write_page(evicted.id.page_no, &evicted.data)
    }

    /// Allocates a fresh page in the file and returns it pinned and zeroed.
    pub fn alloc_page(&self, file: &Arc<PageFile>) -> Result<(PageId, &BufferFrame)> {
        let page_no = file.allocate_page()?;
        let (frame, evicted) = self
            .pool
            .install_page(FilePageId::new(file.file_id(), page_no))?;
        if let Some(evicted) = evicted {
            self.write_back(evicted)?;
        }
        Ok((page_no, frame))
    }

    /// Pins and returns a page, reading it from disk on a pool miss.
    pub fn fetch_page(&self, file: &Arc<PageFile>, page_no: PageId) -> Result<&BufferFrame> {
        let id = FilePageId::new(file.file_id(), page_no);
        if let Some(frame) = self.pool.fetch_resident(id) {
            return Ok(frame);
        }

        // Miss: read from disk before touching the pool so a failed read
        // leaves no half-installed frame behind.
        let data = file.read_page(page_no)?;
        let (frame, evicted) = self.pool.install_page(id)?;
        frame.load_from(&data);
        if let Some(evicted) = evicted {
            self.write_back(evicted)?;
        }
        Ok(frame)
    }

    /// Returns the frame of a page the caller already holds a pin on.
    ///
    /// Does not take another pin. Fails with `PageNotPinned` if the page is
    /// resident but unpinned, `PageNotFound` if it is not resident at all.
    pub fn pinned_frame(&self, file: &PageFile, page_no: PageId) -> Result<&BufferFrame> {
        let frame = self
            .pool
            .resident_frame(FilePageId::new(file.file_id(), page_no))
            .ok_or(KestrelError::PageNotFound { page_no })?;
        if !frame.is_pinned() {
            return Err(KestrelError::PageNotPinned { page_no });
        }
        Ok(frame)
    }

    /// Unpins a page, marking it dirty if its bytes were modified.
    pub fn unpin_page(&self, file: &PageFile, page_no: PageId, dirty: bool) -> Result<()> {
        self.pool
            .unpin_page(FilePageId::new(file.file_id(), page_no), dirty)
    }

    /// Writes all dirty pages of a file to disk.
    ///
    /// Fails with `PagePinned` if the file still has pinned pages.
    pub fn flush_file(&self, file: &PageFile) -> Result<()> {
        if let Some(page_no) = self.pool.pinned_page(file.file_id()) {
            return Err(KestrelError::PagePinned { page_no });
        }
        let flushed = self
            .pool
            .flush_file(file.file_id(), |page_no, data| file.write_page(page_no, data))?;
        file.sync()?;
        debug!(path = %file.path().display(), flushed, "flushed file");
        Ok(())
    }

    /// Flushes a file, drops its frames from the pool, and deregisters it.
    pub fn close_file(&self, file: &Arc<PageFile>) -> Result<()> {
        self.flush_file(file)?;
        self.pool.discard_file(file.file_id())?;
        self.files.lock().remove(&file.file_id());
        Ok(())
    }

    /// Closes a file and removes it from disk.
    pub fn delete_file(&self, file: Arc<PageFile>) -> Result<()> {
        self.close_file(&file)?;
        std::fs::remove_file(file.path())?;
        Ok(())
    }

    /// Returns the page number of the first page of a file.
    pub fn first_page_no(&self, file: &PageFile) -> PageId {
        file.first_page_no()
    }

    /// Returns the number of pages of the file currently pinned.
    pub fn pinned_count(&self, file: &PageFile) -> usize {
        self.pool.pinned_count(file.file_id())
    }

    /// Returns buffer pool statistics.
    pub fn pool_stats(&self) -> BufferPoolStats {
        self.pool.stats()
    }
}

impl Drop for Pager {
    fn drop(&mut self) {
        // Best-effort flush of every registered file.
        let files: Vec<_> = self.files.lock().values().cloned().collect();
        for file in files {
            let _ = self.flush_file(&file);
        }
    }
}
