//! Raw paged file I/O.

use kestrel_common::page::{FileId, PageId, NO_PAGE, PAGE_SIZE};
use kestrel_common::{KestrelError, Result};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A single on-disk file of fixed-size pages.
///
/// Page numbers start at 1; `NO_PAGE` (0) is reserved. Page `n` lives at
/// byte offset `(n - 1) * PAGE_SIZE`. New pages are appended by
/// `allocate_page`, which extends the file with zeroed bytes.
pub struct PageFile {
    /// Identity assigned by the pager at registration.
    file_id: FileId,
    /// Path on disk.
    path: PathBuf,
    /// Handle and page-count bookkeeping.
    inner: Mutex<FileInner>,
    /// fsync after writes.
    fsync_enabled: bool,
}

struct FileInner {
    file: File,
    num_pages: u32,
}

impl PageFile {
    /// Creates a new page file. Fails if the path already exists.
    pub fn create(path: &Path, file_id: FileId, fsync_enabled: bool) -> Result<Self> {
        if path.exists() {
            return Err(KestrelError::FileExists {
                path: path.display().to_string(),
            });
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        Ok(Self {
            file_id,
            path: path.to_path_buf(),
            inner: Mutex::new(FileInner { file, num_pages: 0 }),
            fsync_enabled,
        })
    }

    /// Opens an existing page file. Fails with `FileNotFound` if absent.
    pub fn open(path: &Path, file_id: FileId, fsync_enabled: bool) -> Result<Self> {
        if !path.exists() {
            return Err(KestrelError::FileNotFound {
                path: path.display().to_string(),
            });
        }
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let num_pages = (file.metadata()?.len() / PAGE_SIZE as u64) as u32;

        Ok(Self {
            file_id,
            path: path.to_path_buf(),
            inner: Mutex::new(FileInner { file, num_pages }),
            fsync_enabled,
        })
    }

    /// Returns the pager-assigned file id.
    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    /// Returns the path on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the page number of the first page.
    pub fn first_page_no(&self) -> PageId {
        1
    }

    /// Returns the number of allocated pages.
    pub fn num_pages(&self) -> u32 {
        self.inner.lock().num_pages
    }

    /// Reads a page from disk.
    pub fn read_page(&self, page_no: PageId) -> Result<[u8; PAGE_SIZE]> {
        let mut inner = self.inner.lock();
        if page_no == NO_PAGE || page_no > inner.num_pages {
            return Err(KestrelError::PageNotFound { page_no });
        }

        inner
            .file
            .seek(SeekFrom::Start((page_no as u64 - 1) * PAGE_SIZE as u64))?;
        let mut buffer = [0u8; PAGE_SIZE];
        inner.file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    /// Writes a page to disk.
    pub fn write_page(&self, page_no: PageId, data: &[u8; PAGE_SIZE]) -> Result<()> {
        let mut inner = self.inner.lock();
        if page_no == NO_PAGE || page_no > inner.num_pages {
            return Err(KestrelError::PageNotFound { page_no });
        }

        inner
            .file
            .seek(SeekFrom::Start((page_no as u64 - 1) * PAGE_SIZE as u64))?;
        inner.file.write_all(data)?;
        if self.fsync_enabled {
            inner.file.sync_all()?;
        }
        Ok(())
    }

    /// Extends the file with a zeroed page and returns its number.
    pub fn allocate_page(&self) -> Result<PageId> {
        let mut inner = self.inner.lock();
        let page_no = inner.num_pages + 1;

        inner
            .file
            .seek(SeekFrom::Start((page_no as u64 - 1) * PAGE_SIZE as u64))?;
        inner.file.write_all(&[0u8; PAGE_SIZE])?;
        if self.fsync_enabled {
            inner.file.sync_all()?;
        }

        inner.num_pages = page_no;
        Ok(page_no)
    }

    /// Flushes pending writes to disk.
    pub fn sync(&self) -> Result<()> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }
}

impl std::fmt::Debug for PageFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageFile")
            .field("file_id", &self.file_id)
            .field("path", &self.path)
            .field("num_pages", &self.num_pages())
            .finish()
    }
}
