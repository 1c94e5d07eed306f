//! Record files: slotted pages of variable-length records.
//!
//! A record file is the base-relation store the index is built over. Records
//! are opaque byte strings addressed by `RecordId`; the index extracts its
//! key from a fixed byte offset inside each record.

use crate::file::PageFile;
use crate::pager::Pager;
use kestrel_common::page::{PageId, RecordId, PAGE_SIZE};
use kestrel_common::{KestrelError, Result};
use std::sync::Arc;

/// Per-page header: record_count (2) + free_end (2).
const PAGE_HEADER_SIZE: usize = 4;

/// Per-record slot: payload offset (2) + length (2).
const SLOT_SIZE: usize = 4;

/// Largest record that fits on an empty page alongside its slot.
pub const MAX_RECORD_SIZE: usize = PAGE_SIZE - PAGE_HEADER_SIZE - SLOT_SIZE;

/// Slotted record page over raw page bytes.
///
/// Slots grow forward from the header; record payloads grow backward from
/// the end of the page. `free_end` is the offset of the lowest used payload
/// byte (PAGE_SIZE when empty; a zeroed fresh page reads as empty).
struct RecordPage;

impl RecordPage {
    fn record_count(data: &[u8]) -> usize {
        u16::from_le_bytes([data[0], data[1]]) as usize
    }

    fn free_end(data: &[u8]) -> usize {
        let raw = u16::from_le_bytes([data[2], data[3]]) as usize;
        if raw == 0 {
            PAGE_SIZE
        } else {
            raw
        }
    }

    fn slot(data: &[u8], slot: usize) -> (usize, usize) {
        let base = PAGE_HEADER_SIZE + slot * SLOT_SIZE;
        let offset = u16::from_le_bytes([data[base], data[base + 1]]) as usize;
        let len = u16::from_le_bytes([data[base + 2], data[base + 3]]) as usize;
        (offset, len)
    }

    fn record<'a>(data: &'a [u8], slot: usize) -> &'a [u8] {
        let (offset, len) = Self::slot(data, slot);
        &data[offset..offset + len]
    }

    fn free_space(data: &[u8]) -> usize {
        let slots_end = PAGE_HEADER_SIZE + Self::record_count(data) * SLOT_SIZE;
        Self::free_end(data).saturating_sub(slots_end)
    }

    /// Appends a record, returning its slot number, or None if it does not fit.
    fn append(data: &mut [u8], record: &[u8]) -> Option<u16> {
        if Self::free_space(data) < record.len() + SLOT_SIZE {
            return None;
        }

        let count = Self::record_count(data);
        let new_end = Self::free_end(data) - record.len();
        data[new_end..new_end + record.len()].copy_from_slice(record);

        let base = PAGE_HEADER_SIZE + count * SLOT_SIZE;
        data[base..base + 2].copy_from_slice(&(new_end as u16).to_le_bytes());
        data[base + 2..base + 4].copy_from_slice(&(record.len() as u16).to_le_bytes());

        data[0..2].copy_from_slice(&((count + 1) as u16).to_le_bytes());
        data[2..4].copy_from_slice(&(new_end as u16).to_le_bytes());
        Some(count as u16)
    }
}

/// A file of slotted record pages.
pub struct RecordFile {
    pager: Arc<Pager>,
    file: Arc<PageFile>,
}

impl RecordFile {
    /// Creates a new record file.
    pub fn create(pager: Arc<Pager>, name: &str) -> Result<Self> {
        let file = pager.create_file(name)?;
        Ok(Self { pager, file })
    }

    /// Opens an existing record file.
    pub fn open(pager: Arc<Pager>, name: &str) -> Result<Self> {
        let file = pager.open_file(name)?;
        Ok(Self { pager, file })
    }

    /// Returns the underlying page file.
    pub fn file(&self) -> &Arc<PageFile> {
        &self.file
    }

    /// Appends a record, allocating a new page when the last one is full.
    pub fn insert_record(&self, record: &[u8]) -> Result<RecordId> {
        if record.len() > MAX_RECORD_SIZE {
            return Err(KestrelError::RecordTooLarge {
                size: record.len(),
                max: MAX_RECORD_SIZE,
            });
        }

        let last_page = self.file.num_pages();
        if last_page > 0 {
            let frame = self.pager.fetch_page(&self.file, last_page)?;
            let slot = RecordPage::append(&mut **frame.write_data(), record);
            match slot {
                Some(slot) => {
                    self.pager.unpin_page(&self.file, last_page, true)?;
                    return Ok(RecordId::new(last_page, slot));
                }
                None => self.pager.unpin_page(&self.file, last_page, false)?,
            }
        }

        let (page_no, frame) = self.pager.alloc_page(&self.file)?;
        let slot = RecordPage::append(&mut **frame.write_data(), record)
            .expect("record must fit on an empty page");
        self.pager.unpin_page(&self.file, page_no, true)?;
        Ok(RecordId::new(page_no, slot))
    }

    /// Reads a record by id.
    pub fn read_record(&self, rid: RecordId) -> Result<Vec<u8>> {
        let frame = self.pager.fetch_page(&self.file, rid.page_no)?;
        let record = {
            let data = frame.read_data();
            if (rid.slot as usize) >= RecordPage::record_count(&**data) {
                drop(data);
                self.pager.unpin_page(&self.file, rid.page_no, false)?;
                return Err(KestrelError::PageNotFound {
                    page_no: rid.page_no,
                });
            }
            RecordPage::record(&**data, rid.slot as usize).to_vec()
        };
        self.pager.unpin_page(&self.file, rid.page_no, false)?;
        Ok(record)
    }

    /// Starts a forward scan over all records.
    pub fn scan(&self) -> RelationScan<'_> {
        RelationScan {
            relation: self,
            page_no: self.file.first_page_no(),
            next_slot: 0,
        }
    }

    /// Flushes the file to disk.
    pub fn flush(&self) -> Result<()> {
        self.pager.flush_file(&self.file)
    }
}

/// Forward scan over a record file in (page, slot) order.
///
/// Each call pins the current page, copies one record out, and unpins
/// before returning, so no pin outlives a `next` call. Ends with
/// `EndOfRelation`.
pub struct RelationScan<'a> {
    relation: &'a RecordFile,
    page_no: PageId,
    next_slot: usize,
}

impl RelationScan<'_> {
    /// Returns the next record and its id, or `EndOfRelation`.
    pub fn next(&mut self) -> Result<(RecordId, Vec<u8>)> {
        loop {
            if self.page_no > self.relation.file.num_pages() {
                return Err(KestrelError::EndOfRelation);
            }

            let file = &self.relation.file;
            let frame = self.relation.pager.fetch_page(file, self.page_no)?;
            let found = {
                let data = frame.read_data();
                if self.next_slot < RecordPage::record_count(&**data) {
                    Some(RecordPage::record(&**data, self.next_slot).to_vec())
                } else {
                    None
                }
            };
            self.relation.pager.unpin_page(file, self.page_no, false)?;

            match found {
                Some(record) => {
                    let rid = RecordId::new(self.page_no, self.next_slot as u16);
                    self.next_slot += 1;
                    return Ok((rid, record));
                }
                None => {
                    self.page_no += 1;
                    self.next_slot = 0;
                }
            }
        }
    }
}
