//! Page and record identifiers for Kestrel storage.

use serde::{Deserialize, Serialize};

/// Page size in bytes (4 KB).
pub const PAGE_SIZE: usize = 4096;

/// Page number within a file. Page numbers start at 1; `NO_PAGE` (0) is the
/// reserved "no page" sentinel used for absent siblings and empty child slots.
pub type PageId = u32;

/// Sentinel page number meaning "no page".
pub const NO_PAGE: PageId = 0;

/// Identifier assigned to a file when it is registered with the pager.
pub type FileId = u32;

/// Composite identifier for a page across all registered files.
///
/// Used as the buffer pool lookup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilePageId {
    /// File the page belongs to.
    pub file_id: FileId,
    /// Page number within the file.
    pub page_no: PageId,
}

impl FilePageId {
    /// Creates a new FilePageId.
    pub fn new(file_id: FileId, page_no: PageId) -> Self {
        Self { file_id, page_no }
    }

    /// Packs the identifier into a single u64 for compact storage.
    pub fn as_u64(&self) -> u64 {
        ((self.file_id as u64) << 32) | (self.page_no as u64)
    }

    /// Unpacks an identifier from its u64 representation.
    pub fn from_u64(value: u64) -> Self {
        Self {
            file_id: (value >> 32) as u32,
            page_no: value as u32,
        }
    }
}

impl std::fmt::Display for FilePageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file_id, self.page_no)
    }
}

/// Identifier for a record in a base relation.
///
/// A record id with `page_no == NO_PAGE` is the "empty slot" sentinel used
/// in index leaf pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId {
    /// Page containing the record.
    pub page_no: PageId,
    /// Slot number within the page.
    pub slot: u16,
}

impl RecordId {
    /// On-disk size in bytes: page_no (4) + slot (2) + 2 reserved.
    pub const SIZE: usize = 8;

    /// The empty-slot sentinel.
    pub const NULL: RecordId = RecordId {
        page_no: NO_PAGE,
        slot: 0,
    };

    /// Creates a new record id.
    pub fn new(page_no: PageId, slot: u16) -> Self {
        Self { page_no, slot }
    }

    /// Returns true if this is the empty-slot sentinel.
    pub fn is_null(&self) -> bool {
        self.page_no == NO_PAGE
    }

    /// Serializes the record id to its on-disk form.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.page_no.to_le_bytes());
        buf[4..6].copy_from_slice(&self.slot.to_le_bytes());
        // bytes 6-7 are reserved (already zeroed)
        buf
    }

    /// Deserializes a record id from its on-disk form.
    pub fn from_bytes(buf: &[u8]) -> Self {
        Self {
            page_no: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            slot: u16::from_le_bytes([buf[4], buf[5]]),
        }
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.page_no, self.slot)
    }
}
