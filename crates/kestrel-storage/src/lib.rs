//! Storage engine for Kestrel.
//!
//! This crate provides:
//! - Raw paged files and a pager facade over the buffer pool
//! - Record files for base relations, with forward scans
//! - A disk-resident B+ tree index over a single integer attribute

mod btree;
mod file;
mod pager;
mod relation;

pub use btree::{
    BTreeIndex, IndexMeta, InternalMut, InternalRef, LeafMut, LeafRef, INTERNAL_CAPACITY,
    LEAF_CAPACITY,
};
pub use file::PageFile;
pub use pager::Pager;
pub use relation::{RecordFile, RelationScan, MAX_RECORD_SIZE};
