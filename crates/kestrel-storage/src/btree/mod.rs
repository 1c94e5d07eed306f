//! Disk-resident B+ tree index.
//!
//! Pages come in three kinds: the meta page (first page of the index
//! file), internal separator pages, and sibling-linked leaf pages holding
//! `(key, record id)` pairs. Insertion descends from the root and splits
//! full pages on the way back up; range scans position on the first
//! qualifying leaf entry and walk the sibling chain.

mod index;
mod meta;
mod node;

pub use index::BTreeIndex;
pub use meta::IndexMeta;
pub use node::{InternalMut, InternalRef, LeafMut, LeafRef, INTERNAL_CAPACITY, LEAF_CAPACITY};
