//! Disk-resident B+ tree index over a single integer attribute.
//!
//! The index stores `(key, record id)` pairs in sibling-linked leaf pages
//! under internal separator pages, all behind the pager. One scan may be
//! active per index at a time; it keeps exactly one leaf pinned between
//! calls.

use crate::btree::meta::IndexMeta;
use crate::btree::node::{InternalMut, InternalRef, LeafMut, LeafRef, LEAF_CAPACITY};
use crate::file::PageFile;
use crate::pager::Pager;
use crate::relation::RecordFile;
use kestrel_buffer::BufferFrame;
use kestrel_common::page::{PageId, RecordId, NO_PAGE};
use kestrel_common::types::{AttrType, ScanOp};
use kestrel_common::{KestrelError, Result};
use std::sync::Arc;
use tracing::{debug, trace};

/// A separator emitted by a split: the new right page and the key dividing
/// it from its left sibling. Propagates up the insertion recursion until a
/// parent absorbs it or the root is promoted.
#[derive(Debug, Clone, Copy)]
struct Separator {
    key: i32,
    page_no: PageId,
}

/// Scan state. `Active` owns the pin on the current leaf; `Drained` means
/// the scan ran off the last leaf and holds no pin, but `end_scan` is still
/// permitted.
enum ScanState {
    Idle,
    Active {
        page_no: PageId,
        next_entry: usize,
        low: i32,
        low_op: ScanOp,
        high: i32,
        high_op: ScanOp,
    },
    Drained,
}

/// B+ tree index on a single attribute of a base relation.
pub struct BTreeIndex {
    pager: Arc<Pager>,
    file: Arc<PageFile>,
    index_name: String,
    /// Meta page number (first page of the file).
    header_page_no: PageId,
    /// Current root; changes only on root promotion.
    root_page_no: PageId,
    /// The leaf allocated at creation. The root is a leaf exactly while
    /// `root_page_no` still equals it.
    initial_root_page_no: PageId,
    attr_byte_offset: usize,
    attr_type: AttrType,
    scan: ScanState,
    closed: bool,
}

impl BTreeIndex {
    /// Opens the index for `relation_name` on the attribute at
    /// `attr_byte_offset`, creating and bulk-building it from the relation
    /// if no index file exists yet.
    ///
    /// The index file is named `"<relation_name>.<attr_byte_offset>"`. An
    /// existing file whose meta page disagrees with the arguments fails
    /// with `BadIndexInfo`.
    pub fn open(
        pager: Arc<Pager>,
        relation_name: &str,
        attr_byte_offset: usize,
        attr_type: AttrType,
    ) -> Result<Self> {
        let index_name = format!("{}.{}", relation_name, attr_byte_offset);

        match pager.open_file(&index_name) {
            Ok(file) => Self::from_existing(
                pager,
                file,
                index_name,
                relation_name,
                attr_byte_offset,
                attr_type,
            ),
            Err(KestrelError::FileNotFound { .. }) => {
                Self::create(pager, index_name, relation_name, attr_byte_offset, attr_type)
            }
            Err(e) => Err(e),
        }
    }

    fn from_existing(
        pager: Arc<Pager>,
        file: Arc<PageFile>,
        index_name: String,
        relation_name: &str,
        attr_byte_offset: usize,
        attr_type: AttrType,
    ) -> Result<Self> {
        let header_page_no = file.first_page_no();
        let frame = pager.fetch_page(&file, header_page_no)?;
        let meta = IndexMeta::read(&**frame.read_data());
        pager.unpin_page(&file, header_page_no, false)?;

        if meta.relation_name != IndexMeta::stored_name(relation_name)
            || meta.attr_byte_offset != attr_byte_offset as i32
            || meta.attr_type != attr_type as u32
        {
            let _ = pager.close_file(&file);
            return Err(KestrelError::BadIndexInfo { index_name });
        }

        debug!(index = %index_name, root = meta.root_page_no, "opened existing index");
        Ok(Self {
            pager,
            file,
            index_name,
            header_page_no,
            root_page_no: meta.root_page_no,
            initial_root_page_no: meta.initial_root_page_no,
            attr_byte_offset,
            attr_type,
            scan: ScanState::Idle,
            closed: false,
        })
    }

    fn create(
        pager: Arc<Pager>,
        index_name: String,
        relation_name: &str,
        attr_byte_offset: usize,
        attr_type: AttrType,
    ) -> Result<Self> {
        let file = pager.create_file(&index_name)?;

        let (header_page_no, header_frame) = pager.alloc_page(&file)?;
        let (root_page_no, _root_frame) = match pager.alloc_page(&file) {
            Ok(pair) => pair,
            Err(e) => {
                let _ = pager.unpin_page(&file, header_page_no, false);
                return Err(e);
            }
        };

        IndexMeta {
            relation_name: relation_name.to_string(),
            attr_byte_offset: attr_byte_offset as i32,
            attr_type: attr_type as u32,
            root_page_no,
            initial_root_page_no: root_page_no,
        }
        .write(&mut **header_frame.write_data());
        pager.unpin_page(&file, header_page_no, true)?;
        // The fresh root leaf is all zeros: empty, no right sibling.
        pager.unpin_page(&file, root_page_no, true)?;

        debug!(index = %index_name, root = root_page_no, "created index");

        let mut index = Self {
            pager,
            file,
            index_name,
            header_page_no,
            root_page_no,
            initial_root_page_no: root_page_no,
            attr_byte_offset,
            attr_type,
            scan: ScanState::Idle,
            closed: false,
        };
        index.build_from(relation_name)?;
        Ok(index)
    }

    /// Bulk build: scans the base relation and inserts every record.
    fn build_from(&mut self, relation_name: &str) -> Result<()> {
        let relation = RecordFile::open(Arc::clone(&self.pager), relation_name)?;
        let mut scan = relation.scan();
        let mut inserted = 0u64;
        loop {
            match scan.next() {
                Ok((rid, record)) => {
                    let key = extract_key(&record, self.attr_byte_offset)?;
                    self.insert_entry(key, rid)?;
                    inserted += 1;
                }
                Err(KestrelError::EndOfRelation) => break,
                Err(e) => return Err(e),
            }
        }
        self.pager.close_file(relation.file())?;
        self.pager.flush_file(&self.file)?;
        debug!(index = %self.index_name, inserted, "bulk build complete");
        Ok(())
    }

    /// Returns the index file name, `"<relation_name>.<attr_byte_offset>"`.
    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Returns the underlying index file.
    pub fn file(&self) -> &Arc<PageFile> {
        &self.file
    }

    /// Returns the current root page number.
    pub fn root_page_no(&self) -> PageId {
        self.root_page_no
    }

    /// Returns true while the whole tree is the single initial leaf.
    pub fn is_root_leaf(&self) -> bool {
        self.root_page_no == self.initial_root_page_no
    }

    /// Number of levels in the tree, leaf level included.
    pub fn height(&self) -> Result<u32> {
        if self.is_root_leaf() {
            return Ok(1);
        }
        let mut height = 1;
        let mut page_no = self.root_page_no;
        loop {
            let frame = self.pager.fetch_page(&self.file, page_no)?;
            let (level, child) = {
                let data = frame.read_data();
                let node = InternalRef::new(&**data);
                (node.level(), node.child(0))
            };
            self.pager.unpin_page(&self.file, page_no, false)?;
            if level == 1 {
                return Ok(height + 1);
            }
            height += 1;
            page_no = child;
        }
    }

    // -- Insertion ---------------------------------------------------------

    /// Inserts a `(key, record id)` entry.
    ///
    /// Descends from the root, splitting full nodes on the way back up; a
    /// split that propagates out of the root promotes a new root.
    pub fn insert_entry(&mut self, key: i32, rid: RecordId) -> Result<()> {
        let root_is_leaf = self.is_root_leaf();
        if let Some(separator) = self.insert_into(self.root_page_no, root_is_leaf, key, rid)? {
            self.promote_root(separator, root_is_leaf)?;
        }
        Ok(())
    }

    /// Recursive insert. Returns the separator pushed out of this subtree,
    /// if its top node had to split. The page is unpinned on every path,
    /// error paths included.
    fn insert_into(
        &self,
        page_no: PageId,
        is_leaf: bool,
        key: i32,
        rid: RecordId,
    ) -> Result<Option<Separator>> {
        let frame = self.pager.fetch_page(&self.file, page_no)?;

        if is_leaf {
            if !LeafRef::new(&**frame.read_data()).is_full() {
                LeafMut::new(&mut **frame.write_data()).insert(key, rid);
                self.pager.unpin_page(&self.file, page_no, true)?;
                return Ok(None);
            }
            return self.split_leaf(page_no, frame, key, rid);
        }

        let (child_no, child_is_leaf) = {
            let data = frame.read_data();
            let node = InternalRef::new(&**data);
            (node.find_child(key), node.level() == 1)
        };

        let pushed = match self.insert_into(child_no, child_is_leaf, key, rid) {
            Ok(pushed) => pushed,
            Err(e) => {
                let _ = self.pager.unpin_page(&self.file, page_no, false);
                return Err(e);
            }
        };

        match pushed {
            None => {
                self.pager.unpin_page(&self.file, page_no, false)?;
                Ok(None)
            }
            Some(separator) => {
                if !InternalRef::new(&**frame.read_data()).is_full() {
                    InternalMut::new(&mut **frame.write_data())
                        .insert(separator.key, separator.page_no);
                    self.pager.unpin_page(&self.file, page_no, true)?;
                    Ok(None)
                } else {
                    self.split_internal(page_no, frame, separator)
                }
            }
        }
    }

    /// Splits a full leaf around the pending entry. Emits the separator and
    /// unpins both pages dirty.
    fn split_leaf(
        &self,
        left_no: PageId,
        left_frame: &BufferFrame,
        key: i32,
        rid: RecordId,
    ) -> Result<Option<Separator>> {
        let (right_no, right_frame) = match self.pager.alloc_page(&self.file) {
            Ok(pair) => pair,
            Err(e) => {
                let _ = self.pager.unpin_page(&self.file, left_no, false);
                return Err(e);
            }
        };

        let separator_key = {
            let mut left_data = left_frame.write_data();
            let mut right_data = right_frame.write_data();
            let mut left = LeafMut::new(&mut **left_data);
            let mut right = LeafMut::new(&mut **right_data);
            left.split_into(&mut right, right_no, key, rid)
        };
        trace!(left = left_no, right = right_no, separator = separator_key, "leaf split");

        let first = self.pager.unpin_page(&self.file, left_no, true);
        let second = self.pager.unpin_page(&self.file, right_no, true);
        first?;
        second?;

        Ok(Some(Separator {
            key: separator_key,
            page_no: right_no,
        }))
    }

    /// Splits a full internal node, routing the pending separator to the
    /// side of the push-up key it belongs to. Emits the push-up separator
    /// and unpins both pages dirty.
    fn split_internal(
        &self,
        left_no: PageId,
        left_frame: &BufferFrame,
        pending: Separator,
    ) -> Result<Option<Separator>> {
        let (right_no, right_frame) = match self.pager.alloc_page(&self.file) {
            Ok(pair) => pair,
            Err(e) => {
                let _ = self.pager.unpin_page(&self.file, left_no, false);
                return Err(e);
            }
        };

        let pushed_key = {
            let mut left_data = left_frame.write_data();
            let mut right_data = right_frame.write_data();
            let mut left = InternalMut::new(&mut **left_data);
            let mut right = InternalMut::new(&mut **right_data);
            let pushed = left.split_into(&mut right, pending.key);
            if pending.key > pushed {
                right.insert(pending.key, pending.page_no);
            } else {
                left.insert(pending.key, pending.page_no);
            }
            pushed
        };
        trace!(left = left_no, right = right_no, pushed = pushed_key, "internal split");

        let first = self.pager.unpin_page(&self.file, left_no, true);
        let second = self.pager.unpin_page(&self.file, right_no, true);
        first?;
        second?;

        Ok(Some(Separator {
            key: pushed_key,
            page_no: right_no,
        }))
    }

    /// Installs a new root above the former one after a root split and
    /// records it in the meta page.
    fn promote_root(&mut self, separator: Separator, root_was_leaf: bool) -> Result<()> {
        let former_root = self.root_page_no;
        let (new_root_no, frame) = self.pager.alloc_page(&self.file)?;
        {
            let mut data = frame.write_data();
            let mut node = InternalMut::new(&mut **data);
            node.set_level(if root_was_leaf { 1 } else { 0 });
            node.set_child(0, former_root);
            node.set_child(1, separator.page_no);
            node.set_key(0, separator.key);
        }

        let meta_frame = match self.pager.fetch_page(&self.file, self.header_page_no) {
            Ok(frame) => frame,
            Err(e) => {
                let _ = self.pager.unpin_page(&self.file, new_root_no, true);
                return Err(e);
            }
        };
        IndexMeta::write_root(&mut **meta_frame.write_data(), new_root_no);
        let first = self.pager.unpin_page(&self.file, self.header_page_no, true);
        let second = self.pager.unpin_page(&self.file, new_root_no, true);
        first?;
        second?;

        self.root_page_no = new_root_no;
        debug!(index = %self.index_name, new_root = new_root_no, former_root, "root promoted");
        Ok(())
    }

    // -- Range scan --------------------------------------------------------

    /// Begins a range scan bounded by `low`/`high` under the given
    /// operators and positions on the first qualifying entry.
    ///
    /// The low operator must be `Gt`/`Gte` and the high operator `Lt`/`Lte`
    /// (`BadOperator` otherwise); `low` must not exceed `high`
    /// (`BadRange`). An already-executing scan is ended first. Fails with
    /// `NoSuchKey` when nothing in the tree qualifies; on success the leaf
    /// holding the first match stays pinned.
    pub fn start_scan(&mut self, low: i32, low_op: ScanOp, high: i32, high_op: ScanOp) -> Result<()> {
        if !matches!(low_op, ScanOp::Gt | ScanOp::Gte)
            || !matches!(high_op, ScanOp::Lt | ScanOp::Lte)
        {
            return Err(KestrelError::BadOperator);
        }
        if low > high {
            return Err(KestrelError::BadRange { low, high });
        }

        if !matches!(self.scan, ScanState::Idle) {
            self.end_scan()?;
        }

        // Descend towards the leaf that could hold the first qualifying
        // key. The node whose level flag is 1 is the last internal one.
        let mut page_no = self.root_page_no;
        let mut frame = self.pager.fetch_page(&self.file, page_no)?;
        if !self.is_root_leaf() {
            loop {
                let (level, child_no) = {
                    let data = frame.read_data();
                    let node = InternalRef::new(&**data);
                    (node.level(), node.find_child(low))
                };
                self.pager.unpin_page(&self.file, page_no, false)?;
                frame = self.pager.fetch_page(&self.file, child_no)?;
                page_no = child_no;
                if level == 1 {
                    break;
                }
            }
        }

        // Seek the first slot satisfying the predicate, walking the
        // sibling chain when a leaf holds only smaller keys.
        enum Position {
            Found(usize),
            Exhausted(PageId),
            PastHigh,
        }
        loop {
            let position = {
                let data = frame.read_data();
                let leaf = LeafRef::new(&**data);
                let occupied = leaf.occupied();
                let mut position = Position::Exhausted(leaf.right_sibling());
                for slot in 0..occupied {
                    let key = leaf.key(slot);
                    if satisfies(low, low_op, high, high_op, key) {
                        position = Position::Found(slot);
                        break;
                    }
                    let past_high = match high_op {
                        ScanOp::Lt => key >= high,
                        _ => key > high,
                    };
                    if past_high {
                        position = Position::PastHigh;
                        break;
                    }
                }
                if occupied == 0 {
                    position = Position::PastHigh;
                }
                position
            };

            match position {
                Position::Found(slot) => {
                    trace!(index = %self.index_name, leaf = page_no, slot, "scan positioned");
                    self.scan = ScanState::Active {
                        page_no,
                        next_entry: slot,
                        low,
                        low_op,
                        high,
                        high_op,
                    };
                    return Ok(());
                }
                Position::PastHigh => {
                    self.pager.unpin_page(&self.file, page_no, false)?;
                    return Err(KestrelError::NoSuchKey);
                }
                Position::Exhausted(sibling) => {
                    self.pager.unpin_page(&self.file, page_no, false)?;
                    if sibling == NO_PAGE {
                        return Err(KestrelError::NoSuchKey);
                    }
                    frame = self.pager.fetch_page(&self.file, sibling)?;
                    page_no = sibling;
                }
            }
        }
    }

    /// Returns the record id of the next qualifying entry.
    ///
    /// Crosses to the right sibling when the current leaf is exhausted;
    /// running off the last leaf releases the pin before
    /// `IndexScanCompleted` surfaces. A later `end_scan` is still valid.
    pub fn scan_next(&mut self) -> Result<RecordId> {
        let (mut page_no, mut next_entry, low, low_op, high, high_op) = match self.scan {
            ScanState::Idle => return Err(KestrelError::ScanNotInitialized),
            ScanState::Drained => return Err(KestrelError::IndexScanCompleted),
            ScanState::Active {
                page_no,
                next_entry,
                low,
                low_op,
                high,
                high_op,
            } => (page_no, next_entry, low, low_op, high, high_op),
        };

        // Hop to the right sibling when this leaf is used up.
        let hop = {
            let frame = self.pager.pinned_frame(&self.file, page_no)?;
            let data = frame.read_data();
            let leaf = LeafRef::new(&**data);
            if next_entry == LEAF_CAPACITY || leaf.rid(next_entry).is_null() {
                Some(leaf.right_sibling())
            } else {
                None
            }
        };
        if let Some(sibling) = hop {
            self.pager.unpin_page(&self.file, page_no, false)?;
            if sibling == NO_PAGE {
                self.scan = ScanState::Drained;
                return Err(KestrelError::IndexScanCompleted);
            }
            match self.pager.fetch_page(&self.file, sibling) {
                Ok(_) => {}
                Err(e) => {
                    // No pin is held anymore; park the scan.
                    self.scan = ScanState::Drained;
                    return Err(e);
                }
            }
            page_no = sibling;
            next_entry = 0;
            self.scan = ScanState::Active {
                page_no,
                next_entry,
                low,
                low_op,
                high,
                high_op,
            };
        }

        let (key, rid) = {
            let frame = self.pager.pinned_frame(&self.file, page_no)?;
            let data = frame.read_data();
            let leaf = LeafRef::new(&**data);
            (leaf.key(next_entry), leaf.rid(next_entry))
        };

        if satisfies(low, low_op, high, high_op, key) {
            self.scan = ScanState::Active {
                page_no,
                next_entry: next_entry + 1,
                low,
                low_op,
                high,
                high_op,
            };
            Ok(rid)
        } else {
            // Past the upper bound. The leaf stays pinned until end_scan.
            Err(KestrelError::IndexScanCompleted)
        }
    }

    /// Terminates the scan, releasing the pinned leaf if one is held.
    pub fn end_scan(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.scan, ScanState::Idle) {
            ScanState::Idle => Err(KestrelError::ScanNotInitialized),
            ScanState::Active { page_no, .. } => {
                self.pager.unpin_page(&self.file, page_no, false)
            }
            ScanState::Drained => Ok(()),
        }
    }

    // -- Shutdown ----------------------------------------------------------

    /// Ends any active scan, flushes the index file, and releases its
    /// buffer pool frames.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if !matches!(self.scan, ScanState::Idle) {
            self.end_scan()?;
        }
        self.pager.close_file(&self.file)
    }
}

impl Drop for BTreeIndex {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

/// Reads the index key out of a record at the attribute offset.
fn extract_key(record: &[u8], offset: usize) -> Result<i32> {
    let bytes = record.get(offset..offset + 4).ok_or_else(|| {
        KestrelError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!(
                "record of {} bytes has no key at offset {}",
                record.len(),
                offset
            ),
        ))
    })?;
    Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Range predicate for one key against both scan bounds.
fn satisfies(low: i32, low_op: ScanOp, high: i32, high_op: ScanOp, key: i32) -> bool {
    match (low_op, high_op) {
        (ScanOp::Gte, ScanOp::Lte) => key >= low && key <= high,
        (ScanOp::Gt, ScanOp::Lte) => key > low && key <= high,
        (ScanOp::Gte, ScanOp::Lt) => key >= low && key < high,
        _ => key > low && key < high,
    }
}
