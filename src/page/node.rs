//! Slotted node implementation.
//!
//! A node page uses the following layout:
//! ```text
//! Offset  Size        Description
//! 0       1           Node type (1 = leaf, 2 = branch)
//! 1       2           Entry count
//! 3       count * 2   Offset table: one u16 per entry, sorted by key
//! ...                 Records, packed forward after the table
//! ```
//!
//! Each record is `key_len(u16) | val_len(u16) | key | val`. For leaf
//! entries the value is the user payload; for branch entries it is an
//! 8-byte little-endian child page id. All integers are little-endian.
//!
//! Unlike the classical slotted page, both the offset table and the
//! record heap grow toward increasing offsets. An insert whose table
//! would collide with the heap (or whose record would run past the page
//! end) first compacts the page into a contiguous forward-packed form,
//! so the layout is re-normalized on every collision.

use crate::error::{Result, StoreError};
use crate::page::PageBuf;
use crate::types::{
    NodeType, PageId, CHILD_ID_SIZE, NODE_HEADER_SIZE, PAGE_SIZE, RECORD_HEADER_SIZE, SLOT_SIZE,
};

/// A B-tree node over a fixed-size page buffer
#[derive(Clone)]
pub struct Node {
    data: PageBuf,
}

impl Node {
    /// Create a new empty node of the given type
    pub fn new(node_type: NodeType) -> Self {
        let mut data = PageBuf::new();
        data[0] = node_type as u8;
        Self { data }
    }

    /// Wrap a page buffer read from disk
    pub fn from_buf(data: PageBuf) -> Self {
        Self { data }
    }

    /// Get the raw bytes of this node
    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_bytes()
    }

    /// Decode the node type from the header
    pub fn kind(&self) -> Result<NodeType> {
        NodeType::from_byte(self.data[0])
            .ok_or_else(|| StoreError::corruption(format!("unknown node type {}", self.data[0])))
    }

    /// Number of entries in this node
    pub fn count(&self) -> u16 {
        u16::from_le_bytes([self.data[1], self.data[2]])
    }

    fn set_count(&mut self, count: u16) {
        self.data[1..3].copy_from_slice(&count.to_le_bytes());
    }

    fn slot(&self, index: u16) -> u16 {
        let pos = NODE_HEADER_SIZE + SLOT_SIZE * index as usize;
        u16::from_le_bytes([self.data[pos], self.data[pos + 1]])
    }

    fn set_slot(&mut self, index: u16, offset: u16) {
        let pos = NODE_HEADER_SIZE + SLOT_SIZE * index as usize;
        self.data[pos..pos + SLOT_SIZE].copy_from_slice(&offset.to_le_bytes());
    }

    /// Decode the record at the given slot.
    ///
    /// Validates that the record lies entirely within the page; a
    /// violation means the page is structurally inconsistent.
    pub fn record(&self, index: u16) -> Result<(&[u8], &[u8])> {
        if index >= self.count() {
            return Err(StoreError::corruption(format!(
                "slot index {} out of bounds (count: {})",
                index,
                self.count()
            )));
        }

        let offset = self.slot(index) as usize;
        if offset + RECORD_HEADER_SIZE > PAGE_SIZE {
            return Err(StoreError::corruption(format!(
                "slot {} points at offset {} past the page end",
                index, offset
            )));
        }

        let key_len = u16::from_le_bytes([self.data[offset], self.data[offset + 1]]) as usize;
        let val_len = u16::from_le_bytes([self.data[offset + 2], self.data[offset + 3]]) as usize;

        let key_start = offset + RECORD_HEADER_SIZE;
        let key_end = key_start + key_len;
        let val_end = key_end + val_len;

        if val_end > PAGE_SIZE {
            return Err(StoreError::corruption(format!(
                "record at slot {} extends beyond the page (offset={}, key_len={}, val_len={})",
                index, offset, key_len, val_len
            )));
        }

        Ok((&self.data[key_start..key_end], &self.data[key_end..val_end]))
    }

    /// Binary search over the slots.
    ///
    /// Returns the lowest index whose key is `>= key`, and whether that
    /// index holds an exact match.
    pub fn find(&self, key: &[u8]) -> Result<(u16, bool)> {
        let mut low = 0u16;
        let mut high = self.count();

        while low < high {
            let mid = low + (high - low) / 2;
            let (mid_key, _) = self.record(mid)?;
            if mid_key < key {
                low = mid + 1;
            } else {
                high = mid;
            }
        }

        let found = if low < self.count() {
            let (found_key, _) = self.record(low)?;
            found_key == key
        } else {
            false
        };

        Ok((low, found))
    }

    /// Select the child to descend into for the given key.
    ///
    /// The child with the greatest pivot `<= key` owns the key; if every
    /// pivot is greater, descent falls through to child 0.
    pub fn child_index(&self, key: &[u8]) -> Result<u16> {
        // Upper bound: first slot whose key is strictly greater.
        let mut low = 0u16;
        let mut high = self.count();

        while low < high {
            let mid = low + (high - low) / 2;
            let (mid_key, _) = self.record(mid)?;
            if mid_key <= key {
                low = mid + 1;
            } else {
                high = mid;
            }
        }

        Ok(low.saturating_sub(1))
    }

    /// Decode the child page id of a branch entry
    pub fn child(&self, index: u16) -> Result<PageId> {
        let (_, payload) = self.record(index)?;
        if payload.len() != CHILD_ID_SIZE {
            return Err(StoreError::corruption(format!(
                "branch entry {} has a {}-byte payload, expected {}",
                index,
                payload.len(),
                CHILD_ID_SIZE
            )));
        }

        let mut raw = [0u8; CHILD_ID_SIZE];
        raw.copy_from_slice(payload);
        let raw = u64::from_le_bytes(raw);
        let id = u32::try_from(raw)
            .map_err(|_| StoreError::corruption(format!("child page id {} out of range", raw)))?;
        Ok(PageId::new(id))
    }

    /// Overwrite the child page id of a branch entry in place
    pub fn set_child(&mut self, index: u16, child: PageId) -> Result<()> {
        let (key, payload) = self.record(index)?;
        if payload.len() != CHILD_ID_SIZE {
            return Err(StoreError::corruption(format!(
                "branch entry {} has a {}-byte payload, expected {}",
                index,
                payload.len(),
                CHILD_ID_SIZE
            )));
        }

        let payload_start = self.slot(index) as usize + RECORD_HEADER_SIZE + key.len();
        let raw = u64::from(child.value()).to_le_bytes();
        self.data[payload_start..payload_start + CHILD_ID_SIZE].copy_from_slice(&raw);
        Ok(())
    }

    /// Insert a user record into a leaf node
    pub fn leaf_insert(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.insert_record(key, value)
    }

    /// Insert a routing entry into a branch node
    pub fn branch_insert(&mut self, key: &[u8], child: PageId) -> Result<()> {
        let payload = u64::from(child.value()).to_le_bytes();
        self.insert_record(key, &payload)
    }

    /// Insert a record at its sorted position.
    ///
    /// The new record is written at the current end of the heap. If the
    /// grown offset table would collide with the heap, or the record
    /// would run past the page end, the node is compacted first; if even
    /// the compacted form cannot host the record, the node must split.
    fn insert_record(&mut self, key: &[u8], payload: &[u8]) -> Result<()> {
        let (index, found) = self.find(key)?;
        if found {
            return Err(StoreError::KeyExists);
        }

        let count = self.count();
        let entry_size = RECORD_HEADER_SIZE + key.len() + payload.len();

        let mut heap_start = PAGE_SIZE;
        let mut max_end = 0usize;
        for i in 0..count {
            let offset = self.slot(i) as usize;
            heap_start = heap_start.min(offset);
            let (k, v) = self.record(i)?;
            max_end = max_end.max(offset + RECORD_HEADER_SIZE + k.len() + v.len());
        }

        if count == 0 {
            heap_start = NODE_HEADER_SIZE + SLOT_SIZE;
            max_end = heap_start;
        }

        let table_end = NODE_HEADER_SIZE + (count as usize + 1) * SLOT_SIZE;
        if max_end < table_end {
            max_end = table_end;
        }

        if table_end > heap_start || max_end + entry_size > PAGE_SIZE {
            max_end = self.compact(true)? as usize;
            if max_end + entry_size > PAGE_SIZE {
                return Err(StoreError::NodeFull);
            }
        }

        // Open a slot gap at the insertion index.
        let gap_start = NODE_HEADER_SIZE + index as usize * SLOT_SIZE;
        let table_used = NODE_HEADER_SIZE + count as usize * SLOT_SIZE;
        self.data
            .copy_within(gap_start..table_used, gap_start + SLOT_SIZE);

        self.write_record(index, max_end as u16, key, payload);
        self.set_count(count + 1);

        Ok(())
    }

    /// Write a record and its slot without any fit checking; callers
    /// guarantee the range is free
    fn write_record(&mut self, index: u16, offset: u16, key: &[u8], payload: &[u8]) {
        let offset = offset as usize;
        debug_assert!(offset + RECORD_HEADER_SIZE + key.len() + payload.len() <= PAGE_SIZE);

        self.set_slot(index, offset as u16);

        self.data[offset..offset + 2].copy_from_slice(&(key.len() as u16).to_le_bytes());
        self.data[offset + 2..offset + 4].copy_from_slice(&(payload.len() as u16).to_le_bytes());

        let key_start = offset + RECORD_HEADER_SIZE;
        let val_start = key_start + key.len();
        self.data[key_start..val_start].copy_from_slice(key);
        self.data[val_start..val_start + payload.len()].copy_from_slice(payload);
    }

    /// Rebuild the page into a contiguous forward-packed layout,
    /// optionally reserving room for one additional slot.
    ///
    /// Returns the offset where the next record can be written, or
    /// `NodeFull` if the contents plus the reserved slot cannot fit.
    fn compact(&mut self, reserve_slot: bool) -> Result<u16> {
        let count = self.count();
        let reserved = if reserve_slot { 1 } else { 0 };

        if count == 0 {
            return Ok((NODE_HEADER_SIZE + reserved * SLOT_SIZE) as u16);
        }

        let mut records = Vec::with_capacity(count as usize);
        for i in 0..count {
            let (key, val) = self.record(i)?;
            records.push((key.to_vec(), val.to_vec()));
        }

        let start_pos = NODE_HEADER_SIZE + (count as usize + reserved) * SLOT_SIZE;
        let total: usize = start_pos
            + records
                .iter()
                .map(|(k, v)| RECORD_HEADER_SIZE + k.len() + v.len())
                .sum::<usize>();
        if total > PAGE_SIZE {
            return Err(StoreError::NodeFull);
        }

        let mut pos = start_pos;
        for (i, (key, val)) in records.iter().enumerate() {
            self.write_record(i as u16, pos as u16, key, val);
            pos += RECORD_HEADER_SIZE + key.len() + val.len();
        }

        Ok(pos as u16)
    }

    /// Split this node in half.
    ///
    /// Entries `[count/2, count)` move to a fresh node of the same type,
    /// packed contiguously; this node keeps the lower half and is
    /// compacted. Returns the new node and a deep copy of the median key
    /// to promote into the parent. The caller inserts the entry that
    /// triggered the split into whichever half owns its key range
    /// (strictly below the promoted key means this node).
    pub fn split(&mut self) -> Result<(Node, Vec<u8>)> {
        let count = self.count();
        let middle = count / 2;

        let (median, _) = self.record(middle)?;
        let promote_key = median.to_vec();

        let mut new_node = Node::new(self.kind()?);
        let new_count = count - middle;

        let mut write_pos = NODE_HEADER_SIZE + new_count as usize * SLOT_SIZE;
        for i in 0..new_count {
            let (key, val) = self.record(middle + i)?;
            new_node.write_record(i, write_pos as u16, key, val);
            write_pos += RECORD_HEADER_SIZE + key.len() + val.len();
        }
        new_node.set_count(new_count);

        self.set_count(middle);
        self.compact(false)?;

        Ok((new_node, promote_key))
    }

    /// Deep copy of the first key in this node
    pub fn first_key(&self) -> Result<Vec<u8>> {
        let (key, _) = self.record(0)?;
        Ok(key.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled_leaf(entries: &[(&[u8], &[u8])]) -> Node {
        let mut node = Node::new(NodeType::Leaf);
        for (key, val) in entries {
            node.leaf_insert(key, val).unwrap();
        }
        node
    }

    #[test]
    fn test_new_node_header() {
        let node = Node::new(NodeType::Leaf);
        assert_eq!(node.kind().unwrap(), NodeType::Leaf);
        assert_eq!(node.count(), 0);

        let node = Node::new(NodeType::Branch);
        assert_eq!(node.kind().unwrap(), NodeType::Branch);
    }

    #[test]
    fn test_unknown_type_byte_is_corruption() {
        let mut buf = PageBuf::new();
        buf[0] = 9;
        let node = Node::from_buf(buf);
        assert!(matches!(node.kind(), Err(StoreError::Corruption(_))));
    }

    #[test]
    fn test_insert_keeps_sorted_order() -> Result<()> {
        let node = filled_leaf(&[
            (b"banana", b"yellow"),
            (b"apple", b"red"),
            (b"cherry", b"dark"),
        ]);

        assert_eq!(node.count(), 3);
        assert_eq!(node.record(0)?.0, b"apple");
        assert_eq!(node.record(1)?.0, b"banana");
        assert_eq!(node.record(2)?.0, b"cherry");
        assert_eq!(node.record(1)?.1, b"yellow");

        Ok(())
    }

    #[test]
    fn test_find() -> Result<()> {
        let node = filled_leaf(&[(b"a", b"1"), (b"c", b"3"), (b"e", b"5")]);

        assert_eq!(node.find(b"a")?, (0, true));
        assert_eq!(node.find(b"c")?, (1, true));
        assert_eq!(node.find(b"e")?, (2, true));
        assert_eq!(node.find(b"b")?, (1, false));
        assert_eq!(node.find(b"f")?, (3, false));
        assert_eq!(node.find(b"")?, (0, false));

        Ok(())
    }

    #[test]
    fn test_duplicate_key_is_rejected() {
        let mut node = filled_leaf(&[(b"k", b"v1")]);
        assert!(matches!(
            node.leaf_insert(b"k", b"v2"),
            Err(StoreError::KeyExists)
        ));
        assert_eq!(node.count(), 1);
    }

    #[test]
    fn test_branch_child_roundtrip() -> Result<()> {
        let mut node = Node::new(NodeType::Branch);
        node.branch_insert(b"m", PageId::new(7))?;
        node.branch_insert(b"a", PageId::new(3))?;

        assert_eq!(node.child(0)?, PageId::new(3));
        assert_eq!(node.child(1)?, PageId::new(7));

        node.set_child(1, PageId::new(42))?;
        assert_eq!(node.child(1)?, PageId::new(42));
        assert_eq!(node.child(0)?, PageId::new(3));

        Ok(())
    }

    #[test]
    fn test_child_index_predecessor_rule() -> Result<()> {
        let mut node = Node::new(NodeType::Branch);
        node.branch_insert(b"g", PageId::new(1))?;
        node.branch_insert(b"m", PageId::new(2))?;
        node.branch_insert(b"t", PageId::new(3))?;

        // Below the first pivot descent falls through to child 0.
        assert_eq!(node.child_index(b"a")?, 0);
        assert_eq!(node.child_index(b"g")?, 0);
        assert_eq!(node.child_index(b"h")?, 0);
        assert_eq!(node.child_index(b"m")?, 1);
        assert_eq!(node.child_index(b"s")?, 1);
        assert_eq!(node.child_index(b"t")?, 2);
        assert_eq!(node.child_index(b"z")?, 2);

        Ok(())
    }

    #[test]
    fn test_single_entry_branch_descends_to_child_zero() -> Result<()> {
        let mut node = Node::new(NodeType::Branch);
        node.branch_insert(b"m", PageId::new(9))?;

        assert_eq!(node.child_index(b"a")?, 0);
        assert_eq!(node.child_index(b"m")?, 0);
        assert_eq!(node.child_index(b"z")?, 0);

        Ok(())
    }

    #[test]
    fn test_compaction_under_fragmentation() -> Result<()> {
        // Sized so that the growing offset table repeatedly collides
        // with the heap edge and inserts go through compact(reserve).
        let mut node = Node::new(NodeType::Leaf);
        let value = vec![0xABu8; 200];

        let mut inserted = 0u16;
        for i in 0..16 {
            let key = format!("key:{i:04}");
            node.leaf_insert(key.as_bytes(), &value)?;
            inserted += 1;
            assert_eq!(node.count(), inserted);
        }

        // Every record is retrievable, in order, within bounds.
        for i in 0..inserted {
            let (key, val) = node.record(i)?;
            assert_eq!(key, format!("key:{i:04}").as_bytes());
            assert_eq!(val, &value[..]);
        }

        Ok(())
    }

    #[test]
    fn test_node_full_when_compaction_cannot_fit() {
        let mut node = Node::new(NodeType::Leaf);
        let value = vec![0xCDu8; 900];

        let mut err = None;
        for i in 0..10 {
            let key = format!("key:{i:04}");
            if let Err(e) = node.leaf_insert(key.as_bytes(), &value) {
                err = Some(e);
                break;
            }
        }

        assert!(matches!(err, Some(StoreError::NodeFull)));
        // Four ~910-byte records fit in a 4096-byte page; the fifth does not.
        assert_eq!(node.count(), 4);
    }

    #[test]
    fn test_split_distributes_entries() -> Result<()> {
        let mut node = Node::new(NodeType::Leaf);
        for i in 0..10 {
            let key = format!("key{i:02}");
            let val = format!("value{i}");
            node.leaf_insert(key.as_bytes(), val.as_bytes())?;
        }

        let (new_node, promote) = node.split()?;

        assert_eq!(node.count(), 5);
        assert_eq!(new_node.count(), 5);
        assert_eq!(promote, new_node.record(0)?.0);

        // Everything left of the promoted key stays in the original.
        for i in 0..node.count() {
            assert!(node.record(i)?.0 < &promote[..]);
        }
        for i in 0..new_node.count() {
            assert!(new_node.record(i)?.0 >= &promote[..]);
        }

        Ok(())
    }

    #[test]
    fn test_split_preserves_branch_type() -> Result<()> {
        let mut node = Node::new(NodeType::Branch);
        for i in 0..8 {
            let key = format!("pivot{i}");
            node.branch_insert(key.as_bytes(), PageId::new(i as u32 + 1))?;
        }

        let (new_node, _) = node.split()?;
        assert_eq!(new_node.kind()?, NodeType::Branch);
        assert_eq!(new_node.child(0)?, PageId::new(5));

        Ok(())
    }

    #[test]
    fn test_insert_after_split_goes_to_owning_half() -> Result<()> {
        let mut node = Node::new(NodeType::Leaf);
        for i in (0..20).step_by(2) {
            let key = format!("key{i:02}");
            node.leaf_insert(key.as_bytes(), b"v")?;
        }

        let (mut new_node, promote) = node.split()?;

        let pending = b"key07";
        if &pending[..] < &promote[..] {
            node.leaf_insert(pending, b"v")?;
            let (idx, found) = node.find(pending)?;
            assert!(found);
            assert_eq!(node.record(idx)?.0, pending);
        } else {
            new_node.leaf_insert(pending, b"v")?;
        }

        Ok(())
    }

    #[test]
    fn test_out_of_bounds_slot_is_corruption() {
        let mut buf = PageBuf::new();
        buf[0] = NodeType::Leaf as u8;
        buf[1..3].copy_from_slice(&1u16.to_le_bytes());
        // Slot 0 points near the end of the page so the record header
        // cannot fit.
        buf[3..5].copy_from_slice(&(PAGE_SIZE as u16 - 2).to_le_bytes());

        let node = Node::from_buf(buf);
        assert!(matches!(node.record(0), Err(StoreError::Corruption(_))));
    }

    #[test]
    fn test_record_past_page_end_is_corruption() {
        let mut buf = PageBuf::new();
        buf[0] = NodeType::Leaf as u8;
        buf[1..3].copy_from_slice(&1u16.to_le_bytes());
        buf[3..5].copy_from_slice(&4000u16.to_le_bytes());
        // key_len 200 at offset 4000 runs past the page.
        buf[4000..4002].copy_from_slice(&200u16.to_le_bytes());
        buf[4002..4004].copy_from_slice(&0u16.to_le_bytes());

        let node = Node::from_buf(buf);
        assert!(matches!(node.record(0), Err(StoreError::Corruption(_))));
    }
}
