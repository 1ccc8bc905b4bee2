//! Transactions.
//!
//! A `Tx` is a copy-on-write workspace over the pager. Reads descend
//! from the root id sampled when the transaction began, consulting the
//! transaction's dirty-node map before the file. Writes never touch a
//! committed page: the first mutation of an existing page copies it to a
//! freshly allocated id, the parent's child pointer is repointed as the
//! relocation propagates upward, and the old id is queued for release.
//! Commit makes the staged tree durable in two ordered phases: data
//! pages are written and synced first, then the meta page is rewritten
//! with the new root and synced. A crash anywhere before the second sync
//! leaves the old meta pointing at the old, untouched tree.

use crate::error::{Result, StoreError};
use crate::page::{Node, PageBuf};
use crate::storage::{Meta, Pager};
use crate::types::{NodeType, PageId, MAX_KEY_SIZE, MAX_RECORD_SIZE, MAX_VALUE_SIZE, RECORD_HEADER_SIZE};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// A transaction over the store.
///
/// Obtained through [`Db::update`](crate::Db::update) (writable) or
/// [`Db::view`](crate::Db::view) (read-only). A writable transaction
/// that is not committed rolls back on drop, including when the user
/// closure panics.
pub struct Tx<'db> {
    pager: &'db Pager,
    writable: bool,
    meta: Meta,
    /// Root id sampled at begin; readers never see past it
    begin_root: PageId,
    /// Current root as advanced by relocations and root splits
    root: PageId,
    dirty: HashMap<PageId, Node>,
    /// Pages allocated by this transaction
    allocated: HashSet<PageId>,
    /// Old ids of relocated pages, released after a successful commit
    freed: Vec<PageId>,
    committed: bool,
    sync_on_commit: bool,
}

impl<'db> Tx<'db> {
    pub(crate) fn begin(
        pager: &'db Pager,
        meta: Meta,
        root: PageId,
        writable: bool,
        sync_on_commit: bool,
    ) -> Self {
        Self {
            pager,
            writable,
            meta,
            begin_root: root,
            root,
            dirty: HashMap::new(),
            allocated: HashSet::new(),
            freed: Vec::new(),
            committed: false,
            sync_on_commit,
        }
    }

    /// Look up the value stored under `key`
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let leaf = self.find_leaf(key)?;
        let (index, found) = leaf.find(key)?;
        if !found {
            return Err(StoreError::KeyNotFound);
        }

        let (_, value) = leaf.record(index)?;
        Ok(value.to_vec())
    }

    /// Insert a key-value pair.
    ///
    /// Fails with `KeyExists` if an equal key is already present; this
    /// store does not overwrite in place.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(StoreError::invalid_operation(
                "cannot write in a read-only transaction",
            ));
        }
        if key.len() > MAX_KEY_SIZE {
            return Err(StoreError::KeyTooLarge {
                size: key.len(),
                max: MAX_KEY_SIZE,
            });
        }
        if value.len() > MAX_VALUE_SIZE {
            return Err(StoreError::ValueTooLarge {
                size: value.len(),
                max: MAX_VALUE_SIZE,
            });
        }
        let entry_size = RECORD_HEADER_SIZE + key.len() + value.len();
        if entry_size > MAX_RECORD_SIZE {
            return Err(StoreError::ValueTooLarge {
                size: value.len(),
                max: MAX_RECORD_SIZE.saturating_sub(RECORD_HEADER_SIZE + key.len()),
            });
        }

        let (new_root, promotion) = self.insert_recursive(self.root, key, value)?;
        self.root = new_root;

        if let Some((promote_key, promoted_child)) = promotion {
            self.split_root(promote_key, promoted_child)?;
        }

        Ok(())
    }

    /// Number of levels from the root down to the leaves
    pub fn height(&self) -> Result<usize> {
        let mut height = 1;
        let mut node = self.node_at(self.root)?;
        while !node.kind()?.is_leaf() {
            node = self.node_at(node.child(0)?)?;
            height += 1;
        }
        Ok(height)
    }

    /// Make the staged tree durable.
    ///
    /// Data pages are written and synced before the meta page is updated
    /// and synced; old ids of relocated pages go back to the free list
    /// only once the meta swap is complete.
    pub(crate) fn commit(mut self) -> Result<PageId> {
        if !self.writable {
            return Err(StoreError::invalid_operation(
                "cannot commit a read-only transaction",
            ));
        }

        for (page_id, node) in &self.dirty {
            self.pager.write(*page_id, node.as_bytes())?;
        }
        if self.sync_on_commit {
            self.pager.sync()?;
        }

        if self.root != self.begin_root {
            let mut meta = self.meta;
            meta.root = self.root.value();
            let mut buf = PageBuf::new();
            meta.serialize(&mut buf);
            self.pager.write(PageId::META, &buf)?;
            if self.sync_on_commit {
                self.pager.sync()?;
            }
        }

        for page_id in self.freed.drain(..) {
            self.pager.release(page_id);
        }

        debug!(
            pages = self.dirty.len(),
            root = %self.root,
            "tx.commit.complete"
        );

        self.committed = true;
        Ok(self.root)
    }

    /// Fetch the node backing `page_id` as seen by this transaction:
    /// the staged copy if the page is dirty, else the on-disk page
    fn node_at(&self, page_id: PageId) -> Result<Node> {
        if let Some(node) = self.dirty.get(&page_id) {
            return Ok(node.clone());
        }
        Ok(Node::from_buf(self.pager.read(page_id)?))
    }

    /// Root-to-leaf descent for the given key
    fn find_leaf(&self, key: &[u8]) -> Result<Node> {
        let mut node = self.node_at(self.root)?;
        loop {
            if node.kind()?.is_leaf() {
                return Ok(node);
            }
            let index = node.child_index(key)?;
            node = self.node_at(node.child(index)?)?;
        }
    }

    /// Pick the id a modified copy of `page_id` will live at.
    ///
    /// Pages this transaction allocated are rewritten under their own
    /// id; committed pages relocate to a fresh id and their old id is
    /// queued for release after the meta swap.
    fn shadow(&mut self, page_id: PageId) -> PageId {
        if self.allocated.contains(&page_id) {
            return page_id;
        }
        let new_id = self.allocate_node();
        self.freed.push(page_id);
        new_id
    }

    fn allocate_node(&mut self) -> PageId {
        let page_id = self.pager.allocate();
        self.allocated.insert(page_id);
        page_id
    }

    /// Recursive insert with split propagation.
    ///
    /// Returns the id the descended subtree now lives at (relocations
    /// propagate upward through the returned id) and, when the subtree
    /// root split, the promoted key with the new right sibling's id.
    fn insert_recursive(
        &mut self,
        page_id: PageId,
        key: &[u8],
        value: &[u8],
    ) -> Result<(PageId, Option<(Vec<u8>, PageId)>)> {
        // A fresh copy even when the page is already dirty; the staged
        // entry is replaced wholesale below.
        let mut node = self.node_at(page_id)?;

        if node.kind()?.is_leaf() {
            return match node.leaf_insert(key, value) {
                Ok(()) => {
                    let new_id = self.shadow(page_id);
                    self.dirty.insert(new_id, node);
                    Ok((new_id, None))
                }
                Err(StoreError::NodeFull) => {
                    let (mut sibling, promote_key) = node.split()?;
                    if key < &promote_key[..] {
                        node.leaf_insert(key, value)?;
                    } else {
                        sibling.leaf_insert(key, value)?;
                    }

                    let new_id = self.shadow(page_id);
                    let sibling_id = self.allocate_node();
                    self.dirty.insert(new_id, node);
                    self.dirty.insert(sibling_id, sibling);
                    Ok((new_id, Some((promote_key, sibling_id))))
                }
                Err(err) => Err(err),
            };
        }

        let index = node.child_index(key)?;
        let child_id = node.child(index)?;

        let (new_child_id, promotion) = self.insert_recursive(child_id, key, value)?;
        if new_child_id != child_id {
            node.set_child(index, new_child_id)?;
        }

        let Some((promote_key, promoted_child)) = promotion else {
            let new_id = self.shadow(page_id);
            self.dirty.insert(new_id, node);
            return Ok((new_id, None));
        };

        match node.branch_insert(&promote_key, promoted_child) {
            Ok(()) => {
                let new_id = self.shadow(page_id);
                self.dirty.insert(new_id, node);
                Ok((new_id, None))
            }
            Err(StoreError::NodeFull) => {
                let (mut sibling, promote_up) = node.split()?;
                if promote_key < promote_up {
                    node.branch_insert(&promote_key, promoted_child)?;
                } else {
                    sibling.branch_insert(&promote_key, promoted_child)?;
                }

                let new_id = self.shadow(page_id);
                let sibling_id = self.allocate_node();
                self.dirty.insert(new_id, node);
                self.dirty.insert(sibling_id, sibling);
                Ok((new_id, Some((promote_up, sibling_id))))
            }
            Err(err) => Err(err),
        }
    }

    /// Grow the tree by one level after the root split: the new root is
    /// a branch with one entry per half, keyed by each half's first key
    fn split_root(&mut self, promote_key: Vec<u8>, promoted_child: PageId) -> Result<()> {
        let old_root = self.root;
        let first_key = self.node_at(old_root)?.first_key()?;

        let mut new_root = Node::new(NodeType::Branch);
        new_root.branch_insert(&first_key, old_root)?;
        new_root.branch_insert(&promote_key, promoted_child)?;

        let new_root_id = self.allocate_node();
        self.dirty.insert(new_root_id, new_root);
        self.root = new_root_id;

        Ok(())
    }
}

impl Drop for Tx<'_> {
    fn drop(&mut self) {
        // Rollback: staged state evaporates, and pages this transaction
        // allocated go back to the free list. Old ids on `freed` stay
        // live; they still belong to the committed tree.
        if self.writable && !self.committed {
            for page_id in self.allocated.drain() {
                self.pager.release(page_id);
            }
        }
    }
}
