use std::path::Path;
use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::buffer::{
    AtomicPageId, PageId, PageReadGuard, PageWriteGuard, ParallelBufferPool, HEADER_PAGE_ID,
    INVALID_PAGE_ID,
};
use crate::config::BTreeConfig;
use crate::error::{PalletDBError, PalletDBResult};
use crate::storage::codec::{
    BPlusTreeInternalPageCodec, BPlusTreeLeafPageCodec, BPlusTreePageCodec, HeaderPageCodec,
};
use crate::storage::index::btree_iterator::IndexIterator;
use crate::storage::index::comparator::{
    decode_int_key, default_comparator, encode_int_key, KeyComparator,
};
use crate::storage::page::{
    BPlusTreeInternalPage, BPlusTreeLeafPage, BPlusTreePage, RecordId,
};
use crate::transaction::Transaction;

/// Which leaf a descent should land on.
#[derive(Debug, Clone, Copy)]
enum LeafSearchMode<'a> {
    Key(&'a [u8]),
    Leftmost,
    Rightmost,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum WriteOp {
    Insert,
    Remove,
}

/// In-scope view of a node whose write latch is held by a caller frame:
/// enough to fix its parent pointer without re-latching the page.
struct NodeMut<'a> {
    page_id: PageId,
    parent_page_id: &'a mut PageId,
}

/// Parent-pointer rewrites `(child, new_parent)` queued by a structural
/// operation for children not latched by our own descent frames.
type PendingReparents = Vec<(PageId, PageId)>;

/// Latch-coupled B+-tree over byte-string keys with unique-key semantics.
/// The tree-level rw-latch guards `root_page_id`; descents release it (and
/// ancestor page latches) as soon as a safe node proves the structural
/// change cannot propagate further up.
#[derive(Debug)]
pub struct BPlusTreeIndex {
    index_name: String,
    buffer_pool: Arc<ParallelBufferPool>,
    comparator: KeyComparator,
    leaf_max_size: u32,
    internal_max_size: u32,
    root_page_id: AtomicPageId,
    rwlatch: RwLock<()>,
}

impl BPlusTreeIndex {
    pub fn new(
        index_name: impl Into<String>,
        buffer_pool: Arc<ParallelBufferPool>,
        config: BTreeConfig,
    ) -> Self {
        Self::with_comparator(index_name, buffer_pool, config, default_comparator)
    }

    pub fn with_comparator(
        index_name: impl Into<String>,
        buffer_pool: Arc<ParallelBufferPool>,
        config: BTreeConfig,
        comparator: KeyComparator,
    ) -> Self {
        assert!(config.leaf_max_size >= 2 && config.internal_max_size >= 3);
        Self {
            index_name: index_name.into(),
            buffer_pool,
            comparator,
            leaf_max_size: config.leaf_max_size,
            internal_max_size: config.internal_max_size,
            root_page_id: AtomicPageId::new(INVALID_PAGE_ID),
            rwlatch: RwLock::new(()),
        }
    }

    /// Reattach to an index persisted in the header page, picking up its
    /// published root.
    pub fn open(
        index_name: impl Into<String>,
        buffer_pool: Arc<ParallelBufferPool>,
        config: BTreeConfig,
        comparator: KeyComparator,
    ) -> PalletDBResult<Self> {
        let index = Self::with_comparator(index_name, buffer_pool, config, comparator);
        let guard = index.buffer_pool.fetch_page_read(HEADER_PAGE_ID)?;
        let (header, _) = HeaderPageCodec::decode(guard.data())?;
        if let Some(root_page_id) = header.get_root_page_id(&index.index_name) {
            index
                .root_page_id
                .store(root_page_id, AtomicOrdering::SeqCst);
        }
        drop(guard);
        Ok(index)
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn root_page_id(&self) -> PageId {
        self.root_page_id.load(AtomicOrdering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.root_page_id() == INVALID_PAGE_ID
    }

    /// Point lookup with read-latch crabbing: child latched, then parent
    /// released, all the way to the leaf.
    pub fn get_value(&self, key: &[u8]) -> PalletDBResult<Option<RecordId>> {
        let tree_guard = self.rwlatch.read();
        if self.is_empty() {
            return Ok(None);
        }
        let leaf_guard = self.find_leaf_read(LeafSearchMode::Key(key), tree_guard)?;
        let leaf = self.decode_leaf(leaf_guard.data())?;
        Ok(leaf.lookup(key))
    }

    /// Insert a unique key. Returns false (leaving the tree untouched) on a
    /// duplicate.
    pub fn insert(
        &self,
        key: &[u8],
        rid: RecordId,
        txn: &mut Transaction,
    ) -> PalletDBResult<bool> {
        let mut tree_guard = Some(self.rwlatch.write());
        if self.is_empty() {
            self.start_new_tree(key, rid)?;
            return Ok(true);
        }

        let (mut leaf_guard, mut leaf) =
            self.find_leaf_write(key, WriteOp::Insert, &mut tree_guard, txn)?;

        let old_size = leaf.header.current_size;
        if leaf.insert(key, rid) == old_size {
            txn.release_page_set();
            return Ok(false);
        }

        let mut pending = PendingReparents::new();
        if leaf.header.current_size == leaf.header.max_size {
            self.split_leaf_node(&mut leaf, txn, &mut pending)?;
        }
        leaf_guard.overwrite(&BPlusTreeLeafPageCodec::encode(&leaf));

        // Reparent moved children while the ancestors are still latched, so
        // no concurrent operation can move them again underneath us.
        self.apply_reparents(pending)?;
        txn.release_page_set();
        drop(leaf_guard);
        Ok(true)
    }

    /// Remove a key if present. A missing key is a silent no-op.
    pub fn remove(&self, key: &[u8], txn: &mut Transaction) -> PalletDBResult<()> {
        let mut tree_guard = Some(self.rwlatch.write());
        if self.is_empty() {
            return Ok(());
        }

        let (mut leaf_guard, mut leaf) =
            self.find_leaf_write(key, WriteOp::Remove, &mut tree_guard, txn)?;

        let old_size = leaf.header.current_size;
        if leaf.remove_and_delete_record(key) == old_size {
            txn.release_page_set();
            return Ok(());
        }

        let mut pending = PendingReparents::new();
        if leaf.header.current_size < leaf.min_size() {
            self.adjust_leaf_node(&mut leaf, key, txn, &mut pending)?;
        }
        leaf_guard.overwrite(&BPlusTreeLeafPageCodec::encode(&leaf));

        // A root collapse promotes a page our own frames may still hold
        // latched, so its parent rewrite waits until the latches are gone;
        // the tree latch (still held on any root change) keeps other
        // operations out in the meantime. Everything else is reparented
        // while the ancestors are still latched.
        let (collapse, moved): (PendingReparents, PendingReparents) = pending
            .into_iter()
            .partition(|(_, parent_page_id)| *parent_page_id == INVALID_PAGE_ID);
        self.apply_reparents(moved)?;
        txn.release_page_set();
        drop(leaf_guard);
        self.apply_reparents(collapse)?;
        drop(tree_guard);

        for page_id in txn.take_deleted_page_set() {
            self.buffer_pool.delete_page(page_id)?;
        }
        Ok(())
    }

    /// Forward cursor from the leftmost key.
    pub fn begin(&self) -> PalletDBResult<IndexIterator> {
        let tree_guard = self.rwlatch.read();
        if self.is_empty() {
            return Ok(IndexIterator::empty(
                self.buffer_pool.clone(),
                self.comparator,
            ));
        }
        let leaf_guard = self.find_leaf_read(LeafSearchMode::Leftmost, tree_guard)?;
        let leaf = self.decode_leaf(leaf_guard.data())?;
        IndexIterator::new(self.buffer_pool.clone(), self.comparator, leaf_guard, leaf, 0)
    }

    /// Forward cursor positioned at the first key >= `key`.
    pub fn begin_at(&self, key: &[u8]) -> PalletDBResult<IndexIterator> {
        let tree_guard = self.rwlatch.read();
        if self.is_empty() {
            return Ok(IndexIterator::empty(
                self.buffer_pool.clone(),
                self.comparator,
            ));
        }
        let leaf_guard = self.find_leaf_read(LeafSearchMode::Key(key), tree_guard)?;
        let leaf = self.decode_leaf(leaf_guard.data())?;
        let cursor = leaf.key_index(key);
        IndexIterator::new(
            self.buffer_pool.clone(),
            self.comparator,
            leaf_guard,
            leaf,
            cursor,
        )
    }

    /// Cursor past the last key (holds the rightmost leaf's read latch, like
    /// every other cursor position).
    pub fn end(&self) -> PalletDBResult<IndexIterator> {
        let tree_guard = self.rwlatch.read();
        if self.is_empty() {
            return Ok(IndexIterator::empty(
                self.buffer_pool.clone(),
                self.comparator,
            ));
        }
        let leaf_guard = self.find_leaf_read(LeafSearchMode::Rightmost, tree_guard)?;
        let leaf = self.decode_leaf(leaf_guard.data())?;
        let cursor = leaf.header.current_size as usize;
        IndexIterator::new(
            self.buffer_pool.clone(),
            self.comparator,
            leaf_guard,
            leaf,
            cursor,
        )
    }

    /// Bulk-insert whitespace-separated integer keys (test tooling).
    pub fn insert_from_file(
        &self,
        path: impl AsRef<Path>,
        txn: &mut Transaction,
    ) -> PalletDBResult<()> {
        let content = std::fs::read_to_string(path)?;
        for token in content.split_whitespace() {
            let value: i64 = token.parse().map_err(|e| {
                PalletDBError::Internal(format!("Invalid key {:?} in key file: {}", token, e))
            })?;
            let rid = RecordId::new((value >> 32) as PageId, value as u32);
            self.insert(&encode_int_key(value), rid, txn)?;
        }
        Ok(())
    }

    /// Bulk-remove whitespace-separated integer keys (test tooling).
    pub fn remove_from_file(
        &self,
        path: impl AsRef<Path>,
        txn: &mut Transaction,
    ) -> PalletDBResult<()> {
        let content = std::fs::read_to_string(path)?;
        for token in content.split_whitespace() {
            let value: i64 = token.parse().map_err(|e| {
                PalletDBError::Internal(format!("Invalid key {:?} in key file: {}", token, e))
            })?;
            self.remove(&encode_int_key(value), txn)?;
        }
        Ok(())
    }

    /// Write the tree shape as a graphviz dot file.
    pub fn draw(&self, path: impl AsRef<Path>) -> PalletDBResult<()> {
        if self.is_empty() {
            warn!("Draw an empty tree");
            return Ok(());
        }
        let mut out = String::from("digraph G {\n");
        self.to_graph(self.root_page_id(), &mut out)?;
        out.push_str("}\n");
        std::fs::write(path, out)?;
        Ok(())
    }

    /// Log the tree shape level by level.
    pub fn print(&self) -> PalletDBResult<()> {
        if self.is_empty() {
            warn!("Print an empty tree");
            return Ok(());
        }
        self.to_log(self.root_page_id())
    }

    // ------------------------------------------------------------------
    // Descent
    // ------------------------------------------------------------------

    fn find_leaf_read<'a>(
        &'a self,
        mode: LeafSearchMode<'_>,
        tree_guard: RwLockReadGuard<'a, ()>,
    ) -> PalletDBResult<PageReadGuard> {
        let mut guard = self.buffer_pool.fetch_page_read(self.root_page_id())?;
        drop(tree_guard);
        loop {
            let page = self.decode_page(guard.data())?;
            match page {
                BPlusTreePage::Internal(internal) => {
                    let child_page_id = match mode {
                        LeafSearchMode::Key(key) => internal.lookup(key),
                        LeafSearchMode::Leftmost => internal.value_at(0),
                        LeafSearchMode::Rightmost => {
                            internal.value_at(internal.header.current_size as usize - 1)
                        }
                    };
                    // Child latched before the parent guard is dropped.
                    let child_guard = self.buffer_pool.fetch_page_read(child_page_id)?;
                    guard = child_guard;
                }
                BPlusTreePage::Leaf(_) => return Ok(guard),
            }
        }
    }

    /// Write-latched descent: ancestors are parked in the transaction's page
    /// set and released wholesale as soon as a child is safe for `op`.
    fn find_leaf_write<'a>(
        &'a self,
        key: &[u8],
        op: WriteOp,
        tree_guard: &mut Option<RwLockWriteGuard<'a, ()>>,
        txn: &mut Transaction,
    ) -> PalletDBResult<(PageWriteGuard, BPlusTreeLeafPage)> {
        let mut guard = self.buffer_pool.fetch_page_write(self.root_page_id())?;
        let mut page = self.decode_page(guard.data())?;
        loop {
            let internal = match page {
                BPlusTreePage::Leaf(leaf) => return Ok((guard, leaf)),
                BPlusTreePage::Internal(ref internal) => internal,
            };
            let child_page_id = internal.lookup(key);
            txn.add_into_page_set(guard);
            guard = self.buffer_pool.fetch_page_write(child_page_id)?;
            page = self.decode_page(guard.data())?;

            let child_is_safe = match op {
                WriteOp::Insert => page.is_insert_safe(),
                WriteOp::Remove => page.is_remove_safe(),
            };
            if child_is_safe {
                tree_guard.take();
                txn.release_page_set();
            }
        }
    }

    // ------------------------------------------------------------------
    // Insert internals
    // ------------------------------------------------------------------

    fn start_new_tree(&self, key: &[u8], rid: RecordId) -> PalletDBResult<()> {
        let mut guard = self.buffer_pool.new_page_write()?;
        let page_id = guard.page_id();
        let mut leaf = BPlusTreeLeafPage::with_comparator(
            page_id,
            INVALID_PAGE_ID,
            self.leaf_max_size,
            self.comparator,
        );
        leaf.insert(key, rid);
        guard.overwrite(&BPlusTreeLeafPageCodec::encode(&leaf));
        self.root_page_id.store(page_id, AtomicOrdering::SeqCst);
        self.update_root_page_id()?;
        debug!("Started new tree {} at root {}", self.index_name, page_id);
        Ok(())
    }

    fn split_leaf_node(
        &self,
        leaf: &mut BPlusTreeLeafPage,
        txn: &mut Transaction,
        pending: &mut PendingReparents,
    ) -> PalletDBResult<()> {
        let mut right_guard = self.buffer_pool.new_page_write()?;
        let right_page_id = right_guard.page_id();
        let mut right = BPlusTreeLeafPage::with_comparator(
            right_page_id,
            leaf.header.parent_page_id,
            leaf.header.max_size,
            self.comparator,
        );
        leaf.move_half_to(&mut right);
        right.header.next_page_id = leaf.header.next_page_id;
        leaf.header.next_page_id = right_page_id;
        debug!(
            "Split leaf {} into {} at key {:?}",
            leaf.header.page_id,
            right_page_id,
            right.key_at(0)
        );

        let split_key = right.key_at(0).to_vec();
        self.insert_into_parent(
            NodeMut {
                page_id: leaf.header.page_id,
                parent_page_id: &mut leaf.header.parent_page_id,
            },
            &split_key,
            NodeMut {
                page_id: right_page_id,
                parent_page_id: &mut right.header.parent_page_id,
            },
            txn,
            pending,
        )?;
        right_guard.overwrite(&BPlusTreeLeafPageCodec::encode(&right));
        Ok(())
    }

    fn split_internal_node(
        &self,
        node: &mut BPlusTreeInternalPage,
    ) -> PalletDBResult<(PageWriteGuard, BPlusTreeInternalPage)> {
        let right_guard = self.buffer_pool.new_page_write()?;
        let right_page_id = right_guard.page_id();
        let mut right = BPlusTreeInternalPage::with_comparator(
            right_page_id,
            node.header.parent_page_id,
            node.header.max_size,
            self.comparator,
        );
        node.move_half_to(&mut right);
        debug!("Split internal {} into {}", node.header.page_id, right_page_id);
        Ok((right_guard, right))
    }

    /// Publish a split into the parent held in the page set, recursing while
    /// parents overflow; a root split grows the tree by one level.
    fn insert_into_parent(
        &self,
        old: NodeMut<'_>,
        key: &[u8],
        new: NodeMut<'_>,
        txn: &mut Transaction,
        pending: &mut PendingReparents,
    ) -> PalletDBResult<()> {
        if *old.parent_page_id == INVALID_PAGE_ID {
            let mut root_guard = self.buffer_pool.new_page_write()?;
            let root_page_id = root_guard.page_id();
            let mut root = BPlusTreeInternalPage::with_comparator(
                root_page_id,
                INVALID_PAGE_ID,
                self.internal_max_size,
                self.comparator,
            );
            root.populate_new_root(old.page_id, key, new.page_id);
            root_guard.overwrite(&BPlusTreeInternalPageCodec::encode(&root));
            *old.parent_page_id = root_page_id;
            *new.parent_page_id = root_page_id;
            self.root_page_id.store(root_page_id, AtomicOrdering::SeqCst);
            self.update_root_page_id()?;
            debug!("Grew tree {} with new root {}", self.index_name, root_page_id);
            return Ok(());
        }

        let mut parent_guard = txn.pop_page_set().ok_or_else(|| {
            PalletDBError::Internal("Parent latch missing from page set during split".to_string())
        })?;
        let mut parent = self.decode_internal(parent_guard.data())?;
        parent.insert_node_after(old.page_id, key, new.page_id);

        if parent.header.current_size == parent.header.max_size {
            let (mut right_guard, mut right) = self.split_internal_node(&mut parent)?;
            let right_page_id = right.header.page_id;
            for child_page_id in right.child_page_ids() {
                if child_page_id == old.page_id {
                    *old.parent_page_id = right_page_id;
                } else if child_page_id == new.page_id {
                    *new.parent_page_id = right_page_id;
                } else {
                    pending.push((child_page_id, right_page_id));
                }
            }
            let split_key = right.key_at(0).to_vec();
            self.insert_into_parent(
                NodeMut {
                    page_id: parent.header.page_id,
                    parent_page_id: &mut parent.header.parent_page_id,
                },
                &split_key,
                NodeMut {
                    page_id: right_page_id,
                    parent_page_id: &mut right.header.parent_page_id,
                },
                txn,
                pending,
            )?;
            right_guard.overwrite(&BPlusTreeInternalPageCodec::encode(&right));
        }

        parent_guard.overwrite(&BPlusTreeInternalPageCodec::encode(&parent));
        // Keep the ancestor latched until the whole operation (including
        // reparent fixups) is done; released wholesale by the caller.
        txn.add_into_page_set(parent_guard);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Remove internals
    // ------------------------------------------------------------------

    /// Fix an underflowing leaf: prefer borrowing from the left sibling,
    /// merge when neither sibling has spare entries. The emptied page goes
    /// into the transaction's deferred deletion set.
    fn adjust_leaf_node(
        &self,
        leaf: &mut BPlusTreeLeafPage,
        key: &[u8],
        txn: &mut Transaction,
        pending: &mut PendingReparents,
    ) -> PalletDBResult<()> {
        if leaf.is_root() {
            if leaf.header.current_size == 0 {
                self.root_page_id
                    .store(INVALID_PAGE_ID, AtomicOrdering::SeqCst);
                self.update_root_page_id()?;
                txn.add_into_deleted_page_set(leaf.header.page_id);
            }
            return Ok(());
        }

        let mut parent_guard = txn.pop_page_set().ok_or_else(|| {
            PalletDBError::Internal(
                "Parent latch missing from page set during leaf adjust".to_string(),
            )
        })?;
        let mut parent = self.decode_internal(parent_guard.data())?;
        let index = parent.lookup_index(key);

        if index >= 1 {
            let left_page_id = parent.value_at(index - 1);
            let mut left_guard = self.buffer_pool.fetch_page_write(left_page_id)?;
            let mut left = self.decode_leaf(left_guard.data())?;
            if left.header.current_size > left.min_size() {
                left.move_last_to_front_of(leaf);
                let separator = leaf.key_at(0).to_vec();
                parent.set_key_at(index, &separator);
            } else {
                leaf.move_all_to(&mut left);
                left.header.next_page_id = leaf.header.next_page_id;
                parent.remove(index);
                txn.add_into_deleted_page_set(leaf.header.page_id);
                debug!("Merged leaf {} into {}", leaf.header.page_id, left_page_id);
            }
            left_guard.overwrite(&BPlusTreeLeafPageCodec::encode(&left));
        } else if index + 1 < parent.array.len() {
            let right_page_id = parent.value_at(index + 1);
            let mut right_guard = self.buffer_pool.fetch_page_write(right_page_id)?;
            let mut right = self.decode_leaf(right_guard.data())?;
            if right.header.current_size > right.min_size() {
                right.move_first_to_end_of(leaf);
                let separator = right.key_at(0).to_vec();
                parent.set_key_at(index + 1, &separator);
            } else {
                right.move_all_to(leaf);
                leaf.header.next_page_id = right.header.next_page_id;
                parent.remove(index + 1);
                txn.add_into_deleted_page_set(right_page_id);
                debug!("Merged leaf {} into {}", right_page_id, leaf.header.page_id);
            }
            right_guard.overwrite(&BPlusTreeLeafPageCodec::encode(&right));
        }

        if parent.header.current_size < parent.min_size() {
            self.adjust_internal_node(
                &mut parent,
                key,
                txn,
                pending,
                NodeMut {
                    page_id: leaf.header.page_id,
                    parent_page_id: &mut leaf.header.parent_page_id,
                },
            )?;
        }
        parent_guard.overwrite(&BPlusTreeInternalPageCodec::encode(&parent));
        txn.add_into_page_set(parent_guard);
        Ok(())
    }

    /// `on_path` is the child of `node` our descent came through; its write
    /// latch is held by a caller frame, so its parent pointer is fixed
    /// through the hand-off instead of re-latching the page.
    fn adjust_internal_node(
        &self,
        node: &mut BPlusTreeInternalPage,
        key: &[u8],
        txn: &mut Transaction,
        pending: &mut PendingReparents,
        on_path: NodeMut<'_>,
    ) -> PalletDBResult<()> {
        if node.is_root() {
            // A size-1 root has lost its last separator: promote the only
            // child and drop one level.
            if node.header.current_size == 1 {
                let child_page_id = node.remove_and_return_only_child();
                if child_page_id == on_path.page_id {
                    *on_path.parent_page_id = INVALID_PAGE_ID;
                } else {
                    pending.push((child_page_id, INVALID_PAGE_ID));
                }
                self.root_page_id
                    .store(child_page_id, AtomicOrdering::SeqCst);
                self.update_root_page_id()?;
                txn.add_into_deleted_page_set(node.header.page_id);
                debug!(
                    "Collapsed root {} of tree {}, new root {}",
                    node.header.page_id, self.index_name, child_page_id
                );
            }
            return Ok(());
        }

        let mut parent_guard = txn.pop_page_set().ok_or_else(|| {
            PalletDBError::Internal(
                "Parent latch missing from page set during internal adjust".to_string(),
            )
        })?;
        let mut parent = self.decode_internal(parent_guard.data())?;
        let index = parent.lookup_index(key);

        if index >= 1 {
            let left_page_id = parent.value_at(index - 1);
            let mut left_guard = self.buffer_pool.fetch_page_write(left_page_id)?;
            let mut left = self.decode_internal(left_guard.data())?;
            if left.header.current_size > left.min_size() {
                let middle_key = parent.key_at(index).to_vec();
                let moved = left.move_last_to_front_of(node, &middle_key);
                pending.push((moved, node.header.page_id));
                let separator = node.key_at(0).to_vec();
                parent.set_key_at(index, &separator);
            } else {
                let middle_key = parent.key_at(index).to_vec();
                for child_page_id in node.child_page_ids() {
                    if child_page_id == on_path.page_id {
                        *on_path.parent_page_id = left_page_id;
                    } else {
                        pending.push((child_page_id, left_page_id));
                    }
                }
                node.move_all_to(&mut left, &middle_key);
                parent.remove(index);
                txn.add_into_deleted_page_set(node.header.page_id);
                debug!("Merged internal {} into {}", node.header.page_id, left_page_id);
            }
            left_guard.overwrite(&BPlusTreeInternalPageCodec::encode(&left));
        } else if index + 1 < parent.array.len() {
            let right_page_id = parent.value_at(index + 1);
            let mut right_guard = self.buffer_pool.fetch_page_write(right_page_id)?;
            let mut right = self.decode_internal(right_guard.data())?;
            if right.header.current_size > right.min_size() {
                let middle_key = parent.key_at(index + 1).to_vec();
                let moved = right.move_first_to_end_of(node, &middle_key);
                pending.push((moved, node.header.page_id));
                let separator = right.key_at(0).to_vec();
                parent.set_key_at(index + 1, &separator);
            } else {
                let middle_key = parent.key_at(index + 1).to_vec();
                for child_page_id in right.child_page_ids() {
                    pending.push((child_page_id, node.header.page_id));
                }
                right.move_all_to(node, &middle_key);
                parent.remove(index + 1);
                txn.add_into_deleted_page_set(right_page_id);
                debug!("Merged internal {} into {}", right_page_id, node.header.page_id);
            }
            right_guard.overwrite(&BPlusTreeInternalPageCodec::encode(&right));
        }

        if parent.header.current_size < parent.min_size() {
            self.adjust_internal_node(
                &mut parent,
                key,
                txn,
                pending,
                NodeMut {
                    page_id: node.header.page_id,
                    parent_page_id: &mut node.header.parent_page_id,
                },
            )?;
        }
        parent_guard.overwrite(&BPlusTreeInternalPageCodec::encode(&parent));
        txn.add_into_page_set(parent_guard);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Shared plumbing
    // ------------------------------------------------------------------

    /// Rewrite stored parent pointers for queued children: fetch, write
    /// latch, set, release. Children latched by our own descent frames were
    /// already fixed in place through the `NodeMut` hand-off.
    fn apply_reparents(&self, pending: PendingReparents) -> PalletDBResult<()> {
        for (child_page_id, parent_page_id) in pending {
            let mut guard = self.buffer_pool.fetch_page_write(child_page_id)?;
            let mut page = self.decode_page(guard.data())?;
            page.set_parent_page_id(parent_page_id);
            guard.overwrite(&BPlusTreePageCodec::encode(&page));
        }
        Ok(())
    }

    /// Publish `root_page_id` into the header page (insert on first
    /// publication, update afterwards).
    fn update_root_page_id(&self) -> PalletDBResult<()> {
        let mut guard = self.buffer_pool.fetch_page_write(HEADER_PAGE_ID)?;
        let (mut header, _) = HeaderPageCodec::decode(guard.data())?;
        let root_page_id = self.root_page_id();
        if !header.update_record(&self.index_name, root_page_id) {
            header.insert_record(&self.index_name, root_page_id);
        }
        guard.overwrite(&HeaderPageCodec::encode(&header));
        Ok(())
    }

    fn decode_page(&self, data: &[u8]) -> PalletDBResult<BPlusTreePage> {
        Ok(BPlusTreePageCodec::decode(data, self.comparator)?.0)
    }

    fn decode_leaf(&self, data: &[u8]) -> PalletDBResult<BPlusTreeLeafPage> {
        Ok(BPlusTreeLeafPageCodec::decode(data, self.comparator)?.0)
    }

    fn decode_internal(&self, data: &[u8]) -> PalletDBResult<BPlusTreeInternalPage> {
        Ok(BPlusTreeInternalPageCodec::decode(data, self.comparator)?.0)
    }

    fn format_key(key: &[u8]) -> String {
        match decode_int_key(key) {
            Some(value) => value.to_string(),
            None => format!("{:02x?}", key),
        }
    }

    fn to_graph(&self, page_id: PageId, out: &mut String) -> PalletDBResult<()> {
        let guard = self.buffer_pool.fetch_page_read(page_id)?;
        let page = self.decode_page(guard.data())?;
        drop(guard);
        match page {
            BPlusTreePage::Leaf(leaf) => {
                let keys: Vec<String> = leaf.array.iter().map(|kv| Self::format_key(&kv.0)).collect();
                out.push_str(&format!(
                    "  LEAF_{} [shape=record label=\"P={} | {}\"];\n",
                    page_id,
                    page_id,
                    keys.join(" | ")
                ));
                if leaf.header.next_page_id != INVALID_PAGE_ID {
                    out.push_str(&format!(
                        "  LEAF_{} -> LEAF_{};\n",
                        page_id, leaf.header.next_page_id
                    ));
                }
            }
            BPlusTreePage::Internal(internal) => {
                let keys: Vec<String> = internal
                    .array
                    .iter()
                    .enumerate()
                    .map(|(i, kv)| {
                        if i == 0 {
                            "·".to_string()
                        } else {
                            Self::format_key(&kv.0)
                        }
                    })
                    .collect();
                out.push_str(&format!(
                    "  INT_{} [shape=record label=\"P={} | {}\"];\n",
                    page_id,
                    page_id,
                    keys.join(" | ")
                ));
                for child_page_id in internal.child_page_ids() {
                    let prefix = if self.page_is_leaf(child_page_id)? {
                        "LEAF"
                    } else {
                        "INT"
                    };
                    out.push_str(&format!(
                        "  INT_{} -> {}_{};\n",
                        page_id, prefix, child_page_id
                    ));
                    self.to_graph(child_page_id, out)?;
                }
            }
        }
        Ok(())
    }

    fn page_is_leaf(&self, page_id: PageId) -> PalletDBResult<bool> {
        let guard = self.buffer_pool.fetch_page_read(page_id)?;
        let page = self.decode_page(guard.data())?;
        Ok(page.is_leaf())
    }

    fn to_log(&self, page_id: PageId) -> PalletDBResult<()> {
        let guard = self.buffer_pool.fetch_page_read(page_id)?;
        let page = self.decode_page(guard.data())?;
        drop(guard);
        match page {
            BPlusTreePage::Leaf(leaf) => {
                let keys: Vec<String> = leaf.array.iter().map(|kv| Self::format_key(&kv.0)).collect();
                log::info!(
                    "Leaf {} parent {} next {}: [{}]",
                    page_id,
                    leaf.header.parent_page_id,
                    leaf.header.next_page_id,
                    keys.join(",")
                );
            }
            BPlusTreePage::Internal(internal) => {
                let entries: Vec<String> = internal
                    .array
                    .iter()
                    .enumerate()
                    .map(|(i, kv)| {
                        if i == 0 {
                            format!("·:{}", kv.1)
                        } else {
                            format!("{}:{}", Self::format_key(&kv.0), kv.1)
                        }
                    })
                    .collect();
                log::info!(
                    "Internal {} parent {}: [{}]",
                    page_id,
                    internal.header.parent_page_id,
                    entries.join(",")
                );
                for child_page_id in internal.child_page_ids() {
                    self.to_log(child_page_id)?;
                }
            }
        }
        Ok(())
    }
}
