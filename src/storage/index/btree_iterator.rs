use std::sync::Arc;

use crate::buffer::{PageReadGuard, ParallelBufferPool, INVALID_PAGE_ID};
use crate::error::PalletDBResult;
use crate::storage::codec::BPlusTreeLeafPageCodec;
use crate::storage::index::comparator::KeyComparator;
use crate::storage::page::{BPlusTreeLeafPage, LeafKV, RecordId};

/// Forward cursor over the leaf chain. Holds exactly one leaf read latch
/// (plus its pin); advancing across a leaf boundary releases the current
/// leaf before latching the next one. Dropping the iterator releases both.
#[derive(Debug)]
pub struct IndexIterator {
    buffer_pool: Arc<ParallelBufferPool>,
    comparator: KeyComparator,
    guard: Option<PageReadGuard>,
    leaf: BPlusTreeLeafPage,
    cursor: usize,
}

impl IndexIterator {
    pub(crate) fn new(
        buffer_pool: Arc<ParallelBufferPool>,
        comparator: KeyComparator,
        guard: PageReadGuard,
        leaf: BPlusTreeLeafPage,
        cursor: usize,
    ) -> PalletDBResult<Self> {
        let mut iterator = Self {
            buffer_pool,
            comparator,
            guard: Some(guard),
            leaf,
            cursor,
        };
        // A start position past the leaf's last key (e.g. begin_at with a key
        // beyond this leaf) belongs on the next leaf.
        iterator.skip_exhausted_leaves()?;
        Ok(iterator)
    }

    pub(crate) fn empty(buffer_pool: Arc<ParallelBufferPool>, comparator: KeyComparator) -> Self {
        Self {
            buffer_pool,
            comparator,
            guard: None,
            leaf: BPlusTreeLeafPage::with_comparator(
                INVALID_PAGE_ID,
                INVALID_PAGE_ID,
                0,
                comparator,
            ),
            cursor: 0,
        }
    }

    /// True once the cursor is past the last key of the last leaf.
    pub fn is_end(&self) -> bool {
        self.cursor >= self.leaf.header.current_size as usize
            && self.leaf.header.next_page_id == INVALID_PAGE_ID
    }

    /// The entry under the cursor, if any.
    pub fn entry(&self) -> Option<&LeafKV> {
        if self.cursor < self.leaf.header.current_size as usize {
            Some(self.leaf.kv_at(self.cursor))
        } else {
            None
        }
    }

    /// Return the current entry and step the cursor forward.
    pub fn next(&mut self) -> PalletDBResult<Option<(Vec<u8>, RecordId)>> {
        let Some((key, rid)) = self.entry().map(|kv| (kv.0.clone(), kv.1)) else {
            return Ok(None);
        };
        self.cursor += 1;
        self.skip_exhausted_leaves()?;
        Ok(Some((key, rid)))
    }

    fn skip_exhausted_leaves(&mut self) -> PalletDBResult<()> {
        while self.cursor >= self.leaf.header.current_size as usize
            && self.leaf.header.next_page_id != INVALID_PAGE_ID
        {
            let next_page_id = self.leaf.header.next_page_id;
            // Release the current leaf before touching the next one.
            self.guard.take();
            let guard = self.buffer_pool.fetch_page_read(next_page_id)?;
            let (leaf, _) = BPlusTreeLeafPageCodec::decode(guard.data(), self.comparator)?;
            self.guard = Some(guard);
            self.leaf = leaf;
            self.cursor = 0;
        }
        Ok(())
    }
}
