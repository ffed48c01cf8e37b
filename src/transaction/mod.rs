use std::collections::VecDeque;

use crate::buffer::{PageId, PageWriteGuard};

/// Latch bookkeeping handed through index operations: the write-latched
/// ancestor pages of the current descent, and page ids whose deletion is
/// deferred until every latch and pin has been released.
#[derive(Debug, Default)]
pub struct Transaction {
    page_set: VecDeque<PageWriteGuard>,
    deleted_page_set: Vec<PageId>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_into_page_set(&mut self, guard: PageWriteGuard) {
        self.page_set.push_back(guard);
    }

    /// Pop the nearest held ancestor (the back of the set).
    pub fn pop_page_set(&mut self) -> Option<PageWriteGuard> {
        self.page_set.pop_back()
    }

    /// Release every held ancestor latch, top-down. Dropping each guard
    /// unlatches and then unpins with the guard's dirty flag.
    pub fn release_page_set(&mut self) {
        self.page_set.clear();
    }

    pub fn page_set_len(&self) -> usize {
        self.page_set.len()
    }

    pub fn add_into_deleted_page_set(&mut self, page_id: PageId) {
        self.deleted_page_set.push(page_id);
    }

    pub fn take_deleted_page_set(&mut self) -> Vec<PageId> {
        std::mem::take(&mut self.deleted_page_set)
    }
}
