use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::buffer::page::{self, Page, PageId, PageReadGuard, PageWriteGuard};
use crate::buffer::BufferPoolInstance;
use crate::config::BufferPoolConfig;
use crate::error::{PalletDBError, PalletDBResult};
use crate::storage::disk_manager::DiskManager;

/// N buffer pool instances sharded by `page_id % N`. Allocation round-robins
/// across instances so consecutive `new_page` calls spread over the shards.
#[derive(Debug)]
pub struct ParallelBufferPool {
    instances: Vec<Arc<BufferPoolInstance>>,
    num_instances: usize,
    pool_size: usize,
    start_index: AtomicUsize,
}

impl ParallelBufferPool {
    pub fn new(config: BufferPoolConfig, disk_manager: Arc<DiskManager>) -> Self {
        assert!(config.num_instances > 0);
        let instances = (0..config.num_instances)
            .map(|i| {
                Arc::new(BufferPoolInstance::new(
                    config.pool_size,
                    config.num_instances,
                    i,
                    disk_manager.clone(),
                ))
            })
            .collect();
        Self {
            instances,
            num_instances: config.num_instances,
            pool_size: config.pool_size,
            start_index: AtomicUsize::new(0),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.num_instances * self.pool_size
    }

    pub fn num_instances(&self) -> usize {
        self.num_instances
    }

    pub fn instance(&self, index: usize) -> &Arc<BufferPoolInstance> {
        &self.instances[index]
    }

    fn instance_for(&self, page_id: PageId) -> &Arc<BufferPoolInstance> {
        &self.instances[page_id as usize % self.num_instances]
    }

    pub fn fetch_page(&self, page_id: PageId) -> PalletDBResult<Option<Arc<Page>>> {
        self.instance_for(page_id).fetch_page(page_id)
    }

    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        self.instance_for(page_id).unpin_page(page_id, is_dirty)
    }

    pub fn flush_page(&self, page_id: PageId) -> PalletDBResult<bool> {
        self.instance_for(page_id).flush_page(page_id)
    }

    pub fn delete_page(&self, page_id: PageId) -> PalletDBResult<bool> {
        self.instance_for(page_id).delete_page(page_id)
    }

    pub fn flush_all_pages(&self) -> PalletDBResult<()> {
        for instance in self.instances.iter() {
            instance.flush_all_pages()?;
        }
        Ok(())
    }

    /// Try each instance once, starting from a rotating index; the first
    /// success wins. `None` when every instance has all frames pinned.
    pub fn new_page(&self) -> PalletDBResult<Option<(PageId, Arc<Page>)>> {
        let start = self.start_index.fetch_add(1, Ordering::SeqCst);
        for i in 0..self.num_instances {
            let instance = &self.instances[(start + i) % self.num_instances];
            if let Some(allocated) = instance.new_page()? {
                return Ok(Some(allocated));
            }
        }
        Ok(None)
    }

    // Latch-guard surface used by the indexes. Pin first, latch second; the
    // guard's drop unlatches before unpinning.

    pub fn fetch_page_read(self: &Arc<Self>, page_id: PageId) -> PalletDBResult<PageReadGuard> {
        match self.fetch_page(page_id)? {
            Some(frame) => Ok(page::new_read_guard(self.clone(), frame)),
            None => Err(PalletDBError::Storage(format!(
                "Cannot fetch page {} because buffer pool is full and no page to evict",
                page_id
            ))),
        }
    }

    pub fn fetch_page_write(self: &Arc<Self>, page_id: PageId) -> PalletDBResult<PageWriteGuard> {
        match self.fetch_page(page_id)? {
            Some(frame) => Ok(page::new_write_guard(self.clone(), frame)),
            None => Err(PalletDBError::Storage(format!(
                "Cannot fetch page {} because buffer pool is full and no page to evict",
                page_id
            ))),
        }
    }

    pub fn new_page_write(self: &Arc<Self>) -> PalletDBResult<PageWriteGuard> {
        match self.new_page()? {
            Some((_page_id, frame)) => Ok(page::new_write_guard(self.clone(), frame)),
            None => Err(PalletDBError::Storage(
                "Cannot new page because buffer pool is full and no page to evict".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_pool(pool_size: usize, num_instances: usize) -> (TempDir, Arc<ParallelBufferPool>) {
        let temp_dir = TempDir::new().unwrap();
        let disk_manager =
            Arc::new(DiskManager::try_new(temp_dir.path().join("test.db")).unwrap());
        let pool = Arc::new(ParallelBufferPool::new(
            BufferPoolConfig {
                pool_size,
                num_instances,
            },
            disk_manager,
        ));
        (temp_dir, pool)
    }

    #[test]
    pub fn test_round_robin_allocation() {
        let (_tmp, pool) = setup_pool(2, 3);
        assert_eq!(pool.pool_size(), 6);

        let mut ids = vec![];
        for _ in 0..6 {
            let (id, _frame) = pool.new_page().unwrap().unwrap();
            ids.push(id);
        }
        // One id per shard per round.
        for chunk in ids.chunks(3) {
            let mut shards: Vec<usize> = chunk.iter().map(|id| *id as usize % 3).collect();
            shards.sort_unstable();
            assert_eq!(shards, vec![0, 1, 2]);
        }

        // All frames pinned everywhere.
        assert!(pool.new_page().unwrap().is_none());

        assert!(pool.unpin_page(ids[4], false));
        assert!(pool.new_page().unwrap().is_some());
    }

    #[test]
    pub fn test_dispatch_by_page_id() {
        let (_tmp, pool) = setup_pool(4, 2);
        let (id, _frame) = pool.new_page().unwrap().unwrap();
        assert!(pool.unpin_page(id, true));

        let frame = pool.fetch_page(id).unwrap().unwrap();
        assert_eq!(frame.page_id(), id);
        assert_eq!(frame.pin_count(), 1);
        assert!(pool.unpin_page(id, false));
        assert!(!pool.unpin_page(id, false));
    }

    #[test]
    pub fn test_guard_api_releases_latch_and_pin() {
        let (_tmp, pool) = setup_pool(4, 2);
        let page_id = {
            let mut guard = pool.new_page_write().unwrap();
            guard.data_mut()[0] = 7;
            guard.page_id()
        };

        {
            let read_guard = pool.fetch_page_read(page_id).unwrap();
            assert_eq!(read_guard.data()[0], 7);
        }

        // Both guards dropped: pin count back to zero.
        let frame = pool.fetch_page(page_id).unwrap().unwrap();
        assert_eq!(frame.pin_count(), 1);
        assert!(pool.unpin_page(page_id, false));
    }
}
