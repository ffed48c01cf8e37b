use std::collections::{HashMap, VecDeque};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::buffer::page::{AtomicPageId, Page, PageId, INVALID_PAGE_ID};
use crate::buffer::FrameId;
use crate::error::PalletDBResult;
use crate::storage::disk_manager::DiskManager;
use crate::utils::cache::lru::LruReplacer;
use crate::utils::cache::Replacer;

#[derive(Debug)]
struct PoolState {
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
}

/// One shard of the buffer pool. Pages allocated here have ids satisfying
/// `page_id % num_instances == instance_index`.
///
/// The metadata mutex is held only across page-table/pin transitions; disk
/// I/O for loads and eviction write-back runs outside it, under the target
/// frame's write latch (uncontended, since a victim's pin count is zero).
#[derive(Debug)]
pub struct BufferPoolInstance {
    pool_size: usize,
    num_instances: usize,
    instance_index: usize,
    next_page_id: AtomicPageId,
    frames: Vec<Arc<Page>>,
    state: Mutex<PoolState>,
    replacer: LruReplacer,
    disk_manager: Arc<DiskManager>,
}

impl BufferPoolInstance {
    pub fn new(
        pool_size: usize,
        num_instances: usize,
        instance_index: usize,
        disk_manager: Arc<DiskManager>,
    ) -> Self {
        assert!(num_instances > 0 && instance_index < num_instances);
        let mut free_list = VecDeque::with_capacity(pool_size);
        let mut frames = Vec::with_capacity(pool_size);
        for i in 0..pool_size {
            free_list.push_back(i);
            frames.push(Arc::new(Page::empty()));
        }
        // Resume allocation past any pages already backed by the file,
        // staying on this shard's residue class.
        let base = instance_index as i64;
        let step = num_instances as i64;
        let existing = disk_manager.num_pages() as i64;
        let first_free = if existing <= base {
            base
        } else {
            base + (existing - base + step - 1) / step * step
        };
        Self {
            pool_size,
            num_instances,
            instance_index,
            next_page_id: AtomicPageId::new(first_free as PageId),
            frames,
            state: Mutex::new(PoolState {
                page_table: HashMap::with_capacity(pool_size),
                free_list,
            }),
            replacer: LruReplacer::new(pool_size),
            disk_manager,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    fn allocate_page_id(&self) -> PageId {
        self.next_page_id
            .fetch_add(self.num_instances as PageId, Ordering::SeqCst)
    }

    /// Fetch a page into the pool, pinning it. `None` means every frame is
    /// pinned and nothing could be evicted.
    pub fn fetch_page(&self, page_id: PageId) -> PalletDBResult<Option<Arc<Page>>> {
        debug_assert_eq!(
            page_id as usize % self.num_instances,
            self.instance_index,
            "page {} dispatched to wrong instance",
            page_id
        );

        let (frame_id, mut frame_guard, evicted) = {
            let mut state = self.state.lock();
            if let Some(&frame_id) = state.page_table.get(&page_id) {
                self.frames[frame_id].meta().pin_count += 1;
                self.replacer.pin(frame_id);
                return Ok(Some(self.frames[frame_id].clone()));
            }

            let Some((frame_id, evicted)) = self.take_frame(&mut state) else {
                return Ok(None);
            };
            // The victim's pin count is zero, so its latch is free; holding
            // it before publishing the mapping makes concurrent fetchers of
            // this page block on the latch until the load completes.
            let frame_guard = self.frames[frame_id].data_lock().write();
            state.page_table.insert(page_id, frame_id);
            let mut meta = self.frames[frame_id].meta();
            meta.page_id = page_id;
            meta.pin_count = 1;
            meta.is_dirty = false;
            drop(meta);
            (frame_id, frame_guard, evicted)
        };

        if let Some((old_page_id, true)) = evicted {
            self.disk_manager
                .write_page(old_page_id, Bytes::copy_from_slice(&frame_guard[..]))?;
        }
        self.disk_manager.read_page(page_id, &mut frame_guard[..])?;
        drop(frame_guard);

        Ok(Some(self.frames[frame_id].clone()))
    }

    /// Allocate a fresh page id on this shard and bind it to a frame, pinned
    /// and dirty. `None` means every frame is pinned.
    pub fn new_page(&self) -> PalletDBResult<Option<(PageId, Arc<Page>)>> {
        let (page_id, frame_id, mut frame_guard, evicted) = {
            let mut state = self.state.lock();
            let Some((frame_id, evicted)) = self.take_frame(&mut state) else {
                return Ok(None);
            };
            let frame_guard = self.frames[frame_id].data_lock().write();
            let page_id = self.allocate_page_id();
            state.page_table.insert(page_id, frame_id);
            let mut meta = self.frames[frame_id].meta();
            meta.page_id = page_id;
            meta.pin_count = 1;
            meta.is_dirty = true;
            drop(meta);
            (page_id, frame_id, frame_guard, evicted)
        };

        if let Some((old_page_id, true)) = evicted {
            self.disk_manager
                .write_page(old_page_id, Bytes::copy_from_slice(&frame_guard[..]))?;
        }
        frame_guard.fill(0);
        drop(frame_guard);

        Ok(Some((page_id, self.frames[frame_id].clone())))
    }

    /// Drop one pin. `is_dirty` is OR-ed into the frame's dirty flag; a false
    /// value never clears it. Returns false when the page is not resident or
    /// already has pin count zero.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return false;
        };
        let mut meta = self.frames[frame_id].meta();
        if meta.pin_count == 0 {
            return false;
        }
        meta.pin_count -= 1;
        meta.is_dirty |= is_dirty;
        if meta.pin_count == 0 {
            self.replacer.unpin(frame_id);
        }
        true
    }

    /// Remove a resident page and return its frame to the free list. Fails
    /// (returns false) while the page is pinned. The page id is handed back
    /// to the disk manager either way.
    pub fn delete_page(&self, page_id: PageId) -> PalletDBResult<bool> {
        {
            let mut state = self.state.lock();
            if let Some(&frame_id) = state.page_table.get(&page_id) {
                let page = &self.frames[frame_id];
                if page.meta().pin_count > 0 {
                    return Ok(false);
                }
                state.page_table.remove(&page_id);
                self.replacer.pin(frame_id);
                page.data_lock().write().fill(0);
                page.meta().destroy();
                state.free_list.push_back(frame_id);
            }
        }
        self.disk_manager.deallocate_page(page_id)?;
        Ok(true)
    }

    /// Write a resident page back to disk and clear its dirty flag. The pin
    /// count is unchanged.
    pub fn flush_page(&self, page_id: PageId) -> PalletDBResult<bool> {
        let frame_id = {
            let state = self.state.lock();
            match state.page_table.get(&page_id) {
                Some(&frame_id) => frame_id,
                None => return Ok(false),
            }
        };
        let bytes = {
            let data = self.frames[frame_id].data_lock().read();
            // The frame may have been re-used for another page while we
            // were not holding the metadata mutex.
            if self.frames[frame_id].meta().page_id != page_id {
                return Ok(false);
            }
            Bytes::copy_from_slice(&data[..])
        };
        self.disk_manager.write_page(page_id, bytes)?;
        let mut meta = self.frames[frame_id].meta();
        if meta.page_id == page_id {
            meta.is_dirty = false;
        }
        Ok(true)
    }

    pub fn flush_all_pages(&self) -> PalletDBResult<()> {
        let page_ids: Vec<PageId> = {
            let state = self.state.lock();
            state.page_table.keys().copied().collect()
        };
        for page_id in page_ids {
            self.flush_page(page_id)?;
        }
        Ok(())
    }

    /// Grab a frame from the free list, or evict the LRU victim. The caller
    /// owns writing back the evicted bytes (still in the frame) if dirty.
    fn take_frame(&self, state: &mut PoolState) -> Option<(FrameId, Option<(PageId, bool)>)> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Some((frame_id, None));
        }
        let frame_id = self.replacer.victim()?;
        let (old_page_id, old_dirty) = {
            let meta = self.frames[frame_id].meta();
            (meta.page_id, meta.is_dirty)
        };
        if old_page_id == INVALID_PAGE_ID {
            return Some((frame_id, None));
        }
        state.page_table.remove(&old_page_id);
        Some((frame_id, Some((old_page_id, old_dirty))))
    }

    // Accounting accessors, used by tests and debug checks.

    pub fn replacer_size(&self) -> usize {
        self.replacer.size()
    }

    pub fn free_list_len(&self) -> usize {
        self.state.lock().free_list.len()
    }

    pub fn pinned_frame_count(&self) -> usize {
        self.frames
            .iter()
            .filter(|frame| frame.meta().pin_count > 0)
            .count()
    }

    pub fn resident_page_count(&self) -> usize {
        self.state.lock().page_table.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_instance(pool_size: usize) -> (TempDir, BufferPoolInstance) {
        let temp_dir = TempDir::new().unwrap();
        let disk_manager =
            Arc::new(DiskManager::try_new(temp_dir.path().join("test.db")).unwrap());
        let instance = BufferPoolInstance::new(pool_size, 1, 0, disk_manager);
        (temp_dir, instance)
    }

    fn write_marker(page: &Arc<Page>, marker: u8) {
        page.data_lock().write()[0] = marker;
    }

    #[test]
    pub fn test_new_page_until_full() {
        let (_tmp, pool) = setup_instance(3);

        let (id1, _p1) = pool.new_page().unwrap().unwrap();
        let (id2, _p2) = pool.new_page().unwrap().unwrap();
        let (id3, _p3) = pool.new_page().unwrap().unwrap();
        assert_eq!((id1, id2, id3), (0, 1, 2));
        assert_eq!(pool.free_list_len(), 0);

        // Everything pinned: no frame available.
        assert!(pool.new_page().unwrap().is_none());

        assert!(pool.unpin_page(id1, true));
        assert_eq!(pool.replacer_size(), 1);

        let (id4, _p4) = pool.new_page().unwrap().unwrap();
        assert_eq!(id4, 3);
        // id1 was evicted.
        assert!(!pool.unpin_page(id1, false));
    }

    #[test]
    pub fn test_eviction_writes_back_and_fetch_reloads() {
        let (_tmp, pool) = setup_instance(1);

        let (id1, p1) = pool.new_page().unwrap().unwrap();
        write_marker(&p1, 42);
        assert!(pool.unpin_page(id1, true));
        drop(p1);

        // Evicts page id1, forcing a write-back.
        let (id2, _p2) = pool.new_page().unwrap().unwrap();
        assert_ne!(id1, id2);
        assert!(pool.unpin_page(id2, false));

        let p1 = pool.fetch_page(id1).unwrap().unwrap();
        assert_eq!(p1.data_lock().read()[0], 42);
        assert_eq!(p1.pin_count(), 1);
        assert!(pool.unpin_page(id1, false));
    }

    #[test]
    pub fn test_unpin_misuse() {
        let (_tmp, pool) = setup_instance(2);
        assert!(!pool.unpin_page(99, false));

        let (id1, _p1) = pool.new_page().unwrap().unwrap();
        assert!(pool.unpin_page(id1, false));
        assert!(!pool.unpin_page(id1, false));
    }

    #[test]
    pub fn test_dirty_flag_is_sticky() {
        let (_tmp, pool) = setup_instance(2);
        let (id1, p1) = pool.new_page().unwrap().unwrap();
        assert!(pool.unpin_page(id1, false));

        // New pages are born dirty; a clean unpin must not clear that.
        assert!(p1.is_dirty());

        pool.fetch_page(id1).unwrap().unwrap();
        assert!(pool.unpin_page(id1, true));
        assert!(p1.is_dirty());

        assert!(pool.flush_page(id1).unwrap());
        assert!(!p1.is_dirty());
    }

    #[test]
    pub fn test_delete_page() {
        let (_tmp, pool) = setup_instance(3);
        let (id1, _p1) = pool.new_page().unwrap().unwrap();

        // Pinned: refuse.
        assert!(!pool.delete_page(id1).unwrap());

        assert!(pool.unpin_page(id1, false));
        assert!(pool.delete_page(id1).unwrap());
        assert_eq!(pool.free_list_len(), 3);
        assert_eq!(pool.replacer_size(), 0);
        assert_eq!(pool.resident_page_count(), 0);

        // Deleting a non-resident page succeeds.
        assert!(pool.delete_page(id1).unwrap());
    }

    #[test]
    pub fn test_frame_accounting_invariant() {
        let (_tmp, pool) = setup_instance(4);
        let mut ids = vec![];
        for _ in 0..3 {
            let (id, _p) = pool.new_page().unwrap().unwrap();
            ids.push(id);
        }
        assert!(pool.unpin_page(ids[0], false));

        // pinned frames + replacer residents + free frames == pool_size
        assert_eq!(
            pool.pinned_frame_count() + pool.replacer_size() + pool.free_list_len(),
            4
        );
    }

    #[test]
    pub fn test_sharded_page_id_allocation() {
        let temp_dir = TempDir::new().unwrap();
        let disk_manager =
            Arc::new(DiskManager::try_new(temp_dir.path().join("test.db")).unwrap());
        let shard0 = BufferPoolInstance::new(2, 3, 0, disk_manager.clone());
        let shard2 = BufferPoolInstance::new(2, 3, 2, disk_manager);

        let (a, _) = shard0.new_page().unwrap().unwrap();
        let (b, _) = shard0.new_page().unwrap().unwrap();
        assert_eq!((a, b), (0, 3));

        let (c, _) = shard2.new_page().unwrap().unwrap();
        let (d, _) = shard2.new_page().unwrap().unwrap();
        assert_eq!((c, d), (2, 5));
    }
}
