use std::mem::{self, ManuallyDrop};
use std::sync::atomic::AtomicI32;
use std::sync::Arc;

use log::error;
use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::buffer::ParallelBufferPool;

pub type PageId = i32;
pub type AtomicPageId = AtomicI32;
pub type FrameId = usize;

pub const INVALID_PAGE_ID: PageId = -1;
/// Page 0 holds the header directory mapping index names to root page ids.
pub const HEADER_PAGE_ID: PageId = 0;
pub const PAGE_SIZE: usize = 4096;

#[derive(Debug)]
pub struct PageMeta {
    pub page_id: PageId,
    pub pin_count: u32,
    pub is_dirty: bool,
}

impl PageMeta {
    fn empty() -> Self {
        Self {
            page_id: INVALID_PAGE_ID,
            pin_count: 0,
            is_dirty: false,
        }
    }

    pub fn destroy(&mut self) {
        self.page_id = INVALID_PAGE_ID;
        self.pin_count = 0;
        self.is_dirty = false;
    }
}

/// One buffer pool frame. The rw-latch on the page bytes is independent of
/// the metadata mutex; the two are never held across disk I/O together.
#[derive(Debug)]
pub struct Page {
    data: RwLock<Box<[u8; PAGE_SIZE]>>,
    meta: Mutex<PageMeta>,
}

impl Page {
    pub(crate) fn empty() -> Self {
        Self {
            data: RwLock::new(Box::new([0; PAGE_SIZE])),
            meta: Mutex::new(PageMeta::empty()),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.meta.lock().page_id
    }

    pub fn pin_count(&self) -> u32 {
        self.meta.lock().pin_count
    }

    pub fn is_dirty(&self) -> bool {
        self.meta.lock().is_dirty
    }

    pub(crate) fn meta(&self) -> MutexGuard<'_, PageMeta> {
        self.meta.lock()
    }

    /// The page latch and the bytes it protects. Raw-API callers latch
    /// through here; the guard API wraps it.
    pub fn data_lock(&self) -> &RwLock<Box<[u8; PAGE_SIZE]>> {
        &self.data
    }
}

/// Owned read latch over a pinned page. Dropping releases the latch first,
/// then returns the pin to the pool (never dirtying the page).
#[derive(Debug)]
pub struct PageReadGuard {
    pool: Arc<ParallelBufferPool>,
    _page: Arc<Page>,
    page_id: PageId,
    guard: ManuallyDrop<RwLockReadGuard<'static, Box<[u8; PAGE_SIZE]>>>,
}

impl PageReadGuard {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.guard[..]
    }
}

impl Drop for PageReadGuard {
    fn drop(&mut self) {
        unsafe {
            ManuallyDrop::drop(&mut self.guard);
        }
        if !self.pool.unpin_page(self.page_id, false) {
            error!("Failed to unpin page {} after read latch", self.page_id);
        }
    }
}

/// Owned write latch over a pinned page. Mutating through `data_mut` marks
/// the guard dirty; the flag is handed to the pool at unpin time.
#[derive(Debug)]
pub struct PageWriteGuard {
    pool: Arc<ParallelBufferPool>,
    _page: Arc<Page>,
    page_id: PageId,
    dirty: bool,
    guard: ManuallyDrop<RwLockWriteGuard<'static, Box<[u8; PAGE_SIZE]>>>,
}

impl PageWriteGuard {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.guard[..]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.dirty = true;
        &mut self.guard[..]
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Overwrite the whole page image with an encoded page.
    pub fn overwrite(&mut self, bytes: &[u8]) {
        debug_assert!(bytes.len() <= PAGE_SIZE);
        let data = self.data_mut();
        data[..bytes.len()].copy_from_slice(bytes);
        data[bytes.len()..].fill(0);
    }
}

impl Drop for PageWriteGuard {
    fn drop(&mut self) {
        unsafe {
            ManuallyDrop::drop(&mut self.guard);
        }
        if !self.pool.unpin_page(self.page_id, self.dirty) {
            error!("Failed to unpin page {} after write latch", self.page_id);
        }
    }
}

pub(crate) fn new_read_guard(pool: Arc<ParallelBufferPool>, page: Arc<Page>) -> PageReadGuard {
    let page_id = page.page_id();
    let guard = page.data_lock().read();
    let guard_static: RwLockReadGuard<'static, Box<[u8; PAGE_SIZE]>> = unsafe {
        mem::transmute::<
            RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>>,
            RwLockReadGuard<'static, Box<[u8; PAGE_SIZE]>>,
        >(guard)
    };
    PageReadGuard {
        pool,
        _page: page,
        page_id,
        guard: ManuallyDrop::new(guard_static),
    }
}

pub(crate) fn new_write_guard(pool: Arc<ParallelBufferPool>, page: Arc<Page>) -> PageWriteGuard {
    let page_id = page.page_id();
    let guard = page.data_lock().write();
    let guard_static: RwLockWriteGuard<'static, Box<[u8; PAGE_SIZE]>> = unsafe {
        mem::transmute::<
            RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>>,
            RwLockWriteGuard<'static, Box<[u8; PAGE_SIZE]>>,
        >(guard)
    };
    PageWriteGuard {
        pool,
        _page: page,
        page_id,
        dirty: false,
        guard: ManuallyDrop::new(guard_static),
    }
}
