mod buffer_pool;
mod page;
mod parallel_pool;

pub use buffer_pool::BufferPoolInstance;
pub use page::{
    AtomicPageId, FrameId, Page, PageId, PageMeta, PageReadGuard, PageWriteGuard,
    HEADER_PAGE_ID, INVALID_PAGE_ID, PAGE_SIZE,
};
pub use parallel_pool::ParallelBufferPool;
