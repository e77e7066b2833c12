use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::config::MemoryConfig;
use crate::error::{MemError, MemResult, UploadError};
use crate::index_pool::IndexPool;
use crate::paged::PagedByteBuffer;

/// Destination for dirty pages: the upload primitive of the GPU binding layer.
///
/// Only the GPU-submission thread calls into a sink.
pub trait PageSink {
    /// Copy one physical page to GPU memory. `offset` is the page's byte
    /// offset in the physical arena and `bytes` its full contents.
    fn upload(&mut self, physical_page: usize, offset: usize, bytes: &[u8]) -> Result<(), UploadError>;
}

/// Outcome of one arena-wide flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub buffers_visited: usize,
    pub pages_uploaded: usize,
    pub pages_failed: usize,
}

/// The single shared physical arena that every [`PagedByteBuffer`] maps into.
///
/// Owns the physical bytes, the pool of physical page indices (with a hard
/// ceiling fixed at construction), the growth lock that serializes page-table
/// growth across all windows, and a weak registry of live buffers for
/// arena-wide flushing.
pub struct PageArena {
    page_size: usize,
    max_pages: usize,
    bytes: RwLock<Box<[u8]>>,
    pages: Mutex<IndexPool>,
    growth_lock: Mutex<()>,
    buffers: Mutex<Vec<Weak<PagedByteBuffer>>>,
}

impl std::fmt::Debug for PageArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageArena")
            .field("page_size", &self.page_size)
            .field("max_pages", &self.max_pages)
            .field("pages_in_use", &self.pages_in_use())
            .finish()
    }
}

impl PageArena {
    pub fn new(config: &MemoryConfig) -> MemResult<Arc<Self>> {
        if config.page_size_bytes == 0 {
            return Err(MemError::ZeroPageSize);
        }
        let max_pages = config.max_pages;
        let pool = IndexPool::with_capacity(max_pages.min(1)).with_growth(move |prev| {
            prev.saturating_mul(2).min(max_pages)
        });
        tracing::debug!(
            page_size = config.page_size_bytes,
            max_pages,
            bytes = config.arena_bytes(),
            "page arena created"
        );
        Ok(Arc::new(Self {
            page_size: config.page_size_bytes,
            max_pages,
            bytes: RwLock::new(vec![0u8; config.arena_bytes()].into_boxed_slice()),
            pages: Mutex::new(pool),
            growth_lock: Mutex::new(()),
            buffers: Mutex::new(Vec::new()),
        }))
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn max_pages(&self) -> usize {
        self.max_pages
    }

    /// Physical pages currently owned by some buffer.
    pub fn pages_in_use(&self) -> usize {
        self.pages.lock().outstanding()
    }

    /// Whole pages needed to hold `bytes`; never less than one.
    pub fn pages_for(&self, bytes: usize) -> usize {
        bytes.div_ceil(self.page_size).max(1)
    }

    /// Lock serializing capacity growth of every window on this arena.
    pub fn growth_lock(&self) -> MutexGuard<'_, ()> {
        self.growth_lock.lock()
    }

    /// Create a buffer of at least `initial_bytes`, registered for flushing.
    pub fn create_buffer(
        self: &Arc<Self>,
        initial_bytes: usize,
        name: impl Into<String>,
    ) -> MemResult<Arc<PagedByteBuffer>> {
        let pages = self.pop_pages(self.pages_for(initial_bytes))?;
        let buffer = Arc::new(PagedByteBuffer::from_pages(Arc::clone(self), pages, name.into()));
        let mut registry = self.buffers.lock();
        registry.retain(|w| w.strong_count() > 0);
        registry.push(Arc::downgrade(&buffer));
        Ok(buffer)
    }

    /// Reserve `count` physical pages, all or nothing.
    pub(crate) fn pop_pages(&self, count: usize) -> MemResult<Vec<usize>> {
        let mut pool = self.pages.lock();
        let in_use = pool.outstanding();
        if in_use + count > self.max_pages {
            return Err(MemError::ArenaExhausted {
                requested: in_use + count,
                max_pages: self.max_pages,
            });
        }
        Ok(pool.pop_many(count))
    }

    pub(crate) fn free_pages(&self, pages: impl IntoIterator<Item = usize>) {
        self.pages.lock().free_many(pages);
    }

    pub(crate) fn write(&self, offset: usize, data: &[u8]) {
        self.bytes.write()[offset..offset + data.len()].copy_from_slice(data);
    }

    pub(crate) fn read(&self, offset: usize, out: &mut [u8]) {
        out.copy_from_slice(&self.bytes.read()[offset..offset + out.len()]);
    }

    pub(crate) fn upload_page(&self, page: usize, sink: &mut dyn PageSink) -> Result<(), UploadError> {
        let offset = page * self.page_size;
        let bytes = self.bytes.read();
        sink.upload(page, offset, &bytes[offset..offset + self.page_size])
    }

    /// Upload every dirty page of every live buffer. GPU-submission thread only.
    pub fn flush_stale_pages(&self, sink: &mut dyn PageSink) -> FlushReport {
        let live: Vec<Arc<PagedByteBuffer>> = {
            let mut registry = self.buffers.lock();
            registry.retain(|w| w.strong_count() > 0);
            registry.iter().filter_map(Weak::upgrade).collect()
        };
        let mut report = FlushReport {
            buffers_visited: live.len(),
            ..FlushReport::default()
        };
        for buffer in &live {
            let (ok, failed) = buffer.flush_stale_pages(sink);
            report.pages_uploaded += ok;
            report.pages_failed += failed;
        }
        tracing::trace!(
            buffers = report.buffers_visited,
            uploaded = report.pages_uploaded,
            failed = report.pages_failed,
            "arena flush"
        );
        report
    }
}
