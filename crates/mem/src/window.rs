use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use bytemuck::Pod;
use parking_lot::Mutex;

use crate::arena::PageArena;
use crate::config::MemoryConfig;
use crate::error::MemResult;
use crate::freeing::{BatchState, FreeingHandle, FreeingService, PendingBatch};
use crate::index_pool::IndexPool;
use crate::paged::PagedByteBuffer;
use crate::schema::{ElementType, FieldKind, Schema};

/// Primitive types a [`Variable`] can be read and written as.
pub trait Element: Pod {
    const TYPE: ElementType;
}

impl Element for u8 {
    const TYPE: ElementType = ElementType::U8;
}

impl Element for i16 {
    const TYPE: ElementType = ElementType::I16;
}

impl Element for i32 {
    const TYPE: ElementType = ElementType::I32;
}

impl Element for f32 {
    const TYPE: ElementType = ElementType::F32;
}

/// One logical page of a window and where it lives in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageMapEntry {
    pub logical_page: usize,
    pub physical_page: usize,
    pub physical_offset: usize,
}

#[derive(Default)]
struct Pending {
    indices: Vec<usize>,
    started: Option<Instant>,
    deadline: Option<Instant>,
    /// Earliest wakeup already queued with the freeing service.
    scheduled: Option<Instant>,
}

struct WindowInner {
    name: String,
    schema: Schema,
    buffer: Arc<PagedByteBuffer>,
    pool: Mutex<IndexPool>,
    objects_per_page: usize,
    pending: Mutex<Pending>,
    freeing: FreeingHandle,
    min_delay: Duration,
    max_delay: Duration,
}

impl PendingBatch for WindowInner {
    fn label(&self) -> &str {
        &self.name
    }

    fn take_due(&self, now: Instant) -> BatchState {
        let mut pending = self.pending.lock();
        match pending.deadline {
            None => BatchState::Empty,
            Some(deadline) if deadline > now => {
                // The service requeues the batch at exactly this deadline.
                pending.scheduled = Some(deadline);
                BatchState::NotYet(deadline)
            }
            Some(_) => BatchState::Due(std::mem::take(&mut *pending).indices),
        }
    }

    fn take_all(&self) -> Vec<usize> {
        std::mem::take(&mut *self.pending.lock()).indices
    }

    fn release(&self, batch: Vec<usize>) {
        self.pool.lock().free_many(batch);
    }
}

/// A typed array of fixed-layout records over one [`PagedByteBuffer`].
///
/// Record `i` occupies bytes `[i * object_size, (i + 1) * object_size)` of
/// the buffer. Capacity grows one page worth of records at a time, and
/// growth of the slot pool and of the buffer happen as one step under the
/// arena's growth lock. Cloning yields another handle to the same window.
#[derive(Clone)]
pub struct MemoryWindow {
    inner: Arc<WindowInner>,
}

impl std::fmt::Debug for MemoryWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryWindow")
            .field("name", &self.inner.name)
            .field("object_size", &self.inner.schema.object_size())
            .field("capacity", &self.capacity())
            .field("pages", &self.num_pages())
            .finish()
    }
}

impl MemoryWindow {
    pub fn new(
        name: impl Into<String>,
        schema: Schema,
        arena: &Arc<PageArena>,
        freeing: &FreeingService,
        config: &MemoryConfig,
    ) -> MemResult<Self> {
        let name = name.into();
        let object_size = schema.object_size();
        let objects_per_page = arena.page_size().div_ceil(object_size);
        let initial = config.initial_capacity.max(1);
        let buffer = arena.create_buffer(object_size * initial, name.clone())?;
        let pool = IndexPool::with_capacity(initial)
            .with_growth(move |prev| prev + objects_per_page);
        tracing::debug!(
            window = %name,
            object_size,
            objects_per_page,
            pages = buffer.size_in_pages(),
            "memory window created"
        );
        Ok(Self {
            inner: Arc::new(WindowInner {
                name,
                schema,
                buffer,
                pool: Mutex::new(pool),
                objects_per_page,
                pending: Mutex::new(Pending::default()),
                freeing: freeing.handle(),
                min_delay: config.min_free_delay(),
                max_delay: config.max_free_delay(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    pub fn buffer(&self) -> &Arc<PagedByteBuffer> {
        &self.inner.buffer
    }

    pub fn object_size(&self) -> usize {
        self.inner.schema.object_size()
    }

    /// Records per page, rounded up; also the growth increment.
    pub fn objects_per_page(&self) -> usize {
        self.inner.objects_per_page
    }

    /// Record slots available before the next growth.
    pub fn capacity(&self) -> usize {
        self.inner.pool.lock().capacity()
    }

    /// Records currently created and not yet freed. Deferred frees count
    /// until their batch is released.
    pub fn live_objects(&self) -> usize {
        self.inner.pool.lock().outstanding()
    }

    pub fn num_pages(&self) -> usize {
        self.inner.buffer.size_in_pages()
    }

    /// Reserve one record slot, growing the backing buffer when needed.
    pub fn try_create(&self) -> MemResult<usize> {
        let mut pool = self.inner.pool.lock();
        let index = pool.pop();
        let Err(err) = self.fit_buffer(&mut pool) else {
            return Ok(index);
        };
        // The arena is full: withdraw capacity the current pages cannot back.
        let fits = self.inner.buffer.size_in_bytes() / self.object_size();
        if index < fits {
            pool.compact(|_, _| fits);
            return Ok(index);
        }
        pool.free(index);
        pool.compact(|_, _| fits);
        Err(err)
    }

    /// Reserve one record slot.
    ///
    /// # Panics
    /// Panics when the arena is exhausted. GPU memory is a fixed budget, so
    /// running out is unrecoverable; use [`try_create`](Self::try_create) to
    /// observe the error instead.
    pub fn create(&self) -> usize {
        match self.try_create() {
            Ok(index) => index,
            Err(err) => {
                tracing::error!(window = %self.inner.name, %err, "memory window out of pages");
                panic!("{err}");
            }
        }
    }

    pub fn try_create_many(&self, count: usize) -> MemResult<Vec<usize>> {
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            match self.try_create() {
                Ok(index) => out.push(index),
                Err(err) => {
                    self.free_many(out);
                    return Err(err);
                }
            }
        }
        Ok(out)
    }

    pub fn create_many(&self, count: usize) -> Vec<usize> {
        (0..count).map(|_| self.create()).collect()
    }

    /// Return a slot immediately.
    pub fn free(&self, index: usize) {
        self.inner.pool.lock().free(index);
    }

    pub fn free_many(&self, indices: impl IntoIterator<Item = usize>) {
        self.inner.pool.lock().free_many(indices);
    }

    /// Return a slot through the shared freeing service.
    ///
    /// The first deferred free of a batch is released after the max delay.
    /// Later frees ride along and pull the deadline in to `now + min`, but
    /// never past `start + max`.
    pub fn free_later(&self, index: usize) {
        self.free_later_many(std::iter::once(index));
    }

    pub fn free_later_many(&self, indices: impl IntoIterator<Item = usize>) {
        let now = Instant::now();
        let mut pending = self.inner.pending.lock();
        let before = pending.indices.len();
        pending.indices.extend(indices);
        if pending.indices.len() == before {
            return;
        }
        let deadline = match (before, pending.started) {
            (0, _) | (_, None) => {
                pending.started = Some(now);
                now + self.inner.max_delay
            }
            (_, Some(started)) => (now + self.inner.min_delay).min(started + self.inner.max_delay),
        };
        pending.deadline = Some(deadline);
        if pending.scheduled.is_some_and(|queued| queued <= deadline) {
            return;
        }
        pending.scheduled = Some(deadline);
        let weak: Weak<dyn PendingBatch> = Arc::downgrade(&self.inner) as Weak<dyn PendingBatch>;
        if !self.inner.freeing.schedule(weak, deadline) {
            let batch = std::mem::take(&mut *pending).indices;
            drop(pending);
            tracing::warn!(
                window = %self.inner.name,
                count = batch.len(),
                "freeing service stopped; releasing immediately"
            );
            self.inner.release(batch);
        }
    }

    /// Indices waiting in the current deferred batch.
    pub fn pending_frees(&self) -> usize {
        self.inner.pending.lock().indices.len()
    }

    /// Drop freed slots at the top of the index range and release whole
    /// trailing pages the remaining records no longer reach. Returns the
    /// number of pages released.
    pub fn compact(&self) -> MemResult<usize> {
        let object_size = self.object_size();
        let page_size = self.inner.buffer.page_size();
        let mut pool = self.inner.pool.lock();
        let before = self.inner.buffer.size_in_pages();
        pool.compact(|needed, _| {
            let pages = (needed * object_size).div_ceil(page_size).max(1);
            pages * page_size / object_size
        });
        let _growth = self.inner.buffer.arena().growth_lock();
        self.inner.buffer.resize(pool.capacity() * object_size)?;
        let released = before.saturating_sub(self.inner.buffer.size_in_pages());
        if released > 0 {
            tracing::debug!(window = %self.inner.name, released, "memory window compacted");
        }
        Ok(released)
    }

    /// Byte offset of record `index` in the physical arena.
    pub fn physical_address(&self, index: usize) -> usize {
        self.inner.buffer.logical_to_physical(index * self.object_size())
    }

    pub fn page_map(&self) -> Vec<PageMapEntry> {
        let page_size = self.inner.buffer.page_size();
        self.inner
            .buffer
            .physical_pages()
            .into_iter()
            .enumerate()
            .map(|(logical_page, physical_page)| PageMapEntry {
                logical_page,
                physical_page,
                physical_offset: physical_page * page_size,
            })
            .collect()
    }

    /// Handle to a named field, or `None` if the schema has no such field.
    pub fn variable(&self, name: &str) -> Option<Variable> {
        let field = self.inner.schema.field(name)?;
        Some(Variable {
            buffer: Arc::clone(&self.inner.buffer),
            object_size: self.object_size(),
            offset: field.offset,
            kind: field.kind,
        })
    }

    /// Grow the buffer to cover the pool's capacity. Caller holds the pool lock.
    fn fit_buffer(&self, pool: &mut IndexPool) -> MemResult<()> {
        let needed = pool.capacity() * self.object_size();
        if needed <= self.inner.buffer.size_in_bytes() {
            return Ok(());
        }
        let _growth = self.inner.buffer.arena().growth_lock();
        self.inner.buffer.resize(needed)?;
        if tracing::enabled!(tracing::Level::TRACE) {
            for entry in self.page_map() {
                tracing::trace!(
                    window = %self.inner.name,
                    logical = entry.logical_page,
                    physical = entry.physical_page,
                    offset = entry.physical_offset,
                    "window page"
                );
            }
        }
        tracing::debug!(
            window = %self.inner.name,
            capacity = pool.capacity(),
            pages = self.inner.buffer.size_in_pages(),
            "memory window grew"
        );
        Ok(())
    }
}

/// A field of a window bound to its buffer.
///
/// Scalar and array fields share one addressing rule:
/// `offset + index * object_size + element * element_size`.
#[derive(Clone)]
pub struct Variable {
    buffer: Arc<PagedByteBuffer>,
    object_size: usize,
    offset: usize,
    kind: FieldKind,
}

impl std::fmt::Debug for Variable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Variable")
            .field("offset", &self.offset)
            .field("kind", &self.kind)
            .finish()
    }
}

impl Variable {
    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// # Panics
    /// Panics when `T` is not the field's element type or `element` is past
    /// the end of the field. Either would write into a neighbouring field.
    fn address<T: Element>(&self, index: usize, element: usize) -> usize {
        assert_eq!(T::TYPE, self.kind.element_type(), "wrong element type for field");
        assert!(
            element < self.kind.len(),
            "element {element} out of range for a field of {}",
            self.kind.len()
        );
        self.offset + index * self.object_size + element * self.kind.element_size()
    }

    pub fn set<T: Element>(&self, index: usize, value: T) {
        self.set_element(index, 0, value);
    }

    pub fn get<T: Element>(&self, index: usize) -> T {
        self.get_element(index, 0)
    }

    pub fn set_element<T: Element>(&self, index: usize, element: usize, value: T) {
        let addr = self.address::<T>(index, element);
        self.buffer.put_bytes(addr, bytemuck::bytes_of(&value));
    }

    pub fn get_element<T: Element>(&self, index: usize, element: usize) -> T {
        let addr = self.address::<T>(index, element);
        let mut value = T::zeroed();
        self.buffer.read_bytes(addr, bytemuck::bytes_of_mut(&mut value));
        value
    }

    /// Write `values` starting at element 0.
    pub fn set_slice<T: Element>(&self, index: usize, values: &[T]) {
        assert!(
            values.len() <= self.kind.len(),
            "{} values do not fit a field of {}",
            values.len(),
            self.kind.len()
        );
        if values.is_empty() {
            return;
        }
        let addr = self.address::<T>(index, 0);
        self.buffer.put_bytes(addr, bytemuck::cast_slice(values));
    }

    /// Read the whole field.
    pub fn get_slice<T: Element>(&self, index: usize) -> Vec<T> {
        if self.kind.is_empty() {
            return Vec::new();
        }
        let addr = self.address::<T>(index, 0);
        let mut out = vec![T::zeroed(); self.kind.len()];
        self.buffer.read_bytes(addr, bytemuck::cast_slice_mut(&mut out));
        out
    }
}
