use std::collections::{BTreeSet, VecDeque};

/// Computes a new capacity from the previous one.
pub type GrowthFn = Box<dyn Fn(usize) -> usize + Send + Sync>;

/// Allocator of small integer slot indices with lazy capacity growth.
///
/// Freed indices are reused first, in FIFO order; otherwise the high-water
/// mark advances until it reaches capacity, at which point the growth
/// function runs and allocation retries. The pool itself is not locked:
/// owners share it behind a single mutex per pool.
///
/// Debug builds track which indices are outstanding and assert on double or
/// foreign frees. Release builds do not validate frees.
pub struct IndexPool {
    free: VecDeque<usize>,
    capacity: usize,
    high_water: usize,
    growth: GrowthFn,
    #[cfg(debug_assertions)]
    outstanding: Vec<bool>,
}

impl std::fmt::Debug for IndexPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexPool")
            .field("capacity", &self.capacity)
            .field("high_water", &self.high_water)
            .field("free", &self.free.len())
            .finish()
    }
}

impl Default for IndexPool {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexPool {
    /// Empty pool with capacity 1 that doubles on exhaustion.
    pub fn new() -> Self {
        Self::with_capacity(1)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            free: VecDeque::new(),
            capacity,
            high_water: 0,
            growth: Box::new(|prev| prev.saturating_mul(2)),
            #[cfg(debug_assertions)]
            outstanding: Vec::new(),
        }
    }

    /// Replace the growth function. Used by memory windows to grow in whole
    /// pages rather than doubling.
    pub fn with_growth(mut self, growth: impl Fn(usize) -> usize + Send + Sync + 'static) -> Self {
        self.growth = Box::new(growth);
        self
    }

    pub fn set_growth(&mut self, growth: impl Fn(usize) -> usize + Send + Sync + 'static) {
        self.growth = Box::new(growth);
    }

    /// Current ceiling on issued indices.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// One past the highest index ever issued.
    pub fn high_water(&self) -> usize {
        self.high_water
    }

    /// Number of indices currently handed out.
    pub fn outstanding(&self) -> usize {
        self.high_water - self.free.len()
    }

    /// Pop one index: a freed one if available, else a fresh one, growing
    /// capacity as needed.
    pub fn pop(&mut self) -> usize {
        loop {
            if let Some(index) = self.free.pop_front() {
                self.mark_outstanding(index);
                return index;
            }
            if self.high_water < self.capacity {
                let index = self.high_water;
                self.high_water += 1;
                self.mark_outstanding(index);
                return index;
            }
            self.grow();
        }
    }

    /// Reserve `count` contiguous fresh indices and return the first.
    ///
    /// Only advances the high-water mark; freed singles are not reused.
    pub fn pop_consecutive(&mut self, count: usize) -> usize {
        while self.high_water + count > self.capacity {
            self.grow();
        }
        let first = self.high_water;
        self.high_water += count;
        for index in first..self.high_water {
            self.mark_outstanding(index);
        }
        first
    }

    pub fn pop_many(&mut self, count: usize) -> Vec<usize> {
        (0..count).map(|_| self.pop()).collect()
    }

    /// Return an index for reuse. The index must currently be outstanding.
    pub fn free(&mut self, index: usize) {
        #[cfg(debug_assertions)]
        {
            let live = self.outstanding.get(index).copied().unwrap_or(false);
            debug_assert!(live, "freeing index {index} that is not outstanding");
            if let Some(slot) = self.outstanding.get_mut(index) {
                *slot = false;
            }
        }
        self.free.push_back(index);
    }

    pub fn free_many(&mut self, indices: impl IntoIterator<Item = usize>) {
        for index in indices {
            self.free(index);
        }
    }

    /// Drop freed indices that sit at the top of the issued range, then let
    /// `shrink(min_needed, current_capacity)` choose a new capacity. The
    /// result is clamped to `[high_water, current_capacity]` and returned.
    pub fn compact(&mut self, shrink: impl FnOnce(usize, usize) -> usize) -> usize {
        let freed: BTreeSet<usize> = self.free.iter().copied().collect();
        let mut top = self.high_water;
        while top > 0 && freed.contains(&(top - 1)) {
            top -= 1;
        }
        if top != self.high_water {
            self.free.retain(|&i| i < top);
            self.high_water = top;
            #[cfg(debug_assertions)]
            self.outstanding.truncate(top);
        }
        let proposed = shrink(self.high_water, self.capacity);
        self.capacity = proposed.clamp(self.high_water, self.capacity);
        self.capacity
    }

    fn grow(&mut self) {
        let previous = self.capacity;
        let proposed = (self.growth)(previous);
        self.capacity = proposed.max(previous + 1);
        tracing::trace!(previous, capacity = self.capacity, "index pool grew");
    }

    #[cfg(debug_assertions)]
    fn mark_outstanding(&mut self, index: usize) {
        if self.outstanding.len() <= index {
            self.outstanding.resize(index + 1, false);
        }
        self.outstanding[index] = true;
    }

    #[cfg(not(debug_assertions))]
    fn mark_outstanding(&mut self, _index: usize) {}
}
