//! Concrete record tables used by the renderer.

use std::sync::Arc;

use crate::arena::PageArena;
use crate::config::MemoryConfig;
use crate::error::MemResult;
use crate::freeing::FreeingService;
use crate::schema::{FieldKind, Schema};
use crate::window::{MemoryWindow, Variable};

/// 4x4 float matrices, one per record, stored column-major for the GPU.
#[derive(Debug, Clone)]
pub struct MatrixTable {
    window: MemoryWindow,
    matrix: Variable,
}

impl MatrixTable {
    pub fn new(arena: &Arc<PageArena>, freeing: &FreeingService, config: &MemoryConfig) -> MemResult<Self> {
        let schema = Schema::builder()
            .field("matrix", FieldKind::FloatArray(16))
            .build()?;
        let window = MemoryWindow::new("matrices", schema, arena, freeing, config)?;
        let matrix = lookup(&window, "matrix");
        Ok(Self { window, matrix })
    }

    pub fn window(&self) -> &MemoryWindow {
        &self.window
    }

    pub fn create(&self) -> usize {
        self.window.create()
    }

    pub fn free_later(&self, index: usize) {
        self.window.free_later(index);
    }

    /// Store a column-major matrix as is.
    pub fn set(&self, index: usize, columns: &[f32; 16]) {
        self.matrix.set_slice(index, columns);
    }

    /// Store a row-major matrix, transposing it on the way in.
    pub fn set_transposed(&self, index: usize, rows: &[f32; 16]) {
        let mut columns = [0.0f32; 16];
        for r in 0..4 {
            for c in 0..4 {
                columns[c * 4 + r] = rows[r * 4 + c];
            }
        }
        self.matrix.set_slice(index, &columns);
    }

    pub fn get(&self, index: usize) -> [f32; 16] {
        let mut out = [0.0f32; 16];
        out.copy_from_slice(&self.matrix.get_slice::<f32>(index));
        out
    }
}

/// Fixed-capacity lists of object ids: a count followed by the ids.
#[derive(Debug, Clone)]
pub struct ObjectListTable {
    window: MemoryWindow,
    count: Variable,
    ids: Variable,
    list_capacity: usize,
}

impl ObjectListTable {
    pub fn new(
        list_capacity: usize,
        arena: &Arc<PageArena>,
        freeing: &FreeingService,
        config: &MemoryConfig,
    ) -> MemResult<Self> {
        let schema = Schema::builder()
            .field("count", FieldKind::Int)
            .field("ids", FieldKind::IntArray(list_capacity))
            .build()?;
        let window = MemoryWindow::new("object-lists", schema, arena, freeing, config)?;
        let count = lookup(&window, "count");
        let ids = lookup(&window, "ids");
        Ok(Self {
            window,
            count,
            ids,
            list_capacity,
        })
    }

    pub fn window(&self) -> &MemoryWindow {
        &self.window
    }

    /// Ids one list can hold.
    pub fn list_capacity(&self) -> usize {
        self.list_capacity
    }

    /// Reserve an empty list. The record may sit on a recycled page, so its
    /// count is cleared before it is handed out.
    pub fn create(&self) -> usize {
        let index = self.window.create();
        self.count.set(index, 0i32);
        index
    }

    pub fn try_create(&self) -> MemResult<usize> {
        let index = self.window.try_create()?;
        self.count.set(index, 0i32);
        Ok(index)
    }

    pub fn free_later(&self, index: usize) {
        self.window.free_later(index);
    }

    /// Write `ids` into list `index`, truncating at capacity. Returns how
    /// many ids were stored.
    pub fn write(&self, index: usize, ids: &[u32]) -> usize {
        let n = ids.len().min(self.list_capacity);
        let as_i32: Vec<i32> = ids[..n].iter().map(|&id| id as i32).collect();
        self.ids.set_slice(index, &as_i32);
        self.count.set(index, n as i32);
        n
    }

    /// Stored count, clamped to the list capacity.
    pub fn len(&self, index: usize) -> usize {
        (self.count.get::<i32>(index).max(0) as usize).min(self.list_capacity)
    }

    pub fn is_empty(&self, index: usize) -> bool {
        self.len(index) == 0
    }

    pub fn read(&self, index: usize) -> Vec<u32> {
        let n = self.len(index);
        self.ids.get_slice::<i32>(index)[..n]
            .iter()
            .map(|&id| id as u32)
            .collect()
    }

    /// Physical arena offset of list `index`, as handed to draw calls.
    pub fn physical_address(&self, index: usize) -> usize {
        self.window.physical_address(index)
    }
}

fn lookup(window: &MemoryWindow, name: &str) -> Variable {
    match window.variable(name) {
        Some(v) => v,
        None => unreachable!("schema built above declares `{name}`"),
    }
}
