use wrapworld_common::{Renderable, RenderableId};
use wrapworld_mem::ObjectListTable;

use crate::backend::{DrawCall, GpuBackend};
use crate::error::RenderResult;

/// One renderable that passed the visibility filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisibleEntry {
    pub id: RenderableId,
    pub object_id: u32,
    /// Wrapped distance from the observer when the list was built.
    pub distance: f64,
}

/// The objects to draw for one frame, plus the object-list record they are
/// sent to the GPU through.
#[derive(Debug)]
pub struct RenderList {
    table: ObjectListTable,
    record: usize,
    entries: Vec<VisibleEntry>,
    sent: usize,
    dirty: bool,
}

impl RenderList {
    /// Reserve an object-list record for this list.
    pub fn new(table: ObjectListTable) -> RenderResult<Self> {
        let record = table.try_create()?;
        Ok(Self {
            table,
            record,
            entries: Vec::new(),
            sent: 0,
            dirty: false,
        })
    }

    pub fn record(&self) -> usize {
        self.record
    }

    /// Physical arena offset of this list's record.
    pub fn physical_address(&self) -> usize {
        self.table.physical_address(self.record)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[VisibleEntry] {
        &self.entries
    }

    pub fn contains(&self, id: RenderableId) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    /// Ids handed to the GPU by the last [`send_to_gpu`](Self::send_to_gpu).
    pub fn sent(&self) -> usize {
        self.sent
    }

    /// Ids as they currently sit in arena memory.
    pub fn sent_ids(&self) -> Vec<u32> {
        self.table.read(self.record)
    }

    pub fn reset(&mut self) {
        self.entries.clear();
        self.sent = 0;
        self.dirty = true;
    }

    pub fn push(&mut self, renderable: &dyn Renderable, distance: f64) {
        self.entries.push(VisibleEntry {
            id: renderable.id(),
            object_id: renderable.object_id(),
            distance,
        });
        self.dirty = true;
    }

    /// Nearest first, so truncation at the record capacity drops the
    /// farthest objects.
    pub fn sort_by_proximity(&mut self) {
        self.entries
            .sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.object_id.cmp(&b.object_id)));
        self.dirty = true;
    }

    /// Write the object ids into the list's record. Only touches arena
    /// memory when the list changed since the last send. Returns how many
    /// ids the GPU will see.
    pub fn send_to_gpu(&mut self) -> usize {
        if !self.dirty {
            return self.sent;
        }
        let ids: Vec<u32> = self.entries.iter().map(|e| e.object_id).collect();
        self.sent = self.table.write(self.record, &ids);
        if self.sent < ids.len() {
            tracing::warn!(
                visible = ids.len(),
                capacity = self.table.list_capacity(),
                "render list truncated; farthest objects dropped"
            );
        }
        self.dirty = false;
        self.sent
    }

    /// Issue the draw for what was last sent. Empty lists draw nothing.
    pub fn render(&self, backend: &mut dyn GpuBackend) -> RenderResult<()> {
        if self.sent == 0 {
            tracing::trace!(record = self.record, "empty render list");
            return Ok(());
        }
        backend.draw(DrawCall {
            list_address: self.physical_address(),
            count: self.sent,
        })
    }
}

impl Drop for RenderList {
    fn drop(&mut self) {
        self.table.free_later(self.record);
    }
}
