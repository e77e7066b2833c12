use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;
use wrapworld_common::{CellCoord, Renderable, RenderableId, VISIBLE_EVERYWHERE};

use crate::executor::{CameraId, RelevanceCommand, RelevanceHandle};

/// Identifier of a [`SpacePartitioningGrid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridId(pub Uuid);

impl GridId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GridId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct GridState {
    cells: HashMap<CellCoord, HashMap<RenderableId, Arc<dyn Renderable>>>,
    locations: HashMap<RenderableId, CellCoord>,
    subscribers: Vec<(CameraId, RelevanceHandle)>,
}

impl GridState {
    fn notify(&self, make: impl Fn(CameraId) -> RelevanceCommand) {
        for (camera, handle) in &self.subscribers {
            if handle.submit(make(*camera)).is_err() {
                tracing::trace!(?camera, "relevance executor gone; dropping grid update");
            }
        }
    }
}

/// Renderables bucketed by the cell their position rounds to.
///
/// Cameras subscribe to a grid; every membership change is forwarded to the
/// relevance executor while the grid lock is held, so each camera sees the
/// grid's changes in the order they happened.
pub struct SpacePartitioningGrid {
    id: GridId,
    cell_size: f64,
    state: Mutex<GridState>,
}

impl std::fmt::Debug for SpacePartitioningGrid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SpacePartitioningGrid")
            .field("id", &self.id)
            .field("cell_size", &self.cell_size)
            .field("cells", &state.cells.len())
            .field("renderables", &state.locations.len())
            .finish()
    }
}

impl SpacePartitioningGrid {
    /// Create an empty grid with the given cell size.
    pub fn new(cell_size: f64) -> Self {
        assert!(cell_size > 0.0, "cell_size must be positive");
        Self {
            id: GridId::new(),
            cell_size,
            state: Mutex::new(GridState::default()),
        }
    }

    pub fn id(&self) -> GridId {
        self.id
    }

    /// Cell size used for this partition.
    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    /// Convert a world position to a cell coordinate.
    pub fn position_to_cell(&self, pos: glam::DVec3) -> CellCoord {
        CellCoord::from_position(pos, self.cell_size)
    }

    /// Add a renderable in the cell its current position falls in.
    pub fn add(&self, renderable: Arc<dyn Renderable>) -> CellCoord {
        let cell = self.position_to_cell(renderable.position());
        self.add_at(renderable, cell);
        cell
    }

    /// Add a renderable visible from everywhere.
    pub fn add_global(&self, renderable: Arc<dyn Renderable>) {
        self.add_at(renderable, VISIBLE_EVERYWHERE);
    }

    /// Add a renderable to an explicit cell. Re-adding moves it.
    pub fn add_at(&self, renderable: Arc<dyn Renderable>, cell: CellCoord) {
        let mut state = self.state.lock();
        if let Some(previous) = state.locations.get(&renderable.id()).copied() {
            self.take_out(&mut state, renderable.id(), previous);
        }
        self.place(&mut state, cell, renderable);
    }

    /// Remove a renderable. Returns it if it was present.
    pub fn remove(&self, id: RenderableId) -> Option<Arc<dyn Renderable>> {
        let mut state = self.state.lock();
        let cell = state.locations.get(&id).copied()?;
        self.take_out(&mut state, id, cell)
    }

    /// Re-bucket a renderable after it moved. Returns true if its cell
    /// changed. Global renderables never move.
    pub fn relocate(&self, id: RenderableId) -> bool {
        let mut state = self.state.lock();
        let Some(current) = state.locations.get(&id).copied() else {
            return false;
        };
        if current.is_visible_everywhere() {
            return false;
        }
        let Some(renderable) = state.cells.get(&current).and_then(|c| c.get(&id)).cloned() else {
            return false;
        };
        let target = self.position_to_cell(renderable.position());
        if target == current {
            return false;
        }
        self.take_out(&mut state, id, current);
        self.place(&mut state, target, renderable);
        tracing::trace!(?id, from = ?current, to = ?target, "renderable relocated");
        true
    }

    pub fn cell_of(&self, id: RenderableId) -> Option<CellCoord> {
        self.state.lock().locations.get(&id).copied()
    }

    /// Get all renderables in a specific cell.
    pub fn renderables_in_cell(&self, cell: CellCoord) -> Vec<Arc<dyn Renderable>> {
        self.state
            .lock()
            .cells
            .get(&cell)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of non-empty cells.
    pub fn cell_count(&self) -> usize {
        self.state.lock().cells.len()
    }

    /// Total number of renderables.
    pub fn len(&self) -> usize {
        self.state.lock().locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    /// Register a camera: it receives the current contents, then every
    /// later change.
    pub(crate) fn subscribe(&self, camera: CameraId, handle: RelevanceHandle) -> crate::StreamResult<()> {
        let mut state = self.state.lock();
        let snapshot: Vec<(CellCoord, Arc<dyn Renderable>)> = state
            .cells
            .iter()
            .flat_map(|(cell, members)| members.values().map(move |r| (*cell, Arc::clone(r))))
            .collect();
        handle.submit(RelevanceCommand::AttachGrid {
            camera,
            grid: self.id,
            snapshot,
        })?;
        state.subscribers.retain(|(c, _)| *c != camera);
        state.subscribers.push((camera, handle));
        Ok(())
    }

    pub(crate) fn unsubscribe(&self, camera: CameraId) -> crate::StreamResult<()> {
        let mut state = self.state.lock();
        let Some(pos) = state.subscribers.iter().position(|(c, _)| *c == camera) else {
            return Ok(());
        };
        let (_, handle) = state.subscribers.remove(pos);
        handle.submit(RelevanceCommand::DetachGrid { camera, grid: self.id })
    }

    fn place(&self, state: &mut GridState, cell: CellCoord, renderable: Arc<dyn Renderable>) {
        let id = renderable.id();
        state.locations.insert(id, cell);
        state.cells.entry(cell).or_default().insert(id, Arc::clone(&renderable));
        let grid = self.id;
        state.notify(|camera| RelevanceCommand::Insert {
            camera,
            grid,
            cell,
            renderable: Arc::clone(&renderable),
        });
    }

    fn take_out(&self, state: &mut GridState, id: RenderableId, cell: CellCoord) -> Option<Arc<dyn Renderable>> {
        state.locations.remove(&id);
        let members = state.cells.get_mut(&cell)?;
        let removed = members.remove(&id);
        if members.is_empty() {
            state.cells.remove(&cell);
        }
        if removed.is_some() {
            let grid = self.id;
            state.notify(|camera| RelevanceCommand::Remove { camera, grid, cell, id });
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec3;
    use wrapworld_common::Marker;

    fn marker_at(x: f64, z: f64) -> Arc<Marker> {
        Arc::new(Marker::new(0, DVec3::new(x, 0.0, z)))
    }

    #[test]
    fn position_to_cell_basic() {
        let grid = SpacePartitioningGrid::new(16.0);
        assert_eq!(grid.position_to_cell(DVec3::new(10.0, 0.0, 10.0)), CellCoord::new(1, 0, 1));
        assert_eq!(grid.position_to_cell(DVec3::new(20.0, 0.0, -5.0)), CellCoord::new(1, 0, 0));
    }

    #[test]
    fn add_and_remove() {
        let grid = SpacePartitioningGrid::new(16.0);
        let a = marker_at(0.0, 0.0);
        let b = marker_at(40.0, 0.0);
        grid.add(a.clone());
        assert_eq!(grid.add(b.clone()), CellCoord::new(2, 0, 0));
        assert_eq!(grid.cell_count(), 2);
        assert_eq!(grid.len(), 2);
        assert_eq!(grid.renderables_in_cell(CellCoord::new(0, 0, 0)).len(), 1);

        assert!(grid.remove(a.id()).is_some());
        assert!(grid.remove(a.id()).is_none());
        assert_eq!(grid.cell_count(), 1);
    }

    #[test]
    fn relocate_follows_position() {
        let grid = SpacePartitioningGrid::new(16.0);
        let m = marker_at(0.0, 0.0);
        grid.add(m.clone());
        assert!(!grid.relocate(m.id()));

        m.set_position(DVec3::new(33.0, 0.0, -17.0));
        assert!(grid.relocate(m.id()));
        assert_eq!(grid.cell_of(m.id()), Some(CellCoord::new(2, 0, -1)));
        assert_eq!(grid.cell_count(), 1);
    }

    #[test]
    fn global_renderables_stay_put() {
        let grid = SpacePartitioningGrid::new(16.0);
        let sky = marker_at(0.0, 0.0);
        grid.add_global(sky.clone());
        sky.set_position(DVec3::new(500.0, 0.0, 0.0));
        assert!(!grid.relocate(sky.id()));
        assert_eq!(grid.cell_of(sky.id()), Some(VISIBLE_EVERYWHERE));
    }

    #[test]
    fn re_adding_moves_instead_of_duplicating() {
        let grid = SpacePartitioningGrid::new(16.0);
        let m = marker_at(0.0, 0.0);
        grid.add(m.clone());
        grid.add_at(m.clone(), CellCoord::new(5, 0, 5));
        assert_eq!(grid.len(), 1);
        assert_eq!(grid.cell_count(), 1);
        assert_eq!(grid.cell_of(m.id()), Some(CellCoord::new(5, 0, 5)));
    }

    #[test]
    fn empty_cell_returns_nothing() {
        let grid = SpacePartitioningGrid::new(16.0);
        assert!(grid.renderables_in_cell(CellCoord::new(99, 0, 99)).is_empty());
        assert!(grid.is_empty());
    }
}
