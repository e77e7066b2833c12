use std::sync::Arc;

use glam::DVec3;
use parking_lot::Mutex;
use wrapworld_common::{CellCoord, WorldGeometry};

use crate::config::RelevanceConfig;
use crate::error::StreamResult;
use crate::executor::{CameraId, RelevanceCommand, RelevanceExecutor, RelevanceHandle};
use crate::grid::SpacePartitioningGrid;
use crate::relevance::{RelevanceGraph, RelevantSet};

struct Placement {
    position: DVec3,
    cell: CellCoord,
}

/// An observer whose relevance graph lives on the relevance executor.
///
/// Position updates come from the gameplay tick; a recenter is submitted
/// only when the camera's cell changes and is not waited for. Grid
/// registration blocks until the executor has applied it.
pub struct Camera {
    id: CameraId,
    config: RelevanceConfig,
    executor: RelevanceHandle,
    placement: Mutex<Placement>,
    relevant: Arc<RelevantSet>,
    grids: Mutex<Vec<Arc<SpacePartitioningGrid>>>,
}

impl std::fmt::Debug for Camera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Camera")
            .field("id", &self.id)
            .field("cell", &self.center_cell())
            .field("relevant", &self.relevant.len())
            .finish()
    }
}

impl Camera {
    pub fn new(executor: &RelevanceExecutor, config: RelevanceConfig, position: DVec3) -> StreamResult<Self> {
        let id = CameraId::new();
        let cell = CellCoord::from_position(position, config.geometry.cell_size);
        let relevant = Arc::new(RelevantSet::default());
        let graph = RelevanceGraph::new(
            cell,
            config.relevance_radius_cells,
            config.geometry.width_cells(),
            Arc::clone(&relevant),
        );
        let handle = executor.handle();
        handle.submit(RelevanceCommand::RegisterCamera { camera: id, graph })?;
        tracing::debug!(camera = ?id, ?cell, radius = config.relevance_radius_cells, "camera registered");
        Ok(Self {
            id,
            config,
            executor: handle,
            placement: Mutex::new(Placement { position, cell }),
            relevant,
            grids: Mutex::new(Vec::new()),
        })
    }

    pub fn id(&self) -> CameraId {
        self.id
    }

    pub fn config(&self) -> &RelevanceConfig {
        &self.config
    }

    pub fn geometry(&self) -> &WorldGeometry {
        &self.config.geometry
    }

    pub fn position(&self) -> DVec3 {
        self.placement.lock().position
    }

    pub fn center_cell(&self) -> CellCoord {
        self.placement.lock().cell
    }

    /// Move the camera. Returns true when the move crossed into a new cell,
    /// in which case a recenter has been queued.
    pub fn set_position(&self, position: DVec3) -> StreamResult<bool> {
        let mut placement = self.placement.lock();
        placement.position = position;
        let cell = CellCoord::from_position(position, self.config.geometry.cell_size);
        if cell == placement.cell {
            return Ok(false);
        }
        placement.cell = cell;
        // Submitted under the placement lock so recenters keep their order.
        self.executor.submit(RelevanceCommand::Recenter { camera: self.id, cell })?;
        tracing::trace!(camera = ?self.id, ?cell, "center cell changed");
        Ok(true)
    }

    /// Start tracking a grid's contents. Blocks until applied.
    pub fn add_grid(&self, grid: &Arc<SpacePartitioningGrid>) -> StreamResult<()> {
        {
            let mut grids = self.grids.lock();
            if grids.iter().any(|g| Arc::ptr_eq(g, grid)) {
                return Ok(());
            }
            grid.subscribe(self.id, self.executor.clone())?;
            grids.push(Arc::clone(grid));
        }
        self.executor.sync()
    }

    /// Stop tracking a grid. Blocks until applied.
    pub fn remove_grid(&self, grid: &Arc<SpacePartitioningGrid>) -> StreamResult<()> {
        {
            let mut grids = self.grids.lock();
            let Some(pos) = grids.iter().position(|g| Arc::ptr_eq(g, grid)) else {
                return Ok(());
            };
            grids.remove(pos);
            grid.unsubscribe(self.id)?;
        }
        self.executor.sync()
    }

    /// Block until every pending relevance update has been applied.
    pub fn sync(&self) -> StreamResult<()> {
        self.executor.sync()
    }

    /// The live relevant set, shared with the executor.
    pub fn relevant(&self) -> &Arc<RelevantSet> {
        &self.relevant
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        for grid in self.grids.get_mut().drain(..) {
            let _ = grid.unsubscribe(self.id);
        }
        let _ = self.executor.submit(RelevanceCommand::DropCamera(self.id));
    }
}
