use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use uuid::Uuid;
use wrapworld_common::{CellCoord, Renderable, RenderableId};

use crate::error::{StreamError, StreamResult};
use crate::grid::GridId;
use crate::relevance::RelevanceGraph;

/// Identifier of a camera registered with an executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CameraId(pub Uuid);

impl CameraId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CameraId {
    fn default() -> Self {
        Self::new()
    }
}

/// Work item for the relevance thread. Processed strictly in send order.
pub(crate) enum RelevanceCommand {
    RegisterCamera {
        camera: CameraId,
        graph: RelevanceGraph,
    },
    DropCamera(CameraId),
    AttachGrid {
        camera: CameraId,
        grid: GridId,
        snapshot: Vec<(CellCoord, Arc<dyn Renderable>)>,
    },
    DetachGrid {
        camera: CameraId,
        grid: GridId,
    },
    Insert {
        camera: CameraId,
        grid: GridId,
        cell: CellCoord,
        renderable: Arc<dyn Renderable>,
    },
    Remove {
        camera: CameraId,
        grid: GridId,
        cell: CellCoord,
        id: RenderableId,
    },
    Recenter {
        camera: CameraId,
        cell: CellCoord,
    },
    /// Acknowledged once everything sent before it has been applied.
    Barrier(Sender<()>),
    Shutdown,
}

/// Cloneable submission endpoint for the relevance thread.
#[derive(Clone)]
pub struct RelevanceHandle {
    tx: Sender<RelevanceCommand>,
}

impl std::fmt::Debug for RelevanceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelevanceHandle").finish_non_exhaustive()
    }
}

impl RelevanceHandle {
    pub(crate) fn submit(&self, command: RelevanceCommand) -> StreamResult<()> {
        self.tx.send(command).map_err(|_| StreamError::ExecutorStopped)
    }

    /// Block until every command submitted so far has been applied.
    pub fn sync(&self) -> StreamResult<()> {
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        self.submit(RelevanceCommand::Barrier(ack_tx))?;
        ack_rx.recv().map_err(|_| StreamError::ExecutorStopped)
    }
}

/// The single thread that owns every camera's [`RelevanceGraph`].
///
/// Grid registration, membership changes and center changes all arrive as
/// commands on one channel, so a graph is never re-evaluated while it is
/// being structurally modified.
pub struct RelevanceExecutor {
    handle: RelevanceHandle,
    processed: Arc<AtomicU64>,
    thread: Option<JoinHandle<()>>,
}

impl RelevanceExecutor {
    pub fn start() -> StreamResult<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let processed = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&processed);
        let thread = std::thread::Builder::new()
            .name("wrapworld-relevance".into())
            .spawn(move || run(rx, &counter))
            .map_err(|e| StreamError::ExecutorSpawn(e.to_string()))?;
        Ok(Self {
            handle: RelevanceHandle { tx },
            processed,
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> RelevanceHandle {
        self.handle.clone()
    }

    /// Commands applied so far.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Acquire)
    }
}

impl Drop for RelevanceExecutor {
    fn drop(&mut self) {
        let _ = self.handle.submit(RelevanceCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("relevance thread panicked");
            }
        }
    }
}

fn run(rx: Receiver<RelevanceCommand>, processed: &AtomicU64) {
    let mut graphs: HashMap<CameraId, RelevanceGraph> = HashMap::new();
    tracing::debug!("relevance executor started");
    while let Ok(command) = rx.recv() {
        match command {
            RelevanceCommand::RegisterCamera { camera, graph } => {
                graphs.insert(camera, graph);
            }
            RelevanceCommand::DropCamera(camera) => {
                if let Some(mut graph) = graphs.remove(&camera) {
                    graph.clear();
                }
            }
            RelevanceCommand::AttachGrid { camera, grid, snapshot } => {
                if let Some(graph) = graphs.get_mut(&camera) {
                    graph.attach_grid(grid, snapshot);
                }
            }
            RelevanceCommand::DetachGrid { camera, grid } => {
                if let Some(graph) = graphs.get_mut(&camera) {
                    graph.detach_grid(grid);
                }
            }
            RelevanceCommand::Insert {
                camera,
                grid,
                cell,
                renderable,
            } => {
                if let Some(graph) = graphs.get_mut(&camera) {
                    graph.insert(grid, cell, renderable);
                }
            }
            RelevanceCommand::Remove { camera, grid, cell, id } => {
                if let Some(graph) = graphs.get_mut(&camera) {
                    graph.remove(grid, cell, id);
                }
            }
            RelevanceCommand::Recenter { camera, cell } => {
                if let Some(graph) = graphs.get_mut(&camera) {
                    graph.recenter(cell);
                }
            }
            RelevanceCommand::Barrier(ack) => {
                let _ = ack.send(());
            }
            RelevanceCommand::Shutdown => break,
        }
        processed.fetch_add(1, Ordering::AcqRel);
    }
    tracing::debug!(cameras = graphs.len(), "relevance executor stopped");
}
