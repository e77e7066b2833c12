use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use wrapworld_common::rollover::rollover_distance;
use wrapworld_common::{CellCoord, Renderable, RenderableId};

use crate::grid::GridId;

struct Slot {
    renderable: Arc<dyn Renderable>,
    refs: usize,
    global_refs: usize,
}

/// One member of a [`RelevantSet`] snapshot.
#[derive(Clone)]
pub struct RelevantEntry {
    pub renderable: Arc<dyn Renderable>,
    /// Registered in the visible-everywhere cell, so exempt from distance cuts.
    pub global: bool,
}

/// Flattened, deduplicated set of renderables currently relevant to one
/// camera.
///
/// Written only by the relevance executor; read by render-list workers.
/// A renderable registered in several relevant pairs appears once.
#[derive(Default)]
pub struct RelevantSet {
    entries: RwLock<HashMap<RenderableId, Slot>>,
    version: AtomicU64,
}

impl std::fmt::Debug for RelevantSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelevantSet")
            .field("len", &self.len())
            .field("version", &self.version())
            .finish()
    }
}

impl RelevantSet {
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn contains(&self, id: RenderableId) -> bool {
        self.entries.read().contains_key(&id)
    }

    /// Bumped on every membership change.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Copy of the current members.
    pub fn snapshot(&self) -> Vec<RelevantEntry> {
        self.entries
            .read()
            .values()
            .map(|slot| RelevantEntry {
                renderable: Arc::clone(&slot.renderable),
                global: slot.global_refs > 0,
            })
            .collect()
    }

    fn add_many<'a>(&self, members: impl Iterator<Item = &'a Arc<dyn Renderable>>, global: bool) {
        let mut entries = self.entries.write();
        let mut changed = false;
        for r in members {
            let slot = entries.entry(r.id()).or_insert_with(|| {
                changed = true;
                Slot {
                    renderable: Arc::clone(r),
                    refs: 0,
                    global_refs: 0,
                }
            });
            slot.refs += 1;
            slot.global_refs += usize::from(global);
        }
        if changed {
            self.version.fetch_add(1, Ordering::AcqRel);
        }
    }

    fn remove_many(&self, ids: impl Iterator<Item = RenderableId>, global: bool) {
        let mut entries = self.entries.write();
        let mut changed = false;
        for id in ids {
            if let Entry::Occupied(mut e) = entries.entry(id) {
                let slot = e.get_mut();
                slot.refs -= 1;
                slot.global_refs -= usize::from(global);
                if slot.refs == 0 {
                    e.remove();
                    changed = true;
                }
            }
        }
        if changed {
            self.version.fetch_add(1, Ordering::AcqRel);
        }
    }

    fn clear(&self) {
        self.entries.write().clear();
        self.version.fetch_add(1, Ordering::AcqRel);
    }
}

/// Cell-level relevance test on the ground plane.
///
/// The sentinel cell always passes. A radius that is negative or not finite
/// fails everything else. Otherwise a taxicab broad phase at `radius * √2`
/// precedes the exact Euclidean test, both on rollover cell deltas.
pub fn cell_is_relevant(center: CellCoord, cell: CellCoord, radius: f64, width_cells: f64) -> bool {
    if cell.is_visible_everywhere() {
        return true;
    }
    if !radius.is_finite() || radius < 0.0 {
        return false;
    }
    let dx = rollover_distance(cell.x as f64 - center.x as f64, width_cells);
    let dz = rollover_distance(cell.z as f64 - center.z as f64, width_cells);
    if dx + dz >= radius * std::f64::consts::SQRT_2 {
        return false;
    }
    (dx * dx + dz * dz).sqrt() < radius
}

struct Pair {
    members: HashMap<RenderableId, Arc<dyn Renderable>>,
    relevant: bool,
}

/// Live `(grid, cell) -> renderables` pairs for one camera, filtered by
/// distance from the camera's cell.
///
/// Owned by the relevance executor thread, which is the only mutator; the
/// derived [`RelevantSet`] is what other threads see.
pub struct RelevanceGraph {
    center: CellCoord,
    radius: f64,
    width_cells: f64,
    pairs: HashMap<(GridId, CellCoord), Pair>,
    published: Arc<RelevantSet>,
}

impl RelevanceGraph {
    pub fn new(center: CellCoord, radius: f64, width_cells: f64, published: Arc<RelevantSet>) -> Self {
        Self {
            center,
            radius,
            width_cells,
            pairs: HashMap::new(),
            published,
        }
    }

    pub fn center(&self) -> CellCoord {
        self.center
    }

    pub fn relevant(&self) -> &Arc<RelevantSet> {
        &self.published
    }

    pub fn pair_count(&self) -> usize {
        self.pairs.len()
    }

    pub fn relevant_pair_count(&self) -> usize {
        self.pairs.values().filter(|p| p.relevant).count()
    }

    pub fn is_relevant(&self, cell: CellCoord) -> bool {
        cell_is_relevant(self.center, cell, self.radius, self.width_cells)
    }

    /// Register every `(cell, renderable)` of a grid snapshot.
    pub fn attach_grid(&mut self, grid: GridId, snapshot: Vec<(CellCoord, Arc<dyn Renderable>)>) {
        let count = snapshot.len();
        for (cell, renderable) in snapshot {
            self.insert(grid, cell, renderable);
        }
        tracing::debug!(?grid, renderables = count, pairs = self.pairs.len(), "grid attached");
    }

    pub fn detach_grid(&mut self, grid: GridId) {
        let keys: Vec<(GridId, CellCoord)> = self.pairs.keys().filter(|(g, _)| *g == grid).copied().collect();
        for key in &keys {
            if let Some(pair) = self.pairs.remove(key) {
                if pair.relevant {
                    self.published
                        .remove_many(pair.members.keys().copied(), key.1.is_visible_everywhere());
                }
            }
        }
        tracing::debug!(?grid, pairs_removed = keys.len(), "grid detached");
    }

    pub fn insert(&mut self, grid: GridId, cell: CellCoord, renderable: Arc<dyn Renderable>) {
        let relevant = self.is_relevant(cell);
        let pair = self.pairs.entry((grid, cell)).or_insert_with(|| Pair {
            members: HashMap::new(),
            relevant,
        });
        let id = renderable.id();
        if pair.members.contains_key(&id) {
            return;
        }
        if pair.relevant {
            self.published
                .add_many(std::iter::once(&renderable), cell.is_visible_everywhere());
        }
        pair.members.insert(id, renderable);
    }

    pub fn remove(&mut self, grid: GridId, cell: CellCoord, id: RenderableId) {
        let key = (grid, cell);
        let Some(pair) = self.pairs.get_mut(&key) else { return };
        if pair.members.remove(&id).is_none() {
            return;
        }
        if pair.relevant {
            self.published
                .remove_many(std::iter::once(id), cell.is_visible_everywhere());
        }
        if pair.members.is_empty() {
            self.pairs.remove(&key);
        }
    }

    /// Move the camera's center and re-test every pair. Returns how many
    /// pairs changed relevance.
    pub fn recenter(&mut self, center: CellCoord) -> usize {
        self.center = center;
        let mut entered = 0;
        let mut left = 0;
        for (&(_, cell), pair) in self.pairs.iter_mut() {
            let now = cell_is_relevant(center, cell, self.radius, self.width_cells);
            if now == pair.relevant {
                continue;
            }
            pair.relevant = now;
            // The sentinel cell never changes relevance, so these are never global.
            if now {
                self.published.add_many(pair.members.values(), false);
                entered += 1;
            } else {
                self.published.remove_many(pair.members.keys().copied(), false);
                left += 1;
            }
        }
        tracing::debug!(?center, entered, left, relevant = self.published.len(), "relevance recentered");
        entered + left
    }

    /// Forget everything; the published set becomes empty.
    pub fn clear(&mut self) {
        self.pairs.clear();
        self.published.clear();
    }
}
