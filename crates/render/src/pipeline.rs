use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use glam::DVec3;
use parking_lot::Mutex;
use wrapworld_common::WorldGeometry;
use wrapworld_mem::{FlushReport, FreeingService, MemoryConfig, ObjectListTable, PageArena, PageSink};
use wrapworld_stream::RelevantSet;

use crate::backend::GpuBackend;
use crate::config::RenderConfig;
use crate::error::{RenderError, RenderResult};
use crate::list::RenderList;
use crate::pair::{BuildState, RenderListPair};
use crate::timer::FrameTimer;

/// What one call to [`RenderPipeline::frame`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub frame: u64,
    pub swapped: bool,
    pub rebuild_started: bool,
    /// Objects in the front list.
    pub visible: usize,
    /// Ids the GPU sees this frame.
    pub sent: usize,
    pub flush: FlushReport,
}

struct FrameClock {
    timer: FrameTimer,
    last: Option<Instant>,
    frames: u64,
}

/// Per-camera visibility and submission.
///
/// Each frame the GPU-submission thread swaps in a finished back list if
/// there is one, starts the next rebuild on the worker pool, then sends,
/// flushes and draws the front list. The list drawn is therefore built from
/// the observer position of an earlier frame.
pub struct RenderPipeline {
    config: RenderConfig,
    geometry: WorldGeometry,
    arena: Arc<PageArena>,
    lists: Arc<RenderListPair>,
    pool: rayon::ThreadPool,
    rebuilds: Arc<AtomicU64>,
    clock: Mutex<FrameClock>,
}

impl std::fmt::Debug for RenderPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderPipeline")
            .field("config", &self.config)
            .field("state", &self.lists.state())
            .field("rebuilds", &self.rebuilds_completed())
            .finish()
    }
}

impl RenderPipeline {
    pub fn new(
        config: RenderConfig,
        geometry: WorldGeometry,
        arena: &Arc<PageArena>,
        freeing: &FreeingService,
        memory: &MemoryConfig,
    ) -> RenderResult<Self> {
        let table = ObjectListTable::new(config.object_list_capacity, arena, freeing, memory)?;
        let lists = RenderListPair::new(RenderList::new(table.clone())?, RenderList::new(table)?);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads.max(1))
            .thread_name(|i| format!("wrapworld-render-{i}"))
            .panic_handler(|_| tracing::error!("render-list rebuild panicked"))
            .build()
            .map_err(|e| RenderError::WorkerPool(e.to_string()))?;
        tracing::debug!(
            workers = config.worker_threads,
            capacity = config.object_list_capacity,
            radius = config.visibility_radius,
            "render pipeline created"
        );
        let report_every = config.report_interval.max(1) as usize;
        Ok(Self {
            config,
            geometry,
            arena: Arc::clone(arena),
            lists: Arc::new(lists),
            pool,
            rebuilds: Arc::new(AtomicU64::new(0)),
            clock: Mutex::new(FrameClock {
                timer: FrameTimer::new(report_every),
                last: None,
                frames: 0,
            }),
        })
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn lists(&self) -> &Arc<RenderListPair> {
        &self.lists
    }

    pub fn rebuilds_completed(&self) -> u64 {
        self.rebuilds.load(Ordering::Acquire)
    }

    pub fn frames(&self) -> u64 {
        self.clock.lock().frames
    }

    /// Average frame rate over the last report interval.
    pub fn fps(&self) -> f64 {
        self.clock.lock().timer.fps()
    }

    /// Start rebuilding the back list from `relevant` around `observer`.
    /// Returns false, doing nothing, while a previous rebuild is pending.
    pub fn request_rebuild(&self, relevant: &Arc<RelevantSet>, observer: DVec3) -> bool {
        if !self.lists.begin_rebuild() {
            tracing::trace!("rebuild already pending");
            return false;
        }
        let lists = Arc::clone(&self.lists);
        let relevant = Arc::clone(relevant);
        let rebuilds = Arc::clone(&self.rebuilds);
        let geometry = self.geometry;
        let radius = self.config.visibility_radius;
        self.pool.spawn(move || {
            let mut guard = RebuildGuard {
                lists: &lists,
                done: false,
            };
            rebuild(&lists, &relevant, &geometry, radius, observer);
            guard.done = true;
            lists.finish_rebuild();
            rebuilds.fetch_add(1, Ordering::AcqRel);
        });
        true
    }

    /// Block until no rebuild is in flight or `timeout` passes. True if
    /// the pipeline settled.
    pub fn wait_for_rebuild(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.lists.state() == BuildState::Building {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        true
    }

    /// Swap in a finished back list without blocking.
    pub fn try_swap(&self) -> bool {
        self.lists.try_swap()
    }

    /// One frame on the GPU-submission thread.
    pub fn frame(
        &self,
        backend: &mut dyn GpuBackend,
        sink: &mut dyn PageSink,
        relevant: &Arc<RelevantSet>,
        observer: DVec3,
    ) -> RenderResult<FrameStats> {
        let _span = tracing::info_span!("render_frame").entered();
        let swapped = self.lists.try_swap();
        let rebuild_started = self.request_rebuild(relevant, observer);

        let mut front = self.lists.front();
        let sent = front.send_to_gpu();
        let flush = self.arena.flush_stale_pages(sink);
        front.render(backend)?;
        let visible = front.len();
        drop(front);

        let frame = self.tick(visible);
        tracing::trace!(frame, swapped, rebuild_started, visible, sent, "frame submitted");
        Ok(FrameStats {
            frame,
            swapped,
            rebuild_started,
            visible,
            sent,
            flush,
        })
    }

    fn tick(&self, visible: usize) -> u64 {
        let mut clock = self.clock.lock();
        let now = Instant::now();
        if let Some(last) = clock.last.replace(now) {
            clock.timer.record(now - last);
        }
        clock.frames += 1;
        if clock.frames % u64::from(self.config.report_interval.max(1)) == 0 {
            tracing::info!(
                frame = clock.frames,
                fps = clock.timer.fps(),
                worst_ms = clock.timer.max().as_secs_f64() * 1000.0,
                visible,
                "frame rate"
            );
        }
        clock.frames
    }
}

/// Releases the rebuild claim if the worker unwinds before publishing.
struct RebuildGuard<'a> {
    lists: &'a RenderListPair,
    done: bool,
}

impl Drop for RebuildGuard<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.lists.abandon_rebuild();
        }
    }
}

/// Refill the back list: everything relevant within `radius` of the
/// observer, plus globally visible objects, nearest first.
fn rebuild(lists: &RenderListPair, relevant: &RelevantSet, geometry: &WorldGeometry, radius: f64, observer: DVec3) {
    let _span = tracing::debug_span!("render_list_rebuild").entered();
    let candidates = relevant.snapshot();
    let mut back = lists.back();
    back.reset();
    for entry in &candidates {
        if entry.global {
            back.push(entry.renderable.as_ref(), 0.0);
            continue;
        }
        let distance = geometry.euclidean_distance(entry.renderable.position(), observer);
        if distance < radius {
            back.push(entry.renderable.as_ref(), distance);
        }
    }
    back.sort_by_proximity();
    tracing::trace!(candidates = candidates.len(), visible = back.len(), "render list rebuilt");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;

    use wrapworld_common::{CellCoord, Marker, Renderable, RenderableId, VISIBLE_EVERYWHERE};
    use wrapworld_mem::UploadError;
    use wrapworld_stream::{GridId, RelevanceGraph};

    use crate::backend::RecordingBackend;

    const WAIT: Duration = Duration::from_secs(5);

    #[derive(Default)]
    struct CountingSink {
        uploads: usize,
    }

    impl PageSink for CountingSink {
        fn upload(&mut self, _page: usize, _offset: usize, _bytes: &[u8]) -> Result<(), UploadError> {
            self.uploads += 1;
            Ok(())
        }
    }

    /// A renderable whose position read blocks while the gate is held.
    struct Gated {
        inner: Marker,
        gate: Arc<Mutex<()>>,
    }

    impl Renderable for Gated {
        fn id(&self) -> RenderableId {
            self.inner.id()
        }

        fn position(&self) -> DVec3 {
            let _open = self.gate.lock();
            self.inner.position()
        }

        fn object_id(&self) -> u32 {
            self.inner.object_id()
        }
    }

    struct Fixture {
        pipeline: RenderPipeline,
        graph: RelevanceGraph,
        grid: GridId,
        _freeing: FreeingService,
    }

    impl Fixture {
        fn new(capacity: usize) -> Self {
            let memory = MemoryConfig {
                max_pages: 64,
                ..MemoryConfig::default()
            };
            let arena = PageArena::new(&memory).unwrap();
            let freeing = FreeingService::start().unwrap();
            let config = RenderConfig {
                visibility_radius: 5.0,
                worker_threads: 2,
                object_list_capacity: capacity,
                report_interval: 4,
            };
            let geometry = WorldGeometry::new(1.0, 32);
            let pipeline = RenderPipeline::new(config, geometry, &arena, &freeing, &memory).unwrap();
            let graph = RelevanceGraph::new(CellCoord::new(0, 0, 0), 100.0, 32.0, Arc::new(RelevantSet::default()));
            Self {
                pipeline,
                graph,
                grid: GridId::new(),
                _freeing: freeing,
            }
        }

        fn add(&mut self, renderable: Arc<dyn Renderable>) {
            let cell = CellCoord::from_position(renderable.position(), 1.0);
            self.graph.insert(self.grid, cell, renderable);
        }

        fn relevant(&self) -> Arc<RelevantSet> {
            Arc::clone(self.graph.relevant())
        }
    }

    fn at(object_id: u32, x: f64) -> Arc<Marker> {
        Arc::new(Marker::new(object_id, DVec3::new(x, 0.0, 0.0)))
    }

    #[test]
    fn second_rebuild_request_is_ignored_while_pending() {
        let mut f = Fixture::new(16);
        f.add(at(1, 1.0));
        let relevant = f.relevant();
        assert!(f.pipeline.request_rebuild(&relevant, DVec3::ZERO));
        assert!(!f.pipeline.request_rebuild(&relevant, DVec3::ZERO));
        assert!(f.pipeline.wait_for_rebuild(WAIT));
        // Finished but not swapped: still pending.
        assert!(!f.pipeline.request_rebuild(&relevant, DVec3::ZERO));
        assert!(f.pipeline.try_swap());
        assert!(f.pipeline.request_rebuild(&relevant, DVec3::ZERO));
        assert!(f.pipeline.wait_for_rebuild(WAIT));
        assert_eq!(f.pipeline.rebuilds_completed(), 2);
    }

    #[test]
    fn concurrent_rebuild_requests_start_one() {
        let mut f = Fixture::new(16);
        f.add(at(1, 1.0));
        let relevant = f.relevant();
        let barrier = Barrier::new(8);
        let started: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        usize::from(f.pipeline.request_rebuild(&relevant, DVec3::ZERO))
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });
        assert_eq!(started, 1);
        assert!(f.pipeline.wait_for_rebuild(WAIT));
        assert_eq!(f.pipeline.rebuilds_completed(), 1);
    }

    #[test]
    fn swap_is_refused_while_the_worker_runs() {
        let mut f = Fixture::new(16);
        let gate = Arc::new(Mutex::new(()));
        f.add(Arc::new(Gated {
            inner: Marker::new(7, DVec3::new(1.0, 0.0, 0.0)),
            gate: Arc::clone(&gate),
        }));
        let relevant = f.relevant();
        let mut backend = RecordingBackend::new();
        let mut sink = CountingSink::default();

        let held = gate.lock();
        let stats = f.pipeline.frame(&mut backend, &mut sink, &relevant, DVec3::ZERO).unwrap();
        assert!(stats.rebuild_started);
        // The render path keeps going while the worker is stuck.
        let stats = f.pipeline.frame(&mut backend, &mut sink, &relevant, DVec3::ZERO).unwrap();
        assert!(!stats.swapped);
        assert!(!stats.rebuild_started);
        assert_eq!(stats.visible, 0);
        assert!(backend.calls().is_empty());
        drop(held);

        assert!(f.pipeline.wait_for_rebuild(WAIT));
        let stats = f.pipeline.frame(&mut backend, &mut sink, &relevant, DVec3::ZERO).unwrap();
        assert!(stats.swapped);
        assert_eq!(stats.visible, 1);
        assert_eq!(backend.objects_drawn(), 1);
    }

    #[test]
    fn drawn_list_lags_the_observer_by_one_rebuild() {
        let mut f = Fixture::new(16);
        f.add(at(1, 1.0));
        f.add(at(2, 10.0));
        let relevant = f.relevant();
        let mut backend = RecordingBackend::new();
        let mut sink = CountingSink::default();

        let first = f.pipeline.frame(&mut backend, &mut sink, &relevant, DVec3::ZERO).unwrap();
        assert_eq!(first.visible, 0);
        assert!(f.pipeline.wait_for_rebuild(WAIT));

        // Observer moves next to object 2; this frame still draws the list
        // built around the origin.
        let observer = DVec3::new(10.0, 0.0, 0.0);
        let second = f.pipeline.frame(&mut backend, &mut sink, &relevant, observer).unwrap();
        assert!(second.swapped);
        assert_eq!(f.pipeline.lists().front().sent_ids(), vec![1]);
        assert!(f.pipeline.wait_for_rebuild(WAIT));

        let third = f.pipeline.frame(&mut backend, &mut sink, &relevant, observer).unwrap();
        assert!(third.swapped);
        assert_eq!(f.pipeline.lists().front().sent_ids(), vec![2]);
        assert_eq!(f.pipeline.frames(), 3);
    }

    #[test]
    fn visibility_wraps_and_keeps_global_objects() {
        let mut f = Fixture::new(16);
        // 31 is one unit from the origin across the seam.
        f.add(at(1, 31.0));
        f.add(at(2, 16.0));
        let sky: Arc<dyn Renderable> = at(3, 16.0);
        f.graph.insert(f.grid, VISIBLE_EVERYWHERE, sky);
        let relevant = f.relevant();
        assert!(f.pipeline.request_rebuild(&relevant, DVec3::ZERO));
        assert!(f.pipeline.wait_for_rebuild(WAIT));
        assert!(f.pipeline.try_swap());
        let front = f.pipeline.lists().front();
        let ids: Vec<u32> = front.entries().iter().map(|e| e.object_id).collect();
        assert_eq!(ids, vec![3, 1]);
    }

    #[test]
    fn unchanged_front_list_is_not_reuploaded() {
        let mut f = Fixture::new(16);
        let gate = Arc::new(Mutex::new(()));
        f.add(Arc::new(Gated {
            inner: Marker::new(4, DVec3::new(1.0, 0.0, 0.0)),
            gate: Arc::clone(&gate),
        }));
        let relevant = f.relevant();
        let mut backend = RecordingBackend::new();
        let mut sink = CountingSink::default();
        f.pipeline.frame(&mut backend, &mut sink, &relevant, DVec3::ZERO).unwrap();
        assert!(f.pipeline.wait_for_rebuild(WAIT));

        // Keep the next rebuild from finishing so the front list stays put.
        let held = gate.lock();
        let swapped = f.pipeline.frame(&mut backend, &mut sink, &relevant, DVec3::ZERO).unwrap();
        assert!(swapped.swapped);
        assert!(swapped.flush.pages_uploaded > 0);
        let uploads = sink.uploads;

        let steady = f.pipeline.frame(&mut backend, &mut sink, &relevant, DVec3::ZERO).unwrap();
        assert!(!steady.swapped);
        assert_eq!(steady.sent, 1);
        assert_eq!(steady.flush.pages_uploaded, 0);
        assert_eq!(sink.uploads, uploads);
        assert_eq!(backend.calls().len(), 2);
        drop(held);
        assert!(f.pipeline.wait_for_rebuild(WAIT));
    }

    #[test]
    fn backend_errors_propagate() {
        let mut f = Fixture::new(16);
        f.add(at(1, 1.0));
        let relevant = f.relevant();
        let mut backend = RecordingBackend::rejecting();
        let mut sink = CountingSink::default();
        f.pipeline.frame(&mut backend, &mut sink, &relevant, DVec3::ZERO).unwrap();
        assert!(f.pipeline.wait_for_rebuild(WAIT));
        let err = f.pipeline.frame(&mut backend, &mut sink, &relevant, DVec3::ZERO);
        assert!(matches!(err, Err(RenderError::Backend(_))));
    }
}
