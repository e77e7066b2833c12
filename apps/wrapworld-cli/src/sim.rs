use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use glam::{DVec3, Mat4};
use wrapworld_common::{Marker, Renderable, WorldGeometry};
use wrapworld_mem::{FreeingService, FreeingStats, MatrixTable, PageArena, PageSink, UploadError};
use wrapworld_render::{GpuBackend, RenderPipeline};
use wrapworld_stream::{Camera, RelevanceExecutor, SpacePartitioningGrid};

use crate::config::EngineConfig;

/// How long and how busy a simulated run is.
#[derive(Debug, Clone)]
pub struct SimulationParams {
    pub frames: u64,
    pub objects: usize,
    /// Gameplay tick period.
    pub tick: Duration,
    /// Pause between frames on the submission thread.
    pub frame_interval: Duration,
    /// Observer speed, in cells per frame along +x.
    pub speed_cells: f64,
}

/// Totals printed at the end of a run.
#[derive(Debug, Clone, Default)]
pub struct SimulationReport {
    pub frames: u64,
    pub swaps: u64,
    pub rebuilds: u64,
    pub ticks: u64,
    pub last_visible: usize,
    pub max_visible: usize,
    pub relevant: usize,
    pub pages_uploaded: usize,
    pub pages_failed: usize,
    pub pages_in_use: usize,
    pub freeing: FreeingStats,
    pub fps: f64,
}

impl fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "frames: {} ({} swaps, {} rebuilds, {:.0} fps)", self.frames, self.swaps, self.rebuilds, self.fps)?;
        writeln!(f, "gameplay ticks: {}", self.ticks)?;
        writeln!(
            f,
            "visible: last={} max={} (relevant={})",
            self.last_visible, self.max_visible, self.relevant
        )?;
        writeln!(
            f,
            "pages: in_use={} uploaded={} failed={}",
            self.pages_in_use, self.pages_uploaded, self.pages_failed
        )?;
        write!(
            f,
            "deferred frees: {} batches, {} indices",
            self.freeing.batches, self.freeing.indices
        )
    }
}

/// Sink that only counts what a real binding layer would upload.
#[derive(Debug, Default)]
pub struct CountingSink {
    pub pages: usize,
    pub bytes: usize,
}

impl PageSink for CountingSink {
    fn upload(&mut self, _physical_page: usize, _offset: usize, bytes: &[u8]) -> Result<(), UploadError> {
        self.pages += 1;
        self.bytes += bytes.len();
        Ok(())
    }
}

struct Object {
    marker: Arc<Marker>,
    matrix: usize,
    velocity: DVec3,
}

/// Every subsystem wired together the way a client would: one arena, one
/// freeing service, one relevance executor, one grid and one camera.
pub struct Simulation {
    // Dropped first so render-list records go back through a live service.
    pipeline: RenderPipeline,
    camera: Camera,
    matrices: MatrixTable,
    grid: Arc<SpacePartitioningGrid>,
    geometry: WorldGeometry,
    _executor: RelevanceExecutor,
    freeing: FreeingService,
    arena: Arc<PageArena>,
}

impl Simulation {
    pub fn new(config: &EngineConfig) -> anyhow::Result<Self> {
        let geometry = config.relevance.geometry;
        let arena = PageArena::new(&config.memory)?;
        let freeing = FreeingService::start()?;
        let executor = RelevanceExecutor::start()?;
        let grid = Arc::new(SpacePartitioningGrid::new(geometry.cell_size));
        let camera = Camera::new(&executor, config.relevance.clone(), DVec3::ZERO)?;
        camera.add_grid(&grid)?;
        let matrices = MatrixTable::new(&arena, &freeing, &config.memory)?;
        let pipeline = RenderPipeline::new(config.render.clone(), geometry, &arena, &freeing, &config.memory)?;
        Ok(Self {
            pipeline,
            camera,
            matrices,
            grid,
            geometry,
            _executor: executor,
            freeing,
            arena,
        })
    }

    pub fn arena(&self) -> &Arc<PageArena> {
        &self.arena
    }

    /// Run the gameplay thread alongside `frames` submission frames on the
    /// calling thread. `after_frame` runs once per frame after the draw.
    pub fn run<B: GpuBackend>(
        &self,
        params: &SimulationParams,
        backend: &mut B,
        sink: &mut dyn PageSink,
        mut after_frame: impl FnMut(&mut B),
    ) -> anyhow::Result<SimulationReport> {
        let _span = tracing::info_span!("simulate", frames = params.frames, objects = params.objects).entered();
        let mut objects: Vec<Object> = (0..params.objects).map(|i| self.spawn(i as u32)).collect();
        let sky = Arc::new(Marker::new(u32::MAX, DVec3::ZERO));
        self.grid.add_global(sky);
        self.camera.sync()?;
        tracing::info!(relevant = self.camera.relevant().len(), "world populated");

        let stop = AtomicBool::new(false);
        let ticks = AtomicU64::new(0);
        let mut report = std::thread::scope(|s| -> anyhow::Result<SimulationReport> {
            let gameplay = std::thread::Builder::new()
                .name("wrapworld-gameplay".into())
                .spawn_scoped(s, || self.gameplay(&mut objects, params.tick, &stop, &ticks))?;
            let result = self.submit_frames(params, backend, sink, &mut after_frame);
            stop.store(true, Ordering::Release);
            if gameplay.join().is_err() {
                anyhow::bail!("gameplay thread panicked");
            }
            result
        })?;

        self.pipeline.wait_for_rebuild(Duration::from_secs(1));
        for object in objects {
            self.grid.remove(object.marker.id());
            self.matrices.free_later(object.matrix);
        }
        report.ticks = ticks.load(Ordering::Acquire);
        report.rebuilds = self.pipeline.rebuilds_completed();
        report.relevant = self.camera.relevant().len();
        report.pages_in_use = self.arena.pages_in_use();
        report.freeing = self.freeing.stats();
        report.fps = self.pipeline.fps();
        Ok(report)
    }

    fn submit_frames<B: GpuBackend>(
        &self,
        params: &SimulationParams,
        backend: &mut B,
        sink: &mut dyn PageSink,
        after_frame: &mut impl FnMut(&mut B),
    ) -> anyhow::Result<SimulationReport> {
        let mut report = SimulationReport::default();
        let width = self.geometry.width();
        let step = params.speed_cells * self.geometry.cell_size;
        for frame in 0..params.frames {
            let observer = DVec3::new((frame as f64 * step).rem_euclid(width), 0.0, width / 2.0);
            self.camera.set_position(observer)?;
            let stats = self.pipeline.frame(backend, sink, self.camera.relevant(), observer)?;
            after_frame(&mut *backend);
            report.frames += 1;
            report.swaps += u64::from(stats.swapped);
            report.last_visible = stats.visible;
            report.max_visible = report.max_visible.max(stats.visible);
            report.pages_uploaded += stats.flush.pages_uploaded;
            report.pages_failed += stats.flush.pages_failed;
            std::thread::sleep(params.frame_interval);
        }
        Ok(report)
    }

    fn spawn(&self, object_id: u32) -> Object {
        let width = self.geometry.width();
        let i = f64::from(object_id);
        // Low-discrepancy scatter over the whole torus.
        let position = DVec3::new((i * 0.618_034).fract() * width, 0.0, (i * 0.754_878).fract() * width);
        let angle = i * 2.399_963;
        let velocity = DVec3::new(angle.cos(), 0.0, angle.sin()) * self.geometry.cell_size * 0.01;
        let marker = Arc::new(Marker::new(object_id, position));
        let matrix = self.matrices.create();
        self.matrices.set(matrix, &translation(position));
        self.grid.add(marker.clone());
        Object {
            marker,
            matrix,
            velocity,
        }
    }

    /// The gameplay tick: move everything, re-bucket it, and replace one
    /// object per tick so deferred frees keep flowing.
    fn gameplay(&self, objects: &mut [Object], tick: Duration, stop: &AtomicBool, ticks: &AtomicU64) {
        let width = self.geometry.width();
        let mut n = 0u64;
        while !stop.load(Ordering::Acquire) {
            for object in objects.iter() {
                let p = object.marker.position() + object.velocity;
                let p = DVec3::new(p.x.rem_euclid(width), p.y, p.z.rem_euclid(width));
                object.marker.set_position(p);
                self.grid.relocate(object.marker.id());
                self.matrices.set(object.matrix, &translation(p));
            }
            if !objects.is_empty() {
                let slot = n as usize % objects.len();
                let old = &objects[slot];
                let object_id = old.marker.object_id();
                self.grid.remove(old.marker.id());
                self.matrices.free_later(old.matrix);
                objects[slot] = self.spawn(object_id);
            }
            n += 1;
            ticks.store(n, Ordering::Release);
            std::thread::sleep(tick);
        }
        tracing::debug!(ticks = n, "gameplay stopped");
    }
}

fn translation(p: DVec3) -> [f32; 16] {
    Mat4::from_translation(p.as_vec3()).to_cols_array()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wrapworld_mem::MemoryConfig;
    use wrapworld_render::{RecordingBackend, RenderConfig};
    use wrapworld_stream::RelevanceConfig;

    fn small_config() -> EngineConfig {
        EngineConfig {
            memory: MemoryConfig {
                max_pages: 256,
                min_free_delay_ms: 5,
                max_free_delay_ms: 20,
                ..MemoryConfig::default()
            },
            relevance: RelevanceConfig {
                geometry: WorldGeometry::new(1.0, 16),
                relevance_radius_cells: 4.0,
            },
            render: RenderConfig {
                visibility_radius: 4.0,
                worker_threads: 1,
                object_list_capacity: 64,
                report_interval: 10,
            },
        }
    }

    #[test]
    fn short_run_draws_and_frees() {
        let sim = Simulation::new(&small_config()).unwrap();
        let params = SimulationParams {
            frames: 30,
            objects: 40,
            tick: Duration::from_millis(1),
            frame_interval: Duration::from_millis(2),
            speed_cells: 0.5,
        };
        let mut backend = RecordingBackend::new();
        let mut sink = CountingSink::default();
        let mut after = 0;
        let report = sim.run(&params, &mut backend, &mut sink, |_| after += 1).unwrap();
        assert_eq!(report.frames, 30);
        assert_eq!(after, 30);
        assert!(report.swaps > 0);
        assert!(report.max_visible > 0);
        assert!(!backend.calls().is_empty());
        assert_eq!(sink.pages, report.pages_uploaded);
        assert_eq!(report.pages_failed, 0);
    }
}
