mod config;
mod sim;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;
use wrapworld_gpu::{GpuContext, GpuPageMirror, IndirectDrawBackend};
use wrapworld_mem::{FreeingService, MatrixTable, MemoryWindow, ObjectListTable, PageArena};
use wrapworld_render::RecordingBackend;

use crate::config::EngineConfig;
use crate::sim::{CountingSink, Simulation, SimulationParams};

#[derive(Parser)]
#[command(name = "wrapworld-cli", about = "CLI for the wrapworld paging and visibility core")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Engine configuration (JSON); defaults are used for anything missing
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print crate info and the effective configuration
    Info,
    /// Drive grids, relevance, render lists and paging end to end
    Simulate {
        /// Number of frames to submit
        #[arg(short, long, default_value = "240")]
        frames: u64,
        /// Number of moving objects
        #[arg(short, long, default_value = "2000")]
        objects: usize,
        /// Gameplay tick period in milliseconds
        #[arg(long, default_value = "16")]
        tick_ms: u64,
        /// Pause between frames in milliseconds
        #[arg(long, default_value = "4")]
        frame_ms: u64,
        /// Observer speed in cells per frame
        #[arg(long, default_value = "0.25")]
        speed: f64,
        /// Override the render worker count
        #[arg(long)]
        workers: Option<usize>,
        /// Upload pages and draws through a headless wgpu device
        #[arg(long)]
        gpu: bool,
    },
    /// Print a window's record layout and page map
    Layout {
        #[arg(value_enum, default_value = "matrices")]
        window: WindowKind,
        /// Records to create before printing
        #[arg(short, long, default_value = "64")]
        records: usize,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum WindowKind {
    Matrices,
    ObjectLists,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let mut config = EngineConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Info => {
            println!("wrapworld-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("common: {}", wrapworld_common::crate_info());
            println!("mem: {}", wrapworld_mem::crate_info());
            println!("stream: {}", wrapworld_stream::crate_info());
            println!("render: {}", wrapworld_render::crate_info());
            println!("gpu: {}", wrapworld_gpu::crate_info());
            println!(
                "world: {} cells of {} units per edge, arena {} pages x {} bytes",
                config.relevance.geometry.world_width_cells,
                config.relevance.geometry.cell_size,
                config.memory.max_pages,
                config.memory.page_size_bytes
            );
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Simulate {
            frames,
            objects,
            tick_ms,
            frame_ms,
            speed,
            workers,
            gpu,
        } => {
            if let Some(workers) = workers {
                config.render.worker_threads = workers;
            }
            let params = SimulationParams {
                frames,
                objects,
                tick: Duration::from_millis(tick_ms),
                frame_interval: Duration::from_millis(frame_ms),
                speed_cells: speed,
            };
            println!("Simulating {objects} objects for {frames} frames");
            let sim = Simulation::new(&config)?;
            let report = if gpu {
                let context = GpuContext::headless()?;
                println!("adapter: {}", context.adapter_name());
                let mirror = GpuPageMirror::new(&context.device, sim.arena())?;
                let mut sink = mirror.sink(&context.queue);
                let mut backend = IndirectDrawBackend::new(&context.device, 4);
                let queue = &context.queue;
                sim.run(&params, &mut backend, &mut sink, |b| {
                    b.submit(queue);
                    queue.submit([]);
                })?
            } else {
                let mut backend = RecordingBackend::new();
                let mut sink = CountingSink::default();
                let report = sim.run(&params, &mut backend, &mut sink, |_| {})?;
                println!("backend: {}", backend.summary());
                println!("uploaded: {} pages, {} bytes", sink.pages, sink.bytes);
                report
            };
            println!("{report}");
        }
        Commands::Layout { window, records } => {
            let arena = PageArena::new(&config.memory)?;
            let freeing = FreeingService::start()?;
            let window = match window {
                WindowKind::Matrices => MatrixTable::new(&arena, &freeing, &config.memory)?.window().clone(),
                WindowKind::ObjectLists => {
                    ObjectListTable::new(config.render.object_list_capacity, &arena, &freeing, &config.memory)?
                        .window()
                        .clone()
                }
            };
            let created = window.try_create_many(records)?;
            print_layout(&window);
            if let (Some(first), Some(last)) = (created.first(), created.last()) {
                println!(
                    "record {first} at {:#x}, record {last} at {:#x}",
                    window.physical_address(*first),
                    window.physical_address(*last)
                );
            }
        }
    }

    Ok(())
}

fn print_layout(window: &MemoryWindow) {
    println!(
        "window '{}': {} bytes per record, {} records per page, capacity {}",
        window.name(),
        window.object_size(),
        window.objects_per_page(),
        window.capacity()
    );
    for field in window.schema().fields() {
        println!("  {:>6}  {:<10} {:?}", field.offset, field.name, field.kind);
    }
    println!("pages: {}", window.num_pages());
    for entry in window.page_map() {
        println!(
            "  logical {:>4} -> physical {:>5} @ {:#x}",
            entry.logical_page, entry.physical_page, entry.physical_offset
        );
    }
}
