use std::hint::black_box;
use std::time::Instant;

use wrapworld_mem::{
    FieldKind, FreeingService, MemoryConfig, MemoryWindow, PageArena, PageSink, Schema, UploadError,
};

struct NullSink;

impl PageSink for NullSink {
    fn upload(&mut self, _page: usize, _offset: usize, bytes: &[u8]) -> Result<(), UploadError> {
        black_box(bytes);
        Ok(())
    }
}

fn particle_schema() -> Schema {
    Schema::builder()
        .field("object_id", FieldKind::Int)
        .field("flags", FieldKind::Byte)
        .field("verts", FieldKind::Vec4Array(3))
        .build()
        .expect("non-empty schema")
}

fn setup() -> (std::sync::Arc<PageArena>, FreeingService, MemoryConfig) {
    let config = MemoryConfig::default();
    let arena = PageArena::new(&config).expect("arena");
    let service = FreeingService::start().expect("freeing thread");
    (arena, service, config)
}

fn bench_create_free(count: usize, iterations: usize) {
    let (arena, service, config) = setup();
    let window = MemoryWindow::new("bench", particle_schema(), &arena, &service, &config).expect("window");

    let start = Instant::now();
    for _ in 0..iterations {
        let ids = window.create_many(black_box(count));
        window.free_many(ids);
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!(
        "  create+free ({count} records, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}, pages {}",
        window.num_pages()
    );
}

fn bench_field_writes(count: usize, iterations: usize) {
    let (arena, service, config) = setup();
    let window = MemoryWindow::new("bench", particle_schema(), &arena, &service, &config).expect("window");
    let ids = window.create_many(count);
    let verts = window.variable("verts").expect("verts field");

    let start = Instant::now();
    for i in 0..iterations {
        for &id in &ids {
            verts.set_element(id, i % 12, black_box(i as f32));
        }
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!("  field writes ({count} records, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}");
}

fn bench_flush(count: usize, touched_every: usize, iterations: usize) {
    let (arena, service, config) = setup();
    let window = MemoryWindow::new("bench", particle_schema(), &arena, &service, &config).expect("window");
    let ids = window.create_many(count);
    let object_id = window.variable("object_id").expect("object_id field");
    let mut sink = NullSink;

    let start = Instant::now();
    let mut uploaded = 0;
    for _ in 0..iterations {
        for &id in ids.iter().step_by(touched_every) {
            object_id.set(id, id as i32);
        }
        uploaded += arena.flush_stale_pages(&mut sink).pages_uploaded;
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!(
        "  flush ({count} records, every {touched_every}th touched, {iterations} iters): {per_iter:?}/iter, {} pages/iter",
        uploaded / iterations
    );
}

fn main() {
    println!("=== Memory Window Benchmarks ===\n");

    println!("Create/free:");
    bench_create_free(100, 1000);
    bench_create_free(10_000, 10);

    println!("\nField writes:");
    bench_field_writes(1000, 100);
    bench_field_writes(10_000, 10);

    println!("\nStale page flush:");
    bench_flush(10_000, 1, 100);
    bench_flush(10_000, 50, 100);
    bench_flush(10_000, 1000, 100);

    println!("\n=== Done ===");
}
