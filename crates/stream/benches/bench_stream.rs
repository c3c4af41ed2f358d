use std::hint::black_box;
use std::time::Instant;

use glam::Vec3;
use worldspace_assets::{MemorySource, SyntheticWorld, WorldManifest};
use worldspace_common::{Grid, GridCoord};
use worldspace_render::HeadlessDevice;
use worldspace_stream::{StreamConfig, StreamManager};
use worldspace_terrain::{TerrainConfig, TerrainManager};

fn make_source(side: i32, instances_per_group: usize) -> (MemorySource, WorldManifest) {
    let grid = Grid::default();
    let chunks: Vec<GridCoord> = (0..side * side)
        .map(|i| GridCoord::new(48 + i % side, 48 + i / side))
        .collect();
    let world = SyntheticWorld {
        chunks,
        instances_per_group,
        ..SyntheticWorld::default()
    };
    let source = MemorySource::new();
    for (path, bytes) in world.assets(&grid).expect("synthetic world") {
        source.insert_bytes(&path, bytes);
    }
    let manifest = WorldManifest {
        chunk_indices: world.chunks.iter().map(|c| grid.index(*c)).collect(),
    };
    (source, manifest)
}

fn bench_stream_walk(side: i32, instances_per_group: usize, iterations: usize) {
    let (source, manifest) = make_source(side, instances_per_group);
    let mut device = HeadlessDevice::default();
    let mut terrain = TerrainManager::new(TerrainConfig::default(), Grid::default(), "synthetic", &mut device)
        .expect("terrain manager");
    let config = StreamConfig {
        load_budget: 2,
        unload_budget: 2,
        ..StreamConfig::default()
    };
    let mut manager = StreamManager::new(config, Grid::default(), "synthetic", &manifest, 480).expect("manager");

    let span = side as f32 * 1024.0;
    let start = Instant::now();
    for i in 0..iterations {
        // Walk the viewer back and forth across the generated chunks.
        let t = (i as f32 / iterations as f32 * 2.0 - 1.0).abs();
        let viewer = Vec3::new(-2048.0 + t * span, 0.0, -2048.0 + span * 0.5);
        let _ = black_box(manager.update(black_box(viewer), &source, &mut terrain, &mut device));
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!(
        "  stream walk ({side}x{side} chunks, {instances_per_group} per group, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}"
    );

    manager
        .unload_all(&mut terrain, &mut device)
        .expect("unload");
    terrain.release(&mut device);
}

fn main() {
    println!("=== Stream Benchmarks ===\n");

    println!("Stream update (budgeted load/unload):");
    bench_stream_walk(3, 64, 200);
    bench_stream_walk(5, 64, 200);
    bench_stream_walk(5, 512, 100);

    println!("\n=== Done ===");
}
