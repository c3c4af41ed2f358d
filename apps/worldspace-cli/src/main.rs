use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use glam::Vec3;
use tracing_subscriber::EnvFilter;
use worldspace_assets::{
    AssetPath, AssetSource, BatchGroupConfig, BlockConfig, ChunkConfig, DirectorySource, LightmapTier,
    SyntheticWorld, WorldManifest, load_config,
};
use worldspace_common::{Grid, GridCoord, GridLevel};
use worldspace_kernel::{WorldRenderConfig, WorldRenderContext};
use worldspace_render::{FrameArena, HeadlessDevice};

#[derive(Parser)]
#[command(name = "worldspace-cli", about = "CLI tool for worldspace operations")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print engine version and crate info
    Info,
    /// Write a synthetic baked world
    Generate {
        /// Asset root directory
        #[arg(short, long)]
        out: PathBuf,
        #[arg(short, long, default_value = "synthetic")]
        world: String,
        /// Chunks per side, centered on the world origin
        #[arg(long, default_value = "3")]
        chunks: i32,
        #[arg(long, default_value = "4")]
        blocks_per_chunk: usize,
        #[arg(long, default_value = "2")]
        groups_per_block: u32,
        #[arg(long, default_value = "256")]
        instances: usize,
        #[arg(long, default_value = "1")]
        seed: u64,
    },
    /// Load and validate every asset of a baked world
    Validate {
        /// Asset root directory
        #[arg(short, long)]
        root: PathBuf,
        #[arg(short, long, default_value = "synthetic")]
        world: String,
    },
    /// Stream and cull a world along a straight path with a headless device
    Simulate {
        /// Asset root directory
        #[arg(short, long)]
        root: PathBuf,
        /// World config JSON; defaults are used when absent
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(short, long)]
        world: Option<String>,
        #[arg(short, long, default_value = "600")]
        frames: usize,
        /// World units moved per frame along +X
        #[arg(long, default_value = "4.0")]
        speed: f32,
        /// Start position as x,z
        #[arg(long, default_value = "-1024,512", value_parser = parse_xz)]
        start: (f32, f32),
    },
}

fn parse_xz(s: &str) -> Result<(f32, f32), String> {
    let (x, z) = s.split_once(',').ok_or("expected x,z")?;
    let x = x.trim().parse().map_err(|e| format!("bad x: {e}"))?;
    let z = z.trim().parse().map_err(|e| format!("bad z: {e}"))?;
    Ok((x, z))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Info => {
            println!("worldspace-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("common: {}", worldspace_common::crate_info());
            println!("assets: {}", worldspace_assets::crate_info());
            println!("render: {}", worldspace_render::crate_info());
            println!("terrain: {}", worldspace_terrain::crate_info());
            println!("stream: {}", worldspace_stream::crate_info());
            println!("kernel: {}", worldspace_kernel::crate_info());
        }
        Commands::Generate {
            out,
            world,
            chunks,
            blocks_per_chunk,
            groups_per_block,
            instances,
            seed,
        } => generate(&out, world, chunks, blocks_per_chunk, groups_per_block, instances, seed)?,
        Commands::Validate { root, world } => validate(&root, &world)?,
        Commands::Simulate {
            root,
            config,
            world,
            frames,
            speed,
            start,
        } => simulate(&root, config.as_deref(), world, frames, speed, start)?,
    }

    Ok(())
}

fn generate(
    out: &Path,
    world: String,
    side: i32,
    blocks_per_chunk: usize,
    groups_per_block: u32,
    instances: usize,
    seed: u64,
) -> anyhow::Result<()> {
    if side <= 0 {
        bail!("--chunks must be positive");
    }
    let grid = Grid::default();
    let origin = grid.position_to_cell(GridLevel::Chunk, Vec3::ZERO);
    let first = origin.x - side / 2;
    let chunks = (0..side * side)
        .map(|i| GridCoord::new(first + i % side, first + i / side))
        .collect();
    let synthetic = SyntheticWorld {
        name: world.clone(),
        chunks,
        blocks_per_chunk,
        groups_per_block,
        instances_per_group: instances,
        seed,
        ..SyntheticWorld::default()
    };
    let source = DirectorySource::new(out);
    let assets = synthetic.assets(&grid)?;
    for (path, bytes) in &assets {
        source.write_bytes(path, bytes)?;
    }
    let config = WorldRenderConfig {
        world_name: world.clone(),
        ..WorldRenderConfig::default()
    };
    let config_path = out.join(format!("{world}.json"));
    config.save(&config_path)?;
    println!(
        "Generated world '{world}': {} chunks, {} assets, config {}",
        side * side,
        assets.len(),
        config_path.display()
    );
    Ok(())
}

#[derive(Debug, Default)]
struct Report {
    chunks: usize,
    blocks: usize,
    groups: usize,
    instances: usize,
    errors: Vec<String>,
}

impl Report {
    fn check<T>(&mut self, what: &str, result: Result<T, impl std::fmt::Display>) -> Option<T> {
        match result {
            Ok(v) => Some(v),
            Err(e) => {
                self.errors.push(format!("{what}: {e}"));
                None
            }
        }
    }
}

fn validate(root: &Path, world: &str) -> anyhow::Result<()> {
    let grid = Grid::default();
    let source = DirectorySource::new(root);
    let manifest: WorldManifest = load_config(&source, &AssetPath::world_manifest(world))
        .with_context(|| format!("loading manifest of '{world}'"))?;

    let mut report = Report::default();
    for &chunk_index in &manifest.chunk_indices {
        let chunk = grid.coord_from_index(chunk_index);
        report.chunks += 1;
        let low = AssetPath::terrain_lightmap(world, chunk, LightmapTier::Low, None);
        if !source.exists(&low) {
            report.errors.push(format!("missing {low}"));
        }
        let path = AssetPath::partition_config(world, GridLevel::Chunk, chunk);
        let Some(chunk_config) = report.check(path.as_str(), load_config::<ChunkConfig>(&source, &path)) else {
            continue;
        };
        for &block_index in &chunk_config.block_indices {
            let block = grid.coord_from_index(block_index);
            report.blocks += 1;
            validate_block(&source, world, block, &mut report);
        }
    }

    println!(
        "World '{world}': {} chunks, {} blocks, {} batch groups, {} instances",
        report.chunks, report.blocks, report.groups, report.instances
    );
    if report.errors.is_empty() {
        println!("All assets valid");
        return Ok(());
    }
    for error in &report.errors {
        println!("  error: {error}");
    }
    bail!("{} invalid assets", report.errors.len())
}

fn validate_block(source: &DirectorySource, world: &str, block: GridCoord, report: &mut Report) {
    let path = AssetPath::partition_config(world, GridLevel::Block, block);
    let Some(config) = report.check(path.as_str(), load_config::<BlockConfig>(source, &path)) else {
        return;
    };
    let layout = config.lightmap_layout();
    for tier in LightmapTier::ALL {
        for local in 0..layout.count(tier) {
            let texture = AssetPath::object_lightmap(world, GridLevel::Block, block, tier, local);
            if !source.exists(&texture) {
                report.errors.push(format!("missing {texture}"));
            }
        }
    }
    for index in 0..config.batch_group_count {
        let path = AssetPath::batch_group_config(world, GridLevel::Block, block, index);
        let Some(group) = report.check(path.as_str(), load_config::<BatchGroupConfig>(source, &path)) else {
            continue;
        };
        if report.check(path.as_str(), group.validate(&layout)).is_some() {
            report.groups += 1;
            report.instances += group.count;
        }
    }
}

fn simulate(
    root: &Path,
    config_path: Option<&Path>,
    world: Option<String>,
    frames: usize,
    speed: f32,
    start: (f32, f32),
) -> anyhow::Result<()> {
    let mut config = match config_path {
        Some(path) => WorldRenderConfig::load(path)?,
        None => WorldRenderConfig::default(),
    };
    if let Some(world) = world {
        config.world_name = world;
    }

    let source = DirectorySource::new(root);
    let mut ctx = WorldRenderContext::new(config, HeadlessDevice::default(), source)?;
    ctx.on_initialized(|summary| {
        tracing::info!(
            world = %summary.world,
            chunks = summary.manifest_chunks,
            sub_batch_capacity = summary.sub_batch_capacity,
            "world initialized"
        );
    });
    ctx.initialize()?;

    let mut arena = FrameArena::new();
    let mut total_visible = 0usize;
    let mut peak_resident = 0usize;
    let report_every = (frames / 10).max(1);
    for frame in 0..frames {
        let viewer = Vec3::new(start.0 + frame as f32 * speed, 1.8, start.1);
        ctx.set_cull_center(viewer);
        arena.reset();
        let output = ctx.frame(&[], &arena)?;
        total_visible += output.objects.total_visible();
        let stats = ctx.stats();
        peak_resident = peak_resident.max(stats.resident_partitions);
        if frame % report_every == 0 {
            println!(
                "frame {frame:>5} x={:>8.1}: resident={} draws={} visible={} terrain_nodes={} lightmap_uploads={} cull={:?}",
                viewer.x,
                stats.resident_partitions,
                stats.draws_submitted,
                stats.visible_instances,
                stats.terrain_nodes,
                stats.lightmap_uploads,
                stats.cull_time
            );
        }
    }

    let timer = ctx.cull_timer();
    println!(
        "Simulated {frames} frames: avg visible {:.1}, peak resident chunks {peak_resident}",
        total_visible as f64 / frames.max(1) as f64
    );
    println!(
        "Cull time: avg {:?}, min {:?}, max {:?}, over {:?} budget {} of last {} frames",
        timer.average(),
        timer.min(),
        timer.max(),
        timer.budget(),
        timer.over_budget(),
        timer.count()
    );

    let device = ctx.shutdown()?;
    let live = device.live_resources();
    if !live.is_empty() {
        bail!("resources leaked after shutdown: {live:?}");
    }
    println!("Shutdown clean: all GPU resources released");
    Ok(())
}
