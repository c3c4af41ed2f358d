//! Deterministic synthetic baked worlds for tooling, tests and benches.

use glam::{Quat, Vec3, Vec4};
use serde::{Deserialize, Serialize};
use worldspace_common::{Aabb, Grid, GridCoord, GridLevel};

use crate::config::{BatchGroupConfig, BlockConfig, ChunkConfig, LodConfig, UNBOUNDED_DISTANCE, WorldManifest};
use crate::lightmap::{LightmapLayout, LightmapTier};
use crate::paths::AssetPath;
use crate::AssetError;

/// Parameters of a generated world. Every chunk gets terrain light-maps and
/// the first `blocks_per_chunk` of its blocks get object content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticWorld {
    pub name: String,
    pub chunks: Vec<GridCoord>,
    pub blocks_per_chunk: usize,
    pub groups_per_block: u32,
    pub instances_per_group: usize,
    /// Bytes per generated texture layer.
    pub texture_bytes: usize,
    pub seed: u64,
}

impl Default for SyntheticWorld {
    fn default() -> Self {
        Self {
            name: "synthetic".into(),
            chunks: vec![GridCoord::new(50, 50)],
            blocks_per_chunk: 4,
            groups_per_block: 2,
            instances_per_group: 64,
            texture_bytes: 64,
            seed: 1,
        }
    }
}

/// Light-maps per tier in every generated block.
const BLOCK_LIGHTMAPS: LightmapLayout = LightmapLayout {
    hq_count: 2,
    mq_count: 1,
    lq_count: 1,
};

impl SyntheticWorld {
    /// Encode every asset of the world.
    pub fn assets(&self, grid: &Grid) -> Result<Vec<(AssetPath, Vec<u8>)>, AssetError> {
        let mut out = Vec::new();
        let world = self.name.as_str();
        let manifest = WorldManifest {
            chunk_indices: self.chunks.iter().map(|c| grid.index(*c)).collect(),
        };
        push_config(&mut out, AssetPath::world_manifest(world), &manifest)?;

        let per_chunk = grid.subdivisions(GridLevel::Chunk, GridLevel::Block);
        for &chunk in &self.chunks {
            let blocks: Vec<GridCoord> = (0..per_chunk * per_chunk)
                .take(self.blocks_per_chunk)
                .map(|i| GridCoord::new(chunk.x * per_chunk + i % per_chunk, chunk.z * per_chunk + i / per_chunk))
                .collect();
            let chunk_config = ChunkConfig {
                block_indices: blocks.iter().map(|b| grid.index(*b)).collect(),
            };
            push_config(
                &mut out,
                AssetPath::partition_config(world, GridLevel::Chunk, chunk),
                &chunk_config,
            )?;
            for block in blocks {
                self.block_assets(grid, block, &mut out)?;
            }
            self.terrain_assets(grid, chunk, &mut out);
        }
        Ok(out)
    }

    fn block_assets(&self, grid: &Grid, block: GridCoord, out: &mut Vec<(AssetPath, Vec<u8>)>) -> Result<(), AssetError> {
        let world = self.name.as_str();
        let config = BlockConfig {
            batch_group_count: self.groups_per_block,
            hq_lightmap_count: BLOCK_LIGHTMAPS.hq_count,
            mq_lightmap_count: BLOCK_LIGHTMAPS.mq_count,
            lq_lightmap_count: BLOCK_LIGHTMAPS.lq_count,
        };
        push_config(out, AssetPath::partition_config(world, GridLevel::Block, block), &config)?;
        for tier in LightmapTier::ALL {
            for local in 0..BLOCK_LIGHTMAPS.count(tier) {
                out.push((
                    AssetPath::object_lightmap(world, GridLevel::Block, block, tier, local),
                    self.texture(grid.index(block) as u64 ^ local as u64),
                ));
            }
        }
        for index in 0..self.groups_per_block {
            let group = self.batch_group(grid, block, index);
            push_config(
                out,
                AssetPath::batch_group_config(world, GridLevel::Block, block, index),
                &group,
            )?;
        }
        Ok(())
    }

    fn batch_group(&self, grid: &Grid, block: GridCoord, index: u32) -> BatchGroupConfig {
        let count = self.instances_per_group;
        let origin = grid.cell_origin(GridLevel::Block, block);
        let size = grid.cell_size(GridLevel::Block);
        let mut rng = Lcg::new(self.seed ^ ((grid.index(block) as u64) << 8) ^ index as u64);
        let lod = |i: usize, min: f32, max: f32| LodConfig {
            mesh: format!("mesh_{index}_lod{i}"),
            material: format!("material_{index}"),
            lod_min_distance: min,
            lod_max_distance: max,
        };
        let mut config = BatchGroupConfig {
            lods: vec![lod(0, 0.0, 30.0), lod(1, 30.0, 60.0), lod(2, 60.0, UNBOUNDED_DISTANCE)],
            count,
            ..BatchGroupConfig::default()
        };
        for _ in 0..count {
            let position = Vec3::new(origin.x + rng.next_f32() * size, 0.0, origin.y + rng.next_f32() * size);
            let scale = 0.5 + rng.next_f32();
            config.positions.push(position);
            config.rotations.push(Quat::from_rotation_y(rng.next_f32() * std::f32::consts::TAU));
            config.scales.push(Vec3::splat(scale));
            config.bounds.push(Aabb::new(position + Vec3::Y * scale, Vec3::splat(scale)));
            for tier in LightmapTier::ALL {
                let range = BLOCK_LIGHTMAPS.layers(tier);
                let layer = range.start + (rng.next_u64() % (range.end - range.start) as u64) as u32;
                let tile = Vec4::new(0.125, 0.125, rng.next_f32() * 0.875, rng.next_f32() * 0.875);
                match tier {
                    LightmapTier::High => {
                        config.hq_lightmap_indices.push(layer);
                        config.hq_lightmap_scale_offsets.push(tile);
                    }
                    LightmapTier::Medium => {
                        config.mq_lightmap_indices.push(layer);
                        config.mq_lightmap_scale_offsets.push(tile);
                    }
                    LightmapTier::Low => {
                        config.lq_lightmap_indices.push(layer);
                        config.lq_lightmap_scale_offsets.push(tile);
                    }
                }
            }
        }
        config
    }

    fn terrain_assets(&self, grid: &Grid, chunk: GridCoord, out: &mut Vec<(AssetPath, Vec<u8>)>) {
        let world = self.name.as_str();
        let seed = grid.index(chunk) as u64;
        out.push((
            AssetPath::terrain_lightmap(world, chunk, LightmapTier::Low, None),
            self.texture(seed),
        ));
        for (tier, level) in [(LightmapTier::Medium, GridLevel::Block), (LightmapTier::High, GridLevel::Step)] {
            let n = grid.subdivisions(GridLevel::Chunk, level);
            for z in 0..n {
                for x in 0..n {
                    let cell = GridCoord::new(chunk.x * n + x, chunk.z * n + z);
                    out.push((
                        AssetPath::terrain_lightmap(world, chunk, tier, Some(cell)),
                        self.texture(seed ^ grid.index(cell) as u64),
                    ));
                }
            }
        }
    }

    fn texture(&self, salt: u64) -> Vec<u8> {
        let mut rng = Lcg::new(self.seed ^ salt);
        (0..self.texture_bytes).map(|_| (rng.next_u64() >> 56) as u8).collect()
    }
}

fn push_config<T: Serialize>(out: &mut Vec<(AssetPath, Vec<u8>)>, path: AssetPath, value: &T) -> Result<(), AssetError> {
    let bytes = serde_json::to_vec(value).map_err(|e| AssetError::Json {
        path: path.to_string(),
        source: e,
    })?;
    out.push((path, bytes));
    Ok(())
}

/// Knuth MMIX linear congruential generator.
struct Lcg(u64);

impl Lcg {
    fn new(seed: u64) -> Self {
        Self(seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1)
    }

    fn next_u64(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        self.0
    }

    /// Uniform in `[0, 1)`.
    fn next_f32(&mut self) -> f32 {
        (self.next_u64() >> 40) as f32 / (1u64 << 24) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{AssetSource, MemorySource, load_config};

    fn memory(world: &SyntheticWorld) -> MemorySource {
        let source = MemorySource::new();
        for (path, bytes) in world.assets(&Grid::default()).unwrap() {
            source.insert_bytes(&path, bytes);
        }
        source
    }

    #[test]
    fn generated_groups_validate() {
        let world = SyntheticWorld::default();
        let source = memory(&world);
        let grid = Grid::default();
        let chunk = world.chunks[0];
        let chunk_config: ChunkConfig =
            load_config(&source, &AssetPath::partition_config("synthetic", GridLevel::Chunk, chunk)).unwrap();
        assert_eq!(chunk_config.block_indices.len(), 4);

        for &index in &chunk_config.block_indices {
            let block = grid.coord_from_index(index);
            let origin = grid.cell_origin(GridLevel::Block, block);
            let pos = Vec3::new(origin.x, 0.0, origin.y);
            assert_eq!(grid.position_to_cell(GridLevel::Chunk, pos), chunk);
            let block_config: BlockConfig =
                load_config(&source, &AssetPath::partition_config("synthetic", GridLevel::Block, block)).unwrap();
            for i in 0..block_config.batch_group_count {
                let group: BatchGroupConfig =
                    load_config(&source, &AssetPath::batch_group_config("synthetic", GridLevel::Block, block, i))
                        .unwrap();
                group.validate(&block_config.lightmap_layout()).unwrap();
                assert_eq!(group.count, 64);
            }
        }
    }

    #[test]
    fn generation_is_deterministic() {
        let world = SyntheticWorld::default();
        let grid = Grid::default();
        assert_eq!(world.assets(&grid).unwrap(), world.assets(&grid).unwrap());
    }

    #[test]
    fn terrain_lightmaps_cover_every_cell() {
        let world = SyntheticWorld {
            blocks_per_chunk: 0,
            ..SyntheticWorld::default()
        };
        let source = memory(&world);
        let chunk = GridCoord::new(50, 50);
        assert!(source.exists(&AssetPath::terrain_lightmap("synthetic", chunk, LightmapTier::Low, None)));
        assert!(source.exists(&AssetPath::terrain_lightmap(
            "synthetic",
            chunk,
            LightmapTier::High,
            Some(GridCoord::new(50 * 16 + 15, 50 * 16 + 15)),
        )));
        assert!(source.exists(&AssetPath::terrain_lightmap(
            "synthetic",
            chunk,
            LightmapTier::Medium,
            Some(GridCoord::new(200, 203)),
        )));
        // manifest + chunk config + low + 16 medium + 256 high
        assert_eq!(source.len(), 2 + 1 + 16 + 256);
    }
}
