use std::collections::{BTreeMap, HashSet};
use std::time::{Duration, Instant};

use glam::Vec3;
use worldspace_assets::{AssetSource, WorldManifest};
use worldspace_common::{Grid, GridCoord, GridLevel};
use worldspace_render::{BatchGroup, GpuDevice};
use worldspace_terrain::TerrainManager;

use crate::StreamConfig;
use crate::StreamError;
use crate::partition::{Chunk, LoadContext, PartitionState};

/// Per-frame streaming statistics for instrumentation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamStats {
    pub chunks_loaded_this_frame: usize,
    pub chunks_unloaded_this_frame: usize,
    pub chunks_failed_this_frame: usize,
    pub resident_chunks: usize,
    pub frame_time: Duration,
}

/// Keeps the chunks around the viewer resident, within per-frame budgets.
///
/// Chunks absent from the world manifest are never requested. A chunk whose
/// load fails stays `Unloaded` and is not retried until it has left coverage.
#[derive(Debug)]
pub struct StreamManager {
    config: StreamConfig,
    grid: Grid,
    world: String,
    max_per_sub_batch: usize,
    manifest: HashSet<i32>,
    chunks: BTreeMap<i32, Chunk>,
    failed: HashSet<i32>,
    next_group_id: u32,
    stats: StreamStats,
}

impl StreamManager {
    pub fn new(
        config: StreamConfig,
        grid: Grid,
        world: impl Into<String>,
        manifest: &WorldManifest,
        max_per_sub_batch: usize,
    ) -> Result<Self, StreamError> {
        config.validate()?;
        if max_per_sub_batch == 0 {
            return Err(StreamError::InvalidConfig("sub-batch capacity is zero".into()));
        }
        Ok(Self {
            config,
            grid,
            world: world.into(),
            max_per_sub_batch,
            manifest: manifest.chunk_indices.iter().copied().collect(),
            chunks: BTreeMap::new(),
            failed: HashSet::new(),
            next_group_id: 0,
            stats: StreamStats::default(),
        })
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Chunks the viewer at `viewer` wants resident, row by row.
    pub fn coverage(&self, viewer: Vec3) -> Vec<GridCoord> {
        let center = self.grid.position_to_cell(GridLevel::Chunk, viewer);
        self.grid
            .cells_in_radius(GridLevel::Chunk, center, self.config.coverage_radius)
            .into_iter()
            .filter(|c| self.manifest.contains(&self.grid.index(*c)))
            .collect()
    }

    /// Bring coverage around `viewer` up to date. Returns the chunks loaded and
    /// unloaded this frame. Unloads run before loads.
    pub fn update(
        &mut self,
        viewer: Vec3,
        source: &dyn AssetSource,
        terrain: &mut TerrainManager,
        device: &mut dyn GpuDevice,
    ) -> (Vec<GridCoord>, Vec<GridCoord>) {
        let _span = tracing::info_span!("stream_update").entered();
        let frame_start = Instant::now();

        let desired = self.coverage(viewer);
        let desired_keys: HashSet<i32> = desired.iter().map(|c| self.grid.index(*c)).collect();
        self.failed.retain(|k| desired_keys.contains(k));

        let to_unload: Vec<GridCoord> = self
            .chunks
            .iter()
            .filter(|(k, _)| !desired_keys.contains(*k))
            .take(self.config.unload_budget)
            .map(|(_, c)| c.coord())
            .collect();

        let mut unloaded = Vec::with_capacity(to_unload.len());
        for coord in to_unload {
            match self.unload_chunk(coord, terrain, device) {
                Ok(()) => unloaded.push(coord),
                Err(e) => tracing::warn!(?coord, error = %e, "chunk unload failed"),
            }
        }

        let to_load: Vec<GridCoord> = desired
            .into_iter()
            .filter(|c| {
                let key = self.grid.index(*c);
                !self.chunks.contains_key(&key) && !self.failed.contains(&key)
            })
            .take(self.config.load_budget)
            .collect();

        let mut loaded = Vec::with_capacity(to_load.len());
        let mut failed = 0;
        for coord in to_load {
            match self.load_chunk(coord, source, terrain, device) {
                Ok(()) => loaded.push(coord),
                Err(e) => {
                    tracing::warn!(?coord, error = %e, "chunk load failed");
                    self.failed.insert(self.grid.index(coord));
                    failed += 1;
                }
            }
        }

        self.stats = StreamStats {
            chunks_loaded_this_frame: loaded.len(),
            chunks_unloaded_this_frame: unloaded.len(),
            chunks_failed_this_frame: failed,
            resident_chunks: self.chunks.len(),
            frame_time: frame_start.elapsed(),
        };

        tracing::trace!(
            loaded = loaded.len(),
            unloaded = unloaded.len(),
            failed,
            total = self.chunks.len(),
            "stream update complete"
        );

        (loaded, unloaded)
    }

    /// Load one chunk and its terrain. Loading a resident chunk is an error.
    pub fn load_chunk(
        &mut self,
        coord: GridCoord,
        source: &dyn AssetSource,
        terrain: &mut TerrainManager,
        device: &mut dyn GpuDevice,
    ) -> Result<(), StreamError> {
        let key = self.grid.index(coord);
        if self.chunks.contains_key(&key) {
            tracing::error!(?coord, "chunk is already resident");
            return Err(StreamError::AlreadyResident(coord));
        }
        let ctx = LoadContext {
            grid: &self.grid,
            world: &self.world,
            source,
            max_per_sub_batch: self.max_per_sub_batch,
            lightmap_texture_size: self.config.lightmap_texture_size,
        };
        let mut chunk = Chunk::new(coord);
        chunk.load(&ctx, &mut self.next_group_id, device)?;
        if let Err(e) = terrain.add_chunk(coord, source, device) {
            chunk.unload(device)?;
            return Err(e.into());
        }
        tracing::debug!(?coord, blocks = chunk.blocks().len(), "chunk resident");
        self.chunks.insert(key, chunk);
        Ok(())
    }

    /// Release one chunk and its terrain. The terrain is released even when
    /// the chunk reports an error.
    pub fn unload_chunk(
        &mut self,
        coord: GridCoord,
        terrain: &mut TerrainManager,
        device: &mut dyn GpuDevice,
    ) -> Result<(), StreamError> {
        let mut chunk = self
            .chunks
            .remove(&self.grid.index(coord))
            .ok_or(StreamError::NotResident(coord))?;
        let unloaded = chunk.unload(device);
        if !terrain.remove_chunk(coord, device) {
            tracing::warn!(?coord, "resident chunk had no terrain");
        }
        unloaded?;
        tracing::debug!(?coord, "chunk unloaded");
        Ok(())
    }

    /// Unload every resident chunk. Returns the first error after trying all.
    pub fn unload_all(&mut self, terrain: &mut TerrainManager, device: &mut dyn GpuDevice) -> Result<(), StreamError> {
        let coords: Vec<GridCoord> = self.chunks.values().map(Chunk::coord).collect();
        let mut first_error = None;
        for coord in coords {
            if let Err(e) = self.unload_chunk(coord, terrain, device) {
                tracing::warn!(?coord, error = %e, "chunk unload failed");
                first_error.get_or_insert(e);
            }
        }
        self.failed.clear();
        first_error.map_or(Ok(()), Err)
    }

    pub fn state(&self, coord: GridCoord) -> PartitionState {
        self.chunks
            .get(&self.grid.index(coord))
            .map_or(PartitionState::Unloaded, Chunk::state)
    }

    pub fn is_resident(&self, coord: GridCoord) -> bool {
        self.state(coord) == PartitionState::Resident
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.values()
    }

    pub fn resident_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn groups(&self) -> impl Iterator<Item = &BatchGroup> {
        self.chunks.values().flat_map(Chunk::groups)
    }

    pub fn groups_mut(&mut self) -> impl Iterator<Item = &mut BatchGroup> {
        self.chunks.values_mut().flat_map(Chunk::groups_mut)
    }

    pub fn group_count(&self) -> usize {
        self.groups().count()
    }

    /// Statistics from the last update.
    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use worldspace_assets::{AssetPath, MemorySource, SyntheticWorld};
    use worldspace_render::HeadlessDevice;
    use worldspace_terrain::TerrainConfig;

    struct Fixture {
        source: MemorySource,
        device: HeadlessDevice,
        terrain: TerrainManager,
        manager: StreamManager,
    }

    fn fixture(chunks: Vec<GridCoord>, config: StreamConfig) -> Fixture {
        let world = SyntheticWorld {
            chunks,
            blocks_per_chunk: 1,
            groups_per_block: 1,
            instances_per_group: 8,
            ..SyntheticWorld::default()
        };
        let grid = Grid::default();
        let source = MemorySource::new();
        for (path, bytes) in world.assets(&grid).unwrap() {
            source.insert_bytes(&path, bytes);
        }
        let manifest = WorldManifest {
            chunk_indices: world.chunks.iter().map(|c| grid.index(*c)).collect(),
        };
        let mut device = HeadlessDevice::default();
        let terrain =
            TerrainManager::new(TerrainConfig::default(), grid.clone(), "synthetic", &mut device).unwrap();
        let manager = StreamManager::new(config, grid, "synthetic", &manifest, 480).unwrap();
        Fixture {
            source,
            device,
            terrain,
            manager,
        }
    }

    fn around(center: GridCoord) -> Vec<GridCoord> {
        let mut out = Vec::new();
        for z in -1..=1 {
            for x in -1..=1 {
                out.push(GridCoord::new(center.x + x, center.z + z));
            }
        }
        out
    }

    impl Fixture {
        fn update(&mut self, viewer: Vec3) -> (Vec<GridCoord>, Vec<GridCoord>) {
            self.manager
                .update(viewer, &self.source, &mut self.terrain, &mut self.device)
        }

        fn teardown(mut self) {
            self.manager
                .unload_all(&mut self.terrain, &mut self.device)
                .unwrap();
            self.terrain.release(&mut self.device);
            assert!(self.device.live_resources().is_empty());
            assert_eq!(self.device.invalid_releases(), 0);
        }
    }

    const CENTER: Vec3 = Vec3::new(512.0, 0.0, 512.0);

    #[test]
    fn stream_config_defaults() {
        let config = StreamConfig::default();
        assert_eq!(config.coverage_radius, 1);
        assert_eq!(config.load_budget, 4);
        assert_eq!(config.unload_budget, 4);
    }

    #[test]
    fn loads_coverage_within_budget() {
        let mut fx = fixture(around(GridCoord::new(50, 50)), StreamConfig::default());
        let (loaded, unloaded) = fx.update(CENTER);
        assert_eq!(loaded.len(), 4);
        assert!(unloaded.is_empty());
        assert_eq!(fx.manager.stats().chunks_loaded_this_frame, 4);

        fx.update(CENTER);
        let (loaded, _) = fx.update(CENTER);
        assert_eq!(loaded.len(), 1);
        assert_eq!(fx.manager.resident_count(), 9);
        assert_eq!(fx.terrain.chunk_count(), 9);
        assert_eq!(fx.manager.group_count(), 9);
        assert!(fx.update(CENTER).0.is_empty());
        fx.teardown();
    }

    #[test]
    fn skips_chunks_missing_from_manifest() {
        let chunks = vec![GridCoord::new(50, 50), GridCoord::new(51, 50), GridCoord::new(70, 70)];
        let mut fx = fixture(chunks, StreamConfig::default());
        let (loaded, _) = fx.update(CENTER);
        assert_eq!(loaded, vec![GridCoord::new(50, 50), GridCoord::new(51, 50)]);
        assert_eq!(fx.manager.state(GridCoord::new(49, 50)), PartitionState::Unloaded);
        fx.teardown();
    }

    #[test]
    fn unloads_when_viewer_moves() {
        let config = StreamConfig {
            load_budget: 100,
            unload_budget: 100,
            ..StreamConfig::default()
        };
        let mut fx = fixture(around(GridCoord::new(50, 50)), config);
        fx.update(CENTER);
        assert_eq!(fx.manager.resident_count(), 9);

        // One chunk east: the western column leaves coverage.
        let (loaded, unloaded) = fx.update(CENTER + Vec3::X * 1024.0);
        assert!(loaded.is_empty());
        assert_eq!(
            unloaded,
            vec![GridCoord::new(49, 49), GridCoord::new(49, 50), GridCoord::new(49, 51)]
        );
        assert!(!fx.terrain.contains(GridCoord::new(49, 50)));

        let (_, unloaded) = fx.update(Vec3::new(30_000.0, 0.0, 30_000.0));
        assert_eq!(unloaded.len(), 6);
        assert_eq!(fx.manager.group_count(), 0);
        assert_eq!(fx.terrain.chunk_count(), 0);
        fx.teardown();
    }

    #[test]
    fn failed_load_stays_unloaded_until_out_of_coverage() {
        let mut fx = fixture(vec![GridCoord::new(50, 50), GridCoord::new(51, 50)], StreamConfig::default());
        let broken = GridCoord::new(51, 50);
        fx.source
            .remove(&AssetPath::partition_config("synthetic", GridLevel::Chunk, broken));

        let (loaded, _) = fx.update(CENTER);
        assert_eq!(loaded, vec![GridCoord::new(50, 50)]);
        assert_eq!(fx.manager.stats().chunks_failed_this_frame, 1);
        assert_eq!(fx.manager.state(broken), PartitionState::Unloaded);
        assert!(!fx.terrain.contains(broken));

        fx.update(CENTER);
        assert_eq!(fx.manager.stats().chunks_failed_this_frame, 0);
        fx.teardown();
    }

    #[test]
    fn duplicate_load_is_rejected() {
        let mut fx = fixture(vec![GridCoord::new(50, 50)], StreamConfig::default());
        fx.update(CENTER);
        let coord = GridCoord::new(50, 50);
        let err = fx
            .manager
            .load_chunk(coord, &fx.source, &mut fx.terrain, &mut fx.device)
            .unwrap_err();
        assert!(matches!(err, StreamError::AlreadyResident(c) if c == coord));
        assert_eq!(fx.manager.resident_count(), 1);

        let err = fx
            .manager
            .unload_chunk(GridCoord::new(1, 1), &mut fx.terrain, &mut fx.device)
            .unwrap_err();
        assert!(matches!(err, StreamError::NotResident(_)));
        fx.teardown();
    }

    #[test]
    fn failed_load_at_any_device_call_releases_everything() {
        let mut fx = fixture(vec![GridCoord::new(50, 50)], StreamConfig::default());
        let coord = GridCoord::new(50, 50);
        let baseline = fx.device.live_resources();

        let (mut object_failures, mut terrain_failures) = (0, 0);
        for allowed in 0.. {
            fx.device.fail_after(allowed);
            let result = fx
                .manager
                .load_chunk(coord, &fx.source, &mut fx.terrain, &mut fx.device);
            fx.device.clear_failure();
            match result {
                Ok(()) => break,
                Err(StreamError::Render(_)) => object_failures += 1,
                Err(StreamError::Terrain(_)) => terrain_failures += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
            assert_eq!(fx.manager.state(coord), PartitionState::Unloaded);
            assert!(!fx.terrain.contains(coord));
            assert_eq!(fx.device.live_resources(), baseline);
            assert_eq!(fx.device.invalid_releases(), 0);
        }
        assert!(object_failures > 0);
        assert!(terrain_failures > 0);
        assert!(fx.manager.is_resident(coord));
        assert!(fx.terrain.contains(coord));
        assert_eq!(fx.manager.group_count(), 1);
        fx.teardown();
    }

    #[test]
    fn device_failure_during_update_retries_after_leaving_coverage() {
        let mut fx = fixture(vec![GridCoord::new(50, 50)], StreamConfig::default());
        let baseline = fx.device.live_resources();
        fx.device.fail_after(0);
        let (loaded, _) = fx.update(CENTER);
        fx.device.clear_failure();
        assert!(loaded.is_empty());
        assert_eq!(fx.manager.stats().chunks_failed_this_frame, 1);
        assert_eq!(fx.device.live_resources(), baseline);

        assert!(fx.update(CENTER).0.is_empty());
        fx.update(Vec3::new(30_000.0, 0.0, 30_000.0));
        assert_eq!(fx.update(CENTER).0, vec![GridCoord::new(50, 50)]);
        assert_eq!(fx.terrain.chunk_count(), 1);
        fx.teardown();
    }

    #[test]
    fn unload_releases_terrain_with_the_chunk() {
        let mut fx = fixture(vec![GridCoord::new(50, 50)], StreamConfig::default());
        let baseline = fx.device.live_resources();
        let coord = GridCoord::new(50, 50);
        fx.update(CENTER);
        fx.manager
            .unload_chunk(coord, &mut fx.terrain, &mut fx.device)
            .unwrap();
        assert!(!fx.terrain.contains(coord));
        assert_eq!(fx.device.live_resources(), baseline);
        fx.manager
            .load_chunk(coord, &fx.source, &mut fx.terrain, &mut fx.device)
            .unwrap();
        assert!(fx.manager.is_resident(coord));
        fx.teardown();
    }
}
