use std::collections::BTreeMap;

use bumpalo::collections::Vec as BumpVec;
use glam::Vec3;
use worldspace_assets::AssetSource;
use worldspace_common::{Aabb, Grid, GridCoord, GridLevel};
use worldspace_render::{BatchHandle, BufferHandle, FrameArena, GpuDevice, MaterialHandle, MeshHandle};

use crate::chunk::TerrainChunk;
use crate::{TerrainConfig, TerrainContext, TerrainError};

/// One terrain draw: instances `0..instance_count` of a chunk's batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TerrainDraw {
    pub chunk: GridCoord,
    pub batch: BatchHandle,
    pub buffer: BufferHandle,
    pub mesh: MeshHandle,
    pub material: MaterialHandle,
    pub instance_count: u32,
    pub bounds: Aabb,
}

/// Owns the terrain chunks of resident partitions and refreshes their quad
/// trees when the viewer moves.
#[derive(Debug)]
pub struct TerrainManager {
    config: TerrainConfig,
    grid: Grid,
    world: String,
    mesh: MeshHandle,
    chunks: BTreeMap<i32, TerrainChunk>,
    center: Vec3,
    quantized_center: Option<(i32, i32)>,
}

impl TerrainManager {
    /// Register the shared terrain mesh with `device`.
    pub fn new(
        config: TerrainConfig,
        grid: Grid,
        world: impl Into<String>,
        device: &mut dyn GpuDevice,
    ) -> Result<Self, TerrainError> {
        config.validate()?;
        let mesh = device.register_mesh(&config.mesh)?;
        Ok(Self {
            config,
            grid,
            world: world.into(),
            mesh,
            chunks: BTreeMap::new(),
            center: Vec3::ZERO,
            quantized_center: None,
        })
    }

    pub fn config(&self) -> &TerrainConfig {
        &self.config
    }

    pub fn center(&self) -> Vec3 {
        self.center
    }

    pub fn contains(&self, coord: GridCoord) -> bool {
        self.chunks.contains_key(&self.grid.index(coord))
    }

    pub fn chunk(&self, coord: GridCoord) -> Option<&TerrainChunk> {
        self.chunks.get(&self.grid.index(coord))
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn visible_node_count(&self) -> usize {
        self.chunks.values().map(|c| c.batch().visible_count()).sum()
    }

    /// Half-step cell of `pos`; the quad trees only change when it does.
    fn quantize(&self, pos: Vec3) -> (i32, i32) {
        let step = self.grid.cell_size(GridLevel::Step) as f64;
        let origin = self.grid.origin_offset() as f64;
        let half_step = |v: f32| ((v as f64 - origin) / step * 2.0).floor() as i32;
        (half_step(pos.x), half_step(pos.z))
    }

    /// Move the viewer. Returns whether the quad trees were refreshed. After a
    /// failed refresh the next call refreshes again.
    pub fn set_center(
        &mut self,
        pos: Vec3,
        source: &dyn AssetSource,
        device: &mut dyn GpuDevice,
    ) -> Result<bool, TerrainError> {
        self.center = pos;
        let quantized = self.quantize(pos);
        if self.quantized_center == Some(quantized) {
            return Ok(false);
        }
        self.quantized_center = Some(quantized);
        if let Err(e) = self.refresh_all(source, device) {
            self.quantized_center = None;
            return Err(e);
        }
        Ok(true)
    }

    /// Create the terrain of a chunk, refreshed against the current center.
    /// Adding a chunk twice is an error. On failure nothing is kept.
    pub fn add_chunk(
        &mut self,
        coord: GridCoord,
        source: &dyn AssetSource,
        device: &mut dyn GpuDevice,
    ) -> Result<(), TerrainError> {
        let index = self.grid.index(coord);
        if self.chunks.contains_key(&index) {
            tracing::error!(?coord, "terrain chunk added twice");
            return Err(TerrainError::DuplicateChunk(coord));
        }
        let ctx = self.context(source);
        let mut chunk = TerrainChunk::new(coord, &ctx, device)?;
        if let Err(e) = chunk.refresh(self.center, &ctx, device) {
            chunk.release(device);
            return Err(e);
        }
        tracing::debug!(?coord, "terrain chunk added");
        self.chunks.insert(index, chunk);
        Ok(())
    }

    /// Release the terrain of a chunk. Returns `false` if it was not present.
    ///
    /// Chunk selections are independent of each other, so the remaining
    /// chunks keep their nodes.
    pub fn remove_chunk(&mut self, coord: GridCoord, device: &mut dyn GpuDevice) -> bool {
        let Some(chunk) = self.chunks.remove(&self.grid.index(coord)) else {
            return false;
        };
        chunk.release(device);
        true
    }

    fn context<'a>(&'a self, source: &'a dyn AssetSource) -> TerrainContext<'a> {
        TerrainContext {
            grid: &self.grid,
            world: &self.world,
            source,
            config: &self.config,
        }
    }

    /// Refresh every chunk against the current center.
    pub fn refresh_all(&mut self, source: &dyn AssetSource, device: &mut dyn GpuDevice) -> Result<(), TerrainError> {
        let _span = tracing::info_span!("terrain_refresh").entered();
        let ctx = TerrainContext {
            grid: &self.grid,
            world: &self.world,
            source,
            config: &self.config,
        };
        for chunk in self.chunks.values_mut() {
            chunk.refresh(self.center, &ctx, device)?;
        }
        tracing::trace!(chunks = self.chunks.len(), "terrain refresh complete");
        Ok(())
    }

    /// Draws for every chunk with visible nodes, allocated from `arena`.
    pub fn draws<'a>(&self, arena: &'a FrameArena) -> &'a [TerrainDraw] {
        let mut draws = BumpVec::with_capacity_in(self.chunks.len(), arena.bump());
        for c in self.chunks.values().filter(|c| c.batch().visible_count() > 0) {
            draws.push(TerrainDraw {
                chunk: c.coord(),
                batch: c.batch().batch(),
                buffer: c.batch().buffer(),
                mesh: self.mesh,
                material: c.batch().material(),
                instance_count: c.batch().visible_count() as u32,
                bounds: c.bounds(),
            });
        }
        draws.into_bump_slice()
    }

    /// Release every chunk and the shared mesh.
    pub fn release(mut self, device: &mut dyn GpuDevice) {
        for (_, chunk) in std::mem::take(&mut self.chunks) {
            chunk.release(device);
        }
        device.unregister_mesh(self.mesh);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use worldspace_assets::{AssetPath, LightmapTier, MemorySource};
    use worldspace_render::HeadlessDevice;

    fn setup() -> (TerrainManager, MemorySource, HeadlessDevice) {
        let mut device = HeadlessDevice::default();
        let manager = TerrainManager::new(TerrainConfig::default(), Grid::default(), "w", &mut device).unwrap();
        let source = MemorySource::new();
        for x in 49..=51 {
            source.insert_bytes(
                &AssetPath::terrain_lightmap("w", GridCoord::new(x, 50), LightmapTier::Low, None),
                vec![0; 4],
            );
        }
        (manager, source, device)
    }

    #[test]
    fn duplicate_chunk_is_rejected() {
        let (mut manager, source, mut device) = setup();
        let coord = GridCoord::new(50, 50);
        manager.add_chunk(coord, &source, &mut device).unwrap();
        let err = manager.add_chunk(coord, &source, &mut device).unwrap_err();
        assert!(matches!(err, TerrainError::DuplicateChunk(c) if c == coord));
        assert_eq!(manager.chunk_count(), 1);
        manager.release(&mut device);
        assert!(device.live_resources().is_empty());
    }

    #[test]
    fn refreshes_only_on_half_step_change() {
        let (mut manager, source, mut device) = setup();
        manager.add_chunk(GridCoord::new(50, 50), &source, &mut device).unwrap();
        assert!(manager.set_center(Vec3::new(10.0, 0.0, 10.0), &source, &mut device).unwrap());
        assert!(!manager.set_center(Vec3::new(20.0, 5.0, 30.0), &source, &mut device).unwrap());
        assert!(manager.set_center(Vec3::new(40.0, 0.0, 10.0), &source, &mut device).unwrap());
        manager.release(&mut device);
    }

    #[test]
    fn near_chunk_refines_far_chunk_stays_coarse() {
        let (mut manager, source, mut device) = setup();
        manager.set_center(Vec3::new(512.0, 0.0, 512.0), &source, &mut device).unwrap();
        manager.add_chunk(GridCoord::new(50, 50), &source, &mut device).unwrap();
        manager.add_chunk(GridCoord::new(49, 50), &source, &mut device).unwrap();

        let near = manager.chunk(GridCoord::new(50, 50)).unwrap();
        assert!(near.batch().visible_count() > 1);
        let far = manager.chunk(GridCoord::new(49, 50)).unwrap();
        assert_eq!(far.batch().visible_count(), 1);

        let arena = FrameArena::new();
        let draws = manager.draws(&arena);
        assert_eq!(draws.len(), 2);
        assert_eq!(
            draws.iter().map(|d| d.instance_count as usize).sum::<usize>(),
            manager.visible_node_count()
        );
        manager.release(&mut device);
        assert!(device.live_resources().is_empty());
        assert_eq!(device.invalid_releases(), 0);
    }

    #[test]
    fn remove_chunk_releases_resources() {
        let (mut manager, source, mut device) = setup();
        let coord = GridCoord::new(51, 50);
        manager.add_chunk(coord, &source, &mut device).unwrap();
        let with_chunk = device.live_resources();
        assert!(manager.remove_chunk(coord, &mut device));
        assert!(!manager.remove_chunk(coord, &mut device));
        let after = device.live_resources();
        assert_eq!(after.buffers, with_chunk.buffers - 1);
        assert_eq!(after.textures, 0);
        manager.release(&mut device);
    }

    #[test]
    fn failed_add_at_any_device_call_keeps_nothing() {
        let (mut manager, source, mut device) = setup();
        manager.set_center(Vec3::new(512.0, 0.0, 512.0), &source, &mut device).unwrap();
        let coord = GridCoord::new(50, 50);
        let baseline = device.live_resources();

        let mut failures = 0;
        for allowed in 0.. {
            device.fail_after(allowed);
            let result = manager.add_chunk(coord, &source, &mut device);
            device.clear_failure();
            match result {
                Ok(()) => break,
                Err(e) => {
                    assert!(matches!(e, TerrainError::Render(_)), "{e}");
                    assert_eq!(manager.chunk_count(), 0);
                    assert_eq!(device.live_resources(), baseline);
                    failures += 1;
                }
            }
        }
        // Batch creation, the low-tier layer and the first refresh upload.
        assert!(failures >= 7);
        assert!(manager.chunk(coord).unwrap().batch().visible_count() > 1);
        manager.release(&mut device);
        assert!(device.live_resources().is_empty());
        assert_eq!(device.invalid_releases(), 0);
    }

    #[test]
    fn failed_first_refresh_releases_the_new_chunk() {
        let coord = GridCoord::new(50, 50);
        let (mut counted, source, mut device) = setup();
        let before = device.call_count();
        counted.add_chunk(coord, &source, &mut device).unwrap();
        let calls = device.call_count() - before;
        counted.release(&mut device);

        let (mut manager, source, mut device) = setup();
        let baseline = device.live_resources();
        device.fail_after(calls - 1);
        let err = manager.add_chunk(coord, &source, &mut device).unwrap_err();
        assert!(matches!(err, TerrainError::Render(_)));
        assert_eq!(manager.chunk_count(), 0);
        assert_eq!(device.live_resources(), baseline);

        device.clear_failure();
        manager.add_chunk(coord, &source, &mut device).unwrap();
        assert_eq!(manager.chunk_count(), 1);
        manager.release(&mut device);
        assert!(device.live_resources().is_empty());
    }

    #[test]
    fn failed_center_refresh_is_retried() {
        let (mut manager, source, mut device) = setup();
        manager.add_chunk(GridCoord::new(50, 50), &source, &mut device).unwrap();
        let center = Vec3::new(512.0, 0.0, 512.0);
        device.fail_after(0);
        assert!(manager.set_center(center, &source, &mut device).is_err());
        device.clear_failure();
        assert!(manager.set_center(center, &source, &mut device).unwrap());
        assert!(!manager.set_center(center, &source, &mut device).unwrap());
        manager.release(&mut device);
        assert!(device.live_resources().is_empty());
    }
}
