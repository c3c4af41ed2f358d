//! Per-chunk terrain batch: a fixed-capacity instance buffer of quad-tree
//! nodes and a small texture array of the light-maps they sample.
//!
//! Layer 0 always holds the chunk's low-tier light-map. The remaining layers
//! cache high- and medium-tier textures by name across refreshes; a node
//! whose texture is missing or finds no free layer samples layer 0 instead.

use glam::{Mat4, Quat, Vec2, Vec3, Vec4};
use worldspace_assets::{AssetPath, LightmapTier, terrain_lightmap_name};
use worldspace_common::{GridCoord, GridLevel, PackedMatrix};
use worldspace_render::{
    BatchHandle, BufferHandle, BufferLayout, GpuDevice, InstanceWriter, LIGHTMAP_AMOUNT, LIGHTMAP_INDEX,
    LIGHTMAP_ST, MaterialHandle, OBJECT_TO_WORLD, TERRAIN_FIELDS, TextureDesc, TextureHandle,
};

use crate::quadtree::TerrainNode;
use crate::{TerrainContext, TerrainError};

const LOW_LAYER: u32 = 0;

/// Light-map a node wants before layer allocation.
#[derive(Debug, Clone, PartialEq)]
struct NodeLightmap {
    tier: LightmapTier,
    cell: Option<GridCoord>,
    scale_offset: Vec4,
}

#[derive(Debug)]
pub struct TerrainBatch {
    chunk: GridCoord,
    layout: BufferLayout,
    buffer: BufferHandle,
    batch: BatchHandle,
    material: MaterialHandle,
    lightmaps: TextureHandle,
    resident: Vec<Option<String>>,
    visible_count: usize,
}

impl TerrainBatch {
    pub fn new(chunk: GridCoord, ctx: &TerrainContext<'_>, device: &mut dyn GpuDevice) -> Result<Self, TerrainError> {
        let config = ctx.config;
        let layout = BufferLayout::new(&TERRAIN_FIELDS, config.instance_capacity)?;
        let lightmaps = device.create_texture_array(TextureDesc {
            width: config.lightmap_texture_size,
            height: config.lightmap_texture_size,
            layers: config.lightmap_layers,
        })?;
        let material = match device.register_material(&config.material, Some(lightmaps)) {
            Ok(material) => material,
            Err(e) => {
                device.destroy_texture(lightmaps);
                return Err(e.into());
            }
        };
        let buffer = match device.create_buffer(layout.size()) {
            Ok(buffer) => buffer,
            Err(e) => {
                device.unregister_material(material);
                device.destroy_texture(lightmaps);
                return Err(e.into());
            }
        };
        let batch = device
            .write_buffer(buffer, 0, &InstanceWriter::new(&layout).into_bytes())
            .and_then(|()| device.add_batch(buffer, &layout.metadata()));
        let batch = match batch {
            Ok(batch) => batch,
            Err(e) => {
                device.destroy_buffer(buffer);
                device.unregister_material(material);
                device.destroy_texture(lightmaps);
                return Err(e.into());
            }
        };

        let mut terrain = Self {
            chunk,
            layout,
            buffer,
            batch,
            material,
            lightmaps,
            resident: vec![None; config.lightmap_layers as usize],
            visible_count: 0,
        };
        if let Err(e) = terrain.load_layer(LightmapTier::Low, None, LOW_LAYER, ctx, device) {
            terrain.release(device);
            return Err(e);
        }
        Ok(terrain)
    }

    pub fn release(self, device: &mut dyn GpuDevice) {
        device.remove_batch(self.batch);
        device.destroy_buffer(self.buffer);
        device.unregister_material(self.material);
        device.destroy_texture(self.lightmaps);
    }

    pub fn chunk(&self) -> GridCoord {
        self.chunk
    }

    pub fn buffer(&self) -> BufferHandle {
        self.buffer
    }

    pub fn batch(&self) -> BatchHandle {
        self.batch
    }

    pub fn material(&self) -> MaterialHandle {
        self.material
    }

    pub fn lightmaps(&self) -> TextureHandle {
        self.lightmaps
    }

    pub fn layout(&self) -> &BufferLayout {
        &self.layout
    }

    pub fn visible_count(&self) -> usize {
        self.visible_count
    }

    /// Name of the texture resident in `layer`.
    pub fn resident_layer(&self, layer: u32) -> Option<&str> {
        self.resident.get(layer as usize).and_then(|l| l.as_deref())
    }

    /// Read a light-map texture into `layer`. A missing texture is logged and
    /// reported as `Ok(false)`.
    fn load_layer(
        &mut self,
        tier: LightmapTier,
        cell: Option<GridCoord>,
        layer: u32,
        ctx: &TerrainContext<'_>,
        device: &mut dyn GpuDevice,
    ) -> Result<bool, TerrainError> {
        let path = AssetPath::terrain_lightmap(ctx.world, self.chunk, tier, cell);
        let bytes = match ctx.source.read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(%path, error = %e, "terrain light-map unavailable");
                return Ok(false);
            }
        };
        device.write_texture_layer(self.lightmaps, layer, &bytes)?;
        self.resident[layer as usize] = Some(terrain_lightmap_name(tier, cell));
        Ok(true)
    }

    fn wanted_lightmap(&self, node: &TerrainNode, ctx: &TerrainContext<'_>) -> NodeLightmap {
        let grid = ctx.grid;
        match node.lod(ctx.config.max_depth) {
            0 => NodeLightmap {
                tier: LightmapTier::High,
                cell: Some(cell_of(ctx, GridLevel::Step, node.origin)),
                scale_offset: Vec4::new(1.0, 1.0, 0.0, 0.0),
            },
            1 => {
                let block = cell_of(ctx, GridLevel::Block, node.origin);
                let block_size = grid.cell_size(GridLevel::Block);
                let local = (node.origin - grid.cell_origin(GridLevel::Block, block)) / block_size;
                let s = node.size / block_size;
                NodeLightmap {
                    tier: LightmapTier::Medium,
                    cell: Some(block),
                    scale_offset: Vec4::new(s, s, local.x, local.y),
                }
            }
            _ => NodeLightmap {
                tier: LightmapTier::Low,
                cell: None,
                scale_offset: self.low_scale_offset(node, ctx),
            },
        }
    }

    /// Scale-offset of `node` inside the chunk-wide low-tier light-map.
    fn low_scale_offset(&self, node: &TerrainNode, ctx: &TerrainContext<'_>) -> Vec4 {
        let chunk_size = ctx.grid.cell_size(GridLevel::Chunk);
        let local = (node.origin - ctx.grid.cell_origin(GridLevel::Chunk, self.chunk)) / chunk_size;
        let s = node.size / chunk_size;
        Vec4::new(s, s, local.x, local.y)
    }

    /// Rebuild every instance from `nodes` and upload the whole buffer.
    pub fn refresh(
        &mut self,
        nodes: &[TerrainNode],
        ctx: &TerrainContext<'_>,
        device: &mut dyn GpuDevice,
    ) -> Result<(), TerrainError> {
        let capacity = self.layout.instance_count();
        if nodes.len() > capacity {
            tracing::warn!(chunk = %self.chunk, nodes = nodes.len(), capacity, "terrain nodes over capacity, truncating");
        }
        let nodes = &nodes[..nodes.len().min(capacity)];
        let wanted: Vec<NodeLightmap> = nodes.iter().map(|n| self.wanted_lightmap(n, ctx)).collect();

        // Keep layers still in use; everything else may be overwritten.
        let mut used = vec![false; self.resident.len()];
        used[LOW_LAYER as usize] = true;
        for w in wanted.iter().filter(|w| w.tier != LightmapTier::Low) {
            if let Some(layer) = self.find_resident(w) {
                used[layer as usize] = true;
            }
        }

        let mut scale_offsets = Vec::with_capacity(nodes.len());
        let mut layers = Vec::with_capacity(nodes.len());
        let mut fallbacks = 0;
        for (node, w) in nodes.iter().zip(&wanted) {
            let layer = if w.tier == LightmapTier::Low {
                None
            } else {
                self.layer_for(w, &mut used, ctx, device)?
            };
            match layer {
                Some(layer) => {
                    scale_offsets.push(w.scale_offset);
                    layers.push(layer as f32);
                }
                None => {
                    if w.tier != LightmapTier::Low {
                        fallbacks += 1;
                    }
                    scale_offsets.push(self.low_scale_offset(node, ctx));
                    layers.push(LOW_LAYER as f32);
                }
            }
        }

        let max_depth = ctx.config.max_depth;
        let transforms: Vec<PackedMatrix> = nodes
            .iter()
            .map(|n| {
                let m = Mat4::from_scale_rotation_translation(
                    Vec3::splat(n.size),
                    Quat::IDENTITY,
                    Vec3::new(n.origin.x, 0.0, n.origin.y),
                );
                PackedMatrix::from_mat4(&m)
            })
            .collect();
        let amounts: Vec<f32> = nodes.iter().map(|n| lightmap_amount(n.lod(max_depth), max_depth)).collect();

        let mut writer = InstanceWriter::new(&self.layout);
        writer.write(OBJECT_TO_WORLD, &transforms)?;
        writer.write(LIGHTMAP_ST, &scale_offsets)?;
        writer.write(LIGHTMAP_INDEX, &layers)?;
        writer.write(LIGHTMAP_AMOUNT, &amounts)?;
        device.write_buffer(self.buffer, 0, &writer.into_bytes())?;
        self.visible_count = nodes.len();

        tracing::trace!(chunk = %self.chunk, nodes = nodes.len(), fallbacks, "terrain batch refreshed");
        Ok(())
    }

    fn find_resident(&self, wanted: &NodeLightmap) -> Option<u32> {
        let name = terrain_lightmap_name(wanted.tier, wanted.cell);
        self.resident
            .iter()
            .position(|r| r.as_deref() == Some(name.as_str()))
            .map(|l| l as u32)
    }

    /// Resident layer of the wanted texture, loading it into a free layer if
    /// needed. `None` means fall back to the low tier.
    fn layer_for(
        &mut self,
        wanted: &NodeLightmap,
        used: &mut [bool],
        ctx: &TerrainContext<'_>,
        device: &mut dyn GpuDevice,
    ) -> Result<Option<u32>, TerrainError> {
        if let Some(layer) = self.find_resident(wanted) {
            used[layer as usize] = true;
            return Ok(Some(layer));
        }
        let Some(free) = used.iter().position(|u| !u) else {
            tracing::debug!(chunk = %self.chunk, tier = ?wanted.tier, "terrain light-map layers exhausted");
            return Ok(None);
        };
        let layer = free as u32;
        self.resident[free] = None;
        if !self.load_layer(wanted.tier, wanted.cell, layer, ctx, device)? {
            return Ok(None);
        }
        used[free] = true;
        Ok(Some(layer))
    }
}

fn cell_of(ctx: &TerrainContext<'_>, level: GridLevel, origin: Vec2) -> GridCoord {
    GridCoord::new(ctx.grid.axis_coord(level, origin.x), ctx.grid.axis_coord(level, origin.y))
}

/// Blend weight of the light-map: highest at the leaves, zero from one level
/// below the root upwards.
pub fn lightmap_amount(lod: u32, max_depth: u32) -> f32 {
    if max_depth == 0 {
        return 0.0;
    }
    max_depth.saturating_sub(1).saturating_sub(lod) as f32 / max_depth as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TerrainConfig;
    use worldspace_assets::{AssetSource, MemorySource};
    use worldspace_common::Grid;
    use worldspace_render::HeadlessDevice;

    #[test]
    fn amount_per_lod() {
        assert_eq!(lightmap_amount(0, 4), 0.75);
        assert_eq!(lightmap_amount(1, 4), 0.5);
        assert_eq!(lightmap_amount(2, 4), 0.25);
        assert_eq!(lightmap_amount(3, 4), 0.0);
        assert_eq!(lightmap_amount(4, 4), 0.0);
    }

    struct Fixture {
        grid: Grid,
        config: TerrainConfig,
        source: MemorySource,
        chunk: GridCoord,
    }

    impl Fixture {
        fn new() -> Self {
            let grid = Grid::default();
            // Chunk whose origin is world (0, 0).
            let chunk = GridCoord::new(50, 50);
            assert_eq!(grid.cell_origin(GridLevel::Chunk, chunk), Vec2::ZERO);
            let source = MemorySource::new();
            source.insert_bytes(&AssetPath::terrain_lightmap("w", chunk, LightmapTier::Low, None), vec![1; 16]);
            Self {
                grid,
                config: TerrainConfig::default(),
                source,
                chunk,
            }
        }

        fn ctx(&self) -> TerrainContext<'_> {
            TerrainContext {
                grid: &self.grid,
                world: "w",
                source: &self.source as &dyn AssetSource,
                config: &self.config,
            }
        }

        fn add_texture(&self, tier: LightmapTier, cell: GridCoord) {
            self.source
                .insert_bytes(&AssetPath::terrain_lightmap("w", self.chunk, tier, Some(cell)), vec![2; 16]);
        }
    }

    fn leaf(x: f32, z: f32) -> TerrainNode {
        TerrainNode {
            origin: Vec2::new(x, z),
            size: 64.0,
            depth: 4,
        }
    }

    fn read_layers(device: &HeadlessDevice, batch: &TerrainBatch, n: usize) -> Vec<f32> {
        let start = batch.layout().range(LIGHTMAP_INDEX).unwrap().start;
        let bytes = device.buffer_bytes(batch.buffer()).unwrap();
        bytemuck::pod_collect_to_vec(&bytes[start..start + 4 * n])
    }

    #[test]
    fn loads_low_tier_into_layer_zero() {
        let fx = Fixture::new();
        let mut device = HeadlessDevice::default();
        let batch = TerrainBatch::new(fx.chunk, &fx.ctx(), &mut device).unwrap();
        assert_eq!(batch.resident_layer(0), Some("tlqlm"));
        assert_eq!(device.texture_layer(batch.lightmaps(), 0), Some(&[1u8; 16][..]));
        assert_eq!(device.texture_desc(batch.lightmaps()).unwrap().layers, 9);
        batch.release(&mut device);
        assert!(device.live_resources().is_empty());
    }

    #[test]
    fn leaf_uses_step_lightmap() {
        let fx = Fixture::new();
        // Step cell of world (128, 64).
        let step = GridCoord::new(fx.grid.axis_coord(GridLevel::Step, 128.0), fx.grid.axis_coord(GridLevel::Step, 64.0));
        fx.add_texture(LightmapTier::High, step);
        let mut device = HeadlessDevice::default();
        let mut batch = TerrainBatch::new(fx.chunk, &fx.ctx(), &mut device).unwrap();
        batch.refresh(&[leaf(128.0, 64.0), leaf(0.0, 0.0)], &fx.ctx(), &mut device).unwrap();

        assert_eq!(batch.visible_count(), 2);
        assert_eq!(batch.resident_layer(1), Some(format!("thqlm_{}_{}", step.x, step.z).as_str()));
        // The second leaf has no texture and falls back to the low tier.
        assert_eq!(read_layers(&device, &batch, 2), vec![1.0, 0.0]);
        batch.release(&mut device);
    }

    #[test]
    fn medium_tier_offset_is_block_local() {
        let fx = Fixture::new();
        let block = GridCoord::new(fx.grid.axis_coord(GridLevel::Block, 384.0), fx.grid.axis_coord(GridLevel::Block, 0.0));
        fx.add_texture(LightmapTier::Medium, block);
        let mut device = HeadlessDevice::default();
        let mut batch = TerrainBatch::new(fx.chunk, &fx.ctx(), &mut device).unwrap();
        let node = TerrainNode {
            origin: Vec2::new(384.0, 0.0),
            size: 128.0,
            depth: 3,
        };
        batch.refresh(&[node], &fx.ctx(), &mut device).unwrap();

        let start = batch.layout().range(LIGHTMAP_ST).unwrap().start;
        let bytes = device.buffer_bytes(batch.buffer()).unwrap();
        let st: Vec<Vec4> = bytemuck::pod_collect_to_vec(&bytes[start..start + 16]);
        assert_eq!(st[0], Vec4::new(0.5, 0.5, 0.5, 0.0));
        assert_eq!(read_layers(&device, &batch, 1), vec![1.0]);
        batch.release(&mut device);
    }

    #[test]
    fn coarse_nodes_sample_chunk_lightmap() {
        let fx = Fixture::new();
        let mut device = HeadlessDevice::default();
        let mut batch = TerrainBatch::new(fx.chunk, &fx.ctx(), &mut device).unwrap();
        let node = TerrainNode {
            origin: Vec2::new(512.0, 256.0),
            size: 256.0,
            depth: 2,
        };
        batch.refresh(&[node], &fx.ctx(), &mut device).unwrap();
        let start = batch.layout().range(LIGHTMAP_ST).unwrap().start;
        let bytes = device.buffer_bytes(batch.buffer()).unwrap();
        let st: Vec<Vec4> = bytemuck::pod_collect_to_vec(&bytes[start..start + 16]);
        assert_eq!(st[0], Vec4::new(0.25, 0.25, 0.5, 0.25));

        let amount_start = batch.layout().range(LIGHTMAP_AMOUNT).unwrap().start;
        let amount: Vec<f32> = bytemuck::pod_collect_to_vec(&bytes[amount_start..amount_start + 4]);
        assert_eq!(amount[0], 0.25);
        batch.release(&mut device);
    }

    #[test]
    fn exhausted_layers_fall_back() {
        let mut fx = Fixture::new();
        fx.config.lightmap_layers = 2;
        let nodes: Vec<TerrainNode> = (0..3).map(|i| leaf(64.0 * i as f32, 0.0)).collect();
        for n in &nodes {
            fx.add_texture(LightmapTier::High, cell_of(&fx.ctx(), GridLevel::Step, n.origin));
        }
        let mut device = HeadlessDevice::default();
        let mut batch = TerrainBatch::new(fx.chunk, &fx.ctx(), &mut device).unwrap();
        batch.refresh(&nodes, &fx.ctx(), &mut device).unwrap();
        assert_eq!(read_layers(&device, &batch, 3), vec![1.0, 0.0, 0.0]);
        batch.release(&mut device);
    }

    #[test]
    fn resident_textures_are_not_reloaded() {
        let fx = Fixture::new();
        let node = leaf(0.0, 0.0);
        fx.add_texture(LightmapTier::High, cell_of(&fx.ctx(), GridLevel::Step, node.origin));
        let mut device = HeadlessDevice::default();
        let mut batch = TerrainBatch::new(fx.chunk, &fx.ctx(), &mut device).unwrap();
        batch.refresh(&[node], &fx.ctx(), &mut device).unwrap();
        let writes = device.uploads().texture_writes;
        batch.refresh(&[node], &fx.ctx(), &mut device).unwrap();
        assert_eq!(device.uploads().texture_writes, writes);
        batch.release(&mut device);
    }

    #[test]
    fn truncates_to_capacity() {
        let mut fx = Fixture::new();
        fx.config.instance_capacity = 2;
        let mut device = HeadlessDevice::default();
        let mut batch = TerrainBatch::new(fx.chunk, &fx.ctx(), &mut device).unwrap();
        let nodes: Vec<TerrainNode> = (0..5).map(|i| leaf(64.0 * i as f32, 0.0)).collect();
        batch.refresh(&nodes, &fx.ctx(), &mut device).unwrap();
        assert_eq!(batch.visible_count(), 2);
        batch.release(&mut device);
    }
}
