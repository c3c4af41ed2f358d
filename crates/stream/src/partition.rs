use worldspace_assets::{
    AssetPath, AssetSource, BatchGroupConfig, BlockConfig, ChunkConfig, LightmapLayout, LightmapTier, load_config,
};
use worldspace_common::{Grid, GridCoord, GridLevel};
use worldspace_render::{BatchGroup, BatchGroupId, GpuDevice, TextureDesc, TextureHandle};

use crate::StreamError;

/// Lifecycle of a streamed partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PartitionState {
    #[default]
    Unloaded,
    Loading,
    Resident,
    Unloading,
}

impl PartitionState {
    /// The next state in the load/unload cycle.
    pub fn next(self) -> PartitionState {
        match self {
            PartitionState::Unloaded => PartitionState::Loading,
            PartitionState::Loading => PartitionState::Resident,
            PartitionState::Resident => PartitionState::Unloading,
            PartitionState::Unloading => PartitionState::Unloaded,
        }
    }
}

/// Inputs shared by every partition load.
#[derive(Clone, Copy)]
pub struct LoadContext<'a> {
    pub grid: &'a Grid,
    pub world: &'a str,
    pub source: &'a dyn AssetSource,
    pub max_per_sub_batch: usize,
    pub lightmap_texture_size: u32,
}

/// A block: the batch groups baked into one block cell and the light-map
/// array they sample.
#[derive(Debug)]
pub struct Block {
    coord: GridCoord,
    layout: LightmapLayout,
    lightmaps: Option<TextureHandle>,
    groups: Vec<BatchGroup>,
}

impl Block {
    /// Load the block config, its light-maps and every batch group. On
    /// failure everything created so far is released.
    pub fn load(
        coord: GridCoord,
        ctx: &LoadContext<'_>,
        next_id: &mut u32,
        device: &mut dyn GpuDevice,
    ) -> Result<Self, StreamError> {
        let config: BlockConfig = load_config(
            ctx.source,
            &AssetPath::partition_config(ctx.world, GridLevel::Block, coord),
        )?;
        let layout = config.lightmap_layout();
        let mut block = Block {
            coord,
            layout,
            lightmaps: None,
            groups: Vec::with_capacity(config.batch_group_count as usize),
        };
        if let Err(e) = block.load_contents(&config, ctx, next_id, device) {
            block.release(device);
            return Err(e);
        }
        tracing::debug!(
            ?coord,
            groups = block.groups.len(),
            lightmaps = layout.total(),
            "block loaded"
        );
        Ok(block)
    }

    fn load_contents(
        &mut self,
        config: &BlockConfig,
        ctx: &LoadContext<'_>,
        next_id: &mut u32,
        device: &mut dyn GpuDevice,
    ) -> Result<(), StreamError> {
        if self.layout.total() > 0 {
            let texture = device.create_texture_array(TextureDesc {
                width: ctx.lightmap_texture_size,
                height: ctx.lightmap_texture_size,
                layers: self.layout.total(),
            })?;
            self.lightmaps = Some(texture);
            for tier in LightmapTier::ALL {
                for (local, layer) in self.layout.layers(tier).enumerate() {
                    let path = AssetPath::object_lightmap(ctx.world, GridLevel::Block, self.coord, tier, local as u32);
                    let bytes = ctx.source.read(&path)?;
                    device.write_texture_layer(texture, layer, &bytes)?;
                }
            }
        }

        for index in 0..config.batch_group_count {
            let group_config: BatchGroupConfig = load_config(
                ctx.source,
                &AssetPath::batch_group_config(ctx.world, GridLevel::Block, self.coord, index),
            )?;
            let id = BatchGroupId(*next_id);
            *next_id += 1;
            let group = BatchGroup::new(
                id,
                &group_config,
                &self.layout,
                self.lightmaps,
                ctx.max_per_sub_batch,
                device,
            )?;
            self.groups.push(group);
        }
        Ok(())
    }

    /// Release every batch group, then the light-map array they bind.
    pub fn release(self, device: &mut dyn GpuDevice) {
        for group in self.groups {
            group.release(device);
        }
        if let Some(texture) = self.lightmaps {
            device.destroy_texture(texture);
        }
    }

    pub fn coord(&self) -> GridCoord {
        self.coord
    }

    pub fn lightmap_layout(&self) -> LightmapLayout {
        self.layout
    }

    pub fn lightmaps(&self) -> Option<TextureHandle> {
        self.lightmaps
    }

    pub fn groups(&self) -> &[BatchGroup] {
        &self.groups
    }

    pub fn groups_mut(&mut self) -> &mut [BatchGroup] {
        &mut self.groups
    }
}

/// A streamed chunk and the blocks listed in its config.
#[derive(Debug)]
pub struct Chunk {
    coord: GridCoord,
    state: PartitionState,
    blocks: Vec<Block>,
}

impl Chunk {
    pub fn new(coord: GridCoord) -> Self {
        Self {
            coord,
            state: PartitionState::Unloaded,
            blocks: Vec::new(),
        }
    }

    /// Load the chunk config and every block in it, leaving the chunk
    /// `Resident`. A failure leaves it `Unloaded` with nothing allocated.
    pub fn load(
        &mut self,
        ctx: &LoadContext<'_>,
        next_id: &mut u32,
        device: &mut dyn GpuDevice,
    ) -> Result<(), StreamError> {
        self.transition(PartitionState::Loading)?;
        match self.load_blocks(ctx, next_id, device) {
            Ok(()) => self.transition(PartitionState::Resident),
            Err(e) => {
                for block in self.blocks.drain(..) {
                    block.release(device);
                }
                self.state = PartitionState::Unloaded;
                Err(e)
            }
        }
    }

    fn load_blocks(
        &mut self,
        ctx: &LoadContext<'_>,
        next_id: &mut u32,
        device: &mut dyn GpuDevice,
    ) -> Result<(), StreamError> {
        let config: ChunkConfig = load_config(
            ctx.source,
            &AssetPath::partition_config(ctx.world, GridLevel::Chunk, self.coord),
        )?;
        self.blocks.reserve(config.block_indices.len());
        for &index in &config.block_indices {
            let coord = ctx.grid.coord_from_index(index);
            self.blocks.push(Block::load(coord, ctx, next_id, device)?);
        }
        Ok(())
    }

    /// Release every block and return to `Unloaded`.
    pub fn unload(&mut self, device: &mut dyn GpuDevice) -> Result<(), StreamError> {
        self.transition(PartitionState::Unloading)?;
        for block in self.blocks.drain(..) {
            block.release(device);
        }
        self.transition(PartitionState::Unloaded)
    }

    fn transition(&mut self, to: PartitionState) -> Result<(), StreamError> {
        if self.state.next() != to {
            tracing::error!(coord = ?self.coord, from = ?self.state, ?to, "invalid partition transition");
            return Err(StreamError::InvalidTransition {
                coord: self.coord,
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    pub fn coord(&self) -> GridCoord {
        self.coord
    }

    pub fn state(&self) -> PartitionState {
        self.state
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn blocks_mut(&mut self) -> &mut [Block] {
        &mut self.blocks
    }

    pub fn groups(&self) -> impl Iterator<Item = &BatchGroup> {
        self.blocks.iter().flat_map(|b| b.groups().iter())
    }

    pub fn groups_mut(&mut self) -> impl Iterator<Item = &mut BatchGroup> {
        self.blocks.iter_mut().flat_map(|b| b.groups_mut().iter_mut())
    }
}
