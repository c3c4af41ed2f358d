use glam::Vec3;
use worldspace_common::{Aabb, GridCoord, GridLevel};
use worldspace_render::GpuDevice;

use crate::batch::TerrainBatch;
use crate::quadtree::{QuadTreeNode, TerrainNode};
use crate::{TerrainContext, TerrainError};

/// Quad tree and terrain batch of one chunk.
#[derive(Debug)]
pub struct TerrainChunk {
    coord: GridCoord,
    root: QuadTreeNode,
    batch: TerrainBatch,
    visible: Vec<TerrainNode>,
}

impl TerrainChunk {
    pub fn new(coord: GridCoord, ctx: &TerrainContext<'_>, device: &mut dyn GpuDevice) -> Result<Self, TerrainError> {
        let origin = ctx.grid.cell_origin(GridLevel::Chunk, coord);
        let root = QuadTreeNode::new(
            origin,
            0,
            ctx.grid.cell_size(GridLevel::Chunk),
            ctx.config.max_depth,
        );
        let batch = TerrainBatch::new(coord, ctx, device)?;
        Ok(Self {
            coord,
            root,
            batch,
            visible: Vec::with_capacity(ctx.config.instance_capacity),
        })
    }

    /// Reselect visible nodes around `center` and rebuild the batch.
    pub fn refresh(&mut self, center: Vec3, ctx: &TerrainContext<'_>, device: &mut dyn GpuDevice) -> Result<(), TerrainError> {
        self.visible.clear();
        let window = self.root.size() * 0.5;
        self.root
            .refresh(center, window, ctx.config.min_window, &mut self.visible);
        self.batch.refresh(&self.visible, ctx, device)
    }

    pub fn release(self, device: &mut dyn GpuDevice) {
        self.batch.release(device);
        tracing::debug!(coord = ?self.coord, "terrain chunk released");
    }

    pub fn coord(&self) -> GridCoord {
        self.coord
    }

    pub fn root(&self) -> &QuadTreeNode {
        &self.root
    }

    pub fn bounds(&self) -> Aabb {
        *self.root.bounds()
    }

    pub fn batch(&self) -> &TerrainBatch {
        &self.batch
    }

    /// Nodes chosen by the last refresh, before capacity truncation.
    pub fn visible_nodes(&self) -> &[TerrainNode] {
        &self.visible
    }
}
