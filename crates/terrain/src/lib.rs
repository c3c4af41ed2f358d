//! Terrain streaming: per-chunk quad trees that pick the coarsest nodes
//! outside a detail window around the viewer, drawn as one small instanced
//! batch per chunk.
//!
//! # Invariants
//! - A visible node has no visible ancestor or descendant.
//! - A chunk never draws more nodes than its batch capacity.
//! - A chunk is added at most once and released exactly once.

mod batch;
mod chunk;
mod manager;
mod quadtree;

use serde::{Deserialize, Serialize};
use worldspace_assets::AssetSource;
use worldspace_common::{Grid, GridCoord};

pub use batch::{TerrainBatch, lightmap_amount};
pub use chunk::TerrainChunk;
pub use manager::{TerrainDraw, TerrainManager};
pub use quadtree::{QuadTreeNode, TerrainNode};

/// Terrain quad tree and batch settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainConfig {
    /// Depth of the leaves; leaf size is `chunk_size >> max_depth`.
    pub max_depth: u32,
    /// Instance slots per chunk batch.
    pub instance_capacity: usize,
    /// Smallest detail window edge, in world units.
    pub min_window: f32,
    /// Layers of each chunk's light-map texture array, including the low tier.
    pub lightmap_layers: u32,
    pub lightmap_texture_size: u32,
    pub mesh: String,
    pub material: String,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            max_depth: 4,
            instance_capacity: 40,
            min_window: 64.0,
            lightmap_layers: 9,
            lightmap_texture_size: 512,
            mesh: "terrain_quad".into(),
            material: "terrain".into(),
        }
    }
}

impl TerrainConfig {
    pub fn validate(&self) -> Result<(), TerrainError> {
        if self.max_depth == 0 || self.max_depth > 16 {
            return Err(TerrainError::InvalidConfig(format!("max_depth {} outside 1..=16", self.max_depth)));
        }
        if self.instance_capacity == 0 {
            return Err(TerrainError::InvalidConfig("instance_capacity is zero".into()));
        }
        if self.lightmap_layers == 0 {
            return Err(TerrainError::InvalidConfig("lightmap_layers is zero".into()));
        }
        if self.min_window <= 0.0 {
            return Err(TerrainError::InvalidConfig(format!("min_window {} is not positive", self.min_window)));
        }
        Ok(())
    }
}

/// Shared inputs of a terrain refresh.
#[derive(Clone, Copy)]
pub struct TerrainContext<'a> {
    pub grid: &'a Grid,
    pub world: &'a str,
    pub source: &'a dyn AssetSource,
    pub config: &'a TerrainConfig,
}

impl std::fmt::Debug for TerrainContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerrainContext")
            .field("world", &self.world)
            .field("config", self.config)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TerrainError {
    #[error("terrain chunk {0} already present")]
    DuplicateChunk(GridCoord),
    #[error("invalid terrain config: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Render(#[from] worldspace_render::RenderError),
    #[error(transparent)]
    Layout(#[from] worldspace_render::LayoutError),
}

pub fn crate_info() -> &'static str {
    "worldspace-terrain v0.1.0"
}
