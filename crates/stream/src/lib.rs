//! Streaming: chunk and block partitions around the viewer, loaded from baked
//! assets within per-frame budgets.
//!
//! # Invariants
//! - A chunk is resident at most once; loading it again is an error.
//! - A failed load leaves the chunk `Unloaded` with nothing allocated.
//! - Every GPU resource a partition creates is released on its unload.

mod manager;
mod partition;

use serde::{Deserialize, Serialize};
use worldspace_common::GridCoord;

pub use manager::{StreamManager, StreamStats};
pub use partition::{Block, Chunk, LoadContext, PartitionState};

/// Streaming configuration: coverage radius plus per-frame budgets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Radius (in chunks) around the viewer's chunk kept resident.
    pub coverage_radius: i32,
    /// Maximum number of chunks to load per frame.
    pub load_budget: usize,
    /// Maximum number of chunks to unload per frame.
    pub unload_budget: usize,
    /// Edge of each block light-map array layer, in texels.
    pub lightmap_texture_size: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            coverage_radius: 1,
            load_budget: 4,
            unload_budget: 4,
            lightmap_texture_size: 1024,
        }
    }
}

impl StreamConfig {
    pub fn validate(&self) -> Result<(), StreamError> {
        if self.coverage_radius < 0 {
            return Err(StreamError::InvalidConfig(format!(
                "coverage_radius {} is negative",
                self.coverage_radius
            )));
        }
        if self.load_budget == 0 || self.unload_budget == 0 {
            return Err(StreamError::InvalidConfig("load and unload budgets must be non-zero".into()));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("chunk {0} is already resident")]
    AlreadyResident(GridCoord),
    #[error("chunk {0} is not resident")]
    NotResident(GridCoord),
    #[error("chunk {coord}: invalid transition {from:?} -> {to:?}")]
    InvalidTransition {
        coord: GridCoord,
        from: PartitionState,
        to: PartitionState,
    },
    #[error("invalid stream config: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Asset(#[from] worldspace_assets::AssetError),
    #[error(transparent)]
    Render(#[from] worldspace_render::RenderError),
    #[error(transparent)]
    Terrain(#[from] worldspace_terrain::TerrainError),
}

pub fn crate_info() -> &'static str {
    "worldspace-stream v0.1.0"
}
