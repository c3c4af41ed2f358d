//! World render kernel: the explicit context that owns streaming, terrain,
//! light-map tiering and culling for one loaded world.
//!
//! # Invariants
//! - One context per loaded world, passed by reference, never global.
//! - GPU writes happen only inside `update` and `shutdown`, on the caller's
//!   thread. `cull` only reads instance data.
//! - `shutdown` releases every resource the context created.

mod config;
mod context;

pub use config::WorldRenderConfig;
pub use context::{FrameOutput, InitSummary, WorldRenderContext};

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("context is not initialized")]
    NotInitialized,
    #[error("context is already initialized")]
    AlreadyInitialized,
    #[error("invalid world config: {0}")]
    InvalidConfig(String),
    #[error("IO error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON error in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Grid(#[from] worldspace_common::GridError),
    #[error(transparent)]
    Asset(#[from] worldspace_assets::AssetError),
    #[error(transparent)]
    Render(#[from] worldspace_render::RenderError),
    #[error(transparent)]
    Stream(#[from] worldspace_stream::StreamError),
    #[error(transparent)]
    Terrain(#[from] worldspace_terrain::TerrainError),
}

pub fn crate_info() -> &'static str {
    "worldspace-kernel v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("kernel"));
    }
}
