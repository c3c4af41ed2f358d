//! Baked world assets: configuration types, path conventions, light-map
//! layer packing and asset sources.
//!
//! The runtime never writes configs during play; the `write_*` helpers exist
//! for tooling and tests that produce baked worlds.
//!
//! # Layout
//! Every asset lives under `<world>/`, in one directory per partition
//! (`block_<x>_<z>/`, `chunk_<x>_<z>/`) plus `terrain_lm/` for terrain
//! light-maps.

pub mod config;
pub mod lightmap;
pub mod paths;
pub mod source;
pub mod synth;

pub use config::{
    BatchGroupConfig, BlockConfig, ChunkConfig, ConfigError, LodConfig, UNBOUNDED_DISTANCE,
    WorldManifest,
};
pub use lightmap::{LightmapLayout, LightmapTier};
pub use paths::{AssetKind, AssetPath, terrain_lightmap_name};
pub use source::{AssetSource, DirectorySource, MemorySource, load_config};
pub use synth::SyntheticWorld;

/// Errors from asset operations.
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("asset not found: {0}")]
    NotFound(String),
    #[error("JSON error in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid asset {path}: {source}")]
    Invalid {
        path: String,
        #[source]
        source: ConfigError,
    },
    #[error("asset source lock poisoned")]
    Poisoned,
}

pub fn crate_info() -> &'static str {
    "worldspace-assets v0.1.0"
}
