//! Object batching and culling: instance buffers, LOD selection and
//! light-map tiering for baked decoration instances.
//!
//! # Invariants
//! - The renderer never owns world data; batch groups are built from baked
//!   configs and only their light-map fields change after upload.
//! - All GPU calls go through [`GpuDevice`] on the render thread. Culling
//!   tasks only read instance data.
//! - Culling output lives in a [`FrameArena`] and is gone at frame end.
//!
//! The host renderer is reached through the [`GpuDevice`] trait.
//! [`HeadlessDevice`] stands in for it in tools and tests.

mod arena;
mod batch;
mod culling;
mod device;
mod layout;
mod lightmap;
mod packer;
mod stats;

pub use arena::FrameArena;
pub use batch::{BatchGroup, BatchGroupId, InstanceStorage, Lod, SubBatch};
pub use culling::{
    CullingConfig, CullingEngine, Dispatch, DrawCommand, DrawCommandSet, FrameState, parallel_for,
};
pub use device::{
    BatchHandle, BufferHandle, GpuDevice, HeadlessDevice, MaterialHandle, MeshHandle, ResourceCounts,
    TextureDesc, TextureHandle, UploadStats,
};
pub use layout::{
    BufferLayout, FieldSpec, HEADER_SIZE, InstanceWriter, LIGHTMAP_AMOUNT, LIGHTMAP_INDEX, LIGHTMAP_ST,
    LayoutError, LayoutField, MetadataEntry, OBJECT_FIELDS, OBJECT_TO_WORLD, PER_INSTANCE_FLAG,
    TERRAIN_FIELDS, instance_stride, max_instances_per_buffer,
};
pub use lightmap::{LightmapStats, LightmapUpdater};
pub use packer::{split_ranges, sub_batch_capacity};
pub use stats::{FrameStats, FrameTimer};

/// Default cap on a single instance buffer.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 32 * 1024;

/// Errors from GPU resource management and batch construction.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("zero-sized buffer requested")]
    ZeroSizedBuffer,
    #[error("buffer of {size} bytes exceeds the device limit of {max}")]
    BufferTooLarge { size: usize, max: usize },
    #[error("unknown buffer {0:?}")]
    UnknownBuffer(BufferHandle),
    #[error("write of {len} bytes at {offset} past buffer end {size}")]
    WriteOutOfBounds { offset: usize, len: usize, size: usize },
    #[error("unknown texture {0:?}")]
    UnknownTexture(TextureHandle),
    #[error("texture layer {layer} outside array of {layers}")]
    LayerOutOfRange { layer: u32, layers: u32 },
    #[error("buffer layout: {0}")]
    Layout(#[from] LayoutError),
    #[error("invalid batch group config: {0}")]
    InvalidConfig(#[from] worldspace_assets::ConfigError),
    #[error("worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("device error: {0}")]
    Device(String),
}

pub fn crate_info() -> &'static str {
    "worldspace-render v0.1.0"
}
