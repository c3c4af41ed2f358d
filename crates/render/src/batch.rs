//! Batch groups: identical-shape instances drawn as one or more sub-batches
//! per LOD tier.
//!
//! # Invariants
//! - Every sub-batch holds at least one instance; empty groups own no buffers.
//! - Sub-batch ranges of a LOD cover `[0, count)` in order.
//! - GPU resources are released exactly once, by [`BatchGroup::release`].

use std::ops::Range;

use glam::{Vec3, Vec4};
use worldspace_assets::{BatchGroupConfig, LightmapLayout, LightmapTier, LodConfig};
use worldspace_common::{Aabb, PackedMatrix};

use crate::RenderError;
use crate::device::{BatchHandle, BufferHandle, GpuDevice, MaterialHandle, MeshHandle, TextureHandle};
use crate::layout::{BufferLayout, InstanceWriter, LIGHTMAP_INDEX, LIGHTMAP_ST, OBJECT_FIELDS, OBJECT_TO_WORLD};
use crate::packer::split_ranges;

/// Identifier assigned by the owner of a batch group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchGroupId(pub u32);

#[derive(Debug, Clone, Default)]
struct TierLightmaps {
    layers: Vec<f32>,
    scale_offsets: Vec<Vec4>,
}

/// Engine-side copy of a group's per-instance arrays.
#[derive(Debug)]
pub struct InstanceStorage {
    positions: Vec<Vec3>,
    bounds: Vec<Aabb>,
    transforms: Vec<PackedMatrix>,
    lightmaps: [TierLightmaps; 3],
}

impl InstanceStorage {
    /// Copy the arrays out of a validated config.
    pub fn from_config(config: &BatchGroupConfig) -> Self {
        let transforms = (0..config.count)
            .map(|i| PackedMatrix::from(&config.transform(i)))
            .collect();
        let lightmaps = LightmapTier::ALL.map(|tier| TierLightmaps {
            layers: config.lightmap_indices(tier).iter().map(|&l| l as f32).collect(),
            scale_offsets: config.lightmap_scale_offsets(tier).to_vec(),
        });
        Self {
            positions: config.positions.clone(),
            bounds: config.bounds.clone(),
            transforms,
            lightmaps,
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    pub fn bounds(&self) -> &[Aabb] {
        &self.bounds
    }

    pub fn transforms(&self) -> &[PackedMatrix] {
        &self.transforms
    }

    /// Texture array layer of instance `i` in `tier`.
    pub fn lightmap_layer(&self, tier: LightmapTier, i: usize) -> f32 {
        self.lightmaps[tier as usize].layers[i]
    }

    pub fn lightmap_scale_offset(&self, tier: LightmapTier, i: usize) -> Vec4 {
        self.lightmaps[tier as usize].scale_offsets[i]
    }

    fn bounds_of(&self, range: Range<usize>) -> Option<Aabb> {
        self.bounds[range].iter().copied().reduce(|a, b| a.union(&b))
    }
}

/// CPU mirror of the light-map fields of one sub-batch.
#[derive(Debug)]
pub(crate) struct LightmapStaging {
    pub(crate) tiers: Vec<LightmapTier>,
    pub(crate) scale_offsets: Vec<Vec4>,
    pub(crate) layers: Vec<f32>,
}

impl LightmapStaging {
    fn new(instances: &InstanceStorage, range: Range<usize>, tier: LightmapTier) -> Self {
        Self {
            tiers: vec![tier; range.len()],
            scale_offsets: range.clone().map(|i| instances.lightmap_scale_offset(tier, i)).collect(),
            layers: range.map(|i| instances.lightmap_layer(tier, i)).collect(),
        }
    }
}

/// One instance buffer and its host draw registration.
#[derive(Debug)]
pub struct SubBatch {
    range: Range<usize>,
    layout: BufferLayout,
    buffer: BufferHandle,
    batch: BatchHandle,
    bounds: Aabb,
    pub(crate) staging: LightmapStaging,
}

impl SubBatch {
    fn create(
        instances: &InstanceStorage,
        range: Range<usize>,
        device: &mut dyn GpuDevice,
    ) -> Result<Self, RenderError> {
        let layout = BufferLayout::new(&OBJECT_FIELDS, range.len())?;
        let staging = LightmapStaging::new(instances, range.clone(), LightmapTier::Low);
        let mut writer = InstanceWriter::new(&layout);
        writer.write(OBJECT_TO_WORLD, &instances.transforms[range.clone()])?;
        writer.write(LIGHTMAP_ST, &staging.scale_offsets)?;
        writer.write(LIGHTMAP_INDEX, &staging.layers)?;
        let bytes = writer.into_bytes();
        let bounds = instances.bounds_of(range.clone()).unwrap_or_default();

        let buffer = device.create_buffer(layout.size())?;
        let batch = device
            .write_buffer(buffer, 0, &bytes)
            .and_then(|()| device.add_batch(buffer, &layout.metadata()));
        let batch = match batch {
            Ok(batch) => batch,
            Err(e) => {
                device.destroy_buffer(buffer);
                return Err(e);
            }
        };
        Ok(Self {
            range,
            layout,
            buffer,
            batch,
            bounds,
            staging,
        })
    }

    fn release(self, device: &mut dyn GpuDevice) {
        device.remove_batch(self.batch);
        device.destroy_buffer(self.buffer);
    }

    /// Instance range within the owning group.
    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    pub fn layout(&self) -> &BufferLayout {
        &self.layout
    }

    pub fn buffer(&self) -> BufferHandle {
        self.buffer
    }

    pub fn batch(&self) -> BatchHandle {
        self.batch
    }

    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    /// Light-map tier currently uploaded for local instance `i`.
    pub fn lightmap_tier(&self, i: usize) -> LightmapTier {
        self.staging.tiers[i]
    }
}

/// One LOD tier: a mesh/material registration and its sub-batches.
#[derive(Debug)]
pub struct Lod {
    mesh: MeshHandle,
    material: MaterialHandle,
    min_distance: f32,
    max_distance: f32,
    sub_batches: Vec<SubBatch>,
}

impl Lod {
    fn create(
        config: &LodConfig,
        instances: &InstanceStorage,
        ranges: &[Range<usize>],
        lightmaps: Option<TextureHandle>,
        device: &mut dyn GpuDevice,
    ) -> Result<Self, RenderError> {
        let mesh = device.register_mesh(&config.mesh)?;
        let material = match device.register_material(&config.material, lightmaps) {
            Ok(material) => material,
            Err(e) => {
                device.unregister_mesh(mesh);
                return Err(e);
            }
        };
        let mut lod = Lod {
            mesh,
            material,
            min_distance: config.lod_min_distance,
            max_distance: config.lod_max_distance,
            sub_batches: Vec::with_capacity(ranges.len()),
        };
        for range in ranges {
            match SubBatch::create(instances, range.clone(), device) {
                Ok(sub_batch) => lod.sub_batches.push(sub_batch),
                Err(e) => {
                    lod.release(device);
                    return Err(e);
                }
            }
        }
        Ok(lod)
    }

    fn release(self, device: &mut dyn GpuDevice) {
        for sub_batch in self.sub_batches {
            sub_batch.release(device);
        }
        device.unregister_material(self.material);
        device.unregister_mesh(self.mesh);
    }

    /// `d² >= min² && (d² < max² || max == -1)`.
    pub fn accepts(&self, distance_sq: f32) -> bool {
        distance_sq >= self.min_distance * self.min_distance
            && (self.max_distance < 0.0 || distance_sq < self.max_distance * self.max_distance)
    }

    pub fn mesh(&self) -> MeshHandle {
        self.mesh
    }

    pub fn material(&self) -> MaterialHandle {
        self.material
    }

    pub fn min_distance(&self) -> f32 {
        self.min_distance
    }

    pub fn max_distance(&self) -> f32 {
        self.max_distance
    }

    pub fn sub_batches(&self) -> &[SubBatch] {
        &self.sub_batches
    }

    pub(crate) fn sub_batches_mut(&mut self) -> &mut [SubBatch] {
        &mut self.sub_batches
    }
}

/// Instances sharing one set of LOD meshes and materials.
#[derive(Debug)]
pub struct BatchGroup {
    id: BatchGroupId,
    lods: Vec<Lod>,
    instances: InstanceStorage,
}

impl BatchGroup {
    /// Validate `config`, copy its arrays and upload one buffer per
    /// sub-batch per LOD. Anything created before a failure is released.
    pub fn new(
        id: BatchGroupId,
        config: &BatchGroupConfig,
        layout: &LightmapLayout,
        lightmaps: Option<TextureHandle>,
        max_per_sub_batch: usize,
        device: &mut dyn GpuDevice,
    ) -> Result<Self, RenderError> {
        config.validate(layout)?;
        let ranges = split_ranges(config.count, max_per_sub_batch);
        let mut group = BatchGroup {
            id,
            lods: Vec::with_capacity(config.lods.len()),
            instances: InstanceStorage::from_config(config),
        };
        for lod_config in &config.lods {
            match Lod::create(lod_config, &group.instances, &ranges, lightmaps, device) {
                Ok(lod) => group.lods.push(lod),
                Err(e) => {
                    group.release(device);
                    return Err(e);
                }
            }
        }
        tracing::debug!(
            ?id,
            count = config.count,
            lods = group.lods.len(),
            sub_batches = ranges.len(),
            "batch group created"
        );
        Ok(group)
    }

    /// Release every buffer and registration.
    pub fn release(mut self, device: &mut dyn GpuDevice) {
        for lod in self.lods.drain(..) {
            lod.release(device);
        }
        tracing::debug!(id = ?self.id, "batch group released");
    }

    pub fn id(&self) -> BatchGroupId {
        self.id
    }

    pub fn lods(&self) -> &[Lod] {
        &self.lods
    }

    pub fn instances(&self) -> &InstanceStorage {
        &self.instances
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Number of draw commands this group contributes per frame.
    pub fn sub_batch_count(&self) -> usize {
        self.lods.iter().map(|l| l.sub_batches.len()).sum()
    }

    pub(crate) fn split_mut(&mut self) -> (&InstanceStorage, &mut [Lod]) {
        (&self.instances, &mut self.lods)
    }
}

impl Drop for BatchGroup {
    fn drop(&mut self) {
        if !self.lods.is_empty() {
            tracing::error!(id = ?self.id, "batch group dropped without release; GPU resources leaked");
        }
    }
}
