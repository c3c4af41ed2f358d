use glam::Vec3;
use worldspace_assets::LightmapTier;

use crate::RenderError;
use crate::batch::BatchGroup;
use crate::culling::CullingConfig;
use crate::device::GpuDevice;
use crate::layout::{LIGHTMAP_INDEX, LIGHTMAP_ST};

/// Picks each instance's light-map tier by viewer distance and re-uploads
/// the light-map fields of sub-batches whose tiers changed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightmapUpdater {
    hq_distance_sq: f32,
    mq_distance_sq: f32,
}

/// Work done by one update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LightmapStats {
    pub instances_changed: usize,
    pub sub_batches_uploaded: usize,
    pub bytes_uploaded: usize,
}

impl LightmapUpdater {
    pub fn new(hq_distance: f32, mq_distance: f32) -> Self {
        Self {
            hq_distance_sq: hq_distance * hq_distance,
            mq_distance_sq: mq_distance * mq_distance,
        }
    }

    pub fn from_config(config: &CullingConfig) -> Self {
        Self::new(config.hq_lightmap_distance, config.mq_lightmap_distance)
    }

    pub fn select_tier(&self, distance_sq: f32) -> LightmapTier {
        if distance_sq <= self.hq_distance_sq {
            LightmapTier::High
        } else if distance_sq <= self.mq_distance_sq {
            LightmapTier::Medium
        } else {
            LightmapTier::Low
        }
    }

    /// Update every group. Runs on the render thread.
    pub fn update<'g>(
        &self,
        viewer: Vec3,
        groups: impl IntoIterator<Item = &'g mut BatchGroup>,
        device: &mut dyn GpuDevice,
    ) -> Result<LightmapStats, RenderError> {
        let _span = tracing::info_span!("lightmap_update").entered();
        let mut stats = LightmapStats::default();
        for group in groups {
            self.update_group(viewer, group, device, &mut stats)?;
        }
        tracing::trace!(
            changed = stats.instances_changed,
            uploads = stats.sub_batches_uploaded,
            bytes = stats.bytes_uploaded,
            "lightmap update complete"
        );
        Ok(stats)
    }

    fn update_group(
        &self,
        viewer: Vec3,
        group: &mut BatchGroup,
        device: &mut dyn GpuDevice,
        stats: &mut LightmapStats,
    ) -> Result<(), RenderError> {
        let (instances, lods) = group.split_mut();
        for lod in lods {
            for sb in lod.sub_batches_mut() {
                let mut changed = 0;
                for (local, i) in sb.range().enumerate() {
                    let tier = self.select_tier(viewer.distance_squared(instances.positions()[i]));
                    let staging = &mut sb.staging;
                    if staging.tiers[local] != tier {
                        staging.tiers[local] = tier;
                        staging.scale_offsets[local] = instances.lightmap_scale_offset(tier, i);
                        staging.layers[local] = instances.lightmap_layer(tier, i);
                        changed += 1;
                    }
                }
                if changed == 0 {
                    continue;
                }

                let st = sb.layout().range(LIGHTMAP_ST)?;
                let index = sb.layout().range(LIGHTMAP_INDEX)?;
                device.write_buffer(sb.buffer(), st.start, bytemuck::cast_slice(&sb.staging.scale_offsets))?;
                device.write_buffer(sb.buffer(), index.start, bytemuck::cast_slice(&sb.staging.layers))?;
                stats.instances_changed += changed;
                stats.sub_batches_uploaded += 1;
                stats.bytes_uploaded += st.len() + index.len();
            }
        }
        Ok(())
    }
}

impl Default for LightmapUpdater {
    fn default() -> Self {
        Self::from_config(&CullingConfig::default())
    }
}
