//! Baked configuration assets, read-only to the runtime.

use glam::{Quat, Vec3, Vec4};
use serde::{Deserialize, Serialize};
use worldspace_common::{Aabb, Transform};

use crate::lightmap::{LightmapLayout, LightmapTier};

/// Sentinel max distance of the last LOD tier.
pub const UNBOUNDED_DISTANCE: f32 = -1.0;

/// Inconsistencies found while validating a config.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} has {actual} entries, expected {expected}")]
    LengthMismatch {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("batch group has no LOD tiers")]
    NoLods,
    #[error("LOD tier {tier} is unbounded but is not the last tier")]
    UnboundedNotLast { tier: usize },
    #[error("last LOD tier max distance is {0}, expected the unbounded sentinel -1")]
    LastTierBounded(f32),
    #[error("LOD tier {tier} band [{min}, {max}) is empty or out of order")]
    BadBand { tier: usize, min: f32, max: f32 },
    #[error("LOD tier {tier} starts at {min}, previous tier ends at {previous_max}")]
    BandGap { tier: usize, min: f32, previous_max: f32 },
    #[error("instance {instance}: {tier:?} light-map layer {layer} outside {start}..{end}")]
    LightmapOutOfRange {
        instance: usize,
        tier: LightmapTier,
        layer: u32,
        start: u32,
        end: u32,
    },
}

/// `<world>/world`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldManifest {
    /// Linear indices of every chunk with baked content.
    pub chunk_indices: Vec<i32>,
}

/// `<world>/chunk_<x>_<z>/config`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Linear indices of the blocks inside this chunk that carry objects.
    pub block_indices: Vec<i32>,
}

/// `<world>/block_<x>_<z>/config`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockConfig {
    pub batch_group_count: u32,
    pub hq_lightmap_count: u32,
    pub mq_lightmap_count: u32,
    pub lq_lightmap_count: u32,
}

impl BlockConfig {
    pub fn lightmap_layout(&self) -> LightmapLayout {
        LightmapLayout::new(self.hq_lightmap_count, self.mq_lightmap_count, self.lq_lightmap_count)
    }
}

/// One LOD tier: a mesh/material pair drawn in `[min, max)` view distance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LodConfig {
    pub mesh: String,
    pub material: String,
    pub lod_min_distance: f32,
    /// [`UNBOUNDED_DISTANCE`] on the last tier.
    pub lod_max_distance: f32,
}

impl LodConfig {
    pub fn is_unbounded(&self) -> bool {
        self.lod_max_distance < 0.0
    }
}

/// `<world>/block_<x>_<z>/batchGroupConfig_<index>`
///
/// Per-instance data is stored as parallel arrays of length `count`.
/// Light-map indices are texture array layers (see [`LightmapLayout`]).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchGroupConfig {
    pub lods: Vec<LodConfig>,
    pub count: usize,
    pub positions: Vec<Vec3>,
    pub rotations: Vec<Quat>,
    pub scales: Vec<Vec3>,
    pub bounds: Vec<Aabb>,
    pub hq_lightmap_indices: Vec<u32>,
    pub mq_lightmap_indices: Vec<u32>,
    pub lq_lightmap_indices: Vec<u32>,
    pub hq_lightmap_scale_offsets: Vec<Vec4>,
    pub mq_lightmap_scale_offsets: Vec<Vec4>,
    pub lq_lightmap_scale_offsets: Vec<Vec4>,
}

impl BatchGroupConfig {
    pub fn transform(&self, index: usize) -> Transform {
        Transform {
            position: self.positions[index],
            rotation: self.rotations[index],
            scale: self.scales[index],
        }
    }

    pub fn lightmap_indices(&self, tier: LightmapTier) -> &[u32] {
        match tier {
            LightmapTier::High => &self.hq_lightmap_indices,
            LightmapTier::Medium => &self.mq_lightmap_indices,
            LightmapTier::Low => &self.lq_lightmap_indices,
        }
    }

    pub fn lightmap_scale_offsets(&self, tier: LightmapTier) -> &[Vec4] {
        match tier {
            LightmapTier::High => &self.hq_lightmap_scale_offsets,
            LightmapTier::Medium => &self.mq_lightmap_scale_offsets,
            LightmapTier::Low => &self.lq_lightmap_scale_offsets,
        }
    }

    /// Check array lengths, LOD band ordering and light-map layers against the
    /// owning partition's layout. Each LOD band must start where the previous
    /// one ends.
    pub fn validate(&self, layout: &LightmapLayout) -> Result<(), ConfigError> {
        let count = self.count;
        let lengths = [
            ("positions", self.positions.len()),
            ("rotations", self.rotations.len()),
            ("scales", self.scales.len()),
            ("bounds", self.bounds.len()),
            ("hq_lightmap_indices", self.hq_lightmap_indices.len()),
            ("mq_lightmap_indices", self.mq_lightmap_indices.len()),
            ("lq_lightmap_indices", self.lq_lightmap_indices.len()),
            ("hq_lightmap_scale_offsets", self.hq_lightmap_scale_offsets.len()),
            ("mq_lightmap_scale_offsets", self.mq_lightmap_scale_offsets.len()),
            ("lq_lightmap_scale_offsets", self.lq_lightmap_scale_offsets.len()),
        ];
        for (field, actual) in lengths {
            if actual != count {
                return Err(ConfigError::LengthMismatch {
                    field,
                    expected: count,
                    actual,
                });
            }
        }

        let last = self.lods.len().checked_sub(1).ok_or(ConfigError::NoLods)?;
        for (tier, lod) in self.lods.iter().enumerate() {
            if lod.is_unbounded() {
                if tier != last {
                    return Err(ConfigError::UnboundedNotLast { tier });
                }
            } else if tier == last {
                return Err(ConfigError::LastTierBounded(lod.lod_max_distance));
            } else if lod.lod_min_distance < 0.0 || lod.lod_max_distance <= lod.lod_min_distance {
                return Err(ConfigError::BadBand {
                    tier,
                    min: lod.lod_min_distance,
                    max: lod.lod_max_distance,
                });
            }
            // Bands tile the distance axis: no gaps, no overlaps.
            if let Some(previous) = tier.checked_sub(1).map(|t| &self.lods[t]) {
                if lod.lod_min_distance != previous.lod_max_distance {
                    return Err(ConfigError::BandGap {
                        tier,
                        min: lod.lod_min_distance,
                        previous_max: previous.lod_max_distance,
                    });
                }
            }
        }

        for tier in LightmapTier::ALL {
            let range = layout.layers(tier);
            for (instance, &layer) in self.lightmap_indices(tier).iter().enumerate() {
                if !range.contains(&layer) {
                    return Err(ConfigError::LightmapOutOfRange {
                        instance,
                        tier,
                        layer,
                        start: range.start,
                        end: range.end,
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_config(count: usize) -> BatchGroupConfig {
        BatchGroupConfig {
            lods: vec![
                LodConfig {
                    mesh: "tree_lod0".into(),
                    material: "tree".into(),
                    lod_min_distance: 0.0,
                    lod_max_distance: 30.0,
                },
                LodConfig {
                    mesh: "tree_lod1".into(),
                    material: "tree".into(),
                    lod_min_distance: 30.0,
                    lod_max_distance: UNBOUNDED_DISTANCE,
                },
            ],
            count,
            positions: (0..count).map(|i| Vec3::new(i as f32, 0.0, 0.0)).collect(),
            rotations: vec![Quat::IDENTITY; count],
            scales: vec![Vec3::ONE; count],
            bounds: (0..count)
                .map(|i| Aabb::new(Vec3::new(i as f32, 0.0, 0.0), Vec3::splat(0.5)))
                .collect(),
            hq_lightmap_indices: vec![0; count],
            mq_lightmap_indices: vec![1; count],
            lq_lightmap_indices: vec![2; count],
            hq_lightmap_scale_offsets: vec![Vec4::new(1.0, 1.0, 0.0, 0.0); count],
            mq_lightmap_scale_offsets: vec![Vec4::new(0.5, 0.5, 0.0, 0.0); count],
            lq_lightmap_scale_offsets: vec![Vec4::new(0.25, 0.25, 0.0, 0.0); count],
        }
    }

    #[test]
    fn sample_config_is_valid() {
        let layout = LightmapLayout::new(1, 1, 1);
        assert_eq!(sample_config(4).validate(&layout), Ok(()));
    }

    #[test]
    fn detects_length_mismatch() {
        let mut config = sample_config(4);
        config.scales.pop();
        assert_eq!(
            config.validate(&LightmapLayout::new(1, 1, 1)),
            Err(ConfigError::LengthMismatch {
                field: "scales",
                expected: 4,
                actual: 3
            })
        );
    }

    #[test]
    fn last_tier_must_be_unbounded() {
        let mut config = sample_config(1);
        config.lods[1].lod_max_distance = 90.0;
        assert!(matches!(
            config.validate(&LightmapLayout::new(1, 1, 1)),
            Err(ConfigError::LastTierBounded(_))
        ));

        config.lods[0].lod_max_distance = UNBOUNDED_DISTANCE;
        assert_eq!(
            config.validate(&LightmapLayout::new(1, 1, 1)),
            Err(ConfigError::UnboundedNotLast { tier: 0 })
        );
    }

    #[test]
    fn lod_bands_must_be_contiguous() {
        let layout = LightmapLayout::new(1, 1, 1);
        let mut config = sample_config(1);
        config.lods[1].lod_min_distance = 40.0;
        assert_eq!(
            config.validate(&layout),
            Err(ConfigError::BandGap {
                tier: 1,
                min: 40.0,
                previous_max: 30.0
            })
        );

        config.lods[1].lod_min_distance = 20.0;
        assert!(matches!(config.validate(&layout), Err(ConfigError::BandGap { tier: 1, .. })));
    }

    #[test]
    fn lightmap_layers_must_match_their_tier() {
        let config = sample_config(2);
        // Medium layer 1 is outside a layout with two high-tier textures.
        assert_eq!(
            config.validate(&LightmapLayout::new(2, 1, 1)),
            Err(ConfigError::LightmapOutOfRange {
                instance: 0,
                tier: LightmapTier::Medium,
                layer: 1,
                start: 2,
                end: 3
            })
        );
    }

    #[test]
    fn empty_group_is_valid() {
        let config = sample_config(0);
        assert_eq!(config.validate(&LightmapLayout::default()), Ok(()));
    }

    #[test]
    fn json_round_trip_preserves_sentinel() {
        let config = sample_config(3);
        let json = serde_json::to_string(&config).unwrap();
        let back: BatchGroupConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
        assert!(back.lods[1].is_unbounded());
    }
}
