//! Light-map quality tiers and how their textures are packed into one array.
//!
//! Baked configs store *array layers*: high-tier textures occupy layers
//! `[0, hq)`, medium `[hq, hq + mq)`, low `[hq + mq, total)`. Texture file
//! names carry the index local to their tier. [`LightmapLayout::layer`] is
//! used when writing configs and [`LightmapLayout::locate`] when reading them,
//! so both directions apply the same offsets.

use serde::{Deserialize, Serialize};
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LightmapTier {
    High,
    Medium,
    Low,
}

impl LightmapTier {
    /// Priority order, which is also the packing order.
    pub const ALL: [LightmapTier; 3] = [LightmapTier::High, LightmapTier::Medium, LightmapTier::Low];

    /// File prefix of object light-maps (`shq_lightmap_3`).
    pub fn object_prefix(self) -> &'static str {
        match self {
            LightmapTier::High => "shq",
            LightmapTier::Medium => "smq",
            LightmapTier::Low => "slq",
        }
    }

    /// File stem of terrain light-maps (`thqlm_12_40`, `tlqlm`).
    pub fn terrain_stem(self) -> &'static str {
        match self {
            LightmapTier::High => "thqlm",
            LightmapTier::Medium => "tmqlm",
            LightmapTier::Low => "tlqlm",
        }
    }
}

/// Layer counts of one partition's light-map texture array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LightmapLayout {
    pub hq_count: u32,
    pub mq_count: u32,
    pub lq_count: u32,
}

impl LightmapLayout {
    pub fn new(hq_count: u32, mq_count: u32, lq_count: u32) -> Self {
        Self {
            hq_count,
            mq_count,
            lq_count,
        }
    }

    pub fn total(&self) -> u32 {
        self.hq_count + self.mq_count + self.lq_count
    }

    pub fn count(&self, tier: LightmapTier) -> u32 {
        match tier {
            LightmapTier::High => self.hq_count,
            LightmapTier::Medium => self.mq_count,
            LightmapTier::Low => self.lq_count,
        }
    }

    /// Array layers reserved for `tier`.
    pub fn layers(&self, tier: LightmapTier) -> Range<u32> {
        let start = match tier {
            LightmapTier::High => 0,
            LightmapTier::Medium => self.hq_count,
            LightmapTier::Low => self.hq_count + self.mq_count,
        };
        start..start + self.count(tier)
    }

    /// Array layer of the `local`-th texture of `tier`, or `None` if the tier
    /// has fewer textures.
    pub fn layer(&self, tier: LightmapTier, local: u32) -> Option<u32> {
        (local < self.count(tier)).then(|| self.layers(tier).start + local)
    }

    /// Tier and tier-local index of an array layer.
    pub fn locate(&self, layer: u32) -> Option<(LightmapTier, u32)> {
        LightmapTier::ALL.into_iter().find_map(|tier| {
            let range = self.layers(tier);
            range.contains(&layer).then(|| (tier, layer - range.start))
        })
    }
}
