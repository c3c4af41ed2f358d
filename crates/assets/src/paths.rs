use worldspace_common::{GridCoord, GridLevel};

use crate::lightmap::LightmapTier;

/// What an asset path points at; decides the on-disk encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    /// JSON-encoded configuration.
    Config,
    /// Raw texel bytes.
    Texture,
}

/// Hierarchical, extension-less asset path such as `forest/block_3_7/config`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssetPath {
    path: String,
    kind: AssetKind,
}

impl AssetPath {
    pub fn new(path: impl Into<String>, kind: AssetKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.path
    }

    pub fn kind(&self) -> AssetKind {
        self.kind
    }

    /// `<world>/world`: the list of chunks that have baked content.
    pub fn world_manifest(world: &str) -> Self {
        Self::new(format!("{world}/world"), AssetKind::Config)
    }

    /// `<world>/{cell|block|chunk}_<x>_<z>/config`
    pub fn partition_config(world: &str, level: GridLevel, coord: GridCoord) -> Self {
        Self::new(
            format!("{}/config", partition_dir(world, level, coord)),
            AssetKind::Config,
        )
    }

    /// `<world>/{block|cell}_<x>_<z>/batchGroupConfig_<index>`
    pub fn batch_group_config(world: &str, level: GridLevel, coord: GridCoord, index: u32) -> Self {
        Self::new(
            format!("{}/batchGroupConfig_{index}", partition_dir(world, level, coord)),
            AssetKind::Config,
        )
    }

    /// `<world>/block_<x>_<z>/{shq|smq|slq}_lightmap_<i>`, `i` local to the tier.
    pub fn object_lightmap(
        world: &str,
        level: GridLevel,
        coord: GridCoord,
        tier: LightmapTier,
        local_index: u32,
    ) -> Self {
        Self::new(
            format!(
                "{}/{}_lightmap_{local_index}",
                partition_dir(world, level, coord),
                tier.object_prefix()
            ),
            AssetKind::Texture,
        )
    }

    /// `<world>/terrain_lm/chunk_<x>_<z>/t{hq|mq|lq}lm[_<x>_<z>]`
    pub fn terrain_lightmap(
        world: &str,
        chunk: GridCoord,
        tier: LightmapTier,
        cell: Option<GridCoord>,
    ) -> Self {
        let name = terrain_lightmap_name(tier, cell);
        Self::new(
            format!("{world}/terrain_lm/chunk_{chunk}/{name}"),
            AssetKind::Texture,
        )
    }
}

/// File name of a terrain light-map inside its chunk directory.
pub fn terrain_lightmap_name(tier: LightmapTier, cell: Option<GridCoord>) -> String {
    match cell {
        Some(c) => format!("{}_{c}", tier.terrain_stem()),
        None => tier.terrain_stem().to_string(),
    }
}

fn partition_dir(world: &str, level: GridLevel, coord: GridCoord) -> String {
    format!("{world}/{}_{coord}", level.path_prefix())
}

impl std::fmt::Display for AssetPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.path)
    }
}
