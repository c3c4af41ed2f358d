use std::path::Path;

use serde::{Deserialize, Serialize};
use worldspace_common::GridConfig;
use worldspace_render::CullingConfig;
use worldspace_stream::StreamConfig;
use worldspace_terrain::TerrainConfig;

use crate::ContextError;

/// Everything needed to stream and draw one world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldRenderConfig {
    /// Root directory name of the world's baked assets.
    pub world_name: String,
    pub grid: GridConfig,
    pub culling: CullingConfig,
    pub stream: StreamConfig,
    pub terrain: TerrainConfig,
    /// Cull phase budget in milliseconds.
    pub cull_budget_ms: f32,
}

impl Default for WorldRenderConfig {
    fn default() -> Self {
        Self {
            world_name: "world".into(),
            grid: GridConfig::default(),
            culling: CullingConfig::default(),
            stream: StreamConfig::default(),
            terrain: TerrainConfig::default(),
            cull_budget_ms: 2.0,
        }
    }
}

impl WorldRenderConfig {
    /// Read a JSON config. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ContextError> {
        let bytes = std::fs::read(path).map_err(|e| ContextError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let config: Self = serde_json::from_slice(&bytes).map_err(|e| ContextError::Json {
            path: path.display().to_string(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ContextError> {
        let json = serde_json::to_vec_pretty(self).map_err(|e| ContextError::Json {
            path: path.display().to_string(),
            source: e,
        })?;
        std::fs::write(path, json).map_err(|e| ContextError::Io {
            path: path.display().to_string(),
            source: e,
        })
    }

    pub fn validate(&self) -> Result<(), ContextError> {
        if self.world_name.is_empty() {
            return Err(ContextError::InvalidConfig("world_name is empty".into()));
        }
        self.grid.validate()?;
        let culling = &self.culling;
        if culling.cull_distance <= 0.0 {
            return Err(ContextError::InvalidConfig(format!(
                "cull_distance {} is not positive",
                culling.cull_distance
            )));
        }
        if culling.hq_lightmap_distance < 0.0 || culling.mq_lightmap_distance < culling.hq_lightmap_distance {
            return Err(ContextError::InvalidConfig(format!(
                "light-map distances {} / {} are out of order",
                culling.hq_lightmap_distance, culling.mq_lightmap_distance
            )));
        }
        if self.cull_budget_ms <= 0.0 {
            return Err(ContextError::InvalidConfig("cull_budget_ms is not positive".into()));
        }
        self.stream.validate()?;
        self.terrain.validate()?;
        Ok(())
    }
}
