use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::AssetError;
use crate::paths::{AssetKind, AssetPath};

/// Read access to baked assets.
///
/// Implementations only move bytes; decoding lives in [`load_config`] so every
/// source reports parse failures the same way.
pub trait AssetSource: Send + Sync {
    fn read(&self, path: &AssetPath) -> Result<Vec<u8>, AssetError>;

    fn exists(&self, path: &AssetPath) -> bool;
}

/// Load and decode a JSON config asset.
pub fn load_config<T: DeserializeOwned>(
    source: &dyn AssetSource,
    path: &AssetPath,
) -> Result<T, AssetError> {
    let bytes = source.read(path)?;
    tracing::trace!(%path, bytes = bytes.len(), "loading config");
    serde_json::from_slice(&bytes).map_err(|e| AssetError::Json {
        path: path.to_string(),
        source: e,
    })
}

/// Assets stored under a root directory: configs as `<path>.json`, textures as
/// `<path>.bin`.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn file_path(&self, path: &AssetPath) -> PathBuf {
        let ext = match path.kind() {
            AssetKind::Config => "json",
            AssetKind::Texture => "bin",
        };
        self.root.join(format!("{}.{ext}", path.as_str()))
    }

    /// Write a config asset, creating parent directories.
    pub fn write_config<T: Serialize>(&self, path: &AssetPath, value: &T) -> Result<(), AssetError> {
        let file_path = self.file_path(path);
        create_parent(&file_path)?;
        let file = std::fs::File::create(&file_path).map_err(|e| io_error(&file_path, e))?;
        serde_json::to_writer_pretty(file, value).map_err(|e| AssetError::Json {
            path: path.to_string(),
            source: e,
        })
    }

    /// Write raw texture bytes, creating parent directories.
    pub fn write_bytes(&self, path: &AssetPath, bytes: &[u8]) -> Result<(), AssetError> {
        let file_path = self.file_path(path);
        create_parent(&file_path)?;
        std::fs::write(&file_path, bytes).map_err(|e| io_error(&file_path, e))
    }
}

impl AssetSource for DirectorySource {
    fn read(&self, path: &AssetPath) -> Result<Vec<u8>, AssetError> {
        let file_path = self.file_path(path);
        match std::fs::read(&file_path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AssetError::NotFound(path.to_string()))
            }
            Err(e) => Err(io_error(&file_path, e)),
        }
    }

    fn exists(&self, path: &AssetPath) -> bool {
        self.file_path(path).is_file()
    }
}

/// In-memory assets keyed by path, for tests and generated worlds.
#[derive(Debug, Default)]
pub struct MemorySource {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_bytes(&self, path: &AssetPath, bytes: Vec<u8>) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(path.as_str().to_string(), bytes);
        }
    }

    pub fn insert_config<T: Serialize>(&self, path: &AssetPath, value: &T) -> Result<(), AssetError> {
        let bytes = serde_json::to_vec(value).map_err(|e| AssetError::Json {
            path: path.to_string(),
            source: e,
        })?;
        self.insert_bytes(path, bytes);
        Ok(())
    }

    pub fn remove(&self, path: &AssetPath) -> bool {
        self.entries
            .write()
            .map(|mut entries| entries.remove(path.as_str()).is_some())
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AssetSource for MemorySource {
    fn read(&self, path: &AssetPath) -> Result<Vec<u8>, AssetError> {
        let entries = self.entries.read().map_err(|_| AssetError::Poisoned)?;
        entries
            .get(path.as_str())
            .cloned()
            .ok_or_else(|| AssetError::NotFound(path.to_string()))
    }

    fn exists(&self, path: &AssetPath) -> bool {
        self.entries
            .read()
            .map(|e| e.contains_key(path.as_str()))
            .unwrap_or(false)
    }
}

fn create_parent(file_path: &Path) -> Result<(), AssetError> {
    if let Some(parent) = file_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
    }
    Ok(())
}

fn io_error(path: &Path, source: std::io::Error) -> AssetError {
    AssetError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BlockConfig;
    use worldspace_common::{GridCoord, GridLevel};

    fn block_path() -> AssetPath {
        AssetPath::partition_config("w", GridLevel::Block, GridCoord::new(4, 5))
    }

    #[test]
    fn directory_write_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let source = DirectorySource::new(dir.path());
        let config = BlockConfig {
            batch_group_count: 2,
            hq_lightmap_count: 1,
            mq_lightmap_count: 1,
            lq_lightmap_count: 1,
        };
        source.write_config(&block_path(), &config).unwrap();
        assert!(source.exists(&block_path()));
        assert!(dir.path().join("w/block_4_5/config.json").is_file());

        let loaded: BlockConfig = load_config(&source, &block_path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn directory_missing_asset_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let source = DirectorySource::new(dir.path());
        let err = load_config::<BlockConfig>(&source, &block_path()).unwrap_err();
        assert!(matches!(err, AssetError::NotFound(_)));
    }

    #[test]
    fn malformed_config_is_json_error() {
        let source = MemorySource::new();
        source.insert_bytes(&block_path(), b"{ not json".to_vec());
        let err = load_config::<BlockConfig>(&source, &block_path()).unwrap_err();
        assert!(matches!(err, AssetError::Json { .. }));
    }

    #[test]
    fn memory_source_round_trip() {
        let source = MemorySource::new();
        source.insert_config(&block_path(), &BlockConfig::default()).unwrap();
        assert_eq!(source.len(), 1);
        let loaded: BlockConfig = load_config(&source, &block_path()).unwrap();
        assert_eq!(loaded, BlockConfig::default());
        assert!(source.remove(&block_path()));
        assert!(!source.exists(&block_path()));
    }
}
