//! Host renderer interface and a headless implementation.
//!
//! The core never talks to a graphics API directly. Hosts implement
//! [`GpuDevice`] as a thin adapter; [`HeadlessDevice`] keeps everything in
//! memory so layouts and resource lifetimes can be checked without a GPU.

use std::collections::BTreeMap;

use crate::RenderError;
use crate::layout::MetadataEntry;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);
    };
}

handle!(
    /// Raw instance data buffer.
    BufferHandle
);
handle!(
    /// Mesh registration.
    MeshHandle
);
handle!(
    /// Material registration.
    MaterialHandle
);
handle!(
    /// Per-draw batch: a buffer plus its shader metadata.
    BatchHandle
);
handle!(
    /// Texture array.
    TextureHandle
);

/// Shape of a texture array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub layers: u32,
}

/// Operations the core needs from the host renderer.
///
/// Every `create`/`register`/`add` is paired with exactly one
/// `destroy`/`unregister`/`remove`, issued from the render thread.
pub trait GpuDevice {
    /// Largest buffer the device accepts, in bytes.
    fn max_buffer_size(&self) -> usize;

    fn create_buffer(&mut self, size: usize) -> Result<BufferHandle, RenderError>;

    /// Overwrite `data.len()` bytes starting at `offset`.
    fn write_buffer(&mut self, buffer: BufferHandle, offset: usize, data: &[u8]) -> Result<(), RenderError>;

    fn destroy_buffer(&mut self, buffer: BufferHandle);

    fn create_texture_array(&mut self, desc: TextureDesc) -> Result<TextureHandle, RenderError>;

    fn write_texture_layer(&mut self, texture: TextureHandle, layer: u32, data: &[u8]) -> Result<(), RenderError>;

    fn destroy_texture(&mut self, texture: TextureHandle);

    fn register_mesh(&mut self, name: &str) -> Result<MeshHandle, RenderError>;

    fn unregister_mesh(&mut self, mesh: MeshHandle);

    fn register_material(
        &mut self,
        name: &str,
        lightmaps: Option<TextureHandle>,
    ) -> Result<MaterialHandle, RenderError>;

    fn unregister_material(&mut self, material: MaterialHandle);

    fn add_batch(&mut self, buffer: BufferHandle, metadata: &[MetadataEntry]) -> Result<BatchHandle, RenderError>;

    fn remove_batch(&mut self, batch: BatchHandle);
}

/// Live resource counts of a [`HeadlessDevice`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceCounts {
    pub buffers: usize,
    pub textures: usize,
    pub meshes: usize,
    pub materials: usize,
    pub batches: usize,
}

impl ResourceCounts {
    pub fn is_empty(&self) -> bool {
        *self == ResourceCounts::default()
    }
}

/// Upload counters of a [`HeadlessDevice`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadStats {
    pub buffer_writes: usize,
    pub buffer_bytes: usize,
    pub texture_writes: usize,
}

#[derive(Debug)]
struct HeadlessTexture {
    desc: TextureDesc,
    layers: Vec<Option<Vec<u8>>>,
}

#[derive(Debug)]
struct HeadlessBatch {
    buffer: BufferHandle,
    metadata: Vec<MetadataEntry>,
}

/// In-memory device. Buffers keep their bytes so tests can read them back;
/// releasing an unknown handle is counted instead of ignored.
///
/// [`HeadlessDevice::fail_after`] makes every fallible call past a given
/// count return [`RenderError::Device`], to exercise rollback paths.
#[derive(Debug)]
pub struct HeadlessDevice {
    max_buffer_size: usize,
    next_id: u32,
    calls: usize,
    fail_after: Option<usize>,
    buffers: BTreeMap<u32, Vec<u8>>,
    textures: BTreeMap<u32, HeadlessTexture>,
    meshes: BTreeMap<u32, String>,
    materials: BTreeMap<u32, (String, Option<TextureHandle>)>,
    batches: BTreeMap<u32, HeadlessBatch>,
    uploads: UploadStats,
    invalid_releases: usize,
}

impl HeadlessDevice {
    pub fn new(max_buffer_size: usize) -> Self {
        Self {
            max_buffer_size,
            next_id: 1,
            calls: 0,
            fail_after: None,
            buffers: BTreeMap::new(),
            textures: BTreeMap::new(),
            meshes: BTreeMap::new(),
            materials: BTreeMap::new(),
            batches: BTreeMap::new(),
            uploads: UploadStats::default(),
            invalid_releases: 0,
        }
    }

    fn next(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn buffer_bytes(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer.0).map(Vec::as_slice)
    }

    pub fn texture_layer(&self, texture: TextureHandle, layer: u32) -> Option<&[u8]> {
        self.textures
            .get(&texture.0)
            .and_then(|t| t.layers.get(layer as usize))
            .and_then(|l| l.as_deref())
    }

    pub fn texture_desc(&self, texture: TextureHandle) -> Option<TextureDesc> {
        self.textures.get(&texture.0).map(|t| t.desc)
    }

    pub fn batch_metadata(&self, batch: BatchHandle) -> Option<&[MetadataEntry]> {
        self.batches.get(&batch.0).map(|b| b.metadata.as_slice())
    }

    pub fn batch_buffer(&self, batch: BatchHandle) -> Option<BufferHandle> {
        self.batches.get(&batch.0).map(|b| b.buffer)
    }

    pub fn mesh_name(&self, mesh: MeshHandle) -> Option<&str> {
        self.meshes.get(&mesh.0).map(String::as_str)
    }

    pub fn material_lightmaps(&self, material: MaterialHandle) -> Option<Option<TextureHandle>> {
        self.materials.get(&material.0).map(|(_, lm)| *lm)
    }

    pub fn live_resources(&self) -> ResourceCounts {
        ResourceCounts {
            buffers: self.buffers.len(),
            textures: self.textures.len(),
            meshes: self.meshes.len(),
            materials: self.materials.len(),
            batches: self.batches.len(),
        }
    }

    pub fn uploads(&self) -> UploadStats {
        self.uploads
    }

    pub fn reset_upload_stats(&mut self) {
        self.uploads = UploadStats::default();
    }

    /// Number of release calls that named a handle not currently alive.
    pub fn invalid_releases(&self) -> usize {
        self.invalid_releases
    }

    /// Let `calls` more fallible calls succeed, then fail every one after.
    pub fn fail_after(&mut self, calls: usize) {
        self.fail_after = Some(self.calls + calls);
    }

    pub fn clear_failure(&mut self) {
        self.fail_after = None;
    }

    /// Fallible calls made so far, including failed ones.
    pub fn call_count(&self) -> usize {
        self.calls
    }

    fn call(&mut self, op: &str) -> Result<(), RenderError> {
        let index = self.calls;
        self.calls += 1;
        match self.fail_after {
            Some(limit) if index >= limit => {
                tracing::debug!(op, index, "injected device failure");
                Err(RenderError::Device(format!("{op} failed")))
            }
            _ => Ok(()),
        }
    }

    fn release<T>(map: &mut BTreeMap<u32, T>, id: u32, kind: &str, invalid: &mut usize) {
        if map.remove(&id).is_none() {
            tracing::error!(id, kind, "release of unknown handle");
            *invalid += 1;
        }
    }
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new(crate::DEFAULT_MAX_BUFFER_SIZE)
    }
}

impl GpuDevice for HeadlessDevice {
    fn max_buffer_size(&self) -> usize {
        self.max_buffer_size
    }

    fn create_buffer(&mut self, size: usize) -> Result<BufferHandle, RenderError> {
        self.call("create_buffer")?;
        if size == 0 {
            return Err(RenderError::ZeroSizedBuffer);
        }
        if size > self.max_buffer_size {
            return Err(RenderError::BufferTooLarge {
                size,
                max: self.max_buffer_size,
            });
        }
        let id = self.next();
        self.buffers.insert(id, vec![0; size]);
        Ok(BufferHandle(id))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: usize, data: &[u8]) -> Result<(), RenderError> {
        self.call("write_buffer")?;
        let bytes = self
            .buffers
            .get_mut(&buffer.0)
            .ok_or(RenderError::UnknownBuffer(buffer))?;
        let end = offset + data.len();
        if end > bytes.len() {
            return Err(RenderError::WriteOutOfBounds {
                offset,
                len: data.len(),
                size: bytes.len(),
            });
        }
        bytes[offset..end].copy_from_slice(data);
        self.uploads.buffer_writes += 1;
        self.uploads.buffer_bytes += data.len();
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        Self::release(&mut self.buffers, buffer.0, "buffer", &mut self.invalid_releases);
    }

    fn create_texture_array(&mut self, desc: TextureDesc) -> Result<TextureHandle, RenderError> {
        self.call("create_texture_array")?;
        let id = self.next();
        self.textures.insert(
            id,
            HeadlessTexture {
                desc,
                layers: vec![None; desc.layers as usize],
            },
        );
        Ok(TextureHandle(id))
    }

    fn write_texture_layer(&mut self, texture: TextureHandle, layer: u32, data: &[u8]) -> Result<(), RenderError> {
        self.call("write_texture_layer")?;
        let tex = self
            .textures
            .get_mut(&texture.0)
            .ok_or(RenderError::UnknownTexture(texture))?;
        let slot = tex
            .layers
            .get_mut(layer as usize)
            .ok_or(RenderError::LayerOutOfRange {
                layer,
                layers: tex.desc.layers,
            })?;
        *slot = Some(data.to_vec());
        self.uploads.texture_writes += 1;
        Ok(())
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        Self::release(&mut self.textures, texture.0, "texture", &mut self.invalid_releases);
    }

    fn register_mesh(&mut self, name: &str) -> Result<MeshHandle, RenderError> {
        self.call("register_mesh")?;
        let id = self.next();
        self.meshes.insert(id, name.to_string());
        Ok(MeshHandle(id))
    }

    fn unregister_mesh(&mut self, mesh: MeshHandle) {
        Self::release(&mut self.meshes, mesh.0, "mesh", &mut self.invalid_releases);
    }

    fn register_material(
        &mut self,
        name: &str,
        lightmaps: Option<TextureHandle>,
    ) -> Result<MaterialHandle, RenderError> {
        self.call("register_material")?;
        if let Some(texture) = lightmaps {
            if !self.textures.contains_key(&texture.0) {
                return Err(RenderError::UnknownTexture(texture));
            }
        }
        let id = self.next();
        self.materials.insert(id, (name.to_string(), lightmaps));
        Ok(MaterialHandle(id))
    }

    fn unregister_material(&mut self, material: MaterialHandle) {
        Self::release(&mut self.materials, material.0, "material", &mut self.invalid_releases);
    }

    fn add_batch(&mut self, buffer: BufferHandle, metadata: &[MetadataEntry]) -> Result<BatchHandle, RenderError> {
        self.call("add_batch")?;
        if !self.buffers.contains_key(&buffer.0) {
            return Err(RenderError::UnknownBuffer(buffer));
        }
        let id = self.next();
        self.batches.insert(
            id,
            HeadlessBatch {
                buffer,
                metadata: metadata.to_vec(),
            },
        );
        Ok(BatchHandle(id))
    }

    fn remove_batch(&mut self, batch: BatchHandle) {
        Self::release(&mut self.batches, batch.0, "batch", &mut self.invalid_releases);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_write_and_read_back() {
        let mut device = HeadlessDevice::new(1024);
        let buffer = device.create_buffer(16).unwrap();
        device.write_buffer(buffer, 4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(device.buffer_bytes(buffer).unwrap()[..8], [0, 0, 0, 0, 1, 2, 3, 4]);
        assert_eq!(device.uploads().buffer_bytes, 4);
    }

    #[test]
    fn rejects_zero_and_oversized_buffers() {
        let mut device = HeadlessDevice::new(64);
        assert!(matches!(device.create_buffer(0), Err(RenderError::ZeroSizedBuffer)));
        assert!(matches!(
            device.create_buffer(65),
            Err(RenderError::BufferTooLarge { size: 65, max: 64 })
        ));
    }

    #[test]
    fn write_past_end_fails() {
        let mut device = HeadlessDevice::new(64);
        let buffer = device.create_buffer(8).unwrap();
        assert!(matches!(
            device.write_buffer(buffer, 6, &[0; 4]),
            Err(RenderError::WriteOutOfBounds { .. })
        ));
    }

    #[test]
    fn double_release_is_counted() {
        let mut device = HeadlessDevice::new(64);
        let buffer = device.create_buffer(8).unwrap();
        device.destroy_buffer(buffer);
        assert_eq!(device.invalid_releases(), 0);
        device.destroy_buffer(buffer);
        assert_eq!(device.invalid_releases(), 1);
        assert!(device.live_resources().is_empty());
    }

    #[test]
    fn injected_failure_after_call_count() {
        let mut device = HeadlessDevice::new(64);
        device.create_buffer(8).unwrap();
        device.fail_after(1);
        let buffer = device.create_buffer(8).unwrap();
        assert!(matches!(device.write_buffer(buffer, 0, &[1]), Err(RenderError::Device(_))));
        assert!(matches!(device.register_mesh("m"), Err(RenderError::Device(_))));
        assert_eq!(device.call_count(), 4);
        assert_eq!(device.live_resources().buffers, 2);

        device.clear_failure();
        device.write_buffer(buffer, 0, &[1]).unwrap();
    }

    #[test]
    fn texture_layers() {
        let mut device = HeadlessDevice::new(64);
        let tex = device
            .create_texture_array(TextureDesc {
                width: 2,
                height: 2,
                layers: 2,
            })
            .unwrap();
        device.write_texture_layer(tex, 1, &[9; 16]).unwrap();
        assert!(device.texture_layer(tex, 0).is_none());
        assert_eq!(device.texture_layer(tex, 1).unwrap().len(), 16);
        assert!(matches!(
            device.write_texture_layer(tex, 2, &[0; 16]),
            Err(RenderError::LayerOutOfRange { layer: 2, layers: 2 })
        ));
    }
}
