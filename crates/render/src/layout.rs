//! Instance buffer layout and shader metadata.
//!
//! A buffer starts with a zeroed header the size of two packed matrices,
//! followed by one region per field. Region `k` holds `instance_count`
//! elements and starts at the end of region `k - 1` rounded up to 4 bytes.

use std::ops::Range;

use worldspace_common::PackedMatrix;

/// High bit of a metadata value: the offset addresses per-instance data.
pub const PER_INSTANCE_FLAG: u32 = 0x8000_0000;

/// Zeroed bytes at the start of every instance buffer.
pub const HEADER_SIZE: usize = PackedMatrix::SIZE * 2;

pub const OBJECT_TO_WORLD: &str = "unity_ObjectToWorld";
pub const LIGHTMAP_ST: &str = "_LightmapST";
pub const LIGHTMAP_INDEX: &str = "_LightmapIndex";
pub const LIGHTMAP_AMOUNT: &str = "_LightmapAmount";

/// Name and element size of one per-instance field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub element_size: usize,
}

/// Object batches: transform, light-map scale-offset, light-map layer.
pub const OBJECT_FIELDS: [FieldSpec; 3] = [
    FieldSpec {
        name: OBJECT_TO_WORLD,
        element_size: PackedMatrix::SIZE,
    },
    FieldSpec {
        name: LIGHTMAP_ST,
        element_size: 16,
    },
    FieldSpec {
        name: LIGHTMAP_INDEX,
        element_size: 4,
    },
];

/// Terrain batches add a light-map blend amount.
pub const TERRAIN_FIELDS: [FieldSpec; 4] = [
    OBJECT_FIELDS[0],
    OBJECT_FIELDS[1],
    OBJECT_FIELDS[2],
    FieldSpec {
        name: LIGHTMAP_AMOUNT,
        element_size: 4,
    },
];

/// Shader property binding handed to the host renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataEntry {
    pub name: &'static str,
    pub value: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    #[error("field {name} has zero stride")]
    ZeroStride { name: &'static str },
    #[error("field {name} offset {offset} is not 4-byte aligned")]
    Misaligned { name: &'static str, offset: usize },
    #[error("field {name} at {offset} overlaps the preceding data ending at {previous_end}")]
    Overlap {
        name: &'static str,
        offset: usize,
        previous_end: usize,
    },
    #[error("field {name} ends at {end}, past the buffer size {size}")]
    PastEnd {
        name: &'static str,
        end: usize,
        size: usize,
    },
    #[error("field {0} declared twice")]
    Duplicate(&'static str),
    #[error("no field named {0}")]
    UnknownField(&'static str),
    #[error("field {name} expects {expected}-byte elements, got {actual}")]
    ElementSize {
        name: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{count} values exceed the {capacity} instances of field {name}")]
    TooManyValues {
        name: &'static str,
        count: usize,
        capacity: usize,
    },
    #[error("buffer size {max} cannot hold one instance")]
    BufferTooSmall { max: usize },
}

/// Location of one field inside a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutField {
    pub name: &'static str,
    pub offset: usize,
    pub stride: usize,
}

/// Validated field layout of one instance buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferLayout {
    fields: Vec<LayoutField>,
    instance_count: usize,
    size: usize,
}

const fn align4(n: usize) -> usize {
    (n + 3) & !3
}

/// Bytes one instance adds to a buffer, counting region alignment.
pub fn instance_stride(fields: &[FieldSpec]) -> usize {
    fields.iter().map(|f| align4(f.element_size)).sum()
}

/// Largest instance count whose buffer fits in `max_buffer_size`.
pub fn max_instances_per_buffer(fields: &[FieldSpec], max_buffer_size: usize) -> Result<usize, LayoutError> {
    let stride = instance_stride(fields);
    let count = max_buffer_size.saturating_sub(HEADER_SIZE) / stride.max(1);
    if count == 0 {
        return Err(LayoutError::BufferTooSmall { max: max_buffer_size });
    }
    Ok(count)
}

impl BufferLayout {
    /// Pack `fields` back to back after the header.
    pub fn new(fields: &[FieldSpec], instance_count: usize) -> Result<Self, LayoutError> {
        let mut offset = HEADER_SIZE;
        let mut placed = Vec::with_capacity(fields.len());
        for field in fields {
            offset = align4(offset);
            placed.push(LayoutField {
                name: field.name,
                offset,
                stride: field.element_size,
            });
            offset += field.element_size * instance_count;
        }
        Self::from_parts(placed, instance_count, align4(offset))
    }

    /// Accept an externally declared layout after checking it against the
    /// buffer size.
    pub fn from_parts(fields: Vec<LayoutField>, instance_count: usize, size: usize) -> Result<Self, LayoutError> {
        let layout = Self {
            fields,
            instance_count,
            size,
        };
        layout.validate()?;
        Ok(layout)
    }

    pub fn validate(&self) -> Result<(), LayoutError> {
        let mut previous_end = HEADER_SIZE;
        for (i, field) in self.fields.iter().enumerate() {
            if self.fields[..i].iter().any(|f| f.name == field.name) {
                return Err(LayoutError::Duplicate(field.name));
            }
            if field.stride == 0 {
                return Err(LayoutError::ZeroStride { name: field.name });
            }
            if field.offset % 4 != 0 {
                return Err(LayoutError::Misaligned {
                    name: field.name,
                    offset: field.offset,
                });
            }
            if field.offset < previous_end {
                return Err(LayoutError::Overlap {
                    name: field.name,
                    offset: field.offset,
                    previous_end,
                });
            }
            let end = field.offset + field.stride * self.instance_count;
            if end > self.size {
                return Err(LayoutError::PastEnd {
                    name: field.name,
                    end,
                    size: self.size,
                });
            }
            previous_end = end;
        }
        Ok(())
    }

    pub fn fields(&self) -> &[LayoutField] {
        &self.fields
    }

    pub fn instance_count(&self) -> usize {
        self.instance_count
    }

    /// Total buffer size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn field(&self, name: &'static str) -> Result<&LayoutField, LayoutError> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .ok_or(LayoutError::UnknownField(name))
    }

    /// Byte range covered by the field's region.
    pub fn range(&self, name: &'static str) -> Result<Range<usize>, LayoutError> {
        let field = self.field(name)?;
        Ok(field.offset..field.offset + field.stride * self.instance_count)
    }

    /// Shader bindings: each field's offset with [`PER_INSTANCE_FLAG`] set.
    pub fn metadata(&self) -> Vec<MetadataEntry> {
        self.fields
            .iter()
            .map(|f| MetadataEntry {
                name: f.name,
                value: PER_INSTANCE_FLAG | f.offset as u32,
            })
            .collect()
    }
}

/// Fills a zeroed buffer region by region.
#[derive(Debug)]
pub struct InstanceWriter<'l> {
    layout: &'l BufferLayout,
    bytes: Vec<u8>,
}

impl<'l> InstanceWriter<'l> {
    pub fn new(layout: &'l BufferLayout) -> Self {
        Self {
            layout,
            bytes: vec![0; layout.size()],
        }
    }

    /// Copy `values` into the start of the named region.
    pub fn write<T: bytemuck::Pod>(&mut self, name: &'static str, values: &[T]) -> Result<(), LayoutError> {
        let range = field_bytes_range(self.layout, name, values)?;
        self.bytes[range].copy_from_slice(bytemuck::cast_slice(values));
        Ok(())
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Byte range `values` would occupy at the start of the named region.
pub fn field_bytes_range<T: bytemuck::Pod>(
    layout: &BufferLayout,
    name: &'static str,
    values: &[T],
) -> Result<Range<usize>, LayoutError> {
    let field = layout.field(name)?;
    let size = std::mem::size_of::<T>();
    if size != field.stride {
        return Err(LayoutError::ElementSize {
            name,
            expected: field.stride,
            actual: size,
        });
    }
    if values.len() > layout.instance_count() {
        return Err(LayoutError::TooManyValues {
            name,
            count: values.len(),
            capacity: layout.instance_count(),
        });
    }
    Ok(field.offset..field.offset + size * values.len())
}
