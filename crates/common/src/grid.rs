use serde::{Deserialize, Serialize};

/// Errors raised when a grid configuration is inconsistent.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GridError {
    #[error("{level:?} cell size must be positive, got {size}")]
    NonPositiveCellSize { level: GridLevel, size: f32 },
    #[error("{coarse:?} cell size {coarse_size} is not a multiple of {fine:?} cell size {fine_size}")]
    NotNested {
        coarse: GridLevel,
        coarse_size: f32,
        fine: GridLevel,
        fine_size: f32,
    },
    #[error("row stride {row_stride} does not exceed the largest step index {max_index}")]
    RowStrideTooSmall { row_stride: i32, max_index: i32 },
    #[error("world size must be positive, got {0}")]
    NonPositiveWorldSize(f32),
}

/// The three nested grid resolutions, finest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GridLevel {
    Step,
    Block,
    Chunk,
}

impl GridLevel {
    /// Name used in asset paths (`block_3_4`, `chunk_0_1`, ...).
    pub fn path_prefix(self) -> &'static str {
        match self {
            GridLevel::Step => "cell",
            GridLevel::Block => "block",
            GridLevel::Chunk => "chunk",
        }
    }
}

/// `floor((world_pos - origin_offset) / cell_size)`.
///
/// Evaluated in f64 so that positions produced by [`to_world_pos`] map back
/// to the same cell even for cell sizes that are not powers of two.
pub fn to_grid_coord(world_pos: f32, cell_size: f32, origin_offset: f32) -> i32 {
    ((world_pos as f64 - origin_offset as f64) / cell_size as f64).floor() as i32
}

/// World position of the minimum corner of cell `coord`.
pub fn to_world_pos(coord: i32, cell_size: f32, origin_offset: f32) -> f32 {
    (coord as f64 * cell_size as f64 + origin_offset as f64) as f32
}

/// Canonical linear key of a 2D grid index.
pub fn linear_index(x: i32, z: i32, row_stride: i32) -> i32 {
    z * row_stride + x
}

/// Inverse of [`linear_index`] for non-negative coordinates.
pub fn from_linear_index(index: i32, row_stride: i32) -> (i32, i32) {
    (index % row_stride, index / row_stride)
}

/// A 2D cell coordinate at one grid resolution (Y is ignored for partitioning).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridCoord {
    pub x: i32,
    pub z: i32,
}

impl GridCoord {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }
}

impl std::fmt::Display for GridCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.x, self.z)
    }
}

/// Cell sizes and origin of the nested grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub step_size: f32,
    pub block_size: f32,
    pub chunk_size: f32,
    /// World-space position of cell (0, 0) at every level.
    pub origin_offset: f32,
    /// Edge length of the square world, starting at `origin_offset`.
    pub world_size: f32,
    /// Multiplier of `z` in the linear index; must exceed every index used.
    pub row_stride: i32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            step_size: 64.0,
            block_size: 256.0,
            chunk_size: 1024.0,
            origin_offset: -51200.0,
            world_size: 102400.0,
            row_stride: 2048,
        }
    }
}

impl GridConfig {
    pub fn validate(&self) -> Result<(), GridError> {
        for (level, size) in [
            (GridLevel::Step, self.step_size),
            (GridLevel::Block, self.block_size),
            (GridLevel::Chunk, self.chunk_size),
        ] {
            if !(size > 0.0) {
                return Err(GridError::NonPositiveCellSize { level, size });
            }
        }
        for (coarse, coarse_size, fine, fine_size) in [
            (GridLevel::Block, self.block_size, GridLevel::Step, self.step_size),
            (GridLevel::Chunk, self.chunk_size, GridLevel::Block, self.block_size),
        ] {
            let ratio = coarse_size / fine_size;
            if ratio < 1.0 || ratio.fract() != 0.0 {
                return Err(GridError::NotNested {
                    coarse,
                    coarse_size,
                    fine,
                    fine_size,
                });
            }
        }
        if !(self.world_size > 0.0) {
            return Err(GridError::NonPositiveWorldSize(self.world_size));
        }
        let max_index = (self.world_size / self.step_size).ceil() as i32 - 1;
        if self.row_stride <= max_index {
            return Err(GridError::RowStrideTooSmall {
                row_stride: self.row_stride,
                max_index,
            });
        }
        Ok(())
    }
}

/// Validated three-level grid shared by every partition and terrain component.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    config: GridConfig,
}

impl Grid {
    pub fn new(config: GridConfig) -> Result<Self, GridError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    pub fn cell_size(&self, level: GridLevel) -> f32 {
        match level {
            GridLevel::Step => self.config.step_size,
            GridLevel::Block => self.config.block_size,
            GridLevel::Chunk => self.config.chunk_size,
        }
    }

    pub fn origin_offset(&self) -> f32 {
        self.config.origin_offset
    }

    /// Number of `fine` cells along one edge of a `coarse` cell.
    pub fn subdivisions(&self, coarse: GridLevel, fine: GridLevel) -> i32 {
        (self.cell_size(coarse) / self.cell_size(fine)).round() as i32
    }

    /// Cell index along one axis.
    pub fn axis_coord(&self, level: GridLevel, world_pos: f32) -> i32 {
        to_grid_coord(world_pos, self.cell_size(level), self.config.origin_offset)
    }

    /// World position of the minimum edge of cell `coord` along one axis.
    pub fn axis_world_pos(&self, level: GridLevel, coord: i32) -> f32 {
        to_world_pos(coord, self.cell_size(level), self.config.origin_offset)
    }

    /// Convert a world position to a cell coordinate (XZ plane).
    pub fn position_to_cell(&self, level: GridLevel, pos: glam::Vec3) -> GridCoord {
        GridCoord {
            x: self.axis_coord(level, pos.x),
            z: self.axis_coord(level, pos.z),
        }
    }

    /// Minimum corner of a cell in world space, returned as (x, z).
    pub fn cell_origin(&self, level: GridLevel, coord: GridCoord) -> glam::Vec2 {
        glam::Vec2::new(
            self.axis_world_pos(level, coord.x),
            self.axis_world_pos(level, coord.z),
        )
    }

    pub fn index(&self, coord: GridCoord) -> i32 {
        linear_index(coord.x, coord.z, self.config.row_stride)
    }

    pub fn coord_from_index(&self, index: i32) -> GridCoord {
        let (x, z) = from_linear_index(index, self.config.row_stride);
        GridCoord { x, z }
    }

    /// Number of cells along one edge of the world at `level`.
    pub fn cells_per_axis(&self, level: GridLevel) -> i32 {
        (self.config.world_size / self.cell_size(level)).ceil() as i32
    }

    /// Whether `coord` lies inside the world at `level`.
    pub fn contains(&self, level: GridLevel, coord: GridCoord) -> bool {
        let n = self.cells_per_axis(level);
        (0..n).contains(&coord.x) && (0..n).contains(&coord.z)
    }

    /// All in-world cells within a square radius of `center`, row by row.
    pub fn cells_in_radius(&self, level: GridLevel, center: GridCoord, radius: i32) -> Vec<GridCoord> {
        let mut result = Vec::with_capacity(((2 * radius + 1) * (2 * radius + 1)) as usize);
        for dz in -radius..=radius {
            for dx in -radius..=radius {
                let coord = GridCoord::new(center.x + dx, center.z + dz);
                if self.contains(level, coord) {
                    result.push(coord);
                }
            }
        }
        result
    }
}

impl Default for Grid {
    fn default() -> Self {
        Self {
            config: GridConfig::default(),
        }
    }
}
