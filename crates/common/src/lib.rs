//! Shared types for the worldspace runtime.
//!
//! # Invariants
//! - Every resolution of the grid shares one origin offset.
//! - Coarser cell sizes are integer multiples of finer ones.

pub mod bounds;
pub mod grid;
pub mod types;

pub use bounds::{Aabb, Frustum, Intersection, Plane, intersect_planes};
pub use grid::{
    Grid, GridConfig, GridCoord, GridError, GridLevel, from_linear_index, linear_index,
    to_grid_coord, to_world_pos,
};
pub use types::{PackedMatrix, Transform};

pub fn crate_info() -> &'static str {
    "worldspace-common v0.1.0"
}
