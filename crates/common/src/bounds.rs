//! Axis-aligned bounds and frustum plane tests.

use glam::{Mat4, Vec3, Vec4};
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box stored as center + half extents.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Aabb {
    pub center: Vec3,
    pub extents: Vec3,
}

impl Aabb {
    pub fn new(center: Vec3, extents: Vec3) -> Self {
        Self { center, extents }
    }

    pub fn from_min_max(min: Vec3, max: Vec3) -> Self {
        Self {
            center: (min + max) * 0.5,
            extents: (max - min) * 0.5,
        }
    }

    pub fn min(&self) -> Vec3 {
        self.center - self.extents
    }

    pub fn max(&self) -> Vec3 {
        self.center + self.extents
    }

    /// Smallest box containing both.
    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb::from_min_max(self.min().min(other.min()), self.max().max(other.max()))
    }

    /// Overlap test on the XZ plane only. Touching edges count as overlapping.
    pub fn intersects_xz(&self, other: &Aabb) -> bool {
        let (a_min, a_max) = (self.min(), self.max());
        let (b_min, b_max) = (other.min(), other.max());
        a_min.x <= b_max.x && a_max.x >= b_min.x && a_min.z <= b_max.z && a_max.z >= b_min.z
    }
}

/// A culling plane in Hessian normal form. Points with a positive signed
/// distance are on the inner side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Plane {
    pub normal: Vec3,
    pub distance: f32,
}

impl Plane {
    pub fn new(normal: Vec3, distance: f32) -> Self {
        Self { normal, distance }
    }

    pub fn signed_distance(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.distance
    }

    fn from_row(r: Vec4) -> Self {
        let normal = Vec3::new(r.x, r.y, r.z);
        let len = normal.length();
        if len > 0.0 {
            Self {
                normal: normal / len,
                distance: r.w / len,
            }
        } else {
            Self {
                normal: Vec3::ZERO,
                distance: 0.0,
            }
        }
    }
}

/// Result of a box-vs-planes test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intersection {
    Out,
    Partial,
    In,
}

/// Test a box against an arbitrary set of culling planes.
pub fn intersect_planes(planes: &[Plane], aabb: &Aabb) -> Intersection {
    let mut fully_inside = true;
    for plane in planes {
        let center_distance = plane.signed_distance(aabb.center);
        let radius = plane.normal.abs().dot(aabb.extents);
        if center_distance + radius < 0.0 {
            return Intersection::Out;
        }
        if center_distance - radius < 0.0 {
            fully_inside = false;
        }
    }
    if fully_inside {
        Intersection::In
    } else {
        Intersection::Partial
    }
}

/// Six planes (left, right, bottom, top, near, far) of a view frustum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Extract planes from a view-projection matrix (Gribb/Hartmann), for a
    /// 0..1 depth range projection such as `Mat4::perspective_rh`.
    pub fn from_view_projection(vp: &Mat4) -> Self {
        let rows = [vp.row(0), vp.row(1), vp.row(2), vp.row(3)];
        Self {
            planes: [
                Plane::from_row(rows[3] + rows[0]),
                Plane::from_row(rows[3] - rows[0]),
                Plane::from_row(rows[3] + rows[1]),
                Plane::from_row(rows[3] - rows[1]),
                Plane::from_row(rows[2]),
                Plane::from_row(rows[3] - rows[2]),
            ],
        }
    }

    pub fn intersect(&self, aabb: &Aabb) -> Intersection {
        intersect_planes(&self.planes, aabb)
    }
}
