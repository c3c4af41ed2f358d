use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Spatial transform: position, rotation, scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }
}

/// Object-to-world matrix without its constant `[0, 0, 0, 1]` bottom row:
/// the xyz of each of the four columns, 48 bytes.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Default, Pod, Zeroable)]
pub struct PackedMatrix {
    pub cols: [[f32; 3]; 4],
}

impl PackedMatrix {
    pub const SIZE: usize = std::mem::size_of::<PackedMatrix>();

    pub fn from_mat4(m: &Mat4) -> Self {
        Self {
            cols: [
                m.x_axis.truncate().to_array(),
                m.y_axis.truncate().to_array(),
                m.z_axis.truncate().to_array(),
                m.w_axis.truncate().to_array(),
            ],
        }
    }

    pub fn to_mat4(&self) -> Mat4 {
        Mat4::from_cols(
            Vec3::from_array(self.cols[0]).extend(0.0),
            Vec3::from_array(self.cols[1]).extend(0.0),
            Vec3::from_array(self.cols[2]).extend(0.0),
            Vec3::from_array(self.cols[3]).extend(1.0),
        )
    }
}

impl From<&Transform> for PackedMatrix {
    fn from(t: &Transform) -> Self {
        Self::from_mat4(&t.to_matrix())
    }
}
