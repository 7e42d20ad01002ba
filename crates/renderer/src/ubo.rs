//! Uniform buffer object written once per frame.
//!
//! The layout must match the vertex shader's uniform block at set 0,
//! binding 0. `#[repr(C)]` with `Pod` allows a direct byte copy into the
//! host-mapped buffer.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Model rotation speed in degrees per second.
pub const ROTATION_DEGREES_PER_SECOND: f32 = 90.0;

/// Eye position of the fixed camera.
pub const EYE: Vec3 = Vec3::new(2.0, 2.0, 2.0);

/// Vertical field of view in degrees.
pub const FOV_Y_DEGREES: f32 = 45.0;

pub const Z_NEAR: f32 = 0.1;
pub const Z_FAR: f32 = 10.0;

/// Model, view and projection matrices.
///
/// # Memory Layout
///
/// - Offset 0: model matrix (64 bytes)
/// - Offset 64: view matrix (64 bytes)
/// - Offset 128: projection matrix (64 bytes)
/// - Total size: 192 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct UniformBufferObject {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

impl UniformBufferObject {
    /// Size of the struct in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Matrices for `elapsed_secs` since startup at the given aspect ratio.
    ///
    /// The model spins about +Z, the camera looks at the origin from
    /// [`EYE`] with +Z up, and the projection's Y axis is flipped for
    /// Vulkan clip space.
    pub fn at_time(elapsed_secs: f32, aspect_ratio: f32) -> Self {
        let model = Mat4::from_rotation_z(elapsed_secs * ROTATION_DEGREES_PER_SECOND.to_radians());
        let view = Mat4::look_at_rh(EYE, Vec3::ZERO, Vec3::Z);

        let mut proj =
            Mat4::perspective_rh(FOV_Y_DEGREES.to_radians(), aspect_ratio, Z_NEAR, Z_FAR);
        proj.y_axis.y *= -1.0;

        Self { model, view, proj }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ubo_size() {
        // 3 Mat4 (3 * 64) = 192 bytes
        assert_eq!(UniformBufferObject::SIZE, 192);
    }

    #[test]
    fn test_ubo_alignment() {
        assert_eq!(std::mem::align_of::<UniformBufferObject>(), 16);
    }

    #[test]
    fn test_model_at_time_zero_is_identity() {
        let ubo = UniformBufferObject::at_time(0.0, 1.0);
        assert_eq!(ubo.model, Mat4::IDENTITY);
    }

    #[test]
    fn test_model_rotates_quarter_turn_per_second() {
        let ubo = UniformBufferObject::at_time(1.0, 1.0);
        let x = ubo.model.transform_vector3(Vec3::X);
        assert!((x - Vec3::Y).length() < 1e-5);
    }

    #[test]
    fn test_projection_flips_y() {
        let ubo = UniformBufferObject::at_time(0.0, 16.0 / 9.0);
        let unflipped = Mat4::perspective_rh(45.0_f32.to_radians(), 16.0 / 9.0, 0.1, 10.0);
        assert_eq!(ubo.proj.y_axis.y, -unflipped.y_axis.y);
        assert_eq!(ubo.proj.x_axis.x, unflipped.x_axis.x);
    }

    #[test]
    fn test_view_maps_origin_in_front_of_camera() {
        let ubo = UniformBufferObject::at_time(0.0, 1.0);
        let origin = ubo.view.transform_point3(Vec3::ZERO);
        assert!((origin.z + EYE.length()).abs() < 1e-5);
    }

    #[test]
    fn test_ubo_bytes() {
        let ubo = UniformBufferObject::at_time(0.5, 1.0);
        let bytes: &[u8] = bytemuck::bytes_of(&ubo);
        assert_eq!(bytes.len(), UniformBufferObject::SIZE);
    }
}
