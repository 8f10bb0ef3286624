//! Transform of a scene object

use glam::{Mat4, Quat, Vec3};

/// Transform for positioning objects in 3D space
#[derive(Debug, Clone, Copy, PartialEq)]
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
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    /// Get the model matrix for this transform
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }

    /// Map a local-space point to world space
    pub fn transform_point(&self, point: Vec3) -> Vec3 {
        self.position + self.rotation * (self.scale * point)
    }

    /// Map a world-space point into this transform's local space
    pub fn inverse_transform_point(&self, point: Vec3) -> Vec3 {
        let local = self.rotation.inverse() * (point - self.position);
        local / self.scale
    }

    /// Rotate around an axis
    pub fn rotate_axis(&mut self, axis: Vec3, angle: f32) {
        let delta = Quat::from_axis_angle(axis, angle);
        self.rotation = delta * self.rotation;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inverse_transform_point_undoes_transform() {
        let transform = Transform {
            position: Vec3::new(10.0, -5.0, 3.0),
            rotation: Quat::from_rotation_z(std::f32::consts::FRAC_PI_2),
            scale: Vec3::new(2.0, 2.0, 1.0),
        };
        let local = Vec3::new(1.0, 2.0, 3.0);
        let world = transform.transform_point(local);
        assert!(transform.inverse_transform_point(world).abs_diff_eq(local, 1e-4));
        assert!(transform.matrix().transform_point3(local).abs_diff_eq(world, 1e-4));
    }

    #[test]
    fn test_rotation_about_z() {
        let mut transform = Transform::from_position(Vec3::X * 100.0);
        transform.rotate_axis(Vec3::Z, std::f32::consts::FRAC_PI_2);
        // Local +X points along world +Y after the rotation
        let local = transform.inverse_transform_point(Vec3::new(100.0, 1.0, 0.0));
        assert!(local.abs_diff_eq(Vec3::X, 1e-5));
    }
}
