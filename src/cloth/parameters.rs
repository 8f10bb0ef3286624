//! Per-mesh simulation constants shared with the GPU

use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};

/// Maximum number of meshes simulated by one batched dispatch
pub const MAX_CLOTH_MESH: usize = 16;

/// Maximum number of sphere colliders a single mesh collides with
pub const MAX_SPHERE_COLLISION_PER_MESH: usize = 16;

/// Reference rate (Hz) at which stored coefficients apply exactly once per step
pub const BASE_FREQUENCY: f32 = 60.0;

/// Gravity in cm/s²
pub const GRAVITY: Vec3 = Vec3::new(0.0, 0.0, -980.0);

/// Largest linear coefficient accepted before conversion to log space
pub const MAX_LINEAR_COEFFICIENT: f32 = 0.9999;

/// Convert a per-step coefficient `x` in `[0, 1)` to its log-space form `ln(1 - x)`.
pub fn to_log_space(x: f32) -> f32 {
    (1.0 - x.clamp(0.0, MAX_LINEAR_COEFFICIENT)).ln()
}

/// Re-linearize a log-space coefficient for a step that is `exponent` reference steps long.
///
/// At `exponent == 1` this returns the original coefficient.
pub fn relinearize(log_value: f32, exponent: f32) -> f32 {
    1.0 - (log_value * exponent).exp()
}

/// Sphere collider in a mesh's local space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SphereCollisionParams {
    pub center: Vec3,
    pub radius: f32,
}

impl SphereCollisionParams {
    pub fn to_vec4(&self) -> Vec4 {
        self.center.extend(self.radius)
    }
}

/// One frame's simulation constants for one mesh.
///
/// Layout matches `ClothParameters` in the simulation shader (352 bytes, 16-byte aligned).
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ClothParameterBlock {
    pub num_iteration: u32,
    pub num_row: u32,
    pub num_column: u32,
    pub vertex_index_offset: u32,
    pub num_vertex: u32,
    pub grid_width: f32,
    pub grid_height: f32,
    pub stiffness: f32,
    pub damping: f32,
    pub fluid_density: f32,
    pub lift_coefficient: f32,
    pub drag_coefficient: f32,
    /// xyz used, w = 0
    pub previous_inertia: Vec4,
    /// xyz used, w = 0
    pub wind_velocity: Vec4,
    pub iter_delta_time: f32,
    pub vertex_radius: f32,
    pub num_sphere_collision: u32,
    pub _padding: u32,
    /// xyz = center, w = radius
    pub sphere_collision_params: [Vec4; MAX_SPHERE_COLLISION_PER_MESH],
}

const _: () = assert!(std::mem::size_of::<ClothParameterBlock>() == 352);

impl Default for ClothParameterBlock {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl ClothParameterBlock {
    pub fn previous_inertia(&self) -> Vec3 {
        self.previous_inertia.truncate()
    }

    pub fn wind_velocity(&self) -> Vec3 {
        self.wind_velocity.truncate()
    }

    /// Active sphere colliders
    pub fn sphere_collisions(&self) -> &[Vec4] {
        let count = (self.num_sphere_collision as usize).min(MAX_SPHERE_COLLISION_PER_MESH);
        &self.sphere_collision_params[..count]
    }

    /// Fill the collider array, truncating to `MAX_SPHERE_COLLISION_PER_MESH`.
    ///
    /// Slots past the written count are left untouched. Returns the number written.
    pub fn set_sphere_collisions<I>(&mut self, spheres: I) -> usize
    where
        I: IntoIterator<Item = SphereCollisionParams>,
    {
        let mut count = 0;
        for (slot, sphere) in self
            .sphere_collision_params
            .iter_mut()
            .zip(spheres.into_iter())
        {
            *slot = sphere.to_vec4();
            count += 1;
        }
        self.num_sphere_collision = count as u32;
        count
    }

    /// Vertex range this mesh occupies in the merged working buffers
    pub fn vertex_range(&self) -> std::ops::Range<u32> {
        self.vertex_index_offset..self.vertex_index_offset + self.num_vertex
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_offsets_match_shader_layout() {
        use std::mem::offset_of;

        assert_eq!(offset_of!(ClothParameterBlock, vertex_index_offset), 12);
        assert_eq!(offset_of!(ClothParameterBlock, drag_coefficient), 44);
        assert_eq!(offset_of!(ClothParameterBlock, previous_inertia), 48);
        assert_eq!(offset_of!(ClothParameterBlock, wind_velocity), 64);
        assert_eq!(offset_of!(ClothParameterBlock, iter_delta_time), 80);
        assert_eq!(offset_of!(ClothParameterBlock, num_sphere_collision), 88);
        assert_eq!(offset_of!(ClothParameterBlock, sphere_collision_params), 96);
    }

    #[test]
    fn test_relinearize_is_exact_at_reference_rate() {
        for x in [0.0f32, 0.1, 0.25, 0.5, 0.9, 0.999] {
            let log_value = to_log_space(x);
            assert!((relinearize(log_value, 1.0) - x).abs() < 1e-5, "x = {x}");
        }
    }

    #[test]
    fn test_relinearize_stays_in_unit_interval() {
        for x in [0.0f32, 0.01, 0.3, 0.5, 0.75, 0.99] {
            let log_value = to_log_space(x);
            for exponent in [0.0f32, 0.05, 0.25, 0.5, 1.0, 2.0] {
                let value = relinearize(log_value, exponent);
                assert!((0.0..1.0).contains(&value), "x = {x}, e = {exponent}: {value}");
            }
        }
    }

    #[test]
    fn test_relinearize_shrinks_for_sub_steps() {
        let log_value = to_log_space(0.5);
        let quarter = relinearize(log_value, 0.25);
        assert!(quarter > 0.0 && quarter < 0.5);
        // Four quarter steps compound back to one reference step
        assert!((1.0 - (1.0 - quarter).powi(4) - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_to_log_space_clamps() {
        assert_eq!(to_log_space(-1.0), 0.0);
        assert!(to_log_space(1.0).is_finite());
    }

    #[test]
    fn test_sphere_collisions_truncate_without_overrun() {
        let sentinel = Vec4::splat(f32::MAX);
        let filled = ClothParameterBlock {
            sphere_collision_params: [sentinel; MAX_SPHERE_COLLISION_PER_MESH],
            num_sphere_collision: u32::MAX,
            ..Default::default()
        };
        let mut blocks = [filled; 2];

        let spheres = (0..MAX_SPHERE_COLLISION_PER_MESH + 5).map(|i| SphereCollisionParams {
            center: Vec3::splat(i as f32),
            radius: 1.0,
        });
        let written = blocks[0].set_sphere_collisions(spheres);

        assert_eq!(written, MAX_SPHERE_COLLISION_PER_MESH);
        assert_eq!(blocks[0].num_sphere_collision as usize, MAX_SPHERE_COLLISION_PER_MESH);
        assert_eq!(
            blocks[0].sphere_collisions().last().copied(),
            Some(Vec4::new(15.0, 15.0, 15.0, 1.0))
        );
        // Neighbouring block untouched
        assert_eq!(
            bytemuck::bytes_of(&blocks[1]),
            bytemuck::bytes_of(&filled)
        );
    }

    #[test]
    fn test_sphere_collisions_leave_unused_slots() {
        let sentinel = Vec4::splat(-7.0);
        let mut block = ClothParameterBlock {
            sphere_collision_params: [sentinel; MAX_SPHERE_COLLISION_PER_MESH],
            ..Default::default()
        };
        let written = block.set_sphere_collisions([SphereCollisionParams {
            center: Vec3::X,
            radius: 2.0,
        }]);

        assert_eq!(written, 1);
        assert_eq!(block.sphere_collision_params[0], Vec4::new(1.0, 0.0, 0.0, 2.0));
        assert!(block.sphere_collision_params[1..].iter().all(|&v| v == sentinel));
    }
}
