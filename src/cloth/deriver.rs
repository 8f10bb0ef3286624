//! Per-frame derivation of simulation constants from a mesh's motion

use crate::cloth::grid::{ClothMaterial, ClothSettings};
use crate::cloth::parameters::*;
use crate::scene::{Transform, WorldSphere};
use glam::{Vec3, Vec4};

/// Output of one derivation: the parameter block plus the per-vertex acceleration moves
#[derive(Debug, Clone)]
pub struct DerivedFrame {
    pub parameters: ClothParameterBlock,
    pub acceleration_moves: Vec<Vec4>,
}

/// Tracks a mesh's kinematic state across frames and turns it into a [`ClothParameterBlock`].
///
/// The cloth is simulated in the mesh's local frame, so the mesh's own acceleration shows up
/// as an inertial force and its own velocity as a headwind.
#[derive(Debug, Clone)]
pub struct ClothFrameParameterDeriver {
    material: ClothMaterial,
    num_row: u32,
    num_column: u32,
    grid_width: f32,
    grid_height: f32,

    previous_location: Vec3,
    current_velocity: Vec3,
    previous_velocity: Vec3,
    ignore_velocity_discontinuity: bool,
    collider_overflow_reported: bool,
}

impl ClothFrameParameterDeriver {
    /// `location` is where the mesh starts; the first frame sees no motion
    pub fn new(settings: &ClothSettings, location: Vec3) -> Self {
        Self {
            material: ClothMaterial::from_settings(settings),
            num_row: settings.num_row,
            num_column: settings.num_column,
            grid_width: settings.grid_width,
            grid_height: settings.grid_height,
            previous_location: location,
            current_velocity: Vec3::ZERO,
            previous_velocity: Vec3::ZERO,
            ignore_velocity_discontinuity: false,
            collider_overflow_reported: false,
        }
    }

    pub fn num_vertex(&self) -> u32 {
        (self.num_row + 1) * (self.num_column + 1)
    }

    pub fn current_velocity(&self) -> Vec3 {
        self.current_velocity
    }

    /// Keep the current velocity on the next frame instead of measuring it.
    ///
    /// Used after teleports so the jump does not turn into a huge inertial kick.
    pub fn ignore_velocity_discontinuity_next_frame(&mut self) {
        self.ignore_velocity_discontinuity = true;
    }

    pub fn is_ignoring_velocity_discontinuity(&self) -> bool {
        self.ignore_velocity_discontinuity
    }

    /// Derive this frame's constants.
    ///
    /// `delta_time` must be positive. `wind` is the gusted global wind in world space and
    /// `colliders` the frame's collider snapshot in world space.
    pub fn derive(
        &mut self,
        delta_time: f32,
        transform: &Transform,
        wind: Vec3,
        colliders: &[WorldSphere],
    ) -> DerivedFrame {
        debug_assert!(delta_time > 0.0, "delta_time must be positive");

        self.update_motion(delta_time, transform.position);

        let num_iteration = self.material.num_iteration;
        let iter_delta_time = delta_time / num_iteration as f32;
        let sqr_iter_delta_time = iter_delta_time * iter_delta_time;
        let exponent = BASE_FREQUENCY * iter_delta_time;

        // Spreads the frame's velocity change between the first sub-step and the rest
        let linear_alpha = 0.5 * (num_iteration + 1) as f32 / num_iteration as f32;

        let velocity_delta = self.current_velocity - self.previous_velocity;
        let current_inertia = -velocity_delta * linear_alpha / delta_time;
        let previous_inertia =
            -velocity_delta * (1.0 - linear_alpha) / delta_time * sqr_iter_delta_time;

        let translation = self.current_velocity * iter_delta_time;
        let linear_drag = translation * relinearize(self.material.linear_log_drag, exponent);

        let acceleration_move =
            ((current_inertia + GRAVITY) * sqr_iter_delta_time - linear_drag).extend(0.0);

        let mut parameters = ClothParameterBlock {
            num_iteration,
            num_row: self.num_row,
            num_column: self.num_column,
            vertex_index_offset: 0,
            num_vertex: self.num_vertex(),
            grid_width: self.grid_width,
            grid_height: self.grid_height,
            stiffness: relinearize(self.material.log_stiffness, exponent),
            damping: relinearize(self.material.log_damping, exponent),
            // Aerodynamics are evaluated in MKS-scaled units on the GPU
            fluid_density: self.material.fluid_density / (100.0 * 100.0 * 100.0),
            lift_coefficient: relinearize(self.material.lift_log_coefficient, exponent) / 100.0,
            drag_coefficient: relinearize(self.material.drag_log_coefficient, exponent) / 100.0,
            previous_inertia: previous_inertia.extend(0.0),
            wind_velocity: (wind - self.current_velocity).extend(0.0),
            iter_delta_time,
            vertex_radius: self.material.vertex_radius,
            ..Default::default()
        };

        let written = parameters.set_sphere_collisions(colliders.iter().map(|sphere| {
            SphereCollisionParams {
                center: transform.inverse_transform_point(sphere.center),
                radius: sphere.radius,
            }
        }));
        if written < colliders.len() {
            // Warn once per mesh, the snapshot is usually the same every frame
            if self.collider_overflow_reported {
                log::debug!(
                    "Cloth collides with {} of {} sphere colliders",
                    written,
                    colliders.len()
                );
            } else {
                log::warn!(
                    "Cloth collides with {} of {} sphere colliders, the rest are ignored",
                    written,
                    colliders.len()
                );
                self.collider_overflow_reported = true;
            }
        }

        DerivedFrame {
            parameters,
            acceleration_moves: vec![acceleration_move; self.num_vertex() as usize],
        }
    }

    fn update_motion(&mut self, delta_time: f32, location: Vec3) {
        self.previous_velocity = self.current_velocity;
        if !self.ignore_velocity_discontinuity {
            self.current_velocity = (location - self.previous_location) / delta_time;
        }
        self.previous_location = location;
        self.ignore_velocity_discontinuity = false;
    }
}
