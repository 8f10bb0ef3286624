//! Cloth grid settings and topology generation

use crate::cloth::parameters::{to_log_space, BASE_FREQUENCY, GRAVITY};
use crate::error::{ClothError, ClothResult};
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec4};

/// Settings passed to `init_cloth_settings`.
///
/// Material coefficients are per-step values at [`BASE_FREQUENCY`] in `[0, 1)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ClothSettings {
    pub num_row: u32,
    pub num_column: u32,
    /// Cell size along X (cm)
    pub grid_width: f32,
    /// Cell size along Y (cm)
    pub grid_height: f32,
    pub stiffness: f32,
    pub damping: f32,
    pub linear_drag: f32,
    /// kg/m³
    pub fluid_density: f32,
    pub lift_coefficient: f32,
    pub drag_coefficient: f32,
    /// Collision radius of each vertex (cm)
    pub vertex_radius: f32,
    pub num_iteration: u32,
}

impl Default for ClothSettings {
    fn default() -> Self {
        Self {
            num_row: 16,
            num_column: 16,
            grid_width: 10.0,
            grid_height: 10.0,
            stiffness: 0.5,
            damping: 0.01,
            linear_drag: 0.1,
            fluid_density: 1.2,
            lift_coefficient: 0.1,
            drag_coefficient: 0.1,
            vertex_radius: 2.0,
            num_iteration: 4,
        }
    }
}

impl ClothSettings {
    pub fn validate(&self) -> ClothResult<()> {
        if self.num_row == 0 || self.num_column == 0 {
            return Err(ClothError::InvalidGridSize {
                rows: self.num_row,
                columns: self.num_column,
            });
        }
        if !(self.grid_width > 0.0 && self.grid_height > 0.0) {
            return Err(ClothError::InvalidCellSize {
                width: self.grid_width,
                height: self.grid_height,
            });
        }
        if self.num_iteration == 0 {
            return Err(ClothError::InvalidIterationCount);
        }
        for (name, value) in [
            ("stiffness", self.stiffness),
            ("damping", self.damping),
            ("linear_drag", self.linear_drag),
            ("lift_coefficient", self.lift_coefficient),
            ("drag_coefficient", self.drag_coefficient),
        ] {
            if !(0.0..1.0).contains(&value) {
                return Err(ClothError::CoefficientOutOfRange { name, value });
            }
        }
        Ok(())
    }

    pub fn vertex_count(&self) -> u32 {
        (self.num_row + 1) * (self.num_column + 1)
    }
}

/// Material constants kept in log space so they can be re-linearized for any step length
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClothMaterial {
    pub log_stiffness: f32,
    pub log_damping: f32,
    pub linear_log_drag: f32,
    pub lift_log_coefficient: f32,
    pub drag_log_coefficient: f32,
    pub fluid_density: f32,
    pub vertex_radius: f32,
    pub num_iteration: u32,
}

impl ClothMaterial {
    pub fn from_settings(settings: &ClothSettings) -> Self {
        Self {
            log_stiffness: to_log_space(settings.stiffness),
            log_damping: to_log_space(settings.damping),
            linear_log_drag: to_log_space(settings.linear_drag),
            lift_log_coefficient: to_log_space(settings.lift_coefficient),
            drag_log_coefficient: to_log_space(settings.drag_coefficient),
            fluid_density: settings.fluid_density,
            vertex_radius: settings.vertex_radius,
            num_iteration: settings.num_iteration,
        }
    }
}

/// Per-vertex tangent frame as consumed by the renderer
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ClothTangent {
    pub tangent_x: Vec4,
    /// Normal in xyz, binormal sign in w
    pub tangent_z: Vec4,
}

impl Default for ClothTangent {
    fn default() -> Self {
        Self {
            tangent_x: Vec4::new(1.0, 0.0, 0.0, 0.0),
            tangent_z: Vec4::new(0.0, 0.0, 1.0, 1.0),
        }
    }
}

/// CPU-side grid: initial vertex state and topology
#[derive(Debug, Clone)]
pub struct GridMeshData {
    pub num_row: u32,
    pub num_column: u32,
    pub grid_width: f32,
    pub grid_height: f32,
    /// xyz = position, w = inverse mass
    pub positions: Vec<Vec4>,
    /// Per-vertex move for the next step, w unused
    pub acceleration_moves: Vec<Vec4>,
    pub tangents: Vec<ClothTangent>,
    pub tex_coords: Vec<Vec2>,
    pub indices: Vec<u32>,
}

impl GridMeshData {
    /// Build a grid on the XY plane. Row 0 is pinned (inverse mass 0).
    pub fn build(settings: &ClothSettings) -> ClothResult<Self> {
        settings.validate()?;

        let rows = settings.num_row;
        let columns = settings.num_column;
        let vertex_count = settings.vertex_count() as usize;

        let initial_move = (GRAVITY / (BASE_FREQUENCY * BASE_FREQUENCY)).extend(0.0);

        let mut positions = Vec::with_capacity(vertex_count);
        let mut tex_coords = Vec::with_capacity(vertex_count);
        for y in 0..=rows {
            let inverse_mass = if y == 0 { 0.0 } else { 1.0 };
            for x in 0..=columns {
                positions.push(Vec4::new(
                    x as f32 * settings.grid_width,
                    y as f32 * settings.grid_height,
                    0.0,
                    inverse_mass,
                ));
                tex_coords.push(Vec2::new(x as f32 / columns as f32, y as f32 / rows as f32));
            }
        }

        let mut indices = Vec::with_capacity((6 * rows * columns) as usize);
        for row in 0..rows {
            for column in 0..columns {
                let current = row * (columns + 1) + column;
                let next = current + columns + 1;

                indices.extend_from_slice(&[
                    current,
                    next,
                    next + 1,
                    current,
                    next + 1,
                    current + 1,
                ]);
            }
        }

        Ok(Self {
            num_row: rows,
            num_column: columns,
            grid_width: settings.grid_width,
            grid_height: settings.grid_height,
            positions,
            acceleration_moves: vec![initial_move; vertex_count],
            tangents: vec![ClothTangent::default(); vertex_count],
            tex_coords,
            indices,
        })
    }

    pub fn vertex_count(&self) -> u32 {
        self.positions.len() as u32
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    pub fn inverse_mass(&self, vertex: usize) -> Option<f32> {
        self.positions.get(vertex).map(|p| p.w)
    }

    /// Vertex index of grid coordinate (column, row)
    pub fn vertex_index(&self, column: u32, row: u32) -> u32 {
        row * (self.num_column + 1) + column
    }
}
