//! Batched cloth simulation compute pass

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::cloth::parameters::ClothParameterBlock;
use crate::pipeline::copy_pass::WorkResources;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use std::any::Any;

/// Threads per simulation workgroup; one workgroup simulates one mesh
pub const SIMULATION_WORKGROUP_SIZE: u32 = 256;

/// Simulates every queued mesh in a single dispatch of `(mesh_count, 1, 1)` workgroups
pub struct ClothSimulationPass {
    pipeline: ComputePipelineHandle,
    layout: BindGroupLayoutHandle,
    parameters: Vec<ClothParameterBlock>,
    work: WorkResources,
    parameter_buffer: Option<ResourceId>,
}

impl ClothSimulationPass {
    pub fn new(
        pipeline: ComputePipelineHandle,
        layout: BindGroupLayoutHandle,
        parameters: Vec<ClothParameterBlock>,
        work: WorkResources,
    ) -> Self {
        Self {
            pipeline,
            layout,
            parameters,
            work,
            parameter_buffer: None,
        }
    }

    pub fn mesh_count(&self) -> u32 {
        self.parameters.len() as u32
    }
}

impl RenderPass for ClothSimulationPass {
    fn name(&self) -> &str {
        "Cloth Simulation"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        let size = (self.parameters.len() * std::mem::size_of::<ClothParameterBlock>()) as u64;
        let parameter_buffer = ctx.create_buffer(
            "cloth_parameters",
            BufferDescriptor {
                label: Some("Cloth Parameters".into()),
                size: size.max(std::mem::size_of::<ClothParameterBlock>() as u64),
                usage: BufferUsage::STORAGE | BufferUsage::COPY_DST,
                mapped_at_creation: false,
            },
        );
        self.parameter_buffer = Some(parameter_buffer);

        ctx.read(parameter_buffer, ResourceUsage::StorageBufferRead);
        ctx.read(self.work.acceleration_move, ResourceUsage::StorageBufferRead);
        ctx.write(self.work.previous_position, ResourceUsage::StorageBufferReadWrite);
        ctx.write(self.work.position, ResourceUsage::StorageBufferReadWrite);
    }

    fn execute(&self, ctx: &mut PassExecuteContext) -> BackendResult<()> {
        let parameter_resource = self.parameter_buffer.ok_or(BackendError::InvalidHandle {
            kind: "cloth parameter buffer",
            id: 0,
        })?;
        let parameter_buffer = ctx.buffer(parameter_resource)?;
        let acceleration_move = ctx.buffer(self.work.acceleration_move)?;
        let previous_position = ctx.buffer(self.work.previous_position)?;
        let position = ctx.buffer(self.work.position)?;

        ctx.backend
            .write_buffer(parameter_buffer, 0, bytemuck::cast_slice(&self.parameters));

        let bind_group = ctx.backend.create_bind_group(
            self.layout,
            &[
                (0, BindGroupEntry::whole(parameter_buffer)),
                (1, BindGroupEntry::whole(acceleration_move)),
                (2, BindGroupEntry::whole(previous_position)),
                (3, BindGroupEntry::whole(position)),
            ],
        )?;

        log::trace!("Dispatching cloth simulation for {} meshes", self.mesh_count());
        ctx.backend.begin_compute_pass(Some("Cloth Simulation"));
        ctx.backend.set_compute_pipeline(self.pipeline);
        ctx.backend.set_bind_group(0, bind_group);
        ctx.backend.dispatch_compute(self.mesh_count(), 1, 1);
        ctx.backend.end_compute_pass();
        ctx.backend.destroy_bind_group(bind_group);

        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Bind group layout of [`CLOTH_SIMULATION_SHADER`]
pub fn simulation_layout_entries() -> Vec<BindGroupLayoutEntry> {
    let storage = |binding, read_only| BindGroupLayoutEntry {
        binding,
        visibility: ShaderStageFlags::COMPUTE,
        ty: BindingType::StorageBuffer { read_only },
    };
    vec![
        storage(0, true),
        storage(1, true),
        storage(2, false),
        storage(3, false),
    ]
}

/// Position-based cloth solver.
///
/// Each iteration integrates (Verlet with damping, acceleration moves, inertia on the first
/// sub-step, aerodynamic drag and lift), then relaxes the grid's structural springs in four
/// independent phases, then pushes vertices out of sphere colliders. Vertices with zero
/// inverse mass never move.
pub const CLOTH_SIMULATION_SHADER: &str = r#"
const WORKGROUP_SIZE: u32 = 256u;
const MAX_SPHERE_COLLISION: u32 = 16u;
const EPSILON: f32 = 1e-6;

struct ClothParameters {
    num_iteration: u32,
    num_row: u32,
    num_column: u32,
    vertex_index_offset: u32,
    num_vertex: u32,
    grid_width: f32,
    grid_height: f32,
    stiffness: f32,
    damping: f32,
    fluid_density: f32,
    lift_coefficient: f32,
    drag_coefficient: f32,
    previous_inertia: vec4<f32>,
    wind_velocity: vec4<f32>,
    iter_delta_time: f32,
    vertex_radius: f32,
    num_sphere_collision: u32,
    _padding: u32,
    sphere_collision_params: array<vec4<f32>, 16>,
}

@group(0) @binding(0) var<storage, read> parameters: array<ClothParameters>;
@group(0) @binding(1) var<storage, read> acceleration_moves: array<vec4<f32>>;
@group(0) @binding(2) var<storage, read_write> previous_positions: array<vec4<f32>>;
@group(0) @binding(3) var<storage, read_write> positions: array<vec4<f32>>;

fn grid_index(params: ClothParameters, x: u32, y: u32) -> u32 {
    return params.vertex_index_offset + y * (params.num_column + 1u) + x;
}

// Unnormalized grid normal at local vertex v from its clamped neighbours
fn grid_normal(params: ClothParameters, v: u32) -> vec3<f32> {
    let x = v % (params.num_column + 1u);
    let y = v / (params.num_column + 1u);
    let x0 = select(x - 1u, x, x == 0u);
    let x1 = min(x + 1u, params.num_column);
    let y0 = select(y - 1u, y, y == 0u);
    let y1 = min(y + 1u, params.num_row);

    let dx = positions[grid_index(params, x1, y)].xyz - positions[grid_index(params, x0, y)].xyz;
    let dy = positions[grid_index(params, x, y1)].xyz - positions[grid_index(params, x, y0)].xyz;
    return cross(dx, dy);
}

fn aerodynamic_move(params: ClothParameters, v: u32, position: vec3<f32>, previous: vec3<f32>, inv_mass: f32) -> vec3<f32> {
    let raw_normal = grid_normal(params, v);
    let normal_length = length(raw_normal);
    let relative = params.wind_velocity.xyz - (position - previous) / params.iter_delta_time;
    let speed = length(relative);
    if normal_length < EPSILON || speed < EPSILON {
        return vec3<f32>(0.0);
    }

    let normal = raw_normal / normal_length;
    let direction = relative / speed;
    let cos_theta = dot(normal, direction);
    let area = params.grid_width * params.grid_height;
    let pressure = 0.5 * params.fluid_density * area;

    let drag = pressure * params.drag_coefficient * abs(dot(normal, relative)) * relative;
    let lift = pressure * params.lift_coefficient * speed * speed * cos_theta
        * cross(cross(direction, normal), direction);

    return (drag + lift) * inv_mass * params.iter_delta_time * params.iter_delta_time;
}

fn solve_distance(a: u32, b: u32, rest_length: f32, stiffness: f32) {
    let pa = positions[a];
    let pb = positions[b];
    let w = pa.w + pb.w;
    if w <= 0.0 {
        return;
    }
    let delta = pb.xyz - pa.xyz;
    let len = length(delta);
    if len < EPSILON {
        return;
    }
    let correction = delta * ((len - rest_length) / (len * w)) * stiffness;
    positions[a] = vec4<f32>(pa.xyz + correction * pa.w, pa.w);
    positions[b] = vec4<f32>(pb.xyz - correction * pb.w, pb.w);
}

fn solve_horizontal(params: ClothParameters, local_index: u32, parity: u32) {
    let per_row = (params.num_column + 1u - parity) / 2u;
    let count = per_row * (params.num_row + 1u);
    for (var e = local_index; e < count; e += WORKGROUP_SIZE) {
        let y = e / per_row;
        let x = (e % per_row) * 2u + parity;
        solve_distance(grid_index(params, x, y), grid_index(params, x + 1u, y), params.grid_width, params.stiffness);
    }
}

fn solve_vertical(params: ClothParameters, local_index: u32, parity: u32) {
    let stride = params.num_column + 1u;
    let per_column = (params.num_row + 1u - parity) / 2u;
    let count = per_column * stride;
    for (var e = local_index; e < count; e += WORKGROUP_SIZE) {
        let x = e % stride;
        let y = (e / stride) * 2u + parity;
        solve_distance(grid_index(params, x, y), grid_index(params, x, y + 1u), params.grid_height, params.stiffness);
    }
}

@compute @workgroup_size(256, 1, 1)
fn main(
    @builtin(workgroup_id) workgroup_id: vec3<u32>,
    @builtin(local_invocation_index) local_index: u32,
) {
    let mesh = workgroup_id.x;
    let params = parameters[mesh];
    let num_vertex = params.num_vertex;
    let num_sphere = min(params.num_sphere_collision, MAX_SPHERE_COLLISION);

    for (var iteration = 0u; iteration < params.num_iteration; iteration++) {
        // Integrate; the new position is staged in the previous-position slot
        for (var v = local_index; v < num_vertex; v += WORKGROUP_SIZE) {
            let i = params.vertex_index_offset + v;
            let current = positions[i];
            let inv_mass = current.w;
            if inv_mass == 0.0 {
                previous_positions[i] = current;
                continue;
            }
            let previous = previous_positions[i].xyz;

            var displacement = (current.xyz - previous) * (1.0 - params.damping) + acceleration_moves[i].xyz;
            if iteration == 0u {
                displacement += params.previous_inertia.xyz;
            }
            displacement += aerodynamic_move(params, v, current.xyz, previous, inv_mass);
            previous_positions[i] = vec4<f32>(current.xyz + displacement, inv_mass);
        }
        storageBarrier();

        for (var v = local_index; v < num_vertex; v += WORKGROUP_SIZE) {
            let i = params.vertex_index_offset + v;
            let next = previous_positions[i];
            previous_positions[i] = positions[i];
            positions[i] = next;
        }
        storageBarrier();

        solve_horizontal(params, local_index, 0u);
        storageBarrier();
        solve_horizontal(params, local_index, 1u);
        storageBarrier();
        solve_vertical(params, local_index, 0u);
        storageBarrier();
        solve_vertical(params, local_index, 1u);
        storageBarrier();

        for (var v = local_index; v < num_vertex; v += WORKGROUP_SIZE) {
            let i = params.vertex_index_offset + v;
            var p = positions[i];
            if p.w == 0.0 {
                continue;
            }
            for (var s = 0u; s < num_sphere; s++) {
                let sphere = parameters[mesh].sphere_collision_params[s];
                let offset = p.xyz - sphere.xyz;
                let min_distance = sphere.w + params.vertex_radius;
                let dist = length(offset);
                if dist < min_distance && dist > EPSILON {
                    p = vec4<f32>(sphere.xyz + offset * (min_distance / dist), p.w);
                }
            }
            positions[i] = p;
        }
        storageBarrier();
    }
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shader_matches_host_constants() {
        assert!(CLOTH_SIMULATION_SHADER.contains("@workgroup_size(256, 1, 1)"));
        assert!(CLOTH_SIMULATION_SHADER.contains(&format!(
            "array<vec4<f32>, {}>",
            crate::cloth::parameters::MAX_SPHERE_COLLISION_PER_MESH
        )));
        assert_eq!(SIMULATION_WORKGROUP_SIZE, 256);
    }

    #[test]
    fn test_layout_bindings() {
        let entries = simulation_layout_entries();
        let read_only: Vec<bool> = entries
            .iter()
            .map(|e| matches!(e.ty, BindingType::StorageBuffer { read_only: true }))
            .collect();
        assert_eq!(read_only, vec![true, true, false, false]);
    }
}
