//! Per-mesh tangent frame recompute

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use bytemuck::{Pod, Zeroable};
use std::any::Any;

/// Threads per tangent workgroup
pub const TANGENT_WORKGROUP_SIZE: u32 = 32;

/// Largest workgroup count a single dispatch dimension accepts
pub const MAX_DISPATCH_GROUPS: u32 = 65535;

/// Grid dimensions uniform of [`GRID_TANGENT_SHADER`]
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct TangentUniforms {
    pub num_row: u32,
    pub num_column: u32,
    pub num_vertex: u32,
    pub _padding: u32,
}

/// Recomputes one mesh's tangents from its simulated positions
pub struct GridTangentPass {
    name: String,
    pipeline: ComputePipelineHandle,
    layout: BindGroupLayoutHandle,
    uniforms: TangentUniforms,
    position: ResourceId,
    tangent: ResourceId,
    uniform_buffer: Option<ResourceId>,
}

impl GridTangentPass {
    pub fn new(
        name: impl Into<String>,
        pipeline: ComputePipelineHandle,
        layout: BindGroupLayoutHandle,
        num_row: u32,
        num_column: u32,
        position: ResourceId,
        tangent: ResourceId,
    ) -> Self {
        Self {
            name: name.into(),
            pipeline,
            layout,
            uniforms: TangentUniforms {
                num_row,
                num_column,
                num_vertex: (num_row + 1) * (num_column + 1),
                _padding: 0,
            },
            position,
            tangent,
            uniform_buffer: None,
        }
    }

    /// Workgroups needed for `num_vertex` vertices
    pub fn group_count(num_vertex: u32) -> u32 {
        num_vertex.div_ceil(TANGENT_WORKGROUP_SIZE)
    }
}

impl RenderPass for GridTangentPass {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        let uniform_buffer = ctx.create_buffer(
            "tangent_uniforms",
            BufferDescriptor {
                label: Some(format!("{} Uniforms", self.name)),
                size: std::mem::size_of::<TangentUniforms>() as u64,
                usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
                mapped_at_creation: false,
            },
        );
        self.uniform_buffer = Some(uniform_buffer);

        ctx.read(uniform_buffer, ResourceUsage::UniformBuffer);
        ctx.read(self.position, ResourceUsage::StorageBufferRead);
        ctx.write(self.tangent, ResourceUsage::StorageBufferWrite);
    }

    fn execute(&self, ctx: &mut PassExecuteContext) -> BackendResult<()> {
        let groups = Self::group_count(self.uniforms.num_vertex);
        assert!(
            groups <= MAX_DISPATCH_GROUPS,
            "{}: {} tangent workgroups exceed the dispatch limit",
            self.name,
            groups
        );

        let uniform_resource = self.uniform_buffer.ok_or(BackendError::InvalidHandle {
            kind: "tangent uniform buffer",
            id: 0,
        })?;
        let uniform_buffer = ctx.buffer(uniform_resource)?;
        let position = ctx.buffer(self.position)?;
        let tangent = ctx.buffer(self.tangent)?;

        ctx.backend
            .write_buffer(uniform_buffer, 0, bytemuck::bytes_of(&self.uniforms));
        let bind_group = ctx.backend.create_bind_group(
            self.layout,
            &[
                (0, BindGroupEntry::whole(uniform_buffer)),
                (1, BindGroupEntry::whole(position)),
                (2, BindGroupEntry::whole(tangent)),
            ],
        )?;

        ctx.backend.begin_compute_pass(Some(&self.name));
        ctx.backend.set_compute_pipeline(self.pipeline);
        ctx.backend.set_bind_group(0, bind_group);
        ctx.backend.dispatch_compute(groups, 1, 1);
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

/// Bind group layout of [`GRID_TANGENT_SHADER`]
pub fn tangent_layout_entries() -> Vec<BindGroupLayoutEntry> {
    vec![
        BindGroupLayoutEntry {
            binding: 0,
            visibility: ShaderStageFlags::COMPUTE,
            ty: BindingType::UniformBuffer,
        },
        BindGroupLayoutEntry {
            binding: 1,
            visibility: ShaderStageFlags::COMPUTE,
            ty: BindingType::StorageBuffer { read_only: true },
        },
        BindGroupLayoutEntry {
            binding: 2,
            visibility: ShaderStageFlags::COMPUTE,
            ty: BindingType::StorageBuffer { read_only: false },
        },
    ]
}

pub const GRID_TANGENT_SHADER: &str = r#"
struct GridUniforms {
    num_row: u32,
    num_column: u32,
    num_vertex: u32,
    _padding: u32,
}

struct ClothTangent {
    tangent_x: vec4<f32>,
    tangent_z: vec4<f32>,
}

@group(0) @binding(0) var<uniform> grid: GridUniforms;
@group(0) @binding(1) var<storage, read> positions: array<vec4<f32>>;
@group(0) @binding(2) var<storage, read_write> tangents: array<ClothTangent>;

fn safe_normalize(v: vec3<f32>, fallback: vec3<f32>) -> vec3<f32> {
    let len = length(v);
    if len < 1e-6 {
        return fallback;
    }
    return v / len;
}

@compute @workgroup_size(32, 1, 1)
fn main(@builtin(global_invocation_id) global_id: vec3<u32>) {
    let v = global_id.x;
    if v >= grid.num_vertex {
        return;
    }

    let stride = grid.num_column + 1u;
    let x = v % stride;
    let y = v / stride;
    let x0 = select(x - 1u, x, x == 0u);
    let x1 = min(x + 1u, grid.num_column);
    let y0 = select(y - 1u, y, y == 0u);
    let y1 = min(y + 1u, grid.num_row);

    let along_x = positions[y * stride + x1].xyz - positions[y * stride + x0].xyz;
    let along_y = positions[y1 * stride + x].xyz - positions[y0 * stride + x].xyz;

    let tangent = safe_normalize(along_x, vec3<f32>(1.0, 0.0, 0.0));
    let normal = safe_normalize(cross(along_x, along_y), vec3<f32>(0.0, 0.0, 1.0));

    tangents[v] = ClothTangent(vec4<f32>(tangent, 0.0), vec4<f32>(normal, 1.0));
}
"#;
