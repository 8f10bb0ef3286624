//! Transfer passes moving a mesh's vertex data in and out of the working buffers

use crate::backend::traits::*;
use crate::cloth::buffers::vertex_byte_range;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use std::any::Any;

/// Graph resources of one mesh's simulated vertex buffers
#[derive(Debug, Clone, Copy)]
pub struct MeshVertexResources {
    pub acceleration_move: ResourceId,
    pub previous_position: ResourceId,
    pub position: ResourceId,
}

/// Graph resources of the shared working buffers
#[derive(Debug, Clone, Copy)]
pub struct WorkResources {
    pub acceleration_move: ResourceId,
    pub previous_position: ResourceId,
    pub position: ResourceId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyDirection {
    /// Mesh buffers into the working buffers (acceleration moves included)
    ToWork,
    /// Working buffers back into the mesh buffers
    FromWork,
}

/// Copies one mesh's slice of the working buffers
pub struct ClothCopyPass {
    name: String,
    direction: CopyDirection,
    mesh: MeshVertexResources,
    work: WorkResources,
    offset: u32,
    num_vertex: u32,
}

impl ClothCopyPass {
    pub fn to_work(
        name: impl Into<String>,
        mesh: MeshVertexResources,
        work: WorkResources,
        offset: u32,
        num_vertex: u32,
    ) -> Self {
        Self {
            name: name.into(),
            direction: CopyDirection::ToWork,
            mesh,
            work,
            offset,
            num_vertex,
        }
    }

    pub fn from_work(
        name: impl Into<String>,
        mesh: MeshVertexResources,
        work: WorkResources,
        offset: u32,
        num_vertex: u32,
    ) -> Self {
        Self {
            name: name.into(),
            direction: CopyDirection::FromWork,
            mesh,
            work,
            offset,
            num_vertex,
        }
    }

    /// (mesh, work) resource pairs this pass copies
    fn pairs(&self) -> Vec<(ResourceId, ResourceId)> {
        let mut pairs = Vec::with_capacity(3);
        if self.direction == CopyDirection::ToWork {
            pairs.push((self.mesh.acceleration_move, self.work.acceleration_move));
        }
        pairs.push((self.mesh.previous_position, self.work.previous_position));
        pairs.push((self.mesh.position, self.work.position));
        pairs
    }
}

impl RenderPass for ClothCopyPass {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        let range = vertex_byte_range(self.offset, self.num_vertex);
        for (mesh, work) in self.pairs() {
            match self.direction {
                CopyDirection::ToWork => {
                    ctx.read(mesh, ResourceUsage::CopySrc);
                    ctx.write_range(work, ResourceUsage::CopyDst, range.clone());
                }
                CopyDirection::FromWork => {
                    ctx.read_range(work, ResourceUsage::CopySrc, range.clone());
                    ctx.write(mesh, ResourceUsage::CopyDst);
                }
            }
        }
    }

    fn execute(&self, ctx: &mut PassExecuteContext) -> BackendResult<()> {
        let range = vertex_byte_range(self.offset, self.num_vertex);
        let size = range.end - range.start;

        for (mesh, work) in self.pairs() {
            let mesh_buffer = ctx.buffer(mesh)?;
            let work_buffer = ctx.buffer(work)?;
            match self.direction {
                CopyDirection::ToWork => ctx.backend.copy_buffer_to_buffer(
                    mesh_buffer,
                    0,
                    work_buffer,
                    range.start,
                    size,
                ),
                CopyDirection::FromWork => ctx.backend.copy_buffer_to_buffer(
                    work_buffer,
                    range.start,
                    mesh_buffer,
                    0,
                    size,
                ),
            }
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
