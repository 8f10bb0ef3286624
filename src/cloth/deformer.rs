//! Batched dispatch of every queued cloth mesh

use crate::backend::traits::*;
use crate::cloth::buffers::{ensure_work_capacity, ClothVertexBuffers, ClothWorkBuffers};
use crate::cloth::parameters::{ClothParameterBlock, MAX_CLOTH_MESH, MAX_SPHERE_COLLISION_PER_MESH};
use crate::cloth::registry::{ClothMeshId, DeformCommand};
use crate::pipeline::tangent_pass::MAX_DISPATCH_GROUPS;
use crate::pipeline::{build_cloth_graph, BatchMesh, ClothPipelines, GridTangentPass};
use crate::render_graph::RenderGraphExecutor;
use std::collections::HashMap;

/// A queued mesh waiting for the next flush
#[derive(Debug, Clone)]
struct QueuedDeform {
    mesh: ClothMeshId,
    parameters: ClothParameterBlock,
}

/// Runs copy-in, simulation, copy-out and tangent passes for a batch of meshes in one submission
pub struct ClothBatchDeformer {
    pipelines: ClothPipelines,
    work: Option<ClothWorkBuffers>,
    executor: RenderGraphExecutor,
    queue: Vec<QueuedDeform>,
}

impl ClothBatchDeformer {
    pub fn new(backend: &mut dyn GraphicsBackend) -> BackendResult<Self> {
        Ok(Self {
            pipelines: ClothPipelines::new(backend)?,
            work: None,
            executor: RenderGraphExecutor::new(),
            queue: Vec::with_capacity(MAX_CLOTH_MESH),
        })
    }

    /// Queue a command and upload its acceleration moves to the mesh's buffers
    pub fn enqueue(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        buffers: &ClothVertexBuffers,
        command: DeformCommand,
    ) {
        buffers.write_acceleration_moves(backend, &command.acceleration_moves);
        self.queue.push(QueuedDeform {
            mesh: command.mesh,
            parameters: command.parameters,
        });
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    pub fn pipelines(&self) -> &ClothPipelines {
        &self.pipelines
    }

    /// Working-buffer capacity in vertices, 0 before the first flush
    pub fn work_capacity(&self) -> u32 {
        self.work.as_ref().map_or(0, ClothWorkBuffers::capacity)
    }

    /// Simulate every queued mesh in one submission and empty the queue.
    ///
    /// `capacity` is the registry's working capacity in vertices. Meshes missing from
    /// `meshes` are skipped with a warning.
    ///
    /// # Panics
    ///
    /// If the queue is empty or exceeds [`MAX_CLOTH_MESH`], a block carries more than
    /// [`MAX_SPHERE_COLLISION_PER_MESH`] colliders, a mesh slice lies outside `capacity`, or a
    /// tangent dispatch exceeds the workgroup limit.
    pub fn flush(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        meshes: &HashMap<ClothMeshId, ClothVertexBuffers>,
        capacity: u32,
    ) -> BackendResult<()> {
        let queue = std::mem::take(&mut self.queue);
        assert!(
            !queue.is_empty() && queue.len() <= MAX_CLOTH_MESH,
            "cloth batch of {} meshes, expected 1..={}",
            queue.len(),
            MAX_CLOTH_MESH
        );

        let mut batch = Vec::with_capacity(queue.len());
        for queued in &queue {
            let parameters = &queued.parameters;
            assert!(
                parameters.num_sphere_collision as usize <= MAX_SPHERE_COLLISION_PER_MESH,
                "cloth mesh {:?} has {} sphere colliders",
                queued.mesh,
                parameters.num_sphere_collision
            );
            assert!(
                parameters.vertex_index_offset + parameters.num_vertex <= capacity,
                "cloth mesh {:?} slice {:?} exceeds working capacity {}",
                queued.mesh,
                parameters.vertex_range(),
                capacity
            );
            assert!(
                GridTangentPass::group_count(parameters.num_vertex) <= MAX_DISPATCH_GROUPS,
                "cloth mesh {:?} is too large for one tangent dispatch",
                queued.mesh
            );

            let Some(buffers) = meshes.get(&queued.mesh) else {
                log::warn!("Cloth mesh {:?} has no buffers, skipping", queued.mesh);
                continue;
            };
            batch.push(BatchMesh {
                mesh: queued.mesh,
                buffers,
                parameters: queued.parameters,
            });
        }
        if batch.is_empty() {
            return Ok(());
        }

        let work = ensure_work_capacity(&mut self.work, backend, capacity)?;
        let (graph, _) = build_cloth_graph(&self.pipelines, work, &batch);
        let compiled = graph.compile();

        log::debug!(
            "Flushing cloth batch: {} meshes, {} passes in {} stages",
            batch.len(),
            compiled.pass_order.len(),
            compiled.stages.len()
        );

        // Transients are released on every path, including a failed allocation
        let result = match self.executor.allocate_resources(&graph, backend) {
            Ok(()) => {
                backend.begin_commands(Some("Cloth Batch"));
                let executed = self
                    .executor
                    .execute(&graph, &compiled, backend)
                    .and_then(|()| backend.submit_commands());
                if executed.is_err() {
                    backend.discard_commands();
                }
                executed
            }
            Err(err) => Err(err),
        };
        self.executor.cleanup(backend);
        if let Err(err) = &result {
            log::error!("Cloth batch of {} meshes failed: {}", batch.len(), err);
        }
        result
    }

    /// Release the working buffers
    pub fn destroy(mut self, backend: &mut dyn GraphicsBackend) {
        if let Some(work) = self.work.take() {
            work.destroy(backend);
        }
    }
}
