//! Cloth compute pipeline
//!
//! One flush is a render graph of four stages:
//! 1. Copy-in - each mesh's simulated buffers into its slice of the working buffers
//! 2. Simulation - a single dispatch over every queued mesh
//! 3. Copy-out - each slice back into its mesh's buffers
//! 4. Tangents - each mesh's tangent frames from its new positions

pub mod copy_pass;
pub mod simulation_pass;
pub mod tangent_pass;

pub use copy_pass::{ClothCopyPass, CopyDirection, MeshVertexResources, WorkResources};
pub use simulation_pass::{ClothSimulationPass, CLOTH_SIMULATION_SHADER, SIMULATION_WORKGROUP_SIZE};
pub use tangent_pass::{GridTangentPass, GRID_TANGENT_SHADER, TANGENT_WORKGROUP_SIZE};

use crate::backend::traits::*;
use crate::cloth::buffers::{ClothVertexBuffers, ClothWorkBuffers};
use crate::cloth::parameters::ClothParameterBlock;
use crate::cloth::registry::ClothMeshId;
use crate::render_graph::{PassId, PassType, RenderGraph};

/// Compiled compute pipelines of the cloth graph
#[derive(Debug, Clone, Copy)]
pub struct ClothPipelines {
    pub simulation: ComputePipelineHandle,
    pub simulation_layout: BindGroupLayoutHandle,
    pub tangent: ComputePipelineHandle,
    pub tangent_layout: BindGroupLayoutHandle,
}

impl ClothPipelines {
    pub fn new(backend: &mut dyn GraphicsBackend) -> BackendResult<Self> {
        let simulation_layout =
            backend.create_bind_group_layout(&simulation_pass::simulation_layout_entries())?;
        let simulation = backend.create_compute_pipeline(&ComputePipelineDescriptor {
            label: Some("Cloth Simulation".into()),
            shader: CLOTH_SIMULATION_SHADER.into(),
            entry_point: "main".into(),
            bind_group_layouts: vec![simulation_layout],
        })?;

        let tangent_layout =
            backend.create_bind_group_layout(&tangent_pass::tangent_layout_entries())?;
        let tangent = backend.create_compute_pipeline(&ComputePipelineDescriptor {
            label: Some("Grid Tangents".into()),
            shader: GRID_TANGENT_SHADER.into(),
            entry_point: "main".into(),
            bind_group_layouts: vec![tangent_layout],
        })?;

        log::debug!("Created cloth compute pipelines on {}", backend.name());

        Ok(Self {
            simulation,
            simulation_layout,
            tangent,
            tangent_layout,
        })
    }
}

/// One mesh of a flush
#[derive(Debug)]
pub struct BatchMesh<'a> {
    pub mesh: ClothMeshId,
    pub buffers: &'a ClothVertexBuffers,
    /// `vertex_index_offset` already points at the mesh's slot
    pub parameters: ClothParameterBlock,
}

/// Pass ids of a built cloth graph, per stage
#[derive(Debug, Clone)]
pub struct ClothGraphPasses {
    pub copy_in: Vec<PassId>,
    pub simulation: PassId,
    pub copy_out: Vec<PassId>,
    pub tangents: Vec<PassId>,
}

/// Build the graph for one flush
pub fn build_cloth_graph(
    pipelines: &ClothPipelines,
    work: &ClothWorkBuffers,
    batch: &[BatchMesh<'_>],
) -> (RenderGraph, ClothGraphPasses) {
    let mut graph = RenderGraph::new();

    let work_resources = WorkResources {
        acceleration_move: graph.import_buffer("cloth_work_acceleration_move", work.acceleration_move),
        previous_position: graph.import_buffer("cloth_work_previous_position", work.previous_position),
        position: graph.import_buffer("cloth_work_position", work.position),
    };

    let mesh_resources: Vec<(MeshVertexResources, _)> = batch
        .iter()
        .map(|entry| {
            let id = entry.mesh.raw();
            let resources = MeshVertexResources {
                acceleration_move: graph.import_buffer(
                    &format!("cloth_{id}_acceleration_move"),
                    entry.buffers.acceleration_move,
                ),
                previous_position: graph.import_buffer(
                    &format!("cloth_{id}_previous_position"),
                    entry.buffers.previous_position,
                ),
                position: graph
                    .import_buffer(&format!("cloth_{id}_position"), entry.buffers.position),
            };
            let tangent =
                graph.import_buffer(&format!("cloth_{id}_tangent"), entry.buffers.tangent);
            (resources, tangent)
        })
        .collect();

    let copy_in = batch
        .iter()
        .zip(&mesh_resources)
        .map(|(entry, (resources, _))| {
            graph.add_pass(
                ClothCopyPass::to_work(
                    format!("Cloth Copy In {}", entry.mesh.raw()),
                    *resources,
                    work_resources,
                    entry.parameters.vertex_index_offset,
                    entry.parameters.num_vertex,
                ),
                PassType::Transfer,
            )
        })
        .collect();

    let simulation = graph.add_pass(
        ClothSimulationPass::new(
            pipelines.simulation,
            pipelines.simulation_layout,
            batch.iter().map(|entry| entry.parameters).collect(),
            work_resources,
        ),
        PassType::Compute,
    );

    let copy_out = batch
        .iter()
        .zip(&mesh_resources)
        .map(|(entry, (resources, _))| {
            graph.add_pass(
                ClothCopyPass::from_work(
                    format!("Cloth Copy Out {}", entry.mesh.raw()),
                    *resources,
                    work_resources,
                    entry.parameters.vertex_index_offset,
                    entry.parameters.num_vertex,
                ),
                PassType::Transfer,
            )
        })
        .collect();

    let tangents = batch
        .iter()
        .zip(&mesh_resources)
        .map(|(entry, (resources, tangent))| {
            graph.add_pass(
                GridTangentPass::new(
                    format!("Cloth Tangents {}", entry.mesh.raw()),
                    pipelines.tangent,
                    pipelines.tangent_layout,
                    entry.buffers.num_row,
                    entry.buffers.num_column,
                    resources.position,
                    *tangent,
                ),
                PassType::Compute,
            )
        })
        .collect();

    (
        graph,
        ClothGraphPasses {
            copy_in,
            simulation,
            copy_out,
            tangents,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::cloth::grid::{ClothSettings, GridMeshData};

    fn mesh_buffers(backend: &mut DummyBackend, rows: u32, columns: u32) -> ClothVertexBuffers {
        let grid = GridMeshData::build(&ClothSettings {
            num_row: rows,
            num_column: columns,
            ..Default::default()
        })
        .unwrap();
        ClothVertexBuffers::new(backend, "Test", &grid).unwrap()
    }

    #[test]
    fn test_graph_stages_follow_flush_protocol() {
        let mut backend = DummyBackend::new();
        let pipelines = ClothPipelines::new(&mut backend).unwrap();
        let a = mesh_buffers(&mut backend, 2, 2);
        let b = mesh_buffers(&mut backend, 1, 3);
        let work = ClothWorkBuffers::new(&mut backend, 17).unwrap();

        let batch = [
            BatchMesh {
                mesh: ClothMeshId(0),
                buffers: &a,
                parameters: ClothParameterBlock {
                    num_vertex: 9,
                    ..Default::default()
                },
            },
            BatchMesh {
                mesh: ClothMeshId(1),
                buffers: &b,
                parameters: ClothParameterBlock {
                    vertex_index_offset: 9,
                    num_vertex: 8,
                    ..Default::default()
                },
            },
        ];

        let (graph, passes) = build_cloth_graph(&pipelines, &work, &batch);
        let compiled = graph.compile();

        assert_eq!(compiled.stages.len(), 4);
        assert_eq!(compiled.stages[0], passes.copy_in);
        assert_eq!(compiled.stages[1], vec![passes.simulation]);
        assert_eq!(compiled.stages[2], passes.copy_out);
        assert_eq!(compiled.stages[3], passes.tangents);
    }

    #[test]
    fn test_pipelines_are_labelled() {
        let mut backend = DummyBackend::new();
        let pipelines = ClothPipelines::new(&mut backend).unwrap();
        assert_eq!(backend.pipeline_label(pipelines.simulation), Some("Cloth Simulation"));
        assert_eq!(backend.pipeline_label(pipelines.tangent), Some("Grid Tangents"));
    }
}
