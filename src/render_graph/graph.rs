//! Render graph definition and compilation

use crate::backend::traits::BufferHandle;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use std::collections::{BTreeSet, HashMap, HashSet};

/// The main render graph structure
///
/// Insertion order is program order: a pass only ever depends on passes added before it.
pub struct RenderGraph {
    passes: Vec<Box<dyn RenderPass>>,
    pass_nodes: Vec<PassNode>,
    resources: Vec<VirtualResource>,
    next_pass_id: u32,
    next_resource_id: u32,

    /// Imported buffers by name
    external_resources: HashMap<String, ResourceId>,
}

impl RenderGraph {
    pub fn new() -> Self {
        Self {
            passes: Vec::new(),
            pass_nodes: Vec::new(),
            resources: Vec::new(),
            next_pass_id: 0,
            next_resource_id: 0,
            external_resources: HashMap::new(),
        }
    }

    /// Import a buffer owned outside the graph
    pub fn import_buffer(&mut self, name: &str, buffer: BufferHandle) -> ResourceId {
        if let Some(&id) = self.external_resources.get(name) {
            return id;
        }
        let id = ResourceId(self.next_resource_id);
        self.next_resource_id += 1;
        self.resources.push(VirtualResource::External {
            id,
            name: name.to_string(),
            buffer,
        });
        self.external_resources.insert(name.to_string(), id);
        id
    }

    /// Get external resource by name
    pub fn get_external(&self, name: &str) -> Option<ResourceId> {
        self.external_resources.get(name).copied()
    }

    /// Add a render pass to the graph
    pub fn add_pass<P: RenderPass + 'static>(&mut self, pass: P, pass_type: PassType) -> PassId {
        let id = PassId(self.next_pass_id);
        self.next_pass_id += 1;

        let name = pass.name().to_string();
        let mut boxed_pass = Box::new(pass);

        // Setup the pass
        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        {
            let mut ctx = PassSetupContext {
                resources: &mut self.resources,
                inputs: &mut inputs,
                outputs: &mut outputs,
                next_resource_id: &mut self.next_resource_id,
            };
            boxed_pass.setup(&mut ctx);
        }

        self.passes.push(boxed_pass);
        self.pass_nodes.push(PassNode {
            id,
            name,
            pass_type,
            inputs,
            outputs,
        });

        id
    }

    /// Compile the graph - dependency analysis, topological sort and stage grouping
    pub fn compile(&self) -> CompiledGraph {
        // Build dependency graph
        let mut dependencies: Vec<HashSet<PassId>> = vec![HashSet::new(); self.pass_nodes.len()];
        for (later_index, later) in self.pass_nodes.iter().enumerate() {
            for earlier in &self.pass_nodes[..later_index] {
                if later.depends_on(earlier) {
                    dependencies[later_index].insert(earlier.id);
                }
            }
        }

        // Topological sort using Kahn's algorithm, lowest insertion index first
        let mut in_degree: Vec<usize> = dependencies.iter().map(HashSet::len).collect();
        let mut ready: BTreeSet<PassId> = self
            .pass_nodes
            .iter()
            .filter(|n| in_degree[n.id.index()] == 0)
            .map(|n| n.id)
            .collect();

        let mut sorted_passes = Vec::with_capacity(self.pass_nodes.len());
        let mut stage_of = vec![0usize; self.pass_nodes.len()];

        while let Some(pass_id) = ready.pop_first() {
            sorted_passes.push(pass_id);

            // Find passes that depend on this one
            for node in &self.pass_nodes {
                if dependencies[node.id.index()].contains(&pass_id) {
                    let next_stage = stage_of[pass_id.index()] + 1;
                    let stage = &mut stage_of[node.id.index()];
                    *stage = (*stage).max(next_stage);
                    let degree = &mut in_degree[node.id.index()];
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(node.id);
                    }
                }
            }
        }

        // Group into stages; passes within a stage have no ordering between them
        let stage_count = stage_of.iter().max().map_or(0, |max| max + 1);
        let mut stages = vec![Vec::new(); stage_count];
        for &pass_id in &sorted_passes {
            stages[stage_of[pass_id.index()]].push(pass_id);
        }
        for stage in &mut stages {
            stage.sort();
        }
        let pass_order: Vec<PassId> = stages.iter().flatten().copied().collect();

        // Determine resource lifetimes
        let mut resource_lifetimes: HashMap<ResourceId, ResourceLifetime> = HashMap::new();

        for (order, &pass_id) in pass_order.iter().enumerate() {
            let node = &self.pass_nodes[pass_id.index()];

            for access in node.accesses() {
                let lifetime = resource_lifetimes
                    .entry(access.resource)
                    .or_insert(ResourceLifetime {
                        first_use: order,
                        last_use: order,
                    });
                lifetime.last_use = order;
            }
        }

        CompiledGraph {
            pass_order,
            stages,
            resource_lifetimes,
        }
    }

    /// Get all passes
    pub fn passes(&self) -> &[Box<dyn RenderPass>] {
        &self.passes
    }

    /// Get pass nodes (metadata)
    pub fn pass_nodes(&self) -> &[PassNode] {
        &self.pass_nodes
    }

    /// Get all resources
    pub fn resources(&self) -> &[VirtualResource] {
        &self.resources
    }

    /// Get pass by ID
    pub fn get_pass(&self, id: PassId) -> Option<&dyn RenderPass> {
        self.passes.get(id.index()).map(|p| p.as_ref())
    }
}

impl Default for RenderGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Resource lifetime in terms of pass execution order
#[derive(Debug, Clone, Copy)]
pub struct ResourceLifetime {
    pub first_use: usize,
    pub last_use: usize,
}

/// Compiled render graph with execution order and resource lifetimes
#[derive(Debug)]
pub struct CompiledGraph {
    pub pass_order: Vec<PassId>,
    /// Dependency levels: every pass in `stages[n]` depends only on passes in earlier stages
    pub stages: Vec<Vec<PassId>>,
    pub resource_lifetimes: HashMap<ResourceId, ResourceLifetime>,
}

impl CompiledGraph {
    /// Check if a resource is alive at a given execution step
    pub fn is_resource_alive(&self, resource: ResourceId, step: usize) -> bool {
        if let Some(lifetime) = self.resource_lifetimes.get(&resource) {
            step >= lifetime.first_use && step <= lifetime.last_use
        } else {
            false
        }
    }

    /// Stage index a pass was placed in
    pub fn stage_of(&self, pass: PassId) -> Option<usize> {
        self.stages.iter().position(|stage| stage.contains(&pass))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::traits::BackendResult;
    use std::any::Any;

    struct TestPass {
        name: &'static str,
        reads: Vec<(ResourceId, Option<std::ops::Range<u64>>)>,
        writes: Vec<(ResourceId, Option<std::ops::Range<u64>>)>,
    }

    impl RenderPass for TestPass {
        fn name(&self) -> &str {
            self.name
        }

        fn setup(&mut self, ctx: &mut PassSetupContext) {
            for (id, range) in &self.reads {
                match range {
                    Some(r) => ctx.read_range(*id, ResourceUsage::CopySrc, r.clone()),
                    None => ctx.read(*id, ResourceUsage::StorageBufferRead),
                }
            }
            for (id, range) in &self.writes {
                match range {
                    Some(r) => ctx.write_range(*id, ResourceUsage::CopyDst, r.clone()),
                    None => ctx.write(*id, ResourceUsage::StorageBufferReadWrite),
                }
            }
        }

        fn execute(&self, _ctx: &mut PassExecuteContext) -> BackendResult<()> {
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    #[test]
    fn test_disjoint_writers_share_a_stage() {
        let mut graph = RenderGraph::new();
        let shared = graph.import_buffer("shared", BufferHandle(0));

        let a = graph.add_pass(
            TestPass {
                name: "a",
                reads: vec![],
                writes: vec![(shared, Some(0..16))],
            },
            PassType::Transfer,
        );
        let b = graph.add_pass(
            TestPass {
                name: "b",
                reads: vec![],
                writes: vec![(shared, Some(16..32))],
            },
            PassType::Transfer,
        );
        let c = graph.add_pass(
            TestPass {
                name: "c",
                reads: vec![],
                writes: vec![(shared, None)],
            },
            PassType::Compute,
        );

        let compiled = graph.compile();
        assert_eq!(compiled.stages, vec![vec![a, b], vec![c]]);
        assert_eq!(compiled.pass_order, vec![a, b, c]);
    }

    #[test]
    fn test_write_after_read_is_ordered() {
        let mut graph = RenderGraph::new();
        let buffer = graph.import_buffer("buffer", BufferHandle(0));

        let reader = graph.add_pass(
            TestPass {
                name: "reader",
                reads: vec![(buffer, None)],
                writes: vec![],
            },
            PassType::Compute,
        );
        let writer = graph.add_pass(
            TestPass {
                name: "writer",
                reads: vec![],
                writes: vec![(buffer, None)],
            },
            PassType::Compute,
        );

        let compiled = graph.compile();
        assert_eq!(compiled.stage_of(reader), Some(0));
        assert_eq!(compiled.stage_of(writer), Some(1));
    }

    #[test]
    fn test_import_is_idempotent_by_name() {
        let mut graph = RenderGraph::new();
        let first = graph.import_buffer("positions", BufferHandle(7));
        let second = graph.import_buffer("positions", BufferHandle(7));
        assert_eq!(first, second);
        assert_eq!(graph.resources().len(), 1);
        assert_eq!(graph.get_external("positions"), Some(first));
    }

    #[test]
    fn test_resource_lifetimes_follow_execution_order() {
        let mut graph = RenderGraph::new();
        let buffer = graph.import_buffer("buffer", BufferHandle(0));
        graph.add_pass(
            TestPass {
                name: "first",
                reads: vec![],
                writes: vec![(buffer, None)],
            },
            PassType::Compute,
        );
        graph.add_pass(
            TestPass {
                name: "second",
                reads: vec![(buffer, None)],
                writes: vec![],
            },
            PassType::Compute,
        );

        let compiled = graph.compile();
        assert!(compiled.is_resource_alive(buffer, 0));
        assert!(compiled.is_resource_alive(buffer, 1));
        assert!(!compiled.is_resource_alive(buffer, 2));
    }
}
