//! Render graph executor

use crate::backend::traits::*;
use crate::render_graph::graph::*;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use std::collections::HashMap;

/// Executor for running the compiled render graph
pub struct RenderGraphExecutor {
    /// Transient buffers allocated for the current graph
    allocated_buffers: HashMap<ResourceId, BufferHandle>,

    /// Imported buffers, owned elsewhere
    external_buffers: HashMap<ResourceId, BufferHandle>,
}

impl RenderGraphExecutor {
    pub fn new() -> Self {
        Self {
            allocated_buffers: HashMap::new(),
            external_buffers: HashMap::new(),
        }
    }

    /// Allocate resources needed for the render graph
    pub fn allocate_resources(
        &mut self,
        graph: &RenderGraph,
        backend: &mut dyn GraphicsBackend,
    ) -> BackendResult<()> {
        for resource in graph.resources() {
            match resource {
                VirtualResource::Buffer(buf) => {
                    if !self.allocated_buffers.contains_key(&buf.id) {
                        let handle = backend.create_buffer(&buf.desc)?;
                        self.allocated_buffers.insert(buf.id, handle);
                    }
                }
                VirtualResource::External { id, buffer, .. } => {
                    self.external_buffers.insert(*id, *buffer);
                }
            }
        }

        Ok(())
    }

    /// Execute the render graph, stopping at the first pass that fails
    pub fn execute(
        &self,
        graph: &RenderGraph,
        compiled: &CompiledGraph,
        backend: &mut dyn GraphicsBackend,
    ) -> BackendResult<()> {
        let mut buffers = self.allocated_buffers.clone();
        buffers.extend(self.external_buffers.iter().map(|(&k, &v)| (k, v)));

        for &pass_id in &compiled.pass_order {
            if let Some(pass) = graph.get_pass(pass_id) {
                log::trace!("Executing pass '{}'", pass.name());
                let mut ctx = PassExecuteContext {
                    backend: &mut *backend,
                    resource_buffers: &buffers,
                };

                pass.execute(&mut ctx)?;
            }
        }

        Ok(())
    }

    /// Clean up allocated resources
    pub fn cleanup(&mut self, backend: &mut dyn GraphicsBackend) {
        for (_, handle) in self.allocated_buffers.drain() {
            backend.destroy_buffer(handle);
        }

        self.external_buffers.clear();
    }
}

impl Default for RenderGraphExecutor {
    fn default() -> Self {
        Self::new()
    }
}
