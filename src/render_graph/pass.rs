//! Render pass definitions for the render graph

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::render_graph::resource::*;
use std::any::Any;
use std::collections::HashMap;
use std::ops::Range;

/// Unique identifier for a render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassId(pub(crate) u32);

impl PassId {
    /// Insertion index of the pass in its graph
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Context for setting up pass resources
pub struct PassSetupContext<'a> {
    pub(crate) resources: &'a mut Vec<VirtualResource>,
    pub(crate) inputs: &'a mut Vec<ResourceAccess>,
    pub(crate) outputs: &'a mut Vec<ResourceAccess>,
    pub(crate) next_resource_id: &'a mut u32,
}

impl<'a> PassSetupContext<'a> {
    /// Create a new transient buffer resource
    pub fn create_buffer(&mut self, name: &str, desc: BufferDescriptor) -> ResourceId {
        let id = ResourceId(*self.next_resource_id);
        *self.next_resource_id += 1;

        self.resources.push(VirtualResource::Buffer(VirtualBuffer {
            id,
            desc,
            name: name.to_string(),
        }));

        id
    }

    /// Declare that this pass reads from a resource
    pub fn read(&mut self, resource: ResourceId, usage: ResourceUsage) {
        self.inputs.push(ResourceAccess {
            resource,
            usage,
            range: None,
        });
    }

    /// Declare that this pass reads a byte range of a resource
    pub fn read_range(&mut self, resource: ResourceId, usage: ResourceUsage, range: Range<u64>) {
        self.inputs.push(ResourceAccess {
            resource,
            usage,
            range: Some(range),
        });
    }

    /// Declare that this pass writes to a resource
    pub fn write(&mut self, resource: ResourceId, usage: ResourceUsage) {
        self.outputs.push(ResourceAccess {
            resource,
            usage,
            range: None,
        });
    }

    /// Declare that this pass writes a byte range of a resource
    pub fn write_range(&mut self, resource: ResourceId, usage: ResourceUsage, range: Range<u64>) {
        self.outputs.push(ResourceAccess {
            resource,
            usage,
            range: Some(range),
        });
    }
}

/// Context for executing a render pass
pub struct PassExecuteContext<'a> {
    pub backend: &'a mut dyn GraphicsBackend,
    pub resource_buffers: &'a HashMap<ResourceId, BufferHandle>,
}

impl<'a> PassExecuteContext<'a> {
    /// Get a buffer handle for a resource
    pub fn get_buffer(&self, resource: ResourceId) -> Option<BufferHandle> {
        self.resource_buffers.get(&resource).copied()
    }

    /// Get a buffer handle, failing if the resource was never allocated or imported
    pub fn buffer(&self, resource: ResourceId) -> BackendResult<BufferHandle> {
        self.get_buffer(resource).ok_or(BackendError::InvalidHandle {
            kind: "render graph resource",
            id: u64::from(resource.0),
        })
    }
}

/// Trait for render passes
pub trait RenderPass: Send + Sync {
    /// Get the pass name for debugging
    fn name(&self) -> &str;

    /// Setup phase - declare resources and dependencies
    fn setup(&mut self, ctx: &mut PassSetupContext);

    /// Execute phase - record commands
    fn execute(&self, ctx: &mut PassExecuteContext) -> BackendResult<()>;

    /// Allow downcasting
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Type of render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassType {
    /// Compute pass
    Compute,
    /// Transfer/copy pass
    Transfer,
}

/// Metadata about a pass in the graph
#[derive(Debug)]
pub struct PassNode {
    pub id: PassId,
    pub name: String,
    pub pass_type: PassType,
    pub inputs: Vec<ResourceAccess>,
    pub outputs: Vec<ResourceAccess>,
}

impl PassNode {
    /// All declared accesses, reads first
    pub fn accesses(&self) -> impl Iterator<Item = &ResourceAccess> {
        self.inputs.iter().chain(self.outputs.iter())
    }

    /// Whether this pass must run after `earlier` because their accesses conflict
    pub fn depends_on(&self, earlier: &PassNode) -> bool {
        self.accesses()
            .any(|mine| earlier.accesses().any(|theirs| mine.conflicts_with(theirs)))
    }
}
