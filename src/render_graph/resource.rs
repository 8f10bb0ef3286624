//! Virtual resources for the render graph

use crate::backend::traits::BufferHandle;
use crate::backend::types::*;
use std::ops::Range;

/// Unique identifier for a render graph resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub(crate) u32);

/// Virtual buffer resource in the render graph, allocated by the executor
#[derive(Debug, Clone)]
pub struct VirtualBuffer {
    pub id: ResourceId,
    pub desc: BufferDescriptor,
    pub name: String,
}

/// Resource type enumeration
#[derive(Debug, Clone)]
pub enum VirtualResource {
    /// Transient buffer owned by the graph for one execution
    Buffer(VirtualBuffer),
    /// Buffer owned outside the graph (mesh vertex buffers, working buffers)
    External {
        id: ResourceId,
        name: String,
        buffer: BufferHandle,
    },
}

impl VirtualResource {
    pub fn id(&self) -> ResourceId {
        match self {
            VirtualResource::Buffer(b) => b.id,
            VirtualResource::External { id, .. } => *id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            VirtualResource::Buffer(b) => &b.name,
            VirtualResource::External { name, .. } => name,
        }
    }
}

/// How a pass uses a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceUsage {
    /// Read as uniform buffer
    UniformBuffer,
    /// Read/write as storage buffer
    StorageBufferRead,
    StorageBufferWrite,
    StorageBufferReadWrite,
    /// Source or destination of a transfer
    CopySrc,
    CopyDst,
}

/// Resource access declaration for a pass
///
/// `range` narrows the access to a byte range; `None` covers the whole buffer.
#[derive(Debug, Clone)]
pub struct ResourceAccess {
    pub resource: ResourceId,
    pub usage: ResourceUsage,
    pub range: Option<Range<u64>>,
}
