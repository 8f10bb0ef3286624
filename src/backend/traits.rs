//! Core backend abstraction traits
//!
//! These traits define the compute/transfer interface that both the wgpu backend
//! and the recording dummy backend implement.

use crate::backend::types::*;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to create device: {0}")]
    DeviceCreationFailed(String),
    #[error("Failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("Failed to create pipeline: {0}")]
    PipelineCreationFailed(String),
    #[error("Failed to map buffer: {0}")]
    BufferMapFailed(String),
    #[error("Unknown {kind} handle {id}")]
    InvalidHandle { kind: &'static str, id: u64 },
    #[error("No command recording in progress")]
    NotRecording,
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Device lost")]
    DeviceLost,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Handle to a GPU buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub(crate) u64);

/// Handle to a compute pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ComputePipelineHandle(pub(crate) u64);

/// Handle to a bind group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindGroupHandle(pub(crate) u64);

/// Handle to a bind group layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindGroupLayoutHandle(pub(crate) u64);

/// Bind group entry for creating bind groups
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindGroupEntry {
    Buffer {
        buffer: BufferHandle,
        offset: u64,
        size: Option<u64>,
    },
}

impl BindGroupEntry {
    /// Bind a whole buffer
    pub fn whole(buffer: BufferHandle) -> Self {
        BindGroupEntry::Buffer {
            buffer,
            offset: 0,
            size: None,
        }
    }
}

/// Bind group layout entry
#[derive(Debug, Clone)]
pub struct BindGroupLayoutEntry {
    pub binding: u32,
    pub visibility: ShaderStageFlags,
    pub ty: BindingType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderStageFlags(u32);

impl ShaderStageFlags {
    pub const VERTEX: Self = Self(1 << 0);
    pub const COMPUTE: Self = Self(1 << 2);

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for ShaderStageFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Binding type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingType {
    UniformBuffer,
    StorageBuffer { read_only: bool },
}

/// Compute pipeline descriptor
#[derive(Debug, Clone)]
pub struct ComputePipelineDescriptor {
    pub label: Option<String>,
    pub shader: String,
    pub entry_point: String,
    pub bind_group_layouts: Vec<BindGroupLayoutHandle>,
}

/// Main graphics backend trait
///
/// Command recording is bracketed by [`begin_commands`](Self::begin_commands) and
/// [`submit_commands`](Self::submit_commands). Buffer writes issued through
/// [`write_buffer`](Self::write_buffer) are visible to every command submitted after them.
pub trait GraphicsBackend {
    /// Human readable backend name
    fn name(&self) -> &str;

    // Resource creation

    /// Create a buffer
    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle>;

    /// Create a buffer with initial data
    fn create_buffer_init(&mut self, desc: &BufferDescriptor, data: &[u8])
        -> BackendResult<BufferHandle>;

    /// Write data to a buffer
    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]);

    /// Read a buffer range back to the CPU, waiting for all submitted work
    fn read_buffer(&mut self, buffer: BufferHandle, offset: u64, size: u64)
        -> BackendResult<Vec<u8>>;

    // Pipeline creation

    /// Create a bind group layout
    fn create_bind_group_layout(
        &mut self,
        entries: &[BindGroupLayoutEntry],
    ) -> BackendResult<BindGroupLayoutHandle>;

    /// Create a bind group
    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle>;

    /// Create a compute pipeline
    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDescriptor,
    ) -> BackendResult<ComputePipelineHandle>;

    // Command recording and execution

    /// Start recording a command list
    fn begin_commands(&mut self, label: Option<&str>);

    /// Submit everything recorded since `begin_commands`
    fn submit_commands(&mut self) -> BackendResult<()>;

    /// Drop everything recorded since `begin_commands` without submitting it
    fn discard_commands(&mut self);

    /// Record a buffer to buffer copy
    fn copy_buffer_to_buffer(
        &mut self,
        src: BufferHandle,
        src_offset: u64,
        dst: BufferHandle,
        dst_offset: u64,
        size: u64,
    );

    /// Begin a compute pass
    fn begin_compute_pass(&mut self, label: Option<&str>);

    /// End the current compute pass
    fn end_compute_pass(&mut self);

    /// Set the compute pipeline
    fn set_compute_pipeline(&mut self, pipeline: ComputePipelineHandle);

    /// Set a bind group
    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle);

    /// Dispatch compute work
    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32);

    // Resource cleanup

    /// Destroy a buffer
    fn destroy_buffer(&mut self, buffer: BufferHandle);

    /// Destroy a bind group
    fn destroy_bind_group(&mut self, bind_group: BindGroupHandle);
}
