//! wgpu backend implementation
//!
//! Headless: no surface is created, work is recorded into a command encoder opened by
//! `begin_commands` and submitted by `submit_commands`.

use crate::backend::traits::*;
use crate::backend::types::*;
use std::collections::HashMap;
use std::sync::mpsc;
use wgpu::util::DeviceExt;

/// wgpu objects keyed by the ids inside backend handles
struct HandleTable<T> {
    entries: HashMap<u64, T>,
    next_id: u64,
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            next_id: 0,
        }
    }
}

impl<T> HandleTable<T> {
    fn insert(&mut self, value: T) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(id, value);
        id
    }

    fn get(&self, id: &u64) -> Option<&T> {
        self.entries.get(id)
    }

    fn remove(&mut self, id: &u64) -> Option<T> {
        self.entries.remove(id)
    }
}

/// Buffered compute pass command
#[derive(Clone)]
enum ComputeCommand {
    SetPipeline(ComputePipelineHandle),
    SetBindGroup { index: u32, bind_group: BindGroupHandle },
    Dispatch { x: u32, y: u32, z: u32 },
}

/// Pending compute pass with buffered commands
struct PendingComputePass {
    label: Option<String>,
    commands: Vec<ComputeCommand>,
}

/// wgpu backend implementation
pub struct WgpuBackend {
    #[allow(dead_code)]
    instance: wgpu::Instance,
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,

    buffers: HandleTable<wgpu::Buffer>,
    bind_group_layouts: HandleTable<wgpu::BindGroupLayout>,
    bind_groups: HandleTable<wgpu::BindGroup>,
    compute_pipelines: HandleTable<wgpu::ComputePipeline>,

    // Command encoding
    encoder: Option<wgpu::CommandEncoder>,

    // Compute commands are buffered here and replayed on end_compute_pass
    pending_compute_pass: Option<PendingComputePass>,
}

impl WgpuBackend {
    fn convert_buffer_usage(usage: BufferUsage) -> wgpu::BufferUsages {
        let mut result = wgpu::BufferUsages::empty();
        if usage.contains(BufferUsage::MAP_READ) {
            result |= wgpu::BufferUsages::MAP_READ;
        }
        if usage.contains(BufferUsage::COPY_SRC) {
            result |= wgpu::BufferUsages::COPY_SRC;
        }
        if usage.contains(BufferUsage::COPY_DST) {
            result |= wgpu::BufferUsages::COPY_DST;
        }
        if usage.contains(BufferUsage::INDEX) {
            result |= wgpu::BufferUsages::INDEX;
        }
        if usage.contains(BufferUsage::VERTEX) {
            result |= wgpu::BufferUsages::VERTEX;
        }
        if usage.contains(BufferUsage::UNIFORM) {
            result |= wgpu::BufferUsages::UNIFORM;
        }
        if usage.contains(BufferUsage::STORAGE) {
            result |= wgpu::BufferUsages::STORAGE;
        }
        result
    }

    fn convert_power_preference(preference: PowerPreference) -> wgpu::PowerPreference {
        match preference {
            PowerPreference::LowPower => wgpu::PowerPreference::LowPower,
            PowerPreference::HighPerformance => wgpu::PowerPreference::HighPerformance,
        }
    }

    fn buffer(&self, handle: BufferHandle) -> BackendResult<&wgpu::Buffer> {
        self.buffers.get(&handle.0).ok_or(BackendError::InvalidHandle {
            kind: "buffer",
            id: handle.0,
        })
    }
}

impl WgpuBackend {
    /// Create a new headless wgpu backend asynchronously
    pub async fn new_async(power_preference: PowerPreference) -> BackendResult<Self> {
        let (instance, adapter, device, queue) = Self::init_headless(power_preference).await?;

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
            buffers: HandleTable::default(),
            bind_group_layouts: HandleTable::default(),
            bind_groups: HandleTable::default(),
            compute_pipelines: HandleTable::default(),
            encoder: None,
            pending_compute_pass: None,
        })
    }

    /// Create a new headless wgpu backend, blocking on adapter and device requests
    #[cfg(not(target_arch = "wasm32"))]
    pub fn new(power_preference: PowerPreference) -> BackendResult<Self> {
        pollster::block_on(Self::new_async(power_preference))
    }

    async fn init_headless(
        power_preference: PowerPreference,
    ) -> BackendResult<(wgpu::Instance, wgpu::Adapter, wgpu::Device, wgpu::Queue)> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: Self::convert_power_preference(power_preference),
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| BackendError::InitializationFailed("No suitable adapter found".into()))?;

        let adapter_info = adapter.get_info();
        log::info!(
            "Selected GPU: {} ({:?} backend)",
            adapter_info.name,
            adapter_info.backend
        );

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Cloth Compute Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .map_err(|e| BackendError::DeviceCreationFailed(e.to_string()))?;

        Ok((instance, adapter, device, queue))
    }
}

impl GraphicsBackend for WgpuBackend {
    fn name(&self) -> &str {
        "wgpu"
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        if desc.size > self.device.limits().max_buffer_size {
            return Err(BackendError::BufferCreationFailed(format!(
                "{:?} is {} bytes, limit is {}",
                desc.label,
                desc.size,
                self.device.limits().max_buffer_size
            )));
        }

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: desc.label.as_deref(),
            size: desc.size,
            usage: Self::convert_buffer_usage(desc.usage),
            mapped_at_creation: desc.mapped_at_creation,
        });

        Ok(BufferHandle(self.buffers.insert(buffer)))
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: desc.label.as_deref(),
            contents: data,
            usage: Self::convert_buffer_usage(desc.usage),
        });

        Ok(BufferHandle(self.buffers.insert(buffer)))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        if let Some(buf) = self.buffers.get(&buffer.0) {
            self.queue.write_buffer(buf, offset, data);
        } else {
            log::warn!("write_buffer: unknown buffer {:?}", buffer);
        }
    }

    fn read_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    ) -> BackendResult<Vec<u8>> {
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Copy Encoder"),
            });
        encoder.copy_buffer_to_buffer(self.buffer(buffer)?, offset, &staging, 0, size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let (tx, rx) = mpsc::channel();
        staging
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                let _ = tx.send(result);
            });
        self.device.poll(wgpu::Maintain::Wait);

        match rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(BackendError::BufferMapFailed(e.to_string())),
            Err(_) => return Err(BackendError::DeviceLost),
        }

        let data = staging.slice(..).get_mapped_range().to_vec();
        staging.unmap();
        Ok(data)
    }

    fn create_bind_group_layout(
        &mut self,
        entries: &[BindGroupLayoutEntry],
    ) -> BackendResult<BindGroupLayoutHandle> {
        let wgpu_entries: Vec<wgpu::BindGroupLayoutEntry> = entries
            .iter()
            .map(|e| {
                let ty = match e.ty {
                    BindingType::UniformBuffer => wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    BindingType::StorageBuffer { read_only } => wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                };

                let mut visibility = wgpu::ShaderStages::empty();
                if e.visibility.contains(ShaderStageFlags::VERTEX) {
                    visibility |= wgpu::ShaderStages::VERTEX;
                }
                if e.visibility.contains(ShaderStageFlags::COMPUTE) {
                    visibility |= wgpu::ShaderStages::COMPUTE;
                }

                wgpu::BindGroupLayoutEntry {
                    binding: e.binding,
                    visibility,
                    ty,
                    count: None,
                }
            })
            .collect();

        let layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: None,
                entries: &wgpu_entries,
            });

        Ok(BindGroupLayoutHandle(self.bind_group_layouts.insert(layout)))
    }

    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle> {
        let layout_ref = self
            .bind_group_layouts
            .get(&layout.0)
            .ok_or_else(|| BackendError::PipelineCreationFailed("Layout not found".into()))?;

        let mut wgpu_entries = Vec::with_capacity(entries.len());
        for (binding, entry) in entries {
            let BindGroupEntry::Buffer {
                buffer,
                offset,
                size,
            } = entry;
            let buf = self.buffers.get(&buffer.0).ok_or(BackendError::InvalidHandle {
                kind: "buffer",
                id: buffer.0,
            })?;
            wgpu_entries.push(wgpu::BindGroupEntry {
                binding: *binding,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: buf,
                    offset: *offset,
                    size: size.and_then(std::num::NonZeroU64::new),
                }),
            });
        }

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout: layout_ref,
            entries: &wgpu_entries,
        });

        Ok(BindGroupHandle(self.bind_groups.insert(bind_group)))
    }

    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDescriptor,
    ) -> BackendResult<ComputePipelineHandle> {
        let shader = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: desc.label.as_deref(),
                source: wgpu::ShaderSource::Wgsl(desc.shader.as_str().into()),
            });

        let layouts: Vec<&wgpu::BindGroupLayout> = desc
            .bind_group_layouts
            .iter()
            .filter_map(|h| self.bind_group_layouts.get(&h.0))
            .collect();
        if layouts.len() != desc.bind_group_layouts.len() {
            return Err(BackendError::PipelineCreationFailed(format!(
                "{:?}: unknown bind group layout",
                desc.label
            )));
        }

        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: None,
                bind_group_layouts: &layouts,
                push_constant_ranges: &[],
            });

        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: desc.label.as_deref(),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: &desc.entry_point,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            });

        Ok(ComputePipelineHandle(self.compute_pipelines.insert(pipeline)))
    }

    fn begin_commands(&mut self, label: Option<&str>) {
        if self.encoder.is_some() {
            log::warn!("begin_commands called while already recording, discarding previous commands");
            self.discard_commands();
        }
        self.encoder = Some(
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor { label }),
        );
    }

    fn submit_commands(&mut self) -> BackendResult<()> {
        if self.pending_compute_pass.is_some() {
            self.end_compute_pass();
        }
        let encoder = self.encoder.take().ok_or(BackendError::NotRecording)?;
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn discard_commands(&mut self) {
        self.pending_compute_pass = None;
        if self.encoder.take().is_some() {
            log::debug!("Discarded unsubmitted commands");
        }
    }

    fn copy_buffer_to_buffer(
        &mut self,
        src: BufferHandle,
        src_offset: u64,
        dst: BufferHandle,
        dst_offset: u64,
        size: u64,
    ) {
        let Some(encoder) = self.encoder.as_mut() else {
            log::warn!("copy_buffer_to_buffer outside of begin_commands/submit_commands");
            return;
        };
        let (Some(src_buf), Some(dst_buf)) = (self.buffers.get(&src.0), self.buffers.get(&dst.0))
        else {
            log::warn!("copy_buffer_to_buffer: unknown buffer {:?} -> {:?}", src, dst);
            return;
        };
        encoder.copy_buffer_to_buffer(src_buf, src_offset, dst_buf, dst_offset, size);
    }

    fn begin_compute_pass(&mut self, label: Option<&str>) {
        self.pending_compute_pass = Some(PendingComputePass {
            label: label.map(|s| s.to_string()),
            commands: Vec::new(),
        });
    }

    fn end_compute_pass(&mut self) {
        let Some(pending) = self.pending_compute_pass.take() else {
            return;
        };

        let Some(encoder) = self.encoder.as_mut() else {
            log::warn!("compute pass {:?} ended outside of command recording", pending.label);
            return;
        };

        let compute_pipelines = &self.compute_pipelines;
        let bind_groups = &self.bind_groups;

        {
            let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: pending.label.as_deref(),
                timestamp_writes: None,
            });

            for cmd in &pending.commands {
                match cmd {
                    ComputeCommand::SetPipeline(handle) => {
                        if let Some(pipeline) = compute_pipelines.get(&handle.0) {
                            compute_pass.set_pipeline(pipeline);
                        }
                    }
                    ComputeCommand::SetBindGroup { index, bind_group } => {
                        if let Some(bg) = bind_groups.get(&bind_group.0) {
                            compute_pass.set_bind_group(*index, bg, &[]);
                        }
                    }
                    ComputeCommand::Dispatch { x, y, z } => {
                        compute_pass.dispatch_workgroups(*x, *y, *z);
                    }
                }
            }
        }
    }

    fn set_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) {
        if let Some(ref mut pending) = self.pending_compute_pass {
            pending.commands.push(ComputeCommand::SetPipeline(pipeline));
        }
    }

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle) {
        if let Some(ref mut pending) = self.pending_compute_pass {
            pending.commands.push(ComputeCommand::SetBindGroup { index, bind_group });
        }
    }

    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32) {
        if let Some(ref mut pending) = self.pending_compute_pass {
            pending.commands.push(ComputeCommand::Dispatch { x, y, z });
        }
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer.0);
    }

    fn destroy_bind_group(&mut self, bind_group: BindGroupHandle) {
        self.bind_groups.remove(&bind_group.0);
    }
}

impl WgpuBackend {
    /// Information about the selected adapter
    pub fn adapter_info(&self) -> wgpu::AdapterInfo {
        self.adapter.get_info()
    }

    /// Look up the wgpu buffer behind a handle, e.g. to bind cloth positions as vertex input
    pub fn raw_buffer(&self, handle: BufferHandle) -> Option<&wgpu::Buffer> {
        self.buffers.get(&handle.0)
    }
}
