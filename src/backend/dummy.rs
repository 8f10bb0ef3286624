//! Dummy GPU backend for testing and development.
//!
//! This backend doesn't touch GPU hardware. Buffers live in CPU memory, writes and
//! transfers are applied immediately, and every recorded command is kept so tests can
//! inspect the dispatch protocol. Compute dispatches are recorded but not executed.

use crate::backend::traits::*;
use crate::backend::types::*;
use std::collections::HashMap;

/// A command captured by the [`DummyBackend`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCommand {
    BeginCommands(Option<String>),
    Submit,
    Discard,
    CopyBuffer {
        src: BufferHandle,
        src_offset: u64,
        dst: BufferHandle,
        dst_offset: u64,
        size: u64,
    },
    BeginComputePass(Option<String>),
    EndComputePass,
    SetPipeline(ComputePipelineHandle),
    SetBindGroup { index: u32, bind_group: BindGroupHandle },
    Dispatch { x: u32, y: u32, z: u32 },
}

#[derive(Debug)]
struct DummyBuffer {
    label: Option<String>,
    data: Vec<u8>,
}

/// Dummy GPU backend.
#[derive(Debug, Default)]
pub struct DummyBackend {
    buffers: HashMap<u64, DummyBuffer>,
    layouts: HashMap<u64, Vec<BindGroupLayoutEntry>>,
    bind_groups: HashMap<u64, Vec<(u32, BindGroupEntry)>>,
    pipelines: HashMap<u64, String>,

    next_buffer_id: u64,
    next_layout_id: u64,
    next_bind_group_id: u64,
    next_pipeline_id: u64,

    recording: bool,
    in_compute_pass: bool,
    commands: Vec<RecordedCommand>,
    submissions: usize,

    buffer_creations_left: Option<usize>,
    fail_bind_groups: bool,
    overflowing_writes: usize,
}

impl DummyBackend {
    /// Create a new dummy backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// All commands recorded so far, in order.
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    /// Drain the recorded command log.
    pub fn take_commands(&mut self) -> Vec<RecordedCommand> {
        std::mem::take(&mut self.commands)
    }

    /// Workgroup counts of every dispatch recorded so far.
    pub fn dispatches(&self) -> Vec<(u32, u32, u32)> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::Dispatch { x, y, z } => Some((*x, *y, *z)),
                _ => None,
            })
            .collect()
    }

    /// Number of `submit_commands` calls.
    pub fn submissions(&self) -> usize {
        self.submissions
    }

    /// CPU copy of a buffer's contents.
    pub fn buffer_data(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer.0).map(|b| b.data.as_slice())
    }

    /// Label a buffer was created with.
    pub fn buffer_label(&self, buffer: BufferHandle) -> Option<&str> {
        self.buffers.get(&buffer.0).and_then(|b| b.label.as_deref())
    }

    /// Label a compute pipeline was created with.
    pub fn pipeline_label(&self, pipeline: ComputePipelineHandle) -> Option<&str> {
        self.pipelines.get(&pipeline.0).map(String::as_str)
    }

    /// Let `count` more `create_buffer` calls succeed, then fail with `OutOfMemory`.
    /// `None` lifts the limit.
    pub fn fail_buffer_creation_after(&mut self, count: Option<usize>) {
        self.buffer_creations_left = count;
    }

    /// Make `create_bind_group` fail until switched off
    pub fn set_fail_bind_groups(&mut self, fail: bool) {
        self.fail_bind_groups = fail;
    }

    /// Writes dropped because they ran past the end of their buffer
    pub fn overflowing_writes(&self) -> usize {
        self.overflowing_writes
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_bind_group_count(&self) -> usize {
        self.bind_groups.len()
    }

    fn record(&mut self, command: RecordedCommand) {
        log::trace!("DummyBackend: {:?}", command);
        self.commands.push(command);
    }
}

impl GraphicsBackend for DummyBackend {
    fn name(&self) -> &str {
        "Dummy Backend"
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        log::trace!(
            "DummyBackend: creating buffer {:?} (size: {})",
            desc.label,
            desc.size
        );
        if let Some(left) = self.buffer_creations_left.as_mut() {
            if *left == 0 {
                return Err(BackendError::OutOfMemory);
            }
            *left -= 1;
        }
        let size = usize::try_from(desc.size).map_err(|_| BackendError::OutOfMemory)?;
        let id = self.next_buffer_id;
        self.next_buffer_id += 1;
        self.buffers.insert(
            id,
            DummyBuffer {
                label: desc.label.clone(),
                data: vec![0; size],
            },
        );
        Ok(BufferHandle(id))
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        let handle = self.create_buffer(&BufferDescriptor {
            size: data.len() as u64,
            ..desc.clone()
        })?;
        self.write_buffer(handle, 0, data);
        Ok(handle)
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        let Some(buf) = self.buffers.get_mut(&buffer.0) else {
            log::warn!("DummyBackend: write to unknown buffer {:?}", buffer);
            return;
        };
        let start = offset as usize;
        let end = start + data.len();
        if end > buf.data.len() {
            log::warn!(
                "DummyBackend: write of {} bytes at {} overflows {:?}",
                data.len(),
                offset,
                buf.label
            );
            self.overflowing_writes += 1;
            return;
        }
        buf.data[start..end].copy_from_slice(data);
    }

    fn read_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    ) -> BackendResult<Vec<u8>> {
        let buf = self.buffers.get(&buffer.0).ok_or(BackendError::InvalidHandle {
            kind: "buffer",
            id: buffer.0,
        })?;
        let start = offset as usize;
        let end = start + size as usize;
        buf.data
            .get(start..end)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| BackendError::BufferMapFailed(format!("range {start}..{end} out of bounds")))
    }

    fn create_bind_group_layout(
        &mut self,
        entries: &[BindGroupLayoutEntry],
    ) -> BackendResult<BindGroupLayoutHandle> {
        let id = self.next_layout_id;
        self.next_layout_id += 1;
        self.layouts.insert(id, entries.to_vec());
        Ok(BindGroupLayoutHandle(id))
    }

    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle> {
        if self.fail_bind_groups {
            return Err(BackendError::PipelineCreationFailed("bind group creation disabled".into()));
        }
        let layout_entries = self
            .layouts
            .get(&layout.0)
            .ok_or_else(|| BackendError::PipelineCreationFailed("Layout not found".into()))?;
        for (binding, entry) in entries {
            if !layout_entries.iter().any(|e| e.binding == *binding) {
                return Err(BackendError::PipelineCreationFailed(format!(
                    "binding {binding} is not part of the layout"
                )));
            }
            let BindGroupEntry::Buffer { buffer, .. } = entry;
            if !self.buffers.contains_key(&buffer.0) {
                return Err(BackendError::InvalidHandle {
                    kind: "buffer",
                    id: buffer.0,
                });
            }
        }

        let id = self.next_bind_group_id;
        self.next_bind_group_id += 1;
        self.bind_groups.insert(id, entries.to_vec());
        Ok(BindGroupHandle(id))
    }

    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDescriptor,
    ) -> BackendResult<ComputePipelineHandle> {
        if desc.shader.is_empty() {
            return Err(BackendError::PipelineCreationFailed("empty shader source".into()));
        }
        let id = self.next_pipeline_id;
        self.next_pipeline_id += 1;
        self.pipelines
            .insert(id, desc.label.clone().unwrap_or_else(|| desc.entry_point.clone()));
        Ok(ComputePipelineHandle(id))
    }

    fn begin_commands(&mut self, label: Option<&str>) {
        self.recording = true;
        self.record(RecordedCommand::BeginCommands(label.map(str::to_string)));
    }

    fn submit_commands(&mut self) -> BackendResult<()> {
        if !self.recording {
            return Err(BackendError::NotRecording);
        }
        if self.in_compute_pass {
            self.end_compute_pass();
        }
        self.recording = false;
        self.submissions += 1;
        self.record(RecordedCommand::Submit);
        Ok(())
    }

    fn discard_commands(&mut self) {
        self.recording = false;
        self.in_compute_pass = false;
        self.record(RecordedCommand::Discard);
    }

    fn copy_buffer_to_buffer(
        &mut self,
        src: BufferHandle,
        src_offset: u64,
        dst: BufferHandle,
        dst_offset: u64,
        size: u64,
    ) {
        self.record(RecordedCommand::CopyBuffer {
            src,
            src_offset,
            dst,
            dst_offset,
            size,
        });
        let Ok(data) = self.read_buffer(src, src_offset, size) else {
            log::warn!("DummyBackend: copy source {:?} out of range", src);
            return;
        };
        self.write_buffer(dst, dst_offset, &data);
    }

    fn begin_compute_pass(&mut self, label: Option<&str>) {
        self.in_compute_pass = true;
        self.record(RecordedCommand::BeginComputePass(label.map(str::to_string)));
    }

    fn end_compute_pass(&mut self) {
        self.in_compute_pass = false;
        self.record(RecordedCommand::EndComputePass);
    }

    fn set_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) {
        self.record(RecordedCommand::SetPipeline(pipeline));
    }

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle) {
        self.record(RecordedCommand::SetBindGroup { index, bind_group });
    }

    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32) {
        self.record(RecordedCommand::Dispatch { x, y, z });
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer.0);
    }

    fn destroy_bind_group(&mut self, bind_group: BindGroupHandle) {
        self.bind_groups.remove(&bind_group.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage(backend: &mut DummyBackend, size: u64) -> BufferHandle {
        backend
            .create_buffer(&BufferDescriptor::storage("test", size))
            .unwrap()
    }

    #[test]
    fn test_copy_applies_immediately() {
        let mut backend = DummyBackend::new();
        let src = storage(&mut backend, 16);
        let dst = storage(&mut backend, 32);
        backend.write_buffer(src, 0, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16]);

        backend.begin_commands(Some("copy"));
        backend.copy_buffer_to_buffer(src, 4, dst, 16, 8);
        backend.submit_commands().unwrap();

        let data = backend.buffer_data(dst).unwrap();
        assert_eq!(&data[16..24], &[5, 6, 7, 8, 9, 10, 11, 12]);
        assert!(data[..16].iter().all(|&b| b == 0));
        assert_eq!(backend.submissions(), 1);
    }

    #[test]
    fn test_out_of_range_write_is_ignored() {
        let mut backend = DummyBackend::new();
        let buf = storage(&mut backend, 4);
        backend.write_buffer(buf, 2, &[1, 1, 1, 1]);
        assert_eq!(backend.buffer_data(buf).unwrap(), &[0, 0, 0, 0]);
        assert_eq!(backend.overflowing_writes(), 1);
    }

    #[test]
    fn test_buffer_creation_limit() {
        let mut backend = DummyBackend::new();
        backend.fail_buffer_creation_after(Some(1));
        assert!(backend.create_buffer(&BufferDescriptor::storage("a", 4)).is_ok());
        assert!(matches!(
            backend.create_buffer(&BufferDescriptor::storage("b", 4)),
            Err(BackendError::OutOfMemory)
        ));
        backend.fail_buffer_creation_after(None);
        assert!(backend.create_buffer(&BufferDescriptor::storage("c", 4)).is_ok());
        assert_eq!(backend.live_buffer_count(), 2);
    }

    #[test]
    fn test_discard_ends_recording() {
        let mut backend = DummyBackend::new();
        backend.begin_commands(None);
        backend.begin_compute_pass(Some("pass"));
        backend.discard_commands();
        assert!(!backend.is_recording());
        assert_eq!(backend.submissions(), 0);
        assert!(backend.submit_commands().is_err());
    }

    #[test]
    fn test_submit_without_begin_fails() {
        let mut backend = DummyBackend::new();
        assert!(matches!(
            backend.submit_commands(),
            Err(BackendError::NotRecording)
        ));
    }

    #[test]
    fn test_bind_group_rejects_unknown_binding() {
        let mut backend = DummyBackend::new();
        let buf = storage(&mut backend, 16);
        let layout = backend
            .create_bind_group_layout(&[BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStageFlags::COMPUTE,
                ty: BindingType::StorageBuffer { read_only: true },
            }])
            .unwrap();

        assert!(backend
            .create_bind_group(layout, &[(0, BindGroupEntry::whole(buf))])
            .is_ok());
        assert!(backend
            .create_bind_group(layout, &[(3, BindGroupEntry::whole(buf))])
            .is_err());
    }
}
