//! GPU buffers owned by cloth meshes and the shared working buffers

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::cloth::grid::{ClothTangent, GridMeshData};
use glam::Vec4;

/// Bytes per position / acceleration-move element (`vec4<f32>`)
pub const VERTEX_STRIDE: u64 = std::mem::size_of::<Vec4>() as u64;

/// Bytes per tangent element
pub const TANGENT_STRIDE: u64 = std::mem::size_of::<ClothTangent>() as u64;

/// Byte range of `num_vertex` elements starting at `offset`
pub fn vertex_byte_range(offset: u32, num_vertex: u32) -> std::ops::Range<u64> {
    let start = u64::from(offset) * VERTEX_STRIDE;
    start..start + u64::from(num_vertex) * VERTEX_STRIDE
}

/// Per-vertex buffers of one cloth mesh.
///
/// Positions carry the inverse mass in `w`. The renderer binds `position`, `tangent`,
/// `tex_coord` and `index`; the simulation reads and writes the rest.
#[derive(Debug)]
pub struct ClothVertexBuffers {
    pub position: BufferHandle,
    pub previous_position: BufferHandle,
    pub acceleration_move: BufferHandle,
    pub tangent: BufferHandle,
    pub tex_coord: BufferHandle,
    pub index: BufferHandle,
    pub num_vertex: u32,
    pub num_index: u32,
    pub num_row: u32,
    pub num_column: u32,
}

impl ClothVertexBuffers {
    pub fn new(
        backend: &mut dyn GraphicsBackend,
        label: &str,
        grid: &GridMeshData,
    ) -> BackendResult<Self> {
        let simulated = BufferUsage::STORAGE | BufferUsage::COPY_SRC | BufferUsage::COPY_DST;
        let descriptor = |name: &str, usage: BufferUsage| BufferDescriptor {
            label: Some(format!("{label} {name}")),
            size: 0,
            usage,
            mapped_at_creation: false,
        };

        let position = backend.create_buffer_init(
            &descriptor("Positions", simulated | BufferUsage::VERTEX),
            bytemuck::cast_slice(&grid.positions),
        )?;
        // Starts at rest: previous == current
        let previous_position = backend.create_buffer_init(
            &descriptor("Previous Positions", simulated),
            bytemuck::cast_slice(&grid.positions),
        )?;
        let acceleration_move = backend.create_buffer_init(
            &descriptor("Acceleration Moves", simulated),
            bytemuck::cast_slice(&grid.acceleration_moves),
        )?;
        let tangent = backend.create_buffer_init(
            &descriptor("Tangents", BufferUsage::STORAGE | BufferUsage::VERTEX | BufferUsage::COPY_SRC),
            bytemuck::cast_slice(&grid.tangents),
        )?;
        let tex_coord = backend.create_buffer_init(
            &descriptor("Tex Coords", BufferUsage::VERTEX),
            bytemuck::cast_slice(&grid.tex_coords),
        )?;
        let index = backend.create_buffer_init(
            &descriptor("Indices", BufferUsage::INDEX),
            bytemuck::cast_slice(&grid.indices),
        )?;

        log::debug!(
            "Created cloth buffers '{}' ({} vertices, {} indices)",
            label,
            grid.vertex_count(),
            grid.index_count()
        );

        Ok(Self {
            position,
            previous_position,
            acceleration_move,
            tangent,
            tex_coord,
            index,
            num_vertex: grid.vertex_count(),
            num_index: grid.index_count(),
            num_row: grid.num_row,
            num_column: grid.num_column,
        })
    }

    /// Byte size of one per-vertex `vec4` buffer
    pub fn vertex_bytes(&self) -> u64 {
        u64::from(self.num_vertex) * VERTEX_STRIDE
    }

    pub fn tangent_bytes(&self) -> u64 {
        u64::from(self.num_vertex) * TANGENT_STRIDE
    }

    /// Upload this frame's acceleration moves
    pub fn write_acceleration_moves(&self, backend: &mut dyn GraphicsBackend, moves: &[Vec4]) {
        debug_assert_eq!(moves.len(), self.num_vertex as usize);
        backend.write_buffer(self.acceleration_move, 0, bytemuck::cast_slice(moves));
    }

    pub fn destroy(self, backend: &mut dyn GraphicsBackend) {
        for buffer in [
            self.position,
            self.previous_position,
            self.acceleration_move,
            self.tangent,
            self.tex_coord,
            self.index,
        ] {
            backend.destroy_buffer(buffer);
        }
    }
}

/// Working buffers every registered mesh is packed into for the batched simulation
#[derive(Debug)]
pub struct ClothWorkBuffers {
    pub acceleration_move: BufferHandle,
    pub previous_position: BufferHandle,
    pub position: BufferHandle,
    capacity: u32,
}

impl ClothWorkBuffers {
    /// Allocate room for `capacity` vertices
    pub fn new(backend: &mut dyn GraphicsBackend, capacity: u32) -> BackendResult<Self> {
        let size = (u64::from(capacity) * VERTEX_STRIDE).max(VERTEX_STRIDE);
        Ok(Self {
            acceleration_move: backend
                .create_buffer(&BufferDescriptor::storage("Cloth Work Acceleration Moves", size))?,
            previous_position: backend
                .create_buffer(&BufferDescriptor::storage("Cloth Work Previous Positions", size))?,
            position: backend
                .create_buffer(&BufferDescriptor::storage("Cloth Work Positions", size))?,
            capacity,
        })
    }

    /// Capacity in vertices
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn destroy(self, backend: &mut dyn GraphicsBackend) {
        backend.destroy_buffer(self.acceleration_move);
        backend.destroy_buffer(self.previous_position);
        backend.destroy_buffer(self.position);
    }
}

/// Make sure `slot` holds working buffers for at least `capacity` vertices.
///
/// Growing reallocates without preserving contents; every flush copies its meshes in first.
pub fn ensure_work_capacity<'a>(
    slot: &'a mut Option<ClothWorkBuffers>,
    backend: &mut dyn GraphicsBackend,
    capacity: u32,
) -> BackendResult<&'a ClothWorkBuffers> {
    let too_small = slot.as_ref().map_or(true, |work| work.capacity < capacity);
    if too_small {
        if let Some(old) = slot.take() {
            old.destroy(backend);
        }
        log::debug!("Allocating cloth working buffers for {} vertices", capacity);
        *slot = Some(ClothWorkBuffers::new(backend, capacity)?);
    }
    slot.as_ref().ok_or(BackendError::OutOfMemory)
}
