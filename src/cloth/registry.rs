//! Bookkeeping for meshes that share the batched simulation

use crate::cloth::parameters::{ClothParameterBlock, MAX_CLOTH_MESH};
use crate::error::{ClothError, ClothResult};
use glam::Vec4;
use std::collections::BTreeMap;
use std::ops::Range;

/// Identifier of a cloth mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClothMeshId(pub(crate) u64);

impl ClothMeshId {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Where a mesh lives in the working buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshSlot {
    pub offset: u32,
    pub num_vertex: u32,
}

impl MeshSlot {
    /// Vertex range in the working buffers
    pub fn range(&self) -> Range<u32> {
        self.offset..self.offset + self.num_vertex
    }
}

/// One mesh's request to be simulated this frame
#[derive(Debug, Clone)]
pub struct DeformCommand {
    pub mesh: ClothMeshId,
    pub parameters: ClothParameterBlock,
    pub acceleration_moves: Vec<Vec4>,
}

/// Result of queueing a deform command
#[derive(Debug)]
pub enum EnqueueOutcome {
    /// Still waiting on other meshes
    Pending { pending: usize, registered: usize },
    /// Every registered mesh has submitted; flush this batch
    Ready(Vec<DeformCommand>),
}

/// What closing a frame produced
#[derive(Debug, Default)]
pub struct FrameFlush {
    /// Partial batch to flush now
    pub commands: Vec<DeformCommand>,
    /// Registered meshes that did not submit this frame
    pub missing: Vec<ClothMeshId>,
    /// Meshes that have missed more consecutive frames than allowed
    pub stale: Vec<ClothMeshId>,
}

#[derive(Debug)]
struct MeshEntry {
    slot: MeshSlot,
    submitted_this_frame: bool,
    missed_frames: u32,
}

/// Tracks registered meshes, their working-buffer slots and the pending batch.
///
/// Offsets are handed out from a high-water mark: unregistering never compacts, so ranges
/// of meshes that stay registered never move and never overlap.
#[derive(Debug)]
pub struct ClothSimulationRegistry {
    meshes: BTreeMap<ClothMeshId, MeshEntry>,
    pending: Vec<DeformCommand>,
    next_offset: u32,
    stale_frame_threshold: u32,
}

impl ClothSimulationRegistry {
    pub fn new(stale_frame_threshold: u32) -> Self {
        Self {
            meshes: BTreeMap::new(),
            pending: Vec::with_capacity(MAX_CLOTH_MESH),
            next_offset: 0,
            stale_frame_threshold,
        }
    }

    /// Assign a working-buffer slot to a mesh
    pub fn register_mesh(&mut self, id: ClothMeshId, num_vertex: u32) -> ClothResult<MeshSlot> {
        if self.meshes.contains_key(&id) {
            log::error!("Cloth mesh {:?} is already registered", id);
            return Err(ClothError::AlreadyRegistered(id));
        }
        if self.meshes.len() >= MAX_CLOTH_MESH {
            log::error!(
                "Cannot register cloth mesh {:?}: {} meshes already registered",
                id,
                MAX_CLOTH_MESH
            );
            return Err(ClothError::TooManyMeshes { max: MAX_CLOTH_MESH });
        }

        let slot = MeshSlot {
            offset: self.next_offset,
            num_vertex,
        };
        self.next_offset += num_vertex;
        self.meshes.insert(
            id,
            MeshEntry {
                slot,
                submitted_this_frame: false,
                missed_frames: 0,
            },
        );
        log::debug!(
            "Registered cloth mesh {:?} at vertices {:?} (capacity {})",
            id,
            slot.range(),
            self.next_offset
        );
        Ok(slot)
    }

    /// Forget a mesh and drop its pending command
    pub fn unregister_mesh(&mut self, id: ClothMeshId) -> ClothResult<MeshSlot> {
        let entry = self.meshes.remove(&id).ok_or(ClothError::NotRegistered(id))?;
        self.pending.retain(|command| command.mesh != id);
        log::debug!("Unregistered cloth mesh {:?}", id);
        Ok(entry.slot)
    }

    /// Queue a mesh's command. The batch is released once every registered mesh has one queued.
    pub fn enqueue_simulate_task(
        &mut self,
        mut command: DeformCommand,
    ) -> ClothResult<EnqueueOutcome> {
        let entry = self
            .meshes
            .get_mut(&command.mesh)
            .ok_or(ClothError::NotRegistered(command.mesh))?;

        let slot = entry.slot;
        if command.parameters.num_vertex != slot.num_vertex
            || command.acceleration_moves.len() != slot.num_vertex as usize
        {
            return Err(ClothError::VertexCountMismatch {
                mesh: command.mesh,
                expected: slot.num_vertex,
                actual: command.parameters.num_vertex,
            });
        }
        command.parameters.vertex_index_offset = slot.offset;
        entry.submitted_this_frame = true;

        if let Some(existing) = self.pending.iter_mut().find(|c| c.mesh == command.mesh) {
            log::warn!(
                "Cloth mesh {:?} submitted twice in one batch; keeping the newest",
                command.mesh
            );
            *existing = command;
        } else {
            self.pending.push(command);
        }

        Ok(match self.poll_ready() {
            Some(batch) => EnqueueOutcome::Ready(batch),
            None => EnqueueOutcome::Pending {
                pending: self.pending.len(),
                registered: self.meshes.len(),
            },
        })
    }

    /// Take the pending batch if every registered mesh is in it
    pub fn poll_ready(&mut self) -> Option<Vec<DeformCommand>> {
        if !self.pending.is_empty() && self.pending.len() >= self.meshes.len() {
            Some(std::mem::take(&mut self.pending))
        } else {
            None
        }
    }

    /// Start tracking which meshes submit this frame
    pub fn begin_frame(&mut self) {
        for entry in self.meshes.values_mut() {
            entry.submitted_this_frame = false;
        }
    }

    /// Close the frame: release any partial batch and audit meshes that did not submit
    pub fn end_frame(&mut self) -> FrameFlush {
        let mut flush = FrameFlush {
            commands: std::mem::take(&mut self.pending),
            ..Default::default()
        };

        for (&id, entry) in &mut self.meshes {
            if entry.submitted_this_frame {
                entry.missed_frames = 0;
                continue;
            }
            entry.missed_frames += 1;
            flush.missing.push(id);
            if entry.missed_frames > self.stale_frame_threshold {
                log::warn!(
                    "Cloth mesh {:?} has not submitted for {} frames",
                    id,
                    entry.missed_frames
                );
                flush.stale.push(id);
            }
        }

        if !flush.commands.is_empty() && !flush.missing.is_empty() {
            log::debug!(
                "Flushing partial cloth batch: {} submitted, {} missing",
                flush.commands.len(),
                flush.missing.len()
            );
        }
        flush
    }

    pub fn slot(&self, id: ClothMeshId) -> Option<MeshSlot> {
        self.meshes.get(&id).map(|entry| entry.slot)
    }

    pub fn is_registered(&self, id: ClothMeshId) -> bool {
        self.meshes.contains_key(&id)
    }

    pub fn registered_count(&self) -> usize {
        self.meshes.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Working-buffer capacity in vertices. Only ever grows.
    pub fn capacity(&self) -> u32 {
        self.next_offset
    }

    pub fn missed_frames(&self, id: ClothMeshId) -> Option<u32> {
        self.meshes.get(&id).map(|entry| entry.missed_frames)
    }
}

impl Default for ClothSimulationRegistry {
    fn default() -> Self {
        Self::new(3)
    }
}
