//! Render-side owner of every cloth mesh's GPU state

use crate::backend::traits::GraphicsBackend;
use crate::cloth::buffers::ClothVertexBuffers;
use crate::cloth::deformer::ClothBatchDeformer;
use crate::cloth::grid::GridMeshData;
use crate::cloth::registry::*;
use crate::error::{ClothError, ClothResult};
use crate::ClothEngineConfig;
use glam::Vec4;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;

/// Message from a game-side mesh to the [`ClothSystem`]
#[derive(Debug)]
pub enum ClothCommand {
    Register {
        id: ClothMeshId,
        label: String,
        grid: GridMeshData,
    },
    Unregister {
        id: ClothMeshId,
    },
    Simulate(DeformCommand),
}

/// Producer handle given to cloth meshes
#[derive(Debug, Clone)]
pub struct ClothCommandSender {
    sender: Sender<ClothCommand>,
    next_id: Arc<AtomicU64>,
}

impl ClothCommandSender {
    /// Reserve a fresh mesh id
    pub fn allocate_id(&self) -> ClothMeshId {
        ClothMeshId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn send(&self, command: ClothCommand) -> ClothResult<()> {
        self.sender
            .send(command)
            .map_err(|_| ClothError::ChannelClosed)
    }
}

/// What happened during a frame
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FrameReport {
    /// Meshes simulated by batches flushed while closing the frame
    pub flushed: usize,
    /// Registered meshes that did not submit this frame
    pub missing: Vec<ClothMeshId>,
    /// Meshes that have not submitted for longer than the stale threshold
    pub stale: Vec<ClothMeshId>,
}

/// Consumes cloth commands in arrival order, owns the mesh buffers and flushes batches
pub struct ClothSystem<B: GraphicsBackend> {
    backend: B,
    sender: ClothCommandSender,
    receiver: Receiver<ClothCommand>,
    registry: ClothSimulationRegistry,
    deformer: ClothBatchDeformer,
    meshes: HashMap<ClothMeshId, ClothVertexBuffers>,
    /// Meshes whose registration was refused; their frames are dropped quietly
    refused: HashSet<ClothMeshId>,
    frame_open: bool,
}

impl<B: GraphicsBackend> ClothSystem<B> {
    pub fn new(mut backend: B, config: &ClothEngineConfig) -> ClothResult<Self> {
        let (sender, receiver) = mpsc::channel();
        let deformer = ClothBatchDeformer::new(&mut backend)?;
        log::info!("Cloth system running on {}", backend.name());

        Ok(Self {
            backend,
            sender: ClothCommandSender {
                sender,
                next_id: Arc::new(AtomicU64::new(0)),
            },
            receiver,
            registry: ClothSimulationRegistry::new(config.stale_frame_threshold),
            deformer,
            meshes: HashMap::new(),
            refused: HashSet::new(),
            frame_open: false,
        })
    }

    /// Handle for game-side meshes to talk to this system
    pub fn command_sender(&self) -> ClothCommandSender {
        self.sender.clone()
    }

    /// Apply every command received so far. Returns how many were processed.
    pub fn process_commands(&mut self) -> ClothResult<usize> {
        let mut processed = 0;
        loop {
            let command = match self.receiver.try_recv() {
                Ok(command) => command,
                Err(TryRecvError::Empty) => break,
                // The system holds a sender itself, so this only happens while dropping
                Err(TryRecvError::Disconnected) => return Err(ClothError::ChannelClosed),
            };
            self.handle(command)?;
            processed += 1;
        }
        Ok(processed)
    }

    fn handle(&mut self, command: ClothCommand) -> ClothResult<()> {
        match command {
            ClothCommand::Register { id, label, grid } => {
                match self.registry.register_mesh(id, grid.vertex_count()) {
                    Ok(_) => {}
                    Err(ClothError::TooManyMeshes { .. }) => {
                        log::debug!("Cloth mesh '{}' stays static", label);
                        self.refused.insert(id);
                        return Ok(());
                    }
                    Err(_) => return Ok(()),
                }
                match ClothVertexBuffers::new(&mut self.backend, &label, &grid) {
                    Ok(buffers) => {
                        self.meshes.insert(id, buffers);
                    }
                    Err(err) => {
                        if let Err(rollback) = self.registry.unregister_mesh(id) {
                            log::debug!("{}", rollback);
                        }
                        self.refused.insert(id);
                        return Err(err.into());
                    }
                }
            }
            ClothCommand::Unregister { id } => {
                if self.refused.remove(&id) {
                    return Ok(());
                }
                if let Err(err) = self.registry.unregister_mesh(id) {
                    log::debug!("{}", err);
                }
                if let Some(buffers) = self.meshes.remove(&id) {
                    buffers.destroy(&mut self.backend);
                }
                if let Some(batch) = self.registry.poll_ready() {
                    self.flush_batch(batch)?;
                }
            }
            ClothCommand::Simulate(deform) if self.refused.contains(&deform.mesh) => {
                log::trace!("Dropping frame of refused cloth mesh {:?}", deform.mesh);
            }
            ClothCommand::Simulate(deform) => match self.registry.enqueue_simulate_task(deform) {
                Ok(EnqueueOutcome::Ready(batch)) => {
                    self.flush_batch(batch)?;
                }
                Ok(EnqueueOutcome::Pending {
                    pending,
                    registered,
                }) => {
                    log::trace!("Cloth batch waiting: {}/{}", pending, registered);
                }
                // Commands from meshes that unregistered in the meantime
                Err(err) => log::warn!("Dropping cloth command: {}", err),
            },
        }
        Ok(())
    }

    fn flush_batch(&mut self, batch: Vec<DeformCommand>) -> ClothResult<usize> {
        let mut queued = 0;
        for command in batch {
            let Some(buffers) = self.meshes.get(&command.mesh) else {
                log::warn!("Cloth mesh {:?} has no GPU buffers", command.mesh);
                continue;
            };
            self.deformer.enqueue(&mut self.backend, buffers, command);
            queued += 1;
        }
        if queued > 0 {
            self.deformer
                .flush(&mut self.backend, &self.meshes, self.registry.capacity())?;
        }
        Ok(queued)
    }

    /// Start a frame. Pending commands are processed first.
    pub fn begin_frame(&mut self) -> ClothResult<()> {
        if self.frame_open {
            log::warn!("ClothSystem::begin_frame called twice without end_frame");
        }
        self.process_commands()?;
        self.registry.begin_frame();
        self.frame_open = true;
        Ok(())
    }

    /// Close the frame: process outstanding commands, then flush any partial batch
    pub fn end_frame(&mut self) -> ClothResult<FrameReport> {
        self.process_commands()?;
        let flush = self.registry.end_frame();
        self.frame_open = false;

        let flushed = if flush.commands.is_empty() {
            0
        } else {
            self.flush_batch(flush.commands)?
        };

        Ok(FrameReport {
            flushed,
            missing: flush.missing,
            stale: flush.stale,
        })
    }

    /// Whether the registration of `id` was refused, e.g. because the system was full
    pub fn is_refused(&self, id: ClothMeshId) -> bool {
        self.refused.contains(&id)
    }

    /// Buffers the renderer binds for a mesh
    pub fn mesh_buffers(&self, id: ClothMeshId) -> Option<&ClothVertexBuffers> {
        self.meshes.get(&id)
    }

    /// Read a mesh's current positions back from the GPU (xyz, w = inverse mass)
    pub fn read_positions(&mut self, id: ClothMeshId) -> ClothResult<Vec<Vec4>> {
        let buffers = self.meshes.get(&id).ok_or(ClothError::NotRegistered(id))?;
        let bytes = self
            .backend
            .read_buffer(buffers.position, 0, buffers.vertex_bytes())?;
        Ok(bytes
            .chunks_exact(std::mem::size_of::<Vec4>())
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }

    pub fn registry(&self) -> &ClothSimulationRegistry {
        &self.registry
    }

    pub fn deformer(&self) -> &ClothBatchDeformer {
        &self.deformer
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Release every GPU resource and hand the backend back
    pub fn shutdown(mut self) -> B {
        for (_, buffers) in self.meshes.drain() {
            buffers.destroy(&mut self.backend);
        }
        self.deformer.destroy(&mut self.backend);
        self.backend
    }
}
