//! Game-side cloth grid component

use crate::cloth::deriver::ClothFrameParameterDeriver;
use crate::cloth::grid::{ClothSettings, GridMeshData};
use crate::cloth::registry::{ClothMeshId, DeformCommand};
use crate::cloth::system::{ClothCommand, ClothCommandSender};
use crate::cloth::wind::ClothWind;
use crate::error::{ClothError, ClothResult};
use crate::scene::{Transform, WorldSphere};
use glam::Vec3;

/// A cloth grid placed in the world.
///
/// Lives on the game side: it tracks its own motion, derives the frame's simulation
/// constants and sends them to the [`ClothSystem`](crate::cloth::ClothSystem) it is
/// registered with.
pub struct ClothGridMesh {
    label: String,
    transform: Transform,
    settings: Option<ClothSettings>,
    grid: Option<GridMeshData>,
    deriver: Option<ClothFrameParameterDeriver>,
    sender: Option<ClothCommandSender>,
    id: Option<ClothMeshId>,
}

impl ClothGridMesh {
    pub fn new(label: impl Into<String>, transform: Transform) -> Self {
        Self {
            label: label.into(),
            transform,
            settings: None,
            grid: None,
            deriver: None,
            sender: None,
            id: None,
        }
    }

    /// Validate `settings` and rebuild the grid.
    ///
    /// A registered mesh is re-registered with the new topology.
    pub fn init_cloth_settings(&mut self, settings: ClothSettings) -> ClothResult<()> {
        let grid = GridMeshData::build(&settings)?;

        let sender = if self.id.is_some() {
            let sender = self.sender.clone();
            self.unregister()?;
            sender
        } else {
            None
        };

        self.deriver = Some(ClothFrameParameterDeriver::new(
            &settings,
            self.transform.position,
        ));
        self.grid = Some(grid);
        self.settings = Some(settings);

        if let Some(sender) = sender {
            self.register(Some(&sender))?;
        }
        Ok(())
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn settings(&self) -> Option<&ClothSettings> {
        self.settings.as_ref()
    }

    pub fn grid(&self) -> Option<&GridMeshData> {
        self.grid.as_ref()
    }

    pub fn id(&self) -> Option<ClothMeshId> {
        self.id
    }

    pub fn is_registered(&self) -> bool {
        self.id.is_some()
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    pub fn set_transform(&mut self, transform: Transform) {
        self.transform = transform;
    }

    pub fn set_location(&mut self, location: Vec3) {
        self.transform.position = location;
    }

    /// Measured velocity of the mesh, zero before the first frame
    pub fn velocity(&self) -> Vec3 {
        self.deriver
            .as_ref()
            .map_or(Vec3::ZERO, ClothFrameParameterDeriver::current_velocity)
    }

    /// Register with the system behind `sender`.
    ///
    /// Without a sender the error is logged and the mesh stays static.
    pub fn register(&mut self, sender: Option<&ClothCommandSender>) -> ClothResult<()> {
        let Some(sender) = sender else {
            log::error!("Cloth mesh '{}' has no cloth system to register with", self.label);
            return Ok(());
        };
        if let Some(id) = self.id {
            log::error!("Cloth mesh '{}' is already registered", self.label);
            return Err(ClothError::AlreadyRegistered(id));
        }
        let grid = self
            .grid
            .clone()
            .ok_or_else(|| ClothError::NotInitialized(self.label.clone()))?;

        let id = sender.allocate_id();
        sender.send(ClothCommand::Register {
            id,
            label: self.label.clone(),
            grid,
        })?;
        log::debug!("Cloth mesh '{}' registered as {:?}", self.label, id);

        self.id = Some(id);
        self.sender = Some(sender.clone());
        Ok(())
    }

    /// Leave the system. Does nothing if not registered.
    pub fn unregister(&mut self) -> ClothResult<()> {
        let Some(id) = self.id.take() else {
            return Ok(());
        };
        match self.sender.take() {
            Some(sender) => sender.send(ClothCommand::Unregister { id }),
            None => Ok(()),
        }
    }

    /// Skip velocity measurement on the next frame, e.g. after a teleport
    pub fn ignore_velocity_discontinuity_next_frame(&mut self) {
        if let Some(deriver) = &mut self.deriver {
            deriver.ignore_velocity_discontinuity_next_frame();
        }
    }

    /// Derive this frame's parameters and send them for simulation.
    ///
    /// Returns `false` when nothing was sent: the mesh is unregistered or `delta_time`
    /// is not positive (paused frames).
    pub fn send_render_dynamic_data(
        &mut self,
        delta_time: f32,
        wind: &mut ClothWind,
        colliders: &[WorldSphere],
    ) -> ClothResult<bool> {
        let (Some(id), Some(sender), Some(deriver)) =
            (self.id, self.sender.as_ref(), self.deriver.as_mut())
        else {
            return Ok(false);
        };
        if delta_time <= 0.0 {
            log::trace!("Cloth mesh '{}' skipped frame with dt {}", self.label, delta_time);
            return Ok(false);
        }

        let frame = deriver.derive(delta_time, &self.transform, wind.sample(), colliders);
        sender.send(ClothCommand::Simulate(DeformCommand {
            mesh: id,
            parameters: frame.parameters,
            acceleration_moves: frame.acceleration_moves,
        }))?;
        Ok(true)
    }
}

impl Drop for ClothGridMesh {
    fn drop(&mut self) {
        if let Err(err) = self.unregister() {
            log::debug!("Cloth mesh '{}' dropped: {}", self.label, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::cloth::system::ClothSystem;
    use crate::ClothEngineConfig;

    fn small_settings() -> ClothSettings {
        ClothSettings {
            num_row: 2,
            num_column: 2,
            ..Default::default()
        }
    }

    fn system() -> ClothSystem<DummyBackend> {
        ClothSystem::new(DummyBackend::new(), &ClothEngineConfig::default()).unwrap()
    }

    #[test]
    fn test_register_requires_settings() {
        let system = system();
        let sender = system.command_sender();
        let mut mesh = ClothGridMesh::new("Flag", Transform::default());
        assert!(matches!(
            mesh.register(Some(&sender)),
            Err(ClothError::NotInitialized(_))
        ));
        assert!(!mesh.is_registered());
    }

    #[test]
    fn test_register_without_system_stays_static() {
        let mut mesh = ClothGridMesh::new("Flag", Transform::default());
        mesh.init_cloth_settings(small_settings()).unwrap();
        mesh.register(None).unwrap();
        assert!(!mesh.is_registered());

        let mut wind = ClothWind::default();
        assert!(!mesh.send_render_dynamic_data(1.0 / 60.0, &mut wind, &[]).unwrap());
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        let mut mesh = ClothGridMesh::new("Flag", Transform::default());
        let result = mesh.init_cloth_settings(ClothSettings {
            num_iteration: 0,
            ..small_settings()
        });
        assert!(matches!(result, Err(ClothError::InvalidIterationCount)));
        assert!(mesh.grid().is_none());
    }

    #[test]
    fn test_frame_reaches_the_system() {
        let mut system = system();
        let sender = system.command_sender();
        let mut mesh = ClothGridMesh::new("Flag", Transform::default());
        mesh.init_cloth_settings(small_settings()).unwrap();
        mesh.register(Some(&sender)).unwrap();
        assert!(matches!(
            mesh.register(Some(&sender)),
            Err(ClothError::AlreadyRegistered(_))
        ));
        system.process_commands().unwrap();

        let mut wind = ClothWind::default();
        assert!(!mesh.send_render_dynamic_data(0.0, &mut wind, &[]).unwrap());
        assert!(mesh.send_render_dynamic_data(1.0 / 60.0, &mut wind, &[]).unwrap());
        system.process_commands().unwrap();
        assert_eq!(system.backend().submissions(), 1);
    }

    #[test]
    fn test_drop_unregisters() {
        let mut system = system();
        let sender = system.command_sender();
        let mut mesh = ClothGridMesh::new("Flag", Transform::default());
        mesh.init_cloth_settings(small_settings()).unwrap();
        mesh.register(Some(&sender)).unwrap();
        let id = mesh.id().unwrap();
        system.process_commands().unwrap();
        assert!(system.registry().is_registered(id));

        drop(mesh);
        system.process_commands().unwrap();
        assert!(!system.registry().is_registered(id));
        assert!(system.mesh_buffers(id).is_none());
    }

    #[test]
    fn test_reinit_reregisters_with_new_topology() {
        let mut system = system();
        let sender = system.command_sender();
        let mut mesh = ClothGridMesh::new("Flag", Transform::default());
        mesh.init_cloth_settings(small_settings()).unwrap();
        mesh.register(Some(&sender)).unwrap();
        let first = mesh.id().unwrap();

        mesh.init_cloth_settings(ClothSettings {
            num_row: 4,
            ..small_settings()
        })
        .unwrap();
        let second = mesh.id().unwrap();
        assert_ne!(first, second);

        system.process_commands().unwrap();
        assert!(!system.registry().is_registered(first));
        assert_eq!(system.mesh_buffers(second).unwrap().num_vertex, 15);
    }

    #[test]
    fn test_teleport_keeps_velocity() {
        let system = system();
        let sender = system.command_sender();
        let mut mesh = ClothGridMesh::new("Flag", Transform::default());
        mesh.init_cloth_settings(small_settings()).unwrap();
        mesh.register(Some(&sender)).unwrap();

        let mut wind = ClothWind::default();
        mesh.set_location(Vec3::new(1000.0, 0.0, 0.0));
        mesh.ignore_velocity_discontinuity_next_frame();
        mesh.send_render_dynamic_data(1.0 / 60.0, &mut wind, &[]).unwrap();
        assert_eq!(mesh.velocity(), Vec3::ZERO);

        // Regular motion afterwards is measured again
        mesh.set_transform(Transform::from_position(Vec3::new(1010.0, 0.0, 0.0)));
        mesh.send_render_dynamic_data(0.5, &mut wind, &[]).unwrap();
        assert!(mesh.velocity().abs_diff_eq(Vec3::new(20.0, 0.0, 0.0), 1e-3));
    }
}
