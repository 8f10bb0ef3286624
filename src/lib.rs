//! Cloth Engine - batched GPU cloth simulation on a render graph
//!
//! Up to [`MAX_CLOTH_MESH`] cloth grids share a single simulation dispatch per frame.
//! Each flush is a render graph of four stages: copy every mesh into a merged working
//! buffer, simulate all of them in one compute dispatch, copy the results back, and
//! recompute each mesh's tangent frames.
//!
//! # Backends
//! - **wgpu**: headless compute on any adapter wgpu supports
//! - **Dummy**: CPU-side recorder used by tests and tooling
//!
//! # Threading
//! Game-side [`ClothGridMesh`]es send commands over a channel; the render-side
//! [`ClothSystem`] owns the backend and processes them in arrival order.

pub mod backend;
pub mod cloth;
pub mod error;
#[cfg(not(target_arch = "wasm32"))]
pub mod logging;
pub mod pipeline;
pub mod render_graph;
pub mod scene;

pub use backend::{DummyBackend, GraphicsBackend, PowerPreference};
pub use cloth::{
    ClothCommandSender, ClothGridMesh, ClothMeshId, ClothSettings, ClothSystem, ClothWind,
    FrameReport, MAX_CLOTH_MESH, MAX_SPHERE_COLLISION_PER_MESH,
};
pub use error::{ClothError, ClothResult};
pub use scene::{SharedColliderRegistry, SphereCollider, SphereColliderRegistry, Transform};

// Re-export wgpu backend for direct access
pub use backend::wgpu_backend::WgpuBackend;

use glam::Vec3;

/// Configuration for a cloth engine instance
#[derive(Debug, Clone)]
pub struct ClothEngineConfig {
    /// Global wind velocity in world space (cm/s)
    pub wind_velocity: Vec3,
    /// Seed of the wind gust generator
    pub wind_seed: u64,
    /// Consecutive missed frames before a mesh is reported as stale
    pub stale_frame_threshold: u32,
    /// Which adapter the wgpu backend asks for
    pub power_preference: PowerPreference,
    /// Settings given to meshes that are not configured explicitly
    pub default_settings: ClothSettings,
}

impl Default for ClothEngineConfig {
    fn default() -> Self {
        Self {
            wind_velocity: Vec3::ZERO,
            wind_seed: 0,
            stale_frame_threshold: 3,
            power_preference: PowerPreference::default(),
            default_settings: ClothSettings::default(),
        }
    }
}

impl ClothEngineConfig {
    /// Game-side wind seeded from this config
    pub fn wind(&self) -> ClothWind {
        ClothWind::new(self.wind_velocity, self.wind_seed)
    }

    /// Create a wgpu backend and a cloth system running on it
    #[cfg(not(target_arch = "wasm32"))]
    pub fn create_wgpu_system(&self) -> ClothResult<ClothSystem<WgpuBackend>> {
        let backend = WgpuBackend::new(self.power_preference)?;
        ClothSystem::new(backend, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ClothEngineConfig::default();
        assert_eq!(config.stale_frame_threshold, 3);
        assert_eq!(config.wind_velocity, Vec3::ZERO);
        assert_eq!(config.default_settings, ClothSettings::default());
    }

    #[test]
    fn test_config_wind_is_seeded() {
        let config = ClothEngineConfig {
            wind_velocity: Vec3::new(100.0, 0.0, 0.0),
            wind_seed: 7,
            ..Default::default()
        };
        let a: Vec<Vec3> = {
            let mut wind = config.wind();
            (0..4).map(|_| wind.sample()).collect()
        };
        let b: Vec<Vec3> = {
            let mut wind = config.wind();
            (0..4).map(|_| wind.sample()).collect()
        };
        assert_eq!(a, b);
    }
}
