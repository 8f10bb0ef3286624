//! Sphere colliders that cloth meshes collide against

use glam::Vec3;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Default collider radius (cm)
pub const DEFAULT_SPHERE_RADIUS: f32 = 100.0;

/// Radius of the unit debug sphere mesh the visual scale is relative to (cm)
const VISUAL_SPHERE_RADIUS: f32 = 50.0;

static NEXT_COLLIDER_ID: AtomicU64 = AtomicU64::new(0);

/// Identifier of a registered collider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColliderId(u64);

/// World-space sphere as seen by one frame's snapshot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldSphere {
    pub center: Vec3,
    pub radius: f32,
}

/// Live set of sphere colliders, in registration order
#[derive(Debug, Default)]
pub struct SphereColliderRegistry {
    colliders: Vec<(ColliderId, WorldSphere)>,
}

/// Registry shared between every collider and cloth mesh of a scene
pub type SharedColliderRegistry = Arc<RwLock<SphereColliderRegistry>>;

impl SphereColliderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedColliderRegistry {
        Arc::new(RwLock::new(Self::new()))
    }

    pub fn len(&self) -> usize {
        self.colliders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colliders.is_empty()
    }

    /// Copy of the active colliders for this frame
    pub fn snapshot(&self) -> Vec<WorldSphere> {
        self.colliders.iter().map(|(_, sphere)| *sphere).collect()
    }

    fn insert(&mut self, id: ColliderId, sphere: WorldSphere) {
        if !self.colliders.iter().any(|(existing, _)| *existing == id) {
            self.colliders.push((id, sphere));
        }
    }

    fn update(&mut self, id: ColliderId, sphere: WorldSphere) {
        if let Some((_, slot)) = self.colliders.iter_mut().find(|(existing, _)| *existing == id) {
            *slot = sphere;
        }
    }

    fn remove(&mut self, id: ColliderId) {
        self.colliders.retain(|(existing, _)| *existing != id);
    }
}

/// A sphere collider placed in the world.
///
/// The collider only participates in cloth collision while attached to a registry.
#[derive(Debug)]
pub struct SphereCollider {
    id: ColliderId,
    location: Vec3,
    radius: f32,
    visual_scale: f32,
    registry: Option<SharedColliderRegistry>,
}

impl SphereCollider {
    pub fn new(location: Vec3) -> Self {
        Self {
            id: ColliderId(NEXT_COLLIDER_ID.fetch_add(1, Ordering::Relaxed)),
            location,
            radius: DEFAULT_SPHERE_RADIUS,
            visual_scale: DEFAULT_SPHERE_RADIUS / VISUAL_SPHERE_RADIUS,
            registry: None,
        }
    }

    pub fn id(&self) -> ColliderId {
        self.id
    }

    pub fn location(&self) -> Vec3 {
        self.location
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    /// Uniform scale applied to the debug sphere mesh
    pub fn visual_scale(&self) -> f32 {
        self.visual_scale
    }

    pub fn is_attached(&self) -> bool {
        self.registry.is_some()
    }

    /// Register with a collider registry. Without one the collider stays inert.
    pub fn attach(&mut self, registry: Option<&SharedColliderRegistry>) {
        let Some(registry) = registry else {
            log::error!(
                "SphereCollider {:?}: no collider registry, so it will not collide with cloth",
                self.id
            );
            return;
        };
        self.detach();
        registry.write().insert(self.id, self.sphere());
        self.registry = Some(Arc::clone(registry));
    }

    pub fn detach(&mut self) {
        if let Some(registry) = self.registry.take() {
            registry.write().remove(self.id);
        }
    }

    pub fn set_location(&mut self, location: Vec3) {
        self.location = location;
        self.sync();
    }

    pub fn set_radius(&mut self, radius: f32) {
        self.radius = radius;
        self.visual_scale = radius / VISUAL_SPHERE_RADIUS;
        self.sync();
    }

    fn sphere(&self) -> WorldSphere {
        WorldSphere {
            center: self.location,
            radius: self.radius,
        }
    }

    fn sync(&self) {
        if let Some(registry) = &self.registry {
            registry.write().update(self.id, self.sphere());
        }
    }
}

impl Drop for SphereCollider {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_radius_updates_visual_scale() {
        let mut collider = SphereCollider::new(Vec3::ZERO);
        collider.set_radius(25.0);
        assert_eq!(collider.radius(), 25.0);
        assert!((collider.visual_scale() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_snapshot_follows_registration_order() {
        let registry = SphereColliderRegistry::shared();
        let mut a = SphereCollider::new(Vec3::X);
        let mut b = SphereCollider::new(Vec3::Y);
        b.attach(Some(&registry));
        a.attach(Some(&registry));

        let snapshot = registry.read().snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].center, Vec3::Y);
        assert_eq!(snapshot[1].center, Vec3::X);

        a.set_location(Vec3::Z);
        a.set_radius(5.0);
        assert_eq!(
            registry.read().snapshot()[1],
            WorldSphere {
                center: Vec3::Z,
                radius: 5.0
            }
        );
    }

    #[test]
    fn test_detached_collider_is_inert() {
        let registry = SphereColliderRegistry::shared();
        let mut collider = SphereCollider::new(Vec3::ZERO);
        collider.attach(None);
        assert!(!collider.is_attached());
        assert!(registry.read().is_empty());

        collider.attach(Some(&registry));
        assert_eq!(registry.read().len(), 1);
        drop(collider);
        assert!(registry.read().is_empty());
    }
}
