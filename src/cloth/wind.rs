//! Global wind shared by every cloth mesh

use glam::Vec3;
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Global wind velocity plus the RNG driving its per-frame gusts
#[derive(Debug, Clone)]
pub struct ClothWind {
    velocity: Vec3,
    rng: StdRng,
}

impl ClothWind {
    /// `velocity` is in world space, cm/s
    pub fn new(velocity: Vec3, seed: u64) -> Self {
        Self {
            velocity,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn velocity(&self) -> Vec3 {
        self.velocity
    }

    pub fn set_velocity(&mut self, velocity: Vec3) {
        self.velocity = velocity;
    }

    /// Random gust factor in `[0, 2)`
    pub fn gust_factor(&mut self) -> f32 {
        self.rng.gen_range(0.0..2.0)
    }

    /// Global wind scaled by a fresh gust factor
    pub fn sample(&mut self) -> Vec3 {
        self.velocity * self.gust_factor()
    }
}

impl Default for ClothWind {
    fn default() -> Self {
        Self::new(Vec3::ZERO, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_gusts() {
        let mut a = ClothWind::new(Vec3::X * 100.0, 42);
        let mut b = ClothWind::new(Vec3::X * 100.0, 42);
        for _ in 0..16 {
            assert_eq!(a.sample(), b.sample());
        }
    }

    #[test]
    fn test_gust_factor_range() {
        let mut wind = ClothWind::new(Vec3::ONE, 7);
        for _ in 0..1000 {
            let factor = wind.gust_factor();
            assert!((0.0..2.0).contains(&factor));
        }
    }

    #[test]
    fn test_calm_wind_samples_zero() {
        let mut wind = ClothWind::default();
        assert_eq!(wind.sample(), Vec3::ZERO);
        wind.set_velocity(Vec3::Y);
        assert_eq!(wind.velocity(), Vec3::Y);
    }
}
