//! Ray casting interface used by dynamic room modeling.
//!
//! Callers that already own a scene query (game physics, a BVH, a GPU tracer)
//! implement [`RayCaster`] and hand it to the context. The engine's background
//! estimator then samples the surroundings on its own schedule.

use crate::math::Vec3;
use crate::scene::material::ReflectionBands;

/// Result of a ray intersection test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    /// World-space hit position
    pub point: Vec3,

    /// Surface normal at the hit point, pointing away from the surface
    pub normal: Vec3,

    /// Reflection coefficient of the hit surface at each band (0.0 - 1.0)
    pub reflection_bands: ReflectionBands,
}

impl RayHit {
    pub fn new(point: Vec3, normal: Vec3, reflection_bands: ReflectionBands) -> Self {
        Self {
            point,
            normal,
            reflection_bands,
        }
    }

    /// Mean reflection across all bands.
    pub fn mean_reflection(&self) -> f32 {
        self.reflection_bands.iter().sum::<f32>() / self.reflection_bands.len() as f32
    }
}

/// Trait for providing scene ray queries to the engine.
///
/// # Thread Safety
///
/// `cast_ray` is invoked from the engine's background estimator thread, never
/// from the audio thread, so implementations must be `Send + Sync`.
///
/// # Performance
///
/// Calls arrive at the configured rays-per-second cadence and gate how quickly
/// the room estimate reacts. Avoid blocking I/O.
///
/// # Example
///
/// ```
/// use sonara_core::math::Vec3;
/// use sonara_core::scene::{RayCaster, RayHit};
///
/// /// Infinite floor at y = 0.
/// struct Floor;
///
/// impl RayCaster for Floor {
///     fn cast_ray(&self, origin: Vec3, direction: Vec3) -> Option<RayHit> {
///         if direction.y >= 0.0 {
///             return None;
///         }
///         let t = -origin.y / direction.y;
///         Some(RayHit::new(origin + direction * t, Vec3::Y, [0.9; 4]))
///     }
/// }
/// ```
pub trait RayCaster: Send + Sync {
    /// Returns the closest hit along the ray, or `None` if nothing was hit.
    ///
    /// `direction` is normalized.
    fn cast_ray(&self, origin: Vec3, direction: Vec3) -> Option<RayHit>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopCaster;

    impl RayCaster for NoopCaster {
        fn cast_ray(&self, _origin: Vec3, _direction: Vec3) -> Option<RayHit> {
            None
        }
    }

    #[test]
    fn test_noop_caster() {
        let caster = NoopCaster;
        assert!(caster.cast_ray(Vec3::ZERO, Vec3::Z).is_none());
    }

    #[test]
    fn test_mean_reflection() {
        let hit = RayHit::new(Vec3::ZERO, Vec3::Y, [0.2, 0.4, 0.6, 0.8]);
        assert!((hit.mean_reflection() - 0.5).abs() < 1e-6);
    }
}
