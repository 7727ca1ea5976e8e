//! Room models: the static shoebox, dynamic estimation and propagation.

pub mod estimator;

use crate::error::{Result, SonaraError};
use crate::math::{SPEED_OF_SOUND, Vec3};

pub use estimator::{EstimatorCommand, RayBudget, RoomEstimator};

/// Upper bound for shoebox reflection coefficients.
pub const MAX_SHOEBOX_REFLECTION: f32 = 0.97;

/// Index of each wall in a `[f32; 6]` reflection array.
pub mod wall {
    pub const LEFT: usize = 0;
    pub const RIGHT: usize = 1;
    pub const UP: usize = 2;
    pub const DOWN: usize = 3;
    pub const BEHIND: usize = 4;
    pub const FRONT: usize = 5;
}

/// Which source of room information drives reflections and reverb.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReflectionModel {
    StaticShoeBox = 0,
    DynamicRoomModeling = 1,
    PropagationSystem = 2,
    /// Picks propagation, dynamic or static depending on what is available
    #[default]
    Automatic = 3,
}

impl ReflectionModel {
    pub fn from_index(index: i32) -> Option<Self> {
        match index {
            0 => Some(Self::StaticShoeBox),
            1 => Some(Self::DynamicRoomModeling),
            2 => Some(Self::PropagationSystem),
            3 => Some(Self::Automatic),
            _ => None,
        }
    }

    /// Resolves `Automatic` against what the context currently has.
    pub fn resolve(self, has_geometry: bool, has_ray_caster: bool) -> Self {
        match self {
            Self::Automatic if has_geometry => Self::PropagationSystem,
            Self::Automatic if has_ray_caster => Self::DynamicRoomModeling,
            Self::Automatic => Self::StaticShoeBox,
            other => other,
        }
    }
}

/// Manually specified shoebox room.
///
/// Walls are axis-aligned in world space. With the default listener facing
/// -Z, `front` is the -Z wall and `left` the -X wall.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxRoomParameters {
    /// Reflection coefficients: left, right, up, down, behind, front
    pub reflections: [f32; 6],
    /// Width (x), height (y), depth (z) in metres
    pub dimensions: [f32; 3],
}

impl Default for BoxRoomParameters {
    fn default() -> Self {
        Self {
            reflections: [0.25; 6],
            dimensions: [8.0, 3.0, 5.0],
        }
    }
}

impl BoxRoomParameters {
    /// Returns a copy with reflections clamped to `[0, 0.97]`, rejecting
    /// non-finite values and non-positive dimensions.
    pub fn sanitized(&self) -> Result<Self> {
        if self.reflections.iter().any(|r| !r.is_finite()) {
            return Err(SonaraError::invalid("non-finite reflection coefficient"));
        }
        if self.dimensions.iter().any(|d| !(d.is_finite() && *d > 0.0)) {
            return Err(SonaraError::invalid(format!(
                "room dimensions {:?} must be positive",
                self.dimensions
            )));
        }
        let reflections = self.reflections.map(|r| r.clamp(0.0, MAX_SHOEBOX_REFLECTION));
        if reflections != self.reflections {
            log::warn!(
                "Shoebox reflections {:?} clamped to {:?}",
                self.reflections,
                reflections
            );
        }
        Ok(Self {
            reflections,
            dimensions: self.dimensions,
        })
    }
}

/// An axis-aligned room box in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoomEstimate {
    /// Width, height, depth in metres
    pub dimensions: [f32; 3],
    /// Reflection coefficients: left, right, up, down, behind, front
    pub reflections: [f32; 6],
    /// Centre of the box
    pub position: Vec3,
    /// Number of ray hits that contributed
    pub hits: usize,
}

impl RoomEstimate {
    pub fn from_shoebox(params: &BoxRoomParameters, centre: Vec3) -> Self {
        Self {
            dimensions: params.dimensions,
            reflections: params.reflections,
            position: centre,
            hits: 0,
        }
    }

    pub fn min_corner(&self) -> Vec3 {
        self.position - Vec3::from(self.dimensions) * 0.5
    }

    pub fn max_corner(&self) -> Vec3 {
        self.position + Vec3::from(self.dimensions) * 0.5
    }

    /// Moves a fraction `alpha` of the way toward `target`.
    pub fn smooth_toward(&mut self, target: &RoomEstimate, alpha: f32) {
        let alpha = alpha.clamp(0.0, 1.0);
        if alpha >= 1.0 {
            *self = *target;
            return;
        }
        for (d, t) in self.dimensions.iter_mut().zip(target.dimensions) {
            *d += (t - *d) * alpha;
        }
        for (r, t) in self.reflections.iter_mut().zip(target.reflections) {
            *r += (t - *r) * alpha;
        }
        self.position = self.position.lerp(target.position, alpha);
        self.hits = target.hits;
    }

    /// Sabine RT60 in seconds, clamped to `[0.1, 10]`.
    ///
    /// Reflection coefficients are treated as energy ratios, so each wall
    /// absorbs `1 - r` of its area.
    pub fn rt60(&self) -> f32 {
        let [w, h, d] = self.dimensions;
        let volume = w * h * d;
        let areas = [h * d, h * d, w * d, w * d, w * h, w * h];
        let absorption: f32 = areas
            .iter()
            .zip(self.reflections)
            .map(|(area, r)| area * (1.0 - r.clamp(0.0, 1.0)))
            .sum();
        if absorption <= f32::EPSILON || volume <= 0.0 {
            return 10.0;
        }
        // 24 ln(10) / c, about 0.161 s/m
        let sabine = 24.0 * std::f32::consts::LN_10 / SPEED_OF_SOUND;
        (sabine * volume / absorption).clamp(0.1, 10.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_automatic_resolution_order() {
        let auto = ReflectionModel::Automatic;
        assert_eq!(auto.resolve(true, true), ReflectionModel::PropagationSystem);
        assert_eq!(auto.resolve(false, true), ReflectionModel::DynamicRoomModeling);
        assert_eq!(auto.resolve(false, false), ReflectionModel::StaticShoeBox);
        assert_eq!(
            ReflectionModel::StaticShoeBox.resolve(true, true),
            ReflectionModel::StaticShoeBox
        );
    }

    #[test]
    fn test_shoebox_clamping() {
        let params = BoxRoomParameters {
            reflections: [1.5, -0.2, 0.5, 0.97, 0.98, 0.0],
            dimensions: [4.0, 3.0, 6.0],
        };
        let clean = params.sanitized().unwrap();
        assert_eq!(clean.reflections, [0.97, 0.0, 0.5, 0.97, 0.97, 0.0]);

        let flat = BoxRoomParameters {
            dimensions: [4.0, 0.0, 6.0],
            ..params
        };
        assert!(flat.sanitized().is_err());
    }

    #[test]
    fn test_rt60_grows_with_reflectivity() {
        let dead = RoomEstimate::from_shoebox(
            &BoxRoomParameters {
                reflections: [0.1; 6],
                dimensions: [8.0, 3.0, 5.0],
            },
            Vec3::ZERO,
        );
        let live = RoomEstimate {
            reflections: [0.9; 6],
            ..dead
        };
        assert!(live.rt60() > dead.rt60());
        assert!(dead.rt60() >= 0.1);

        let perfect = RoomEstimate {
            reflections: [1.0; 6],
            ..dead
        };
        assert_eq!(perfect.rt60(), 10.0);
    }

    #[test]
    fn test_smoothing_converges() {
        let mut current = RoomEstimate::from_shoebox(&BoxRoomParameters::default(), Vec3::ZERO);
        let target = RoomEstimate {
            dimensions: [10.0, 4.0, 10.0],
            reflections: [0.5; 6],
            position: Vec3::new(1.0, 0.0, 0.0),
            hits: 12,
        };
        current.smooth_toward(&target, 0.5);
        assert_eq!(current.dimensions[0], 9.0);
        assert_eq!(current.hits, 12);
        current.smooth_toward(&target, 1.0);
        assert_eq!(current, target);
    }
}
