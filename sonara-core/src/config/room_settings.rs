use crate::error::{Result, SonaraError};

/// Tuning for dynamic room modeling, where the room box is estimated from
/// rays cast through a caller-supplied [`RayCaster`](crate::scene::RayCaster).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DynamicRoomSettings {
    /// Rays cast per second by the background estimator
    pub rays_per_second: u32,
    /// Fraction of the gap to the newest estimate closed per audio buffer (0.0 - 1.0)
    pub interp_speed: f32,
    /// Hits further away than this (metres) are clamped to this distance
    pub max_wall_distance: f32,
    /// Number of most recent hits kept for fitting the room
    pub ray_cache_size: usize,
}

impl Default for DynamicRoomSettings {
    fn default() -> Self {
        Self {
            rays_per_second: 256,
            interp_speed: 0.9,
            max_wall_distance: 50.0,
            ray_cache_size: 512,
        }
    }
}

impl DynamicRoomSettings {
    pub fn validate(&self) -> Result<()> {
        if self.rays_per_second == 0 {
            return Err(SonaraError::invalid("rays per second must be non-zero"));
        }
        if !(0.0..=1.0).contains(&self.interp_speed) {
            return Err(SonaraError::invalid(format!(
                "interp speed {} outside 0..=1",
                self.interp_speed
            )));
        }
        if !(self.max_wall_distance > 0.0) {
            return Err(SonaraError::invalid("max wall distance must be positive"));
        }
        if self.ray_cache_size < 6 {
            return Err(SonaraError::invalid("ray cache must hold at least 6 rays"));
        }
        Ok(())
    }
}

/// Controls for the geometry propagation worker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PropagationSettings {
    /// Performance/accuracy trade-off (0.0 = fastest, 1.0 = most rays)
    pub quality: f32,
    /// Bitmask of CPU cores propagation work may use (0 = any core)
    pub thread_affinity: u64,
}

impl Default for PropagationSettings {
    fn default() -> Self {
        Self {
            quality: 0.5,
            thread_affinity: 0,
        }
    }
}

impl PropagationSettings {
    /// Rays traced per estimate at the current quality.
    pub fn rays_per_estimate(&self) -> usize {
        const MIN_RAYS: f32 = 32.0;
        const MAX_RAYS: f32 = 1024.0;
        (MIN_RAYS + (MAX_RAYS - MIN_RAYS) * self.quality.clamp(0.0, 1.0)) as usize
    }

    /// Number of worker threads allowed by the affinity mask.
    pub fn worker_count(&self) -> usize {
        match self.thread_affinity.count_ones() {
            0 => 1,
            n => n as usize,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dynamic_defaults_valid() {
        assert!(DynamicRoomSettings::default().validate().is_ok());
    }

    #[test]
    fn test_dynamic_rejects_bad_values() {
        let settings = DynamicRoomSettings {
            interp_speed: 1.5,
            ..Default::default()
        };
        assert!(settings.validate().is_err());

        let settings = DynamicRoomSettings {
            max_wall_distance: 0.0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_quality_scales_rays() {
        let low = PropagationSettings {
            quality: 0.0,
            ..Default::default()
        };
        let high = PropagationSettings {
            quality: 1.0,
            ..Default::default()
        };
        assert_eq!(low.rays_per_estimate(), 32);
        assert_eq!(high.rays_per_estimate(), 1024);
    }

    #[test]
    fn test_worker_count_follows_mask() {
        let settings = PropagationSettings {
            thread_affinity: 0b1010,
            ..Default::default()
        };
        assert_eq!(settings.worker_count(), 2);
        assert_eq!(PropagationSettings::default().worker_count(), 1);
    }
}
