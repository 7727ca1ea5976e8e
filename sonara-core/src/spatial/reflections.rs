//! First-order early reflections from the six walls of the active room box.

use crate::math::{ListenerPose, SPEED_OF_SOUND, Vec3};
use crate::room::{RoomEstimate, wall};

/// One reflected path read from a source's delay line.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ReflectionTap {
    /// Delay in samples
    pub delay: f32,
    /// Left and right gain
    pub gain: [f32; 2],
}

/// Inputs shared by all six image sources of one source.
#[derive(Debug, Clone, Copy)]
pub struct ImageSourceInput {
    /// Source position in world units
    pub source: Vec3,
    /// Gain of the direct path
    pub direct_gain: f32,
    /// Metres per world unit
    pub unit_scale: f32,
    pub sample_rate: f32,
    /// Measure delays from emission rather than from the direct arrival
    pub absolute_time: bool,
    /// Distance below which the direct path is not attenuated further, in metres
    pub near_distance: f32,
}

/// Computes taps in wall order: left, right, up, down, behind, front.
///
/// The source is clamped into the box, so a source outside the room still
/// reflects off the nearest walls.
pub fn image_taps(
    room: &RoomEstimate,
    listener: &ListenerPose,
    input: &ImageSourceInput,
) -> [ReflectionTap; 6] {
    let min = room.min_corner();
    let max = room.max_corner();
    let source = input.source.clamp(min, max);
    let direct = (source - listener.position).length() * input.unit_scale;
    let reference = direct.max(input.near_distance);

    let mirror = |axis: usize, plane: f32| {
        let mut image = source;
        image[axis] = 2.0 * plane - source[axis];
        image
    };
    let mut images = [Vec3::ZERO; 6];
    images[wall::LEFT] = mirror(0, min.x);
    images[wall::RIGHT] = mirror(0, max.x);
    images[wall::UP] = mirror(1, max.y);
    images[wall::DOWN] = mirror(1, min.y);
    images[wall::BEHIND] = mirror(2, max.z);
    images[wall::FRONT] = mirror(2, min.z);

    let mut taps = [ReflectionTap::default(); 6];
    for (i, image) in images.iter().enumerate() {
        let offset = *image - listener.position;
        let distance = (offset.length() * input.unit_scale).max(f32::EPSILON);
        let travel = if input.absolute_time {
            distance
        } else {
            (distance - direct).max(0.0)
        };
        let gain = room.reflections[i] * input.direct_gain * (reference / distance).min(1.0);

        // Equal-power pan by the lateral component.
        let lateral = listener
            .direction_to_local(offset.normalize_or_zero())
            .x
            .clamp(-1.0, 1.0);
        let left = (0.5 * (1.0 - lateral)).sqrt();
        let right = (0.5 * (1.0 + lateral)).sqrt();

        taps[i] = ReflectionTap {
            delay: travel / SPEED_OF_SOUND * input.sample_rate,
            gain: [gain * left, gain * right],
        };
    }
    taps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::BoxRoomParameters;

    fn room() -> RoomEstimate {
        RoomEstimate::from_shoebox(
            &BoxRoomParameters {
                reflections: [0.5; 6],
                dimensions: [4.0, 4.0, 4.0],
            },
            Vec3::ZERO,
        )
    }

    fn input(source: Vec3, absolute_time: bool) -> ImageSourceInput {
        ImageSourceInput {
            source,
            direct_gain: 1.0,
            unit_scale: 1.0,
            sample_rate: 48_000.0,
            absolute_time,
            near_distance: 0.25,
        }
    }

    #[test]
    fn test_centred_source_has_symmetric_walls() {
        let taps = image_taps(&room(), &ListenerPose::identity(), &input(Vec3::new(0.0, 0.0, -1.0), true));
        // Up and down images are equidistant.
        assert!((taps[wall::UP].delay - taps[wall::DOWN].delay).abs() < 1e-3);
        // Left wall pans left, right wall pans right.
        assert!(taps[wall::LEFT].gain[0] > taps[wall::LEFT].gain[1]);
        assert!(taps[wall::RIGHT].gain[1] > taps[wall::RIGHT].gain[0]);
        // Front image at z = -3 is nearer than the behind image at z = 5.
        assert!(taps[wall::FRONT].delay < taps[wall::BEHIND].delay);
    }

    #[test]
    fn test_relative_timing_subtracts_direct_path() {
        let source = Vec3::new(1.0, 0.0, 0.0);
        let absolute = image_taps(&room(), &ListenerPose::identity(), &input(source, true));
        let relative = image_taps(&room(), &ListenerPose::identity(), &input(source, false));
        let direct_samples = 1.0 / SPEED_OF_SOUND * 48_000.0;
        for (a, r) in absolute.iter().zip(&relative) {
            assert!((a.delay - r.delay - direct_samples).abs() < 1e-2);
            assert_eq!(a.gain, r.gain);
        }
    }

    #[test]
    fn test_reflection_never_louder_than_wall_coefficient() {
        let taps = image_taps(&room(), &ListenerPose::identity(), &input(Vec3::new(0.5, 0.5, 0.5), false));
        for tap in taps {
            let energy = tap.gain[0] * tap.gain[0] + tap.gain[1] * tap.gain[1];
            assert!(energy <= 0.25 + 1e-5);
        }
    }
}
