//! Quad binaural playback: four binaural recordings made facing forward,
//! right, back and left, crossfaded by the listener's heading.

use crate::error::{Result, SonaraError};
use crate::math::Vec3;

/// Interleaved stereo recordings for the four headings.
#[derive(Debug, Clone, Copy)]
pub struct QuadBinauralInput<'a> {
    pub forward: &'a [f32],
    pub right: &'a [f32],
    pub back: &'a [f32],
    pub left: &'a [f32],
}

/// Per-recording weights for a look direction, in the order forward, right,
/// back, left. Adjacent recordings are crossfaded at equal power.
pub fn quad_weights(look: Vec3) -> [f32; 4] {
    let flat = Vec3::new(look.x, 0.0, look.z);
    let Some(flat) = flat.try_normalize() else {
        return [1.0, 0.0, 0.0, 0.0];
    };
    // Heading clockwise from -Z, in quarter turns within [0, 4).
    let heading = flat.x.atan2(-flat.z).rem_euclid(std::f32::consts::TAU)
        / std::f32::consts::FRAC_PI_2;
    let lower = (heading.floor() as usize) % 4;
    let upper = (lower + 1) % 4;
    let frac = heading - heading.floor();

    let mut weights = [0.0; 4];
    weights[lower] = (frac * std::f32::consts::FRAC_PI_2).cos();
    weights[upper] += (frac * std::f32::consts::FRAC_PI_2).sin();
    weights
}

/// Mixes `frames` stereo frames of the four recordings into `output`.
pub fn process_quad_binaural(
    input: &QuadBinauralInput<'_>,
    look: Vec3,
    frames: usize,
    output: &mut [f32],
) -> Result<()> {
    let needed = frames * 2;
    let sources = [input.forward, input.right, input.back, input.left];
    if sources.iter().any(|s| s.len() < needed) || output.len() < needed {
        return Err(SonaraError::invalid(format!(
            "quad binaural buffers must hold {} interleaved samples",
            needed
        )));
    }
    if !look.is_finite() {
        return Err(SonaraError::invalid("look direction is not finite"));
    }

    let weights = quad_weights(look);
    for (i, out) in output[..needed].iter_mut().enumerate() {
        *out = sources
            .iter()
            .zip(weights)
            .map(|(s, w)| s[i] * w)
            .sum();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: [f32; 4], b: [f32; 4]) -> bool {
        a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-5)
    }

    #[test]
    fn test_cardinal_headings_select_one_recording() {
        assert!(close(quad_weights(Vec3::NEG_Z), [1.0, 0.0, 0.0, 0.0]));
        assert!(close(quad_weights(Vec3::X), [0.0, 1.0, 0.0, 0.0]));
        assert!(close(quad_weights(Vec3::Z), [0.0, 0.0, 1.0, 0.0]));
        assert!(close(quad_weights(Vec3::NEG_X), [0.0, 0.0, 0.0, 1.0]));
        assert!(close(quad_weights(Vec3::Y), [1.0, 0.0, 0.0, 0.0]));
    }

    #[test]
    fn test_diagonal_is_equal_power() {
        let w = quad_weights(Vec3::new(-1.0, 0.0, -1.0));
        assert!((w[3] - w[0]).abs() < 1e-5);
        assert!((w[0] * w[0] + w[3] * w[3] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_mix_and_validation() {
        let forward = [1.0, 2.0, 3.0, 4.0];
        let other = [0.0; 4];
        let input = QuadBinauralInput {
            forward: &forward,
            right: &other,
            back: &other,
            left: &other,
        };
        let mut out = [0.0; 4];
        process_quad_binaural(&input, Vec3::NEG_Z, 2, &mut out).unwrap();
        assert_eq!(out, forward);
        assert!(process_quad_binaural(&input, Vec3::NEG_Z, 3, &mut out).is_err());
    }
}
