//! Parametric head model used for binaural rendering.
//!
//! Instead of convolving measured impulse responses, each ear gets a delay
//! (Woodworth ITD), a level (ILD) and a one-pole low-pass standing in for the
//! head shadow. A mild extra low-pass is applied to sources behind the head.

use crate::error::{Result, SonaraError};
use crate::math::{SPEED_OF_SOUND, Vec3};

pub const DEFAULT_HEAD_RADIUS: f32 = 0.0875;

/// Level of the far ear for a fully lateral source.
const FAR_EAR_MIN_GAIN: f32 = 0.55;

/// Shadow low-pass cutoff on the far ear for a fully lateral source.
const SHADOW_CUTOFF_HZ: f32 = 1500.0;

/// Cutoff used for a source directly behind the head.
const REAR_CUTOFF_HZ: f32 = 6000.0;

/// Cutoff at or above which the low-pass is treated as bypassed.
const OPEN_CUTOFF_HZ: f32 = 20_000.0;

/// How per-block HRTF parameter changes are applied.
///
/// Discriminants match the integer values exchanged over the C boundary.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HrtfInterpolation {
    /// Jump to the new parameters, integer delays
    Nearest = 0,
    SimpleTimeDomain = 1,
    MinPhaseTimeDomain = 2,
    /// Ramp levels, integer delays
    PhaseTruncation = 3,
    #[default]
    PhaseLerp = 4,
}

impl HrtfInterpolation {
    pub fn from_index(index: i32) -> Option<Self> {
        match index {
            0 => Some(Self::Nearest),
            1 => Some(Self::SimpleTimeDomain),
            2 => Some(Self::MinPhaseTimeDomain),
            3 => Some(Self::PhaseTruncation),
            4 => Some(Self::PhaseLerp),
            _ => None,
        }
    }

    /// Whether parameters ramp across the block.
    pub fn ramps(self) -> bool {
        !matches!(self, Self::Nearest)
    }

    /// Whether delays are read with sub-sample precision.
    pub fn fractional_delay(self) -> bool {
        matches!(
            self,
            Self::SimpleTimeDomain | Self::MinPhaseTimeDomain | Self::PhaseLerp
        )
    }
}

/// Rendering parameters for both ears. Index 0 is left, 1 is right.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EarParams {
    /// Interaural delay in samples
    pub delay: [f32; 2],
    pub gain: [f32; 2],
    /// One-pole low-pass feedback coefficient; 0 bypasses the filter
    pub lowpass: [f32; 2],
}

impl EarParams {
    /// A centred image with no delay or filtering.
    pub const CENTRED: Self = Self {
        delay: [0.0; 2],
        gain: [1.0; 2],
        lowpass: [0.0; 2],
    };

    pub fn lerp(&self, other: &Self, t: f32) -> Self {
        if t >= 1.0 {
            return *other;
        }
        let mix = |a: [f32; 2], b: [f32; 2]| [a[0] + (b[0] - a[0]) * t, a[1] + (b[1] - a[1]) * t];
        Self {
            delay: mix(self.delay, other.delay),
            gain: mix(self.gain, other.gain),
            lowpass: mix(self.lowpass, other.lowpass),
        }
    }
}

/// One-pole low-pass: `y = (1 - a) x + a y[n-1]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OnePole {
    state: f32,
}

impl OnePole {
    #[inline]
    pub fn process(&mut self, input: f32, coefficient: f32) -> f32 {
        self.state = (1.0 - coefficient) * input + coefficient * self.state;
        self.state
    }

    pub fn state(&self) -> f32 {
        self.state
    }

    pub fn reset(&mut self) {
        self.state = 0.0;
    }
}

/// Feedback coefficient of a one-pole low-pass at `cutoff_hz`.
pub fn one_pole_coefficient(cutoff_hz: f32, sample_rate: f32) -> f32 {
    if cutoff_hz >= OPEN_CUTOFF_HZ.min(0.45 * sample_rate) {
        return 0.0;
    }
    (-std::f32::consts::TAU * cutoff_hz / sample_rate).exp()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HrtfModel {
    head_radius: f32,
    sample_rate: f32,
}

impl HrtfModel {
    pub fn new(sample_rate: u32, head_radius: f32) -> Result<Self> {
        validate_head_radius(head_radius)?;
        Ok(Self {
            head_radius,
            sample_rate: sample_rate as f32,
        })
    }

    pub fn head_radius(&self) -> f32 {
        self.head_radius
    }

    pub fn set_head_radius(&mut self, head_radius: f32) -> Result<()> {
        validate_head_radius(head_radius)?;
        self.head_radius = head_radius;
        Ok(())
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Largest interaural delay the model can produce, in samples.
    pub fn max_itd_samples(&self) -> f32 {
        let half_pi = std::f32::consts::FRAC_PI_2;
        self.head_radius / SPEED_OF_SOUND * (half_pi + 1.0) * self.sample_rate
    }

    /// Parameters for a source arriving from `direction` in listener space
    /// (x right, y up, z forward).
    ///
    /// `centre` fades the image toward [`EarParams::CENTRED`]; 1.0 is fully
    /// centred. `shadow` false disables all filtering.
    pub fn params(&self, direction: Vec3, centre: f32, shadow: bool) -> EarParams {
        let Some(direction) = direction.try_normalize() else {
            return EarParams::CENTRED;
        };

        // Lateral angle from the median plane, in [-pi/2, pi/2]; positive is right.
        let lateral = direction.x.clamp(-1.0, 1.0).asin();
        let sin_lateral = lateral.sin().abs();

        let itd = self.head_radius / SPEED_OF_SOUND
            * (lateral.abs() + sin_lateral)
            * self.sample_rate;
        let far_gain = 1.0 - (1.0 - FAR_EAR_MIN_GAIN) * sin_lateral;

        let far_cutoff = OPEN_CUTOFF_HZ * (SHADOW_CUTOFF_HZ / OPEN_CUTOFF_HZ).powf(sin_lateral);
        let rear = (-direction.z).max(0.0);
        let rear_cutoff = OPEN_CUTOFF_HZ * (REAR_CUTOFF_HZ / OPEN_CUTOFF_HZ).powf(rear);
        let (near_lp, far_lp) = if shadow {
            (
                one_pole_coefficient(rear_cutoff, self.sample_rate),
                one_pole_coefficient(far_cutoff.min(rear_cutoff), self.sample_rate),
            )
        } else {
            (0.0, 0.0)
        };

        // The ear on the source side is the near ear.
        let placed = if lateral >= 0.0 {
            EarParams {
                delay: [itd, 0.0],
                gain: [far_gain, 1.0],
                lowpass: [far_lp, near_lp],
            }
        } else {
            EarParams {
                delay: [0.0, itd],
                gain: [1.0, far_gain],
                lowpass: [near_lp, far_lp],
            }
        };

        placed.lerp(&EarParams::CENTRED, centre.clamp(0.0, 1.0))
    }
}

fn validate_head_radius(head_radius: f32) -> Result<()> {
    if head_radius.is_finite() && head_radius > 0.0 {
        Ok(())
    } else {
        Err(SonaraError::invalid(format!("head radius {}", head_radius)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> HrtfModel {
        HrtfModel::new(48_000, DEFAULT_HEAD_RADIUS).unwrap()
    }

    #[test]
    fn test_front_source_is_symmetric() {
        let p = model().params(Vec3::Z, 0.0, true);
        assert_eq!(p.delay, [0.0, 0.0]);
        assert_eq!(p.gain[0], p.gain[1]);
        assert_eq!(p.lowpass[0], p.lowpass[1]);
    }

    #[test]
    fn test_right_source_delays_and_shadows_left_ear() {
        let m = model();
        let p = m.params(Vec3::X, 0.0, true);
        assert_eq!(p.delay[1], 0.0);
        assert!((p.delay[0] - m.max_itd_samples()).abs() < 1e-3);
        // roughly 0.66 ms at 48 kHz
        assert!(p.delay[0] > 30.0 && p.delay[0] < 33.0);
        assert!(p.gain[0] < p.gain[1]);
        assert!(p.lowpass[0] > p.lowpass[1]);

        let mirrored = m.params(Vec3::NEG_X, 0.0, true);
        assert_eq!(mirrored.delay, [p.delay[1], p.delay[0]]);
        assert_eq!(mirrored.gain, [p.gain[1], p.gain[0]]);
    }

    #[test]
    fn test_centre_and_no_shadow() {
        let m = model();
        assert_eq!(m.params(Vec3::X, 1.0, true), EarParams::CENTRED);
        assert_eq!(m.params(Vec3::ZERO, 0.0, true), EarParams::CENTRED);
        assert_eq!(m.params(Vec3::NEG_Z, 0.0, false).lowpass, [0.0, 0.0]);
        assert!(m.params(Vec3::NEG_Z, 0.0, true).lowpass[0] > 0.0, "rear cue");
    }

    #[test]
    fn test_head_radius_scales_itd() {
        let mut m = model();
        let small = m.params(Vec3::X, 0.0, true).delay[0];
        m.set_head_radius(DEFAULT_HEAD_RADIUS * 2.0).unwrap();
        let large = m.params(Vec3::X, 0.0, true).delay[0];
        assert!((large - 2.0 * small).abs() < 1e-3);
        assert!(m.set_head_radius(0.0).is_err());
        assert!(m.set_head_radius(f32::NAN).is_err());
    }

    #[test]
    fn test_interpolation_modes() {
        assert_eq!(HrtfInterpolation::default(), HrtfInterpolation::PhaseLerp);
        assert!(!HrtfInterpolation::Nearest.ramps());
        assert!(!HrtfInterpolation::PhaseTruncation.fractional_delay());
        assert_eq!(HrtfInterpolation::from_index(3), Some(HrtfInterpolation::PhaseTruncation));
        assert_eq!(HrtfInterpolation::from_index(5), None);
    }
}
