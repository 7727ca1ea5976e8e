//! Per-source parameters and the DSP that renders one source per buffer.

use crate::error::{Result, SonaraError};
use crate::math::{ListenerPose, SPEED_OF_SOUND, Vec3};
use crate::room::RoomEstimate;
use crate::spatial::delay::DelayLine;
use crate::spatial::hrtf::{EarParams, HrtfInterpolation, HrtfModel, OnePole};
use crate::spatial::reflections::{ImageSourceInput, ReflectionTap, image_taps};

/// Below this magnitude a sample or filter state counts as silent.
const SILENCE: f32 = 1e-6;

pub const DEFAULT_RANGE_MIN: f32 = 0.25;
pub const DEFAULT_RANGE_MAX: f32 = 250.0;

/// Result of processing one buffer.
///
/// Discriminants are the status bits exchanged over the C boundary.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpatializationStatus {
    /// Nothing left to render; the source slot can be retired
    Finished = 0x01,
    /// Input or a delayed tail is still producing output
    Working = 0x02,
}

/// How distance affects a source's level.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AttenuationMode {
    /// No attenuation; the caller handles it
    None = 0,
    /// Constant gain given by the source gain
    Fixed = 1,
    #[default]
    InverseSquare = 2,
}

impl AttenuationMode {
    pub fn from_index(index: i32) -> Option<Self> {
        match index {
            0 => Some(Self::None),
            1 => Some(Self::Fixed),
            2 => Some(Self::InverseSquare),
            _ => None,
        }
    }
}

/// Per-source feature flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SourceFlags {
    /// Wide band signal such as music, voice or noise
    pub wide_band_hint: bool,
    /// Narrow band signal such as a pure tone; disables head-shadow filtering
    pub narrow_band_hint: bool,
    /// Delay the direct path by its propagation time
    pub direct_time_of_arrival: bool,
    /// Exclude this source from early reflections and the reverb send
    pub reflections_disabled: bool,
}

impl SourceFlags {
    pub const WIDE_BAND_HINT: u32 = 0x0010;
    pub const NARROW_BAND_HINT: u32 = 0x0020;
    /// Accepted and ignored
    pub const BASS_COMPENSATION_DEPRECATED: u32 = 0x0040;
    pub const DIRECT_TIME_OF_ARRIVAL: u32 = 0x0080;
    pub const REFLECTIONS_DISABLED: u32 = 0x0100;
    /// Accepted and ignored
    pub const DISABLE_RESAMPLING_RESERVED: u32 = 0x8000;

    const KNOWN: u32 = Self::WIDE_BAND_HINT
        | Self::NARROW_BAND_HINT
        | Self::BASS_COMPENSATION_DEPRECATED
        | Self::DIRECT_TIME_OF_ARRIVAL
        | Self::REFLECTIONS_DISABLED
        | Self::DISABLE_RESAMPLING_RESERVED;

    pub fn from_bits(bits: u32) -> Result<Self> {
        if bits & !Self::KNOWN != 0 {
            return Err(SonaraError::invalid(format!(
                "unknown source flag bits {:#x}",
                bits & !Self::KNOWN
            )));
        }
        Ok(Self {
            wide_band_hint: bits & Self::WIDE_BAND_HINT != 0,
            narrow_band_hint: bits & Self::NARROW_BAND_HINT != 0,
            direct_time_of_arrival: bits & Self::DIRECT_TIME_OF_ARRIVAL != 0,
            reflections_disabled: bits & Self::REFLECTIONS_DISABLED != 0,
        })
    }

    pub fn bits(&self) -> u32 {
        let mut bits = 0;
        if self.wide_band_hint {
            bits |= Self::WIDE_BAND_HINT;
        }
        if self.narrow_band_hint {
            bits |= Self::NARROW_BAND_HINT;
        }
        if self.direct_time_of_arrival {
            bits |= Self::DIRECT_TIME_OF_ARRIVAL;
        }
        if self.reflections_disabled {
            bits |= Self::REFLECTIONS_DISABLED;
        }
        bits
    }
}

/// User-facing source parameters. Ranges and radius are in metres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceParams {
    /// World position in game units
    pub position: Vec3,
    pub range_min: f32,
    pub range_max: f32,
    pub radius: f32,
    pub reverb_send: f32,
    pub attenuation: AttenuationMode,
    pub source_gain: f32,
    pub flags: SourceFlags,
}

impl Default for SourceParams {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            range_min: DEFAULT_RANGE_MIN,
            range_max: DEFAULT_RANGE_MAX,
            radius: 0.0,
            reverb_send: 0.0,
            attenuation: AttenuationMode::InverseSquare,
            source_gain: 1.0,
            flags: SourceFlags::default(),
        }
    }
}

fn non_negative(name: &str, value: f32) -> Result<f32> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(SonaraError::invalid(format!("{} {}", name, value)))
    }
}

impl SourceParams {
    pub fn set_position(&mut self, position: Vec3) -> Result<()> {
        if !position.is_finite() {
            return Err(SonaraError::invalid(format!("source position {}", position)));
        }
        self.position = position;
        Ok(())
    }

    pub fn set_range(&mut self, min: f32, max: f32) -> Result<()> {
        let min = non_negative("range min", min)?;
        let max = non_negative("range max", max)?;
        if min > max {
            return Err(SonaraError::invalid(format!("range min {} exceeds max {}", min, max)));
        }
        self.range_min = min;
        self.range_max = max;
        Ok(())
    }

    pub fn set_radius(&mut self, radius: f32) -> Result<()> {
        self.radius = non_negative("radius", radius)?;
        Ok(())
    }

    pub fn set_reverb_send(&mut self, level: f32) -> Result<()> {
        self.reverb_send = non_negative("reverb send", level)?;
        Ok(())
    }

    pub fn set_attenuation(&mut self, mode: AttenuationMode, source_gain: f32) -> Result<()> {
        self.source_gain = non_negative("source gain", source_gain)?;
        self.attenuation = mode;
        Ok(())
    }

    /// Gain applied to the source at `distance` metres from the listener.
    pub fn overall_gain(&self, distance: f32) -> f32 {
        match self.attenuation {
            AttenuationMode::None => 1.0,
            AttenuationMode::Fixed => self.source_gain,
            AttenuationMode::InverseSquare => {
                self.source_gain * inverse_square_curve(distance, self.range_min, self.range_max)
            }
        }
    }
}

/// 1 inside `min`, 0 beyond `max`, and an inverse falloff faded to reach
/// zero at `max` in between.
pub fn inverse_square_curve(distance: f32, min: f32, max: f32) -> f32 {
    if distance <= min {
        return 1.0;
    }
    if distance >= max || max <= min {
        return 0.0;
    }
    (min / distance) * (max - distance) / (max - min)
}

/// Everything a source needs from its context for one buffer.
pub struct RenderFrame<'a> {
    pub listener: &'a ListenerPose,
    pub hrtf: &'a HrtfModel,
    pub interpolation: HrtfInterpolation,
    /// Metres per game unit
    pub unit_scale: f32,
    /// Active room box, when early reflections are enabled
    pub room: Option<&'a RoomEstimate>,
    /// Mono reverb bus input, when late reverb is enabled
    pub reverb_bus: Option<&'a mut [f32]>,
}

/// DSP state carried between buffers.
#[derive(Debug, Clone)]
pub struct SourceState {
    line: DelayLine,
    shadow: [OnePole; 2],
    ears: Option<EarParams>,
    gain: f32,
    taps: [ReflectionTap; 6],
}

impl SourceState {
    pub fn new(history: usize) -> Self {
        Self {
            line: DelayLine::new(history),
            shadow: [OnePole::default(); 2],
            ears: None,
            gain: 0.0,
            taps: [ReflectionTap::default(); 6],
        }
    }

    pub fn reset(&mut self) {
        self.line.clear();
        for filter in &mut self.shadow {
            filter.reset();
        }
        self.ears = None;
        self.gain = 0.0;
        self.taps = [ReflectionTap::default(); 6];
    }

    /// Renders `input` into `left`/`right` (overwriting them) and feeds the
    /// reverb bus. All three slices have the same length.
    pub fn render(
        &mut self,
        params: &SourceParams,
        frame: RenderFrame<'_>,
        input: &[f32],
        left: &mut [f32],
        right: &mut [f32],
    ) -> SpatializationStatus {
        let hrtf = frame.hrtf;
        let sample_rate = hrtf.sample_rate();
        let local = frame.listener.point_to_local(params.position);
        let distance = local.length() * frame.unit_scale;
        let gain = params.overall_gain(distance);

        let centre = if params.radius > 0.0 {
            (1.0 - distance / params.radius).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let ears = hrtf.params(local, centre, !params.flags.narrow_band_hint);
        let arrival = if params.flags.direct_time_of_arrival {
            distance / SPEED_OF_SOUND * sample_rate
        } else {
            0.0
        };

        let taps = match frame.room {
            Some(room) if !params.flags.reflections_disabled => image_taps(
                room,
                frame.listener,
                &ImageSourceInput {
                    source: params.position,
                    direct_gain: gain,
                    unit_scale: frame.unit_scale,
                    sample_rate,
                    absolute_time: params.flags.direct_time_of_arrival,
                    near_distance: params.range_min,
                },
            ),
            _ => [ReflectionTap::default(); 6],
        };

        let previous_ears = self.ears.unwrap_or(ears);
        let previous_gain = if self.ears.is_some() { self.gain } else { gain };
        let previous_taps = self.taps;
        let ramps = frame.interpolation.ramps();
        let fractional = frame.interpolation.fractional_delay();
        let max_delay = self.line.max_delay();
        let n = input.len() as f32;

        for (i, ((x, l), r)) in input.iter().zip(left.iter_mut()).zip(right.iter_mut()).enumerate() {
            self.line.push(*x);
            let t = if ramps { (i + 1) as f32 / n } else { 1.0 };
            let p = previous_ears.lerp(&ears, t);
            let g = previous_gain + (gain - previous_gain) * t;

            let mut out = [0.0f32; 2];
            for (ear, o) in out.iter_mut().enumerate() {
                let delay = (arrival + p.delay[ear]).min(max_delay);
                let sample = if fractional {
                    self.line.tap_fractional(delay)
                } else {
                    self.line.tap(delay.round() as usize)
                };
                *o = self.shadow[ear].process(sample * g * p.gain[ear], p.lowpass[ear]);
            }

            for (from, to) in previous_taps.iter().zip(&taps) {
                let reflected = self.line.tap(to.delay.min(max_delay).round() as usize);
                for (ear, o) in out.iter_mut().enumerate() {
                    *o += reflected * (from.gain[ear] + (to.gain[ear] - from.gain[ear]) * t);
                }
            }

            *l = out[0];
            *r = out[1];
        }

        if let Some(bus) = frame.reverb_bus {
            if !params.flags.reflections_disabled && params.reverb_send > 0.0 {
                let send = gain * params.reverb_send;
                for (b, x) in bus.iter_mut().zip(input) {
                    *b += x * send;
                }
            }
        }

        self.ears = Some(ears);
        self.gain = gain;
        self.taps = taps;

        // Samples still ahead of the longest active tap will be emitted later.
        let longest = taps
            .iter()
            .filter(|tap| tap.gain.iter().any(|g| *g > 0.0))
            .map(|tap| tap.delay)
            .fold(arrival + ears.delay[0].max(ears.delay[1]), f32::max)
            .min(max_delay);
        let input_active = input.iter().any(|x| x.abs() > SILENCE);
        let output_active = left.iter().chain(right.iter()).any(|x| x.abs() > SILENCE);
        let tail_active = self.line.has_energy(longest.ceil() as usize + 1, SILENCE)
            || self.shadow.iter().any(|f| f.state().abs() > SILENCE);

        if input_active || output_active || tail_active {
            SpatializationStatus::Working
        } else {
            SpatializationStatus::Finished
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::hrtf::DEFAULT_HEAD_RADIUS;

    const BLOCK: usize = 512;

    fn render(
        state: &mut SourceState,
        params: &SourceParams,
        input: &[f32],
    ) -> (Vec<f32>, Vec<f32>, SpatializationStatus) {
        let listener = ListenerPose::identity();
        let hrtf = HrtfModel::new(48_000, DEFAULT_HEAD_RADIUS).unwrap();
        let mut left = vec![0.0; input.len()];
        let mut right = vec![0.0; input.len()];
        let frame = RenderFrame {
            listener: &listener,
            hrtf: &hrtf,
            interpolation: HrtfInterpolation::PhaseLerp,
            unit_scale: 1.0,
            room: None,
            reverb_bus: None,
        };
        let status = state.render(params, frame, input, &mut left, &mut right);
        (left, right, status)
    }

    fn energy(buf: &[f32]) -> f32 {
        buf.iter().map(|s| s * s).sum()
    }

    #[test]
    fn test_flags_bits() {
        let flags = SourceFlags::from_bits(0x10 | 0x80 | 0x40 | 0x8000).unwrap();
        assert!(flags.wide_band_hint && flags.direct_time_of_arrival);
        assert_eq!(flags.bits(), 0x90);
        assert!(SourceFlags::from_bits(0x200).is_err());
        assert_eq!(SourceFlags::from_bits(0).unwrap(), SourceFlags::default());
    }

    #[test]
    fn test_attenuation_curve() {
        let mut params = SourceParams::default();
        assert_eq!(params.overall_gain(0.1), 1.0);
        assert_eq!(params.overall_gain(300.0), 0.0);
        let mid = params.overall_gain(1.0);
        assert!((mid - 0.25 * 249.0 / 249.75).abs() < 1e-6);

        params.set_attenuation(AttenuationMode::Fixed, 0.3).unwrap();
        assert_eq!(params.overall_gain(100.0), 0.3);
        params.set_attenuation(AttenuationMode::None, 0.3).unwrap();
        assert_eq!(params.overall_gain(100.0), 1.0);
        assert!(params.set_attenuation(AttenuationMode::Fixed, -1.0).is_err());
    }

    #[test]
    fn test_parameter_validation() {
        let mut params = SourceParams::default();
        assert!(params.set_range(5.0, 1.0).is_err());
        assert!(params.set_range(f32::NAN, 1.0).is_err());
        params.set_range(1.0, 5.0).unwrap();
        assert_eq!((params.range_min, params.range_max), (1.0, 5.0));
        assert!(params.set_radius(-1.0).is_err());
        assert!(params.set_reverb_send(f32::INFINITY).is_err());
        assert!(params.set_position(Vec3::new(f32::NAN, 0.0, 0.0)).is_err());
    }

    #[test]
    fn test_right_source_reaches_right_ear_first() {
        let mut params = SourceParams::default();
        params.set_position(Vec3::new(1.0, 0.0, 0.0)).unwrap();
        let mut state = SourceState::new(48_000 + BLOCK);
        let mut input = vec![0.0; BLOCK];
        input[0] = 1.0;

        let (left, right, status) = render(&mut state, &params, &input);
        assert_eq!(status, SpatializationStatus::Working);
        assert!(energy(&left) > 0.0 && energy(&right) > 0.0);
        assert!(energy(&right) > energy(&left));

        let first = |buf: &[f32]| buf.iter().position(|s| s.abs() > 1e-6).unwrap();
        assert!(first(&right) < first(&left));
    }

    #[test]
    fn test_silence_finishes_immediately() {
        let mut state = SourceState::new(48_000 + BLOCK);
        let (_, _, status) = render(&mut state, &SourceParams::default(), &[0.0; BLOCK]);
        assert_eq!(status, SpatializationStatus::Finished);
    }

    #[test]
    fn test_time_of_arrival_tail_keeps_working() {
        let mut params = SourceParams::default();
        params.set_position(Vec3::new(0.0, 0.0, -40.0)).unwrap();
        params.flags.direct_time_of_arrival = true;
        let mut state = SourceState::new(48_000 + BLOCK);

        let mut input = vec![0.0; BLOCK];
        input[0] = 1.0;
        let (left, _, status) = render(&mut state, &params, &input);
        assert_eq!(status, SpatializationStatus::Working);
        assert_eq!(energy(&left), 0.0, "40 m is about 5600 samples away");

        let silence = vec![0.0; BLOCK];
        let mut heard = false;
        let mut finished = false;
        for _ in 0..40 {
            let (l, r, status) = render(&mut state, &params, &silence);
            if energy(&l) + energy(&r) > 0.0 {
                heard = true;
            }
            if status == SpatializationStatus::Finished {
                finished = true;
                break;
            }
        }
        assert!(heard, "the delayed impulse arrived while silent input was Working");
        assert!(finished);
    }

    #[test]
    fn test_reverb_send_feeds_bus() {
        let mut params = SourceParams::default();
        params.set_position(Vec3::new(0.0, 0.0, -0.1)).unwrap();
        params.set_reverb_send(0.5).unwrap();
        let mut state = SourceState::new(1024);

        let listener = ListenerPose::identity();
        let hrtf = HrtfModel::new(48_000, DEFAULT_HEAD_RADIUS).unwrap();
        let input = [1.0f32; 16];
        let mut bus = [0.25f32; 16];
        let mut left = [0.0; 16];
        let mut right = [0.0; 16];
        state.render(
            &params,
            RenderFrame {
                listener: &listener,
                hrtf: &hrtf,
                interpolation: HrtfInterpolation::Nearest,
                unit_scale: 1.0,
                room: None,
                reverb_bus: Some(&mut bus[..]),
            },
            &input,
            &mut left,
            &mut right,
        );
        assert!(bus.iter().all(|b| (*b - 0.75).abs() < 1e-6));

        params.flags.reflections_disabled = true;
        let mut bus = [0.0f32; 16];
        state.render(
            &params,
            RenderFrame {
                listener: &listener,
                hrtf: &hrtf,
                interpolation: HrtfInterpolation::Nearest,
                unit_scale: 1.0,
                room: None,
                reverb_bus: Some(&mut bus[..]),
            },
            &input,
            &mut left,
            &mut right,
        );
        assert!(bus.iter().all(|b| *b == 0.0));
    }
}
