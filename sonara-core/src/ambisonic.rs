//! Ambisonic encoding and binaural decoding.
//!
//! Buffers are interleaved with `(order + 1)^2` channels per frame. Two
//! layouts are supported:
//!
//! - **AmbiX**: ACN channel order (W Y Z X V T R S U), SN3D normalization
//! - **FuMa**: W X Y Z R S T U V, maxN normalization with W at -3 dB
//!
//! Directions follow the world convention of the default listener: -Z is
//! forward, +X right, +Y up.
//!
//! Decoding samples the sound field at the eight corners of a cube and
//! renders each corner through the context's head model.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::context_desc::validate_sample_rate;
use crate::error::{Result, SonaraError};
use crate::math::{ListenerPose, Vec3, frame_from_look_up};
use crate::spatial::delay::DelayLine;
use crate::spatial::hrtf::{HrtfModel, OnePole};

/// Live streams allowed per context.
pub const MAX_AMBISONIC_STREAMS: usize = 16;

const MAX_CHANNELS: usize = 9;

/// ACN index to spherical-harmonic degree.
const ACN_DEGREE: [usize; MAX_CHANNELS] = [0, 1, 1, 1, 2, 2, 2, 2, 2];

/// FuMa channel `i` holds ACN channel `FUMA_TO_ACN[i]`.
const FUMA_TO_ACN: [usize; MAX_CHANNELS] = [0, 3, 1, 2, 6, 7, 5, 8, 4];

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AmbisonicFormat {
    FuMa = 0,
    AmbiX = 1,
}

impl AmbisonicFormat {
    pub fn from_index(index: i32) -> Option<Self> {
        match index {
            0 => Some(Self::FuMa),
            1 => Some(Self::AmbiX),
            _ => None,
        }
    }
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AmbisonicRenderMode {
    /// Binaural decode of the full sound field
    #[default]
    SphericalHarmonics = -1,
    /// The omnidirectional channel on both ears
    Mono = -2,
}

impl AmbisonicRenderMode {
    pub fn from_index(index: i32) -> Option<Self> {
        match index {
            -1 => Some(Self::SphericalHarmonics),
            -2 => Some(Self::Mono),
            _ => None,
        }
    }
}

/// Channels per frame for `order`.
pub fn channel_count(order: usize) -> Result<usize> {
    match order {
        1 | 2 => Ok((order + 1) * (order + 1)),
        _ => Err(SonaraError::UnsupportedFeature(format!(
            "ambisonic order {}",
            order
        ))),
    }
}

/// Converts a world direction to ambisonic axes (x front, y left, z up).
fn to_ambisonic_axes(direction: Vec3) -> Vec3 {
    Vec3::new(-direction.z, -direction.x, direction.y)
}

/// Real spherical harmonics up to degree 2, ACN order, SN3D.
fn sn3d(d: Vec3) -> [f32; MAX_CHANNELS] {
    let s3 = 3f32.sqrt();
    [
        1.0,
        d.y,
        d.z,
        d.x,
        s3 * d.x * d.y,
        s3 * d.y * d.z,
        0.5 * (3.0 * d.z * d.z - 1.0),
        s3 * d.x * d.z,
        0.5 * s3 * (d.x * d.x - d.y * d.y),
    ]
}

/// Scale from SN3D to FuMa maxN for each ACN channel.
fn fuma_scale(acn: usize) -> f32 {
    match acn {
        0 => std::f32::consts::FRAC_1_SQRT_2,
        1..=3 | 6 => 1.0,
        _ => 2.0 / 3f32.sqrt(),
    }
}

/// Encoding gains for a source direction, in the channel order of `format`.
fn encoding_gains(direction: Vec3, format: AmbisonicFormat, channels: usize) -> [f32; MAX_CHANNELS] {
    let acn = sn3d(to_ambisonic_axes(direction.normalize_or(Vec3::NEG_Z)));
    let mut gains = [0.0; MAX_CHANNELS];
    for (i, g) in gains.iter_mut().enumerate().take(channels) {
        *g = match format {
            AmbisonicFormat::AmbiX => acn[i],
            AmbisonicFormat::FuMa => acn[FUMA_TO_ACN[i]] * fuma_scale(FUMA_TO_ACN[i]),
        };
    }
    gains
}

/// Reads one interleaved frame into ACN/SN3D order.
fn frame_to_acn(frame: &[f32], format: AmbisonicFormat) -> [f32; MAX_CHANNELS] {
    let mut acn = [0.0; MAX_CHANNELS];
    match format {
        AmbisonicFormat::AmbiX => acn[..frame.len()].copy_from_slice(frame),
        AmbisonicFormat::FuMa => {
            for (i, value) in frame.iter().enumerate() {
                let channel = FUMA_TO_ACN[i];
                acn[channel] = value / fuma_scale(channel);
            }
        }
    }
    acn
}

/// Encodes `frames` mono samples arriving from `direction` into `output`.
pub fn mono_to_ambisonic(
    input: &[f32],
    direction: Vec3,
    format: AmbisonicFormat,
    order: usize,
    output: &mut [f32],
    frames: usize,
) -> Result<()> {
    let channels = channel_count(order)?;
    if input.len() < frames || output.len() < frames * channels {
        return Err(SonaraError::invalid(format!(
            "{} frames need {} input and {} output samples",
            frames,
            frames,
            frames * channels
        )));
    }
    if !direction.is_finite() {
        return Err(SonaraError::invalid("direction is not finite"));
    }

    let gains = encoding_gains(direction, format, channels);
    for (x, frame) in input[..frames]
        .iter()
        .zip(output.chunks_exact_mut(channels))
    {
        for (out, g) in frame.iter_mut().zip(gains) {
            *out = x * g;
        }
    }
    Ok(())
}

/// Reserves one of a context's stream slots until dropped.
#[derive(Debug)]
pub(crate) struct StreamSlot {
    live: Arc<AtomicUsize>,
}

impl StreamSlot {
    pub(crate) fn acquire(live: &Arc<AtomicUsize>) -> Result<Self> {
        live.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
            (n < MAX_AMBISONIC_STREAMS).then_some(n + 1)
        })
        .map_err(SonaraError::NoAvailableAmbisonicInstance)?;
        Ok(Self {
            live: Arc::clone(live),
        })
    }
}

impl Drop for StreamSlot {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Cube-corner directions in ambisonic axes.
fn virtual_speakers() -> [Vec3; 8] {
    let c = 1.0 / 3f32.sqrt();
    let mut dirs = [Vec3::ZERO; 8];
    for (i, d) in dirs.iter_mut().enumerate() {
        let sign = |bit: usize| if i & bit == 0 { c } else { -c };
        *d = Vec3::new(sign(1), sign(2), sign(4));
    }
    dirs
}

#[derive(Debug, Clone)]
struct VirtualSpeaker {
    direction: Vec3,
    line: DelayLine,
    shadow: [OnePole; 2],
}

/// A decoder for one pre-encoded ambisonic stream.
///
/// Created through `SonaraContext::create_ambisonic_stream`; dropping it
/// frees its slot in the context.
#[derive(Debug)]
pub struct AmbisonicStream {
    sample_rate: u32,
    buffer_length: usize,
    format: AmbisonicFormat,
    order: usize,
    channels: usize,
    render_mode: AmbisonicRenderMode,
    look: Vec3,
    up: Vec3,
    speakers: Vec<VirtualSpeaker>,
    scratch: Vec<f32>,
    _slot: StreamSlot,
}

impl AmbisonicStream {
    pub(crate) fn new(
        sample_rate: u32,
        buffer_length: usize,
        format: AmbisonicFormat,
        order: usize,
        slot: StreamSlot,
    ) -> Result<Self> {
        validate_sample_rate(sample_rate)?;
        let channels = channel_count(order)?;
        if buffer_length == 0 {
            return Err(SonaraError::invalid("ambisonic buffer length must be non-zero"));
        }
        // Room for the widest head the model accepts in practice.
        let history = (sample_rate as usize / 500).max(16);
        let speakers = virtual_speakers()
            .into_iter()
            .map(|direction| VirtualSpeaker {
                direction,
                line: DelayLine::new(history),
                shadow: [OnePole::default(); 2],
            })
            .collect();
        Ok(Self {
            sample_rate,
            buffer_length,
            format,
            order,
            channels,
            render_mode: AmbisonicRenderMode::default(),
            look: Vec3::NEG_Z,
            up: Vec3::Y,
            speakers,
            scratch: vec![0.0; buffer_length],
            _slot: slot,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn buffer_length(&self) -> usize {
        self.buffer_length
    }

    pub fn format(&self) -> AmbisonicFormat {
        self.format
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Clears decoder history; settings are kept.
    pub fn reset(&mut self) {
        for speaker in &mut self.speakers {
            speaker.line.clear();
            for filter in &mut speaker.shadow {
                filter.reset();
            }
        }
    }

    pub fn set_render_mode(&mut self, mode: AmbisonicRenderMode) {
        self.render_mode = mode;
    }

    pub fn render_mode(&self) -> AmbisonicRenderMode {
        self.render_mode
    }

    /// Orients the sound field. Degenerate or parallel vectors are rejected.
    pub fn set_orientation(&mut self, look: Vec3, up: Vec3) -> Result<()> {
        let pose = ListenerPose::from_vectors(Vec3::ZERO, look, up).ok_or_else(|| {
            SonaraError::invalid(format!("orientation look {} up {} is degenerate", look, up))
        })?;
        self.look = pose.forward();
        self.up = pose.up();
        Ok(())
    }

    /// Look and up vectors.
    pub fn orientation(&self) -> (Vec3, Vec3) {
        (self.look, self.up)
    }

    /// Decodes `frames` interleaved frames from `src` into interleaved stereo `dst`.
    pub(crate) fn process(
        &mut self,
        listener: &ListenerPose,
        head_radius: f32,
        src: &[f32],
        dst: &mut [f32],
        frames: usize,
    ) -> Result<()> {
        if frames > self.buffer_length {
            return Err(SonaraError::invalid(format!(
                "{} frames exceed stream buffer length {}",
                frames, self.buffer_length
            )));
        }
        if src.len() < frames * self.channels || dst.len() < frames * 2 {
            return Err(SonaraError::invalid(format!(
                "{} frames need {} input and {} output samples",
                frames,
                frames * self.channels,
                frames * 2
            )));
        }

        let frames_in = src[..frames * self.channels].chunks_exact(self.channels);
        let out = &mut dst[..frames * 2];

        if self.render_mode == AmbisonicRenderMode::Mono {
            for (frame, stereo) in frames_in.zip(out.chunks_exact_mut(2)) {
                let w = frame_to_acn(frame, self.format)[0];
                stereo[0] = w;
                stereo[1] = w;
            }
            return Ok(());
        }

        let hrtf = HrtfModel::new(self.sample_rate, head_radius)?;
        let [right, up, forward] = frame_from_look_up(self.look, self.up);
        out.fill(0.0);

        let weights: Vec<f32> = (0..self.channels)
            .map(|acn| (2 * ACN_DEGREE[acn] + 1) as f32 / self.speakers.len() as f32)
            .collect();
        let acn_frames: Vec<[f32; MAX_CHANNELS]> = frames_in
            .map(|frame| frame_to_acn(frame, self.format))
            .collect();

        for speaker in &mut self.speakers {
            let harmonics = sn3d(speaker.direction);
            // Speaker direction in world space after the stream orientation.
            let d = speaker.direction;
            let world = forward * d.x - right * d.y + up * d.z;
            let ears = hrtf.params(listener.direction_to_local(world), 0.0, true);

            for (feed, acn) in self.scratch.iter_mut().zip(&acn_frames) {
                *feed = (0..self.channels)
                    .map(|c| acn[c] * harmonics[c] * weights[c])
                    .sum();
            }

            for (feed, stereo) in self.scratch[..frames].iter().zip(out.chunks_exact_mut(2)) {
                speaker.line.push(*feed);
                for ear in 0..2 {
                    let sample = speaker.line.tap_fractional(ears.delay[ear]);
                    stereo[ear] += speaker.shadow[ear].process(sample * ears.gain[ear], ears.lowpass[ear]);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(live: &Arc<AtomicUsize>) -> StreamSlot {
        StreamSlot::acquire(live).unwrap()
    }

    #[test]
    fn test_encode_front_ambix_and_fuma() {
        let mut ambix = [0.0; 4];
        mono_to_ambisonic(&[1.0], Vec3::NEG_Z, AmbisonicFormat::AmbiX, 1, &mut ambix, 1).unwrap();
        // W Y Z X
        assert_eq!(ambix, [1.0, 0.0, 0.0, 1.0]);

        let mut fuma = [0.0; 4];
        mono_to_ambisonic(&[1.0], Vec3::NEG_Z, AmbisonicFormat::FuMa, 1, &mut fuma, 1).unwrap();
        // W X Y Z
        assert!((fuma[0] - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
        assert_eq!(&fuma[1..], &[1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_encode_left_and_second_order() {
        let mut out = [0.0; 9];
        mono_to_ambisonic(&[2.0], Vec3::NEG_X, AmbisonicFormat::AmbiX, 2, &mut out, 1).unwrap();
        assert!((out[1] - 2.0).abs() < 1e-6, "Y is positive on the left");
        // U = sqrt(3)/2 (x^2 - y^2) for a pure left source
        assert!((out[8] + 3f32.sqrt()).abs() < 1e-5);

        let mut fuma = [0.0; 9];
        mono_to_ambisonic(&[2.0], Vec3::NEG_X, AmbisonicFormat::FuMa, 2, &mut fuma, 1).unwrap();
        let back = frame_to_acn(&fuma, AmbisonicFormat::FuMa);
        for (a, b) in back.iter().zip(out) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_unsupported_order_and_short_buffers() {
        let mut out = [0.0; 16];
        let err = mono_to_ambisonic(&[1.0], Vec3::X, AmbisonicFormat::AmbiX, 3, &mut out, 1).unwrap_err();
        assert!(matches!(err, SonaraError::UnsupportedFeature(_)));
        assert!(mono_to_ambisonic(&[1.0; 4], Vec3::X, AmbisonicFormat::AmbiX, 1, &mut out, 5).is_err());
    }

    #[test]
    fn test_slot_limit() {
        let live = Arc::new(AtomicUsize::new(0));
        let slots: Vec<_> = (0..MAX_AMBISONIC_STREAMS).map(|_| slot(&live)).collect();
        assert!(matches!(
            StreamSlot::acquire(&live),
            Err(SonaraError::NoAvailableAmbisonicInstance(_))
        ));
        drop(slots);
        assert_eq!(live.load(Ordering::Acquire), 0);
    }

    #[test]
    fn test_stream_validation() {
        let live = Arc::new(AtomicUsize::new(0));
        assert!(matches!(
            AmbisonicStream::new(8_000, 256, AmbisonicFormat::AmbiX, 1, slot(&live)),
            Err(SonaraError::BadSampleRate(_))
        ));
        assert!(matches!(
            AmbisonicStream::new(48_000, 256, AmbisonicFormat::AmbiX, 4, slot(&live)),
            Err(SonaraError::UnsupportedFeature(_))
        ));
        assert_eq!(live.load(Ordering::Acquire), 0, "failed streams free their slot");

        let mut stream = AmbisonicStream::new(48_000, 256, AmbisonicFormat::AmbiX, 1, slot(&live)).unwrap();
        assert!(stream.set_orientation(Vec3::Y, Vec3::Y).is_err());
        stream.set_orientation(Vec3::X, Vec3::Y).unwrap();
        assert_eq!(stream.orientation().0, Vec3::X);

        let listener = ListenerPose::identity();
        let src = vec![0.0; 512 * 4];
        let mut dst = vec![0.0; 512 * 2];
        assert!(stream.process(&listener, 0.0875, &src, &mut dst, 512).is_err());
    }

    #[test]
    fn test_decode_places_source_on_correct_side() {
        let live = Arc::new(AtomicUsize::new(0));
        let mut stream = AmbisonicStream::new(48_000, 256, AmbisonicFormat::AmbiX, 1, slot(&live)).unwrap();
        let listener = ListenerPose::identity();

        let tone: Vec<f32> = (0..256).map(|i| (i as f32 * 0.05).sin()).collect();
        let mut encoded = vec![0.0; 256 * 4];
        mono_to_ambisonic(&tone, Vec3::X, AmbisonicFormat::AmbiX, 1, &mut encoded, 256).unwrap();

        let mut out = vec![0.0; 512];
        stream.process(&listener, 0.0875, &encoded, &mut out, 256).unwrap();
        let left: f32 = out.iter().step_by(2).map(|s| s * s).sum();
        let right: f32 = out.iter().skip(1).step_by(2).map(|s| s * s).sum();
        assert!(right > left, "right {} left {}", right, left);

        stream.set_render_mode(AmbisonicRenderMode::Mono);
        stream.process(&listener, 0.0875, &encoded, &mut out, 256).unwrap();
        assert_eq!(out[10], out[11]);
        assert_eq!(out[10], tone[5]);
    }
}
