//! Shared late reverb: a Freeverb-style network of eight damped feedback
//! combs followed by four series allpasses per channel.
//!
//! Each delay element is a ring buffer pre-filled with silence, so popping
//! the oldest sample and pushing the newest keeps its length constant.

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::error::{Result, SonaraError};

/// Comb lengths in samples at 44.1 kHz.
const COMB_TUNING: [usize; 8] = [1116, 1188, 1277, 1356, 1422, 1491, 1557, 1617];
const ALLPASS_TUNING: [usize; 4] = [556, 441, 341, 225];
/// Extra samples added to every right-channel delay.
const STEREO_SPREAD: usize = 23;
const TUNING_RATE: f32 = 44_100.0;

const ALLPASS_FEEDBACK: f32 = 0.5;
const INPUT_GAIN: f32 = 0.015;
const WET_SCALE: f32 = 3.0;

/// Relative delay jitter applied when randomization is on.
const JITTER: f32 = 0.07;

/// Sum of squares below which the network counts as silent.
const SILENCE: f32 = 1e-10;

pub const MIN_RT60: f32 = 0.1;
pub const MAX_RT60: f32 = 10.0;

struct DelayFifo {
    producer: HeapProd<f32>,
    consumer: HeapCons<f32>,
}

impl DelayFifo {
    fn new(length: usize) -> Self {
        let (mut producer, consumer) = HeapRb::<f32>::new(length.max(1)).split();
        while producer.try_push(0.0).is_ok() {}
        Self { producer, consumer }
    }

    #[inline]
    fn cycle(&mut self, input: impl FnOnce(f32) -> f32) -> f32 {
        let delayed = self.consumer.try_pop().unwrap_or(0.0);
        let _ = self.producer.try_push(input(delayed));
        delayed
    }

    fn energy(&self) -> f32 {
        self.consumer.iter().map(|s| s * s).sum()
    }

    fn len(&self) -> usize {
        self.consumer.occupied_len()
    }

    fn clear(&mut self) {
        while self.consumer.try_pop().is_some() {}
        while self.producer.try_push(0.0).is_ok() {}
    }
}

struct Comb {
    fifo: DelayFifo,
    feedback: f32,
    damp: f32,
    filter_state: f32,
}

impl Comb {
    fn new(length: usize) -> Self {
        Self {
            fifo: DelayFifo::new(length),
            feedback: 0.0,
            damp: 0.0,
            filter_state: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let (feedback, damp) = (self.feedback, self.damp);
        let mut filtered = self.filter_state;
        let out = self.fifo.cycle(|delayed| {
            filtered = delayed * (1.0 - damp) + filtered * damp;
            input + filtered * feedback
        });
        self.filter_state = filtered;
        out
    }
}

struct Allpass {
    fifo: DelayFifo,
}

impl Allpass {
    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let delayed = self.fifo.cycle(|delayed| input + delayed * ALLPASS_FEEDBACK);
        delayed - input
    }
}

struct Channel {
    combs: Vec<Comb>,
    allpasses: Vec<Allpass>,
}

impl Channel {
    fn new(scale: f32, spread: usize, jitter: &mut impl FnMut() -> f32) -> Self {
        let length = |tuning: usize, jitter: f32| {
            (((tuning + spread) as f32 * scale) * (1.0 + jitter)).round().max(1.0) as usize
        };
        Self {
            combs: COMB_TUNING
                .iter()
                .map(|t| Comb::new(length(*t, jitter())))
                .collect(),
            allpasses: ALLPASS_TUNING
                .iter()
                .map(|t| Allpass {
                    fifo: DelayFifo::new(length(*t, jitter())),
                })
                .collect(),
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let mut out: f32 = self.combs.iter_mut().map(|c| c.process(input)).sum();
        for allpass in &mut self.allpasses {
            out = allpass.process(out);
        }
        out
    }

    fn energy(&self) -> f32 {
        let combs: f32 = self.combs.iter().map(|c| c.fifo.energy()).sum();
        let allpasses: f32 = self.allpasses.iter().map(|a| a.fifo.energy()).sum();
        combs + allpasses
    }

    fn clear(&mut self) {
        for comb in &mut self.combs {
            comb.fifo.clear();
            comb.filter_state = 0.0;
        }
        for allpass in &mut self.allpasses {
            allpass.fifo.clear();
        }
    }
}

/// Deterministic xorshift jitter in `[-JITTER, JITTER]`.
fn jitter_source(enabled: bool) -> impl FnMut() -> f32 {
    let mut state: u32 = 0x9E37_79B9;
    move || {
        if !enabled {
            return 0.0;
        }
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        (state as f32 / u32::MAX as f32 * 2.0 - 1.0) * JITTER
    }
}

pub struct SharedReverb {
    sample_rate: f32,
    channels: [Channel; 2],
    randomize: bool,
    rt60: f32,
    damping: f32,
    wet_level: f32,
}

impl SharedReverb {
    pub fn new(sample_rate: u32, randomize: bool) -> Self {
        let sample_rate = sample_rate as f32;
        let mut reverb = Self {
            sample_rate,
            channels: Self::build(sample_rate, randomize),
            randomize,
            rt60: 1.0,
            damping: 0.2,
            wet_level: 1.0,
        };
        reverb.update_feedback();
        reverb
    }

    fn build(sample_rate: f32, randomize: bool) -> [Channel; 2] {
        let scale = sample_rate / TUNING_RATE;
        let mut jitter = jitter_source(randomize);
        [
            Channel::new(scale, 0, &mut jitter),
            Channel::new(scale, STEREO_SPREAD, &mut jitter),
        ]
    }

    /// Switches delay randomization, rebuilding the network.
    pub fn set_randomize(&mut self, randomize: bool) {
        if randomize != self.randomize {
            self.randomize = randomize;
            self.channels = Self::build(self.sample_rate, randomize);
            self.update_feedback();
        }
    }

    pub fn randomize(&self) -> bool {
        self.randomize
    }

    /// Sets the decay time (clamped to `[0.1, 10]` s) and high-frequency damping.
    pub fn configure(&mut self, rt60: f32, damping: f32) {
        let rt60 = if rt60.is_finite() { rt60 } else { MAX_RT60 };
        self.rt60 = rt60.clamp(MIN_RT60, MAX_RT60);
        self.damping = damping.clamp(0.0, 0.95);
        self.update_feedback();
    }

    pub fn rt60(&self) -> f32 {
        self.rt60
    }

    fn update_feedback(&mut self) {
        for channel in &mut self.channels {
            for comb in &mut channel.combs {
                let seconds = comb.fifo.len() as f32 / self.sample_rate;
                // -60 dB after rt60 seconds of round trips
                comb.feedback = 10f32.powf(-3.0 * seconds / self.rt60);
                comb.damp = self.damping;
            }
        }
    }

    pub fn set_wet_level(&mut self, level: f32) -> Result<()> {
        if !(level.is_finite() && level >= 0.0) {
            return Err(SonaraError::invalid(format!("reverb wet level {}", level)));
        }
        self.wet_level = level;
        Ok(())
    }

    pub fn wet_level(&self) -> f32 {
        self.wet_level
    }

    /// Runs `input` through the network and adds the result to `left`/`right`.
    pub fn process(&mut self, input: &[f32], left: &mut [f32], right: &mut [f32]) {
        let gain = WET_SCALE * self.wet_level;
        for ((x, l), r) in input.iter().zip(left.iter_mut()).zip(right.iter_mut()) {
            let x = x * INPUT_GAIN;
            let [ch_left, ch_right] = &mut self.channels;
            *l += ch_left.process(x) * gain;
            *r += ch_right.process(x) * gain;
        }
    }

    /// Whether the network still holds audible energy.
    pub fn is_ringing(&self) -> bool {
        self.channels.iter().map(Channel::energy).sum::<f32>() > SILENCE
    }

    pub fn clear(&mut self) {
        for channel in &mut self.channels {
            channel.clear();
        }
    }
}
