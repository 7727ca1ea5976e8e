//! Circular delay line holding a source's recent input.

#[derive(Debug, Clone)]
pub struct DelayLine {
    buffer: Vec<f32>,
    /// Slot of the most recently written sample
    head: usize,
}

impl DelayLine {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0.0; capacity.max(2)],
            head: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Longest delay that can be read back, in samples.
    pub fn max_delay(&self) -> f32 {
        (self.buffer.len() - 2) as f32
    }

    #[inline]
    pub fn push(&mut self, sample: f32) {
        self.head = (self.head + 1) % self.buffer.len();
        self.buffer[self.head] = sample;
    }

    /// Sample written `delay` pushes ago; 0 is the latest.
    #[inline]
    pub fn tap(&self, delay: usize) -> f32 {
        let len = self.buffer.len();
        let delay = delay.min(len - 1);
        self.buffer[(self.head + len - delay) % len]
    }

    /// Linearly interpolated read at a fractional delay.
    #[inline]
    pub fn tap_fractional(&self, delay: f32) -> f32 {
        let delay = delay.clamp(0.0, self.max_delay());
        let whole = delay.floor();
        let frac = delay - whole;
        let a = self.tap(whole as usize);
        let b = self.tap(whole as usize + 1);
        a + (b - a) * frac
    }

    /// Whether any of the `window` most recent samples exceeds `threshold`.
    ///
    /// Used to decide if delayed taps still have something to emit.
    pub fn has_energy(&self, window: usize, threshold: f32) -> bool {
        (0..window.min(self.buffer.len())).any(|d| self.tap(d).abs() > threshold)
    }

    pub fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.head = 0;
    }
}
