//! Performance counters for the spatialization and shared reverb paths.
//!
//! Counters only observe; nothing in the audio path reads them back. While
//! profiling is disabled the timed work still runs but nothing is recorded.

use std::time::{Duration, Instant};

/// Subsystems with a counter. Discriminants match the C boundary.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PerformanceCounter {
    Spatialization = 0,
    SharedReverb = 1,
}

impl PerformanceCounter {
    pub const ALL: [Self; 2] = [Self::Spatialization, Self::SharedReverb];

    pub fn from_index(index: i32) -> Option<Self> {
        match index {
            0 => Some(Self::Spatialization),
            1 => Some(Self::SharedReverb),
            _ => None,
        }
    }
}

/// Accumulated samples for one counter.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CounterSample {
    /// Number of timed calls
    pub count: u64,
    /// Total time spent in those calls, in microseconds
    pub time_us: f64,
}

#[derive(Debug, Clone)]
pub struct PerformanceCounters {
    samples: [CounterSample; 2],
    enabled: bool,
}

impl Default for PerformanceCounters {
    fn default() -> Self {
        Self {
            samples: Default::default(),
            enabled: true,
        }
    }
}

impl PerformanceCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Turns recording on or off. Accumulated samples are kept either way.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn get(&self, counter: PerformanceCounter) -> CounterSample {
        self.samples[counter as usize]
    }

    pub fn reset(&mut self, counter: PerformanceCounter) {
        self.samples[counter as usize] = CounterSample::default();
    }

    pub fn reset_all(&mut self) {
        self.samples = Default::default();
    }

    pub fn record(&mut self, counter: PerformanceCounter, elapsed: Duration) {
        if !self.enabled {
            return;
        }
        let sample = &mut self.samples[counter as usize];
        sample.count += 1;
        sample.time_us += elapsed.as_secs_f64() * 1e6;
    }

    /// Runs `f` and records its duration under `counter`.
    pub fn time<T>(&mut self, counter: PerformanceCounter, f: impl FnOnce() -> T) -> T {
        if !self.enabled {
            return f();
        }
        let start = Instant::now();
        let result = f();
        self.record(counter, start.elapsed());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_reset() {
        let mut counters = PerformanceCounters::new();
        counters.record(PerformanceCounter::Spatialization, Duration::from_micros(250));
        counters.record(PerformanceCounter::Spatialization, Duration::from_micros(750));
        let value = counters.time(PerformanceCounter::SharedReverb, || 7);
        assert_eq!(value, 7);

        let spat = counters.get(PerformanceCounter::Spatialization);
        assert_eq!(spat.count, 2);
        assert!((spat.time_us - 1000.0).abs() < 1e-6);
        assert_eq!(counters.get(PerformanceCounter::SharedReverb).count, 1);

        counters.reset(PerformanceCounter::Spatialization);
        assert_eq!(counters.get(PerformanceCounter::Spatialization), CounterSample::default());
        assert_eq!(counters.get(PerformanceCounter::SharedReverb).count, 1);
    }

    #[test]
    fn test_disabled_counters_do_not_record() {
        let mut counters = PerformanceCounters::new();
        assert!(counters.is_enabled());
        counters.record(PerformanceCounter::SharedReverb, Duration::from_micros(10));

        counters.set_enabled(false);
        counters.record(PerformanceCounter::SharedReverb, Duration::from_micros(10));
        assert_eq!(counters.time(PerformanceCounter::Spatialization, || 3), 3);
        assert_eq!(counters.get(PerformanceCounter::SharedReverb).count, 1);
        assert_eq!(counters.get(PerformanceCounter::Spatialization).count, 0);

        counters.set_enabled(true);
        counters.time(PerformanceCounter::Spatialization, || ());
        assert_eq!(counters.get(PerformanceCounter::Spatialization).count, 1);
    }

    #[test]
    fn test_counter_indices() {
        assert_eq!(PerformanceCounter::from_index(1), Some(PerformanceCounter::SharedReverb));
        assert_eq!(PerformanceCounter::from_index(2), None);
    }
}
