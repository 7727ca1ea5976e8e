use crate::error::{Result, SonaraError};

/// Lowest sample rate the engine accepts, in Hz.
pub const MIN_SAMPLE_RATE: u32 = 16_000;
/// Highest sample rate the engine accepts, in Hz.
pub const MAX_SAMPLE_RATE: u32 = 48_000;

/// Configuration descriptor for a Sonara context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SonaraContextDesc {
    /// Maximum number of audio sources the context can spatialize
    pub max_sources: usize,
    /// Sample rate of every buffer passed to the context (16000 to 48000;
    /// 44100 and 48000 give the best quality)
    pub sample_rate: u32,
    /// Number of samples in each mono input buffer
    pub buffer_length: usize,
}

impl Default for SonaraContextDesc {
    fn default() -> Self {
        Self {
            max_sources: 16,
            sample_rate: 48000,
            buffer_length: 512,
        }
    }
}

impl SonaraContextDesc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_sources(mut self, max: usize) -> Self {
        self.max_sources = max;
        self
    }

    pub fn sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = rate;
        self
    }

    pub fn buffer_length(mut self, length: usize) -> Self {
        self.buffer_length = length;
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_sample_rate(self.sample_rate)?;
        if self.buffer_length == 0 {
            return Err(SonaraError::invalid("buffer length must be non-zero"));
        }
        if self.max_sources == 0 {
            return Err(SonaraError::invalid("max sources must be non-zero"));
        }
        Ok(())
    }
}

pub(crate) fn validate_sample_rate(sample_rate: u32) -> Result<()> {
    if (MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&sample_rate) {
        Ok(())
    } else {
        Err(SonaraError::BadSampleRate(sample_rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(SonaraContextDesc::default().validate().is_ok());
    }

    #[test]
    fn test_sample_rate_range() {
        let desc = SonaraContextDesc::new().sample_rate(8000);
        assert!(matches!(desc.validate(), Err(SonaraError::BadSampleRate(8000))));

        let desc = SonaraContextDesc::new().sample_rate(96000);
        assert!(matches!(desc.validate(), Err(SonaraError::BadSampleRate(96000))));

        assert!(SonaraContextDesc::new().sample_rate(16000).validate().is_ok());
        assert!(SonaraContextDesc::new().sample_rate(44100).validate().is_ok());
    }

    #[test]
    fn test_zero_sizes_rejected() {
        let desc = SonaraContextDesc::new().buffer_length(0);
        assert!(matches!(desc.validate(), Err(SonaraError::InvalidParam(_))));

        let desc = SonaraContextDesc::new().max_sources(0);
        assert!(matches!(desc.validate(), Err(SonaraError::InvalidParam(_))));
    }
}
