//! Error types for Sonara
//!
//! Every failure maps onto a stable integer code in the 2000-2099 band so the
//! C boundary can report it without an out-of-band channel.

use thiserror::Error;

/// Integer result codes exchanged across the C boundary. `0` is success.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Success = 0,
    Unknown = 2000,
    InvalidParam = 2001,
    BadSampleRate = 2002,
    /// Kept for code-space compatibility; the engine links statically.
    MissingDll = 2003,
    BadAlignment = 2004,
    Uninitialized = 2005,
    HrtfInitFailure = 2006,
    BadVersion = 2007,
    /// Kept for code-space compatibility; the engine links statically.
    SymbolNotFound = 2008,
    SharedReverbDisabled = 2009,
    NoAvailableAmbisonicInstance = 2017,
    MemoryAllocFailure = 2018,
    UnsupportedFeature = 2019,
    InternalEnd = 2099,
}

impl ErrorCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

#[derive(Error, Debug)]
pub enum SonaraError {
    #[error("Unknown error: {0}")]
    Unknown(String),

    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    #[error("Unsupported sample rate: {0} Hz (expected 16000..=48000)")]
    BadSampleRate(u32),

    #[error("Buffer is not suitably aligned")]
    BadAlignment,

    #[error("Function called before initialization")]
    Uninitialized,

    #[error("HRTF initialization failed: {0}")]
    HrtfInitFailure(String),

    #[error("Version mismatch: expected {expected}, found {found}")]
    BadVersion { expected: u32, found: u32 },

    #[error("Late reverberation is disabled")]
    SharedReverbDisabled,

    #[error("No ambisonic stream slot available (max {0})")]
    NoAvailableAmbisonicInstance(usize),

    #[error("Memory allocation failed: {0}")]
    MemoryAllocFailure(String),

    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),
}

impl SonaraError {
    /// Shorthand used by parameter checks throughout the crate.
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidParam(msg.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Unknown(_) => ErrorCode::Unknown,
            Self::InvalidParam(_) => ErrorCode::InvalidParam,
            Self::BadSampleRate(_) => ErrorCode::BadSampleRate,
            Self::BadAlignment => ErrorCode::BadAlignment,
            Self::Uninitialized => ErrorCode::Uninitialized,
            Self::HrtfInitFailure(_) => ErrorCode::HrtfInitFailure,
            Self::BadVersion { .. } => ErrorCode::BadVersion,
            Self::SharedReverbDisabled => ErrorCode::SharedReverbDisabled,
            Self::NoAvailableAmbisonicInstance(_) => ErrorCode::NoAvailableAmbisonicInstance,
            Self::MemoryAllocFailure(_) => ErrorCode::MemoryAllocFailure,
            Self::UnsupportedFeature(_) => ErrorCode::UnsupportedFeature,
        }
    }
}

pub type Result<T> = std::result::Result<T, SonaraError>;

/// Collapses a result into the integer code returned over the C boundary.
pub fn result_code<T>(result: &Result<T>) -> i32 {
    match result {
        Ok(_) => ErrorCode::Success.as_i32(),
        Err(e) => e.code().as_i32(),
    }
}
