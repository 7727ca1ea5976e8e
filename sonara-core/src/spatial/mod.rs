//! Binaural rendering: head model, per-source DSP, early reflections,
//! shared reverb and quad binaural playback.

pub mod delay;
pub mod hrtf;
pub mod quad;
pub mod reflections;
pub mod reverb;
pub mod source;

pub use hrtf::{DEFAULT_HEAD_RADIUS, EarParams, HrtfInterpolation, HrtfModel};
pub use quad::{QuadBinauralInput, process_quad_binaural};
pub use reverb::SharedReverb;
pub use source::{
    AttenuationMode, RenderFrame, SourceFlags, SourceParams, SourceState, SpatializationStatus,
};
