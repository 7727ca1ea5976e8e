//! # Sonara Core
//!
//! A native spatial audio engine: per-source binaural rendering, early
//! reflections and a shared late reverb for a simple shoebox room, a room
//! estimated at runtime by ray casting, and geometry-driven propagation.
//!
//! The host owns the audio thread. Each audio frame it spatializes every
//! active source into a stereo buffer and then mixes in the shared reverb:
//!
//! ```no_run
//! use sonara_core::{EnableFlag, SonaraContext, SonaraContextDesc, Vec3};
//!
//! let desc = SonaraContextDesc::new()
//!     .max_sources(8)
//!     .sample_rate(48_000)
//!     .buffer_length(512);
//! let mut context = SonaraContext::new(desc)?;
//! context.set_enabled(EnableFlag::SimpleRoomModeling, true);
//! context.set_enabled(EnableFlag::LateReverberation, true);
//!
//! context.set_listener_vectors(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y)?;
//! context.set_source_position(0, Vec3::new(2.0, 0.0, -1.0))?;
//!
//! let input = vec![0.0f32; 512];
//! let mut output = vec![0.0f32; 1024];
//! let status = context.spatialize_mono_interleaved(0, &input, &mut output)?;
//! context.mix_in_shared_reverb_interleaved(&mut output)?;
//! println!("source status: {:?}", status);
//! # Ok::<(), sonara_core::SonaraError>(())
//! ```
//!
//! ## Key Components
//!
//! - **[`SonaraContext`]**: owns the listener, the source pool, the reverb and room state
//! - **[`SonaraContextDesc`]**: source count, sample rate and buffer length
//! - **[`scene`]**: materials, meshes and geometry used for propagation
//! - **[`room`]**: shoebox parameters and the background room estimator
//! - **[`ambisonic`]**: first and second order encode and binaural decode
//! - **[`ffi`]**: the C ABI, returning integer result codes
//!
//! ## Threading
//!
//! All rendering runs on the caller's thread. Dynamic room modeling and
//! propagation start one background estimator thread that casts rays and
//! publishes room estimates; the audio path only polls a channel.
//!
//! ## Features
//!
//! - `propagation` (default): geometry, materials and the propagation
//!   reflection model. Without it those calls return
//!   [`SonaraError::UnsupportedFeature`].

pub mod ambisonic;
pub mod config;
pub mod context;
pub mod error;
pub mod ffi;
pub mod math;
pub mod profiling;
pub mod room;
pub mod scene;
pub mod spatial;

pub use ambisonic::{AmbisonicFormat, AmbisonicRenderMode, AmbisonicStream, mono_to_ambisonic};
pub use config::{DynamicRoomSettings, PropagationSettings, SonaraContextDesc};
pub use context::{EnableFlag, SonaraContext, Version, version};
pub use error::{ErrorCode, Result, SonaraError};
pub use math::{ListenerPose, Vec3};
pub use profiling::{CounterSample, PerformanceCounter};
pub use room::{BoxRoomParameters, ReflectionModel, RoomEstimate};
pub use scene::{
    AudioGeometry, AudioMaterial, GeometryId, MaterialId, MaterialPreset, MaterialProperty,
    RayCaster, RayHit, Serializer, get_reflection_bands,
};
pub use spatial::{
    AttenuationMode, HrtfInterpolation, SourceFlags, SpatializationStatus, process_quad_binaural,
};
