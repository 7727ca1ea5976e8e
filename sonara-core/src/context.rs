//! The spatialization context.
//!
//! A [`SonaraContext`] owns every piece of per-session state: the source pool,
//! the shared reverb bus, room state, the geometry and material registries
//! and the performance counters. All mutation goes through `&mut self`, so a
//! context can be moved to the audio thread but is never shared without the
//! caller's own synchronization.
//!
//! # Per-frame order
//!
//! 1. [`SonaraContext::spatialize_mono_lr`] (or the interleaved variant) for
//!    every active source
//! 2. one [`SonaraContext::mix_in_shared_reverb_lr`] (or interleaved) call
//!
//! The room estimate is refreshed once per frame, on the first source
//! rendered after the previous reverb mix.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::time::Instant;

use crate::ambisonic::{AmbisonicFormat, AmbisonicStream, StreamSlot};
use crate::config::{DynamicRoomSettings, PropagationSettings, SonaraContextDesc};
use crate::error::{Result, SonaraError};
use crate::math::{ListenerPose, Vec3};
use crate::profiling::{CounterSample, PerformanceCounter, PerformanceCounters};
use crate::room::{
    BoxRoomParameters, EstimatorCommand, RayBudget, ReflectionModel, RoomEstimate, RoomEstimator,
};
use crate::scene::{
    AudioGeometry, AudioMaterial, GeometryId, GeometryTable, IoSerializer, MaterialId,
    MaterialPreset, MaterialProperty, MaterialTable, Mesh, MeshDesc, MeshGroup, PropagationScene,
    RayCaster, RayHit, Serializer, read_geometry, write_geometry,
};
use crate::spatial::{
    AttenuationMode, DEFAULT_HEAD_RADIUS, HrtfInterpolation, HrtfModel, RenderFrame, SharedReverb,
    SourceFlags, SourceParams, SourceState, SpatializationStatus,
};

/// Longest delay a source can apply (time of arrival plus reflections), in seconds.
const MAX_SOURCE_DELAY_SECONDS: f32 = 0.5;

/// High-frequency damping of the shared reverb.
const REVERB_DAMPING: f32 = 0.2;

/// Global feature toggles. Discriminants match the C boundary.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnableFlag {
    /// Early reflections from the active room box
    SimpleRoomModeling = 2,
    /// The shared late-reverb bus
    LateReverberation = 3,
    /// Decorrelate the reverb with randomized delay lengths
    RandomizeReverb = 4,
}

impl EnableFlag {
    pub fn from_index(index: i32) -> Option<Self> {
        match index {
            2 => Some(Self::SimpleRoomModeling),
            3 => Some(Self::LateReverberation),
            4 => Some(Self::RandomizeReverb),
            _ => None,
        }
    }
}

/// Library version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub string: &'static str,
}

/// Returns the version of this build.
pub fn version() -> Version {
    let part = |s: &str| s.parse().unwrap_or(0);
    Version {
        major: part(env!("CARGO_PKG_VERSION_MAJOR")),
        minor: part(env!("CARGO_PKG_VERSION_MINOR")),
        patch: part(env!("CARGO_PKG_VERSION_PATCH")),
        string: env!("CARGO_PKG_VERSION"),
    }
}

fn require_propagation() -> Result<()> {
    if cfg!(feature = "propagation") {
        Ok(())
    } else {
        Err(SonaraError::UnsupportedFeature(
            "built without the `propagation` feature".into(),
        ))
    }
}

struct Source {
    params: SourceParams,
    state: SourceState,
    /// Rendered since the current frame began
    in_frame: bool,
}

impl Source {
    fn new(history: usize) -> Self {
        Self {
            params: SourceParams::default(),
            state: SourceState::new(history),
            in_frame: false,
        }
    }
}

/// Room state driven by the estimator.
#[derive(Default)]
struct RoomTracking {
    /// Model the estimator is currently configured for
    model: Option<ReflectionModel>,
    /// Newest estimate received from the worker
    target: Option<RoomEstimate>,
    /// Smoothed estimate used for rendering
    current: Option<RoomEstimate>,
}

/// An isolated spatialization session.
///
/// # Example
///
/// ```no_run
/// use sonara_core::{SonaraContext, SonaraContextDesc};
/// use sonara_core::math::Vec3;
///
/// let mut context = SonaraContext::new(SonaraContextDesc::default())?;
/// context.set_source_position(0, Vec3::new(1.0, 0.0, 0.0))?;
///
/// let input = vec![0.0; 512];
/// let mut left = vec![0.0; 512];
/// let mut right = vec![0.0; 512];
/// let status = context.spatialize_mono_lr(0, &input, &mut left, &mut right)?;
/// # let _ = status;
/// # Ok::<(), sonara_core::SonaraError>(())
/// ```
pub struct SonaraContext {
    desc: SonaraContextDesc,
    listener: ListenerPose,
    unit_scale: f32,
    interpolation: HrtfInterpolation,
    hrtf: HrtfModel,

    room_modeling: bool,
    late_reverb: bool,

    sources: Vec<Source>,
    reverb: SharedReverb,
    reverb_bus: Vec<f32>,
    scratch: [Vec<f32>; 2],
    frame_open: bool,

    box_room: BoxRoomParameters,
    reflection_model: ReflectionModel,
    dynamic_settings: DynamicRoomSettings,
    propagation: PropagationSettings,
    ray_caster: Option<Arc<dyn RayCaster>>,
    estimator: Option<RoomEstimator>,
    estimator_dirty: bool,
    room: RoomTracking,

    geometries: GeometryTable,
    materials: MaterialTable,
    scene: Arc<PropagationScene>,
    scene_dirty: bool,

    counters: PerformanceCounters,
    ambisonic_slots: Arc<AtomicUsize>,
}

impl SonaraContext {
    /// Creates a context.
    ///
    /// # Errors
    ///
    /// [`SonaraError::BadSampleRate`] when the sample rate is outside
    /// 16000..=48000 Hz, [`SonaraError::InvalidParam`] for a zero buffer
    /// length or source count.
    pub fn new(desc: SonaraContextDesc) -> Result<Self> {
        desc.validate()?;
        let history = source_history(&desc);
        let hrtf = HrtfModel::new(desc.sample_rate, DEFAULT_HEAD_RADIUS)
            .map_err(|e| SonaraError::HrtfInitFailure(e.to_string()))?;

        log::info!(
            "Sonara context created: {} Hz, {} samples per buffer, {} sources",
            desc.sample_rate,
            desc.buffer_length,
            desc.max_sources
        );

        Ok(Self {
            listener: ListenerPose::identity(),
            unit_scale: 1.0,
            interpolation: HrtfInterpolation::default(),
            hrtf,
            room_modeling: false,
            late_reverb: false,
            sources: (0..desc.max_sources).map(|_| Source::new(history)).collect(),
            reverb: SharedReverb::new(desc.sample_rate, true),
            reverb_bus: vec![0.0; desc.buffer_length],
            scratch: [vec![0.0; desc.buffer_length], vec![0.0; desc.buffer_length]],
            frame_open: false,
            box_room: BoxRoomParameters::default(),
            reflection_model: ReflectionModel::default(),
            dynamic_settings: DynamicRoomSettings::default(),
            propagation: PropagationSettings::default(),
            ray_caster: None,
            estimator: None,
            estimator_dirty: true,
            room: RoomTracking::default(),
            geometries: GeometryTable::new(),
            materials: MaterialTable::new(),
            scene: Arc::new(PropagationScene::default()),
            scene_dirty: false,
            counters: PerformanceCounters::new(),
            ambisonic_slots: Arc::new(AtomicUsize::new(0)),
            desc,
        })
    }

    /// Applies a new configuration in place.
    ///
    /// Source parameters, geometry and materials are kept. Source DSP state,
    /// the reverb, the room estimate and the counters start over. The source
    /// pool only grows or shrinks when `max_sources` changes.
    pub fn reinitialize(&mut self, desc: SonaraContextDesc) -> Result<()> {
        desc.validate()?;
        let history = source_history(&desc);
        let rebuild_states = history != source_history(&self.desc);

        self.hrtf = HrtfModel::new(desc.sample_rate, self.hrtf.head_radius())
            .map_err(|e| SonaraError::HrtfInitFailure(e.to_string()))?;
        self.sources
            .resize_with(desc.max_sources, || Source::new(history));
        for source in &mut self.sources {
            if rebuild_states {
                source.state = SourceState::new(history);
            } else {
                source.state.reset();
            }
            source.in_frame = false;
        }

        let wet_level = self.reverb.wet_level();
        self.reverb = SharedReverb::new(desc.sample_rate, self.reverb.randomize());
        self.reverb.set_wet_level(wet_level)?;
        self.reverb_bus = vec![0.0; desc.buffer_length];
        self.scratch = [vec![0.0; desc.buffer_length], vec![0.0; desc.buffer_length]];
        self.frame_open = false;
        self.room.target = None;
        self.room.current = None;
        self.counters.reset_all();

        log::info!(
            "Sonara context reinitialized: {} Hz, {} samples per buffer, {} sources",
            desc.sample_rate,
            desc.buffer_length,
            desc.max_sources
        );
        self.desc = desc;
        Ok(())
    }

    /// Destroys the context, joining the background estimator.
    pub fn destroy(self) {
        drop(self);
    }

    pub fn desc(&self) -> &SonaraContextDesc {
        &self.desc
    }

    pub fn sample_rate(&self) -> u32 {
        self.desc.sample_rate
    }

    pub fn buffer_length(&self) -> usize {
        self.desc.buffer_length
    }

    pub fn max_sources(&self) -> usize {
        self.desc.max_sources
    }

    pub fn set_enabled(&mut self, flag: EnableFlag, enabled: bool) {
        log::debug!("{:?} {}", flag, if enabled { "enabled" } else { "disabled" });
        match flag {
            EnableFlag::SimpleRoomModeling => self.room_modeling = enabled,
            EnableFlag::LateReverberation => self.late_reverb = enabled,
            EnableFlag::RandomizeReverb => self.reverb.set_randomize(enabled),
        }
    }

    pub fn is_enabled(&self, flag: EnableFlag) -> bool {
        match flag {
            EnableFlag::SimpleRoomModeling => self.room_modeling,
            EnableFlag::LateReverberation => self.late_reverb,
            EnableFlag::RandomizeReverb => self.reverb.randomize(),
        }
    }

    /// Places the listener. `forward` and `up` must be non-zero and not parallel.
    pub fn set_listener_vectors(&mut self, position: Vec3, forward: Vec3, up: Vec3) -> Result<()> {
        self.listener = ListenerPose::from_vectors(position, forward, up).ok_or_else(|| {
            SonaraError::invalid(format!(
                "listener pose position {} forward {} up {}",
                position, forward, up
            ))
        })?;
        if let Some(estimator) = &self.estimator {
            estimator.send(EstimatorCommand::SetListener(position));
        }
        Ok(())
    }

    pub fn listener(&self) -> &ListenerPose {
        &self.listener
    }

    /// Sets the number of metres per game unit.
    pub fn set_unit_scale(&mut self, unit_scale: f32) -> Result<()> {
        if !(unit_scale.is_finite() && unit_scale > 0.0) {
            return Err(SonaraError::invalid(format!("unit scale {}", unit_scale)));
        }
        self.unit_scale = unit_scale;
        self.estimator_dirty = true;
        Ok(())
    }

    pub fn unit_scale(&self) -> f32 {
        self.unit_scale
    }

    pub fn set_hrtf_interpolation(&mut self, interpolation: HrtfInterpolation) {
        self.interpolation = interpolation;
    }

    pub fn hrtf_interpolation(&self) -> HrtfInterpolation {
        self.interpolation
    }

    /// Sets the head radius in metres used for interaural cues.
    pub fn set_head_radius(&mut self, radius: f32) -> Result<()> {
        self.hrtf.set_head_radius(radius)
    }

    pub fn head_radius(&self) -> f32 {
        self.hrtf.head_radius()
    }

    // Sources

    fn source(&self, index: usize) -> Result<&Source> {
        self.sources.get(index).ok_or_else(|| {
            SonaraError::invalid(format!(
                "source {} out of range (max {})",
                index,
                self.sources.len()
            ))
        })
    }

    fn source_mut(&mut self, index: usize) -> Result<&mut Source> {
        let count = self.sources.len();
        self.sources.get_mut(index).ok_or_else(|| {
            SonaraError::invalid(format!("source {} out of range (max {})", index, count))
        })
    }

    fn source_params(&self, index: usize) -> Result<&SourceParams> {
        Ok(&self.source(index)?.params)
    }

    fn source_params_mut(&mut self, index: usize) -> Result<&mut SourceParams> {
        Ok(&mut self.source_mut(index)?.params)
    }

    /// Restores a source's parameters to their defaults and clears its DSP state.
    pub fn reset_source(&mut self, index: usize) -> Result<()> {
        let source = self.source_mut(index)?;
        source.params = SourceParams::default();
        source.state.reset();
        log::debug!("Source {} reset", index);
        Ok(())
    }

    pub fn set_source_position(&mut self, index: usize, position: Vec3) -> Result<()> {
        self.source_params_mut(index)?.set_position(position)
    }

    pub fn source_position(&self, index: usize) -> Result<Vec3> {
        Ok(self.source_params(index)?.position)
    }

    /// Sets the attenuation range in metres.
    pub fn set_source_range(&mut self, index: usize, min: f32, max: f32) -> Result<()> {
        self.source_params_mut(index)?.set_range(min, max)
    }

    pub fn source_range(&self, index: usize) -> Result<(f32, f32)> {
        let params = self.source_params(index)?;
        Ok((params.range_min, params.range_max))
    }

    pub fn set_source_radius(&mut self, index: usize, radius: f32) -> Result<()> {
        self.source_params_mut(index)?.set_radius(radius)
    }

    pub fn source_radius(&self, index: usize) -> Result<f32> {
        Ok(self.source_params(index)?.radius)
    }

    pub fn set_source_reverb_send(&mut self, index: usize, level: f32) -> Result<()> {
        self.source_params_mut(index)?.set_reverb_send(level)
    }

    pub fn source_reverb_send(&self, index: usize) -> Result<f32> {
        Ok(self.source_params(index)?.reverb_send)
    }

    pub fn set_source_attenuation_mode(
        &mut self,
        index: usize,
        mode: AttenuationMode,
        source_gain: f32,
    ) -> Result<()> {
        self.source_params_mut(index)?
            .set_attenuation(mode, source_gain)
    }

    pub fn source_attenuation_mode(&self, index: usize) -> Result<(AttenuationMode, f32)> {
        let params = self.source_params(index)?;
        Ok((params.attenuation, params.source_gain))
    }

    pub fn set_source_flags(&mut self, index: usize, flags: SourceFlags) -> Result<()> {
        self.source_params_mut(index)?.flags = flags;
        Ok(())
    }

    pub fn source_flags(&self, index: usize) -> Result<SourceFlags> {
        Ok(self.source_params(index)?.flags)
    }

    /// Gain applied to the direct path at the source's current distance.
    pub fn source_overall_gain(&self, index: usize) -> Result<f32> {
        let params = self.source_params(index)?;
        let distance = self.listener.point_to_local(params.position).length() * self.unit_scale;
        Ok(params.overall_gain(distance))
    }

    /// Spatializes one buffer of mono input into separate left and right buffers.
    ///
    /// All three buffers must hold exactly `buffer_length` samples. The
    /// outputs are overwritten.
    pub fn spatialize_mono_lr(
        &mut self,
        index: usize,
        input: &[f32],
        left: &mut [f32],
        right: &mut [f32],
    ) -> Result<SpatializationStatus> {
        let length = self.desc.buffer_length;
        if input.len() != length || left.len() != length || right.len() != length {
            return Err(SonaraError::invalid(format!(
                "spatialize buffers must hold {} samples (got {}, {}, {})",
                length,
                input.len(),
                left.len(),
                right.len()
            )));
        }
        self.render_source(index, input, left, right)
    }

    /// Spatializes one buffer of mono input into an interleaved stereo buffer
    /// of `2 * buffer_length` samples.
    pub fn spatialize_mono_interleaved(
        &mut self,
        index: usize,
        input: &[f32],
        output: &mut [f32],
    ) -> Result<SpatializationStatus> {
        let length = self.desc.buffer_length;
        if input.len() != length || output.len() != 2 * length {
            return Err(SonaraError::invalid(format!(
                "interleaved spatialize needs {} input and {} output samples (got {}, {})",
                length,
                2 * length,
                input.len(),
                output.len()
            )));
        }
        let [mut left, mut right] = std::mem::take(&mut self.scratch);
        let status = self.render_source(index, input, &mut left, &mut right);
        if status.is_ok() {
            for ((frame, l), r) in output.chunks_exact_mut(2).zip(&left).zip(&right) {
                frame[0] = *l;
                frame[1] = *r;
            }
        }
        self.scratch = [left, right];
        status
    }

    fn render_source(
        &mut self,
        index: usize,
        input: &[f32],
        left: &mut [f32],
        right: &mut [f32],
    ) -> Result<SpatializationStatus> {
        self.source(index)?;
        if !self.frame_open || self.sources[index].in_frame {
            self.begin_frame()?;
        }

        let start = Instant::now();
        let room = self.room_modeling.then(|| self.active_room());
        let reverb_bus = (self.room_modeling && self.late_reverb).then_some(&mut self.reverb_bus[..]);
        let frame = RenderFrame {
            listener: &self.listener,
            hrtf: &self.hrtf,
            interpolation: self.interpolation,
            unit_scale: self.unit_scale,
            room: room.as_ref(),
            reverb_bus,
        };
        let source = &mut self.sources[index];
        source.in_frame = true;
        let status = source.state.render(&source.params, frame, input, left, right);
        self.counters
            .record(PerformanceCounter::Spatialization, start.elapsed());
        Ok(status)
    }

    /// Starts a new frame: clears the reverb bus and refreshes the room.
    fn begin_frame(&mut self) -> Result<()> {
        for source in &mut self.sources {
            source.in_frame = false;
        }
        self.reverb_bus.fill(0.0);
        self.frame_open = true;
        if self.room_modeling {
            self.update_room()?;
        }
        Ok(())
    }

    // Shared reverb

    /// Adds the frame's late reverb to separate left and right buffers.
    ///
    /// Call once per frame after every source was spatialized. Returns
    /// [`SpatializationStatus::Working`] while the reverb tail is still
    /// audible.
    ///
    /// # Errors
    ///
    /// [`SonaraError::SharedReverbDisabled`] unless both room modeling and late
    /// reverberation are enabled; the buffers are left untouched.
    pub fn mix_in_shared_reverb_lr(
        &mut self,
        left: &mut [f32],
        right: &mut [f32],
    ) -> Result<SpatializationStatus> {
        let length = self.desc.buffer_length;
        if left.len() != length || right.len() != length {
            return Err(SonaraError::invalid(format!(
                "reverb buffers must hold {} samples (got {}, {})",
                length,
                left.len(),
                right.len()
            )));
        }
        self.close_frame()?;
        self.run_reverb(left, right);
        Ok(self.reverb_status())
    }

    /// Adds the frame's late reverb to an interleaved stereo buffer.
    pub fn mix_in_shared_reverb_interleaved(
        &mut self,
        output: &mut [f32],
    ) -> Result<SpatializationStatus> {
        let length = self.desc.buffer_length;
        if output.len() != 2 * length {
            return Err(SonaraError::invalid(format!(
                "interleaved reverb buffer must hold {} samples (got {})",
                2 * length,
                output.len()
            )));
        }
        self.close_frame()?;
        let [mut left, mut right] = std::mem::take(&mut self.scratch);
        left.fill(0.0);
        right.fill(0.0);
        self.run_reverb(&mut left, &mut right);
        for ((frame, l), r) in output.chunks_exact_mut(2).zip(&left).zip(&right) {
            frame[0] += *l;
            frame[1] += *r;
        }
        self.scratch = [left, right];
        Ok(self.reverb_status())
    }

    fn close_frame(&mut self) -> Result<()> {
        if !(self.room_modeling && self.late_reverb) {
            return Err(SonaraError::SharedReverbDisabled);
        }
        let had_frame = std::mem::replace(&mut self.frame_open, false);
        if !had_frame {
            self.update_room()?;
        }
        Ok(())
    }

    fn run_reverb(&mut self, left: &mut [f32], right: &mut [f32]) {
        let start = Instant::now();
        let rt60 = self.active_room_metric().rt60();
        if (rt60 - self.reverb.rt60()).abs() > 1e-3 {
            self.reverb.configure(rt60, REVERB_DAMPING);
        }
        self.reverb.process(&self.reverb_bus, left, right);
        self.reverb_bus.fill(0.0);
        self.counters
            .record(PerformanceCounter::SharedReverb, start.elapsed());
    }

    fn reverb_status(&self) -> SpatializationStatus {
        if self.reverb.is_ringing() {
            SpatializationStatus::Working
        } else {
            SpatializationStatus::Finished
        }
    }

    /// Sets the linear gain of the shared reverb output (default 1.0).
    pub fn set_shared_reverb_wet_level(&mut self, level: f32) -> Result<()> {
        self.reverb.set_wet_level(level)
    }

    pub fn shared_reverb_wet_level(&self) -> f32 {
        self.reverb.wet_level()
    }

    // Room modeling

    /// Sets the static shoebox. Reflections are clamped to `[0, 0.97]`.
    pub fn set_simple_box_room_parameters(&mut self, params: &BoxRoomParameters) -> Result<()> {
        self.box_room = params.sanitized()?;
        log::debug!("Shoebox room set to {:?}", self.box_room);
        Ok(())
    }

    pub fn simple_box_room_parameters(&self) -> BoxRoomParameters {
        self.box_room
    }

    pub fn set_reflection_model(&mut self, model: ReflectionModel) {
        if model != self.reflection_model {
            log::debug!("Reflection model set to {:?}", model);
            self.reflection_model = model;
            self.estimator_dirty = true;
        }
    }

    pub fn reflection_model(&self) -> ReflectionModel {
        self.reflection_model
    }

    /// The model in effect once `Automatic` is resolved.
    pub fn resolved_reflection_model(&self) -> ReflectionModel {
        self.reflection_model
            .resolve(self.geometries.face_count() > 0, self.ray_caster.is_some())
    }

    /// Installs (or with `None` removes) the ray caster used by dynamic room modeling.
    ///
    /// The caster is called from the estimator thread on its own schedule.
    pub fn assign_raycast_callback(&mut self, caster: Option<Arc<dyn RayCaster>>) {
        log::debug!(
            "Raycast callback {}",
            if caster.is_some() { "assigned" } else { "removed" }
        );
        self.ray_caster = caster;
        self.estimator_dirty = true;
    }

    pub fn set_dynamic_room_settings(&mut self, settings: DynamicRoomSettings) -> Result<()> {
        settings.validate()?;
        self.dynamic_settings = settings;
        self.estimator_dirty = true;
        Ok(())
    }

    pub fn dynamic_room_settings(&self) -> DynamicRoomSettings {
        self.dynamic_settings
    }

    fn update_dynamic_settings(&mut self, f: impl FnOnce(&mut DynamicRoomSettings)) -> Result<()> {
        let mut settings = self.dynamic_settings;
        f(&mut settings);
        self.set_dynamic_room_settings(settings)
    }

    pub fn set_dynamic_room_rays_per_second(&mut self, rays: u32) -> Result<()> {
        self.update_dynamic_settings(|s| s.rays_per_second = rays)
    }

    pub fn set_dynamic_room_interp_speed(&mut self, speed: f32) -> Result<()> {
        self.update_dynamic_settings(|s| s.interp_speed = speed)
    }

    pub fn set_dynamic_room_max_wall_distance(&mut self, distance: f32) -> Result<()> {
        self.update_dynamic_settings(|s| s.max_wall_distance = distance)
    }

    pub fn set_dynamic_room_ray_cache_size(&mut self, size: usize) -> Result<()> {
        self.update_dynamic_settings(|s| s.ray_cache_size = size)
    }

    /// The room box currently used for rendering, with dimensions in metres.
    ///
    /// Before the estimator has produced anything this is the static shoebox
    /// centred on the listener.
    pub fn room_dimensions(&self) -> RoomEstimate {
        self.active_room_metric()
    }

    /// Up to `max` of the most recent ray hits, newest last.
    pub fn raycast_hits(&self, max: usize) -> Result<Vec<RayHit>> {
        match &self.estimator {
            Some(estimator) => estimator.recent_hits(max),
            None => Ok(Vec::new()),
        }
    }

    /// Active room in world units.
    fn active_room(&self) -> RoomEstimate {
        match self.room.current {
            Some(room) => room,
            None => self.shoebox_room(),
        }
    }

    fn active_room_metric(&self) -> RoomEstimate {
        let mut room = self.active_room();
        room.dimensions = room.dimensions.map(|d| d * self.unit_scale);
        room
    }

    fn shoebox_room(&self) -> RoomEstimate {
        let mut room = RoomEstimate::from_shoebox(&self.box_room, self.listener.position);
        room.dimensions = room.dimensions.map(|d| d / self.unit_scale);
        room
    }

    /// Brings the estimator in line with the resolved model and smooths the
    /// current room toward the newest estimate.
    fn update_room(&mut self) -> Result<()> {
        if self.scene_dirty {
            self.rebuild_scene();
        }
        if self.estimator_dirty {
            self.sync_estimator()?;
        }

        match self.room.model {
            Some(ReflectionModel::DynamicRoomModeling | ReflectionModel::PropagationSystem) => {
                if let Some(newest) = self.estimator.as_ref().and_then(RoomEstimator::poll) {
                    self.room.target = Some(newest);
                }
                if let Some(target) = self.room.target {
                    let current = self.room.current.get_or_insert(target);
                    current.smooth_toward(&target, self.dynamic_settings.interp_speed);
                }
            }
            _ => self.room.current = None,
        }
        Ok(())
    }

    fn sync_estimator(&mut self) -> Result<()> {
        self.estimator_dirty = false;
        let model = self.resolved_reflection_model();
        let (caster, budget): (Option<Arc<dyn RayCaster>>, RayBudget) = match model {
            ReflectionModel::DynamicRoomModeling => (
                self.ray_caster.clone(),
                RayBudget::PerSecond(self.dynamic_settings.rays_per_second),
            ),
            ReflectionModel::PropagationSystem => {
                let scene: Arc<dyn RayCaster> = self.scene.clone();
                (
                    Some(scene),
                    RayBudget::PerEstimate {
                        rays: self.propagation.rays_per_estimate(),
                        workers: self.propagation.worker_count(),
                    },
                )
            }
            _ => (None, RayBudget::PerSecond(self.dynamic_settings.rays_per_second)),
        };

        if self.room.model != Some(model) {
            log::debug!("Room model resolved to {:?}", model);
            self.room.target = None;
            self.room.current = None;
        }
        self.room.model = Some(model);

        let mut settings = self.dynamic_settings;
        settings.max_wall_distance /= self.unit_scale;

        match &self.estimator {
            Some(estimator) => {
                estimator.send(EstimatorCommand::SetSettings(settings));
                estimator.send(EstimatorCommand::SetBudget(budget));
                estimator.send(EstimatorCommand::SetListener(self.listener.position));
                estimator.send(EstimatorCommand::SetCaster(caster));
            }
            None if caster.is_some() => {
                let estimator = RoomEstimator::spawn(settings, self.listener.position, budget)?;
                estimator.send(EstimatorCommand::SetCaster(caster));
                self.estimator = Some(estimator);
            }
            None => {}
        }
        Ok(())
    }

    // Geometry and materials

    fn rebuild_scene(&mut self) {
        self.scene_dirty = false;
        self.scene = Arc::new(PropagationScene::build(&self.geometries, &self.materials));
        self.estimator_dirty = true;
        log::debug!(
            "Propagation scene rebuilt: {} triangles",
            self.scene.triangle_count()
        );
    }

    fn mark_scene_dirty(&mut self) {
        self.scene_dirty = true;
        self.estimator_dirty = true;
    }

    pub fn create_geometry(&mut self) -> Result<GeometryId> {
        require_propagation()?;
        let id = self.geometries.add(AudioGeometry::new());
        log::debug!("Geometry {} created", id);
        Ok(id)
    }

    /// Destroys a geometry. Ray casts already in flight keep their own snapshot.
    pub fn destroy_geometry(&mut self, id: GeometryId) -> Result<()> {
        require_propagation()?;
        self.geometries.remove(id)?;
        self.mark_scene_dirty();
        log::debug!("Geometry {} destroyed", id);
        Ok(())
    }

    /// Uploads a mesh from typed, strided buffers.
    pub fn upload_mesh(&mut self, id: GeometryId, desc: &MeshDesc<'_>) -> Result<()> {
        require_propagation()?;
        let mesh = Mesh::decode(desc)?;
        self.install_mesh(id, mesh)
    }

    /// Uploads a mesh from packed `f32` positions and `u32` indices.
    pub fn upload_mesh_arrays(
        &mut self,
        id: GeometryId,
        vertices: &[f32],
        indices: &[u32],
        groups: &[MeshGroup],
    ) -> Result<()> {
        require_propagation()?;
        if vertices.len() % 3 != 0 {
            return Err(SonaraError::invalid(format!(
                "{} vertex floats is not a multiple of 3",
                vertices.len()
            )));
        }
        let positions = vertices
            .chunks_exact(3)
            .map(|v| Vec3::new(v[0], v[1], v[2]))
            .collect();
        let mesh = Mesh::from_parts(positions, indices.to_vec(), groups.to_vec())?;
        self.install_mesh(id, mesh)
    }

    fn install_mesh(&mut self, id: GeometryId, mesh: Mesh) -> Result<()> {
        let (vertices, faces) = (mesh.vertices().len(), mesh.face_count());
        self.geometries.get_mut(id)?.upload(mesh, &self.materials)?;
        self.mark_scene_dirty();
        log::info!(
            "Mesh uploaded to geometry {}: {} vertices, {} faces",
            id,
            vertices,
            faces
        );
        Ok(())
    }

    /// Sets the column-major object-to-world transform of a geometry.
    pub fn set_geometry_transform(&mut self, id: GeometryId, matrix: &[f32; 16]) -> Result<()> {
        require_propagation()?;
        self.geometries.get_mut(id)?.set_transform(matrix)?;
        self.mark_scene_dirty();
        Ok(())
    }

    pub fn geometry_transform(&self, id: GeometryId) -> Result<[f32; 16]> {
        require_propagation()?;
        Ok(self.geometries.get(id)?.transform())
    }

    pub fn geometry(&self, id: GeometryId) -> Result<&AudioGeometry> {
        require_propagation()?;
        self.geometries.get(id)
    }

    /// Writes a geometry and the materials it references to `serializer`.
    pub fn write_geometry(&self, id: GeometryId, serializer: &mut dyn Serializer) -> Result<()> {
        require_propagation()?;
        write_geometry(serializer, self.geometries.get(id)?, &self.materials)
    }

    /// Replaces a geometry with one read from `serializer`.
    ///
    /// The stream's materials are created fresh in this context.
    pub fn read_geometry(&mut self, id: GeometryId, serializer: &mut dyn Serializer) -> Result<()> {
        require_propagation()?;
        self.geometries.get(id)?;
        let geometry = read_geometry(serializer, &mut self.materials)?;
        let faces = geometry.face_count();
        *self.geometries.get_mut(id)? = geometry;
        self.mark_scene_dirty();
        log::info!("Geometry {} read back: {} faces", id, faces);
        Ok(())
    }

    pub fn write_geometry_to_file(&self, id: GeometryId, path: impl AsRef<Path>) -> Result<()> {
        require_propagation()?;
        let path = path.as_ref();
        let file = std::fs::File::create(path).map_err(|e| {
            SonaraError::invalid(format!("cannot create {}: {}", path.display(), e))
        })?;
        self.write_geometry(id, &mut IoSerializer::new(file))
    }

    pub fn read_geometry_from_file(&mut self, id: GeometryId, path: impl AsRef<Path>) -> Result<()> {
        require_propagation()?;
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .map_err(|e| SonaraError::invalid(format!("cannot open {}: {}", path.display(), e)))?;
        self.read_geometry(id, &mut IoSerializer::new(file))
    }

    pub fn create_material(&mut self) -> Result<MaterialId> {
        require_propagation()?;
        let id = self.materials.add(AudioMaterial::new());
        log::debug!("Material {} created", id);
        Ok(id)
    }

    /// Creates a material whose absorption follows a named preset.
    pub fn create_material_from_preset(&mut self, preset: MaterialPreset) -> Result<MaterialId> {
        require_propagation()?;
        let id = self.materials.add(preset.to_material());
        log::debug!("Material {} created from {:?}", id, preset);
        Ok(id)
    }

    /// Destroys a material. Groups still using it fall back to the default material.
    pub fn destroy_material(&mut self, id: MaterialId) -> Result<()> {
        require_propagation()?;
        self.materials.remove(id)?;
        self.mark_scene_dirty();
        log::debug!("Material {} destroyed", id);
        Ok(())
    }

    pub fn material_set_frequency(
        &mut self,
        id: MaterialId,
        property: MaterialProperty,
        frequency: f32,
        value: f32,
    ) -> Result<()> {
        require_propagation()?;
        self.materials
            .get_mut(id)?
            .set_frequency(property, frequency, value)?;
        self.mark_scene_dirty();
        Ok(())
    }

    pub fn material_get_frequency(
        &self,
        id: MaterialId,
        property: MaterialProperty,
        frequency: f32,
    ) -> Result<f32> {
        require_propagation()?;
        self.materials.get(id)?.get_frequency(property, frequency)
    }

    pub fn material_reset(&mut self, id: MaterialId, property: MaterialProperty) -> Result<()> {
        require_propagation()?;
        self.materials.get_mut(id)?.reset(property);
        self.mark_scene_dirty();
        Ok(())
    }

    pub fn material(&self, id: MaterialId) -> Result<&AudioMaterial> {
        require_propagation()?;
        self.materials.get(id)
    }

    pub fn material_count(&self) -> usize {
        self.materials.len()
    }

    /// Sets the propagation quality in `[0, 1]`; higher casts more rays per estimate.
    pub fn set_propagation_quality(&mut self, quality: f32) -> Result<()> {
        require_propagation()?;
        if !(0.0..=1.0).contains(&quality) {
            return Err(SonaraError::invalid(format!(
                "propagation quality {} outside 0..=1",
                quality
            )));
        }
        self.propagation.quality = quality;
        self.estimator_dirty = true;
        Ok(())
    }

    /// Restricts propagation to the cores in `mask`; the number of set bits
    /// is the number of worker threads. 0 means a single worker on any core.
    pub fn set_propagation_thread_affinity(&mut self, mask: u64) -> Result<()> {
        require_propagation()?;
        self.propagation.thread_affinity = mask;
        self.estimator_dirty = true;
        Ok(())
    }

    pub fn propagation_settings(&self) -> PropagationSettings {
        self.propagation
    }

    // Ambisonics

    /// Creates a decoder for pre-encoded ambisonic content.
    ///
    /// # Errors
    ///
    /// [`SonaraError::NoAvailableAmbisonicInstance`] once
    /// [`MAX_AMBISONIC_STREAMS`](crate::ambisonic::MAX_AMBISONIC_STREAMS) are alive.
    pub fn create_ambisonic_stream(
        &self,
        sample_rate: u32,
        buffer_length: usize,
        format: AmbisonicFormat,
        order: usize,
    ) -> Result<AmbisonicStream> {
        let slot = StreamSlot::acquire(&self.ambisonic_slots)?;
        let stream = AmbisonicStream::new(sample_rate, buffer_length, format, order, slot)?;
        log::debug!(
            "Ambisonic stream created: {:?} order {} at {} Hz",
            format,
            order,
            sample_rate
        );
        Ok(stream)
    }

    /// Decodes `frames` interleaved ambisonic frames into interleaved stereo,
    /// relative to the current listener.
    pub fn process_ambisonic_stream(
        &self,
        stream: &mut AmbisonicStream,
        src: &[f32],
        dst: &mut [f32],
        frames: usize,
    ) -> Result<()> {
        stream.process(&self.listener, self.hrtf.head_radius(), src, dst, frames)
    }

    // Counters

    pub fn performance_counter(&self, counter: PerformanceCounter) -> CounterSample {
        self.counters.get(counter)
    }

    pub fn reset_performance_counter(&mut self, counter: PerformanceCounter) {
        self.counters.reset(counter);
    }

    /// Turns counter recording on or off (on by default).
    pub fn set_profiler_enabled(&mut self, enabled: bool) {
        self.counters.set_enabled(enabled);
        log::debug!("Profiler {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn is_profiler_enabled(&self) -> bool {
        self.counters.is_enabled()
    }
}

impl Drop for SonaraContext {
    fn drop(&mut self) {
        if let Some(mut estimator) = self.estimator.take() {
            estimator.stop();
        }
        log::info!("Sonara context destroyed");
    }
}

fn source_history(desc: &SonaraContextDesc) -> usize {
    (desc.sample_rate as f32 * MAX_SOURCE_DELAY_SECONDS) as usize + desc.buffer_length
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::reverb::MIN_RT60;

    fn context() -> SonaraContext {
        SonaraContext::new(SonaraContextDesc::new().max_sources(2).buffer_length(256)).unwrap()
    }

    fn impulse(len: usize) -> Vec<f32> {
        let mut v = vec![0.0; len];
        v[0] = 1.0;
        v
    }

    struct Floor;

    impl RayCaster for Floor {
        fn cast_ray(&self, origin: Vec3, direction: Vec3) -> Option<RayHit> {
            if direction.y >= -0.1 {
                return None;
            }
            let t = (origin.y + 1.0) / -direction.y;
            Some(RayHit::new(origin + direction * t, Vec3::Y, [0.8; 4]))
        }
    }

    #[test]
    fn test_defaults() {
        let ctx = context();
        assert!(!ctx.is_enabled(EnableFlag::SimpleRoomModeling));
        assert!(!ctx.is_enabled(EnableFlag::LateReverberation));
        assert!(ctx.is_enabled(EnableFlag::RandomizeReverb));
        assert_eq!(ctx.unit_scale(), 1.0);
        assert_eq!(ctx.hrtf_interpolation(), HrtfInterpolation::PhaseLerp);
        assert_eq!(ctx.head_radius(), DEFAULT_HEAD_RADIUS);
        assert_eq!(ctx.shared_reverb_wet_level(), 1.0);
        assert_eq!(ctx.reflection_model(), ReflectionModel::Automatic);
        assert_eq!(ctx.source_range(1).unwrap(), (0.25, 250.0));
    }

    #[test]
    fn test_bad_creation() {
        assert!(matches!(
            SonaraContext::new(SonaraContextDesc::new().sample_rate(96_000)),
            Err(SonaraError::BadSampleRate(96_000))
        ));
        assert!(matches!(
            SonaraContext::new(SonaraContextDesc::new().max_sources(0)),
            Err(SonaraError::InvalidParam(_))
        ));
    }

    #[test]
    fn test_source_index_checked() {
        let mut ctx = context();
        assert!(ctx.set_source_position(2, Vec3::X).is_err());
        assert!(ctx.source_radius(5).is_err());
        let input = vec![0.0; 256];
        let (mut l, mut r) = (vec![0.0; 256], vec![0.0; 256]);
        assert!(matches!(
            ctx.spatialize_mono_lr(2, &input, &mut l, &mut r),
            Err(SonaraError::InvalidParam(_))
        ));
    }

    #[test]
    fn test_buffer_lengths_checked() {
        let mut ctx = context();
        let mut out = vec![0.0; 256];
        assert!(ctx.spatialize_mono_interleaved(0, &[0.0; 256], &mut out).is_err());
        let (mut l, mut r) = (vec![0.0; 255], vec![0.0; 256]);
        assert!(ctx.spatialize_mono_lr(0, &[0.0; 256], &mut l, &mut r).is_err());
    }

    #[test]
    fn test_interleaved_matches_lr() {
        let mut a = context();
        let mut b = context();
        for ctx in [&mut a, &mut b] {
            ctx.set_source_position(0, Vec3::new(2.0, 0.0, -1.0)).unwrap();
        }
        let input = impulse(256);
        let (mut l, mut r) = (vec![0.0; 256], vec![0.0; 256]);
        a.spatialize_mono_lr(0, &input, &mut l, &mut r).unwrap();
        let mut inter = vec![0.0; 512];
        b.spatialize_mono_interleaved(0, &input, &mut inter).unwrap();
        for i in 0..256 {
            assert_eq!(inter[2 * i], l[i]);
            assert_eq!(inter[2 * i + 1], r[i]);
        }
    }

    #[test]
    fn test_overall_gain_uses_unit_scale() {
        let mut ctx = context();
        ctx.set_source_position(0, Vec3::new(0.0, 0.0, -10.0)).unwrap();
        let far = ctx.source_overall_gain(0).unwrap();
        ctx.set_unit_scale(0.01).unwrap();
        let near = ctx.source_overall_gain(0).unwrap();
        assert_eq!(near, 1.0);
        assert!(far < near);
        assert!(ctx.set_unit_scale(0.0).is_err());
    }

    #[test]
    fn test_reset_source() {
        let mut ctx = context();
        ctx.set_source_position(1, Vec3::Y).unwrap();
        ctx.set_source_flags(1, SourceFlags::from_bits(0x80).unwrap()).unwrap();
        ctx.reset_source(1).unwrap();
        assert_eq!(ctx.source_position(1).unwrap(), Vec3::ZERO);
        assert_eq!(ctx.source_flags(1).unwrap(), SourceFlags::default());
    }

    #[test]
    fn test_shared_reverb_disabled() {
        let mut ctx = context();
        let (mut l, mut r) = (vec![0.5; 256], vec![0.5; 256]);
        assert!(matches!(
            ctx.mix_in_shared_reverb_lr(&mut l, &mut r),
            Err(SonaraError::SharedReverbDisabled)
        ));
        assert!(l.iter().all(|s| *s == 0.5));

        ctx.set_enabled(EnableFlag::LateReverberation, true);
        assert!(matches!(
            ctx.mix_in_shared_reverb_lr(&mut l, &mut r),
            Err(SonaraError::SharedReverbDisabled)
        ));
    }

    #[test]
    fn test_disabled_reverb_mix_leaves_frame_open() {
        let mut ctx = context();
        let input = impulse(256);
        let (mut l, mut r) = (vec![0.0; 256], vec![0.0; 256]);
        ctx.spatialize_mono_lr(0, &input, &mut l, &mut r).unwrap();
        assert!(ctx.frame_open);

        assert!(matches!(
            ctx.mix_in_shared_reverb_lr(&mut l, &mut r),
            Err(SonaraError::SharedReverbDisabled)
        ));
        assert!(ctx.frame_open);
        assert!(ctx.sources[0].in_frame);
    }

    #[test]
    fn test_profiler_toggle_gates_counters() {
        let mut ctx = context();
        let input = impulse(256);
        let (mut l, mut r) = (vec![0.0; 256], vec![0.0; 256]);

        ctx.set_profiler_enabled(false);
        assert!(!ctx.is_profiler_enabled());
        ctx.spatialize_mono_lr(0, &input, &mut l, &mut r).unwrap();
        assert_eq!(ctx.performance_counter(PerformanceCounter::Spatialization).count, 0);

        ctx.set_profiler_enabled(true);
        ctx.spatialize_mono_lr(1, &input, &mut l, &mut r).unwrap();
        assert_eq!(ctx.performance_counter(PerformanceCounter::Spatialization).count, 1);
    }

    #[test]
    fn test_shared_reverb_adds_tail() {
        let mut ctx = context();
        ctx.set_enabled(EnableFlag::SimpleRoomModeling, true);
        ctx.set_enabled(EnableFlag::LateReverberation, true);
        ctx.set_source_reverb_send(0, 1.0).unwrap();
        ctx.set_source_position(0, Vec3::new(0.0, 0.0, -1.0)).unwrap();
        ctx.set_simple_box_room_parameters(&BoxRoomParameters {
            reflections: [0.9; 6],
            ..Default::default()
        })
        .unwrap();

        let (mut l, mut r) = (vec![0.0; 256], vec![0.0; 256]);
        ctx.spatialize_mono_lr(0, &impulse(256), &mut l, &mut r).unwrap();
        let mut tail = vec![0.0; 512];
        let mut status = ctx.mix_in_shared_reverb_interleaved(&mut tail).unwrap();
        assert_eq!(status, SpatializationStatus::Working);

        // Later frames without input keep ringing for a while.
        let mut energy = 0.0;
        for _ in 0..20 {
            tail.fill(0.0);
            status = ctx.mix_in_shared_reverb_interleaved(&mut tail).unwrap();
            energy += tail.iter().map(|s| s * s).sum::<f32>();
        }
        assert!(energy > 0.0);
        assert_eq!(status, SpatializationStatus::Working);
        assert!(ctx.performance_counter(PerformanceCounter::SharedReverb).count >= 21);
        assert!(ctx.reverb.rt60() >= MIN_RT60);
    }

    #[test]
    fn test_room_dimensions_follow_unit_scale() {
        let mut ctx = context();
        let params = BoxRoomParameters {
            reflections: [1.5, 0.5, 0.5, 0.5, 0.5, 0.5],
            dimensions: [10.0, 4.0, 6.0],
        };
        ctx.set_simple_box_room_parameters(&params).unwrap();
        assert_eq!(ctx.simple_box_room_parameters().reflections[0], 0.97);
        ctx.set_unit_scale(0.5).unwrap();
        let room = ctx.room_dimensions();
        for (a, b) in room.dimensions.iter().zip(params.dimensions) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_automatic_model_resolution() {
        let mut ctx = context();
        assert_eq!(ctx.resolved_reflection_model(), ReflectionModel::StaticShoeBox);
        ctx.assign_raycast_callback(Some(Arc::new(Floor)));
        assert_eq!(ctx.resolved_reflection_model(), ReflectionModel::DynamicRoomModeling);

        if cfg!(feature = "propagation") {
            let g = ctx.create_geometry().unwrap();
            let group = MeshGroup {
                index_offset: 0,
                face_count: 1,
                face_type: crate::scene::FaceType::Triangles,
                material: None,
            };
            ctx.upload_mesh_arrays(g, &[0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0], &[0, 1, 2], &[group])
                .unwrap();
            assert_eq!(ctx.resolved_reflection_model(), ReflectionModel::PropagationSystem);
        }

        ctx.set_reflection_model(ReflectionModel::StaticShoeBox);
        assert_eq!(ctx.resolved_reflection_model(), ReflectionModel::StaticShoeBox);
    }

    #[test]
    fn test_dynamic_room_starts_estimator() {
        let mut ctx = context();
        ctx.set_enabled(EnableFlag::SimpleRoomModeling, true);
        ctx.set_reflection_model(ReflectionModel::DynamicRoomModeling);
        ctx.set_dynamic_room_interp_speed(1.0).unwrap();
        ctx.set_dynamic_room_rays_per_second(20_000).unwrap();
        ctx.assign_raycast_callback(Some(Arc::new(Floor)));

        let input = vec![0.0; 256];
        let (mut l, mut r) = (vec![0.0; 256], vec![0.0; 256]);
        ctx.spatialize_mono_lr(0, &input, &mut l, &mut r).unwrap();
        assert!(ctx.estimator.is_some());

        let deadline = Instant::now() + std::time::Duration::from_secs(5);
        while ctx.raycast_hits(16).unwrap().is_empty() && Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        let hits = ctx.raycast_hits(16).unwrap();
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|h| (h.point.y + 1.0).abs() < 1e-4));
    }

    #[test]
    fn test_dynamic_settings_validated() {
        let mut ctx = context();
        assert!(ctx.set_dynamic_room_interp_speed(2.0).is_err());
        assert_eq!(ctx.dynamic_room_settings(), DynamicRoomSettings::default());
        ctx.set_dynamic_room_rays_per_second(64).unwrap();
        assert_eq!(ctx.dynamic_room_settings().rays_per_second, 64);
    }

    #[test]
    fn test_reinitialize_keeps_params() {
        let mut ctx = context();
        ctx.set_source_position(0, Vec3::X).unwrap();
        ctx.reinitialize(SonaraContextDesc::new().max_sources(4).buffer_length(128).sample_rate(44_100))
            .unwrap();
        assert_eq!(ctx.max_sources(), 4);
        assert_eq!(ctx.source_position(0).unwrap(), Vec3::X);
        assert_eq!(ctx.source_position(3).unwrap(), Vec3::ZERO);
        let (mut l, mut r) = (vec![0.0; 128], vec![0.0; 128]);
        ctx.spatialize_mono_lr(3, &impulse(128), &mut l, &mut r).unwrap();
        assert!(ctx.reinitialize(SonaraContextDesc::new().sample_rate(1)).is_err());
        assert_eq!(ctx.buffer_length(), 128);
    }

    #[test]
    fn test_ambisonic_slots_shared_with_context() {
        let ctx = context();
        let streams: Vec<_> = (0..crate::ambisonic::MAX_AMBISONIC_STREAMS)
            .map(|_| ctx.create_ambisonic_stream(48_000, 256, AmbisonicFormat::AmbiX, 1).unwrap())
            .collect();
        assert!(matches!(
            ctx.create_ambisonic_stream(48_000, 256, AmbisonicFormat::AmbiX, 1),
            Err(SonaraError::NoAvailableAmbisonicInstance(_))
        ));
        drop(streams);
        assert!(ctx.create_ambisonic_stream(48_000, 256, AmbisonicFormat::FuMa, 2).is_ok());
    }

    #[test]
    fn test_version() {
        let v = version();
        assert_eq!(format!("{}.{}.{}", v.major, v.minor, v.patch), v.string);
    }
}
