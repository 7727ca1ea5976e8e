// C-ABI function table over the Rust API.
//
// Conventions:
// - Every function returns an `i32` result code (0 on success, 2000..=2099 on
//   failure) unless it has nothing that can fail
// - Values are returned through caller-owned out pointers
// - A null context pointer returns `Uninitialized`; other null pointers
//   return `InvalidParam`
// - Panics never cross the boundary; they are reported as `Unknown`
// - Geometry and material handles are non-zero integers issued by the
//   matching create call; 0 means "no material" in mesh groups

use std::alloc::{self, Layout};
use std::ffi::{CStr, c_char, c_void};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::ambisonic::{AmbisonicFormat, AmbisonicRenderMode, AmbisonicStream, mono_to_ambisonic};
use crate::config::SonaraContextDesc;
use crate::context::{EnableFlag, SonaraContext, version};
use crate::error::{ErrorCode, Result, SonaraError, result_code};
use crate::math::{ListenerPose, Quat, Vec3};
use crate::profiling::PerformanceCounter;
use crate::room::{BoxRoomParameters, ReflectionModel};
use crate::scene::{
    BAND_COUNT, FaceType, GeometryId, MaterialId, MaterialProperty, MeshDesc, MeshGroup,
    MeshIndices, MeshVertices, RayCaster, RayHit, ScalarType, Serializer, get_reflection_bands,
};
use crate::spatial::{
    AttenuationMode, HrtfInterpolation, QuadBinauralInput, SourceFlags, SpatializationStatus,
    process_quad_binaural,
};

/// Alignment of buffers returned by [`sonara_alloc_samples`].
const SAMPLE_ALIGNMENT: usize = 16;

// ═══════════════════════════════════════════════════════════════════════════
// Value types
// ═══════════════════════════════════════════════════════════════════════════

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SonaraVector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl From<SonaraVector3> for Vec3 {
    fn from(v: SonaraVector3) -> Self {
        Vec3::new(v.x, v.y, v.z)
    }
}

impl From<Vec3> for SonaraVector3 {
    fn from(v: Vec3) -> Self {
        Self {
            x: v.x,
            y: v.y,
            z: v.z,
        }
    }
}

/// Rotation quaternion, `w` last.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SonaraQuaternion {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl From<SonaraQuaternion> for Quat {
    fn from(q: SonaraQuaternion) -> Self {
        Quat::from_xyzw(q.x, q.y, q.z, q.w)
    }
}

/// Rigid pose: orientation, then position.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SonaraPose {
    pub orientation: SonaraQuaternion,
    pub position: SonaraVector3,
}

/// Context configuration. `size` must be `size_of::<SonaraContextConfiguration>()`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SonaraContextConfiguration {
    pub size: u32,
    pub max_num_sources: u32,
    pub sample_rate: u32,
    pub buffer_length: u32,
}

/// Shoebox room. `size` must be `size_of::<SonaraBoxRoomParameters>()`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct SonaraBoxRoomParameters {
    pub size: u32,
    pub reflect_left: f32,
    pub reflect_right: f32,
    pub reflect_up: f32,
    pub reflect_down: f32,
    pub reflect_behind: f32,
    pub reflect_front: f32,
    pub width: f32,
    pub height: f32,
    pub depth: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SonaraMeshVertices {
    pub vertices: *const c_void,
    pub byte_offset: usize,
    pub vertex_count: usize,
    /// 0 means tightly packed
    pub vertex_stride: usize,
    pub vertex_type: i32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SonaraMeshIndices {
    pub indices: *const c_void,
    pub byte_offset: usize,
    pub index_count: usize,
    pub index_type: i32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SonaraMeshGroup {
    /// Offset into the index buffer, in indices
    pub index_offset: usize,
    pub face_count: usize,
    pub face_type: i32,
    /// Material handle, or 0 for the default material
    pub material: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SonaraMesh {
    pub vertices: SonaraMeshVertices,
    pub indices: SonaraMeshIndices,
    pub groups: *const SonaraMeshGroup,
    pub group_count: usize,
}

pub type SonaraReadCallback =
    extern "C" fn(user_data: *mut c_void, bytes: *mut c_void, byte_count: i64) -> i64;
pub type SonaraWriteCallback =
    extern "C" fn(user_data: *mut c_void, bytes: *const c_void, byte_count: i64) -> i64;
pub type SonaraSeekCallback = extern "C" fn(user_data: *mut c_void, offset: i64) -> i64;

/// A caller-implemented byte stream. `seek` may be null.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SonaraSerializer {
    pub read: Option<SonaraReadCallback>,
    pub write: Option<SonaraWriteCallback>,
    pub seek: Option<SonaraSeekCallback>,
    pub user_data: *mut c_void,
}

/// Casts one ray. Returns true and fills `point`, `normal` and the 4
/// reflection bands on a hit.
pub type SonaraRaycastCallback = extern "C" fn(
    origin: SonaraVector3,
    direction: SonaraVector3,
    point: *mut SonaraVector3,
    normal: *mut SonaraVector3,
    reflection_bands: *mut f32,
    user_data: *mut c_void,
) -> bool;

// ═══════════════════════════════════════════════════════════════════════════
// Callback adapters
// ═══════════════════════════════════════════════════════════════════════════

struct CallbackCaster {
    callback: SonaraRaycastCallback,
    user_data: *mut c_void,
}

// SAFETY: the caller guarantees the callback and its user data may be used
// from the estimator thread.
unsafe impl Send for CallbackCaster {}
unsafe impl Sync for CallbackCaster {}

impl RayCaster for CallbackCaster {
    fn cast_ray(&self, origin: Vec3, direction: Vec3) -> Option<RayHit> {
        let mut point = SonaraVector3::default();
        let mut normal = SonaraVector3::default();
        let mut bands = [0.0f32; BAND_COUNT];
        let hit = (self.callback)(
            origin.into(),
            direction.into(),
            &mut point,
            &mut normal,
            bands.as_mut_ptr(),
            self.user_data,
        );
        hit.then(|| RayHit::new(point.into(), normal.into(), bands))
    }
}

struct CallbackSerializer<'a> {
    callbacks: &'a SonaraSerializer,
}

impl Serializer for CallbackSerializer<'_> {
    fn read(&mut self, buf: &mut [u8]) -> usize {
        match self.callbacks.read {
            Some(read) => {
                let n = read(
                    self.callbacks.user_data,
                    buf.as_mut_ptr().cast(),
                    buf.len() as i64,
                );
                n.clamp(0, buf.len() as i64) as usize
            }
            None => 0,
        }
    }

    fn write(&mut self, buf: &[u8]) -> usize {
        match self.callbacks.write {
            Some(write) => {
                let n = write(self.callbacks.user_data, buf.as_ptr().cast(), buf.len() as i64);
                n.clamp(0, buf.len() as i64) as usize
            }
            None => 0,
        }
    }

    fn seek(&mut self, offset: i64) -> i64 {
        match self.callbacks.seek {
            Some(seek) => seek(self.callbacks.user_data, offset),
            None => 0,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════════════════════

/// Runs `f`, converting its result (or a panic) into a result code.
fn guard(name: &str, f: impl FnOnce() -> Result<()>) -> i32 {
    let result = catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|_| {
        Err(SonaraError::Unknown(format!("panic in {}", name)))
    });
    if let Err(e) = &result {
        log::debug!("{} failed: {}", name, e);
    }
    result_code(&result)
}

unsafe fn context_ref<'a>(context: *const SonaraContext) -> Result<&'a SonaraContext> {
    unsafe { context.as_ref() }.ok_or(SonaraError::Uninitialized)
}

unsafe fn context_mut<'a>(context: *mut SonaraContext) -> Result<&'a mut SonaraContext> {
    unsafe { context.as_mut() }.ok_or(SonaraError::Uninitialized)
}

unsafe fn stream_mut<'a>(stream: *mut AmbisonicStream) -> Result<&'a mut AmbisonicStream> {
    unsafe { stream.as_mut() }.ok_or(SonaraError::Uninitialized)
}

fn check_pointer<T>(ptr: *const T) -> Result<()> {
    if ptr.is_null() {
        Err(SonaraError::invalid("null pointer"))
    } else if !ptr.is_aligned() {
        Err(SonaraError::BadAlignment)
    } else {
        Ok(())
    }
}

unsafe fn slice<'a, T>(ptr: *const T, len: usize) -> Result<&'a [T]> {
    if len == 0 {
        return Ok(&[]);
    }
    check_pointer(ptr)?;
    Ok(unsafe { std::slice::from_raw_parts(ptr, len) })
}

unsafe fn slice_mut<'a, T>(ptr: *mut T, len: usize) -> Result<&'a mut [T]> {
    if len == 0 {
        return Ok(&mut []);
    }
    check_pointer(ptr)?;
    Ok(unsafe { std::slice::from_raw_parts_mut(ptr, len) })
}

unsafe fn write_out<T>(ptr: *mut T, value: T) -> Result<()> {
    check_pointer(ptr)?;
    unsafe { ptr.write(value) };
    Ok(())
}

unsafe fn read_in<'a, T>(ptr: *const T) -> Result<&'a T> {
    check_pointer(ptr)?;
    Ok(unsafe { &*ptr })
}

fn flag(value: i32) -> Result<EnableFlag> {
    EnableFlag::from_index(value).ok_or_else(|| SonaraError::invalid(format!("enable flag {}", value)))
}

fn index(value: i32) -> Result<usize> {
    usize::try_from(value).map_err(|_| SonaraError::invalid(format!("source index {}", value)))
}

fn property(value: i32) -> Result<MaterialProperty> {
    MaterialProperty::from_index(value)
        .ok_or_else(|| SonaraError::invalid(format!("material property {}", value)))
}

fn ambisonic_format(value: i32) -> Result<AmbisonicFormat> {
    AmbisonicFormat::from_index(value)
        .ok_or_else(|| SonaraError::invalid(format!("ambisonic format {}", value)))
}

fn status_bits(status: SpatializationStatus) -> u32 {
    status as u32
}

fn desc_from(config: &SonaraContextConfiguration) -> Result<SonaraContextDesc> {
    let expected = std::mem::size_of::<SonaraContextConfiguration>() as u32;
    if config.size != expected {
        return Err(SonaraError::BadVersion {
            expected,
            found: config.size,
        });
    }
    Ok(SonaraContextDesc::new()
        .max_sources(config.max_num_sources as usize)
        .sample_rate(config.sample_rate)
        .buffer_length(config.buffer_length as usize))
}

/// Bytes spanned by `count` elements of `element` bytes at `stride`, after `offset`.
fn span(offset: usize, count: usize, stride: usize, element: usize) -> Result<usize> {
    if count == 0 {
        return Ok(offset);
    }
    (count - 1)
        .checked_mul(stride)
        .and_then(|n| n.checked_add(element))
        .and_then(|n| n.checked_add(offset))
        .ok_or_else(|| SonaraError::invalid("mesh buffer size overflows"))
}

fn material_handle(raw: u64) -> Option<MaterialId> {
    (raw != 0).then(|| MaterialId::from_raw(raw))
}

unsafe fn mesh_groups(groups: *const SonaraMeshGroup, count: usize) -> Result<Vec<MeshGroup>> {
    unsafe { slice(groups, count) }?
        .iter()
        .map(|g| {
            Ok(MeshGroup {
                index_offset: g.index_offset,
                face_count: g.face_count,
                face_type: FaceType::from_index(g.face_type)
                    .ok_or_else(|| SonaraError::invalid(format!("face type {}", g.face_type)))?,
                material: material_handle(g.material),
            })
        })
        .collect()
}

unsafe fn upload(
    context: *mut SonaraContext,
    geometry: u64,
    vertices: &SonaraMeshVertices,
    indices: &SonaraMeshIndices,
    groups: &[MeshGroup],
) -> Result<()> {
    let context = unsafe { context_mut(context) }?;
    let vertex_type = ScalarType::from_index(vertices.vertex_type)
        .ok_or_else(|| SonaraError::invalid(format!("vertex type {}", vertices.vertex_type)))?;
    let index_type = ScalarType::from_index(indices.index_type)
        .ok_or_else(|| SonaraError::invalid(format!("index type {}", indices.index_type)))?;

    let vertex_size = 3 * vertex_type.size();
    let stride = match vertices.vertex_stride {
        0 => vertex_size,
        s if s < vertex_size => {
            return Err(SonaraError::invalid(format!(
                "vertex stride {} shorter than a vertex ({} bytes)",
                s, vertex_size
            )));
        }
        s => s,
    };
    let vertex_bytes = span(vertices.byte_offset, vertices.vertex_count, stride, vertex_size)?;
    let index_size = index_type.size();
    let index_bytes = span(indices.byte_offset, indices.index_count, index_size, index_size)?;

    let desc = MeshDesc {
        vertices: MeshVertices {
            data: unsafe { slice(vertices.vertices.cast::<u8>(), vertex_bytes) }?,
            byte_offset: vertices.byte_offset,
            vertex_count: vertices.vertex_count,
            vertex_stride: vertices.vertex_stride,
            vertex_type,
        },
        indices: MeshIndices {
            data: unsafe { slice(indices.indices.cast::<u8>(), index_bytes) }?,
            byte_offset: indices.byte_offset,
            index_count: indices.index_count,
            index_type,
        },
        groups,
    };
    context.upload_mesh(GeometryId::from_raw(geometry), &desc)
}

unsafe fn path<'a>(path: *const c_char) -> Result<&'a str> {
    if path.is_null() {
        return Err(SonaraError::invalid("null path"));
    }
    unsafe { CStr::from_ptr(path) }
        .to_str()
        .map_err(|_| SonaraError::invalid("path is not valid UTF-8"))
}

// ═══════════════════════════════════════════════════════════════════════════
// Context lifecycle
// ═══════════════════════════════════════════════════════════════════════════

/// Writes the version numbers and returns a static NUL-terminated version string.
///
/// # Safety
/// Each out pointer must be null or valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_get_version(
    major: *mut i32,
    minor: *mut i32,
    patch: *mut i32,
) -> *const c_char {
    let v = version();
    for (ptr, value) in [(major, v.major), (minor, v.minor), (patch, v.patch)] {
        if !ptr.is_null() {
            unsafe { ptr.write(value as i32) };
        }
    }
    concat!(env!("CARGO_PKG_VERSION"), "\0").as_ptr().cast()
}

/// Creates a context and writes its handle to `context`.
///
/// # Safety
/// `context` must be valid for writes and `config` valid for reads.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_create_context(
    context: *mut *mut SonaraContext,
    config: *const SonaraContextConfiguration,
) -> i32 {
    guard("sonara_create_context", || {
        let desc = desc_from(unsafe { read_in(config) }?)?;
        check_pointer(context)?;
        let handle = Box::into_raw(Box::new(SonaraContext::new(desc)?));
        unsafe { context.write(handle) };
        Ok(())
    })
}

/// Re-applies a configuration to an existing context.
///
/// # Safety
/// `context` must be a live handle; `config` must be valid for reads.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_initialize_context(
    context: *mut SonaraContext,
    config: *const SonaraContextConfiguration,
) -> i32 {
    guard("sonara_initialize_context", || {
        let context = unsafe { context_mut(context) }?;
        context.reinitialize(desc_from(unsafe { read_in(config) }?)?)
    })
}

/// Destroys a context. The handle must not be used afterwards.
///
/// # Safety
/// `context` must be null or a handle from [`sonara_create_context`] not yet destroyed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_destroy_context(context: *mut SonaraContext) -> i32 {
    guard("sonara_destroy_context", || {
        if context.is_null() {
            return Err(SonaraError::Uninitialized);
        }
        unsafe { Box::from_raw(context) }.destroy();
        Ok(())
    })
}

/// # Safety
/// `context` must be a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_enable(context: *mut SonaraContext, what: i32, enable: i32) -> i32 {
    guard("sonara_enable", || {
        let context = unsafe { context_mut(context) }?;
        context.set_enabled(flag(what)?, enable != 0);
        Ok(())
    })
}

/// # Safety
/// `context` must be a live handle; `enabled` valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_is_enabled(
    context: *const SonaraContext,
    what: i32,
    enabled: *mut i32,
) -> i32 {
    guard("sonara_is_enabled", || {
        let context = unsafe { context_ref(context) }?;
        unsafe { write_out(enabled, context.is_enabled(flag(what)?) as i32) }
    })
}

/// # Safety
/// `context` must be a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_set_unit_scale(context: *mut SonaraContext, unit_scale: f32) -> i32 {
    guard("sonara_set_unit_scale", || {
        unsafe { context_mut(context) }?.set_unit_scale(unit_scale)
    })
}

/// # Safety
/// `context` must be a live handle; `unit_scale` valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_get_unit_scale(
    context: *const SonaraContext,
    unit_scale: *mut f32,
) -> i32 {
    guard("sonara_get_unit_scale", || {
        let context = unsafe { context_ref(context) }?;
        unsafe { write_out(unit_scale, context.unit_scale()) }
    })
}

/// # Safety
/// `context` must be a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_set_hrtf_interpolation_method(
    context: *mut SonaraContext,
    method: i32,
) -> i32 {
    guard("sonara_set_hrtf_interpolation_method", || {
        let method = HrtfInterpolation::from_index(method)
            .ok_or_else(|| SonaraError::invalid(format!("interpolation method {}", method)))?;
        unsafe { context_mut(context) }?.set_hrtf_interpolation(method);
        Ok(())
    })
}

/// # Safety
/// `context` must be a live handle; `method` valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_get_hrtf_interpolation_method(
    context: *const SonaraContext,
    method: *mut i32,
) -> i32 {
    guard("sonara_get_hrtf_interpolation_method", || {
        let context = unsafe { context_ref(context) }?;
        unsafe { write_out(method, context.hrtf_interpolation() as i32) }
    })
}

/// # Safety
/// `context` must be a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_set_head_radius(context: *mut SonaraContext, radius: f32) -> i32 {
    guard("sonara_set_head_radius", || {
        unsafe { context_mut(context) }?.set_head_radius(radius)
    })
}

/// # Safety
/// `context` must be a live handle; `radius` valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_get_head_radius(
    context: *const SonaraContext,
    radius: *mut f32,
) -> i32 {
    guard("sonara_get_head_radius", || {
        let context = unsafe { context_ref(context) }?;
        unsafe { write_out(radius, context.head_radius()) }
    })
}

/// Converts a pose into the forward, up and position vectors the listener
/// and ambisonic calls take.
///
/// # Safety
/// `pose` must be valid for reads; the out pointers valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_get_transform_from_pose(
    pose: *const SonaraPose,
    forward: *mut SonaraVector3,
    up: *mut SonaraVector3,
    position: *mut SonaraVector3,
) -> i32 {
    guard("sonara_get_transform_from_pose", || {
        let pose = unsafe { read_in(pose) }?;
        let frame = ListenerPose::from_orientation(pose.position.into(), pose.orientation.into())
            .ok_or_else(|| SonaraError::invalid("degenerate pose orientation"))?;
        unsafe {
            write_out(forward, frame.forward().into())?;
            write_out(up, frame.up().into())?;
            write_out(position, frame.position.into())
        }
    })
}

/// # Safety
/// `context` must be a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_set_listener_vectors(
    context: *mut SonaraContext,
    position: SonaraVector3,
    forward: SonaraVector3,
    up: SonaraVector3,
) -> i32 {
    guard("sonara_set_listener_vectors", || {
        unsafe { context_mut(context) }?.set_listener_vectors(
            position.into(),
            forward.into(),
            up.into(),
        )
    })
}

/// # Safety
/// `context` must be a live handle; the out pointers valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_get_listener_vectors(
    context: *const SonaraContext,
    position: *mut SonaraVector3,
    forward: *mut SonaraVector3,
    up: *mut SonaraVector3,
) -> i32 {
    guard("sonara_get_listener_vectors", || {
        let listener = unsafe { context_ref(context) }?.listener();
        unsafe {
            write_out(position, listener.position.into())?;
            write_out(forward, listener.forward().into())?;
            write_out(up, listener.up().into())
        }
    })
}

// ═══════════════════════════════════════════════════════════════════════════
// Sources
// ═══════════════════════════════════════════════════════════════════════════

/// # Safety
/// `context` must be a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_reset_audio_source(context: *mut SonaraContext, sound: i32) -> i32 {
    guard("sonara_reset_audio_source", || {
        unsafe { context_mut(context) }?.reset_source(index(sound)?)
    })
}

/// # Safety
/// `context` must be a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_set_audio_source_pos(
    context: *mut SonaraContext,
    sound: i32,
    x: f32,
    y: f32,
    z: f32,
) -> i32 {
    guard("sonara_set_audio_source_pos", || {
        unsafe { context_mut(context) }?.set_source_position(index(sound)?, Vec3::new(x, y, z))
    })
}

/// # Safety
/// `context` must be a live handle; `position` valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_get_audio_source_pos(
    context: *const SonaraContext,
    sound: i32,
    position: *mut SonaraVector3,
) -> i32 {
    guard("sonara_get_audio_source_pos", || {
        let p = unsafe { context_ref(context) }?.source_position(index(sound)?)?;
        unsafe { write_out(position, p.into()) }
    })
}

/// # Safety
/// `context` must be a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_set_audio_source_range(
    context: *mut SonaraContext,
    sound: i32,
    range_min: f32,
    range_max: f32,
) -> i32 {
    guard("sonara_set_audio_source_range", || {
        unsafe { context_mut(context) }?.set_source_range(index(sound)?, range_min, range_max)
    })
}

/// # Safety
/// `context` must be a live handle; the out pointers valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_get_audio_source_range(
    context: *const SonaraContext,
    sound: i32,
    range_min: *mut f32,
    range_max: *mut f32,
) -> i32 {
    guard("sonara_get_audio_source_range", || {
        let (min, max) = unsafe { context_ref(context) }?.source_range(index(sound)?)?;
        unsafe {
            write_out(range_min, min)?;
            write_out(range_max, max)
        }
    })
}

/// # Safety
/// `context` must be a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_set_audio_source_radius(
    context: *mut SonaraContext,
    sound: i32,
    radius: f32,
) -> i32 {
    guard("sonara_set_audio_source_radius", || {
        unsafe { context_mut(context) }?.set_source_radius(index(sound)?, radius)
    })
}

/// # Safety
/// `context` must be a live handle; `radius` valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_get_audio_source_radius(
    context: *const SonaraContext,
    sound: i32,
    radius: *mut f32,
) -> i32 {
    guard("sonara_get_audio_source_radius", || {
        let r = unsafe { context_ref(context) }?.source_radius(index(sound)?)?;
        unsafe { write_out(radius, r) }
    })
}

/// # Safety
/// `context` must be a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_set_audio_reverb_send_level(
    context: *mut SonaraContext,
    sound: i32,
    level: f32,
) -> i32 {
    guard("sonara_set_audio_reverb_send_level", || {
        unsafe { context_mut(context) }?.set_source_reverb_send(index(sound)?, level)
    })
}

/// # Safety
/// `context` must be a live handle; `level` valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_get_audio_reverb_send_level(
    context: *const SonaraContext,
    sound: i32,
    level: *mut f32,
) -> i32 {
    guard("sonara_get_audio_reverb_send_level", || {
        let l = unsafe { context_ref(context) }?.source_reverb_send(index(sound)?)?;
        unsafe { write_out(level, l) }
    })
}

/// # Safety
/// `context` must be a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_set_audio_source_attenuation_mode(
    context: *mut SonaraContext,
    sound: i32,
    mode: i32,
    source_gain: f32,
) -> i32 {
    guard("sonara_set_audio_source_attenuation_mode", || {
        let mode = AttenuationMode::from_index(mode)
            .ok_or_else(|| SonaraError::invalid(format!("attenuation mode {}", mode)))?;
        unsafe { context_mut(context) }?.set_source_attenuation_mode(index(sound)?, mode, source_gain)
    })
}

/// # Safety
/// `context` must be a live handle; the out pointers valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_get_audio_source_attenuation_mode(
    context: *const SonaraContext,
    sound: i32,
    mode: *mut i32,
    source_gain: *mut f32,
) -> i32 {
    guard("sonara_get_audio_source_attenuation_mode", || {
        let (m, g) = unsafe { context_ref(context) }?.source_attenuation_mode(index(sound)?)?;
        unsafe {
            write_out(mode, m as i32)?;
            write_out(source_gain, g)
        }
    })
}

/// # Safety
/// `context` must be a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_set_audio_source_flags(
    context: *mut SonaraContext,
    sound: i32,
    flags: u32,
) -> i32 {
    guard("sonara_set_audio_source_flags", || {
        unsafe { context_mut(context) }?.set_source_flags(index(sound)?, SourceFlags::from_bits(flags)?)
    })
}

/// # Safety
/// `context` must be a live handle; `flags` valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_get_audio_source_flags(
    context: *const SonaraContext,
    sound: i32,
    flags: *mut u32,
) -> i32 {
    guard("sonara_get_audio_source_flags", || {
        let f = unsafe { context_ref(context) }?.source_flags(index(sound)?)?;
        unsafe { write_out(flags, f.bits()) }
    })
}

/// # Safety
/// `context` must be a live handle; `gain` valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_get_audio_source_overall_gain(
    context: *const SonaraContext,
    sound: i32,
    gain: *mut f32,
) -> i32 {
    guard("sonara_get_audio_source_overall_gain", || {
        let g = unsafe { context_ref(context) }?.source_overall_gain(index(sound)?)?;
        unsafe { write_out(gain, g) }
    })
}

/// Spatializes `buffer_length` mono samples into separate left/right buffers.
///
/// # Safety
/// `context` must be a live handle; `src`, `dst_left` and `dst_right` must
/// each hold the context's buffer length; `status` must be null or valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_spatialize_mono_source_lr(
    context: *mut SonaraContext,
    sound: i32,
    status: *mut u32,
    dst_left: *mut f32,
    dst_right: *mut f32,
    src: *const f32,
) -> i32 {
    guard("sonara_spatialize_mono_source_lr", || {
        let context = unsafe { context_mut(context) }?;
        let n = context.buffer_length();
        let (input, left, right) = unsafe {
            (
                slice(src, n)?,
                slice_mut(dst_left, n)?,
                slice_mut(dst_right, n)?,
            )
        };
        let s = context.spatialize_mono_lr(index(sound)?, input, left, right)?;
        if !status.is_null() {
            unsafe { write_out(status, status_bits(s)) }?;
        }
        Ok(())
    })
}

/// Spatializes `buffer_length` mono samples into one interleaved stereo buffer.
///
/// # Safety
/// `src` must hold the buffer length and `dst` twice that; `status` must be
/// null or valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_spatialize_mono_source_interleaved(
    context: *mut SonaraContext,
    sound: i32,
    status: *mut u32,
    dst: *mut f32,
    src: *const f32,
) -> i32 {
    guard("sonara_spatialize_mono_source_interleaved", || {
        let context = unsafe { context_mut(context) }?;
        let n = context.buffer_length();
        let (input, output) = unsafe { (slice(src, n)?, slice_mut(dst, 2 * n)?) };
        let s = context.spatialize_mono_interleaved(index(sound)?, input, output)?;
        if !status.is_null() {
            unsafe { write_out(status, status_bits(s)) }?;
        }
        Ok(())
    })
}

// ═══════════════════════════════════════════════════════════════════════════
// Shared reverb
// ═══════════════════════════════════════════════════════════════════════════

/// Adds the frame's shared reverb to separate left/right buffers.
///
/// # Safety
/// Both buffers must hold the context's buffer length; `status` must be null
/// or valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_mix_in_shared_reverb_lr(
    context: *mut SonaraContext,
    status: *mut u32,
    dst_left: *mut f32,
    dst_right: *mut f32,
) -> i32 {
    guard("sonara_mix_in_shared_reverb_lr", || {
        let context = unsafe { context_mut(context) }?;
        let n = context.buffer_length();
        let (left, right) = unsafe { (slice_mut(dst_left, n)?, slice_mut(dst_right, n)?) };
        let s = context.mix_in_shared_reverb_lr(left, right)?;
        if !status.is_null() {
            unsafe { write_out(status, status_bits(s)) }?;
        }
        Ok(())
    })
}

/// Adds the frame's shared reverb to an interleaved stereo buffer.
///
/// # Safety
/// `dst` must hold twice the context's buffer length; `status` must be null
/// or valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_mix_in_shared_reverb_interleaved(
    context: *mut SonaraContext,
    status: *mut u32,
    dst: *mut f32,
) -> i32 {
    guard("sonara_mix_in_shared_reverb_interleaved", || {
        let context = unsafe { context_mut(context) }?;
        let n = context.buffer_length();
        let output = unsafe { slice_mut(dst, 2 * n) }?;
        let s = context.mix_in_shared_reverb_interleaved(output)?;
        if !status.is_null() {
            unsafe { write_out(status, status_bits(s)) }?;
        }
        Ok(())
    })
}

/// # Safety
/// `context` must be a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_set_shared_reverb_wet_level(
    context: *mut SonaraContext,
    level: f32,
) -> i32 {
    guard("sonara_set_shared_reverb_wet_level", || {
        unsafe { context_mut(context) }?.set_shared_reverb_wet_level(level)
    })
}

/// # Safety
/// `context` must be a live handle; `level` valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_get_shared_reverb_wet_level(
    context: *const SonaraContext,
    level: *mut f32,
) -> i32 {
    guard("sonara_get_shared_reverb_wet_level", || {
        let context = unsafe { context_ref(context) }?;
        unsafe { write_out(level, context.shared_reverb_wet_level()) }
    })
}

// ═══════════════════════════════════════════════════════════════════════════
// Room modeling
// ═══════════════════════════════════════════════════════════════════════════

/// # Safety
/// `context` must be a live handle; `params` valid for reads.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_set_simple_box_room_parameters(
    context: *mut SonaraContext,
    params: *const SonaraBoxRoomParameters,
) -> i32 {
    guard("sonara_set_simple_box_room_parameters", || {
        let context = unsafe { context_mut(context) }?;
        let p = unsafe { read_in(params) }?;
        let expected = std::mem::size_of::<SonaraBoxRoomParameters>() as u32;
        if p.size != expected {
            return Err(SonaraError::BadVersion {
                expected,
                found: p.size,
            });
        }
        context.set_simple_box_room_parameters(&BoxRoomParameters {
            reflections: [
                p.reflect_left,
                p.reflect_right,
                p.reflect_up,
                p.reflect_down,
                p.reflect_behind,
                p.reflect_front,
            ],
            dimensions: [p.width, p.height, p.depth],
        })
    })
}

/// # Safety
/// `context` must be a live handle; `params` valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_get_simple_box_room_parameters(
    context: *const SonaraContext,
    params: *mut SonaraBoxRoomParameters,
) -> i32 {
    guard("sonara_get_simple_box_room_parameters", || {
        let p = unsafe { context_ref(context) }?.simple_box_room_parameters();
        let [reflect_left, reflect_right, reflect_up, reflect_down, reflect_behind, reflect_front] =
            p.reflections;
        let [width, height, depth] = p.dimensions;
        unsafe {
            write_out(
                params,
                SonaraBoxRoomParameters {
                    size: std::mem::size_of::<SonaraBoxRoomParameters>() as u32,
                    reflect_left,
                    reflect_right,
                    reflect_up,
                    reflect_down,
                    reflect_behind,
                    reflect_front,
                    width,
                    height,
                    depth,
                },
            )
        }
    })
}

/// # Safety
/// `context` must be a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_set_reflection_model(context: *mut SonaraContext, model: i32) -> i32 {
    guard("sonara_set_reflection_model", || {
        let model = ReflectionModel::from_index(model)
            .ok_or_else(|| SonaraError::invalid(format!("reflection model {}", model)))?;
        unsafe { context_mut(context) }?.set_reflection_model(model);
        Ok(())
    })
}

/// # Safety
/// `context` must be a live handle; `model` valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_get_reflection_model(
    context: *const SonaraContext,
    model: *mut i32,
) -> i32 {
    guard("sonara_get_reflection_model", || {
        let context = unsafe { context_ref(context) }?;
        unsafe { write_out(model, context.reflection_model() as i32) }
    })
}

/// Installs a ray-cast callback for dynamic room modeling; a null callback removes it.
///
/// # Safety
/// `callback` and `user_data` must stay valid until replaced or the context
/// is destroyed, and must be callable from another thread.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_assign_raycast_callback(
    context: *mut SonaraContext,
    callback: Option<SonaraRaycastCallback>,
    user_data: *mut c_void,
) -> i32 {
    guard("sonara_assign_raycast_callback", || {
        let caster = callback.map(|callback| {
            Arc::new(CallbackCaster {
                callback,
                user_data,
            }) as Arc<dyn RayCaster>
        });
        unsafe { context_mut(context) }?.assign_raycast_callback(caster);
        Ok(())
    })
}

/// # Safety
/// `context` must be a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_set_dynamic_room_rays_per_second(
    context: *mut SonaraContext,
    rays_per_second: i32,
) -> i32 {
    guard("sonara_set_dynamic_room_rays_per_second", || {
        let rays = u32::try_from(rays_per_second)
            .map_err(|_| SonaraError::invalid(format!("rays per second {}", rays_per_second)))?;
        unsafe { context_mut(context) }?.set_dynamic_room_rays_per_second(rays)
    })
}

/// # Safety
/// `context` must be a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_set_dynamic_room_interp_speed(
    context: *mut SonaraContext,
    speed: f32,
) -> i32 {
    guard("sonara_set_dynamic_room_interp_speed", || {
        unsafe { context_mut(context) }?.set_dynamic_room_interp_speed(speed)
    })
}

/// # Safety
/// `context` must be a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_set_dynamic_room_max_wall_distance(
    context: *mut SonaraContext,
    distance: f32,
) -> i32 {
    guard("sonara_set_dynamic_room_max_wall_distance", || {
        unsafe { context_mut(context) }?.set_dynamic_room_max_wall_distance(distance)
    })
}

/// # Safety
/// `context` must be a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_set_dynamic_room_ray_cache_size(
    context: *mut SonaraContext,
    size: i32,
) -> i32 {
    guard("sonara_set_dynamic_room_ray_cache_size", || {
        unsafe { context_mut(context) }?.set_dynamic_room_ray_cache_size(index(size)?)
    })
}

/// Writes the active room: 3 dimensions in metres, 6 reflection coefficients
/// and the room centre.
///
/// # Safety
/// `dimensions` must hold 3 floats, `coefficients` 6; `position` must be valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_get_room_dimensions(
    context: *const SonaraContext,
    dimensions: *mut f32,
    coefficients: *mut f32,
    position: *mut SonaraVector3,
) -> i32 {
    guard("sonara_get_room_dimensions", || {
        let room = unsafe { context_ref(context) }?.room_dimensions();
        unsafe {
            slice_mut(dimensions, 3)?.copy_from_slice(&room.dimensions);
            slice_mut(coefficients, 6)?.copy_from_slice(&room.reflections);
            write_out(position, room.position.into())
        }
    })
}

/// Writes up to `length` recent hit points and normals; unused entries are zeroed.
///
/// # Safety
/// `points` and `normals` must each hold `length` vectors.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_get_raycast_hits(
    context: *const SonaraContext,
    points: *mut SonaraVector3,
    normals: *mut SonaraVector3,
    length: i32,
) -> i32 {
    guard("sonara_get_raycast_hits", || {
        let length = index(length)?;
        let context = unsafe { context_ref(context) }?;
        let (points, normals) = unsafe { (slice_mut(points, length)?, slice_mut(normals, length)?) };
        points.fill(SonaraVector3::default());
        normals.fill(SonaraVector3::default());
        for (i, hit) in context.raycast_hits(length)?.iter().enumerate() {
            points[i] = hit.point.into();
            normals[i] = hit.normal.into();
        }
        Ok(())
    })
}

// ═══════════════════════════════════════════════════════════════════════════
// Propagation: geometry and materials
// ═══════════════════════════════════════════════════════════════════════════

/// # Safety
/// `context` must be a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_set_propagation_quality(
    context: *mut SonaraContext,
    quality: f32,
) -> i32 {
    guard("sonara_set_propagation_quality", || {
        unsafe { context_mut(context) }?.set_propagation_quality(quality)
    })
}

/// # Safety
/// `context` must be a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_set_propagation_thread_affinity(
    context: *mut SonaraContext,
    cpu_mask: u64,
) -> i32 {
    guard("sonara_set_propagation_thread_affinity", || {
        unsafe { context_mut(context) }?.set_propagation_thread_affinity(cpu_mask)
    })
}

/// # Safety
/// `context` must be a live handle; `geometry` valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_create_audio_geometry(
    context: *mut SonaraContext,
    geometry: *mut u64,
) -> i32 {
    guard("sonara_create_audio_geometry", || {
        let context = unsafe { context_mut(context) }?;
        check_pointer(geometry)?;
        let id = context.create_geometry()?;
        unsafe { write_out(geometry, id.raw()) }
    })
}

/// # Safety
/// `context` must be a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_destroy_audio_geometry(context: *mut SonaraContext, geometry: u64) -> i32 {
    guard("sonara_destroy_audio_geometry", || {
        unsafe { context_mut(context) }?.destroy_geometry(GeometryId::from_raw(geometry))
    })
}

/// Uploads a mesh from a structured descriptor.
///
/// # Safety
/// `mesh` and every buffer it points to must be valid for the sizes it describes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_audio_geometry_upload_mesh(
    context: *mut SonaraContext,
    geometry: u64,
    mesh: *const SonaraMesh,
) -> i32 {
    guard("sonara_audio_geometry_upload_mesh", || {
        let mesh = unsafe { read_in(mesh) }?;
        let groups = unsafe { mesh_groups(mesh.groups, mesh.group_count) }?;
        unsafe { upload(context, geometry, &mesh.vertices, &mesh.indices, &groups) }
    })
}

/// Uploads a mesh from raw typed buffers.
///
/// # Safety
/// Each buffer must be valid for the offset, count, stride and type given.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_audio_geometry_upload_mesh_arrays(
    context: *mut SonaraContext,
    geometry: u64,
    vertices: *const c_void,
    vertex_byte_offset: usize,
    vertex_count: usize,
    vertex_stride: usize,
    vertex_type: i32,
    indices: *const c_void,
    index_byte_offset: usize,
    index_count: usize,
    index_type: i32,
    groups: *const SonaraMeshGroup,
    group_count: usize,
) -> i32 {
    guard("sonara_audio_geometry_upload_mesh_arrays", || {
        let groups = unsafe { mesh_groups(groups, group_count) }?;
        let vertices = SonaraMeshVertices {
            vertices,
            byte_offset: vertex_byte_offset,
            vertex_count,
            vertex_stride,
            vertex_type,
        };
        let indices = SonaraMeshIndices {
            indices,
            byte_offset: index_byte_offset,
            index_count,
            index_type,
        };
        unsafe { upload(context, geometry, &vertices, &indices, &groups) }
    })
}

/// # Safety
/// `matrix` must hold 16 column-major floats.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_audio_geometry_set_transform(
    context: *mut SonaraContext,
    geometry: u64,
    matrix: *const f32,
) -> i32 {
    guard("sonara_audio_geometry_set_transform", || {
        let context = unsafe { context_mut(context) }?;
        let mut m = [0.0f32; 16];
        m.copy_from_slice(unsafe { slice(matrix, 16) }?);
        context.set_geometry_transform(GeometryId::from_raw(geometry), &m)
    })
}

/// # Safety
/// `matrix` must have room for 16 floats.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_audio_geometry_get_transform(
    context: *const SonaraContext,
    geometry: u64,
    matrix: *mut f32,
) -> i32 {
    guard("sonara_audio_geometry_get_transform", || {
        let m = unsafe { context_ref(context) }?.geometry_transform(GeometryId::from_raw(geometry))?;
        unsafe { slice_mut(matrix, 16) }?.copy_from_slice(&m);
        Ok(())
    })
}

/// # Safety
/// `serializer` must be valid for reads and its callbacks callable with its user data.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_audio_geometry_write_mesh(
    context: *const SonaraContext,
    geometry: u64,
    serializer: *const SonaraSerializer,
) -> i32 {
    guard("sonara_audio_geometry_write_mesh", || {
        let context = unsafe { context_ref(context) }?;
        let callbacks = unsafe { read_in(serializer) }?;
        context.write_geometry(
            GeometryId::from_raw(geometry),
            &mut CallbackSerializer { callbacks },
        )
    })
}

/// # Safety
/// `serializer` must be valid for reads and its callbacks callable with its user data.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_audio_geometry_read_mesh(
    context: *mut SonaraContext,
    geometry: u64,
    serializer: *const SonaraSerializer,
) -> i32 {
    guard("sonara_audio_geometry_read_mesh", || {
        let context = unsafe { context_mut(context) }?;
        let callbacks = unsafe { read_in(serializer) }?;
        context.read_geometry(
            GeometryId::from_raw(geometry),
            &mut CallbackSerializer { callbacks },
        )
    })
}

/// # Safety
/// `file_path` must be a NUL-terminated UTF-8 string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_audio_geometry_write_mesh_file(
    context: *const SonaraContext,
    geometry: u64,
    file_path: *const c_char,
) -> i32 {
    guard("sonara_audio_geometry_write_mesh_file", || {
        let context = unsafe { context_ref(context) }?;
        context.write_geometry_to_file(GeometryId::from_raw(geometry), unsafe { path(file_path) }?)
    })
}

/// # Safety
/// `file_path` must be a NUL-terminated UTF-8 string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_audio_geometry_read_mesh_file(
    context: *mut SonaraContext,
    geometry: u64,
    file_path: *const c_char,
) -> i32 {
    guard("sonara_audio_geometry_read_mesh_file", || {
        let context = unsafe { context_mut(context) }?;
        context.read_geometry_from_file(GeometryId::from_raw(geometry), unsafe { path(file_path) }?)
    })
}

/// # Safety
/// `context` must be a live handle; `material` valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_create_audio_material(
    context: *mut SonaraContext,
    material: *mut u64,
) -> i32 {
    guard("sonara_create_audio_material", || {
        let context = unsafe { context_mut(context) }?;
        check_pointer(material)?;
        let id = context.create_material()?;
        unsafe { write_out(material, id.raw()) }
    })
}

/// # Safety
/// `context` must be a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_destroy_audio_material(context: *mut SonaraContext, material: u64) -> i32 {
    guard("sonara_destroy_audio_material", || {
        unsafe { context_mut(context) }?.destroy_material(MaterialId::from_raw(material))
    })
}

/// # Safety
/// `context` must be a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_audio_material_set_frequency(
    context: *mut SonaraContext,
    material: u64,
    property: i32,
    frequency: f32,
    value: f32,
) -> i32 {
    guard("sonara_audio_material_set_frequency", || {
        let prop = self::property(property)?;
        unsafe { context_mut(context) }?.material_set_frequency(
            MaterialId::from_raw(material),
            prop,
            frequency,
            value,
        )
    })
}

/// # Safety
/// `context` must be a live handle; `value` valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_audio_material_get_frequency(
    context: *const SonaraContext,
    material: u64,
    property: i32,
    frequency: f32,
    value: *mut f32,
) -> i32 {
    guard("sonara_audio_material_get_frequency", || {
        let prop = self::property(property)?;
        let v = unsafe { context_ref(context) }?.material_get_frequency(
            MaterialId::from_raw(material),
            prop,
            frequency,
        )?;
        unsafe { write_out(value, v) }
    })
}

/// # Safety
/// `context` must be a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_audio_material_reset(
    context: *mut SonaraContext,
    material: u64,
    property: i32,
) -> i32 {
    guard("sonara_audio_material_reset", || {
        let prop = self::property(property)?;
        unsafe { context_mut(context) }?.material_reset(MaterialId::from_raw(material), prop)
    })
}

/// Writes the 4 reflection bands of a material preset. On failure the bands are zeroed.
///
/// # Safety
/// `bands` must hold `band_count` floats.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_get_reflection_bands(
    preset: i32,
    bands: *mut f32,
    band_count: u32,
) -> i32 {
    guard("sonara_get_reflection_bands", || {
        let bands = unsafe { slice_mut(bands, band_count as usize) }?;
        get_reflection_bands(preset, bands)
    })
}

// ═══════════════════════════════════════════════════════════════════════════
// Ambisonics
// ═══════════════════════════════════════════════════════════════════════════

/// # Safety
/// `context` must be a live handle; `stream` valid for writes. The stream
/// must be destroyed with [`sonara_destroy_ambisonic_stream`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_create_ambisonic_stream(
    context: *const SonaraContext,
    sample_rate: u32,
    buffer_length: u32,
    format: i32,
    order: i32,
    stream: *mut *mut AmbisonicStream,
) -> i32 {
    guard("sonara_create_ambisonic_stream", || {
        let context = unsafe { context_ref(context) }?;
        check_pointer(stream)?;
        let created = context.create_ambisonic_stream(
            sample_rate,
            buffer_length as usize,
            ambisonic_format(format)?,
            usize::try_from(order).map_err(|_| SonaraError::invalid(format!("order {}", order)))?,
        )?;
        unsafe { stream.write(Box::into_raw(Box::new(created))) };
        Ok(())
    })
}

/// # Safety
/// `stream` must be a live stream handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_reset_ambisonic_stream(stream: *mut AmbisonicStream) -> i32 {
    guard("sonara_reset_ambisonic_stream", || {
        unsafe { stream_mut(stream) }?.reset();
        Ok(())
    })
}

/// # Safety
/// `stream` must be null or a live stream handle; it is invalid afterwards.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_destroy_ambisonic_stream(stream: *mut AmbisonicStream) -> i32 {
    guard("sonara_destroy_ambisonic_stream", || {
        if stream.is_null() {
            return Err(SonaraError::Uninitialized);
        }
        drop(unsafe { Box::from_raw(stream) });
        Ok(())
    })
}

/// # Safety
/// `stream` must be a live stream handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_set_ambisonic_stream_render_mode(
    stream: *mut AmbisonicStream,
    mode: i32,
) -> i32 {
    guard("sonara_set_ambisonic_stream_render_mode", || {
        let mode = AmbisonicRenderMode::from_index(mode)
            .ok_or_else(|| SonaraError::invalid(format!("render mode {}", mode)))?;
        unsafe { stream_mut(stream) }?.set_render_mode(mode);
        Ok(())
    })
}

/// # Safety
/// `stream` must be a live stream handle; `mode` valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_get_ambisonic_stream_render_mode(
    stream: *mut AmbisonicStream,
    mode: *mut i32,
) -> i32 {
    guard("sonara_get_ambisonic_stream_render_mode", || {
        let m = unsafe { stream_mut(stream) }?.render_mode();
        unsafe { write_out(mode, m as i32) }
    })
}

/// # Safety
/// `stream` must be a live stream handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_set_ambisonic_orientation(
    stream: *mut AmbisonicStream,
    look: SonaraVector3,
    up: SonaraVector3,
) -> i32 {
    guard("sonara_set_ambisonic_orientation", || {
        unsafe { stream_mut(stream) }?.set_orientation(look.into(), up.into())
    })
}

/// # Safety
/// `stream` must be a live stream handle; the out pointers valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_get_ambisonic_orientation(
    stream: *mut AmbisonicStream,
    look: *mut SonaraVector3,
    up: *mut SonaraVector3,
) -> i32 {
    guard("sonara_get_ambisonic_orientation", || {
        let (l, u) = unsafe { stream_mut(stream) }?.orientation();
        unsafe {
            write_out(look, l.into())?;
            write_out(up, u.into())
        }
    })
}

/// Decodes `frames` interleaved ambisonic frames into interleaved stereo.
///
/// # Safety
/// `src` must hold `frames * channels` floats and `dst` `frames * 2`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_process_ambisonic_stream_interleaved(
    context: *const SonaraContext,
    stream: *mut AmbisonicStream,
    src: *const f32,
    dst: *mut f32,
    frames: u32,
) -> i32 {
    guard("sonara_process_ambisonic_stream_interleaved", || {
        let context = unsafe { context_ref(context) }?;
        let stream = unsafe { stream_mut(stream) }?;
        let frames = frames as usize;
        let (src, dst) = unsafe {
            (
                slice(src, frames * stream.channels())?,
                slice_mut(dst, frames * 2)?,
            )
        };
        context.process_ambisonic_stream(stream, src, dst, frames)
    })
}

/// Encodes `frames` mono samples arriving from `direction`.
///
/// # Safety
/// `src` must hold `frames` floats and `dst` `frames * (order + 1)^2`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_mono_to_ambisonic(
    src: *const f32,
    direction: SonaraVector3,
    format: i32,
    order: i32,
    dst: *mut f32,
    frames: u32,
) -> i32 {
    guard("sonara_mono_to_ambisonic", || {
        let format = ambisonic_format(format)?;
        let order = usize::try_from(order).map_err(|_| SonaraError::invalid(format!("order {}", order)))?;
        let channels = crate::ambisonic::channel_count(order)?;
        let frames = frames as usize;
        let (input, output) = unsafe { (slice(src, frames)?, slice_mut(dst, frames * channels)?) };
        mono_to_ambisonic(input, direction.into(), format, order, output, frames)
    })
}

/// Blends four interleaved stereo recordings (facing forward, right, back,
/// left) into `dst` for a look direction.
///
/// # Safety
/// Every buffer must hold `frames * 2` floats.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_process_quad_binaural(
    forward_lr: *const f32,
    right_lr: *const f32,
    back_lr: *const f32,
    left_lr: *const f32,
    look: SonaraVector3,
    frames: u32,
    dst: *mut f32,
) -> i32 {
    guard("sonara_process_quad_binaural", || {
        let n = frames as usize * 2;
        let input = unsafe {
            QuadBinauralInput {
                forward: slice(forward_lr, n)?,
                right: slice(right_lr, n)?,
                back: slice(back_lr, n)?,
                left: slice(left_lr, n)?,
            }
        };
        let output = unsafe { slice_mut(dst, n) }?;
        process_quad_binaural(&input, look.into(), frames as usize, output)
    })
}

// ═══════════════════════════════════════════════════════════════════════════
// Performance counters
// ═══════════════════════════════════════════════════════════════════════════

fn counter(value: i32) -> Result<PerformanceCounter> {
    PerformanceCounter::from_index(value)
        .ok_or_else(|| SonaraError::invalid(format!("performance counter {}", value)))
}

/// # Safety
/// `context` must be a live handle; the out pointers valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_get_performance_counter(
    context: *const SonaraContext,
    counter_id: i32,
    count: *mut i64,
    time_us: *mut f64,
) -> i32 {
    guard("sonara_get_performance_counter", || {
        let sample = unsafe { context_ref(context) }?.performance_counter(counter(counter_id)?);
        unsafe {
            write_out(count, sample.count as i64)?;
            write_out(time_us, sample.time_us)
        }
    })
}

/// # Safety
/// `context` must be a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_reset_performance_counter(
    context: *mut SonaraContext,
    counter_id: i32,
) -> i32 {
    guard("sonara_reset_performance_counter", || {
        unsafe { context_mut(context) }?.reset_performance_counter(counter(counter_id)?);
        Ok(())
    })
}

/// Turns performance counter recording on (non-zero) or off (0).
///
/// # Safety
/// `context` must be a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_set_profiler_enabled(
    context: *mut SonaraContext,
    enabled: i32,
) -> i32 {
    guard("sonara_set_profiler_enabled", || {
        unsafe { context_mut(context) }?.set_profiler_enabled(enabled != 0);
        Ok(())
    })
}

// ═══════════════════════════════════════════════════════════════════════════
// Sample buffers
// ═══════════════════════════════════════════════════════════════════════════

/// Allocation size is stored in a header just before the returned pointer.
fn sample_layout(count: usize) -> Result<Layout> {
    count
        .checked_mul(std::mem::size_of::<f32>())
        .and_then(|bytes| bytes.checked_add(SAMPLE_ALIGNMENT))
        .and_then(|bytes| Layout::from_size_align(bytes, SAMPLE_ALIGNMENT).ok())
        .ok_or_else(|| SonaraError::MemoryAllocFailure(format!("{} samples", count)))
}

/// Allocates `count` zeroed samples aligned to 16 bytes.
///
/// # Safety
/// `samples` must be valid for writes. Free the buffer with [`sonara_free_samples`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_alloc_samples(count: usize, samples: *mut *mut f32) -> i32 {
    guard("sonara_alloc_samples", || {
        check_pointer(samples)?;
        let layout = sample_layout(count)?;
        let base = unsafe { alloc::alloc_zeroed(layout) };
        if base.is_null() {
            return Err(SonaraError::MemoryAllocFailure(format!("{} samples", count)));
        }
        unsafe {
            base.cast::<usize>().write(count);
            samples.write(base.add(SAMPLE_ALIGNMENT).cast());
        }
        Ok(())
    })
}

/// Frees a buffer from [`sonara_alloc_samples`]. Null is ignored.
///
/// # Safety
/// `samples` must be null or a pointer returned by [`sonara_alloc_samples`]
/// that was not freed yet.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sonara_free_samples(samples: *mut f32) {
    if samples.is_null() {
        return;
    }
    unsafe {
        let base = samples.cast::<u8>().sub(SAMPLE_ALIGNMENT);
        let count = base.cast::<usize>().read();
        if let Ok(layout) = sample_layout(count) {
            alloc::dealloc(base, layout);
        }
    }
}

/// Result code for success, for callers comparing against a named constant.
pub const SONARA_SUCCESS: i32 = ErrorCode::Success as i32;

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;

    fn config(sample_rate: u32) -> SonaraContextConfiguration {
        SonaraContextConfiguration {
            size: std::mem::size_of::<SonaraContextConfiguration>() as u32,
            max_num_sources: 1,
            sample_rate,
            buffer_length: 64,
        }
    }

    fn create() -> *mut SonaraContext {
        let mut ctx = ptr::null_mut();
        assert_eq!(unsafe { sonara_create_context(&mut ctx, &config(48_000)) }, SONARA_SUCCESS);
        ctx
    }

    #[test]
    fn test_lifecycle_codes() {
        let mut ctx = ptr::null_mut();
        assert_eq!(unsafe { sonara_create_context(&mut ctx, &config(8_000)) }, 2002);
        assert!(ctx.is_null());

        let mut bad = config(48_000);
        bad.size = 4;
        assert_eq!(unsafe { sonara_create_context(&mut ctx, &bad) }, 2007);

        assert_eq!(unsafe { sonara_set_unit_scale(ptr::null_mut(), 1.0) }, 2005);
        let ctx = create();
        assert_eq!(unsafe { sonara_set_unit_scale(ctx, -1.0) }, 2001);
        assert_eq!(unsafe { sonara_destroy_context(ctx) }, SONARA_SUCCESS);
    }

    #[test]
    fn test_spatialize_alignment_and_status() {
        let ctx = create();
        let mut input = vec![0.0f32; 65];
        input[0] = 1.0;
        let mut left = vec![0.0f32; 64];
        let mut right = vec![0.0f32; 64];
        let mut status = 0u32;

        let rc = unsafe {
            sonara_spatialize_mono_source_lr(
                ctx,
                0,
                &mut status,
                left.as_mut_ptr(),
                right.as_mut_ptr(),
                input.as_ptr(),
            )
        };
        assert_eq!(rc, SONARA_SUCCESS);
        assert_eq!(status, SpatializationStatus::Working as u32);

        let misaligned = unsafe { input.as_ptr().cast::<u8>().add(1).cast::<f32>() };
        let rc = unsafe {
            sonara_spatialize_mono_source_lr(
                ctx,
                0,
                &mut status,
                left.as_mut_ptr(),
                right.as_mut_ptr(),
                misaligned,
            )
        };
        assert_eq!(rc, ErrorCode::BadAlignment as i32);

        let mut out = vec![0.0f32; 128];
        let rc = unsafe { sonara_mix_in_shared_reverb_interleaved(ctx, &mut status, out.as_mut_ptr()) };
        assert_eq!(rc, ErrorCode::SharedReverbDisabled as i32);
        unsafe { sonara_destroy_context(ctx) };
    }

    #[test]
    fn test_transform_from_pose() {
        let half = std::f32::consts::FRAC_PI_4;
        let pose = SonaraPose {
            // Quarter turn about +Y
            orientation: SonaraQuaternion {
                x: 0.0,
                y: half.sin(),
                z: 0.0,
                w: half.cos(),
            },
            position: SonaraVector3 {
                x: 1.0,
                y: 2.0,
                z: 3.0,
            },
        };
        let mut forward = SonaraVector3::default();
        let mut up = SonaraVector3::default();
        let mut position = SonaraVector3::default();
        let rc = unsafe { sonara_get_transform_from_pose(&pose, &mut forward, &mut up, &mut position) };
        assert_eq!(rc, SONARA_SUCCESS);
        assert!((Vec3::from(forward) - -Vec3::X).length() < 1e-5);
        assert!((Vec3::from(up) - Vec3::Y).length() < 1e-5);
        assert_eq!(position, pose.position);

        let degenerate = SonaraPose {
            orientation: SonaraQuaternion {
                x: 0.0,
                y: 0.0,
                z: 0.0,
                w: 0.0,
            },
            ..pose
        };
        let rc = unsafe { sonara_get_transform_from_pose(&degenerate, &mut forward, &mut up, &mut position) };
        assert_eq!(rc, 2001);
        let rc = unsafe { sonara_get_transform_from_pose(ptr::null(), &mut forward, &mut up, &mut position) };
        assert_eq!(rc, 2001);
    }

    #[test]
    fn test_profiler_toggle_and_room_rays() {
        let ctx = create();
        let input = vec![0.0f32; 64];
        let mut out = vec![0.0f32; 128];
        let (mut count, mut time_us) = (-1i64, -1.0f64);

        assert_eq!(unsafe { sonara_set_profiler_enabled(ctx, 0) }, SONARA_SUCCESS);
        let rc = unsafe {
            sonara_spatialize_mono_source_interleaved(ctx, 0, ptr::null_mut(), out.as_mut_ptr(), input.as_ptr())
        };
        assert_eq!(rc, SONARA_SUCCESS);
        unsafe { sonara_get_performance_counter(ctx, 0, &mut count, &mut time_us) };
        assert_eq!(count, 0);

        assert_eq!(unsafe { sonara_set_profiler_enabled(ctx, 1) }, SONARA_SUCCESS);
        let rc = unsafe {
            sonara_spatialize_mono_source_interleaved(ctx, 0, ptr::null_mut(), out.as_mut_ptr(), input.as_ptr())
        };
        assert_eq!(rc, SONARA_SUCCESS);
        unsafe { sonara_get_performance_counter(ctx, 0, &mut count, &mut time_us) };
        assert_eq!(count, 1);
        assert_eq!(unsafe { sonara_set_profiler_enabled(ptr::null_mut(), 1) }, 2005);

        assert_eq!(unsafe { sonara_set_dynamic_room_rays_per_second(ctx, 512) }, SONARA_SUCCESS);
        assert_eq!(unsafe { sonara_set_dynamic_room_rays_per_second(ctx, -1) }, 2001);
        unsafe { sonara_destroy_context(ctx) };
    }

    #[test]
    fn test_reflection_bands_zeroed_on_error() {
        let mut bands = [1.0f32; 4];
        assert_eq!(unsafe { sonara_get_reflection_bands(99, bands.as_mut_ptr(), 4) }, 2001);
        assert_eq!(bands, [0.0; 4]);
        assert_eq!(unsafe { sonara_get_reflection_bands(0, bands.as_mut_ptr(), 4) }, SONARA_SUCCESS);
        assert!(bands.iter().all(|b| *b > 0.0));
    }

    #[test]
    fn test_alloc_samples() {
        let mut samples = ptr::null_mut();
        assert_eq!(unsafe { sonara_alloc_samples(100, &mut samples) }, SONARA_SUCCESS);
        assert_eq!(samples as usize % 16, 0);
        unsafe {
            assert_eq!(*samples.add(99), 0.0);
            sonara_free_samples(samples);
        }
        assert_eq!(
            unsafe { sonara_alloc_samples(usize::MAX / 2, &mut samples) },
            ErrorCode::MemoryAllocFailure as i32
        );
    }

    #[test]
    fn test_mesh_upload_through_raw_buffers() {
        if !cfg!(feature = "propagation") {
            return;
        }
        let ctx = create();
        let mut geometry = 0u64;
        assert_eq!(unsafe { sonara_create_audio_geometry(ctx, &mut geometry) }, SONARA_SUCCESS);
        assert_ne!(geometry, 0);

        let vertices: [f32; 12] = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0];
        let indices: [u16; 4] = [0, 1, 2, 3];
        let group = SonaraMeshGroup {
            index_offset: 0,
            face_count: 1,
            face_type: FaceType::Quads as i32,
            material: 0,
        };
        let rc = unsafe {
            sonara_audio_geometry_upload_mesh_arrays(
                ctx,
                geometry,
                vertices.as_ptr().cast(),
                0,
                4,
                0,
                ScalarType::Float32 as i32,
                indices.as_ptr().cast(),
                0,
                4,
                ScalarType::UInt16 as i32,
                &group,
                1,
            )
        };
        assert_eq!(rc, SONARA_SUCCESS);
        let faces = unsafe { context_ref(ctx) }
            .unwrap()
            .geometry(GeometryId::from_raw(geometry))
            .unwrap()
            .face_count();
        assert_eq!(faces, 1);

        // Stride shorter than a vertex
        let rc = unsafe {
            sonara_audio_geometry_upload_mesh_arrays(
                ctx,
                geometry,
                vertices.as_ptr().cast(),
                0,
                4,
                8,
                ScalarType::Float32 as i32,
                indices.as_ptr().cast(),
                0,
                4,
                ScalarType::UInt16 as i32,
                &group,
                1,
            )
        };
        assert_eq!(rc, 2001);
        unsafe { sonara_destroy_context(ctx) };
    }
}
