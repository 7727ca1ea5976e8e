//! Acoustic material properties for reflections and propagation.
//!
//! A material describes how a surface treats sound through three properties,
//! each a continuous function of frequency:
//!
//! - **Absorption**: fraction of energy absorbed (not reflected), default 0.1
//! - **Transmission**: fraction of energy passed through the surface, default 0.0
//! - **Scattering**: how diffuse (vs. specular) reflections are, default 0.5
//!
//! Properties are written and read at discrete frequencies and interpolated
//! linearly in log-frequency between the written points.
//!
//! For quick setups there are 28 [`MaterialPreset`]s, each a fixed set of
//! reflection coefficients at the four [`BAND_FREQUENCIES`].

use crate::error::{Result, SonaraError};
use std::collections::HashMap;

/// Number of reflection bands used by presets and ray hits
pub const BAND_COUNT: usize = 4;

/// Reflection coefficients at [`BAND_FREQUENCIES`]
pub type ReflectionBands = [f32; BAND_COUNT];

/// Centre frequencies (Hz) of the four reflection bands
pub const BAND_FREQUENCIES: [f32; BAND_COUNT] = [125.0, 500.0, 2000.0, 8000.0];

/// Built-in real-world surface presets.
///
/// Discriminants are the integer values exchanged over the C boundary.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaterialPreset {
    AcousticTile = 0,
    Brick,
    BrickPainted,
    Carpet,
    CarpetHeavy,
    CarpetHeavyPadded,
    CeramicTile,
    Concrete,
    ConcreteRough,
    ConcreteBlock,
    ConcreteBlockPainted,
    Curtain,
    Foliage,
    Glass,
    GlassHeavy,
    Grass,
    Gravel,
    GypsumBoard,
    PlasterOnBrick,
    PlasterOnConcreteBlock,
    Soil,
    SoundProof,
    Snow,
    Steel,
    Water,
    WoodThin,
    WoodThick,
    WoodFloor,
    WoodOnConcrete,
}

impl MaterialPreset {
    pub const COUNT: usize = 29;

    pub const ALL: [Self; Self::COUNT] = [
        Self::AcousticTile,
        Self::Brick,
        Self::BrickPainted,
        Self::Carpet,
        Self::CarpetHeavy,
        Self::CarpetHeavyPadded,
        Self::CeramicTile,
        Self::Concrete,
        Self::ConcreteRough,
        Self::ConcreteBlock,
        Self::ConcreteBlockPainted,
        Self::Curtain,
        Self::Foliage,
        Self::Glass,
        Self::GlassHeavy,
        Self::Grass,
        Self::Gravel,
        Self::GypsumBoard,
        Self::PlasterOnBrick,
        Self::PlasterOnConcreteBlock,
        Self::Soil,
        Self::SoundProof,
        Self::Snow,
        Self::Steel,
        Self::Water,
        Self::WoodThin,
        Self::WoodThick,
        Self::WoodFloor,
        Self::WoodOnConcrete,
    ];

    pub fn from_index(index: i32) -> Option<Self> {
        usize::try_from(index)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
    }

    /// Reflection coefficients of this preset at [`BAND_FREQUENCIES`].
    pub const fn reflection_bands(self) -> ReflectionBands {
        match self {
            Self::AcousticTile => [0.488168418, 0.361475229, 0.339595377, 0.498946249],
            Self::Brick => [0.975468814, 0.972064495, 0.949180186, 0.930105388],
            Self::BrickPainted => [0.975710571, 0.983324170, 0.978116691, 0.970052719],
            Self::Carpet => [0.987633705, 0.905486643, 0.583110571, 0.351053834],
            Self::CarpetHeavy => [0.977633715, 0.859082878, 0.526479602, 0.370790422],
            Self::CarpetHeavyPadded => [0.910534739, 0.530433178, 0.294055820, 0.270105422],
            Self::CeramicTile => [0.990000010, 0.990000010, 0.982753932, 0.980000019],
            Self::Concrete => [0.990000010, 0.983324170, 0.980000019, 0.980000019],
            Self::ConcreteRough => [0.989408433, 0.964494646, 0.922127008, 0.900105357],
            Self::ConcreteBlock => [0.635267377, 0.652230680, 0.671053469, 0.789051592],
            Self::ConcreteBlockPainted => [0.902957916, 0.940235913, 0.917584062, 0.919947326],
            Self::Curtain => [0.686494231, 0.545859993, 0.310078561, 0.399473131],
            Self::Foliage => [0.518259346, 0.503568292, 0.578688800, 0.690210819],
            Self::Glass => [0.655915797, 0.800631821, 0.918839693, 0.923488140],
            Self::GlassHeavy => [0.827098966, 0.950222731, 0.974604130, 0.980000019],
            Self::Grass => [0.881126285, 0.507170796, 0.131893098, 0.0103688836],
            Self::Gravel => [0.729294717, 0.373122454, 0.255317450, 0.200263441],
            Self::GypsumBoard => [0.721240044, 0.927690148, 0.934302270, 0.910105407],
            Self::PlasterOnBrick => [0.975696504, 0.979106009, 0.961063504, 0.950052679],
            Self::PlasterOnConcreteBlock => [0.881774724, 0.924773932, 0.951497555, 0.959947288],
            Self::Soil => [0.844084203, 0.634624243, 0.416662872, 0.400000036],
            Self::SoundProof => [0.0, 0.0, 0.0, 0.0],
            Self::Snow => [0.532252669, 0.154535770, 0.0509644151, 0.0500000119],
            Self::Steel => [0.793111682, 0.840140402, 0.925591767, 0.979736567],
            Self::Water => [0.970588267, 0.971753478, 0.978309572, 0.970052719],
            Self::WoodThin => [0.592423141, 0.858273327, 0.917242289, 0.939999998],
            Self::WoodThick => [0.812957883, 0.895329595, 0.941304684, 0.949947298],
            Self::WoodFloor => [0.852366328, 0.898992121, 0.934784114, 0.930052698],
            Self::WoodOnConcrete => [0.959999979, 0.941232264, 0.937923789, 0.930052698],
        }
    }

    /// Builds a material whose absorption reproduces the preset's reflection bands.
    pub fn to_material(self) -> AudioMaterial {
        let mut material = AudioMaterial::new();
        for (freq, reflection) in BAND_FREQUENCIES.iter().zip(self.reflection_bands()) {
            material
                .absorption
                .set(*freq, (1.0 - reflection).clamp(0.0, 1.0));
        }
        material
    }
}

/// Writes the reflection bands of the preset with integer value `preset` into `bands`.
///
/// On failure (unknown preset, or `bands` not exactly [`BAND_COUNT`] long) the
/// whole of `bands` is zeroed and [`SonaraError::InvalidParam`] is returned. The
/// zeros are a deterministic fallback, not valid data.
pub fn get_reflection_bands(preset: i32, bands: &mut [f32]) -> Result<()> {
    let preset = match MaterialPreset::from_index(preset) {
        Some(preset) if bands.len() == BAND_COUNT => preset,
        _ => {
            bands.fill(0.0);
            return Err(SonaraError::invalid(format!(
                "preset {} with {} bands",
                preset,
                bands.len()
            )));
        }
    };
    bands.copy_from_slice(&preset.reflection_bands());
    Ok(())
}

/// The three frequency-dependent material properties.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaterialProperty {
    Absorption = 0,
    Transmission = 1,
    Scattering = 2,
}

impl MaterialProperty {
    pub const ALL: [Self; 3] = [Self::Absorption, Self::Transmission, Self::Scattering];

    pub fn from_index(index: i32) -> Option<Self> {
        usize::try_from(index)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
    }

    /// Value reported for frequencies when nothing has been written.
    pub fn default_value(self) -> f32 {
        match self {
            Self::Absorption => 0.1,
            Self::Transmission => 0.0,
            Self::Scattering => 0.5,
        }
    }
}

/// A property sampled at discrete frequencies.
///
/// Points are kept sorted by frequency. Between points the value is linearly
/// interpolated over log2(frequency); outside the written range the nearest
/// point holds.
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyResponse {
    default: f32,
    points: Vec<(f32, f32)>,
}

impl FrequencyResponse {
    pub fn new(default: f32) -> Self {
        Self {
            default,
            points: Vec::new(),
        }
    }

    /// Writes `value` at `frequency`, replacing any point already there.
    pub fn set(&mut self, frequency: f32, value: f32) {
        match self
            .points
            .binary_search_by(|(f, _)| f.total_cmp(&frequency))
        {
            Ok(i) => self.points[i].1 = value,
            Err(i) => self.points.insert(i, (frequency, value)),
        }
    }

    pub fn evaluate(&self, frequency: f32) -> f32 {
        let (first, last) = match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => return self.default,
        };
        if frequency <= first.0 {
            return first.1;
        }
        if frequency >= last.0 {
            return last.1;
        }
        let upper = self.points.partition_point(|(f, _)| *f < frequency);
        let (f0, v0) = self.points[upper - 1];
        let (f1, v1) = self.points[upper];
        let t = (frequency.log2() - f0.log2()) / (f1.log2() - f0.log2());
        v0 + (v1 - v0) * t
    }

    pub fn reset(&mut self) {
        self.points.clear();
    }

    /// The written (frequency, value) pairs in ascending frequency order.
    pub fn points(&self) -> &[(f32, f32)] {
        &self.points
    }
}

/// Acoustic properties of a surface material.
///
/// # Example
///
/// ```
/// use sonara_core::scene::{AudioMaterial, MaterialProperty};
///
/// let mut curtain = AudioMaterial::new();
/// curtain.set_frequency(MaterialProperty::Absorption, 250.0, 0.3).unwrap();
/// curtain.set_frequency(MaterialProperty::Absorption, 4000.0, 0.7).unwrap();
///
/// let mid = curtain.get_frequency(MaterialProperty::Absorption, 1000.0).unwrap();
/// assert!((mid - 0.5).abs() < 1e-4);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AudioMaterial {
    pub(crate) absorption: FrequencyResponse,
    pub(crate) transmission: FrequencyResponse,
    pub(crate) scattering: FrequencyResponse,
}

impl AudioMaterial {
    pub fn new() -> Self {
        Self {
            absorption: FrequencyResponse::new(MaterialProperty::Absorption.default_value()),
            transmission: FrequencyResponse::new(MaterialProperty::Transmission.default_value()),
            scattering: FrequencyResponse::new(MaterialProperty::Scattering.default_value()),
        }
    }

    pub fn response(&self, property: MaterialProperty) -> &FrequencyResponse {
        match property {
            MaterialProperty::Absorption => &self.absorption,
            MaterialProperty::Transmission => &self.transmission,
            MaterialProperty::Scattering => &self.scattering,
        }
    }

    fn response_mut(&mut self, property: MaterialProperty) -> &mut FrequencyResponse {
        match property {
            MaterialProperty::Absorption => &mut self.absorption,
            MaterialProperty::Transmission => &mut self.transmission,
            MaterialProperty::Scattering => &mut self.scattering,
        }
    }

    /// Writes a property value at one frequency. Values are clamped to [0, 1].
    pub fn set_frequency(
        &mut self,
        property: MaterialProperty,
        frequency: f32,
        value: f32,
    ) -> Result<()> {
        if !(frequency.is_finite() && frequency > 0.0) {
            return Err(SonaraError::invalid(format!("frequency {}", frequency)));
        }
        if !value.is_finite() {
            return Err(SonaraError::invalid(format!("{:?} value {}", property, value)));
        }
        let clamped = value.clamp(0.0, 1.0);
        if clamped != value {
            log::warn!(
                "{:?} value {} at {} Hz clamped to {}",
                property,
                value,
                frequency,
                clamped
            );
        }
        self.response_mut(property).set(frequency, clamped);

        let absorption = self.absorption.evaluate(frequency);
        let transmission = self.transmission.evaluate(frequency);
        if transmission > absorption {
            log::warn!(
                "Material violates energy conservation at {} Hz (absorption {}, transmission {}); it will be renormalized",
                frequency,
                absorption,
                transmission
            );
        }
        Ok(())
    }

    /// Reads a property at one frequency, after energy renormalization.
    pub fn get_frequency(&self, property: MaterialProperty, frequency: f32) -> Result<f32> {
        if !(frequency.is_finite() && frequency > 0.0) {
            return Err(SonaraError::invalid(format!("frequency {}", frequency)));
        }
        Ok(self.evaluate(property, frequency))
    }

    pub(crate) fn evaluate(&self, property: MaterialProperty, frequency: f32) -> f32 {
        match property {
            MaterialProperty::Scattering => self.scattering.evaluate(frequency),
            MaterialProperty::Absorption => self.conserved(frequency).0,
            MaterialProperty::Transmission => self.conserved(frequency).1,
        }
    }

    /// Absorption and transmission at `frequency`, adjusted so that
    /// `1 - absorption + transmission <= 1`. A violating pair is replaced by its mean.
    fn conserved(&self, frequency: f32) -> (f32, f32) {
        let absorption = self.absorption.evaluate(frequency);
        let transmission = self.transmission.evaluate(frequency);
        if transmission > absorption {
            let mean = 0.5 * (absorption + transmission);
            (mean, mean)
        } else {
            (absorption, transmission)
        }
    }

    /// Restores a property to its built-in default.
    pub fn reset(&mut self, property: MaterialProperty) {
        self.response_mut(property).reset();
    }

    /// Energy reflected at each band: `1 - absorption`.
    pub fn reflection_bands(&self) -> ReflectionBands {
        BAND_FREQUENCIES.map(|f| 1.0 - self.conserved(f).0)
    }

    /// Energy transmitted through the surface at each band.
    pub fn transmission_bands(&self) -> ReflectionBands {
        BAND_FREQUENCIES.map(|f| self.conserved(f).1)
    }
}

impl Default for AudioMaterial {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a material owned by a context.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialId(pub(crate) u64);

impl MaterialId {
    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for MaterialId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MaterialId({})", self.0)
    }
}

/// Materials owned by a context, keyed by handle.
#[derive(Debug, Clone, Default)]
pub struct MaterialTable {
    materials: HashMap<MaterialId, AudioMaterial>,
    next_id: u64,
}

impl MaterialTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a material and returns its handle. Handles are never reused.
    pub fn add(&mut self, material: AudioMaterial) -> MaterialId {
        self.next_id += 1;
        let id = MaterialId(self.next_id);
        self.materials.insert(id, material);
        id
    }

    pub fn remove(&mut self, id: MaterialId) -> Result<AudioMaterial> {
        self.materials
            .remove(&id)
            .ok_or_else(|| SonaraError::invalid(format!("unknown {}", id)))
    }

    pub fn get(&self, id: MaterialId) -> Result<&AudioMaterial> {
        self.materials
            .get(&id)
            .ok_or_else(|| SonaraError::invalid(format!("unknown {}", id)))
    }

    pub fn get_mut(&mut self, id: MaterialId) -> Result<&mut AudioMaterial> {
        self.materials
            .get_mut(&id)
            .ok_or_else(|| SonaraError::invalid(format!("unknown {}", id)))
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (MaterialId, &AudioMaterial)> {
        self.materials.iter().map(|(id, m)| (*id, m))
    }
}
