//! Acoustic scene description: materials, meshes, geometry and ray casting.
//!
//! # Overview
//!
//! 1. **AudioMaterial** - frequency-dependent absorption, transmission and scattering
//! 2. **AudioGeometry** - a mesh with per-group materials and a world transform
//! 3. **RayCaster** - scene queries used by room estimation; implemented by
//!    callers for dynamic room modeling and by [`PropagationScene`] for
//!    geometry-based propagation
//! 4. **Serializer** - byte streams for saving and restoring geometry

pub mod geometry;
pub mod material;
pub mod mesh;
pub mod ray_caster;
pub mod serialize;

pub use geometry::{AudioGeometry, GeometryId, GeometryTable, PropagationScene};
pub use material::{
    AudioMaterial, BAND_COUNT, BAND_FREQUENCIES, FrequencyResponse, MaterialId, MaterialPreset,
    MaterialProperty, MaterialTable, ReflectionBands, get_reflection_bands,
};
pub use mesh::{FaceType, Mesh, MeshDesc, MeshGroup, MeshIndices, MeshVertices, ScalarType};
pub use ray_caster::{RayCaster, RayHit};
pub use serialize::{IoSerializer, Serializer, read_geometry, write_geometry};
