//! Geometry handles and the immutable world-space scene used for propagation.

use std::collections::HashMap;
use std::fmt;

use crate::error::{Result, SonaraError};
use crate::math::{Mat4, Vec3};
use crate::scene::material::{AudioMaterial, MaterialTable, ReflectionBands};
use crate::scene::mesh::Mesh;
use crate::scene::ray_caster::{RayCaster, RayHit};

/// Handle to a geometry owned by a context.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeometryId(pub(crate) u64);

impl GeometryId {
    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for GeometryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GeometryId({})", self.0)
    }
}

/// A mesh plus its object-to-world transform.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioGeometry {
    mesh: Mesh,
    transform: Mat4,
}

impl AudioGeometry {
    pub fn new() -> Self {
        Self {
            mesh: Mesh::default(),
            transform: Mat4::IDENTITY,
        }
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    /// Replaces the mesh. Every group material must exist in `materials`.
    pub fn upload(&mut self, mesh: Mesh, materials: &MaterialTable) -> Result<()> {
        for group in mesh.groups() {
            if let Some(id) = group.material {
                materials.get(id)?;
            }
        }
        self.mesh = mesh;
        Ok(())
    }

    /// Sets the column-major object-to-world transform.
    pub fn set_transform(&mut self, matrix: &[f32; 16]) -> Result<()> {
        if matrix.iter().any(|v| !v.is_finite()) {
            return Err(SonaraError::invalid("transform contains non-finite values"));
        }
        self.transform = Mat4::from_cols_array(matrix);
        Ok(())
    }

    pub fn transform(&self) -> [f32; 16] {
        self.transform.to_cols_array()
    }

    pub fn face_count(&self) -> usize {
        self.mesh.face_count()
    }
}

impl Default for AudioGeometry {
    fn default() -> Self {
        Self::new()
    }
}

/// Geometries owned by a context, keyed by handle.
#[derive(Debug, Clone, Default)]
pub struct GeometryTable {
    geometries: HashMap<GeometryId, AudioGeometry>,
    next_id: u64,
}

impl GeometryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, geometry: AudioGeometry) -> GeometryId {
        self.next_id += 1;
        let id = GeometryId(self.next_id);
        self.geometries.insert(id, geometry);
        id
    }

    pub fn remove(&mut self, id: GeometryId) -> Result<AudioGeometry> {
        self.geometries
            .remove(&id)
            .ok_or_else(|| SonaraError::invalid(format!("unknown {}", id)))
    }

    pub fn get(&self, id: GeometryId) -> Result<&AudioGeometry> {
        self.geometries
            .get(&id)
            .ok_or_else(|| SonaraError::invalid(format!("unknown {}", id)))
    }

    pub fn get_mut(&mut self, id: GeometryId) -> Result<&mut AudioGeometry> {
        self.geometries
            .get_mut(&id)
            .ok_or_else(|| SonaraError::invalid(format!("unknown {}", id)))
    }

    pub fn len(&self) -> usize {
        self.geometries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.geometries.is_empty()
    }

    /// Total face count over all geometries.
    pub fn face_count(&self) -> usize {
        self.geometries.values().map(AudioGeometry::face_count).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (GeometryId, &AudioGeometry)> {
        self.geometries.iter().map(|(id, g)| (*id, g))
    }
}

#[derive(Debug, Clone, Copy)]
struct Triangle {
    origin: Vec3,
    edge1: Vec3,
    edge2: Vec3,
    normal: Vec3,
    reflection_bands: ReflectionBands,
}

const EPSILON: f32 = 1e-7;

impl Triangle {
    fn new(a: Vec3, b: Vec3, c: Vec3, reflection_bands: ReflectionBands) -> Option<Self> {
        let edge1 = b - a;
        let edge2 = c - a;
        let normal = edge1.cross(edge2).try_normalize()?;
        Some(Self {
            origin: a,
            edge1,
            edge2,
            normal,
            reflection_bands,
        })
    }

    /// Möller–Trumbore; returns the distance along `direction`.
    fn intersect(&self, origin: Vec3, direction: Vec3) -> Option<f32> {
        let p = direction.cross(self.edge2);
        let det = self.edge1.dot(p);
        if det.abs() < EPSILON {
            return None;
        }
        let inv_det = 1.0 / det;
        let s = origin - self.origin;
        let u = s.dot(p) * inv_det;
        if !(0.0..=1.0).contains(&u) {
            return None;
        }
        let q = s.cross(self.edge1);
        let v = direction.dot(q) * inv_det;
        if v < 0.0 || u + v > 1.0 {
            return None;
        }
        let t = self.edge2.dot(q) * inv_det;
        (t > EPSILON).then_some(t)
    }
}

/// World-space triangles of every geometry, frozen at build time.
///
/// The estimator worker holds this behind an `Arc`, so destroying geometry on
/// the context never invalidates a ray cast already in flight.
#[derive(Debug, Clone, Default)]
pub struct PropagationScene {
    triangles: Vec<Triangle>,
}

impl PropagationScene {
    /// Flattens the geometries, splitting quads into two triangles.
    ///
    /// Groups whose material has since been destroyed fall back to the
    /// default material.
    pub fn build(geometries: &GeometryTable, materials: &MaterialTable) -> Self {
        let fallback = AudioMaterial::default().reflection_bands();
        let mut triangles = Vec::new();

        for (_, geometry) in geometries.iter() {
            let mesh = geometry.mesh();
            let world: Vec<Vec3> = mesh
                .vertices()
                .iter()
                .map(|v| geometry.transform.transform_point3(*v))
                .collect();
            for (group_index, face) in mesh.faces() {
                let bands = mesh.groups()[group_index]
                    .material
                    .and_then(|id| materials.get(id).ok())
                    .map(AudioMaterial::reflection_bands)
                    .unwrap_or(fallback);
                let corner = |i: usize| world[face[i] as usize];
                triangles.extend(Triangle::new(corner(0), corner(1), corner(2), bands));
                if face.len() == 4 {
                    triangles.extend(Triangle::new(corner(0), corner(2), corner(3), bands));
                }
            }
        }

        Self { triangles }
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }
}

impl RayCaster for PropagationScene {
    fn cast_ray(&self, origin: Vec3, direction: Vec3) -> Option<RayHit> {
        let (t, triangle) = self
            .triangles
            .iter()
            .filter_map(|tri| tri.intersect(origin, direction).map(|t| (t, tri)))
            .min_by(|a, b| a.0.total_cmp(&b.0))?;

        // Report the normal on the side the ray came from.
        let normal = if triangle.normal.dot(direction) > 0.0 {
            -triangle.normal
        } else {
            triangle.normal
        };
        Some(RayHit::new(origin + direction * t, normal, triangle.reflection_bands))
    }
}
