//! Mesh descriptors and decoding of typed, strided vertex and index buffers.

use crate::error::{Result, SonaraError};
use crate::math::Vec3;
use crate::scene::material::MaterialId;

/// Primitive types accepted for vertex and index data. All data is little-endian.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Int8 = 0,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float16,
    Float32,
    Float64,
}

impl ScalarType {
    pub const ALL: [Self; 11] = [
        Self::Int8,
        Self::UInt8,
        Self::Int16,
        Self::UInt16,
        Self::Int32,
        Self::UInt32,
        Self::Int64,
        Self::UInt64,
        Self::Float16,
        Self::Float32,
        Self::Float64,
    ];

    pub fn from_index(index: i32) -> Option<Self> {
        usize::try_from(index)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
    }

    /// Size of one value in bytes.
    pub fn size(self) -> usize {
        match self {
            Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 | Self::Float16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 => 8,
        }
    }

    pub fn is_integer(self) -> bool {
        !matches!(self, Self::Float16 | Self::Float32 | Self::Float64)
    }

    /// Reads one value as a float. `bytes` must be exactly `self.size()` long.
    fn read_f64(self, bytes: &[u8]) -> f64 {
        match self {
            Self::Int8 => i8::from_le_bytes([bytes[0]]) as f64,
            Self::UInt8 => bytes[0] as f64,
            Self::Int16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f64,
            Self::UInt16 => u16::from_le_bytes([bytes[0], bytes[1]]) as f64,
            Self::Float16 => f16_to_f32(u16::from_le_bytes([bytes[0], bytes[1]])) as f64,
            Self::Int32 => i32::from_le_bytes(le4(bytes)) as f64,
            Self::UInt32 => u32::from_le_bytes(le4(bytes)) as f64,
            Self::Float32 => f32::from_le_bytes(le4(bytes)) as f64,
            Self::Int64 => i64::from_le_bytes(le8(bytes)) as f64,
            Self::UInt64 => u64::from_le_bytes(le8(bytes)) as f64,
            Self::Float64 => f64::from_le_bytes(le8(bytes)),
        }
    }

    /// Reads one integer index, rejecting negative values.
    fn read_index(self, bytes: &[u8]) -> Option<u64> {
        match self {
            Self::Int8 => u64::try_from(i8::from_le_bytes([bytes[0]])).ok(),
            Self::UInt8 => Some(bytes[0] as u64),
            Self::Int16 => u64::try_from(i16::from_le_bytes([bytes[0], bytes[1]])).ok(),
            Self::UInt16 => Some(u16::from_le_bytes([bytes[0], bytes[1]]) as u64),
            Self::Int32 => u64::try_from(i32::from_le_bytes(le4(bytes))).ok(),
            Self::UInt32 => Some(u32::from_le_bytes(le4(bytes)) as u64),
            Self::Int64 => u64::try_from(i64::from_le_bytes(le8(bytes))).ok(),
            Self::UInt64 => Some(u64::from_le_bytes(le8(bytes))),
            Self::Float16 | Self::Float32 | Self::Float64 => None,
        }
    }
}

fn le4(bytes: &[u8]) -> [u8; 4] {
    [bytes[0], bytes[1], bytes[2], bytes[3]]
}

fn le8(bytes: &[u8]) -> [u8; 8] {
    [
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]
}

/// IEEE 754 binary16 to f32.
fn f16_to_f32(bits: u16) -> f32 {
    let sign = if bits & 0x8000 != 0 { -1.0 } else { 1.0 };
    let exponent = ((bits >> 10) & 0x1f) as i32;
    let mantissa = (bits & 0x3ff) as f32;
    match exponent {
        0 => sign * mantissa * 2f32.powi(-24),
        0x1f if mantissa == 0.0 => sign * f32::INFINITY,
        0x1f => f32::NAN,
        _ => sign * (1.0 + mantissa / 1024.0) * 2f32.powi(exponent - 15),
    }
}

/// Face type of a mesh group. Vertices are counter-clockwise seen from the front.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaceType {
    Triangles = 0,
    /// Four coplanar vertices per face
    Quads = 1,
}

impl FaceType {
    pub fn from_index(index: i32) -> Option<Self> {
        match index {
            0 => Some(Self::Triangles),
            1 => Some(Self::Quads),
            _ => None,
        }
    }

    pub fn vertices_per_face(self) -> usize {
        match self {
            Self::Triangles => 3,
            Self::Quads => 4,
        }
    }
}

/// Vertex data for a mesh upload.
#[derive(Debug, Clone, Copy)]
pub struct MeshVertices<'a> {
    /// Raw vertex buffer
    pub data: &'a [u8],
    /// Offset in bytes of the first vertex
    pub byte_offset: usize,
    pub vertex_count: usize,
    /// Bytes between consecutive vertices; 0 means tightly packed
    pub vertex_stride: usize,
    /// Type of each of the 3 coordinates of a vertex
    pub vertex_type: ScalarType,
}

/// Index data for a mesh upload.
#[derive(Debug, Clone, Copy)]
pub struct MeshIndices<'a> {
    pub data: &'a [u8],
    pub byte_offset: usize,
    pub index_count: usize,
    /// Must be an integer type
    pub index_type: ScalarType,
}

/// A run of faces sharing one material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshGroup {
    /// Position in the index buffer (in indices, not bytes) of the group's first index
    pub index_offset: usize,
    pub face_count: usize,
    pub face_type: FaceType,
    /// Material for the group; `None` uses the default material
    pub material: Option<MaterialId>,
}

impl MeshGroup {
    pub fn index_count(&self) -> usize {
        self.face_count * self.face_type.vertices_per_face()
    }
}

/// A complete mesh upload descriptor.
#[derive(Debug, Clone, Copy)]
pub struct MeshDesc<'a> {
    pub vertices: MeshVertices<'a>,
    pub indices: MeshIndices<'a>,
    pub groups: &'a [MeshGroup],
}

/// A decoded, validated mesh in object space.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    pub(crate) vertices: Vec<Vec3>,
    pub(crate) indices: Vec<u32>,
    pub(crate) groups: Vec<MeshGroup>,
}

impl Mesh {
    /// Builds a mesh from already-decoded parts, checking every group and index.
    pub fn from_parts(vertices: Vec<Vec3>, indices: Vec<u32>, groups: Vec<MeshGroup>) -> Result<Self> {
        for (i, group) in groups.iter().enumerate() {
            let end = group
                .index_count()
                .checked_add(group.index_offset)
                .ok_or_else(|| SonaraError::invalid(format!("group {} overflows", i)))?;
            if end > indices.len() {
                return Err(SonaraError::invalid(format!(
                    "group {} reads indices {}..{} but only {} exist",
                    i,
                    group.index_offset,
                    end,
                    indices.len()
                )));
            }
        }
        if let Some(bad) = indices.iter().find(|&&i| i as usize >= vertices.len()) {
            return Err(SonaraError::invalid(format!(
                "index {} out of range for {} vertices",
                bad,
                vertices.len()
            )));
        }
        if vertices.iter().any(|v| !v.is_finite()) {
            return Err(SonaraError::invalid("non-finite vertex coordinate"));
        }
        Ok(Self {
            vertices,
            indices,
            groups,
        })
    }

    /// Decodes the typed buffers described by `desc`.
    pub fn decode(desc: &MeshDesc<'_>) -> Result<Self> {
        let vertices = decode_vertices(&desc.vertices)?;
        let indices = decode_indices(&desc.indices)?;
        Self::from_parts(vertices, indices, desc.groups.to_vec())
    }

    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn groups(&self) -> &[MeshGroup] {
        &self.groups
    }

    pub fn face_count(&self) -> usize {
        self.groups.iter().map(|g| g.face_count).sum()
    }

    /// Every face as its vertex indices, with the index of its group.
    pub fn faces(&self) -> impl Iterator<Item = (usize, &[u32])> + '_ {
        self.groups.iter().enumerate().flat_map(move |(group_index, group)| {
            let per_face = group.face_type.vertices_per_face();
            let start = group.index_offset;
            self.indices[start..start + group.index_count()]
                .chunks_exact(per_face)
                .map(move |face| (group_index, face))
        })
    }
}

fn checked_span(offset: usize, count: usize, stride: usize, item: usize) -> Option<usize> {
    match count {
        0 => Some(offset),
        _ => (count - 1)
            .checked_mul(stride)?
            .checked_add(offset)?
            .checked_add(item),
    }
}

fn decode_vertices(desc: &MeshVertices<'_>) -> Result<Vec<Vec3>> {
    let size = desc.vertex_type.size();
    let vertex_size = size * 3;
    let stride = match desc.vertex_stride {
        0 => vertex_size,
        s if s < vertex_size => {
            return Err(SonaraError::invalid(format!(
                "vertex stride {} smaller than vertex size {}",
                s, vertex_size
            )));
        }
        s => s,
    };
    let end = checked_span(desc.byte_offset, desc.vertex_count, stride, vertex_size)
        .ok_or_else(|| SonaraError::invalid("vertex buffer size overflows"))?;
    if end > desc.data.len() {
        return Err(SonaraError::invalid(format!(
            "vertex buffer needs {} bytes, has {}",
            end,
            desc.data.len()
        )));
    }

    Ok((0..desc.vertex_count)
        .map(|i| {
            let base = desc.byte_offset + i * stride;
            let coord = |c: usize| {
                let at = base + c * size;
                desc.vertex_type.read_f64(&desc.data[at..at + size]) as f32
            };
            Vec3::new(coord(0), coord(1), coord(2))
        })
        .collect())
}

fn decode_indices(desc: &MeshIndices<'_>) -> Result<Vec<u32>> {
    if !desc.index_type.is_integer() {
        return Err(SonaraError::invalid(format!(
            "index type {:?} is not an integer type",
            desc.index_type
        )));
    }
    let size = desc.index_type.size();
    let end = checked_span(desc.byte_offset, desc.index_count, size, size)
        .ok_or_else(|| SonaraError::invalid("index buffer size overflows"))?;
    if end > desc.data.len() {
        return Err(SonaraError::invalid(format!(
            "index buffer needs {} bytes, has {}",
            end,
            desc.data.len()
        )));
    }

    desc.data[desc.byte_offset..end]
        .chunks_exact(size)
        .map(|bytes| {
            desc.index_type
                .read_index(bytes)
                .and_then(|i| u32::try_from(i).ok())
                .ok_or_else(|| SonaraError::invalid("index is negative or exceeds u32"))
        })
        .collect()
}

/// Little-endian bytes of a float slice, for building [`MeshVertices`].
pub fn f32_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Little-endian bytes of a u32 slice, for building [`MeshIndices`].
pub fn u32_bytes(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}
