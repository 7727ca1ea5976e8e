//! Chunked binary serialization of geometry over an abstract byte stream.
//!
//! Layout (little-endian): the magic `SNRG`, a `u32` format version, then a
//! sequence of `tag[4] | u64 length | payload` chunks closed by `END `.
//! Readers skip chunks they do not recognize.

use std::io;

use crate::error::{Result, SonaraError};
use crate::math::Vec3;
use crate::scene::geometry::AudioGeometry;
use crate::scene::material::{AudioMaterial, MaterialId, MaterialProperty, MaterialTable};
use crate::scene::mesh::{FaceType, Mesh, MeshGroup};

pub const MAGIC: [u8; 4] = *b"SNRG";
pub const FORMAT_VERSION: u32 = 1;

const TAG_VERTICES: [u8; 4] = *b"VERT";
const TAG_INDICES: [u8; 4] = *b"INDX";
const TAG_GROUPS: [u8; 4] = *b"GRPS";
const TAG_MATERIALS: [u8; 4] = *b"MATS";
const TAG_TRANSFORM: [u8; 4] = *b"XFRM";
const TAG_END: [u8; 4] = *b"END ";

/// Marks a group without a material in `GRPS`.
const NO_MATERIAL: u32 = u32::MAX;

/// Largest chunk payload a reader accepts.
pub const MAX_CHUNK: u64 = 1 << 30;

/// Payloads are read in pieces of this size so a lying length field costs
/// at most one piece of memory before the stream runs dry.
const READ_PIECE: usize = 64 * 1024;

/// A byte stream that geometry is written to or read from.
///
/// Any method may transfer fewer bytes than requested; the engine keeps
/// calling until the request completes or a call returns 0.
pub trait Serializer {
    /// Reads into `buf`, returning the number of bytes read. 0 means error or end of stream.
    fn read(&mut self, buf: &mut [u8]) -> usize;

    /// Writes from `buf`, returning the number of bytes written. 0 means error.
    fn write(&mut self, buf: &[u8]) -> usize;

    /// Moves the cursor by `offset` bytes and returns the displacement achieved.
    /// Streams that cannot seek return 0.
    fn seek(&mut self, _offset: i64) -> i64 {
        0
    }
}

/// Adapts any `std::io` stream to [`Serializer`].
pub struct IoSerializer<T> {
    inner: T,
}

impl<T> IoSerializer<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }
}

impl<T: io::Read + io::Write + io::Seek> Serializer for IoSerializer<T> {
    fn read(&mut self, buf: &mut [u8]) -> usize {
        self.inner.read(buf).unwrap_or(0)
    }

    fn write(&mut self, buf: &[u8]) -> usize {
        self.inner.write(buf).unwrap_or(0)
    }

    fn seek(&mut self, offset: i64) -> i64 {
        let Ok(before) = self.inner.stream_position() else {
            return 0;
        };
        match self.inner.seek(io::SeekFrom::Current(offset)) {
            Ok(after) => after as i64 - before as i64,
            Err(_) => 0,
        }
    }
}

fn write_all(serializer: &mut dyn Serializer, mut buf: &[u8]) -> Result<()> {
    while !buf.is_empty() {
        let written = serializer.write(buf).min(buf.len());
        if written == 0 {
            return Err(SonaraError::Unknown("serializer write failed".into()));
        }
        buf = &buf[written..];
    }
    Ok(())
}

fn read_exact(serializer: &mut dyn Serializer, mut buf: &mut [u8]) -> Result<()> {
    while !buf.is_empty() {
        let read = serializer.read(buf).min(buf.len());
        if read == 0 {
            return Err(SonaraError::invalid("unexpected end of geometry stream"));
        }
        buf = &mut buf[read..];
    }
    Ok(())
}

/// Skips `len` bytes, seeking where possible and reading otherwise.
fn skip(serializer: &mut dyn Serializer, len: u64) -> Result<()> {
    let mut remaining = len;
    while remaining > 0 {
        let step = remaining.min(i64::MAX as u64) as i64;
        let moved = serializer.seek(step);
        if moved <= 0 {
            break;
        }
        remaining = remaining.saturating_sub(moved as u64);
    }

    let mut scratch = [0u8; 256];
    while remaining > 0 {
        let n = remaining.min(scratch.len() as u64) as usize;
        read_exact(serializer, &mut scratch[..n])?;
        remaining -= n as u64;
    }
    Ok(())
}

/// Reads a `len` byte chunk payload, growing the buffer as bytes arrive.
fn read_payload(serializer: &mut dyn Serializer, len: u64) -> Result<Vec<u8>> {
    if len > MAX_CHUNK {
        return Err(SonaraError::invalid(format!(
            "chunk of {} bytes exceeds limit of {}",
            len, MAX_CHUNK
        )));
    }
    let len = usize::try_from(len).map_err(|_| SonaraError::invalid("chunk too large"))?;
    let mut payload = Vec::new();
    while payload.len() < len {
        let start = payload.len();
        let piece = (len - start).min(READ_PIECE);
        payload
            .try_reserve(piece)
            .map_err(|_| SonaraError::invalid(format!("cannot buffer chunk of {} bytes", len)))?;
        payload.resize(start + piece, 0);
        read_exact(serializer, &mut payload[start..])?;
    }
    Ok(payload)
}

#[derive(Default)]
struct ChunkWriter {
    buf: Vec<u8>,
}

impl ChunkWriter {
    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn flush(&mut self, serializer: &mut dyn Serializer, tag: [u8; 4]) -> Result<()> {
        write_all(serializer, &tag)?;
        write_all(serializer, &(self.buf.len() as u64).to_le_bytes())?;
        write_all(serializer, &self.buf)?;
        self.buf.clear();
        Ok(())
    }
}

struct ChunkReader<'a> {
    buf: &'a [u8],
}

impl<'a> ChunkReader<'a> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        if self.buf.len() < N {
            return Err(SonaraError::invalid("truncated chunk payload"));
        }
        let (head, tail) = self.buf.split_at(N);
        self.buf = tail;
        let mut out = [0u8; N];
        out.copy_from_slice(head);
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32> {
        self.take::<4>().map(u32::from_le_bytes)
    }

    fn u64(&mut self) -> Result<u64> {
        self.take::<8>().map(u64::from_le_bytes)
    }

    fn f32(&mut self) -> Result<f32> {
        self.take::<4>().map(f32::from_le_bytes)
    }

    fn usize(&mut self) -> Result<usize> {
        usize::try_from(self.u64()?).map_err(|_| SonaraError::invalid("count exceeds address space"))
    }

    /// Validates a declared element count against the bytes that remain.
    fn count(&mut self, element_size: usize) -> Result<usize> {
        let count = self.usize()?;
        match count.checked_mul(element_size) {
            Some(bytes) if bytes <= self.buf.len() => Ok(count),
            _ => Err(SonaraError::invalid(format!("declared count {} exceeds chunk", count))),
        }
    }
}

/// Writes `geometry` and every material its groups reference.
///
/// Groups whose material no longer exists are written without one, so they
/// read back with the default material.
pub fn write_geometry(
    serializer: &mut dyn Serializer,
    geometry: &AudioGeometry,
    materials: &MaterialTable,
) -> Result<()> {
    let mesh = geometry.mesh();

    // Materials are written once each, in order of first use.
    let mut used: Vec<MaterialId> = Vec::new();
    for group in mesh.groups() {
        if let Some(id) = group.material {
            if used.contains(&id) {
                continue;
            }
            if materials.get(id).is_ok() {
                used.push(id);
            } else {
                log::debug!("{:?} was destroyed; writing its groups without a material", id);
            }
        }
    }
    let resolved = used
        .iter()
        .map(|id| materials.get(*id))
        .collect::<Result<Vec<_>>>()?;

    write_all(serializer, &MAGIC)?;
    write_all(serializer, &FORMAT_VERSION.to_le_bytes())?;

    let mut chunk = ChunkWriter::default();

    chunk.u64(mesh.vertices().len() as u64);
    for v in mesh.vertices() {
        chunk.f32(v.x);
        chunk.f32(v.y);
        chunk.f32(v.z);
    }
    chunk.flush(serializer, TAG_VERTICES)?;

    chunk.u64(mesh.indices().len() as u64);
    for i in mesh.indices() {
        chunk.u32(*i);
    }
    chunk.flush(serializer, TAG_INDICES)?;

    chunk.u64(mesh.groups().len() as u64);
    for group in mesh.groups() {
        chunk.u64(group.index_offset as u64);
        chunk.u64(group.face_count as u64);
        chunk.u32(group.face_type as u32);
        let slot = group
            .material
            .and_then(|id| used.iter().position(|u| *u == id))
            .map_or(NO_MATERIAL, |p| p as u32);
        chunk.u32(slot);
    }
    chunk.flush(serializer, TAG_GROUPS)?;

    chunk.u64(resolved.len() as u64);
    for material in &resolved {
        for property in MaterialProperty::ALL {
            let points = material.response(property).points();
            chunk.u64(points.len() as u64);
            for (frequency, value) in points {
                chunk.f32(*frequency);
                chunk.f32(*value);
            }
        }
    }
    chunk.flush(serializer, TAG_MATERIALS)?;

    for v in geometry.transform() {
        chunk.f32(v);
    }
    chunk.flush(serializer, TAG_TRANSFORM)?;

    chunk.flush(serializer, TAG_END)?;
    log::debug!(
        "Wrote geometry: {} vertices, {} groups, {} materials",
        mesh.vertices().len(),
        mesh.groups().len(),
        resolved.len()
    );
    Ok(())
}

/// Reads a geometry, creating a fresh material in `materials` for each stored one.
///
/// Nothing is added to `materials` unless the whole stream parses.
pub fn read_geometry(
    serializer: &mut dyn Serializer,
    materials: &mut MaterialTable,
) -> Result<AudioGeometry> {
    let mut magic = [0u8; 4];
    read_exact(serializer, &mut magic)?;
    if magic != MAGIC {
        return Err(SonaraError::invalid("not a geometry stream"));
    }
    let mut version = [0u8; 4];
    read_exact(serializer, &mut version)?;
    let version = u32::from_le_bytes(version);
    if version != FORMAT_VERSION {
        return Err(SonaraError::BadVersion {
            expected: FORMAT_VERSION,
            found: version,
        });
    }

    let mut vertices: Vec<Vec3> = Vec::new();
    let mut indices: Vec<u32> = Vec::new();
    let mut groups: Vec<(MeshGroup, u32)> = Vec::new();
    let mut stored: Vec<AudioMaterial> = Vec::new();
    let mut transform: Option<[f32; 16]> = None;

    loop {
        let mut tag = [0u8; 4];
        read_exact(serializer, &mut tag)?;
        let mut len = [0u8; 8];
        read_exact(serializer, &mut len)?;
        let len = u64::from_le_bytes(len);

        if tag == TAG_END {
            skip(serializer, len)?;
            break;
        }
        if ![TAG_VERTICES, TAG_INDICES, TAG_GROUPS, TAG_MATERIALS, TAG_TRANSFORM].contains(&tag) {
            log::debug!("Skipping unknown chunk {:?} ({} bytes)", tag, len);
            skip(serializer, len)?;
            continue;
        }

        let payload = read_payload(serializer, len)?;
        let mut r = ChunkReader { buf: &payload };

        match tag {
            TAG_VERTICES => {
                let count = r.count(12)?;
                vertices = (0..count)
                    .map(|_| -> Result<Vec3> { Ok(Vec3::new(r.f32()?, r.f32()?, r.f32()?)) })
                    .collect::<Result<_>>()?;
            }
            TAG_INDICES => {
                let count = r.count(4)?;
                indices = (0..count).map(|_| r.u32()).collect::<Result<_>>()?;
            }
            TAG_GROUPS => {
                let count = r.count(24)?;
                groups = (0..count)
                    .map(|_| -> Result<(MeshGroup, u32)> {
                        let index_offset = r.usize()?;
                        let face_count = r.usize()?;
                        let face_type = FaceType::from_index(r.u32()? as i32)
                            .ok_or_else(|| SonaraError::invalid("unknown face type"))?;
                        let slot = r.u32()?;
                        let group = MeshGroup {
                            index_offset,
                            face_count,
                            face_type,
                            material: None,
                        };
                        Ok((group, slot))
                    })
                    .collect::<Result<_>>()?;
            }
            TAG_MATERIALS => {
                let count = r.count(MaterialProperty::ALL.len() * 8)?;
                stored = (0..count)
                    .map(|_| -> Result<AudioMaterial> {
                        let mut material = AudioMaterial::new();
                        for property in MaterialProperty::ALL {
                            let points = r.count(8)?;
                            for _ in 0..points {
                                let frequency = r.f32()?;
                                let value = r.f32()?;
                                material.set_frequency(property, frequency, value)?;
                            }
                        }
                        Ok(material)
                    })
                    .collect::<Result<_>>()?;
            }
            _ => {
                let mut m = [0f32; 16];
                for v in &mut m {
                    *v = r.f32()?;
                }
                transform = Some(m);
            }
        }
    }

    if let Some((_, slot)) = groups
        .iter()
        .find(|(_, slot)| *slot != NO_MATERIAL && *slot as usize >= stored.len())
    {
        return Err(SonaraError::invalid(format!("group references missing material {}", slot)));
    }
    // Validate the mesh before registering any material.
    let mut mesh = Mesh::from_parts(vertices, indices, groups.iter().map(|(g, _)| *g).collect())?;
    let mut geometry = AudioGeometry::new();
    if let Some(m) = transform {
        geometry.set_transform(&m)?;
    }

    let ids: Vec<MaterialId> = stored.into_iter().map(|m| materials.add(m)).collect();
    for (group, (_, slot)) in mesh.groups.iter_mut().zip(&groups) {
        group.material = ids.get(*slot as usize).copied();
    }
    geometry.upload(mesh, materials)?;

    log::debug!(
        "Read geometry: {} faces, {} new materials",
        geometry.face_count(),
        ids.len()
    );
    Ok(geometry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::material::MaterialPreset;
    use std::io::Cursor;

    fn sample(materials: &mut MaterialTable) -> AudioGeometry {
        let mut felt = AudioMaterial::new();
        felt.set_frequency(MaterialProperty::Absorption, 250.0, 0.6).unwrap();
        felt.set_frequency(MaterialProperty::Scattering, 1000.0, 0.8).unwrap();
        let felt = materials.add(felt);
        let tile = materials.add(MaterialPreset::CeramicTile.to_material());

        let mesh = Mesh::from_parts(
            vec![
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(1.0, 1.0, 0.0),
                Vec3::new(0.0, 1.0, 0.0),
                Vec3::new(0.0, 0.0, 1.0),
            ],
            vec![0, 1, 2, 3, 0, 1, 4],
            vec![
                MeshGroup {
                    index_offset: 0,
                    face_count: 1,
                    face_type: FaceType::Quads,
                    material: Some(felt),
                },
                MeshGroup {
                    index_offset: 4,
                    face_count: 1,
                    face_type: FaceType::Triangles,
                    material: Some(tile),
                },
            ],
        )
        .unwrap();
        let mut geometry = AudioGeometry::new();
        geometry.upload(mesh, materials).unwrap();
        geometry
            .set_transform(&crate::math::Mat4::from_rotation_y(0.5).to_cols_array())
            .unwrap();
        geometry
    }

    /// Hands out at most `chunk` bytes per call and cannot seek.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        chunk: usize,
    }

    impl Serializer for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> usize {
            let n = buf.len().min(self.chunk).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            n
        }

        fn write(&mut self, buf: &[u8]) -> usize {
            let n = buf.len().min(self.chunk);
            self.data.extend_from_slice(&buf[..n]);
            n
        }
    }

    #[test]
    fn test_roundtrip_preserves_topology_and_materials() {
        let mut materials = MaterialTable::new();
        let geometry = sample(&mut materials);

        let mut stream = IoSerializer::new(Cursor::new(Vec::new()));
        write_geometry(&mut stream, &geometry, &materials).unwrap();

        let mut readback = IoSerializer::new(Cursor::new(stream.into_inner().into_inner()));
        let mut fresh = MaterialTable::new();
        let restored = read_geometry(&mut readback, &mut fresh).unwrap();

        assert_eq!(restored.mesh().vertices(), geometry.mesh().vertices());
        assert_eq!(restored.mesh().indices(), geometry.mesh().indices());
        assert_eq!(restored.transform(), geometry.transform());
        assert_eq!(fresh.len(), 2);

        for (old, new) in geometry.mesh().groups().iter().zip(restored.mesh().groups()) {
            assert_eq!(old.index_offset, new.index_offset);
            assert_eq!(old.face_count, new.face_count);
            assert_eq!(old.face_type, new.face_type);
            let old_mat = materials.get(old.material.unwrap()).unwrap();
            let new_mat = fresh.get(new.material.unwrap()).unwrap();
            assert_eq!(old_mat, new_mat);
        }
    }

    #[test]
    fn test_partial_transfers_are_retried() {
        let mut materials = MaterialTable::new();
        let geometry = sample(&mut materials);

        let mut sink = Trickle {
            data: Vec::new(),
            pos: 0,
            chunk: 3,
        };
        write_geometry(&mut sink, &geometry, &materials).unwrap();
        assert_eq!(&sink.data[..4], b"SNRG");

        let mut fresh = MaterialTable::new();
        let restored = read_geometry(&mut sink, &mut fresh).unwrap();
        assert_eq!(restored.mesh().indices(), geometry.mesh().indices());
    }

    fn stream_with_unknown_chunk() -> Vec<u8> {
        let mut materials = MaterialTable::new();
        let geometry = sample(&mut materials);
        let mut stream = IoSerializer::new(Cursor::new(Vec::new()));
        write_geometry(&mut stream, &geometry, &materials).unwrap();
        let bytes = stream.into_inner().into_inner();

        let mut spliced = bytes[..8].to_vec();
        spliced.extend_from_slice(b"XTRA");
        spliced.extend_from_slice(&5u64.to_le_bytes());
        spliced.extend_from_slice(&[9, 9, 9, 9, 9]);
        spliced.extend_from_slice(&bytes[8..]);
        spliced
    }

    #[test]
    fn test_unknown_chunk_skipped_with_and_without_seek() {
        let spliced = stream_with_unknown_chunk();

        let mut seekable = IoSerializer::new(Cursor::new(spliced.clone()));
        let mut fresh = MaterialTable::new();
        assert!(read_geometry(&mut seekable, &mut fresh).is_ok());

        let mut sequential = Trickle {
            data: spliced,
            pos: 0,
            chunk: 64,
        };
        let mut fresh = MaterialTable::new();
        assert!(read_geometry(&mut sequential, &mut fresh).is_ok());
    }

    #[test]
    fn test_bad_header() {
        let mut materials = MaterialTable::new();

        let mut wrong_magic = IoSerializer::new(Cursor::new(b"NOPE\x01\x00\x00\x00".to_vec()));
        let err = read_geometry(&mut wrong_magic, &mut materials).unwrap_err();
        assert!(matches!(err, SonaraError::InvalidParam(_)));

        let mut wrong_version = IoSerializer::new(Cursor::new(b"SNRG\x07\x00\x00\x00".to_vec()));
        let err = read_geometry(&mut wrong_version, &mut materials).unwrap_err();
        assert!(matches!(err, SonaraError::BadVersion { found: 7, .. }));
        assert!(materials.is_empty());
    }

    #[test]
    fn test_oversized_chunk_length_is_rejected() {
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&TAG_VERTICES);
        bytes.extend_from_slice(&(1u64 << 46).to_le_bytes());

        let mut materials = MaterialTable::new();
        let mut stream = IoSerializer::new(Cursor::new(bytes));
        let err = read_geometry(&mut stream, &mut materials).unwrap_err();
        assert!(matches!(err, SonaraError::InvalidParam(_)));
        assert!(materials.is_empty());
    }

    #[test]
    fn test_chunk_length_past_end_of_stream_fails() {
        // Under the limit but far more than the stream holds.
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&TAG_INDICES);
        bytes.extend_from_slice(&MAX_CHUNK.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 16]);

        let mut materials = MaterialTable::new();
        let mut stream = IoSerializer::new(Cursor::new(bytes));
        let err = read_geometry(&mut stream, &mut materials).unwrap_err();
        assert!(matches!(err, SonaraError::InvalidParam(_)));
    }

    #[test]
    fn test_write_after_material_destroyed() {
        let mut materials = MaterialTable::new();
        let geometry = sample(&mut materials);
        let felt = geometry.mesh().groups()[0].material.unwrap();
        materials.remove(felt).unwrap();

        let mut stream = IoSerializer::new(Cursor::new(Vec::new()));
        write_geometry(&mut stream, &geometry, &materials).unwrap();

        let mut readback = IoSerializer::new(Cursor::new(stream.into_inner().into_inner()));
        let mut fresh = MaterialTable::new();
        let restored = read_geometry(&mut readback, &mut fresh).unwrap();
        let groups = restored.mesh().groups();
        assert_eq!(groups[0].material, None);
        assert!(groups[1].material.is_some());
        assert_eq!(fresh.len(), 1);
    }

    #[test]
    fn test_truncated_stream_adds_no_materials() {
        let mut materials = MaterialTable::new();
        let geometry = sample(&mut materials);
        let mut stream = IoSerializer::new(Cursor::new(Vec::new()));
        write_geometry(&mut stream, &geometry, &materials).unwrap();
        let mut bytes = stream.into_inner().into_inner();
        bytes.truncate(bytes.len() - 6);

        let mut fresh = MaterialTable::new();
        let mut truncated = IoSerializer::new(Cursor::new(bytes));
        assert!(read_geometry(&mut truncated, &mut fresh).is_err());
        assert!(fresh.is_empty());
    }
}
