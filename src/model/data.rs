//! On-disk model records and the fix-up of both model artifacts.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};

use super::material::Material;
use crate::io::AlignedBlock;
use crate::serial::{ArtifactHeader, ArtifactKind, BinaryReader, Span};
use crate::util::{AxisAlignedBox, BoundingSphere, Error, Hash32, Result, Vec2, Vec3, Vec4};

/// Artifact type of the metadata half.
pub const MODEL_DATA_TYPE: &str = "ModelResource";
/// Artifact type of the geometry half.
pub const MODEL_GEOMETRY_DATA_TYPE: &str = "ModelGeometryResource";
/// Shared by both halves; bumping it invalidates both together.
pub const MODEL_DATA_VERSION: u64 = 1536952591;
/// Alignment of every pointer block in both artifacts.
pub const MODEL_DATA_ALIGNMENT: usize = 16;

const _: () = assert!(MODEL_DATA_ALIGNMENT.is_power_of_two() && MODEL_DATA_ALIGNMENT % 4 == 0);

/// Index buffers are split by face arity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum MeshIndexType {
    Triangle = 0,
    Quad = 1,
}

pub const MESH_INDEX_TYPE_COUNT: usize = 2;

impl MeshIndexType {
    pub const ALL: [Self; MESH_INDEX_TYPE_COUNT] = [Self::Triangle, Self::Quad];

    #[inline]
    pub const fn indices_per_face(self) -> u32 {
        match self {
            Self::Triangle => 3,
            Self::Quad => 4,
        }
    }

    pub fn from_indices_per_face(n: u32) -> Option<Self> {
        match n {
            3 => Some(Self::Triangle),
            4 => Some(Self::Quad),
            _ => None,
        }
    }
}

/// Camera stored with the scene (48 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CameraSettings {
    pub position: Vec3,
    pub fov: f32,
    pub look_at: Vec3,
    pub znear: f32,
    pub up: Vec3,
    pub zfar: f32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 5.0),
            fov: 0.785_398,
            look_at: Vec3::ZERO,
            znear: 0.1,
            up: Vec3::Y,
            zfar: 500.0,
        }
    }
}

/// Per-mesh record. Index offsets count elements of the mesh's own index-type buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct MeshMetaData {
    pub index_count: u32,
    pub index_offset: u32,
    pub vertex_count: u32,
    pub vertex_offset: u32,
    pub material_hash: Hash32,
    pub indices_per_face: u32,
    pub mesh_name_hash: Hash32,
}

impl MeshMetaData {
    #[inline]
    pub fn index_type(&self) -> Option<MeshIndexType> {
        MeshIndexType::from_indices_per_face(self.indices_per_face)
    }

    #[inline]
    pub fn face_count(&self) -> u32 {
        self.index_count / self.indices_per_face.max(1)
    }
}

/// Per-curve record. `index_count` segment starts at `index_offset`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct CurveMetaData {
    pub index_offset: u32,
    pub index_count: u32,
    pub name_hash: Hash32,
}

/// Fixed-up metadata artifact.
pub struct ModelResourceData {
    block: AlignedBlock,
    pub aa_box: AxisAlignedBox,
    pub bounding_sphere: BoundingSphere,
    pub total_vertex_count: u32,
    pub total_curve_vertex_count: u32,
    pub index_counts: [u32; MESH_INDEX_TYPE_COUNT],
    pub texture_resource_names: Vec<String>,
    cameras: Span<CameraSettings>,
    materials: Span<Material>,
    material_hashes: Span<Hash32>,
    meshes: Span<MeshMetaData>,
    curves: Span<CurveMetaData>,
}

impl ModelResourceData {
    /// Validate the header and resolve every pointer field of a loaded metadata block.
    pub fn attach(block: AlignedBlock) -> Result<Self> {
        let mut reader = BinaryReader::attach(&block, 0);
        ArtifactHeader::read_expected(
            &mut reader,
            ArtifactHeader::new(ArtifactKind::Metadata, MODEL_DATA_VERSION),
        )?;

        let aa_box = reader.read_pod::<AxisAlignedBox>()?;
        let bounding_sphere = reader.read_pod::<BoundingSphere>()?;
        let total_vertex_count = reader.read_u32()?;
        let total_curve_vertex_count = reader.read_u32()?;
        let mut index_counts = [0u32; MESH_INDEX_TYPE_COUNT];
        for count in &mut index_counts {
            *count = reader.read_u32()?;
        }
        let texture_count = reader.read_u32()?;

        let cameras = reader.read_slice::<CameraSettings>(MODEL_DATA_ALIGNMENT)?;
        let texture_table = reader.read_block(MODEL_DATA_ALIGNMENT)?;
        let materials = reader.read_slice::<Material>(MODEL_DATA_ALIGNMENT)?;
        let material_hashes = reader.read_slice::<Hash32>(MODEL_DATA_ALIGNMENT)?;
        let meshes = reader.read_slice::<MeshMetaData>(MODEL_DATA_ALIGNMENT)?;
        let curves = reader.read_slice::<CurveMetaData>(MODEL_DATA_ALIGNMENT)?;

        let texture_resource_names = read_name_table(texture_table.bytes(&block), texture_count)?;

        let data = Self {
            aa_box,
            bounding_sphere,
            total_vertex_count,
            total_curve_vertex_count,
            index_counts,
            texture_resource_names,
            cameras,
            materials,
            material_hashes,
            meshes,
            curves,
            block,
        };
        data.validate()?;
        Ok(data)
    }

    fn validate(&self) -> Result<()> {
        if self.materials.len() != self.material_hashes.len() {
            return Err(Error::inconsistent(format!(
                "{} materials but {} material hashes",
                self.materials.len(),
                self.material_hashes.len()
            )));
        }
        if !self.material_hashes().windows(2).all(|w| w[0] < w[1]) {
            return Err(Error::inconsistent("material hashes are not sorted"));
        }
        Ok(())
    }

    pub fn cameras(&self) -> &[CameraSettings] {
        self.cameras.slice(&self.block)
    }

    pub fn materials(&self) -> &[Material] {
        self.materials.slice(&self.block)
    }

    pub fn material_hashes(&self) -> &[Hash32] {
        self.material_hashes.slice(&self.block)
    }

    pub fn meshes(&self) -> &[MeshMetaData] {
        self.meshes.slice(&self.block)
    }

    pub fn curves(&self) -> &[CurveMetaData] {
        self.curves.slice(&self.block)
    }

    /// Raw artifact bytes.
    pub fn block(&self) -> &AlignedBlock {
        &self.block
    }
}

impl std::fmt::Debug for ModelResourceData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelResourceData")
            .field("aa_box", &self.aa_box)
            .field("total_vertex_count", &self.total_vertex_count)
            .field("meshes", &self.meshes.len())
            .field("curves", &self.curves.len())
            .field("materials", &self.materials.len())
            .field("textures", &self.texture_resource_names.len())
            .finish()
    }
}

/// Parse `count` entries of `[len u32][utf-8 bytes]`.
fn read_name_table(bytes: &[u8], count: u32) -> Result<Vec<String>> {
    let mut reader = BinaryReader::attach(bytes, 0);
    (0..count)
        .map(|_| {
            let len = reader.read_u32()? as usize;
            Ok(String::from_utf8(reader.take(len)?.to_vec())?)
        })
        .collect()
}

/// Fixed-up geometry artifact.
///
/// The block is shared with the acceleration backend, which binds these
/// buffers in place.
pub struct ModelGeometryData {
    block: Arc<AlignedBlock>,
    indices: [Span<u32>; MESH_INDEX_TYPE_COUNT],
    face_index_counts: Span<u32>,
    positions: Span<Vec3>,
    normals: Span<Vec3>,
    tangents: Span<Vec4>,
    uvs: Span<Vec2>,
    material_indices: Span<u32>,
    curve_indices: Span<u32>,
    curve_vertices: Span<Vec4>,
}

impl ModelGeometryData {
    /// Validate the header and resolve every pointer field of a loaded geometry block.
    pub fn attach(block: AlignedBlock) -> Result<Self> {
        let mut reader = BinaryReader::attach(&block, 0);
        ArtifactHeader::read_expected(
            &mut reader,
            ArtifactHeader::new(ArtifactKind::Geometry, MODEL_DATA_VERSION),
        )?;

        let triangles = reader.read_slice::<u32>(MODEL_DATA_ALIGNMENT)?;
        let quads = reader.read_slice::<u32>(MODEL_DATA_ALIGNMENT)?;
        let face_index_counts = reader.read_slice::<u32>(MODEL_DATA_ALIGNMENT)?;
        let positions = reader.read_slice::<Vec3>(MODEL_DATA_ALIGNMENT)?;
        let normals = reader.read_slice::<Vec3>(MODEL_DATA_ALIGNMENT)?;
        let tangents = reader.read_slice::<Vec4>(MODEL_DATA_ALIGNMENT)?;
        let uvs = reader.read_slice::<Vec2>(MODEL_DATA_ALIGNMENT)?;
        let material_indices = reader.read_slice::<u32>(MODEL_DATA_ALIGNMENT)?;
        let curve_indices = reader.read_slice::<u32>(MODEL_DATA_ALIGNMENT)?;
        let curve_vertices = reader.read_slice::<Vec4>(MODEL_DATA_ALIGNMENT)?;

        Ok(Self {
            block: Arc::new(block),
            indices: [triangles, quads],
            face_index_counts,
            positions,
            normals,
            tangents,
            uvs,
            material_indices,
            curve_indices,
            curve_vertices,
        })
    }

    /// Shared artifact block.
    pub fn block(&self) -> &Arc<AlignedBlock> {
        &self.block
    }

    pub fn indices(&self, index_type: MeshIndexType) -> &[u32] {
        self.indices[index_type as usize].slice(&self.block)
    }

    pub fn face_index_counts(&self) -> &[u32] {
        self.face_index_counts.slice(&self.block)
    }

    pub fn positions(&self) -> &[Vec3] {
        self.positions.slice(&self.block)
    }

    pub fn normals(&self) -> &[Vec3] {
        self.normals.slice(&self.block)
    }

    pub fn tangents(&self) -> &[Vec4] {
        self.tangents.slice(&self.block)
    }

    pub fn uvs(&self) -> &[Vec2] {
        self.uvs.slice(&self.block)
    }

    pub fn material_indices(&self) -> &[u32] {
        self.material_indices.slice(&self.block)
    }

    pub fn curve_indices(&self) -> &[u32] {
        self.curve_indices.slice(&self.block)
    }

    pub fn curve_vertices(&self) -> &[Vec4] {
        self.curve_vertices.slice(&self.block)
    }

    /// Byte offset of each buffer inside [`block`](Self::block), for in-place binding.
    pub fn index_buffer_offset(&self, index_type: MeshIndexType) -> usize {
        self.indices[index_type as usize].byte_offset()
    }

    pub fn face_index_counts_offset(&self) -> usize {
        self.face_index_counts.byte_offset()
    }

    pub fn positions_offset(&self) -> usize {
        self.positions.byte_offset()
    }

    pub fn normals_offset(&self) -> usize {
        self.normals.byte_offset()
    }

    pub fn tangents_offset(&self) -> usize {
        self.tangents.byte_offset()
    }

    pub fn uvs_offset(&self) -> usize {
        self.uvs.byte_offset()
    }

    pub fn curve_indices_offset(&self) -> usize {
        self.curve_indices.byte_offset()
    }

    pub fn curve_vertices_offset(&self) -> usize {
        self.curve_vertices.byte_offset()
    }

    #[inline]
    pub fn has_normals(&self) -> bool {
        self.normals.byte_len() > 0
    }

    #[inline]
    pub fn has_tangents(&self) -> bool {
        self.tangents.byte_len() > 0
    }

    #[inline]
    pub fn has_uvs(&self) -> bool {
        self.uvs.byte_len() > 0
    }

    /// Load-time addresses of every buffer, in artifact order.
    pub fn buffer_addresses(&self) -> [usize; 10] {
        let base = self.block.base_address();
        [
            base + self.indices[0].byte_offset(),
            base + self.indices[1].byte_offset(),
            base + self.face_index_counts.byte_offset(),
            base + self.positions.byte_offset(),
            base + self.normals.byte_offset(),
            base + self.tangents.byte_offset(),
            base + self.uvs.byte_offset(),
            base + self.material_indices.byte_offset(),
            base + self.curve_indices.byte_offset(),
            base + self.curve_vertices.byte_offset(),
        ]
    }

    /// Cross-check the geometry buffers against the metadata that describes them.
    pub fn validate_against(&self, data: &ModelResourceData) -> Result<()> {
        let vertex_count = data.total_vertex_count as usize;
        if self.positions.len() != vertex_count {
            return Err(Error::inconsistent(format!(
                "metadata declares {vertex_count} vertices, geometry holds {} positions",
                self.positions.len()
            )));
        }
        for (name, len) in [
            ("normals", self.normals.len()),
            ("tangents", self.tangents.len()),
            ("uvs", self.uvs.len()),
        ] {
            if len != 0 && len != vertex_count {
                return Err(Error::inconsistent(format!(
                    "{name} buffer holds {len} entries for {vertex_count} vertices"
                )));
            }
        }
        if self.has_tangents() && !self.has_normals() {
            return Err(Error::inconsistent("tangents present without normals"));
        }
        if self.has_uvs() && !(self.has_normals() && self.has_tangents()) {
            return Err(Error::inconsistent("uvs present without normals and tangents"));
        }

        for index_type in MeshIndexType::ALL {
            let declared = data.index_counts[index_type as usize] as usize;
            let stored = self.indices[index_type as usize].len();
            if declared != stored {
                return Err(Error::inconsistent(format!(
                    "{index_type:?} index count {declared} in metadata, {stored} in geometry"
                )));
            }
        }

        let triangle_faces = data.index_counts[MeshIndexType::Triangle as usize] as usize / 3;
        let quad_faces = data.index_counts[MeshIndexType::Quad as usize] as usize / 4;
        let face_count = triangle_faces + quad_faces;
        for (name, len) in [
            ("face index count", self.face_index_counts.len()),
            ("material index", self.material_indices.len()),
        ] {
            if len != face_count {
                return Err(Error::inconsistent(format!(
                    "{name} buffer holds {len} entries for {face_count} faces"
                )));
            }
        }
        let counts = self.face_index_counts();
        if let Some(face) = counts[..triangle_faces]
            .iter()
            .position(|&c| c != 3)
            .or_else(|| counts[triangle_faces..].iter().position(|&c| c != 4).map(|i| i + triangle_faces))
        {
            return Err(Error::inconsistent(format!(
                "face {face} has {} indices, out of order with the index buffers",
                counts[face]
            )));
        }

        for (i, mesh) in data.meshes().iter().enumerate() {
            let Some(index_type) = mesh.index_type() else {
                return Err(Error::inconsistent(format!(
                    "mesh {i} has {} indices per face",
                    mesh.indices_per_face
                )));
            };
            let end = mesh.index_offset as usize + mesh.index_count as usize;
            if end > self.indices[index_type as usize].len() || mesh.index_count % mesh.indices_per_face != 0 {
                return Err(Error::inconsistent(format!("mesh {i} index range is out of bounds")));
            }
        }

        if self.curve_vertices.len() != data.total_curve_vertex_count as usize {
            return Err(Error::inconsistent(format!(
                "metadata declares {} curve vertices, geometry holds {}",
                data.total_curve_vertex_count,
                self.curve_vertices.len()
            )));
        }
        for (i, curve) in data.curves().iter().enumerate() {
            let end = curve.index_offset as usize + curve.index_count as usize;
            if end > self.curve_indices.len() {
                return Err(Error::inconsistent(format!("curve {i} index range is out of bounds")));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for ModelGeometryData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelGeometryData")
            .field("triangle_indices", &self.indices[0].len())
            .field("quad_indices", &self.indices[1].len())
            .field("positions", &self.positions.len())
            .field("normals", &self.normals.len())
            .field("tangents", &self.tangents.len())
            .field("uvs", &self.uvs.len())
            .field("curve_vertices", &self.curve_vertices.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_layouts() {
        assert_eq!(std::mem::size_of::<CameraSettings>(), 48);
        assert_eq!(std::mem::size_of::<MeshMetaData>(), 28);
        assert_eq!(std::mem::size_of::<CurveMetaData>(), 12);
    }

    #[test]
    fn test_index_type() {
        assert_eq!(MeshIndexType::from_indices_per_face(3), Some(MeshIndexType::Triangle));
        assert_eq!(MeshIndexType::from_indices_per_face(4), Some(MeshIndexType::Quad));
        assert_eq!(MeshIndexType::from_indices_per_face(5), None);
    }

    #[test]
    fn test_wrong_artifact_kind() {
        let mut writer = crate::serial::BinaryWriter::start(0, 0);
        ArtifactHeader::new(ArtifactKind::Geometry, MODEL_DATA_VERSION).write(&mut writer);
        let block = AlignedBlock::from_bytes(&writer.end()).unwrap();
        let err = ModelResourceData::attach(block).unwrap_err();
        assert!(matches!(err, Error::FormatMismatch { .. }));
    }

    #[test]
    fn test_name_table() {
        let mut bytes = Vec::new();
        for name in ["bricks", "leaf_alpha"] {
            bytes.extend_from_slice(&(name.len() as u32).to_le_bytes());
            bytes.extend_from_slice(name.as_bytes());
        }
        assert_eq!(read_name_table(&bytes, 2).unwrap(), vec!["bricks", "leaf_alpha"]);
        assert!(read_name_table(&bytes, 3).is_err());
    }
}
