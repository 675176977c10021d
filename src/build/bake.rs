//! Bakes a [`BuiltScene`] into the metadata and geometry artifacts.
//!
//! Field order here is the contract with
//! [`ModelResourceData::attach`](crate::model::ModelResourceData::attach) and
//! [`ModelGeometryData::attach`](crate::model::ModelGeometryData::attach).

use super::context::BuildProcessorContext;
use super::scene::BuiltScene;
use crate::model::{MODEL_DATA_ALIGNMENT, MODEL_DATA_TYPE, MODEL_DATA_VERSION, MODEL_GEOMETRY_DATA_TYPE};
use crate::serial::{ArtifactHeader, ArtifactKind, BinaryWriter, ARTIFACT_HEADER_SIZE, HEADER_ALIGNMENT};
use crate::util::{align_up, Result};

/// Pointer blocks in the geometry artifact.
const GEOMETRY_BLOCK_COUNT: usize = 10;

/// `[size u64][offset u64]` per block.
const BLOCK_FIELD_SIZE: usize = 16;

/// Byte sizes of the geometry blocks, in artifact order.
fn geometry_block_sizes(scene: &BuiltScene) -> [usize; GEOMETRY_BLOCK_COUNT] {
    use std::mem::size_of_val;
    [
        size_of_val(scene.indices[0].as_slice()),
        size_of_val(scene.indices[1].as_slice()),
        size_of_val(scene.face_index_counts.as_slice()),
        size_of_val(scene.positions.as_slice()),
        size_of_val(scene.normals.as_slice()),
        size_of_val(scene.tangents.as_slice()),
        size_of_val(scene.uvs.as_slice()),
        size_of_val(scene.material_indices.as_slice()),
        size_of_val(scene.curve_indices.as_slice()),
        size_of_val(scene.curve_vertices.as_slice()),
    ]
}

/// Exact size of the geometry artifact for `scene`.
pub fn geometry_artifact_size(scene: &BuiltScene) -> usize {
    let header = ARTIFACT_HEADER_SIZE + GEOMETRY_BLOCK_COUNT * BLOCK_FIELD_SIZE;
    let header = align_up(header as u64, HEADER_ALIGNMENT as u64) as usize;
    header
        + geometry_block_sizes(scene)
            .iter()
            .map(|&size| align_up(size as u64, MODEL_DATA_ALIGNMENT as u64) as usize)
            .sum::<usize>()
}

/// Serialize the metadata artifact.
pub fn serialize_metadata(scene: &BuiltScene) -> Result<Vec<u8>> {
    let mut writer = BinaryWriter::start(0, 4096);
    ArtifactHeader::new(ArtifactKind::Metadata, MODEL_DATA_VERSION).write(&mut writer);

    writer.write_pod(&scene.aa_box);
    writer.write_pod(&scene.bounding_sphere);
    writer.write_u32(scene.positions.len() as u32);
    writer.write_u32(scene.curve_vertices.len() as u32);
    for indices in &scene.indices {
        writer.write_u32(indices.len() as u32);
    }
    writer.write_u32(scene.textures.len() as u32);

    let mut names = Vec::new();
    for name in &scene.textures {
        names.extend_from_slice(&(name.len() as u32).to_le_bytes());
        names.extend_from_slice(name.as_bytes());
    }

    writer.write_slice(&scene.cameras, MODEL_DATA_ALIGNMENT)?;
    writer.write_block(&names, MODEL_DATA_ALIGNMENT)?;
    writer.write_slice(&scene.materials, MODEL_DATA_ALIGNMENT)?;
    writer.write_slice(&scene.material_hashes, MODEL_DATA_ALIGNMENT)?;
    writer.write_slice(&scene.meshes, MODEL_DATA_ALIGNMENT)?;
    writer.write_slice(&scene.curves, MODEL_DATA_ALIGNMENT)?;
    Ok(writer.end())
}

/// Serialize the geometry artifact.
pub fn serialize_geometry(scene: &BuiltScene) -> Result<Vec<u8>> {
    let mut writer = BinaryWriter::start(0, geometry_artifact_size(scene));
    ArtifactHeader::new(ArtifactKind::Geometry, MODEL_DATA_VERSION).write(&mut writer);

    for indices in &scene.indices {
        writer.write_slice(indices, MODEL_DATA_ALIGNMENT)?;
    }
    writer.write_slice(&scene.face_index_counts, MODEL_DATA_ALIGNMENT)?;
    writer.write_slice(&scene.positions, MODEL_DATA_ALIGNMENT)?;
    writer.write_slice(&scene.normals, MODEL_DATA_ALIGNMENT)?;
    writer.write_slice(&scene.tangents, MODEL_DATA_ALIGNMENT)?;
    writer.write_slice(&scene.uvs, MODEL_DATA_ALIGNMENT)?;
    writer.write_slice(&scene.material_indices, MODEL_DATA_ALIGNMENT)?;
    writer.write_slice(&scene.curve_indices, MODEL_DATA_ALIGNMENT)?;
    writer.write_slice(&scene.curve_vertices, MODEL_DATA_ALIGNMENT)?;
    Ok(writer.end())
}

/// Write both artifacts of `scene` as outputs of the context's current build.
///
/// Artifacts are named after the build's source asset.
#[tracing::instrument(skip_all, fields(asset = %context.source))]
pub fn bake_scene(context: &mut BuildProcessorContext, scene: &BuiltScene) -> Result<()> {
    let name = context.source.name.clone();

    let metadata = serialize_metadata(scene)?;
    context.create_output(MODEL_DATA_TYPE, MODEL_DATA_VERSION, &name, &metadata)?;

    let geometry = serialize_geometry(scene)?;
    debug_assert_eq!(geometry.len(), geometry_artifact_size(scene));
    context.create_output(MODEL_GEOMETRY_DATA_TYPE, MODEL_DATA_VERSION, &name, &geometry)?;

    tracing::info!(metadata = metadata.len(), geometry = geometry.len(), "baked model");
    Ok(())
}
