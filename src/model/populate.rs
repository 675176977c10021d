//! Acceleration-structure population from a loaded model.

use bitflags::bitflags;

use crate::accel::{
    AccelerationDevice, BufferFormat, BufferType, GeometryHandle, GeometryKind, SceneHandle, SharedBuffer,
    SubdivisionMode,
};
use crate::config::BuildConfig;
use crate::util::{AxisAlignedBox, Error, Mat4, Result};

use super::data::{CurveMetaData, MeshIndexType, MeshMetaData, ModelGeometryData};
use super::material::{resolve_material, Material, MaterialFlags, MaterialRef};
use super::resource::ModelResource;

/// Instance id of geometry that is not instanced.
pub const INVALID_GEOMETRY_ID: u32 = u32::MAX;

bitflags! {
    /// Vertex attributes bound to a geometry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct GeometryFlags: u32 {
        const HAS_NORMALS = 1 << 0;
        const HAS_TANGENTS = 1 << 1;
        const HAS_UVS = 1 << 2;
    }
}

/// Which model record a geometry was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometrySource {
    Mesh(usize),
    Curve(usize),
}

/// Per-geometry record, looked up by attached geometry id from the callbacks.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryUserData {
    pub flags: GeometryFlags,
    pub material: MaterialRef,
    /// Flags of the resolved material at population time.
    pub material_flags: MaterialFlags,
    pub kind: GeometryKind,
    pub source: GeometrySource,
    pub instance_id: u32,
    pub scene: SceneHandle,
    pub geometry: GeometryHandle,
    pub world_to_local: Mat4,
    pub local_to_world: Mat4,
    pub aa_box: AxisAlignedBox,
}

/// Backend primitive for a mesh with faces of `index_type` and `material`.
///
/// A displacement-enabled material turns any mesh into a subdivision surface,
/// provided displacement is switched on globally.
pub fn select_geometry_kind(index_type: MeshIndexType, material: &Material, enable_displacement: bool) -> GeometryKind {
    if enable_displacement && material.flags().contains(MaterialFlags::DISPLACEMENT_ENABLED) {
        return GeometryKind::Subdivision;
    }
    match index_type {
        MeshIndexType::Triangle => GeometryKind::Triangle,
        MeshIndexType::Quad => GeometryKind::Quad,
    }
}

/// Bind positions and the optional attributes in their fixed order: normals, tangents, uvs.
pub fn set_mesh_vertex_attributes(
    device: &mut dyn AccelerationDevice,
    geometry: GeometryHandle,
    data: &ModelGeometryData,
) -> Result<GeometryFlags> {
    let block = data.block();
    let vertex_count = data.positions().len();
    device.set_shared_buffer(
        geometry,
        BufferType::Vertex,
        SharedBuffer::new(block.clone(), data.positions_offset(), 12, vertex_count, BufferFormat::Float3)?,
    )?;

    let mut flags = GeometryFlags::empty();
    let mut slot = 0u32;
    if data.has_normals() {
        device.set_shared_buffer(
            geometry,
            BufferType::VertexAttribute(slot),
            SharedBuffer::new(block.clone(), data.normals_offset(), 12, vertex_count, BufferFormat::Float3)?,
        )?;
        flags |= GeometryFlags::HAS_NORMALS;
        slot += 1;

        if data.has_tangents() {
            device.set_shared_buffer(
                geometry,
                BufferType::VertexAttribute(slot),
                SharedBuffer::new(block.clone(), data.tangents_offset(), 16, vertex_count, BufferFormat::Float4)?,
            )?;
            flags |= GeometryFlags::HAS_TANGENTS;
            slot += 1;

            if data.has_uvs() {
                device.set_shared_buffer(
                    geometry,
                    BufferType::VertexAttribute(slot),
                    SharedBuffer::new(block.clone(), data.uvs_offset(), 8, vertex_count, BufferFormat::Float2)?,
                )?;
                flags |= GeometryFlags::HAS_UVS;
                slot += 1;
            }
        }
    }
    device.set_vertex_attribute_count(geometry, slot)?;
    Ok(flags)
}

/// First face of `mesh` in the global face-count buffer (triangle faces first, then quads).
pub fn mesh_face_offset(mesh: &MeshMetaData, index_type: MeshIndexType, index_counts: &[u32]) -> usize {
    match index_type {
        MeshIndexType::Triangle => mesh.index_offset as usize / 3,
        MeshIndexType::Quad => index_counts[MeshIndexType::Triangle as usize] as usize / 3 + mesh.index_offset as usize / 4,
    }
}

fn set_mesh_indices(
    device: &mut dyn AccelerationDevice,
    geometry: GeometryHandle,
    kind: GeometryKind,
    mesh: &MeshMetaData,
    index_type: MeshIndexType,
    data: &ModelGeometryData,
    index_counts: &[u32],
) -> Result<()> {
    let block = data.block();
    let ipf = index_type.indices_per_face() as usize;
    let first = data.index_buffer_offset(index_type) + mesh.index_offset as usize * 4;
    let face_count = mesh.face_count() as usize;

    match kind {
        GeometryKind::Subdivision => {
            device.set_shared_buffer(
                geometry,
                BufferType::Index,
                SharedBuffer::new(block.clone(), first, 4, mesh.index_count as usize, BufferFormat::Uint)?,
            )?;
            let face_offset = mesh_face_offset(mesh, index_type, index_counts);
            device.set_shared_buffer(
                geometry,
                BufferType::Face,
                SharedBuffer::new(
                    block.clone(),
                    data.face_index_counts_offset() + face_offset * 4,
                    4,
                    face_count,
                    BufferFormat::Uint,
                )?,
            )?;
        }
        _ => {
            let format = if ipf == 3 { BufferFormat::Uint3 } else { BufferFormat::Uint4 };
            device.set_shared_buffer(
                geometry,
                BufferType::Index,
                SharedBuffer::new(block.clone(), first, ipf * 4, face_count, format)?,
            )?;
        }
    }
    Ok(())
}

/// Run `configure` on a fresh geometry, then commit, attach it under `id` and drop the local handle.
fn attach_new_geometry(
    device: &mut dyn AccelerationDevice,
    scene: SceneHandle,
    kind: GeometryKind,
    id: u32,
    configure: impl FnOnce(&mut dyn AccelerationDevice, GeometryHandle) -> Result<GeometryFlags>,
) -> Result<(GeometryHandle, GeometryFlags)> {
    let geometry = device.new_geometry(kind)?;
    let result = configure(device, geometry).and_then(|flags| {
        device.commit_geometry(geometry)?;
        device.attach_geometry_by_id(scene, geometry, id)?;
        Ok(flags)
    });
    device.release_geometry(geometry);
    result.map(|flags| (geometry, flags))
}

fn initialize_mesh(
    model: &ModelResource,
    device: &mut dyn AccelerationDevice,
    config: &BuildConfig,
    scene: SceneHandle,
    mesh_index: usize,
    mesh: &MeshMetaData,
    id: u32,
) -> Result<GeometryUserData> {
    let (Some(data), Some(geo)) = (model.data.as_ref(), model.geometry.as_ref()) else {
        return Err(Error::other("model is not loaded"));
    };
    let index_type = mesh
        .index_type()
        .ok_or_else(|| Error::inconsistent(format!("mesh {mesh_index} has {} indices per face", mesh.indices_per_face)))?;
    let material_ref = resolve_material(data.material_hashes(), mesh.material_hash);
    let material = model
        .material(material_ref)
        .ok_or_else(|| Error::other("default material missing; model not initialized"))?;
    let material_flags = material.flags();
    let kind = select_geometry_kind(index_type, material, config.enable_displacement);
    let alpha_tested = material_flags.contains(MaterialFlags::ALPHA_TESTED);

    let (geometry, flags) = attach_new_geometry(device, scene, kind, id, |device, geometry| {
        set_mesh_indices(device, geometry, kind, mesh, index_type, geo, &data.index_counts)?;
        let flags = set_mesh_vertex_attributes(device, geometry, geo)?;
        if alpha_tested {
            device.set_intersect_filter(geometry, true)?;
        }
        if kind == GeometryKind::Subdivision {
            device.set_displacement(geometry, true)?;
            device.set_tessellation_rate(geometry, config.tessellation_rate)?;
            device.set_subdivision_mode(geometry, SubdivisionMode::PinBoundary)?;
        }
        Ok(flags)
    })?;

    tracing::trace!(id, mesh = mesh_index, %kind, alpha_tested, "mesh attached");
    Ok(GeometryUserData {
        flags,
        material: material_ref,
        material_flags,
        kind,
        source: GeometrySource::Mesh(mesh_index),
        instance_id: INVALID_GEOMETRY_ID,
        scene,
        geometry,
        world_to_local: Mat4::IDENTITY,
        local_to_world: Mat4::IDENTITY,
        aa_box: AxisAlignedBox::INVALID,
    })
}

fn initialize_curve(
    model: &ModelResource,
    device: &mut dyn AccelerationDevice,
    scene: SceneHandle,
    curve_index: usize,
    curve: &CurveMetaData,
    id: u32,
) -> Result<GeometryUserData> {
    let (Some(data), Some(geo)) = (model.data.as_ref(), model.geometry.as_ref()) else {
        return Err(Error::other("model is not loaded"));
    };
    let material_ref = resolve_material(data.material_hashes(), curve.name_hash);
    let material_flags = model
        .material(material_ref)
        .ok_or_else(|| Error::other("default material missing; model not initialized"))?
        .flags();
    let kind = GeometryKind::RoundBSplineCurve;

    let (geometry, flags) = attach_new_geometry(device, scene, kind, id, |device, geometry| {
        let block = geo.block();
        device.set_shared_buffer(
            geometry,
            BufferType::Vertex,
            SharedBuffer::new(
                block.clone(),
                geo.curve_vertices_offset(),
                16,
                geo.curve_vertices().len(),
                BufferFormat::Float4,
            )?,
        )?;
        device.set_shared_buffer(
            geometry,
            BufferType::Index,
            SharedBuffer::new(
                block.clone(),
                geo.curve_indices_offset() + curve.index_offset as usize * 4,
                4,
                curve.index_count as usize,
                BufferFormat::Uint,
            )?,
        )?;
        Ok(GeometryFlags::empty())
    })?;

    tracing::trace!(id, curve = curve_index, "curve attached");
    Ok(GeometryUserData {
        flags,
        material: material_ref,
        material_flags,
        kind,
        source: GeometrySource::Curve(curve_index),
        instance_id: INVALID_GEOMETRY_ID,
        scene,
        geometry,
        world_to_local: Mat4::IDENTITY,
        local_to_world: Mat4::IDENTITY,
        aa_box: AxisAlignedBox::INVALID,
    })
}

/// Build and commit the model's acceleration structure on `device`.
///
/// Meshes are attached first with ids `0..meshes`, curves follow. The scene
/// handle is stored on the model as soon as it exists so a failed population
/// is still released by [`shutdown_model_resource`](super::shutdown_model_resource).
#[tracing::instrument(skip_all, fields(model = %model.name))]
pub fn initialize_acceleration_structure(
    model: &mut ModelResource,
    device: &mut dyn AccelerationDevice,
    config: &BuildConfig,
) -> Result<()> {
    if model.scene.is_some() {
        return Err(Error::other(format!("model '{}' already has an acceleration structure", model.name)));
    }
    let (meshes, curves) = match model.data.as_ref() {
        Some(data) if model.geometry.is_some() => (data.meshes().to_vec(), data.curves().to_vec()),
        _ => return Err(Error::other(format!("model '{}' has not been read", model.name))),
    };

    let scene = device.new_scene()?;
    model.scene = Some(scene);
    model.user_datas.clear();

    let mut user_datas = Vec::with_capacity(meshes.len() + curves.len());
    for (mesh_index, mesh) in meshes.iter().enumerate() {
        let id = user_datas.len() as u32;
        user_datas.push(initialize_mesh(model, device, config, scene, mesh_index, mesh, id)?);
    }
    for (curve_index, curve) in curves.iter().enumerate() {
        let id = user_datas.len() as u32;
        user_datas.push(initialize_curve(model, device, scene, curve_index, curve, id)?);
    }
    model.user_datas = user_datas;

    device.commit_scene(scene, &*model)?;
    tracing::info!(meshes = meshes.len(), curves = curves.len(), "acceleration structure committed");
    Ok(())
}
