//! Turns an imported model into flat, bake-ready buffers.
//!
//! Importing a source format is somebody else's job; this module starts from
//! an [`ImportedModel`] (polygon meshes in face-count/face-index form, curves as
//! control points, named materials) and produces a [`BuiltScene`]: meshes split
//! by face arity, indices rebased into one global vertex buffer, a complete
//! attribute set, sorted materials and bounding volumes.

use std::collections::BTreeSet;
use std::path::PathBuf;

use super::context::BuildProcessorContext;
use crate::model::{
    CameraSettings, CurveMetaData, Material, MaterialFlags, MeshIndexType, MeshMetaData, ShaderType,
    TextureSlot, INVALID_TEXTURE_INDEX, MESH_INDEX_TYPE_COUNT, SCALAR_ATTRIBUTE_COUNT, TEXTURE_SLOT_COUNT,
};
use crate::util::{hash_name, AxisAlignedBox, BoundingSphere, Error, Hash32, Result, Vec2, Vec3, Vec4};

/// Asset type textures are built under.
pub const TEXTURE_ASSET_TYPE: &str = "Texture";

/// Material index of faces that use the default material.
pub const DEFAULT_MATERIAL_INDEX: u32 = u32::MAX;

/// Material as it comes out of an importer.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedMaterial {
    pub name: String,
    pub shader: ShaderType,
    pub flags: MaterialFlags,
    pub base_color: [f32; 3],
    pub scalar_attribute_values: [f32; SCALAR_ATTRIBUTE_COUNT],
    /// Texture asset names per slot.
    pub textures: [Option<String>; TEXTURE_SLOT_COUNT],
}

impl ImportedMaterial {
    pub fn new(name: impl Into<String>) -> Self {
        let defaults = Material::default();
        Self {
            name: name.into(),
            shader: ShaderType::DisneySolid,
            flags: MaterialFlags::empty(),
            base_color: defaults.base_color,
            scalar_attribute_values: defaults.scalar_attribute_values,
            textures: Default::default(),
        }
    }

    pub fn with_texture(mut self, slot: TextureSlot, texture: impl Into<String>) -> Self {
        self.textures[slot as usize] = Some(texture.into());
        self
    }

    pub fn with_flags(mut self, flags: MaterialFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// Polygon mesh with per-vertex attributes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportedMesh {
    pub name: String,
    pub material: String,
    pub positions: Vec<Vec3>,
    /// Vertices per face.
    pub face_counts: Vec<u32>,
    /// Indices into `positions`, `face_counts.iter().sum()` of them.
    pub face_indices: Vec<u32>,
    pub normals: Option<Vec<Vec3>>,
    /// xyz tangent, w handedness.
    pub tangents: Option<Vec<Vec4>>,
    pub uvs: Option<Vec<Vec2>>,
}

/// Round B-spline curve; control points carry their radius in `w`.
///
/// Materials are looked up by the curve's own name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportedCurve {
    pub name: String,
    pub control_points: Vec<Vec4>,
}

/// Everything an importer extracted from one source file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportedModel {
    /// Raw content file the model was imported from.
    pub source_path: PathBuf,
    pub cameras: Vec<CameraSettings>,
    pub materials: Vec<ImportedMaterial>,
    pub meshes: Vec<ImportedMesh>,
    pub curves: Vec<ImportedCurve>,
}

/// Flat buffers ready to be baked.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuiltScene {
    pub cameras: Vec<CameraSettings>,
    pub aa_box: AxisAlignedBox,
    pub bounding_sphere: BoundingSphere,
    /// Sorted, unique texture asset names.
    pub textures: Vec<String>,
    /// Sorted by `material_hashes`.
    pub materials: Vec<Material>,
    pub material_hashes: Vec<Hash32>,
    pub meshes: Vec<MeshMetaData>,
    pub curves: Vec<CurveMetaData>,
    pub indices: [Vec<u32>; MESH_INDEX_TYPE_COUNT],
    /// Triangle faces first, then quad faces.
    pub face_index_counts: Vec<u32>,
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub tangents: Vec<Vec4>,
    pub uvs: Vec<Vec2>,
    /// Per face, parallel to `face_index_counts`.
    pub material_indices: Vec<u32>,
    pub curve_indices: Vec<u32>,
    pub curve_vertices: Vec<Vec4>,
}

/// Which optional attributes every mesh ends up with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AttributeSet {
    normals: bool,
    tangents: bool,
    uvs: bool,
}

impl AttributeSet {
    fn for_meshes(meshes: &[ImportedMesh]) -> Self {
        if meshes.is_empty() {
            return Self {
                normals: false,
                tangents: false,
                uvs: false,
            };
        }
        let uvs = meshes.iter().all(|m| m.uvs.is_some());
        let normals = uvs || meshes.iter().all(|m| m.normals.is_some());
        let tangents = uvs || (normals && meshes.iter().all(|m| m.tangents.is_some()));
        Self { normals, tangents, uvs }
    }
}

fn check_attribute_len(mesh: &ImportedMesh, what: &str, len: Option<usize>) -> Result<()> {
    match len {
        Some(len) if len != mesh.positions.len() => Err(Error::inconsistent(format!(
            "mesh '{}' has {len} {what} for {} vertices",
            mesh.name,
            mesh.positions.len()
        ))),
        _ => Ok(()),
    }
}

/// Split polygon faces into triangles and quads; larger faces become triangle fans.
///
/// Returns `(triangle indices, quad indices)` local to the mesh.
pub fn split_faces(mesh: &ImportedMesh) -> Result<(Vec<u32>, Vec<u32>)> {
    let mut triangles = Vec::new();
    let mut quads = Vec::new();
    let mut cursor = 0usize;

    for (face, &count) in mesh.face_counts.iter().enumerate() {
        let count = count as usize;
        let Some(corners) = mesh.face_indices.get(cursor..cursor + count) else {
            return Err(Error::inconsistent(format!(
                "mesh '{}' face {face} runs past its {} face indices",
                mesh.name,
                mesh.face_indices.len()
            )));
        };
        cursor += count;

        if let Some(&bad) = corners.iter().find(|&&i| i as usize >= mesh.positions.len()) {
            return Err(Error::inconsistent(format!(
                "mesh '{}' face {face} references vertex {bad} of {}",
                mesh.name,
                mesh.positions.len()
            )));
        }

        match count {
            0..=2 => tracing::warn!(mesh = %mesh.name, face, count, "skipping degenerate face"),
            3 => triangles.extend_from_slice(corners),
            4 => quads.extend_from_slice(corners),
            _ => {
                for k in 1..count - 1 {
                    triangles.extend_from_slice(&[corners[0], corners[k], corners[k + 1]]);
                }
            }
        }
    }
    Ok((triangles, quads))
}

/// Visit every triangle of the mesh's faces (quads as two triangles).
fn for_each_triangle(triangles: &[u32], quads: &[u32], mut f: impl FnMut([usize; 3])) {
    for t in triangles.chunks_exact(3) {
        f([t[0] as usize, t[1] as usize, t[2] as usize]);
    }
    for q in quads.chunks_exact(4) {
        f([q[0] as usize, q[1] as usize, q[3] as usize]);
        f([q[2] as usize, q[3] as usize, q[1] as usize]);
    }
}

/// Area-weighted vertex normals.
pub fn compute_normals(positions: &[Vec3], triangles: &[u32], quads: &[u32]) -> Vec<Vec3> {
    let mut normals = vec![Vec3::ZERO; positions.len()];
    for_each_triangle(triangles, quads, |[a, b, c]| {
        let n = (positions[b] - positions[a]).cross(positions[c] - positions[a]);
        normals[a] += n;
        normals[b] += n;
        normals[c] += n;
    });
    normals
        .into_iter()
        .map(|n| {
            let n = n.normalize_or_zero();
            if n == Vec3::ZERO {
                Vec3::Y
            } else {
                n
            }
        })
        .collect()
}

/// Per-vertex tangents from uv gradients, orthogonalized against `normals`.
pub fn compute_tangents(positions: &[Vec3], normals: &[Vec3], uvs: &[Vec2], triangles: &[u32], quads: &[u32]) -> Vec<Vec4> {
    let mut tan = vec![Vec3::ZERO; positions.len()];
    let mut bitan = vec![Vec3::ZERO; positions.len()];
    for_each_triangle(triangles, quads, |[a, b, c]| {
        let e1 = positions[b] - positions[a];
        let e2 = positions[c] - positions[a];
        let d1 = uvs[b] - uvs[a];
        let d2 = uvs[c] - uvs[a];
        let det = d1.x * d2.y - d2.x * d1.y;
        if det.abs() < 1e-12 {
            return;
        }
        let r = 1.0 / det;
        let t = (e1 * d2.y - e2 * d1.y) * r;
        let s = (e2 * d1.x - e1 * d2.x) * r;
        for i in [a, b, c] {
            tan[i] += t;
            bitan[i] += s;
        }
    });

    normals
        .iter()
        .zip(tan.iter().zip(&bitan))
        .map(|(&n, (&t, &b))| {
            let t = (t - n * n.dot(t)).normalize_or_zero();
            let t = if t == Vec3::ZERO { n.any_orthonormal_vector() } else { t };
            let w = if n.cross(t).dot(b) < 0.0 { -1.0 } else { 1.0 };
            t.extend(w)
        })
        .collect()
}

/// Uniform cubic B-spline segments need four control points each.
const CURVE_SEGMENT_POINTS: usize = 4;

/// Build flat buffers from an imported model.
///
/// Records the source file and every referenced texture as dependencies of
/// the context's current build.
#[tracing::instrument(skip_all, fields(asset = %context.source))]
pub fn build_scene(context: &mut BuildProcessorContext, imported: &ImportedModel) -> Result<BuiltScene> {
    context.add_file_dependency(&imported.source_path)?;

    let textures: Vec<String> = imported
        .materials
        .iter()
        .flat_map(|m| m.textures.iter().flatten().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    for texture in &textures {
        context.add_process_dependency_named(TEXTURE_ASSET_TYPE, texture)?;
    }

    let mut scene = BuiltScene {
        cameras: if imported.cameras.is_empty() {
            vec![CameraSettings::default()]
        } else {
            imported.cameras.clone()
        },
        ..BuiltScene::default()
    };
    build_materials(&mut scene, &imported.materials, &textures)?;
    scene.textures = textures;

    let attributes = AttributeSet::for_meshes(&imported.meshes);
    let mut mesh_faces: [Vec<u32>; MESH_INDEX_TYPE_COUNT] = Default::default();
    for mesh in &imported.meshes {
        append_mesh(&mut scene, mesh, attributes, &mut mesh_faces)?;
    }
    for (index_type, materials) in MeshIndexType::ALL.into_iter().zip(&mesh_faces) {
        let count = index_type.indices_per_face();
        scene.face_index_counts.extend(std::iter::repeat(count).take(materials.len()));
        scene.material_indices.extend_from_slice(materials);
    }

    for curve in &imported.curves {
        append_curve(&mut scene, curve);
    }

    let mut aa_box = AxisAlignedBox::INVALID;
    let mut points = scene.positions.clone();
    for p in &scene.positions {
        aa_box.expand_by_point(*p);
    }
    for cv in &scene.curve_vertices {
        let center = cv.truncate();
        let r = Vec3::splat(cv.w);
        aa_box.expand_by_point(center - r);
        aa_box.expand_by_point(center + r);
        points.push(center - r);
        points.push(center + r);
    }
    scene.bounding_sphere = BoundingSphere::around_points(&aa_box, &points);
    scene.aa_box = aa_box;

    tracing::info!(
        meshes = scene.meshes.len(),
        curves = scene.curves.len(),
        vertices = scene.positions.len(),
        triangles = scene.indices[0].len() / 3,
        quads = scene.indices[1].len() / 4,
        "scene built"
    );
    Ok(scene)
}

fn build_materials(scene: &mut BuiltScene, imported: &[ImportedMaterial], textures: &[String]) -> Result<()> {
    let mut materials: Vec<(Hash32, &str, Material)> = imported
        .iter()
        .map(|m| {
            let mut texture_indices = [INVALID_TEXTURE_INDEX; TEXTURE_SLOT_COUNT];
            for (slot, name) in m.textures.iter().enumerate() {
                if let Some(name) = name {
                    // Every name is in the sorted list built from these materials.
                    if let Ok(i) = textures.binary_search(name) {
                        texture_indices[slot] = i as u32;
                    }
                }
            }
            let material = Material {
                base_color: m.base_color,
                shader: m.shader as u32,
                flags: m.flags.bits(),
                texture_indices,
                scalar_attribute_values: m.scalar_attribute_values,
            };
            (hash_name(&m.name), m.name.as_str(), material)
        })
        .collect();
    materials.sort_by_key(|(hash, _, _)| *hash);

    if let Some(pair) = materials.windows(2).find(|w| w[0].0 == w[1].0) {
        return Err(Error::inconsistent(format!(
            "materials '{}' and '{}' share name hash {:#010x}",
            pair[0].1, pair[1].1, pair[0].0
        )));
    }

    scene.material_hashes = materials.iter().map(|(hash, _, _)| *hash).collect();
    scene.materials = materials.into_iter().map(|(_, _, m)| m).collect();
    Ok(())
}

fn append_mesh(
    scene: &mut BuiltScene,
    mesh: &ImportedMesh,
    attributes: AttributeSet,
    mesh_faces: &mut [Vec<u32>; MESH_INDEX_TYPE_COUNT],
) -> Result<()> {
    check_attribute_len(mesh, "normals", mesh.normals.as_ref().map(Vec::len))?;
    check_attribute_len(mesh, "tangents", mesh.tangents.as_ref().map(Vec::len))?;
    check_attribute_len(mesh, "uvs", mesh.uvs.as_ref().map(Vec::len))?;

    let (triangles, quads) = split_faces(mesh)?;
    let vertex_offset = scene.positions.len() as u32;
    let material_hash = hash_name(&mesh.material);
    let material_index = scene
        .material_hashes
        .binary_search(&material_hash)
        .map_or(DEFAULT_MATERIAL_INDEX, |i| i as u32);

    if attributes.normals {
        let normals = match &mesh.normals {
            Some(n) => n.clone(),
            None => compute_normals(&mesh.positions, &triangles, &quads),
        };
        if attributes.tangents {
            let tangents = match (&mesh.tangents, &mesh.uvs) {
                (Some(t), _) => t.clone(),
                (None, Some(uvs)) => compute_tangents(&mesh.positions, &normals, uvs, &triangles, &quads),
                (None, None) => normals.iter().map(|n| n.any_orthonormal_vector().extend(1.0)).collect(),
            };
            scene.tangents.extend(tangents);
        }
        scene.normals.extend(normals);
    }
    if attributes.uvs {
        if let Some(uvs) = &mesh.uvs {
            scene.uvs.extend_from_slice(uvs);
        }
    }
    scene.positions.extend_from_slice(&mesh.positions);

    let name_hash = hash_name(&mesh.name);
    for (index_type, local) in MeshIndexType::ALL.into_iter().zip([&triangles, &quads]) {
        if local.is_empty() {
            continue;
        }
        let buffer = &mut scene.indices[index_type as usize];
        scene.meshes.push(MeshMetaData {
            index_count: local.len() as u32,
            index_offset: buffer.len() as u32,
            vertex_count: mesh.positions.len() as u32,
            vertex_offset,
            material_hash,
            indices_per_face: index_type.indices_per_face(),
            mesh_name_hash: name_hash,
        });
        buffer.extend(local.iter().map(|&i| i + vertex_offset));

        let faces = local.len() / index_type.indices_per_face() as usize;
        mesh_faces[index_type as usize].extend(std::iter::repeat(material_index).take(faces));
    }
    Ok(())
}

fn append_curve(scene: &mut BuiltScene, curve: &ImportedCurve) {
    let count = curve.control_points.len();
    if count < CURVE_SEGMENT_POINTS {
        tracing::warn!(curve = %curve.name, count, "skipping curve with too few control points");
        return;
    }
    let base = scene.curve_vertices.len() as u32;
    let segments = (count - (CURVE_SEGMENT_POINTS - 1)) as u32;

    scene.curves.push(CurveMetaData {
        index_offset: scene.curve_indices.len() as u32,
        index_count: segments,
        name_hash: hash_name(&curve.name),
    });
    scene.curve_indices.extend((0..segments).map(|s| base + s));
    scene.curve_vertices.extend_from_slice(&curve.control_points);
}
