//! Integration tests for baking models and reading the artifacts back.

use std::path::Path;

use scene_bake::build::{
    asset_file_path, bake_scene, build_scene, geometry_artifact_size, serialize_geometry, serialize_metadata,
    BuildProcessorContext, BuiltScene, ContentId, AssetId, ImportedCurve, ImportedMaterial, ImportedMesh,
    ImportedModel,
};
use scene_bake::config::{BuildConfig, LoadMode};
use scene_bake::io::AlignedBlock;
use scene_bake::model::{
    read_model_resource, ModelGeometryData, ModelResource, ModelResourceData, MODEL_DATA_TYPE, MODEL_DATA_VERSION,
    MODEL_GEOMETRY_DATA_TYPE,
};
use scene_bake::util::{hash_name, Vec2, Vec3, Vec4};
use scene_bake::{Error, ErrorKind};

use tempfile::TempDir;

fn setup(name: &str) -> (TempDir, BuildConfig, BuildProcessorContext, ImportedModel) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = BuildConfig::with_roots(dir.path().join("content"), dir.path().join("assets"));
    std::fs::create_dir_all(&config.content_root).unwrap();
    let source_path = config.content_root.join(format!("{name}.obj"));
    std::fs::write(&source_path, b"# mesh").unwrap();

    let mut context = BuildProcessorContext::new(&config);
    let source = ContentId::new("Model", name);
    let id = AssetId::from_content(&source);
    context.initialize(source, id);

    let model = ImportedModel {
        source_path,
        ..Default::default()
    };
    (dir, config, context, model)
}

/// A triangle, a quad and a pentagon sharing one vertex list, with uvs.
fn mixed_mesh() -> ImportedMesh {
    let positions: Vec<Vec3> = (0..8)
        .map(|i| Vec3::new((i % 4) as f32, (i / 4) as f32, 0.0))
        .collect();
    let uvs = positions.iter().map(|p| Vec2::new(p.x / 3.0, p.y)).collect();
    ImportedMesh {
        name: "panel".into(),
        material: "bark".into(),
        positions,
        face_counts: vec![3, 4, 5],
        face_indices: vec![0, 1, 5, 1, 2, 6, 5, 2, 3, 7, 6, 5],
        uvs: Some(uvs),
        ..Default::default()
    }
}

fn strand() -> ImportedCurve {
    ImportedCurve {
        name: "hair".into(),
        control_points: (0..6).map(|i| Vec4::new(i as f32, 2.0, 0.0, 0.05)).collect(),
    }
}

fn bake(context: &mut BuildProcessorContext, model: &ImportedModel) -> BuiltScene {
    let scene = build_scene(context, model).expect("Failed to build scene");
    bake_scene(context, &scene).expect("Failed to bake scene");
    scene
}

fn read_artifact(config: &BuildConfig, asset_type: &str, name: &str) -> Vec<u8> {
    std::fs::read(asset_file_path(&config.asset_root, asset_type, name, MODEL_DATA_VERSION)).unwrap()
}

/// Rebuild a scene purely from loaded artifacts.
fn scene_from_artifacts(data: &ModelResourceData, geo: &ModelGeometryData) -> BuiltScene {
    use scene_bake::model::MeshIndexType;
    BuiltScene {
        cameras: data.cameras().to_vec(),
        aa_box: data.aa_box,
        bounding_sphere: data.bounding_sphere,
        textures: data.texture_resource_names.clone(),
        materials: data.materials().to_vec(),
        material_hashes: data.material_hashes().to_vec(),
        meshes: data.meshes().to_vec(),
        curves: data.curves().to_vec(),
        indices: [
            geo.indices(MeshIndexType::Triangle).to_vec(),
            geo.indices(MeshIndexType::Quad).to_vec(),
        ],
        face_index_counts: geo.face_index_counts().to_vec(),
        positions: geo.positions().to_vec(),
        normals: geo.normals().to_vec(),
        tangents: geo.tangents().to_vec(),
        uvs: geo.uvs().to_vec(),
        material_indices: geo.material_indices().to_vec(),
        curve_indices: geo.curve_indices().to_vec(),
        curve_vertices: geo.curve_vertices().to_vec(),
    }
}

#[test]
fn test_roundtrip_byte_identical() {
    let (_dir, config, mut context, mut model) = setup("panel");
    model.meshes.push(mixed_mesh());
    model.curves.push(strand());
    model.materials.push(ImportedMaterial::new("bark").with_texture(
        scene_bake::model::TextureSlot::BaseColor,
        "bark_color",
    ));
    let scene = bake(&mut context, &model);

    let metadata = read_artifact(&config, MODEL_DATA_TYPE, "panel");
    let geometry = read_artifact(&config, MODEL_GEOMETRY_DATA_TYPE, "panel");
    assert_eq!(geometry.len(), geometry_artifact_size(&scene));

    let data = ModelResourceData::attach(AlignedBlock::from_bytes(&metadata).unwrap()).unwrap();
    let geo = ModelGeometryData::attach(AlignedBlock::from_bytes(&geometry).unwrap()).unwrap();
    geo.validate_against(&data).unwrap();

    let reloaded = scene_from_artifacts(&data, &geo);
    assert_eq!(reloaded, scene);
    assert_eq!(serialize_metadata(&reloaded).unwrap(), metadata);
    assert_eq!(serialize_geometry(&reloaded).unwrap(), geometry);
}

#[test]
fn test_mesh_split_by_face_arity() {
    let (_dir, _config, mut context, mut model) = setup("panel");
    model.meshes.push(mixed_mesh());
    let scene = build_scene(&mut context, &model).unwrap();

    // Triangle + pentagon fan (3 triangles), one quad.
    assert_eq!(scene.indices[0].len(), 12);
    assert_eq!(scene.indices[1], vec![1, 2, 6, 5]);
    assert_eq!(scene.meshes.len(), 2);
    assert_eq!(scene.meshes[0].indices_per_face, 3);
    assert_eq!(scene.meshes[1].indices_per_face, 4);
    assert_eq!(scene.face_index_counts, vec![3, 3, 3, 3, 4]);
    assert_eq!(scene.material_indices.len(), scene.face_index_counts.len());

    // uvs force normals and tangents for every vertex; vertex 4 is unreferenced.
    assert_eq!(scene.normals.len(), 8);
    assert_eq!(scene.tangents.len(), 8);
    for (i, n) in scene.normals.iter().enumerate().filter(|(i, _)| *i != 4) {
        assert!((*n - Vec3::Z).length() < 1e-5, "normal {i} is {n:?}");
    }
    assert!((scene.tangents[0].truncate() - Vec3::X).length() < 1e-5);
}

#[test]
fn test_indices_rebased_across_meshes() {
    let (_dir, _config, mut context, mut model) = setup("pair");
    let mut second = mixed_mesh();
    second.name = "panel2".into();
    model.meshes.push(mixed_mesh());
    model.meshes.push(second);
    let scene = build_scene(&mut context, &model).unwrap();

    assert_eq!(scene.positions.len(), 16);
    assert_eq!(scene.meshes[2].vertex_offset, 8);
    assert_eq!(scene.meshes[2].index_offset, 12);
    assert_eq!(&scene.indices[0][12..15], &[8, 9, 13]);
    assert_eq!(scene.indices[1], vec![1, 2, 6, 5, 9, 10, 14, 13]);
    // Missing material resolves to the default marker on every face.
    assert!(scene.material_indices.iter().all(|&m| m == u32::MAX));
}

#[test]
fn test_curves_and_bounds() {
    let (_dir, _config, mut context, mut model) = setup("hair");
    model.curves.push(strand());
    model.curves.push(ImportedCurve {
        name: "stub".into(),
        control_points: vec![Vec4::W; 3],
    });
    let scene = build_scene(&mut context, &model).unwrap();

    assert_eq!(scene.curves.len(), 1);
    assert_eq!(scene.curves[0].index_count, 3);
    assert_eq!(scene.curves[0].name_hash, hash_name("hair"));
    assert_eq!(scene.curve_indices, vec![0, 1, 2]);
    assert!(scene.aa_box.is_valid());
    assert!((scene.aa_box.min.x + 0.05).abs() < 1e-6);
    assert!((scene.aa_box.max.x - 5.05).abs() < 1e-6);
    assert!(scene.bounding_sphere.radius >= 2.5);
    assert_eq!(scene.cameras.len(), 1);
}

#[test]
fn test_dependencies_recorded() {
    let (_dir, _config, mut context, mut model) = setup("panel");
    model.meshes.push(mixed_mesh());
    model.materials.push(
        ImportedMaterial::new("bark")
            .with_texture(scene_bake::model::TextureSlot::BaseColor, "bark_color")
            .with_texture(scene_bake::model::TextureSlot::Alpha, "bark_color"),
    );
    model.materials.push(
        ImportedMaterial::new("leaf").with_texture(scene_bake::model::TextureSlot::Alpha, "leaf_alpha"),
    );
    let scene = bake(&mut context, &model);

    assert_eq!(scene.textures, vec!["bark_color", "leaf_alpha"]);
    assert_eq!(context.content_dependencies.len(), 1);
    assert_eq!(context.content_dependencies[0].path, "panel.obj");
    let deps: Vec<&str> = context
        .process_dependencies
        .iter()
        .map(|d| d.source.name.as_str())
        .collect();
    assert_eq!(deps, vec!["bark_color", "leaf_alpha"]);
    assert_eq!(context.outputs.len(), 2);
    assert_eq!(context.outputs[0].source.asset_type, MODEL_DATA_TYPE);
    assert_eq!(context.outputs[1].source.asset_type, MODEL_GEOMETRY_DATA_TYPE);
}

#[test]
fn test_missing_source_leaves_dependencies_unchanged() {
    let (dir, _config, mut context, _model) = setup("panel");
    let before = context.content_dependencies.len();
    let err = context
        .add_file_dependency(dir.path().join("content").join("missing.obj"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(context.content_dependencies.len(), before);
}

#[test]
fn test_output_overwrite() {
    let (_dir, config, mut context, _model) = setup("panel");
    context.create_output("Blob", 3, "panel", b"first").unwrap();
    context.create_output("Blob", 3, "panel", b"second!").unwrap();

    let path = asset_file_path(&config.asset_root, "Blob", "panel", 3);
    assert_eq!(std::fs::read(&path).unwrap(), b"second!");
    assert_eq!(context.outputs.len(), 2);
    assert_eq!(context.outputs[0].path, context.outputs[1].path);
}

fn assert_aligned(geo: &ModelGeometryData) {
    for address in geo.buffer_addresses() {
        assert_eq!(address % 16, 0, "buffer at {address:#x} is not 16-byte aligned");
    }
}

#[test]
fn test_alignment_heap_and_mapped() {
    let (_dir, mut config, mut context, mut model) = setup("panel");
    model.meshes.push(mixed_mesh());
    model.curves.push(strand());
    bake(&mut context, &model);

    for mode in [LoadMode::Heap, LoadMode::Mapped] {
        config.load_mode = mode;
        let mut resource = ModelResource::new();
        read_model_resource(&config, "panel", &mut resource).unwrap();
        let geo = resource.geometry().unwrap();
        assert_eq!(geo.block().is_mapped(), mode == LoadMode::Mapped);
        assert_aligned(geo);
    }
}

#[test]
fn test_missing_geometry_is_inconsistent() {
    let (_dir, config, mut context, mut model) = setup("panel");
    model.meshes.push(mixed_mesh());
    bake(&mut context, &model);
    std::fs::remove_file(asset_file_path(
        &config.asset_root,
        MODEL_GEOMETRY_DATA_TYPE,
        "panel",
        MODEL_DATA_VERSION,
    ))
    .unwrap();

    let mut resource = ModelResource::new();
    let err = read_model_resource(&config, "panel", &mut resource).unwrap_err();
    assert!(matches!(err, Error::Inconsistent(_)));
    assert!(!resource.is_loaded());
}

#[test]
fn test_missing_model_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let config = BuildConfig::with_roots(dir.path(), dir.path().join("assets"));
    let mut resource = ModelResource::new();
    let err = read_model_resource(&config, "nothing", &mut resource).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

fn patch_version(path: &Path, version: u64) {
    let mut bytes = std::fs::read(path).unwrap();
    bytes[8..16].copy_from_slice(&version.to_le_bytes());
    std::fs::write(path, bytes).unwrap();
}

#[test]
fn test_version_mismatch() {
    let (_dir, config, mut context, mut model) = setup("panel");
    model.meshes.push(mixed_mesh());
    bake(&mut context, &model);
    patch_version(
        &asset_file_path(&config.asset_root, MODEL_DATA_TYPE, "panel", MODEL_DATA_VERSION),
        MODEL_DATA_VERSION + 1,
    );

    let mut resource = ModelResource::new();
    let err = read_model_resource(&config, "panel", &mut resource).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FormatMismatch);
}

#[test]
fn test_duplicate_material_names_rejected() {
    let (_dir, _config, mut context, mut model) = setup("panel");
    model.materials.push(ImportedMaterial::new("bark"));
    model.materials.push(ImportedMaterial::new("bark"));
    let err = build_scene(&mut context, &model).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Inconsistent);
}

fn assert_tampered_rejected(mutate: impl FnOnce(&mut BuiltScene)) {
    let (_dir, config, mut context, mut model) = setup("panel");
    model.meshes.push(mixed_mesh());
    let mut scene = build_scene(&mut context, &model).unwrap();
    mutate(&mut scene);
    bake_scene(&mut context, &scene).unwrap();

    let mut resource = ModelResource::new();
    let err = read_model_resource(&config, "panel", &mut resource).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Inconsistent, "{err}");
    assert!(!resource.is_loaded());
}

#[test]
fn test_short_face_counts_rejected() {
    assert_tampered_rejected(|scene| scene.face_index_counts.clear());
    assert_tampered_rejected(|scene| {
        scene.face_index_counts.pop();
    });
}

#[test]
fn test_short_material_indices_rejected() {
    assert_tampered_rejected(|scene| {
        scene.material_indices.pop();
    });
}

#[test]
fn test_face_counts_out_of_order_rejected() {
    // Quad face listed before the triangle faces.
    assert_tampered_rejected(|scene| scene.face_index_counts.rotate_right(1));
}
