//! Integration tests for loading baked models and populating the software backend.

use scene_bake::accel::{GeometryKind, Ray, SoftwareDevice};
use scene_bake::build::{bake_scene, build_scene, BuildProcessorContext, ContentId, AssetId, ImportedCurve, ImportedMaterial, ImportedMesh, ImportedModel};
use scene_bake::config::BuildConfig;
use scene_bake::model::{
    initialize_acceleration_structure, initialize_model_resource, read_model_resource, shutdown_model_resource,
    GeometryFlags, GeometrySource, MaterialFlags, MaterialRef, ModelResource, ScalarAttribute, TextureSlot,
};
use scene_bake::texture::{MemoryTextureLoader, TextureResource};
use scene_bake::util::{Vec2, Vec3, Vec4};

use tempfile::TempDir;

/// 2x1 strip of four triangles over six vertices in the z = 0 plane.
fn strip(material: &str) -> ImportedMesh {
    let positions: Vec<Vec3> = (0..6)
        .map(|i| Vec3::new((i % 3) as f32, (i / 3) as f32, 0.0))
        .collect();
    let uvs = positions.iter().map(|p| Vec2::new(p.x * 0.5, p.y)).collect();
    ImportedMesh {
        name: "strip".into(),
        material: material.into(),
        positions,
        face_counts: vec![3, 3, 3, 3],
        face_indices: vec![0, 1, 4, 0, 4, 3, 1, 2, 5, 1, 5, 4],
        uvs: Some(uvs),
        ..Default::default()
    }
}

fn bake_model(name: &str, model: ImportedModel) -> (TempDir, BuildConfig) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = BuildConfig::with_roots(dir.path().join("content"), dir.path().join("assets"));
    std::fs::create_dir_all(&config.content_root).unwrap();
    let source_path = config.content_root.join(format!("{name}.obj"));
    std::fs::write(&source_path, b"# model").unwrap();

    let mut context = BuildProcessorContext::new(&config);
    let source = ContentId::new("Model", name);
    let id = AssetId::from_content(&source);
    context.initialize(source, id);

    let model = ImportedModel { source_path, ..model };
    let scene = build_scene(&mut context, &model).expect("Failed to build scene");
    bake_scene(&mut context, &scene).expect("Failed to bake scene");
    (dir, config)
}

fn leaf_model() -> ImportedModel {
    ImportedModel {
        meshes: vec![strip("leaf")],
        materials: vec![ImportedMaterial::new("leaf")
            .with_flags(MaterialFlags::ALPHA_TESTED)
            .with_texture(TextureSlot::Alpha, "leaf_alpha")],
        ..Default::default()
    }
}

fn load(config: &BuildConfig, name: &str, loader: &mut MemoryTextureLoader, device: &mut SoftwareDevice) -> ModelResource {
    let mut model = ModelResource::new();
    read_model_resource(config, name, &mut model).expect("Failed to read model");
    initialize_model_resource(&mut model, loader).expect("Failed to initialize model");
    initialize_acceleration_structure(&mut model, device, config).expect("Failed to populate");
    model
}

fn loader_with(name: &str, value: f32) -> MemoryTextureLoader {
    let mut loader = MemoryTextureLoader::new();
    loader.insert(TextureResource::solid(name, value));
    loader
}

fn down_ray(x: f32, y: f32) -> Ray {
    Ray::new(Vec3::new(x, y, 1.0), Vec3::new(0.0, 0.0, -1.0))
}

#[test]
fn test_alpha_tested_mesh_end_to_end() {
    let (_dir, config) = bake_model("leaf", leaf_model());
    let mut device = SoftwareDevice::new();
    let mut loader = loader_with("leaf_alpha", 1.0);
    let mut model = load(&config, "leaf", &mut loader, &mut device);

    let data = model.data().unwrap();
    assert_eq!(data.total_vertex_count, 6);
    assert_eq!(data.index_counts, [12, 0]);
    assert_eq!(data.texture_resource_names, vec!["leaf_alpha"]);

    let scene = model.scene().unwrap();
    assert_eq!(device.attached_ids(scene), vec![0]);
    let info = device.attached_geometry(scene, 0).unwrap();
    assert_eq!(info.kind, GeometryKind::Triangle);
    assert!(info.has_intersect_filter);
    assert_eq!(info.primitive_count, 4);
    assert_eq!(info.vertex_attribute_count, 3);

    let user_data = model.user_data(0).unwrap();
    assert!(user_data.material_flags.contains(MaterialFlags::ALPHA_TESTED));
    assert_eq!(user_data.material, MaterialRef::Scene(0));
    assert_eq!(user_data.source, GeometrySource::Mesh(0));
    assert_eq!(
        user_data.flags,
        GeometryFlags::HAS_NORMALS | GeometryFlags::HAS_TANGENTS | GeometryFlags::HAS_UVS
    );

    let hit = device.intersect(scene, &down_ray(0.7, 0.2), &model).unwrap().expect("opaque texture should hit");
    assert!((hit.t - 1.0).abs() < 1e-5);
    assert_eq!(hit.geom_id, 0);

    shutdown_model_resource(&mut model, &mut device, &mut loader);
}

#[test]
fn test_alpha_zero_rejects_hit() {
    let (_dir, config) = bake_model("leaf", leaf_model());
    let mut device = SoftwareDevice::new();
    let mut loader = loader_with("leaf_alpha", 0.0);
    let mut model = load(&config, "leaf", &mut loader, &mut device);

    let scene = model.scene().unwrap();
    assert_eq!(device.intersect(scene, &down_ray(0.7, 0.2), &model).unwrap(), None);
    assert_eq!(device.intersect(scene, &down_ray(1.6, 0.7), &model).unwrap(), None);

    shutdown_model_resource(&mut model, &mut device, &mut loader);
}

#[test]
fn test_missing_material_uses_default() {
    let model = ImportedModel {
        meshes: vec![strip("unknown")],
        ..Default::default()
    };
    let (_dir, config) = bake_model("plain", model);
    let mut device = SoftwareDevice::new();
    let mut loader = MemoryTextureLoader::new();
    let mut model = load(&config, "plain", &mut loader, &mut device);

    let user_data = model.user_data(0).unwrap();
    assert_eq!(user_data.material, MaterialRef::Default);
    assert!(user_data.material_flags.is_empty());
    assert_eq!(
        model.material(MaterialRef::Default).unwrap().base_color,
        [0.6, 0.6, 0.6]
    );
    let scene = model.scene().unwrap();
    assert!(!device.attached_geometry(scene, 0).unwrap().has_intersect_filter);

    shutdown_model_resource(&mut model, &mut device, &mut loader);
}

#[test]
fn test_curves_follow_meshes() {
    let mut quad = strip("bark");
    quad.name = "board".into();
    quad.face_counts = vec![3, 4];
    quad.face_indices = vec![0, 1, 4, 1, 2, 5, 4];
    let model = ImportedModel {
        meshes: vec![quad],
        curves: vec![ImportedCurve {
            name: "hair".into(),
            control_points: (0..5).map(|i| Vec4::new(i as f32, 3.0, 0.0, 0.1)).collect(),
        }],
        ..Default::default()
    };
    let (_dir, config) = bake_model("mixed", model);
    let mut device = SoftwareDevice::new();
    let mut loader = MemoryTextureLoader::new();
    let mut model = load(&config, "mixed", &mut loader, &mut device);

    let scene = model.scene().unwrap();
    assert_eq!(device.attached_ids(scene), vec![0, 1, 2]);
    assert_eq!(device.attached_geometry(scene, 0).unwrap().kind, GeometryKind::Triangle);
    assert_eq!(device.attached_geometry(scene, 1).unwrap().kind, GeometryKind::Quad);
    let curve = device.attached_geometry(scene, 2).unwrap();
    assert_eq!(curve.kind, GeometryKind::RoundBSplineCurve);
    assert_eq!(curve.primitive_count, 2);
    assert_eq!(model.user_data(2).unwrap().source, GeometrySource::Curve(0));

    // Every local geometry handle was released after attach.
    assert_eq!(device.live_geometry_count(), 0);

    let hit = device
        .intersect(scene, &Ray::new(Vec3::new(1.6, 3.0, 2.0), Vec3::new(0.0, 0.0, -1.0)), &model)
        .unwrap()
        .expect("curve should be hit");
    assert_eq!(hit.geom_id, 2);

    shutdown_model_resource(&mut model, &mut device, &mut loader);
}

#[test]
fn test_displaced_subdivision() {
    let mut material = ImportedMaterial::new("rock")
        .with_flags(MaterialFlags::DISPLACEMENT_ENABLED)
        .with_texture(TextureSlot::Displacement, "rock_height");
    material.scalar_attribute_values[ScalarAttribute::DisplacementScale as usize] = 0.25;
    let model = ImportedModel {
        meshes: vec![strip("rock")],
        materials: vec![material],
        ..Default::default()
    };
    let (_dir, mut config) = bake_model("rock", model);
    config.enable_displacement = true;
    config.tessellation_rate = 2.0;

    let mut device = SoftwareDevice::new();
    let mut loader = loader_with("rock_height", 1.0);
    let mut model = load(&config, "rock", &mut loader, &mut device);

    let scene = model.scene().unwrap();
    let info = device.attached_geometry(scene, 0).unwrap();
    assert_eq!(info.kind, GeometryKind::Subdivision);
    assert!(info.has_displacement);
    assert_eq!(info.primitive_count, 4);

    let hit = device.intersect(scene, &down_ray(0.7, 0.2), &model).unwrap().unwrap();
    assert!((hit.t - 0.75).abs() < 1e-4, "t = {}", hit.t);

    shutdown_model_resource(&mut model, &mut device, &mut loader);
}

#[test]
fn test_shutdown_is_idempotent() {
    let (_dir, config) = bake_model("leaf", leaf_model());
    let mut device = SoftwareDevice::new();
    let mut loader = loader_with("leaf_alpha", 1.0);
    let mut model = load(&config, "leaf", &mut loader, &mut device);
    assert_eq!(device.live_scene_count(), 1);

    shutdown_model_resource(&mut model, &mut device, &mut loader);
    assert_eq!(device.live_scene_count(), 0);
    assert_eq!(loader.released(), 1);
    assert!(!model.is_loaded());
    assert!(model.user_datas().is_empty());
    assert!(model.default_material().is_none());

    shutdown_model_resource(&mut model, &mut device, &mut loader);
    assert_eq!(device.live_scene_count(), 0);
    assert_eq!(loader.released(), 1);
}

#[test]
fn test_populate_twice_fails() {
    let (_dir, config) = bake_model("leaf", leaf_model());
    let mut device = SoftwareDevice::new();
    let mut loader = loader_with("leaf_alpha", 1.0);
    let mut model = load(&config, "leaf", &mut loader, &mut device);
    assert!(initialize_acceleration_structure(&mut model, &mut device, &config).is_err());
    shutdown_model_resource(&mut model, &mut device, &mut loader);
}

#[test]
fn test_missing_texture_fails_initialize() {
    let (_dir, config) = bake_model("leaf", leaf_model());
    let mut model = ModelResource::new();
    read_model_resource(&config, "leaf", &mut model).unwrap();
    let mut loader = MemoryTextureLoader::new();
    let err = initialize_model_resource(&mut model, &mut loader).unwrap_err();
    assert!(matches!(err, scene_bake::Error::Texture { .. }));
}

#[test]
fn test_empty_model_misses() {
    let (_dir, config) = bake_model("empty", ImportedModel::default());
    let mut device = SoftwareDevice::new();
    let mut loader = MemoryTextureLoader::new();
    let mut model = load(&config, "empty", &mut loader, &mut device);

    let scene = model.scene().unwrap();
    assert!(device.attached_ids(scene).is_empty());
    assert_eq!(device.built_primitive_count(scene), 0);

    let camera = model.data().unwrap().cameras()[0];
    let ray = Ray::new(camera.position, camera.look_at - camera.position);
    assert_eq!(device.intersect(scene, &ray, &model).unwrap(), None);
    assert_eq!(device.intersect(scene, &down_ray(0.5, 0.5), &model).unwrap(), None);

    shutdown_model_resource(&mut model, &mut device, &mut loader);
}

fn two_texture_model() -> ImportedModel {
    ImportedModel {
        meshes: vec![strip("leaf")],
        materials: vec![ImportedMaterial::new("leaf")
            .with_texture(TextureSlot::BaseColor, "a_color")
            .with_texture(TextureSlot::Alpha, "b_alpha")],
        ..Default::default()
    }
}

#[test]
fn test_failed_texture_load_releases_loaded() {
    let (_dir, config) = bake_model("leaf", two_texture_model());
    let mut model = ModelResource::new();
    read_model_resource(&config, "leaf", &mut model).unwrap();

    let mut loader = loader_with("a_color", 1.0);
    assert!(initialize_model_resource(&mut model, &mut loader).is_err());
    assert_eq!(loader.released(), 1);
    assert!(model.textures().is_empty());
}

#[test]
fn test_reinitialize_releases_previous_textures() {
    let (_dir, config) = bake_model("leaf", two_texture_model());
    let mut model = ModelResource::new();
    read_model_resource(&config, "leaf", &mut model).unwrap();

    let mut loader = loader_with("a_color", 1.0);
    loader.insert(TextureResource::solid("b_alpha", 1.0));
    initialize_model_resource(&mut model, &mut loader).unwrap();
    assert_eq!(loader.released(), 0);
    initialize_model_resource(&mut model, &mut loader).unwrap();
    assert_eq!(loader.released(), 2);
    assert_eq!(model.textures().len(), 2);

    let mut device = SoftwareDevice::new();
    shutdown_model_resource(&mut model, &mut device, &mut loader);
    assert_eq!(loader.released(), 4);
}
