//! model-info - inspect baked model artifacts.

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use scene_bake::accel::{Ray, SoftwareDevice};
use scene_bake::config::BuildConfig;
use scene_bake::model::{
    initialize_acceleration_structure, initialize_model_resource, read_model_resource, shutdown_model_resource,
    ModelResource,
};
use scene_bake::texture::PlaceholderTextureLoader;
use tracing_subscriber::EnvFilter;

fn print_help() {
    println!("model-info - inspect baked model artifacts");
    println!();
    println!("Usage:");
    println!("  model-info info <asset-root> <name>       Artifact summary");
    println!("  model-info populate <asset-root> <name>   Build the acceleration structure and list geometries");
    println!();
    println!("Options:");
    println!("  -c, --config <file>   Build config (JSON)");
    println!("  -v, --verbose         Debug logging");
    println!("  -vv, --trace          Trace logging");
    println!("  -q, --quiet           Errors only");
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();

    let mut level = "info";
    let mut config_path: Option<PathBuf> = None;
    let mut positional: Vec<&str> = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-v" | "--verbose" => level = "debug",
            "-vv" | "--trace" => level = "trace",
            "-q" | "--quiet" => level = "error",
            "-c" | "--config" => config_path = iter.next().map(PathBuf::from),
            "-h" | "--help" => {
                print_help();
                return ExitCode::SUCCESS;
            }
            _ => positional.push(arg),
        }
    }
    init_logging(level);

    let [command, asset_root, name] = positional[..] else {
        print_help();
        return ExitCode::FAILURE;
    };

    let config = match config_path.map(BuildConfig::load).transpose() {
        Ok(config) => config.unwrap_or_default(),
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };
    let config = BuildConfig {
        asset_root: PathBuf::from(asset_root),
        ..config
    };

    let result = match command {
        "info" | "i" => cmd_info(&config, name, false),
        "populate" | "p" => cmd_info(&config, name, true),
        other => {
            eprintln!("Error: unknown command '{other}'");
            print_help();
            return ExitCode::FAILURE;
        }
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn cmd_info(config: &BuildConfig, name: &str, populate: bool) -> scene_bake::Result<()> {
    let mut model = ModelResource::new();
    read_model_resource(config, name, &mut model)?;

    if let (Some(data), Some(geo)) = (model.data(), model.geometry()) {
        println!("Model: {name}");
        println!("  Bounds:     {:?}", data.aa_box);
        println!(
            "  Sphere:     center {:?} radius {:.3}",
            data.bounding_sphere.center, data.bounding_sphere.radius
        );
        println!("  Vertices:   {}", data.total_vertex_count);
        println!("  Triangles:  {}", data.index_counts[0] / 3);
        println!("  Quads:      {}", data.index_counts[1] / 4);
        println!("  Meshes:     {}", data.meshes().len());
        println!("  Curves:     {} ({} control points)", data.curves().len(), data.total_curve_vertex_count);
        println!("  Cameras:    {}", data.cameras().len());
        println!("  Materials:  {}", data.materials().len());
        println!(
            "  Attributes: normals={} tangents={} uvs={}",
            geo.has_normals(),
            geo.has_tangents(),
            geo.has_uvs()
        );
        for texture in &data.texture_resource_names {
            println!("  Texture:    {texture}");
        }
    }

    if !populate {
        return Ok(());
    }

    let mut loader = PlaceholderTextureLoader;
    let mut device = SoftwareDevice::new();
    let result = populate_and_probe(&mut model, &mut device, &mut loader, config);
    shutdown_model_resource(&mut model, &mut device, &mut loader);
    result
}

fn populate_and_probe(
    model: &mut ModelResource,
    device: &mut SoftwareDevice,
    loader: &mut PlaceholderTextureLoader,
    config: &BuildConfig,
) -> scene_bake::Result<()> {
    initialize_model_resource(model, loader)?;
    initialize_acceleration_structure(model, device, config)?;

    let Some(scene) = model.scene() else {
        return Ok(());
    };
    println!("Geometries: {}", model.user_datas().len());
    for (id, user_data) in model.user_datas().iter().enumerate() {
        println!(
            "  [{id}] {:<20} {:?} material={:?} flags={:?}",
            user_data.kind, user_data.source, user_data.material, user_data.material_flags
        );
    }
    println!("Primitives: {}", device.built_primitive_count(scene));

    // One probe ray from the first camera towards its target.
    if let Some(camera) = model.data().and_then(|d| d.cameras().first().copied()) {
        let ray = Ray::new(camera.position, camera.look_at - camera.position);
        match device.intersect(scene, &ray, &*model)? {
            Some(hit) => println!(
                "Probe: hit geometry {} primitive {} at t={:.4}",
                hit.geom_id, hit.prim_id, hit.t
            ),
            None if camera.look_at == camera.position => println!("Probe: camera has no view direction"),
            None => println!("Probe: miss"),
        }
    }
    Ok(())
}
