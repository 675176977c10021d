//! Loaded model: both artifacts, their textures and the acceleration structure built from them.

use crate::accel::{AccelerationDevice, SceneHandle};
use crate::build::asset_file_path;
use crate::config::BuildConfig;
use crate::io::{read_whole_file, AlignedBlock};
use crate::texture::{TextureLoader, TextureResource};
use crate::util::{Error, Result};

use super::data::{
    ModelGeometryData, ModelResourceData, MODEL_DATA_TYPE, MODEL_DATA_VERSION, MODEL_GEOMETRY_DATA_TYPE,
};
use super::material::{Material, MaterialRef, TEXTURE_SLOT_COUNT};
use super::populate::GeometryUserData;

/// A baked model and everything derived from it at load time.
///
/// Goes through [`read_model_resource`], [`initialize_model_resource`] and
/// [`initialize_acceleration_structure`](super::initialize_acceleration_structure),
/// and is torn down by [`shutdown_model_resource`]. One instance is owned by
/// one thread at a time.
#[derive(Debug, Default)]
pub struct ModelResource {
    pub name: String,
    pub(crate) data: Option<ModelResourceData>,
    pub(crate) geometry: Option<ModelGeometryData>,
    pub(crate) textures: Vec<TextureResource>,
    pub(crate) default_material: Option<Material>,
    pub(crate) scene: Option<SceneHandle>,
    /// Indexed by attached geometry id.
    pub(crate) user_datas: Vec<GeometryUserData>,
}

impl ModelResource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data(&self) -> Option<&ModelResourceData> {
        self.data.as_ref()
    }

    pub fn geometry(&self) -> Option<&ModelGeometryData> {
        self.geometry.as_ref()
    }

    pub fn textures(&self) -> &[TextureResource] {
        &self.textures
    }

    pub fn default_material(&self) -> Option<&Material> {
        self.default_material.as_ref()
    }

    pub fn scene(&self) -> Option<SceneHandle> {
        self.scene
    }

    pub fn user_datas(&self) -> &[GeometryUserData] {
        &self.user_datas
    }

    /// Per-geometry record of attached geometry `geom_id`.
    pub fn user_data(&self, geom_id: u32) -> Option<&GeometryUserData> {
        self.user_datas.get(geom_id as usize)
    }

    /// Resolve a material reference.
    pub fn material(&self, material: MaterialRef) -> Option<&Material> {
        match material {
            MaterialRef::Scene(index) => self.data.as_ref()?.materials().get(index),
            MaterialRef::Default => self.default_material.as_ref(),
        }
    }

    pub fn texture(&self, index: usize) -> Option<&TextureResource> {
        self.textures.get(index)
    }

    pub fn is_loaded(&self) -> bool {
        self.data.is_some() && self.geometry.is_some()
    }
}

fn read_artifact(config: &BuildConfig, asset_type: &str, name: &str) -> Result<Option<AlignedBlock>> {
    let path = asset_file_path(&config.asset_root, asset_type, name, MODEL_DATA_VERSION);
    match read_whole_file(&path, config.load_mode) {
        Ok(block) => Ok(Some(block)),
        Err(Error::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Read and fix up both artifacts of model `name`.
///
/// Fails with `NotFound` when neither artifact exists and with `Inconsistent`
/// when only one does.
#[tracing::instrument(skip(config, model))]
pub fn read_model_resource(config: &BuildConfig, name: &str, model: &mut ModelResource) -> Result<()> {
    let metadata = read_artifact(config, MODEL_DATA_TYPE, name)?;
    let geometry = read_artifact(config, MODEL_GEOMETRY_DATA_TYPE, name)?;

    let (metadata, geometry) = match (metadata, geometry) {
        (Some(m), Some(g)) => (m, g),
        (None, None) => {
            return Err(Error::NotFound(asset_file_path(
                &config.asset_root,
                MODEL_DATA_TYPE,
                name,
                MODEL_DATA_VERSION,
            )))
        }
        (None, Some(_)) => {
            return Err(Error::inconsistent(format!(
                "{MODEL_GEOMETRY_DATA_TYPE} '{name}' exists without its {MODEL_DATA_TYPE}"
            )))
        }
        (Some(_), None) => {
            return Err(Error::inconsistent(format!(
                "{MODEL_DATA_TYPE} '{name}' exists without its {MODEL_GEOMETRY_DATA_TYPE}"
            )))
        }
    };

    let data = ModelResourceData::attach(metadata)?;
    let geometry = ModelGeometryData::attach(geometry)?;
    geometry.validate_against(&data)?;

    tracing::debug!(
        meshes = data.meshes().len(),
        curves = data.curves().len(),
        vertices = data.total_vertex_count,
        mapped = geometry.block().is_mapped(),
        "model read"
    );
    model.name = name.to_string();
    model.data = Some(data);
    model.geometry = Some(geometry);
    Ok(())
}

/// Load the model's textures and create its default material.
pub fn initialize_model_resource(model: &mut ModelResource, loader: &mut dyn TextureLoader) -> Result<()> {
    let data = model
        .data
        .as_ref()
        .ok_or_else(|| Error::other(format!("model '{}' has not been read", model.name)))?;

    let texture_count = data.texture_resource_names.len();
    for (i, material) in data.materials().iter().enumerate() {
        for slot in 0..TEXTURE_SLOT_COUNT {
            let index = material.texture_indices[slot];
            if index != super::material::INVALID_TEXTURE_INDEX && index as usize >= texture_count {
                return Err(Error::inconsistent(format!(
                    "material {i} references texture {index} of {texture_count}"
                )));
            }
        }
    }

    let mut textures = Vec::with_capacity(texture_count);
    for name in &data.texture_resource_names {
        match loader.read_texture_resource(name) {
            Ok(texture) => textures.push(texture),
            Err(e) => {
                release_textures(&mut textures, loader);
                return Err(e);
            }
        }
    }
    release_textures(&mut model.textures, loader);
    model.textures = textures;
    model.default_material = Some(Material::default_surface());
    tracing::debug!(model = %model.name, textures = texture_count, "model initialized");
    Ok(())
}

fn release_textures(textures: &mut Vec<TextureResource>, loader: &mut dyn TextureLoader) {
    for texture in textures.iter_mut() {
        loader.shutdown_texture_resource(texture);
    }
    textures.clear();
}

/// Release everything the model holds. Safe to call repeatedly and after a partial initialize.
pub fn shutdown_model_resource(
    model: &mut ModelResource,
    device: &mut dyn AccelerationDevice,
    loader: &mut dyn TextureLoader,
) {
    if let Some(scene) = model.scene.take() {
        device.release_scene(scene);
    }
    model.user_datas.clear();
    release_textures(&mut model.textures, loader);
    model.default_material = None;
    model.data = None;
    model.geometry = None;
}
