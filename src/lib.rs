//! # Scene Bake
//!
//! Offline baking of 3D scenes into relocatable binary artifacts, and the
//! runtime loader that maps them back and populates a ray-tracing
//! acceleration structure.
//!
//! ## Modules
//!
//! - [`util`] - Errors, math types, bounding volumes, name hashing
//! - [`config`] - Build/load configuration
//! - [`io`] - Aligned blocks, whole-file read/write
//! - [`serial`] - Relocatable writer/reader and the artifact header
//! - [`build`] - Build context, scene flattening, bake
//! - [`model`] - Artifact records, model loading, acceleration population
//! - [`accel`] - Backend interface and a software BVH backend
//! - [`texture`] - Texture resources and loaders
//!
//! ## Example
//!
//! ```ignore
//! use scene_bake::prelude::*;
//!
//! let config = BuildConfig::load("bake.json")?;
//! let mut model = ModelResource::new();
//! read_model_resource(&config, "sponza", &mut model)?;
//! initialize_model_resource(&mut model, &mut PlaceholderTextureLoader)?;
//!
//! let mut device = SoftwareDevice::new();
//! initialize_acceleration_structure(&mut model, &mut device, &config)?;
//! ```

pub mod accel;
pub mod build;
pub mod config;
pub mod io;
pub mod model;
pub mod serial;
pub mod texture;
pub mod util;

// Re-export commonly used types
pub use util::{Error, ErrorKind, Result};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::accel::{AccelerationDevice, GeometryKind, Hit, Ray, SoftwareDevice};
    pub use crate::build::{bake_scene, build_scene, BuildProcessorContext, BuiltScene, ContentId, AssetId, ImportedModel};
    pub use crate::config::{BuildConfig, LoadMode};
    pub use crate::model::{
        initialize_acceleration_structure, initialize_model_resource, read_model_resource, shutdown_model_resource,
        ModelResource,
    };
    pub use crate::texture::{MemoryTextureLoader, PlaceholderTextureLoader, TextureLoader, TextureResource};
    pub use crate::util::{Error, ErrorKind, Result};
}
