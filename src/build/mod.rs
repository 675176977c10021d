//! Bake path: asset identity, per-build bookkeeping, scene flattening and
//! serialization of the two model artifacts.

mod asset;
mod bake;
mod context;
mod scene;

pub use asset::*;
pub use bake::*;
pub use context::*;
pub use scene::*;
