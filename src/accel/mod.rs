//! Ray-tracing acceleration structures.
//!
//! - [`device`] - backend trait, handles, shared buffers and callback hooks
//! - [`software`] - CPU reference backend built on [`bvh`]

pub mod bvh;
pub mod device;
pub mod software;

pub use device::*;
pub use software::{AttachedGeometryInfo, Hit, Ray, SoftwareDevice};
