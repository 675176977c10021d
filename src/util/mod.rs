//! Utility types shared by the build and load paths.
//!
//! - [`Error`] / [`Result`] - Error handling
//! - Math re-exports from glam plus the on-disk bounding volumes
//! - Name hashing

mod error;
mod hash;
mod math;

pub use error::*;
pub use hash::*;
pub use math::*;
