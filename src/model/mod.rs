//! Model resources: the two baked artifacts, their loader and the
//! acceleration-structure population built on top of them.

mod callbacks;
mod data;
mod material;
mod populate;
mod resource;

pub use callbacks::*;
pub use data::*;
pub use material::*;
pub use populate::*;
pub use resource::*;
