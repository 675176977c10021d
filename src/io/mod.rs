//! File access and aligned in-memory blocks.

mod block;
mod file;

pub use block::*;
pub use file::*;
