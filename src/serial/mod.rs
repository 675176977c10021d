//! Relocatable binary serialization.
//!
//! A serialized buffer is a fixed header followed by pointer blocks. The header
//! stores each block's position as an offset from the buffer origin, so the
//! buffer can be read or memory-mapped at any address and then fixed up in a
//! single pass by walking the same field sequence that wrote it.

mod format;
mod reader;
mod writer;

pub use format::*;
pub use reader::*;
pub use writer::*;
