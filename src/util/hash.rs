//! Name hashing.
//!
//! Mesh, curve and material names are reduced to 32-bit hashes at build time;
//! the loader only ever compares hashes.

use xxhash_rust::xxh32::xxh32;

/// 32-bit name hash stored in mesh/curve/material records.
pub type Hash32 = u32;

/// Hash a name for material lookup.
#[inline]
pub fn hash_name(name: &str) -> Hash32 {
    xxh32(name.as_bytes(), 0)
}
