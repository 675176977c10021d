//! Material records and material resolution.
//!
//! Materials are stored in the metadata artifact as fixed 68-byte records,
//! sorted by name hash with a parallel hash array. Shading itself is not
//! evaluated here; only the parts the acceleration structure needs (flags,
//! alpha cutoff, displacement scale, texture bindings) are interpreted.

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

use crate::util::Hash32;

bitflags! {
    /// Material behaviour flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MaterialFlags: u32 {
        const ALPHA_TESTED = 1 << 0;
        const DISPLACEMENT_ENABLED = 1 << 1;
        const PRESERVE_RAY_DIFFERENTIALS = 1 << 2;
        const TRANSPARENT = 1 << 3;
    }
}

/// Shading model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ShaderType {
    DisneySolid = 0,
    DisneyThin = 1,
    TransparentGgx = 2,
}

impl ShaderType {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::DisneySolid),
            1 => Some(Self::DisneyThin),
            2 => Some(Self::TransparentGgx),
            _ => None,
        }
    }
}

/// Scalar material parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum ScalarAttribute {
    Ior = 0,
    Roughness,
    Metalness,
    DisplacementScale,
    AlphaCutoff,
    Transmission,
    SpecularTint,
    Anisotropic,
}

pub const SCALAR_ATTRIBUTE_COUNT: usize = 8;

/// Texture bindings of a material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum TextureSlot {
    BaseColor = 0,
    Alpha,
    Displacement,
    Normal,
}

pub const TEXTURE_SLOT_COUNT: usize = 4;

/// Marks an unbound texture slot.
pub const INVALID_TEXTURE_INDEX: u32 = u32::MAX;

/// On-disk material record.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Material {
    pub base_color: [f32; 3],
    pub shader: u32,
    pub flags: u32,
    /// Indices into the model's texture list, [`INVALID_TEXTURE_INDEX`] when unbound.
    pub texture_indices: [u32; TEXTURE_SLOT_COUNT],
    pub scalar_attribute_values: [f32; SCALAR_ATTRIBUTE_COUNT],
}

impl Default for Material {
    fn default() -> Self {
        let mut scalars = [0.0; SCALAR_ATTRIBUTE_COUNT];
        scalars[ScalarAttribute::Ior as usize] = 1.5;
        scalars[ScalarAttribute::Roughness as usize] = 0.5;
        scalars[ScalarAttribute::AlphaCutoff as usize] = 0.5;
        Self {
            base_color: [1.0; 3],
            shader: ShaderType::DisneySolid as u32,
            flags: 0,
            texture_indices: [INVALID_TEXTURE_INDEX; TEXTURE_SLOT_COUNT],
            scalar_attribute_values: scalars,
        }
    }
}

impl Material {
    /// The flat gray material used when a mesh or curve has no material of its own.
    pub fn default_surface() -> Self {
        Self {
            base_color: [0.6, 0.6, 0.6],
            ..Self::default()
        }
    }

    #[inline]
    pub fn flags(&self) -> MaterialFlags {
        MaterialFlags::from_bits_truncate(self.flags)
    }

    #[inline]
    pub fn set_flags(&mut self, flags: MaterialFlags) {
        self.flags = flags.bits();
    }

    #[inline]
    pub fn shader(&self) -> Option<ShaderType> {
        ShaderType::from_u32(self.shader)
    }

    #[inline]
    pub fn scalar(&self, attribute: ScalarAttribute) -> f32 {
        self.scalar_attribute_values[attribute as usize]
    }

    #[inline]
    pub fn set_scalar(&mut self, attribute: ScalarAttribute, value: f32) {
        self.scalar_attribute_values[attribute as usize] = value;
    }

    /// Bound texture index for `slot`.
    #[inline]
    pub fn texture(&self, slot: TextureSlot) -> Option<usize> {
        match self.texture_indices[slot as usize] {
            INVALID_TEXTURE_INDEX => None,
            index => Some(index as usize),
        }
    }
}

/// Which material a geometry uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialRef {
    /// Index into the model's sorted material list.
    Scene(usize),
    /// The model's default material.
    Default,
}

/// Look `hash` up in the sorted `material_hashes`.
///
/// Misses and an empty list both resolve to [`MaterialRef::Default`].
pub fn resolve_material(material_hashes: &[Hash32], hash: Hash32) -> MaterialRef {
    match material_hashes.binary_search(&hash) {
        Ok(index) => MaterialRef::Scene(index),
        Err(_) => MaterialRef::Default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_material_layout() {
        assert_eq!(std::mem::size_of::<Material>(), 68);
    }

    #[test]
    fn test_default_surface() {
        let m = Material::default_surface();
        assert_eq!(m.base_color, [0.6, 0.6, 0.6]);
        assert_eq!(m.shader(), Some(ShaderType::DisneySolid));
        assert_eq!(m.scalar(ScalarAttribute::Ior), 1.5);
        assert!(m.flags().is_empty());
        assert_eq!(m.texture(TextureSlot::Alpha), None);
    }

    #[test]
    fn test_resolve_material() {
        let hashes = [3u32, 10, 42, 99];
        assert_eq!(resolve_material(&hashes, 42), MaterialRef::Scene(2));
        assert_eq!(resolve_material(&hashes, 3), MaterialRef::Scene(0));
        assert_eq!(resolve_material(&hashes, 43), MaterialRef::Default);
        assert_eq!(resolve_material(&[], 42), MaterialRef::Default);
    }

    #[test]
    fn test_flags_round_trip() {
        let mut m = Material::default();
        m.set_flags(MaterialFlags::ALPHA_TESTED | MaterialFlags::DISPLACEMENT_ENABLED);
        assert!(m.flags().contains(MaterialFlags::ALPHA_TESTED));
        assert!(m.flags().contains(MaterialFlags::DISPLACEMENT_ENABLED));
    }
}
