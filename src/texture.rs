//! Texture resources consumed by the alpha test and displacement callbacks.
//!
//! Decoding image formats is the texture pipeline's job; a model only needs
//! something it can sample by uv. [`TextureLoader`] is the seam.

use std::collections::HashMap;

use crate::util::{Error, Result, Vec2, Vec4};

/// Decoded texture with f32 texels, row-major, `channels` per texel.
#[derive(Clone, PartialEq)]
pub struct TextureResource {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub texels: Vec<f32>,
}

impl TextureResource {
    pub fn new(name: impl Into<String>, width: u32, height: u32, channels: u32, texels: Vec<f32>) -> Result<Self> {
        let name = name.into();
        if width == 0 || height == 0 || !(1..=4).contains(&channels) {
            return Err(Error::Texture {
                name,
                reason: format!("invalid extent {width}x{height}x{channels}"),
            });
        }
        let expected = width as usize * height as usize * channels as usize;
        if texels.len() != expected {
            return Err(Error::Texture {
                name,
                reason: format!("{} texels for {expected} expected", texels.len()),
            });
        }
        Ok(Self {
            name,
            width,
            height,
            channels,
            texels,
        })
    }

    /// Single texel of `value` in every channel.
    pub fn solid(name: impl Into<String>, value: f32) -> Self {
        Self {
            name: name.into(),
            width: 1,
            height: 1,
            channels: 4,
            texels: vec![value; 4],
        }
    }

    #[inline]
    fn texel(&self, x: u32, y: u32) -> Vec4 {
        let base = (y as usize * self.width as usize + x as usize) * self.channels as usize;
        let t = &self.texels[base..base + self.channels as usize];
        match t.len() {
            1 => Vec4::new(t[0], t[0], t[0], 1.0),
            2 => Vec4::new(t[0], t[0], t[0], t[1]),
            3 => Vec4::new(t[0], t[1], t[2], 1.0),
            _ => Vec4::new(t[0], t[1], t[2], t[3]),
        }
    }

    /// Bilinear sample with wrap addressing.
    pub fn sample(&self, uv: Vec2) -> Vec4 {
        let x = uv.x.rem_euclid(1.0) * self.width as f32 - 0.5;
        let y = uv.y.rem_euclid(1.0) * self.height as f32 - 0.5;
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;

        let wrap = |v: f32, n: u32| (v as i64).rem_euclid(n as i64) as u32;
        let (xa, xb) = (wrap(x0, self.width), wrap(x0 + 1.0, self.width));
        let (ya, yb) = (wrap(y0, self.height), wrap(y0 + 1.0, self.height));

        let top = self.texel(xa, ya).lerp(self.texel(xb, ya), fx);
        let bottom = self.texel(xa, yb).lerp(self.texel(xb, yb), fx);
        top.lerp(bottom, fy)
    }

    /// First channel of [`sample`](Self::sample); what scalar maps read.
    #[inline]
    pub fn sample_scalar(&self, uv: Vec2) -> f32 {
        self.sample(uv).x
    }
}

impl std::fmt::Debug for TextureResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "TextureResource({:?}, {}x{}x{})",
            self.name, self.width, self.height, self.channels
        )
    }
}

/// Source of texture resources for a model.
pub trait TextureLoader {
    fn read_texture_resource(&mut self, name: &str) -> Result<TextureResource>;

    /// Release anything the loader holds for `texture`.
    fn shutdown_texture_resource(&mut self, texture: &mut TextureResource) {
        texture.texels = Vec::new();
    }
}

/// Serves textures registered up front.
#[derive(Debug, Default)]
pub struct MemoryTextureLoader {
    textures: HashMap<String, TextureResource>,
    released: usize,
}

impl MemoryTextureLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, texture: TextureResource) {
        self.textures.insert(texture.name.clone(), texture);
    }

    /// Textures handed back through [`TextureLoader::shutdown_texture_resource`].
    pub fn released(&self) -> usize {
        self.released
    }
}

impl TextureLoader for MemoryTextureLoader {
    fn read_texture_resource(&mut self, name: &str) -> Result<TextureResource> {
        self.textures.get(name).cloned().ok_or_else(|| Error::Texture {
            name: name.to_string(),
            reason: "not registered".into(),
        })
    }

    fn shutdown_texture_resource(&mut self, texture: &mut TextureResource) {
        texture.texels = Vec::new();
        self.released += 1;
    }
}

/// Answers every request with a 1x1 white texture.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaceholderTextureLoader;

impl TextureLoader for PlaceholderTextureLoader {
    fn read_texture_resource(&mut self, name: &str) -> Result<TextureResource> {
        tracing::debug!(texture = name, "placeholder texture");
        Ok(TextureResource::solid(name, 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker() -> TextureResource {
        // 2x2, single channel: 0 1 / 1 0
        TextureResource::new("checker", 2, 2, 1, vec![0.0, 1.0, 1.0, 0.0]).unwrap()
    }

    #[test]
    fn test_sample_texel_centers() {
        let t = checker();
        assert_eq!(t.sample_scalar(Vec2::new(0.25, 0.25)), 0.0);
        assert_eq!(t.sample_scalar(Vec2::new(0.75, 0.25)), 1.0);
        assert_eq!(t.sample_scalar(Vec2::new(0.25, 0.75)), 1.0);
    }

    #[test]
    fn test_sample_blends() {
        let t = checker();
        let v = t.sample_scalar(Vec2::new(0.5, 0.25));
        assert!((v - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_bad_extent() {
        assert!(TextureResource::new("x", 2, 2, 1, vec![0.0; 3]).is_err());
        assert!(TextureResource::new("x", 0, 2, 1, vec![]).is_err());
    }

    #[test]
    fn test_memory_loader() {
        let mut loader = MemoryTextureLoader::new();
        loader.insert(checker());
        let mut t = loader.read_texture_resource("checker").unwrap();
        assert_eq!(t.width, 2);
        assert!(loader.read_texture_resource("missing").is_err());
        loader.shutdown_texture_resource(&mut t);
        assert!(t.texels.is_empty());
        assert_eq!(loader.released(), 1);
    }

    #[test]
    fn test_placeholder_is_white() {
        let t = PlaceholderTextureLoader.read_texture_resource("any").unwrap();
        assert_eq!(t.sample_scalar(Vec2::new(0.3, 0.9)), 1.0);
    }
}
