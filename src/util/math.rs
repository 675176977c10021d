//! Math type re-exports and the bounding volumes stored in artifacts.

pub use glam::{Mat4, Vec2, Vec3, Vec4};

use bytemuck::{Pod, Zeroable};
use std::fmt;

/// Axis-aligned bounding box with single precision.
///
/// Stored verbatim in the metadata artifact, so the layout is fixed at 24 bytes.
#[derive(Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct AxisAlignedBox {
    pub min: Vec3,
    pub max: Vec3,
}

impl AxisAlignedBox {
    /// Invalid (inverted) box, will expand on first point.
    pub const INVALID: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    /// Create a new box from min and max points.
    #[inline]
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Reset to the invalid state.
    #[inline]
    pub fn make_invalid(&mut self) {
        *self = Self::INVALID;
    }

    /// True once at least one point has been added.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.min.x <= self.max.x && self.min.y <= self.max.y && self.min.z <= self.max.z
    }

    /// Expand this box to include a point.
    #[inline]
    pub fn expand_by_point(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    /// Expand this box to include another box.
    #[inline]
    pub fn expand_by_box(&mut self, other: &Self) {
        if other.is_valid() {
            self.min = self.min.min(other.min);
            self.max = self.max.max(other.max);
        }
    }

    /// Get the center of the box.
    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Get the size (extents) of the box.
    #[inline]
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }
}

impl Default for AxisAlignedBox {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Debug for AxisAlignedBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AxisAlignedBox({:?} - {:?})", self.min, self.max)
    }
}

/// Bounding sphere (16 bytes on disk).
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
#[repr(C)]
pub struct BoundingSphere {
    pub center: Vec3,
    pub radius: f32,
}

impl BoundingSphere {
    /// Smallest sphere centered on the box center containing every point.
    pub fn around_points(aa_box: &AxisAlignedBox, points: &[Vec3]) -> Self {
        if !aa_box.is_valid() {
            return Self::default();
        }
        let center = aa_box.center();
        let radius = points
            .iter()
            .map(|p| p.distance(center))
            .fold(0.0f32, f32::max);
        Self { center, radius }
    }
}

/// Round `value` up to a multiple of the power-of-two `alignment`.
#[inline]
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_box_expand() {
        let mut b = AxisAlignedBox::INVALID;
        assert!(!b.is_valid());
        b.expand_by_point(Vec3::new(1.0, 2.0, 3.0));
        b.expand_by_point(Vec3::new(-1.0, 0.0, 5.0));
        assert!(b.is_valid());
        assert_eq!(b.min, Vec3::new(-1.0, 0.0, 3.0));
        assert_eq!(b.max, Vec3::new(1.0, 2.0, 5.0));
        assert_eq!(b.center(), Vec3::new(0.0, 1.0, 4.0));

        b.make_invalid();
        assert!(!b.is_valid());
    }

    #[test]
    fn test_box_layout() {
        assert_eq!(std::mem::size_of::<AxisAlignedBox>(), 24);
        assert_eq!(std::mem::size_of::<BoundingSphere>(), 16);
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 16), 0);
        assert_eq!(align_up(1, 16), 16);
        assert_eq!(align_up(16, 16), 16);
        assert_eq!(align_up(17, 16), 32);
        assert_eq!(align_up(5, 4), 8);
    }

    #[test]
    fn test_sphere_contains_points() {
        let pts = [Vec3::ZERO, Vec3::new(2.0, 0.0, 0.0), Vec3::new(0.0, 2.0, 0.0)];
        let mut b = AxisAlignedBox::INVALID;
        pts.iter().for_each(|p| b.expand_by_point(*p));
        let s = BoundingSphere::around_points(&b, &pts);
        for p in pts {
            assert!(p.distance(s.center) <= s.radius + 1e-6);
        }
    }
}
