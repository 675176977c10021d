//! Intersection-filter and displacement hooks of a loaded model.
//!
//! The backend calls these with the attached geometry id, which indexes the
//! model's [`GeometryUserData`](super::GeometryUserData) table.

use crate::accel::{CandidateHit, DisplacementBatch, GeometryCallbacks};
use crate::util::{Vec2, Vec3};

use super::data::MeshIndexType;
use super::material::{Material, MaterialFlags, ScalarAttribute, TextureSlot};
use super::populate::{GeometrySource, GeometryUserData};
use super::resource::ModelResource;

/// Interpolate per-corner values at face parameters `(u, v)`.
///
/// Triangles use barycentrics, quads bilinear weights over corners in order.
pub fn interpolate_face<T>(corners: &[T], u: f32, v: f32) -> T
where
    T: Copy + std::ops::Mul<f32, Output = T> + std::ops::Add<Output = T>,
{
    if corners.len() == 3 {
        corners[0] * (1.0 - u - v) + corners[1] * u + corners[2] * v
    } else {
        corners[0] * ((1.0 - u) * (1.0 - v)) + corners[1] * (u * (1.0 - v)) + corners[2] * (u * v) + corners[3] * ((1.0 - u) * v)
    }
}

/// True when a sampled `alpha` reaches the material's cutoff.
pub fn alpha_test(material: &Material, alpha: f32) -> bool {
    alpha >= material.scalar(ScalarAttribute::AlphaCutoff)
}

impl ModelResource {
    /// Texture coordinates at `(u, v)` on face `prim_id` of the mesh behind `user_data`.
    ///
    /// `None` for curves, models without uvs and out-of-range faces.
    pub fn face_uv(&self, user_data: &GeometryUserData, prim_id: u32, u: f32, v: f32) -> Option<Vec2> {
        let GeometrySource::Mesh(mesh_index) = user_data.source else {
            return None;
        };
        let data = self.data.as_ref()?;
        let geo = self.geometry.as_ref()?;
        let uvs = geo.uvs();
        if uvs.is_empty() {
            return None;
        }
        let mesh = data.meshes().get(mesh_index)?;
        let index_type = mesh.index_type()?;
        let ipf = index_type.indices_per_face() as usize;
        let first = mesh.index_offset as usize + prim_id as usize * ipf;
        if (prim_id as usize + 1) * ipf > mesh.index_count as usize {
            return None;
        }
        let indices = geo.indices(index_type).get(first..first + ipf)?;

        let mut corners = [Vec2::ZERO; 4];
        for (corner, &i) in corners.iter_mut().zip(indices) {
            *corner = *uvs.get(i as usize)?;
        }
        let corners = match index_type {
            MeshIndexType::Triangle => &corners[..3],
            MeshIndexType::Quad => &corners[..],
        };
        Some(interpolate_face(corners, u, v))
    }

    /// Alpha test of one candidate hit. Passes when there is nothing to test against.
    pub fn alpha_test_passes(&self, user_data: &GeometryUserData, material: &Material, prim_id: u32, u: f32, v: f32) -> bool {
        let Some(texture) = material.texture(TextureSlot::Alpha).and_then(|i| self.texture(i)) else {
            return true;
        };
        let Some(uv) = self.face_uv(user_data, prim_id, u, v) else {
            return true;
        };
        alpha_test(material, texture.sample_scalar(uv))
    }
}

impl GeometryCallbacks for ModelResource {
    fn intersect_filter(&self, geom_id: u32, hits: &mut [CandidateHit]) {
        let Some(user_data) = self.user_data(geom_id) else {
            return;
        };
        let Some(material) = self.material(user_data.material) else {
            return;
        };
        if !material.flags().contains(MaterialFlags::ALPHA_TESTED) {
            return;
        }
        for hit in hits.iter_mut().filter(|h| h.valid) {
            if !self.alpha_test_passes(user_data, material, hit.prim_id, hit.u, hit.v) {
                hit.valid = false;
            }
        }
    }

    fn displace(&self, geom_id: u32, batch: DisplacementBatch<'_>) {
        let Some(user_data) = self.user_data(geom_id) else {
            return;
        };
        let Some(material) = self.material(user_data.material) else {
            return;
        };
        let Some(texture) = material.texture(TextureSlot::Displacement).and_then(|i| self.texture(i)) else {
            return;
        };
        let scale = material.scalar(ScalarAttribute::DisplacementScale);

        for ((position, normal), param) in batch.positions.iter_mut().zip(batch.normals).zip(batch.uvs) {
            let uv = self
                .face_uv(user_data, batch.prim_id, param.x, param.y)
                .unwrap_or(*param);
            let offset: Vec3 = *normal * (texture.sample_scalar(uv) * scale);
            *position += offset;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolate_triangle() {
        let c = [Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0), Vec2::new(0.0, 1.0)];
        assert_eq!(interpolate_face(&c, 0.25, 0.5), Vec2::new(0.25, 0.5));
    }

    #[test]
    fn test_interpolate_quad() {
        let c = [
            Vec2::new(0.0, 0.0),
            Vec2::new(2.0, 0.0),
            Vec2::new(2.0, 2.0),
            Vec2::new(0.0, 2.0),
        ];
        assert_eq!(interpolate_face(&c, 0.5, 0.25), Vec2::new(1.0, 0.5));
        assert_eq!(interpolate_face(&[0.0f32, 1.0, 1.0, 0.0], 1.0, 0.0), 1.0);
    }

    #[test]
    fn test_alpha_cutoff() {
        let m = Material::default();
        assert!(alpha_test(&m, 0.5));
        assert!(alpha_test(&m, 1.0));
        assert!(!alpha_test(&m, 0.0));
    }
}
