//! CPU reference implementation of [`AccelerationDevice`].
//!
//! Every primitive type is reduced to triangles or capsules and put in one
//! BVH per scene. Quads are split in two, subdivision faces are tessellated
//! into a flat grid (displaced through the callbacks at commit time) and
//! B-spline segments are approximated by a chain of capsules. Reported `u`/`v`
//! are always in the parameter space of the source primitive.

use std::collections::BTreeMap;

use smallvec::SmallVec;

use super::bvh::{build_bvh, intersect_box, Bvh, MAX_LEAF_SIZE};
use super::device::*;
use crate::util::{AxisAlignedBox, Error, Result, Vec2, Vec3};

/// Upper bound on grid segments per subdivision face edge.
pub const MAX_TESSELLATION: usize = 8;

/// Capsules per B-spline segment.
const CURVE_SUBDIVISIONS: usize = 4;

/// Optional vertex attribute slots.
const MAX_VERTEX_ATTRIBUTES: usize = 4;

/// A ray; `direction` need not be normalized, reported `t` is in world distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
    pub tnear: f32,
    pub tfar: f32,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction,
            tnear: 0.0,
            tfar: f32::INFINITY,
        }
    }
}

/// Closest accepted hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub t: f32,
    pub geom_id: u32,
    pub prim_id: u32,
    pub u: f32,
    pub v: f32,
    /// Geometric normal, unit length.
    pub normal: Vec3,
}

/// What the device knows about one attached geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachedGeometryInfo {
    pub kind: GeometryKind,
    pub has_intersect_filter: bool,
    pub has_displacement: bool,
    pub vertex_attribute_count: u32,
    pub tessellation_rate: f32,
    pub subdivision_mode: SubdivisionMode,
    /// Faces, or curve segments.
    pub primitive_count: usize,
}

#[derive(Debug, Clone)]
struct GeometryState {
    kind: GeometryKind,
    index: Option<SharedBuffer>,
    vertex: Option<SharedBuffer>,
    face: Option<SharedBuffer>,
    attributes: [Option<SharedBuffer>; MAX_VERTEX_ATTRIBUTES],
    attribute_count: u32,
    intersect_filter: bool,
    displacement: bool,
    tessellation_rate: f32,
    subdivision_mode: SubdivisionMode,
    committed: bool,
}

impl GeometryState {
    fn new(kind: GeometryKind) -> Self {
        Self {
            kind,
            index: None,
            vertex: None,
            face: None,
            attributes: Default::default(),
            attribute_count: 0,
            intersect_filter: false,
            displacement: false,
            tessellation_rate: 1.0,
            subdivision_mode: SubdivisionMode::default(),
            committed: false,
        }
    }

    fn primitive_count(&self) -> usize {
        match self.kind {
            GeometryKind::Subdivision => self.face.as_ref().map_or(0, |f| f.count),
            _ => self.index.as_ref().map_or(0, |i| i.count),
        }
    }

    fn vertex(&self, index: u32) -> Result<Vec3> {
        let vertex = self.required(&self.vertex, "vertex")?;
        if index as usize >= vertex.count {
            return Err(Error::inconsistent(format!(
                "vertex index {index} out of {} vertices",
                vertex.count
            )));
        }
        Ok(vertex.read_vec3(index as usize))
    }

    fn required<'a>(&self, buffer: &'a Option<SharedBuffer>, what: &str) -> Result<&'a SharedBuffer> {
        buffer
            .as_ref()
            .ok_or_else(|| Error::other(format!("{} geometry has no {what} buffer", self.kind)))
    }
}

/// Maps triangle barycentrics `(b1, b2)` to source primitive parameters.
#[derive(Debug, Clone, Copy)]
struct UvFrame {
    origin: Vec2,
    du: Vec2,
    dv: Vec2,
}

impl UvFrame {
    const IDENTITY: Self = Self {
        origin: Vec2::ZERO,
        du: Vec2::X,
        dv: Vec2::Y,
    };

    fn from_params(q0: Vec2, q1: Vec2, q2: Vec2) -> Self {
        Self {
            origin: q0,
            du: q1 - q0,
            dv: q2 - q0,
        }
    }

    #[inline]
    fn map(&self, b1: f32, b2: f32) -> Vec2 {
        self.origin + self.du * b1 + self.dv * b2
    }
}

#[derive(Debug, Clone, Copy)]
enum Shape {
    Triangle { p: [Vec3; 3], frame: UvFrame },
    Capsule { a: Vec3, b: Vec3, radius: f32, u0: f32, u1: f32 },
}

#[derive(Debug, Clone, Copy)]
struct Primitive {
    geom_id: u32,
    prim_id: u32,
    shape: Shape,
}

impl Primitive {
    fn bounds(&self) -> AxisAlignedBox {
        let mut b = AxisAlignedBox::INVALID;
        match self.shape {
            Shape::Triangle { p, .. } => p.iter().for_each(|&v| b.expand_by_point(v)),
            Shape::Capsule { a, b: end, radius, .. } => {
                let r = Vec3::splat(radius);
                b.expand_by_point(a - r);
                b.expand_by_point(a + r);
                b.expand_by_point(end - r);
                b.expand_by_point(end + r);
            }
        }
        b
    }

    /// `(t, u, v, normal)` of the nearest intersection inside `(tnear, tfar)`.
    fn intersect(&self, origin: Vec3, dir: Vec3, tnear: f32, tfar: f32) -> Option<(f32, f32, f32, Vec3)> {
        match self.shape {
            Shape::Triangle { p, frame } => {
                let (t, b1, b2) = intersect_triangle(origin, dir, p)?;
                if t <= tnear || t >= tfar {
                    return None;
                }
                let uv = frame.map(b1, b2);
                let normal = (p[1] - p[0]).cross(p[2] - p[0]).normalize_or_zero();
                Some((t, uv.x, uv.y, normal))
            }
            Shape::Capsule { a, b, radius, u0, u1 } => {
                let (t, s, normal) = intersect_capsule(origin, dir, a, b, radius, tnear, tfar)?;
                Some((t, u0 + (u1 - u0) * s, 0.0, normal))
            }
        }
    }
}

/// Moller-Trumbore: `(t, b1, b2)`.
fn intersect_triangle(origin: Vec3, dir: Vec3, p: [Vec3; 3]) -> Option<(f32, f32, f32)> {
    let e1 = p[1] - p[0];
    let e2 = p[2] - p[0];
    let pvec = dir.cross(e2);
    let det = e1.dot(pvec);
    if det.abs() < 1e-12 {
        return None;
    }
    let inv_det = 1.0 / det;
    let tvec = origin - p[0];
    let b1 = tvec.dot(pvec) * inv_det;
    if !(0.0..=1.0).contains(&b1) {
        return None;
    }
    let qvec = tvec.cross(e1);
    let b2 = dir.dot(qvec) * inv_det;
    if b2 < 0.0 || b1 + b2 > 1.0 {
        return None;
    }
    Some((e2.dot(qvec) * inv_det, b1, b2))
}

/// Ray against a capsule, `dir` unit length: `(t, axis parameter, normal)`.
fn intersect_capsule(
    origin: Vec3,
    dir: Vec3,
    a: Vec3,
    b: Vec3,
    radius: f32,
    tnear: f32,
    tfar: f32,
) -> Option<(f32, f32, Vec3)> {
    let in_range = |t: f32| t > tnear && t < tfar;
    let mut best: Option<(f32, f32, Vec3)> = None;
    let mut consider = |t: f32, s: f32, center: Vec3| {
        if in_range(t) && best.map_or(true, |(bt, _, _)| t < bt) {
            let normal = (origin + dir * t - center).normalize_or_zero();
            best = Some((t, s, normal));
        }
    };

    let ba = b - a;
    let oa = origin - a;
    let baba = ba.dot(ba);
    let bard = ba.dot(dir);
    let baoa = ba.dot(oa);
    let qa = baba - bard * bard;
    if baba > 0.0 && qa > 1e-12 {
        let qb = baba * dir.dot(oa) - baoa * bard;
        let qc = baba * oa.dot(oa) - baoa * baoa - radius * radius * baba;
        let h = qb * qb - qa * qc;
        if h >= 0.0 {
            let t = (-qb - h.sqrt()) / qa;
            let y = baoa + t * bard;
            if y > 0.0 && y < baba {
                let s = y / baba;
                consider(t, s, a + ba * s);
            }
        }
    }

    for (center, s) in [(a, 0.0), (b, 1.0)] {
        let oc = origin - center;
        let qb = dir.dot(oc);
        let h = qb * qb - (oc.dot(oc) - radius * radius);
        if h >= 0.0 {
            consider(-qb - h.sqrt(), s, center);
        }
    }
    best
}

/// Uniform cubic B-spline point, xyz + radius.
fn bspline_point(cp: &[(Vec3, f32); 4], t: f32) -> (Vec3, f32) {
    let it = 1.0 - t;
    let t2 = t * t;
    let t3 = t2 * t;
    let w = [
        it * it * it / 6.0,
        (3.0 * t3 - 6.0 * t2 + 4.0) / 6.0,
        (-3.0 * t3 + 3.0 * t2 + 3.0 * t + 1.0) / 6.0,
        t3 / 6.0,
    ];
    cp.iter()
        .zip(w)
        .fold((Vec3::ZERO, 0.0), |(p, r), (&(cp, cr), w)| (p + cp * w, r + cr * w))
}

/// Flat grid over one subdivision face.
struct FaceGrid {
    params: Vec<Vec2>,
    positions: Vec<Vec3>,
    normals: Vec<Vec3>,
    triangles: Vec<[usize; 3]>,
}

fn tessellate_face(corners: &[Vec3], corner_normals: Option<&[Vec3]>, n: usize) -> FaceGrid {
    let face_normal = match corners.len() {
        3 => (corners[1] - corners[0]).cross(corners[2] - corners[0]),
        _ => (corners[2] - corners[0]).cross(corners[3] - corners[1]),
    }
    .normalize_or_zero();

    let mut grid = FaceGrid {
        params: Vec::new(),
        positions: Vec::new(),
        normals: Vec::new(),
        triangles: Vec::new(),
    };
    let step = 1.0 / n as f32;

    if corners.len() == 3 {
        // Barycentric grid; row j holds n + 1 - j vertices.
        let mut starts = Vec::with_capacity(n + 1);
        for j in 0..=n {
            starts.push(grid.params.len());
            for i in 0..=(n - j) {
                let (u, v) = (i as f32 * step, j as f32 * step);
                let w = [1.0 - u - v, u, v];
                grid.params.push(Vec2::new(u, v));
                grid.positions.push(corners[0] * w[0] + corners[1] * w[1] + corners[2] * w[2]);
                grid.normals.push(match corner_normals {
                    Some(cn) => (cn[0] * w[0] + cn[1] * w[1] + cn[2] * w[2]).normalize_or_zero(),
                    None => face_normal,
                });
            }
        }
        for j in 0..n {
            for i in 0..(n - j) {
                let a = starts[j] + i;
                let b = a + 1;
                let c = starts[j + 1] + i;
                grid.triangles.push([a, b, c]);
                if i + 1 < n - j {
                    grid.triangles.push([b, c + 1, c]);
                }
            }
        }
    } else {
        let bilinear = |q: &[Vec3], u: f32, v: f32| {
            q[0] * ((1.0 - u) * (1.0 - v)) + q[1] * (u * (1.0 - v)) + q[2] * (u * v) + q[3] * ((1.0 - u) * v)
        };
        for j in 0..=n {
            for i in 0..=n {
                let (u, v) = (i as f32 * step, j as f32 * step);
                grid.params.push(Vec2::new(u, v));
                grid.positions.push(bilinear(corners, u, v));
                grid.normals.push(match corner_normals {
                    Some(cn) => bilinear(cn, u, v).normalize_or_zero(),
                    None => face_normal,
                });
            }
        }
        let at = |i: usize, j: usize| j * (n + 1) + i;
        for j in 0..n {
            for i in 0..n {
                grid.triangles.push([at(i, j), at(i + 1, j), at(i, j + 1)]);
                grid.triangles.push([at(i + 1, j + 1), at(i, j + 1), at(i + 1, j)]);
            }
        }
    }
    grid
}

#[derive(Debug, Default)]
struct SceneState {
    geometries: BTreeMap<u32, GeometryState>,
    primitives: Vec<Primitive>,
    bvh: Option<Bvh>,
}

/// Software BVH backend.
#[derive(Debug, Default)]
pub struct SoftwareDevice {
    scenes: Vec<Option<SceneState>>,
    geometries: Vec<Option<GeometryState>>,
}

impl SoftwareDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn geometry_mut(&mut self, handle: GeometryHandle) -> Result<&mut GeometryState> {
        self.geometries
            .get_mut(handle.0 as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| Error::other(format!("unknown geometry handle {}", handle.0)))
    }

    fn scene(&self, handle: SceneHandle) -> Result<&SceneState> {
        self.scenes
            .get(handle.0 as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| Error::other(format!("unknown scene handle {}", handle.0)))
    }

    fn scene_mut(&mut self, handle: SceneHandle) -> Result<&mut SceneState> {
        self.scenes
            .get_mut(handle.0 as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| Error::other(format!("unknown scene handle {}", handle.0)))
    }

    /// Geometries created and not yet released.
    pub fn live_geometry_count(&self) -> usize {
        self.geometries.iter().flatten().count()
    }

    pub fn live_scene_count(&self) -> usize {
        self.scenes.iter().flatten().count()
    }

    /// Ids attached to `scene`, ascending.
    pub fn attached_ids(&self, scene: SceneHandle) -> Vec<u32> {
        self.scene(scene)
            .map(|s| s.geometries.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn attached_geometry(&self, scene: SceneHandle, id: u32) -> Option<AttachedGeometryInfo> {
        let geometry = self.scene(scene).ok()?.geometries.get(&id)?;
        Some(AttachedGeometryInfo {
            kind: geometry.kind,
            has_intersect_filter: geometry.intersect_filter,
            has_displacement: geometry.displacement,
            vertex_attribute_count: geometry.attribute_count,
            tessellation_rate: geometry.tessellation_rate,
            subdivision_mode: geometry.subdivision_mode,
            primitive_count: geometry.primitive_count(),
        })
    }

    /// Triangles and capsules generated by the last commit.
    pub fn built_primitive_count(&self, scene: SceneHandle) -> usize {
        self.scene(scene).map_or(0, |s| s.primitives.len())
    }

    /// Closest hit accepted by every intersection filter.
    pub fn intersect(&self, scene: SceneHandle, ray: &Ray, callbacks: &dyn GeometryCallbacks) -> Result<Option<Hit>> {
        let state = self.scene(scene)?;
        let bvh = state
            .bvh
            .as_ref()
            .ok_or_else(|| Error::other(format!("scene {} is not committed", scene.0)))?;

        let length = ray.direction.length();
        if bvh.prim_indices.is_empty() || !(length > 0.0) {
            return Ok(None);
        }
        let dir = ray.direction / length;
        let inv_dir = dir.recip();
        let tnear = ray.tnear * length;
        let mut closest_t = ray.tfar * length;
        let mut closest: Option<Hit> = None;

        let mut stack: SmallVec<[usize; 64]> = SmallVec::new();
        stack.push(0);
        while let Some(node_idx) = stack.pop() {
            let node = &bvh.nodes[node_idx];
            if intersect_box(&node.bounds, ray.origin, inv_dir, tnear, closest_t).is_none() {
                continue;
            }
            if !node.is_leaf() {
                stack.push(node.left_or_first as usize + 1);
                stack.push(node.left_or_first as usize);
                continue;
            }

            let first = node.left_or_first as usize;
            let mut candidates: SmallVec<[(CandidateHit, Vec3); MAX_LEAF_SIZE]> = SmallVec::new();
            for &prim_idx in &bvh.prim_indices[first..first + node.count as usize] {
                let prim = &state.primitives[prim_idx];
                if let Some((t, u, v, normal)) = prim.intersect(ray.origin, dir, tnear, closest_t) {
                    let hit = CandidateHit {
                        geom_id: prim.geom_id,
                        prim_id: prim.prim_id,
                        u,
                        v,
                        t,
                        valid: true,
                    };
                    candidates.push((hit, normal));
                }
            }
            run_filters(state, &mut candidates, callbacks);

            for (hit, normal) in candidates {
                if hit.valid && hit.t < closest_t {
                    closest_t = hit.t;
                    closest = Some(Hit {
                        t: hit.t / length,
                        geom_id: hit.geom_id,
                        prim_id: hit.prim_id,
                        u: hit.u,
                        v: hit.v,
                        normal,
                    });
                }
            }
        }
        Ok(closest)
    }
}

/// Hand each geometry's candidates to its filter as one batch.
fn run_filters(
    state: &SceneState,
    candidates: &mut SmallVec<[(CandidateHit, Vec3); MAX_LEAF_SIZE]>,
    callbacks: &dyn GeometryCallbacks,
) {
    candidates.sort_by_key(|(hit, _)| hit.geom_id);
    let mut start = 0;
    while start < candidates.len() {
        let geom_id = candidates[start].0.geom_id;
        let end = candidates[start..]
            .iter()
            .position(|(hit, _)| hit.geom_id != geom_id)
            .map_or(candidates.len(), |p| start + p);

        let filtered = state.geometries.get(&geom_id).is_some_and(|g| g.intersect_filter);
        if filtered {
            let mut batch: SmallVec<[CandidateHit; MAX_LEAF_SIZE]> =
                candidates[start..end].iter().map(|(hit, _)| *hit).collect();
            callbacks.intersect_filter(geom_id, &mut batch);
            for ((hit, _), filtered) in candidates[start..end].iter_mut().zip(&batch) {
                hit.valid = filtered.valid;
            }
        }
        start = end;
    }
}

fn build_primitives(
    geom_id: u32,
    geometry: &GeometryState,
    callbacks: &dyn GeometryCallbacks,
    out: &mut Vec<Primitive>,
) -> Result<()> {
    match geometry.kind {
        GeometryKind::Triangle => {
            let index = geometry.required(&geometry.index, "index")?;
            for f in 0..index.count {
                let mut p = [Vec3::ZERO; 3];
                for (c, corner) in p.iter_mut().enumerate() {
                    *corner = geometry.vertex(index.read_u32(f, c))?;
                }
                push_triangle(out, geom_id, f as u32, p, UvFrame::IDENTITY);
            }
        }
        GeometryKind::Quad => {
            let index = geometry.required(&geometry.index, "index")?;
            for f in 0..index.count {
                let mut q = [Vec3::ZERO; 4];
                for (c, corner) in q.iter_mut().enumerate() {
                    *corner = geometry.vertex(index.read_u32(f, c))?;
                }
                push_triangle(out, geom_id, f as u32, [q[0], q[1], q[3]], UvFrame::IDENTITY);
                let frame = UvFrame {
                    origin: Vec2::ONE,
                    du: Vec2::NEG_X,
                    dv: Vec2::NEG_Y,
                };
                push_triangle(out, geom_id, f as u32, [q[2], q[3], q[1]], frame);
            }
        }
        GeometryKind::Subdivision => build_subdivision(geom_id, geometry, callbacks, out)?,
        GeometryKind::RoundBSplineCurve => {
            let index = geometry.required(&geometry.index, "index")?;
            let vertex = geometry.required(&geometry.vertex, "vertex")?;
            for s in 0..index.count {
                let first = index.read_u32(s, 0) as usize;
                if first + 3 >= vertex.count {
                    return Err(Error::inconsistent(format!(
                        "curve segment {s} starts at {first} of {} control points",
                        vertex.count
                    )));
                }
                let cp: [(Vec3, f32); 4] =
                    std::array::from_fn(|k| (vertex.read_vec3(first + k), vertex.read_f32(first + k, 3)));
                let mut prev = bspline_point(&cp, 0.0);
                for k in 1..=CURVE_SUBDIVISIONS {
                    let u1 = k as f32 / CURVE_SUBDIVISIONS as f32;
                    let next = bspline_point(&cp, u1);
                    out.push(Primitive {
                        geom_id,
                        prim_id: s as u32,
                        shape: Shape::Capsule {
                            a: prev.0,
                            b: next.0,
                            radius: 0.5 * (prev.1 + next.1),
                            u0: u1 - 1.0 / CURVE_SUBDIVISIONS as f32,
                            u1,
                        },
                    });
                    prev = next;
                }
            }
        }
    }
    Ok(())
}

fn push_triangle(out: &mut Vec<Primitive>, geom_id: u32, prim_id: u32, p: [Vec3; 3], frame: UvFrame) {
    out.push(Primitive {
        geom_id,
        prim_id,
        shape: Shape::Triangle { p, frame },
    });
}

fn build_subdivision(
    geom_id: u32,
    geometry: &GeometryState,
    callbacks: &dyn GeometryCallbacks,
    out: &mut Vec<Primitive>,
) -> Result<()> {
    let index = geometry.required(&geometry.index, "index")?;
    let face = geometry.required(&geometry.face, "face")?;
    let normals = (geometry.attribute_count > 0)
        .then(|| geometry.attributes[0].as_ref())
        .flatten()
        .filter(|b| b.format == BufferFormat::Float3);
    let n = (geometry.tessellation_rate.round() as usize).clamp(1, MAX_TESSELLATION);

    let mut offset = 0usize;
    for f in 0..face.count {
        let corners = face.read_u32(f, 0) as usize;
        if offset + corners > index.count {
            return Err(Error::inconsistent(format!("subdivision face {f} runs past the index buffer")));
        }
        if !(3..=4).contains(&corners) {
            tracing::warn!(geom_id, face = f, corners, "skipping unsupported subdivision face");
            offset += corners;
            continue;
        }

        let mut positions: SmallVec<[Vec3; 4]> = SmallVec::new();
        let mut corner_normals: SmallVec<[Vec3; 4]> = SmallVec::new();
        for c in 0..corners {
            let vi = index.read_u32(offset + c, 0);
            positions.push(geometry.vertex(vi)?);
            if let Some(nb) = normals {
                if (vi as usize) < nb.count {
                    corner_normals.push(nb.read_vec3(vi as usize));
                }
            }
        }
        offset += corners;

        let cn = (corner_normals.len() == corners).then_some(corner_normals.as_slice());
        let mut grid = tessellate_face(&positions, cn, n);
        if geometry.displacement {
            callbacks.displace(
                geom_id,
                DisplacementBatch {
                    prim_id: f as u32,
                    uvs: &grid.params,
                    normals: &grid.normals,
                    positions: &mut grid.positions,
                },
            );
        }
        for [a, b, c] in &grid.triangles {
            let p = [grid.positions[*a], grid.positions[*b], grid.positions[*c]];
            let frame = UvFrame::from_params(grid.params[*a], grid.params[*b], grid.params[*c]);
            push_triangle(out, geom_id, f as u32, p, frame);
        }
    }
    Ok(())
}

impl AccelerationDevice for SoftwareDevice {
    fn new_scene(&mut self) -> Result<SceneHandle> {
        self.scenes.push(Some(SceneState::default()));
        Ok(SceneHandle((self.scenes.len() - 1) as u32))
    }

    fn new_geometry(&mut self, kind: GeometryKind) -> Result<GeometryHandle> {
        self.geometries.push(Some(GeometryState::new(kind)));
        Ok(GeometryHandle((self.geometries.len() - 1) as u32))
    }

    fn set_shared_buffer(&mut self, geometry: GeometryHandle, buffer_type: BufferType, buffer: SharedBuffer) -> Result<()> {
        let state = self.geometry_mut(geometry)?;
        match buffer_type {
            BufferType::Index => state.index = Some(buffer),
            BufferType::Vertex => state.vertex = Some(buffer),
            BufferType::Face => state.face = Some(buffer),
            BufferType::VertexAttribute(slot) => {
                let slot = slot as usize;
                if slot >= MAX_VERTEX_ATTRIBUTES {
                    return Err(Error::other(format!("vertex attribute slot {slot} out of range")));
                }
                state.attributes[slot] = Some(buffer);
            }
        }
        state.committed = false;
        Ok(())
    }

    fn set_vertex_attribute_count(&mut self, geometry: GeometryHandle, count: u32) -> Result<()> {
        if count as usize > MAX_VERTEX_ATTRIBUTES {
            return Err(Error::other(format!("{count} vertex attributes requested")));
        }
        self.geometry_mut(geometry)?.attribute_count = count;
        Ok(())
    }

    fn set_intersect_filter(&mut self, geometry: GeometryHandle, enabled: bool) -> Result<()> {
        self.geometry_mut(geometry)?.intersect_filter = enabled;
        Ok(())
    }

    fn set_displacement(&mut self, geometry: GeometryHandle, enabled: bool) -> Result<()> {
        let state = self.geometry_mut(geometry)?;
        if enabled && state.kind != GeometryKind::Subdivision {
            return Err(Error::other(format!("displacement on a {} geometry", state.kind)));
        }
        state.displacement = enabled;
        Ok(())
    }

    fn set_tessellation_rate(&mut self, geometry: GeometryHandle, rate: f32) -> Result<()> {
        self.geometry_mut(geometry)?.tessellation_rate = rate;
        Ok(())
    }

    fn set_subdivision_mode(&mut self, geometry: GeometryHandle, mode: SubdivisionMode) -> Result<()> {
        self.geometry_mut(geometry)?.subdivision_mode = mode;
        Ok(())
    }

    fn commit_geometry(&mut self, geometry: GeometryHandle) -> Result<()> {
        let state = self.geometry_mut(geometry)?;
        state.required(&state.vertex, "vertex")?;
        state.required(&state.index, "index")?;
        if state.kind == GeometryKind::Subdivision {
            state.required(&state.face, "face")?;
        }
        for slot in 0..state.attribute_count as usize {
            if state.attributes[slot].is_none() {
                return Err(Error::other(format!("vertex attribute {slot} is not bound")));
            }
        }
        state.committed = true;
        Ok(())
    }

    fn attach_geometry_by_id(&mut self, scene: SceneHandle, geometry: GeometryHandle, id: u32) -> Result<()> {
        let state = self.geometry_mut(geometry)?.clone();
        if !state.committed {
            return Err(Error::other(format!("geometry {} attached before commit", geometry.0)));
        }
        let scene = self.scene_mut(scene)?;
        if scene.geometries.contains_key(&id) {
            return Err(Error::other(format!("geometry id {id} is already attached")));
        }
        scene.geometries.insert(id, state);
        scene.bvh = None;
        Ok(())
    }

    fn release_geometry(&mut self, geometry: GeometryHandle) {
        if let Some(slot) = self.geometries.get_mut(geometry.0 as usize) {
            *slot = None;
        }
    }

    #[tracing::instrument(skip_all, fields(scene = scene.0))]
    fn commit_scene(&mut self, scene: SceneHandle, callbacks: &dyn GeometryCallbacks) -> Result<()> {
        let state = self.scene_mut(scene)?;
        let mut primitives = Vec::new();
        for (&geom_id, geometry) in &state.geometries {
            build_primitives(geom_id, geometry, callbacks, &mut primitives)?;
        }
        let bounds: Vec<AxisAlignedBox> = primitives.iter().map(Primitive::bounds).collect();
        let bvh = build_bvh(&bounds);
        tracing::debug!(
            geometries = state.geometries.len(),
            primitives = primitives.len(),
            nodes = bvh.nodes.len(),
            "scene committed"
        );
        state.primitives = primitives;
        state.bvh = Some(bvh);
        Ok(())
    }

    fn release_scene(&mut self, scene: SceneHandle) {
        if let Some(slot) = self.scenes.get_mut(scene.0 as usize) {
            *slot = None;
        }
    }
}
