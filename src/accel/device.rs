//! Acceleration-structure backend interface.
//!
//! The loader only talks to a backend through [`AccelerationDevice`]. Per-hit
//! and per-vertex hooks are not registered as opaque function pointers; the
//! backend calls back into a [`GeometryCallbacks`] implementor with the
//! attached geometry id, and the implementor looks up its own records by id.

use std::fmt;
use std::sync::Arc;

use crate::io::AlignedBlock;
use crate::util::{Error, Result, Vec2, Vec3};

/// Opaque scene handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SceneHandle(pub u32);

/// Opaque geometry handle, valid until released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GeometryHandle(pub u32);

/// Primitive type of a geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeometryKind {
    Triangle,
    Quad,
    Subdivision,
    RoundBSplineCurve,
}

impl GeometryKind {
    pub fn is_curve(self) -> bool {
        matches!(self, Self::RoundBSplineCurve)
    }
}

impl fmt::Display for GeometryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Triangle => "triangle",
            Self::Quad => "quad",
            Self::Subdivision => "subdivision",
            Self::RoundBSplineCurve => "round-bspline-curve",
        })
    }
}

/// Which geometry input a buffer feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferType {
    Index,
    Vertex,
    /// Optional per-vertex attribute slot, bound in order starting at 0.
    VertexAttribute(u32),
    /// Per-face vertex counts of a subdivision surface.
    Face,
}

/// Element format of a shared buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferFormat {
    Uint,
    Uint3,
    Uint4,
    Float2,
    Float3,
    Float4,
}

impl BufferFormat {
    pub const fn size(self) -> usize {
        match self {
            Self::Uint => 4,
            Self::Float2 => 8,
            Self::Uint3 | Self::Float3 => 12,
            Self::Uint4 | Self::Float4 => 16,
        }
    }
}

/// Boundary rule for subdivision surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubdivisionMode {
    NoBoundary,
    SmoothBoundary,
    #[default]
    PinBoundary,
    PinAll,
}

/// A view into memory owned by someone else; bound in place, never copied.
#[derive(Clone)]
pub struct SharedBuffer {
    pub block: Arc<AlignedBlock>,
    pub byte_offset: usize,
    pub stride: usize,
    pub count: usize,
    pub format: BufferFormat,
}

/// Alignment of the first element of every shared buffer.
pub const SHARED_BUFFER_ALIGNMENT: usize = 4;

impl SharedBuffer {
    /// Validate the view against its block and return it.
    pub fn new(block: Arc<AlignedBlock>, byte_offset: usize, stride: usize, count: usize, format: BufferFormat) -> Result<Self> {
        if stride < format.size() {
            return Err(Error::other(format!("stride {stride} is smaller than {format:?}")));
        }
        let end = count
            .checked_sub(1)
            .map_or(byte_offset, |last| byte_offset + last * stride + format.size());
        if end > block.len() {
            return Err(Error::InvalidOffset {
                offset: byte_offset as u64,
                size: (end - byte_offset) as u64,
                len: block.len() as u64,
            });
        }
        if count > 0 && (block.base_address() + byte_offset) % SHARED_BUFFER_ALIGNMENT != 0 {
            return Err(Error::Misaligned {
                offset: byte_offset as u64,
                alignment: SHARED_BUFFER_ALIGNMENT,
            });
        }
        Ok(Self {
            block,
            byte_offset,
            stride,
            count,
            format,
        })
    }

    /// Load-time address of the first element.
    pub fn address(&self) -> usize {
        self.block.base_address() + self.byte_offset
    }

    fn element(&self, i: usize) -> &[u8] {
        let start = self.byte_offset + i * self.stride;
        &self.block[start..start + self.format.size()]
    }

    #[inline]
    pub fn read_u32(&self, i: usize, component: usize) -> u32 {
        let e = self.element(i);
        bytemuck::pod_read_unaligned(&e[component * 4..component * 4 + 4])
    }

    #[inline]
    pub fn read_f32(&self, i: usize, component: usize) -> f32 {
        let e = self.element(i);
        bytemuck::pod_read_unaligned(&e[component * 4..component * 4 + 4])
    }

    #[inline]
    pub fn read_vec2(&self, i: usize) -> Vec2 {
        Vec2::new(self.read_f32(i, 0), self.read_f32(i, 1))
    }

    #[inline]
    pub fn read_vec3(&self, i: usize) -> Vec3 {
        Vec3::new(self.read_f32(i, 0), self.read_f32(i, 1), self.read_f32(i, 2))
    }
}

impl fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBuffer")
            .field("byte_offset", &self.byte_offset)
            .field("stride", &self.stride)
            .field("count", &self.count)
            .field("format", &self.format)
            .finish()
    }
}

/// One candidate hit handed to an intersection filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateHit {
    pub geom_id: u32,
    pub prim_id: u32,
    /// Surface parameters: barycentrics for triangles, bilinear for quads.
    pub u: f32,
    pub v: f32,
    pub t: f32,
    /// Cleared by the filter to reject the hit.
    pub valid: bool,
}

/// Micro-vertices of one face, displaced in place.
#[derive(Debug)]
pub struct DisplacementBatch<'a> {
    /// Face index within the geometry.
    pub prim_id: u32,
    /// Face parameters of each vertex.
    pub uvs: &'a [Vec2],
    pub normals: &'a [Vec3],
    pub positions: &'a mut [Vec3],
}

/// Hooks a backend invokes for geometries that requested them.
pub trait GeometryCallbacks {
    /// Clear `valid` on every hit in `hits` that should be ignored.
    fn intersect_filter(&self, geom_id: u32, hits: &mut [CandidateHit]);

    /// Move each position of `batch` along its normal.
    fn displace(&self, geom_id: u32, batch: DisplacementBatch<'_>);
}

/// Callbacks that accept every hit and displace nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCallbacks;

impl GeometryCallbacks for NoCallbacks {
    fn intersect_filter(&self, _geom_id: u32, _hits: &mut [CandidateHit]) {}

    fn displace(&self, _geom_id: u32, _batch: DisplacementBatch<'_>) {}
}

/// Scene and geometry management of a ray-tracing backend.
pub trait AccelerationDevice {
    fn new_scene(&mut self) -> Result<SceneHandle>;

    fn new_geometry(&mut self, kind: GeometryKind) -> Result<GeometryHandle>;

    fn set_shared_buffer(&mut self, geometry: GeometryHandle, buffer_type: BufferType, buffer: SharedBuffer) -> Result<()>;

    fn set_vertex_attribute_count(&mut self, geometry: GeometryHandle, count: u32) -> Result<()>;

    /// Request [`GeometryCallbacks::intersect_filter`] calls for this geometry.
    fn set_intersect_filter(&mut self, geometry: GeometryHandle, enabled: bool) -> Result<()>;

    /// Request [`GeometryCallbacks::displace`] calls for this geometry.
    fn set_displacement(&mut self, geometry: GeometryHandle, enabled: bool) -> Result<()>;

    fn set_tessellation_rate(&mut self, geometry: GeometryHandle, rate: f32) -> Result<()>;

    fn set_subdivision_mode(&mut self, geometry: GeometryHandle, mode: SubdivisionMode) -> Result<()>;

    fn commit_geometry(&mut self, geometry: GeometryHandle) -> Result<()>;

    /// Attach a committed geometry under `id`. The scene keeps its own reference.
    fn attach_geometry_by_id(&mut self, scene: SceneHandle, geometry: GeometryHandle, id: u32) -> Result<()>;

    fn release_geometry(&mut self, geometry: GeometryHandle);

    /// Build the scene's acceleration structure.
    fn commit_scene(&mut self, scene: SceneHandle, callbacks: &dyn GeometryCallbacks) -> Result<()>;

    fn release_scene(&mut self, scene: SceneHandle);
}
