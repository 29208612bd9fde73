//! The minimum GPU backend contract required by the dispatch cache.
//!
//! Concrete backends (`dispatch-gl`, `dispatch-vk`) implement this trait in
//! terms of OpenGL and Vulkan respectively. The dispatch core never talks to
//! a GPU API directly; it only ever goes through `GpuBackend`.

use crate::accumulator::VarShape;
use crate::descriptor::{Descriptor, DescriptorType};
use std::fmt::Debug;

/// Raster or compute.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PassKind {
    Raster,
    Compute,
}

/// Blend factor, restricted to the set the compute-as-raster emulation path
/// can express in-shader (see [`crate::dispatch`]).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BlendFactor {
    Zero,
    One,
    SrcAlpha,
    OneMinusSrcAlpha,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BlendParams {
    pub src: BlendFactor,
    pub dst: BlendFactor,
}

/// A vertex attribute declaration, used both for the implicit quad and for
/// caller-supplied vertex geometry.
#[derive(Clone, Debug)]
pub struct VertexAttribute {
    pub name: &'static str,
    pub format: VertexFormat,
    pub offset: u32,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum VertexFormat {
    F32,
    Vec2,
    Vec3,
    Vec4,
}

impl VertexFormat {
    pub fn size(self) -> u32 {
        match self {
            VertexFormat::F32 => 4,
            VertexFormat::Vec2 => 8,
            VertexFormat::Vec3 => 12,
            VertexFormat::Vec4 => 16,
        }
    }

    /// Number of consecutive vec4-sized attribute locations this format
    /// consumes (matrices packed as repeated vertex attributes consume more
    /// than one).
    pub fn location_count(self) -> u32 {
        ((self.size() + 15) / 16).max(1)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PrimitiveTopology {
    TriangleList,
    TriangleStrip,
    LineList,
}

/// A global-uniform variable slot, in the same declaration order the
/// prelude generator emitted its `uniform` line in. Backends that implement
/// `supports_global_uniforms` (GL) need this to resolve a
/// [`GlobalUpdate::index`] back to the uniform name GL requires for
/// `glGetUniformLocation`; backends that report `supports_global_uniforms =
/// false` (Vulkan) never see any entries here.
pub struct GlobalVarSlot<'a> {
    pub index: u32,
    pub name: &'a str,
    pub shape: VarShape,
}

/// Parameters for creating a new backend pass from generated shader source.
pub struct PassCreateParams<'a, B: GpuBackend> {
    pub kind: PassKind,
    pub vertex_source: Option<&'a str>,
    pub fragment_source: Option<&'a str>,
    pub compute_source: Option<&'a str>,
    pub vertex_attributes: &'a [VertexAttribute],
    pub vertex_stride: u32,
    pub topology: PrimitiveTopology,
    pub descriptors: &'a [DescriptorType],
    pub globals: &'a [GlobalVarSlot<'a>],
    pub push_constant_size: u32,
    pub blend: Option<BlendParams>,
    pub load_target: bool,
    /// Previously cached backend-opaque program bytes for this signature, if any.
    pub cached_program: Option<&'a [u8]>,
    /// Where the synthetic `u_projection` matrix (see `dispatch::dispatch_vertex`)
    /// landed, if the pass has one. Raster backends need this to declare and
    /// apply the matrix in their built-in vertex stage, since it's the one
    /// variable a non-`Absolute` custom-vertex dispatch needs visible outside
    /// the fragment/compute text the prelude generator produces.
    pub projection: Option<crate::placement::Placement>,
    _marker: std::marker::PhantomData<B>,
}

impl<'a, B: GpuBackend> PassCreateParams<'a, B> {
    pub fn new(kind: PassKind) -> Self {
        PassCreateParams {
            kind,
            vertex_source: None,
            fragment_source: None,
            compute_source: None,
            vertex_attributes: &[],
            vertex_stride: 0,
            topology: PrimitiveTopology::TriangleList,
            descriptors: &[],
            globals: &[],
            push_constant_size: 0,
            blend: None,
            load_target: false,
            cached_program: None,
            projection: None,
            _marker: std::marker::PhantomData,
        }
    }
}

/// The result of a successful `pass_create`: the live pass handle plus an
/// optional backend-opaque blob the caller may persist for a later `load`.
pub struct PassCreateResult<B: GpuBackend> {
    pub pass: B::Pass,
    pub cached_program: Option<Vec<u8>>,
}

/// A single per-call variable write targeting a global uniform slot.
pub struct GlobalUpdate<'a> {
    pub index: u32,
    pub data: &'a [u8],
}

/// Per-call bindings used to run a pass.
pub struct PassRunParams<'a, B: GpuBackend> {
    pub descriptors: &'a [Descriptor<B>],
    pub push_constants: &'a [u8],
    pub global_updates: &'a [GlobalUpdate<'a>],
    pub vertex_buffer: Option<B::Buffer>,
    pub vertex_data: Option<&'a [u8]>,
    pub index_buffer: Option<B::Buffer>,
    pub vertex_count: u32,
    pub compute_groups: (u32, u32, u32),
    pub target: Option<B::Texture>,
    pub scissor: Option<(i32, i32, u32, u32)>,
}

/// Capability set reported by a backend, consulted by the variable placer
/// and the prelude generator.
#[derive(Copy, Clone, Debug)]
pub struct BackendCaps {
    pub supports_global_uniforms: bool,
    pub supports_push_constants: bool,
    pub push_constant_budget: u32,
    pub supports_ubo: bool,
    pub ubo_budget: u32,
    pub ubo_offsets_require_version: u32,
    pub glsl_version: u32,
    pub glsl_es: bool,
    pub supports_subgroups: bool,
    pub supports_parallel_compute: bool,
    /// Whether the prelude generator must emit `layout(binding = N)` on every
    /// descriptor declaration. Backends whose shader compiler requires a
    /// binding decoration on every resource (Vulkan, via SPIR-V) set this;
    /// backends that assign bindings to an already-linked program through
    /// their own API (GL, via `glUniformBlockBinding`/`glProgramUniform1i`)
    /// leave it unset and rely on the synthetic `binding_N` name alone.
    pub requires_explicit_bindings: bool,
}

/// The minimum interface the dispatch cache requires from a GPU backend.
///
/// Implemented by `dispatch-gl::OpenGlBackend` and `dispatch-vk::VulkanBackend`.
pub trait GpuBackend {
    type Texture: Copy + Clone + Debug;
    type Buffer: Copy + Clone + Debug;
    type Pass: Copy + Clone + Debug;

    fn caps(&self) -> BackendCaps;

    /// Per-descriptor-type binding namespace identifier, used to keep a
    /// monotonic binding counter per namespace while assigning descriptor
    /// bindings during pass construction.
    fn desc_namespace(&self, ty: DescriptorType) -> usize;

    fn pass_create(&mut self, params: &PassCreateParams<'_, Self>) -> Option<PassCreateResult<Self>>
    where
        Self: Sized;

    fn pass_run(&mut self, pass: Self::Pass, params: &PassRunParams<'_, Self>)
    where
        Self: Sized;

    fn pass_destroy(&mut self, pass: Self::Pass);

    fn buf_create(&mut self, size: usize, uniform: bool, host_writable: bool) -> Self::Buffer;
    fn buf_write(&mut self, buf: Self::Buffer, offset: usize, data: &[u8]);
    fn buf_destroy(&mut self, buf: Self::Buffer);

    /// Is `texture` usable as a 2D render target.
    fn texture_is_renderable(&self, texture: Self::Texture) -> bool;
    /// Is `texture` usable as a storage image (required for the
    /// compute-as-raster emulation path).
    fn texture_is_storable(&self, texture: Self::Texture) -> bool;
    /// Width/height in pixels, used to clip dispatch rects to the target.
    fn texture_dimensions(&self, texture: Self::Texture) -> (u32, u32);
    /// An opaque tag identifying the texture's format, cheap to compare,
    /// used to decide whether a cached raster pass can be reused for a
    /// different target of the same format.
    fn texture_format_tag(&self, texture: Self::Texture) -> u64;
}
