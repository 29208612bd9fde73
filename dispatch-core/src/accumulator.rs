//! The shader accumulator: a mutable, poolable record of an in-progress shader.

use crate::backend::{GpuBackend, VertexAttribute};
use crate::descriptor::Descriptor;
use smallvec::SmallVec;

/// Scalar/vector/matrix shape of a shader variable, used both by the
/// variable placer (to decide push-constant eligibility) and by the
/// prelude generator (to pick the GLSL type keyword).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum VarShape {
    Float,
    Vec2,
    Vec3,
    Vec4,
    Mat3,
    Mat4,
}

impl VarShape {
    pub fn byte_size(self) -> u32 {
        match self {
            VarShape::Float => 4,
            VarShape::Vec2 => 8,
            VarShape::Vec3 => 12,
            VarShape::Vec4 => 16,
            VarShape::Mat3 => 36,
            VarShape::Mat4 => 64,
        }
    }

    /// std430 alignment of this shape.
    pub fn align(self) -> u32 {
        match self {
            VarShape::Float => 4,
            VarShape::Vec2 => 8,
            VarShape::Vec3 | VarShape::Vec4 => 16,
            VarShape::Mat3 | VarShape::Mat4 => 16,
        }
    }

    /// A matrix with more than one column is never eligible for the
    /// conservative push-constant pass (see `placement::place_pass_a`).
    pub fn is_small(self) -> bool {
        matches!(self, VarShape::Float | VarShape::Vec2 | VarShape::Vec3 | VarShape::Vec4)
    }

    pub fn glsl_type(self) -> &'static str {
        match self {
            VarShape::Float => "float",
            VarShape::Vec2 => "vec2",
            VarShape::Vec3 => "vec3",
            VarShape::Vec4 => "vec4",
            VarShape::Mat3 => "mat3",
            VarShape::Mat4 => "mat4",
        }
    }
}

/// A shader variable declared by a caller, with its current value bytes.
#[derive(Clone, Debug)]
pub struct ShaderVariable {
    pub name: String,
    pub shape: VarShape,
    pub dynamic: bool,
    pub data: SmallVec<[u8; 16]>,
}

/// Output signature of the finished shader: does it produce a color value
/// or nothing (a pure side-effecting compute shader)?
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OutputSignature {
    None,
    Color,
}

/// Source text fragments accumulated for the different stages of the
/// generated shader. Concatenated by the prelude generator in a fixed order.
#[derive(Default, Clone, Debug)]
pub struct Fragments {
    pub main_body: String,
    pub vertex_head: String,
    pub vertex_body: String,
}

/// An entry in the implicit-quad vertex attribute list: the attribute
/// declaration plus its value at each of the four corners.
#[derive(Clone, Debug)]
pub struct QuadAttribute {
    pub attribute: VertexAttribute,
    pub corners: [[f32; 4]; 4],
}

/// A mutable shader-under-construction record.
///
/// Obtained from an [`AccumulatorPool`], mutated by shader builder code,
/// then consumed by one of the dispatch entry points in
/// [`crate::dispatch`]. Never shared across threads.
pub struct ShaderAccumulator<B: GpuBackend> {
    pub(crate) identity: Option<u64>,
    pub(crate) fragments: Fragments,
    pub(crate) variables: Vec<ShaderVariable>,
    pub(crate) descriptors: Vec<Descriptor<B>>,
    pub(crate) quad_attributes: Vec<QuadAttribute>,
    pub(crate) output: OutputSignature,
    pub(crate) compute: bool,
    pub(crate) compute_group_size: (u32, u32, u32),
    pub(crate) failed: bool,
}

impl<B: GpuBackend> ShaderAccumulator<B> {
    fn empty() -> Self {
        ShaderAccumulator {
            identity: None,
            fragments: Fragments::default(),
            variables: Vec::new(),
            descriptors: Vec::new(),
            quad_attributes: Vec::new(),
            output: OutputSignature::None,
            compute: false,
            compute_group_size: (16, 16, 1),
            failed: false,
        }
    }

    fn clear(&mut self) {
        self.identity = None;
        self.fragments.main_body.clear();
        self.fragments.vertex_head.clear();
        self.fragments.vertex_body.clear();
        self.variables.clear();
        self.descriptors.clear();
        self.quad_attributes.clear();
        self.output = OutputSignature::None;
        self.compute = false;
        self.compute_group_size = (16, 16, 1);
        self.failed = false;
    }

    pub fn push_main(&mut self, text: &str) -> &mut Self {
        self.fragments.main_body.push_str(text);
        self
    }

    pub fn add_variable(&mut self, name: impl Into<String>, shape: VarShape, dynamic: bool, data: &[u8]) -> &mut Self {
        self.variables.push(ShaderVariable {
            name: name.into(),
            shape,
            dynamic,
            data: SmallVec::from_slice(data),
        });
        self
    }

    pub fn add_descriptor(&mut self, descriptor: Descriptor<B>) -> &mut Self {
        self.descriptors.push(descriptor);
        self
    }

    pub fn add_quad_attribute(&mut self, attribute: VertexAttribute, corners: [[f32; 4]; 4]) -> &mut Self {
        self.quad_attributes.push(QuadAttribute { attribute, corners });
        self
    }

    pub fn set_output(&mut self, output: OutputSignature) -> &mut Self {
        self.output = output;
        self
    }

    pub fn set_compute(&mut self, group_size: (u32, u32, u32)) -> &mut Self {
        self.compute = true;
        self.compute_group_size = group_size;
        self
    }

    pub fn mark_failed(&mut self) {
        self.failed = true;
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn identity(&self) -> Option<u64> {
        self.identity
    }
}

/// A reusable pool of [`ShaderAccumulator`]s, avoiding per-frame allocation
/// churn for the common case of building many shaders per frame.
pub struct AccumulatorPool<B: GpuBackend> {
    free: Vec<ShaderAccumulator<B>>,
    next_identity: u64,
}

impl<B: GpuBackend> AccumulatorPool<B> {
    pub fn new() -> Self {
        AccumulatorPool {
            free: Vec::new(),
            next_identity: 0,
        }
    }

    /// Takes a cleared accumulator from the pool (or allocates a new one).
    /// If `unique` is set, the returned accumulator is tagged with an
    /// identity distinct from every other `unique` accumulator obtained
    /// since the last [`AccumulatorPool::reset_frame`].
    pub fn begin(&mut self, unique: bool) -> ShaderAccumulator<B> {
        let mut acc = self.free.pop().unwrap_or_else(ShaderAccumulator::empty);
        if unique {
            acc.identity = Some(self.next_identity);
            self.next_identity += 1;
        }
        acc
    }

    /// Called by the caller at frame boundaries: resets the per-frame
    /// identity counter. The frame index itself lives on `DispatchRoot`.
    pub fn reset_frame(&mut self) {
        self.next_identity = 0;
    }

    /// Returns a consumed accumulator to the pool for reuse, regardless of
    /// whether it ended up `failed`.
    pub fn recycle(&mut self, mut acc: ShaderAccumulator<B>) {
        acc.clear();
        self.free.push(acc);
    }

    /// Returns an unconsumed accumulator to the pool without dispatching it.
    /// This is not a cancellation of in-flight GPU work; nothing has been
    /// submitted yet.
    pub fn abort(&mut self, acc: ShaderAccumulator<B>) {
        self.recycle(acc);
    }
}

impl<B: GpuBackend> Default for AccumulatorPool<B> {
    fn default() -> Self {
        Self::new()
    }
}
