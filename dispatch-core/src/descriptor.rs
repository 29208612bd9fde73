//! Descriptor bindings referenced by a shader under construction.

use crate::accumulator::VarShape;
use crate::backend::GpuBackend;
use derivative::Derivative;

bitflags::bitflags! {
    /// Which shader stages a binding is visible from. Currently only used
    /// to decide whether a variable or descriptor needs to be visible from
    /// the vertex stage of a raster pass; compute passes always imply
    /// `COMPUTE`.
    pub struct ShaderStageFlags: u32 {
        const VERTEX   = 0b0001;
        const FRAGMENT = 0b0010;
        const COMPUTE  = 0b0100;
    }
}

/// Descriptor type, as distinguished in generated shader text and by the
/// backend's per-namespace binding counters (see [`GpuBackend::desc_namespace`]).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum DescriptorType {
    SampledImage,
    StorageImage,
    UniformBuffer,
    StorageBuffer,
    UniformTexelBuffer,
    StorageTexelBuffer,
}

/// Read/write qualifier for image and buffer descriptors.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

/// A reference to a backend resource bound at a given shader binding.
///
/// Descriptors borrow their backing object: the caller is responsible for
/// keeping it alive for the duration of the dispatch call that consumes this
/// accumulator (see the ownership rules in the concurrency & resource model).
#[derive(Derivative)]
#[derivative(Clone(bound = ""), Copy(bound = ""), Debug(bound = "B::Texture: std::fmt::Debug, B::Buffer: std::fmt::Debug"))]
pub enum Descriptor<B: GpuBackend> {
    SampledImage {
        texture: B::Texture,
        access: AccessMode,
    },
    StorageImage {
        texture: B::Texture,
        access: AccessMode,
    },
    UniformBuffer {
        buffer: B::Buffer,
        offset: usize,
        size: usize,
    },
    StorageBuffer {
        buffer: B::Buffer,
        offset: usize,
        size: usize,
        access: AccessMode,
    },
    /// A buffer read through a sampled texel format rather than raw bytes.
    /// `element` names the per-texel layout (only `Float`/`Vec2`/`Vec3`/
    /// `Vec4` are meaningful; backends fall back to `Vec4` for anything else).
    UniformTexelBuffer {
        buffer: B::Buffer,
        offset: usize,
        size: usize,
        element: VarShape,
    },
    StorageTexelBuffer {
        buffer: B::Buffer,
        offset: usize,
        size: usize,
        element: VarShape,
        access: AccessMode,
    },
}

impl<B: GpuBackend> Descriptor<B> {
    pub fn descriptor_type(&self) -> DescriptorType {
        match self {
            Descriptor::SampledImage { .. } => DescriptorType::SampledImage,
            Descriptor::StorageImage { .. } => DescriptorType::StorageImage,
            Descriptor::UniformBuffer { .. } => DescriptorType::UniformBuffer,
            Descriptor::StorageBuffer { .. } => DescriptorType::StorageBuffer,
            Descriptor::UniformTexelBuffer { .. } => DescriptorType::UniformTexelBuffer,
            Descriptor::StorageTexelBuffer { .. } => DescriptorType::StorageTexelBuffer,
        }
    }
}
