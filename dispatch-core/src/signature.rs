//! Shader fingerprinting.

use crate::accumulator::{OutputSignature, ShaderAccumulator};
use crate::backend::GpuBackend;
use crate::descriptor::DescriptorType;
use fxhash::FxHasher64;
use std::hash::{Hash, Hasher};

/// A 64-bit fingerprint of a finalized [`ShaderAccumulator`]'s logical
/// content: the generated source text plus the declared variable/descriptor
/// shapes and output settings. Two accumulators that produce byte-identical
/// shader text and pass-create parameters always hash to the same
/// `Signature`; opaque otherwise, collisions are accepted as statistically
/// irrelevant rather than guarded against.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Signature(pub u64);

/// Computes the signature of an accumulator from its own canonicalized
/// source fragments plus the shapes of its declared variables, descriptors,
/// and vertex attributes. The generated prelude is not hashed directly: it
/// is a pure function of exactly these inputs plus the (fixed, per-root)
/// backend capabilities, so two accumulators with identical inputs here are
/// guaranteed to produce byte-identical generated shaders and pass-create
/// parameters, and the reverse holds for this hash-based approximation as
/// long as callers don't rely on hash collisions.
pub fn compute<B: GpuBackend>(acc: &ShaderAccumulator<B>) -> Signature {
    let mut hasher = FxHasher64::default();

    acc.fragments.main_body.hash(&mut hasher);
    acc.fragments.vertex_head.hash(&mut hasher);
    acc.fragments.vertex_body.hash(&mut hasher);

    for v in &acc.variables {
        v.name.hash(&mut hasher);
        (v.shape as u8 as u64 + 1).hash(&mut hasher);
        v.dynamic.hash(&mut hasher);
    }

    for d in &acc.descriptors {
        descriptor_type_tag(d.descriptor_type()).hash(&mut hasher);
    }

    for qa in &acc.quad_attributes {
        qa.attribute.name.hash(&mut hasher);
        (qa.attribute.format as u8 as u64).hash(&mut hasher);
    }

    match acc.output {
        OutputSignature::None => 0u8.hash(&mut hasher),
        OutputSignature::Color => 1u8.hash(&mut hasher),
    }
    acc.compute.hash(&mut hasher);
    if acc.compute {
        acc.compute_group_size.hash(&mut hasher);
    }

    Signature(hasher.finish())
}

fn descriptor_type_tag(ty: DescriptorType) -> u8 {
    match ty {
        DescriptorType::SampledImage => 0,
        DescriptorType::StorageImage => 1,
        DescriptorType::UniformBuffer => 2,
        DescriptorType::StorageBuffer => 3,
        DescriptorType::UniformTexelBuffer => 4,
        DescriptorType::StorageTexelBuffer => 5,
    }
}
