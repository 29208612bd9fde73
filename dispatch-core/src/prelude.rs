//! Backend-appropriate GLSL prelude generation.
//!
//! Emits the fixed-order preamble (version, extensions, precision,
//! push-constants, descriptors, globals, user code) that the signature
//! computation in [`crate::signature`] hashes over. Ordering here must never
//! change without also reasoning about signature stability.

use crate::accumulator::{Fragments, OutputSignature, VarShape};
use crate::backend::{BackendCaps, PassKind};
use crate::descriptor::DescriptorType;
use crate::placement::{PlacedVariable, Placement};
use std::fmt::Write;

/// A descriptor assigned to a binding slot, ready to be declared.
pub struct BoundDescriptor {
    pub name: String,
    pub ty: DescriptorType,
    pub binding: u32,
}

/// Everything the prelude generator needs besides the accumulator's own
/// source fragments.
pub struct PreludeInput<'a> {
    pub kind: PassKind,
    pub caps: &'a BackendCaps,
    pub placement: &'a [PlacedVariable],
    pub push_constant_size: u32,
    pub descriptors: &'a [BoundDescriptor],
    /// Vulkan-like backends emit explicit `layout(binding=N)`; others assign
    /// bindings programmatically through the backend API and omit them.
    pub explicit_bindings: bool,
    pub output: OutputSignature,
    pub compute_group_size: (u32, u32, u32),
}

fn sampler_decl(name: &str, binding: Option<u32>) -> String {
    match binding {
        Some(b) => format!("layout(binding = {}) uniform sampler2D {};\n", b, name),
        None => format!("uniform sampler2D {};\n", name),
    }
}

fn image_decl(name: &str, binding: Option<u32>) -> String {
    match binding {
        Some(b) => format!("layout(binding = {}, rgba8) uniform image2D {};\n", b, name),
        None => format!("layout(rgba8) uniform image2D {};\n", name),
    }
}

fn buffer_decl(keyword: &str, name: &str, binding: Option<u32>) -> String {
    match binding {
        Some(b) => format!("layout(std140, binding = {}) {} Block_{} {{ vec4 data[]; }} {};\n", b, keyword, name, name),
        None => format!("layout(std140) {} Block_{} {{ vec4 data[]; }} {};\n", keyword, name, name),
    }
}

/// Generates the full shader source text (prelude + wrapped user code) for
/// either the fragment/compute stage.
pub fn generate(input: &PreludeInput<'_>, fragments: &Fragments) -> String {
    let mut out = String::with_capacity(1024);

    // --- version ---
    if input.caps.glsl_es {
        let _ = writeln!(out, "#version {} es", input.caps.glsl_version);
    } else {
        let _ = writeln!(out, "#version {}", input.caps.glsl_version);
    }

    // --- extensions ---
    if input.kind == PassKind::Compute {
        let _ = writeln!(out, "#extension GL_ARB_compute_shader : require");
    }
    if input.caps.supports_subgroups {
        let _ = writeln!(out, "#extension GL_KHR_shader_subgroup_basic : enable");
    }
    let needs_image_load_store = input
        .descriptors
        .iter()
        .any(|d| matches!(d.ty, DescriptorType::StorageImage));
    if needs_image_load_store {
        let _ = writeln!(out, "#extension GL_ARB_shader_image_load_store : enable");
    }
    let needs_ubo = input
        .descriptors
        .iter()
        .any(|d| matches!(d.ty, DescriptorType::UniformBuffer))
        || input.placement.iter().any(|v| matches!(v.placement, Placement::Ubo { .. }));
    if needs_ubo {
        let _ = writeln!(out, "#extension GL_ARB_uniform_buffer_object : enable");
    }
    let needs_ssbo = input
        .descriptors
        .iter()
        .any(|d| matches!(d.ty, DescriptorType::StorageBuffer));
    if needs_ssbo {
        let _ = writeln!(out, "#extension GL_ARB_shader_storage_buffer_object : enable");
    }
    let needs_texel = input.descriptors.iter().any(|d| {
        matches!(d.ty, DescriptorType::UniformTexelBuffer | DescriptorType::StorageTexelBuffer)
    });
    if needs_texel {
        let _ = writeln!(out, "#extension GL_EXT_texture_buffer : enable");
    }

    // --- precision (embedded variant only) ---
    if input.caps.glsl_es {
        let _ = writeln!(out, "precision mediump float;");
        let _ = writeln!(out, "precision highp sampler2D;");
    }

    // --- push-constants ---
    if input.push_constant_size > 0 {
        let _ = writeln!(out, "layout(std430, push_constant) uniform PushC {{");
        let mut pc: Vec<_> = input
            .placement
            .iter()
            .filter_map(|v| match v.placement {
                Placement::PushConstant { offset } => Some((offset, v)),
                _ => None,
            })
            .collect();
        pc.sort_by_key(|(offset, _)| *offset);
        for (offset, v) in pc {
            let _ = writeln!(out, "    layout(offset = {}) {} {};", offset, v.shape.glsl_type(), v.name);
        }
        let _ = writeln!(out, "}};");
    }

    // --- descriptors ---
    for d in input.descriptors {
        let binding = if input.explicit_bindings { Some(d.binding) } else { None };
        match d.ty {
            DescriptorType::SampledImage => out.push_str(&sampler_decl(&d.name, binding)),
            DescriptorType::StorageImage => out.push_str(&image_decl(&d.name, binding)),
            DescriptorType::UniformBuffer => out.push_str(&buffer_decl("uniform", &d.name, binding)),
            DescriptorType::StorageBuffer => out.push_str(&buffer_decl("buffer", &d.name, binding)),
            DescriptorType::UniformTexelBuffer => {
                let _ = writeln!(out, "uniform samplerBuffer {};", d.name);
            }
            DescriptorType::StorageTexelBuffer => {
                let _ = writeln!(out, "uniform imageBuffer {};", d.name);
            }
        }
    }

    // --- UBO for globally-synthesized variables ---
    let ubo_vars: Vec<_> = input
        .placement
        .iter()
        .filter(|v| matches!(v.placement, Placement::Ubo { .. }))
        .collect();
    if !ubo_vars.is_empty() {
        let binding = if input.explicit_bindings { Some(input.descriptors.len() as u32) } else { None };
        match binding {
            Some(b) => { let _ = writeln!(out, "layout(std140, binding = {}) uniform UBlock {{", b); }
            None => { let _ = writeln!(out, "layout(std140) uniform UBlock {{"); }
        }
        let mut sorted = ubo_vars;
        sorted.sort_by_key(|v| match v.placement {
            Placement::Ubo { offset } => offset,
            _ => 0,
        });
        for v in sorted {
            let _ = writeln!(out, "    {} {};", v.shape.glsl_type(), v.name);
        }
        let _ = writeln!(out, "}};");
    }

    // --- globals ---
    for v in input.placement {
        if matches!(v.placement, Placement::Global { .. }) {
            let _ = writeln!(out, "uniform {} {};", v.shape.glsl_type(), v.name);
        }
    }

    // --- vertex wrapper (raster only) ---
    // The projection matrix (if any) is declared and applied in the
    // backend's own built-in vertex stage, not here: this text only ever
    // becomes the fragment/compute shader, and `u_projection` is a
    // vertex-stage-only concern. See `PassCreateParams::projection`.
    if input.kind == PassKind::Raster {
        let _ = writeln!(out, "// -- vertex stage --");
        out.push_str(&fragments.vertex_head);
        out.push_str(&fragments.vertex_body);
    }

    // --- compute local size ---
    if input.kind == PassKind::Compute {
        let (x, y, z) = input.compute_group_size;
        let _ = writeln!(out, "layout(local_size_x = {}, local_size_y = {}, local_size_z = {}) in;", x, y, z);
    }

    // --- fragment output ---
    if input.kind == PassKind::Raster && input.output == OutputSignature::Color {
        if input.caps.glsl_version >= 330 {
            let _ = writeln!(out, "layout(location = 0) out vec4 out_color;");
        }
    }

    // --- user body, wrapped ---
    let _ = writeln!(out, "// -- user code --");
    out.push_str(&fragments.main_body);
    let _ = writeln!(out);
    out.push_str("void main() {\n");
    match input.kind {
        PassKind::Raster => out.push_str("    fragment_main();\n"),
        PassKind::Compute => out.push_str("    compute_main();\n"),
    }
    out.push_str("}\n");

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::VarShape;
    use crate::placement::Placement;

    fn caps() -> BackendCaps {
        BackendCaps {
            supports_global_uniforms: true,
            supports_push_constants: true,
            push_constant_budget: 128,
            supports_ubo: true,
            ubo_budget: 16384,
            ubo_offsets_require_version: 140,
            glsl_version: 450,
            glsl_es: false,
            supports_subgroups: false,
            supports_parallel_compute: true,
            requires_explicit_bindings: false,
        }
    }

    #[test]
    fn ordering_is_version_extensions_pushc_descriptors_globals_body() {
        let caps = caps();
        let placement = vec![PlacedVariable {
            name: "tint".into(),
            shape: VarShape::Vec4,
            placement: Placement::PushConstant { offset: 0 },
            last_value: Vec::new(),
        }];
        let input = PreludeInput {
            kind: PassKind::Raster,
            caps: &caps,
            placement: &placement,
            push_constant_size: 16,
            descriptors: &[],
            explicit_bindings: false,
            output: OutputSignature::Color,
            compute_group_size: (16, 16, 1),
        };
        let fragments = Fragments::default();
        let src = generate(&input, &fragments);
        let version_pos = src.find("#version").unwrap();
        let pushc_pos = src.find("PushC").unwrap();
        let main_pos = src.find("void main").unwrap();
        assert!(version_pos < pushc_pos);
        assert!(pushc_pos < main_pos);
    }

    #[test]
    fn stable_for_identical_input() {
        let caps = caps();
        let placement: Vec<PlacedVariable> = vec![];
        let input = PreludeInput {
            kind: PassKind::Compute,
            caps: &caps,
            placement: &placement,
            push_constant_size: 0,
            descriptors: &[],
            explicit_bindings: false,
            output: OutputSignature::None,
            compute_group_size: (8, 8, 1),
        };
        let fragments = Fragments::default();
        let a = generate(&input, &fragments);
        let b = generate(&input, &fragments);
        assert_eq!(a, b);
    }
}
