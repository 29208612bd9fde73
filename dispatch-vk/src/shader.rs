//! GLSL-to-SPIR-V compilation and shader module creation.
//!
//! Grounded in `gfx2`'s `renderer::backend::gl::pipeline_file::compile_glsl_to_spirv`
//! (same `shaderc::Compiler`/`CompileOptions` setup, same per-stage
//! `compile_into_spirv` call and warning log), retargeted from
//! `shaderc::TargetEnv::OpenGL` to `TargetEnv::Vulkan` since the SPIR-V this
//! backend produces feeds `vkCreateShaderModule` directly rather than
//! `glProgramBinary`.

use ash::version::DeviceV1_0;
use ash::vk;
use dispatch_core::backend::VertexAttribute;
use std::fmt;

#[derive(Debug)]
pub struct CompileError(pub String);

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for CompileError {}

fn compiler_options() -> shaderc::CompileOptions<'static> {
    let mut options = shaderc::CompileOptions::new().expect("failed to create shaderc options");
    options.set_target_env(shaderc::TargetEnv::Vulkan, 0);
    options.set_optimization_level(shaderc::OptimizationLevel::Zero);
    options
}

/// Compiles one GLSL stage to SPIR-V. `name` is only used for diagnostics.
pub fn compile_to_spirv(
    compiler: &mut shaderc::Compiler,
    source: &str,
    kind: shaderc::ShaderKind,
    name: &str,
) -> Result<Vec<u32>, CompileError> {
    let options = compiler_options();
    let artifact = compiler
        .compile_into_spirv(source, kind, name, "main", Some(&options))
        .map_err(|e| CompileError(e.to_string()))?;
    if artifact.get_num_warnings() != 0 {
        log::debug!("{}: {}", name, artifact.get_warning_messages());
    }
    Ok(artifact.as_binary().to_vec())
}

pub fn create_shader_module(device: &ash::Device, spirv: &[u32]) -> vk::ShaderModule {
    let create_info = vk::ShaderModuleCreateInfo::builder().code(spirv);
    unsafe {
        device
            .create_shader_module(&create_info, None)
            .expect("vkCreateShaderModule failed")
    }
}

/// Builds the fixed vertex-stage GLSL paired with every raster pass, the
/// same role `dispatch-gl`'s `shader::builtin_vertex_source` plays: the
/// prelude generator never emits a real vertex stage (its
/// `vertex_head`/`vertex_body` fields stay empty on every call path this
/// implementation exercises), so `position` is read straight off whichever
/// attribute is named `position` and every other attribute is forwarded to
/// the fragment stage under a `v_<name>` varying.
///
/// `projection`, if present, is where `dispatch-core`'s variable placer put
/// the synthetic `u_projection` matrix; `ubo_binding` is the binding the
/// fragment-stage prelude would use for its `UBlock` (see `prelude::generate`),
/// passed through so the `Ubo` case can address the same binding from this
/// separately-compiled stage.
pub fn builtin_vertex_source(
    attributes: &[VertexAttribute],
    projection: Option<dispatch_core::placement::Placement>,
    ubo_binding: u32,
) -> String {
    use dispatch_core::placement::Placement;
    use std::fmt::Write;
    let mut src = String::with_capacity(512);
    src.push_str("#version 450\n");
    src.push_str("#extension GL_ARB_separate_shader_objects : enable\n");

    let mut location = 0u32;
    for attr in attributes {
        let ty = attr_glsl_type(attr);
        let _ = writeln!(src, "layout(location = {}) in {} in_{};", location, ty, attr.name);
        location += attr.format.location_count();
    }
    let mut out_location = 0u32;
    for attr in attributes {
        if attr.name != "position" {
            let ty = attr_glsl_type(attr);
            let _ = writeln!(src, "layout(location = {}) out {} v_{};", out_location, ty, attr.name);
            out_location += attr.format.location_count();
        }
    }

    // Vulkan compiles each stage as its own SPIR-V module from its own GLSL
    // text, so (unlike GL's single linked program) the projection matrix
    // must be independently redeclared here at the same offset/binding the
    // placer assigned it in the fragment/compute stage.
    match projection {
        Some(Placement::PushConstant { offset }) => {
            let _ = writeln!(src, "layout(push_constant) uniform VertPushC {{");
            let _ = writeln!(src, "    layout(offset = {}) mat3 u_projection;", offset);
            let _ = writeln!(src, "}};");
        }
        Some(Placement::Ubo { offset }) => {
            let _ = writeln!(src, "layout(std140, binding = {}) uniform VertUBlock {{", ubo_binding);
            let _ = writeln!(src, "    layout(offset = {}) mat3 u_projection;", offset);
            let _ = writeln!(src, "}};");
        }
        Some(Placement::Global { .. }) | None => {}
    }

    src.push_str("void main() {\n");
    if attributes.iter().any(|a| a.name == "position") {
        if projection.is_some() {
            src.push_str("    gl_Position = vec4((u_projection * vec3(in_position, 1.0)).xy, 0.0, 1.0);\n");
        } else {
            src.push_str("    gl_Position = vec4(in_position, 0.0, 1.0);\n");
        }
    } else {
        src.push_str("    gl_Position = vec4(0.0, 0.0, 0.0, 1.0);\n");
    }
    for attr in attributes {
        if attr.name != "position" {
            let _ = writeln!(src, "    v_{} = in_{};", attr.name, attr.name);
        }
    }
    src.push_str("}\n");
    src
}

fn attr_glsl_type(attr: &VertexAttribute) -> &'static str {
    use dispatch_core::backend::VertexFormat;
    match attr.format {
        VertexFormat::F32 => "float",
        VertexFormat::Vec2 => "vec2",
        VertexFormat::Vec3 => "vec3",
        VertexFormat::Vec4 => "vec4",
    }
}

pub fn attr_vk_format(attr: &VertexAttribute) -> vk::Format {
    use dispatch_core::backend::VertexFormat;
    match attr.format {
        VertexFormat::F32 => vk::Format::R32_SFLOAT,
        VertexFormat::Vec2 => vk::Format::R32G32_SFLOAT,
        VertexFormat::Vec3 => vk::Format::R32G32B32_SFLOAT,
        VertexFormat::Vec4 => vk::Format::R32G32B32A32_SFLOAT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_core::backend::VertexFormat;

    #[test]
    fn builtin_vertex_source_forwards_non_position_attributes() {
        let attrs = [
            VertexAttribute { name: "position", format: VertexFormat::Vec2, offset: 0 },
            VertexAttribute { name: "color", format: VertexFormat::Vec4, offset: 8 },
        ];
        let src = builtin_vertex_source(&attrs, None, 0);

        assert!(src.contains("layout(location = 0) in vec2 in_position;"));
        assert!(src.contains("layout(location = 1) in vec4 in_color;"));
        assert!(src.contains("layout(location = 0) out vec4 v_color;"));
        assert!(src.contains("gl_Position = vec4(in_position, 0.0, 1.0);"));
        assert!(src.contains("v_color = in_color;"));
    }

    #[test]
    fn builtin_vertex_source_without_position_defaults_origin() {
        let attrs = [VertexAttribute { name: "uv", format: VertexFormat::Vec2, offset: 0 }];
        let src = builtin_vertex_source(&attrs, None, 0);
        assert!(src.contains("gl_Position = vec4(0.0, 0.0, 0.0, 1.0);"));
    }

    #[test]
    fn attr_vk_format_matches_shape() {
        assert_eq!(attr_vk_format(&VertexAttribute { name: "x", format: VertexFormat::F32, offset: 0 }), vk::Format::R32_SFLOAT);
        assert_eq!(attr_vk_format(&VertexAttribute { name: "x", format: VertexFormat::Vec4, offset: 0 }), vk::Format::R32G32B32A32_SFLOAT);
    }
}
