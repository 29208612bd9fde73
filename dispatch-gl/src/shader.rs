//! Shader object/program compilation and linking.
//!
//! Grounded in `autograph-render-gl`'s `create_shader_from_glsl`/
//! `GlShaderModule` (info-log retrieval, `COMPILE_STATUS`/`LINK_STATUS`
//! checks), adapted to the two stages this backend ever compiles: a
//! fixed built-in vertex shader for raster passes, and the
//! `dispatch-core`-generated fragment/compute source.

use crate::gl;
use crate::gl::types::*;
use dispatch_core::backend::VertexAttribute;
use std::ffi::CStr;

#[derive(Debug)]
pub struct CompileError(pub String);

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for CompileError {}

fn shader_info_log(gl: &gl::Gl, obj: GLuint) -> String {
    unsafe {
        let mut len = 0;
        gl.GetShaderiv(obj, gl::INFO_LOG_LENGTH, &mut len);
        let mut buf = vec![0u8; len.max(1) as usize];
        let mut written = 0;
        gl.GetShaderInfoLog(obj, len, &mut written, buf.as_mut_ptr() as *mut i8);
        buf.truncate(written.max(0) as usize);
        String::from_utf8_lossy(&buf).into_owned()
    }
}

fn program_info_log(gl: &gl::Gl, obj: GLuint) -> String {
    unsafe {
        let mut len = 0;
        gl.GetProgramiv(obj, gl::INFO_LOG_LENGTH, &mut len);
        let mut buf = vec![0u8; len.max(1) as usize];
        let mut written = 0;
        gl.GetProgramInfoLog(obj, len, &mut written, buf.as_mut_ptr() as *mut i8);
        buf.truncate(written.max(0) as usize);
        String::from_utf8_lossy(&buf).into_owned()
    }
}

pub fn compile(gl: &gl::Gl, stage: GLenum, source: &str) -> Result<GLuint, CompileError> {
    unsafe {
        let obj = gl.CreateShader(stage);
        let len = source.len() as GLint;
        let ptr = source.as_ptr() as *const i8;
        gl.ShaderSource(obj, 1, &ptr, &len);
        gl.CompileShader(obj);

        let mut status = 0;
        gl.GetShaderiv(obj, gl::COMPILE_STATUS, &mut status);
        if status != GLint::from(gl::TRUE) {
            let log = shader_info_log(gl, obj);
            gl.DeleteShader(obj);
            return Err(CompileError(log));
        }
        Ok(obj)
    }
}

pub fn link(gl: &gl::Gl, shaders: &[GLuint]) -> Result<GLuint, CompileError> {
    unsafe {
        let program = gl.CreateProgram();
        for &s in shaders {
            gl.AttachShader(program, s);
        }
        gl.LinkProgram(program);

        for &s in shaders {
            gl.DetachShader(program, s);
            gl.DeleteShader(s);
        }

        let mut status = 0;
        gl.GetProgramiv(program, gl::LINK_STATUS, &mut status);
        if status != GLint::from(gl::TRUE) {
            let log = program_info_log(gl, program);
            gl.DeleteProgram(program);
            return Err(CompileError(log));
        }
        Ok(program)
    }
}

/// Loads a previously retrieved `glGetProgramBinary` blob. The first 4 bytes
/// (little-endian) hold the binary format enum, the rest is the binary
/// itself; this is the same layout `fetch_program_binary` produces.
pub fn load_binary(gl: &gl::Gl, bytes: &[u8]) -> Option<GLuint> {
    if bytes.len() < 4 {
        return None;
    }
    let format = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let blob = &bytes[4..];
    unsafe {
        let program = gl.CreateProgram();
        gl.ProgramBinary(program, format, blob.as_ptr() as *const _, blob.len() as GLsizei);
        let mut status = 0;
        gl.GetProgramiv(program, gl::LINK_STATUS, &mut status);
        if status != GLint::from(gl::TRUE) {
            gl.DeleteProgram(program);
            return None;
        }
        Some(program)
    }
}

/// Reads back a linked program's binary for persistence, in the same
/// `format ++ blob` layout `load_binary` expects.
pub fn fetch_program_binary(gl: &gl::Gl, program: GLuint) -> Option<Vec<u8>> {
    unsafe {
        let mut size = 0;
        gl.GetProgramiv(program, gl::PROGRAM_BINARY_LENGTH, &mut size);
        if size <= 0 {
            return None;
        }
        let mut blob = vec![0u8; size as usize];
        let mut format: GLenum = 0;
        let mut written = 0;
        gl.GetProgramBinary(
            program,
            size,
            &mut written,
            &mut format,
            blob.as_mut_ptr() as *mut _,
        );
        blob.truncate(written.max(0) as usize);
        let mut out = Vec::with_capacity(4 + blob.len());
        out.extend_from_slice(&format.to_le_bytes());
        out.extend_from_slice(&blob);
        Some(out)
    }
}

/// Builds the fixed-function vertex shader paired with every raster pass.
///
/// `dispatch-core`'s prelude generator never emits a real vertex stage (see
/// its `vertex_head`/`vertex_body` fields, which stay empty for the
/// implicit-quad and custom-vertex paths this backend actually exercises);
/// position comes from whichever attribute is named `position`, and every
/// other attribute is forwarded to the fragment stage as a flat varying
/// named `v_<attribute name>` for user code to declare and read if it needs
/// to.
pub fn builtin_vertex_source(
    glsl_version: u32,
    attributes: &[VertexAttribute],
    projection: Option<dispatch_core::placement::Placement>,
) -> String {
    use std::fmt::Write;
    let mut src = String::with_capacity(512);
    let _ = writeln!(src, "#version {}", glsl_version);

    let mut location = 0u32;
    for attr in attributes {
        let ty = attr_glsl_type(attr);
        let _ = writeln!(src, "layout(location = {}) in {} in_{};", location, ty, attr.name);
        location += attr.format.location_count();
    }
    for attr in attributes {
        if attr.name != "position" {
            let ty = attr_glsl_type(attr);
            let _ = writeln!(src, "out {} v_{};", ty, attr.name);
        }
    }
    // This backend's caps (`supports_global_uniforms: true`,
    // `supports_push_constants: false`) mean `place()` only ever routes a
    // dynamic projection matrix to `Placement::Global`; a bare uniform
    // covers that case. Vertex and fragment stage text are linked into one
    // program, so this joins the same uniform namespace the fragment-stage
    // prelude (and `update_pass_var`) already addresses by name.
    if projection.is_some() {
        let _ = writeln!(src, "uniform mat3 u_projection;");
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

pub fn debug_label(gl: &gl::Gl, kind: GLenum, obj: GLuint, label: &str) {
    unsafe {
        let cstr = std::ffi::CString::new(label).unwrap();
        gl.ObjectLabel(kind, obj, label.len() as GLsizei, cstr.as_ptr());
    }
}

#[allow(dead_code)]
fn vendor_string(gl: &gl::Gl) -> String {
    unsafe {
        let ptr = gl.GetString(gl::VENDOR) as *const i8;
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
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
        let src = builtin_vertex_source(450, &attrs, None);

        assert!(src.starts_with("#version 450\n"));
        assert!(src.contains("layout(location = 0) in vec2 in_position;"));
        assert!(src.contains("layout(location = 1) in vec4 in_color;"));
        assert!(src.contains("out vec4 v_color;"));
        assert!(!src.contains("out vec2 v_position;"));
        assert!(src.contains("gl_Position = vec4(in_position, 0.0, 1.0);"));
        assert!(src.contains("v_color = in_color;"));
    }

    #[test]
    fn builtin_vertex_source_without_position_defaults_origin() {
        let attrs = [VertexAttribute { name: "uv", format: VertexFormat::Vec2, offset: 0 }];
        let src = builtin_vertex_source(330, &attrs, None);

        assert!(src.contains("gl_Position = vec4(0.0, 0.0, 0.0, 1.0);"));
        assert!(src.contains("v_uv = in_uv;"));
    }

    #[test]
    fn builtin_vertex_source_locations_advance_by_location_count() {
        // a Vec3 consumes one location slot same as Vec2/Vec4 (only
        // multi-column matrices, unused here, would consume more than one).
        let attrs = [
            VertexAttribute { name: "a", format: VertexFormat::Vec3, offset: 0 },
            VertexAttribute { name: "b", format: VertexFormat::F32, offset: 12 },
        ];
        let src = builtin_vertex_source(450, &attrs, None);

        assert!(src.contains("layout(location = 0) in vec3 in_a;"));
        assert!(src.contains("layout(location = 1) in float in_b;"));
    }

    #[test]
    fn attr_glsl_type_matches_format() {
        assert_eq!(attr_glsl_type(&VertexAttribute { name: "x", format: VertexFormat::F32, offset: 0 }), "float");
        assert_eq!(attr_glsl_type(&VertexAttribute { name: "x", format: VertexFormat::Vec2, offset: 0 }), "vec2");
        assert_eq!(attr_glsl_type(&VertexAttribute { name: "x", format: VertexFormat::Vec3, offset: 0 }), "vec3");
        assert_eq!(attr_glsl_type(&VertexAttribute { name: "x", format: VertexFormat::Vec4, offset: 0 }), "vec4");
    }
}
