//! `GpuBackend` implementation over a loaded OpenGL 4.5 context.
//!
//! Grounded in `autograph-render-gl`'s `OpenGlBackend`/`OpenGlInstance`:
//! same `DEBUG_OUTPUT_SYNCHRONOUS` + `DebugMessageCallback` setup routed
//! through `log`, same `config::Config`-driven construction. Unlike the
//! teacher, there is no arena/instance split here — `DispatchRoot` already
//! owns the single backend instance (spec §5), so `GlBackend` just is the
//! backend, with interior state limited to what actually needs to survive
//! between dispatch calls (compiled passes, the scratch framebuffer).

use crate::gl;
use crate::gl::types::*;
use crate::shader;
use config::Config;
use dispatch_core::backend::{
    BackendCaps, GlobalVarSlot, GpuBackend, PassCreateParams, PassCreateResult, PassKind,
    PassRunParams, PrimitiveTopology,
};
use dispatch_core::accumulator::VarShape;
use dispatch_core::descriptor::{AccessMode, Descriptor, DescriptorType};
use std::collections::HashMap;
use std::ffi::CStr;
use std::os::raw::c_void;
use std::ptr;
use std::str;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct GlTexture(pub GLuint);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct GlBuffer(pub GLuint);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct GlPass(pub u64);

#[derive(Clone, Debug)]
struct TextureMeta {
    width: u32,
    height: u32,
    renderable: bool,
    storable: bool,
    internal_format: GLenum,
}

struct PassMeta {
    program: GLuint,
    vao: GLuint,
    kind: PassKind,
    topology: PrimitiveTopology,
    vertex_stride: u32,
    descriptor_types: Vec<DescriptorType>,
    /// `Placement::Global { index }` -> `glGetUniformLocation` result, in
    /// index order (see `backend::GlobalVarSlot`).
    global_locations: Vec<GLint>,
}

/// Internal format a texel buffer's backing texture view is created with.
/// `Mat3`/`Mat4` have no element-wise texel format and fall back to `Vec4`.
fn texel_internal_format(shape: VarShape) -> GLenum {
    match shape {
        VarShape::Float => gl::R32F,
        VarShape::Vec2 => gl::RG32F,
        VarShape::Vec3 => gl::RGB32F,
        VarShape::Vec4 | VarShape::Mat3 | VarShape::Mat4 => gl::RGBA32F,
    }
}

extern "system" fn debug_callback(
    _source: GLenum,
    _ty: GLenum,
    _id: GLuint,
    severity: GLenum,
    length: GLsizei,
    msg: *const GLchar,
    _user: *mut c_void,
) {
    let text = unsafe {
        str::from_utf8(std::slice::from_raw_parts(msg as *const u8, length.max(0) as usize))
            .unwrap_or("<non-utf8 GL debug message>")
    };
    let level = match severity {
        gl::DEBUG_SEVERITY_HIGH => log::Level::Error,
        gl::DEBUG_SEVERITY_MEDIUM => log::Level::Warn,
        gl::DEBUG_SEVERITY_LOW => log::Level::Info,
        _ => log::Level::Debug,
    };
    log::log!(level, "(GL) {}", text);
}

pub struct GlBackend {
    gl: gl::Gl,
    caps: BackendCaps,
    next_id: u64,
    passes: HashMap<u64, PassMeta>,
    textures: HashMap<GLuint, TextureMeta>,
    scratch_fbo: GLuint,
    bound_target: Option<GLuint>,
}

impl GlBackend {
    /// Builds a backend over an already-current OpenGL context, loading
    /// entry points with `loader` (e.g. `|s| glutin_context.get_proc_address(s)`).
    ///
    /// # Safety
    /// The caller must ensure an OpenGL 4.5 context is current on this
    /// thread for the lifetime of the returned backend.
    pub unsafe fn new(cfg: &Config, loader: impl FnMut(&'static str) -> *const c_void) -> GlBackend {
        let gl = gl::Gl::load_with(loader);

        gl.Enable(gl::DEBUG_OUTPUT_SYNCHRONOUS);
        gl.DebugMessageCallback(debug_callback as GLDEBUGPROC, ptr::null());
        gl.DebugMessageControl(gl::DONT_CARE, gl::DONT_CARE, gl::DONT_CARE, 0, ptr::null(), 1);

        let mut major = 0;
        let mut minor = 0;
        gl.GetIntegerv(gl::MAJOR_VERSION, &mut major);
        gl.GetIntegerv(gl::MINOR_VERSION, &mut minor);
        let vendor = CStr::from_ptr(gl.GetString(gl::VENDOR) as *const i8);
        let renderer = CStr::from_ptr(gl.GetString(gl::RENDERER) as *const i8);
        log::debug!("OpenGL {}.{} (vendor: {:?}, renderer: {:?})", major, minor, vendor, renderer);

        let mut ubo_alignment = 0;
        gl.GetIntegerv(gl::UNIFORM_BUFFER_OFFSET_ALIGNMENT, &mut ubo_alignment);
        let mut ubo_max_size = 0;
        gl.GetIntegerv(gl::MAX_UNIFORM_BLOCK_SIZE, &mut ubo_max_size);

        let glsl_version = cfg.get::<u32>("dispatch.gl.glsl_version").unwrap_or_else(|_| {
            // same mapping autograph-render-gl's limits probe uses: GL 4.x -> GLSL (4x0 - 10).
            (major as u32) * 100 + (minor as u32) * 10
        });

        let mut fbo = 0;
        gl.CreateFramebuffers(1, &mut fbo);

        GlBackend {
            caps: BackendCaps {
                supports_global_uniforms: true,
                supports_push_constants: false,
                push_constant_budget: 0,
                supports_ubo: true,
                ubo_budget: ubo_max_size.max(0) as u32,
                ubo_offsets_require_version: 140,
                glsl_version,
                glsl_es: false,
                supports_subgroups: false,
                supports_parallel_compute: major >= 4 && (major > 4 || minor >= 3),
                requires_explicit_bindings: false,
            },
            gl,
            next_id: 1,
            passes: HashMap::new(),
            textures: HashMap::new(),
            scratch_fbo: fbo,
            bound_target: None,
        }
    }

    /// Registers a texture this backend didn't create itself (window
    /// surfaces, swapchain images, application-owned render targets) so it
    /// can answer `texture_is_renderable`/`texture_dimensions`/etc.
    pub fn wrap_texture(
        &mut self,
        name: GLuint,
        width: u32,
        height: u32,
        internal_format: GLenum,
        renderable: bool,
        storable: bool,
    ) -> GlTexture {
        self.textures.insert(
            name,
            TextureMeta { width, height, renderable, storable, internal_format },
        );
        GlTexture(name)
    }

    fn assign_bindings(&self, types: &[DescriptorType]) -> Vec<u32> {
        let mut counters: HashMap<usize, u32> = HashMap::new();
        types
            .iter()
            .map(|ty| {
                let ns = self.desc_namespace(*ty);
                let counter = counters.entry(ns).or_insert(0);
                let binding = *counter;
                *counter += 1;
                binding
            })
            .collect()
    }

    fn bind_target(&mut self, target: Option<GLuint>) {
        match target {
            Some(tex) => {
                if self.bound_target != Some(tex) {
                    unsafe {
                        self.gl.NamedFramebufferTexture(self.scratch_fbo, gl::COLOR_ATTACHMENT0, tex, 0);
                    }
                    self.bound_target = Some(tex);
                }
                unsafe {
                    self.gl.BindFramebuffer(gl::FRAMEBUFFER, self.scratch_fbo);
                    let draw_buffers = [gl::COLOR_ATTACHMENT0];
                    self.gl.DrawBuffers(1, draw_buffers.as_ptr());
                }
            }
            None => unsafe {
                self.gl.BindFramebuffer(gl::FRAMEBUFFER, 0);
            },
        }
    }

    fn set_global_uniform(&self, program: GLuint, location: GLint, data: &[u8]) {
        if location < 0 {
            return;
        }
        unsafe {
            match data.len() {
                4 => {
                    let f = f32::from_le_bytes([data[0], data[1], data[2], data[3]]);
                    self.gl.ProgramUniform1fv(program, location, 1, &f);
                }
                8 | 12 | 16 => {
                    let floats: Vec<f32> = data
                        .chunks_exact(4)
                        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                        .collect();
                    match data.len() {
                        8 => self.gl.ProgramUniform2fv(program, location, 1, floats.as_ptr()),
                        12 => self.gl.ProgramUniform3fv(program, location, 1, floats.as_ptr()),
                        _ => self.gl.ProgramUniform4fv(program, location, 1, floats.as_ptr()),
                    }
                }
                36 => {
                    let floats: Vec<f32> = data
                        .chunks_exact(4)
                        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                        .collect();
                    self.gl.ProgramUniformMatrix3fv(program, location, 1, gl::FALSE, floats.as_ptr());
                }
                64 => {
                    let floats: Vec<f32> = data
                        .chunks_exact(4)
                        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                        .collect();
                    self.gl.ProgramUniformMatrix4fv(program, location, 1, gl::FALSE, floats.as_ptr());
                }
                other => {
                    log::warn!("global uniform update of unsupported size {} ignored", other);
                }
            }
        }
    }

    /// Assigns GL binding points to a freshly linked program's resources.
    ///
    /// The generated GLSL never carries a `layout(binding = N)` decoration
    /// (see `BackendCaps::requires_explicit_bindings`), so every opaque
    /// sampler/image uniform and every uniform/storage block needs its
    /// binding set here instead, by the same synthetic `binding_<index>`
    /// name `dispatch-core`'s prelude generator declares it under (buffer
    /// blocks use the `Block_binding_<index>` block name, the instance name
    /// stays `binding_<index>`). This only needs to run once per program,
    /// since the assignment is part of the linked program's state and
    /// `glGetProgramBinary` persists it along with everything else.
    fn assign_resource_bindings(&self, program: GLuint, types: &[DescriptorType], bindings: &[u32]) {
        for (i, (&ty, &binding)) in types.iter().zip(bindings.iter()).enumerate() {
            let name = format!("binding_{}", i);
            unsafe {
                match ty {
                    DescriptorType::SampledImage
                    | DescriptorType::StorageImage
                    | DescriptorType::UniformTexelBuffer
                    | DescriptorType::StorageTexelBuffer => {
                        let cname = std::ffi::CString::new(name).unwrap();
                        let loc = self.gl.GetUniformLocation(program, cname.as_ptr());
                        if loc >= 0 {
                            self.gl.ProgramUniform1i(program, loc, binding as GLint);
                        }
                    }
                    DescriptorType::UniformBuffer => {
                        let block_name = std::ffi::CString::new(format!("Block_{}", name)).unwrap();
                        let idx = self.gl.GetUniformBlockIndex(program, block_name.as_ptr());
                        if idx != gl::INVALID_INDEX {
                            self.gl.UniformBlockBinding(program, idx, binding);
                        }
                    }
                    DescriptorType::StorageBuffer => {
                        let block_name = std::ffi::CString::new(format!("Block_{}", name)).unwrap();
                        let idx = self.gl.GetProgramResourceIndex(
                            program,
                            gl::SHADER_STORAGE_BLOCK,
                            block_name.as_ptr(),
                        );
                        if idx != gl::INVALID_INDEX {
                            self.gl.ShaderStorageBlockBinding(program, idx, binding);
                        }
                    }
                }
            }
        }
    }

    /// Binds every descriptor for this call at its assigned binding point.
    /// Texel buffers need a texture object as their binding handle (GL has
    /// no notion of binding a buffer range directly to a sampler/image
    /// unit), so this creates one per texel-buffer descriptor and returns
    /// them for the caller to destroy once the draw/dispatch completes.
    fn bind_descriptors(&self, types: &[DescriptorType], descriptors: &[Descriptor<Self>]) -> Vec<GLuint> {
        let bindings = self.assign_bindings(types);
        let mut transient_textures = Vec::new();
        for (binding, descriptor) in bindings.into_iter().zip(descriptors.iter()) {
            unsafe {
                match *descriptor {
                    Descriptor::SampledImage { texture, .. } => {
                        self.gl.BindTextureUnit(binding, texture.0);
                    }
                    Descriptor::StorageImage { texture, access } => {
                        let meta = self.textures.get(&texture.0);
                        let format = meta.map(|m| m.internal_format).unwrap_or(gl::RGBA8);
                        let gl_access = match access {
                            AccessMode::ReadOnly => gl::READ_ONLY,
                            AccessMode::WriteOnly => gl::WRITE_ONLY,
                            AccessMode::ReadWrite => gl::READ_WRITE,
                        };
                        self.gl.BindImageTexture(binding, texture.0, 0, gl::FALSE, 0, gl_access, format);
                    }
                    Descriptor::UniformBuffer { buffer, offset, size } => {
                        self.gl.BindBufferRange(
                            gl::UNIFORM_BUFFER,
                            binding,
                            buffer.0,
                            offset as isize,
                            size as isize,
                        );
                    }
                    Descriptor::StorageBuffer { buffer, offset, size, .. } => {
                        self.gl.BindBufferRange(
                            gl::SHADER_STORAGE_BUFFER,
                            binding,
                            buffer.0,
                            offset as isize,
                            size as isize,
                        );
                    }
                    Descriptor::UniformTexelBuffer { buffer, offset, size, element } => {
                        let mut tex = 0;
                        self.gl.CreateTextures(gl::TEXTURE_BUFFER, 1, &mut tex);
                        self.gl.TextureBufferRange(
                            tex,
                            texel_internal_format(element),
                            buffer.0,
                            offset as isize,
                            size as isize,
                        );
                        self.gl.BindTextureUnit(binding, tex);
                        transient_textures.push(tex);
                    }
                    Descriptor::StorageTexelBuffer { buffer, offset, size, element, access } => {
                        let mut tex = 0;
                        self.gl.CreateTextures(gl::TEXTURE_BUFFER, 1, &mut tex);
                        self.gl.TextureBufferRange(
                            tex,
                            texel_internal_format(element),
                            buffer.0,
                            offset as isize,
                            size as isize,
                        );
                        let gl_access = match access {
                            AccessMode::ReadOnly => gl::READ_ONLY,
                            AccessMode::WriteOnly => gl::WRITE_ONLY,
                            AccessMode::ReadWrite => gl::READ_WRITE,
                        };
                        self.gl.BindImageTexture(
                            binding,
                            tex,
                            0,
                            gl::FALSE,
                            0,
                            gl_access,
                            texel_internal_format(element),
                        );
                        transient_textures.push(tex);
                    }
                }
            }
        }
        transient_textures
    }
}

impl GpuBackend for GlBackend {
    type Texture = GlTexture;
    type Buffer = GlBuffer;
    type Pass = GlPass;

    fn caps(&self) -> BackendCaps {
        self.caps
    }

    fn desc_namespace(&self, ty: DescriptorType) -> usize {
        match ty {
            DescriptorType::SampledImage => 0,
            DescriptorType::StorageImage => 1,
            DescriptorType::UniformBuffer => 2,
            DescriptorType::StorageBuffer => 3,
            DescriptorType::UniformTexelBuffer => 0,
            DescriptorType::StorageTexelBuffer => 1,
        }
    }

    fn pass_create(&mut self, params: &PassCreateParams<'_, Self>) -> Option<PassCreateResult<Self>> {
        let program = self
            .try_load_cached(params)
            .or_else(|| self.compile_and_link(params))?;

        let global_locations = resolve_global_locations(&self.gl, program, params.globals);
        let bindings = self.assign_bindings(params.descriptors);
        self.assign_resource_bindings(program, params.descriptors, &bindings);

        let vao = if params.kind == PassKind::Raster {
            unsafe {
                let mut vao = 0;
                self.gl.CreateVertexArrays(1, &mut vao);
                let mut offset_in_locations = 0u32;
                for attr in params.vertex_attributes {
                    let (size, ty) = attr_components(attr.format);
                    self.gl.EnableVertexArrayAttrib(vao, offset_in_locations);
                    self.gl.VertexArrayAttribFormat(vao, offset_in_locations, size, ty, gl::FALSE, attr.offset);
                    self.gl.VertexArrayAttribBinding(vao, offset_in_locations, 0);
                    offset_in_locations += attr.format.location_count();
                }
                vao
            }
        } else {
            0
        };

        let id = self.next_id;
        self.next_id += 1;
        let cached_program = shader::fetch_program_binary(&self.gl, program);
        self.passes.insert(
            id,
            PassMeta {
                program,
                vao,
                kind: params.kind,
                topology: params.topology,
                vertex_stride: params.vertex_stride,
                descriptor_types: params.descriptors.to_vec(),
                global_locations,
            },
        );

        Some(PassCreateResult { pass: GlPass(id), cached_program })
    }

    fn pass_run(&mut self, pass: Self::Pass, params: &PassRunParams<'_, Self>) {
        let (program, vao, kind, topology, vertex_stride, descriptor_types, global_locations) =
            match self.passes.get(&pass.0) {
            Some(meta) => (
                meta.program,
                meta.vao,
                meta.kind,
                meta.topology,
                meta.vertex_stride,
                meta.descriptor_types.clone(),
                meta.global_locations.clone(),
            ),
            None => {
                log::error!("pass_run on unknown pass {:?}", pass);
                return;
            }
        };

        unsafe {
            self.gl.UseProgram(program);
        }
        let transient_descriptor_textures = self.bind_descriptors(&descriptor_types, params.descriptors);

        for update in params.global_updates {
            if let Some(&location) = global_locations.get(update.index as usize) {
                self.set_global_uniform(program, location, update.data);
            }
        }

        match kind {
            PassKind::Compute => {
                let (x, y, z) = params.compute_groups;
                unsafe {
                    self.gl.DispatchCompute(x, y, z);
                    self.gl.MemoryBarrier(gl::SHADER_IMAGE_ACCESS_BARRIER_BIT | gl::FRAMEBUFFER_BARRIER_BIT);
                }
            }
            PassKind::Raster => {
                self.bind_target(params.target.map(|t| t.0));
                if let Some((x, y, w, h)) = params.scissor {
                    unsafe {
                        self.gl.Enable(gl::SCISSOR_TEST);
                        self.gl.Scissor(x, y, w as GLsizei, h as GLsizei);
                    }
                } else {
                    unsafe {
                        self.gl.Disable(gl::SCISSOR_TEST);
                    }
                }
                let mode = match topology {
                    PrimitiveTopology::TriangleList => gl::TRIANGLES,
                    PrimitiveTopology::TriangleStrip => gl::TRIANGLE_STRIP,
                    PrimitiveTopology::LineList => gl::LINES,
                };
                unsafe {
                    self.gl.BindVertexArray(vao);
                    // Caller-supplied geometry (a device-resident buffer the
                    // caller already owns) takes priority; otherwise, if the
                    // call carries raw vertex bytes (the implicit quad path,
                    // see `dispatch::dispatch_finish`), stream them into a
                    // transient buffer that lives only for this draw.
                    let mut transient_vbo = 0;
                    if let Some(buf) = params.vertex_buffer {
                        self.gl.VertexArrayVertexBuffer(vao, 0, buf.0, 0, vertex_stride as GLsizei);
                    } else if let Some(data) = params.vertex_data.filter(|d| !d.is_empty()) {
                        self.gl.CreateBuffers(1, &mut transient_vbo);
                        self.gl.NamedBufferStorage(transient_vbo, data.len() as isize, data.as_ptr() as *const _, 0);
                        self.gl.VertexArrayVertexBuffer(vao, 0, transient_vbo, 0, vertex_stride as GLsizei);
                    }
                    if let Some(ib) = params.index_buffer {
                        self.gl.VertexArrayElementBuffer(vao, ib.0);
                        self.gl.DrawElements(mode, params.vertex_count as GLsizei, gl::UNSIGNED_INT, ptr::null());
                    } else {
                        self.gl.DrawArrays(mode, 0, params.vertex_count as GLsizei);
                    }
                    if transient_vbo != 0 {
                        self.gl.DeleteBuffers(1, &transient_vbo);
                    }
                }
            }
        }

        if !transient_descriptor_textures.is_empty() {
            unsafe {
                self.gl.DeleteTextures(transient_descriptor_textures.len() as GLsizei, transient_descriptor_textures.as_ptr());
            }
        }
    }

    fn pass_destroy(&mut self, pass: Self::Pass) {
        if let Some(meta) = self.passes.remove(&pass.0) {
            unsafe {
                self.gl.DeleteProgram(meta.program);
                if meta.vao != 0 {
                    self.gl.DeleteVertexArrays(1, &meta.vao);
                }
            }
        }
    }

    fn buf_create(&mut self, size: usize, _uniform: bool, host_writable: bool) -> Self::Buffer {
        unsafe {
            let mut name = 0;
            self.gl.CreateBuffers(1, &mut name);
            let flags = if host_writable { gl::DYNAMIC_STORAGE_BIT } else { 0 };
            self.gl.NamedBufferStorage(name, size as isize, ptr::null(), flags);
            GlBuffer(name)
        }
    }

    fn buf_write(&mut self, buf: Self::Buffer, offset: usize, data: &[u8]) {
        unsafe {
            self.gl.NamedBufferSubData(buf.0, offset as isize, data.len() as isize, data.as_ptr() as *const _);
        }
    }

    fn buf_destroy(&mut self, buf: Self::Buffer) {
        unsafe {
            self.gl.DeleteBuffers(1, &buf.0);
        }
    }

    fn texture_is_renderable(&self, texture: Self::Texture) -> bool {
        self.textures.get(&texture.0).map(|t| t.renderable).unwrap_or(true)
    }

    fn texture_is_storable(&self, texture: Self::Texture) -> bool {
        self.textures.get(&texture.0).map(|t| t.storable).unwrap_or(false)
    }

    fn texture_dimensions(&self, texture: Self::Texture) -> (u32, u32) {
        self.textures.get(&texture.0).map(|t| (t.width, t.height)).unwrap_or((0, 0))
    }

    fn texture_format_tag(&self, texture: Self::Texture) -> u64 {
        self.textures.get(&texture.0).map(|t| t.internal_format as u64).unwrap_or(0)
    }
}

impl GlBackend {
    fn try_load_cached(&self, params: &PassCreateParams<'_, Self>) -> Option<GLuint> {
        let bytes = params.cached_program?;
        shader::load_binary(&self.gl, bytes)
    }

    fn compile_and_link(&self, params: &PassCreateParams<'_, Self>) -> Option<GLuint> {
        match params.kind {
            PassKind::Raster => {
                let fragment_source = params.fragment_source?;
                let vertex_source =
                    shader::builtin_vertex_source(self.caps.glsl_version, params.vertex_attributes, params.projection);
                let vs = shader::compile(&self.gl, gl::VERTEX_SHADER, &vertex_source).ok()?;
                let fs = match shader::compile(&self.gl, gl::FRAGMENT_SHADER, fragment_source) {
                    Ok(fs) => fs,
                    Err(e) => {
                        log::error!("fragment shader compile failed: {}", e);
                        unsafe { self.gl.DeleteShader(vs) };
                        return None;
                    }
                };
                shader::link(&self.gl, &[vs, fs]).map_err(|e| log::error!("program link failed: {}", e)).ok()
            }
            PassKind::Compute => {
                let compute_source = params.compute_source?;
                let cs = shader::compile(&self.gl, gl::COMPUTE_SHADER, compute_source)
                    .map_err(|e| log::error!("compute shader compile failed: {}", e))
                    .ok()?;
                shader::link(&self.gl, &[cs]).map_err(|e| log::error!("program link failed: {}", e)).ok()
            }
        }
    }
}

fn resolve_global_locations(gl: &gl::Gl, program: GLuint, globals: &[GlobalVarSlot<'_>]) -> Vec<GLint> {
    let count = globals.iter().map(|g| g.index + 1).max().unwrap_or(0) as usize;
    let mut locations = vec![-1; count];
    for slot in globals {
        let cname = std::ffi::CString::new(slot.name).unwrap();
        let location = unsafe { gl.GetUniformLocation(program, cname.as_ptr()) };
        locations[slot.index as usize] = location;
    }
    locations
}

fn attr_components(format: dispatch_core::backend::VertexFormat) -> (GLint, GLenum) {
    use dispatch_core::backend::VertexFormat;
    match format {
        VertexFormat::F32 => (1, gl::FLOAT),
        VertexFormat::Vec2 => (2, gl::FLOAT),
        VertexFormat::Vec3 => (3, gl::FLOAT),
        VertexFormat::Vec4 => (4, gl::FLOAT),
    }
}
