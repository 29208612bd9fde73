//! The three public dispatch entry points and the per-variable update step.

use crate::accumulator::{OutputSignature, ShaderAccumulator, VarShape};
use crate::backend::{
    BlendFactor, BlendParams, GlobalUpdate, GpuBackend, PassRunParams, PrimitiveTopology,
    VertexAttribute, VertexFormat,
};
use crate::cache::{DispatchQuery, DispatchRoot};
use crate::descriptor::Descriptor;
use crate::error::{DispatchError, Result};
use crate::placement::Placement;
use crate::record::RasterMatchKey;
use log::error;

/// An integer pixel rectangle within a target, in the target's native
/// (unflipped) coordinate space.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    fn clip_to(self, tw: u32, th: u32) -> Rect {
        let x0 = self.x.max(0).min(tw as i32);
        let y0 = self.y.max(0).min(th as i32);
        let x1 = (self.x + self.w as i32).max(0).min(tw as i32);
        let y1 = (self.y + self.h as i32).max(0).min(th as i32);
        Rect {
            x: x0,
            y: y0,
            w: (x1 - x0).max(0) as u32,
            h: (y1 - y0).max(0) as u32,
        }
    }

    fn covers(self, tw: u32, th: u32) -> bool {
        self.x == 0 && self.y == 0 && self.w == tw && self.h == th
    }
}

/// Interpretation of caller-supplied vertex positions in `dispatch_vertex`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CoordMode {
    /// Already in clip space.
    Absolute,
    /// Pixel coordinates relative to the target.
    Relative,
    /// `[0, 1]` normalized coordinates.
    Normalized,
}

fn validate_common<B: GpuBackend>(acc: &ShaderAccumulator<B>, expect_output: OutputSignature) -> Result<()> {
    if acc.is_failed() {
        return Err(DispatchError::ShaderFailed);
    }
    if acc.output != expect_output {
        return Err(DispatchError::IncompatibleSignature);
    }
    Ok(())
}

/// Implicit-quad raster or compute dispatch onto a 2D target.
///
/// `rect` defaults to the full target when `None`. For raster targets the
/// accumulator's quad attributes are written directly; for targets that are
/// not renderable but are storable and the backend supports parallel
/// compute, the dispatch is transparently emulated via a compute shader
/// (see [`translate_to_compute`]).
pub fn dispatch_finish<B: GpuBackend>(
    root: &mut DispatchRoot<B>,
    acc: &mut ShaderAccumulator<B>,
    target: B::Texture,
    rect: Option<Rect>,
    blend: Option<BlendParams>,
) -> Result<()> {
    validate_common(acc, OutputSignature::Color)?;

    let (tw, th) = root.backend().texture_dimensions(target);
    let renderable = root.backend().texture_is_renderable(target);
    let storable = root.backend().texture_is_storable(target);
    let caps = root.backend().caps();

    if !renderable && !(storable && caps.supports_parallel_compute) {
        return Err(DispatchError::InvalidTarget {
            reason: "target is neither renderable nor compute-storable",
        });
    }

    let rect = rect.unwrap_or(Rect { x: 0, y: 0, w: tw, h: th }).clip_to(tw, th);
    let load_target = blend.is_some() || !rect.covers(tw, th);

    let use_compute = !renderable;

    if use_compute {
        translate_to_compute(acc, target, rect, blend);
    } else {
        let clip = clip_corners(rect, tw, th);
        acc.add_quad_attribute(
            VertexAttribute { name: "position", format: VertexFormat::Vec2, offset: 0 },
            clip,
        );
    }

    let quad_attributes: Vec<VertexAttribute> =
        acc.quad_attributes.iter().map(|qa| qa.attribute.clone()).collect();
    let quad_stride: u32 = acc.quad_attributes.iter().map(|qa| qa.attribute.format.size()).sum();

    let format_tag = root.backend().texture_format_tag(target);
    let query = if use_compute {
        DispatchQuery::compute()
    } else {
        let mut q = DispatchQuery::raster(RasterMatchKey {
            target_format_tag: format_tag,
            blend,
            load_target,
            vertex_params: Some((PrimitiveTopology::TriangleList, quad_stride)),
        });
        q.blend = blend;
        q.load_target = load_target;
        q.vertex_attributes = &quad_attributes;
        q
    };

    run(root, acc, &query, Some(target), (rect.w, rect.h), None, None)
}

/// Pure compute dispatch with no implicit 2D target binding.
pub fn dispatch_compute<B: GpuBackend>(
    root: &mut DispatchRoot<B>,
    acc: &mut ShaderAccumulator<B>,
    dispatch_size: (u32, u32, u32),
) -> Result<()> {
    validate_common(acc, OutputSignature::None)?;
    if !acc.compute {
        return Err(DispatchError::IncompatibleSignature);
    }
    let query = DispatchQuery::compute();
    run(root, acc, &query, None, (0, 0), Some(dispatch_size), None)
}

/// Parameters for caller-supplied vertex geometry.
pub struct VertexParams<'a, B: GpuBackend> {
    pub vertex_buffer: Option<B::Buffer>,
    pub vertex_data: Option<&'a [u8]>,
    pub index_buffer: Option<B::Buffer>,
    pub vertex_count: u32,
    pub stride: u32,
    pub topology: PrimitiveTopology,
    pub position_attribute_index: usize,
    pub attributes: &'a [VertexAttribute],
    pub coord_mode: CoordMode,
    pub flipped: bool,
    pub scissor: Option<(i32, i32, u32, u32)>,
}

/// Custom-vertex raster dispatch.
pub fn dispatch_vertex<B: GpuBackend>(
    root: &mut DispatchRoot<B>,
    acc: &mut ShaderAccumulator<B>,
    target: B::Texture,
    params: VertexParams<'_, B>,
    blend: Option<BlendParams>,
) -> Result<()> {
    validate_common(acc, OutputSignature::Color)?;

    if params.position_attribute_index >= params.attributes.len() {
        return Err(DispatchError::InvalidTarget {
            reason: "position attribute index out of range",
        });
    }
    if !root.backend().texture_is_renderable(target) {
        return Err(DispatchError::InvalidTarget { reason: "vertex target is not renderable" });
    }

    let needs_projection = params.coord_mode != CoordMode::Absolute;
    let format_tag = root.backend().texture_format_tag(target);
    let (tw, th) = root.backend().texture_dimensions(target);
    let mut scissor = params.scissor;
    if params.flipped {
        if let Some((x, y, w, h)) = scissor {
            scissor = Some((x, th as i32 - y - h as i32, w, h));
        }
    }

    if needs_projection {
        let matrix = vertex_projection_matrix(params.coord_mode, params.flipped, tw, th);
        acc.add_variable("u_projection", VarShape::Mat3, true, &matrix);
    }

    let mut q = DispatchQuery::raster(RasterMatchKey {
        target_format_tag: format_tag,
        blend,
        load_target: true,
        vertex_params: Some((params.topology, params.stride)),
    });
    q.vertex_attributes = params.attributes;

    run(
        root,
        acc,
        &q,
        Some(target),
        (0, 0),
        None,
        Some((params.vertex_buffer, params.index_buffer, params.vertex_count, scissor)),
    )
}

type VertexRunParams<B> = (
    Option<<B as GpuBackend>::Buffer>,
    Option<<B as GpuBackend>::Buffer>,
    u32,
    Option<(i32, i32, u32, u32)>,
);

fn run<B: GpuBackend>(
    root: &mut DispatchRoot<B>,
    acc: &mut ShaderAccumulator<B>,
    query: &DispatchQuery<'_>,
    target: Option<B::Texture>,
    target_size: (u32, u32),
    compute_size: Option<(u32, u32, u32)>,
    vertex: Option<VertexRunParams<B>>,
) -> Result<()> {
    let idx = match root.find_or_build(acc, query) {
        Ok(idx) => idx,
        Err(e) => {
            error!("dispatch failed: {}", e);
            acc.mark_failed();
            return Err(e);
        }
    };

    let group_size = acc.compute_group_size;
    let variable_values: Vec<(usize, Vec<u8>)> = acc
        .variables
        .iter()
        .enumerate()
        .map(|(i, v)| (i, v.data.to_vec()))
        .collect();

    let mut global_updates_storage: Vec<(u32, Vec<u8>)> = Vec::new();
    let mut ubo_dirty = false;
    {
        let record = root.record_mut(idx);
        for (i, data) in &variable_values {
            update_pass_var(record, *i, data, &mut global_updates_storage, &mut ubo_dirty);
        }
    }

    if ubo_dirty {
        let record = root.record(idx);
        if let Some(buf) = record.ubo_buffer {
            let bytes = record.ubo_host_scratch.clone();
            root.backend_mut().buf_write(buf, 0, &bytes);
        }
    }

    let descriptors: Vec<Descriptor<B>> = acc.descriptors.clone();

    let (vertex_buffer, index_buffer, vertex_count, scissor) = match vertex {
        Some((vb, ib, count, sc)) => (vb, ib, count, sc),
        // implicit quad: two triangles, no caller-supplied buffer
        None => (None, None, 6, None),
    };

    if target.is_some() && vertex.is_none() {
        // The quad is drawn as a plain (non-indexed) triangle list of 6
        // vertices, so the two corners shared between the triangles
        // (0 and 2) are duplicated here: 0,1,2, 0,2,3.
        const QUAD_TRIANGLE_LIST: [usize; 6] = [0, 1, 2, 0, 2, 3];
        let record = root.record_mut(idx);
        record.vertex_scratch.clear();
        for &corner_index in &QUAD_TRIANGLE_LIST {
            for qa in &acc.quad_attributes {
                let corner = &qa.corners[corner_index];
                for &f in corner.iter().take((qa.attribute.format.size() / 4) as usize) {
                    record.vertex_scratch.extend_from_slice(&f.to_le_bytes());
                }
            }
        }
    }

    let global_updates: Vec<GlobalUpdate<'_>> = global_updates_storage
        .iter()
        .map(|(index, data)| GlobalUpdate { index: *index, data })
        .collect();

    let record = root.record(idx);
    let pass = record.pass.expect("failed records never reach run()");
    let groups = if acc.compute {
        let (gx, gy, gz) = group_size;
        let (dx, dy, dz) = compute_size.unwrap_or((target_size.0, target_size.1, 1));
        (
            (dx + gx - 1) / gx,
            (dy + gy - 1) / gy,
            (dz + gz - 1) / gz,
        )
    } else {
        (0, 0, 0)
    };

    let run_params = PassRunParams::<B> {
        descriptors: &descriptors,
        push_constants: &record.push_constant_scratch,
        global_updates: &global_updates,
        vertex_buffer,
        vertex_data: if record.vertex_scratch.is_empty() { None } else { Some(&record.vertex_scratch) },
        index_buffer,
        vertex_count,
        compute_groups: groups,
        target,
        scissor,
    };

    root.backend_mut().pass_run(pass, &run_params);
    Ok(())
}

/// Per-variable update (spec §4.7): skip if unchanged, otherwise route the
/// new bytes to the placement-appropriate destination.
fn update_pass_var<B: GpuBackend>(
    record: &mut crate::record::CompiledPassRecord<B>,
    index: usize,
    data: &[u8],
    global_updates: &mut Vec<(u32, Vec<u8>)>,
    ubo_dirty: &mut bool,
) {
    let pv = &mut record.variables[index];
    if pv.last_value.as_slice() == data {
        return;
    }
    pv.last_value = data.to_vec();

    match pv.placement {
        Placement::Global { index } => {
            global_updates.push((index, data.to_vec()));
        }
        Placement::Ubo { offset } => {
            let offset = offset as usize;
            let dst = &mut record.ubo_host_scratch[offset..offset + data.len()];
            dst.copy_from_slice(data);
            *ubo_dirty = true;
        }
        Placement::PushConstant { offset } => {
            let offset = offset as usize;
            let dst = &mut record.push_constant_scratch[offset..offset + data.len()];
            dst.copy_from_slice(data);
        }
    }
}

/// Computes clip-space corner positions (x, y, 0, 1) for `rect` within a
/// `tw` x `th` target, for the implicit-quad vertex wrapper.
fn clip_corners(rect: Rect, tw: u32, th: u32) -> [[f32; 4]; 4] {
    let to_clip_x = |x: i32| (x as f32 / tw as f32) * 2.0 - 1.0;
    let to_clip_y = |y: i32| 1.0 - (y as f32 / th as f32) * 2.0;
    let x0 = to_clip_x(rect.x);
    let x1 = to_clip_x(rect.x + rect.w as i32);
    let y0 = to_clip_y(rect.y);
    let y1 = to_clip_y(rect.y + rect.h as i32);
    [
        [x0, y0, 0.0, 1.0],
        [x1, y0, 0.0, 1.0],
        [x1, y1, 0.0, 1.0],
        [x0, y1, 0.0, 1.0],
    ]
}

/// Builds the column-major `mat3` (as 9 little-endian `f32`s) that maps a
/// `dispatch_vertex` position attribute, expressed in `mode`'s coordinate
/// space, to clip space. `flipped` reverses the Y mapping, matching the
/// scissor-rect flip already applied above it for the same target.
fn vertex_projection_matrix(mode: CoordMode, flipped: bool, tw: u32, th: u32) -> [u8; 36] {
    let (sx, ox) = match mode {
        CoordMode::Relative => (2.0 / tw as f32, -1.0),
        CoordMode::Normalized => (2.0, -1.0),
        CoordMode::Absolute => (1.0, 0.0),
    };
    let (sy, oy) = match (mode, flipped) {
        (CoordMode::Relative, false) => (-2.0 / th as f32, 1.0),
        (CoordMode::Relative, true) => (2.0 / th as f32, -1.0),
        (CoordMode::Normalized, false) => (-2.0, 1.0),
        (CoordMode::Normalized, true) => (2.0, -1.0),
        (CoordMode::Absolute, _) => (1.0, 0.0),
    };
    // column-major: column 2 carries the translation applied to the
    // homogeneous 1 in vec3(x, y, 1).
    let columns: [[f32; 3]; 3] = [[sx, 0.0, 0.0], [0.0, sy, 0.0], [ox, oy, 1.0]];
    let mut bytes = [0u8; 36];
    let mut i = 0;
    for col in &columns {
        for &v in col {
            bytes[i..i + 4].copy_from_slice(&v.to_le_bytes());
            i += 4;
        }
    }
    bytes
}

/// Compute-as-raster emulation (spec §4.6): injects a storage-image
/// descriptor for the target, a `base` offset variable carrying the rect
/// origin and axis directions, and, if blending, in-shader application of
/// the requested blend factors by loading the current target pixel first.
fn translate_to_compute<B: GpuBackend>(
    acc: &mut ShaderAccumulator<B>,
    target: B::Texture,
    rect: Rect,
    blend: Option<BlendParams>,
) {
    acc.compute = true;
    acc.add_variable(
        "base",
        VarShape::Vec4,
        true,
        &[
            (rect.x as f32).to_le_bytes(),
            (rect.y as f32).to_le_bytes(),
            1f32.to_le_bytes(),
            1f32.to_le_bytes(),
        ]
        .concat(),
    );

    // Descriptors are declared in the generated shader under a synthetic
    // `binding_<index>` name matching their position in this list; the
    // target image always lands last since it is appended after whatever
    // descriptors the caller already added while building the shader.
    let image_index = acc.descriptors.len();
    let image_name = format!("binding_{}", image_index);
    acc.add_descriptor(crate::descriptor::Descriptor::StorageImage {
        texture: target,
        access: if blend.is_some() { crate::descriptor::AccessMode::ReadWrite } else { crate::descriptor::AccessMode::WriteOnly },
    });

    let mut body = String::new();
    body.push_str("vec2 pix = vec2(gl_GlobalInvocationID.xy) + base.xy;\n");
    body.push_str("vec4 color = fragment_color(pix);\n");
    if let Some(params) = blend {
        let _ = std::fmt::Write::write_fmt(
            &mut body,
            format_args!("vec4 orig = imageLoad({}, ivec2(pix));\n", image_name),
        );
        body.push_str(&format!(
            "color = color * {} + orig * {};\n",
            blend_factor_expr(params.src),
            blend_factor_expr(params.dst)
        ));
    }
    let _ = std::fmt::Write::write_fmt(&mut body, format_args!("imageStore({}, ivec2(pix), color);\n", image_name));
    acc.push_main(&body);
}

fn blend_factor_expr(factor: BlendFactor) -> &'static str {
    match factor {
        BlendFactor::Zero => "vec4(0.0)",
        BlendFactor::One => "vec4(1.0)",
        BlendFactor::SrcAlpha => "vec4(color.a)",
        BlendFactor::OneMinusSrcAlpha => "vec4(1.0 - color.a)",
    }
}
