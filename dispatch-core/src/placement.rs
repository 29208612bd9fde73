//! The variable placer: assigns each shader variable to push-constants, a
//! uniform buffer, or a global uniform slot.
//!
//! Ported from the two-pass placement algorithm of the originating C
//! implementation (`add_pass_var` in its dispatch core): a conservative
//! first pass keeps large (matrix) variables out of push-constants unless
//! requested `dynamic`, followed by an opportunistic second pass that places
//! whatever remains wherever it still fits.

use crate::accumulator::{ShaderVariable, VarShape};
use crate::backend::BackendCaps;
use crate::error::{DispatchError, Result};

/// Where a variable ended up.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Placement {
    Global { index: u32 },
    Ubo { offset: u32 },
    PushConstant { offset: u32 },
}

/// Per-variable metadata computed by the placer, carried into the compiled
/// pass record.
#[derive(Clone, Debug)]
pub struct PlacedVariable {
    pub name: String,
    pub shape: VarShape,
    pub placement: Placement,
    /// Most recently written value, used for change-suppressed updates.
    pub last_value: Vec<u8>,
}

/// Outcome of a full placement pass over an accumulator's variable list.
pub struct PlacementResult {
    pub variables: Vec<PlacedVariable>,
    pub push_constant_size: u32,
    /// std140 layout for the synthetic UBO, if any variable landed there.
    pub ubo_size: u32,
}

fn align_up(offset: u32, align: u32) -> u32 {
    (offset + align - 1) / align * align
}

/// std140 alignment rounds vec3 up to vec4 and aligns matrices/arrays to 16
/// bytes; our shapes are all single values (no arrays), so std140 and
/// std430 coincide except that vec3 reserves vec4 of space.
fn std140_align(shape: VarShape) -> u32 {
    match shape {
        VarShape::Vec3 => 16,
        other => other.align(),
    }
}

fn std140_size(shape: VarShape) -> u32 {
    match shape {
        VarShape::Vec3 => 12,
        other => other.byte_size(),
    }
}

struct Cursor {
    offset: u32,
}

impl Cursor {
    fn alloc(&mut self, align: u32, size: u32) -> u32 {
        let start = align_up(self.offset, align);
        self.offset = start + size;
        start
    }
}

/// Runs the two-pass placement algorithm described in the module docs.
///
/// Variables are placed in declaration order; that order also determines
/// both push-constant offsets and UBO member order, which must match the
/// order the prelude generator emits declarations in.
pub fn place(variables: &[ShaderVariable], caps: &BackendCaps) -> Result<PlacementResult> {
    let n = variables.len();
    let mut placement: Vec<Option<Placement>> = vec![None; n];

    let mut pushc = Cursor { offset: 0 };
    let pushc_budget = if caps.supports_push_constants {
        caps.push_constant_budget
    } else {
        0
    };

    // Pass A: conservative push-constant placement for small or `dynamic` variables.
    for (i, var) in variables.iter().enumerate() {
        if !(var.shape.is_small() || var.dynamic) {
            continue;
        }
        let align = var.shape.align();
        let size = var.shape.byte_size();
        let candidate = align_up(pushc.offset, align) + size;
        if candidate <= pushc_budget {
            let offset = pushc.alloc(align, size);
            placement[i] = Some(Placement::PushConstant { offset });
        }
    }

    // Pass B: opportunistic placement for whatever Pass A skipped.
    let mut ubo = Cursor { offset: 0 };
    let ubo_budget = if caps.supports_ubo { caps.ubo_budget } else { 0 };
    let mut next_global = 0u32;

    for (i, var) in variables.iter().enumerate() {
        if placement[i].is_some() {
            continue;
        }

        let align = var.shape.align();
        let size = var.shape.byte_size();
        let pc_candidate = align_up(pushc.offset, align) + size;
        if pc_candidate <= pushc_budget {
            let offset = pushc.alloc(align, size);
            placement[i] = Some(Placement::PushConstant { offset });
            continue;
        }

        let ubo_eligible = caps.supports_ubo
            && caps.glsl_version >= caps.ubo_offsets_require_version
            && (!var.dynamic || !caps.supports_global_uniforms);
        if ubo_eligible {
            let align = std140_align(var.shape);
            let size = std140_size(var.shape);
            let candidate = align_up(ubo.offset, align) + size;
            if candidate <= ubo_budget {
                let offset = ubo.alloc(align, size);
                placement[i] = Some(Placement::Ubo { offset });
                continue;
            }
        }

        if caps.supports_global_uniforms {
            let index = next_global;
            next_global += 1;
            placement[i] = Some(Placement::Global { index });
            continue;
        }

        return Err(DispatchError::PlacementExhausted {
            variable: var.name.clone(),
        });
    }

    let placed = variables
        .iter()
        .zip(placement.into_iter())
        .map(|(var, p)| PlacedVariable {
            name: var.name.clone(),
            shape: var.shape,
            placement: p.expect("all variables placed or an error was returned"),
            last_value: Vec::new(),
        })
        .collect();

    Ok(PlacementResult {
        variables: placed,
        push_constant_size: align_up(pushc.offset, 4),
        ubo_size: ubo.offset,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::VarShape;

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

    fn var(name: &str, shape: VarShape, dynamic: bool) -> ShaderVariable {
        ShaderVariable {
            name: name.to_string(),
            shape,
            dynamic,
            data: smallvec::SmallVec::from_slice(&vec![0u8; shape.byte_size() as usize]),
        }
    }

    #[test]
    fn small_variables_land_in_push_constants() {
        let vars = vec![var("tint", VarShape::Vec4, false)];
        let result = place(&vars, &caps()).unwrap();
        assert!(matches!(result.variables[0].placement, Placement::PushConstant { offset: 0 }));
        assert_eq!(result.push_constant_size, 16);
    }

    #[test]
    fn non_dynamic_matrix_skips_pass_a_but_fits_in_pass_b() {
        // Pass A never considers a non-dynamic matrix, but pass B still
        // tries push-constants first before falling back to UBO/global.
        let vars = vec![var("proj", VarShape::Mat4, false)];
        let result = place(&vars, &caps()).unwrap();
        assert!(matches!(result.variables[0].placement, Placement::PushConstant { .. }));
    }

    #[test]
    fn non_dynamic_matrix_overflows_to_ubo_when_budget_is_tight() {
        let mut c = caps();
        c.push_constant_budget = 0;
        let vars = vec![var("proj", VarShape::Mat4, false)];
        let result = place(&vars, &c).unwrap();
        assert!(matches!(result.variables[0].placement, Placement::Ubo { .. } | Placement::Global { .. }));
    }

    #[test]
    fn dynamic_matrix_prefers_push_constants_when_it_fits() {
        let vars = vec![var("proj", VarShape::Mat4, true)];
        let result = place(&vars, &caps()).unwrap();
        assert!(matches!(result.variables[0].placement, Placement::PushConstant { .. }));
    }

    #[test]
    fn exhausted_push_constants_fall_back_to_ubo() {
        // non-dynamic matrices never qualify for pass A, so all three
        // compete for pass B's push-constant budget before overflowing to UBO.
        let vars = vec![
            var("a", VarShape::Mat4, false),
            var("b", VarShape::Mat4, false),
            var("c", VarShape::Mat4, false),
        ];
        let result = place(&vars, &caps()).unwrap();
        assert!(matches!(result.variables[2].placement, Placement::Ubo { .. }));
    }

    #[test]
    fn dynamic_overflow_prefers_global_over_ubo() {
        let vars = vec![
            var("a", VarShape::Mat4, true),
            var("b", VarShape::Mat4, true),
            var("c", VarShape::Mat4, true),
        ];
        let result = place(&vars, &caps()).unwrap();
        assert!(matches!(result.variables[2].placement, Placement::Global { .. }));
    }

    #[test]
    fn placement_exhaustion_is_reported() {
        let mut c = caps();
        c.supports_ubo = false;
        c.supports_global_uniforms = false;
        c.push_constant_budget = 0;
        let vars = vec![var("x", VarShape::Float, false)];
        assert!(place(&vars, &c).is_err());
    }
}
