//! The compiled pass record: a live GPU pass plus its placement metadata
//! and per-call scratch buffers.

use crate::backend::{BlendParams, GpuBackend, PassKind, PrimitiveTopology};
use crate::descriptor::DescriptorType;
use crate::placement::PlacedVariable;
use crate::signature::Signature;

/// A descriptor slot bound at pass-construction time: its type and the
/// binding index the backend assigned it.
#[derive(Clone, Debug)]
pub struct BoundSlot {
    pub ty: DescriptorType,
    pub binding: u32,
}

/// Parameters a raster record was built against, used to decide whether a
/// cache lookup with the same signature is actually reusable (see
/// `cache::find_or_build`).
#[derive(Clone, Debug, Default)]
pub struct RasterMatchKey {
    pub target_format_tag: u64,
    pub blend: Option<BlendParams>,
    pub load_target: bool,
    pub vertex_params: Option<(PrimitiveTopology, u32)>,
}

pub struct CompiledPassRecord<B: GpuBackend> {
    pub signature: Signature,
    /// `None` is the permanently-failed sentinel: the signature is known bad
    /// and will not be retried for the life of this `DispatchRoot`.
    pub pass: Option<B::Pass>,
    pub last_used_frame: u64,
    pub kind: PassKind,
    pub raster_key: RasterMatchKey,
    pub variables: Vec<PlacedVariable>,
    pub descriptors: Vec<BoundSlot>,
    pub push_constant_scratch: Vec<u8>,
    pub ubo_buffer: Option<B::Buffer>,
    pub ubo_host_scratch: Vec<u8>,
    pub vertex_scratch: Vec<u8>,
    /// Backend-opaque compiled program bytes returned by `pass_create`, if
    /// any, kept around so a later `save` can persist them.
    pub cached_program: Option<Vec<u8>>,
}

impl<B: GpuBackend> CompiledPassRecord<B> {
    pub fn matches(&self, signature: Signature, kind: PassKind, raster_key: Option<&RasterMatchKey>) -> bool {
        if self.signature != signature || self.kind != kind {
            return false;
        }
        match kind {
            PassKind::Compute => true,
            PassKind::Raster => {
                let key = match raster_key {
                    Some(k) => k,
                    None => return false,
                };
                self.raster_key.target_format_tag == key.target_format_tag
                    && self.raster_key.blend == key.blend
                    && self.raster_key.load_target == key.load_target
                    && (key.vertex_params.is_none() || self.raster_key.vertex_params == key.vertex_params)
            }
        }
    }
}
