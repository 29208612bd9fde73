//! The dispatch root: owner of the accumulator pool, the live compiled pass
//! records, the persisted-but-unattached program cache, and the frame clock.

use crate::accumulator::ShaderAccumulator;
use crate::backend::{
    BlendParams, GpuBackend, PassCreateParams, PassKind, PrimitiveTopology,
};
use crate::config::DispatchConfig;
use crate::descriptor::DescriptorType;
use crate::error::{DispatchError, Result};
use crate::eviction;
use crate::placement;
use crate::prelude::{self, BoundDescriptor, PreludeInput};
use crate::record::{BoundSlot, CompiledPassRecord, RasterMatchKey};
use crate::signature::{self, Signature};
use log::{debug, error, trace, warn};
use std::collections::HashMap;

/// A previously persisted compiled program that has not yet been reattached
/// to a live record (see `binary_cache::load`).
pub struct CachedProgramEntry {
    pub signature: Signature,
    pub bytes: Vec<u8>,
}

/// What a caller is asking `find_or_build` to satisfy: everything besides
/// the accumulator itself that decides whether an existing record is reusable.
pub struct DispatchQuery<'a> {
    pub kind: PassKind,
    pub raster_key: Option<RasterMatchKey>,
    pub prelude_kind: crate::backend::PassKind,
    pub vertex_stride: u32,
    pub topology: PrimitiveTopology,
    pub vertex_attributes: &'a [crate::backend::VertexAttribute],
    pub blend: Option<BlendParams>,
    pub load_target: bool,
    _marker: std::marker::PhantomData<&'a ()>,
}

impl<'a> DispatchQuery<'a> {
    pub fn compute() -> Self {
        DispatchQuery {
            kind: PassKind::Compute,
            raster_key: None,
            prelude_kind: PassKind::Compute,
            vertex_stride: 0,
            topology: PrimitiveTopology::TriangleList,
            vertex_attributes: &[],
            blend: None,
            load_target: false,
            _marker: std::marker::PhantomData,
        }
    }

    pub fn raster(raster_key: RasterMatchKey) -> Self {
        DispatchQuery {
            kind: PassKind::Raster,
            blend: raster_key.blend,
            load_target: raster_key.load_target,
            vertex_stride: raster_key.vertex_params.map(|(_, s)| s).unwrap_or(0),
            topology: raster_key.vertex_params.map(|(t, _)| t).unwrap_or(PrimitiveTopology::TriangleList),
            vertex_attributes: &[],
            raster_key: Some(raster_key),
            prelude_kind: PassKind::Raster,
            _marker: std::marker::PhantomData,
        }
    }
}

/// Owns everything the dispatch cache needs across frames for a single
/// backend instance. Not `Sync`: all mutating entry points take `&mut self`,
/// by design (see the concurrency model) rather than through internal locking.
pub struct DispatchRoot<B: GpuBackend> {
    pub(crate) backend: B,
    pub(crate) records: Vec<CompiledPassRecord<B>>,
    pub(crate) cached_programs: Vec<CachedProgramEntry>,
    pub(crate) frame_index: u64,
    pub(crate) capacity: usize,
    pub(crate) config: DispatchConfig,
    namespace_counters: HashMap<usize, u32>,
}

impl<B: GpuBackend> DispatchRoot<B> {
    pub fn new(backend: B, config: DispatchConfig) -> Self {
        DispatchRoot {
            backend,
            records: Vec::new(),
            cached_programs: Vec::new(),
            frame_index: 0,
            capacity: config.max_passes,
            config,
            namespace_counters: HashMap::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Advances the frame clock. Callers should also call
    /// `AccumulatorPool::reset_frame` at the same point.
    pub fn advance_frame(&mut self) {
        self.frame_index += 1;
    }

    fn next_binding(&mut self, ty: DescriptorType) -> u32 {
        let namespace = self.backend.desc_namespace(ty);
        let counter = self.namespace_counters.entry(namespace).or_insert(0);
        let binding = *counter;
        *counter += 1;
        binding
    }

    fn reset_binding_counters(&mut self) {
        self.namespace_counters.clear();
    }

    /// Core of the signature & cache component (spec §4.4): look up a live
    /// record matching `acc` and `query`; on miss, place variables, generate
    /// the prelude, ask the backend to create the pass, and insert a new
    /// record (running eviction afterward).
    pub fn find_or_build(
        &mut self,
        acc: &ShaderAccumulator<B>,
        query: &DispatchQuery<'_>,
    ) -> Result<usize> {
        if acc.is_failed() {
            return Err(DispatchError::ShaderFailed);
        }

        let caps = self.backend.caps();
        let signature = signature::compute(acc);

        if let Some(idx) = self.records.iter().position(|r| {
            r.matches(signature, query.kind, query.raster_key.as_ref())
        }) {
            if self.records[idx].pass.is_none() {
                trace!("dispatch cache hit on failed-pass sentinel for signature {:?}", signature);
                return Err(DispatchError::BackendFailure { stage: "pass_create" });
            }
            self.records[idx].last_used_frame = self.frame_index;
            trace!("dispatch cache hit for signature {:?}", signature);
            return Ok(idx);
        }

        debug!("dispatch cache miss for signature {:?}, building new pass", signature);

        self.reset_binding_counters();
        let placement_result = placement::place(&acc.variables, &caps)?;

        let mut bound_descriptors = Vec::with_capacity(acc.descriptors.len());
        let mut descriptor_names = Vec::with_capacity(acc.descriptors.len());
        let mut descriptor_types = Vec::with_capacity(acc.descriptors.len());
        for (i, d) in acc.descriptors.iter().enumerate() {
            let ty = d.descriptor_type();
            let binding = self.next_binding(ty);
            descriptor_names.push(format!("binding_{}", i));
            descriptor_types.push(ty);
            bound_descriptors.push(BoundSlot { ty, binding });
        }

        let has_ubo_vars = placement_result
            .variables
            .iter()
            .any(|v| matches!(v.placement, crate::placement::Placement::Ubo { .. }));
        let ubo_buffer = if has_ubo_vars {
            Some(self.backend.buf_create(placement_result.ubo_size as usize, true, true))
        } else {
            None
        };

        let prelude_descriptors: Vec<BoundDescriptor> = bound_descriptors
            .iter()
            .zip(descriptor_names.iter())
            .map(|(b, name)| BoundDescriptor {
                name: name.clone(),
                ty: b.ty,
                binding: b.binding,
            })
            .collect();

        let prelude_input = PreludeInput {
            kind: query.prelude_kind,
            caps: &caps,
            placement: &placement_result.variables,
            push_constant_size: placement_result.push_constant_size,
            descriptors: &prelude_descriptors,
            explicit_bindings: caps.requires_explicit_bindings,
            output: acc.output,
            compute_group_size: acc.compute_group_size,
        };
        let source = prelude::generate(&prelude_input, &acc.fragments);

        // The projection matrix added by `dispatch::dispatch_vertex` (named
        // `u_projection`) placed like any other variable; raster backends
        // need to know where it landed to declare and apply it in their
        // built-in vertex stage.
        let projection = placement_result
            .variables
            .iter()
            .find(|v| v.name == "u_projection")
            .map(|v| v.placement);

        let global_slots: Vec<crate::backend::GlobalVarSlot> = placement_result
            .variables
            .iter()
            .filter_map(|v| match v.placement {
                crate::placement::Placement::Global { index } => {
                    Some(crate::backend::GlobalVarSlot { index, name: &v.name, shape: v.shape })
                }
                _ => None,
            })
            .collect();

        // Look for previously persisted bytes for this exact signature.
        let cached_bytes_idx = self.cached_programs.iter().position(|e| e.signature == signature);
        let cached_bytes = cached_bytes_idx.map(|i| self.cached_programs[i].bytes.clone());

        let mut params = PassCreateParams::<B>::new(query.kind);
        params.vertex_stride = query.vertex_stride;
        params.topology = query.topology;
        params.vertex_attributes = query.vertex_attributes;
        params.descriptors = &descriptor_types;
        params.globals = &global_slots;
        params.push_constant_size = placement_result.push_constant_size;
        params.blend = query.blend;
        params.load_target = query.load_target;
        params.cached_program = cached_bytes.as_deref();
        params.projection = projection;
        match query.kind {
            PassKind::Raster => params.fragment_source = Some(&source),
            PassKind::Compute => params.compute_source = Some(&source),
        }

        let create_result = self.backend.pass_create(&params);

        if let Some(i) = cached_bytes_idx {
            self.cached_programs.remove(i);
        }

        let record = match create_result {
            Some(result) => {
                if let Some(bytes) = &result.cached_program {
                    trace!("backend returned {} bytes of compiled program for new pass", bytes.len());
                }
                CompiledPassRecord {
                    signature,
                    pass: Some(result.pass),
                    last_used_frame: self.frame_index,
                    kind: query.kind,
                    raster_key: query.raster_key.clone().unwrap_or_default(),
                    variables: placement_result.variables,
                    descriptors: bound_descriptors,
                    push_constant_scratch: vec![0u8; placement_result.push_constant_size as usize],
                    ubo_buffer,
                    ubo_host_scratch: vec![0u8; placement_result.ubo_size as usize],
                    vertex_scratch: Vec::new(),
                    cached_program: result.cached_program,
                }
            }
            None => {
                error!("backend failed to create pass for signature {:?}", signature);
                if let Some(buf) = ubo_buffer {
                    self.backend.buf_destroy(buf);
                }
                CompiledPassRecord {
                    signature,
                    pass: None,
                    last_used_frame: self.frame_index,
                    kind: query.kind,
                    raster_key: query.raster_key.clone().unwrap_or_default(),
                    variables: placement_result.variables,
                    descriptors: bound_descriptors,
                    push_constant_scratch: Vec::new(),
                    ubo_buffer: None,
                    ubo_host_scratch: Vec::new(),
                    vertex_scratch: Vec::new(),
                    cached_program: None,
                }
            }
        };

        let failed = record.pass.is_none();
        self.records.push(record);
        let idx = self.records.len() - 1;

        if failed {
            return Err(DispatchError::BackendFailure { stage: "pass_create" });
        }

        if self.records.len() > self.capacity {
            let evicted = eviction::collect(&mut self.records, &mut self.backend, self.frame_index, self.config.min_age);
            if evicted == 0 {
                self.capacity *= 2;
                warn!("no evictable records found, doubling dispatch cache capacity to {}", self.capacity);
            }
        }

        Ok(idx)
    }

    pub fn record(&self, idx: usize) -> &CompiledPassRecord<B> {
        &self.records[idx]
    }

    pub fn record_mut(&mut self, idx: usize) -> &mut CompiledPassRecord<B> {
        &mut self.records[idx]
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn destroy(mut self) {
        for record in self.records.drain(..) {
            if let Some(pass) = record.pass {
                self.backend.pass_destroy(pass);
            }
            if let Some(buf) = record.ubo_buffer {
                self.backend.buf_destroy(buf);
            }
        }
    }
}
