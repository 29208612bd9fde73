//! An in-memory `GpuBackend` used by this crate's own tests and available
//! to `dispatch-gl`/`dispatch-vk` for their own integration tests behind
//! the `test-util` feature.

use crate::backend::{
    BackendCaps, GpuBackend, PassCreateParams, PassCreateResult, PassRunParams,
};
use crate::descriptor::DescriptorType;
use std::collections::HashMap;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct MockTexture(pub u64);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct MockBuffer(pub u64);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct MockPass(pub u64);

#[derive(Clone, Debug, Default)]
pub struct MockTextureInfo {
    pub renderable: bool,
    pub storable: bool,
    pub width: u32,
    pub height: u32,
    pub format_tag: u64,
}

pub struct MockBackend {
    next_id: u64,
    pub caps: BackendCaps,
    pub pass_create_calls: usize,
    pub pass_run_calls: usize,
    /// The `fragment_source`/`compute_source` text passed to the last
    /// `pass_create` call, and whether it was handed a `cached_program`.
    pub last_create_had_cached_program: Option<bool>,
    pub last_source: Option<String>,
    textures: HashMap<u64, MockTextureInfo>,
    alive_passes: HashMap<u64, Vec<u8>>,
}

impl MockBackend {
    pub fn new() -> Self {
        MockBackend {
            next_id: 1,
            caps: BackendCaps {
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
            },
            pass_create_calls: 0,
            pass_run_calls: 0,
            last_create_had_cached_program: None,
            last_source: None,
            textures: HashMap::new(),
            alive_passes: HashMap::new(),
        }
    }

    pub fn alloc_pass(&mut self) -> MockPass {
        let id = self.next_id;
        self.next_id += 1;
        MockPass(id)
    }

    pub fn create_texture(&mut self, info: MockTextureInfo) -> MockTexture {
        let id = self.next_id;
        self.next_id += 1;
        self.textures.insert(id, info);
        MockTexture(id)
    }

    fn fingerprint_source(source: &str) -> Vec<u8> {
        use std::hash::{Hash, Hasher};
        let mut hasher = fxhash::FxHasher64::default();
        source.hash(&mut hasher);
        hasher.finish().to_le_bytes().to_vec()
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuBackend for MockBackend {
    type Texture = MockTexture;
    type Buffer = MockBuffer;
    type Pass = MockPass;

    fn caps(&self) -> BackendCaps {
        self.caps
    }

    fn desc_namespace(&self, ty: DescriptorType) -> usize {
        match ty {
            DescriptorType::SampledImage => 0,
            DescriptorType::StorageImage => 1,
            DescriptorType::UniformBuffer => 2,
            DescriptorType::StorageBuffer => 3,
            DescriptorType::UniformTexelBuffer => 4,
            DescriptorType::StorageTexelBuffer => 5,
        }
    }

    fn pass_create(&mut self, params: &PassCreateParams<'_, Self>) -> Option<PassCreateResult<Self>> {
        self.pass_create_calls += 1;
        let source = params
            .fragment_source
            .or(params.compute_source)
            .unwrap_or("");

        self.last_create_had_cached_program = Some(params.cached_program.is_some());
        self.last_source = Some(source.to_string());

        let bytes = match params.cached_program {
            Some(existing) => existing.to_vec(),
            None => Self::fingerprint_source(source),
        };

        let id = self.next_id;
        self.next_id += 1;
        self.alive_passes.insert(id, bytes.clone());
        Some(PassCreateResult {
            pass: MockPass(id),
            cached_program: Some(bytes),
        })
    }

    fn pass_run(&mut self, _pass: Self::Pass, _params: &PassRunParams<'_, Self>) {
        self.pass_run_calls += 1;
    }

    fn pass_destroy(&mut self, pass: Self::Pass) {
        self.alive_passes.remove(&pass.0);
    }

    fn buf_create(&mut self, _size: usize, _uniform: bool, _host_writable: bool) -> Self::Buffer {
        let id = self.next_id;
        self.next_id += 1;
        MockBuffer(id)
    }

    fn buf_write(&mut self, _buf: Self::Buffer, _offset: usize, _data: &[u8]) {}

    fn buf_destroy(&mut self, _buf: Self::Buffer) {}

    fn texture_is_renderable(&self, texture: Self::Texture) -> bool {
        self.textures.get(&texture.0).map(|t| t.renderable).unwrap_or(true)
    }

    fn texture_is_storable(&self, texture: Self::Texture) -> bool {
        self.textures.get(&texture.0).map(|t| t.storable).unwrap_or(false)
    }

    fn texture_dimensions(&self, texture: Self::Texture) -> (u32, u32) {
        self.textures
            .get(&texture.0)
            .map(|t| (t.width, t.height))
            .unwrap_or((256, 256))
    }

    fn texture_format_tag(&self, texture: Self::Texture) -> u64 {
        self.textures.get(&texture.0).map(|t| t.format_tag).unwrap_or(0)
    }
}
