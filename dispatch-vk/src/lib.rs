//! Vulkan 1.0+ implementation of `dispatch_core::GpuBackend`.
//!
//! Grounded in `gfx2`'s `renderer::backend::vk` module: the `Queue`/`Queues`
//! split and `Config`-driven construction survive here, generalized to the
//! single combined graphics+compute queue this backend actually needs (no
//! swapchain, no presentation, no transfer-specific queue — see
//! `SPEC_FULL.md` §1, window/surface ownership stays with the caller).
//! Shader text arrives as GLSL from `dispatch-core`'s prelude generator and
//! is compiled to SPIR-V with `shaderc`, the same crate the teacher's GL
//! backend already uses for its own GLSL-to-SPIR-V round trip
//! (`renderer/backend/gl/pipeline_file.rs::compile_glsl_to_spirv`).

pub mod backend;
pub mod memory;
pub mod shader;

pub use backend::{VkBackend, VkBuffer, VkPass, VkTexture};
