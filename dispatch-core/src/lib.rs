//! Shader dispatch cache: builds, fingerprints, caches, and runs GPU passes
//! assembled at runtime from shader fragments, variables, and descriptors.
//!
//! The crate is backend-agnostic: concrete GPU access is provided by an
//! implementation of [`backend::GpuBackend`] (see `dispatch-gl` and
//! `dispatch-vk`). Everything here assumes single-threaded, cooperative use
//! of one [`cache::DispatchRoot`] per backend instance.

pub mod accumulator;
pub mod backend;
pub mod binary_cache;
pub mod cache;
pub mod config;
pub mod descriptor;
pub mod dispatch;
pub mod error;
pub mod eviction;
pub mod placement;
pub mod prelude;
pub mod record;
pub mod signature;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use accumulator::{AccumulatorPool, ShaderAccumulator};
pub use backend::GpuBackend;
pub use cache::DispatchRoot;
pub use config::DispatchConfig;
pub use error::{DispatchError, Result};
pub use signature::Signature;
