//! OpenGL 4.5 implementation of `dispatch_core::GpuBackend`.
//!
//! Grounded in `autograph-render-gl`'s `OpenGlBackend`/debug-callback setup:
//! raw bindings generated at build time via `gl_generator`, a single
//! `DEBUG_OUTPUT` callback routed through `log`, and DSA-style object
//! creation. Window/context/swapchain creation stays out of scope (see
//! `SPEC_FULL.md` §1); callers hand this backend already-created texture
//! and buffer names via [`backend::GlBackend::wrap_texture`].

pub mod backend;
pub mod shader;

pub mod gl {
    #![allow(clippy::all)]
    include!(concat!(env!("OUT_DIR"), "/bindings.rs"));
}

pub use backend::{GlBackend, GlBuffer, GlPass, GlTexture};
