//! GPU side of octahedral impostors.
//!
//! Provides a wgpu [`BakeBackend`](octahedral::BakeBackend) for the atlas
//! baker, atlas upload, and a billboard pipeline that blends three sprites
//! per instance. Everything renders off-screen; the host owns presentation.

pub mod camera;
pub mod data;
pub mod renderer;

pub use renderer::{
    atlas::GpuAtlas,
    bake::WgpuBakeBackend,
    context::GfxContext,
    impostor_params,
    pipelines::impostor::{ImpostorBatch, ImpostorPipeline},
    Renderer,
};
